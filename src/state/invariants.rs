use std::collections::{HashMap, HashSet};

use crate::error::{InvariantRule, InvariantViolation, Result};

use super::VisualizationState;

impl VisualizationState {
    /// Checks every structural and visibility invariant, returning the first
    /// violation found. Cheap enough to call after each test mutation, not
    /// meant for hot paths.
    pub fn validate_invariants(&self) -> Result<()> {
        self.check_edges()?;
        self.check_hierarchy()?;
        self.check_visibility()?;
        self.check_hyper_edges()?;
        Ok(())
    }

    fn check_edges(&self) -> Result<()> {
        for edge in self.edges() {
            for endpoint in [&edge.source, &edge.target] {
                if !self.has_vertex(endpoint) {
                    return Err(InvariantViolation::new(
                        &edge.id,
                        InvariantRule::DanglingEdgeEndpoint,
                        format!("Edge {} references non-existent node {}", edge.id, endpoint),
                    )
                    .into());
                }
            }
            if !edge.hidden && (self.is_hidden(&edge.source) || self.is_hidden(&edge.target)) {
                return Err(InvariantViolation::new(
                    &edge.id,
                    InvariantRule::VisibleEdgeWithHiddenEndpoint,
                    format!(
                        "Edge {} is visible but {} -> {} has a hidden endpoint",
                        edge.id, edge.source, edge.target
                    ),
                )
                .into());
            }
        }
        Ok(())
    }

    fn check_hierarchy(&self) -> Result<()> {
        let mut owner: HashMap<&str, &str> = HashMap::new();
        for container in self.containers() {
            for child in &container.children {
                if !self.has_vertex(child) {
                    return Err(InvariantViolation::new(
                        &container.id,
                        InvariantRule::OrphanedChild,
                        format!("Container {} lists non-existent child {child}", container.id),
                    )
                    .into());
                }
                if let Some(first) = owner.insert(child.as_str(), container.id.as_str()) {
                    return Err(InvariantViolation::new(
                        child,
                        InvariantRule::MultipleParents,
                        format!("{child} is claimed by both {first} and {}", container.id),
                    )
                    .into());
                }
            }
        }

        for container in self.containers() {
            let mut seen: HashSet<&str> = HashSet::from([container.id.as_str()]);
            let mut current = container.id.as_str();
            while let Some(&parent) = owner.get(current) {
                if !seen.insert(parent) {
                    return Err(InvariantViolation::new(
                        &container.id,
                        InvariantRule::HierarchyCycle,
                        format!("Container {} is its own ancestor", container.id),
                    )
                    .into());
                }
                current = parent;
            }
        }
        Ok(())
    }

    fn check_visibility(&self) -> Result<()> {
        for container in self.containers() {
            if container.hidden && !container.collapsed {
                return Err(InvariantViolation::new(
                    &container.id,
                    InvariantRule::ExpandedButHidden,
                    format!("Container {} is hidden but not collapsed", container.id),
                )
                .into());
            }
            if !container.collapsed {
                continue;
            }
            for descendant in self.descendants(&container.id) {
                if self.has_vertex(&descendant) && !self.is_hidden(&descendant) {
                    return Err(InvariantViolation::new(
                        &container.id,
                        InvariantRule::CollapsedLeaksVisibleDescendant,
                        format!(
                            "Container {} is collapsed but descendant {} is visible",
                            container.id, descendant
                        ),
                    )
                    .into());
                }
            }
        }
        Ok(())
    }

    fn check_hyper_edges(&self) -> Result<()> {
        for hyper in self.hyper_edges() {
            if hyper.aggregated_edges.is_empty() {
                return Err(InvariantViolation::new(
                    &hyper.id,
                    InvariantRule::EmptyHyperEdge,
                    format!("HyperEdge {} aggregates no edges", hyper.id),
                )
                .into());
            }
            for endpoint in [&hyper.source, &hyper.target] {
                if !self.has_vertex(endpoint) {
                    return Err(InvariantViolation::new(
                        &hyper.id,
                        InvariantRule::DanglingHyperEdgeEndpoint,
                        format!("HyperEdge {} references non-existent {}", hyper.id, endpoint),
                    )
                    .into());
                }
                if !hyper.hidden && self.is_hidden(endpoint) {
                    return Err(InvariantViolation::new(
                        &hyper.id,
                        InvariantRule::HyperEdgeOnHiddenEndpoint,
                        format!("HyperEdge {} is attached to hidden {}", hyper.id, endpoint),
                    )
                    .into());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{Error, InvariantRule, InvariantViolation};
    use crate::ir::{ContainerSpec, EdgeSpec, NodeSpec};
    use crate::state::VisualizationState;

    fn rule_of(err: Error) -> InvariantRule {
        match err {
            Error::InvariantViolation(InvariantViolation { rule, .. }) => rule,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn clean_state_passes() {
        let mut state = VisualizationState::new();
        state.add_node(NodeSpec::new("a")).unwrap();
        state.add_node(NodeSpec::new("b")).unwrap();
        state.add_container(ContainerSpec::new("c", ["a"])).unwrap();
        state.add_edge(EdgeSpec::new("e", "a", "b")).unwrap();
        state.validate_invariants().unwrap();
        state.collapse_container("c").unwrap();
        state.validate_invariants().unwrap();
    }

    #[test]
    fn manual_visibility_corruption_is_caught() {
        let mut state = VisualizationState::new();
        state.add_node(NodeSpec::new("a")).unwrap();
        state.add_container(ContainerSpec::new("c", ["a"])).unwrap();
        state.collapse_container("c").unwrap();
        state.nodes.get_mut("a").unwrap().hidden = false;
        let rule = rule_of(state.validate_invariants().unwrap_err());
        assert_eq!(rule, InvariantRule::CollapsedLeaksVisibleDescendant);
    }

    #[test]
    fn hidden_expanded_container_is_caught() {
        let mut state = VisualizationState::new();
        state.add_container(ContainerSpec::new("c", Vec::<String>::new())).unwrap();
        state.containers.get_mut("c").unwrap().hidden = true;
        let rule = rule_of(state.validate_invariants().unwrap_err());
        assert_eq!(rule, InvariantRule::ExpandedButHidden);
    }

    #[test]
    fn child_declared_ahead_of_its_node_is_orphaned_until_added() {
        let mut state = VisualizationState::new();
        state.add_container(ContainerSpec::new("c", ["late"])).unwrap();
        let rule = rule_of(state.validate_invariants().unwrap_err());
        assert_eq!(rule, InvariantRule::OrphanedChild);
        state.add_node(NodeSpec::new("late")).unwrap();
        state.validate_invariants().unwrap();
    }

    #[test]
    fn empty_hyperedge_is_caught() {
        let mut state = VisualizationState::new();
        state.add_node(NodeSpec::new("a")).unwrap();
        state.add_node(NodeSpec::new("b")).unwrap();
        state.add_container(ContainerSpec::new("c", ["a"])).unwrap();
        state.add_edge(EdgeSpec::new("e", "a", "b")).unwrap();
        state.collapse_container("c").unwrap();
        state
            .hyper_edges
            .get_mut("hyper_1_c_to_b")
            .unwrap()
            .aggregated_edges
            .clear();
        let rule = rule_of(state.validate_invariants().unwrap_err());
        assert_eq!(rule, InvariantRule::EmptyHyperEdge);
    }
}
