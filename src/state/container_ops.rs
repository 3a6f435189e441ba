//! Collapse/expand and the hyperedges they produce.
//!
//! Collapsing builds a [`CollapsePlan`] against the current state and then
//! applies it in one step. Expanding re-derives every hyperedge from the raw
//! edge set instead of unpicking the aggregation incrementally.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use once_cell::sync::Lazy;

use crate::error::{Error, InvariantRule, InvariantViolation, Result};
use crate::ir::{Edge, EntityKind, HyperEdge};

use super::VisualizationState;

/// A group of mutually exclusive style tags. An edge expresses at most one
/// value per channel.
#[derive(Debug, Clone, Copy)]
pub struct VisualChannel {
    pub name: &'static str,
    pub values: &'static [&'static str],
}

pub const VISUAL_CHANNELS: &[VisualChannel] = &[
    VisualChannel {
        name: "line-pattern",
        values: &["solid", "dashed", "dotted"],
    },
    VisualChannel {
        name: "line-width",
        values: &["thin", "normal", "thick"],
    },
    VisualChannel {
        name: "animation",
        values: &["static", "animated"],
    },
    VisualChannel {
        name: "arrowhead",
        values: &["arrow", "circle", "diamond", "none"],
    },
];

static CHANNEL_BY_TAG: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    VISUAL_CHANNELS
        .iter()
        .flat_map(|channel| channel.values.iter().map(|value| (*value, channel.name)))
        .collect()
});

fn channel_of(tag: &str) -> Option<&'static str> {
    CHANNEL_BY_TAG.get(tag.to_ascii_lowercase().as_str()).copied()
}

/// Display tags for a hyperedge: tags every merged edge carries, plus, per
/// visual channel, the value every edge expressing that channel agrees on.
pub fn merge_edge_tags<'a, I>(edges: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a Edge>,
{
    let edges: Vec<&Edge> = edges.into_iter().collect();
    let Some(first) = edges.first() else {
        return BTreeSet::new();
    };

    let mut merged: BTreeSet<String> = first
        .tags
        .iter()
        .filter(|tag| edges.iter().all(|edge| edge.tags.contains(*tag)))
        .cloned()
        .collect();

    for channel in VISUAL_CHANNELS {
        let mut agreed: Option<&String> = None;
        let mut conflict = false;
        for edge in &edges {
            let mut values = edge
                .tags
                .iter()
                .filter(|tag| channel_of(tag) == Some(channel.name));
            let Some(value) = values.next() else {
                continue;
            };
            if values.next().is_some() {
                conflict = true;
                break;
            }
            match agreed {
                None => agreed = Some(value),
                Some(existing) if existing.eq_ignore_ascii_case(value) => {}
                Some(_) => {
                    conflict = true;
                    break;
                }
            }
        }
        if !conflict {
            if let Some(value) = agreed {
                merged.insert(value.clone());
            }
        }
    }

    merged
}

fn build_hyperedge(source: String, target: String, aggregated: BTreeMap<String, Edge>) -> HyperEdge {
    HyperEdge {
        id: HyperEdge::id_for(&source, &target),
        tags: merge_edge_tags(aggregated.values()),
        source,
        target,
        aggregated_edges: aggregated,
        hidden: false,
    }
}

/// Structural changes of one collapse, computed before anything is touched.
#[derive(Debug)]
struct CollapsePlan {
    container: String,
    saved_flags: BTreeMap<String, bool>,
    hidden_vertices: Vec<String>,
    hidden_edges: Vec<String>,
    removed_hyper_edges: Vec<String>,
    hyper_edges: Vec<HyperEdge>,
}

fn plan_collapse(state: &VisualizationState, id: &str) -> CollapsePlan {
    let descendants = state.descendants(id);
    let subtree: HashSet<&str> = descendants.iter().map(String::as_str).collect();

    let hidden_after = |x: &str| subtree.contains(x) || state.is_hidden(x);
    let resolve_after = |x: &str| -> Option<String> {
        if !hidden_after(x) {
            return Some(x.to_string());
        }
        state
            .ancestors(x)
            .into_iter()
            .find(|ancestor| !hidden_after(ancestor))
    };

    let saved_flags: BTreeMap<String, bool> = descendants
        .iter()
        .filter_map(|d| state.container(d).map(|c| (d.clone(), c.collapsed)))
        .collect();

    let mut groups: BTreeMap<(String, String), BTreeMap<String, Edge>> = BTreeMap::new();
    let mut aggregate = |edge: &Edge| {
        let (Some(source), Some(target)) = (
            resolve_after(&edge.source),
            resolve_after(&edge.target),
        ) else {
            return;
        };
        // Both ends folded into the same entity: the edge is interior.
        if source == target {
            return;
        }
        groups
            .entry((source, target))
            .or_default()
            .insert(edge.id.clone(), edge.clone());
    };

    let mut hidden_edges = Vec::new();
    for edge in state.edges() {
        if edge.hidden {
            continue;
        }
        if subtree.contains(edge.source.as_str()) || subtree.contains(edge.target.as_str()) {
            hidden_edges.push(edge.id.clone());
            aggregate(edge);
        }
    }

    // Hyperedges ending inside the subtree (or on the container itself) are
    // dissolved and their aggregated edges re-homed one level up.
    let mut removed_hyper_edges = Vec::new();
    for hyper in state.hyper_edges() {
        let inside = subtree.contains(hyper.source.as_str())
            || subtree.contains(hyper.target.as_str())
            || hyper.touches(id);
        if !inside {
            continue;
        }
        removed_hyper_edges.push(hyper.id.clone());
        for edge in hyper.aggregated_edges.values() {
            aggregate(edge);
        }
    }

    let hyper_edges = groups
        .into_iter()
        .map(|((source, target), aggregated)| build_hyperedge(source, target, aggregated))
        .collect();

    CollapsePlan {
        container: id.to_string(),
        saved_flags,
        hidden_vertices: descendants,
        hidden_edges,
        removed_hyper_edges,
        hyper_edges,
    }
}

/// Output of a from-scratch derivation over the raw edges.
pub(super) struct DerivedEdges {
    pub(super) edge_visibility: Vec<(String, bool)>,
    pub(super) hyper_edges: BTreeMap<String, HyperEdge>,
}

pub(super) fn derive_hyperedges(state: &VisualizationState) -> DerivedEdges {
    let mut edge_visibility = Vec::with_capacity(state.edges.len());
    let mut groups: BTreeMap<(String, String), BTreeMap<String, Edge>> = BTreeMap::new();
    for edge in state.edges() {
        let hidden = state.is_hidden(&edge.source) || state.is_hidden(&edge.target);
        edge_visibility.push((edge.id.clone(), hidden));
        if !hidden {
            continue;
        }
        let (Some(source), Some(target)) = (
            state.resolve_visible_endpoint(&edge.source),
            state.resolve_visible_endpoint(&edge.target),
        ) else {
            continue;
        };
        if source == target {
            continue;
        }
        groups
            .entry((source, target))
            .or_default()
            .insert(edge.id.clone(), edge.clone());
    }

    let hyper_edges = groups
        .into_iter()
        .map(|((source, target), aggregated)| {
            let hyper = build_hyperedge(source, target, aggregated);
            (hyper.id.clone(), hyper)
        })
        .collect();

    DerivedEdges {
        edge_visibility,
        hyper_edges,
    }
}

impl VisualizationState {
    /// Collapses a container, hiding its subtree and folding every edge
    /// that crosses its boundary into hyperedges. Collapsing an already
    /// collapsed container is a successful no-op.
    pub fn collapse_container(&mut self, id: &str) -> Result<()> {
        let container = self.get_container(id)?;
        if container.collapsed {
            tracing::debug!(container = %id, "collapse skipped, already collapsed");
            return Ok(());
        }
        let plan = plan_collapse(self, id);
        self.apply_collapse(plan);
        Ok(())
    }

    fn apply_collapse(&mut self, plan: CollapsePlan) {
        let CollapsePlan {
            container,
            saved_flags,
            hidden_vertices,
            hidden_edges,
            removed_hyper_edges,
            hyper_edges,
        } = plan;

        if let Some(target) = self.containers.get_mut(&container) {
            target.collapsed = true;
            target.saved_descendant_flags = saved_flags;
        }
        for id in &hidden_vertices {
            if let Some(node) = self.nodes.get_mut(id) {
                node.hidden = true;
            } else if let Some(child) = self.containers.get_mut(id) {
                child.hidden = true;
                child.collapsed = true;
            }
        }
        for id in &hidden_edges {
            if let Some(edge) = self.edges.get_mut(id) {
                edge.hidden = true;
            }
        }
        for id in &removed_hyper_edges {
            self.hyper_edges.remove(id);
        }
        let created = hyper_edges.len();
        for hyper in hyper_edges {
            match self.hyper_edges.get_mut(&hyper.id) {
                Some(existing) => {
                    existing.aggregated_edges.extend(hyper.aggregated_edges);
                    existing.tags = merge_edge_tags(existing.aggregated_edges.values());
                }
                None => {
                    self.hyper_edges.insert(hyper.id.clone(), hyper);
                }
            }
        }
        self.touch();
        tracing::debug!(
            container = %container,
            hidden = hidden_vertices.len(),
            hidden_edges = hidden_edges.len(),
            dissolved = removed_hyper_edges.len(),
            hyperedges = created,
            "container collapsed"
        );
    }

    /// Expands a container, restoring the collapse flags its descendants had
    /// when it collapsed. Expanding an expanded container is a no-op. A
    /// container hidden inside a collapsed ancestor cannot be expanded.
    pub fn expand_container(&mut self, id: &str) -> Result<()> {
        let container = self.get_container(id)?;
        if !container.collapsed {
            tracing::debug!(container = %id, "expand skipped, already expanded");
            return Ok(());
        }
        if container.hidden {
            let blocker = self
                .ancestors(id)
                .into_iter()
                .rev()
                .find(|ancestor| {
                    self.container(ancestor)
                        .map(|c| c.collapsed)
                        .unwrap_or(false)
                })
                .unwrap_or_default();
            return Err(InvariantViolation::new(
                id,
                InvariantRule::ExpandedButHidden,
                format!("Container {id} is hidden inside collapsed {blocker}; expand it first"),
            )
            .into());
        }

        let saved = match self.containers.get_mut(id) {
            Some(container) => {
                container.collapsed = false;
                std::mem::take(&mut container.saved_descendant_flags)
            }
            None => return Err(Error::unknown(EntityKind::Container, id)),
        };
        for (descendant, collapsed) in saved {
            if let Some(child) = self.containers.get_mut(&descendant) {
                child.collapsed = collapsed;
            }
        }
        self.touch();
        self.refresh_visibility();
        self.rederive_hyperedges();
        tracing::debug!(
            container = %id,
            hyperedges = self.hyper_edges.len(),
            "container expanded"
        );
        Ok(())
    }

    /// Flips the collapse flag; returns the new value.
    pub fn toggle_container(&mut self, id: &str) -> Result<bool> {
        if self.get_container(id)?.collapsed {
            self.expand_container(id)?;
            Ok(false)
        } else {
            self.collapse_container(id)?;
            Ok(true)
        }
    }

    /// Collapses every container, innermost first.
    pub fn collapse_all(&mut self) -> Result<()> {
        let mut order: Vec<(usize, String)> = self
            .containers
            .keys()
            .map(|id| (self.ancestors(id).len(), id.clone()))
            .collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        for (_, id) in order {
            if !self.is_hidden(&id) {
                self.collapse_container(&id)?;
            }
        }
        Ok(())
    }

    /// Expands every container, outermost first.
    pub fn expand_all(&mut self) -> Result<()> {
        let mut order: Vec<(usize, String)> = self
            .containers
            .keys()
            .map(|id| (self.ancestors(id).len(), id.clone()))
            .collect();
        order.sort();
        for (_, id) in order {
            self.expand_container(&id)?;
        }
        Ok(())
    }

    /// Folds one freshly inserted raw edge into the current aggregation.
    pub(super) fn integrate_edge(&mut self, id: &str) {
        let Some(edge) = self.edges.get(id).cloned() else {
            return;
        };
        let hidden = self.is_hidden(&edge.source) || self.is_hidden(&edge.target);
        if let Some(stored) = self.edges.get_mut(id) {
            stored.hidden = hidden;
        }
        if !hidden {
            return;
        }
        let (Some(source), Some(target)) = (
            self.resolve_visible_endpoint(&edge.source),
            self.resolve_visible_endpoint(&edge.target),
        ) else {
            return;
        };
        if source == target {
            return;
        }
        let hyper_id = HyperEdge::id_for(&source, &target);
        let hyper = self
            .hyper_edges
            .entry(hyper_id)
            .or_insert_with(|| build_hyperedge(source, target, BTreeMap::new()));
        hyper.aggregated_edges.insert(edge.id.clone(), edge);
        hyper.tags = merge_edge_tags(hyper.aggregated_edges.values());
    }

    /// From-scratch hyperedge set for the current collapse flags, without
    /// touching the stored one. Incremental collapse must agree with it.
    pub fn recompute_hyperedges(&self) -> BTreeMap<String, HyperEdge> {
        derive_hyperedges(self).hyper_edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ContainerSpec, EdgeSpec, NodeSpec};

    fn edge(id: &str, tags: &[&str]) -> Edge {
        EdgeSpec::new(id, "a", "b").with_tags(tags.iter().copied()).into_edge()
    }

    #[test]
    fn merge_keeps_tags_common_to_all_edges() {
        let edges = [edge("e1", &["Network", "Keyed"]), edge("e2", &["Network"])];
        let tags = merge_edge_tags(edges.iter());
        assert_eq!(tags, BTreeSet::from(["Network".to_string()]));
    }

    #[test]
    fn merge_keeps_channel_value_shared_by_edges_expressing_it() {
        let edges = [
            edge("e1", &["Dashed", "Network"]),
            edge("e2", &["Dashed"]),
            edge("e3", &["Network"]),
        ];
        let tags = merge_edge_tags(edges.iter());
        assert_eq!(tags, BTreeSet::from(["Dashed".to_string()]));
    }

    #[test]
    fn merge_drops_conflicting_channel_values() {
        let edges = [edge("e1", &["dashed", "thick"]), edge("e2", &["dotted", "thick"])];
        let tags = merge_edge_tags(edges.iter());
        assert_eq!(tags, BTreeSet::from(["thick".to_string()]));
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        assert!(merge_edge_tags(std::iter::empty()).is_empty());
    }

    fn nested() -> VisualizationState {
        let mut state = VisualizationState::new();
        for id in ["x", "a", "b", "c"] {
            state.add_node(NodeSpec::new(id)).unwrap();
        }
        state.add_container(ContainerSpec::new("inner", ["a", "b"])).unwrap();
        state.add_container(ContainerSpec::new("outer", ["inner", "c"])).unwrap();
        state.add_edge(EdgeSpec::new("xa", "x", "a").with_tags(["dashed"])).unwrap();
        state.add_edge(EdgeSpec::new("xb", "x", "b")).unwrap();
        state.add_edge(EdgeSpec::new("ab", "a", "b")).unwrap();
        state.add_edge(EdgeSpec::new("bc", "b", "c")).unwrap();
        state.add_edge(EdgeSpec::new("cx", "c", "x")).unwrap();
        state
    }

    #[test]
    fn collapse_merges_parallel_boundary_edges() {
        let mut state = nested();
        state.collapse_container("inner").unwrap();
        let hyper = state.hyper_edge("hyper_1_x_to_inner").unwrap();
        let ids: Vec<&str> = hyper.aggregated_edges.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["xa", "xb"]);
        assert_eq!(hyper.tags, BTreeSet::from(["dashed".to_string()]));
        assert!(state.hyper_edge("hyper_5_inner_to_c").is_some());
        assert!(state.edge("ab").unwrap().hidden);
        assert!(!state.edge("cx").unwrap().hidden);
        state.validate_invariants().unwrap();
    }

    #[test]
    fn nested_collapse_rehomes_aggregated_edges() {
        let mut state = nested();
        state.collapse_container("inner").unwrap();
        state.collapse_container("outer").unwrap();
        assert!(state.hyper_edge("hyper_1_x_to_inner").is_none());
        assert!(state.hyper_edge("hyper_5_inner_to_c").is_none());
        let into = state.hyper_edge("hyper_1_x_to_outer").unwrap();
        assert_eq!(into.aggregated_edges.len(), 2);
        let out = state.hyper_edge("hyper_5_outer_to_x").unwrap();
        assert_eq!(out.aggregated_edges.keys().collect::<Vec<_>>(), vec!["cx"]);
        assert_eq!(state.hyper_edges().count(), 2);
        state.validate_invariants().unwrap();
    }

    #[test]
    fn incremental_collapse_matches_full_derivation() {
        let mut state = nested();
        state.collapse_container("inner").unwrap();
        assert_eq!(
            state.hyper_edges().cloned().collect::<Vec<_>>(),
            state.recompute_hyperedges().into_values().collect::<Vec<_>>()
        );
        state.collapse_container("outer").unwrap();
        assert_eq!(
            state.hyper_edges().cloned().collect::<Vec<_>>(),
            state.recompute_hyperedges().into_values().collect::<Vec<_>>()
        );
    }

    #[test]
    fn expand_restores_inner_flags() {
        let mut state = nested();
        state.collapse_container("outer").unwrap();
        assert!(state.container("inner").unwrap().collapsed);
        state.expand_container("outer").unwrap();
        assert!(!state.container("inner").unwrap().collapsed);
        assert!(!state.node("a").unwrap().hidden);
        assert_eq!(state.hyper_edges().count(), 0);
        state.validate_invariants().unwrap();
    }

    #[test]
    fn expanding_hidden_container_is_refused() {
        let mut state = nested();
        state.collapse_container("inner").unwrap();
        state.collapse_container("outer").unwrap();
        let err = state.expand_container("inner").unwrap_err();
        assert!(err.to_string().contains("outer"), "{err}");
        assert!(state.container("inner").unwrap().collapsed);
    }

    #[test]
    fn collapse_and_expand_all() {
        let mut state = nested();
        state.collapse_all().unwrap();
        assert!(state.containers().all(|c| c.collapsed));
        assert_eq!(state.visible_containers().count(), 1);
        state.validate_invariants().unwrap();

        state.expand_all().unwrap();
        assert!(state.containers().all(|c| !c.collapsed));
        assert_eq!(state.visible_nodes().count(), 4);
        assert_eq!(state.hyper_edges().count(), 0);
        state.validate_invariants().unwrap();
    }

    #[test]
    fn toggle_reports_new_flag() {
        let mut state = nested();
        assert!(state.toggle_container("inner").unwrap());
        assert!(!state.toggle_container("inner").unwrap());
        assert!(matches!(
            state.toggle_container("nope"),
            Err(Error::UnknownEntity { .. })
        ));
    }

    #[test]
    fn edge_added_into_collapsed_region_joins_hyperedge() {
        let mut state = nested();
        state.collapse_container("inner").unwrap();
        state.add_edge(EdgeSpec::new("xb2", "x", "b").with_tags(["dotted"])).unwrap();
        let hyper = state.hyper_edge("hyper_1_x_to_inner").unwrap();
        assert_eq!(hyper.aggregated_edges.len(), 3);
        assert!(!hyper.tags.contains("dashed"));
        assert!(state.edge("xb2").unwrap().hidden);
    }
}
