//! Canonical graph state: nodes, containers, raw edges and the hyperedges
//! derived from them.
//!
//! Visibility is never stored independently of the collapse flags: every
//! mutation either runs a collapse plan or re-derives hidden flags and
//! hyperedges from the container tree before it returns.

mod container_ops;
mod index;
mod invariants;
mod search;

pub use container_ops::{VISUAL_CHANNELS, VisualChannel, merge_edge_tags};
pub use search::SearchMatch;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::rc::Rc;

use crate::error::{Error, InvariantRule, InvariantViolation, Result};
use crate::ir::{
    Container, ContainerSpec, Dimensions, Edge, EdgeSpec, Entity, EntityKind, GraphDocument,
    GraphNode, HyperEdge, LayoutPhase, NodeSpec, Position,
};
use index::{IndexCache, StateIndex, build_index};

pub(crate) type Geometry = BTreeMap<String, (Option<Position>, Option<Dimensions>)>;

#[derive(Debug, Clone, Default)]
pub struct VisualizationState {
    nodes: BTreeMap<String, GraphNode>,
    containers: BTreeMap<String, Container>,
    edges: BTreeMap<String, Edge>,
    hyper_edges: BTreeMap<String, HyperEdge>,
    layout_phase: LayoutPhase,
    show_full_labels: bool,
    version: u64,
    cache: IndexCache,
}

impl VisualizationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a document in order: nodes, containers, edges.
    pub fn from_document(doc: GraphDocument) -> Result<Self> {
        let mut state = Self::new();
        for node in doc.nodes {
            state.add_node(node)?;
        }
        for container in doc.containers {
            state.add_container(container)?;
        }
        for edge in doc.edges {
            state.add_edge(edge)?;
        }
        Ok(state)
    }

    // ---------------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------------

    pub fn add_node(&mut self, spec: NodeSpec) -> Result<()> {
        self.ensure_free_vertex_id(&spec.id)?;
        if let Some(dimensions) = spec.dimensions {
            check_dimensions(&spec.id, dimensions)?;
        }
        let node = spec.into_node();
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        self.touch();
        // A container may have declared this id before it existed.
        if self.parent_of(&id).is_some() {
            self.refresh_visibility();
            self.rederive_hyperedges();
        }
        Ok(())
    }

    pub fn add_edge(&mut self, spec: EdgeSpec) -> Result<()> {
        if self.edges.contains_key(&spec.id) {
            return Err(Error::duplicate(EntityKind::Edge, spec.id));
        }
        if HyperEdge::parse_id(&spec.id).is_some() {
            return Err(Error::ReservedId {
                kind: EntityKind::Edge,
                id: spec.id,
            });
        }
        let edge = spec.into_edge();
        let id = edge.id.clone();
        self.edges.insert(id.clone(), edge);
        self.touch();
        self.integrate_edge(&id);
        Ok(())
    }

    /// Inserts a container. A container created collapsed hides its whole
    /// subtree before this returns.
    pub fn add_container(&mut self, spec: ContainerSpec) -> Result<()> {
        self.ensure_free_vertex_id(&spec.id)?;
        let index = self.index();
        let mut lineage: HashSet<String> = self.ancestors(&spec.id).into_iter().collect();
        lineage.insert(spec.id.clone());
        for child in &spec.children {
            if lineage.contains(child) {
                return Err(InvariantViolation::new(
                    &spec.id,
                    InvariantRule::HierarchyCycle,
                    format!("Container {} cannot contain its own ancestor {}", spec.id, child),
                )
                .into());
            }
            if let Some(owner) = index.parents.get(child) {
                return Err(InvariantViolation::new(
                    &spec.id,
                    InvariantRule::MultipleParents,
                    format!(
                        "Container {} claims {} which already belongs to {}",
                        spec.id, child, owner
                    ),
                )
                .into());
            }
        }

        let container = spec.into_container();
        let id = container.id.clone();
        let collapsed = container.collapsed;
        self.containers.insert(id.clone(), container);
        self.touch();
        if collapsed {
            let saved = self.force_collapse_descendants(&id);
            if let Some(container) = self.containers.get_mut(&id) {
                container.saved_descendant_flags = saved;
            }
        }
        self.refresh_visibility();
        self.rederive_hyperedges();
        tracing::debug!(container = %id, collapsed, "container added");
        Ok(())
    }

    /// Removes a node together with every raw edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Result<Vec<Edge>> {
        if self.nodes.remove(id).is_none() {
            return Err(Error::unknown(EntityKind::Node, id));
        }
        for container in self.containers.values_mut() {
            container.children.remove(id);
        }
        let removed = self.remove_incident_edges(id);
        self.touch();
        self.rederive_hyperedges();
        Ok(removed)
    }

    pub fn remove_edge(&mut self, id: &str) -> Result<Edge> {
        let edge = self
            .edges
            .remove(id)
            .ok_or_else(|| Error::unknown(EntityKind::Edge, id))?;
        self.touch();
        self.rederive_hyperedges();
        Ok(edge)
    }

    /// Removes a container, handing its children to its parent (or the
    /// root) and dropping raw edges that reference the container itself.
    pub fn remove_container(&mut self, id: &str) -> Result<Container> {
        let parent = self.parent_of(id);
        let container = self
            .containers
            .remove(id)
            .ok_or_else(|| Error::unknown(EntityKind::Container, id))?;

        for (descendant, collapsed) in &container.saved_descendant_flags {
            if let Some(child) = self.containers.get_mut(descendant) {
                child.collapsed = *collapsed;
            }
        }
        for other in self.containers.values_mut() {
            other.saved_descendant_flags.remove(id);
        }
        if let Some(parent) = parent.as_deref().and_then(|p| self.containers.get_mut(p)) {
            parent.children.remove(id);
            parent.children.extend(container.children.iter().cloned());
        }
        self.remove_incident_edges(id);
        self.touch();
        self.refresh_visibility();
        self.rederive_hyperedges();
        Ok(container)
    }

    /// Custom dimensions always win over engine-suggested sizes.
    pub fn set_node_dimensions(&mut self, id: &str, dimensions: Dimensions) -> Result<()> {
        check_dimensions(id, dimensions)?;
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::unknown(EntityKind::Node, id))?;
        node.custom_dimensions = Some(dimensions);
        node.dimensions = Some(dimensions);
        self.touch();
        Ok(())
    }

    pub fn clear_node_dimensions(&mut self, id: &str) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::unknown(EntityKind::Node, id))?;
        node.custom_dimensions = None;
        self.touch();
        Ok(())
    }

    pub fn set_show_full_labels(&mut self, show: bool) {
        if self.show_full_labels != show {
            self.show_full_labels = show;
            self.touch();
        }
    }

    pub fn show_full_labels(&self) -> bool {
        self.show_full_labels
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn container(&self, id: &str) -> Option<&Container> {
        self.containers.get(id)
    }

    pub fn get_container(&self, id: &str) -> Result<&Container> {
        self.containers
            .get(id)
            .ok_or_else(|| Error::unknown(EntityKind::Container, id))
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn hyper_edge(&self, id: &str) -> Option<&HyperEdge> {
        self.hyper_edges.get(id)
    }

    pub fn entity(&self, id: &str) -> Option<Entity<'_>> {
        if let Some(node) = self.nodes.get(id) {
            return Some(Entity::Node(node));
        }
        if let Some(container) = self.containers.get(id) {
            return Some(Entity::Container(container));
        }
        if let Some(edge) = self.edges.get(id) {
            return Some(Entity::Edge(edge));
        }
        self.hyper_edges.get(id).map(Entity::HyperEdge)
    }

    /// True when `id` names a node or a container.
    pub fn has_vertex(&self, id: &str) -> bool {
        self.nodes.contains_key(id) || self.containers.contains_key(id)
    }

    pub fn is_hidden(&self, id: &str) -> bool {
        if let Some(node) = self.nodes.get(id) {
            return node.hidden;
        }
        self.containers
            .get(id)
            .map(|container| container.hidden)
            .unwrap_or(false)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> + '_ {
        self.nodes.values()
    }

    pub fn containers(&self) -> impl Iterator<Item = &Container> + '_ {
        self.containers.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.values()
    }

    pub fn hyper_edges(&self) -> impl Iterator<Item = &HyperEdge> + '_ {
        self.hyper_edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    pub fn visible_nodes(&self) -> impl Iterator<Item = &GraphNode> + '_ {
        self.nodes.values().filter(|node| !node.hidden)
    }

    pub fn visible_edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.values().filter(|edge| !edge.hidden)
    }

    pub fn visible_containers(&self) -> impl Iterator<Item = &Container> + '_ {
        self.containers.values().filter(|container| !container.hidden)
    }

    pub fn visible_hyper_edges(&self) -> impl Iterator<Item = &HyperEdge> + '_ {
        self.hyper_edges.values().filter(|edge| !edge.hidden)
    }

    pub fn visible_container_count(&self) -> usize {
        self.visible_containers().count()
    }

    /// Raw edges folded into hyperedges touching `container`, or into any
    /// hyperedge when `container` is `None`. Sorted by edge id.
    pub fn get_aggregated_edges(&self, container: Option<&str>) -> Vec<&Edge> {
        let mut out: BTreeMap<&str, &Edge> = BTreeMap::new();
        for hyper in self.hyper_edges.values() {
            if let Some(id) = container {
                if !hyper.touches(id) {
                    continue;
                }
            }
            for edge in hyper.aggregated_edges.values() {
                out.insert(edge.id.as_str(), edge);
            }
        }
        out.into_values().collect()
    }

    pub fn parent_of(&self, id: &str) -> Option<String> {
        self.index().parents.get(id).cloned()
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: &str) -> Vec<String> {
        let index = self.index();
        let mut out = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut current = id;
        while let Some(parent) = index.parents.get(current) {
            if !seen.insert(parent.as_str()) {
                break;
            }
            out.push(parent.clone());
            current = parent.as_str();
        }
        out
    }

    /// Every node and container below `id`, parents before children.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut stack: Vec<String> = match self.containers.get(id) {
            Some(container) => container.children.iter().rev().cloned().collect(),
            None => return out,
        };
        while let Some(current) = stack.pop() {
            if current == id || !seen.insert(current.clone()) {
                continue;
            }
            if let Some(container) = self.containers.get(&current) {
                stack.extend(container.children.iter().rev().cloned());
            }
            out.push(current);
        }
        out
    }

    /// Absolute top-left corner, summing parent-relative positions.
    pub fn absolute_position(&self, id: &str) -> Option<Position> {
        let mut position = self.position_of(id)?;
        for ancestor in self.ancestors(id) {
            if let Some(offset) = self.position_of(&ancestor) {
                position = position.offset(offset);
            }
        }
        Some(position)
    }

    fn position_of(&self, id: &str) -> Option<Position> {
        if let Some(node) = self.nodes.get(id) {
            return node.position;
        }
        self.containers.get(id).and_then(|c| c.position)
    }

    /// The entity an edge endpoint is drawn at: `id` itself when visible,
    /// otherwise its nearest visible ancestor. Unknown ids resolve to
    /// themselves so that consumers see (and reject) the dangling reference.
    pub fn resolve_visible_endpoint(&self, id: &str) -> Option<String> {
        if !self.is_hidden(id) {
            return Some(id.to_string());
        }
        self.ancestors(id)
            .into_iter()
            .find(|ancestor| !self.is_hidden(ancestor))
    }

    /// Monotonic counter bumped by every mutation.
    pub fn topology_version(&self) -> u64 {
        self.version
    }

    pub fn layout_phase(&self) -> LayoutPhase {
        self.layout_phase
    }

    pub(crate) fn set_layout_phase(&mut self, phase: LayoutPhase) {
        if self.layout_phase != phase {
            tracing::trace!(from = self.layout_phase.as_str(), to = phase.as_str(), "layout phase");
        }
        self.layout_phase = phase;
    }

    /// Writes engine geometry onto a node. Custom dimensions are kept.
    /// Returns false for ids the state does not know.
    pub(crate) fn apply_node_geometry(
        &mut self,
        id: &str,
        position: Position,
        dimensions: Dimensions,
    ) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        node.position = Some(position);
        let custom = node.custom_dimensions.filter(Dimensions::is_valid);
        node.dimensions = Some(custom.unwrap_or(dimensions));
        true
    }

    pub(crate) fn apply_container_geometry(
        &mut self,
        id: &str,
        position: Position,
        dimensions: Dimensions,
    ) -> bool {
        let Some(container) = self.containers.get_mut(id) else {
            return false;
        };
        container.position = Some(position);
        container.dimensions = Some(dimensions);
        true
    }

    /// Current position and size of every node and container.
    pub(crate) fn geometry(&self) -> Geometry {
        let nodes = self
            .nodes
            .values()
            .map(|node| (node.id.clone(), (node.position, node.dimensions)));
        let containers = self
            .containers
            .values()
            .map(|c| (c.id.clone(), (c.position, c.dimensions)));
        nodes.chain(containers).collect()
    }

    /// Puts back geometry captured by [`VisualizationState::geometry`].
    /// Entities added since the capture keep what they have.
    pub(crate) fn restore_geometry(&mut self, geometry: &Geometry) {
        for (id, &(position, dimensions)) in geometry {
            if let Some(node) = self.nodes.get_mut(id) {
                node.position = position;
                node.dimensions = dimensions;
            } else if let Some(container) = self.containers.get_mut(id) {
                container.position = position;
                container.dimensions = dimensions;
            }
        }
    }

    pub(crate) fn has_position(&self, id: &str) -> bool {
        self.position_of(id).is_some()
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn touch(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    pub(crate) fn index(&self) -> Rc<StateIndex> {
        self.cache.get_or_build(self.version, || build_index(self))
    }

    fn ensure_free_vertex_id(&self, id: &str) -> Result<()> {
        if self.nodes.contains_key(id) {
            return Err(Error::duplicate(EntityKind::Node, id));
        }
        if self.containers.contains_key(id) {
            return Err(Error::duplicate(EntityKind::Container, id));
        }
        Ok(())
    }

    fn remove_incident_edges(&mut self, id: &str) -> Vec<Edge> {
        let doomed: Vec<String> = self
            .edges
            .values()
            .filter(|edge| edge.source == id || edge.target == id)
            .map(|edge| edge.id.clone())
            .collect();
        doomed
            .into_iter()
            .filter_map(|edge_id| self.edges.remove(&edge_id))
            .collect()
    }

    /// Marks every descendant container of `owner` collapsed and returns
    /// the flags they had before.
    fn force_collapse_descendants(&mut self, owner: &str) -> BTreeMap<String, bool> {
        let mut saved = BTreeMap::new();
        for id in self.descendants(owner) {
            if let Some(container) = self.containers.get_mut(&id) {
                saved.insert(id, container.collapsed);
                container.collapsed = true;
            }
        }
        saved
    }

    /// Recomputes every hidden flag from the collapse flags, top-down. A
    /// container that ends up hidden while expanded is collapsed, and the
    /// nearest collapsed ancestor remembers it was expanded.
    fn refresh_visibility(&mut self) {
        let index = self.index();
        let roots: Vec<String> = self
            .containers
            .keys()
            .filter(|id| !index.parents.contains_key(*id))
            .cloned()
            .collect();

        let mut visited: HashSet<String> = HashSet::new();
        // (id, hidden-by-ancestry, nearest collapsed ancestor)
        let mut stack: Vec<(String, bool, Option<String>)> =
            roots.into_iter().map(|id| (id, false, None)).collect();
        while let Some((id, hidden, collapsed_owner)) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                node.hidden = hidden;
                continue;
            }
            let Some(container) = self.containers.get_mut(&id) else {
                continue;
            };
            container.hidden = hidden;
            if hidden && !container.collapsed {
                container.collapsed = true;
                if let Some(owner) = collapsed_owner
                    .as_deref()
                    .and_then(|owner| self.containers.get_mut(owner))
                {
                    owner
                        .saved_descendant_flags
                        .entry(id.clone())
                        .or_insert(false);
                }
            }
            let Some(container) = self.containers.get(&id) else {
                continue;
            };
            let child_hidden = hidden || container.collapsed;
            let child_owner = if collapsed_owner.is_some() {
                collapsed_owner.clone()
            } else if container.collapsed {
                Some(id.clone())
            } else {
                None
            };
            for child in container.children.iter() {
                stack.push((child.clone(), child_hidden, child_owner.clone()));
            }
        }

        // Nodes without a parent are always visible.
        for node in self.nodes.values_mut() {
            if !index.parents.contains_key(&node.id) {
                node.hidden = false;
            }
        }
    }

    /// Replaces edge visibility and the hyperedge set with a from-scratch
    /// derivation over the raw edges.
    fn rederive_hyperedges(&mut self) {
        let derived = container_ops::derive_hyperedges(self);
        for (edge_id, hidden) in derived.edge_visibility {
            if let Some(edge) = self.edges.get_mut(&edge_id) {
                edge.hidden = hidden;
            }
        }
        self.hyper_edges = derived.hyper_edges;
        tracing::debug!(
            hyperedges = self.hyper_edges.len(),
            aggregated = self
                .hyper_edges
                .values()
                .map(|hyper| hyper.aggregated_edges.len())
                .sum::<usize>(),
            "hyperedges recomputed"
        );
    }

    pub(crate) fn visible_vertex_ids(&self) -> BTreeSet<&str> {
        self.visible_nodes()
            .map(|node| node.id.as_str())
            .chain(self.visible_containers().map(|c| c.id.as_str()))
            .collect()
    }
}

fn check_dimensions(id: &str, dimensions: Dimensions) -> Result<()> {
    if dimensions.is_valid() {
        return Ok(());
    }
    Err(Error::InvalidDimensions {
        kind: EntityKind::Node,
        id: id.to_string(),
        width: dimensions.width,
        height: dimensions.height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VisualizationState {
        let mut state = VisualizationState::new();
        for id in ["n1", "n2", "n3", "n4"] {
            state.add_node(NodeSpec::new(id)).unwrap();
        }
        state
            .add_container(ContainerSpec::new("inner", ["n2", "n3"]))
            .unwrap();
        state
            .add_container(ContainerSpec::new("outer", ["inner", "n4"]))
            .unwrap();
        state.add_edge(EdgeSpec::new("e1", "n1", "n2")).unwrap();
        state.add_edge(EdgeSpec::new("e2", "n3", "n4")).unwrap();
        state
    }

    #[test]
    fn duplicate_ids_are_rejected_across_vertex_kinds() {
        let mut state = sample();
        let err = state.add_node(NodeSpec::new("inner")).unwrap_err();
        assert!(matches!(
            err,
            Error::DuplicateId {
                kind: EntityKind::Container,
                ..
            }
        ));
        let err = state.add_edge(EdgeSpec::new("e1", "n1", "n4")).unwrap_err();
        assert!(matches!(err, Error::DuplicateId { kind: EntityKind::Edge, .. }));
    }

    #[test]
    fn edge_ids_shaped_like_hyperedges_are_rejected() {
        let mut state = sample();
        let taken = HyperEdge::id_for("n1", "inner");
        let err = state.add_edge(EdgeSpec::new(taken, "n1", "n4")).unwrap_err();
        assert!(matches!(err, Error::ReservedId { kind: EntityKind::Edge, .. }));
        state.add_edge(EdgeSpec::new("hyper_link", "n1", "n4")).unwrap();
    }

    #[test]
    fn degenerate_node_dimensions_are_rejected() {
        let mut state = sample();
        let err = state
            .set_node_dimensions("n1", Dimensions::new(f32::NAN, 10.0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDimensions { .. }));
        let err = state
            .add_node(NodeSpec::new("flat").with_dimensions(40.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDimensions { .. }));
        assert!(state.node("flat").is_none());
        assert!(state.node("n1").unwrap().custom_dimensions.is_none());

        state
            .set_node_dimensions("n1", Dimensions::new(40.0, 20.0))
            .unwrap();
        assert_eq!(
            state.node("n1").unwrap().dimensions,
            Some(Dimensions::new(40.0, 20.0))
        );
    }

    #[test]
    fn collapsed_container_hides_subtree_on_insert() {
        let mut state = VisualizationState::new();
        state.add_node(NodeSpec::new("a")).unwrap();
        state.add_node(NodeSpec::new("b")).unwrap();
        state.add_container(ContainerSpec::new("inner", ["b"])).unwrap();
        state
            .add_container(ContainerSpec::new("outer", ["a", "inner"]).collapsed(true))
            .unwrap();
        assert!(state.node("a").unwrap().hidden);
        assert!(state.node("b").unwrap().hidden);
        let inner = state.container("inner").unwrap();
        assert!(inner.hidden && inner.collapsed);
        assert!(!state.container("outer").unwrap().hidden);
        state.validate_invariants().unwrap();
    }

    #[test]
    fn node_added_after_collapsed_parent_starts_hidden() {
        let mut state = VisualizationState::new();
        state
            .add_container(ContainerSpec::new("c", ["late"]).collapsed(true))
            .unwrap();
        state.add_node(NodeSpec::new("late")).unwrap();
        assert!(state.node("late").unwrap().hidden);
        state.validate_invariants().unwrap();
    }

    #[test]
    fn second_parent_claim_is_rejected() {
        let mut state = sample();
        let err = state
            .add_container(ContainerSpec::new("other", ["n2"]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvariantViolation(InvariantViolation {
                rule: InvariantRule::MultipleParents,
                ..
            })
        ));
    }

    #[test]
    fn hierarchy_cycle_is_rejected() {
        let mut state = VisualizationState::new();
        state.add_container(ContainerSpec::new("a", ["b"])).unwrap();
        let err = state.add_container(ContainerSpec::new("b", ["a"])).unwrap_err();
        assert!(matches!(
            err,
            Error::InvariantViolation(InvariantViolation {
                rule: InvariantRule::HierarchyCycle,
                ..
            })
        ));
    }

    #[test]
    fn ancestry_queries_follow_the_tree() {
        let state = sample();
        assert_eq!(state.parent_of("n2").as_deref(), Some("inner"));
        assert_eq!(state.ancestors("n2"), vec!["inner", "outer"]);
        assert_eq!(state.descendants("outer"), vec!["inner", "n2", "n3", "n4"]);
        assert!(state.ancestors("n1").is_empty());
    }

    #[test]
    fn index_is_rebuilt_after_topology_changes() {
        let mut state = sample();
        let before = state.topology_version();
        assert_eq!(state.parent_of("n4").as_deref(), Some("outer"));
        assert_eq!(state.cache.cached_version(), Some(before));

        state.add_node(NodeSpec::new("n5")).unwrap();
        state.add_container(ContainerSpec::new("side", ["n5"])).unwrap();
        assert!(state.topology_version() > before);
        assert_eq!(state.parent_of("n5").as_deref(), Some("side"));
        assert_eq!(state.cache.cached_version(), Some(state.topology_version()));
    }

    #[test]
    fn remove_node_cascades_edges_and_membership() {
        let mut state = sample();
        let removed = state.remove_node("n2").unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "e1");
        assert!(!state.container("inner").unwrap().children.contains("n2"));
        state.validate_invariants().unwrap();
    }

    #[test]
    fn remove_container_reparents_children() {
        let mut state = sample();
        state.collapse_container("inner").unwrap();
        state.remove_container("inner").unwrap();
        let outer = state.container("outer").unwrap();
        assert!(outer.children.contains("n2"));
        assert!(outer.children.contains("n3"));
        assert!(!state.node("n2").unwrap().hidden);
        state.validate_invariants().unwrap();
    }

    #[test]
    fn custom_dimensions_survive_engine_geometry() {
        let mut state = sample();
        state
            .set_node_dimensions("n1", Dimensions::new(300.0, 90.0))
            .unwrap();
        assert!(state.apply_node_geometry("n1", Position::new(1.0, 2.0), Dimensions::new(10.0, 10.0)));
        assert_eq!(state.node("n1").unwrap().dimensions, Some(Dimensions::new(300.0, 90.0)));
        assert!(!state.apply_node_geometry("ghost", Position::default(), Dimensions::new(1.0, 1.0)));
    }

    #[test]
    fn absolute_position_sums_parent_offsets() {
        let mut state = sample();
        state.apply_container_geometry("outer", Position::new(100.0, 50.0), Dimensions::new(1.0, 1.0));
        state.apply_container_geometry("inner", Position::new(10.0, 5.0), Dimensions::new(1.0, 1.0));
        state.apply_node_geometry("n2", Position::new(1.0, 1.0), Dimensions::new(1.0, 1.0));
        assert_eq!(state.absolute_position("n2"), Some(Position::new(111.0, 56.0)));
    }

    #[test]
    fn dangling_edge_is_accepted_but_reported() {
        let mut state = sample();
        state.add_edge(EdgeSpec::new("e9", "n1", "n99")).unwrap();
        let err = state.validate_invariants().unwrap_err();
        assert!(err.to_string().contains("Edge e9 references non-existent node n99"));
    }
}
