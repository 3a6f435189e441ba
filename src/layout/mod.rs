//! Bridge between the visibility state and a layout engine.
//!
//! A layout runs in three steps so that callers can release the state
//! between them: [`LayoutBridge::build_request`] snapshots the visible
//! graph, [`LayoutBridge::compute`] awaits the engine, and
//! [`LayoutBridge::apply_result`] validates and writes geometry back.

mod engine;
mod sizing;
mod stress;
pub mod types;

pub use engine::{DagreEngine, LayoutEngine};
pub use types::{LayoutEdge, LayoutGraph, LayoutNode};

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::SharedState;
use crate::config::LayoutConfig;
use crate::error::{
    CONSISTENCY_REPORT_LIMIT, DataConsistencyError, Error, LayoutEngineError, Result,
};
use crate::ir::{Dimensions, LayoutPhase, Position};
use crate::state::{Geometry, VisualizationState};
use types::{
    ALGORITHM_STRESS, HIERARCHY_INCLUDE_CHILDREN, HIERARCHY_SEPARATE_CHILDREN, OPT_ALGORITHM,
    OPT_DIRECTION, OPT_HIERARCHY, OPT_NODE_SPACING, OPT_RANK_SPACING,
};

/// Snapshot handed to the engine, plus what is needed to judge the result.
#[derive(Debug, Clone)]
pub struct LayoutRequest {
    pub graph: LayoutGraph,
    pub topology_version: u64,
    /// Visible containers in the state when the request was built.
    pub visible_containers: usize,
    /// Container ids present in `graph`.
    pub container_ids: BTreeSet<String>,
    /// Ids whose geometry may be overwritten; `None` means all of them.
    pub scope: Option<BTreeSet<String>>,
}

impl LayoutRequest {
    pub fn expected_containers(&self) -> usize {
        self.container_ids.len()
    }

    pub fn returned_containers(&self, result: &LayoutGraph) -> usize {
        let mut count = 0;
        result.walk(|node, _| {
            if self.container_ids.contains(&node.id) {
                count += 1;
            }
        });
        count
    }
}

#[derive(Debug, Clone)]
pub struct LayoutOutcome {
    pub graph: LayoutGraph,
    pub used_fallback: bool,
}

/// Phase and geometry taken before an operation, so a failed one can be
/// undone without leaving stale sizes behind.
#[derive(Debug, Clone)]
pub struct LayoutCheckpoint {
    phase: LayoutPhase,
    geometry: Geometry,
}

impl LayoutCheckpoint {
    pub fn phase(&self) -> LayoutPhase {
        self.phase
    }
}

pub struct LayoutBridge<E> {
    engine: E,
    config: LayoutConfig,
}

impl<E: LayoutEngine> LayoutBridge<E> {
    pub fn new(engine: E, config: LayoutConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn to_layout_graph(&self, state: &VisualizationState) -> Result<LayoutGraph> {
        to_layout_graph(state, &self.config)
    }

    pub fn checkpoint(&self, state: &VisualizationState) -> LayoutCheckpoint {
        LayoutCheckpoint {
            phase: state.layout_phase(),
            geometry: state.geometry(),
        }
    }

    /// Rolls geometry and phase back to `checkpoint`.
    pub fn restore(&self, state: &mut VisualizationState, checkpoint: &LayoutCheckpoint) {
        state.restore_geometry(&checkpoint.geometry);
        state.set_layout_phase(checkpoint.phase);
    }

    /// Marks a layout attempt that will not complete.
    pub fn fail(&self, state: &mut VisualizationState) {
        state.set_layout_phase(LayoutPhase::Error);
    }

    /// Builds the engine input and moves the state into `LayingOut`.
    /// `relayout` limits which elements get new geometry.
    pub fn build_request(
        &self,
        state: &mut VisualizationState,
        relayout: Option<&[String]>,
    ) -> Result<LayoutRequest> {
        state.set_layout_phase(LayoutPhase::LayingOut);
        let graph = match to_layout_graph(state, &self.config) {
            Ok(graph) => graph,
            Err(err) => {
                state.set_layout_phase(LayoutPhase::Error);
                return Err(err);
            }
        };
        let container_ids = graph
            .node_ids()
            .into_iter()
            .filter(|id| state.container(id).is_some())
            .collect();
        let scope = relayout
            .filter(|ids| !ids.is_empty())
            .map(|ids| relayout_scope(state, ids));
        Ok(LayoutRequest {
            graph,
            topology_version: state.topology_version(),
            visible_containers: state.visible_container_count(),
            container_ids,
            scope,
        })
    }

    /// Runs the engine. A hitbox failure earns exactly one retry with the
    /// flattened stress configuration; anything else propagates unchanged.
    pub async fn compute(&self, request: &LayoutRequest) -> Result<LayoutOutcome> {
        tracing::debug!(
            nodes = request.graph.node_count(),
            edges = request.graph.edges.len(),
            scoped = request.scope.is_some(),
            "layout started"
        );
        match self.engine.layout(request.graph.clone()).await {
            Ok(graph) => {
                tracing::debug!("layout finished");
                Ok(LayoutOutcome {
                    graph,
                    used_fallback: false,
                })
            }
            Err(err) if err.is_hitbox_failure() => {
                tracing::warn!(error = %err, "layout engine failed on nested hierarchy, retrying with stress fallback");
                let graph = self
                    .engine
                    .layout(fallback_graph(&request.graph))
                    .await
                    .map_err(Error::from)?;
                tracing::debug!("fallback layout finished");
                Ok(LayoutOutcome {
                    graph,
                    used_fallback: true,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Validates the engine output and writes geometry back. Ids unknown to
    /// the state are skipped. Returns how many elements were updated.
    pub fn apply_result(
        &self,
        state: &mut VisualizationState,
        request: &LayoutRequest,
        result: &LayoutGraph,
    ) -> Result<usize> {
        state.set_layout_phase(LayoutPhase::Applying);
        if let Err(err) = validate_result(request, result) {
            state.set_layout_phase(LayoutPhase::Error);
            return Err(err.into());
        }

        let mut applied = 0;
        result.walk(|node, _| {
            let (Some(x), Some(y), Some(width), Some(height)) =
                (node.x, node.y, node.width, node.height)
            else {
                return;
            };
            if let Some(scope) = &request.scope {
                if !scope.contains(&node.id) && state.has_position(&node.id) {
                    return;
                }
            }
            let position = Position::new(x, y);
            let dimensions = Dimensions::new(width, height);
            if state.apply_node_geometry(&node.id, position, dimensions)
                || state.apply_container_geometry(&node.id, position, dimensions)
            {
                applied += 1;
            }
        });
        state.set_layout_phase(LayoutPhase::Ready);
        tracing::debug!(applied, "layout applied");
        Ok(applied)
    }

    /// Full layout against shared state. The state is never borrowed while
    /// the engine runs. An explicitly empty `relayout` skips layout.
    pub async fn layout(&self, state: &SharedState, relayout: Option<&[String]>) -> Result<()> {
        if relayout.is_some_and(|ids| ids.is_empty()) {
            tracing::debug!("layout skipped, empty relayout set");
            return Ok(());
        }
        let request = self.build_request(&mut state.borrow_mut(), relayout)?;
        let outcome = match self.compute(&request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.fail(&mut state.borrow_mut());
                return Err(err);
            }
        };
        self.apply_result(&mut state.borrow_mut(), &request, &outcome.graph)?;
        Ok(())
    }
}

/// Converts the visible part of the state into a nested layout tree.
///
/// Collapsed containers become fixed-size leaves; expanded ones become
/// branches over their visible children. Containers that a hyperedge ends
/// on are always present along with their ancestors. Every edge endpoint
/// must name a box in the tree.
pub fn to_layout_graph(state: &VisualizationState, config: &LayoutConfig) -> Result<LayoutGraph> {
    let mut included: BTreeSet<String> = state
        .visible_vertex_ids()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut forced: BTreeSet<String> = BTreeSet::new();
    for hyper in state.hyper_edges() {
        for endpoint in [&hyper.source, &hyper.target] {
            if state.container(endpoint).is_some() {
                forced.insert(endpoint.clone());
                forced.extend(state.ancestors(endpoint));
            }
        }
    }
    included.extend(forced.iter().cloned());

    let roots: Vec<&String> = included
        .iter()
        .filter(|id| {
            state
                .parent_of(id)
                .is_none_or(|parent| !included.contains(&parent))
        })
        .collect();
    let children = roots
        .into_iter()
        .map(|id| build_box(state, config, id, &included, &forced))
        .collect();

    let mut edges: Vec<LayoutEdge> = state
        .visible_edges()
        .map(|edge| LayoutEdge::new(&edge.id, &edge.source, &edge.target))
        .collect();
    edges.extend(
        state
            .visible_hyper_edges()
            .map(|hyper| LayoutEdge::new(&hyper.id, &hyper.source, &hyper.target)),
    );

    let mut graph = LayoutGraph {
        id: "root".to_string(),
        layout_options: root_options(config),
        children,
        edges,
        ..Default::default()
    };

    let ids = graph.node_ids();
    let offending: Vec<String> = graph
        .edges
        .iter()
        .filter(|edge| {
            edge.sources
                .iter()
                .chain(edge.targets.iter())
                .any(|endpoint| !ids.contains(endpoint))
        })
        .map(|edge| {
            format!(
                "{} ({} -> {})",
                edge.id,
                edge.sources.join(","),
                edge.targets.join(",")
            )
        })
        .collect();
    if !offending.is_empty() {
        let total = offending.len();
        tracing::error!(total, first = %offending[0], "layout graph has dangling edges");
        return Err(DataConsistencyError {
            offending: offending.into_iter().take(CONSISTENCY_REPORT_LIMIT).collect(),
            total,
        }
        .into());
    }

    graph.edges.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(graph)
}

fn build_box(
    state: &VisualizationState,
    config: &LayoutConfig,
    id: &str,
    included: &BTreeSet<String>,
    forced: &BTreeSet<String>,
) -> LayoutNode {
    if let Some(node) = state.node(id) {
        let size = sizing::node_size(node, state.show_full_labels(), config);
        return LayoutNode::leaf(id, size.width, size.height);
    }
    let collapsed = sizing::collapsed_container_size(config);
    let Some(container) = state.container(id) else {
        return LayoutNode::leaf(id, collapsed.width, collapsed.height);
    };
    let members: Vec<&String> = container
        .children
        .iter()
        .filter(|child| included.contains(*child))
        .collect();
    let opened = !container.collapsed || members.iter().any(|child| forced.contains(*child));
    if members.is_empty() || !opened {
        return LayoutNode::leaf(id, collapsed.width, collapsed.height);
    }
    LayoutNode::branch(
        id,
        members
            .into_iter()
            .map(|child| build_box(state, config, child, included, forced))
            .collect(),
    )
}

fn root_options(config: &LayoutConfig) -> BTreeMap<String, String> {
    BTreeMap::from([
        (OPT_ALGORITHM.to_string(), config.algorithm.clone()),
        (OPT_DIRECTION.to_string(), config.direction.as_str().to_string()),
        (OPT_NODE_SPACING.to_string(), config.node_spacing.to_string()),
        (OPT_RANK_SPACING.to_string(), config.rank_spacing.to_string()),
        (OPT_HIERARCHY.to_string(), HIERARCHY_INCLUDE_CHILDREN.to_string()),
    ])
}

/// The same tree with the hierarchy flattened for a stress pass.
fn fallback_graph(graph: &LayoutGraph) -> LayoutGraph {
    let mut fallback = graph.clone();
    fallback
        .layout_options
        .insert(OPT_ALGORITHM.to_string(), ALGORITHM_STRESS.to_string());
    fallback.layout_options.insert(
        OPT_HIERARCHY.to_string(),
        HIERARCHY_SEPARATE_CHILDREN.to_string(),
    );
    let mut stack: Vec<&mut LayoutNode> = fallback.children.iter_mut().collect();
    while let Some(node) = stack.pop() {
        node.layout_options.clear();
        stack.extend(node.children.iter_mut());
    }
    fallback
}

fn relayout_scope(state: &VisualizationState, ids: &[String]) -> BTreeSet<String> {
    let mut scope = BTreeSet::new();
    for id in ids {
        if !state.has_vertex(id) {
            tracing::debug!(id = %id, "relayout id unknown, ignored");
            continue;
        }
        scope.insert(id.clone());
        scope.extend(state.descendants(id));
        scope.extend(state.ancestors(id));
    }
    scope
}

fn validate_result(
    request: &LayoutRequest,
    result: &LayoutGraph,
) -> std::result::Result<(), LayoutEngineError> {
    let mut placed: HashMap<&str, &LayoutNode> = HashMap::new();
    result.walk(|node, _| {
        placed.insert(node.id.as_str(), node);
    });
    for id in request.graph.node_ids() {
        let Some(node) = placed.get(id.as_str()) else {
            return Err(LayoutEngineError::MissingElement(id));
        };
        let invalid = |reason: &str| LayoutEngineError::InvalidGeometry {
            id: id.clone(),
            reason: reason.to_string(),
        };
        match (node.x, node.y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => {}
            (None, _) | (_, None) => return Err(invalid("missing position")),
            _ => return Err(invalid("non-finite position")),
        }
        match (node.width, node.height) {
            (Some(w), Some(h)) if Dimensions::new(w, h).is_valid() => {}
            (None, _) | (_, None) => return Err(invalid("missing dimensions")),
            _ => return Err(invalid("non-positive or non-finite dimensions")),
        }
    }
    Ok(())
}
