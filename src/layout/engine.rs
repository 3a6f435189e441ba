use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use async_trait::async_trait;
use dagre_rust::{
    GraphConfig as DagreConfig, GraphEdge as DagreEdge, GraphNode as DagreNode,
    layout as dagre_layout,
};
use graphlib_rust::{Graph as DagreGraph, GraphOption};

use crate::config::{LayoutConfig, LayoutDirection};
use crate::error::LayoutEngineError;
use crate::ir::{Dimensions, Position};

use super::stress;
use super::types::{
    ALGORITHM_STRESS, HIERARCHY_SEPARATE_CHILDREN, LayoutGraph, LayoutNode, OPT_ALGORITHM,
    OPT_DIRECTION, OPT_HIERARCHY, OPT_NODE_SPACING, OPT_RANK_SPACING,
};

type EngineResult<T> = std::result::Result<T, LayoutEngineError>;

/// External layout computation. Receives a nested box tree and returns it
/// with `x`, `y`, `width` and `height` filled in on every box.
#[async_trait(?Send)]
pub trait LayoutEngine {
    async fn layout(&self, graph: LayoutGraph) -> EngineResult<LayoutGraph>;
}

#[async_trait(?Send)]
impl<E: LayoutEngine + ?Sized> LayoutEngine for Rc<E> {
    async fn layout(&self, graph: LayoutGraph) -> EngineResult<LayoutGraph> {
        (**self).layout(graph).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    Layered,
    Stress,
}

#[derive(Debug, Clone)]
struct RunOptions {
    algorithm: Algorithm,
    direction: LayoutDirection,
    node_spacing: f32,
    rank_spacing: f32,
    separate_children: bool,
}

/// Layered layout on dagre, run once per container level. Each expanded
/// container's children are placed on their own; edges that cross a
/// container boundary are lifted to the sibling boxes that contain their
/// endpoints.
#[derive(Debug, Clone, Default)]
pub struct DagreEngine {
    config: LayoutConfig,
}

impl DagreEngine {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn run(&self, mut graph: LayoutGraph) -> EngineResult<LayoutGraph> {
        let options = self.run_options(&graph)?;

        let mut parents: HashMap<String, Option<String>> = HashMap::new();
        let mut duplicate = None;
        graph.walk(|node, parent| {
            if parents
                .insert(node.id.clone(), parent.map(str::to_string))
                .is_some()
            {
                duplicate.get_or_insert_with(|| node.id.clone());
            }
        });
        if let Some(id) = duplicate {
            return Err(LayoutEngineError::Rejected(format!("duplicate node id '{id}'")));
        }

        let scoped = lift_edges(&graph, &parents, options.separate_children)?;
        let size = self.place_level(&mut graph.children, None, &scoped, &options)?;
        graph.width = Some(size.width);
        graph.height = Some(size.height);
        Ok(graph)
    }

    fn run_options(&self, graph: &LayoutGraph) -> EngineResult<RunOptions> {
        let algorithm = match graph
            .option(OPT_ALGORITHM)
            .unwrap_or(self.config.algorithm.as_str())
            .to_ascii_lowercase()
            .as_str()
        {
            "layered" | "dagre" => Algorithm::Layered,
            ALGORITHM_STRESS => Algorithm::Stress,
            other => {
                return Err(LayoutEngineError::Rejected(format!(
                    "unsupported algorithm '{other}'"
                )));
            }
        };
        let direction = match graph.option(OPT_DIRECTION) {
            Some(token) => LayoutDirection::from_token(token).ok_or_else(|| {
                LayoutEngineError::Rejected(format!("unsupported direction '{token}'"))
            })?,
            None => self.config.direction,
        };
        let spacing = |key: &str, default: f32| {
            graph
                .option(key)
                .and_then(|value| value.parse::<f32>().ok())
                .filter(|value| value.is_finite() && *value >= 0.0)
                .unwrap_or(default)
        };
        Ok(RunOptions {
            algorithm,
            direction,
            node_spacing: spacing(OPT_NODE_SPACING, self.config.node_spacing),
            rank_spacing: spacing(OPT_RANK_SPACING, self.config.rank_spacing),
            separate_children: graph
                .option(OPT_HIERARCHY)
                .is_some_and(|value| value.eq_ignore_ascii_case(HIERARCHY_SEPARATE_CHILDREN)),
        })
    }

    /// Places one sibling set (sizing nested branches first) and returns the
    /// bounding size of the set. Positions are relative to the set origin.
    fn place_level(
        &self,
        children: &mut [LayoutNode],
        scope: Option<&str>,
        scoped: &HashMap<Option<String>, Vec<(String, String)>>,
        options: &RunOptions,
    ) -> EngineResult<Dimensions> {
        let pad = self.config.container_padding;
        let label = self.config.container_label_height;
        for child in children.iter_mut() {
            if child.is_branch() {
                let inner = self.place_level(&mut child.children, Some(&child.id), scoped, options)?;
                for grandchild in child.children.iter_mut() {
                    grandchild.x = grandchild.x.map(|x| x + pad);
                    grandchild.y = grandchild.y.map(|y| y + pad + label);
                }
                child.width = Some(inner.width + pad * 2.0);
                child.height = Some(inner.height + pad * 2.0 + label);
                continue;
            }
            match (child.width, child.height) {
                (Some(w), Some(h)) if w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0 => {}
                _ => {
                    return Err(LayoutEngineError::Rejected(format!(
                        "leaf '{}' has no usable size",
                        child.id
                    )));
                }
            }
        }

        let ids: Vec<String> = children.iter().map(|c| c.id.clone()).collect();
        let sizes: Vec<Dimensions> = children
            .iter()
            .map(|c| Dimensions::new(c.width.unwrap_or(0.0), c.height.unwrap_or(0.0)))
            .collect();
        let slot: HashMap<&str, usize> = ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.as_str(), idx))
            .collect();
        let key = scope.map(str::to_string);
        let edges: Vec<(usize, usize)> = scoped
            .get(&key)
            .map(|pairs| {
                pairs
                    .iter()
                    .filter_map(|(from, to)| Some((*slot.get(from.as_str())?, *slot.get(to.as_str())?)))
                    .collect()
            })
            .unwrap_or_default();

        let positions = match options.algorithm {
            Algorithm::Stress => {
                stress::place(&sizes, &edges, &self.config.fallback, options.node_spacing)
            }
            Algorithm::Layered => dagre_positions(&ids, &sizes, &edges, options)?,
        };

        let mut width = 0.0f32;
        let mut height = 0.0f32;
        for ((child, position), size) in children.iter_mut().zip(positions).zip(&sizes) {
            child.x = Some(position.x);
            child.y = Some(position.y);
            width = width.max(position.x + size.width);
            height = height.max(position.y + size.height);
        }
        Ok(Dimensions::new(width, height))
    }
}

#[async_trait(?Send)]
impl LayoutEngine for DagreEngine {
    async fn layout(&self, graph: LayoutGraph) -> EngineResult<LayoutGraph> {
        self.run(graph)
    }
}

/// Groups edges by the container level they are laid out in, keyed by the
/// parent id of the two sibling boxes (`None` is the root level).
fn lift_edges(
    graph: &LayoutGraph,
    parents: &HashMap<String, Option<String>>,
    separate_children: bool,
) -> EngineResult<HashMap<Option<String>, Vec<(String, String)>>> {
    let lineage = |id: &str| -> Vec<String> {
        let mut chain = vec![id.to_string()];
        let mut seen = HashSet::from([id.to_string()]);
        let mut current = id.to_string();
        while let Some(Some(parent)) = parents.get(&current) {
            if !seen.insert(parent.clone()) {
                break;
            }
            chain.push(parent.clone());
            current = parent.clone();
        }
        chain
    };

    let mut scoped: HashMap<Option<String>, Vec<(String, String)>> = HashMap::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    for edge in &graph.edges {
        for endpoint in edge.sources.iter().chain(edge.targets.iter()) {
            if !parents.contains_key(endpoint) {
                return Err(LayoutEngineError::Rejected(format!(
                    "edge '{}' references unknown node '{endpoint}'",
                    edge.id
                )));
            }
        }
        for source in &edge.sources {
            for target in &edge.targets {
                let source_parent = parents.get(source).cloned().flatten();
                let target_parent = parents.get(target).cloned().flatten();
                let lifted = if separate_children {
                    (source_parent == target_parent)
                        .then(|| (source_parent, source.clone(), target.clone()))
                } else {
                    let from_chain = lineage(source);
                    let to_chain = lineage(target);
                    from_chain.iter().find_map(|from| {
                        let level = parents.get(from).cloned().flatten();
                        to_chain
                            .iter()
                            .find(|to| parents.get(*to).cloned().flatten() == level)
                            .map(|to| (level, from.clone(), to.clone()))
                    })
                };
                let Some((level, from, to)) = lifted else {
                    continue;
                };
                // An edge between a container and its own descendant.
                if from == to {
                    continue;
                }
                if seen.insert((from.clone(), to.clone())) {
                    scoped.entry(level).or_default().push((from, to));
                }
            }
        }
    }
    Ok(scoped)
}

fn dagre_rankdir(direction: LayoutDirection) -> &'static str {
    match direction {
        LayoutDirection::Down => "tb",
        LayoutDirection::Right => "lr",
    }
}

fn dagre_positions(
    ids: &[String],
    sizes: &[Dimensions],
    edges: &[(usize, usize)],
    options: &RunOptions,
) -> EngineResult<Vec<Position>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut dagre_graph: DagreGraph<DagreConfig, DagreNode, DagreEdge> =
        DagreGraph::new(Some(GraphOption {
            directed: Some(true),
            multigraph: Some(false),
            compound: Some(false),
        }));

    let mut graph_config = DagreConfig::default();
    graph_config.rankdir = Some(dagre_rankdir(options.direction).to_string());
    graph_config.nodesep = Some(options.node_spacing);
    graph_config.ranksep = Some(options.rank_spacing);
    graph_config.marginx = Some(0.0);
    graph_config.marginy = Some(0.0);
    dagre_graph.set_graph(graph_config);

    for (id, size) in ids.iter().zip(sizes) {
        let mut node = DagreNode::default();
        node.width = size.width;
        node.height = size.height;
        dagre_graph.set_node(id.clone(), Some(node));
    }
    for &(from, to) in edges {
        let _ = dagre_graph.set_edge(&ids[from], &ids[to], Some(DagreEdge::default()), None);
    }

    dagre_layout::run_layout(&mut dagre_graph);

    let mut positions = Vec::with_capacity(ids.len());
    for (id, size) in ids.iter().zip(sizes) {
        let Some(placed) = dagre_graph.node(id) else {
            return Err(LayoutEngineError::MissingElement(id.clone()));
        };
        if !placed.x.is_finite() || !placed.y.is_finite() {
            return Err(LayoutEngineError::InvalidGeometry {
                id: id.clone(),
                reason: "non-finite coordinates".to_string(),
            });
        }
        positions.push(Position::new(
            placed.x - size.width / 2.0,
            placed.y - size.height / 2.0,
        ));
    }

    let min_x = positions.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
    let min_y = positions.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    for position in &mut positions {
        position.x -= min_x;
        position.y -= min_y;
    }
    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::types::{LayoutEdge, OPT_HIERARCHY};

    fn nested() -> LayoutGraph {
        LayoutGraph {
            id: "root".to_string(),
            children: vec![
                LayoutNode::branch(
                    "c1",
                    vec![LayoutNode::leaf("a", 80.0, 40.0), LayoutNode::leaf("b", 80.0, 40.0)],
                ),
                LayoutNode::leaf("x", 80.0, 40.0),
            ],
            edges: vec![LayoutEdge::new("e1", "a", "b"), LayoutEdge::new("e2", "x", "a")],
            ..Default::default()
        }
    }

    #[test]
    fn cross_level_edges_are_lifted_to_siblings() {
        let graph = nested();
        let mut parents = HashMap::new();
        graph.walk(|node, parent| {
            parents.insert(node.id.clone(), parent.map(str::to_string));
        });
        let scoped = lift_edges(&graph, &parents, false).unwrap();
        assert_eq!(
            scoped.get(&Some("c1".to_string())).unwrap(),
            &vec![("a".to_string(), "b".to_string())]
        );
        assert_eq!(
            scoped.get(&None).unwrap(),
            &vec![("x".to_string(), "c1".to_string())]
        );

        let separate = lift_edges(&graph, &parents, true).unwrap();
        assert!(separate.get(&None).is_none());
    }

    #[test]
    fn stress_run_sizes_containers_from_children() {
        let mut graph = nested();
        graph
            .layout_options
            .insert(OPT_ALGORITHM.to_string(), ALGORITHM_STRESS.to_string());
        graph
            .layout_options
            .insert(OPT_HIERARCHY.to_string(), HIERARCHY_SEPARATE_CHILDREN.to_string());
        let engine = DagreEngine::default();
        let out = engine.run(graph).unwrap();
        let c1 = out.find("c1").unwrap();
        let config = engine.config();
        assert!(c1.width.unwrap() >= 80.0 + config.container_padding * 2.0);
        assert!(c1.height.unwrap() >= 40.0 + config.container_padding * 2.0);
        let a = out.find("a").unwrap();
        assert!(a.x.unwrap() >= config.container_padding);
        assert!(a.y.unwrap() >= config.container_padding + config.container_label_height);
    }

    #[test]
    fn unsized_leaf_is_rejected() {
        let mut graph = nested();
        graph.children.push(LayoutNode::branch("empty", Vec::new()));
        let err = DagreEngine::default().run(graph).unwrap_err();
        assert!(err.to_string().contains("empty"), "{err}");
    }

    #[test]
    fn unknown_edge_endpoint_is_rejected() {
        let mut graph = nested();
        graph.edges.push(LayoutEdge::new("bad", "x", "ghost"));
        let err = DagreEngine::default().run(graph).unwrap_err();
        assert!(err.to_string().contains("ghost"), "{err}");
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let mut graph = nested();
        graph
            .layout_options
            .insert(OPT_ALGORITHM.to_string(), "force".to_string());
        assert!(DagreEngine::default().run(graph).is_err());
    }
}
