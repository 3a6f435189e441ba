use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Node,
    Container,
    Edge,
    HyperEdge,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EntityKind::Node => "node",
            EntityKind::Container => "container",
            EntityKind::Edge => "edge",
            EntityKind::HyperEdge => "hyperedge",
        };
        f.write_str(text)
    }
}

/// Parent-relative position of an element's top-left corner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, by: Position) -> Self {
        Self {
            x: self.x + by.x,
            y: self.y + by.y,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: f32,
    pub height: f32,
}

impl Dimensions {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub full_label: Option<String>,
    pub tags: BTreeSet<String>,
    pub position: Option<Position>,
    pub dimensions: Option<Dimensions>,
    /// Set by callers; the bridge never overwrites it.
    pub custom_dimensions: Option<Dimensions>,
    pub hidden: bool,
    pub metadata: serde_json::Value,
}

impl GraphNode {
    pub fn display_label(&self, full: bool) -> &str {
        if full {
            self.full_label.as_deref().unwrap_or(&self.label)
        } else {
            &self.label
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub id: String,
    pub label: String,
    pub children: BTreeSet<String>,
    pub collapsed: bool,
    pub hidden: bool,
    pub position: Option<Position>,
    pub dimensions: Option<Dimensions>,
    /// Collapsed flags of descendant containers captured when this container
    /// collapsed, restored when it expands again.
    pub(crate) saved_descendant_flags: BTreeMap<String, bool>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub tags: BTreeSet<String>,
    pub hidden: bool,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HyperEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub aggregated_edges: BTreeMap<String, Edge>,
    /// Merged display tags of the aggregated edges.
    pub tags: BTreeSet<String>,
    pub hidden: bool,
}

impl HyperEdge {
    const ID_PREFIX: &'static str = "hyper_";

    /// `hyper_<len(source)>_<source>_to_<target>`. The length prefix keeps
    /// ids distinct when endpoint ids themselves contain `_to_`.
    pub fn id_for(source: &str, target: &str) -> String {
        format!("{}{}_{source}_to_{target}", Self::ID_PREFIX, source.len())
    }

    /// Splits an id built by [`HyperEdge::id_for`] back into its endpoints.
    pub fn parse_id(id: &str) -> Option<(&str, &str)> {
        let rest = id.strip_prefix(Self::ID_PREFIX)?;
        let (len, rest) = rest.split_once('_')?;
        let canonical = len == "0" || !len.starts_with('0');
        if len.is_empty() || !canonical || !len.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let len: usize = len.parse().ok()?;
        let source = rest.get(..len)?;
        let target = rest.get(len..)?.strip_prefix("_to_")?;
        Some((source, target))
    }

    pub fn touches(&self, id: &str) -> bool {
        self.source == id || self.target == id
    }
}

/// Borrowed view over any canonical entity.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Node(&'a GraphNode),
    Container(&'a Container),
    Edge(&'a Edge),
    HyperEdge(&'a HyperEdge),
}

impl Entity<'_> {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Node(_) => EntityKind::Node,
            Entity::Container(_) => EntityKind::Container,
            Entity::Edge(_) => EntityKind::Edge,
            Entity::HyperEdge(_) => EntityKind::HyperEdge,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Node(node) => &node.id,
            Entity::Container(container) => &container.id,
            Entity::Edge(edge) => &edge.id,
            Entity::HyperEdge(edge) => &edge.id,
        }
    }

    pub fn hidden(&self) -> bool {
        match self {
            Entity::Node(node) => node.hidden,
            Entity::Container(container) => container.hidden,
            Entity::Edge(edge) => edge.hidden,
            Entity::HyperEdge(edge) => edge.hidden,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub full_label: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dimensions: Option<Dimensions>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_full_label(mut self, label: impl Into<String>) -> Self {
        self.full_label = Some(label.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dimensions(mut self, width: f32, height: f32) -> Self {
        self.dimensions = Some(Dimensions::new(width, height));
        self
    }

    pub(crate) fn into_node(self) -> GraphNode {
        GraphNode {
            label: self.label.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            full_label: self.full_label,
            tags: self.tags.into_iter().collect(),
            position: None,
            dimensions: None,
            custom_dimensions: self.dimensions,
            hidden: false,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ContainerSpec {
    pub fn new<I, S>(id: impl Into<String>, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            children: children.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn collapsed(mut self, collapsed: bool) -> Self {
        self.collapsed = collapsed;
        self
    }

    pub(crate) fn into_container(self) -> Container {
        Container {
            label: self.label.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            children: self.children.into_iter().collect(),
            collapsed: self.collapsed,
            hidden: false,
            position: None,
            dimensions: None,
            saved_descendant_flags: BTreeMap::new(),
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeSpec {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl EdgeSpec {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn into_edge(self) -> Edge {
        Edge {
            id: self.id,
            source: self.source,
            target: self.target,
            tags: self.tags.into_iter().collect(),
            hidden: false,
            metadata: self.metadata,
        }
    }
}

/// Batch of specs in ingestion order: nodes, then containers, then edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutPhase {
    #[default]
    Idle,
    LayingOut,
    Applying,
    Ready,
    Error,
}

impl LayoutPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutPhase::Idle => "idle",
            LayoutPhase::LayingOut => "laying_out",
            LayoutPhase::Applying => "applying",
            LayoutPhase::Ready => "ready",
            LayoutPhase::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_spec_defaults_label_to_id() {
        let node = NodeSpec::new("n1").into_node();
        assert_eq!(node.label, "n1");
        assert!(!node.hidden);
        assert!(node.custom_dimensions.is_none());
    }

    #[test]
    fn display_label_prefers_full_label_when_requested() {
        let node = NodeSpec::new("n1")
            .with_label("map")
            .with_full_label("map(|x| x + 1)")
            .into_node();
        assert_eq!(node.display_label(false), "map");
        assert_eq!(node.display_label(true), "map(|x| x + 1)");
    }

    #[test]
    fn document_parses_camel_case() {
        let doc: GraphDocument = serde_json::from_str(
            r#"{
                "nodes": [{"id": "a", "fullLabel": "alpha"}, {"id": "b"}],
                "containers": [{"id": "c", "children": ["a"], "collapsed": true}],
                "edges": [{"id": "e1", "source": "a", "target": "b", "tags": ["Dashed"]}]
            }"#,
        )
        .unwrap();
        assert_eq!(doc.nodes[0].full_label.as_deref(), Some("alpha"));
        assert!(doc.containers[0].collapsed);
        assert_eq!(doc.edges[0].tags, vec!["Dashed".to_string()]);
    }

    #[test]
    fn hyperedge_ids_stay_distinct_for_underscored_endpoints() {
        let left = HyperEdge::id_for("a_to_b", "c");
        let right = HyperEdge::id_for("a", "b_to_c");
        assert_ne!(left, right);
        assert_eq!(HyperEdge::parse_id(&left), Some(("a_to_b", "c")));
        assert_eq!(HyperEdge::parse_id(&right), Some(("a", "b_to_c")));
        assert_eq!(HyperEdge::parse_id("hyper_link"), None);
        assert_eq!(HyperEdge::parse_id("hyper_x_to_c"), None);
    }

    #[test]
    fn dimensions_validity_rejects_degenerate_sizes() {
        assert!(Dimensions::new(10.0, 5.0).is_valid());
        assert!(!Dimensions::new(0.0, 5.0).is_valid());
        assert!(!Dimensions::new(f32::NAN, 5.0).is_valid());
        assert!(!Dimensions::new(10.0, f32::INFINITY).is_valid());
    }
}
