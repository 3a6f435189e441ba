use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub const OPT_ALGORITHM: &str = "algorithm";
pub const OPT_DIRECTION: &str = "direction";
pub const OPT_NODE_SPACING: &str = "spacing.nodeNode";
pub const OPT_RANK_SPACING: &str = "layered.spacing.nodeNodeBetweenLayers";
pub const OPT_HIERARCHY: &str = "hierarchyHandling";

pub const HIERARCHY_INCLUDE_CHILDREN: &str = "INCLUDE_CHILDREN";
pub const HIERARCHY_SEPARATE_CHILDREN: &str = "SEPARATE_CHILDREN";
pub const ALGORITHM_STRESS: &str = "stress";

/// One box in the nested layout tree. Sizes are omitted for branches the
/// engine should size from their children; positions are filled in by the
/// engine and are relative to the parent box.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<LayoutNode>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub layout_options: BTreeMap<String, String>,
}

impl LayoutNode {
    pub fn leaf(id: impl Into<String>, width: f32, height: f32) -> Self {
        Self {
            id: id.into(),
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    pub fn branch(id: impl Into<String>, children: Vec<LayoutNode>) -> Self {
        Self {
            id: id.into(),
            children,
            ..Default::default()
        }
    }

    pub fn is_branch(&self) -> bool {
        !self.children.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutEdge {
    pub id: String,
    pub sources: Vec<String>,
    pub targets: Vec<String>,
}

impl LayoutEdge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sources: vec![source.into()],
            targets: vec![target.into()],
        }
    }
}

/// Root of the tree handed to a layout engine. Edges live at the root and
/// may connect boxes at any depth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutGraph {
    pub id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub layout_options: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<LayoutNode>,
    #[serde(default)]
    pub edges: Vec<LayoutEdge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
}

impl LayoutGraph {
    pub fn option(&self, key: &str) -> Option<&str> {
        self.layout_options.get(key).map(String::as_str)
    }

    /// Depth-first walk calling `visit(node, parent_id)`; parents come
    /// before their children.
    pub fn walk<'a>(&'a self, mut visit: impl FnMut(&'a LayoutNode, Option<&'a str>)) {
        let mut stack: Vec<(&LayoutNode, Option<&str>)> =
            self.children.iter().rev().map(|node| (node, None)).collect();
        while let Some((node, parent)) = stack.pop() {
            visit(node, parent);
            for child in node.children.iter().rev() {
                stack.push((child, Some(node.id.as_str())));
            }
        }
    }

    pub fn node_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        self.walk(|node, _| {
            ids.insert(node.id.clone());
        });
        ids
    }

    pub fn find(&self, id: &str) -> Option<&LayoutNode> {
        let mut found = None;
        self.walk(|node, _| {
            if found.is_none() && node.id == id {
                found = Some(node);
            }
        });
        found
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(|_, _| count += 1);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LayoutGraph {
        LayoutGraph {
            id: "root".to_string(),
            children: vec![
                LayoutNode::branch(
                    "c1",
                    vec![LayoutNode::leaf("n1", 10.0, 10.0), LayoutNode::leaf("n2", 10.0, 10.0)],
                ),
                LayoutNode::leaf("n3", 10.0, 10.0),
            ],
            edges: vec![LayoutEdge::new("e1", "n1", "n3")],
            ..Default::default()
        }
    }

    #[test]
    fn walk_visits_parents_first_with_parent_ids() {
        let graph = sample();
        let mut seen = Vec::new();
        graph.walk(|node, parent| seen.push((node.id.clone(), parent.map(str::to_string))));
        assert_eq!(
            seen,
            vec![
                ("c1".to_string(), None),
                ("n1".to_string(), Some("c1".to_string())),
                ("n2".to_string(), Some("c1".to_string())),
                ("n3".to_string(), None),
            ]
        );
        assert_eq!(graph.node_count(), 4);
        assert!(graph.find("n2").is_some());
    }

    #[test]
    fn serializes_in_engine_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["children"][0]["children"][1]["id"], "n2");
        assert_eq!(json["edges"][0]["sources"][0], "n1");
        assert!(json["children"][0].get("width").is_none());
        assert_eq!(json["children"][1]["width"], 10.0);
    }
}
