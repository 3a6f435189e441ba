use crate::ir::{Dimensions, LayoutPhase, Position};
use crate::state::VisualizationState;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Everything a renderer needs from one settled state: the visible subset
/// with its geometry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderData {
    pub phase: LayoutPhase,
    pub topology_version: u64,
    pub nodes: Vec<NodeDump>,
    pub containers: Vec<ContainerDump>,
    pub edges: Vec<EdgeDump>,
    pub hyper_edges: Vec<HyperEdgeDump>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDump {
    pub id: String,
    pub label: String,
    pub parent: Option<String>,
    pub position: Option<Position>,
    pub dimensions: Option<Dimensions>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDump {
    pub id: String,
    pub label: String,
    pub parent: Option<String>,
    pub collapsed: bool,
    pub child_count: usize,
    pub position: Option<Position>,
    pub dimensions: Option<Dimensions>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDump {
    pub id: String,
    pub source: String,
    pub target: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HyperEdgeDump {
    pub id: String,
    pub source: String,
    pub target: String,
    pub tags: Vec<String>,
    pub aggregated_edges: Vec<String>,
}

impl RenderData {
    pub fn from_state(state: &VisualizationState) -> Self {
        let full = state.show_full_labels();
        let nodes = state
            .visible_nodes()
            .map(|node| NodeDump {
                id: node.id.clone(),
                label: node.display_label(full).to_string(),
                parent: state.parent_of(&node.id),
                position: node.position,
                dimensions: node.dimensions,
                tags: node.tags.iter().cloned().collect(),
                metadata: node.metadata.clone(),
            })
            .collect();

        let containers = state
            .visible_containers()
            .map(|container| ContainerDump {
                id: container.id.clone(),
                label: container.label.clone(),
                parent: state.parent_of(&container.id),
                collapsed: container.collapsed,
                child_count: container.children.len(),
                position: container.position,
                dimensions: container.dimensions,
                metadata: container.metadata.clone(),
            })
            .collect();

        let edges = state
            .visible_edges()
            .map(|edge| EdgeDump {
                id: edge.id.clone(),
                source: edge.source.clone(),
                target: edge.target.clone(),
                tags: edge.tags.iter().cloned().collect(),
            })
            .collect();

        let hyper_edges = state
            .visible_hyper_edges()
            .map(|hyper| HyperEdgeDump {
                id: hyper.id.clone(),
                source: hyper.source.clone(),
                target: hyper.target.clone(),
                tags: hyper.tags.iter().cloned().collect(),
                aggregated_edges: hyper.aggregated_edges.keys().cloned().collect(),
            })
            .collect();

        RenderData {
            phase: state.layout_phase(),
            topology_version: state.topology_version(),
            nodes,
            containers,
            edges,
            hyper_edges,
        }
    }

    pub fn visible_counts(&self) -> (usize, usize, usize, usize) {
        (
            self.nodes.len(),
            self.containers.len(),
            self.edges.len(),
            self.hyper_edges.len(),
        )
    }
}

/// Writes pretty JSON to `path`, or to stdout when `path` is `None`.
pub fn write_render_dump(path: Option<&Path>, data: &RenderData) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            let file = File::create(path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, data)?;
            writer.flush()?;
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, data)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}
