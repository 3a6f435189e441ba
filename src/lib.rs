//! Hierarchical graph visibility with collapsible containers.
//!
//! [`VisualizationState`] owns nodes, containers and raw edges. Collapsing
//! a container hides its subtree and replaces crossing edges with
//! hyperedges; expanding restores exactly what was visible before. The
//! [`layout`] bridge turns the visible subset into an engine graph and
//! writes geometry back, and [`PipelineCoordinator`] sequences mutation,
//! layout and render handoff one operation at a time.

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod ir;
pub mod layout;
pub mod pipeline;
pub mod render_data;
pub mod state;

use std::cell::RefCell;
use std::rc::Rc;

/// State handle shared between the coordinator and callers. Borrows must
/// not be held across an await.
pub type SharedState = Rc<RefCell<VisualizationState>>;

pub fn shared(state: VisualizationState) -> SharedState {
    Rc::new(RefCell::new(state))
}

#[cfg(feature = "cli")]
pub use cli::run;
pub use config::{Config, LayoutConfig, PipelineConfig, load_config};
pub use error::{Error, Result};
pub use ir::{ContainerSpec, EdgeSpec, GraphDocument, LayoutPhase, NodeSpec};
pub use layout::{DagreEngine, LayoutBridge, LayoutEngine};
pub use pipeline::{ContainerOpOptions, FitViewRequest, PipelineCoordinator, PipelineOptions};
pub use render_data::RenderData;
pub use state::{SearchMatch, VisualizationState};
