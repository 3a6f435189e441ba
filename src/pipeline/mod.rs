//! Sequencing of topology mutations, layout and render handoff.
//!
//! Every operation takes a FIFO gate before touching the state, so at most
//! one mutation/layout sequence runs at a time and each stage is awaited
//! before the next begins: mutation, then layout, then render data, then
//! the optional viewport request. The shared state is only borrowed between
//! awaits.

mod queue;

pub use queue::{OperationKind, OperationRecord, OperationStatus};

use std::cell::RefCell;
use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::SharedState;
use crate::config::PipelineConfig;
use crate::error::{Error, LayoutEngineError, OperationError, Result, Stage};
use crate::layout::{LayoutBridge, LayoutCheckpoint, LayoutEngine};
use crate::render_data::RenderData;
use crate::state::SearchMatch;
use queue::{OperationLog, Ticket};

pub type RenderCallback = Box<dyn Fn(&RenderData) -> anyhow::Result<()>>;
pub type FitViewCallback = Box<dyn Fn(&FitViewRequest) -> anyhow::Result<()>>;

/// Viewport request handed to the fit-view callback. An empty `focus`
/// means the whole graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FitViewRequest {
    pub focus: Vec<String>,
    pub padding: f32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// `Some(ids)` limits geometry write-back to the given region;
    /// `Some(empty)` skips layout entirely.
    pub relayout_entities: Option<Vec<String>>,
    pub fit_view: bool,
    /// Overrides the configured default timeout for this invocation.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerOpOptions {
    pub skip_layout: bool,
    /// Re-center on the changed container (or search matches) afterwards.
    /// Failures here are logged and never fail the operation.
    pub focus: bool,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerAction {
    Expand,
    Collapse,
}

impl ContainerAction {
    fn kind(self) -> OperationKind {
        match self {
            ContainerAction::Expand => OperationKind::Expand,
            ContainerAction::Collapse => OperationKind::Collapse,
        }
    }

    fn inverse(self) -> Self {
        match self {
            ContainerAction::Expand => ContainerAction::Collapse,
            ContainerAction::Collapse => ContainerAction::Expand,
        }
    }
}

pub struct PipelineCoordinator<E> {
    bridge: LayoutBridge<E>,
    config: PipelineConfig,
    gate: Mutex<()>,
    log: RefCell<OperationLog>,
    on_render: Option<RenderCallback>,
    on_fit_view: Option<FitViewCallback>,
    last_render: RefCell<Option<RenderData>>,
    search_matches: RefCell<Vec<SearchMatch>>,
}

impl<E: LayoutEngine> PipelineCoordinator<E> {
    pub fn new(bridge: LayoutBridge<E>, config: PipelineConfig) -> Self {
        Self {
            bridge,
            config,
            gate: Mutex::new(()),
            log: RefCell::new(OperationLog::default()),
            on_render: None,
            on_fit_view: None,
            last_render: RefCell::new(None),
            search_matches: RefCell::new(Vec::new()),
        }
    }

    pub fn on_render_data_update(
        mut self,
        callback: impl Fn(&RenderData) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.on_render = Some(Box::new(callback));
        self
    }

    pub fn on_fit_view_requested(
        mut self,
        callback: impl Fn(&FitViewRequest) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.on_fit_view = Some(Box::new(callback));
        self
    }

    pub fn bridge(&self) -> &LayoutBridge<E> {
        &self.bridge
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn last_render_data(&self) -> Option<RenderData> {
        self.last_render.borrow().clone()
    }

    pub fn search_matches(&self) -> Vec<SearchMatch> {
        self.search_matches.borrow().clone()
    }

    pub fn operations(&self) -> Vec<OperationRecord> {
        self.log.borrow().records().cloned().collect()
    }

    pub fn operation_status(&self, id: u64) -> Option<OperationStatus> {
        self.log.borrow().get(id).map(|record| record.status)
    }

    /// Cancels an operation that is still waiting for its turn. Returns
    /// false when it is already running or settled.
    pub fn cancel(&self, id: u64) -> bool {
        let cancelled = self.log.borrow_mut().cancel(id);
        if cancelled {
            tracing::info!(operation = id, "operation cancelled");
        }
        cancelled
    }

    /// Layout, then render data, then (optionally) a fit-view request.
    /// Each stage failure aborts with an error naming the stage.
    pub async fn execute_layout_and_render_pipeline(
        &self,
        state: &SharedState,
        options: PipelineOptions,
    ) -> Result<RenderData> {
        let op = OperationKind::Pipeline.as_str();
        self.run_operation(OperationKind::Pipeline, None, async {
            let data = self
                .run_stages(op, None, state, options.relayout_entities.as_deref(), options.timeout)
                .await?;
            if options.fit_view {
                let request = self.fit_view_request(Vec::new());
                self.request_fit_view(&request)
                    .map_err(|err| OperationError::new(op, None, Stage::FitView, err))?;
            }
            Ok::<_, Error>(data)
        })
        .await
    }

    pub async fn expand_container(
        &self,
        id: &str,
        state: &SharedState,
        options: ContainerOpOptions,
    ) -> Result<RenderData> {
        self.container_operation(ContainerAction::Expand, id, state, options)
            .await
    }

    pub async fn collapse_container(
        &self,
        id: &str,
        state: &SharedState,
        options: ContainerOpOptions,
    ) -> Result<RenderData> {
        self.container_operation(ContainerAction::Collapse, id, state, options)
            .await
    }

    /// Expands whatever hides the matches of `query`, re-runs the pipeline
    /// over the revealed region and returns the matches. An empty query
    /// clears the current results without touching the state.
    pub async fn update_search_results(
        &self,
        query: &str,
        state: &SharedState,
        options: ContainerOpOptions,
    ) -> Result<Vec<SearchMatch>> {
        let op = OperationKind::Search.as_str();
        self.run_operation(OperationKind::Search, Some(query), async {
            if query.trim().is_empty() {
                self.search_matches.borrow_mut().clear();
                tracing::debug!("search cleared");
                return Ok::<_, Error>(Vec::new());
            }

            let (matches, reveal, checkpoint) = {
                let state = state.borrow();
                let matches = state.search(query);
                let reveal = state.containers_to_reveal(&matches);
                (matches, reveal, self.bridge.checkpoint(&state))
            };
            tracing::debug!(query, matches = matches.len(), reveal = reveal.len(), "search");

            // Expanding an outer container may already have restored an inner
            // one; only real flips are undone on failure.
            let mut expanded: Vec<String> = Vec::new();
            for id in &reveal {
                let outcome = {
                    let mut state = state.borrow_mut();
                    let before = state.container(id).map(|c| c.collapsed);
                    state
                        .expand_container(id)
                        .map(|()| state.container(id).map(|c| c.collapsed) != before)
                };
                match outcome {
                    Ok(true) => expanded.push(id.clone()),
                    Ok(false) => {}
                    Err(err) => {
                        self.revert(ContainerAction::Expand, &expanded, state, &checkpoint);
                        return Err(OperationError::new(op, Some(query), Stage::Mutation, err).into());
                    }
                }
            }

            let relayout = if options.skip_layout || reveal.is_empty() {
                Vec::new()
            } else {
                reveal.clone()
            };
            if let Err(err) = self
                .run_stages(op, Some(query), state, Some(&relayout), options.timeout)
                .await
            {
                self.revert(ContainerAction::Expand, &expanded, state, &checkpoint);
                return Err(err);
            }

            *self.search_matches.borrow_mut() = matches.clone();
            if options.focus && !matches.is_empty() {
                let focus = matches.iter().map(|found| found.id.clone()).collect();
                self.focus_best_effort(focus);
            }
            Ok(matches)
        })
        .await
    }

    async fn container_operation(
        &self,
        action: ContainerAction,
        id: &str,
        state: &SharedState,
        options: ContainerOpOptions,
    ) -> Result<RenderData> {
        let kind = action.kind();
        let op = kind.as_str();
        self.run_operation(kind, Some(id), async {
            let checkpoint = self.bridge.checkpoint(&state.borrow());
            let changed = {
                let mut state = state.borrow_mut();
                let before = state
                    .get_container(id)
                    .map_err(|err| OperationError::new(op, Some(id), Stage::Mutation, err))?
                    .collapsed;
                apply_action(&mut state, action, id)
                    .map_err(|err| OperationError::new(op, Some(id), Stage::Mutation, err))?;
                state.container(id).map(|c| c.collapsed) != Some(before)
            };
            tracing::info!(operation = op, container = %id, changed, "container operation applied");

            let relayout = if options.skip_layout || !changed {
                Vec::new()
            } else {
                vec![id.to_string()]
            };
            let data = match self
                .run_stages(op, Some(id), state, Some(&relayout), options.timeout)
                .await
            {
                Ok(data) => data,
                Err(err) => {
                    if changed {
                        self.revert(action, &[id.to_string()], state, &checkpoint);
                    }
                    return Err(err);
                }
            };

            if options.focus {
                self.focus_best_effort(vec![id.to_string()]);
            }
            Ok::<_, Error>(data)
        })
        .await
    }

    /// Queues behind the gate, then runs `work` unless the operation was
    /// cancelled or superseded while waiting.
    async fn run_operation<T>(
        &self,
        kind: OperationKind,
        target: Option<&str>,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let (id, superseded) = self.log.borrow_mut().enqueue(kind, target);
        for old in superseded {
            tracing::info!(operation = old, by = id, kind = kind.as_str(), "queued operation superseded");
        }
        let ticket = Ticket::new(&self.log, id);

        let _turn = self.gate.lock().await;
        if !self.log.borrow_mut().start(id) {
            ticket.settle(false);
            return Err(Error::Cancelled {
                id,
                operation: kind.as_str().to_string(),
            });
        }
        tracing::debug!(operation = id, kind = kind.as_str(), subject = ?target, "operation started");

        let result = work.await;
        ticket.settle(result.is_ok());
        match &result {
            Ok(_) => tracing::debug!(operation = id, "operation completed"),
            Err(err) => tracing::warn!(operation = id, error = %err, "operation failed"),
        }
        result
    }

    async fn run_stages(
        &self,
        op: &str,
        target: Option<&str>,
        state: &SharedState,
        relayout: Option<&[String]>,
        timeout: Option<Duration>,
    ) -> Result<RenderData> {
        if relayout.is_some_and(|ids| ids.is_empty()) {
            tracing::debug!(operation = op, "layout skipped");
        } else {
            let limit = timeout.or_else(|| self.config.default_timeout());
            let started = Instant::now();
            let outcome = match limit {
                Some(limit) => tokio::time::timeout(limit, self.layout_stage(state, relayout))
                    .await
                    .unwrap_or_else(|_| {
                        self.bridge.fail(&mut state.borrow_mut());
                        tracing::warn!(operation = op, timeout_ms = limit.as_millis() as u64, "layout timed out");
                        Err(Error::Timeout {
                            stage: Stage::Layout,
                            elapsed: started.elapsed(),
                        })
                    }),
                None => self.layout_stage(state, relayout).await,
            };
            outcome.map_err(|err| OperationError::new(op, target, Stage::Layout, err))?;
        }
        self.render_stage(state)
            .map_err(|err| OperationError::new(op, target, Stage::Render, err).into())
    }

    /// Layout with race detection: the visible container count is compared
    /// across the engine call and a change triggers a bounded, backed-off
    /// retry. A large shortfall in returned containers with no topology
    /// change is an engine failure and is not retried.
    async fn layout_stage(&self, state: &SharedState, relayout: Option<&[String]>) -> Result<bool> {
        let attempts = self.config.race_retry_attempts.max(1);
        let mut delays = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.config.race_retry_min_delay_ms))
            .with_max_delay(Duration::from_millis(self.config.race_retry_max_delay_ms))
            .with_factor(2.0)
            .with_max_times(attempts)
            .build();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = self.bridge.build_request(&mut state.borrow_mut(), relayout)?;
            let before = request.visible_containers;
            let outcome = match self.bridge.compute(&request).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.bridge.fail(&mut state.borrow_mut());
                    return Err(err);
                }
            };
            let after = state.borrow().visible_container_count();

            if after != before {
                if attempt >= attempts {
                    self.bridge.fail(&mut state.borrow_mut());
                    tracing::error!(before, after, attempts = attempt, "topology kept changing during layout");
                    return Err(Error::TopologyRace {
                        before,
                        after,
                        attempts: attempt,
                    });
                }
                let delay = delays
                    .next()
                    .unwrap_or(Duration::from_millis(self.config.race_retry_max_delay_ms));
                tracing::warn!(
                    attempt,
                    before,
                    after,
                    delay_ms = delay.as_millis() as u64,
                    "topology changed during layout, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let expected = request.expected_containers();
            let returned = request.returned_containers(&outcome.graph);
            if expected > 0 && returned < expected {
                let ratio = returned as f32 / expected as f32;
                if ratio < self.config.container_deficit_ratio {
                    self.bridge.fail(&mut state.borrow_mut());
                    tracing::error!(expected, returned, before, after, "layout engine dropped containers");
                    return Err(LayoutEngineError::ContainerDeficit {
                        expected,
                        returned,
                        visible_before: before,
                        visible_after: after,
                    }
                    .into());
                }
            }

            self.bridge
                .apply_result(&mut state.borrow_mut(), &request, &outcome.graph)?;
            if outcome.used_fallback {
                tracing::info!("layout applied from fallback configuration");
            }
            return Ok(outcome.used_fallback);
        }
    }

    /// Validates the state, snapshots the visible subset and hands it to
    /// the render callback. The state is not borrowed during the callback.
    fn render_stage(&self, state: &SharedState) -> Result<RenderData> {
        let data = {
            let state = state.borrow();
            state.validate_invariants()?;
            RenderData::from_state(&state)
        };
        if let Some(callback) = &self.on_render {
            callback(&data).map_err(|err| Error::Callback {
                stage: Stage::Render,
                message: format!("{err:#}"),
            })?;
        }
        *self.last_render.borrow_mut() = Some(data.clone());
        Ok(data)
    }

    fn fit_view_request(&self, focus: Vec<String>) -> FitViewRequest {
        FitViewRequest {
            focus,
            padding: self.config.fit_view_padding,
            duration_ms: self.config.fit_view_duration_ms,
        }
    }

    fn request_fit_view(&self, request: &FitViewRequest) -> Result<()> {
        let Some(callback) = &self.on_fit_view else {
            return Ok(());
        };
        callback(request).map_err(|err| Error::Callback {
            stage: Stage::FitView,
            message: format!("{err:#}"),
        })
    }

    fn focus_best_effort(&self, focus: Vec<String>) {
        let request = self.fit_view_request(focus);
        if let Err(err) = self.request_fit_view(&request) {
            tracing::warn!(error = %err, focus = ?request.focus, "viewport focus failed, ignoring");
        }
    }

    /// Undoes `action` on `ids` in reverse order, then puts back the
    /// geometry and phase from before the operation. If an inverse fails
    /// the state is left in the error phase so the next pipeline relays it.
    fn revert(
        &self,
        action: ContainerAction,
        ids: &[String],
        state: &SharedState,
        checkpoint: &LayoutCheckpoint,
    ) {
        let mut state = state.borrow_mut();
        for id in ids.iter().rev() {
            if let Err(err) = apply_action(&mut state, action.inverse(), id) {
                tracing::error!(container = %id, error = %err, "could not revert container operation");
                self.bridge.fail(&mut state);
                return;
            }
        }
        self.bridge.restore(&mut state, checkpoint);
        tracing::info!(containers = ?ids, phase = checkpoint.phase().as_str(), "container operation reverted");
    }
}

fn apply_action(
    state: &mut crate::state::VisualizationState,
    action: ContainerAction,
    id: &str,
) -> Result<()> {
    match action {
        ContainerAction::Expand => state.expand_container(id),
        ContainerAction::Collapse => state.collapse_container(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ir::{ContainerSpec, LayoutPhase, NodeSpec};
    use crate::layout::DagreEngine;
    use crate::state::VisualizationState;

    fn coordinator() -> PipelineCoordinator<DagreEngine> {
        let config = Config::default();
        PipelineCoordinator::new(
            LayoutBridge::new(DagreEngine::new(config.layout.clone()), config.layout),
            config.pipeline,
        )
    }

    fn state() -> SharedState {
        let mut state = VisualizationState::new();
        state.add_node(NodeSpec::new("a")).unwrap();
        state.add_container(ContainerSpec::new("g", ["a"])).unwrap();
        crate::shared(state)
    }

    #[test]
    fn fit_view_request_carries_configured_viewport() {
        let coordinator = coordinator();
        let request = coordinator.fit_view_request(vec!["g".to_string()]);
        assert_eq!(request.padding, coordinator.config().fit_view_padding);
        assert_eq!(request.duration_ms, coordinator.config().fit_view_duration_ms);
        assert_eq!(ContainerAction::Expand.inverse(), ContainerAction::Collapse);
    }

    #[tokio::test]
    async fn skipped_layout_still_renders() {
        let coordinator = coordinator();
        let state = state();
        let data = coordinator
            .collapse_container(
                "g",
                &state,
                ContainerOpOptions {
                    skip_layout: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(data.phase, LayoutPhase::Idle);
        assert_eq!(data.containers.len(), 1);
        assert!(data.containers[0].position.is_none());
        assert_eq!(
            coordinator.operation_status(1),
            Some(OperationStatus::Completed)
        );
    }

    #[tokio::test]
    async fn noop_container_op_skips_layout() {
        let coordinator = coordinator();
        let state = state();
        coordinator
            .expand_container("g", &state, ContainerOpOptions::default())
            .await
            .unwrap();
        assert_eq!(state.borrow().layout_phase(), LayoutPhase::Idle);
    }
}
