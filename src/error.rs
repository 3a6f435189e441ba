use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::ir::EntityKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Number of offending edges named in a [`DataConsistencyError`] message.
pub const CONSISTENCY_REPORT_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum Error {
    #[error("duplicate {kind} id '{id}'")]
    DuplicateId { kind: EntityKind, id: String },

    #[error("unknown {kind} '{id}'")]
    UnknownEntity { kind: EntityKind, id: String },

    #[error("{kind} id '{id}' is reserved for derived hyperedges")]
    ReservedId { kind: EntityKind, id: String },

    #[error("invalid dimensions {width}x{height} for {kind} '{id}'")]
    InvalidDimensions {
        kind: EntityKind,
        id: String,
        width: f32,
        height: f32,
    },

    #[error(transparent)]
    InvariantViolation(#[from] InvariantViolation),

    #[error(transparent)]
    DataConsistency(#[from] DataConsistencyError),

    #[error(transparent)]
    LayoutEngine(#[from] LayoutEngineError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("{stage} stage timed out after {}ms", .elapsed.as_millis())]
    Timeout { stage: Stage, elapsed: Duration },

    #[error("{stage} callback failed: {message}")]
    Callback { stage: Stage, message: String },

    #[error("operation #{id} ({operation}) was cancelled before it started")]
    Cancelled { id: u64, operation: String },

    #[error(
        "visible container count changed during layout ({before} -> {after}) \
         on each of {attempts} attempts"
    )]
    TopologyRace {
        before: usize,
        after: usize,
        attempts: usize,
    },
}

impl Error {
    pub fn unknown(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::UnknownEntity {
            kind,
            id: id.into(),
        }
    }

    pub fn duplicate(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::DuplicateId {
            kind,
            id: id.into(),
        }
    }

    /// Walks through operation wrappers to the error that actually failed.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Operation(op) => op.source.root_cause(),
            other => other,
        }
    }
}

/// Which rule a state walk found broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantRule {
    DanglingEdgeEndpoint,
    DanglingHyperEdgeEndpoint,
    OrphanedChild,
    MultipleParents,
    HierarchyCycle,
    CollapsedLeaksVisibleDescendant,
    ExpandedButHidden,
    VisibleEdgeWithHiddenEndpoint,
    HyperEdgeOnHiddenEndpoint,
    EmptyHyperEdge,
}

impl fmt::Display for InvariantRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InvariantRule::DanglingEdgeEndpoint => "dangling edge endpoint",
            InvariantRule::DanglingHyperEdgeEndpoint => "dangling hyperedge endpoint",
            InvariantRule::OrphanedChild => "orphaned child reference",
            InvariantRule::MultipleParents => "child claimed by more than one container",
            InvariantRule::HierarchyCycle => "container hierarchy cycle",
            InvariantRule::CollapsedLeaksVisibleDescendant => {
                "collapsed container has a visible descendant"
            }
            InvariantRule::ExpandedButHidden => "container is hidden but not collapsed",
            InvariantRule::VisibleEdgeWithHiddenEndpoint => "visible edge has a hidden endpoint",
            InvariantRule::HyperEdgeOnHiddenEndpoint => "visible hyperedge ends on a hidden entity",
            InvariantRule::EmptyHyperEdge => "hyperedge aggregates no edges",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Error)]
#[error("invariant violated ({rule}): {detail}")]
pub struct InvariantViolation {
    pub entity: String,
    pub rule: InvariantRule,
    pub detail: String,
}

impl InvariantViolation {
    pub fn new(entity: impl Into<String>, rule: InvariantRule, detail: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            rule,
            detail: detail.into(),
        }
    }
}

/// An edge of the constructed layout graph names an id the graph does not
/// contain. Always an aggregation bug upstream.
#[derive(Debug, Clone, Error)]
#[error(
    "{total} layout edge(s) reference ids missing from the layout graph: {}",
    .offending.join("; ")
)]
pub struct DataConsistencyError {
    /// `"<edge id> (<source> -> <target>)"` for the first few offenders.
    pub offending: Vec<String>,
    pub total: usize,
}

impl DataConsistencyError {
    pub fn mentions(&self, edge_id: &str) -> bool {
        self.offending
            .iter()
            .any(|entry| entry.split_whitespace().next() == Some(edge_id))
    }
}

#[derive(Debug, Clone, Error)]
pub enum LayoutEngineError {
    #[error("layout engine rejected the graph: {0}")]
    Rejected(String),

    #[error("layout engine returned invalid geometry for '{id}': {reason}")]
    InvalidGeometry { id: String, reason: String },

    #[error("layout engine result is missing element '{0}'")]
    MissingElement(String),

    #[error(
        "layout engine returned {returned} of {expected} containers \
         (visible containers before/after: {visible_before}/{visible_after})"
    )]
    ContainerDeficit {
        expected: usize,
        returned: usize,
        visible_before: usize,
        visible_after: usize,
    },
}

impl LayoutEngineError {
    pub const HITBOX_SIGNATURE: &'static str =
        "invalid hitboxes for scanline constraint calculation";

    /// The one failure class that earns a fallback retry.
    pub fn is_hitbox_failure(&self) -> bool {
        match self {
            LayoutEngineError::Rejected(message) => message
                .to_ascii_lowercase()
                .contains(Self::HITBOX_SIGNATURE),
            _ => false,
        }
    }
}

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Mutation,
    Layout,
    Render,
    FitView,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Stage::Mutation => "mutation",
            Stage::Layout => "layout",
            Stage::Render => "render",
            Stage::FitView => "fit-view",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
#[error("{} {stage} operation failed{}: {source}", .operation, .target.as_deref().map(|t| format!(" for '{t}'")).unwrap_or_default())]
pub struct OperationError {
    pub operation: String,
    pub target: Option<String>,
    pub stage: Stage,
    #[source]
    pub source: Box<Error>,
}

impl OperationError {
    pub fn new(
        operation: impl Into<String>,
        target: Option<&str>,
        stage: Stage,
        source: Error,
    ) -> Self {
        Self {
            operation: operation.into(),
            target: target.map(str::to_string),
            stage,
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_message_names_entity_and_rule() {
        let err = Error::from(InvariantViolation::new(
            "e7",
            InvariantRule::DanglingEdgeEndpoint,
            "Edge e7 references non-existent node n99",
        ));
        let text = err.to_string();
        assert!(text.contains("dangling edge endpoint"), "{text}");
        assert!(text.contains("Edge e7 references non-existent node n99"), "{text}");
    }

    #[test]
    fn operation_error_is_stage_tagged() {
        let inner = Error::LayoutEngine(LayoutEngineError::Rejected("boom".to_string()));
        let err = OperationError::new("expand", Some("c1"), Stage::Layout, inner);
        assert_eq!(
            err.to_string(),
            "expand layout operation failed for 'c1': layout engine rejected the graph: boom"
        );
    }

    #[test]
    fn root_cause_unwraps_nested_operations() {
        let inner = Error::Timeout {
            stage: Stage::Layout,
            elapsed: Duration::from_millis(10),
        };
        let wrapped = Error::from(OperationError::new("layout", None, Stage::Layout, inner));
        assert!(matches!(wrapped.root_cause(), Error::Timeout { .. }));
    }

    #[test]
    fn hitbox_signature_is_case_insensitive() {
        let err = LayoutEngineError::Rejected(
            "Engine: Invalid hitboxes for scanline constraint calculation.".to_string(),
        );
        assert!(err.is_hitbox_failure());
        assert!(!LayoutEngineError::Rejected("out of memory".to_string()).is_hitbox_failure());
    }

    #[test]
    fn consistency_error_mentions_edge_by_id() {
        let err = DataConsistencyError {
            offending: vec!["e9 (n1 -> n99)".to_string()],
            total: 1,
        };
        assert!(err.mentions("e9"));
        assert!(!err.mentions("e1"));
    }
}
