use std::cell::RefCell;
use std::collections::BTreeMap;

use serde::Serialize;

/// Finished records kept for inspection before the oldest are dropped.
const HISTORY_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Pipeline,
    Expand,
    Collapse,
    Search,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Pipeline => "pipeline",
            OperationKind::Expand => "expand",
            OperationKind::Collapse => "collapse",
            OperationKind::Search => "search",
        }
    }

    /// Whether a newer operation of kind `self` on `target` makes a queued
    /// `other` pointless.
    fn supersedes(&self, target: Option<&str>, other: &OperationRecord) -> bool {
        match (self, other.kind) {
            (
                OperationKind::Expand | OperationKind::Collapse,
                OperationKind::Expand | OperationKind::Collapse,
            ) => target.is_some() && target == other.target.as_deref(),
            (OperationKind::Search, OperationKind::Search) => true,
            (OperationKind::Pipeline, OperationKind::Pipeline) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub id: u64,
    pub kind: OperationKind,
    pub target: Option<String>,
    pub status: OperationStatus,
}

#[derive(Debug, Default)]
pub(crate) struct OperationLog {
    next_id: u64,
    records: BTreeMap<u64, OperationRecord>,
}

impl OperationLog {
    /// Registers a queued operation and cancels queued ones it supersedes.
    pub(crate) fn enqueue(&mut self, kind: OperationKind, target: Option<&str>) -> (u64, Vec<u64>) {
        self.next_id += 1;
        let id = self.next_id;
        let mut superseded = Vec::new();
        for record in self.records.values_mut() {
            if record.status == OperationStatus::Queued && kind.supersedes(target, record) {
                record.status = OperationStatus::Cancelled;
                superseded.push(record.id);
            }
        }
        self.records.insert(
            id,
            OperationRecord {
                id,
                kind,
                target: target.map(str::to_string),
                status: OperationStatus::Queued,
            },
        );
        self.prune();
        (id, superseded)
    }

    /// Moves a queued operation to running. False when it was cancelled
    /// while waiting.
    pub(crate) fn start(&mut self, id: u64) -> bool {
        match self.records.get_mut(&id) {
            Some(record) if record.status == OperationStatus::Queued => {
                record.status = OperationStatus::Running;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn finish(&mut self, id: u64, succeeded: bool) {
        if let Some(record) = self.records.get_mut(&id) {
            if record.status == OperationStatus::Running {
                record.status = if succeeded {
                    OperationStatus::Completed
                } else {
                    OperationStatus::Failed
                };
            }
        }
    }

    /// Cancels an operation that has not started. Running operations are
    /// not preemptible.
    pub(crate) fn cancel(&mut self, id: u64) -> bool {
        match self.records.get_mut(&id) {
            Some(record) if record.status == OperationStatus::Queued => {
                record.status = OperationStatus::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// Marks an operation whose future was dropped before it settled.
    pub(crate) fn abandon(&mut self, id: u64) {
        if let Some(record) = self.records.get_mut(&id) {
            match record.status {
                OperationStatus::Queued => record.status = OperationStatus::Cancelled,
                OperationStatus::Running => record.status = OperationStatus::Failed,
                _ => {}
            }
        }
    }

    pub(crate) fn get(&self, id: u64) -> Option<&OperationRecord> {
        self.records.get(&id)
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &OperationRecord> + '_ {
        self.records.values()
    }

    fn prune(&mut self) {
        let finished: Vec<u64> = self
            .records
            .values()
            .filter(|record| record.status.is_finished())
            .map(|record| record.id)
            .collect();
        if finished.len() <= HISTORY_LIMIT {
            return;
        }
        for id in &finished[..finished.len() - HISTORY_LIMIT] {
            self.records.remove(id);
        }
    }
}

/// Settles an operation's log entry even if its future is dropped midway.
pub(crate) struct Ticket<'a> {
    log: &'a RefCell<OperationLog>,
    pub(crate) id: u64,
    settled: bool,
}

impl<'a> Ticket<'a> {
    pub(crate) fn new(log: &'a RefCell<OperationLog>, id: u64) -> Self {
        Self {
            log,
            id,
            settled: false,
        }
    }

    pub(crate) fn settle(mut self, succeeded: bool) {
        self.log.borrow_mut().finish(self.id, succeeded);
        self.settled = true;
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.log.borrow_mut().abandon(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_moves_through_statuses() {
        let mut log = OperationLog::default();
        let (id, superseded) = log.enqueue(OperationKind::Expand, Some("c1"));
        assert!(superseded.is_empty());
        assert_eq!(log.get(id).unwrap().status, OperationStatus::Queued);
        assert!(log.start(id));
        assert!(!log.cancel(id));
        log.finish(id, true);
        assert_eq!(log.get(id).unwrap().status, OperationStatus::Completed);
    }

    #[test]
    fn newer_container_op_supersedes_queued_one_on_same_target() {
        let mut log = OperationLog::default();
        let (first, _) = log.enqueue(OperationKind::Collapse, Some("c1"));
        let (other, _) = log.enqueue(OperationKind::Collapse, Some("c2"));
        let (_, superseded) = log.enqueue(OperationKind::Expand, Some("c1"));
        assert_eq!(superseded, vec![first]);
        assert!(!log.start(first));
        assert_eq!(log.get(other).unwrap().status, OperationStatus::Queued);
    }

    #[test]
    fn running_ops_are_never_superseded() {
        let mut log = OperationLog::default();
        let (first, _) = log.enqueue(OperationKind::Pipeline, None);
        assert!(log.start(first));
        let (_, superseded) = log.enqueue(OperationKind::Pipeline, None);
        assert!(superseded.is_empty());
        assert_eq!(log.get(first).unwrap().status, OperationStatus::Running);
    }

    #[test]
    fn dropped_ticket_abandons_operation() {
        let log = RefCell::new(OperationLog::default());
        let (id, _) = log.borrow_mut().enqueue(OperationKind::Search, Some("q"));
        assert!(log.borrow_mut().start(id));
        drop(Ticket::new(&log, id));
        assert_eq!(log.borrow().get(id).unwrap().status, OperationStatus::Failed);
    }

    #[test]
    fn history_is_bounded() {
        let mut log = OperationLog::default();
        for _ in 0..(HISTORY_LIMIT + 10) {
            let (id, _) = log.enqueue(OperationKind::Expand, Some("c"));
            log.start(id);
            log.finish(id, true);
        }
        assert!(log.records().count() <= HISTORY_LIMIT + 1);
    }
}
