//! Run manager (spec §4.5)
//!
//! Tracks active runs for a session: assignment of `run_id`, the
//! `maxConcurrentRuns` cap, and the finished/cancelled/errored terminal
//! transitions. Tool calls reference a `run_id` for observability and for
//! advisory cancellation when their run is cancelled.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{HaipError, Result};

/// Status a `RUN_FINISHED`/`RUN_ERROR` leaves a run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    /// Currently accepting and tagging channel traffic.
    Active,
    /// Completed normally via `RUN_FINISHED`.
    Finished,
    /// Ended via `RUN_CANCEL`.
    Cancelled,
    /// Ended via `RUN_ERROR`.
    Errored,
}

/// A single tracked run.
#[derive(Debug, Clone)]
pub struct Run {
    /// The run identifier, client-supplied or engine-assigned.
    pub run_id: String,
    /// Optional conversation thread this run belongs to.
    pub thread_id: Option<String>,
    /// Opaque metadata echoed back with `RUN_STARTED`.
    pub metadata: Option<Value>,
    /// Current lifecycle status.
    pub status: RunStatus,
}

/// Per-session run manager.
#[derive(Debug, Default)]
pub struct RunManager {
    active: HashMap<String, Run>,
    max_concurrent_runs: usize,
}

impl RunManager {
    /// Construct a manager enforcing `max_concurrent_runs` simultaneously
    /// active runs.
    pub fn new(max_concurrent_runs: usize) -> Self {
        Self {
            active: HashMap::new(),
            max_concurrent_runs,
        }
    }

    /// Number of runs currently in [`RunStatus::Active`].
    pub fn active_count(&self) -> usize {
        self.active.values().filter(|r| r.status == RunStatus::Active).count()
    }

    /// Handle an inbound `RUN_STARTED`. Assigns a `run_id` if absent, and
    /// rejects with [`HaipError::RunLimitExceeded`] once the active count
    /// reaches the configured cap.
    pub fn start(
        &mut self,
        run_id: Option<String>,
        thread_id: Option<String>,
        metadata: Option<Value>,
    ) -> Result<Run> {
        if self.active_count() >= self.max_concurrent_runs {
            return Err(HaipError::RunLimitExceeded {
                max: self.max_concurrent_runs,
            });
        }

        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let run = Run {
            run_id: run_id.clone(),
            thread_id,
            metadata,
            status: RunStatus::Active,
        };
        self.active.insert(run_id, run.clone());
        Ok(run)
    }

    /// Look up an active or recently-terminated run.
    pub fn get(&self, run_id: &str) -> Option<&Run> {
        self.active.get(run_id)
    }

    /// Handle `RUN_FINISHED`: mark terminal and drop from the active set.
    pub fn finish(&mut self, run_id: &str) -> Result<Run> {
        self.terminate(run_id, RunStatus::Finished)
    }

    /// Handle `RUN_CANCEL`: mark cancelled and drop from the active set.
    /// Callers are responsible for sending `TOOL_CANCEL` to in-flight tool
    /// calls bound to this run (spec §4.5/§4.6).
    pub fn cancel(&mut self, run_id: &str) -> Result<Run> {
        self.terminate(run_id, RunStatus::Cancelled)
    }

    /// Handle `RUN_ERROR`: mark errored and drop from the active set.
    pub fn error(&mut self, run_id: &str) -> Result<Run> {
        self.terminate(run_id, RunStatus::Errored)
    }

    fn terminate(&mut self, run_id: &str, status: RunStatus) -> Result<Run> {
        let mut run = self
            .active
            .remove(run_id)
            .ok_or_else(|| HaipError::RunNotFound(run_id.to_string()))?;
        run.status = status;
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_assigns_id_when_absent() {
        let mut mgr = RunManager::new(4);
        let run = mgr.start(None, None, None).unwrap();
        assert!(Uuid::parse_str(&run.run_id).is_ok());
        assert_eq!(mgr.active_count(), 1);
    }

    #[test]
    fn start_honors_caller_supplied_id() {
        let mut mgr = RunManager::new(4);
        let run = mgr.start(Some("r1".into()), None, None).unwrap();
        assert_eq!(run.run_id, "r1");
    }

    #[test]
    fn exceeding_max_concurrent_runs_fails() {
        let mut mgr = RunManager::new(1);
        mgr.start(Some("r1".into()), None, None).unwrap();
        let err = mgr.start(Some("r2".into()), None, None).unwrap_err();
        assert_eq!(err.code(), "RUN_LIMIT_EXCEEDED");
    }

    #[test]
    fn finish_removes_from_active_set() {
        let mut mgr = RunManager::new(4);
        mgr.start(Some("r1".into()), None, None).unwrap();
        let run = mgr.finish("r1").unwrap();
        assert_eq!(run.status, RunStatus::Finished);
        assert_eq!(mgr.active_count(), 0);
        assert!(mgr.get("r1").is_none());
    }

    #[test]
    fn terminating_unknown_run_fails() {
        let mut mgr = RunManager::new(4);
        let err = mgr.cancel("missing").unwrap_err();
        assert_eq!(err.code(), "RUN_NOT_FOUND");
    }

    #[test]
    fn cancelled_run_frees_a_slot() {
        let mut mgr = RunManager::new(1);
        mgr.start(Some("r1".into()), None, None).unwrap();
        mgr.cancel("r1").unwrap();
        assert!(mgr.start(Some("r2".into()), None, None).is_ok());
    }
}
