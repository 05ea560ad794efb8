//! Transition rules for partition step executions.
//!
//! Statuses only move forward: STARTING -> STARTED -> {COMPLETED, FAILED, STOPPED}.
//! UNKNOWN is reachable from either non-terminal state, but only through the
//! dispatcher's deadline sweep. A worker that cannot run a request (unknown
//! step name) may fail the record only while it is still STARTING; once
//! another worker has claimed it, the record belongs to that worker.

use super::states::ExecutionStatus;
use crate::error::{BatchError, BatchResult};

/// Who is asking for the transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionActor {
    /// The worker holding the claim
    Worker,
    /// A worker turning a request down before any claim
    RejectingWorker,
    Dispatcher,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionGuard;

impl TransitionGuard {
    pub fn is_allowed(from: ExecutionStatus, to: ExecutionStatus, actor: TransitionActor) -> bool {
        use ExecutionStatus::*;

        match (actor, from, to) {
            (TransitionActor::Worker, Starting, Started) => true,
            (TransitionActor::Worker, Started, Completed | Failed | Stopped) => true,
            (TransitionActor::RejectingWorker, Starting, Failed) => true,
            (TransitionActor::Dispatcher, Starting | Started, Unknown) => true,
            _ => false,
        }
    }

    /// Source states from which `to` may be reached by `actor`.
    ///
    /// Used as the `WHERE status = ANY(...)` predicate of the ledger's
    /// conditional update.
    pub fn allowed_sources(to: ExecutionStatus, actor: TransitionActor) -> Vec<ExecutionStatus> {
        [ExecutionStatus::Starting, ExecutionStatus::Started]
            .into_iter()
            .filter(|from| Self::is_allowed(*from, to, actor))
            .collect()
    }

    pub fn check(
        execution_id: i64,
        from: ExecutionStatus,
        to: ExecutionStatus,
        actor: TransitionActor,
    ) -> BatchResult<()> {
        if Self::is_allowed(from, to, actor) {
            Ok(())
        } else {
            Err(BatchError::StateTransition {
                execution_id,
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }
}
