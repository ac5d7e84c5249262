//! Progress events emitted while a question is driven to an answer.

use super::session::QueryStatus;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    SessionCreated { session_id: String, attempt: u32 },
    Submitted { session_id: String },
    Polled { session_id: String, status: String, elapsed: Duration },
    Completed { session_id: String, chars: usize },
    Failed { session_id: String, reason: String },
    TimedOut { session_id: String, elapsed: Duration },
    TransportFailure { attempt: u32, error: String, backoff: Option<Duration> },
    GaveUp { attempts: u32 },
    /// The session reached a terminal status.
    Closed { session_id: String, status: QueryStatus },
}

/// Receives every event for every question, in order.
pub trait QueryObserver {
    fn on_event(&self, question: &str, event: &QueryEvent);
}

/// Writes every event to the log.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl QueryObserver for TracingObserver {
    fn on_event(&self, question: &str, event: &QueryEvent) {
        let question = crate::utils::truncate_for_log(question, 80);
        match event {
            QueryEvent::SessionCreated { session_id, attempt } => {
                debug!(%question, %session_id, attempt, "Session created")
            }
            QueryEvent::Submitted { session_id } => {
                debug!(%question, %session_id, "Question submitted")
            }
            QueryEvent::Polled {
                session_id,
                status,
                elapsed,
            } => debug!(
                %session_id,
                %status,
                elapsed_ms = elapsed.as_millis() as u64,
                "Checked run status"
            ),
            QueryEvent::Completed { session_id, chars: 0 } => {
                warn!(%question, %session_id, "Run completed without a response")
            }
            QueryEvent::Completed { session_id, chars } => {
                info!(%question, %session_id, chars, "Answer received")
            }
            QueryEvent::Failed { session_id, reason } => {
                warn!(%question, %session_id, %reason, "Run failed")
            }
            QueryEvent::TimedOut {
                session_id,
                elapsed,
            } => warn!(
                %question,
                %session_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Run timed out; skipping question"
            ),
            QueryEvent::TransportFailure {
                attempt,
                error,
                backoff,
            } => warn!(%question, attempt, %error, ?backoff, "Session attempt failed"),
            QueryEvent::GaveUp { attempts } => {
                error!(%question, attempts, "Skipping question after repeated failures")
            }
            QueryEvent::Closed { session_id, status } => {
                debug!(%session_id, ?status, "Session closed")
            }
        }
    }
}
