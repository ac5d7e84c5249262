//! Per-question session state and the answers a session can end in.

use std::fmt;
use tokio::time::Instant;

/// Where a question is in its lifecycle.
///
/// `Created -> Submitted -> Polling -> {Completed | Failed | TimedOut}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    Created,
    Submitted,
    Polling,
    Completed(String),
    Failed(String),
    TimedOut,
}

impl QueryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryStatus::Completed(_) | QueryStatus::Failed(_) | QueryStatus::TimedOut
        )
    }

    fn can_become(&self, next: &QueryStatus) -> bool {
        use QueryStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Created, Submitted)
                | (Submitted, Polling)
                | (Polling, Polling)
                | (Polling, Completed(_))
                | (Polling, Failed(_))
                | (Polling, TimedOut)
        )
    }
}

/// One remote conversation carrying one question.
#[derive(Debug, Clone)]
pub struct RemoteQuerySession {
    pub session_id: String,
    pub ticker: Option<String>,
    pub question: String,
    status: QueryStatus,
    submitted_at: Option<Instant>,
}

impl RemoteQuerySession {
    pub fn new(session_id: String, ticker: Option<&str>, question: &str) -> Self {
        Self {
            session_id,
            ticker: ticker.map(str::to_string),
            question: question.to_string(),
            status: QueryStatus::Created,
            submitted_at: None,
        }
    }

    pub fn status(&self) -> &QueryStatus {
        &self.status
    }

    /// Time since the question was submitted; zero before that.
    pub fn since_submitted(&self) -> std::time::Duration {
        self.submitted_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Move to `next`. Illegal transitions are ignored and return `false`.
    pub fn advance(&mut self, next: QueryStatus) -> bool {
        if !self.status.can_become(&next) {
            return false;
        }
        if next == QueryStatus::Submitted {
            self.submitted_at = Some(Instant::now());
        }
        self.status = next;
        true
    }
}

/// What a question resolves to. Failures are explicit sentinels rather than
/// errors so each output field always holds exactly one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAnswer {
    Answer(String),
    RunFailed,
    TimedOut,
    NoResponse,
    ApiFailed,
}

impl fmt::Display for RemoteAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteAnswer::Answer(text) => f.write_str(text),
            RemoteAnswer::RunFailed => f.write_str("ERROR: Run failed"),
            RemoteAnswer::TimedOut => f.write_str("ERROR: Timeout"),
            RemoteAnswer::NoResponse => f.write_str("ERROR: No response received"),
            RemoteAnswer::ApiFailed => f.write_str("ERROR: API failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut s = RemoteQuerySession::new("thread_1".into(), Some("ACME"), "q?");
        assert_eq!(s.status(), &QueryStatus::Created);
        assert!(s.advance(QueryStatus::Submitted));
        assert!(s.advance(QueryStatus::Polling));
        assert!(s.advance(QueryStatus::Polling));
        assert!(s.advance(QueryStatus::Completed("a".into())));
        assert!(s.status().is_terminal());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut s = RemoteQuerySession::new("thread_1".into(), None, "q?");
        assert!(!s.advance(QueryStatus::Polling));
        assert!(!s.advance(QueryStatus::Completed("a".into())));
        s.advance(QueryStatus::Submitted);
        s.advance(QueryStatus::Polling);
        s.advance(QueryStatus::TimedOut);
        assert!(!s.advance(QueryStatus::Polling));
        assert_eq!(s.status(), &QueryStatus::TimedOut);
    }

    #[test]
    fn test_sentinel_text() {
        assert_eq!(RemoteAnswer::RunFailed.to_string(), "ERROR: Run failed");
        assert_eq!(RemoteAnswer::TimedOut.to_string(), "ERROR: Timeout");
        assert_eq!(RemoteAnswer::NoResponse.to_string(), "ERROR: No response received");
        assert_eq!(RemoteAnswer::ApiFailed.to_string(), "ERROR: API failed");
        assert_eq!(RemoteAnswer::Answer("42".into()).to_string(), "42");
    }
}
