//! Remote query orchestration: `question -> answer | sentinel`.
//!
//! An [`Orchestrator`] drives one question through a hosted assistant:
//!
//! 1. random jitter, then open a session (thread)
//! 2. send the question, start a run
//! 3. poll the run every `check_interval` until it completes, fails, or
//!    `timeout` has passed since submission
//! 4. read the first assistant response
//!
//! A run that fails or times out resolves to a sentinel without retrying.
//! A transport error anywhere in 1–4 restarts the whole sequence, up to
//! `max_retries` attempts with exponential backoff between them; after
//! that the question resolves to [`RemoteAnswer::ApiFailed`].

pub mod events;
pub mod openai;
pub mod session;

pub use events::{QueryEvent, QueryObserver};
pub use session::{QueryStatus, RemoteAnswer, RemoteQuerySession};

use crate::error::{HarvestError, TransportError};
use crate::pacing::PauseRange;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, instrument, warn};

/// Run state as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Completed,
    Failed(String),
}

/// The remote conversational service, one call per method.
pub trait AssistantTransport {
    /// Open a session and return its id.
    async fn create_thread(&self) -> Result<String, TransportError>;

    async fn add_message(&self, thread_id: &str, content: &str) -> Result<(), TransportError>;

    /// Start processing the thread and return the run id.
    async fn start_run(&self, thread_id: &str) -> Result<String, TransportError>;

    async fn run_status(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, TransportError>;

    /// Newest assistant response in the thread, if any.
    async fn first_response(&self, thread_id: &str) -> Result<Option<String>, TransportError>;
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub check_interval: Duration,
    /// Measured from submission.
    pub timeout: Duration,
    /// Total session attempts on transport errors.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_backoff: Duration,
    pub session_jitter: PauseRange,
    /// Bound on every single transport call.
    pub request_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
            max_retries: 5,
            base_delay: Duration::from_secs(10),
            max_backoff: Duration::from_secs(600),
            session_jitter: PauseRange::secs(2, 5),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl OrchestratorConfig {
    /// Pause after the `attempt`-th failure (1-based): `base_delay × 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Drives questions through an [`AssistantTransport`] and reports progress
/// to its observers.
pub struct Orchestrator<T> {
    transport: T,
    config: OrchestratorConfig,
    observers: Vec<Box<dyn QueryObserver + Send + Sync>>,
}

impl<T: AssistantTransport> Orchestrator<T> {
    pub fn new(transport: T, config: OrchestratorConfig) -> Self {
        Self {
            transport,
            config,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn QueryObserver + Send + Sync>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn emit(&self, question: &str, event: QueryEvent) {
        for o in &self.observers {
            o.on_event(question, &event);
        }
    }

    async fn call<F, R>(&self, fut: F) -> Result<R, TransportError>
    where
        F: Future<Output = Result<R, TransportError>>,
    {
        timeout(self.config.request_timeout, fut)
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    /// Drive `question` to an answer or a sentinel. Never fails.
    #[instrument(level = "info", skip_all, fields(ticker = ticker.unwrap_or("-")))]
    pub async fn ask(&self, ticker: Option<&str>, question: &str) -> RemoteAnswer {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.config.session_jitter.pause().await;

            match self.attempt(ticker, question, attempt).await {
                Ok(answer) => return answer,
                Err(e) => {
                    if attempt >= self.config.max_retries {
                        self.emit(
                            question,
                            QueryEvent::TransportFailure {
                                attempt,
                                error: e.to_string(),
                                backoff: None,
                            },
                        );
                        self.emit(question, QueryEvent::GaveUp { attempts: attempt });
                        return RemoteAnswer::ApiFailed;
                    }
                    let delay = self.config.backoff(attempt);
                    self.emit(
                        question,
                        QueryEvent::TransportFailure {
                            attempt,
                            error: e.to_string(),
                            backoff: Some(delay),
                        },
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// One full session. `Err` only for transport faults.
    async fn attempt(
        &self,
        ticker: Option<&str>,
        question: &str,
        attempt: u32,
    ) -> Result<RemoteAnswer, TransportError> {
        let thread_id = self.call(self.transport.create_thread()).await?;
        let mut session = RemoteQuerySession::new(thread_id, ticker, question);
        debug!(
            ticker = session.ticker.as_deref().unwrap_or("-"),
            session_id = %session.session_id,
            attempt,
            "Opened remote session"
        );
        self.emit(
            question,
            QueryEvent::SessionCreated {
                session_id: session.session_id.clone(),
                attempt,
            },
        );

        self.call(self.transport.add_message(&session.session_id, &session.question))
            .await?;
        session.advance(QueryStatus::Submitted);
        self.emit(
            question,
            QueryEvent::Submitted {
                session_id: session.session_id.clone(),
            },
        );

        let run_id = self.call(self.transport.start_run(&session.session_id)).await?;
        session.advance(QueryStatus::Polling);

        let poll_t0 = Instant::now();
        loop {
            sleep(self.config.check_interval).await;
            let status = self
                .call(self.transport.run_status(&session.session_id, &run_id))
                .await?;
            self.emit(
                question,
                QueryEvent::Polled {
                    session_id: session.session_id.clone(),
                    status: format!("{status:?}"),
                    elapsed: poll_t0.elapsed(),
                },
            );

            match status {
                RunStatus::Completed => break,
                RunStatus::Failed(reason) => {
                    let err = HarvestError::RemoteStatusFailure(reason);
                    self.emit(
                        question,
                        QueryEvent::Failed {
                            session_id: session.session_id.clone(),
                            reason: err.to_string(),
                        },
                    );
                    let status = QueryStatus::Failed(err.to_string());
                    return Ok(self.close(question, &mut session, status, RemoteAnswer::RunFailed));
                }
                RunStatus::Pending => {
                    session.advance(QueryStatus::Polling);
                }
            }

            if session.since_submitted() > self.config.timeout {
                self.emit(
                    question,
                    QueryEvent::TimedOut {
                        session_id: session.session_id.clone(),
                        elapsed: session.since_submitted(),
                    },
                );
                return Ok(self.close(question, &mut session, QueryStatus::TimedOut, RemoteAnswer::TimedOut));
            }
        }

        // a completed run with an empty thread still completes, with the sentinel as its answer
        let answer = match self
            .call(self.transport.first_response(&session.session_id))
            .await?
        {
            Some(text) if !text.trim().is_empty() => RemoteAnswer::Answer(text),
            _ => RemoteAnswer::NoResponse,
        };
        let chars = match &answer {
            RemoteAnswer::Answer(text) => text.chars().count(),
            _ => 0,
        };
        self.emit(
            question,
            QueryEvent::Completed {
                session_id: session.session_id.clone(),
                chars,
            },
        );
        let status = QueryStatus::Completed(answer.to_string());
        Ok(self.close(question, &mut session, status, answer))
    }

    /// Move `session` to its terminal `status` and report it.
    fn close(
        &self,
        question: &str,
        session: &mut RemoteQuerySession,
        status: QueryStatus,
        answer: RemoteAnswer,
    ) -> RemoteAnswer {
        if !session.advance(status) {
            warn!(session_id = %session.session_id, status = ?session.status(), "Session already closed");
        }
        self.emit(
            question,
            QueryEvent::Closed {
                session_id: session.session_id.clone(),
                status: session.status().clone(),
            },
        );
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fake service: fails the first `transport_failures` thread creations,
    /// then reports `statuses` in order (repeating the last one).
    struct Fake {
        transport_failures: AtomicU32,
        statuses: Mutex<Vec<RunStatus>>,
        response: Option<String>,
        threads: AtomicU32,
        created_at: Mutex<Vec<Instant>>,
        status_calls: AtomicU32,
        hang_on_create: bool,
    }

    impl Fake {
        fn new(transport_failures: u32, statuses: Vec<RunStatus>, response: Option<&str>) -> Self {
            Self {
                transport_failures: AtomicU32::new(transport_failures),
                statuses: Mutex::new(statuses),
                response: response.map(str::to_string),
                threads: AtomicU32::new(0),
                created_at: Mutex::new(Vec::new()),
                status_calls: AtomicU32::new(0),
                hang_on_create: false,
            }
        }
    }

    impl AssistantTransport for Fake {
        async fn create_thread(&self) -> Result<String, TransportError> {
            self.created_at.lock().unwrap().push(Instant::now());
            if self.hang_on_create {
                std::future::pending::<()>().await;
            }
            if self
                .transport_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TransportError::Network("connection reset".into()));
            }
            let n = self.threads.fetch_add(1, Ordering::SeqCst);
            Ok(format!("thread_{n}"))
        }

        async fn add_message(&self, _thread_id: &str, _content: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn start_run(&self, _thread_id: &str) -> Result<String, TransportError> {
            Ok("run_1".into())
        }

        async fn run_status(&self, _thread_id: &str, _run_id: &str) -> Result<RunStatus, TransportError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                Ok(statuses.remove(0))
            } else {
                Ok(statuses[0].clone())
            }
        }

        async fn first_response(&self, _thread_id: &str) -> Result<Option<String>, TransportError> {
            Ok(self.response.clone())
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<QueryEvent>>);

    impl QueryObserver for std::sync::Arc<Recorder> {
        fn on_event(&self, _question: &str, event: &QueryEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            session_jitter: PauseRange::none(),
            ..OrchestratorConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failures_then_success_with_growing_backoff() {
        let fake = Fake::new(3, vec![RunStatus::Completed], Some("Acme sells anvils."));
        let orch = Orchestrator::new(fake, config());

        let answer = orch.ask(Some("ACME"), "Describe Acme.").await;
        assert_eq!(answer, RemoteAnswer::Answer("Acme sells anvils.".into()));

        let created = orch.transport.created_at.lock().unwrap().clone();
        assert_eq!(created.len(), 4);
        let gaps: Vec<Duration> = created.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(20),
                Duration::from_secs(40),
                Duration::from_secs(80)
            ]
        );
        assert!(gaps.windows(2).all(|w| w[1] > w[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_is_api_failed_sentinel() {
        let fake = Fake::new(u32::MAX, vec![RunStatus::Completed], Some("never"));
        let recorder = std::sync::Arc::new(Recorder::default());
        let orch = Orchestrator::new(fake, config()).with_observer(Box::new(recorder.clone()));

        let t0 = Instant::now();
        let answer = orch.ask(None, "q").await;
        assert_eq!(answer, RemoteAnswer::ApiFailed);
        assert_eq!(answer.to_string(), "ERROR: API failed");
        assert_eq!(orch.transport.created_at.lock().unwrap().len(), 5);
        // 20 + 40 + 80 + 160, no pause after the last attempt
        assert_eq!(t0.elapsed(), Duration::from_secs(300));

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.last(), Some(&QueryEvent::GaveUp { attempts: 5 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_failure_is_not_retried() {
        let fake = Fake::new(
            0,
            vec![RunStatus::Pending, RunStatus::Failed("server_error".into())],
            Some("unused"),
        );
        let orch = Orchestrator::new(fake, config());
        assert_eq!(orch.ask(None, "q").await, RemoteAnswer::RunFailed);
        assert_eq!(orch.transport.threads.load(Ordering::SeqCst), 1);
        assert_eq!(orch.transport.status_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_completing_run_times_out_within_budget() {
        let fake = Fake::new(0, vec![RunStatus::Pending], Some("unused"));
        let orch = Orchestrator::new(fake, config());

        let t0 = Instant::now();
        assert_eq!(orch.ask(None, "q").await, RemoteAnswer::TimedOut);
        let elapsed = t0.elapsed();
        assert!(elapsed > Duration::from_secs(300));
        assert!(elapsed <= Duration::from_secs(305));
        assert_eq!(orch.transport.threads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_at_check_interval() {
        let fake = Fake::new(
            0,
            vec![RunStatus::Pending, RunStatus::Pending, RunStatus::Completed],
            Some("done"),
        );
        let orch = Orchestrator::new(fake, config());
        let t0 = Instant::now();
        assert!(matches!(orch.ask(None, "q").await, RemoteAnswer::Answer(_)));
        assert_eq!(t0.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_thread_is_no_response_sentinel() {
        let fake = Fake::new(0, vec![RunStatus::Completed], None);
        let orch = Orchestrator::new(fake, config());
        let answer = orch.ask(None, "q").await;
        assert_eq!(answer, RemoteAnswer::NoResponse);
        assert_eq!(answer.to_string(), "ERROR: No response received");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_thread_session_completes_with_sentinel() {
        let fake = Fake::new(0, vec![RunStatus::Completed], Some("   "));
        let recorder = std::sync::Arc::new(Recorder::default());
        let orch = Orchestrator::new(fake, config()).with_observer(Box::new(recorder.clone()));
        assert_eq!(orch.ask(None, "q").await, RemoteAnswer::NoResponse);

        let events = recorder.0.lock().unwrap();
        assert!(!events.iter().any(|e| matches!(e, QueryEvent::Failed { .. })));
        assert_eq!(
            events.last(),
            Some(&QueryEvent::Closed {
                session_id: "thread_0".into(),
                status: QueryStatus::Completed("ERROR: No response received".into()),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_closes_session_as_failed() {
        let fake = Fake::new(0, vec![RunStatus::Failed("server_error".into())], None);
        let recorder = std::sync::Arc::new(Recorder::default());
        let orch = Orchestrator::new(fake, config()).with_observer(Box::new(recorder.clone()));
        assert_eq!(orch.ask(None, "q").await, RemoteAnswer::RunFailed);

        let events = recorder.0.lock().unwrap();
        assert!(matches!(
            events.last(),
            Some(QueryEvent::Closed { status: QueryStatus::Failed(reason), .. }) if reason.contains("server_error")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_is_bounded_by_request_timeout() {
        let mut fake = Fake::new(0, vec![RunStatus::Completed], Some("x"));
        fake.hang_on_create = true;
        let cfg = OrchestratorConfig {
            max_retries: 2,
            request_timeout: Duration::from_secs(60),
            ..config()
        };
        let orch = Orchestrator::new(fake, cfg);
        let t0 = Instant::now();
        assert_eq!(orch.ask(None, "q").await, RemoteAnswer::ApiFailed);
        // two 60s hangs and one 20s backoff
        assert_eq!(t0.elapsed(), Duration::from_secs(140));
    }

    #[test]
    fn test_backoff_is_capped() {
        let cfg = OrchestratorConfig {
            max_backoff: Duration::from_secs(100),
            ..OrchestratorConfig::default()
        };
        assert_eq!(cfg.backoff(1), Duration::from_secs(20));
        assert_eq!(cfg.backoff(3), Duration::from_secs(80));
        assert_eq!(cfg.backoff(4), Duration::from_secs(100));
        assert_eq!(cfg.backoff(40), Duration::from_secs(100));
    }
}
