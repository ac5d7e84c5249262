//! End-to-end drivers.
//!
//! [`HarvestPipeline`]: entity -> queries -> search -> frontier -> fetch ->
//! clean/gate -> aggregator. Work is split across a pool of [`Worker`]s,
//! each owning its own search and page sessions; entity `i` goes to worker
//! `i % workers`. The frontier and aggregator are shared behind locks and
//! host pacing is shared through the fetchers' common pacer.
//!
//! With competitor discovery enabled, the first worker expands the entity
//! list before the harvest starts, and discovered competitors are harvested
//! with their own query set.
//!
//! [`ResearchPipeline`]: entity -> questions -> orchestrator -> aggregator.

use crate::aggregate::Aggregator;
use crate::clean::{Cleaner, QualityGate};
use crate::competitors::CompetitorFinder;
use crate::error::HarvestError;
use crate::fetch::{ContentFetcher, PageTransport};
use crate::frontier::{Admission, Frontier};
use crate::models::{CandidateLink, Entity, FetchStatus, HarvestedRecord, Query, RecordSet};
use crate::pacing::PauseRange;
use crate::queries::QueryGenerator;
use crate::remote::{AssistantTransport, Orchestrator, RemoteAnswer};
use crate::search::SearchProvider;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Counters for one run, one per outcome class.
#[derive(Debug, Default)]
pub struct RunStats {
    queries: AtomicUsize,
    candidates: AtomicUsize,
    duplicates: AtomicUsize,
    cap_rejections: AtomicUsize,
    fetched: AtomicUsize,
    timed_out: AtomicUsize,
    blocked: AtomicUsize,
    empty: AtomicUsize,
    errors: AtomicUsize,
    insufficient: AtomicUsize,
    records: AtomicUsize,
    answers: AtomicUsize,
    sentinels: AtomicUsize,
    competitors: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub queries: usize,
    pub candidates: usize,
    pub duplicates: usize,
    pub cap_rejections: usize,
    pub fetched: usize,
    pub timed_out: usize,
    pub blocked: usize,
    pub empty: usize,
    pub errors: usize,
    pub insufficient: usize,
    pub records: usize,
    pub answers: usize,
    pub sentinels: usize,
    pub competitors: usize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl RunStats {
    pub fn summary(&self) -> RunSummary {
        let get = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        RunSummary {
            queries: get(&self.queries),
            candidates: get(&self.candidates),
            duplicates: get(&self.duplicates),
            cap_rejections: get(&self.cap_rejections),
            fetched: get(&self.fetched),
            timed_out: get(&self.timed_out),
            blocked: get(&self.blocked),
            empty: get(&self.empty),
            errors: get(&self.errors),
            insufficient: get(&self.insufficient),
            records: get(&self.records),
            answers: get(&self.answers),
            sentinels: get(&self.sentinels),
            competitors: get(&self.competitors),
        }
    }
}

impl RunSummary {
    pub fn log(&self, kind: &str) {
        info!(
            kind,
            queries = self.queries,
            candidates = self.candidates,
            duplicates = self.duplicates,
            cap_rejections = self.cap_rejections,
            fetched = self.fetched,
            timed_out = self.timed_out,
            blocked = self.blocked,
            empty = self.empty,
            errors = self.errors,
            insufficient = self.insufficient,
            records = self.records,
            answers = self.answers,
            sentinels = self.sentinels,
            competitors = self.competitors,
            "Run summary"
        );
    }
}

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    /// Records (and admitted URLs) per (entity, field).
    pub cap: usize,
    pub max_links: usize,
    pub query_pause: PauseRange,
    pub entity_pause: PauseRange,
}

/// One worker's private sessions.
pub struct Worker<S, T> {
    pub search: S,
    pub fetcher: ContentFetcher<T>,
}

/// Drives the harvest: entities are dealt out to workers, each worker
/// renders the entity's queries, searches, and fetches candidates in rank
/// order. Admission, aggregation and counters are shared across workers.
pub struct HarvestPipeline<S, T> {
    workers: Vec<Worker<S, T>>,
    queries: QueryGenerator,
    cleaner: Cleaner,
    gate: QualityGate,
    settings: HarvestSettings,
    discovery: Option<Discovery>,
}

/// Competitor discovery and the queries run for what it finds.
struct Discovery {
    finder: CompetitorFinder,
    queries: QueryGenerator,
}

/// Run-scoped shared state.
struct Shared {
    frontier: Mutex<Frontier>,
    aggregator: Mutex<Aggregator>,
    stats: RunStats,
}

impl<S: SearchProvider, T: PageTransport> HarvestPipeline<S, T> {
    pub fn new(
        workers: Vec<Worker<S, T>>,
        queries: QueryGenerator,
        cleaner: Cleaner,
        gate: QualityGate,
        settings: HarvestSettings,
    ) -> Self {
        Self {
            workers,
            queries,
            cleaner,
            gate,
            settings,
            discovery: None,
        }
    }

    /// Harvest discovered competitors of every entity too, using `queries`.
    pub fn with_competitors(mut self, finder: CompetitorFinder, queries: QueryGenerator) -> Self {
        self.discovery = Some(Discovery { finder, queries });
        self
    }

    /// Harvest every entity (and, with discovery enabled, their competitors).
    ///
    /// # Arguments
    ///
    /// * `entities` - Registry companies, in output order
    /// * `run_date` - Stamped on the record set and used as the fallback record date
    ///
    /// # Returns
    ///
    /// The record set, with discovered competitors after the registry
    /// companies, and the run's outcome counters.
    #[instrument(level = "info", skip_all, fields(entities = entities.len(), workers = self.workers.len()))]
    pub async fn run(&self, entities: &[Entity], run_date: NaiveDate) -> (RecordSet, RunSummary) {
        let expanded = match (&self.discovery, self.workers.first()) {
            (Some(discovery), Some(worker)) => discovery.finder.with_competitors(worker, entities).await,
            _ => entities.to_vec(),
        };
        let entities = expanded.as_slice();

        let shared = Shared {
            frontier: Mutex::new(Frontier::new(self.settings.cap)),
            aggregator: Mutex::new(Aggregator::new(entities, self.settings.cap)),
            stats: RunStats::default(),
        };
        shared
            .stats
            .competitors
            .store(entities.iter().filter(|e| e.parent.is_some()).count(), Ordering::Relaxed);
        let n = self.workers.len().max(1);

        stream::iter(self.workers.iter().enumerate())
            .map(|(k, worker)| {
                let shared = &shared;
                async move {
                    let mine = entities.iter().skip(k).step_by(n);
                    for (i, entity) in mine.enumerate() {
                        if i > 0 {
                            self.settings.entity_pause.pause().await;
                        }
                        self.harvest_entity(worker, entity, shared).await;
                    }
                }
            })
            .buffer_unordered(n)
            .collect::<Vec<()>>()
            .await;

        let summary = shared.stats.summary();
        let aggregator = shared.aggregator.into_inner();
        debug!(
            urls_seen = shared.frontier.into_inner().seen_len(),
            records = aggregator.total_records(),
            "Harvest finished"
        );
        let set = aggregator.into_record_set("harvest", run_date);
        (set, summary)
    }

    #[instrument(level = "info", skip_all, fields(entity = %entity))]
    async fn harvest_entity(&self, worker: &Worker<S, T>, entity: &Entity, shared: &Shared) {
        let t0 = tokio::time::Instant::now();
        let queries = match (&entity.parent, &self.discovery) {
            (Some(_), Some(discovery)) => &discovery.queries,
            _ => &self.queries,
        };
        for (i, query) in queries.generate(entity).iter().enumerate() {
            if i > 0 {
                self.settings.query_pause.pause().await;
            }
            self.harvest_query(worker, query, shared).await;
        }
        info!(elapsed_ms = t0.elapsed().as_millis() as u64, "Entity done");
    }

    #[instrument(level = "info", skip_all, fields(field = %query.field))]
    async fn harvest_query(&self, worker: &Worker<S, T>, query: &Query, shared: &Shared) {
        shared
            .aggregator
            .lock()
            .await
            .open_field(&query.ticker, &query.field);
        bump(&shared.stats.queries);

        let links = worker.search.search(&query.text, self.settings.max_links).await;
        debug!(links = links.len(), provider = worker.search.name(), "Search returned");

        for url in links {
            if shared.aggregator.lock().await.is_full(&query.ticker, &query.field) {
                debug!("Field full; done with this query");
                break;
            }
            bump(&shared.stats.candidates);
            let candidate = CandidateLink::from_query(query, url);

            let admission = shared.frontier.lock().await.admit(&candidate);
            match admission {
                Admission::Admitted => {}
                Admission::Duplicate => {
                    debug!(url = %candidate.url, "Already seen; skipping");
                    bump(&shared.stats.duplicates);
                    continue;
                }
                Admission::CapReached => {
                    debug!(url = %candidate.url, "Fetch budget for field used up");
                    bump(&shared.stats.cap_rejections);
                    break;
                }
            }

            let result = worker.fetcher.fetch(&candidate.url).await;
            debug!(
                url = %candidate.url,
                elapsed_ms = result.elapsed.as_millis() as u64,
                attempts = result.attempts,
                "Fetch finished"
            );
            let (text, date) = match result.status {
                FetchStatus::Ok { ref text, date } => (text, date),
                ref other => {
                    let counter = match other {
                        FetchStatus::TimedOut => &shared.stats.timed_out,
                        FetchStatus::Blocked => &shared.stats.blocked,
                        FetchStatus::Empty => &shared.stats.empty,
                        _ => &shared.stats.errors,
                    };
                    bump(counter);
                    if let Some(e) = result.failure() {
                        warn!(url = %candidate.url, error = %e, "No text from source");
                    }
                    continue;
                }
            };
            bump(&shared.stats.fetched);

            let cleaned = self.cleaner.clean(text);
            match self.gate.accept(cleaned) {
                Ok(accepted) => {
                    debug!(url = %candidate.url, chars = accepted.as_str().chars().count(), "Accepted source text");
                    let record = HarvestedRecord::new(&candidate, date, accepted);
                    if shared.aggregator.lock().await.offer(record) {
                        bump(&shared.stats.records);
                    }
                }
                Err(e) => {
                    debug!(url = %candidate.url, error = %e, "Rejected by quality gate");
                    bump(&shared.stats.insufficient);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResearchSettings {
    /// Entities researched at once. Questions within an entity run in order.
    pub concurrency: usize,
    pub entity_pause: PauseRange,
}

/// Asks every question for every entity through one orchestrator.
pub struct ResearchPipeline<T> {
    orchestrator: Orchestrator<T>,
    questions: QueryGenerator,
    settings: ResearchSettings,
}

impl<T: AssistantTransport> ResearchPipeline<T> {
    pub fn new(orchestrator: Orchestrator<T>, questions: QueryGenerator, settings: ResearchSettings) -> Self {
        Self {
            orchestrator,
            questions,
            settings,
        }
    }

    #[instrument(level = "info", skip_all, fields(entities = entities.len()))]
    pub async fn run(&self, entities: &[Entity], run_date: NaiveDate) -> (RecordSet, RunSummary) {
        let aggregator = Mutex::new(Aggregator::new(entities, 1));
        let stats = RunStats::default();

        stream::iter(entities.iter())
            .map(|entity| {
                let (aggregator, stats) = (&aggregator, &stats);
                async move {
                    for query in self.questions.generate(entity) {
                        bump(&stats.queries);
                        let answer = self.orchestrator.ask(Some(&entity.ticker), &query.text).await;
                        match &answer {
                            RemoteAnswer::Answer(_) => bump(&stats.answers),
                            RemoteAnswer::TimedOut => {
                                let e = HarvestError::RemoteTimeout {
                                    secs: self.orchestrator.config().timeout.as_secs(),
                                };
                                warn!(ticker = %entity.ticker, field = %query.field, error = %e, "Question unanswered");
                                bump(&stats.sentinels);
                            }
                            other => {
                                warn!(ticker = %entity.ticker, field = %query.field, sentinel = %other, "Question unanswered");
                                bump(&stats.sentinels);
                            }
                        }
                        aggregator
                            .lock()
                            .await
                            .record_answer(&entity.ticker, &query.field, &answer);
                    }
                    info!(entity = %entity, "Entity researched");
                    self.settings.entity_pause.pause().await;
                }
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect::<Vec<()>>()
            .await;

        let set = aggregator.into_inner().into_record_set("research", run_date);
        (set, stats.summary())
    }
}
