//! # Company Harvest
//!
//! Collects evidence about a list of companies for downstream financial
//! analysis. Two run modes share one registry, configuration and output
//! layout:
//!
//! - **harvest**: renders a search query per (company, field), fetches the
//!   candidate pages, cleans and quality-gates their text, and keeps up to
//!   `cap` records per field. With `--competitors`, each company's
//!   competitors are discovered first and harvested as well.
//! - **research**: asks a hosted assistant one question per (company, field)
//!   and records the answer, or an `ERROR: ...` sentinel when it fails.
//!
//! ## Usage
//!
//! ```sh
//! company_harvest -r companies.csv -o ./output harvest --search library
//! company_harvest -r companies.csv -c harvest.yaml research
//! ```
//!
//! ## Architecture
//!
//! 1. **Startup**: parse CLI, load config and registry, check the output dir
//! 2. **Workers**: each gets its own search and page sessions; host pacing is shared
//! 3. **Pipeline**: entities are split across workers and processed concurrently
//! 4. **Output**: one dated JSON record set plus a run summary in the log

use chrono::{Datelike, Local};
use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod aggregate;
mod clean;
mod cli;
mod competitors;
mod config;
mod error;
mod fetch;
mod frontier;
mod models;
mod outputs;
mod pacing;
mod pipeline;
mod queries;
mod registry;
mod remote;
mod search;
mod utils;

use clean::{Cleaner, QualityGate};
use cli::{Cli, Command, HarvestArgs, ResearchArgs, SearchKind};
use competitors::CompetitorFinder;
use config::AppConfig;
use error::ConfigError;
use fetch::obstruction::build_handlers;
use fetch::{ContentFetcher, HttpTransport};
use models::{Entity, RecordSet};
use outputs::json;
use pacing::HostPacer;
use pipeline::{HarvestPipeline, ResearchPipeline, RunSummary, Worker};
use queries::QueryGenerator;
use registry::load_registry;
use remote::Orchestrator;
use remote::events::TracingObserver;
use remote::openai::OpenAiAssistants;
use search::{BrowserSearch, FilingsSearch, LibrarySearch, SearchBackend, SearchEngine};
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("company_harvest starting up");

    let args = Cli::parse();
    debug!(registry = %args.registry, config = ?args.config, output_dir = %args.output_dir, "Parsed CLI arguments");

    // Early check: fail before any network work if results can't be saved
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir,
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let config = match &args.config {
        Some(path) => AppConfig::load(path).await?,
        None => {
            info!("No config file given; using built-in defaults");
            AppConfig::default()
        }
    };
    let entities = load_registry(&args.registry).await?;
    let run_date = Local::now().date_naive();
    info!(%run_date, entities = entities.len(), "Run initialized");

    let (set, summary) = match &args.command {
        Command::Harvest(h) => harvest(h, &config, &entities, run_date).await?,
        Command::Research(r) => research(r, &config, &entities, run_date).await?,
    };

    summary.log(&set.kind);
    match json::write_record_set(&set, &args.output_dir).await {
        Ok(path) => info!(%path, records = summary.records, answers = summary.answers, "Results saved"),
        Err(e) => {
            error!(error = %e, "Failed to write results");
            return Err(e);
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

async fn harvest(
    args: &HarvestArgs,
    config: &AppConfig,
    entities: &[Entity],
    run_date: chrono::NaiveDate,
) -> Result<(RecordSet, RunSummary), Box<dyn Error>> {
    let queries = QueryGenerator::new(&config.queries, run_date.year())?;
    if args.competitors && args.search == SearchKind::Filings {
        return Err(ConfigError::Invalid {
            path: "--competitors".to_string(),
            reason: "competitor discovery needs a web search provider, not filings".to_string(),
        }
        .into());
    }
    let gate = QualityGate::new(config.min_content_chars(args.profile));
    info!(
        search = ?args.search,
        profile = ?args.profile,
        min_chars = gate.min_chars(),
        fields = queries.fields().count(),
        "Starting harvest"
    );

    // One pacer for every worker so per-host spacing holds run-wide
    let pacer = Arc::new(HostPacer::new(config.host_interval()));
    let mut workers = Vec::with_capacity(config.harvest.concurrency.max(1));
    for _ in 0..config.harvest.concurrency.max(1) {
        let transport = match args.search {
            SearchKind::Filings => HttpTransport::with_user_agent(sec_user_agent(args)?, config.page_load_timeout())?,
            _ => HttpTransport::new(config.page_load_timeout())?,
        };
        let handlers = build_handlers(
            &config.harvest.cookie_selectors,
            &config.harvest.consent_keywords,
            &config.harvest.popup_selectors,
        )?;
        workers.push(Worker {
            search: search_backend(args, config, &pacer)?,
            fetcher: ContentFetcher::new(transport, config.fetcher_config(), handlers, Arc::clone(&pacer), run_date),
        });
    }

    let mut pipeline = HarvestPipeline::new(
        workers,
        queries,
        Cleaner::new(&config.boilerplate)?,
        gate,
        config.harvest_settings(),
    );
    if args.competitors {
        let finder = CompetitorFinder::new(
            &config.competitors.discovery_query,
            run_date.year(),
            config.discovery_settings(),
        )?;
        let competitor_queries = QueryGenerator::new(&config.competitors.queries, run_date.year())?;
        info!(fields = competitor_queries.fields().count(), "Competitor discovery enabled");
        pipeline = pipeline.with_competitors(finder, competitor_queries);
    }
    Ok(pipeline.run(entities, run_date).await)
}

fn search_backend(
    args: &HarvestArgs,
    config: &AppConfig,
    pacer: &Arc<HostPacer>,
) -> Result<SearchBackend, Box<dyn Error>> {
    let backend = match args.search {
        SearchKind::Browser => {
            let engine = SearchEngine::by_name(&config.harvest.search_engine)
                .ok_or(ConfigError::Missing("harvest.search_engine"))?;
            SearchBackend::Browser(BrowserSearch::new(
                HttpTransport::new(config.page_load_timeout())?,
                engine,
                Arc::clone(pacer),
                config.page_load_timeout(),
                config.harvest.search_settle,
            ))
        }
        SearchKind::Library => {
            let key = args
                .google_api_key
                .clone()
                .ok_or(ConfigError::Missing("GOOGLE_API_KEY"))?;
            let cse = args
                .google_cse_id
                .clone()
                .ok_or(ConfigError::Missing("GOOGLE_CSE_ID"))?;
            SearchBackend::Library(LibrarySearch::new(key, cse, config.page_load_timeout())?)
        }
        SearchKind::Filings => SearchBackend::Filings(FilingsSearch::new(
            HttpTransport::with_user_agent(sec_user_agent(args)?, config.page_load_timeout())?,
            Arc::clone(pacer),
            config.page_load_timeout(),
        )),
    };
    Ok(backend)
}

fn sec_user_agent(args: &HarvestArgs) -> Result<&str, ConfigError> {
    args.sec_user_agent
        .as_deref()
        .filter(|ua| !ua.trim().is_empty())
        .ok_or(ConfigError::Missing("SEC_USER_AGENT"))
}

async fn research(
    args: &ResearchArgs,
    config: &AppConfig,
    entities: &[Entity],
    run_date: chrono::NaiveDate,
) -> Result<(RecordSet, RunSummary), Box<dyn Error>> {
    let api_key = args
        .openai_api_key
        .as_deref()
        .ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;
    let assistant_id = args.resolve_assistant_id().await?;
    let questions = QueryGenerator::new(&config.questions, run_date.year())?;
    info!(%assistant_id, questions = questions.fields().count(), "Starting research");

    let orchestrator_config = config.orchestrator_config();
    let transport = OpenAiAssistants::new(api_key, &assistant_id, orchestrator_config.request_timeout)?;
    let orchestrator = Orchestrator::new(transport, orchestrator_config).with_observer(Box::new(TracingObserver));

    let pipeline = ResearchPipeline::new(orchestrator, questions, config.research_settings());
    Ok(pipeline.run(entities, run_date).await)
}
