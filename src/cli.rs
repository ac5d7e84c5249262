//! Command-line interface.
//!
//! Shared options come before the subcommand; secrets can also be supplied
//! through environment variables.

use crate::config::Profile;
use crate::error::ConfigError;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::fs;
use tracing::debug;

/// Harvest company evidence from the web, SEC filings or a research assistant.
///
/// # Examples
///
/// ```sh
/// # Search-engine harvest with the default templates
/// company_harvest -r companies.csv -o ./output harvest
///
/// # Harvest competitors found on each company's competitor pages as well
/// company_harvest harvest --competitors --profile analysis
///
/// # 10-K filing harvest with the stricter quality threshold
/// SEC_USER_AGENT="Acme Research ir@acme.com" \
///   company_harvest harvest --search filings --profile analysis
///
/// # Market-research questions through the hosted assistant
/// OPENAI_API_KEY=... company_harvest -c harvest.yaml research
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Registry file of "Name (TICKER)" entries
    #[arg(short, long, default_value = "companies.csv")]
    pub registry: String,

    /// Optional path to a YAML config file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Directory the dated JSON output is written under
    #[arg(short, long, default_value = "./output")]
    pub output_dir: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search, fetch and quality-gate text for every query template
    Harvest(HarvestArgs),
    /// Ask the hosted assistant every question template
    Research(ResearchArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchKind {
    /// Render the search engine's results page
    Browser,
    /// Google Custom Search JSON API
    Library,
    /// SEC EDGAR 10-K filing indexes
    Filings,
}

#[derive(Args, Debug)]
pub struct HarvestArgs {
    /// Quality threshold profile
    #[arg(long, value_enum, default_value_t = Profile::General)]
    pub profile: Profile,

    /// Where candidate URLs come from
    #[arg(long, value_enum, default_value_t = SearchKind::Browser)]
    pub search: SearchKind,

    /// Google API key for `--search library`
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,

    /// Custom search engine id for `--search library`
    #[arg(long, env = "GOOGLE_CSE_ID")]
    pub google_cse_id: Option<String>,

    /// Contact user agent required by SEC EDGAR for `--search filings`
    #[arg(long, env = "SEC_USER_AGENT")]
    pub sec_user_agent: Option<String>,

    /// Also discover each company's competitors and harvest them
    #[arg(long)]
    pub competitors: bool,
}

#[derive(Args, Debug)]
pub struct ResearchArgs {
    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Assistant to run the questions against
    #[arg(long, env = "ASSISTANT_ID")]
    pub assistant_id: Option<String>,

    /// File holding the assistant id, used when none is given directly
    #[arg(long, default_value = "assistant_id.txt")]
    pub assistant_id_file: String,
}

impl ResearchArgs {
    /// The assistant id from the flag/env, else from the id file.
    pub async fn resolve_assistant_id(&self) -> Result<String, ConfigError> {
        if let Some(id) = self.assistant_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            return Ok(id.to_string());
        }
        match fs::read_to_string(&self.assistant_id_file).await {
            Ok(raw) if !raw.trim().is_empty() => {
                debug!(path = %self.assistant_id_file, "Read assistant id from file");
                Ok(raw.trim().to_string())
            }
            _ => Err(ConfigError::Missing("ASSISTANT_ID")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "company_harvest",
            "--registry",
            "./companies.csv",
            "--output-dir",
            "./out",
            "harvest",
            "--search",
            "filings",
            "--profile",
            "analysis",
            "--competitors",
        ]);

        assert_eq!(cli.registry, "./companies.csv");
        assert_eq!(cli.output_dir, "./out");
        match cli.command {
            Command::Harvest(h) => {
                assert_eq!(h.search, SearchKind::Filings);
                assert_eq!(h.profile, Profile::Analysis);
                assert!(h.competitors);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_short_flags_and_defaults() {
        let cli = Cli::parse_from(["company_harvest", "-r", "/tmp/c.csv", "-c", "/tmp/h.yaml", "harvest"]);

        assert_eq!(cli.registry, "/tmp/c.csv");
        assert_eq!(cli.config.as_deref(), Some("/tmp/h.yaml"));
        assert_eq!(cli.output_dir, "./output");
        match cli.command {
            Command::Harvest(h) => {
                assert_eq!(h.search, SearchKind::Browser);
                assert_eq!(h.profile, Profile::General);
                assert!(!h.competitors);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["company_harvest"]).is_err());
    }

    #[tokio::test]
    async fn test_assistant_id_flag_wins_over_file() {
        let args = ResearchArgs {
            openai_api_key: None,
            assistant_id: Some(" asst_flag ".into()),
            assistant_id_file: "/definitely/not/here.txt".into(),
        };
        assert_eq!(args.resolve_assistant_id().await.unwrap(), "asst_flag");
    }

    #[tokio::test]
    async fn test_assistant_id_from_file() {
        let path = std::env::temp_dir().join(format!("assistant-id-{}.txt", std::process::id()));
        std::fs::write(&path, "asst_file\n").unwrap();
        let args = ResearchArgs {
            openai_api_key: None,
            assistant_id: None,
            assistant_id_file: path.to_string_lossy().to_string(),
        };
        assert_eq!(args.resolve_assistant_id().await.unwrap(), "asst_file");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_missing_assistant_id() {
        let args = ResearchArgs {
            openai_api_key: None,
            assistant_id: None,
            assistant_id_file: "/definitely/not/here.txt".into(),
        };
        assert!(matches!(
            args.resolve_assistant_id().await,
            Err(ConfigError::Missing("ASSISTANT_ID"))
        ));
    }
}
