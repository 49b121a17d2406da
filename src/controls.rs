//! Sync pacing and location controls shared by the scheduler and the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use url::Url;

use crate::observability::LogFormat;

/// Default registry endpoint (national NFS-e data environment).
pub const DEFAULT_BASE_URL: &str = "https://adn.nfse.gov.br";

/// Tunable knobs that bound a sync run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncControls {
    base_url: Url,
    output_root: PathBuf,
    credential_dir: PathBuf,
    max_rounds: usize,
    round_delay: Duration,
    request_timeout: Duration,
    max_pages_per_round: usize,
}

impl SyncControls {
    /// Constructs a new set of sync controls.
    pub fn new(
        base_url: Url,
        output_root: PathBuf,
        credential_dir: PathBuf,
        max_rounds: usize,
        round_delay: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            base_url,
            output_root,
            credential_dir,
            max_rounds: max_rounds.max(1),
            round_delay,
            request_timeout: request_timeout.max(Duration::from_secs(1)),
            max_pages_per_round: DEFAULT_MAX_PAGES_PER_ROUND,
        }
    }

    /// Overrides the per-round page ceiling.
    pub fn with_max_pages_per_round(mut self, pages: usize) -> Self {
        self.max_pages_per_round = pages.max(1);
        self
    }

    /// Overrides the delay between rounds of the same company.
    pub fn with_round_delay(mut self, delay: Duration) -> Self {
        self.round_delay = delay;
        self
    }

    /// Registry base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Root directory for stored documents.
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Directory holding `{tax_id}.pfx` certificates.
    pub fn credential_dir(&self) -> &Path {
        &self.credential_dir
    }

    /// Upper bound on rounds per company per run.
    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Pause between two rounds of the same company.
    pub fn round_delay(&self) -> Duration {
        self.round_delay
    }

    /// Timeout applied to every registry call.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Safety ceiling on page fetches inside one round.
    pub fn max_pages_per_round(&self) -> usize {
        self.max_pages_per_round
    }
}

const DEFAULT_MAX_PAGES_PER_ROUND: usize = 10_000;

/// Command-line interface for the `dfesync` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "dfesync", about = "Incremental NFS-e document synchronizer")]
pub struct Cli {
    /// SQLite roster holding companies and their cursors
    #[arg(long, global = true, env = "DFESYNC_ROSTER", default_value = "roster.sqlite3")]
    pub roster: PathBuf,

    /// Log output format
    #[arg(long, global = true, env = "DFESYNC_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    /// Operation to perform
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level operations.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Pull new documents for every roster company
    Sync(SyncArgs),
    /// Inspect or edit the roster
    #[command(subcommand)]
    Roster(RosterCommand),
}

/// Roster maintenance operations.
#[derive(Subcommand, Debug, Clone)]
pub enum RosterCommand {
    /// Insert or update a company
    Upsert {
        /// Display name
        #[arg(long)]
        name: String,
        /// CNPJ or CPF, punctuation allowed
        #[arg(long)]
        tax_id: String,
        /// Certificate passphrase
        #[arg(long, env = "DFESYNC_CERT_SECRET", hide_env_values = true)]
        secret: String,
        /// Starting cursor
        #[arg(long, default_value_t = 0)]
        cursor: u64,
    },
    /// Print companies and cursors
    List,
}

/// Arguments of the `sync` command.
#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Registry base URL
    #[arg(long, env = "DFESYNC_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Root directory for stored documents
    #[arg(long, env = "DFESYNC_OUTPUT_ROOT", default_value = "notasfiscais")]
    pub output_root: PathBuf,

    /// Directory containing `{tax_id}.pfx` certificates
    #[arg(long, env = "DFESYNC_CREDENTIAL_DIR", default_value = "certificados")]
    pub credential_dir: PathBuf,

    /// Maximum rounds per company
    #[arg(long, env = "DFESYNC_MAX_ROUNDS", default_value_t = 100)]
    pub max_rounds: usize,

    /// Seconds to wait between rounds of the same company
    #[arg(long, env = "DFESYNC_ROUND_DELAY_SECS", default_value_t = 5)]
    pub round_delay_secs: u64,

    /// Per-call timeout in seconds
    #[arg(long, env = "DFESYNC_TIMEOUT_SECS", default_value_t = 60)]
    pub timeout_secs: u64,

    /// Page fetch ceiling inside one round
    #[arg(long, env = "DFESYNC_MAX_PAGES", default_value_t = DEFAULT_MAX_PAGES_PER_ROUND)]
    pub max_pages_per_round: usize,

    /// Only sync the company with this tax id
    #[arg(long)]
    pub company: Option<String>,
}

impl SyncArgs {
    /// Converts the parsed arguments into `SyncControls`.
    pub fn build_controls(&self) -> Result<SyncControls, url::ParseError> {
        let base_url = Url::parse(self.base_url.trim_end_matches('/'))?;
        Ok(SyncControls::new(
            base_url,
            self.output_root.clone(),
            self.credential_dir.clone(),
            self.max_rounds,
            Duration::from_secs(self.round_delay_secs),
            Duration::from_secs(self.timeout_secs),
        )
        .with_max_pages_per_round(self.max_pages_per_round))
    }
}

/// CLI spelling of [`LogFormat`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable output.
    Pretty,
    /// One JSON object per event.
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}
