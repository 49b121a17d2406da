//! Multi-round scheduler and the roster driver.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::runtime::Builder;
use tokio::time::sleep;
use tracing::Instrument;

use crate::company::{Company, Nsu, TaxId};
use crate::controls::SyncControls;
use crate::fetch::{fetch_round, RoundOutcome};
use crate::observability::company_span;
use crate::roster::{Roster, RosterError};
use crate::storage::{ArtifactStore, FsArtifactStore};
use crate::transport::{Connector, FetchError, MtlsConnector, TransportError};

type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that abort one company's processing. Sibling companies are unaffected.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No session could be opened.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The registry refused the company's credentials.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The advanced cursor could not be recorded.
    #[error(transparent)]
    Roster(#[from] RosterError),
}

/// What happened to one company during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyReport {
    /// Company display name.
    pub name: String,
    /// Company tax id.
    pub tax_id: TaxId,
    /// Cursor read from the roster.
    pub initial_cursor: Nsu,
    /// Cursor after the last round.
    pub final_cursor: Nsu,
    /// Per-round outcomes, in order.
    pub rounds: Vec<RoundOutcome>,
}

impl CompanyReport {
    fn new(company: &Company) -> Self {
        Self {
            name: company.name.clone(),
            tax_id: company.tax_id.clone(),
            initial_cursor: company.cursor,
            final_cursor: company.cursor,
            rounds: Vec::new(),
        }
    }

    /// Documents stored across all rounds.
    pub fn stored(&self) -> usize {
        self.rounds.iter().map(|round| round.stored).sum()
    }

    /// Documents skipped across all rounds.
    pub fn skipped(&self) -> usize {
        self.rounds.iter().map(|round| round.skipped).sum()
    }
}

/// A company whose processing was aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyFailure {
    /// Company display name.
    pub name: String,
    /// Company tax id.
    pub tax_id: TaxId,
    /// Rendered error.
    pub error: String,
}

/// Outcome of a whole roster run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Companies processed to completion.
    pub completed: Vec<CompanyReport>,
    /// Companies aborted by a fatal error.
    pub failed: Vec<CompanyFailure>,
}

impl RunSummary {
    /// Prints a per-company table followed by totals.
    pub fn report(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f32();
        println!("--- sync summary ({secs:.2}s) ---");
        for company in &self.completed {
            println!(
                "{} [{}]: cursor {} -> {}, rounds {}, stored {}, skipped {}",
                company.name,
                company.tax_id,
                company.initial_cursor,
                company.final_cursor,
                company.rounds.len(),
                company.stored(),
                company.skipped()
            );
        }
        for failure in &self.failed {
            println!("{} [{}]: FAILED: {}", failure.name, failure.tax_id, failure.error);
        }
        println!(
            "companies: {} ok, {} failed; documents stored: {}, skipped: {}",
            self.completed.len(),
            self.failed.len(),
            self.completed.iter().map(CompanyReport::stored).sum::<usize>(),
            self.completed.iter().map(CompanyReport::skipped).sum::<usize>()
        );
    }
}

/// Syncs one company over up to `controls.max_rounds()` rounds.
///
/// A round that leaves the cursor where it started ends the company for this run.
/// Every advancing round persists its cursor before the inter-round delay, so an
/// interrupted run resumes from the last completed round.
pub async fn sync_company(
    controls: &SyncControls,
    connector: &dyn Connector,
    store: &dyn ArtifactStore,
    roster: &dyn Roster,
    company: &Company,
) -> Result<CompanyReport, SyncError> {
    let session = connector.open(company)?;
    let mut report = CompanyReport::new(company);
    let mut cursor = company.cursor;
    let max_rounds = controls.max_rounds();

    for round in 1..=max_rounds {
        tracing::info!(round, cursor, "starting round");
        let outcome = fetch_round(
            session.as_ref(),
            store,
            company,
            cursor,
            controls.max_pages_per_round(),
        )
        .await?;
        let next = outcome.end_cursor;
        let advanced = outcome.advanced();
        tracing::info!(
            round,
            from = cursor,
            to = next,
            pages = outcome.pages,
            stored = outcome.stored,
            skipped = outcome.skipped,
            stop = %outcome.stop,
            "round finished"
        );
        report.rounds.push(outcome);

        if !advanced {
            tracing::info!(cursor, "cursor did not advance; company is up to date");
            break;
        }

        roster.upsert_cursor(&company.tax_id, next)?;
        cursor = next;
        report.final_cursor = cursor;

        if round < max_rounds && !controls.round_delay().is_zero() {
            sleep(controls.round_delay()).await;
        }
    }

    Ok(report)
}

/// Syncs every roster company in order, isolating failures per company.
///
/// `only` restricts the run to one tax id. Failing to read the roster is the only
/// error that aborts the run.
pub async fn sync_roster(
    controls: &SyncControls,
    connector: &dyn Connector,
    store: &dyn ArtifactStore,
    roster: &dyn Roster,
    only: Option<&TaxId>,
) -> Result<RunSummary, RosterError> {
    let companies = roster.companies()?;
    let mut summary = RunSummary::default();

    for company in companies
        .iter()
        .filter(|company| only.map_or(true, |tax_id| &company.tax_id == tax_id))
    {
        let span = company_span(company);
        let result = sync_company(controls, connector, store, roster, company)
            .instrument(span.clone())
            .await;
        match result {
            Ok(report) => summary.completed.push(report),
            Err(err) => {
                span.in_scope(|| tracing::error!(error = %err, "company sync aborted"));
                summary.failed.push(CompanyFailure {
                    name: company.name.clone(),
                    tax_id: company.tax_id.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    Ok(summary)
}

/// Runs a full sync on a current-thread runtime using certificate sessions and
/// filesystem storage.
pub fn run(
    controls: &SyncControls,
    roster: &dyn Roster,
    only: Option<&TaxId>,
) -> Result<RunSummary, DynError> {
    let rt = Builder::new_current_thread().enable_all().build()?;
    let connector = MtlsConnector::from_controls(controls);
    let store = FsArtifactStore::new(controls.output_root());
    let start = Instant::now();

    let summary = rt.block_on(sync_roster(controls, &connector, &store, roster, only))?;
    summary.report(start.elapsed());
    Ok(summary)
}
