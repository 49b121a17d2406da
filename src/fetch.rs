//! Cursor-paginated fetch loop: one round of a company's sync.
//!
//! The loop moves through `Querying(cursor) -> Draining(page) -> Querying(max nsu)`
//! until the registry reports no documents, a page fails to move the cursor forward,
//! or the call itself fails. The returned cursor never falls below the input cursor.

use std::fmt;

use crate::company::{Company, Nsu};
use crate::decoder::{classify, decode_document};
use crate::protocol::{DocumentRecord, FetchPage};
use crate::storage::ArtifactStore;
use crate::transport::{DocumentSource, FetchError};

/// Why a round ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The registry reported no (more) documents.
    Drained,
    /// A page did not carry any sequence above the cursor it was fetched with.
    NoProgress,
    /// The call failed or returned an unusable body; retried in a later round.
    Transport(String),
    /// The per-round page ceiling was reached.
    PageLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drained => f.write_str("drained"),
            Self::NoProgress => f.write_str("no progress"),
            Self::Transport(message) => write!(f, "transport: {message}"),
            Self::PageLimit => f.write_str("page limit"),
        }
    }
}

/// Result of one pass of the fetch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    /// Cursor the round started from.
    pub start_cursor: Nsu,
    /// Highest sequence observed, at least `start_cursor`.
    pub end_cursor: Nsu,
    /// Pages fetched, including the terminating one.
    pub pages: usize,
    /// Documents written to storage.
    pub stored: usize,
    /// Documents that failed to decode or store.
    pub skipped: usize,
    /// Terminal condition.
    pub stop: StopReason,
}

impl RoundOutcome {
    fn new(start_cursor: Nsu) -> Self {
        Self {
            start_cursor,
            end_cursor: start_cursor,
            pages: 0,
            stored: 0,
            skipped: 0,
            stop: StopReason::Drained,
        }
    }

    /// True when the round moved the cursor.
    pub fn advanced(&self) -> bool {
        self.end_cursor > self.start_cursor
    }
}

enum State {
    Querying(Nsu),
    Draining { page: FetchPage, cursor: Nsu },
    Done(StopReason),
}

/// Runs the fetch loop for `company` starting at `cursor`.
///
/// Transport and body errors end the round early with the cursor reached so far.
/// Only errors that cannot be fixed by retrying (see [`FetchError::is_fatal`]) are
/// returned.
pub async fn fetch_round(
    source: &dyn DocumentSource,
    store: &dyn ArtifactStore,
    company: &Company,
    cursor: Nsu,
    max_pages: usize,
) -> Result<RoundOutcome, FetchError> {
    let mut outcome = RoundOutcome::new(cursor);
    let mut state = State::Querying(cursor);

    loop {
        state = match state {
            State::Querying(_) if outcome.pages >= max_pages.max(1) => {
                State::Done(StopReason::PageLimit)
            }
            State::Querying(cursor) => {
                outcome.pages += 1;
                match source.fetch_page(cursor).await {
                    Ok(page) => State::Draining { page, cursor },
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        tracing::warn!(cursor, error = %err, "registry call failed; ending round");
                        State::Done(StopReason::Transport(err.to_string()))
                    }
                }
            }
            State::Draining { page, cursor } => {
                if !page.is_productive() {
                    tracing::info!(cursor, status = %page.status, "no documents located");
                    State::Done(StopReason::Drained)
                } else {
                    tracing::info!(cursor, count = page.documents.len(), "documents located");
                    if let Some(page_max) = page.max_nsu() {
                        outcome.end_cursor = outcome.end_cursor.max(page_max);
                    }
                    for record in &page.documents {
                        if persist_record(store, company, record) {
                            outcome.stored += 1;
                        } else {
                            outcome.skipped += 1;
                        }
                    }
                    if outcome.end_cursor > cursor {
                        State::Querying(outcome.end_cursor)
                    } else {
                        tracing::info!(cursor, "page did not advance the cursor");
                        State::Done(StopReason::NoProgress)
                    }
                }
            }
            State::Done(stop) => {
                outcome.stop = stop;
                return Ok(outcome);
            }
        };
    }
}

fn persist_record(store: &dyn ArtifactStore, company: &Company, record: &DocumentRecord) -> bool {
    let document = match decode_document(record) {
        Ok(document) => document,
        Err(err) => {
            tracing::warn!(
                nsu = record.nsu,
                access_key = %record.access_key,
                error = %err,
                "skipping undecodable document"
            );
            return false;
        }
    };

    let direction = classify(&document, &company.tax_id);
    match store.store(company, &document, direction) {
        Ok(artifact) => {
            tracing::debug!(
                nsu = record.nsu,
                kind = %record.kind,
                direction = %direction,
                path = %artifact.path.display(),
                "stored document"
            );
            true
        }
        Err(err) => {
            tracing::warn!(
                nsu = record.nsu,
                access_key = %record.access_key,
                error = %err,
                "failed to store document"
            );
            false
        }
    }
}
