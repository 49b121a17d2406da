//! Company roster: who to sync and where each company left off.
//!
//! Cursor writes are single keyed updates and never move a stored cursor backwards.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::company::{Company, Nsu, TaxId};

/// Errors surfaced by roster backends.
#[derive(Debug, Error)]
pub enum RosterError {
    /// SQLite failure.
    #[error("roster database error: {0}")]
    Sql(#[from] rusqlite::Error),
    /// No company is registered under the tax id.
    #[error("company {0} is not in the roster")]
    UnknownCompany(TaxId),
    /// The cursor does not fit the backend's integer type.
    #[error("cursor {0} is out of range")]
    CursorOutOfRange(Nsu),
    /// A company row cannot be used.
    #[error("invalid roster entry: {0}")]
    InvalidEntry(String),
    /// The roster lock was poisoned by a panicking writer.
    #[error("roster lock poisoned")]
    Poisoned,
}

/// Source of companies and sink for their advanced cursors.
pub trait Roster: Send + Sync {
    /// All companies, in roster order.
    fn companies(&self) -> Result<Vec<Company>, RosterError>;

    /// Records `cursor` for `tax_id`, keeping the larger of the stored and new values.
    fn upsert_cursor(&self, tax_id: &TaxId, cursor: Nsu) -> Result<(), RosterError>;

    /// Inserts or updates a company row keyed by tax id.
    fn upsert_company(&self, company: &Company) -> Result<(), RosterError>;
}

/// Roster stored in a SQLite database.
///
/// Cursors are stored as SQLite `INTEGER`, so values above `i64::MAX` are rejected
/// with [`RosterError::CursorOutOfRange`]. Such a rejection aborts the company after
/// the round's documents were stored; the next run re-fetches them idempotently.
pub struct SqliteRoster {
    conn: Mutex<Connection>,
}

impl SqliteRoster {
    /// Opens (and creates if needed) the roster at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RosterError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens a private in-memory roster.
    pub fn open_in_memory() -> Result<Self, RosterError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, RosterError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS companies (
                 tax_id TEXT PRIMARY KEY,
                 name   TEXT NOT NULL,
                 secret TEXT NOT NULL,
                 cursor INTEGER NOT NULL DEFAULT 0 CHECK (cursor >= 0)
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Stored cursor for `tax_id`, if the company exists.
    pub fn cursor_of(&self, tax_id: &TaxId) -> Result<Option<Nsu>, RosterError> {
        let conn = self.conn.lock().map_err(|_| RosterError::Poisoned)?;
        let cursor: Option<i64> = conn
            .query_row(
                "SELECT cursor FROM companies WHERE tax_id = ?1",
                params![tax_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor.map(|value| u64::try_from(value).unwrap_or(0)))
    }
}

fn to_sql_cursor(cursor: Nsu) -> Result<i64, RosterError> {
    i64::try_from(cursor).map_err(|_| RosterError::CursorOutOfRange(cursor))
}

impl Roster for SqliteRoster {
    fn companies(&self) -> Result<Vec<Company>, RosterError> {
        let conn = self.conn.lock().map_err(|_| RosterError::Poisoned)?;
        let mut stmt =
            conn.prepare("SELECT name, tax_id, secret, cursor FROM companies ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            let cursor: Option<i64> = row.get(3)?;
            Ok(Company::new(
                row.get::<_, String>(0)?,
                &row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                cursor.and_then(|value| u64::try_from(value).ok()).unwrap_or(0),
            ))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn upsert_cursor(&self, tax_id: &TaxId, cursor: Nsu) -> Result<(), RosterError> {
        let value = to_sql_cursor(cursor)?;
        let conn = self.conn.lock().map_err(|_| RosterError::Poisoned)?;
        let updated = conn.execute(
            "UPDATE companies SET cursor = MAX(cursor, ?2) WHERE tax_id = ?1",
            params![tax_id.as_str(), value],
        )?;
        if updated == 0 {
            return Err(RosterError::UnknownCompany(tax_id.clone()));
        }
        Ok(())
    }

    fn upsert_company(&self, company: &Company) -> Result<(), RosterError> {
        if company.tax_id.is_empty() {
            return Err(RosterError::InvalidEntry(format!(
                "company {:?} has no tax id digits",
                company.name
            )));
        }
        let value = to_sql_cursor(company.cursor)?;
        let conn = self.conn.lock().map_err(|_| RosterError::Poisoned)?;
        conn.execute(
            "INSERT INTO companies (tax_id, name, secret, cursor) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tax_id) DO UPDATE SET
                 name = excluded.name,
                 secret = excluded.secret,
                 cursor = MAX(cursor, excluded.cursor)",
            params![company.tax_id.as_str(), company.name, company.secret, value],
        )?;
        Ok(())
    }
}

/// In-process roster, handy for embedding and tests.
#[derive(Default)]
pub struct MemoryRoster {
    companies: Mutex<Vec<Company>>,
    cursor_writes: Mutex<Vec<(TaxId, Nsu)>>,
}

impl MemoryRoster {
    /// Builds a roster holding `companies`.
    pub fn new(companies: Vec<Company>) -> Self {
        Self {
            companies: Mutex::new(companies),
            cursor_writes: Mutex::new(Vec::new()),
        }
    }

    /// Stored cursor for `tax_id`.
    pub fn cursor_of(&self, tax_id: &TaxId) -> Option<Nsu> {
        self.companies
            .lock()
            .ok()?
            .iter()
            .find(|company| &company.tax_id == tax_id)
            .map(|company| company.cursor)
    }

    /// Every cursor write received, in order.
    pub fn cursor_writes(&self) -> Vec<(TaxId, Nsu)> {
        self.cursor_writes
            .lock()
            .map(|writes| writes.clone())
            .unwrap_or_default()
    }
}

impl Roster for MemoryRoster {
    fn companies(&self) -> Result<Vec<Company>, RosterError> {
        Ok(self.companies.lock().map_err(|_| RosterError::Poisoned)?.clone())
    }

    fn upsert_cursor(&self, tax_id: &TaxId, cursor: Nsu) -> Result<(), RosterError> {
        let mut companies = self.companies.lock().map_err(|_| RosterError::Poisoned)?;
        let company = companies
            .iter_mut()
            .find(|company| &company.tax_id == tax_id)
            .ok_or_else(|| RosterError::UnknownCompany(tax_id.clone()))?;
        company.cursor = company.cursor.max(cursor);
        self.cursor_writes
            .lock()
            .map_err(|_| RosterError::Poisoned)?
            .push((tax_id.clone(), cursor));
        Ok(())
    }

    fn upsert_company(&self, company: &Company) -> Result<(), RosterError> {
        let mut companies = self.companies.lock().map_err(|_| RosterError::Poisoned)?;
        match companies.iter_mut().find(|existing| existing.tax_id == company.tax_id) {
            Some(existing) => {
                let cursor = existing.cursor.max(company.cursor);
                *existing = company.clone();
                existing.cursor = cursor;
            }
            None => companies.push(company.clone()),
        }
        Ok(())
    }
}
