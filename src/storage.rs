//! Durable, idempotent output of decoded documents.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::company::Company;
use crate::decoder::{DecodedDocument, Direction};

/// Period folder used when the generation timestamp cannot be read.
pub const UNKNOWN_PERIOD: &str = "unknown";

#[cfg(unix)]
const ARTIFACT_MODE: u32 = 0o644;

/// A document written to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Final location of the document.
    pub path: PathBuf,
    /// Access key the document is stored under.
    pub access_key: String,
    /// Folder the document was classified into.
    pub direction: Direction,
    /// Number of bytes written.
    pub bytes: usize,
}

/// Errors surfaced while storing a document.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The access key cannot be used as a file name.
    #[error("access key {0:?} is not usable as a file name")]
    InvalidAccessKey(String),
    /// Filesystem failure.
    #[error("failed to write {path:?}: {source}")]
    Io {
        /// Path being written.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

/// Destination for decoded documents.
pub trait ArtifactStore: Send + Sync {
    /// Persists `document` for `company`. Storing the same access key again overwrites
    /// the artifact with identical content.
    fn store(
        &self,
        company: &Company,
        document: &DecodedDocument,
        direction: Direction,
    ) -> Result<StoredArtifact, StorageError>;
}

/// Writes `{root}/{company}/{MMYYYY}/{direction}/{access_key}.xml`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location for a document, without touching the filesystem.
    pub fn path_for(
        &self,
        company: &Company,
        document: &DecodedDocument,
        direction: Direction,
    ) -> Result<PathBuf, StorageError> {
        let key = document.access_key.trim();
        if !is_valid_access_key(key) {
            return Err(StorageError::InvalidAccessKey(document.access_key.clone()));
        }
        Ok(self
            .root
            .join(company.folder_name())
            .join(period_bucket(&document.generated_at))
            .join(direction.as_str())
            .join(format!("{key}.xml")))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn store(
        &self,
        company: &Company,
        document: &DecodedDocument,
        direction: Direction,
    ) -> Result<StoredArtifact, StorageError> {
        let path = self.path_for(company, document, direction)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        let io_err = |source| StorageError::Io {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(&dir).map_err(io_err)?;
        let mut staged = NamedTempFile::new_in(&dir).map_err(io_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // tempfile stages at 0600; artifacts get the usual 0644.
            staged
                .as_file()
                .set_permissions(std::fs::Permissions::from_mode(ARTIFACT_MODE))
                .map_err(io_err)?;
        }
        staged.write_all(document.body.as_bytes()).map_err(io_err)?;
        staged.as_file().sync_all().map_err(io_err)?;
        staged.persist(&path).map_err(|err| io_err(err.error))?;

        Ok(StoredArtifact {
            path,
            access_key: document.access_key.trim().to_string(),
            direction,
            bytes: document.body.len(),
        })
    }
}

/// Maps a generation timestamp to its `MMYYYY` folder, or [`UNKNOWN_PERIOD`].
///
/// Accepts RFC 3339 timestamps, offset-less ISO timestamps with optional fractional
/// seconds, and anything whose first ten characters form a `YYYY-MM-DD` date.
pub fn period_bucket(timestamp: &str) -> String {
    let raw = timestamp.trim();
    let date = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.date_naive())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.date()))
        .ok()
        .or_else(|| {
            raw.get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        });

    match date {
        Some(date) => format!("{:02}{:04}", date.month(), date.year()),
        None => UNKNOWN_PERIOD.to_string(),
    }
}

fn is_valid_access_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && !key.chars().any(|c| matches!(c, '/' | '\\' | '\0'))
}
