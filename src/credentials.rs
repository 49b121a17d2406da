//! Resolves a company's client certificate from its tax id.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::company::TaxId;

/// Certificate material plus passphrase for one company.
#[derive(Clone)]
pub struct Credential {
    /// DER-encoded PKCS#12 archive.
    pub pkcs12: Vec<u8>,
    /// Passphrase protecting the archive.
    pub passphrase: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("pkcs12_len", &self.pkcs12.len())
            .finish_non_exhaustive()
    }
}

/// Errors surfaced while resolving credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No certificate is registered for the tax id.
    #[error("certificate not found for {tax_id} (looked in {path:?})")]
    NotFound {
        /// Tax id that was looked up.
        tax_id: String,
        /// Location that was checked.
        path: PathBuf,
    },
    /// The certificate exists but could not be read.
    #[error("failed to read certificate {path:?}: {source}")]
    Io {
        /// Location that was read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

/// Source of per-company credentials.
pub trait CredentialStore: Send + Sync {
    /// Looks up the certificate for `tax_id` and pairs it with `secret`.
    fn resolve(&self, tax_id: &TaxId, secret: &str) -> Result<Credential, CredentialError>;
}

/// Reads `{dir}/{tax_id}.pfx`.
#[derive(Debug, Clone)]
pub struct DirectoryCredentialStore {
    dir: PathBuf,
}

impl DirectoryCredentialStore {
    /// Creates a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Certificate path for `tax_id`.
    pub fn path_for(&self, tax_id: &TaxId) -> PathBuf {
        self.dir.join(format!("{}.pfx", tax_id.as_str()))
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CredentialStore for DirectoryCredentialStore {
    fn resolve(&self, tax_id: &TaxId, secret: &str) -> Result<Credential, CredentialError> {
        let path = self.path_for(tax_id);
        if tax_id.is_empty() {
            return Err(CredentialError::NotFound {
                tax_id: String::new(),
                path,
            });
        }
        match std::fs::read(&path) {
            Ok(pkcs12) => Ok(Credential {
                pkcs12,
                passphrase: secret.to_string(),
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(CredentialError::NotFound {
                tax_id: tax_id.to_string(),
                path,
            }),
            Err(source) => Err(CredentialError::Io { path, source }),
        }
    }
}
