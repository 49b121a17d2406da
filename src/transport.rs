//! Per-company mutual-TLS sessions against the document registry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Identity, StatusCode};
use thiserror::Error;
use url::Url;

use crate::company::{Company, Nsu};
use crate::controls::SyncControls;
use crate::credentials::{CredentialError, CredentialStore, DirectoryCredentialStore};
use crate::protocol::FetchPage;

const USER_AGENT: &str = concat!("dfesync/", env!("CARGO_PKG_VERSION"));

/// Anything that can answer "documents after this cursor" for one company.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetches the page of documents newer than `cursor`.
    async fn fetch_page(&self, cursor: Nsu) -> Result<FetchPage, FetchError>;
}

/// Opens one isolated [`DocumentSource`] per company.
pub trait Connector: Send + Sync {
    /// Builds the session for `company`. Fails when its credential is unavailable.
    fn open(&self, company: &Company) -> Result<Box<dyn DocumentSource>, TransportError>;
}

/// Errors surfaced while opening a session. Fatal for the company only.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Credential lookup failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),
    /// The certificate could not be loaded as a TLS identity.
    #[error("invalid client certificate: {0}")]
    Identity(#[source] reqwest::Error),
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Errors surfaced by a single registry call.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or the body could not be read.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The registry rejected the client certificate.
    #[error("registry refused credentials ({0})")]
    Unauthorized(StatusCode),
    /// Any other non-success status.
    #[error("registry returned {0}")]
    Status(StatusCode),
    /// The body was not the expected JSON.
    #[error("unparseable response body: {0}")]
    Body(#[from] serde_json::Error),
}

impl FetchError {
    /// True when retrying in a later round cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// HTTP session bound to one company's client certificate.
pub struct RegistrySession {
    client: Client,
    base_url: String,
}

impl RegistrySession {
    /// Wraps an already configured client.
    pub fn new(client: Client, base_url: &Url) -> Self {
        Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
        }
    }

    /// URL queried for `cursor`.
    pub fn endpoint(&self, cursor: Nsu) -> String {
        format!("{}/contribuintes/DFe/{cursor}", self.base_url)
    }
}

#[async_trait]
impl DocumentSource for RegistrySession {
    async fn fetch_page(&self, cursor: Nsu) -> Result<FetchPage, FetchError> {
        let url = self.endpoint(cursor);
        tracing::debug!(%url, cursor, "querying registry");
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Unauthorized(status));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.bytes().await?;
        Ok(FetchPage::from_json(&body)?)
    }
}

/// Builds certificate-bound sessions from a credential store.
pub struct MtlsConnector {
    base_url: Url,
    timeout: Duration,
    credentials: Box<dyn CredentialStore>,
}

impl MtlsConnector {
    /// Connector using `{credential_dir}/{tax_id}.pfx` from `controls`.
    pub fn from_controls(controls: &SyncControls) -> Self {
        Self::new(
            controls.base_url().clone(),
            controls.request_timeout(),
            Box::new(DirectoryCredentialStore::new(controls.credential_dir())),
        )
    }

    /// Connector with an explicit credential store.
    pub fn new(base_url: Url, timeout: Duration, credentials: Box<dyn CredentialStore>) -> Self {
        Self {
            base_url,
            timeout,
            credentials,
        }
    }
}

impl Connector for MtlsConnector {
    fn open(&self, company: &Company) -> Result<Box<dyn DocumentSource>, TransportError> {
        let credential = self.credentials.resolve(&company.tax_id, &company.secret)?;
        let identity = Identity::from_pkcs12_der(&credential.pkcs12, &credential.passphrase)
            .map_err(TransportError::Identity)?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .identity(identity)
            .timeout(self.timeout)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Box::new(RegistrySession::new(client, &self.base_url)))
    }
}
