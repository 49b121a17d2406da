#![warn(missing_docs)]
//! Core library entry points for the dfesync document synchronizer.

pub mod company;
pub mod controls;
pub mod credentials;
pub mod decoder;
pub mod fetch;
pub mod observability;
pub mod protocol;
pub mod roster;
pub mod runtime;
pub mod storage;
pub mod transport;

pub use company::{sanitize_folder_name, Company, Nsu, TaxId};
pub use controls::{Cli, SyncControls};
pub use credentials::{Credential, CredentialError, CredentialStore, DirectoryCredentialStore};
pub use decoder::{classify, decode, decode_document, DecodeError, DecodedDocument, Direction};
pub use fetch::{fetch_round, RoundOutcome, StopReason};
pub use protocol::{DocumentRecord, FetchPage, STATUS_DOCUMENTS_FOUND, STATUS_NO_DOCUMENTS};
pub use roster::{MemoryRoster, Roster, RosterError, SqliteRoster};
pub use runtime::{run as run_sync, sync_company, sync_roster, CompanyReport, RunSummary, SyncError};
pub use storage::{period_bucket, ArtifactStore, FsArtifactStore, StorageError, StoredArtifact};
pub use transport::{Connector, DocumentSource, FetchError, MtlsConnector, RegistrySession, TransportError};
