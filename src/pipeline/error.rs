use thiserror::Error;

use crate::db::StoreError;
use crate::provider::ProviderError;

/// Errors that end a whole job. Per-message problems are reported as
/// outcomes instead and never surface here.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("provider failure: {0}")]
    Provider(#[from] ProviderError),

    #[error("discovery failed: {0}")]
    Discovery(ProviderError),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("malformed notification: {0}")]
    MalformedNotification(String),

    #[error("no project is registered for mailbox {0}")]
    UnknownMailbox(String),

    #[error("unknown project {0}")]
    UnknownProject(String),
}
