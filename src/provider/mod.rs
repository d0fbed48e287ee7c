use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::ProviderMetadata;

pub mod archive;
pub mod gmail;
pub mod headers;

pub use archive::ArchiveProvider;
pub use gmail::{GmailProvider, StaticToken, TokenSource};

/// Upper bound the mail APIs accept for one listing page.
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider rejected credentials: {0}")]
    Auth(String),

    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("malformed provider data: {0}")]
    Malformed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("provider configuration: {0}")]
    Config(String),
}

impl ProviderError {
    /// Errors that make every further call pointless for this run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Config(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Transient(_) => "transient",
            Self::Malformed(_) => "malformed",
            Self::NotFound(_) => "not_found",
            Self::Config(_) => "config",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

/// Headers-only view of a message, enough to decide whether it is wanted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageMetadata {
    pub id: String,
    pub thread_id: Option<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub filename: String,
    pub mime_type: Option<String>,
    pub attachment_id: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub id: String,
    pub thread_id: Option<String>,
    pub headers: Vec<MessageHeader>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub attachment_refs: Vec<AttachmentRef>,
    pub metadata: ProviderMetadata,
    /// The provider payload as received, kept verbatim in the blob store.
    pub raw: serde_json::Value,
}

impl RawMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        headers::extract_header(&self.headers, name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub message_ids: Vec<String>,
    pub latest_cursor: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchHandle {
    pub mailbox: String,
    pub cursor: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub topic: Option<String>,
}

/// A mailbox the pipeline can search, read, and subscribe to.
#[async_trait]
pub trait MailProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Address of the mailbox this provider reads.
    fn mailbox(&self) -> &str;

    async fn search_page(
        &self,
        query: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<SearchPage, ProviderError>;

    async fn fetch_metadata(&self, id: &str) -> Result<MessageMetadata, ProviderError>;

    async fn fetch(&self, id: &str) -> Result<RawMessage, ProviderError>;

    async fn changes_since(&self, cursor: u64) -> Result<ChangeSet, ProviderError>;

    async fn watch(&self) -> Result<WatchHandle, ProviderError>;

    async fn stop(&self, handle: &WatchHandle) -> Result<(), ProviderError>;
}
