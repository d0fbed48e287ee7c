use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use tracing::debug;

use crate::blob::{raw_content_path, BlobError};
use crate::db::models::{IngestionStatus, Message, Project};
use crate::db::StoreError;
use crate::provider::headers::{normalize_address, parse_address_list, parse_date};
use crate::provider::{MessageMetadata, ProviderError, RawMessage};

use super::context::IngestContext;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("message {0} was stored concurrently")]
    Duplicate(String),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error("serialize raw content: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for PersistError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Duplicate(id) => Self::Duplicate(id),
            other => Self::Store(other),
        }
    }
}

/// Turns fetched content into a completed record for `project`.
pub fn build_message(raw: &RawMessage, project: &Project) -> Result<Message, ProviderError> {
    let sender = raw
        .header("From")
        .and_then(normalize_address)
        .ok_or_else(|| {
            ProviderError::Malformed(format!("message {} has no usable sender", raw.id))
        })?;

    let sent_at = match raw.header("Date") {
        Some(value) => Some(parse_date(value).ok_or_else(|| {
            ProviderError::Malformed(format!("message {} has unparseable date {value:?}", raw.id))
        })?),
        None => None,
    };

    Ok(Message {
        provider_message_id: raw.id.clone(),
        thread_id: raw.thread_id.clone(),
        project_id: project.project_id.clone(),
        user_id: project.user_id.clone(),
        sender,
        recipients: parse_address_list(raw.header("To")),
        cc_recipients: parse_address_list(raw.header("Cc")),
        sent_at,
        subject: raw.header("Subject").map(str::to_string),
        body_text: raw.body_text.clone(),
        raw_content_pointer: None,
        ingestion_status: IngestionStatus::Completed,
        analysis_status: None,
        assignment_status: None,
        relevance_score: None,
        retry_count: 0,
        error_details: None,
        provider_metadata: Some(raw.metadata.clone()),
        ingested_at: None,
    })
}

/// Placeholder row used when a full fetch fails, built from headers only.
pub fn stub_from_metadata(metadata: &MessageMetadata, project: &Project) -> Message {
    Message {
        provider_message_id: metadata.id.clone(),
        thread_id: metadata.thread_id.clone(),
        project_id: project.project_id.clone(),
        user_id: project.user_id.clone(),
        sender: metadata
            .from
            .as_deref()
            .and_then(normalize_address)
            .unwrap_or_default(),
        recipients: metadata.to.clone(),
        cc_recipients: metadata.cc.clone(),
        sent_at: metadata.sent_at,
        subject: metadata.subject.clone(),
        body_text: None,
        raw_content_pointer: None,
        ingestion_status: IngestionStatus::Pending,
        analysis_status: None,
        assignment_status: None,
        relevance_score: None,
        retry_count: 0,
        error_details: None,
        provider_metadata: None,
        ingested_at: None,
    }
}

/// Writes the raw payload, then the record. `pending` promotes an existing
/// retry row instead of inserting.
pub fn store_message(
    ctx: &IngestContext,
    raw: &RawMessage,
    mut message: Message,
    pending: bool,
) -> Result<Message, PersistError> {
    let path = raw_content_path(
        &message.project_id,
        message.sent_at.as_ref(),
        &message.provider_message_id,
    );
    let bytes = serde_json::to_vec_pretty(&raw.raw)?;
    let pointer = ctx.blobs.write_blob(&path, &bytes)?;
    debug!(id = %message.provider_message_id, pointer = %pointer, "raw content written");

    message.raw_content_pointer = Some(pointer.to_string());
    message.ingestion_status = IngestionStatus::Completed;
    message.ingested_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

    if pending {
        ctx.store.complete_pending(&message)?;
    } else {
        ctx.store.insert_message(&message)?;
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_message, stub_from_metadata};
    use crate::db::models::{IngestionStatus, Project, ProviderMetadata};
    use crate::provider::{MessageHeader, MessageMetadata, ProviderError, RawMessage};

    fn project() -> Project {
        Project {
            project_id: "kitchen".to_string(),
            name: "Kitchen".to_string(),
            user_id: "user-1".to_string(),
            mailbox: "owner@home.example".to_string(),
            keywords: vec![],
            created_at: None,
        }
    }

    fn raw(headers: &[(&str, &str)]) -> RawMessage {
        RawMessage {
            id: "m-1".to_string(),
            thread_id: Some("t-1".to_string()),
            headers: headers
                .iter()
                .map(|(name, value)| MessageHeader {
                    name: name.to_string(),
                    value: value.to_string(),
                })
                .collect(),
            body_text: Some("quote attached".to_string()),
            body_html: None,
            attachment_refs: vec![],
            metadata: ProviderMetadata::Archive {
                source_file: "m-1.json".to_string(),
                history_id: None,
                extra: Default::default(),
            },
            raw: json!({ "id": "m-1" }),
        }
    }

    #[test]
    fn built_message_carries_normalized_identities() {
        let message = build_message(
            &raw(&[
                ("From", "Sam <Sam@Build.example>"),
                ("To", "Owner <owner@home.example>"),
                ("Subject", "Kitchen Quote"),
                ("Date", "Mon, 02 Mar 2026 09:00:00 +0000"),
            ]),
            &project(),
        )
        .expect("build message");

        assert_eq!(message.sender, "sam@build.example");
        assert_eq!(message.recipients, vec!["owner@home.example"]);
        assert_eq!(message.project_id, "kitchen");
        assert_eq!(message.user_id, "user-1");
        assert_eq!(message.ingestion_status, IngestionStatus::Completed);
        assert!(message.sent_at.is_some());
    }

    #[test]
    fn missing_sender_or_bad_date_is_malformed() {
        assert!(matches!(
            build_message(&raw(&[("Subject", "x")]), &project()),
            Err(ProviderError::Malformed(_))
        ));
        assert!(matches!(
            build_message(
                &raw(&[("From", "sam@build.example"), ("Date", "last tuesday")]),
                &project()
            ),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn stub_is_pending_and_normalized() {
        let stub = stub_from_metadata(
            &MessageMetadata {
                id: "m-9".to_string(),
                from: Some("Sam <SAM@build.example>".to_string()),
                ..MessageMetadata::default()
            },
            &project(),
        );
        assert_eq!(stub.sender, "sam@build.example");
        assert_eq!(stub.ingestion_status, IngestionStatus::Pending);
        assert!(stub.raw_content_pointer.is_none());
    }
}
