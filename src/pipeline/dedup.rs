use serde::Serialize;

use crate::db::models::{IngestionStatus, Message};
use crate::db::{Database, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DedupDecision {
    New,
    /// A pending row exists; `attempt` is the number of this try.
    Retry { attempt: u32 },
    AlreadyIngested,
    Exhausted { retry_count: u32 },
}

impl DedupDecision {
    pub fn should_ingest(&self) -> bool {
        matches!(self, Self::New | Self::Retry { .. })
    }
}

pub fn decide(existing: Option<&Message>, max_retries: u32) -> DedupDecision {
    let Some(message) = existing else {
        return DedupDecision::New;
    };

    match message.ingestion_status {
        IngestionStatus::Completed => DedupDecision::AlreadyIngested,
        IngestionStatus::Pending if message.retry_count < max_retries => DedupDecision::Retry {
            attempt: message.retry_count + 1,
        },
        IngestionStatus::Pending | IngestionStatus::Failed => DedupDecision::Exhausted {
            retry_count: message.retry_count,
        },
    }
}

pub fn check(
    store: &Database,
    provider_message_id: &str,
    max_retries: u32,
) -> Result<DedupDecision, StoreError> {
    let existing = store.get_message(provider_message_id)?;
    Ok(decide(existing.as_ref(), max_retries))
}

#[cfg(test)]
mod tests {
    use super::{decide, DedupDecision};
    use crate::db::models::{IngestionStatus, Message};

    fn row(status: IngestionStatus, retry_count: u32) -> Message {
        Message {
            provider_message_id: "m-1".to_string(),
            thread_id: None,
            project_id: "p".to_string(),
            user_id: "u".to_string(),
            sender: "sam@build.example".to_string(),
            recipients: vec![],
            cc_recipients: vec![],
            sent_at: None,
            subject: None,
            body_text: None,
            raw_content_pointer: None,
            ingestion_status: status,
            analysis_status: None,
            assignment_status: None,
            relevance_score: None,
            retry_count,
            error_details: None,
            provider_metadata: None,
            ingested_at: None,
        }
    }

    #[test]
    fn decisions_follow_stored_status() {
        assert_eq!(decide(None, 3), DedupDecision::New);
        assert_eq!(
            decide(Some(&row(IngestionStatus::Completed, 0)), 3),
            DedupDecision::AlreadyIngested
        );
        assert_eq!(
            decide(Some(&row(IngestionStatus::Pending, 1)), 3),
            DedupDecision::Retry { attempt: 2 }
        );
        assert_eq!(
            decide(Some(&row(IngestionStatus::Pending, 3)), 3),
            DedupDecision::Exhausted { retry_count: 3 }
        );
        assert_eq!(
            decide(Some(&row(IngestionStatus::Failed, 1)), 3),
            DedupDecision::Exhausted { retry_count: 1 }
        );
        assert!(!DedupDecision::AlreadyIngested.should_ingest());
    }
}
