use serde::Serialize;
use tracing::{debug, warn};

use crate::db::models::{ErrorDetails, IngestionStatus, Message};
use crate::provider::headers::normalize_address;
use crate::provider::{MessageMetadata, ProviderError};

use super::context::{IngestContext, ProjectScope};
use super::dedup::{self, DedupDecision};
use super::error::IngestError;
use super::persist::{self, PersistError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Duplicate,
    NotTeamMember,
    RetriesExhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReason {
    pub kind: String,
    pub message: String,
    /// True when no later attempt will pick the message up again.
    pub permanent: bool,
    pub retry_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Persisted(Box<Message>),
    Skipped(SkipReason),
    Failed(FailureReason),
}

/// Per-outcome counters shared by batch and push reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeTally {
    pub persisted: usize,
    pub skipped_duplicate: usize,
    pub skipped_non_member: usize,
    pub skipped_exhausted: usize,
    pub failed: usize,
}

impl OutcomeTally {
    pub fn record(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Persisted(_) => self.persisted += 1,
            IngestOutcome::Skipped(SkipReason::Duplicate) => self.skipped_duplicate += 1,
            IngestOutcome::Skipped(SkipReason::NotTeamMember) => self.skipped_non_member += 1,
            IngestOutcome::Skipped(SkipReason::RetriesExhausted) => self.skipped_exhausted += 1,
            IngestOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.persisted
            + self.skipped_duplicate
            + self.skipped_non_member
            + self.skipped_exhausted
            + self.failed
    }
}

/// Formats a failure for a report's error list.
pub fn describe_failure(id: &str, reason: &FailureReason) -> String {
    match reason.retry_count {
        Some(count) if !reason.permanent => {
            format!("{id}: {} (attempt {count}): {}", reason.kind, reason.message)
        }
        _ => format!("{id}: {}: {}", reason.kind, reason.message),
    }
}

fn fatal(error: ProviderError) -> Result<IngestOutcome, IngestError> {
    Err(IngestError::Provider(error))
}

/// Runs one message through metadata fetch, membership, dedup, full fetch,
/// parsing and persistence.
///
/// Only errors that make the rest of the job pointless are returned as
/// `Err`; everything else is an outcome.
pub async fn ingest_one(
    ctx: &IngestContext,
    scope: &ProjectScope,
    id: &str,
) -> Result<IngestOutcome, IngestError> {
    let metadata = match ctx.provider.fetch_metadata(id).await {
        Ok(metadata) => metadata,
        Err(error) if error.is_fatal() => return fatal(error),
        Err(error) => {
            warn!(id, error = %error, "metadata fetch failed");
            return Ok(IngestOutcome::Failed(FailureReason {
                kind: error.kind().to_string(),
                message: error.to_string(),
                permanent: !error.is_transient(),
                retry_count: None,
            }));
        }
    };

    let sender = metadata.from.as_deref().unwrap_or_default();
    if !scope.whitelist.admits(sender) {
        debug!(id, sender = %sender, "sender is not on the project team");
        return Ok(IngestOutcome::Skipped(SkipReason::NotTeamMember));
    }

    let max_retries = ctx.options.max_retries;
    let decision = dedup::check(&ctx.store, id, max_retries)?;
    let pending = match decision {
        DedupDecision::AlreadyIngested => {
            debug!(id, "already ingested");
            return Ok(IngestOutcome::Skipped(SkipReason::Duplicate));
        }
        DedupDecision::Exhausted { retry_count } => {
            debug!(id, retry_count, "retries exhausted");
            return Ok(IngestOutcome::Skipped(SkipReason::RetriesExhausted));
        }
        DedupDecision::New => false,
        DedupDecision::Retry { attempt } => {
            debug!(id, attempt, "retrying pending message");
            true
        }
    };

    let raw = match ctx.provider.fetch(id).await {
        Ok(raw) => raw,
        Err(error) if error.is_fatal() => return fatal(error),
        Err(error) => return record_failure(ctx, scope, &metadata, &error),
    };

    let mut message = match persist::build_message(&raw, &scope.project) {
        Ok(message) => message,
        Err(error) => return record_failure(ctx, scope, &metadata, &error),
    };
    if let DedupDecision::Retry { attempt } = decision {
        message.retry_count = attempt - 1;
    }

    match persist::store_message(ctx, &raw, message, pending) {
        Ok(stored) => {
            debug!(id, "message persisted");
            Ok(IngestOutcome::Persisted(Box::new(stored)))
        }
        Err(PersistError::Duplicate(_)) => {
            debug!(id, "stored concurrently by another worker");
            Ok(IngestOutcome::Skipped(SkipReason::Duplicate))
        }
        Err(PersistError::Store(error)) => Err(IngestError::Store(error)),
        Err(error @ (PersistError::Blob(_) | PersistError::Encode(_))) => {
            let as_provider = ProviderError::Transient(error.to_string());
            record_failure(ctx, scope, &metadata, &as_provider)
        }
    }
}

fn record_failure(
    ctx: &IngestContext,
    scope: &ProjectScope,
    metadata: &MessageMetadata,
    error: &ProviderError,
) -> Result<IngestOutcome, IngestError> {
    let permanent = !error.is_transient();
    let details = ErrorDetails::now(error.kind(), error.to_string());
    let stub = persist::stub_from_metadata(metadata, &scope.project);
    let row = ctx
        .store
        .record_failure(&stub, &details, permanent, ctx.options.max_retries)?;

    // Another worker finished the message while this one was failing.
    if row.ingestion_status == IngestionStatus::Completed {
        debug!(id = %metadata.id, kind = error.kind(), "failure superseded by a stored copy");
        return Ok(IngestOutcome::Skipped(SkipReason::Duplicate));
    }

    let permanent = row.ingestion_status == IngestionStatus::Failed;
    let sender = normalize_address(metadata.from.as_deref().unwrap_or_default());
    warn!(
        id = %metadata.id,
        kind = error.kind(),
        retry_count = row.retry_count,
        permanent,
        sender = %sender.unwrap_or_default(),
        "message ingestion failed"
    );

    Ok(IngestOutcome::Failed(FailureReason {
        kind: error.kind().to_string(),
        message: error.to_string(),
        permanent,
        retry_count: Some(row.retry_count),
    }))
}

#[cfg(test)]
mod tests {
    use super::{describe_failure, FailureReason, IngestOutcome, OutcomeTally, SkipReason};

    #[test]
    fn tally_counts_each_outcome_kind() {
        let mut tally = OutcomeTally::default();
        tally.record(&IngestOutcome::Skipped(SkipReason::Duplicate));
        tally.record(&IngestOutcome::Skipped(SkipReason::NotTeamMember));
        tally.record(&IngestOutcome::Failed(FailureReason {
            kind: "transient".to_string(),
            message: "503".to_string(),
            permanent: false,
            retry_count: Some(1),
        }));

        assert_eq!(tally.skipped_duplicate, 1);
        assert_eq!(tally.skipped_non_member, 1);
        assert_eq!(tally.failed, 1);
        assert_eq!(tally.total(), 3);
    }

    #[test]
    fn failure_description_mentions_attempt_for_retryable_errors() {
        let reason = FailureReason {
            kind: "transient".to_string(),
            message: "timeout".to_string(),
            permanent: false,
            retry_count: Some(2),
        };
        assert_eq!(describe_failure("m-1", &reason), "m-1: transient (attempt 2): timeout");

        let permanent = FailureReason {
            permanent: true,
            ..reason
        };
        assert_eq!(describe_failure("m-1", &permanent), "m-1: transient: timeout");
    }
}
