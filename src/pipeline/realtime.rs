use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::provider::{ProviderError, WatchHandle};

use super::context::{IngestContext, ProjectScope};
use super::error::IngestError;
use super::step::{describe_failure, ingest_one, IngestOutcome, OutcomeTally};

pub fn cursor_key(mailbox: &str) -> String {
    format!("push_cursor:{}", mailbox.trim().to_ascii_lowercase())
}

pub fn watch_key(mailbox: &str) -> String {
    format!("watch:{}", mailbox.trim().to_ascii_lowercase())
}

/// What a push notification tells us: this mailbox changed up to `cursor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeNotice {
    pub mailbox: String,
    pub cursor: u64,
}

#[derive(Debug, Deserialize)]
struct PushEnvelope {
    message: PushMessage,
}

#[derive(Debug, Deserialize)]
struct PushMessage {
    data: String,
    #[serde(rename = "messageId", alias = "message_id")]
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushData {
    #[serde(rename = "emailAddress")]
    email_address: String,
    #[serde(rename = "historyId")]
    history_id: Value,
}

/// Decodes a Pub/Sub style envelope whose `message.data` is base64 JSON
/// carrying `emailAddress` and `historyId`.
pub fn decode_notification(payload: &str) -> Result<ChangeNotice, IngestError> {
    let malformed = |detail: String| IngestError::MalformedNotification(detail);

    let envelope: PushEnvelope =
        serde_json::from_str(payload).map_err(|e| malformed(format!("envelope: {e}")))?;
    let data = envelope.message.data.trim();
    let bytes = STANDARD
        .decode(data)
        .or_else(|_| URL_SAFE.decode(data))
        .map_err(|e| malformed(format!("data is not base64: {e}")))?;
    let decoded: PushData =
        serde_json::from_slice(&bytes).map_err(|e| malformed(format!("data: {e}")))?;

    let cursor = match &decoded.history_id {
        Value::Number(number) => number.as_u64(),
        Value::String(raw) => raw.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| malformed(format!("invalid historyId {}", decoded.history_id)))?;

    let mailbox = decoded.email_address.trim().to_ascii_lowercase();
    if !mailbox.contains('@') {
        return Err(malformed(format!("invalid emailAddress {mailbox:?}")));
    }

    debug!(
        message_id = envelope.message.message_id.as_deref().unwrap_or_default(),
        mailbox = %mailbox,
        cursor,
        "decoded push notification"
    );
    Ok(ChangeNotice { mailbox, cursor })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationReport {
    pub mailbox: String,
    pub project_id: String,
    pub notice_cursor: u64,
    pub previous_cursor: Option<u64>,
    pub cursor: u64,
    /// The notice only established the starting cursor.
    pub baseline: bool,
    pub message_ids: usize,
    #[serde(flatten)]
    pub outcomes: OutcomeTally,
    pub errors: Vec<String>,
    pub latency_ms: u64,
    pub over_latency_budget: bool,
}

/// Handles one push payload end to end.
///
/// The stored cursor only moves forward, and it stays put while any message
/// failed with a retryable error, so the next notice picks those up again.
pub async fn handle_notification(
    ctx: &IngestContext,
    payload: &str,
) -> Result<NotificationReport, IngestError> {
    let received = Instant::now();
    let notice = decode_notification(payload)?;

    let span = info_span!("notification", mailbox = %notice.mailbox, cursor = notice.cursor);
    async {
        let project = ctx
            .store
            .find_project_by_mailbox(&notice.mailbox)?
            .ok_or_else(|| IngestError::UnknownMailbox(notice.mailbox.clone()))?;
        if !ctx.provider.mailbox().eq_ignore_ascii_case(&notice.mailbox) {
            return Err(IngestError::UnknownMailbox(format!(
                "{} (provider reads {})",
                notice.mailbox,
                ctx.provider.mailbox()
            )));
        }
        let scope = ProjectScope::for_project(&ctx.store, project)?;

        let key = cursor_key(&notice.mailbox);
        let previous = ctx.store.get_cursor(&key)?;
        let mut report = NotificationReport {
            mailbox: notice.mailbox.clone(),
            project_id: scope.project.project_id.clone(),
            notice_cursor: notice.cursor,
            previous_cursor: previous,
            ..NotificationReport::default()
        };

        match previous {
            None => {
                report.cursor = ctx.store.advance_cursor(&key, notice.cursor)?;
                report.baseline = true;
                info!("no stored cursor; notice becomes the baseline");
            }
            Some(stored) if notice.cursor <= stored => {
                report.cursor = stored;
                debug!(stored, "notice is not newer than the stored cursor");
            }
            Some(stored) => match ctx.provider.changes_since(stored).await {
                Ok(changes) => {
                    report.message_ids = changes.message_ids.len();

                    let mut retry_pending = false;
                    for id in &changes.message_ids {
                        let outcome = ingest_one(ctx, &scope, id).await?;
                        report.outcomes.record(&outcome);
                        if let IngestOutcome::Failed(reason) = &outcome {
                            retry_pending |= !reason.permanent;
                            report.errors.push(describe_failure(id, reason));
                        }
                    }

                    report.cursor = if retry_pending {
                        warn!(stored, "retryable failures; cursor left in place");
                        stored
                    } else {
                        let target = changes.latest_cursor.max(notice.cursor);
                        ctx.store.advance_cursor(&key, target)?
                    };
                }
                // Expired history: the gap is only recoverable with an import.
                Err(ProviderError::NotFound(detail)) => {
                    warn!(
                        stored,
                        detail = %detail,
                        "stored cursor expired; re-baselining, run `remail import` to cover the gap"
                    );
                    report.cursor = ctx.store.advance_cursor(&key, notice.cursor)?;
                    report.baseline = true;
                }
                Err(error) => return Err(error.into()),
            },
        }

        let latency = received.elapsed();
        report.latency_ms = latency.as_millis() as u64;
        if latency > ctx.options.latency_ceiling {
            report.over_latency_budget = true;
            warn!(
                latency_ms = report.latency_ms,
                ceiling_ms = ctx.options.latency_ceiling.as_millis() as u64,
                "notification exceeded latency ceiling"
            );
        }

        info!(
            persisted = report.outcomes.persisted,
            skipped = report.outcomes.skipped_duplicate + report.outcomes.skipped_non_member,
            failed = report.outcomes.failed,
            latency_ms = report.latency_ms,
            "notification handled"
        );
        Ok(report)
    }
    .instrument(span)
    .await
}

/// One line of `listen` output.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ListenEvent {
    Handled { line: usize, report: NotificationReport },
    Rejected { line: usize, error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListenSummary {
    pub received: usize,
    pub handled: usize,
    pub rejected: usize,
    #[serde(flatten)]
    pub outcomes: OutcomeTally,
}

impl ListenSummary {
    fn absorb(&mut self, event: &ListenEvent) {
        match event {
            ListenEvent::Handled { report, .. } => {
                self.handled += 1;
                self.outcomes.persisted += report.outcomes.persisted;
                self.outcomes.skipped_duplicate += report.outcomes.skipped_duplicate;
                self.outcomes.skipped_non_member += report.outcomes.skipped_non_member;
                self.outcomes.skipped_exhausted += report.outcomes.skipped_exhausted;
                self.outcomes.failed += report.outcomes.failed;
            }
            ListenEvent::Rejected { .. } => self.rejected += 1,
        }
    }
}

async fn write_event<W: AsyncWrite + Unpin>(
    writer: &mut W,
    summary: &mut ListenSummary,
    event: ListenEvent,
) -> std::io::Result<()> {
    summary.absorb(&event);
    let mut line = serde_json::to_string(&event).map_err(std::io::Error::other)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Reads newline-delimited push payloads and handles up to `concurrency` of
/// them at once, writing one JSON event per payload to `writer`. A bad line
/// is reported and skipped; the loop ends at end of input.
pub async fn listen<R, W>(
    ctx: Arc<IngestContext>,
    reader: R,
    writer: &mut W,
    concurrency: usize,
) -> std::io::Result<ListenSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks: JoinSet<ListenEvent> = JoinSet::new();
    let mut summary = ListenSummary::default();
    let mut lines = reader.lines();
    let mut line_number = 0usize;

    loop {
        tokio::select! {
            next = lines.next_line() => {
                let Some(line) = next? else {
                    break;
                };
                line_number += 1;
                if line.trim().is_empty() {
                    continue;
                }
                summary.received += 1;

                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let ctx = ctx.clone();
                let line_no = line_number;
                tasks.spawn(async move {
                    let _permit = permit;
                    match handle_notification(&ctx, &line).await {
                        Ok(report) => ListenEvent::Handled { line: line_no, report },
                        Err(error) => {
                            warn!(line = line_no, error = %error, "notification rejected");
                            ListenEvent::Rejected { line: line_no, error: error.to_string() }
                        }
                    }
                });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                match joined {
                    Ok(event) => write_event(writer, &mut summary, event).await?,
                    Err(join_error) => error!(error = %join_error, "notification task failed"),
                }
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(event) => write_event(writer, &mut summary, event).await?,
            Err(join_error) => error!(error = %join_error, "notification task failed"),
        }
    }

    info!(
        received = summary.received,
        handled = summary.handled,
        rejected = summary.rejected,
        "listener input closed"
    );
    Ok(summary)
}

/// Subscribes the provider's mailbox to push notifications and records the
/// handle plus the starting cursor.
pub async fn start_watch(ctx: &IngestContext) -> Result<WatchHandle, IngestError> {
    let mailbox = ctx.provider.mailbox().to_string();
    if ctx.store.find_project_by_mailbox(&mailbox)?.is_none() {
        return Err(IngestError::UnknownMailbox(mailbox));
    }

    let handle = ctx.provider.watch().await?;
    let encoded = serde_json::to_string(&handle).map_err(crate::db::StoreError::from)?;
    ctx.store.set_sync_state(&watch_key(&mailbox), &encoded)?;
    let cursor = ctx.store.advance_cursor(&cursor_key(&mailbox), handle.cursor)?;

    info!(mailbox = %mailbox, cursor, expires_at = ?handle.expires_at, "watch registered");
    Ok(handle)
}

/// Cancels the stored subscription, if any. The cursor is kept so a later
/// watch resumes where this one ended.
pub async fn stop_watch(ctx: &IngestContext) -> Result<Option<WatchHandle>, IngestError> {
    let mailbox = ctx.provider.mailbox().to_string();
    let key = watch_key(&mailbox);

    let Some(state) = ctx.store.get_sync_state(&key)? else {
        info!(mailbox = %mailbox, "no active watch");
        return Ok(None);
    };
    let handle: WatchHandle = state
        .value
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_else(|| WatchHandle {
            mailbox: mailbox.clone(),
            cursor: 0,
            expires_at: None,
            topic: None,
        });

    ctx.provider.stop(&handle).await?;
    ctx.store.delete_sync_state(&key)?;
    info!(mailbox = %mailbox, "watch stopped");
    Ok(Some(handle))
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::json;

    use super::{cursor_key, decode_notification};
    use crate::pipeline::error::IngestError;

    fn envelope(data: &str) -> String {
        json!({
            "message": {
                "data": data,
                "messageId": "2070443601311540",
                "publishTime": "2026-03-02T09:00:00Z"
            },
            "subscription": "projects/p/subscriptions/mail"
        })
        .to_string()
    }

    #[test]
    fn decodes_gmail_push_payload() {
        let data = STANDARD.encode(r#"{"emailAddress":"Owner@Home.example","historyId":9876}"#);
        let notice = decode_notification(&envelope(&data)).expect("decode notice");
        assert_eq!(notice.mailbox, "owner@home.example");
        assert_eq!(notice.cursor, 9876);

        let data = STANDARD.encode(r#"{"emailAddress":"owner@home.example","historyId":"42"}"#);
        assert_eq!(
            decode_notification(&envelope(&data)).expect("string history id").cursor,
            42
        );
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        for payload in [
            "not json".to_string(),
            json!({ "message": {} }).to_string(),
            envelope("@@@"),
            envelope(&STANDARD.encode("{}")),
            envelope(&STANDARD.encode(r#"{"emailAddress":"nobody","historyId":1}"#)),
            envelope(&STANDARD.encode(r#"{"emailAddress":"a@b.example","historyId":"x"}"#)),
        ] {
            assert!(
                matches!(
                    decode_notification(&payload),
                    Err(IngestError::MalformedNotification(_))
                ),
                "payload should be rejected: {payload}"
            );
        }
    }

    #[test]
    fn keys_are_normalized_per_mailbox() {
        assert_eq!(cursor_key(" Owner@Home.example"), "push_cursor:owner@home.example");
    }
}
