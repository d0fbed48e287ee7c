use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{TimeZone, Utc};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::headers::{extract_header, html_to_text, parse_address_list, parse_date};
use super::{
    AttachmentRef, ChangeSet, MailProvider, MessageHeader, MessageMetadata, ProviderError,
    RawMessage, SearchPage, WatchHandle, MAX_PAGE_SIZE,
};
use crate::db::models::ProviderMetadata;

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const MAX_RATE_LIMIT_RETRIES: usize = 5;
const MAX_BACKOFF_SECONDS: u64 = 32;
const REDACTED_BODY_MAX_LEN: usize = 200;
const METADATA_HEADERS: &[&str] = &["From", "To", "Cc", "Subject", "Date"];

/// Supplies bearer tokens. Refreshing them is someone else's job.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, ProviderError> {
        let token = self.0.trim();
        if token.is_empty() {
            return Err(ProviderError::Config(
                "gmail access token is empty".to_string(),
            ));
        }
        Ok(token.to_string())
    }
}

#[derive(Clone)]
pub struct GmailProvider {
    client: Client,
    api_base: String,
    tokens: Arc<dyn TokenSource>,
    mailbox: String,
    topic: Option<String>,
}

impl GmailProvider {
    pub fn new(mailbox: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client: Client::new(),
            api_base: GMAIL_API_BASE.to_string(),
            tokens,
            mailbox: mailbox.into().trim().to_ascii_lowercase(),
            topic: None,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_topic(mut self, topic: Option<String>) -> Self {
        self.topic = topic.filter(|value| !value.trim().is_empty());
        self
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, ProviderError> {
        let url = format!("{}/users/me/{}", self.api_base, path.trim_start_matches('/'));
        Url::parse_with_params(&url, params)
            .map_err(|e| ProviderError::Config(format!("invalid gmail url {url}: {e}")))
    }

    async fn send_with_retry(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<String, ProviderError> {
        let mut backoff_seconds = 1u64;

        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            let token = self.tokens.access_token().await?;
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .bearer_auth(token)
                .header("accept", "application/json");
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .map_err(|e| ProviderError::Transient(format!("gmail api request {url}: {e}")))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt == MAX_RATE_LIMIT_RETRIES {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ProviderError::Transient(format!(
                        "gmail api rate limit retries exhausted: {}",
                        redact_response_body(&body)
                    )));
                }

                let retry_after_seconds = response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(backoff_seconds);

                debug!(attempt, retry_after_seconds, "gmail rate limited, backing off");
                sleep(StdDuration::from_secs(retry_after_seconds)).await;
                backoff_seconds = (backoff_seconds * 2).min(MAX_BACKOFF_SECONDS);
                continue;
            }

            let status = response.status();
            let body = response.text().await.map_err(|e| {
                ProviderError::Transient(format!("read gmail api response body: {e}"))
            })?;
            if !status.is_success() {
                return Err(classify_status(status, url.path(), &body));
            }

            return Ok(body);
        }

        Err(ProviderError::Transient(
            "gmail api request failed without response".to_string(),
        ))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: Url,
        what: &str,
    ) -> Result<(T, Value), ProviderError> {
        let body = self.send_with_retry(Method::GET, url, None).await?;
        let raw: Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("decode gmail {what}: {e}")))?;
        let decoded = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::Malformed(format!("decode gmail {what}: {e}")))?;
        Ok((decoded, raw))
    }
}

#[async_trait]
impl MailProvider for GmailProvider {
    fn name(&self) -> &str {
        "gmail"
    }

    fn mailbox(&self) -> &str {
        &self.mailbox
    }

    async fn search_page(
        &self,
        query: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<SearchPage, ProviderError> {
        let mut params = vec![
            ("q", query.to_string()),
            ("maxResults", page_size.clamp(1, MAX_PAGE_SIZE).to_string()),
        ];
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token.to_string()));
        }

        let url = self.endpoint("messages", &params)?;
        let (list, _): (GmailMessageList, _) = self.get_json(url, "message list").await?;

        Ok(SearchPage {
            ids: list
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|stub| stub.id)
                .collect(),
            next_page_token: list.next_page_token,
        })
    }

    async fn fetch_metadata(&self, id: &str) -> Result<MessageMetadata, ProviderError> {
        let mut params = vec![("format", "metadata".to_string())];
        params.extend(
            METADATA_HEADERS
                .iter()
                .map(|header| ("metadataHeaders", header.to_string())),
        );

        let url = self.endpoint(&format!("messages/{id}"), &params)?;
        let (message, _): (GmailMessage, _) = self.get_json(url, "message metadata").await?;
        Ok(map_gmail_metadata(&message))
    }

    async fn fetch(&self, id: &str) -> Result<RawMessage, ProviderError> {
        let url = self.endpoint(
            &format!("messages/{id}"),
            &[("format", "full".to_string())],
        )?;
        let (message, raw): (GmailMessage, _) = self.get_json(url, "message").await?;
        map_gmail_message(message, raw)
    }

    async fn changes_since(&self, cursor: u64) -> Result<ChangeSet, ProviderError> {
        let mut seen = HashSet::new();
        let mut message_ids = Vec::new();
        let mut latest_cursor = cursor;
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("startHistoryId", cursor.to_string()),
                ("historyTypes", "messageAdded".to_string()),
                ("maxResults", MAX_PAGE_SIZE.to_string()),
            ];
            if let Some(page_token) = &page_token {
                params.push(("pageToken", page_token.clone()));
            }

            let url = self.endpoint("history", &params)?;
            let (history, _): (GmailHistoryList, _) = self.get_json(url, "history list").await?;

            if let Some(id) = history.history_id.as_deref().and_then(parse_history_id) {
                latest_cursor = latest_cursor.max(id);
            }

            for record in history.history.unwrap_or_default() {
                if let Some(id) = parse_history_id(&record.id) {
                    latest_cursor = latest_cursor.max(id);
                }
                for added in record.messages_added.unwrap_or_default() {
                    if seen.insert(added.message.id.clone()) {
                        message_ids.push(added.message.id);
                    }
                }
            }

            page_token = history.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(ChangeSet {
            message_ids,
            latest_cursor,
        })
    }

    async fn watch(&self) -> Result<WatchHandle, ProviderError> {
        let topic = self.topic.clone().ok_or_else(|| {
            ProviderError::Config("gmail watch needs a pub/sub topic".to_string())
        })?;

        let url = self.endpoint("watch", &[])?;
        let body = json!({ "topicName": topic, "labelIds": ["INBOX"] });
        let response = self.send_with_retry(Method::POST, url, Some(&body)).await?;
        let watch: GmailWatchResponse = serde_json::from_str(&response)
            .map_err(|e| ProviderError::Malformed(format!("decode gmail watch response: {e}")))?;

        let cursor = parse_history_id(&watch.history_id).ok_or_else(|| {
            ProviderError::Malformed(format!("invalid history id {}", watch.history_id))
        })?;
        let expires_at = watch
            .expiration
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        Ok(WatchHandle {
            mailbox: self.mailbox.clone(),
            cursor,
            expires_at,
            topic: Some(topic),
        })
    }

    async fn stop(&self, handle: &WatchHandle) -> Result<(), ProviderError> {
        if !handle.mailbox.eq_ignore_ascii_case(&self.mailbox) {
            warn!(
                watched = %handle.mailbox,
                mailbox = %self.mailbox,
                "stopping a watch registered for a different mailbox"
            );
        }
        let url = self.endpoint("stop", &[])?;
        self.send_with_retry(Method::POST, url, Some(&json!({})))
            .await?;
        Ok(())
    }
}

fn classify_status(status: StatusCode, path: &str, body: &str) -> ProviderError {
    let detail = format!("status={} path={} body={}", status, path, redact_response_body(body));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(detail),
        StatusCode::NOT_FOUND => ProviderError::NotFound(detail),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            ProviderError::Transient(detail)
        }
        status if status.is_server_error() => ProviderError::Transient(detail),
        _ => ProviderError::Malformed(detail),
    }
}

fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= REDACTED_BODY_MAX_LEN {
        return trimmed.to_string();
    }

    let mut cut = REDACTED_BODY_MAX_LEN;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…[truncated {} bytes]", &trimmed[..cut], trimmed.len())
}

fn parse_history_id(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok()
}

fn payload_headers(payload: &GmailPayload) -> Vec<MessageHeader> {
    payload
        .headers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|h| MessageHeader {
            name: h.name.clone(),
            value: h.value.clone(),
        })
        .collect()
}

fn map_gmail_metadata(message: &GmailMessage) -> MessageMetadata {
    let headers = payload_headers(&message.payload);

    MessageMetadata {
        id: message.id.clone(),
        thread_id: Some(message.thread_id.clone()).filter(|id| !id.is_empty()),
        from: extract_header(&headers, "From").map(str::to_string),
        to: parse_address_list(extract_header(&headers, "To")),
        cc: parse_address_list(extract_header(&headers, "Cc")),
        subject: extract_header(&headers, "Subject").map(str::to_string),
        sent_at: extract_header(&headers, "Date")
            .and_then(parse_date)
            .or_else(|| internal_date(message)),
    }
}

fn internal_date(message: &GmailMessage) -> Option<chrono::DateTime<Utc>> {
    message
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn map_gmail_message(message: GmailMessage, raw: Value) -> Result<RawMessage, ProviderError> {
    let headers = payload_headers(&message.payload);
    if extract_header(&headers, "From").is_none() {
        return Err(ProviderError::Malformed(format!(
            "gmail message {} has no From header",
            message.id
        )));
    }

    let mut body_text = None;
    let mut body_html = None;
    let mut attachment_refs = Vec::new();
    collect_body_parts(
        &message.payload,
        &mut body_text,
        &mut body_html,
        &mut attachment_refs,
    )?;
    if body_text.is_none() {
        body_text = body_html.as_deref().and_then(html_to_text);
    }

    let mut extra = BTreeMap::new();
    if let Some(snippet) = message.snippet.as_deref().filter(|s| !s.is_empty()) {
        extra.insert("snippet".to_string(), snippet.to_string());
    }

    let metadata = ProviderMetadata::Gmail {
        label_ids: message.label_ids.clone().unwrap_or_default(),
        history_id: message.history_id.clone(),
        internal_date: internal_date(&message).map(|dt| dt.to_rfc3339()),
        size_estimate: message.size_estimate,
        extra,
    };

    Ok(RawMessage {
        id: message.id,
        thread_id: Some(message.thread_id).filter(|id| !id.is_empty()),
        headers,
        body_text,
        body_html,
        attachment_refs,
        metadata,
        raw,
    })
}

fn collect_body_parts(
    payload: &GmailPayload,
    text_body: &mut Option<String>,
    html_body: &mut Option<String>,
    attachments: &mut Vec<AttachmentRef>,
) -> Result<(), ProviderError> {
    let mime_type = payload
        .mime_type
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();

    if let Some(filename) = payload.filename.as_deref().filter(|f| !f.is_empty()) {
        attachments.push(AttachmentRef {
            filename: filename.to_string(),
            mime_type: payload.mime_type.clone(),
            attachment_id: payload.body.as_ref().and_then(|b| b.attachment_id.clone()),
            size: payload.body.as_ref().and_then(|b| b.size),
        });
    } else if let Some(data) = payload
        .body
        .as_ref()
        .and_then(|body| body.data.as_deref())
        .filter(|data| !data.is_empty())
    {
        if mime_type == "text/plain" && text_body.is_none() {
            *text_body = Some(decode_body_data(data)?);
        } else if mime_type == "text/html" && html_body.is_none() {
            *html_body = Some(decode_body_data(data)?);
        }
    }

    for part in payload.parts.as_deref().unwrap_or_default() {
        collect_body_parts(part, text_body, html_body, attachments)?;
    }
    Ok(())
}

fn decode_body_data(data: &str) -> Result<String, ProviderError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|e| ProviderError::Malformed(format!("base64url decode gmail body: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| ProviderError::Malformed(format!("utf8 decode gmail body: {e}")))
}

// Gmail API response shapes. Only the fields the pipeline reads are declared.

#[derive(Debug, Clone, Deserialize)]
struct GmailMessageList {
    messages: Option<Vec<GmailMessageStub>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailMessageStub {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailMessage {
    id: String,
    #[serde(rename = "threadId", default)]
    thread_id: String,
    #[serde(rename = "labelIds")]
    label_ids: Option<Vec<String>>,
    snippet: Option<String>,
    payload: GmailPayload,
    #[serde(rename = "internalDate")]
    internal_date: Option<String>,
    #[serde(rename = "historyId")]
    history_id: Option<String>,
    #[serde(rename = "sizeEstimate")]
    size_estimate: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailPayload {
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
    headers: Option<Vec<GmailHeader>>,
    body: Option<GmailBody>,
    parts: Option<Vec<GmailPayload>>,
    filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailBody {
    size: Option<u64>,
    data: Option<String>,
    #[serde(rename = "attachmentId")]
    attachment_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailHistoryList {
    history: Option<Vec<GmailHistoryRecord>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(rename = "historyId")]
    history_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailHistoryRecord {
    id: String,
    #[serde(rename = "messagesAdded")]
    messages_added: Option<Vec<GmailHistoryMessageAdded>>,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailHistoryMessageAdded {
    message: GmailMessageStub,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailWatchResponse {
    #[serde(rename = "historyId")]
    history_id: String,
    expiration: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::StatusCode;
    use serde_json::json;

    use super::{
        classify_status, map_gmail_message, map_gmail_metadata, redact_response_body,
        GmailHistoryList, GmailMessage, GmailProvider, StaticToken, TokenSource,
    };
    use crate::db::models::ProviderMetadata;
    use crate::provider::{MailProvider, ProviderError};

    fn kitchen_quote_payload() -> serde_json::Value {
        json!({
            "id": "18e1234abcd",
            "threadId": "18e1234abcd",
            "labelIds": ["INBOX", "UNREAD", "Label_42"],
            "snippet": "Quote for the kitchen",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [
                    { "name": "Subject", "value": "Kitchen Quote" },
                    { "name": "From", "value": "Sam Rivera <Sam@Build.example>" },
                    { "name": "To", "value": "owner@home.example, \"Lee, Pat\" <pat@home.example>" },
                    { "name": "Cc", "value": "office@build.example" },
                    { "name": "Date", "value": "Mon, 02 Mar 2026 09:00:00 +0000" }
                ],
                "body": { "size": 0 },
                "parts": [
                    {
                        "mimeType": "multipart/alternative",
                        "parts": [
                            {
                                "mimeType": "text/plain",
                                "body": { "size": 16, "data": "SGVsbG8gdGVhbSE" }
                            },
                            {
                                "mimeType": "text/html",
                                "body": { "size": 30, "data": "PHA-SGVsbG8gPGI-dGVhbTwvYj4hPC9wPg" }
                            }
                        ]
                    },
                    {
                        "mimeType": "application/pdf",
                        "filename": "quote.pdf",
                        "body": { "size": 52000, "attachmentId": "att-1" }
                    }
                ]
            },
            "internalDate": "1772442000000",
            "historyId": "12345",
            "sizeEstimate": 58000
        })
    }

    #[test]
    fn full_message_maps_bodies_attachments_and_metadata() {
        let raw = kitchen_quote_payload();
        let message: GmailMessage =
            serde_json::from_value(raw.clone()).expect("deserialize gmail message");
        let mapped = map_gmail_message(message, raw).expect("map gmail message");

        assert_eq!(mapped.id, "18e1234abcd");
        assert_eq!(mapped.thread_id.as_deref(), Some("18e1234abcd"));
        assert_eq!(mapped.header("subject"), Some("Kitchen Quote"));
        assert_eq!(mapped.body_text.as_deref(), Some("Hello team!"));
        assert!(mapped.body_html.is_some());
        assert_eq!(mapped.attachment_refs.len(), 1);
        assert_eq!(mapped.attachment_refs[0].filename, "quote.pdf");
        assert_eq!(mapped.attachment_refs[0].attachment_id.as_deref(), Some("att-1"));

        match mapped.metadata {
            ProviderMetadata::Gmail {
                label_ids,
                history_id,
                size_estimate,
                extra,
                ..
            } => {
                assert_eq!(label_ids, vec!["INBOX", "UNREAD", "Label_42"]);
                assert_eq!(history_id.as_deref(), Some("12345"));
                assert_eq!(size_estimate, Some(58000));
                assert_eq!(extra.get("snippet").map(String::as_str), Some("Quote for the kitchen"));
            }
            other => panic!("unexpected metadata: {other:?}"),
        }
    }

    #[test]
    fn metadata_view_parses_addresses_and_date() {
        let message: GmailMessage =
            serde_json::from_value(kitchen_quote_payload()).expect("deserialize gmail message");
        let metadata = map_gmail_metadata(&message);

        assert_eq!(metadata.from.as_deref(), Some("Sam Rivera <Sam@Build.example>"));
        assert_eq!(metadata.to, vec!["owner@home.example", "pat@home.example"]);
        assert_eq!(metadata.cc, vec!["office@build.example"]);
        assert_eq!(
            metadata.sent_at.map(|dt| dt.to_rfc3339()),
            Some("2026-03-02T09:00:00+00:00".to_string())
        );
    }

    #[test]
    fn html_only_message_falls_back_to_rendered_text() {
        let raw = json!({
            "id": "msg-html",
            "threadId": "thread-html",
            "payload": {
                "mimeType": "text/html",
                "headers": [{ "name": "From", "value": "owner@home.example" }],
                "body": { "data": "PHA-SGVsbG8gPGI-dGVhbTwvYj4hPC9wPg" }
            }
        });
        let message: GmailMessage = serde_json::from_value(raw.clone()).expect("deserialize");
        let mapped = map_gmail_message(message, raw).expect("map");

        assert!(mapped
            .body_text
            .as_deref()
            .unwrap_or_default()
            .contains("Hello"));
    }

    #[test]
    fn message_without_sender_or_with_bad_body_is_malformed() {
        let raw = json!({
            "id": "msg-nofrom",
            "threadId": "t",
            "payload": { "mimeType": "text/plain", "headers": [], "body": { "data": "SGk" } }
        });
        let message: GmailMessage = serde_json::from_value(raw.clone()).expect("deserialize");
        assert!(matches!(
            map_gmail_message(message, raw),
            Err(ProviderError::Malformed(_))
        ));

        let raw = json!({
            "id": "msg-badbody",
            "threadId": "t",
            "payload": {
                "mimeType": "text/plain",
                "headers": [{ "name": "From", "value": "a@b.example" }],
                "body": { "data": "!!!not base64!!!" }
            }
        });
        let message: GmailMessage = serde_json::from_value(raw.clone()).expect("deserialize");
        assert!(matches!(
            map_gmail_message(message, raw),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn http_statuses_map_to_error_kinds() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "/m", ""),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "/m", ""),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "/m", ""),
            ProviderError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, "/m", ""),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "/m", ""),
            ProviderError::Malformed(_)
        ));
    }

    #[test]
    fn long_response_bodies_are_truncated() {
        let body = "x".repeat(500);
        let redacted = redact_response_body(&body);
        assert!(redacted.starts_with(&"x".repeat(200)));
        assert!(redacted.ends_with("[truncated 500 bytes]"));
    }

    #[test]
    fn history_list_tolerates_missing_records() {
        let decoded: GmailHistoryList =
            serde_json::from_value(json!({ "historyId": "900" })).expect("decode history");
        assert!(decoded.history.is_none());
        assert_eq!(decoded.history_id.as_deref(), Some("900"));
    }

    #[tokio::test]
    async fn empty_static_token_is_a_config_error() {
        let token = StaticToken::new("  ");
        assert!(matches!(
            token.access_token().await,
            Err(ProviderError::Config(_))
        ));
    }

    #[tokio::test]
    async fn watch_without_topic_is_rejected_before_any_request() {
        let provider = GmailProvider::new("Owner@Home.example", Arc::new(StaticToken::new("t")))
            .with_api_base("http://127.0.0.1:9");
        assert_eq!(provider.mailbox(), "owner@home.example");
        assert!(matches!(
            provider.watch().await,
            Err(ProviderError::Config(_))
        ));
    }
}
