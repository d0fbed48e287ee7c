use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::headers::{html_to_text, normalize_address, parse_address_list, parse_date};
use super::{
    AttachmentRef, ChangeSet, MailProvider, MessageHeader, MessageMetadata, ProviderError,
    RawMessage, SearchPage, WatchHandle,
};
use crate::db::models::ProviderMetadata;

/// Serves a directory of exported messages, one JSON document per file.
///
/// The directory is rescanned on every call so files dropped in while a
/// listener runs are picked up. A file's id is its `id` field, or the file
/// stem when the field is missing.
#[derive(Debug, Clone)]
pub struct ArchiveProvider {
    root: PathBuf,
    mailbox: String,
}

struct ArchiveEntry {
    id: String,
    path: PathBuf,
    payload: Option<Value>,
}

impl ArchiveEntry {
    fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.payload
            .as_ref()
            .and_then(|payload| get_str(payload, &["date", "sentDateTime"]))
            .and_then(|raw| parse_date(&raw))
    }

    fn history_id(&self) -> Option<u64> {
        self.payload
            .as_ref()
            .and_then(|payload| payload.get("historyId"))
            .and_then(|value| {
                value
                    .as_u64()
                    .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            })
    }
}

impl ArchiveProvider {
    pub fn new(
        root: impl Into<PathBuf>,
        mailbox: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ProviderError::Config(format!(
                "archive path is not a directory: {}",
                root.display()
            )));
        }

        Ok(Self {
            root,
            mailbox: mailbox.into().trim().to_ascii_lowercase(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load_entries(&self) -> Result<Vec<ArchiveEntry>, ProviderError> {
        let read_dir = std::fs::read_dir(&self.root).map_err(|e| {
            ProviderError::Transient(format!("read archive directory {}: {e}", self.root.display()))
        })?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let path = entry
                .map_err(|e| ProviderError::Transient(format!("read archive entry: {e}")))?
                .path();
            if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let payload = std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
                .filter(Value::is_object);
            let stem = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default()
                .to_string();
            let id = payload
                .as_ref()
                .and_then(|payload| get_str(payload, &["id"]))
                .unwrap_or(stem);

            entries.push(ArchiveEntry { id, path, payload });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn find_entry(&self, id: &str) -> Result<ArchiveEntry, ProviderError> {
        self.load_entries()?
            .into_iter()
            .find(|entry| entry.id == id)
            .ok_or_else(|| ProviderError::NotFound(format!("archive message {id}")))
    }
}

#[async_trait]
impl MailProvider for ArchiveProvider {
    fn name(&self) -> &str {
        "archive"
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
        let query = ArchiveQuery::parse(query);
        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ProviderError::Malformed(format!("invalid page token {token}")))?,
            None => 0,
        };

        let mut matching: Vec<(Option<DateTime<Utc>>, String)> = self
            .load_entries()?
            .into_iter()
            .filter(|entry| entry.payload.as_ref().is_some_and(|p| query.matches(p)))
            .map(|entry| (entry.sent_at(), entry.id))
            .collect();
        matching.sort();

        let page_size = page_size.max(1);
        let ids: Vec<String> = matching
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|(_, id)| id.clone())
            .collect();
        let next_offset = offset + ids.len();
        let next_page_token = (next_offset < matching.len()).then(|| next_offset.to_string());

        debug!(offset, returned = ids.len(), total = matching.len(), "archive search page");
        Ok(SearchPage {
            ids,
            next_page_token,
        })
    }

    async fn fetch_metadata(&self, id: &str) -> Result<MessageMetadata, ProviderError> {
        let entry = self.find_entry(id)?;
        let payload = entry.payload.as_ref().ok_or_else(|| {
            ProviderError::Malformed(format!("unreadable archive file {}", entry.path.display()))
        })?;

        Ok(MessageMetadata {
            id: entry.id.clone(),
            thread_id: get_str(payload, &["threadId", "conversationId"]),
            from: sender_field(payload),
            to: recipients_field(payload, &["to", "toRecipients"]),
            cc: recipients_field(payload, &["cc", "ccRecipients"]),
            subject: get_str(payload, &["subject"]),
            sent_at: entry.sent_at(),
        })
    }

    async fn fetch(&self, id: &str) -> Result<RawMessage, ProviderError> {
        let entry = self.find_entry(id)?;
        let source = entry.path.display().to_string();
        let payload = entry
            .payload
            .clone()
            .ok_or_else(|| ProviderError::Malformed(format!("unreadable archive file {source}")))?;
        map_archive_payload(&entry, payload)
    }

    async fn changes_since(&self, cursor: u64) -> Result<ChangeSet, ProviderError> {
        let mut changed: Vec<(u64, String)> = self
            .load_entries()?
            .into_iter()
            .filter_map(|entry| entry.history_id().map(|history| (history, entry.id)))
            .filter(|(history, _)| *history > cursor)
            .collect();
        changed.sort();

        let latest_cursor = changed.last().map_or(cursor, |(history, _)| *history);
        Ok(ChangeSet {
            message_ids: changed.into_iter().map(|(_, id)| id).collect(),
            latest_cursor,
        })
    }

    async fn watch(&self) -> Result<WatchHandle, ProviderError> {
        let cursor = self
            .load_entries()?
            .iter()
            .filter_map(ArchiveEntry::history_id)
            .max()
            .unwrap_or(0);

        Ok(WatchHandle {
            mailbox: self.mailbox.clone(),
            cursor,
            expires_at: None,
            topic: None,
        })
    }

    async fn stop(&self, _handle: &WatchHandle) -> Result<(), ProviderError> {
        Ok(())
    }
}

fn map_archive_payload(entry: &ArchiveEntry, payload: Value) -> Result<RawMessage, ProviderError> {
    let source = entry.path.display().to_string();
    let from = sender_field(&payload)
        .ok_or_else(|| ProviderError::Malformed(format!("{source}: missing sender")))?;

    let date = get_str(&payload, &["date", "sentDateTime"]);
    if let Some(raw_date) = &date {
        if parse_date(raw_date).is_none() {
            return Err(ProviderError::Malformed(format!(
                "{source}: unparseable date {raw_date:?}"
            )));
        }
    }

    let (body_text, body_html) = parse_body(&payload)
        .ok_or_else(|| ProviderError::Malformed(format!("{source}: unsupported body shape")))?;

    let attachment_refs = match payload.get("attachments") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter_map(parse_attachment).collect(),
        Some(_) => {
            return Err(ProviderError::Malformed(format!(
                "{source}: attachments must be an array"
            )))
        }
    };

    let mut headers = vec![MessageHeader {
        name: "From".to_string(),
        value: from,
    }];
    let to = recipients_field(&payload, &["to", "toRecipients"]);
    if !to.is_empty() {
        headers.push(MessageHeader {
            name: "To".to_string(),
            value: to.join(", "),
        });
    }
    let cc = recipients_field(&payload, &["cc", "ccRecipients"]);
    if !cc.is_empty() {
        headers.push(MessageHeader {
            name: "Cc".to_string(),
            value: cc.join(", "),
        });
    }
    if let Some(subject) = get_str(&payload, &["subject"]) {
        headers.push(MessageHeader {
            name: "Subject".to_string(),
            value: subject,
        });
    }
    if let Some(date) = date {
        headers.push(MessageHeader {
            name: "Date".to_string(),
            value: date,
        });
    }

    let mut extra = BTreeMap::new();
    if let Some(labels) = payload.get("labels").and_then(Value::as_array) {
        let labels: Vec<&str> = labels.iter().filter_map(Value::as_str).collect();
        if !labels.is_empty() {
            extra.insert("labels".to_string(), labels.join(","));
        }
    }

    let metadata = ProviderMetadata::Archive {
        source_file: entry
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string(),
        history_id: entry.history_id(),
        extra,
    };

    Ok(RawMessage {
        id: entry.id.clone(),
        thread_id: get_str(&payload, &["threadId", "conversationId"]),
        headers,
        body_text,
        body_html,
        attachment_refs,
        metadata,
        raw: payload,
    })
}

/// Returns `None` when the body field has a shape no exporter produces.
fn parse_body(payload: &Value) -> Option<(Option<String>, Option<String>)> {
    let html = get_str(payload, &["bodyHtml"]);
    let text = match payload.get("body") {
        None | Some(Value::Null) => None,
        Some(Value::String(content)) => Some(content.trim().to_string()),
        Some(Value::Object(body)) => {
            let content = body.get("content").and_then(Value::as_str)?;
            let is_html = body
                .get("contentType")
                .and_then(Value::as_str)
                .is_some_and(|kind| kind.eq_ignore_ascii_case("html"));
            if is_html {
                return Some((html_to_text(content), Some(content.to_string())));
            }
            Some(content.trim().to_string())
        }
        Some(_) => return None,
    };

    let text = text
        .filter(|t| !t.is_empty())
        .or_else(|| html.as_deref().and_then(html_to_text));
    Some((text, html))
}

fn parse_attachment(value: &Value) -> Option<AttachmentRef> {
    match value {
        Value::String(name) => Some(AttachmentRef {
            filename: name.clone(),
            mime_type: None,
            attachment_id: None,
            size: None,
        }),
        Value::Object(_) => Some(AttachmentRef {
            filename: get_str(value, &["filename", "name"])?,
            mime_type: get_str(value, &["mimeType", "contentType"]),
            attachment_id: get_str(value, &["id", "attachmentId"]),
            size: value.get("size").and_then(Value::as_u64),
        }),
        _ => None,
    }
}

fn get_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Accepts `"Name <a@b>"` strings as well as `{name, address}` objects.
fn contact_string(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => Some(raw.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Object(_) => {
            let address = get_str(value, &["address", "email"])?;
            Some(match get_str(value, &["name"]) {
                Some(name) => format!("{name} <{address}>"),
                None => address,
            })
        }
        _ => None,
    }
}

fn sender_field(payload: &Value) -> Option<String> {
    ["from", "sender"]
        .iter()
        .find_map(|key| payload.get(*key))
        .and_then(contact_string)
}

fn recipients_field(payload: &Value, keys: &[&str]) -> Vec<String> {
    match keys.iter().find_map(|key| payload.get(*key)) {
        Some(Value::String(raw)) => parse_address_list(Some(raw)),
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(contact_string)
            .filter_map(|entry| normalize_address(&entry))
            .collect(),
        _ => Vec::new(),
    }
}

/// The subset of the search syntax the archive understands: `after:`,
/// `before:`, `from:(a OR b)` and a keyword clause of `OR`-joined terms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveQuery {
    pub after: Option<NaiveDate>,
    pub before: Option<NaiveDate>,
    pub senders: Vec<String>,
    pub keywords: Vec<String>,
}

fn date_operator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(after|before):(\d{4}/\d{1,2}/\d{1,2})").expect("compile date regex")
    })
}

fn from_operator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bfrom:(?:\(([^)]*)\)|(\S+))").expect("compile from regex")
    })
}

fn term_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)"|([^\s()"]+)"#).expect("compile term regex"))
}

impl ArchiveQuery {
    pub fn parse(query: &str) -> Self {
        let mut parsed = Self::default();

        for captures in date_operator_regex().captures_iter(query) {
            let date = NaiveDate::parse_from_str(&captures[2], "%Y/%m/%d").ok();
            if captures[1].eq_ignore_ascii_case("after") {
                parsed.after = date;
            } else {
                parsed.before = date;
            }
        }

        for captures in from_operator_regex().captures_iter(query) {
            let clause = captures
                .get(1)
                .or_else(|| captures.get(2))
                .map_or("", |m| m.as_str());
            parsed
                .senders
                .extend(clause.split_whitespace().filter_map(|token| {
                    (!token.eq_ignore_ascii_case("or"))
                        .then(|| normalize_address(token))
                        .flatten()
                }));
        }

        let remainder = from_operator_regex().replace_all(query, " ");
        let remainder = date_operator_regex().replace_all(&remainder, " ");
        for captures in term_regex().captures_iter(&remainder) {
            let term = captures
                .get(1)
                .or_else(|| captures.get(2))
                .map_or("", |m| m.as_str())
                .trim();
            if !term.is_empty() && term != "OR" {
                parsed.keywords.push(term.to_lowercase());
            }
        }

        parsed
    }

    fn matches(&self, payload: &Value) -> bool {
        let sent_on = get_str(payload, &["date", "sentDateTime"])
            .and_then(|raw| parse_date(&raw))
            .map(|dt| dt.date_naive());

        if self.after.is_some() || self.before.is_some() {
            let Some(sent_on) = sent_on else {
                return false;
            };
            // after: is inclusive, before: exclusive
            if self.after.is_some_and(|after| sent_on < after) {
                return false;
            }
            if self.before.is_some_and(|before| sent_on >= before) {
                return false;
            }
        }

        if !self.senders.is_empty() {
            let sender = sender_field(payload).and_then(|raw| normalize_address(&raw));
            if !sender.is_some_and(|sender| self.senders.contains(&sender)) {
                return false;
            }
        }

        if self.keywords.is_empty() {
            return true;
        }

        let mut haystack = get_str(payload, &["subject"]).unwrap_or_default();
        if let Some((text, html)) = parse_body(payload) {
            haystack.push('\n');
            haystack.push_str(text.as_deref().or(html.as_deref()).unwrap_or_default());
        }
        let haystack = haystack.to_lowercase();
        self.keywords.iter().any(|keyword| haystack.contains(keyword))
    }
}
