use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{Result as SqlResult, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Pending,
    Completed,
    Failed,
}

impl Display for IngestionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for IngestionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("invalid ingestion status: {other}")),
        }
    }
}

/// Which side of the renovation a participant speaks for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Contractor,
    Homeowner,
    Other,
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contractor => write!(f, "contractor"),
            Self::Homeowner => write!(f, "homeowner"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contractor" | "pro" => Ok(Self::Contractor),
            "homeowner" | "owner" | "client" => Ok(Self::Homeowner),
            "other" => Ok(Self::Other),
            other => Err(format!("invalid side: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetails {
    pub kind: String,
    pub message: String,
    pub occurred_at: String,
}

impl ErrorDetails {
    pub fn now(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            occurred_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Provider-specific fields kept alongside a message.
///
/// Each provider gets its own variant; `extra` holds the few values that have
/// no typed home yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderMetadata {
    Gmail {
        label_ids: Vec<String>,
        history_id: Option<String>,
        internal_date: Option<String>,
        size_estimate: Option<u64>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        extra: BTreeMap<String, String>,
    },
    Archive {
        source_file: String,
        history_id: Option<u64>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        extra: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub provider_message_id: String,
    pub thread_id: Option<String>,
    pub project_id: String,
    pub user_id: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub cc_recipients: Vec<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub subject: Option<String>,
    pub body_text: Option<String>,
    pub raw_content_pointer: Option<String>,
    pub ingestion_status: IngestionStatus,
    pub analysis_status: Option<String>,
    pub assignment_status: Option<String>,
    pub relevance_score: Option<f64>,
    pub retry_count: u32,
    pub error_details: Option<ErrorDetails>,
    pub provider_metadata: Option<ProviderMetadata>,
    pub ingested_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    pub user_id: String,
    pub mailbox: String,
    pub keywords: Vec<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamMember {
    pub project_id: String,
    pub email_address: String,
    pub display_name: Option<String>,
    pub side: Side,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncState {
    pub key: String,
    pub value: Option<String>,
    pub updated_at: Option<String>,
}

fn parse_json_array(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str::<Vec<String>>(&s).ok())
        .unwrap_or_default()
}

fn parse_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn conversion_error(raw: &str, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        raw.len(),
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

impl Message {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        let status_raw: String = row.get("ingestion_status")?;
        let ingestion_status = IngestionStatus::from_str(&status_raw)
            .map_err(|e| conversion_error(&status_raw, e))?;
        let retry_count: i64 = row.get("retry_count")?;

        Ok(Self {
            provider_message_id: row.get("provider_message_id")?,
            thread_id: row.get("thread_id")?,
            project_id: row.get("project_id")?,
            user_id: row.get("user_id")?,
            sender: row.get("sender")?,
            recipients: parse_json_array(row.get("recipients")?),
            cc_recipients: parse_json_array(row.get("cc_recipients")?),
            sent_at: parse_timestamp(row.get("sent_at")?),
            subject: row.get("subject")?,
            body_text: row.get("body_text")?,
            raw_content_pointer: row.get("raw_content_pointer")?,
            ingestion_status,
            analysis_status: row.get("analysis_status")?,
            assignment_status: row.get("assignment_status")?,
            relevance_score: row.get("relevance_score")?,
            retry_count: u32::try_from(retry_count).unwrap_or(0),
            error_details: row
                .get::<_, Option<String>>("error_details")?
                .and_then(|s| serde_json::from_str(&s).ok()),
            provider_metadata: row
                .get::<_, Option<String>>("provider_metadata")?
                .and_then(|s| serde_json::from_str(&s).ok()),
            ingested_at: row.get("ingested_at")?,
        })
    }

    pub fn is_completed(&self) -> bool {
        self.ingestion_status == IngestionStatus::Completed
    }
}

impl Project {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            project_id: row.get("project_id")?,
            name: row.get("name")?,
            user_id: row.get("user_id")?,
            mailbox: row.get("mailbox")?,
            keywords: parse_json_array(row.get("keywords")?),
            created_at: row.get("created_at")?,
        })
    }
}

impl TeamMember {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        let side_raw: String = row.get("side")?;
        let side = Side::from_str(&side_raw).map_err(|e| conversion_error(&side_raw, e))?;

        Ok(Self {
            project_id: row.get("project_id")?,
            email_address: row.get("email_address")?,
            display_name: row.get("display_name")?,
            side,
        })
    }
}

impl SyncState {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            key: row.get("key")?,
            value: row.get("value")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{IngestionStatus, ProviderMetadata, Side};

    #[test]
    fn status_and_side_display_and_parse() {
        assert_eq!(IngestionStatus::Completed.to_string(), "completed");
        assert_eq!(
            "PENDING".parse::<IngestionStatus>().expect("parse status"),
            IngestionStatus::Pending
        );
        assert_eq!("owner".parse::<Side>().expect("parse side"), Side::Homeowner);
        assert!("landlord".parse::<Side>().is_err());
    }

    #[test]
    fn provider_metadata_is_tagged_by_provider() {
        let metadata = ProviderMetadata::Gmail {
            label_ids: vec!["INBOX".to_string()],
            history_id: Some("991".to_string()),
            internal_date: None,
            size_estimate: Some(2048),
            extra: BTreeMap::new(),
        };

        let value = serde_json::to_value(&metadata).expect("serialize metadata");
        assert_eq!(value["provider"], "gmail");
        assert!(value.get("extra").is_none());

        let decoded: ProviderMetadata =
            serde_json::from_value(value).expect("deserialize metadata");
        assert_eq!(decoded, metadata);
    }
}
