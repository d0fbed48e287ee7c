//! Groups persisted messages into conversations and checks that each one
//! looks like a real exchange between the two sides of a project.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::db::models::{Message, Side, TeamMember};

mod validate;

pub use validate::{ThreadIssue, ThreadWarning};

pub const DEFAULT_MAX_GAP_HOURS: f64 = 72.0;

const DEFAULT_CONTRACTOR_KEYWORDS: &[&str] = &[
    "quote",
    "estimate",
    "invoice",
    "schedule",
    "materials",
    "permit",
    "install",
    "crew",
    "deposit",
    "change order",
];

const DEFAULT_HOMEOWNER_KEYWORDS: &[&str] = &[
    "approve",
    "approved",
    "budget",
    "question",
    "confirm",
    "prefer",
    "payment",
    "thanks",
    "can you",
    "when",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThreadRules {
    pub max_gap_hours: f64,
    pub contractor_keywords: Vec<String>,
    pub homeowner_keywords: Vec<String>,
    /// Messages with a known score below this are left out before grouping.
    pub min_relevance: Option<f64>,
}

impl Default for ThreadRules {
    fn default() -> Self {
        Self {
            max_gap_hours: DEFAULT_MAX_GAP_HOURS,
            contractor_keywords: DEFAULT_CONTRACTOR_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            homeowner_keywords: DEFAULT_HOMEOWNER_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            min_relevance: None,
        }
    }
}

impl ThreadRules {
    pub fn keywords_for(&self, side: Side) -> &[String] {
        match side {
            Side::Contractor => &self.contractor_keywords,
            Side::Homeowner => &self.homeowner_keywords,
            Side::Other => &[],
        }
    }
}

/// Maps normalized addresses to the side they speak for.
#[derive(Debug, Clone, Default)]
pub struct SideDirectory {
    sides: HashMap<String, Side>,
}

impl SideDirectory {
    pub fn from_members(members: &[TeamMember]) -> Self {
        Self {
            sides: members
                .iter()
                .map(|m| (m.email_address.trim().to_ascii_lowercase(), m.side))
                .collect(),
        }
    }

    pub fn insert(&mut self, address: &str, side: Side) {
        self.sides.insert(address.trim().to_ascii_lowercase(), side);
    }

    pub fn side_of(&self, address: &str) -> Option<Side> {
        self.sides
            .get(&address.trim().to_ascii_lowercase())
            .copied()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ThreadKeyKind {
    Native,
    Subject,
}

impl Display for ThreadKeyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Subject => write!(f, "subject"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationThread {
    pub thread_key: String,
    pub key_kind: ThreadKeyKind,
    pub subject: Option<String>,
    pub messages: Vec<Message>,
    pub participants: BTreeSet<String>,
    pub is_valid: bool,
    pub validation_errors: Vec<ThreadIssue>,
    pub warnings: Vec<ThreadWarning>,
    pub mean_relevance: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

fn reply_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*re\s*(?:\[\d+\])?\s*:\s*").expect("compile reply prefix regex")
    })
}

pub fn has_reply_marker(subject: &str) -> bool {
    reply_prefix_regex().is_match(subject)
}

/// Drops every leading reply prefix and collapses whitespace. Case is kept;
/// grouping keys lowercase the result.
pub fn normalize_subject(subject: &str) -> String {
    let mut rest = subject;
    while let Some(found) = reply_prefix_regex().find(rest) {
        rest = &rest[found.end()..];
    }
    rest.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn thread_key(message: &Message) -> (String, ThreadKeyKind) {
    if let Some(thread_id) = message
        .thread_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        return (format!("thread:{thread_id}"), ThreadKeyKind::Native);
    }

    let subject = normalize_subject(message.subject.as_deref().unwrap_or_default());
    (
        format!("subject:{}", subject.to_lowercase()),
        ThreadKeyKind::Subject,
    )
}

/// Groups, orders and validates `messages`.
///
/// Messages without a native thread id fall back to their normalized
/// subject, so unrelated conversations that share a subject end up in the
/// same thread. Threads come back newest activity first.
pub fn reconstruct(
    messages: &[Message],
    directory: &SideDirectory,
    rules: &ThreadRules,
) -> Vec<ConversationThread> {
    let mut groups: BTreeMap<(String, ThreadKeyKind), Vec<Message>> = BTreeMap::new();
    for message in messages {
        let below_floor = matches!(
            (message.relevance_score, rules.min_relevance),
            (Some(score), Some(floor)) if score < floor
        );
        if below_floor {
            continue;
        }
        groups
            .entry(thread_key(message))
            .or_default()
            .push(message.clone());
    }

    let mut threads: Vec<ConversationThread> = groups
        .into_iter()
        .map(|((thread_key, key_kind), mut messages)| {
            // undated messages sort after dated ones
            messages.sort_by(|a, b| {
                (a.sent_at.is_none(), a.sent_at, &a.provider_message_id).cmp(&(
                    b.sent_at.is_none(),
                    b.sent_at,
                    &b.provider_message_id,
                ))
            });
            build_thread(thread_key, key_kind, messages, directory, rules)
        })
        .collect();

    threads.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.thread_key.cmp(&b.thread_key))
    });
    threads
}

fn build_thread(
    thread_key: String,
    key_kind: ThreadKeyKind,
    messages: Vec<Message>,
    directory: &SideDirectory,
    rules: &ThreadRules,
) -> ConversationThread {
    let participants = messages
        .iter()
        .flat_map(|m| {
            std::iter::once(&m.sender)
                .chain(m.recipients.iter())
                .chain(m.cc_recipients.iter())
        })
        .map(|address| address.trim().to_ascii_lowercase())
        .filter(|address| !address.is_empty())
        .collect();

    let scores: Vec<f64> = messages.iter().filter_map(|m| m.relevance_score).collect();
    let mean_relevance =
        (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);

    let dated = messages.iter().filter_map(|m| m.sent_at);
    let started_at = dated.clone().min();
    let last_activity = dated.max();

    let subject = messages
        .iter()
        .find_map(|m| m.subject.as_deref())
        .map(normalize_subject)
        .filter(|s| !s.is_empty());

    let validation_errors = validate::check_issues(&messages, directory, rules);
    let warnings = validate::check_warnings(&messages, rules);

    ConversationThread {
        thread_key,
        key_kind,
        subject,
        is_valid: validation_errors.is_empty(),
        messages,
        participants,
        validation_errors,
        warnings,
        mean_relevance,
        started_at,
        last_activity,
    }
}
