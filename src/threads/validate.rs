use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use regex::Regex;
use serde::Serialize;

use super::{has_reply_marker, SideDirectory, ThreadRules};
use crate::db::models::{Message, Side};

/// A failed check. Any of these makes a thread invalid.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum ThreadIssue {
    /// Fewer than two sides ever wrote in the thread.
    NotBidirectional { sides: Vec<Side> },
    /// Several messages, none of the later ones marked as a reply.
    MissingReplyMarker,
    /// A side wrote but never used any of its expected vocabulary.
    NoSideKeywords { side: Side },
}

impl Display for ThreadIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotBidirectional { sides } if sides.is_empty() => {
                write!(f, "no message from a known team member")
            }
            Self::NotBidirectional { sides } => {
                let sides: Vec<String> = sides.iter().map(ToString::to_string).collect();
                write!(f, "only {} side wrote", sides.join(", "))
            }
            Self::MissingReplyMarker => write!(f, "no later message is marked as a reply"),
            Self::NoSideKeywords { side } => {
                write!(f, "{side} messages contain none of the expected keywords")
            }
        }
    }
}

/// Flags that leave a thread valid.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum ThreadWarning {
    LongGap {
        after_message: String,
        before_message: String,
        gap_hours: f64,
    },
}

impl Display for ThreadWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LongGap {
                after_message,
                before_message,
                gap_hours,
            } => write!(
                f,
                "{gap_hours:.1}h gap between {after_message} and {before_message}"
            ),
        }
    }
}

/// `messages` must already be in thread order.
pub(super) fn check_issues(
    messages: &[Message],
    directory: &SideDirectory,
    rules: &ThreadRules,
) -> Vec<ThreadIssue> {
    let mut issues = Vec::new();

    let sides: BTreeSet<Side> = messages
        .iter()
        .filter_map(|m| directory.side_of(&m.sender))
        .collect();
    if sides.len() < 2 {
        issues.push(ThreadIssue::NotBidirectional {
            sides: sides.iter().copied().collect(),
        });
    }

    if messages.len() > 1
        && !messages
            .iter()
            .skip(1)
            .any(|m| m.subject.as_deref().is_some_and(has_reply_marker))
    {
        issues.push(ThreadIssue::MissingReplyMarker);
    }

    for side in sides {
        let keywords = rules.keywords_for(side);
        if keywords.is_empty() {
            continue;
        }

        let spoke_the_part = messages
            .iter()
            .filter(|m| directory.side_of(&m.sender) == Some(side))
            .any(|m| mentions_any(m, keywords));
        if !spoke_the_part {
            issues.push(ThreadIssue::NoSideKeywords { side });
        }
    }

    issues
}

pub(super) fn check_warnings(messages: &[Message], rules: &ThreadRules) -> Vec<ThreadWarning> {
    let dated: Vec<&Message> = messages.iter().filter(|m| m.sent_at.is_some()).collect();

    dated
        .windows(2)
        .filter_map(|pair| {
            let (earlier, later) = (pair[0], pair[1]);
            let gap = later.sent_at? - earlier.sent_at?;
            let gap_hours = gap.num_seconds() as f64 / 3600.0;
            (gap_hours > rules.max_gap_hours).then(|| ThreadWarning::LongGap {
                after_message: earlier.provider_message_id.clone(),
                before_message: later.provider_message_id.clone(),
                gap_hours,
            })
        })
        .collect()
}

fn mentions_any(message: &Message, keywords: &[String]) -> bool {
    let text = format!(
        "{}\n{}",
        message.subject.as_deref().unwrap_or_default(),
        message.body_text.as_deref().unwrap_or_default()
    );

    keywords
        .iter()
        .map(String::as_str)
        .filter_map(keyword_pattern)
        .any(|pattern| pattern.is_match(&text))
}

/// Whole-word, case-insensitive matcher; inner whitespace matches any run.
fn keyword_pattern(keyword: &str) -> Option<Regex> {
    let words: Vec<String> = keyword.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return None;
    }
    Regex::new(&format!(r"(?i)\b{}\b", words.join(r"\s+"))).ok()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{mentions_any, ThreadIssue, ThreadWarning};
    use crate::db::models::{IngestionStatus, Message, Side};
    use crate::threads::{reconstruct, SideDirectory, ThreadRules};

    fn message(id: &str, subject: &str, sender: &str, body: &str, hours: i64) -> Message {
        Message {
            provider_message_id: id.to_string(),
            thread_id: None,
            project_id: "kitchen".to_string(),
            user_id: "u".to_string(),
            sender: sender.to_string(),
            recipients: vec![],
            cc_recipients: vec![],
            sent_at: Some(
                Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + Duration::hours(hours),
            ),
            subject: Some(subject.to_string()),
            body_text: Some(body.to_string()),
            raw_content_pointer: None,
            ingestion_status: IngestionStatus::Completed,
            analysis_status: None,
            assignment_status: None,
            relevance_score: None,
            retry_count: 0,
            error_details: None,
            provider_metadata: None,
            ingested_at: None,
        }
    }

    fn directory() -> SideDirectory {
        let mut directory = SideDirectory::default();
        directory.insert("sam@build.example", Side::Contractor);
        directory.insert("owner@home.example", Side::Homeowner);
        directory
    }

    fn kitchen_quote_pair(reply_after_hours: i64) -> Vec<Message> {
        vec![
            message(
                "m-1",
                "Kitchen Quote",
                "sam@build.example",
                "Attached is the quote for cabinets and counters.",
                0,
            ),
            message(
                "m-2",
                "Re: Kitchen Quote",
                "owner@home.example",
                "Thanks, approved. When can the crew start?",
                reply_after_hours,
            ),
        ]
    }

    #[test]
    fn quote_and_reply_two_hours_apart_is_one_valid_thread() {
        let threads = reconstruct(&kitchen_quote_pair(2), &directory(), &ThreadRules::default());

        assert_eq!(threads.len(), 1);
        let thread = &threads[0];
        assert_eq!(thread.thread_key, "subject:kitchen quote");
        assert_eq!(thread.subject.as_deref(), Some("Kitchen Quote"));
        assert!(thread.is_valid, "issues: {:?}", thread.validation_errors);
        assert!(thread.warnings.is_empty());
        assert_eq!(thread.participants.len(), 2);
    }

    #[test]
    fn ten_day_gap_keeps_thread_valid_with_timing_warning() {
        let threads = reconstruct(
            &kitchen_quote_pair(24 * 10),
            &directory(),
            &ThreadRules::default(),
        );

        assert_eq!(threads.len(), 1);
        let thread = &threads[0];
        assert!(thread.is_valid);
        assert_eq!(thread.warnings.len(), 1);
        match &thread.warnings[0] {
            ThreadWarning::LongGap { gap_hours, .. } => assert_eq!(*gap_hours, 240.0),
        }
    }

    #[test]
    fn one_sided_thread_is_invalid() {
        let messages = vec![
            message("m-1", "Tile", "sam@build.example", "tile estimate", 0),
            message("m-2", "Re: Tile", "sam@build.example", "revised estimate", 1),
        ];
        let threads = reconstruct(&messages, &directory(), &ThreadRules::default());

        assert!(!threads[0].is_valid);
        assert_eq!(
            threads[0].validation_errors,
            vec![ThreadIssue::NotBidirectional {
                sides: vec![Side::Contractor]
            }]
        );
    }

    #[test]
    fn missing_reply_marker_and_vocabulary_are_reported() {
        let messages = vec![
            message("m-1", "Deck", "sam@build.example", "hello", 0),
            message("m-2", "Deck", "owner@home.example", "approved", 1),
        ];
        let threads = reconstruct(&messages, &directory(), &ThreadRules::default());

        let issues = &threads[0].validation_errors;
        assert!(issues.contains(&ThreadIssue::MissingReplyMarker));
        assert!(issues.contains(&ThreadIssue::NoSideKeywords {
            side: Side::Contractor
        }));
        assert!(!issues.contains(&ThreadIssue::NoSideKeywords {
            side: Side::Homeowner
        }));
    }

    #[test]
    fn gap_threshold_is_configurable() {
        let rules = ThreadRules {
            max_gap_hours: 1.0,
            ..ThreadRules::default()
        };
        let threads = reconstruct(&kitchen_quote_pair(2), &directory(), &rules);
        assert_eq!(threads[0].warnings.len(), 1);
        assert!(threads[0].is_valid);
    }

    #[test]
    fn keywords_match_whole_words_only() {
        let keywords = vec!["crew".to_string(), "when".to_string()];
        let body = "Bought screws. Call whenever.";
        let screws = message("m-1", "Deck", "sam@build.example", body, 0);
        assert!(!mentions_any(&screws, &keywords));

        let crew = message("m-2", "Deck", "sam@build.example", "The Crew arrives Monday.", 0);
        assert!(mentions_any(&crew, &keywords));
    }

    #[test]
    fn multi_word_keywords_tolerate_line_breaks() {
        let keywords = vec!["change order".to_string(), "  ".to_string()];
        let wrapped = message("m-1", "Deck", "sam@build.example", "Signed the change\norder.", 0);
        assert!(mentions_any(&wrapped, &keywords));

        let partial = message("m-2", "Deck", "sam@build.example", "No changes ordered.", 0);
        assert!(!mentions_any(&partial, &keywords));
    }
}
