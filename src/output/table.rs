use chrono::{DateTime, Utc};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::db::models::{Message, Project, TeamMember};
use crate::db::DatabaseStats;
use crate::pipeline::{ImportSummary, ListenSummary, NotificationReport, OutcomeTally};
use crate::provider::WatchHandle;
use crate::threads::ConversationThread;

const SENDER_WIDTH: usize = 28;
const SUBJECT_WIDTH: usize = 48;
const DATE_WIDTH: usize = 12;

pub fn format_projects(projects: &[Project]) -> String {
    if projects.is_empty() {
        return "No projects configured.".to_string();
    }

    let mut out = String::new();
    out.push_str("Project               Mailbox                       Keywords\n");
    out.push_str("--------------------  ----------------------------  --------------------\n");
    for project in projects {
        out.push_str(&format!(
            "{:<20}  {:<28}  {}\n",
            truncate_for_width(&project.project_id, 20),
            truncate_for_width(&project.mailbox, 28),
            if project.keywords.is_empty() {
                "-".to_string()
            } else {
                project.keywords.join(", ")
            }
        ));
    }
    out
}

pub fn format_members(members: &[TeamMember]) -> String {
    if members.is_empty() {
        return "No team members.".to_string();
    }

    let mut out = String::new();
    out.push_str("Member                        Side\n");
    out.push_str("----------------------------  ----------\n");
    for member in members {
        let label = match &member.display_name {
            Some(name) => format!("{name} <{}>", member.email_address),
            None => member.email_address.clone(),
        };
        out.push_str(&format!(
            "{:<28}  {}\n",
            truncate_for_width(&label, 28),
            member.side
        ));
    }
    out
}

pub fn format_candidates(query: &str, ids: &[String]) -> String {
    let mut out = format!("Query: {query}\nCandidates: {}\n", ids.len());
    for id in ids {
        out.push_str(&format!("  {id}\n"));
    }
    out
}

fn push_outcomes(out: &mut String, outcomes: &OutcomeTally) {
    out.push_str(&format!("Persisted:          {}\n", outcomes.persisted));
    out.push_str(&format!("Skipped duplicate:  {}\n", outcomes.skipped_duplicate));
    out.push_str(&format!("Skipped non-member: {}\n", outcomes.skipped_non_member));
    if outcomes.skipped_exhausted > 0 {
        out.push_str(&format!("Skipped exhausted:  {}\n", outcomes.skipped_exhausted));
    }
    out.push_str(&format!("Failed:             {}\n", outcomes.failed));
}

fn push_errors(out: &mut String, errors: &[String]) {
    if errors.is_empty() {
        return;
    }
    out.push('\n');
    out.push_str("Errors\n");
    out.push_str("------\n");
    for error in errors {
        out.push_str(&format!("- {error}\n"));
    }
}

pub fn format_import(summary: &ImportSummary) -> String {
    let mut out = String::new();
    if summary.cancelled {
        out.push_str("Import stopped early\n");
    } else {
        out.push_str("Import complete\n");
    }
    out.push_str(&format!("Project:            {}\n", summary.project_id));
    out.push_str(&format!(
        "Processed:          {}/{}\n",
        summary.processed, summary.total_candidates
    ));
    out.push_str(&format!(
        "Batches:            {}/{}\n",
        summary.batches_completed, summary.total_batches
    ));
    push_outcomes(&mut out, &summary.outcomes);
    out.push_str(&format!("Elapsed:            {}ms\n", summary.elapsed_ms));
    push_errors(&mut out, &summary.errors);
    out
}

pub fn format_notification(report: &NotificationReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Notification for {} (project {})\n",
        report.mailbox, report.project_id
    ));
    let previous = report
        .previous_cursor
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string());
    out.push_str(&format!(
        "Cursor:             {previous} -> {}{}\n",
        report.cursor,
        if report.baseline { " (baseline)" } else { "" }
    ));
    out.push_str(&format!("Changed messages:   {}\n", report.message_ids));
    push_outcomes(&mut out, &report.outcomes);
    out.push_str(&format!(
        "Latency:            {}ms{}\n",
        report.latency_ms,
        if report.over_latency_budget {
            " (over budget)"
        } else {
            ""
        }
    ));
    push_errors(&mut out, &report.errors);
    out
}

pub fn format_listen(summary: &ListenSummary) -> String {
    let mut out = String::new();
    out.push_str("Listener stopped\n");
    out.push_str(&format!("Received:           {}\n", summary.received));
    out.push_str(&format!("Handled:            {}\n", summary.handled));
    out.push_str(&format!("Rejected:           {}\n", summary.rejected));
    push_outcomes(&mut out, &summary.outcomes);
    out
}

pub fn format_watch(handle: &WatchHandle) -> String {
    format!(
        "Watching {}\nCursor:  {}\nTopic:   {}\nExpires: {}\n",
        handle.mailbox,
        handle.cursor,
        handle.topic.as_deref().unwrap_or("-"),
        handle
            .expires_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    )
}

pub fn format_threads(threads: &[ConversationThread]) -> String {
    if threads.is_empty() {
        return "No threads found.".to_string();
    }

    let mut out = String::new();
    for (idx, thread) in threads.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        let status = if thread.is_valid { "valid" } else { "invalid" };
        out.push_str(&format!(
            "{} [{}] {} ({} messages, {})\n",
            thread.subject.as_deref().unwrap_or("(no subject)"),
            thread.key_kind,
            status,
            thread.messages.len(),
            thread
                .last_activity
                .as_ref()
                .map(relative_date)
                .unwrap_or_else(|| "undated".to_string())
        ));
        if let Some(mean) = thread.mean_relevance {
            out.push_str(&format!("  relevance {mean:.2}\n"));
        }
        for message in &thread.messages {
            out.push_str(&format!(
                "  {:<sender$}  {:<subject$}  {:<date$}\n",
                truncate_for_width(&message.sender, SENDER_WIDTH),
                truncate_for_width(
                    message.subject.as_deref().unwrap_or("(no subject)"),
                    SUBJECT_WIDTH
                ),
                message
                    .sent_at
                    .as_ref()
                    .map(relative_date)
                    .unwrap_or_else(|| "-".to_string()),
                sender = SENDER_WIDTH,
                subject = SUBJECT_WIDTH,
                date = DATE_WIDTH
            ));
        }
        for issue in &thread.validation_errors {
            out.push_str(&format!("  ! {issue}\n"));
        }
        for warning in &thread.warnings {
            out.push_str(&format!("  ~ {warning}\n"));
        }
    }
    out
}

pub fn format_message(message: &Message) -> String {
    let mut out = String::new();
    out.push_str(&format!("ID: {}\n", message.provider_message_id));
    out.push_str(&format!(
        "Subject: {}\n",
        message.subject.as_deref().unwrap_or("(no subject)")
    ));
    out.push_str(&format!("From: {}\n", message.sender));
    if !message.recipients.is_empty() {
        out.push_str(&format!("To: {}\n", message.recipients.join(", ")));
    }
    if !message.cc_recipients.is_empty() {
        out.push_str(&format!("CC: {}\n", message.cc_recipients.join(", ")));
    }
    if let Some(sent_at) = &message.sent_at {
        out.push_str(&format!("Date: {} ({})\n", sent_at.to_rfc3339(), relative_date(sent_at)));
    }
    out.push_str(&format!("Status: {}\n", message.ingestion_status));
    if let Some(score) = message.relevance_score {
        out.push_str(&format!("Relevance: {score:.2}\n"));
    }
    out
}

pub fn format_stats(stats: &DatabaseStats) -> String {
    let mut out = String::new();
    out.push_str("remail stats\n");
    out.push_str("============\n");
    out.push_str(&format!("Projects: {}\n", stats.total_projects));
    out.push_str(&format!("Members:  {}\n", stats.total_members));
    out.push_str(&format!("Messages: {}\n", stats.total_messages));

    if !stats.messages_by_status.is_empty() {
        out.push('\n');
        out.push_str("Messages by status\n");
        out.push_str("------------------\n");
        for row in &stats.messages_by_status {
            out.push_str(&format!("{:<24} {:>8}\n", row.status, row.count));
        }
    }

    if !stats.messages_by_project.is_empty() {
        out.push('\n');
        out.push_str("Messages by project\n");
        out.push_str("-------------------\n");
        for row in &stats.messages_by_project {
            out.push_str(&format!("{:<24} {:>8}\n", row.project_id, row.count));
        }
    }

    out
}

fn relative_date(value: &DateTime<Utc>) -> String {
    let delta = Utc::now().signed_duration_since(*value);
    if delta.num_seconds() < 0 {
        return "in future".to_string();
    }
    if delta.num_minutes() < 1 {
        return "just now".to_string();
    }
    if delta.num_hours() < 1 {
        return format!("{}m ago", delta.num_minutes());
    }
    if delta.num_hours() < 24 {
        return format!("{}h ago", delta.num_hours());
    }
    if delta.num_days() == 1 {
        return "yesterday".to_string();
    }
    if delta.num_days() < 7 {
        return format!("{}d ago", delta.num_days());
    }
    value.format("%Y-%m-%d").to_string()
}

fn truncate_for_width(value: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(value) <= max_width {
        return value.to_string();
    }

    if max_width <= 1 {
        return "…".to_string();
    }

    let mut out = String::new();
    let mut width = 0usize;
    for c in value.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw + 1 > max_width {
            break;
        }
        out.push(c);
        width += cw;
    }
    out.push('…');
    out
}
