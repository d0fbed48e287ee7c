pub mod json;
pub mod table;

use anyhow::Result;

use crate::db::models::{Message, Project, TeamMember};
use crate::db::DatabaseStats;
use crate::pipeline::{ImportSummary, ListenSummary, NotificationReport};
use crate::provider::WatchHandle;
use crate::threads::ConversationThread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Table
        }
    }
}

pub fn format_projects(format: OutputFormat, projects: &[Project]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_projects(projects)),
        OutputFormat::Json => json::to_pretty(projects),
    }
}

pub fn format_members(format: OutputFormat, members: &[TeamMember]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_members(members)),
        OutputFormat::Json => json::to_pretty(members),
    }
}

pub fn format_candidates(format: OutputFormat, query: &str, ids: &[String]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_candidates(query, ids)),
        OutputFormat::Json => json::format_candidates(query, ids),
    }
}

pub fn format_import(format: OutputFormat, summary: &ImportSummary) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_import(summary)),
        OutputFormat::Json => json::to_pretty(summary),
    }
}

pub fn format_notification(format: OutputFormat, report: &NotificationReport) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_notification(report)),
        OutputFormat::Json => json::to_pretty(report),
    }
}

pub fn format_listen(format: OutputFormat, summary: &ListenSummary) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_listen(summary)),
        OutputFormat::Json => json::to_pretty(summary),
    }
}

pub fn format_watch(format: OutputFormat, handle: &WatchHandle) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_watch(handle)),
        OutputFormat::Json => json::to_pretty(handle),
    }
}

pub fn format_threads(format: OutputFormat, threads: &[ConversationThread]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_threads(threads)),
        OutputFormat::Json => json::to_pretty(threads),
    }
}

pub fn format_message(format: OutputFormat, message: &Message) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_message(message)),
        OutputFormat::Json => json::to_pretty(message),
    }
}

pub fn format_stats(format: OutputFormat, stats: &DatabaseStats) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_stats(stats)),
        OutputFormat::Json => json::to_pretty(stats),
    }
}
