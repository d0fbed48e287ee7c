use std::collections::HashSet;

use chrono::{Days, NaiveDate};
use tracing::{debug, info};

use crate::provider::{MailProvider, MAX_PAGE_SIZE};

use super::error::IngestError;

pub const DEFAULT_MAX_RESULTS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub start: NaiveDate,
    /// Inclusive.
    pub end: NaiveDate,
    pub keywords: Vec<String>,
    pub senders: Vec<String>,
    pub max_results: usize,
}

impl DiscoveryRequest {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            keywords: Vec::new(),
            senders: Vec::new(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.start > self.end {
            return Err(IngestError::InvalidRequest(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        if self.max_results == 0 {
            return Err(IngestError::InvalidRequest(
                "max_results must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn quote_term(term: &str) -> Option<String> {
    let cleaned = term.replace(['"', '(', ')'], " ");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        None
    } else if cleaned.contains(' ') {
        Some(format!("\"{cleaned}\""))
    } else {
        Some(cleaned)
    }
}

/// Search expression for the request window. `before:` is exclusive, so the
/// inclusive end date is pushed one day forward.
pub fn build_query(request: &DiscoveryRequest) -> String {
    let before = request
        .end
        .checked_add_days(Days::new(1))
        .unwrap_or(request.end);
    let mut clauses = vec![
        format!("after:{}", request.start.format("%Y/%m/%d")),
        format!("before:{}", before.format("%Y/%m/%d")),
    ];

    let keywords: Vec<String> = request.keywords.iter().filter_map(|k| quote_term(k)).collect();
    if !keywords.is_empty() {
        clauses.push(format!("({})", keywords.join(" OR ")));
    }

    let senders: Vec<&str> = request
        .senders
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if !senders.is_empty() {
        clauses.push(format!("from:({})", senders.join(" OR ")));
    }

    clauses.join(" ")
}

/// Collects candidate ids for the window, in the provider's order, without
/// repeats. Any provider error fails the whole call.
pub async fn discover(
    provider: &dyn MailProvider,
    request: &DiscoveryRequest,
) -> Result<Vec<String>, IngestError> {
    request.validate()?;

    let query = build_query(request);
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0usize;

    while ids.len() < request.max_results {
        let page_size = (request.max_results - ids.len()).min(MAX_PAGE_SIZE);
        let page = provider
            .search_page(&query, page_token.as_deref(), page_size)
            .await
            .map_err(IngestError::Discovery)?;
        pages += 1;

        for id in page.ids {
            if ids.len() >= request.max_results {
                break;
            }
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
        debug!(page = pages, collected = ids.len(), "discovery page");

        match page.next_page_token {
            Some(next) if page_token.as_deref() != Some(next.as_str()) => page_token = Some(next),
            _ => break,
        }
    }

    info!(query = %query, candidates = ids.len(), pages, "discovery finished");
    Ok(ids)
}
