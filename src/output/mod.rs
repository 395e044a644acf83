pub mod json;
pub mod table;

use anyhow::Result;
use serde::Serialize;

use crate::db::models::{Account, Thread};
use crate::db::{DatabaseStats, ThreadView};
use crate::trigger::SyncOutcome;

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

/// Account as shown to users; the bearer token never leaves the store.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub id: String,
    pub user_id: String,
    pub email_address: String,
    pub name: Option<String>,
    pub sync_initialized: bool,
    pub last_sync: Option<String>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            user_id: account.user_id.clone(),
            email_address: account.email_address.clone(),
            name: account.name.clone(),
            sync_initialized: account.next_delta_token.is_some(),
            last_sync: account.last_sync.clone(),
        }
    }
}

pub fn format_threads(format: OutputFormat, threads: &[ThreadView]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_threads(threads)),
        OutputFormat::Json => json::format_threads(threads),
    }
}

pub fn format_thread(format: OutputFormat, thread: &ThreadView) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_thread(thread)),
        OutputFormat::Json => json::format_thread(thread),
    }
}

pub fn format_search_results(format: OutputFormat, threads: &[Thread]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_search_results(threads)),
        OutputFormat::Json => json::format_search_results(threads),
    }
}

pub fn format_accounts(format: OutputFormat, accounts: &[Account]) -> Result<String> {
    let summaries: Vec<AccountSummary> = accounts.iter().map(AccountSummary::from).collect();
    match format {
        OutputFormat::Table => Ok(table::format_accounts(&summaries)),
        OutputFormat::Json => json::format_accounts(&summaries),
    }
}

pub fn format_sync_outcome(format: OutputFormat, outcome: &SyncOutcome) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_sync_outcome(outcome)),
        OutputFormat::Json => json::format_sync_outcome(outcome),
    }
}

pub fn format_stats(format: OutputFormat, stats: &DatabaseStats) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_stats(stats)),
        OutputFormat::Json => json::format_stats(stats),
    }
}
