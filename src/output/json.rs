use anyhow::Result;

use crate::db::models::Thread;
use crate::db::{DatabaseStats, ThreadView};
use crate::output::AccountSummary;
use crate::trigger::SyncOutcome;

pub fn format_threads(threads: &[ThreadView]) -> Result<String> {
    Ok(serde_json::to_string_pretty(threads)?)
}

pub fn format_thread(thread: &ThreadView) -> Result<String> {
    Ok(serde_json::to_string_pretty(thread)?)
}

pub fn format_search_results(threads: &[Thread]) -> Result<String> {
    Ok(serde_json::to_string_pretty(threads)?)
}

pub fn format_accounts(accounts: &[AccountSummary]) -> Result<String> {
    Ok(serde_json::to_string_pretty(accounts)?)
}

pub fn format_sync_outcome(outcome: &SyncOutcome) -> Result<String> {
    Ok(serde_json::to_string_pretty(outcome)?)
}

pub fn format_stats(stats: &DatabaseStats) -> Result<String> {
    Ok(serde_json::to_string_pretty(stats)?)
}
