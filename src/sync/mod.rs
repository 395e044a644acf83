//! Drives the provider change feed for one account.
//!
//! Both entry points only collect: they return every record of the run and
//! the delta token to store. Persisting and reconciling belong to the caller,
//! so a run that fails partway leaves nothing behind.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::provider::{FetchCursor, MailProvider, ProviderError, RawMessage};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    /// Total `start_sync` calls allowed before the bootstrap gives up.
    pub max_poll_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    NotStarted,
    PollingReady,
    Fetching,
    Done,
    Failed,
}

impl Display for SyncPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::NotStarted => "not_started",
            Self::PollingReady => "polling_ready",
            Self::Fetching => "fetching",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync session was not ready after {attempts} attempts")]
    NotReady { attempts: u32 },

    #[error("account has no stored delta token; run an initial sync first")]
    NotInitialized,

    #[error("provider reported the session ready without a delta token")]
    MissingSessionToken,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Everything one run collected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncBatch {
    pub records: Vec<RawMessage>,
    /// Token marking "caught up" after this run: the last one the provider
    /// issued, else the token the run started from.
    pub delta_token: Option<String>,
}

struct PhaseLog {
    label: &'static str,
    phase: SyncPhase,
}

impl PhaseLog {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            phase: SyncPhase::NotStarted,
        }
    }

    fn enter(&mut self, next: SyncPhase) {
        debug!("{} sync: {} -> {}", self.label, self.phase, next);
        self.phase = next;
    }

    fn finish<T>(&mut self, result: Result<T, SyncError>) -> Result<T, SyncError> {
        match &result {
            Ok(_) => self.enter(SyncPhase::Done),
            Err(error) => {
                warn!("{} sync failed during {}: {error}", self.label, self.phase);
                self.enter(SyncPhase::Failed);
            }
        }
        result
    }
}

/// Full initial sync: waits for the provider to finish indexing, then drains
/// every page of the first window.
pub async fn bootstrap<P>(
    provider: &P,
    token: &str,
    settings: &SyncSettings,
) -> Result<SyncBatch, SyncError>
where
    P: MailProvider + ?Sized,
{
    let mut phases = PhaseLog::new("bootstrap");
    let result = run_bootstrap(provider, token, settings, &mut phases).await;
    phases.finish(result)
}

async fn run_bootstrap<P>(
    provider: &P,
    token: &str,
    settings: &SyncSettings,
    phases: &mut PhaseLog,
) -> Result<SyncBatch, SyncError>
where
    P: MailProvider + ?Sized,
{
    phases.enter(SyncPhase::PollingReady);

    let max_attempts = settings.max_poll_attempts.max(1);
    let mut attempts = 0u32;
    let session = loop {
        attempts += 1;
        let session = provider.start_sync(token).await?;
        if session.ready {
            debug!("sync session ready after {attempts} attempt(s)");
            break session;
        }
        if attempts >= max_attempts {
            return Err(SyncError::NotReady { attempts });
        }
        sleep(settings.poll_interval).await;
    };

    let start_token = session
        .sync_updated_token
        .ok_or(SyncError::MissingSessionToken)?;

    phases.enter(SyncPhase::Fetching);
    drain(provider, token, start_token).await
}

/// Delta sync from the account's stored token.
pub async fn incremental<P>(
    provider: &P,
    token: &str,
    delta_token: Option<&str>,
) -> Result<SyncBatch, SyncError>
where
    P: MailProvider + ?Sized,
{
    let mut phases = PhaseLog::new("incremental");
    let result = match delta_token.map(str::trim).filter(|t| !t.is_empty()) {
        Some(delta_token) => {
            phases.enter(SyncPhase::Fetching);
            drain(provider, token, delta_token.to_string()).await
        }
        None => Err(SyncError::NotInitialized),
    };
    phases.finish(result)
}

/// Fetches the window opened by `start_token` and every page after it.
async fn drain<P>(provider: &P, token: &str, start_token: String) -> Result<SyncBatch, SyncError>
where
    P: MailProvider + ?Sized,
{
    let mut delta_token = Some(start_token.clone());
    let mut cursor = FetchCursor::Delta(start_token);
    let mut records = Vec::new();
    let mut pages = 0usize;

    loop {
        let page = provider.fetch_changes(token, &cursor).await?;
        pages += 1;
        records.extend(page.records);

        if let Some(next_delta) = page.next_delta_token {
            delta_token = Some(next_delta);
        }

        match page.next_page_token {
            Some(next_page) => cursor = FetchCursor::Page(next_page),
            None => break,
        }
    }

    info!(
        "fetched {} records across {} page(s)",
        records.len(),
        pages
    );
    Ok(SyncBatch {
        records,
        delta_token,
    })
}
