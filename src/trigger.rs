//! Entry points for a scheduler or webhook to run a sync for one account.

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::models::Account;
use crate::db::{AccountStore, DbError, MailStore};
use crate::provider::MailProvider;
use crate::reconcile::{self, ReconcileReport};
use crate::sync::{self, SyncBatch, SyncError, SyncSettings};

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("missing required parameter: {0}")]
    MissingParameters(&'static str),

    #[error("account not found")]
    AccountNotFound,

    #[error("account lookup failed: {0}")]
    Lookup(DbError),

    #[error("sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("failed to update delta token: {0}")]
    TokenUpdate(DbError),

    #[error("failed to save emails: all {failed} messages were rejected by storage")]
    SaveEmails { failed: usize },
}

impl TriggerError {
    /// Stable code for callers that branch on the failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingParameters(_) => "MISSING_PARAMETERS",
            Self::AccountNotFound => "ACCOUNT_NOT_FOUND",
            Self::Sync(SyncError::NotInitialized) => "SYNC_NOT_INITIALIZED",
            Self::Lookup(_) | Self::Sync(_) => "FAILED_TO_SYNC",
            Self::TokenUpdate(_) => "FAILED_TO_UPDATE_TOKEN",
            Self::SaveEmails { .. } => "FAILED_TO_SAVE_EMAILS",
        }
    }

    /// Whether re-running the same trigger later may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::MissingParameters(_)
                | Self::AccountNotFound
                | Self::Sync(SyncError::NotInitialized)
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub account_id: String,
    pub records_fetched: usize,
    pub delta_token_updated: bool,
    pub report: ReconcileReport,
}

/// Bootstrap sync for an account owned by `user_id`.
pub async fn run_initial_sync<S, P>(
    store: &S,
    provider: &P,
    settings: &SyncSettings,
    account_id: &str,
    user_id: &str,
) -> Result<SyncOutcome, TriggerError>
where
    S: AccountStore + MailStore,
    P: MailProvider + ?Sized,
{
    let account = load_account(store, account_id, user_id)?;
    info!("starting initial sync for account {}", account.id);

    let batch = sync::bootstrap(provider, &account.access_token, settings).await?;
    commit(store, &account, batch)
}

/// Delta sync from the account's stored token.
pub async fn run_incremental_sync<S, P>(
    store: &S,
    provider: &P,
    account_id: &str,
    user_id: &str,
) -> Result<SyncOutcome, TriggerError>
where
    S: AccountStore + MailStore,
    P: MailProvider + ?Sized,
{
    let account = load_account(store, account_id, user_id)?;
    info!("starting incremental sync for account {}", account.id);

    let batch = sync::incremental(
        provider,
        &account.access_token,
        account.next_delta_token.as_deref(),
    )
    .await?;
    commit(store, &account, batch)
}

fn load_account<S: AccountStore>(
    store: &S,
    account_id: &str,
    user_id: &str,
) -> Result<Account, TriggerError> {
    if account_id.trim().is_empty() {
        return Err(TriggerError::MissingParameters("account_id"));
    }
    if user_id.trim().is_empty() {
        return Err(TriggerError::MissingParameters("user_id"));
    }

    store
        .find_account(account_id.trim(), user_id.trim())
        .map_err(TriggerError::Lookup)?
        .ok_or(TriggerError::AccountNotFound)
}

/// Persists the run's token, then reconciles. The token must land before any
/// mail does, so a failed write stops the run here.
fn commit<S>(store: &S, account: &Account, batch: SyncBatch) -> Result<SyncOutcome, TriggerError>
where
    S: AccountStore + MailStore,
{
    let mut delta_token_updated = false;
    if let Some(token) = batch.delta_token.as_deref() {
        store
            .store_delta_token(&account.id, token)
            .map_err(TriggerError::TokenUpdate)?;
        delta_token_updated = account.next_delta_token.as_deref() != Some(token);
    }

    let report = reconcile::reconcile(store, &batch.records, &account.id);
    if report.nothing_saved() {
        return Err(TriggerError::SaveEmails {
            failed: report.errors.len(),
        });
    }

    if let Err(error) = store.mark_synced(&account.id) {
        warn!("could not record sync time for account {}: {error}", account.id);
    }

    Ok(SyncOutcome {
        success: true,
        account_id: account.id.clone(),
        records_fetched: batch.records.len(),
        delta_token_updated,
        report,
    })
}
