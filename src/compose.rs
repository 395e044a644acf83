//! Send and reply pass-through to the provider.

use thiserror::Error;
use tracing::info;

use crate::db::{AccountStore, DbError};
use crate::provider::{MailProvider, OutgoingMessage, SentMessage};

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("account not found or not authorized")]
    AccountNotFound,

    #[error(transparent)]
    Store(#[from] DbError),

    /// The provider's own message, unchanged.
    #[error("{0}")]
    Provider(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeRequest {
    pub account_id: String,
    pub user_id: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl ComposeRequest {
    fn validate(&self) -> Result<(), ComposeError> {
        if self.to.iter().all(|address| address.trim().is_empty()) {
            return Err(ComposeError::MissingField("to"));
        }
        for (field, value) in [
            ("subject", &self.subject),
            ("body", &self.body),
            ("account_id", &self.account_id),
            ("user_id", &self.user_id),
        ] {
            if value.trim().is_empty() {
                return Err(ComposeError::MissingField(field));
            }
        }
        Ok(())
    }

    fn outgoing(&self) -> OutgoingMessage {
        let clean = |list: &[String]| -> Vec<String> {
            list.iter()
                .map(|address| address.trim().to_string())
                .filter(|address| !address.is_empty())
                .collect()
        };
        OutgoingMessage {
            subject: self.subject.clone(),
            body: self.body.clone(),
            to: clean(&self.to),
            cc: clean(&self.cc),
            bcc: clean(&self.bcc),
        }
    }
}

pub async fn send_email<S, P>(
    store: &S,
    provider: &P,
    request: &ComposeRequest,
) -> Result<SentMessage, ComposeError>
where
    S: AccountStore,
    P: MailProvider + ?Sized,
{
    request.validate()?;
    let token = access_token(store, request)?;

    let sent = provider
        .send_message(&token, &request.outgoing())
        .await
        .map_err(|e| ComposeError::Provider(e.user_message()))?;
    info!("sent message from account {}", request.account_id);
    Ok(sent)
}

pub async fn send_reply<S, P>(
    store: &S,
    provider: &P,
    request: &ComposeRequest,
    message_id: &str,
) -> Result<SentMessage, ComposeError>
where
    S: AccountStore,
    P: MailProvider + ?Sized,
{
    request.validate()?;
    if message_id.trim().is_empty() {
        return Err(ComposeError::MissingField("message_id"));
    }
    let token = access_token(store, request)?;

    let sent = provider
        .reply_to_message(&token, message_id.trim(), &request.outgoing())
        .await
        .map_err(|e| ComposeError::Provider(e.user_message()))?;
    info!(
        "sent reply to {} from account {}",
        message_id.trim(),
        request.account_id
    );
    Ok(sent)
}

fn access_token<S: AccountStore>(store: &S, request: &ComposeRequest) -> Result<String, ComposeError> {
    store
        .find_account(request.account_id.trim(), request.user_id.trim())?
        .map(|account| account.access_token)
        .ok_or(ComposeError::AccountNotFound)
}
