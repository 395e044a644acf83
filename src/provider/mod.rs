//! Remote mail provider boundary.
//!
//! Everything the rest of the crate sees from the provider has already been
//! normalized into the fixed shapes below; wire JSON never leaves the
//! provider implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub mod aurinko;

pub use aurinko::AurinkoClient;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider rejected the access token (status {status})")]
    Unauthorized {
        status: u16,
        message: Option<String>,
    },

    #[error("provider returned status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("could not decode provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// The message a caller can show to a user as-is.
    pub fn user_message(&self) -> String {
        match self {
            Self::Http { message, .. } => message.clone(),
            Self::Unauthorized {
                message: Some(message),
                ..
            } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSession {
    pub ready: bool,
    pub sync_updated_token: Option<String>,
    pub sync_deleted_token: Option<String>,
}

/// Position in the change feed for one fetch. A delta token opens a fresh
/// incremental window; a page token continues the page sequence of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchCursor {
    Delta(String),
    Page(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangePage {
    pub records: Vec<RawMessage>,
    pub next_delta_token: Option<String>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawAddress {
    pub address: String,
    pub name: Option<String>,
    pub raw: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttachment {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    pub inline: bool,
    pub content_id: Option<String>,
    pub content: Option<Vec<u8>>,
    pub content_location: Option<String>,
}

/// A provider message after validation at the client boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub id: String,
    pub thread_id: String,
    pub created_time: DateTime<Utc>,
    pub last_modified_time: DateTime<Utc>,
    pub sent_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub internet_message_id: Option<String>,
    pub subject: String,
    pub sys_labels: Vec<String>,
    pub keywords: Vec<String>,
    pub sys_classifications: Vec<String>,
    pub sensitivity: Option<String>,
    pub meeting_message_method: Option<String>,
    pub from: RawAddress,
    pub to: Vec<RawAddress>,
    pub cc: Vec<RawAddress>,
    pub bcc: Vec<RawAddress>,
    pub reply_to: Vec<RawAddress>,
    pub has_attachments: bool,
    pub body: Option<String>,
    pub body_snippet: Option<String>,
    pub attachments: Vec<RawAttachment>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub thread_index: Option<String>,
    pub internet_headers: Option<serde_json::Value>,
    pub native_properties: Option<serde_json::Value>,
    pub folder_id: Option<String>,
    pub omitted: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub subject: String,
    pub body: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SentMessage {
    pub id: Option<String>,
    pub thread_id: Option<String>,
}

/// Mail provider sync and send protocol. The bearer token is supplied per
/// call; implementations hold no account state.
#[async_trait(?Send)]
pub trait MailProvider {
    /// Asks the provider to start indexing a mailbox. May report not ready.
    async fn start_sync(&self, token: &str) -> Result<SyncSession, ProviderError>;

    async fn fetch_changes(
        &self,
        token: &str,
        cursor: &FetchCursor,
    ) -> Result<ChangePage, ProviderError>;

    async fn send_message(
        &self,
        token: &str,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, ProviderError>;

    async fn reply_to_message(
        &self,
        token: &str,
        message_id: &str,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, ProviderError>;
}
