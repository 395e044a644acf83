use std::fmt::{Display, Formatter};
use std::str::FromStr;

use rusqlite::{Result as SqlResult, Row};
use serde::{Deserialize, Serialize};

/// Folder classification of a single email, and the aggregated status of a
/// thread.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FolderLabel {
    Inbox,
    Sent,
    Draft,
}

impl FolderLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Sent => "sent",
            Self::Draft => "draft",
        }
    }
}

impl Display for FolderLabel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FolderLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inbox" => Ok(Self::Inbox),
            "sent" => Ok(Self::Sent),
            "draft" | "drafts" => Ok(Self::Draft),
            other => Err(format!("invalid folder label: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub email_address: String,
    pub name: Option<String>,
    pub access_token: String,
    pub next_delta_token: Option<String>,
    pub last_sync: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailAddress {
    pub id: String,
    pub account_id: String,
    pub address: String,
    pub name: Option<String>,
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thread {
    pub id: String,
    pub account_id: String,
    pub subject: String,
    pub last_message_date: String,
    pub inbox_status: bool,
    pub sent_status: bool,
    pub draft_status: bool,
    pub done: bool,
    pub participant_ids: Vec<String>,
}

impl Thread {
    /// The single folder a thread is listed under, if its flags are consistent.
    pub fn folder(&self) -> Option<FolderLabel> {
        match (self.inbox_status, self.sent_status, self.draft_status) {
            (true, false, false) => Some(FolderLabel::Inbox),
            (false, true, false) => Some(FolderLabel::Sent),
            (false, false, true) => Some(FolderLabel::Draft),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Email {
    pub id: String,
    pub thread_id: String,
    pub created_time: String,
    pub last_modified_time: String,
    pub sent_at: String,
    pub received_at: String,
    pub internet_message_id: Option<String>,
    pub subject: String,
    pub body: Option<String>,
    pub body_snippet: Option<String>,
    pub email_label: FolderLabel,
    pub sys_labels: Vec<String>,
    pub keywords: Vec<String>,
    pub sys_classifications: Vec<String>,
    pub sensitivity: Option<String>,
    pub meeting_message_method: Option<String>,
    pub has_attachments: bool,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub thread_index: Option<String>,
    pub internet_headers: Option<serde_json::Value>,
    pub native_properties: Option<serde_json::Value>,
    pub folder_id: Option<String>,
    pub omitted: Vec<String>,
    pub from_id: String,
}

/// Email joined with its sender, as shown in thread views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailWithSender {
    #[serde(flatten)]
    pub email: Email,
    pub from: EmailAddress,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    To,
    Cc,
    Bcc,
    ReplyTo,
}

impl RecipientRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::To => "to",
            Self::Cc => "cc",
            Self::Bcc => "bcc",
            Self::ReplyTo => "reply_to",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailAttachment {
    pub id: String,
    pub email_id: String,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    pub inline: bool,
    pub content_id: Option<String>,
    pub content: Option<Vec<u8>>,
    pub content_location: Option<String>,
}

pub(crate) fn parse_json_array(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str::<Vec<String>>(&s).ok())
        .unwrap_or_default()
}

fn parse_json_value(raw: Option<String>) -> Option<serde_json::Value> {
    raw.and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
}

fn conversion_error(raw: &str, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        raw.len(),
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

impl Account {
    /// Reads an account row. The access token column is returned as stored;
    /// unsealing happens in the database layer.
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            email_address: row.get("email_address")?,
            name: row.get("name")?,
            access_token: row.get("access_token")?,
            next_delta_token: row.get("next_delta_token")?,
            last_sync: row.get("last_sync")?,
        })
    }
}

impl EmailAddress {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            address: row.get("address")?,
            name: row.get("name")?,
            raw: row.get("raw")?,
        })
    }
}

impl Thread {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            subject: row.get("subject")?,
            last_message_date: row.get("last_message_date")?,
            inbox_status: row.get("inbox_status")?,
            sent_status: row.get("sent_status")?,
            draft_status: row.get("draft_status")?,
            done: row.get("done")?,
            participant_ids: parse_json_array(row.get("participant_ids")?),
        })
    }
}

impl Email {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        let label_raw: String = row.get("email_label")?;
        let email_label = FolderLabel::from_str(&label_raw)
            .map_err(|e| conversion_error(&label_raw, e))?;

        Ok(Self {
            id: row.get("id")?,
            thread_id: row.get("thread_id")?,
            created_time: row.get("created_time")?,
            last_modified_time: row.get("last_modified_time")?,
            sent_at: row.get("sent_at")?,
            received_at: row.get("received_at")?,
            internet_message_id: row.get("internet_message_id")?,
            subject: row.get("subject")?,
            body: row.get("body")?,
            body_snippet: row.get("body_snippet")?,
            email_label,
            sys_labels: parse_json_array(row.get("sys_labels")?),
            keywords: parse_json_array(row.get("keywords")?),
            sys_classifications: parse_json_array(row.get("sys_classifications")?),
            sensitivity: row.get("sensitivity")?,
            meeting_message_method: row.get("meeting_message_method")?,
            has_attachments: row.get("has_attachments")?,
            in_reply_to: row.get("in_reply_to")?,
            references: row.get("references_header")?,
            thread_index: row.get("thread_index")?,
            internet_headers: parse_json_value(row.get("internet_headers")?),
            native_properties: parse_json_value(row.get("native_properties")?),
            folder_id: row.get("folder_id")?,
            omitted: parse_json_array(row.get("omitted")?),
            from_id: row.get("from_id")?,
        })
    }
}

impl EmailAttachment {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            email_id: row.get("email_id")?,
            name: row.get("name")?,
            mime_type: row.get("mime_type")?,
            size: row.get("size")?,
            inline: row.get("inline")?,
            content_id: row.get("content_id")?,
            content: row.get("content")?,
            content_location: row.get("content_location")?,
        })
    }
}
