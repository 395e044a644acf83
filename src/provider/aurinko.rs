use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use super::{
    ChangePage, FetchCursor, MailProvider, OutgoingMessage, ProviderError, RawAddress,
    RawAttachment, RawMessage, SentMessage, SyncSession,
};

pub const DEFAULT_API_BASE: &str = "https://api.aurinko.io/v1";
pub const DEFAULT_DAYS_WITHIN: u32 = 7;
pub const DEFAULT_BODY_TYPE: &str = "html";

const REDACTED_BODY_MAX_LEN: usize = 200;
const SNIPPET_MAX_CHARS: usize = 200;

/// Scope of a sync session: how far back to index and which body
/// representation the provider returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWindow {
    pub days_within: u32,
    pub body_type: String,
}

impl Default for SyncWindow {
    fn default() -> Self {
        Self {
            days_within: DEFAULT_DAYS_WITHIN,
            body_type: DEFAULT_BODY_TYPE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AurinkoClient {
    client: Client,
    base_url: String,
    window: SyncWindow,
}

impl Default for AurinkoClient {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE, SyncWindow::default())
    }
}

impl AurinkoClient {
    pub fn new(base_url: &str, window: SyncWindow) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            window,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        token: &str,
        what: &str,
    ) -> Result<T, ProviderError> {
        let response = request
            .bearer_auth(token)
            .header("accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(
                "{what} rejected by provider: status={} body={}",
                status,
                redact_response_body(&body)
            );
            return Err(ProviderError::Unauthorized {
                status: status.as_u16(),
                message: provider_error_message(&body),
            });
        }

        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message: provider_error_message(&body)
                    .unwrap_or_else(|| redact_response_body(&body)),
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::Decode(format!("{what}: {e}")))
    }
}

#[async_trait(?Send)]
impl MailProvider for AurinkoClient {
    async fn start_sync(&self, token: &str) -> Result<SyncSession, ProviderError> {
        let days_within = self.window.days_within.to_string();
        let request = self.client.post(self.url("email/sync")).query(&[
            ("daysWithin", days_within.as_str()),
            ("bodyType", self.window.body_type.as_str()),
        ]);

        let wire: WireSyncResponse = self.send_json(request, token, "start sync").await?;
        Ok(SyncSession {
            ready: wire.ready,
            sync_updated_token: non_empty(wire.sync_updated_token),
            sync_deleted_token: non_empty(wire.sync_deleted_token),
        })
    }

    async fn fetch_changes(
        &self,
        token: &str,
        cursor: &FetchCursor,
    ) -> Result<ChangePage, ProviderError> {
        let param = match cursor {
            FetchCursor::Delta(value) => ("deltaToken", value.as_str()),
            FetchCursor::Page(value) => ("pageToken", value.as_str()),
        };
        let request = self
            .client
            .get(self.url("email/sync/updated"))
            .query(&[param]);

        let wire: WireUpdatedResponse = self.send_json(request, token, "fetch changes").await?;
        Ok(normalize_page(wire))
    }

    async fn send_message(
        &self,
        token: &str,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, ProviderError> {
        let request = self
            .client
            .post(self.url("email/messages"))
            .json(&WireOutgoing::from(message));
        let wire: WireSentMessage = self.send_json(request, token, "send message").await?;
        Ok(wire.into())
    }

    async fn reply_to_message(
        &self,
        token: &str,
        message_id: &str,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, ProviderError> {
        let request = self
            .client
            .post(self.url(&format!("email/messages/{message_id}/reply")))
            .json(&WireOutgoing::from(message));
        let wire: WireSentMessage = self.send_json(request, token, "reply to message").await?;
        Ok(wire.into())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSyncResponse {
    #[serde(default)]
    ready: bool,
    sync_updated_token: Option<String>,
    sync_deleted_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUpdatedResponse {
    #[serde(default)]
    records: Vec<serde_json::Value>,
    next_page_token: Option<String>,
    next_delta_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireMessage {
    id: Option<String>,
    thread_id: Option<String>,
    created_time: Option<String>,
    last_modified_time: Option<String>,
    sent_at: Option<String>,
    received_at: Option<String>,
    internet_message_id: Option<String>,
    subject: Option<String>,
    #[serde(deserialize_with = "null_tolerant_list")]
    sys_labels: Vec<String>,
    #[serde(deserialize_with = "null_tolerant_list")]
    keywords: Vec<String>,
    #[serde(deserialize_with = "null_tolerant_list")]
    sys_classifications: Vec<String>,
    sensitivity: Option<String>,
    meeting_message_method: Option<String>,
    from: Option<WireAddress>,
    #[serde(deserialize_with = "null_tolerant_list")]
    to: Vec<WireAddress>,
    #[serde(deserialize_with = "null_tolerant_list")]
    cc: Vec<WireAddress>,
    #[serde(deserialize_with = "null_tolerant_list")]
    bcc: Vec<WireAddress>,
    #[serde(deserialize_with = "null_tolerant_list")]
    reply_to: Vec<WireAddress>,
    #[serde(deserialize_with = "null_as_default")]
    has_attachments: bool,
    body: Option<String>,
    body_snippet: Option<String>,
    #[serde(deserialize_with = "null_tolerant_list")]
    attachments: Vec<WireAttachment>,
    in_reply_to: Option<String>,
    references: Option<String>,
    thread_index: Option<String>,
    internet_headers: Option<serde_json::Value>,
    native_properties: Option<serde_json::Value>,
    folder_id: Option<String>,
    #[serde(deserialize_with = "null_tolerant_list")]
    omitted: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireAddress {
    name: Option<String>,
    address: Option<String>,
    raw: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireAttachment {
    id: Option<String>,
    name: Option<String>,
    mime_type: Option<String>,
    size: Option<i64>,
    #[serde(deserialize_with = "null_as_default")]
    inline: bool,
    content_id: Option<String>,
    content: Option<String>,
    content_location: Option<String>,
}

/// Providers send `null` where a field is empty; `#[serde(default)]` only
/// covers absent fields.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Like `null_as_default`, and also skips `null` entries inside the list.
fn null_tolerant_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let items = Option::<Vec<Option<T>>>::deserialize(deserializer)?;
    Ok(items.into_iter().flatten().flatten().collect())
}

#[derive(Debug, Serialize)]
struct WireRecipient<'a> {
    address: &'a str,
}

#[derive(Debug, Serialize)]
struct WireOutgoing<'a> {
    subject: &'a str,
    body: &'a str,
    to: Vec<WireRecipient<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc: Vec<WireRecipient<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc: Vec<WireRecipient<'a>>,
}

impl<'a> From<&'a OutgoingMessage> for WireOutgoing<'a> {
    fn from(message: &'a OutgoingMessage) -> Self {
        let recipients = |list: &'a [String]| -> Vec<WireRecipient<'a>> {
            list.iter()
                .map(|address| WireRecipient {
                    address: address.trim(),
                })
                .collect()
        };
        Self {
            subject: &message.subject,
            body: &message.body,
            to: recipients(&message.to),
            cc: recipients(&message.cc),
            bcc: recipients(&message.bcc),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireSentMessage {
    id: Option<String>,
    thread_id: Option<String>,
}

impl From<WireSentMessage> for SentMessage {
    fn from(wire: WireSentMessage) -> Self {
        Self {
            id: wire.id,
            thread_id: wire.thread_id,
        }
    }
}

fn normalize_page(wire: WireUpdatedResponse) -> ChangePage {
    let total = wire.records.len();
    let records: Vec<RawMessage> = wire
        .records
        .into_iter()
        .filter_map(|value| {
            let message: WireMessage = match serde_json::from_value(value) {
                Ok(message) => message,
                Err(e) => {
                    warn!("dropping undecodable provider record: {e}");
                    return None;
                }
            };
            match normalize_message(message) {
                Ok(message) => Some(message),
                Err(reason) => {
                    warn!("dropping provider record: {reason}");
                    None
                }
            }
        })
        .collect();

    if records.len() != total {
        debug!("normalized {} of {} provider records", records.len(), total);
    }

    ChangePage {
        records,
        next_delta_token: non_empty(wire.next_delta_token),
        next_page_token: non_empty(wire.next_page_token),
    }
}

fn normalize_message(wire: WireMessage) -> Result<RawMessage, String> {
    let id = non_empty(wire.id).ok_or_else(|| "record has no id".to_string())?;
    let thread_id = non_empty(wire.thread_id)
        .ok_or_else(|| format!("record {id} has no thread id"))?;

    let created = parse_timestamp(wire.created_time.as_deref());
    let modified = parse_timestamp(wire.last_modified_time.as_deref());
    let sent = parse_timestamp(wire.sent_at.as_deref());
    let received = parse_timestamp(wire.received_at.as_deref());

    let sent_at = sent
        .or(received)
        .or(created)
        .ok_or_else(|| format!("record {id} has no usable timestamp"))?;
    let received_at = received.unwrap_or(sent_at);
    let created_time = created.unwrap_or(sent_at);
    let last_modified_time = modified.unwrap_or(created_time);

    let body = non_empty(wire.body);
    let body_snippet = non_empty(wire.body_snippet)
        .or_else(|| body.as_deref().and_then(derive_snippet));

    let attachments = wire
        .attachments
        .into_iter()
        .filter_map(|attachment| {
            let attachment_id = non_empty(attachment.id.clone());
            if attachment_id.is_none() {
                warn!("dropping attachment without id on message {id}");
            }
            attachment_id.map(|attachment_id| normalize_attachment(&id, attachment_id, attachment))
        })
        .collect();

    Ok(RawMessage {
        thread_id,
        created_time,
        last_modified_time,
        sent_at,
        received_at,
        internet_message_id: non_empty(wire.internet_message_id),
        subject: wire.subject.map(|s| s.trim().to_string()).unwrap_or_default(),
        sys_labels: normalize_labels(wire.sys_labels),
        keywords: wire.keywords,
        sys_classifications: wire.sys_classifications,
        sensitivity: non_empty(wire.sensitivity),
        meeting_message_method: non_empty(wire.meeting_message_method),
        from: wire.from.map(normalize_address).unwrap_or_default(),
        to: wire.to.into_iter().map(normalize_address).collect(),
        cc: wire.cc.into_iter().map(normalize_address).collect(),
        bcc: wire.bcc.into_iter().map(normalize_address).collect(),
        reply_to: wire.reply_to.into_iter().map(normalize_address).collect(),
        has_attachments: wire.has_attachments,
        body,
        body_snippet,
        attachments,
        in_reply_to: non_empty(wire.in_reply_to),
        references: non_empty(wire.references),
        thread_index: non_empty(wire.thread_index),
        internet_headers: wire.internet_headers.filter(|v| !v.is_null()),
        native_properties: wire.native_properties.filter(|v| !v.is_null()),
        folder_id: non_empty(wire.folder_id),
        omitted: wire.omitted,
        id,
    })
}

fn normalize_labels(labels: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    labels
        .into_iter()
        .map(|label| label.trim().to_ascii_lowercase())
        .filter(|label| !label.is_empty() && seen.insert(label.clone()))
        .collect()
}

fn normalize_address(wire: WireAddress) -> RawAddress {
    let raw = non_empty(wire.raw);
    let address = non_empty(wire.address)
        .or_else(|| raw.as_deref().and_then(address_from_header))
        .unwrap_or_default();

    RawAddress {
        address,
        name: non_empty(wire.name),
        raw,
    }
}

fn normalize_attachment(
    message_id: &str,
    attachment_id: String,
    wire: WireAttachment,
) -> RawAttachment {
    let content = wire.content.as_deref().and_then(|encoded| {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        match BASE64.decode(compact.as_bytes()) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("attachment {attachment_id} on message {message_id} has undecodable content: {e}");
                None
            }
        }
    });

    let size = wire
        .size
        .unwrap_or_else(|| content.as_ref().map_or(0, |bytes| bytes.len() as i64));

    RawAttachment {
        name: wire
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| attachment_id.clone()),
        mime_type: non_empty(wire.mime_type)
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        size,
        inline: wire.inline,
        content_id: non_empty(wire.content_id),
        content,
        content_location: non_empty(wire.content_location),
        id: attachment_id,
    }
}

fn header_address_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<\s*([^<>\s]+@[^<>\s]+)\s*>|([^<>\s,;]+@[^<>\s,;]+)").ok()
    })
    .as_ref()
}

/// Pulls the mailbox out of header text like `"Jane" <jane@example.com>`.
fn address_from_header(raw: &str) -> Option<String> {
    let captures = header_address_regex()?.captures(raw)?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str().trim().to_string())
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            warn!("ignoring unparseable provider timestamp '{raw}': {e}");
            None
        }
    }
}

fn derive_snippet(body: &str) -> Option<String> {
    let text = html2text::from_read(body.as_bytes(), 10_000);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.chars().take(SNIPPET_MAX_CHARS).collect())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Picks the human-readable message out of a provider error body.
fn provider_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error", "errorMessage"]
        .iter()
        .find_map(|key| match value.get(*key) {
            Some(serde_json::Value::String(message)) if !message.trim().is_empty() => {
                Some(message.trim().to_string())
            }
            Some(serde_json::Value::Object(inner)) => inner
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string),
            _ => None,
        })
}

fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= REDACTED_BODY_MAX_LEN {
        return trimmed.to_string();
    }

    let mut cut = REDACTED_BODY_MAX_LEN;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…[truncated {} bytes]", &trimmed[..cut], trimmed.len())
}
