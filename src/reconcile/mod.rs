//! Folds raw provider messages into the local mail store.
//!
//! Each message is applied as one atomic unit. A message that fails is
//! rolled back and reported, and the rest of the batch carries on.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::models::{Email, EmailAttachment, FolderLabel};
use crate::db::{AddressInput, DbError, MailStore, Recipients, ThreadUpsert, UpsertOutcome};
use crate::provider::{RawAddress, RawMessage};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("sender address '{0}' could not be resolved")]
    UnresolvedSender(String),

    #[error(transparent)]
    Store(#[from] DbError),
}

impl ReconcileError {
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileFailure {
    pub message_id: String,
    pub reason: String,
    pub storage: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub messages_processed: usize,
    pub emails_added: usize,
    pub emails_updated: usize,
    pub errors: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    /// True when a non-empty batch committed nothing because every message
    /// hit a storage failure.
    pub fn nothing_saved(&self) -> bool {
        self.messages_processed > 0
            && self.errors.len() == self.messages_processed
            && self.errors.iter().all(|failure| failure.storage)
    }
}

/// Maps a message's system labels to its folder.
pub fn classify_folder(sys_labels: &[String]) -> FolderLabel {
    let has = |wanted: &str| {
        sys_labels
            .iter()
            .any(|label| label.trim().eq_ignore_ascii_case(wanted))
    };

    if has("inbox") || has("important") {
        FolderLabel::Inbox
    } else if has("sent") {
        FolderLabel::Sent
    } else if has("draft") {
        FolderLabel::Draft
    } else {
        FolderLabel::Inbox
    }
}

/// Aggregates member email folders into the thread's folder.
/// Precedence is inbox, then draft, then sent.
pub fn thread_folder<I>(labels: I) -> FolderLabel
where
    I: IntoIterator<Item = FolderLabel>,
{
    let mut saw_draft = false;
    for label in labels {
        match label {
            FolderLabel::Inbox => return FolderLabel::Inbox,
            FolderLabel::Draft => saw_draft = true,
            FolderLabel::Sent => {}
        }
    }

    if saw_draft {
        FolderLabel::Draft
    } else {
        FolderLabel::Sent
    }
}

pub fn reconcile<S: MailStore>(
    store: &S,
    records: &[RawMessage],
    account_id: &str,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for message in records {
        report.messages_processed += 1;

        let result = store.atomically(|store| reconcile_message(store, message, account_id));
        match result {
            Ok(UpsertOutcome::Created) => report.emails_added += 1,
            Ok(UpsertOutcome::Updated) => report.emails_updated += 1,
            Err(error) => {
                warn!("skipping message {}: {error}", message.id);
                report.errors.push(ReconcileFailure {
                    message_id: message.id.clone(),
                    reason: error.to_string(),
                    storage: error.is_storage(),
                });
            }
        }
    }

    info!(
        "reconciled {} messages for account {}: {} added, {} updated, {} failed",
        report.messages_processed,
        account_id,
        report.emails_added,
        report.emails_updated,
        report.errors.len()
    );
    report
}

fn reconcile_message<S: MailStore>(
    store: &S,
    message: &RawMessage,
    account_id: &str,
) -> Result<UpsertOutcome, ReconcileError> {
    let label = classify_folder(&message.sys_labels);

    let mut observed: HashMap<&str, &RawAddress> = HashMap::new();
    for entry in message_addresses(message) {
        let key = entry.address.trim();
        if !key.is_empty() {
            observed.insert(key, entry);
        }
    }

    let mut stored: HashMap<&str, String> = HashMap::with_capacity(observed.len());
    for (key, entry) in &observed {
        let input = AddressInput {
            address: key.to_string(),
            name: entry.name.clone(),
            raw: entry.raw.clone(),
        };
        match store.upsert_address(account_id, &input) {
            Ok(address) => {
                stored.insert(*key, address.id);
            }
            Err(DbError::InvalidAddress(address)) => {
                debug!("ignoring invalid address '{address}' on message {}", message.id);
            }
            Err(error) => return Err(error.into()),
        }
    }

    let resolve = |entries: &[RawAddress]| -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for entry in entries {
            if let Some(id) = stored.get(entry.address.trim()) {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        }
        ids
    };

    let from_id = stored
        .get(message.from.address.trim())
        .cloned()
        .ok_or_else(|| ReconcileError::UnresolvedSender(message.from.address.clone()))?;

    let recipients = Recipients {
        to: resolve(&message.to),
        cc: resolve(&message.cc),
        bcc: resolve(&message.bcc),
        reply_to: resolve(&message.reply_to),
    };

    let mut participant_ids = vec![from_id.clone()];
    for id in recipients
        .to
        .iter()
        .chain(&recipients.cc)
        .chain(&recipients.bcc)
    {
        if !participant_ids.contains(id) {
            participant_ids.push(id.clone());
        }
    }

    store.upsert_thread(&ThreadUpsert {
        id: message.thread_id.clone(),
        account_id: account_id.to_string(),
        subject: message.subject.clone(),
        last_message_date: stamp(message.sent_at),
        participant_ids,
        initial_label: label,
    })?;

    let previous_thread = store.thread_of_email(&message.id)?;
    let outcome = store.upsert_email(&email_record(message, label, from_id), &recipients)?;

    refresh_thread_folder(store, &message.thread_id)?;
    if let Some(previous) = previous_thread.filter(|previous| *previous != message.thread_id) {
        debug!(
            "message {} moved from thread {previous} to {}",
            message.id, message.thread_id
        );
        refresh_thread_folder(store, &previous)?;
    }

    for attachment in &message.attachments {
        store.upsert_attachment(&EmailAttachment {
            id: attachment.id.clone(),
            email_id: message.id.clone(),
            name: attachment.name.clone(),
            mime_type: attachment.mime_type.clone(),
            size: attachment.size,
            inline: attachment.inline,
            content_id: attachment.content_id.clone(),
            content: attachment.content.clone(),
            content_location: attachment.content_location.clone(),
        })?;
    }

    Ok(outcome)
}

/// Recomputes a thread's folder flags from its stored emails. A thread left
/// without emails keeps its last flags.
fn refresh_thread_folder<S: MailStore>(store: &S, thread_id: &str) -> Result<(), DbError> {
    let members = store.emails_in_thread(thread_id)?;
    if members.is_empty() {
        return Ok(());
    }
    let folder = thread_folder(members.iter().map(|email| email.email_label));
    store.set_thread_folder(thread_id, folder)
}

fn message_addresses(message: &RawMessage) -> impl Iterator<Item = &RawAddress> {
    std::iter::once(&message.from)
        .chain(&message.to)
        .chain(&message.cc)
        .chain(&message.bcc)
        .chain(&message.reply_to)
}

fn email_record(message: &RawMessage, label: FolderLabel, from_id: String) -> Email {
    Email {
        id: message.id.clone(),
        thread_id: message.thread_id.clone(),
        created_time: stamp(message.created_time),
        last_modified_time: stamp(message.last_modified_time),
        sent_at: stamp(message.sent_at),
        received_at: stamp(message.received_at),
        internet_message_id: message.internet_message_id.clone(),
        subject: message.subject.clone(),
        body: message.body.clone(),
        body_snippet: message.body_snippet.clone(),
        email_label: label,
        sys_labels: message.sys_labels.clone(),
        keywords: message.keywords.clone(),
        sys_classifications: message.sys_classifications.clone(),
        sensitivity: message.sensitivity.clone(),
        meeting_message_method: message.meeting_message_method.clone(),
        has_attachments: message.has_attachments,
        in_reply_to: message.in_reply_to.clone(),
        references: message.references.clone(),
        thread_index: message.thread_index.clone(),
        internet_headers: message.internet_headers.clone(),
        native_properties: message.native_properties.clone(),
        folder_id: message.folder_id.clone(),
        omitted: message.omitted.clone(),
        from_id,
    }
}

fn stamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
