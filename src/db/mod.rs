use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::credentials::{self, CredentialError, TokenKey};

use self::models::{
    Account, Email, EmailAddress, EmailAttachment, EmailWithSender, FolderLabel, RecipientRole,
    Thread,
};

pub mod migrations;
pub mod models;
pub mod schema;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("json serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("credentials: {0}")]
    Credentials(#[from] CredentialError),

    #[error("invalid email address '{0}'")]
    InvalidAddress(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Config(String),
}

/// Account lookups and sync-position bookkeeping.
pub trait AccountStore {
    /// Finds an account only if it belongs to the given user.
    fn find_account(&self, account_id: &str, user_id: &str) -> Result<Option<Account>, DbError>;

    fn store_delta_token(&self, account_id: &str, token: &str) -> Result<(), DbError>;

    fn mark_synced(&self, account_id: &str) -> Result<(), DbError>;
}

/// An address as observed on a message, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInput {
    pub address: String,
    pub name: Option<String>,
    pub raw: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadUpsert {
    pub id: String,
    pub account_id: String,
    pub subject: String,
    pub last_message_date: String,
    pub participant_ids: Vec<String>,
    /// Only used when the thread is created.
    pub initial_label: FolderLabel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipients {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub reply_to: Vec<String>,
}

impl Recipients {
    fn by_role(&self) -> [(RecipientRole, &[String]); 4] {
        [
            (RecipientRole::To, self.to.as_slice()),
            (RecipientRole::Cc, self.cc.as_slice()),
            (RecipientRole::Bcc, self.bcc.as_slice()),
            (RecipientRole::ReplyTo, self.reply_to.as_slice()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Upsert-by-natural-key operations used by reconciliation.
pub trait MailStore {
    /// Runs `unit` so that either all of its writes land or none do.
    fn atomically<T, E, F>(&self, unit: F) -> Result<T, E>
    where
        E: From<DbError>,
        F: FnOnce(&Self) -> Result<T, E>;

    fn upsert_address(
        &self,
        account_id: &str,
        address: &AddressInput,
    ) -> Result<EmailAddress, DbError>;

    fn upsert_thread(&self, thread: &ThreadUpsert) -> Result<Thread, DbError>;

    fn upsert_email(
        &self,
        email: &Email,
        recipients: &Recipients,
    ) -> Result<UpsertOutcome, DbError>;

    /// Thread an email is currently filed under, if it is stored.
    fn thread_of_email(&self, email_id: &str) -> Result<Option<String>, DbError>;

    /// All emails of a thread, oldest received first.
    fn emails_in_thread(&self, thread_id: &str) -> Result<Vec<Email>, DbError>;

    fn set_thread_folder(&self, thread_id: &str, folder: FolderLabel) -> Result<(), DbError>;

    fn upsert_attachment(&self, attachment: &EmailAttachment) -> Result<(), DbError>;
}

#[derive(Debug, Clone)]
pub struct ThreadFilter {
    pub account_id: String,
    pub tab: FolderLabel,
    pub done: bool,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadView {
    #[serde(flatten)]
    pub thread: Thread,
    pub emails: Vec<EmailWithSender>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountThreadCount {
    pub account_id: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub total_accounts: i64,
    pub total_threads: i64,
    pub total_emails: i64,
    pub total_addresses: i64,
    pub total_attachments: i64,
    pub threads_by_account: Vec<AccountThreadCount>,
}

const THREAD_COLUMNS: &str = "id, account_id, subject, last_message_date, inbox_status, \
     sent_status, draft_status, done, participant_ids";

const EMAIL_COLUMNS: &str = "id, thread_id, created_time, last_modified_time, sent_at, \
     received_at, internet_message_id, subject, body, body_snippet, email_label, sys_labels, \
     keywords, sys_classifications, sensitivity, meeting_message_method, has_attachments, \
     in_reply_to, references_header, thread_index, internet_headers, native_properties, \
     folder_id, omitted, from_id";

pub struct Database {
    conn: Connection,
    path: PathBuf,
    token_key: Option<TokenKey>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let db = Self {
            conn,
            path: path.to_path_buf(),
            token_key: None,
        };
        db.initialize()?;
        Ok(db)
    }

    /// Seals bearer tokens with `key` on write and unseals them on read.
    pub fn with_token_key(mut self, key: Option<TokenKey>) -> Self {
        self.token_key = key;
        self
    }

    fn initialize(&self) -> Result<(), DbError> {
        migrations::migrate(&self.conn)
            .map_err(|e| DbError::Config(format!("migration failed: {e}")))
    }

    pub fn default_db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir()
            .ok_or_else(|| DbError::Config("failed to determine home directory".to_string()))?;
        Ok(home.join(".mailsync").join("mailsync.db"))
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn insert_account(&self, account: &Account) -> Result<(), DbError> {
        let stored_token = match &self.token_key {
            Some(key) => credentials::seal_token(&account.access_token, key)?,
            None => account.access_token.clone(),
        };

        self.conn.execute(
            r#"
            INSERT INTO accounts (
                id, user_id, email_address, name, access_token, next_delta_token, last_sync
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                email_address = excluded.email_address,
                name = excluded.name,
                access_token = excluded.access_token
            "#,
            params![
                account.id,
                account.user_id,
                account.email_address,
                account.name,
                stored_token,
                account.next_delta_token,
                account.last_sync,
            ],
        )?;

        Ok(())
    }

    pub fn get_account(&self, account_id: &str) -> Result<Option<Account>, DbError> {
        let account = self
            .conn
            .query_row(
                r#"
                SELECT id, user_id, email_address, name, access_token, next_delta_token, last_sync
                FROM accounts
                WHERE id = ?
                LIMIT 1
                "#,
                [account_id],
                Account::from_row,
            )
            .optional()?;

        account.map(|account| self.unseal(account)).transpose()
    }

    pub fn list_accounts(&self, user_id: Option<&str>) -> Result<Vec<Account>, DbError> {
        let mut sql = String::from(
            r#"
            SELECT id, user_id, email_address, name, access_token, next_delta_token, last_sync
            FROM accounts
            "#,
        );
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(user_id) = user_id {
            sql.push_str(" WHERE user_id = ?");
            params_vec.push(Box::new(user_id.to_string()));
        }
        sql.push_str(" ORDER BY email_address ASC");

        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|v| v.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let accounts = stmt
            .query_map(params_refs.as_slice(), Account::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        accounts
            .into_iter()
            .map(|account| self.unseal(account))
            .collect()
    }

    pub fn remove_account(&self, account_id: &str) -> Result<usize, DbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM accounts WHERE id = ?", [account_id])?;
        Ok(deleted)
    }

    fn unseal(&self, mut account: Account) -> Result<Account, DbError> {
        if !credentials::is_sealed(&account.access_token) {
            return Ok(account);
        }

        let key = self.token_key.as_ref().ok_or_else(|| {
            DbError::Config(format!(
                "access token for account {} is sealed but no token key is configured",
                account.id
            ))
        })?;
        account.access_token = credentials::open_token(&account.access_token, key)?;
        Ok(account)
    }

    pub fn get_email(&self, id: &str) -> Result<Option<Email>, DbError> {
        let email = self
            .conn
            .query_row(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?"),
                [id],
                Email::from_row,
            )
            .optional()?;
        Ok(email)
    }

    pub fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, DbError> {
        let thread = self
            .conn
            .query_row(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?"),
                [thread_id],
                Thread::from_row,
            )
            .optional()?;
        Ok(thread)
    }

    pub fn get_address(&self, address_id: &str) -> Result<Option<EmailAddress>, DbError> {
        let address = self
            .conn
            .query_row(
                "SELECT id, account_id, address, name, raw FROM email_addresses WHERE id = ?",
                [address_id],
                EmailAddress::from_row,
            )
            .optional()?;
        Ok(address)
    }

    pub fn count_addresses(&self, account_id: &str) -> Result<i64, DbError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM email_addresses WHERE account_id = ?",
            [account_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn recipients(
        &self,
        email_id: &str,
        role: RecipientRole,
    ) -> Result<Vec<EmailAddress>, DbError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT a.id, a.account_id, a.address, a.name, a.raw
            FROM email_recipients r
            JOIN email_addresses a ON a.id = r.address_id
            WHERE r.email_id = ? AND r.role = ?
            ORDER BY a.address ASC
            "#,
        )?;
        let addresses = stmt
            .query_map(params![email_id, role.as_str()], EmailAddress::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(addresses)
    }

    pub fn attachments_for_email(&self, email_id: &str) -> Result<Vec<EmailAttachment>, DbError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, email_id, name, mime_type, size, inline, content_id, content, content_location
            FROM email_attachments
            WHERE email_id = ?
            ORDER BY id ASC
            "#,
        )?;
        let attachments = stmt
            .query_map([email_id], EmailAttachment::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attachments)
    }

    /// Threads for one inbox tab, most recent first, each with its emails.
    pub fn list_threads(&self, filter: &ThreadFilter) -> Result<Vec<ThreadView>, DbError> {
        let limit = if filter.limit == 0 { 15 } else { filter.limit };
        let sql = format!(
            r#"
            SELECT {THREAD_COLUMNS}
            FROM threads
            WHERE account_id = ? AND {} = 1 AND done = ?
            ORDER BY last_message_date DESC
            LIMIT ?
            "#,
            status_column(filter.tab)
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let threads = stmt
            .query_map(
                params![filter.account_id, filter.done, limit as i64],
                Thread::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        threads
            .into_iter()
            .map(|thread| self.thread_view(thread))
            .collect()
    }

    pub fn count_threads(&self, account_id: &str, tab: FolderLabel) -> Result<i64, DbError> {
        let sql = format!(
            "SELECT COUNT(*) FROM threads WHERE account_id = ? AND {} = 1",
            status_column(tab)
        );
        let count = self.conn.query_row(&sql, [account_id], |row| row.get(0))?;
        Ok(count)
    }

    /// A thread of the given account with its emails ordered by send time.
    pub fn get_thread_view(
        &self,
        account_id: &str,
        thread_id: &str,
    ) -> Result<Option<ThreadView>, DbError> {
        let thread = self
            .conn
            .query_row(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ? AND account_id = ?"),
                params![thread_id, account_id],
                Thread::from_row,
            )
            .optional()?;

        thread.map(|thread| self.thread_view(thread)).transpose()
    }

    fn thread_view(&self, thread: Thread) -> Result<ThreadView, DbError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT e.id, e.thread_id, e.created_time, e.last_modified_time, e.sent_at,
                   e.received_at, e.internet_message_id, e.subject, e.body, e.body_snippet,
                   e.email_label, e.sys_labels, e.keywords, e.sys_classifications, e.sensitivity,
                   e.meeting_message_method, e.has_attachments, e.in_reply_to,
                   e.references_header, e.thread_index, e.internet_headers, e.native_properties,
                   e.folder_id, e.omitted, e.from_id,
                   a.account_id AS from_account_id, a.address AS from_address,
                   a.name AS from_name, a.raw AS from_raw
            FROM emails e
            JOIN email_addresses a ON a.id = e.from_id
            WHERE e.thread_id = ?
            ORDER BY e.sent_at ASC
            "#,
        )?;

        let emails = stmt
            .query_map([thread.id.as_str()], |row| {
                let email = Email::from_row(row)?;
                let from = EmailAddress {
                    id: email.from_id.clone(),
                    account_id: row.get("from_account_id")?,
                    address: row.get("from_address")?,
                    name: row.get("from_name")?,
                    raw: row.get("from_raw")?,
                };
                Ok(EmailWithSender { email, from })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ThreadView { thread, emails })
    }

    /// Case-insensitive substring search over thread subjects, email bodies
    /// and sender addresses of one account.
    pub fn search_threads(
        &self,
        account_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Thread>, DbError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let limit = if limit == 0 { 25 } else { limit };
        let pattern = format!("%{}%", escape_like(query));

        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {THREAD_COLUMNS}
            FROM threads t
            WHERE t.account_id = ?1
              AND (
                t.subject LIKE ?2 ESCAPE '\'
                OR EXISTS (
                    SELECT 1
                    FROM emails e
                    JOIN email_addresses a ON a.id = e.from_id
                    WHERE e.thread_id = t.id
                      AND (e.body LIKE ?2 ESCAPE '\'
                           OR e.body_snippet LIKE ?2 ESCAPE '\'
                           OR a.address LIKE ?2 ESCAPE '\'
                           OR a.name LIKE ?2 ESCAPE '\')
                )
              )
            ORDER BY t.last_message_date DESC
            LIMIT ?3
            "#
        ))?;

        let threads = stmt
            .query_map(
                params![account_id, pattern, limit as i64],
                Thread::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(threads)
    }

    pub fn get_stats(&self) -> Result<DatabaseStats, DbError> {
        let count = |table: &str| -> Result<i64, DbError> {
            Ok(self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?)
        };

        let mut stmt = self.conn.prepare(
            "SELECT account_id, COUNT(*) AS count FROM threads GROUP BY account_id ORDER BY count DESC",
        )?;
        let threads_by_account = stmt
            .query_map([], |row| {
                Ok(AccountThreadCount {
                    account_id: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(DatabaseStats {
            total_accounts: count("accounts")?,
            total_threads: count("threads")?,
            total_emails: count("emails")?,
            total_addresses: count("email_addresses")?,
            total_attachments: count("email_attachments")?,
            threads_by_account,
        })
    }
}

fn status_column(tab: FolderLabel) -> &'static str {
    match tab {
        FolderLabel::Inbox => "inbox_status",
        FolderLabel::Sent => "sent_status",
        FolderLabel::Draft => "draft_status",
    }
}

/// Makes `%`, `_` and `\` match literally under `ESCAPE '\'`.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn is_plausible_address(address: &str) -> bool {
    let Some((local, domain)) = address.rsplit_once('@') else {
        return false;
    };
    !local.is_empty() && !domain.is_empty() && !address.chars().any(char::is_whitespace)
}

impl AccountStore for Database {
    fn find_account(&self, account_id: &str, user_id: &str) -> Result<Option<Account>, DbError> {
        Ok(self
            .get_account(account_id)?
            .filter(|account| account.user_id == user_id))
    }

    fn store_delta_token(&self, account_id: &str, token: &str) -> Result<(), DbError> {
        let updated = self.conn.execute(
            "UPDATE accounts SET next_delta_token = ? WHERE id = ?",
            params![token, account_id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound {
                entity: "account",
                id: account_id.to_string(),
            });
        }
        Ok(())
    }

    fn mark_synced(&self, account_id: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE accounts SET last_sync = strftime('%Y-%m-%dT%H:%M:%SZ', 'now') WHERE id = ?",
            [account_id],
        )?;
        Ok(())
    }
}

impl MailStore for Database {
    fn atomically<T, E, F>(&self, unit: F) -> Result<T, E>
    where
        E: From<DbError>,
        F: FnOnce(&Self) -> Result<T, E>,
    {
        self.conn
            .execute_batch("SAVEPOINT mail_unit")
            .map_err(DbError::from)?;

        match unit(self) {
            Ok(value) => {
                self.conn
                    .execute_batch("RELEASE mail_unit")
                    .map_err(DbError::from)?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = self
                    .conn
                    .execute_batch("ROLLBACK TO mail_unit; RELEASE mail_unit")
                {
                    tracing::warn!("rollback of failed mail unit failed: {rollback_error}");
                }
                Err(error)
            }
        }
    }

    fn upsert_address(
        &self,
        account_id: &str,
        address: &AddressInput,
    ) -> Result<EmailAddress, DbError> {
        let normalized = address.address.trim();
        if !is_plausible_address(normalized) {
            return Err(DbError::InvalidAddress(address.address.clone()));
        }

        self.conn.execute(
            r#"
            INSERT INTO email_addresses (id, account_id, address, name, raw)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(account_id, address) DO UPDATE SET
                name = excluded.name,
                raw = excluded.raw
            "#,
            params![
                Uuid::new_v4().to_string(),
                account_id,
                normalized,
                address.name,
                address.raw,
            ],
        )?;

        let stored = self.conn.query_row(
            r#"
            SELECT id, account_id, address, name, raw
            FROM email_addresses
            WHERE account_id = ? AND address = ?
            "#,
            params![account_id, normalized],
            EmailAddress::from_row,
        )?;
        Ok(stored)
    }

    fn upsert_thread(&self, thread: &ThreadUpsert) -> Result<Thread, DbError> {
        match self.get_thread(&thread.id)? {
            Some(existing) => {
                let mut participants = existing.participant_ids.clone();
                let mut seen: HashSet<String> = participants.iter().cloned().collect();
                for id in &thread.participant_ids {
                    if seen.insert(id.clone()) {
                        participants.push(id.clone());
                    }
                }

                let last_message_date = if thread.last_message_date > existing.last_message_date
                {
                    thread.last_message_date.clone()
                } else {
                    existing.last_message_date.clone()
                };

                self.conn.execute(
                    r#"
                    UPDATE threads
                    SET account_id = ?, subject = ?, last_message_date = ?, participant_ids = ?
                    WHERE id = ?
                    "#,
                    params![
                        thread.account_id,
                        thread.subject,
                        last_message_date,
                        serde_json::to_string(&participants)?,
                        thread.id,
                    ],
                )?;
            }
            None => {
                let mut seen = HashSet::new();
                let participants: Vec<&String> = thread
                    .participant_ids
                    .iter()
                    .filter(|id| seen.insert(id.as_str()))
                    .collect();

                self.conn.execute(
                    r#"
                    INSERT INTO threads (
                        id, account_id, subject, last_message_date, inbox_status, sent_status,
                        draft_status, done, participant_ids
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, false, ?)
                    "#,
                    params![
                        thread.id,
                        thread.account_id,
                        thread.subject,
                        thread.last_message_date,
                        thread.initial_label == FolderLabel::Inbox,
                        thread.initial_label == FolderLabel::Sent,
                        thread.initial_label == FolderLabel::Draft,
                        serde_json::to_string(&participants)?,
                    ],
                )?;
            }
        }

        self.get_thread(&thread.id)?.ok_or_else(|| DbError::NotFound {
            entity: "thread",
            id: thread.id.clone(),
        })
    }

    fn upsert_email(
        &self,
        email: &Email,
        recipients: &Recipients,
    ) -> Result<UpsertOutcome, DbError> {
        let existed = self
            .conn
            .query_row("SELECT 1 FROM emails WHERE id = ?", [&email.id], |_| Ok(()))
            .optional()?
            .is_some();

        let internet_headers = email
            .internet_headers
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let native_properties = email
            .native_properties
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            r#"
            INSERT INTO emails (
                id, thread_id, created_time, last_modified_time, sent_at, received_at,
                internet_message_id, subject, body, body_snippet, email_label, sys_labels,
                keywords, sys_classifications, sensitivity, meeting_message_method,
                has_attachments, in_reply_to, references_header, thread_index, internet_headers,
                native_properties, folder_id, omitted, from_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                thread_id = excluded.thread_id,
                created_time = excluded.created_time,
                last_modified_time = excluded.last_modified_time,
                sent_at = excluded.sent_at,
                received_at = excluded.received_at,
                internet_message_id = excluded.internet_message_id,
                subject = excluded.subject,
                body = excluded.body,
                body_snippet = excluded.body_snippet,
                email_label = excluded.email_label,
                sys_labels = excluded.sys_labels,
                keywords = excluded.keywords,
                sys_classifications = excluded.sys_classifications,
                sensitivity = excluded.sensitivity,
                meeting_message_method = excluded.meeting_message_method,
                has_attachments = excluded.has_attachments,
                in_reply_to = excluded.in_reply_to,
                references_header = excluded.references_header,
                thread_index = excluded.thread_index,
                internet_headers = excluded.internet_headers,
                native_properties = excluded.native_properties,
                folder_id = excluded.folder_id,
                omitted = excluded.omitted,
                from_id = excluded.from_id
            "#,
            params![
                email.id,
                email.thread_id,
                email.created_time,
                email.last_modified_time,
                email.sent_at,
                email.received_at,
                email.internet_message_id,
                email.subject,
                email.body,
                email.body_snippet,
                email.email_label.as_str(),
                serde_json::to_string(&email.sys_labels)?,
                serde_json::to_string(&email.keywords)?,
                serde_json::to_string(&email.sys_classifications)?,
                email.sensitivity,
                email.meeting_message_method,
                email.has_attachments,
                email.in_reply_to,
                email.references,
                email.thread_index,
                internet_headers,
                native_properties,
                email.folder_id,
                serde_json::to_string(&email.omitted)?,
                email.from_id,
            ],
        )?;

        self.conn
            .execute("DELETE FROM email_recipients WHERE email_id = ?", [&email.id])?;
        let mut insert = self.conn.prepare(
            "INSERT OR IGNORE INTO email_recipients (email_id, address_id, role) VALUES (?, ?, ?)",
        )?;
        for (role, address_ids) in recipients.by_role() {
            for address_id in address_ids {
                insert.execute(params![email.id, address_id, role.as_str()])?;
            }
        }

        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }

    fn thread_of_email(&self, email_id: &str) -> Result<Option<String>, DbError> {
        let thread_id = self
            .conn
            .query_row("SELECT thread_id FROM emails WHERE id = ?", [email_id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(thread_id)
    }

    fn emails_in_thread(&self, thread_id: &str) -> Result<Vec<Email>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EMAIL_COLUMNS} FROM emails WHERE thread_id = ? ORDER BY received_at ASC"
        ))?;
        let emails = stmt
            .query_map([thread_id], Email::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(emails)
    }

    fn set_thread_folder(&self, thread_id: &str, folder: FolderLabel) -> Result<(), DbError> {
        let updated = self.conn.execute(
            r#"
            UPDATE threads
            SET inbox_status = ?, sent_status = ?, draft_status = ?
            WHERE id = ?
            "#,
            params![
                folder == FolderLabel::Inbox,
                folder == FolderLabel::Sent,
                folder == FolderLabel::Draft,
                thread_id,
            ],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound {
                entity: "thread",
                id: thread_id.to_string(),
            });
        }
        Ok(())
    }

    fn upsert_attachment(&self, attachment: &EmailAttachment) -> Result<(), DbError> {
        self.conn.execute(
            r#"
            INSERT INTO email_attachments (
                id, email_id, name, mime_type, size, inline, content_id, content, content_location
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                email_id = excluded.email_id,
                name = excluded.name,
                mime_type = excluded.mime_type,
                size = excluded.size,
                inline = excluded.inline,
                content_id = excluded.content_id,
                content = excluded.content,
                content_location = excluded.content_location
            "#,
            params![
                attachment.id,
                attachment.email_id,
                attachment.name,
                attachment.mime_type,
                attachment.size,
                attachment.inline,
                attachment.content_id,
                attachment.content,
                attachment.content_location,
            ],
        )?;
        Ok(())
    }
}
