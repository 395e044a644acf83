use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mailsync::db::models::{Account, EmailAttachment, FolderLabel, RecipientRole};
use mailsync::db::{
    AccountStore, AddressInput, Database, DbError, MailStore, Recipients, ThreadUpsert,
    UpsertOutcome,
};
use mailsync::provider::{
    ChangePage, FetchCursor, MailProvider, OutgoingMessage, ProviderError, RawAddress,
    RawAttachment, RawMessage, SentMessage, SyncSession,
};
use mailsync::reconcile::reconcile;
use mailsync::sync::{SyncError, SyncSettings};
use mailsync::trigger::{run_incremental_sync, run_initial_sync, TriggerError};
use uuid::Uuid;

const ACCOUNT: &str = "acc-1";
const USER: &str = "user-1";

fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("mailsync-pipeline-it-{}.db", Uuid::new_v4()))
}

fn open_db(delta_token: Option<&str>) -> (Database, PathBuf) {
    let path = temp_db_path();
    let db = Database::open(&path).expect("open db");
    db.insert_account(&Account {
        id: ACCOUNT.to_string(),
        user_id: USER.to_string(),
        email_address: "owner@example.com".to_string(),
        name: Some("Owner".to_string()),
        access_token: "bearer-1".to_string(),
        next_delta_token: None,
        last_sync: None,
    })
    .expect("insert account");
    if let Some(token) = delta_token {
        db.store_delta_token(ACCOUNT, token).expect("seed token");
    }
    (db, path)
}

fn count(db: &Database, table: &str) -> i64 {
    db.conn()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .expect("count rows")
}

fn stored_token(db: &Database) -> Option<String> {
    db.get_account(ACCOUNT)
        .expect("get account")
        .expect("account exists")
        .next_delta_token
}

fn fast() -> SyncSettings {
    SyncSettings {
        poll_interval: Duration::ZERO,
        max_poll_attempts: 30,
    }
}

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 12, minute, 0)
        .single()
        .expect("valid timestamp")
}

fn address(value: &str) -> RawAddress {
    RawAddress {
        address: value.to_string(),
        name: None,
        raw: None,
    }
}

fn message(id: &str, thread_id: &str, label: &str, minute: u32) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        created_time: at(minute),
        last_modified_time: at(minute),
        sent_at: at(minute),
        received_at: at(minute),
        internet_message_id: Some(format!("<{id}@example.com>")),
        subject: format!("Subject of {thread_id}"),
        sys_labels: vec![label.to_string()],
        keywords: vec![],
        sys_classifications: vec![],
        sensitivity: Some("normal".to_string()),
        meeting_message_method: None,
        from: RawAddress {
            address: "alice@example.com".to_string(),
            name: Some("Alice".to_string()),
            raw: Some("Alice <alice@example.com>".to_string()),
        },
        to: vec![address("owner@example.com")],
        cc: vec![],
        bcc: vec![],
        reply_to: vec![],
        has_attachments: false,
        body: Some("<p>Hello</p>".to_string()),
        body_snippet: Some("Hello".to_string()),
        attachments: vec![],
        in_reply_to: None,
        references: None,
        thread_index: None,
        internet_headers: None,
        native_properties: None,
        folder_id: None,
        omitted: vec![],
    }
}

fn page(records: Vec<RawMessage>, next_page: Option<&str>, next_delta: Option<&str>) -> ChangePage {
    ChangePage {
        records,
        next_page_token: next_page.map(str::to_string),
        next_delta_token: next_delta.map(str::to_string),
    }
}

#[derive(Default)]
struct ScriptedProvider {
    never_ready: bool,
    start_calls: Cell<u32>,
    pages: RefCell<VecDeque<Result<ChangePage, ProviderError>>>,
    cursors: RefCell<Vec<FetchCursor>>,
    tokens_seen: RefCell<Vec<String>>,
}

impl ScriptedProvider {
    fn with_pages(pages: Vec<Result<ChangePage, ProviderError>>) -> Self {
        Self {
            pages: RefCell::new(pages.into()),
            ..Self::default()
        }
    }
}

#[async_trait(?Send)]
impl MailProvider for ScriptedProvider {
    async fn start_sync(&self, token: &str) -> Result<SyncSession, ProviderError> {
        self.start_calls.set(self.start_calls.get() + 1);
        self.tokens_seen.borrow_mut().push(token.to_string());
        Ok(SyncSession {
            ready: !self.never_ready,
            sync_updated_token: Some("session-token".to_string()),
            sync_deleted_token: Some("deleted-token".to_string()),
        })
    }

    async fn fetch_changes(
        &self,
        token: &str,
        cursor: &FetchCursor,
    ) -> Result<ChangePage, ProviderError> {
        self.tokens_seen.borrow_mut().push(token.to_string());
        self.cursors.borrow_mut().push(cursor.clone());
        self.pages
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(ChangePage::default()))
    }

    async fn send_message(
        &self,
        _token: &str,
        _message: &OutgoingMessage,
    ) -> Result<SentMessage, ProviderError> {
        Ok(SentMessage::default())
    }

    async fn reply_to_message(
        &self,
        _token: &str,
        _message_id: &str,
        _message: &OutgoingMessage,
    ) -> Result<SentMessage, ProviderError> {
        Ok(SentMessage::default())
    }
}

/// Database wrapper that fails selected writes.
struct FaultyStore {
    inner: Database,
    fail_token: bool,
    fail_emails: bool,
}

impl AccountStore for FaultyStore {
    fn find_account(&self, account_id: &str, user_id: &str) -> Result<Option<Account>, DbError> {
        self.inner.find_account(account_id, user_id)
    }

    fn store_delta_token(&self, account_id: &str, token: &str) -> Result<(), DbError> {
        if self.fail_token {
            return Err(DbError::Config("database is locked".to_string()));
        }
        self.inner.store_delta_token(account_id, token)
    }

    fn mark_synced(&self, account_id: &str) -> Result<(), DbError> {
        self.inner.mark_synced(account_id)
    }
}

impl MailStore for FaultyStore {
    fn atomically<T, E, F>(&self, unit: F) -> Result<T, E>
    where
        E: From<DbError>,
        F: FnOnce(&Self) -> Result<T, E>,
    {
        self.inner.atomically(|_| unit(self))
    }

    fn upsert_address(
        &self,
        account_id: &str,
        address: &AddressInput,
    ) -> Result<mailsync::db::models::EmailAddress, DbError> {
        self.inner.upsert_address(account_id, address)
    }

    fn upsert_thread(
        &self,
        thread: &ThreadUpsert,
    ) -> Result<mailsync::db::models::Thread, DbError> {
        self.inner.upsert_thread(thread)
    }

    fn upsert_email(
        &self,
        email: &mailsync::db::models::Email,
        recipients: &Recipients,
    ) -> Result<UpsertOutcome, DbError> {
        if self.fail_emails {
            return Err(DbError::Config("disk I/O error".to_string()));
        }
        self.inner.upsert_email(email, recipients)
    }

    fn thread_of_email(&self, email_id: &str) -> Result<Option<String>, DbError> {
        self.inner.thread_of_email(email_id)
    }

    fn emails_in_thread(&self, thread_id: &str) -> Result<Vec<mailsync::db::models::Email>, DbError> {
        self.inner.emails_in_thread(thread_id)
    }

    fn set_thread_folder(&self, thread_id: &str, folder: FolderLabel) -> Result<(), DbError> {
        self.inner.set_thread_folder(thread_id, folder)
    }

    fn upsert_attachment(&self, attachment: &EmailAttachment) -> Result<(), DbError> {
        self.inner.upsert_attachment(attachment)
    }
}

#[tokio::test]
async fn bootstrap_collects_every_page_and_persists_last_token() {
    let (db, path) = open_db(None);
    let provider = ScriptedProvider::with_pages(vec![
        Ok(page(
            vec![message("m1", "t1", "inbox", 1), message("m2", "t1", "inbox", 2)],
            Some("page-2"),
            None,
        )),
        Ok(page(vec![message("m3", "t2", "sent", 3)], Some("page-3"), None)),
        Ok(page(vec![message("m4", "t3", "draft", 4)], None, Some("delta-final"))),
    ]);

    let outcome = run_initial_sync(&db, &provider, &fast(), ACCOUNT, USER)
        .await
        .expect("initial sync");

    assert!(outcome.success);
    assert_eq!(outcome.records_fetched, 4);
    assert_eq!(outcome.report.emails_added, 4);
    assert_eq!(stored_token(&db).as_deref(), Some("delta-final"));
    assert_eq!(count(&db, "emails"), 4);
    assert_eq!(count(&db, "threads"), 3);
    assert!(provider
        .tokens_seen
        .borrow()
        .iter()
        .all(|token| token == "bearer-1"));

    let account = db.get_account(ACCOUNT).expect("get").expect("exists");
    assert!(account.last_sync.is_some());
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn bootstrap_times_out_after_thirty_polls_without_writing() {
    let (db, path) = open_db(None);
    let provider = ScriptedProvider {
        never_ready: true,
        ..ScriptedProvider::default()
    };

    let error = run_initial_sync(&db, &provider, &fast(), ACCOUNT, USER)
        .await
        .expect_err("never ready");

    assert!(matches!(
        error,
        TriggerError::Sync(SyncError::NotReady { attempts: 30 })
    ));
    assert_eq!(error.code(), "FAILED_TO_SYNC");
    assert_eq!(provider.start_calls.get(), 30);
    assert_eq!(stored_token(&db), None);
    assert_eq!(count(&db, "emails"), 0);
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn failed_page_leaves_previous_token_in_place() {
    let (db, path) = open_db(Some("delta-0"));
    let provider = ScriptedProvider::with_pages(vec![
        Ok(page(vec![message("m1", "t1", "inbox", 1)], Some("page-2"), Some("delta-1"))),
        Err(ProviderError::Http {
            status: 502,
            message: "bad gateway".to_string(),
        }),
        Ok(page(vec![message("m3", "t1", "inbox", 3)], None, Some("delta-3"))),
    ]);

    let error = run_incremental_sync(&db, &provider, ACCOUNT, USER)
        .await
        .expect_err("second page fails");

    assert_eq!(error.code(), "FAILED_TO_SYNC");
    assert_eq!(stored_token(&db).as_deref(), Some("delta-0"));
    assert_eq!(count(&db, "emails"), 0);
    assert_eq!(
        provider.cursors.borrow().first(),
        Some(&FetchCursor::Delta("delta-0".to_string()))
    );
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn empty_incremental_run_still_refreshes_token() {
    let (db, path) = open_db(Some("delta-0"));
    let provider = ScriptedProvider::with_pages(vec![Ok(page(vec![], None, Some("delta-1")))]);

    let outcome = run_incremental_sync(&db, &provider, ACCOUNT, USER)
        .await
        .expect("incremental sync");

    assert!(outcome.delta_token_updated);
    assert_eq!(outcome.report.messages_processed, 0);
    assert_eq!(stored_token(&db).as_deref(), Some("delta-1"));
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn trigger_reports_configuration_failures() {
    let (db, path) = open_db(None);
    let provider = ScriptedProvider::default();

    let missing = run_incremental_sync(&db, &provider, "", USER)
        .await
        .expect_err("missing account id");
    assert_eq!(missing.code(), "MISSING_PARAMETERS");

    let unknown = run_incremental_sync(&db, &provider, "acc-404", USER)
        .await
        .expect_err("unknown account");
    assert_eq!(unknown.code(), "ACCOUNT_NOT_FOUND");

    let foreign = run_initial_sync(&db, &provider, &fast(), ACCOUNT, "someone-else")
        .await
        .expect_err("account of another user");
    assert_eq!(foreign.code(), "ACCOUNT_NOT_FOUND");

    let uninitialized = run_incremental_sync(&db, &provider, ACCOUNT, USER)
        .await
        .expect_err("no delta token yet");
    assert_eq!(uninitialized.code(), "SYNC_NOT_INITIALIZED");
    assert!(provider.cursors.borrow().is_empty());
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn token_write_failure_skips_reconciliation() {
    let (db, path) = open_db(Some("delta-0"));
    let store = FaultyStore {
        inner: db,
        fail_token: true,
        fail_emails: false,
    };
    let provider = ScriptedProvider::with_pages(vec![Ok(page(
        vec![message("m1", "t1", "inbox", 1)],
        None,
        Some("delta-1"),
    ))]);

    let error = run_incremental_sync(&store, &provider, ACCOUNT, USER)
        .await
        .expect_err("token write fails");

    assert_eq!(error.code(), "FAILED_TO_UPDATE_TOKEN");
    assert_eq!(count(&store.inner, "emails"), 0);
    assert_eq!(count(&store.inner, "email_addresses"), 0);
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn storage_failure_on_every_message_is_reported() {
    let (db, path) = open_db(Some("delta-0"));
    let store = FaultyStore {
        inner: db,
        fail_token: false,
        fail_emails: true,
    };
    let provider = ScriptedProvider::with_pages(vec![Ok(page(
        vec![message("m1", "t1", "inbox", 1), message("m2", "t2", "inbox", 2)],
        None,
        Some("delta-1"),
    ))]);

    let error = run_incremental_sync(&store, &provider, ACCOUNT, USER)
        .await
        .expect_err("all saves fail");

    assert_eq!(error.code(), "FAILED_TO_SAVE_EMAILS");
    assert_eq!(count(&store.inner, "emails"), 0);
    assert_eq!(count(&store.inner, "threads"), 0);
    let _ = std::fs::remove_file(path);
}

#[test]
fn reconciling_twice_is_idempotent() {
    let (db, path) = open_db(None);
    let mut raw = message("m1", "t1", "inbox", 1);
    raw.cc = vec![address("carol@example.com")];
    raw.has_attachments = true;
    raw.attachments = vec![RawAttachment {
        id: "att-1".to_string(),
        name: "notes.txt".to_string(),
        mime_type: "text/plain".to_string(),
        size: 5,
        inline: false,
        content_id: None,
        content: Some(b"hello".to_vec()),
        content_location: None,
    }];

    let first = reconcile(&db, std::slice::from_ref(&raw), ACCOUNT);
    let email_before = db.get_email("m1").expect("get").expect("exists");
    let thread_before = db.get_thread("t1").expect("get").expect("exists");

    let second = reconcile(&db, std::slice::from_ref(&raw), ACCOUNT);
    let email_after = db.get_email("m1").expect("get").expect("exists");
    let thread_after = db.get_thread("t1").expect("get").expect("exists");

    assert_eq!(first.emails_added, 1);
    assert_eq!(second.emails_updated, 1);
    assert_eq!(email_before, email_after);
    assert_eq!(thread_before, thread_after);
    assert_eq!(count(&db, "emails"), 1);
    assert_eq!(count(&db, "threads"), 1);
    assert_eq!(count(&db, "email_addresses"), 3);
    assert_eq!(count(&db, "email_recipients"), 2);
    assert_eq!(count(&db, "email_attachments"), 1);

    let attachments = db.attachments_for_email("m1").expect("attachments");
    assert_eq!(attachments[0].content.as_deref(), Some(b"hello".as_slice()));
    let _ = std::fs::remove_file(path);
}

#[test]
fn inbox_wins_over_sent_in_either_order() {
    let (db, path) = open_db(None);

    let report = reconcile(
        &db,
        &[
            message("a1", "sent-first", "sent", 1),
            message("a2", "sent-first", "inbox", 2),
            message("b1", "inbox-first", "inbox", 1),
            message("b2", "inbox-first", "sent", 2),
        ],
        ACCOUNT,
    );
    assert!(report.errors.is_empty());

    for thread_id in ["sent-first", "inbox-first"] {
        let thread = db.get_thread(thread_id).expect("get").expect("exists");
        assert!(thread.inbox_status, "{thread_id}");
        assert!(!thread.sent_status, "{thread_id}");
        assert!(!thread.draft_status, "{thread_id}");
    }
    let _ = std::fs::remove_file(path);
}

#[test]
fn draft_wins_over_sent() {
    let (db, path) = open_db(None);

    reconcile(
        &db,
        &[
            message("c1", "t-draft", "sent", 1),
            message("c2", "t-draft", "draft", 2),
            message("c3", "t-draft", "sent", 3),
        ],
        ACCOUNT,
    );

    let thread = db.get_thread("t-draft").expect("get").expect("exists");
    assert_eq!(thread.folder(), Some(FolderLabel::Draft));
    assert_eq!(thread.last_message_date, "2026-02-01T12:03:00Z");
    let _ = std::fs::remove_file(path);
}

#[test]
fn moved_message_refreshes_its_former_thread() {
    let (db, path) = open_db(None);

    reconcile(
        &db,
        &[
            message("s1", "t-old", "sent", 1),
            message("i1", "t-old", "inbox", 2),
        ],
        ACCOUNT,
    );
    let before = db.get_thread("t-old").expect("get").expect("exists");
    assert_eq!(before.folder(), Some(FolderLabel::Inbox));

    let report = reconcile(&db, &[message("i1", "t-new", "inbox", 2)], ACCOUNT);
    assert_eq!(report.emails_updated, 1);

    let old = db.get_thread("t-old").expect("get").expect("exists");
    assert_eq!(old.folder(), Some(FolderLabel::Sent));
    let new = db.get_thread("t-new").expect("get").expect("exists");
    assert_eq!(new.folder(), Some(FolderLabel::Inbox));
    assert_eq!(
        db.get_email("i1").expect("get").expect("exists").thread_id,
        "t-new"
    );
    let _ = std::fs::remove_file(path);
}

#[test]
fn malformed_sender_only_skips_that_message() {
    let (db, path) = open_db(None);
    let mut broken = message("m2", "t2", "inbox", 2);
    broken.from = address("not-an-address");

    let report = reconcile(
        &db,
        &[
            message("m1", "t1", "inbox", 1),
            broken,
            message("m3", "t3", "inbox", 3),
        ],
        ACCOUNT,
    );

    assert_eq!(report.messages_processed, 3);
    assert_eq!(report.emails_added, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].message_id, "m2");
    assert!(!report.errors[0].storage);
    assert!(!report.nothing_saved());

    assert!(db.get_email("m1").expect("get").is_some());
    assert!(db.get_email("m2").expect("get").is_none());
    assert!(db.get_email("m3").expect("get").is_some());
    assert!(db.get_thread("t2").expect("get").is_none());
    let _ = std::fs::remove_file(path);
}

#[test]
fn resync_keeps_done_and_replaces_recipients() {
    let (db, path) = open_db(None);
    let mut raw = message("m1", "t1", "inbox", 1);
    raw.to = vec![address("bob@example.com"), address("carol@example.com")];
    reconcile(&db, std::slice::from_ref(&raw), ACCOUNT);

    db.conn()
        .execute("UPDATE threads SET done = true WHERE id = 't1'", [])
        .expect("mark done");

    raw.to = vec![address("dave@example.com")];
    raw.last_modified_time = at(30);
    let mut reply = message("m2", "t1", "inbox", 5);
    reply.from = address("erin@example.com");
    reply.to = vec![address("alice@example.com")];
    reconcile(&db, &[raw, reply], ACCOUNT);

    let thread = db.get_thread("t1").expect("get").expect("exists");
    assert!(thread.done);

    let to: Vec<String> = db
        .recipients("m1", RecipientRole::To)
        .expect("recipients")
        .into_iter()
        .map(|address| address.address)
        .collect();
    assert_eq!(to, vec!["dave@example.com"]);

    let email = db.get_email("m1").expect("get").expect("exists");
    assert_eq!(email.last_modified_time, "2026-02-01T12:30:00Z");

    // alice, bob, carol from the first pass; dave and erin joined later.
    assert_eq!(thread.participant_ids.len(), 5);
    let _ = std::fs::remove_file(path);
}
