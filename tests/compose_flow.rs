use std::cell::RefCell;
use std::path::PathBuf;

use async_trait::async_trait;
use mailsync::compose::{send_email, send_reply, ComposeError, ComposeRequest};
use mailsync::db::models::Account;
use mailsync::db::Database;
use mailsync::provider::{
    ChangePage, FetchCursor, MailProvider, OutgoingMessage, ProviderError, SentMessage,
    SyncSession,
};
use uuid::Uuid;

fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("mailsync-compose-it-{}.db", Uuid::new_v4()))
}

fn open_db() -> (Database, PathBuf) {
    let path = temp_db_path();
    let db = Database::open(&path).expect("open db");
    db.insert_account(&Account {
        id: "acc-1".to_string(),
        user_id: "user-1".to_string(),
        email_address: "owner@example.com".to_string(),
        name: None,
        access_token: "bearer-1".to_string(),
        next_delta_token: None,
        last_sync: None,
    })
    .expect("insert account");
    (db, path)
}

#[derive(Debug, Clone, PartialEq)]
struct Delivery {
    token: String,
    reply_to: Option<String>,
    message: OutgoingMessage,
}

#[derive(Default)]
struct RecordingProvider {
    reject_with: Option<(u16, String)>,
    deliveries: RefCell<Vec<Delivery>>,
}

impl RecordingProvider {
    fn deliver(
        &self,
        token: &str,
        reply_to: Option<&str>,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, ProviderError> {
        if let Some((status, reason)) = &self.reject_with {
            return Err(match status {
                401 | 403 => ProviderError::Unauthorized {
                    status: *status,
                    message: Some(reason.clone()),
                },
                _ => ProviderError::Http {
                    status: *status,
                    message: reason.clone(),
                },
            });
        }
        self.deliveries.borrow_mut().push(Delivery {
            token: token.to_string(),
            reply_to: reply_to.map(str::to_string),
            message: message.clone(),
        });
        Ok(SentMessage {
            id: Some("sent-1".to_string()),
            thread_id: None,
        })
    }
}

#[async_trait(?Send)]
impl MailProvider for RecordingProvider {
    async fn start_sync(&self, _token: &str) -> Result<SyncSession, ProviderError> {
        Err(ProviderError::Decode("sync not scripted".to_string()))
    }

    async fn fetch_changes(
        &self,
        _token: &str,
        _cursor: &FetchCursor,
    ) -> Result<ChangePage, ProviderError> {
        Err(ProviderError::Decode("sync not scripted".to_string()))
    }

    async fn send_message(
        &self,
        token: &str,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, ProviderError> {
        self.deliver(token, None, message)
    }

    async fn reply_to_message(
        &self,
        token: &str,
        message_id: &str,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, ProviderError> {
        self.deliver(token, Some(message_id), message)
    }
}

fn request(user_id: &str) -> ComposeRequest {
    ComposeRequest {
        account_id: "acc-1".to_string(),
        user_id: user_id.to_string(),
        to: vec!["bob@example.com".to_string()],
        cc: vec![],
        bcc: vec![],
        subject: "Lunch".to_string(),
        body: "<p>Noon?</p>".to_string(),
    }
}

#[tokio::test]
async fn send_uses_the_account_token() {
    let (db, path) = open_db();
    let provider = RecordingProvider::default();

    let sent = send_email(&db, &provider, &request("user-1"))
        .await
        .expect("send");

    assert_eq!(sent.id.as_deref(), Some("sent-1"));
    let deliveries = provider.deliveries.borrow();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].token, "bearer-1");
    assert_eq!(deliveries[0].reply_to, None);
    assert_eq!(deliveries[0].message.to, vec!["bob@example.com"]);
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn reply_targets_the_message() {
    let (db, path) = open_db();
    let provider = RecordingProvider::default();

    send_reply(&db, &provider, &request("user-1"), "msg-42")
        .await
        .expect("reply");

    assert_eq!(
        provider.deliveries.borrow()[0].reply_to.as_deref(),
        Some("msg-42")
    );

    let missing = send_reply(&db, &provider, &request("user-1"), " ").await;
    assert!(matches!(missing, Err(ComposeError::MissingField("message_id"))));
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn other_users_cannot_send_from_the_account() {
    let (db, path) = open_db();
    let provider = RecordingProvider::default();

    let result = send_email(&db, &provider, &request("intruder")).await;

    assert!(matches!(result, Err(ComposeError::AccountNotFound)));
    assert!(provider.deliveries.borrow().is_empty());
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn provider_errors_pass_through_verbatim() {
    let (db, path) = open_db();
    let provider = RecordingProvider {
        reject_with: Some((
            400,
            "Recipient address rejected: bob@example.com".to_string(),
        )),
        ..RecordingProvider::default()
    };

    let error = send_email(&db, &provider, &request("user-1"))
        .await
        .expect_err("provider rejects");

    assert_eq!(
        error.to_string(),
        "Recipient address rejected: bob@example.com"
    );
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn rejected_token_reports_the_provider_reason() {
    let (db, path) = open_db();
    let provider = RecordingProvider {
        reject_with: Some((401, "Access token has expired".to_string())),
        ..RecordingProvider::default()
    };

    let error = send_reply(&db, &provider, &request("user-1"), "msg-42")
        .await
        .expect_err("provider rejects token");

    assert_eq!(error.to_string(), "Access token has expired");
    let _ = std::fs::remove_file(path);
}
