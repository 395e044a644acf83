use anyhow::Result;
use rusqlite::Connection;

pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            email_address TEXT NOT NULL,
            name TEXT,
            access_token TEXT NOT NULL,
            next_delta_token TEXT,
            last_sync TEXT,
            UNIQUE(user_id, email_address)
        );

        CREATE TABLE IF NOT EXISTS email_addresses (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            address TEXT NOT NULL,
            name TEXT,
            raw TEXT,
            UNIQUE(account_id, address)
        );

        CREATE TABLE IF NOT EXISTS threads (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            subject TEXT NOT NULL,
            last_message_date TEXT NOT NULL,
            inbox_status BOOLEAN NOT NULL DEFAULT true,
            sent_status BOOLEAN NOT NULL DEFAULT false,
            draft_status BOOLEAN NOT NULL DEFAULT false,
            done BOOLEAN NOT NULL DEFAULT false,
            participant_ids TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS emails (
            id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
            created_time TEXT NOT NULL,
            last_modified_time TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            received_at TEXT NOT NULL,
            internet_message_id TEXT,
            subject TEXT NOT NULL,
            body TEXT,
            body_snippet TEXT,
            email_label TEXT NOT NULL CHECK(email_label IN ('inbox', 'sent', 'draft')),
            sys_labels TEXT NOT NULL DEFAULT '[]',
            keywords TEXT NOT NULL DEFAULT '[]',
            sys_classifications TEXT NOT NULL DEFAULT '[]',
            sensitivity TEXT,
            meeting_message_method TEXT,
            has_attachments BOOLEAN NOT NULL DEFAULT false,
            in_reply_to TEXT,
            references_header TEXT,
            thread_index TEXT,
            internet_headers TEXT,
            native_properties TEXT,
            folder_id TEXT,
            omitted TEXT NOT NULL DEFAULT '[]',
            from_id TEXT NOT NULL REFERENCES email_addresses(id)
        );

        CREATE TABLE IF NOT EXISTS email_recipients (
            email_id TEXT NOT NULL REFERENCES emails(id) ON DELETE CASCADE,
            address_id TEXT NOT NULL REFERENCES email_addresses(id) ON DELETE CASCADE,
            role TEXT NOT NULL CHECK(role IN ('to', 'cc', 'bcc', 'reply_to')),
            PRIMARY KEY (email_id, address_id, role)
        );

        CREATE TABLE IF NOT EXISTS email_attachments (
            id TEXT PRIMARY KEY,
            email_id TEXT NOT NULL REFERENCES emails(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            size INTEGER NOT NULL,
            inline BOOLEAN NOT NULL DEFAULT false,
            content_id TEXT,
            content BLOB,
            content_location TEXT
        );

        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_accounts_user_id ON accounts(user_id);
        CREATE INDEX IF NOT EXISTS idx_threads_account_id ON threads(account_id);
        CREATE INDEX IF NOT EXISTS idx_threads_last_message_date ON threads(last_message_date);
        CREATE INDEX IF NOT EXISTS idx_emails_thread_id ON emails(thread_id);
        CREATE INDEX IF NOT EXISTS idx_emails_received_at ON emails(received_at);
        CREATE INDEX IF NOT EXISTS idx_emails_from_id ON emails(from_id);
        CREATE INDEX IF NOT EXISTS idx_email_recipients_address_id ON email_recipients(address_id);
        CREATE INDEX IF NOT EXISTS idx_email_attachments_email_id ON email_attachments(email_id);
        "#,
    )?;

    Ok(())
}
