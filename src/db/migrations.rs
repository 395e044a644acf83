use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::schema;

const SCHEMA_VERSION_KEY: &str = "schema_version";
const LATEST_SCHEMA_VERSION: u32 = 1;

pub fn migrate(conn: &Connection) -> Result<()> {
    ensure_sync_state_table(conn)?;

    let current_version = current_schema_version(conn)?;
    if current_version > LATEST_SCHEMA_VERSION {
        return Err(anyhow!(
            "mailbox schema version {current_version} is newer than supported version {LATEST_SCHEMA_VERSION}"
        ));
    }

    if current_version < 1 {
        tracing::debug!("applying mailbox schema v1");
        apply_v1(conn)?;
    }

    Ok(())
}

fn ensure_sync_state_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
    )
    .context("ensure sync_state table for schema versioning")?;

    Ok(())
}

fn current_schema_version(conn: &Connection) -> Result<u32> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM sync_state WHERE key = ?1 LIMIT 1",
            params![SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()
        .context("read mailbox schema version")?;

    match raw {
        None => Ok(0),
        Some(version) => version
            .parse::<u32>()
            .with_context(|| format!("invalid schema version in mailbox database: {version}")),
    }
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO sync_state (key, value, updated_at)
        VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
        params![SCHEMA_VERSION_KEY, version.to_string()],
    )
    .with_context(|| format!("record schema version {version}"))?;

    Ok(())
}

fn apply_v1(conn: &Connection) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .context("begin schema v1 transaction")?;
    schema::create_schema(&tx).context("create mailbox tables")?;
    set_schema_version(&tx, 1)?;
    tx.commit().context("commit schema v1")?;
    Ok(())
}
