use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::util::now_utc_string;

pub const DB_SCHEMA_VERSION: &str = "0.2.0";

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys")?;
    connection
        .busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;
    Ok(())
}

pub(super) fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS prompt_sets (
              prompt_set_id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              prompts_json TEXT NOT NULL,
              prompt_count INTEGER NOT NULL,
              sha256 TEXT NOT NULL,
              created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS completion_sets (
              completion_set_id TEXT PRIMARY KEY,
              prompt_set_id TEXT NOT NULL,
              name TEXT NOT NULL,
              completions_json TEXT NOT NULL,
              completion_count INTEGER NOT NULL,
              sha256 TEXT NOT NULL,
              created_at TEXT NOT NULL,
              FOREIGN KEY(prompt_set_id) REFERENCES prompt_sets(prompt_set_id)
            );

            CREATE TABLE IF NOT EXISTS comparisons (
              comparison_id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              prompt_set_id TEXT NOT NULL,
              completion_set_ids_json TEXT NOT NULL,
              alignment_key TEXT NOT NULL,
              config_json TEXT NOT NULL,
              status TEXT NOT NULL,
              results_json TEXT NOT NULL,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL,
              FOREIGN KEY(prompt_set_id) REFERENCES prompt_sets(prompt_set_id)
            );

            CREATE INDEX IF NOT EXISTS idx_completion_sets_prompt_set ON completion_sets(prompt_set_id);
            CREATE INDEX IF NOT EXISTS idx_comparisons_status ON comparisons(status);
            CREATE INDEX IF NOT EXISTS idx_comparisons_created ON comparisons(created_at);
            ",
        )
        .context("failed to initialize schema")?;

    let now = now_utc_string();
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}
