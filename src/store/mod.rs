//! SQLite persistence for prompt sets, completion sets and comparisons.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AnalysisError;
use crate::model::{
    Comparison, ComparisonResults, ComparisonStatus, CompletionMap, CompletionSet, PromptMap,
    PromptSet,
};
use crate::util::{ensure_directory, now_utc_string, sha256_json};

mod schema;
#[cfg(test)]
mod tests;

pub use schema::DB_SCHEMA_VERSION;

/// Storage operations the orchestrator depends on.
///
/// `begin_run` must be an atomic compare-and-set from `pending` to `running`;
/// `write_results` must replace status and results bag in one write.
pub trait ComparisonStore {
    fn prompt_set(&self, prompt_set_id: &str) -> Result<Option<PromptSet>>;

    /// Returns the sets that exist, in the order requested.
    fn completion_sets(&self, completion_set_ids: &[String]) -> Result<Vec<CompletionSet>>;

    fn insert_comparison(&self, comparison: &Comparison) -> Result<()>;

    fn comparison(&self, comparison_id: &str) -> Result<Option<Comparison>>;

    /// Returns `true` when this caller moved the comparison out of `pending`.
    fn begin_run(&self, comparison_id: &str) -> Result<bool>;

    fn write_results(
        &self,
        comparison_id: &str,
        status: ComparisonStatus,
        results: &ComparisonResults,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetListing {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub item_count: i64,
    pub sha256: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonListing {
    pub id: String,
    pub name: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_directory(parent)?;
            }
        }

        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        Self::from_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> Result<Self> {
        schema::configure_connection(&connection)?;
        schema::ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn insert_prompt_set(&self, name: &str, prompts: PromptMap) -> Result<PromptSet, AnalysisError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AnalysisError::validation("prompt set name must not be empty"));
        }

        let prompt_set = PromptSet {
            id: format!("ps-{}", Uuid::new_v4()),
            name: name.to_string(),
            sha256: sha256_json(&prompts)?,
            prompts,
            created_at: now_utc_string(),
        };

        let prompts_json =
            serde_json::to_string(&prompt_set.prompts).context("failed to encode prompts")?;
        self.connection
            .execute(
                "INSERT INTO prompt_sets(prompt_set_id, name, prompts_json, prompt_count, sha256, created_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    &prompt_set.id,
                    &prompt_set.name,
                    prompts_json,
                    prompt_set.prompts.len() as i64,
                    &prompt_set.sha256,
                    &prompt_set.created_at
                ],
            )
            .context("failed to insert prompt set")?;

        info!(
            prompt_set_id = %prompt_set.id,
            name = %prompt_set.name,
            prompts = prompt_set.prompts.len(),
            "prompt set stored"
        );
        Ok(prompt_set)
    }

    /// Stores a completion set after checking that every prompt id it carries
    /// belongs to its prompt set.
    pub fn insert_completion_set(
        &self,
        prompt_set_id: &str,
        name: &str,
        completions: CompletionMap,
    ) -> Result<CompletionSet, AnalysisError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AnalysisError::validation(
                "completion set name must not be empty",
            ));
        }

        let Some(prompt_set) = self.prompt_set(prompt_set_id)? else {
            return Err(AnalysisError::validation(format!(
                "prompt set {prompt_set_id} does not exist"
            )));
        };

        let foreign_ids = completions
            .keys()
            .filter(|prompt_id| !prompt_set.prompts.contains_key(*prompt_id))
            .cloned()
            .collect::<Vec<String>>();
        if !foreign_ids.is_empty() {
            warn!(
                prompt_set_id,
                foreign_ids = foreign_ids.len(),
                "rejected completion set with unknown prompt ids"
            );
            return Err(AnalysisError::validation(format!(
                "completion prompt ids not found in prompt set {prompt_set_id}: {}",
                foreign_ids.join(", ")
            )));
        }

        let completion_set = CompletionSet {
            id: format!("cs-{}", Uuid::new_v4()),
            name: name.to_string(),
            prompt_set_id: prompt_set_id.to_string(),
            sha256: sha256_json(&completions)?,
            completions,
            created_at: now_utc_string(),
        };

        let completions_json = serde_json::to_string(&completion_set.completions)
            .context("failed to encode completions")?;
        self.connection
            .execute(
                "INSERT INTO completion_sets(
                   completion_set_id, prompt_set_id, name, completions_json, completion_count, sha256, created_at
                 ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    &completion_set.id,
                    &completion_set.prompt_set_id,
                    &completion_set.name,
                    completions_json,
                    completion_set.total_completions() as i64,
                    &completion_set.sha256,
                    &completion_set.created_at
                ],
            )
            .context("failed to insert completion set")?;

        info!(
            completion_set_id = %completion_set.id,
            prompt_set_id = %completion_set.prompt_set_id,
            name = %completion_set.name,
            completions = completion_set.total_completions(),
            "completion set stored"
        );
        Ok(completion_set)
    }

    pub fn list_prompt_sets(&self) -> Result<Vec<DatasetListing>> {
        let mut statement = self.connection.prepare(
            "SELECT prompt_set_id, name, prompt_count, sha256, created_at
             FROM prompt_sets ORDER BY created_at, prompt_set_id",
        )?;
        let rows = statement.query_map([], |row| {
            Ok(DatasetListing {
                id: row.get(0)?,
                name: row.get(1)?,
                parent_id: None,
                item_count: row.get(2)?,
                sha256: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list prompt sets")
    }

    pub fn list_completion_sets(&self, prompt_set_id: Option<&str>) -> Result<Vec<DatasetListing>> {
        let mut statement = self.connection.prepare(
            "SELECT completion_set_id, name, prompt_set_id, completion_count, sha256, created_at
             FROM completion_sets
             WHERE ?1 IS NULL OR prompt_set_id = ?1
             ORDER BY created_at, completion_set_id",
        )?;
        let rows = statement.query_map([prompt_set_id], |row| {
            Ok(DatasetListing {
                id: row.get(0)?,
                name: row.get(1)?,
                parent_id: Some(row.get(2)?),
                item_count: row.get(3)?,
                sha256: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list completion sets")
    }

    pub fn list_comparisons(&self) -> Result<Vec<ComparisonListing>> {
        let mut statement = self.connection.prepare(
            "SELECT comparison_id, name, status, created_at, updated_at
             FROM comparisons ORDER BY created_at DESC, comparison_id",
        )?;
        let rows = statement.query_map([], |row| {
            Ok(ComparisonListing {
                id: row.get(0)?,
                name: row.get(1)?,
                status: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list comparisons")
    }

    pub fn pending_comparison_ids(&self) -> Result<Vec<String>> {
        let mut statement = self.connection.prepare(
            "SELECT comparison_id FROM comparisons WHERE status = 'pending'
             ORDER BY created_at, comparison_id",
        )?;
        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list pending comparisons")
    }

    pub fn delete_comparison(&self, comparison_id: &str) -> Result<bool> {
        let deleted = self
            .connection
            .execute(
                "DELETE FROM comparisons WHERE comparison_id = ?1",
                [comparison_id],
            )
            .with_context(|| format!("failed to delete comparison {comparison_id}"))?;
        Ok(deleted > 0)
    }

    /// Maintenance sweep: comparisons left `running` by a dead process go back
    /// to `pending` so they can be analysed again.
    pub fn reset_orphaned_runs(&self) -> Result<usize> {
        let reset = self
            .connection
            .execute(
                "UPDATE comparisons SET status = 'pending', updated_at = ?1 WHERE status = 'running'",
                [now_utc_string()],
            )
            .context("failed to reset orphaned runs")?;
        if reset > 0 {
            warn!(reset, "reset orphaned running comparisons to pending");
        }
        Ok(reset)
    }

    pub fn count_rows(&self, sql: &str) -> Result<i64> {
        let count: i64 = self.connection.query_row(sql, [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn comparison_status_counts(&self) -> Result<BTreeMap<String, i64>> {
        let mut statement = self
            .connection
            .prepare("SELECT status, COUNT(*) FROM comparisons GROUP BY status ORDER BY status")?;
        let rows = statement.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()
            .context("failed to count comparisons by status")
    }

    fn load_completion_set(&self, completion_set_id: &str) -> Result<Option<CompletionSet>> {
        let raw = self
            .connection
            .query_row(
                "SELECT completion_set_id, prompt_set_id, name, completions_json, sha256, created_at
                 FROM completion_sets WHERE completion_set_id = ?1",
                [completion_set_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, prompt_set_id, name, completions_json, sha256, created_at)) = raw else {
            return Ok(None);
        };
        let completions = serde_json::from_str::<CompletionMap>(&completions_json)
            .with_context(|| format!("failed to decode completions for {id}"))?;

        Ok(Some(CompletionSet {
            id,
            name,
            prompt_set_id,
            completions,
            sha256,
            created_at,
        }))
    }
}

impl ComparisonStore for SqliteStore {
    fn prompt_set(&self, prompt_set_id: &str) -> Result<Option<PromptSet>> {
        let raw = self
            .connection
            .query_row(
                "SELECT prompt_set_id, name, prompts_json, sha256, created_at
                 FROM prompt_sets WHERE prompt_set_id = ?1",
                [prompt_set_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, name, prompts_json, sha256, created_at)) = raw else {
            return Ok(None);
        };
        let prompts = serde_json::from_str::<PromptMap>(&prompts_json)
            .with_context(|| format!("failed to decode prompts for {id}"))?;

        Ok(Some(PromptSet {
            id,
            name,
            prompts,
            sha256,
            created_at,
        }))
    }

    fn completion_sets(&self, completion_set_ids: &[String]) -> Result<Vec<CompletionSet>> {
        let mut sets = Vec::with_capacity(completion_set_ids.len());
        for completion_set_id in completion_set_ids {
            if let Some(set) = self.load_completion_set(completion_set_id)? {
                sets.push(set);
            }
        }
        Ok(sets)
    }

    fn insert_comparison(&self, comparison: &Comparison) -> Result<()> {
        let completion_set_ids_json = serde_json::to_string(&comparison.completion_set_ids)
            .context("failed to encode completion set ids")?;
        let config_json =
            serde_json::to_string(&comparison.config).context("failed to encode config")?;
        let results_json =
            serde_json::to_string(&comparison.results).context("failed to encode results")?;

        self.connection
            .execute(
                "INSERT INTO comparisons(
                   comparison_id, name, prompt_set_id, completion_set_ids_json, alignment_key,
                   config_json, status, results_json, created_at, updated_at
                 ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    &comparison.id,
                    &comparison.name,
                    &comparison.prompt_set_id,
                    completion_set_ids_json,
                    &comparison.alignment_key,
                    config_json,
                    comparison.status.as_str(),
                    results_json,
                    &comparison.created_at,
                    &comparison.updated_at
                ],
            )
            .with_context(|| format!("failed to insert comparison {}", comparison.id))?;
        Ok(())
    }

    fn comparison(&self, comparison_id: &str) -> Result<Option<Comparison>> {
        let raw = self
            .connection
            .query_row(
                "SELECT comparison_id, name, prompt_set_id, completion_set_ids_json, alignment_key,
                        config_json, status, results_json, created_at, updated_at
                 FROM comparisons WHERE comparison_id = ?1",
                [comparison_id],
                |row| {
                    Ok(ComparisonRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        prompt_set_id: row.get(2)?,
                        completion_set_ids_json: row.get(3)?,
                        alignment_key: row.get(4)?,
                        config_json: row.get(5)?,
                        status: row.get(6)?,
                        results_json: row.get(7)?,
                        created_at: row.get(8)?,
                        updated_at: row.get(9)?,
                    })
                },
            )
            .optional()?;

        raw.map(ComparisonRow::into_comparison).transpose()
    }

    fn begin_run(&self, comparison_id: &str) -> Result<bool> {
        let changed = self
            .connection
            .execute(
                "UPDATE comparisons SET status = 'running', updated_at = ?2
                 WHERE comparison_id = ?1 AND status = 'pending'",
                params![comparison_id, now_utc_string()],
            )
            .with_context(|| format!("failed to mark comparison {comparison_id} running"))?;
        Ok(changed == 1)
    }

    fn write_results(
        &self,
        comparison_id: &str,
        status: ComparisonStatus,
        results: &ComparisonResults,
    ) -> Result<()> {
        let results_json = serde_json::to_string(results).context("failed to encode results")?;
        let changed = self
            .connection
            .execute(
                "UPDATE comparisons SET status = ?2, results_json = ?3, updated_at = ?4
                 WHERE comparison_id = ?1",
                params![comparison_id, status.as_str(), results_json, now_utc_string()],
            )
            .with_context(|| format!("failed to write results for comparison {comparison_id}"))?;
        if changed == 0 {
            bail!("comparison {comparison_id} no longer exists");
        }
        Ok(())
    }
}

struct ComparisonRow {
    id: String,
    name: String,
    prompt_set_id: String,
    completion_set_ids_json: String,
    alignment_key: String,
    config_json: String,
    status: String,
    results_json: String,
    created_at: String,
    updated_at: String,
}

impl ComparisonRow {
    fn into_comparison(self) -> Result<Comparison> {
        let completion_set_ids = serde_json::from_str::<Vec<String>>(&self.completion_set_ids_json)
            .with_context(|| format!("failed to decode completion set ids for {}", self.id))?;
        let config = serde_json::from_str::<BTreeMap<String, Value>>(&self.config_json)
            .with_context(|| format!("failed to decode config for {}", self.id))?;
        let results = serde_json::from_str::<ComparisonResults>(&self.results_json)
            .with_context(|| format!("failed to decode results for {}", self.id))?;
        let status = self.status.parse::<ComparisonStatus>()?;

        Ok(Comparison {
            id: self.id,
            name: self.name,
            prompt_set_id: self.prompt_set_id,
            completion_set_ids,
            alignment_key: self.alignment_key,
            config,
            status,
            results,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
