use std::io::{self, Write};

use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::resolve_db_path;
use crate::store::{DB_SCHEMA_VERSION, SqliteStore};

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = resolve_db_path(&args.store);
    info!(cache_root = %args.store.cache_root.display(), "status requested");

    if !db_path.exists() {
        warn!(path = %db_path.display(), "database file missing");
        return Ok(());
    }

    let store = SqliteStore::open(&db_path)?;
    let prompt_sets = store.count_rows("SELECT COUNT(*) FROM prompt_sets")?;
    let completion_sets = store.count_rows("SELECT COUNT(*) FROM completion_sets")?;
    let comparisons = store.count_rows("SELECT COUNT(*) FROM comparisons")?;
    let by_status = store.comparison_status_counts()?;

    info!(
        path = %db_path.display(),
        schema_version = DB_SCHEMA_VERSION,
        prompt_sets,
        completion_sets,
        comparisons,
        "database status"
    );

    let mut output = io::stdout().lock();
    writeln!(output, "Database: {}", db_path.display())?;
    writeln!(output, "Schema: {DB_SCHEMA_VERSION}")?;
    writeln!(output, "Prompt sets: {prompt_sets}")?;
    writeln!(output, "Completion sets: {completion_sets}")?;
    writeln!(output, "Comparisons: {comparisons}")?;
    for (status, count) in &by_status {
        writeln!(output, "\t{status}={count}")?;
    }
    Ok(())
}
