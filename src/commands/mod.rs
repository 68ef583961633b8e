pub mod compare;
pub mod completions;
pub mod prompts;
pub mod status;

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::cli::{AnalysisArgs, StoreArgs};
use crate::config::AnalysisSettings;
use crate::store::SqliteStore;

const DB_FILE_NAME: &str = "oedipus.sqlite";
const SETTINGS_FILE_NAME: &str = "settings.json";

pub fn resolve_db_path(store: &StoreArgs) -> PathBuf {
    store
        .db_path
        .clone()
        .unwrap_or_else(|| store.cache_root.join(DB_FILE_NAME))
}

pub fn open_store(store: &StoreArgs) -> Result<SqliteStore> {
    SqliteStore::open(&resolve_db_path(store))
}

/// Settings file (explicit path, else `<cache_root>/settings.json`), then flags.
pub fn load_settings(store: &StoreArgs, analysis: &AnalysisArgs) -> Result<AnalysisSettings> {
    let mut settings = AnalysisSettings::load(
        analysis.settings_path.as_deref(),
        &store.cache_root.join(SETTINGS_FILE_NAME),
    )?;

    if let Some(cap) = analysis.aligned_row_cap {
        settings.aligned_row_cap = cap;
    }
    if let Some(alpha) = analysis.significance_alpha {
        settings.significance_alpha = alpha;
    }
    if let Some(threshold) = analysis.large_effect_threshold {
        settings.large_effect_threshold = threshold;
    }
    if let Some(level) = analysis.confidence_level {
        settings.confidence_level = level;
    }
    if let Some(path) = &analysis.tokenizer_path {
        settings.tokenizer_path = Some(path.clone());
    }

    settings.validate().context("invalid analysis settings")?;
    Ok(settings)
}

/// Parses repeated `key=value` flags into the comparison config bag.
pub fn parse_options(raw: &[String]) -> Result<BTreeMap<String, Value>> {
    let pattern = Regex::new(r"^([A-Za-z_][A-Za-z0-9_.-]*)=(.*)$")
        .context("failed to compile option pattern")?;

    let mut options = BTreeMap::new();
    for entry in raw {
        let Some(captures) = pattern.captures(entry) else {
            bail!("invalid --option {entry:?}, expected key=value");
        };
        let key = captures[1].to_string();
        let raw_value = &captures[2];
        let value = serde_json::from_str::<Value>(raw_value)
            .unwrap_or_else(|_| Value::String(raw_value.to_string()));
        if options.insert(key.clone(), value).is_some() {
            bail!("--option {key} given more than once");
        }
    }
    Ok(options)
}

pub fn write_json_stdout<T: Serialize>(value: &T) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, value).context("failed to serialize json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn store_args(cache_root: PathBuf) -> StoreArgs {
        StoreArgs {
            cache_root,
            db_path: None,
        }
    }

    #[test]
    fn options_parse_json_values_and_fall_back_to_strings() {
        let raw = vec![
            "min_aligned=10".to_string(),
            "label=baseline run".to_string(),
            "flags={\"strict\":true}".to_string(),
            "empty=".to_string(),
        ];

        let options = parse_options(&raw).expect("options should parse");

        assert_eq!(options["min_aligned"], Value::from(10));
        assert_eq!(options["label"], Value::from("baseline run"));
        assert_eq!(options["flags"]["strict"], Value::Bool(true));
        assert_eq!(options["empty"], Value::from(""));
    }

    #[test]
    fn malformed_or_repeated_options_are_rejected() {
        assert!(parse_options(&["no_equals".to_string()]).is_err());
        assert!(parse_options(&["=value".to_string()]).is_err());
        assert!(parse_options(&["a=1".to_string(), "a=2".to_string()]).is_err());
    }

    #[test]
    fn flags_override_settings_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            r#"{ "aligned_row_cap": 50, "significance_alpha": 0.01 }"#,
        )
        .expect("settings should write");

        let analysis = AnalysisArgs {
            significance_alpha: Some(0.1),
            ..AnalysisArgs::default()
        };
        let settings = load_settings(&store_args(dir.path().to_path_buf()), &analysis)
            .expect("settings should load");

        assert_eq!(settings.aligned_row_cap, 50);
        assert_eq!(settings.significance_alpha, 0.1);
        assert_eq!(settings.workers, AnalysisSettings::default().workers);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let analysis = AnalysisArgs {
            confidence_level: Some(1.5),
            ..AnalysisArgs::default()
        };

        assert!(load_settings(&store_args(dir.path().to_path_buf()), &analysis).is_err());
    }

    #[test]
    fn db_path_defaults_under_cache_root() {
        let store = store_args(PathBuf::from("/tmp/cache"));
        assert_eq!(resolve_db_path(&store), PathBuf::from("/tmp/cache/oedipus.sqlite"));
    }
}
