use super::*;

fn prompts(entries: &[(&str, &str)]) -> PromptMap {
    entries
        .iter()
        .map(|(id, text)| (id.to_string(), text.to_string()))
        .collect()
}

fn completions(entries: &[(&str, &[&str])]) -> CompletionMap {
    entries
        .iter()
        .map(|(id, values)| {
            (
                id.to_string(),
                values.iter().map(|value| value.to_string()).collect(),
            )
        })
        .collect()
}

fn pending_comparison(id: &str, prompt_set_id: &str, completion_set_ids: Vec<String>) -> Comparison {
    let now = now_utc_string();
    Comparison {
        id: id.to_string(),
        name: format!("comparison {id}"),
        prompt_set_id: prompt_set_id.to_string(),
        completion_set_ids,
        alignment_key: "prompt_id".to_string(),
        config: BTreeMap::from([("min_aligned".to_string(), Value::from(10))]),
        status: ComparisonStatus::Pending,
        results: ComparisonResults::default(),
        created_at: now.clone(),
        updated_at: now,
    }
}

#[test]
fn schema_records_version_metadata() {
    let store = SqliteStore::open_in_memory().expect("store should open");

    let version: String = store
        .connection()
        .query_row(
            "SELECT value FROM metadata WHERE key = 'db_schema_version'",
            [],
            |row| row.get(0),
        )
        .expect("version row should exist");
    assert_eq!(version, DB_SCHEMA_VERSION);
}

#[test]
fn prompt_set_round_trips_with_fingerprint() {
    let store = SqliteStore::open_in_memory().expect("store should open");

    let stored = store
        .insert_prompt_set("  base  ", prompts(&[("a", "x"), ("b", "y")]))
        .expect("insert should succeed");
    let loaded = store
        .prompt_set(&stored.id)
        .expect("lookup should succeed")
        .expect("prompt set should exist");

    assert_eq!(loaded, stored);
    assert_eq!(loaded.name, "base");
    assert_eq!(loaded.sha256.len(), 64);
    assert!(store.prompt_set("ps-missing").expect("lookup").is_none());
}

#[test]
fn equal_prompt_contents_share_a_fingerprint() {
    let store = SqliteStore::open_in_memory().expect("store should open");

    let first = store
        .insert_prompt_set("first", prompts(&[("a", "x")]))
        .expect("insert should succeed");
    let second = store
        .insert_prompt_set("second", prompts(&[("a", "x")]))
        .expect("insert should succeed");

    assert_ne!(first.id, second.id);
    assert_eq!(first.sha256, second.sha256);
}

#[test]
fn completion_set_must_stay_within_its_prompt_set() {
    let store = SqliteStore::open_in_memory().expect("store should open");
    let prompt_set = store
        .insert_prompt_set("base", prompts(&[("a", "x"), ("b", "y")]))
        .expect("insert should succeed");

    let err = store
        .insert_completion_set(&prompt_set.id, "bad", completions(&[("a", &["r"]), ("z", &["r"])]))
        .expect_err("foreign prompt id should be rejected");
    assert!(matches!(err, AnalysisError::Validation(_)));
    assert!(err.to_string().contains('z'));

    let err = store
        .insert_completion_set("ps-missing", "orphan", completions(&[("a", &["r"])]))
        .expect_err("unknown prompt set should be rejected");
    assert!(matches!(err, AnalysisError::Validation(_)));

    let ok = store
        .insert_completion_set(&prompt_set.id, "good", completions(&[("a", &["r1", "r2"]), ("b", &[])]))
        .expect("subset should be accepted");
    assert_eq!(ok.total_completions(), 2);
}

#[test]
fn completion_sets_come_back_in_requested_order_and_skip_missing() {
    let store = SqliteStore::open_in_memory().expect("store should open");
    let prompt_set = store
        .insert_prompt_set("base", prompts(&[("a", "x")]))
        .expect("insert should succeed");
    let first = store
        .insert_completion_set(&prompt_set.id, "first", completions(&[("a", &["1"])]))
        .expect("insert should succeed");
    let second = store
        .insert_completion_set(&prompt_set.id, "second", completions(&[("a", &["2"])]))
        .expect("insert should succeed");

    let loaded = store
        .completion_sets(&[second.id.clone(), "cs-missing".to_string(), first.id.clone()])
        .expect("lookup should succeed");

    let names = loaded.iter().map(|set| set.name.as_str()).collect::<Vec<&str>>();
    assert_eq!(names, vec!["second", "first"]);
    assert_eq!(loaded[0], second);
}

#[test]
fn listings_filter_by_prompt_set() {
    let store = SqliteStore::open_in_memory().expect("store should open");
    let left = store
        .insert_prompt_set("left", prompts(&[("a", "x")]))
        .expect("insert should succeed");
    let right = store
        .insert_prompt_set("right", prompts(&[("a", "x")]))
        .expect("insert should succeed");
    store
        .insert_completion_set(&left.id, "l1", completions(&[("a", &["1", "2"])]))
        .expect("insert should succeed");
    store
        .insert_completion_set(&right.id, "r1", completions(&[("a", &["1"])]))
        .expect("insert should succeed");

    assert_eq!(store.list_prompt_sets().expect("list").len(), 2);
    assert_eq!(store.list_completion_sets(None).expect("list").len(), 2);

    let filtered = store
        .list_completion_sets(Some(&left.id))
        .expect("list should succeed");
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].name, "l1");
    assert_eq!(filtered[0].item_count, 2);
    assert_eq!(filtered[0].parent_id.as_deref(), Some(left.id.as_str()));
}

#[test]
fn begin_run_only_wins_once_from_pending() {
    let store = SqliteStore::open_in_memory().expect("store should open");
    let prompt_set = store
        .insert_prompt_set("base", prompts(&[("a", "x")]))
        .expect("insert should succeed");
    store
        .insert_comparison(&pending_comparison("cmp-1", &prompt_set.id, vec![]))
        .expect("insert should succeed");

    assert!(store.begin_run("cmp-1").expect("gate should run"));
    assert!(!store.begin_run("cmp-1").expect("gate should run"));
    assert!(!store.begin_run("cmp-missing").expect("gate should run"));

    let loaded = store
        .comparison("cmp-1")
        .expect("lookup should succeed")
        .expect("comparison should exist");
    assert_eq!(loaded.status, ComparisonStatus::Running);
}

#[test]
fn write_results_replaces_status_and_bag() {
    let store = SqliteStore::open_in_memory().expect("store should open");
    let prompt_set = store
        .insert_prompt_set("base", prompts(&[("a", "x")]))
        .expect("insert should succeed");
    let comparison = pending_comparison("cmp-1", &prompt_set.id, vec!["cs-1".to_string()]);
    store.insert_comparison(&comparison).expect("insert should succeed");

    let results = ComparisonResults {
        insights: vec!["done".to_string()],
        error: Some("boom".to_string()),
        ..ComparisonResults::default()
    };
    store
        .write_results("cmp-1", ComparisonStatus::Failed, &results)
        .expect("write should succeed");

    let loaded = store
        .comparison("cmp-1")
        .expect("lookup should succeed")
        .expect("comparison should exist");
    assert_eq!(loaded.status, ComparisonStatus::Failed);
    assert_eq!(loaded.results, results);
    assert_eq!(loaded.config, comparison.config);
    assert_eq!(loaded.completion_set_ids, vec!["cs-1".to_string()]);

    assert!(
        store
            .write_results("cmp-missing", ComparisonStatus::Completed, &results)
            .is_err()
    );
}

#[test]
fn orphaned_runs_return_to_pending() {
    let store = SqliteStore::open_in_memory().expect("store should open");
    let prompt_set = store
        .insert_prompt_set("base", prompts(&[("a", "x")]))
        .expect("insert should succeed");
    for id in ["cmp-1", "cmp-2"] {
        store
            .insert_comparison(&pending_comparison(id, &prompt_set.id, vec![]))
            .expect("insert should succeed");
    }
    assert!(store.begin_run("cmp-1").expect("gate should run"));

    assert_eq!(store.pending_comparison_ids().expect("list"), vec!["cmp-2".to_string()]);
    assert_eq!(store.reset_orphaned_runs().expect("sweep should run"), 1);
    assert_eq!(store.pending_comparison_ids().expect("list").len(), 2);
    assert_eq!(store.reset_orphaned_runs().expect("sweep should run"), 0);
}

#[test]
fn delete_comparison_reports_whether_a_row_went_away() {
    let store = SqliteStore::open_in_memory().expect("store should open");
    let prompt_set = store
        .insert_prompt_set("base", prompts(&[("a", "x")]))
        .expect("insert should succeed");
    store
        .insert_comparison(&pending_comparison("cmp-1", &prompt_set.id, vec![]))
        .expect("insert should succeed");

    let counts = store.comparison_status_counts().expect("counts");
    assert_eq!(counts.get("pending"), Some(&1));

    assert!(store.delete_comparison("cmp-1").expect("delete should run"));
    assert!(!store.delete_comparison("cmp-1").expect("delete should run"));
    assert!(store.list_comparisons().expect("list").is_empty());
    assert_eq!(
        store.count_rows("SELECT COUNT(*) FROM prompt_sets").expect("count"),
        1
    );
}
