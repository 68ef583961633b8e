use std::io::{self, Write};

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::{
    CompareArgs, CompareCommand, CompareCreateArgs, CompareIdArgs, CompareRunArgs,
    CompareShowArgs, ListArgs, RecoverArgs, RunPendingArgs,
};
use crate::commands::{load_settings, open_store, parse_options, write_json_stdout};
use crate::config::AnalysisSettings;
use crate::error::AnalysisError;
use crate::model::{Comparison, ComparisonStatus};
use crate::orchestrator::{NewComparison, Orchestrator};
use crate::store::{ComparisonStore, SqliteStore};
use crate::util::write_json_pretty;
use crate::worker::AnalysisPool;

pub fn run(args: CompareArgs) -> Result<()> {
    match args.command {
        CompareCommand::Create(args) => create(args),
        CompareCommand::Run(args) => run_one(args),
        CompareCommand::RunPending(args) => run_pending(args),
        CompareCommand::Show(args) => show(args),
        CompareCommand::List(args) => list(args),
        CompareCommand::Delete(args) => delete(args),
        CompareCommand::Recover(args) => recover(args),
    }
}

fn create(args: CompareCreateArgs) -> Result<()> {
    let config = parse_options(&args.options)?;
    let settings = load_settings(&args.store, &args.analysis)?;
    let orchestrator = Orchestrator::new(open_store(&args.store)?, settings);

    let created = orchestrator.create_comparison(NewComparison {
        name: args.name,
        prompt_set_id: args.prompt_set_id,
        completion_set_ids: args.completion_set_ids,
        alignment_key: args.alignment_key,
        config,
    })?;

    let comparison = if args.run {
        orchestrator.run_analysis(&created.id)?
    } else {
        created
    };
    print_comparison(&comparison, args.json)
}

fn run_one(args: CompareRunArgs) -> Result<()> {
    let settings = load_settings(&args.store, &args.analysis)?;
    let orchestrator = Orchestrator::new(open_store(&args.store)?, settings);

    let comparison = orchestrator.run_analysis(&args.id)?;
    print_comparison(&comparison, args.json)
}

fn run_pending(args: RunPendingArgs) -> Result<()> {
    let mut settings = load_settings(&args.store, &args.analysis)?;
    if let Some(workers) = args.workers {
        settings.workers = workers;
    }
    settings.validate()?;

    let pending = open_store(&args.store)?.pending_comparison_ids()?;
    if pending.is_empty() {
        info!("no pending comparisons");
        return Ok(());
    }

    let workers = settings.workers.min(pending.len());
    let pool = AnalysisPool::start(workers, |_| worker_orchestrator(&args, &settings))?;
    let handles = pending
        .iter()
        .map(|comparison_id| pool.submit(comparison_id))
        .collect::<Result<Vec<_>>>()?;

    let mut completed = 0usize;
    let mut failed = 0usize;
    let mut errors = 0usize;
    for handle in handles {
        let comparison_id = handle.comparison_id().to_string();
        match handle.wait() {
            Ok(status) if !status.is_terminal() => {
                info!(comparison_id = %comparison_id, status = %status, "comparison left unfinished");
            }
            Ok(ComparisonStatus::Completed) => completed += 1,
            Ok(_) => failed += 1,
            Err(err) => {
                warn!(comparison_id = %comparison_id, error = %err, "comparison did not run");
                errors += 1;
            }
        }
    }
    pool.shutdown();

    info!(
        submitted = pending.len(),
        completed, failed, errors, "pending comparisons processed"
    );
    if errors > 0 {
        bail!("{errors} comparison(s) could not be run");
    }
    Ok(())
}

fn worker_orchestrator(
    args: &RunPendingArgs,
    settings: &AnalysisSettings,
) -> Result<Orchestrator<SqliteStore>> {
    Ok(Orchestrator::new(open_store(&args.store)?, settings.clone()))
}

fn show(args: CompareShowArgs) -> Result<()> {
    let store = open_store(&args.store)?;
    let comparison = store
        .comparison(&args.id)?
        .ok_or_else(|| AnalysisError::not_found("comparison", &args.id))?;

    if let Some(path) = &args.output {
        write_json_pretty(path, &comparison)?;
        info!(comparison_id = %comparison.id, path = %path.display(), "comparison exported");
    }
    print_comparison(&comparison, args.json)
}

fn list(args: ListArgs) -> Result<()> {
    let store = open_store(&args.store)?;
    let comparisons = store.list_comparisons()?;
    if args.json {
        return write_json_stdout(&comparisons);
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    for listing in &comparisons {
        writeln!(
            output,
            "{}\t{}\t{}\tupdated_at={}",
            listing.id, listing.status, listing.name, listing.updated_at
        )?;
    }
    output.flush()?;
    Ok(())
}

fn delete(args: CompareIdArgs) -> Result<()> {
    let store = open_store(&args.store)?;
    if !store.delete_comparison(&args.id)? {
        bail!("comparison not found: {}", args.id);
    }
    info!(comparison_id = %args.id, "comparison deleted");
    Ok(())
}

fn recover(args: RecoverArgs) -> Result<()> {
    let store = open_store(&args.store)?;
    let reset = store.reset_orphaned_runs()?;

    let mut output = io::stdout().lock();
    writeln!(output, "Reset {reset} running comparison(s) to pending")?;
    Ok(())
}

fn print_comparison(comparison: &Comparison, json: bool) -> Result<()> {
    if json {
        return write_json_stdout(comparison);
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    let results = &comparison.results;

    writeln!(output, "Comparison: {} ({})", comparison.name, comparison.id)?;
    writeln!(output, "Status: {}", comparison.status)?;
    writeln!(
        output,
        "Prompt set: {}\tcompletion sets: {}\talignment key: {}",
        comparison.prompt_set_id,
        comparison.completion_set_ids.join(", "),
        comparison.alignment_key
    )?;

    if let Some(alignment) = &results.alignment {
        writeln!(
            output,
            "Coverage: {}/{} prompts ({:.2}%), unmatched={}, rows={}",
            alignment.coverage.matched_prompts,
            alignment.coverage.total_prompts,
            alignment.coverage.coverage_percentage,
            alignment.unmatched_prompts.len(),
            alignment.aligned_rows.len()
        )?;
    }
    if let Some(progress) = &results.progress {
        if comparison.status == ComparisonStatus::Running {
            writeln!(output, "Progress: {} ({})", progress.message, progress.step)?;
        }
    }
    if let Some(error) = &results.error {
        writeln!(output, "Error: {error}")?;
    }

    if !results.metrics.is_empty() {
        writeln!(output, "Metrics: {}", results.metrics.len())?;
        for metric in &results.metrics {
            writeln!(
                output,
                "\t{}\ta={:.3} b={:.3}\tt={:.3} df={} p={:.4} d={:.2} ci=[{:.3}, {:.3}]",
                metric.name,
                metric.dataset_a_value,
                metric.dataset_b_value,
                metric.statistic,
                metric.degrees_of_freedom,
                metric.p_value,
                metric.effect_size,
                metric.ci_lower,
                metric.ci_upper
            )?;
        }
    }

    for (name, information) in &results.information {
        writeln!(
            output,
            "Information [{name}]: H(prompt)={:.3} H(completion)={:.3} H(completion|prompt)={:.3} gain={:.3} normalized={:.3}",
            information.input_entropy,
            information.completion_entropy,
            information.response_entropy,
            information.information_gain,
            information.normalized_information_gain
        )?;
    }
    for (name, diversity) in &results.diversity {
        writeln!(
            output,
            "Diversity [{name}]: empowerment={:.3} avg_completions={:.2} unique_ratio={:.3} length_variance={:.2}",
            diversity.empowerment,
            diversity.average_completions_per_prompt,
            diversity.unique_completions_ratio,
            diversity.completion_length_variance
        )?;
    }

    if !results.insights.is_empty() {
        writeln!(output, "Insights:")?;
        for insight in &results.insights {
            writeln!(output, "\t- {insight}")?;
        }
    }

    output.flush()?;
    Ok(())
}
