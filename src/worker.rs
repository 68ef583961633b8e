//! Background execution of comparison analyses.
//!
//! Each worker thread owns one [`Orchestrator`] (and therefore one store
//! connection) and pulls comparison ids from a shared queue. Submitting returns
//! a [`JobHandle`] the caller may wait on or drop.

use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow, bail};
use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::error::AnalysisError;
use crate::model::ComparisonStatus;
use crate::orchestrator::Orchestrator;
use crate::store::ComparisonStore;

type JobOutcome = std::result::Result<ComparisonStatus, String>;

struct Job {
    comparison_id: String,
    reply: Sender<JobOutcome>,
}

pub struct JobHandle {
    comparison_id: String,
    receiver: Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn comparison_id(&self) -> &str {
        &self.comparison_id
    }

    /// Blocks until the worker has finished with this comparison.
    ///
    /// A comparison whose analysis failed yields `Ok(Failed)`; the failure
    /// itself is in its results bag. `Err` means the job never ran: unknown
    /// id, storage failure or a worker that went away.
    pub fn wait(self) -> Result<ComparisonStatus> {
        let outcome = self.receiver.recv().map_err(|_| {
            anyhow!(
                "worker exited before finishing comparison {}",
                self.comparison_id
            )
        })?;
        outcome.map_err(|message| anyhow!(message))
    }
}

pub struct AnalysisPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl AnalysisPool {
    /// Starts `workers` threads. `factory` runs on the calling thread once per
    /// worker so connection errors surface here rather than inside a thread.
    pub fn start<S, F>(workers: usize, mut factory: F) -> Result<Self>
    where
        S: ComparisonStore + Send + 'static,
        F: FnMut(usize) -> Result<Orchestrator<S>>,
    {
        if workers == 0 {
            bail!("analysis pool needs at least one worker");
        }

        let (sender, receiver) = channel::unbounded::<Job>();
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let orchestrator = factory(worker)
                .with_context(|| format!("failed to build orchestrator for worker {worker}"))?;
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("analysis-worker-{worker}"))
                .spawn(move || worker_loop(worker, orchestrator, receiver))
                .with_context(|| format!("failed to spawn analysis worker {worker}"))?;
            handles.push(handle);
        }

        info!(workers, "analysis pool started");
        Ok(Self {
            sender: Some(sender),
            workers: handles,
        })
    }

    pub fn submit(&self, comparison_id: &str) -> Result<JobHandle> {
        let Some(sender) = &self.sender else {
            bail!("analysis pool is shut down");
        };

        let (reply, receiver) = channel::bounded(1);
        sender
            .send(Job {
                comparison_id: comparison_id.to_string(),
                reply,
            })
            .map_err(|_| anyhow!("analysis workers are no longer running"))?;
        debug!(comparison_id, "comparison queued");

        Ok(JobHandle {
            comparison_id: comparison_id.to_string(),
            receiver,
        })
    }

    /// Lets queued jobs finish, then joins every worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // closing the queue ends each worker loop once it is drained
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("analysis worker panicked");
            }
        }
    }
}

impl Drop for AnalysisPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<S: ComparisonStore>(
    worker: usize,
    orchestrator: Orchestrator<S>,
    receiver: Receiver<Job>,
) {
    debug!(worker, "analysis worker started");
    for job in receiver.iter() {
        let outcome = match orchestrator.run_analysis(&job.comparison_id) {
            Ok(comparison) => Ok(comparison.status),
            // already persisted as failed
            Err(AnalysisError::Computation(_)) => Ok(ComparisonStatus::Failed),
            Err(err) => {
                warn!(worker, comparison_id = %job.comparison_id, error = %err, "job did not run");
                Err(err.to_string())
            }
        };
        // the submitter may have dropped its handle
        let _ = job.reply.send(outcome);
    }
    debug!(worker, "analysis worker stopped");
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::config::AnalysisSettings;
    use crate::model::{CompletionMap, PromptMap};
    use crate::orchestrator::NewComparison;
    use crate::store::SqliteStore;

    fn open(db_path: &Path) -> Orchestrator<SqliteStore> {
        let store = SqliteStore::open(db_path).expect("store should open");
        Orchestrator::new(store, AnalysisSettings::default())
    }

    fn seed_comparisons(orchestrator: &Orchestrator<SqliteStore>, count: usize) -> Vec<String> {
        let prompts = (0..4)
            .map(|index| (format!("p{index}"), format!("prompt {index}")))
            .collect::<PromptMap>();
        let prompt_set = orchestrator
            .store()
            .insert_prompt_set("base", prompts)
            .expect("prompt set should insert");

        let mut completion_set_ids = Vec::new();
        for (name, suffix) in [("terse", ""), ("chatty", " with a lot more words attached")] {
            let completions = (0..4)
                .map(|index| {
                    (
                        format!("p{index}"),
                        vec![format!("answer {index}{suffix}"), format!("alt{suffix}")],
                    )
                })
                .collect::<CompletionMap>();
            let set = orchestrator
                .store()
                .insert_completion_set(&prompt_set.id, name, completions)
                .expect("completion set should insert");
            completion_set_ids.push(set.id);
        }

        (0..count)
            .map(|index| {
                orchestrator
                    .create_comparison(NewComparison {
                        name: format!("run {index}"),
                        prompt_set_id: prompt_set.id.clone(),
                        completion_set_ids: completion_set_ids.clone(),
                        ..NewComparison::default()
                    })
                    .expect("comparison should be created")
                    .id
            })
            .collect()
    }

    #[test]
    fn pool_runs_every_submitted_comparison_to_completion() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("pool.sqlite");
        let seeder = open(&db_path);
        let ids = seed_comparisons(&seeder, 4);

        let pool = AnalysisPool::start(2, |_| Ok(open(&db_path))).expect("pool should start");
        let handles = ids
            .iter()
            .map(|id| pool.submit(id).expect("submit should succeed"))
            .collect::<Vec<JobHandle>>();
        for handle in handles {
            assert_eq!(handle.wait().expect("job should run"), ComparisonStatus::Completed);
        }
        pool.shutdown();

        for id in &ids {
            let comparison = seeder.comparison(id).expect("comparison should exist");
            assert_eq!(comparison.status, ComparisonStatus::Completed);
            assert_eq!(comparison.results.metrics.len(), 5);
        }
    }

    #[test]
    fn async_and_sync_paths_produce_the_same_analysis() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("parity.sqlite");
        let seeder = open(&db_path);
        let ids = seed_comparisons(&seeder, 2);

        let sync = seeder.run_analysis(&ids[0]).expect("sync run should succeed");
        let pool = AnalysisPool::start(1, |_| Ok(open(&db_path))).expect("pool should start");
        let status = pool
            .submit(&ids[1])
            .expect("submit should succeed")
            .wait()
            .expect("job should run");
        drop(pool);
        let background = seeder.comparison(&ids[1]).expect("comparison should exist");

        assert_eq!(status, sync.status);
        assert_eq!(background.results.metrics, sync.results.metrics);
        assert_eq!(background.results.insights, sync.results.insights);
        assert_eq!(background.results.summary, sync.results.summary);
    }

    #[test]
    fn failures_surface_through_status_not_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("failure.sqlite");
        let seeder = open(&db_path);
        let ids = seed_comparisons(&seeder, 1);
        let comparison = seeder.comparison(&ids[0]).expect("comparison should exist");
        seeder
            .store()
            .connection()
            .execute(
                "DELETE FROM completion_sets WHERE completion_set_id = ?1",
                [&comparison.completion_set_ids[0]],
            )
            .expect("delete should succeed");

        let pool = AnalysisPool::start(1, |_| Ok(open(&db_path))).expect("pool should start");
        let failed = pool.submit(&ids[0]).expect("submit should succeed");
        let missing = pool.submit("cmp-missing").expect("submit should succeed");

        assert_eq!(failed.comparison_id(), ids[0]);
        assert_eq!(failed.wait().expect("job should run"), ComparisonStatus::Failed);
        assert!(missing.wait().is_err());

        let stored = seeder.comparison(&ids[0]).expect("comparison should exist");
        assert!(stored.results.error.is_some());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let result = AnalysisPool::start(0, |_| -> Result<Orchestrator<SqliteStore>> {
            bail!("factory should not be called")
        });
        assert!(result.is_err());
    }
}
