//! Parallel training of many categories.
//!
//! Every category is an independent [`TrainingTask`] with its own copy of
//! the rows and its own model, so workers share nothing but the read-only
//! data source, the configuration and a queue of pending tasks.

use std::{
    collections::VecDeque,
    num::NonZeroUsize,
    panic,
    sync::{Mutex, PoisonError},
    thread,
};

use tracing::{info, warn};

use crate::{
    config::TrainingConfig,
    controller::{TrainingError, TrainingResult, TrainingTask},
    data_source::DataSource,
    metrics::{CategoryFailure, EpochRecord, RunSummary},
};

/// Follows one task on its worker thread while it trains.
pub trait TaskObserver {
    /// Called after every epoch, starting with the untrained epoch 0.
    fn epoch_finished(&mut self, record: &EpochRecord);

    /// Called once with the task's result, before the next task starts.
    fn finished(self, result: &Result<TrainingResult, TrainingError>);
}

impl TaskObserver for () {
    fn epoch_finished(&mut self, _: &EpochRecord) {}

    fn finished(self, _: &Result<TrainingResult, TrainingError>) {}
}

/// Result of one category in a run.
#[derive(Debug)]
pub struct CategoryOutcome {
    pub category: String,
    pub result: Result<TrainingResult, TrainingError>,
}

#[derive(Debug)]
pub struct RunReport {
    /// One entry per task, in submission order.
    pub outcomes: Vec<CategoryOutcome>,
    pub summary: RunSummary,
}

impl RunReport {
    /// Successful results, in submission order.
    pub fn results(&self) -> impl Iterator<Item = &TrainingResult> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler {
    max_workers: Option<NonZeroUsize>,
}

impl Scheduler {
    /// Creates a scheduler using at most `max_workers` threads, or one per
    /// available core when `None`. A cap of zero is treated as one.
    #[must_use]
    pub fn new(max_workers: Option<usize>) -> Self {
        Self {
            max_workers: max_workers.map(|n| NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Number of threads used for `task_count` tasks.
    #[must_use]
    pub fn worker_count(&self, task_count: usize) -> usize {
        let cap = self
            .max_workers
            .or_else(|| thread::available_parallelism().ok())
            .map_or(1, NonZeroUsize::get);
        cap.min(task_count).max(1)
    }

    /// Trains every task and reports all outcomes.
    ///
    /// A failing category does not stop the others; it is recorded as a
    /// failure in the summary. `observe` is called on the worker thread
    /// with the submission index of each task just before it starts, and
    /// the returned observer sees that task's epochs and result as they
    /// happen.
    pub fn run<D, S, O>(
        &self,
        source: &D,
        config: &TrainingConfig,
        tasks: Vec<TrainingTask>,
        observe: S,
    ) -> RunReport
    where
        D: DataSource + ?Sized,
        S: Fn(usize, &TrainingTask) -> O + Sync,
        O: TaskObserver,
    {
        let task_count = tasks.len();
        let workers = self.worker_count(task_count);
        info!(tasks = task_count, workers, "scheduling categories");

        let queue = Mutex::new(tasks.into_iter().enumerate().collect::<VecDeque<_>>());
        let next_task = || {
            queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
        };

        let worker = || {
            let mut done = Vec::new();
            while let Some((index, task)) = next_task() {
                let mut observer = observe(index, &task);
                let result = task.run_observed(source, config, &mut |record| {
                    observer.epoch_finished(record);
                });
                observer.finished(&result);
                done.push((
                    index,
                    CategoryOutcome {
                        category: task.category.name().to_owned(),
                        result,
                    },
                ));
            }
            done
        };

        let mut finished = thread::scope(|s| {
            let handles = (0..workers).map(|_| s.spawn(worker)).collect::<Vec<_>>();
            handles
                .into_iter()
                .flat_map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|payload| panic::resume_unwind(payload))
                })
                .collect::<Vec<_>>()
        });
        finished.sort_unstable_by_key(|(index, _)| *index);
        let outcomes = finished
            .into_iter()
            .map(|(_, outcome)| outcome)
            .collect::<Vec<_>>();

        let failures = outcomes
            .iter()
            .filter_map(|outcome| {
                let err = outcome.result.as_ref().err()?;
                warn!(category = %outcome.category, error = %err, "category failed");
                Some(CategoryFailure {
                    category: outcome.category.clone(),
                    error: err.to_string(),
                })
            })
            .collect();
        let summary = RunSummary::new(
            outcomes
                .iter()
                .filter_map(|o| o.result.as_ref().ok())
                .map(|r| &r.report),
            failures,
        );
        info!(
            succeeded = summary.succeeded,
            failed = summary.failures.len(),
            "run finished"
        );

        RunReport { outcomes, summary }
    }
}

#[cfg(test)]
mod tests {
    use cardnet_network::InputFeature;

    use super::*;
    use crate::{
        config::{Normalization, StopConfig},
        data_source::CategoryKey,
        features::FeatureSet,
        learner::LearnerKind,
        memory::{Instance, InstanceTable, MemoryDataSource},
    };

    fn source() -> MemoryDataSource {
        let columns = ["x", "player_final_score"].map(str::to_owned).to_vec();
        let categories = ["Village", "Smithy", "Moat"];
        let instances = (0..180)
            .zip(categories.iter().cycle())
            .map(|(i, category)| {
                let x = f64::from(i % 4) / 4.0;
                Instance {
                    category: (*category).to_owned(),
                    partition_key: f64::from(i % 60),
                    values: vec![x, 20.0 + 10.0 * x],
                }
            })
            .collect();
        MemoryDataSource::new(InstanceTable { columns, instances })
    }

    fn config() -> TrainingConfig {
        TrainingConfig {
            normalization: Normalization::new(0.0, 50.0).unwrap(),
            trainings_per_epoch: Some(10),
            stop: StopConfig {
                window_size: 2,
                max_epochs: Some(8),
                plateau_tolerance: 0.0,
            },
            ..TrainingConfig::default()
        }
    }

    fn task(category: &str, seed: u64) -> TrainingTask {
        TrainingTask::new(
            CategoryKey::parse(category),
            FeatureSet::new(vec![InputFeature::new("x", 1.0)]),
            seed,
        )
    }

    /// Checks that epochs arrive in order and match the final history.
    struct EpochCounter<'a> {
        index: usize,
        epochs: usize,
        seen: &'a Mutex<Vec<(usize, usize)>>,
    }

    impl TaskObserver for EpochCounter<'_> {
        fn epoch_finished(&mut self, record: &EpochRecord) {
            assert_eq!(record.epoch, self.epochs);
            self.epochs += 1;
        }

        fn finished(self, result: &Result<TrainingResult, TrainingError>) {
            let history = result.as_ref().map_or(0, |r| r.report.history.len());
            assert_eq!(self.epochs, history);
            self.seen.lock().unwrap().push((self.index, self.epochs));
        }
    }

    #[test]
    fn test_worker_count() {
        assert_eq!(Scheduler::new(Some(4)).worker_count(2), 2);
        assert_eq!(Scheduler::new(Some(2)).worker_count(9), 2);
        assert_eq!(Scheduler::new(Some(0)).worker_count(9), 1);
        assert_eq!(Scheduler::new(None).worker_count(0), 1);
    }

    #[test]
    fn test_outcomes_keep_submission_order() {
        let source = source();
        let tasks = ["Smithy", "Moat", "All", "Village"]
            .iter()
            .zip(0..)
            .map(|(name, seed)| task(name, seed))
            .collect();
        let seen = Mutex::new(Vec::new());
        let report = Scheduler::new(Some(3)).run(&source, &config(), tasks, |index, _| {
            EpochCounter {
                index,
                epochs: 0,
                seen: &seen,
            }
        });

        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), [0, 1, 2, 3]);
        assert!(seen.iter().all(|(_, epochs)| *epochs > 0));
        let categories = report
            .outcomes
            .iter()
            .map(|o| o.category.as_str())
            .collect::<Vec<_>>();
        assert_eq!(categories, ["Smithy", "Moat", "All", "Village"]);
        assert!(report.outcomes.iter().all(|o| o.result.is_ok()));
        assert_eq!(report.summary.succeeded, 4);
        assert!(report.summary.failures.is_empty());
        assert_eq!(report.results().count(), 4);
    }

    #[test]
    fn test_failure_does_not_stop_other_categories() {
        let source = source();
        let tasks = vec![task("Village", 1), task("Chapel", 2), task("Moat", 3)];
        let report = Scheduler::new(Some(2)).run(&source, &config(), tasks, |_, _| ());

        assert_eq!(report.summary.categories, 3);
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.summary.failures.len(), 1);
        assert_eq!(report.summary.failures[0].category, "Chapel");
        assert!(matches!(
            report.outcomes[1].result,
            Err(TrainingError::EmptyPartition { .. })
        ));
    }

    #[test]
    fn test_diverged_category_is_reported() {
        let source = source();
        let mut config = config();
        config.learner.kind = LearnerKind::Linear;
        config.learner.params.learning_rate = 1e100;
        let report =
            Scheduler::new(Some(2)).run(&source, &config, vec![task("Moat", 4)], |_, _| ());

        assert_eq!(report.summary.succeeded, 0);
        assert_eq!(report.summary.failures.len(), 1);
        assert!(report.summary.failures[0].error.contains("diverged"));
    }

    #[test]
    fn test_parallel_run_matches_sequential_run() {
        let source = source();
        let tasks = || vec![task("Village", 7), task("Smithy", 8), task("Moat", 9)];
        let parallel = Scheduler::new(Some(3)).run(&source, &config(), tasks(), |_, _| ());
        let sequential = Scheduler::new(Some(1)).run(&source, &config(), tasks(), |_, _| ());
        for (a, b) in parallel.results().zip(sequential.results()) {
            assert_eq!(a.model, b.model);
            assert_eq!(a.report.epochs, b.report.epochs);
        }
    }
}
