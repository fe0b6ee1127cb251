//! Epoch-based training of one category's model.
//!
//! A [`TrainingTask`] trains a single model on the rows of one category:
//!
//! 1. Open the category's rows and build the learner.
//! 2. Run epochs. Epoch 0 only measures the validation error of the
//!    untrained model; every later epoch first trains on a quota of
//!    training rows. Training and validation rows are drawn from endless
//!    streams that reshuffle and restart whenever a pass is exhausted.
//! 3. Feed each epoch's validation MSE to a [`PlateauDetector`]. Once it
//!    reports convergence, or the epoch cap is hit, the loop ends as soon as
//!    every training row has been seen at least once.
//!    A non-finite validation error fails the task as diverged.
//! 4. Measure final SSE, MSE and accuracy with one ordered pass over each of
//!    the training, validation and testing partitions.
//!
//! Labels are normalized before training and prediction, so every error
//! reported here is in normalized units.

use std::time::Instant;

use cardnet_network::NetworkError;
use chrono::Utc;
use rand::{Rng as _, SeedableRng as _};
use rand_pcg::Pcg64;
use tracing::{debug, info};

use crate::{
    config::{ConfigError, TrainingConfig},
    data_source::{
        CategoryKey, CategoryQuery, DataSource, DataSourceError, Partition, Row, RowScan,
        RowSource, ScanOrder,
    },
    features::FeatureSet,
    learner::{LearnedModel, Learner, build_learner},
    metrics::{CategoryReport, EpochRecord, PartitionMetrics},
    stopping::PlateauDetector,
};

/// Offset separating the row-shuffling seed from the weight seed.
const SHUFFLE_SEED_OFFSET: u64 = 0x9e37_79b9_7f4a_7c15;

#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum TrainingError {
    #[display("invalid configuration: {_0}")]
    #[from]
    Config(ConfigError),
    #[display("data source error: {_0}")]
    #[from]
    DataSource(DataSourceError),
    #[display("network error: {_0}")]
    #[from]
    Network(NetworkError),
    #[display("category {category} has no {partition} rows")]
    EmptyPartition {
        category: String,
        partition: Partition,
    },
    #[display("category {category} diverged at epoch {epoch}")]
    Diverged { category: String, epoch: usize },
}

/// A trained model together with how it got there.
#[derive(Debug, Clone)]
pub struct TrainingResult {
    pub report: CategoryReport,
    pub model: LearnedModel,
}

/// Everything needed to train one category.
#[derive(Debug, Clone)]
pub struct TrainingTask {
    pub category: CategoryKey,
    pub features: FeatureSet,
    /// Seeds both the initial weights and the row order.
    pub seed: u64,
}

impl TrainingTask {
    #[must_use]
    pub fn new(category: CategoryKey, features: FeatureSet, seed: u64) -> Self {
        Self {
            category,
            features,
            seed,
        }
    }

    /// Opens the category's rows in `source`, builds the configured learner
    /// and trains it.
    pub fn run<D>(
        &self,
        source: &D,
        config: &TrainingConfig,
    ) -> Result<TrainingResult, TrainingError>
    where
        D: DataSource + ?Sized,
    {
        self.run_observed(source, config, &mut |_| {})
    }

    /// Like [`run`](Self::run), calling `on_epoch` as soon as each epoch
    /// finishes.
    pub fn run_observed<D>(
        &self,
        source: &D,
        config: &TrainingConfig,
        on_epoch: &mut dyn FnMut(&EpochRecord),
    ) -> Result<TrainingResult, TrainingError>
    where
        D: DataSource + ?Sized,
    {
        config.validate()?;
        let names = self.features.names();
        let rows = source.open(&CategoryQuery {
            category: &self.category,
            features: &names,
            output: &config.output_feature,
            split: config.split,
        })?;
        let mut learner = build_learner(&config.learner, &self.features, self.seed)?;
        self.run_with(&rows, learner.as_mut(), config, on_epoch)
    }

    /// Trains `learner` on already opened rows.
    pub fn run_with<R>(
        &self,
        rows: &R,
        learner: &mut dyn Learner,
        config: &TrainingConfig,
        on_epoch: &mut dyn FnMut(&EpochRecord),
    ) -> Result<TrainingResult, TrainingError>
    where
        R: RowSource + ?Sized,
    {
        config.validate()?;
        let started = Instant::now();
        let trained_at = Utc::now();
        let category = self.category.name();
        let normalization = config.normalization;
        let mut rng = Pcg64::seed_from_u64(self.seed.wrapping_add(SHUFFLE_SEED_OFFSET));

        let mut training_rows = RowStream::new(rows, Partition::Training, category, &mut rng)?;
        let mut validation_rows =
            RowStream::new(rows, Partition::Validation, category, &mut rng)?;
        let trainings_per_epoch = config.trainings_per_epoch.unwrap_or(training_rows.len);
        let validations_per_epoch = config.validations_per_epoch.unwrap_or(validation_rows.len);

        info!(
            category,
            features = self.features.len(),
            training_rows = training_rows.len,
            validation_rows = validation_rows.len,
            "training started"
        );

        let mut detector =
            PlateauDetector::new(config.stop.window_size, config.stop.plateau_tolerance);
        let mut history = Vec::new();
        let mut trained_total = 0;
        let mut epoch = 0;
        let mut done = false;

        while !(done && training_rows.all_visited()) {
            let epoch_started = Instant::now();
            if epoch > 0 {
                for _ in 0..trainings_per_epoch {
                    let row = training_rows.next_row(&mut rng)?;
                    learner.train_instance(&row.features, normalization.normalize(row.label))?;
                    trained_total += 1;
                }
            }

            let mut metrics = PartitionMetrics::default();
            for _ in 0..validations_per_epoch {
                let row = validation_rows.next_row(&mut rng)?;
                let prediction = learner.predict(&row.features)?;
                metrics.record(prediction, normalization.normalize(row.label));
            }
            let mse = metrics.mse().unwrap_or(f64::INFINITY);
            if !mse.is_finite() {
                return Err(TrainingError::Diverged {
                    category: category.to_owned(),
                    epoch,
                });
            }

            let converged = detector.record(mse);
            let capped = config.stop.max_epochs.is_some_and(|max| epoch >= max);
            done |= converged || capped;

            let elapsed_secs = epoch_started.elapsed().as_secs_f64();
            debug!(category, epoch, mse, trained = trained_total, elapsed_secs, "epoch finished");
            let record = EpochRecord {
                epoch,
                trained_total,
                validated: metrics.instances,
                mse,
                elapsed_secs,
            };
            on_epoch(&record);
            history.push(record);
            epoch += 1;
        }

        let model = learner.model();
        if !model.is_finite() {
            return Err(TrainingError::Diverged {
                category: category.to_owned(),
                epoch: epoch - 1,
            });
        }

        let [training, validation, testing] =
            Partition::ALL.map(|partition| evaluate(rows, learner, partition, config));
        let report = CategoryReport {
            category: category.to_owned(),
            learner: config.learner.kind,
            features: self.features.len(),
            epochs: epoch - 1,
            trained_instances: trained_total,
            training: training?,
            validation: validation?,
            testing: testing?,
            history,
            trained_at,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            category,
            epochs = report.epochs,
            trained = report.trained_instances,
            validation_mse = report.validation.mse(),
            testing_mse = report.testing.mse(),
            "training finished"
        );

        Ok(TrainingResult { report, model })
    }
}

/// One ordered pass over a partition with the current model.
fn evaluate<R>(
    rows: &R,
    learner: &mut dyn Learner,
    partition: Partition,
    config: &TrainingConfig,
) -> Result<PartitionMetrics, TrainingError>
where
    R: RowSource + ?Sized,
{
    let mut metrics = PartitionMetrics::default();
    for row in rows.scan(partition, ScanOrder::Sequential) {
        let row = row?;
        let prediction = learner.predict(&row.features)?;
        metrics.record(prediction, config.normalization.normalize(row.label));
    }
    Ok(metrics)
}

/// Endless shuffled stream over one partition.
struct RowStream<'a, R: ?Sized> {
    rows: &'a R,
    partition: Partition,
    category: &'a str,
    scan: RowScan<'a>,
    len: usize,
    yielded: usize,
    completed_passes: usize,
}

impl<'a, R> RowStream<'a, R>
where
    R: RowSource + ?Sized,
{
    fn new(
        rows: &'a R,
        partition: Partition,
        category: &'a str,
        rng: &mut Pcg64,
    ) -> Result<Self, TrainingError> {
        let len = rows.row_count(partition);
        if len == 0 {
            return Err(TrainingError::EmptyPartition {
                category: category.to_owned(),
                partition,
            });
        }
        Ok(Self {
            rows,
            partition,
            category,
            scan: rows.scan(partition, ScanOrder::Shuffled { seed: rng.random() }),
            len,
            yielded: 0,
            completed_passes: 0,
        })
    }

    fn next_row(&mut self, rng: &mut Pcg64) -> Result<Row, TrainingError> {
        loop {
            if let Some(row) = self.scan.next() {
                self.yielded += 1;
                return Ok(row?);
            }
            if self.yielded == 0 {
                return Err(TrainingError::EmptyPartition {
                    category: self.category.to_owned(),
                    partition: self.partition,
                });
            }
            self.completed_passes += 1;
            self.yielded = 0;
            self.scan = self.rows.scan(
                self.partition,
                ScanOrder::Shuffled {
                    seed: rng.random(),
                },
            );
        }
    }

    /// Whether every row of the partition has been handed out at least once.
    fn all_visited(&self) -> bool {
        self.completed_passes > 0 || self.yielded >= self.len
    }
}
