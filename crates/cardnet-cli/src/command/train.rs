use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
};

use anyhow::Context as _;
use cardnet_network::{NetworkParams, OutputActivation, Topology};
use cardnet_stats::descriptive::DescriptiveStats;
use cardnet_training::{
    CardCatalog, CategoryKey, CategoryReport, EpochRecord, FeatureSet, InstanceTable,
    LearnerConfig, LearnerKind, MemoryDataSource, Normalization, Partition, PartitionSplit,
    Scheduler, StopConfig, TaskObserver, TrainingConfig, TrainingError, TrainingResult,
    TrainingTask, catalog::basic_cards_first, data_source::DataSource as _,
    features::rare_feature_boost,
};
use chrono::Utc;
use rand::{Rng as _, seq::IndexedRandom as _};
use tracing::{error, info, warn};

use crate::util::{self, Artifacts, Output};

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct TrainArg {
    /// Instance table JSON file
    #[arg(long)]
    data: PathBuf,
    /// Card catalog JSON file; built from the categories in the data when omitted
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Train a single category (`All` trains one model on every row)
    #[arg(long, conflicts_with = "random")]
    category: Option<String>,
    /// Train one randomly chosen category
    #[arg(long)]
    random: bool,
    /// Column predicted by the models
    #[arg(long, default_value = "player_final_score")]
    output_feature: String,
    #[arg(long, default_value_t = 0.8)]
    training_fraction: f64,
    /// Fraction of the training keys held out for validation
    #[arg(long, default_value_t = 0.2)]
    validation_fraction: f64,
    /// Training rows per epoch (whole training partition when omitted)
    #[arg(long)]
    max_trainings: Option<usize>,
    /// Validation rows per epoch (whole validation partition when omitted)
    #[arg(long)]
    max_validations: Option<usize>,
    /// Epochs in each plateau detection window
    #[arg(long, default_value_t = 20)]
    window: usize,
    #[arg(long)]
    max_epochs: Option<usize>,
    #[arg(long, default_value_t = 0.0)]
    plateau_tolerance: f64,
    #[arg(long, default_value = "backprop")]
    learner: LearnerKind,
    /// Output node activation of backprop networks
    #[arg(long, default_value = "continuous")]
    activation: OutputActivation,
    #[arg(long, requires = "norm_max")]
    norm_min: Option<f64>,
    #[arg(long, requires = "norm_min")]
    norm_max: Option<f64>,
    /// Normalize by mean ± 2 standard deviations of the output column
    #[arg(long, conflicts_with = "norm_min")]
    recompute_normalization: bool,
    /// Do not boost rarely non-zero features
    #[arg(long)]
    no_boost: bool,
    #[arg(long, default_value_t = 1)]
    hidden_layers: usize,
    #[arg(long, default_value_t = 0.1)]
    learning_rate: f64,
    #[arg(long, default_value_t = 0.0)]
    momentum: f64,
    #[arg(long, default_value_t = 0.5)]
    max_initial_weight: f64,
    /// Seed of the whole run; random when omitted
    #[arg(long)]
    seed: Option<u64>,
    /// Output directory
    #[arg(long, default_value = "out")]
    out: PathBuf,
    /// Number of worker threads (one per core when omitted)
    #[arg(long)]
    jobs: Option<usize>,
}

impl TrainArg {
    fn normalization(&self, table: &InstanceTable) -> anyhow::Result<Normalization> {
        if let (Some(min), Some(max)) = (self.norm_min, self.norm_max) {
            return Ok(Normalization::new(min, max)?);
        }
        if self.recompute_normalization {
            let values = table.column_values(&self.output_feature)?;
            let stats = DescriptiveStats::new(values).with_context(|| {
                format!("Column '{}' has no values", self.output_feature)
            })?;
            info!(
                mean = stats.mean,
                std_dev = stats.std_dev,
                "recomputed output normalization"
            );
            return Ok(Normalization::from_mean_std_dev(stats.mean, stats.std_dev)?);
        }
        Ok(Normalization::reference())
    }

    fn training_config(&self, table: &InstanceTable) -> anyhow::Result<TrainingConfig> {
        let config = TrainingConfig {
            output_feature: self.output_feature.clone(),
            split: PartitionSplit {
                training_fraction: self.training_fraction,
                validation_fraction: self.validation_fraction,
                ..PartitionSplit::default()
            },
            normalization: self.normalization(table)?,
            trainings_per_epoch: self.max_trainings,
            validations_per_epoch: self.max_validations,
            stop: StopConfig {
                window_size: self.window,
                max_epochs: self.max_epochs,
                plateau_tolerance: self.plateau_tolerance,
            },
            learner: LearnerConfig {
                kind: self.learner,
                params: NetworkParams {
                    learning_rate: self.learning_rate,
                    momentum: self.momentum,
                    max_initial_weight: self.max_initial_weight,
                },
                topology: Topology {
                    hidden_layers: self.hidden_layers,
                    output_activation: self.activation,
                    ..Topology::default()
                },
            },
            boost_rare_features: !self.no_boost,
        };
        config.validate()?;
        Ok(config)
    }

    fn categories(&self, source: &MemoryDataSource) -> anyhow::Result<Vec<String>> {
        if let Some(name) = &self.category {
            return Ok(vec![name.clone()]);
        }
        let categories = source.categories();
        if self.random {
            let chosen = categories
                .choose(&mut rand::rng())
                .context("The data has no categories")?;
            return Ok(vec![chosen.clone()]);
        }
        Ok(basic_cards_first(categories))
    }
}

pub(crate) fn run(arg: &TrainArg) -> anyhow::Result<()> {
    let table: InstanceTable = util::read_json_file("instance table", &arg.data)?;
    let source = MemoryDataSource::new(table);
    let catalog = match &arg.catalog {
        Some(path) => util::read_json_file("card catalog", path)?,
        None => CardCatalog::from_names(source.categories()),
    };
    let config = arg.training_config(source.table())?;
    let categories = arg.categories(&source)?;

    let boost = if config.boost_rare_features {
        let boost = rare_feature_boost(catalog.len());
        if boost.is_none() {
            warn!(
                pool = catalog.len(),
                "card pool too small for rare-feature boosts, boosting disabled"
            );
        }
        boost
    } else {
        None
    };

    let seed = arg.seed.unwrap_or_else(|| rand::rng().random());
    info!(seed, categories = categories.len(), learner = %config.learner.kind, "starting run");

    let columns = source.columns();
    let tasks = categories
        .iter()
        .zip(0..)
        .map(|(name, offset)| {
            let category = CategoryKey::parse(name);
            let features = FeatureSet::select(
                &columns,
                &config.output_feature,
                &category,
                &catalog,
                boost,
            );
            TrainingTask::new(category, features, seed.wrapping_add(offset))
        })
        .collect::<Vec<_>>();

    let dir = arg.out.join(config.learner.kind.folder());
    let artifacts = categories
        .iter()
        .map(|category| Artifacts::new(&dir, category))
        .collect::<anyhow::Result<Vec<_>>>()?;
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    let progress = Progress {
        learner: config.learner.kind,
        normalization: config.normalization,
        total: tasks.len(),
        finished: AtomicUsize::new(0),
        write_failures: AtomicUsize::new(0),
    };
    let report = Scheduler::new(arg.jobs).run(&source, &config, tasks, |index, task| {
        CategoryLog::open(&progress, task, &artifacts[index])
    });
    util::save_json(&report.summary, Some(&dir.join(util::SUMMARY_FILE)))?;

    let summary = &report.summary;
    info!(
        succeeded = summary.succeeded,
        failed = summary.failures.len(),
        validation_mse = summary.validation.mse(),
        out = %dir.display(),
        "models written"
    );
    let write_failures = progress.write_failures.load(Ordering::Relaxed);
    if write_failures > 0 {
        anyhow::bail!("{write_failures} artifact writes failed, see the log above");
    }
    if summary.succeeded == 0 && !summary.failures.is_empty() {
        anyhow::bail!("Every category failed to train");
    }
    Ok(())
}

/// State shared by every category of a run.
struct Progress {
    learner: LearnerKind,
    normalization: Normalization,
    total: usize,
    finished: AtomicUsize,
    write_failures: AtomicUsize,
}

/// Streams one category's log while it trains and saves its model when it
/// finishes.
struct CategoryLog<'a> {
    progress: &'a Progress,
    category: String,
    artifacts: &'a Artifacts,
    /// Dropped after the first write error.
    log: Option<Output>,
}

impl<'a> CategoryLog<'a> {
    fn open(progress: &'a Progress, task: &TrainingTask, artifacts: &'a Artifacts) -> Self {
        let mut this = Self {
            progress,
            category: task.category.name().to_owned(),
            artifacts,
            log: None,
        };
        let opened = Output::open(Some(&artifacts.log)).and_then(|mut log| {
            log.write_with(|w| {
                write_header(w, &this.category, progress.learner, task.features.len())
            })?;
            Ok(log)
        });
        this.log = this.check(opened);
        this
    }

    fn check<T>(&self, result: anyhow::Result<T>) -> Option<T> {
        result
            .inspect_err(|err| {
                self.progress.write_failures.fetch_add(1, Ordering::Relaxed);
                error!(category = %self.category, "{err:#}");
            })
            .ok()
    }

    fn write(&mut self, f: impl FnOnce(&mut dyn Write) -> io::Result<()>) {
        if let Some(log) = &mut self.log {
            let written = log.write_with(f);
            if self.check(written).is_none() {
                self.log = None;
            }
        }
    }
}

impl TaskObserver for CategoryLog<'_> {
    fn epoch_finished(&mut self, record: &EpochRecord) {
        let normalization = self.progress.normalization;
        self.write(|w| write_epoch(w, record, &normalization));
    }

    fn finished(mut self, result: &Result<TrainingResult, TrainingError>) {
        match result {
            Ok(result) => {
                self.write(|w| write_metrics(w, &result.report));
                let saved = util::save_json(&result.model, Some(&self.artifacts.model));
                self.check(saved);
            }
            Err(err) => self.write(|w| writeln!(w, "failed: {err}")),
        }
        let finished = self.progress.finished.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.progress.total;
        info!(category = %self.category, "{finished}/{total} categories finished");
    }
}

fn write_header<W>(
    writer: &mut W,
    category: &str,
    learner: LearnerKind,
    features: usize,
) -> io::Result<()>
where
    W: Write + ?Sized,
{
    writeln!(
        writer,
        "# {category} ({learner}, {features} features, started {})",
        Utc::now().to_rfc3339()
    )?;
    writeln!(writer, "epoch\ttrained\tvalidated\tmse\tscore_mse\tsecs")
}

fn write_epoch<W>(
    writer: &mut W,
    record: &EpochRecord,
    normalization: &Normalization,
) -> io::Result<()>
where
    W: Write + ?Sized,
{
    writeln!(
        writer,
        "{}\t{}\t{}\t{:.6}\t{:.3}\t{:.3}",
        record.epoch,
        record.trained_total,
        record.validated,
        record.mse,
        normalization.denormalize_squared_error(record.mse),
        record.elapsed_secs
    )
}

/// Final metrics of a trained category.
fn write_metrics<W>(writer: &mut W, report: &CategoryReport) -> io::Result<()>
where
    W: Write + ?Sized,
{
    writeln!(writer)?;
    writeln!(writer, "partition\tinstances\tsse\tmse\taccuracy")?;
    let or_dash = |value: Option<f64>| value.map_or_else(|| "-".to_owned(), |v| format!("{v:.6}"));
    for partition in Partition::ALL {
        let metrics = report.partition(partition);
        writeln!(
            writer,
            "{partition}\t{}\t{:.6}\t{}\t{}",
            metrics.instances,
            metrics.sse,
            or_dash(metrics.mse()),
            or_dash(metrics.accuracy())
        )?;
    }
    writeln!(
        writer,
        "epochs: {}, trained instances: {}, elapsed: {:.3}s",
        report.epochs, report.trained_instances, report.elapsed_secs
    )
}

#[cfg(test)]
mod tests {
    use std::{env, process};

    use cardnet_network::InputFeature;
    use cardnet_training::{LearnedModel, PartitionMetrics};

    use super::*;

    fn report() -> CategoryReport {
        CategoryReport {
            category: "Village".to_owned(),
            learner: LearnerKind::Backprop,
            features: 3,
            epochs: 1,
            trained_instances: 10,
            training: PartitionMetrics {
                instances: 4,
                sse: 0.5,
                correct: 3,
            },
            validation: PartitionMetrics::default(),
            testing: PartitionMetrics::default(),
            history: vec![
                EpochRecord {
                    epoch: 0,
                    trained_total: 0,
                    validated: 2,
                    mse: 0.25,
                    elapsed_secs: 0.0,
                },
                EpochRecord {
                    epoch: 1,
                    trained_total: 10,
                    validated: 2,
                    mse: 0.01,
                    elapsed_secs: 0.5,
                },
            ],
            trained_at: Utc::now(),
            elapsed_secs: 1.0,
        }
    }

    #[test]
    fn test_log_lines() {
        let report = report();
        let normalization = Normalization::new(0.0, 10.0).unwrap();
        let mut buf = Vec::new();
        write_header(&mut buf, &report.category, report.learner, report.features).unwrap();
        for record in &report.history {
            write_epoch(&mut buf, record, &normalization).unwrap();
        }
        write_metrics(&mut buf, &report).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines = text.lines().collect::<Vec<_>>();

        assert!(lines[0].starts_with("# Village (Backprop, 3 features, started "));
        assert_eq!(lines[3], "1\t10\t2\t0.010000\t1.000\t0.500");
        assert_eq!(lines[6], "training\t4\t0.500000\t0.125000\t0.750000");
        assert_eq!(lines[7], "validation\t0\t0.000000\t-\t-");
        assert_eq!(
            lines.last().copied(),
            Some("epochs: 1, trained instances: 10, elapsed: 1.000s")
        );
    }

    #[test]
    fn test_category_log_streams_epochs_and_saves_model() {
        let dir = env::temp_dir().join(format!("cardnet-category-log-{}", process::id()));
        fs::create_dir_all(&dir).unwrap();
        let artifacts = Artifacts::new(&dir, "Village").unwrap();
        let progress = Progress {
            learner: LearnerKind::Backprop,
            normalization: Normalization::new(0.0, 10.0).unwrap(),
            total: 1,
            finished: AtomicUsize::new(0),
            write_failures: AtomicUsize::new(0),
        };
        let task = TrainingTask::new(
            CategoryKey::parse("Village"),
            FeatureSet::new(vec![InputFeature::new("x", 1.0)]),
            0,
        );
        let report = report();

        let mut log = CategoryLog::open(&progress, &task, &artifacts);
        for record in &report.history {
            log.epoch_finished(record);
        }
        // epochs are on disk before the task finishes
        let partial = fs::read_to_string(&artifacts.log).unwrap();
        assert_eq!(partial.lines().count(), 4);
        assert!(!artifacts.model.exists());

        let model = LearnedModel::Unit([("bias".to_owned(), 0.5)].into_iter().collect());
        log.finished(&Ok(TrainingResult {
            report,
            model: model.clone(),
        }));
        let text = fs::read_to_string(&artifacts.log).unwrap();
        let saved: LearnedModel = util::read_json_file("model", &artifacts.model).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert!(text.starts_with(&partial));
        assert!(text.ends_with("elapsed: 1.000s\n"));
        assert_eq!(saved, model);
        assert_eq!(progress.finished.load(Ordering::Relaxed), 1);
        assert_eq!(progress.write_failures.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_failed_category_is_logged_without_model() {
        let dir = env::temp_dir().join(format!("cardnet-failed-log-{}", process::id()));
        fs::create_dir_all(&dir).unwrap();
        let artifacts = Artifacts::new(&dir, "Chapel").unwrap();
        let progress = Progress {
            learner: LearnerKind::Linear,
            normalization: Normalization::reference(),
            total: 2,
            finished: AtomicUsize::new(0),
            write_failures: AtomicUsize::new(0),
        };
        let task = TrainingTask::new(CategoryKey::parse("Chapel"), FeatureSet::new(vec![]), 0);

        CategoryLog::open(&progress, &task, &artifacts).finished(&Err(
            TrainingError::EmptyPartition {
                category: "Chapel".to_owned(),
                partition: Partition::Training,
            },
        ));
        let text = fs::read_to_string(&artifacts.log).unwrap();
        let model_written = artifacts.model.exists();
        fs::remove_dir_all(&dir).unwrap();

        assert!(text.ends_with("failed: category Chapel has no training rows\n"));
        assert!(!model_written);
        assert_eq!(progress.finished.load(Ordering::Relaxed), 1);
    }
}
