//! Per-category training of card score predictors.
//!
//! Every category (usually a kingdom card) gets its own model that predicts a
//! player's final score from the per-game features. Categories are trained
//! independently and in parallel.
//!
//! # How Training Works
//!
//! 1. **Feature selection** - [`features::FeatureSet::select`] picks the input
//!    columns for a category and assigns boosts to rarely non-zero features
//! 2. **Rows** - a [`data_source::DataSource`] hands out the category's rows
//!    already split into training, validation and testing partitions
//! 3. **Epochs** - [`controller::TrainingTask`] alternates training and
//!    validation until [`stopping::PlateauDetector`] sees the validation
//!    error level off
//! 4. **Scheduling** - [`scheduler::Scheduler`] runs many tasks on a pool of
//!    worker threads and summarizes them in a [`metrics::RunSummary`]
//!
//! # Architecture
//!
//! ```text
//! DataSource ──open──▶ RowSource (one category)
//!                          │ shuffled streams
//!                          ▼
//! TrainingTask ──drives──▶ Learner (backprop network or single unit)
//!      │                        │
//!      ▼                        ▼
//! CategoryReport           LearnedModel
//!      └──────── Scheduler ────────┘
//!                    │
//!                    ▼
//!               RunSummary
//! ```
//!
//! # Example
//!
//! ```
//! use cardnet_network::InputFeature;
//! use cardnet_training::{
//!     CategoryKey, FeatureSet, InstanceTable, MemoryDataSource, Normalization, StopConfig,
//!     TrainingConfig, TrainingTask, memory::Instance,
//! };
//!
//! let columns = vec!["village_acquired".to_owned(), "player_final_score".to_owned()];
//! let instances = (0..120)
//!     .map(|i| Instance {
//!         category: "Village".to_owned(),
//!         partition_key: f64::from(i % 60),
//!         values: vec![f64::from(i % 3), 20.0 + 5.0 * f64::from(i % 3)],
//!     })
//!     .collect();
//! let source = MemoryDataSource::new(InstanceTable { columns, instances });
//!
//! let config = TrainingConfig {
//!     normalization: Normalization::new(0.0, 50.0).unwrap(),
//!     stop: StopConfig {
//!         max_epochs: Some(50),
//!         ..StopConfig::default()
//!     },
//!     ..TrainingConfig::default()
//! };
//! let features = FeatureSet::new(vec![InputFeature::new("village_acquired", 1.0)]);
//! let task = TrainingTask::new(CategoryKey::parse("Village"), features, 1);
//! let result = task.run(&source, &config).unwrap();
//!
//! assert_eq!(result.report.category, "Village");
//! assert!(result.report.epochs <= 50);
//! assert!(result.report.validation.mse().is_some());
//! ```

pub mod catalog;
pub mod config;
pub mod controller;
pub mod data_source;
pub mod features;
pub mod learner;
pub mod memory;
pub mod metrics;
pub mod scheduler;
pub mod stopping;

pub use self::{
    catalog::{CardCatalog, CardInfo},
    config::{ConfigError, LearnerConfig, Normalization, StopConfig, TrainingConfig},
    controller::{TrainingError, TrainingResult, TrainingTask},
    data_source::{
        CategoryKey, CategoryQuery, DataSource, DataSourceError, Partition, PartitionSplit, Row,
        RowSource, ScanOrder,
    },
    features::FeatureSet,
    learner::{
        BackpropLearner, LearnedModel, Learner, LearnerKind, UNIT_BIAS_KEY, UnitLearner,
        build_learner,
    },
    memory::{InstanceTable, MemoryDataSource},
    metrics::{CategoryFailure, CategoryReport, EpochRecord, PartitionMetrics, RunSummary},
    scheduler::{CategoryOutcome, RunReport, Scheduler, TaskObserver},
    stopping::PlateauDetector,
};
