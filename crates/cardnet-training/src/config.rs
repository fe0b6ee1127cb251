//! Validated configuration of a training run.

use cardnet_network::{NetworkError, NetworkParams, Topology};
use serde::Serialize;

use crate::{data_source::PartitionSplit, learner::LearnerKind};

#[derive(Debug, Clone, PartialEq, derive_more::Display, derive_more::Error)]
pub enum ConfigError {
    #[display("normalization bounds must be finite and distinct, got [{min}, {max}]")]
    InvalidNormalization { min: f64, max: f64 },
    #[display("{name} must be in (0, 1], got {value}")]
    InvalidFraction { name: &'static str, value: f64 },
    #[display("partition key span must be finite and positive, got {value}")]
    InvalidKeySpan { value: f64 },
    #[display("plateau window must hold at least one epoch")]
    EmptyWindow,
    #[display("{name} must be at least 1 when set")]
    ZeroCap { name: &'static str },
    #[display("plateau tolerance must be finite and non-negative, got {value}")]
    InvalidTolerance { value: f64 },
    #[display("{_0}")]
    Network(NetworkError),
}

/// Linear mapping of the label range `[min, max]` onto `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Normalization {
    min: f64,
    max: f64,
}

impl Normalization {
    /// Mean of final scores in the reference dataset.
    pub const REFERENCE_MEAN: f64 = 38.257_657_35;
    /// Standard deviation of final scores in the reference dataset.
    pub const REFERENCE_STD_DEV: f64 = 18.685_384_55;

    pub fn new(min: f64, max: f64) -> Result<Self, ConfigError> {
        #[expect(clippy::float_cmp)]
        let degenerate = min == max;
        if !min.is_finite() || !max.is_finite() || degenerate {
            return Err(ConfigError::InvalidNormalization { min, max });
        }
        Ok(Self { min, max })
    }

    /// Bounds two standard deviations either side of the mean.
    pub fn from_mean_std_dev(mean: f64, std_dev: f64) -> Result<Self, ConfigError> {
        Self::new(mean - 2.0 * std_dev, mean + 2.0 * std_dev)
    }

    /// Bounds derived from the reference final-score distribution.
    #[must_use]
    pub fn reference() -> Self {
        Self {
            min: Self::REFERENCE_MEAN - 2.0 * Self::REFERENCE_STD_DEV,
            max: Self::REFERENCE_MEAN + 2.0 * Self::REFERENCE_STD_DEV,
        }
    }

    #[must_use]
    pub fn min(&self) -> f64 {
        self.min
    }

    #[must_use]
    pub fn max(&self) -> f64 {
        self.max
    }

    #[must_use]
    pub fn normalize(&self, value: f64) -> f64 {
        (value - self.min) / (self.max - self.min)
    }

    #[must_use]
    pub fn denormalize(&self, value: f64) -> f64 {
        value * (self.max - self.min) + self.min
    }

    /// Converts a mean squared error measured on normalized values back to
    /// label units.
    #[must_use]
    pub fn denormalize_squared_error(&self, mse: f64) -> f64 {
        mse * (self.max - self.min).powi(2)
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Self::reference()
    }
}

/// When the epoch loop stops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StopConfig {
    /// Number of epochs in each of the two compared windows.
    pub window_size: usize,
    /// Upper bound on training epochs; unbounded when `None`.
    pub max_epochs: Option<usize>,
    /// Window averages closer than this count as a flat plateau.
    pub plateau_tolerance: f64,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            max_epochs: None,
            plateau_tolerance: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LearnerConfig {
    pub kind: LearnerKind,
    pub params: NetworkParams,
    pub topology: Topology,
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Column used as the label.
    pub output_feature: String,
    pub split: PartitionSplit,
    pub normalization: Normalization,
    /// Training rows per epoch; the whole training partition when `None`.
    pub trainings_per_epoch: Option<usize>,
    /// Validation rows per epoch; the whole validation partition when `None`.
    pub validations_per_epoch: Option<usize>,
    pub stop: StopConfig,
    pub learner: LearnerConfig,
    /// Multiply rarely non-zero features by a boost factor.
    pub boost_rare_features: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            output_feature: "player_final_score".to_owned(),
            split: PartitionSplit::default(),
            normalization: Normalization::default(),
            trainings_per_epoch: None,
            validations_per_epoch: None,
            stop: StopConfig::default(),
            learner: LearnerConfig::default(),
            boost_rare_features: true,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let PartitionSplit {
            training_fraction,
            validation_fraction,
            key_span,
        } = self.split;
        for (name, value) in [
            ("training fraction", training_fraction),
            ("validation fraction", validation_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::InvalidFraction { name, value });
            }
        }
        if !(key_span.is_finite() && key_span > 0.0) {
            return Err(ConfigError::InvalidKeySpan { value: key_span });
        }
        // re-check in case the bounds were built without `Normalization::new`
        Normalization::new(self.normalization.min, self.normalization.max)?;
        if self.trainings_per_epoch == Some(0) {
            return Err(ConfigError::ZeroCap {
                name: "trainings per epoch",
            });
        }
        if self.validations_per_epoch == Some(0) {
            return Err(ConfigError::ZeroCap {
                name: "validations per epoch",
            });
        }
        if self.stop.window_size == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        if !(self.stop.plateau_tolerance.is_finite() && self.stop.plateau_tolerance >= 0.0) {
            return Err(ConfigError::InvalidTolerance {
                value: self.stop.plateau_tolerance,
            });
        }
        self.learner.params.validate().map_err(ConfigError::Network)
    }
}
