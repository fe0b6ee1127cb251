//! Error metrics of trained models and their aggregation across categories.

use cardnet_stats::descriptive::DescriptiveStats;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{data_source::Partition, learner::LearnerKind};

/// Squared error and thresholded accuracy over one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(into = "PartitionMetricsRecord")]
pub struct PartitionMetrics {
    pub instances: usize,
    pub sse: f64,
    /// Predictions on the same side of `0.5` as their target.
    pub correct: usize,
}

impl PartitionMetrics {
    pub fn record(&mut self, prediction: f64, target: f64) {
        self.instances += 1;
        self.sse += (target - prediction).powi(2);
        if (prediction > 0.5) == (target > 0.5) {
            self.correct += 1;
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.instances += other.instances;
        self.sse += other.sse;
        self.correct += other.correct;
    }

    #[expect(clippy::cast_precision_loss)]
    #[must_use]
    pub fn mse(&self) -> Option<f64> {
        (self.instances > 0).then(|| self.sse / self.instances as f64)
    }

    #[expect(clippy::cast_precision_loss)]
    #[must_use]
    pub fn accuracy(&self) -> Option<f64> {
        (self.instances > 0).then(|| self.correct as f64 / self.instances as f64)
    }
}

#[derive(Serialize)]
struct PartitionMetricsRecord {
    instances: usize,
    sse: f64,
    mse: Option<f64>,
    correct: usize,
    accuracy: Option<f64>,
}

impl From<PartitionMetrics> for PartitionMetricsRecord {
    fn from(metrics: PartitionMetrics) -> Self {
        Self {
            instances: metrics.instances,
            sse: metrics.sse,
            mse: metrics.mse(),
            correct: metrics.correct,
            accuracy: metrics.accuracy(),
        }
    }
}

/// Validation result of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochRecord {
    pub epoch: usize,
    /// Instances trained from the start of the run to the end of this epoch.
    pub trained_total: usize,
    pub validated: usize,
    pub mse: f64,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryReport {
    pub category: String,
    pub learner: LearnerKind,
    pub features: usize,
    /// Training epochs, not counting the initial validation-only epoch.
    pub epochs: usize,
    pub trained_instances: usize,
    pub training: PartitionMetrics,
    pub validation: PartitionMetrics,
    pub testing: PartitionMetrics,
    pub history: Vec<EpochRecord>,
    pub trained_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

impl CategoryReport {
    #[must_use]
    pub fn partition(&self, partition: Partition) -> &PartitionMetrics {
        match partition {
            Partition::Training => &self.training,
            Partition::Validation => &self.validation,
            Partition::Testing => &self.testing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryFailure {
    pub category: String,
    pub error: String,
}

/// Totals over every category of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub completed_at: DateTime<Utc>,
    pub categories: usize,
    pub succeeded: usize,
    pub epochs: usize,
    pub trained_instances: usize,
    pub training: PartitionMetrics,
    pub validation: PartitionMetrics,
    pub testing: PartitionMetrics,
    /// Spread of the final validation MSE across successful categories.
    pub validation_mse: Option<DescriptiveStats>,
    pub failures: Vec<CategoryFailure>,
}

impl RunSummary {
    pub fn new<'a, I>(reports: I, failures: Vec<CategoryFailure>) -> Self
    where
        I: IntoIterator<Item = &'a CategoryReport>,
    {
        let mut summary = Self {
            completed_at: Utc::now(),
            categories: failures.len(),
            succeeded: 0,
            epochs: 0,
            trained_instances: 0,
            training: PartitionMetrics::default(),
            validation: PartitionMetrics::default(),
            testing: PartitionMetrics::default(),
            validation_mse: None,
            failures,
        };
        let mut mses = Vec::new();
        for report in reports {
            summary.categories += 1;
            summary.succeeded += 1;
            summary.epochs += report.epochs;
            summary.trained_instances += report.trained_instances;
            summary.training.merge(&report.training);
            summary.validation.merge(&report.validation);
            summary.testing.merge(&report.testing);
            mses.extend(report.validation.mse());
        }
        summary.validation_mse = DescriptiveStats::new(mses);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(category: &str, sse: f64, instances: usize) -> CategoryReport {
        let metrics = PartitionMetrics {
            instances,
            sse,
            correct: instances / 2,
        };
        CategoryReport {
            category: category.to_owned(),
            learner: LearnerKind::Backprop,
            features: 3,
            epochs: 4,
            trained_instances: 40,
            training: metrics,
            validation: metrics,
            testing: PartitionMetrics::default(),
            history: Vec::new(),
            trained_at: Utc::now(),
            elapsed_secs: 0.0,
        }
    }

    #[test]
    fn test_record_and_rates() {
        let mut metrics = PartitionMetrics::default();
        assert_eq!(metrics.mse(), None);
        metrics.record(0.75, 1.0);
        metrics.record(0.75, 0.25);
        assert_eq!(metrics.instances, 2);
        assert_eq!(metrics.sse, 0.0625 + 0.25);
        assert_eq!(metrics.mse(), Some(0.15625));
        assert_eq!(metrics.accuracy(), Some(0.5));
    }

    #[test]
    fn test_summary_sums_categories_and_keeps_failures() {
        let reports = [report("Village", 2.0, 10), report("Smithy", 6.0, 30)];
        let failures = vec![CategoryFailure {
            category: "Moat".to_owned(),
            error: "category Moat has no training rows".to_owned(),
        }];
        let summary = RunSummary::new(&reports, failures.clone());
        assert_eq!(summary.categories, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.epochs, 8);
        assert_eq!(summary.trained_instances, 80);
        assert_eq!(summary.validation.instances, 40);
        assert_eq!(summary.validation.mse(), Some(0.2));
        assert_eq!(summary.testing.mse(), None);
        assert_eq!(summary.failures, failures);
        let spread = summary.validation_mse.unwrap();
        assert_eq!(spread.count, 2);
        assert_eq!(spread.min, 0.2);
    }

    #[test]
    fn test_metrics_serialize_with_rates() {
        let metrics = PartitionMetrics {
            instances: 4,
            sse: 1.0,
            correct: 3,
        };
        let json = serde_json::to_value(metrics).unwrap();
        assert_eq!(json["mse"], 0.25);
        assert_eq!(json["accuracy"], 0.75);
    }
}
