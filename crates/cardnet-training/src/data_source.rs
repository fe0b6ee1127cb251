//! Contract between the training loop and wherever labelled rows live.
//!
//! A [`DataSource`] hands out one [`RowSource`] per category. Each row source
//! is an isolated copy of that category's rows, already split into
//! training, validation and testing partitions by a pre-assigned partition
//! key, so categories trained in parallel never contend on shared state.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum DataSourceError {
    #[display("unknown column '{column}'")]
    UnknownColumn { column: String },
    #[display("row {row} is malformed: {reason}")]
    MalformedRow { row: usize, reason: String },
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    #[display("training")]
    Training,
    #[display("validation")]
    Validation,
    #[display("testing")]
    Testing,
}

impl Partition {
    pub const ALL: [Self; 3] = [Self::Training, Self::Validation, Self::Testing];

    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Training => 0,
            Self::Validation => 1,
            Self::Testing => 2,
        }
    }
}

/// Assignment of partition keys to partitions.
///
/// Keys are expected in `[0, key_span)`. With
/// `training_cutoff = training_fraction * key_span` and
/// `validation_cutoff = validation_fraction * training_cutoff`, keys below
/// the validation cutoff are validation rows, keys below the training
/// cutoff are training rows and the rest are testing rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartitionSplit {
    pub training_fraction: f64,
    pub validation_fraction: f64,
    pub key_span: f64,
}

impl Default for PartitionSplit {
    fn default() -> Self {
        Self {
            training_fraction: 0.8,
            validation_fraction: 0.2,
            key_span: 60.0,
        }
    }
}

impl PartitionSplit {
    #[must_use]
    pub fn training_cutoff(&self) -> f64 {
        self.training_fraction * self.key_span
    }

    #[must_use]
    pub fn validation_cutoff(&self) -> f64 {
        self.validation_fraction * self.training_cutoff()
    }

    #[must_use]
    pub fn partition_of(&self, key: f64) -> Partition {
        if key < self.validation_cutoff() {
            Partition::Validation
        } else if key < self.training_cutoff() {
            Partition::Training
        } else {
            Partition::Testing
        }
    }
}

/// Category whose rows are requested.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CategoryKey {
    /// Every row regardless of category.
    All,
    Named(String),
}

impl CategoryKey {
    pub const ALL_NAME: &'static str = "All";

    /// Parses a category name, treating `All` (any case) as [`CategoryKey::All`].
    #[must_use]
    pub fn parse(name: &str) -> Self {
        if name.eq_ignore_ascii_case(Self::ALL_NAME) {
            Self::All
        } else {
            Self::Named(name.to_owned())
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::All => Self::ALL_NAME,
            Self::Named(name) => name,
        }
    }

    #[must_use]
    pub fn matches(&self, category: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(name) => name == category,
        }
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a training task needs from the data source.
#[derive(Debug, Clone, Copy)]
pub struct CategoryQuery<'a> {
    pub category: &'a CategoryKey,
    pub features: &'a [String],
    pub output: &'a str,
    pub split: PartitionSplit,
}

/// One labelled instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Stable identifier of the instance within its data source.
    pub id: usize,
    /// Feature values in the order of the query's feature list.
    pub features: Vec<f64>,
    pub label: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    /// Storage order; identical on every scan.
    Sequential,
    /// A fresh random permutation determined by the seed.
    Shuffled { seed: u64 },
}

pub type RowScan<'a> = Box<dyn Iterator<Item = Result<Row, DataSourceError>> + 'a>;

/// The partitioned rows of one category.
pub trait RowSource {
    fn row_count(&self, partition: Partition) -> usize;

    /// Starts a new pass over a partition. Each call is independent, so a
    /// finished scan is restarted simply by calling this again.
    fn scan(&self, partition: Partition, order: ScanOrder) -> RowScan<'_>;
}

pub trait DataSource: Sync {
    type Rows: RowSource;

    /// Names of all columns, in storage order.
    fn columns(&self) -> Vec<String>;

    /// Distinct category names present in the data, sorted.
    fn categories(&self) -> Vec<String>;

    /// Copies out the rows matching `query`.
    fn open(&self, query: &CategoryQuery<'_>) -> Result<Self::Rows, DataSourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_split_cutoffs() {
        let split = PartitionSplit::default();
        assert!((split.training_cutoff() - 48.0).abs() < 1e-12);
        assert!((split.validation_cutoff() - 9.6).abs() < 1e-12);
        assert_eq!(split.partition_of(0.0), Partition::Validation);
        assert_eq!(split.partition_of(9.0), Partition::Validation);
        assert_eq!(split.partition_of(10.0), Partition::Training);
        assert_eq!(split.partition_of(47.0), Partition::Training);
        assert_eq!(split.partition_of(48.0), Partition::Testing);
        assert_eq!(split.partition_of(59.0), Partition::Testing);
    }

    #[test]
    fn test_category_key() {
        assert_eq!(CategoryKey::parse("all"), CategoryKey::All);
        assert_eq!(
            CategoryKey::parse("Village"),
            CategoryKey::Named("Village".to_owned())
        );
        assert!(CategoryKey::All.matches("Smithy"));
        assert!(!CategoryKey::parse("Village").matches("Smithy"));
        assert_eq!(CategoryKey::All.to_string(), "All");
    }
}
