//! Statistical helpers shared by the cardnet crates.
//!
//! The training pipeline needs summary statistics in two places: deriving
//! output-normalization bounds from the label column of a dataset, and
//! summarizing the validation-error history of a finished training run.
//!
//! # Examples
//!
//! ```
//! use cardnet_stats::descriptive::DescriptiveStats;
//!
//! let scores = [30.0, 40.0, 50.0];
//! let stats = DescriptiveStats::new(scores).unwrap();
//! assert_eq!(stats.mean, 40.0);
//! assert_eq!(stats.min, 30.0);
//! ```

pub mod descriptive;
