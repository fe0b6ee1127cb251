//! Online backpropagation networks and single-unit learners.
//!
//! This crate contains the numeric core of cardnet:
//!
//! - [`unit`]: a single weighted unit with a linear, threshold or sigmoid
//!   activation, trained with the delta rule (linear unit / perceptron)
//! - [`graph`]: an arena of bias, input, hidden and output nodes with
//!   lazily memoized outputs and errors
//! - [`network`]: fully connected layered networks built on the graph,
//!   trained one example at a time
//! - [`snapshot`]: the serialized weight format and reloading from it
//!
//! # Examples
//!
//! ```
//! use cardnet_network::network::{InputFeature, Network, NetworkParams, Topology};
//!
//! let features = [InputFeature::new("a", 1.0), InputFeature::new("b", 1.0)];
//! let params = NetworkParams {
//!     max_initial_weight: 0.1,
//!     ..NetworkParams::default()
//! };
//! let mut network = Network::new(&features, &Topology::default(), params, 42).unwrap();
//!
//! let before = network.predict(&[1.0, 0.0]).unwrap();
//! network.train(&[1.0, 0.0], 0.8).unwrap();
//! let after = network.predict(&[1.0, 0.0]).unwrap();
//! assert!((0.8 - after).abs() < (0.8 - before).abs());
//!
//! let snapshot = network.snapshot();
//! assert_eq!(snapshot.inputs.len(), 2);
//! assert_eq!(snapshot.hidden.len(), 4);
//! ```

pub mod error;
pub mod graph;
pub mod network;
pub mod snapshot;
pub mod unit;

pub use self::{
    error::{DimensionMismatchError, GraphError, NetworkError, SnapshotError},
    graph::{NodeGraph, NodeId, OutputActivation},
    network::{InputFeature, Network, NetworkParams, Topology},
    snapshot::NetworkSnapshot,
    unit::{Activation, Unit},
};
