use crate::graph::NodeId;

/// A feature vector whose length differs from the number of inputs it is
/// fed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("feature vector has {actual} values but {expected} inputs are expected")]
pub struct DimensionMismatchError {
    pub expected: usize,
    pub actual: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum GraphError {
    #[display("the bias node has no error signal")]
    BiasHasNoError,
    #[display("node {id} does not belong to this graph")]
    UnknownNode { id: NodeId },
    #[display("node {target} is not a hidden or output node and cannot take inputs")]
    NotANeuron { target: NodeId },
    #[display("node {from} was created after node {to} and cannot feed it")]
    NotUpstream { from: NodeId, to: NodeId },
    #[display("node {from} is already connected to node {to}")]
    DuplicateConnection { from: NodeId, to: NodeId },
    #[display("node {id} is not an input node")]
    NotAnInput { id: NodeId },
    #[display("node {id} is not an output node")]
    NotAnOutput { id: NodeId },
}

#[derive(Debug, Clone, PartialEq, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum NetworkError {
    #[display("{_0}")]
    #[from]
    Dimension(DimensionMismatchError),
    #[display("{_0}")]
    #[from]
    Graph(GraphError),
    #[display("invalid topology: {reason}")]
    InvalidTopology { reason: &'static str },
    #[display("invalid value {value} for {name}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[display("input label '{label}' is reserved for the bias weight")]
    ReservedLabel { label: String },
}

/// Failure to rebuild a network from a serialized snapshot.
#[derive(Debug, Clone, PartialEq, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum SnapshotError {
    #[display("expected exactly one bias entry, found {count}")]
    BiasCount { count: usize },
    #[display("snapshot has no output nodes")]
    NoOutputs,
    #[display("node id {id} appears more than once")]
    DuplicateId { id: usize },
    #[display("node {node} references node {reference}, which is not defined before it")]
    UnknownReference { node: usize, reference: usize },
    #[display("node {node} has no weight for the bias node")]
    MissingBias { node: usize },
    #[display("{_0}")]
    #[from]
    Network(NetworkError),
}

impl From<GraphError> for SnapshotError {
    fn from(err: GraphError) -> Self {
        Self::Network(NetworkError::Graph(err))
    }
}
