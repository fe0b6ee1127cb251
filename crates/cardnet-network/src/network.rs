//! Layered feed-forward networks built on top of [`NodeGraph`].

use rand::SeedableRng as _;
use rand_distr::{Distribution as _, Uniform};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

use crate::{
    error::{DimensionMismatchError, NetworkError},
    graph::{NodeGraph, NodeId, NodeKind, OutputActivation},
    snapshot::{BiasEntry, InputEntry, NetworkSnapshot, NeuronEntry},
};

/// Global hyperparameters of a network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkParams {
    pub learning_rate: f64,
    /// Fraction of the previous weight change added to each update.
    pub momentum: f64,
    /// Initial weights are drawn uniformly from `[-max, max]`.
    pub max_initial_weight: f64,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            momentum: 0.0,
            max_initial_weight: 0.5,
        }
    }
}

impl NetworkParams {
    pub fn validate(&self) -> Result<(), NetworkError> {
        let Self {
            learning_rate,
            momentum,
            max_initial_weight,
        } = *self;
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(NetworkError::InvalidParameter {
                name: "learning rate",
                value: learning_rate,
            });
        }
        if !(momentum.is_finite() && momentum >= 0.0) {
            return Err(NetworkError::InvalidParameter {
                name: "momentum",
                value: momentum,
            });
        }
        if !(max_initial_weight.is_finite() && max_initial_weight >= 0.0) {
            return Err(NetworkError::InvalidParameter {
                name: "max initial weight",
                value: max_initial_weight,
            });
        }
        Ok(())
    }
}

/// Size of a hidden layer as a function of
/// `(input_count, output_count, layer_index, layer_count)`.
pub type HiddenLayerSize = fn(usize, usize, usize, usize) -> usize;

/// Every hidden layer is as wide as the input layer.
#[must_use]
pub fn n_inputs(inputs: usize, _outputs: usize, _layer: usize, _layers: usize) -> usize {
    inputs
}

/// Every hidden layer is twice as wide as the input layer.
#[must_use]
pub fn two_n_inputs(inputs: usize, _outputs: usize, _layer: usize, _layers: usize) -> usize {
    inputs * 2
}

/// Shape of a network apart from its inputs.
#[derive(Debug, Clone, Copy)]
pub struct Topology {
    pub hidden_layers: usize,
    pub layer_size: HiddenLayerSize,
    pub outputs: usize,
    pub output_activation: OutputActivation,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            hidden_layers: 1,
            layer_size: two_n_inputs,
            outputs: 1,
            output_activation: OutputActivation::Continuous,
        }
    }
}

/// A named input of a network and the multiplier applied to its values.
#[derive(Debug, Clone, PartialEq)]
pub struct InputFeature {
    pub label: String,
    pub boost: f64,
}

impl InputFeature {
    pub fn new(label: impl Into<String>, boost: f64) -> Self {
        Self {
            label: label.into(),
            boost,
        }
    }
}

/// A fully connected feed-forward network with one bias node.
///
/// Layer 0 is fed by every input, each later hidden layer by every node of
/// the layer before it, and the outputs by the last hidden layer (or
/// directly by the inputs when there are no hidden layers). Every hidden
/// and output node is also fed by the bias node.
#[derive(Debug, Clone)]
pub struct Network {
    graph: NodeGraph,
    inputs: Vec<NodeId>,
    hidden: Vec<Vec<NodeId>>,
    outputs: Vec<NodeId>,
    params: NetworkParams,
    rng: Pcg64,
    initial_weights: Uniform<f64>,
}

impl Network {
    /// Builds a network with randomly initialized weights.
    ///
    /// The same `seed`, features and topology always produce the same
    /// weights.
    pub fn new(
        features: &[InputFeature],
        topology: &Topology,
        params: NetworkParams,
        seed: u64,
    ) -> Result<Self, NetworkError> {
        params.validate()?;
        if topology.outputs == 0 {
            return Err(NetworkError::InvalidTopology {
                reason: "a network needs at least one output",
            });
        }
        let mut network = Self::empty(params, seed)?;

        for feature in features {
            let id = network
                .graph
                .add_input(Some(feature.label.clone()), feature.boost);
            network.inputs.push(id);
        }

        let mut previous = network.inputs.clone();
        for layer in 0..topology.hidden_layers {
            let size = (topology.layer_size)(
                features.len(),
                topology.outputs,
                layer,
                topology.hidden_layers,
            );
            if size == 0 {
                return Err(NetworkError::InvalidTopology {
                    reason: "hidden layers cannot be empty",
                });
            }
            let mut nodes = Vec::with_capacity(size);
            for _ in 0..size {
                let bias_weight = network.random_weight();
                let id = network.graph.add_hidden(bias_weight);
                network.connect_all(id, &previous)?;
                nodes.push(id);
            }
            previous.clone_from(&nodes);
            network.hidden.push(nodes);
        }

        for _ in 0..topology.outputs {
            let bias_weight = network.random_weight();
            let id = network
                .graph
                .add_output(topology.output_activation, bias_weight);
            network.connect_all(id, &previous)?;
            network.outputs.push(id);
        }

        Ok(network)
    }

    pub(crate) fn empty(params: NetworkParams, seed: u64) -> Result<Self, NetworkError> {
        let w = params.max_initial_weight;
        let initial_weights =
            Uniform::new_inclusive(-w, w).map_err(|_| NetworkError::InvalidParameter {
                name: "max initial weight",
                value: w,
            })?;
        Ok(Self {
            graph: NodeGraph::new(params.learning_rate, params.momentum),
            inputs: Vec::new(),
            hidden: Vec::new(),
            outputs: Vec::new(),
            params,
            rng: Pcg64::seed_from_u64(seed),
            initial_weights,
        })
    }

    pub(crate) fn push_input(&mut self, id: NodeId) {
        self.inputs.push(id);
    }

    pub(crate) fn push_hidden(&mut self, layer: usize, id: NodeId) {
        if self.hidden.len() <= layer {
            self.hidden.resize_with(layer + 1, Vec::new);
        }
        self.hidden[layer].push(id);
    }

    pub(crate) fn push_output(&mut self, id: NodeId) {
        self.outputs.push(id);
    }

    fn random_weight(&mut self) -> f64 {
        self.initial_weights.sample(&mut self.rng)
    }

    fn connect_all(&mut self, target: NodeId, sources: &[NodeId]) -> Result<(), NetworkError> {
        for &source in sources {
            let weight = self.random_weight();
            self.graph.connect(target, source, weight)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    /// Direct access to the graph, e.g. for setting known weights.
    pub fn graph_mut(&mut self) -> &mut NodeGraph {
        &mut self.graph
    }

    #[must_use]
    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    #[must_use]
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    #[must_use]
    pub fn hidden_layers(&self) -> &[Vec<NodeId>] {
        &self.hidden
    }

    #[must_use]
    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    /// Labels of the inputs, in feature-vector order.
    pub fn input_labels(&self) -> impl Iterator<Item = Option<&str>> {
        self.inputs
            .iter()
            .map(|&id| match self.graph.node(id).map(|node| node.kind()) {
                Some(NodeKind::Input { label, .. }) => label.as_deref(),
                _ => None,
            })
    }

    /// Trains on one example with `label` as the target of the first output.
    ///
    /// All outputs and errors of the step are resolved before any weight
    /// changes; then every hidden layer in order, and finally the outputs,
    /// apply their updates.
    pub fn train(&mut self, features: &[f64], label: f64) -> Result<(), NetworkError> {
        self.load(features)?;
        let first = self.first_output()?;
        self.graph.set_target(first, label)?;
        self.graph.mark_stale();

        for layer in &self.hidden {
            for &id in layer {
                self.graph.error(id)?;
            }
        }
        for &id in &self.outputs {
            self.graph.error(id)?;
        }

        for layer in &self.hidden {
            for &id in layer {
                self.graph.train(id)?;
            }
        }
        for &id in &self.outputs {
            self.graph.train(id)?;
        }
        Ok(())
    }

    /// Output of the first output node for `features`. Weights are untouched.
    pub fn predict(&mut self, features: &[f64]) -> Result<f64, NetworkError> {
        self.load(features)?;
        let first = self.first_output()?;
        self.graph.mark_stale();
        Ok(self.graph.output(first))
    }

    /// Outputs of every output node for `features`.
    pub fn predict_all(&mut self, features: &[f64]) -> Result<Vec<f64>, NetworkError> {
        self.load(features)?;
        self.graph.mark_stale();
        Ok(self
            .outputs
            .iter()
            .map(|&id| self.graph.output(id))
            .collect())
    }

    /// Weights of the network in its serializable form.
    #[must_use]
    pub fn snapshot(&self) -> NetworkSnapshot {
        let neuron_entry = |id: NodeId| NeuronEntry {
            id: id.index(),
            weights: self
                .graph
                .node(id)
                .and_then(|node| node.kind().neuron())
                .map(|neuron| {
                    neuron
                        .connections()
                        .iter()
                        .map(|c| (c.source.index(), c.weight))
                        .collect()
                })
                .unwrap_or_default(),
        };

        NetworkSnapshot {
            bias: vec![BiasEntry {
                id: self.graph.bias().index(),
            }],
            inputs: self
                .inputs
                .iter()
                .zip(self.input_labels())
                .map(|(id, label)| InputEntry {
                    id: id.index(),
                    label: label.map(str::to_owned),
                })
                .collect(),
            hidden: self.hidden.iter().flatten().copied().map(neuron_entry).collect(),
            output: self.outputs.iter().copied().map(neuron_entry).collect(),
        }
    }

    fn load(&mut self, features: &[f64]) -> Result<(), NetworkError> {
        if features.len() != self.inputs.len() {
            return Err(DimensionMismatchError {
                expected: self.inputs.len(),
                actual: features.len(),
            }
            .into());
        }
        for (&id, &value) in self.inputs.iter().zip(features) {
            self.graph.set_input(id, value)?;
        }
        Ok(())
    }

    fn first_output(&self) -> Result<NodeId, NetworkError> {
        self.outputs
            .first()
            .copied()
            .ok_or(NetworkError::InvalidTopology {
                reason: "a network needs at least one output",
            })
    }
}
