//! Arena-backed node graph with lazily memoized forward and backward values.
//!
//! All nodes of a network live in one `Vec` owned by [`NodeGraph`]; they
//! refer to each other by [`NodeId`], which is the node's index in that
//! arena and therefore also its creation order. A connection may only run
//! from an earlier node to a later one, so the graph is acyclic by
//! construction.
//!
//! # Evaluation protocol
//!
//! Hidden and output nodes cache their output and error together with the
//! step at which the value was computed. [`NodeGraph::mark_stale`] advances
//! the step counter, which invalidates every cache at once. The first read
//! of a value after that recomputes it (recursively forcing upstream outputs
//! or downstream errors) and any later read in the same step returns the
//! cached value. Each node is thus recomputed at most once per step, and the
//! order in which values are read does not affect them.
//!
//! Weight updates ([`NodeGraph::train`]) must only happen once every value
//! needed for the step has been resolved: updating a node's incoming weights
//! does not invalidate the cached errors of the nodes upstream of it, which
//! were computed against the old weights.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{error::GraphError, unit::Activation};

/// Identity of a node inside one [`NodeGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("{_0}")]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in creation order.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Activation of an output node.
#[derive(
    Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::FromStr,
)]
#[serde(rename_all = "snake_case")]
pub enum OutputActivation {
    /// Identity output, suited for regression on normalized targets.
    #[default]
    Continuous,
    /// Sigmoid output bounded to `(0, 1)`.
    Bounded,
}

impl OutputActivation {
    #[must_use]
    pub fn activation(self) -> Activation {
        match self {
            Self::Continuous => Activation::Linear,
            Self::Bounded => Activation::Sigmoid,
        }
    }
}

/// An incoming, weighted edge of a hidden or output node.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub source: NodeId,
    pub weight: f64,
    pub previous_delta: f64,
}

/// Connection machinery shared by hidden and output nodes.
#[derive(Debug, Clone, Default)]
pub struct Neuron {
    connections: Vec<Connection>,
    slots: BTreeMap<NodeId, usize>,
    output: f64,
    output_step: u64,
    error: f64,
    error_step: u64,
}

impl Neuron {
    /// Incoming connections in the order they were made.
    #[must_use]
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    #[must_use]
    pub fn weight_from(&self, source: NodeId) -> Option<f64> {
        self.slots
            .get(&source)
            .map(|&slot| self.connections[slot].weight)
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Constant `1.0` output, wired into every hidden and output node.
    Bias,
    Input {
        label: Option<String>,
        boost: f64,
        value: f64,
    },
    Hidden(Neuron),
    Output {
        neuron: Neuron,
        activation: OutputActivation,
        target: f64,
    },
}

impl NodeKind {
    #[must_use]
    pub fn neuron(&self) -> Option<&Neuron> {
        match self {
            Self::Hidden(neuron) | Self::Output { neuron, .. } => Some(neuron),
            Self::Bias | Self::Input { .. } => None,
        }
    }

    fn neuron_mut(&mut self) -> Option<&mut Neuron> {
        match self {
            Self::Hidden(neuron) | Self::Output { neuron, .. } => Some(neuron),
            Self::Bias | Self::Input { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Downstream {
    target: NodeId,
    slot: usize,
}

#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    downstream: Vec<Downstream>,
}

impl Node {
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Nodes that take this node's output as an input.
    pub fn downstream(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.downstream.iter().map(|d| d.target)
    }
}

enum Role {
    Hidden,
    Output { target: f64, activation: Activation },
}

/// The arena holding every node of one network.
#[derive(Debug, Clone)]
pub struct NodeGraph {
    nodes: Vec<Node>,
    step: u64,
    learning_rate: f64,
    momentum: f64,
    recomputations: u64,
}

impl NodeGraph {
    const BIAS: NodeId = NodeId(0);

    /// Creates a graph containing only the bias node.
    #[must_use]
    pub fn new(learning_rate: f64, momentum: f64) -> Self {
        let bias = Node {
            id: Self::BIAS,
            kind: NodeKind::Bias,
            downstream: Vec::new(),
        };
        Self {
            nodes: vec![bias],
            // caches start at step 0, so everything is stale initially
            step: 1,
            learning_rate,
            momentum,
            recomputations: 0,
        }
    }

    #[must_use]
    pub fn bias(&self) -> NodeId {
        Self::BIAS
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    #[must_use]
    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    /// Total number of output and error recomputations since creation.
    #[must_use]
    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }

    pub fn add_input(&mut self, label: Option<String>, boost: f64) -> NodeId {
        self.push(NodeKind::Input {
            label,
            boost,
            value: 0.0,
        })
    }

    /// Adds a sigmoid hidden node already connected to the bias node.
    pub fn add_hidden(&mut self, bias_weight: f64) -> NodeId {
        let id = self.push(NodeKind::Hidden(Neuron::default()));
        self.link(id, Self::BIAS, bias_weight);
        id
    }

    /// Adds an output node already connected to the bias node.
    pub fn add_output(&mut self, activation: OutputActivation, bias_weight: f64) -> NodeId {
        let id = self.push(NodeKind::Output {
            neuron: Neuron::default(),
            activation,
            target: 0.0,
        });
        self.link(id, Self::BIAS, bias_weight);
        id
    }

    /// Feeds the output of `source` into `target` with the given weight.
    ///
    /// `source` must have been created before `target`, and each pair may
    /// only be connected once.
    pub fn connect(
        &mut self,
        target: NodeId,
        source: NodeId,
        weight: f64,
    ) -> Result<(), GraphError> {
        self.check(source)?;
        self.check(target)?;
        if source >= target {
            return Err(GraphError::NotUpstream {
                from: source,
                to: target,
            });
        }
        let neuron = self.nodes[target.0]
            .kind
            .neuron()
            .ok_or(GraphError::NotANeuron { target })?;
        if neuron.slots.contains_key(&source) {
            return Err(GraphError::DuplicateConnection {
                from: source,
                to: target,
            });
        }
        self.link(target, source, weight);
        Ok(())
    }

    /// Writes a raw feature value into an input node, scaled by its boost.
    pub fn set_input(&mut self, id: NodeId, raw: f64) -> Result<(), GraphError> {
        self.check(id)?;
        match &mut self.nodes[id.0].kind {
            NodeKind::Input { boost, value, .. } => {
                *value = raw * *boost;
                Ok(())
            }
            _ => Err(GraphError::NotAnInput { id }),
        }
    }

    pub fn set_target(&mut self, id: NodeId, value: f64) -> Result<(), GraphError> {
        self.check(id)?;
        match &mut self.nodes[id.0].kind {
            NodeKind::Output { target, .. } => {
                *target = value;
                Ok(())
            }
            _ => Err(GraphError::NotAnOutput { id }),
        }
    }

    /// Overwrites the weight of an existing connection.
    pub fn set_weight(
        &mut self,
        target: NodeId,
        source: NodeId,
        weight: f64,
    ) -> Result<(), GraphError> {
        self.check(target)?;
        let neuron = self.nodes[target.0]
            .kind
            .neuron_mut()
            .ok_or(GraphError::NotANeuron { target })?;
        let &slot = neuron
            .slots
            .get(&source)
            .ok_or(GraphError::UnknownNode { id: source })?;
        neuron.connections[slot].weight = weight;
        self.step += 1;
        Ok(())
    }

    #[must_use]
    pub fn weight(&self, target: NodeId, source: NodeId) -> Option<f64> {
        self.node(target)?.kind.neuron()?.weight_from(source)
    }

    /// Invalidates every cached output and error.
    pub fn mark_stale(&mut self) {
        self.step += 1;
    }

    /// Returns whether the output of `id` is cached for the current step.
    ///
    /// Bias and input nodes never need recomputation.
    #[must_use]
    pub fn is_output_fresh(&self, id: NodeId) -> bool {
        self.node(id)
            .and_then(|node| node.kind.neuron())
            .is_none_or(|neuron| neuron.output_step == self.step)
    }

    /// Output of a node, recomputing it and its stale upstream nodes first.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this graph.
    pub fn output(&mut self, id: NodeId) -> f64 {
        let step = self.step;
        let (len, activation) = match &self.nodes[id.0].kind {
            NodeKind::Bias => return 1.0,
            NodeKind::Input { value, .. } => return *value,
            NodeKind::Hidden(neuron) => {
                if neuron.output_step == step {
                    return neuron.output;
                }
                (neuron.connections.len(), Activation::Sigmoid)
            }
            NodeKind::Output {
                neuron, activation, ..
            } => {
                if neuron.output_step == step {
                    return neuron.output;
                }
                (neuron.connections.len(), activation.activation())
            }
        };

        let mut net = 0.0;
        for slot in 0..len {
            let (source, weight) = self.connection(id, slot);
            net += weight * self.output(source);
        }
        let output = activation.apply(net);

        self.recomputations += 1;
        if let Some(neuron) = self.nodes[id.0].kind.neuron_mut() {
            neuron.output = output;
            neuron.output_step = step;
        }
        output
    }

    /// Error signal of a node, recomputing stale downstream errors first.
    ///
    /// Input nodes always have zero error; the bias node has none at all.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this graph.
    pub fn error(&mut self, id: NodeId) -> Result<f64, GraphError> {
        let step = self.step;
        let role = match &self.nodes[id.0].kind {
            NodeKind::Bias => return Err(GraphError::BiasHasNoError),
            NodeKind::Input { .. } => return Ok(0.0),
            NodeKind::Hidden(neuron) => {
                if neuron.error_step == step {
                    return Ok(neuron.error);
                }
                Role::Hidden
            }
            NodeKind::Output {
                neuron,
                activation,
                target,
            } => {
                if neuron.error_step == step {
                    return Ok(neuron.error);
                }
                Role::Output {
                    target: *target,
                    activation: activation.activation(),
                }
            }
        };

        let output = self.output(id);
        let error = match role {
            Role::Output { target, activation } => {
                (target - output) * activation.derivative(output)
            }
            Role::Hidden => {
                let mut sum = 0.0;
                for i in 0..self.nodes[id.0].downstream.len() {
                    let Downstream { target, slot } = self.nodes[id.0].downstream[i];
                    let downstream_error = self.error(target)?;
                    sum += downstream_error * self.connection(target, slot).1;
                }
                sum * sigmoid_derivative(output)
            }
        };

        self.recomputations += 1;
        if let Some(neuron) = self.nodes[id.0].kind.neuron_mut() {
            neuron.error = error;
            neuron.error_step = step;
        }
        Ok(error)
    }

    /// Applies the delta rule to every incoming connection of `id`.
    ///
    /// For each connection `delta = learning_rate * upstream_output * error`;
    /// the weight moves by `delta + momentum * previous_delta` and `delta`
    /// becomes the new previous delta. Input nodes have nothing to train.
    pub fn train(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.check(id)?;
        let error = self.error(id)?;
        let len = self.nodes[id.0]
            .kind
            .neuron()
            .map_or(0, |neuron| neuron.connections.len());
        for slot in 0..len {
            let (source, _) = self.connection(id, slot);
            let upstream = self.output(source);
            let delta = self.learning_rate * upstream * error;
            let momentum = self.momentum;
            if let Some(neuron) = self.nodes[id.0].kind.neuron_mut() {
                let connection = &mut neuron.connections[slot];
                connection.weight += delta + momentum * connection.previous_delta;
                connection.previous_delta = delta;
            }
        }
        Ok(())
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            kind,
            downstream: Vec::new(),
        });
        id
    }

    fn link(&mut self, target: NodeId, source: NodeId, weight: f64) {
        let Some(neuron) = self.nodes[target.0].kind.neuron_mut() else {
            return;
        };
        let slot = neuron.connections.len();
        neuron.connections.push(Connection {
            source,
            weight,
            previous_delta: 0.0,
        });
        neuron.slots.insert(source, slot);
        self.nodes[source.0]
            .downstream
            .push(Downstream { target, slot });
        self.step += 1;
    }

    // Only called with (node, slot) pairs taken from the graph itself.
    fn connection(&self, id: NodeId, slot: usize) -> (NodeId, f64) {
        self.nodes[id.0]
            .kind
            .neuron()
            .map_or((Self::BIAS, 0.0), |neuron| {
                let connection = &neuron.connections[slot];
                (connection.source, connection.weight)
            })
    }

    fn check(&self, id: NodeId) -> Result<(), GraphError> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownNode { id })
        }
    }
}

fn sigmoid_derivative(output: f64) -> f64 {
    Activation::Sigmoid.derivative(output)
}
