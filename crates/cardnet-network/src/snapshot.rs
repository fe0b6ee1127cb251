//! Serialized form of a network's weights.
//!
//! A snapshot lists the bias node, the labelled inputs, the hidden nodes
//! (layer by layer) and the outputs. Every hidden and output entry maps the
//! id of each node feeding it to the weight of that connection:
//!
//! ```json
//! {"bias":[{"id":0}],
//!  "inputs":[{"id":1,"label":"copper_in_player_deck"}],
//!  "hidden":[{"id":2,"weights":{"0":0.12,"1":-0.3}}],
//!  "output":[{"id":3,"weights":{"0":0.05,"2":0.41}}]}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::SnapshotError,
    graph::{NodeGraph, NodeId, OutputActivation},
    network::{Network, NetworkParams},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub bias: Vec<BiasEntry>,
    pub inputs: Vec<InputEntry>,
    pub hidden: Vec<NeuronEntry>,
    pub output: Vec<NeuronEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasEntry {
    pub id: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEntry {
    pub id: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronEntry {
    pub id: usize,
    pub weights: BTreeMap<usize, f64>,
}

impl NetworkSnapshot {
    /// Whether every hidden and output weight is a finite number.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.hidden
            .iter()
            .chain(&self.output)
            .flat_map(|entry| entry.weights.values())
            .all(|w| w.is_finite())
    }
}

/// Where a snapshot id ended up in the rebuilt graph, with the hidden depth
/// of the node (`None` for bias and inputs).
type Placement = BTreeMap<usize, (NodeId, Option<usize>)>;

impl Network {
    /// Rebuilds a network from a snapshot.
    ///
    /// Entries must only reference nodes listed before them. Hidden layers
    /// are recovered from connection depth. Input boosts are not part of the
    /// snapshot; they are looked up by label in `boosts` and default to `1.0`.
    pub fn from_snapshot(
        snapshot: &NetworkSnapshot,
        params: NetworkParams,
        output_activation: OutputActivation,
        boosts: &BTreeMap<String, f64>,
    ) -> Result<Self, SnapshotError> {
        params.validate()?;
        let [bias] = snapshot.bias.as_slice() else {
            return Err(SnapshotError::BiasCount {
                count: snapshot.bias.len(),
            });
        };
        if snapshot.output.is_empty() {
            return Err(SnapshotError::NoOutputs);
        }

        let mut network = Network::empty(params, 0)?;
        let mut placed = Placement::new();
        placed.insert(bias.id, (network.graph().bias(), None));

        for input in &snapshot.inputs {
            if placed.contains_key(&input.id) {
                return Err(SnapshotError::DuplicateId { id: input.id });
            }
            let boost = input
                .label
                .as_ref()
                .and_then(|label| boosts.get(label))
                .copied()
                .unwrap_or(1.0);
            let id = network.graph_mut().add_input(input.label.clone(), boost);
            network.push_input(id);
            placed.insert(input.id, (id, None));
        }

        for entry in &snapshot.hidden {
            let (id, depth) = place(&mut network, entry, bias.id, &mut placed, |graph, w| {
                graph.add_hidden(w)
            })?;
            network.push_hidden(depth, id);
        }
        for entry in &snapshot.output {
            let (id, _) = place(&mut network, entry, bias.id, &mut placed, |graph, w| {
                graph.add_output(output_activation, w)
            })?;
            network.push_output(id);
        }

        Ok(network)
    }
}

fn place<F>(
    network: &mut Network,
    entry: &NeuronEntry,
    bias_id: usize,
    placed: &mut Placement,
    add: F,
) -> Result<(NodeId, usize), SnapshotError>
where
    F: FnOnce(&mut NodeGraph, f64) -> NodeId,
{
    if placed.contains_key(&entry.id) {
        return Err(SnapshotError::DuplicateId { id: entry.id });
    }
    let &bias_weight = entry
        .weights
        .get(&bias_id)
        .ok_or(SnapshotError::MissingBias { node: entry.id })?;

    let mut depth = 0;
    let mut sources = Vec::with_capacity(entry.weights.len());
    for (&reference, &weight) in entry.weights.iter().filter(|(id, _)| **id != bias_id) {
        let &(source, source_depth) =
            placed
                .get(&reference)
                .ok_or(SnapshotError::UnknownReference {
                    node: entry.id,
                    reference,
                })?;
        if let Some(d) = source_depth {
            depth = depth.max(d + 1);
        }
        sources.push((source, weight));
    }

    let id = add(network.graph_mut(), bias_weight);
    for (source, weight) in sources {
        network.graph_mut().connect(id, source, weight)?;
    }
    placed.insert(entry.id, (id, Some(depth)));
    Ok((id, depth))
}
