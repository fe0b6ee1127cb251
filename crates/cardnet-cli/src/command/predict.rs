use std::{collections::BTreeMap, path::PathBuf};

use anyhow::Context as _;
use cardnet_network::{Activation, Network, NetworkParams, OutputActivation};
use cardnet_training::{
    LearnedModel, Learner as _, LearnerConfig, LearnerKind, Normalization, UnitLearner,
    features::{is_boosted, rare_feature_boost},
};
use serde::Serialize;
use tracing::debug;

use crate::util;

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct PredictArg {
    /// Output directory of a previous `train` run
    #[arg(long, default_value = "out")]
    models: PathBuf,
    /// Learner whose models are loaded
    #[arg(long, default_value = "backprop")]
    learner: LearnerKind,
    /// JSON object mapping feature names to their values in the game state
    #[arg(long)]
    state: PathBuf,
    /// Output node activation the networks were trained with
    #[arg(long, default_value = "continuous")]
    activation: OutputActivation,
    #[arg(long, requires = "norm_max")]
    norm_min: Option<f64>,
    #[arg(long, requires = "norm_min")]
    norm_max: Option<f64>,
    /// Card pool size the networks were trained with; no boosts when omitted
    #[arg(long)]
    pool_size: Option<usize>,
    /// Only report the best N categories
    #[arg(long)]
    top: Option<usize>,
    /// Output file path (stdout when omitted)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
struct Prediction {
    category: String,
    /// Predicted final score.
    score: f64,
    /// Prediction before denormalization.
    normalized: f64,
}

pub(crate) fn run(arg: &PredictArg) -> anyhow::Result<()> {
    let state: BTreeMap<String, f64> = util::read_json_file("game state", &arg.state)?;
    let normalization = match (arg.norm_min, arg.norm_max) {
        (Some(min), Some(max)) => Normalization::new(min, max)?,
        _ => Normalization::reference(),
    };
    let boost = arg.pool_size.and_then(rare_feature_boost);

    let dir = arg.models.join(arg.learner.folder());
    let mut predictions = Vec::new();
    for (category, path) in util::model_files(&dir)? {
        let model: LearnedModel = util::read_json_file("model", &path)?;
        let normalized = evaluate(&model, arg, &state, boost)
            .with_context(|| format!("Failed to evaluate model: {}", path.display()))?;
        let score = normalization.denormalize(normalized);
        debug!(category, score, "evaluated model");
        predictions.push(Prediction {
            category,
            score,
            normalized,
        });
    }
    if predictions.is_empty() {
        anyhow::bail!("No models found in {}", dir.display());
    }

    rank(&mut predictions);
    if let Some(top) = arg.top {
        predictions.truncate(top);
    }
    util::save_json(&predictions, arg.output.as_deref())
}

fn evaluate(
    model: &LearnedModel,
    arg: &PredictArg,
    state: &BTreeMap<String, f64>,
    boost: Option<f64>,
) -> anyhow::Result<f64> {
    let value_of = |name: &str| {
        state
            .get(name)
            .copied()
            .with_context(|| format!("Game state has no value for feature '{name}'"))
    };

    match model {
        LearnedModel::Network(snapshot) => {
            let boosts = snapshot
                .inputs
                .iter()
                .filter_map(|input| input.label.as_deref())
                .filter(|label| is_boosted(label))
                .filter_map(|label| Some((label.to_owned(), boost?)))
                .collect::<BTreeMap<_, _>>();
            let mut network =
                Network::from_snapshot(snapshot, NetworkParams::default(), arg.activation, &boosts)?;
            let inputs = network
                .input_labels()
                .map(|label| value_of(label.context("Network input has no label")?))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(network.predict(&inputs)?)
        }
        LearnedModel::Unit(weights) => {
            let activation = match arg.learner {
                LearnerKind::Perceptron => Activation::Threshold,
                LearnerKind::Backprop | LearnerKind::Linear => Activation::Linear,
            };
            let mut unit = UnitLearner::from_weights(weights, &LearnerConfig::default(), activation)
                .context("Unit model has no bias weight")?;
            let inputs = unit
                .labels()
                .iter()
                .map(|label| value_of(label))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(unit.predict(&inputs)?)
        }
    }
}

/// Sorts by predicted score, best first.
fn rank(predictions: &mut [Prediction]) {
    predictions.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.category.cmp(&b.category))
    });
}

#[cfg(test)]
mod tests {
    use cardnet_network::{InputFeature, Topology};

    use super::*;

    fn arg(learner: LearnerKind) -> PredictArg {
        PredictArg {
            models: PathBuf::from("out"),
            learner,
            state: PathBuf::from("state.json"),
            activation: OutputActivation::Continuous,
            norm_min: None,
            norm_max: None,
            pool_size: None,
            top: None,
            output: None,
        }
    }

    fn state() -> BTreeMap<String, f64> {
        [("a".to_owned(), 1.0), ("b".to_owned(), 0.5)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_network_model_predicts_like_the_network() {
        let features = [InputFeature::new("a", 1.0), InputFeature::new("b", 1.0)];
        let mut network =
            Network::new(&features, &Topology::default(), NetworkParams::default(), 3).unwrap();
        let expected = network.predict(&[1.0, 0.5]).unwrap();
        let model = LearnedModel::Network(network.snapshot());

        let actual = evaluate(&model, &arg(LearnerKind::Backprop), &state(), None).unwrap();
        assert!((actual - expected).abs() < 1e-12);
    }

    #[test]
    fn test_unit_model_and_missing_feature() {
        let weights = [("a", 2.0), ("b", -1.0), ("bias", 0.25)]
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect();
        let model = LearnedModel::Unit(weights);
        let value = evaluate(&model, &arg(LearnerKind::Linear), &state(), None).unwrap();
        assert!((value - 1.75).abs() < 1e-12);

        let perceptron = evaluate(&model, &arg(LearnerKind::Perceptron), &state(), None).unwrap();
        assert_eq!(perceptron, 1.0);

        let mut partial = state();
        partial.remove("b");
        let err = evaluate(&model, &arg(LearnerKind::Linear), &partial, None).unwrap_err();
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn test_rank_orders_best_first() {
        let mut predictions = [("Moat", 30.0), ("Chapel", 42.0), ("Village", 30.0)]
            .map(|(category, score)| Prediction {
                category: category.to_owned(),
                score,
                normalized: score / 100.0,
            });
        rank(&mut predictions);
        let order = predictions
            .iter()
            .map(|p| p.category.as_str())
            .collect::<Vec<_>>();
        assert_eq!(order, ["Chapel", "Moat", "Village"]);
    }
}
