//! Models the training loop can drive.

use std::collections::BTreeMap;

use cardnet_network::{
    Activation, DimensionMismatchError, Network, NetworkError, NetworkSnapshot, Unit,
};
use rand::SeedableRng as _;
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

use crate::{config::LearnerConfig, features::FeatureSet};

/// Which model to train for every category.
#[derive(
    Default,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::FromStr,
)]
#[serde(rename_all = "snake_case")]
pub enum LearnerKind {
    /// Multilayer network trained by backpropagation.
    #[default]
    Backprop,
    /// Single unit with a hard threshold output.
    Perceptron,
    /// Single unit with an identity output.
    Linear,
}

impl LearnerKind {
    /// Directory name used for this learner's artifacts.
    #[must_use]
    pub fn folder(self) -> &'static str {
        match self {
            Self::Backprop => "Backprop",
            Self::Perceptron => "Perceptron",
            Self::Linear => "Linear",
        }
    }
}

/// Key of the bias weight in a single unit's model.
pub const UNIT_BIAS_KEY: &str = "bias";

/// Learned weights in their serializable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LearnedModel {
    Network(NetworkSnapshot),
    /// One weight per feature name plus a `bias` entry.
    Unit(BTreeMap<String, f64>),
}

impl LearnedModel {
    /// Whether every weight is a finite number.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Network(snapshot) => snapshot.is_finite(),
            Self::Unit(weights) => weights.values().all(|w| w.is_finite()),
        }
    }
}

pub trait Learner {
    /// Trains on one example; `label` is already normalized.
    fn train_instance(&mut self, features: &[f64], label: f64) -> Result<(), NetworkError>;

    fn predict(&mut self, features: &[f64]) -> Result<f64, NetworkError>;

    fn model(&self) -> LearnedModel;
}

/// Creates the learner selected by `config` for a feature set.
pub fn build_learner(
    config: &LearnerConfig,
    features: &FeatureSet,
    seed: u64,
) -> Result<Box<dyn Learner>, NetworkError> {
    let learner: Box<dyn Learner> = match config.kind {
        LearnerKind::Backprop => Box::new(BackpropLearner::new(Network::new(
            features.inputs(),
            &config.topology,
            config.params,
            seed,
        )?)),
        LearnerKind::Perceptron => Box::new(UnitLearner::new(
            features,
            config,
            Activation::Threshold,
            seed,
        )?),
        LearnerKind::Linear => {
            Box::new(UnitLearner::new(features, config, Activation::Linear, seed)?)
        }
    };
    Ok(learner)
}

#[derive(Debug, Clone)]
pub struct BackpropLearner {
    network: Network,
}

impl BackpropLearner {
    #[must_use]
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    #[must_use]
    pub fn network(&self) -> &Network {
        &self.network
    }
}

impl Learner for BackpropLearner {
    fn train_instance(&mut self, features: &[f64], label: f64) -> Result<(), NetworkError> {
        self.network.train(features, label)
    }

    fn predict(&mut self, features: &[f64]) -> Result<f64, NetworkError> {
        self.network.predict(features)
    }

    fn model(&self) -> LearnedModel {
        LearnedModel::Network(self.network.snapshot())
    }
}

/// Perceptron or linear unit over the raw feature values.
///
/// Feature boosts do not apply to single units.
#[derive(Debug, Clone)]
pub struct UnitLearner {
    unit: Unit,
    labels: Vec<String>,
    momentum: f64,
}

impl UnitLearner {
    pub fn new(
        features: &FeatureSet,
        config: &LearnerConfig,
        activation: Activation,
        seed: u64,
    ) -> Result<Self, NetworkError> {
        config.params.validate()?;
        let labels = features.names();
        if let Some(label) = labels.iter().find(|label| *label == UNIT_BIAS_KEY) {
            return Err(NetworkError::ReservedLabel {
                label: label.clone(),
            });
        }
        let mut rng = Pcg64::seed_from_u64(seed);
        let unit = Unit::random(
            &mut rng,
            features.len(),
            config.params.learning_rate,
            activation,
        );
        Ok(Self {
            unit,
            labels,
            momentum: config.params.momentum,
        })
    }

    /// Rebuilds a unit from its saved weights, or `None` when the bias
    /// weight is missing.
    #[must_use]
    pub fn from_weights(
        weights: &BTreeMap<String, f64>,
        config: &LearnerConfig,
        activation: Activation,
    ) -> Option<Self> {
        let bias = *weights.get(UNIT_BIAS_KEY)?;
        let (labels, mut values): (Vec<_>, Vec<_>) = weights
            .iter()
            .filter(|(name, _)| *name != UNIT_BIAS_KEY)
            .map(|(name, weight)| (name.clone(), *weight))
            .unzip();
        values.push(bias);
        Some(Self {
            unit: Unit::new(values, config.params.learning_rate, activation),
            labels,
            momentum: config.params.momentum,
        })
    }

    #[must_use]
    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// Feature names in input order.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn check(&self, features: &[f64]) -> Result<(), NetworkError> {
        if features.len() == self.labels.len() {
            Ok(())
        } else {
            Err(DimensionMismatchError {
                expected: self.labels.len(),
                actual: features.len(),
            }
            .into())
        }
    }
}

impl Learner for UnitLearner {
    fn train_instance(&mut self, features: &[f64], label: f64) -> Result<(), NetworkError> {
        self.check(features)?;
        self.unit.train(features, label, self.momentum);
        Ok(())
    }

    fn predict(&mut self, features: &[f64]) -> Result<f64, NetworkError> {
        self.check(features)?;
        Ok(self.unit.predict(features))
    }

    fn model(&self) -> LearnedModel {
        let mut weights = self
            .labels
            .iter()
            .cloned()
            .zip(self.unit.weights().iter().copied())
            .collect::<BTreeMap<_, _>>();
        weights.insert(UNIT_BIAS_KEY.to_owned(), self.unit.bias_weight());
        LearnedModel::Unit(weights)
    }
}

#[cfg(test)]
mod tests {
    use cardnet_network::InputFeature;

    use super::*;

    fn features() -> FeatureSet {
        FeatureSet::new(vec![
            InputFeature::new("a", 1.0),
            InputFeature::new("b", 1.0),
        ])
    }

    fn config(kind: LearnerKind) -> LearnerConfig {
        LearnerConfig {
            kind,
            ..LearnerConfig::default()
        }
    }

    #[test]
    fn test_kind_parses_case_insensitively() {
        assert_eq!("backprop".parse::<LearnerKind>().unwrap(), LearnerKind::Backprop);
        assert_eq!("Perceptron".parse::<LearnerKind>().unwrap(), LearnerKind::Perceptron);
        assert!("svm".parse::<LearnerKind>().is_err());
    }

    #[test]
    fn test_backprop_model_is_a_snapshot() {
        let learner = build_learner(&config(LearnerKind::Backprop), &features(), 1).unwrap();
        let LearnedModel::Network(snapshot) = learner.model() else {
            panic!("expected a network snapshot");
        };
        assert_eq!(snapshot.inputs.len(), 2);
    }

    #[test]
    fn test_unit_model_names_weights() {
        let mut learner = build_learner(&config(LearnerKind::Linear), &features(), 1).unwrap();
        learner.train_instance(&[1.0, 0.0], 0.5).unwrap();
        let LearnedModel::Unit(weights) = learner.model() else {
            panic!("expected unit weights");
        };
        assert_eq!(
            weights.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["a", "b", "bias"]
        );

        let json = serde_json::to_string(&learner.model()).unwrap();
        let parsed: LearnedModel = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, learner.model());
    }

    #[test]
    fn test_unit_reloads_from_weights() {
        let config = config(LearnerKind::Linear);
        let mut learner = build_learner(&config, &features(), 9).unwrap();
        learner.train_instance(&[0.5, 1.0], 0.25).unwrap();
        let LearnedModel::Unit(weights) = learner.model() else {
            panic!("expected unit weights");
        };

        let mut reloaded = UnitLearner::from_weights(&weights, &config, Activation::Linear).unwrap();
        assert_eq!(reloaded.labels(), ["a", "b"]);
        assert_eq!(
            reloaded.predict(&[0.5, 1.0]).unwrap(),
            learner.predict(&[0.5, 1.0]).unwrap()
        );

        let mut no_bias = weights;
        no_bias.remove(UNIT_BIAS_KEY);
        assert!(UnitLearner::from_weights(&no_bias, &config, Activation::Linear).is_none());
    }

    #[test]
    fn test_unit_rejects_feature_named_bias() {
        let features = FeatureSet::new(vec![
            InputFeature::new(UNIT_BIAS_KEY, 1.0),
            InputFeature::new("x", 1.0),
        ]);
        for kind in [LearnerKind::Linear, LearnerKind::Perceptron] {
            let err = build_learner(&config(kind), &features, 1).err();
            assert_eq!(
                err,
                Some(NetworkError::ReservedLabel {
                    label: "bias".to_owned()
                })
            );
        }
        // networks keep input labels apart from the bias node
        assert!(build_learner(&config(LearnerKind::Backprop), &features, 1).is_ok());
    }

    #[test]
    fn test_model_finiteness() {
        let mut weights = [("a", 0.5), ("bias", -0.25)]
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect::<BTreeMap<_, _>>();
        assert!(LearnedModel::Unit(weights.clone()).is_finite());
        weights.insert("a".to_owned(), f64::NAN);
        assert!(!LearnedModel::Unit(weights).is_finite());

        let learner = build_learner(&config(LearnerKind::Backprop), &features(), 2).unwrap();
        let LearnedModel::Network(mut snapshot) = learner.model() else {
            panic!("expected a network snapshot");
        };
        assert!(snapshot.is_finite());
        snapshot.output[0].weights.insert(0, f64::INFINITY);
        assert!(!LearnedModel::Network(snapshot).is_finite());
    }

    #[test]
    fn test_perceptron_outputs_classes() {
        let mut learner =
            build_learner(&config(LearnerKind::Perceptron), &features(), 4).unwrap();
        for _ in 0..200 {
            learner.train_instance(&[1.0, 1.0], 1.0).unwrap();
            learner.train_instance(&[0.0, 0.0], 0.0).unwrap();
        }
        assert_eq!(learner.predict(&[1.0, 1.0]).unwrap(), 1.0);
        assert_eq!(learner.predict(&[0.0, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_unit_learner_rejects_wrong_length() {
        let mut learner = build_learner(&config(LearnerKind::Linear), &features(), 1).unwrap();
        assert!(matches!(
            learner.predict(&[1.0]),
            Err(NetworkError::Dimension(_))
        ));
    }
}
