//! Single linear-plus-activation units.
//!
//! A [`Unit`] is the smallest trainable model in the crate: a weight per
//! input plus a bias weight, a weighted sum, and an [`Activation`] applied
//! to that sum. With [`Activation::Threshold`] it is a perceptron, with
//! [`Activation::Linear`] a linear unit trained by the delta rule, and with
//! [`Activation::Sigmoid`] a sigmoid unit.
//!
//! Units are pure numeric code. Callers are expected to pass input slices
//! of the right length; a mismatch is a programming error and panics.

use rand::Rng;

/// The logistic function `1 / (1 + e^-x)`.
#[must_use]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Activation applied to the weighted sum of a unit or node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Identity.
    Linear,
    /// Hard threshold at zero: `1` for positive sums, `0` otherwise.
    Threshold,
    /// Logistic sigmoid.
    Sigmoid,
}

impl Activation {
    #[must_use]
    pub fn apply(self, net: f64) -> f64 {
        match self {
            Self::Linear => net,
            Self::Threshold => {
                if net > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Sigmoid => sigmoid(net),
        }
    }

    /// Derivative of the activation, expressed in terms of the activated
    /// output rather than the weighted sum.
    ///
    /// The threshold function has no useful derivative; it is treated like
    /// the identity, which turns the delta rule into the perceptron rule.
    #[must_use]
    pub fn derivative(self, output: f64) -> f64 {
        match self {
            Self::Linear | Self::Threshold => 1.0,
            Self::Sigmoid => output * (1.0 - output),
        }
    }
}

/// A single unit with one weight per input and a trailing bias weight.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    weights: Vec<f64>,
    previous_deltas: Vec<f64>,
    learning_rate: f64,
    activation: Activation,
}

impl Unit {
    /// Creates a unit from explicit weights; the last weight is the bias.
    ///
    /// # Panics
    ///
    /// Panics if `weights` is empty.
    #[must_use]
    pub fn new(weights: Vec<f64>, learning_rate: f64, activation: Activation) -> Self {
        assert!(!weights.is_empty(), "a unit needs at least a bias weight");
        let previous_deltas = vec![0.0; weights.len()];
        Self {
            weights,
            previous_deltas,
            learning_rate,
            activation,
        }
    }

    /// Creates a unit for `input_count` inputs with weights drawn uniformly
    /// from `[-0.5, 0.5)`.
    pub fn random<R>(
        rng: &mut R,
        input_count: usize,
        learning_rate: f64,
        activation: Activation,
    ) -> Self
    where
        R: Rng + ?Sized,
    {
        let weights = (0..=input_count)
            .map(|_| rng.random_range(-0.5..0.5))
            .collect();
        Self::new(weights, learning_rate, activation)
    }

    #[must_use]
    pub fn input_count(&self) -> usize {
        self.weights.len() - 1
    }

    /// Input weights followed by the bias weight.
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    #[must_use]
    pub fn bias_weight(&self) -> f64 {
        self.weights[self.weights.len() - 1]
    }

    #[must_use]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Weighted sum of `inputs` plus the bias weight.
    #[must_use]
    pub fn net(&self, inputs: &[f64]) -> f64 {
        self.check_len(inputs);
        let (input_weights, _) = self.weights.split_at(self.input_count());
        inputs
            .iter()
            .zip(input_weights)
            .map(|(x, w)| x * w)
            .sum::<f64>()
            + self.bias_weight()
    }

    #[must_use]
    pub fn predict(&self, inputs: &[f64]) -> f64 {
        self.activation.apply(self.net(inputs))
    }

    /// Applies one delta-rule step with momentum.
    ///
    /// Each weight moves by `learning_rate * error * input + momentum * previous`,
    /// where the bias input is the constant `1.0`. The whole step, momentum
    /// included, is remembered as the previous delta for the next call.
    pub fn update_weights(&mut self, inputs: &[f64], error: f64, momentum: f64) {
        self.check_len(inputs);
        let bias_input = [1.0];
        for ((weight, previous), input) in self
            .weights
            .iter_mut()
            .zip(&mut self.previous_deltas)
            .zip(inputs.iter().chain(&bias_input))
        {
            let delta = self.learning_rate * error * input + momentum * *previous;
            *weight += delta;
            *previous = delta;
        }
    }

    /// Trains on a single example and returns the error it was trained on.
    pub fn train(&mut self, inputs: &[f64], target: f64, momentum: f64) -> f64 {
        let error = target - self.predict(inputs);
        self.update_weights(inputs, error, momentum);
        error
    }

    fn check_len(&self, inputs: &[f64]) {
        assert_eq!(
            inputs.len(),
            self.input_count(),
            "unit expects {} inputs",
            self.input_count()
        );
    }
}
