//! Network topology configuration.
//!
//! This module provides [`NetworkConfig`] describing the ordered layer
//! sequence of a feed-forward network, plus weight initialization settings.
//!
//! # Example
//!
//! ```rust
//! use flatnet::{ActivationKind, NetworkConfig};
//!
//! // Preset: 2 -> 2 (sigmoid) -> 1 (linear)
//! let config = NetworkConfig::preset();
//! assert_eq!(config.layer_counts(), vec![2, 2, 1]);
//!
//! // Or build one
//! let config = NetworkConfig::builder()
//!     .input(4)
//!     .hidden(8, ActivationKind::Tanh)
//!     .output(3, ActivationKind::Softmax)
//!     .seed(7)
//!     .build()
//!     .expect("valid config");
//! assert_eq!(config.output_count(), 3);
//! ```
//!
//! # Bias Units
//!
//! A layer with `has_bias` owns one extra neuron after its `count` logical
//! neurons. Its output is pinned to `bias_activation` (1.0 by default) and it
//! has no incoming weights. By convention input and hidden layers carry a
//! bias and the output layer does not.

use std::borrow::Cow;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::activation::ActivationKind;

/// Default weight initialization range.
pub const DEFAULT_INIT_RANGE: (f64, f64) = (-1.0, 1.0);

/// Default output value of a bias neuron.
pub const DEFAULT_BIAS_ACTIVATION: f64 = 1.0;

/// Configuration of one layer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LayerConfig {
    /// Number of logical neurons (bias excluded).
    pub count: usize,
    /// Whether the layer carries a bias neuron.
    pub has_bias: bool,
    /// Activation applied to this layer's sums.
    pub activation: ActivationKind,
    /// Fraction of neurons disabled per dropout sample (0 = none).
    pub dropout_rate: f64,
}

impl LayerConfig {
    /// Input layer: linear, with bias.
    pub fn input(count: usize) -> Self {
        Self {
            count,
            has_bias: true,
            activation: ActivationKind::Linear,
            dropout_rate: 0.0,
        }
    }

    /// Hidden layer with bias.
    pub fn hidden(count: usize, activation: ActivationKind) -> Self {
        Self {
            count,
            has_bias: true,
            activation,
            dropout_rate: 0.0,
        }
    }

    /// Output layer without bias.
    pub fn output(count: usize, activation: ActivationKind) -> Self {
        Self {
            count,
            has_bias: false,
            activation,
            dropout_rate: 0.0,
        }
    }

    /// Sets the dropout rate.
    pub fn with_dropout(mut self, rate: f64) -> Self {
        self.dropout_rate = rate;
        self
    }

    /// Neuron count including the bias unit.
    #[inline]
    pub fn total_count(&self) -> usize {
        self.count + usize::from(self.has_bias)
    }
}

/// Full network configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NetworkConfig {
    /// Layers in order, input first.
    pub layers: Vec<LayerConfig>,

    /// Uniform weight initialization range `(min, max)`.
    pub init_range: (f64, f64),

    /// Optional seed for deterministic initialization (None => random).
    pub init_seed: Option<u64>,

    /// Output value pinned on every bias neuron.
    pub bias_activation: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::preset()
    }
}

impl NetworkConfig {
    /// Small 2 -> 2 -> 1 network: sigmoid hidden layer, linear output.
    pub fn preset() -> Self {
        Self {
            layers: vec![
                LayerConfig::input(2),
                LayerConfig::hidden(2, ActivationKind::Sigmoid),
                LayerConfig::output(1, ActivationKind::Linear),
            ],
            init_range: DEFAULT_INIT_RANGE,
            init_seed: None,
            bias_activation: DEFAULT_BIAS_ACTIVATION,
        }
    }

    /// Starts a builder.
    pub fn builder() -> NetworkConfigBuilder {
        NetworkConfigBuilder::new()
    }

    /// Logical neuron counts per layer (bias excluded).
    pub fn layer_counts(&self) -> Vec<usize> {
        self.layers.iter().map(|l| l.count).collect()
    }

    /// Input width.
    pub fn input_count(&self) -> usize {
        self.layers.first().map_or(0, |l| l.count)
    }

    /// Output width.
    pub fn output_count(&self) -> usize {
        self.layers.last().map_or(0, |l| l.count)
    }

    /// Total neurons across layers, bias units included.
    pub fn neuron_count(&self) -> usize {
        self.layers.iter().map(LayerConfig::total_count).sum()
    }

    /// Total weights across layers.
    pub fn weight_count(&self) -> usize {
        self.layers
            .windows(2)
            .map(|pair| pair[0].total_count() * pair[1].count)
            .sum()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - fewer than two layers are configured
    /// - any layer has zero neurons
    /// - `init_range` is empty or not finite
    /// - a dropout rate is outside `[0, 1)`, or set on the output layer
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layers.len() < 2 {
            return Err(ConfigError::TooFewLayers(self.layers.len()));
        }
        if let Some(index) = self.layers.iter().position(|l| l.count == 0) {
            return Err(ConfigError::EmptyLayer(index));
        }
        let (lo, hi) = self.init_range;
        if !lo.is_finite() || !hi.is_finite() || lo >= hi {
            return Err(ConfigError::InvalidInitRange(lo, hi));
        }
        if !self.bias_activation.is_finite() {
            return Err(ConfigError::InvalidDimension(Cow::Borrowed(
                "bias_activation must be finite",
            )));
        }
        for (index, layer) in self.layers.iter().enumerate() {
            if !(0.0..1.0).contains(&layer.dropout_rate) {
                return Err(ConfigError::InvalidDropout {
                    layer: index,
                    rate: layer.dropout_rate,
                });
            }
        }
        if self.layers.last().is_some_and(|l| l.dropout_rate > 0.0) {
            return Err(ConfigError::InvalidDimension(Cow::Borrowed(
                "dropout is not allowed on the output layer",
            )));
        }
        Ok(())
    }
}

/// Fluent builder for [`NetworkConfig`].
///
/// ```rust
/// use flatnet::{ActivationKind, NetworkConfigBuilder};
///
/// let config = NetworkConfigBuilder::new()
///     .input(3)
///     .hidden(5, ActivationKind::Relu)
///     .output(2, ActivationKind::Linear)
///     .init_range(-0.5, 0.5)
///     .build()
///     .unwrap();
/// assert_eq!(config.layers.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct NetworkConfigBuilder {
    config: NetworkConfig,
}

impl Default for NetworkConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkConfigBuilder {
    /// Empty builder with default init settings.
    pub fn new() -> Self {
        Self {
            config: NetworkConfig {
                layers: Vec::new(),
                ..NetworkConfig::preset()
            },
        }
    }

    /// Appends an input layer.
    pub fn input(self, count: usize) -> Self {
        self.layer(LayerConfig::input(count))
    }

    /// Appends a hidden layer.
    pub fn hidden(self, count: usize, activation: ActivationKind) -> Self {
        self.layer(LayerConfig::hidden(count, activation))
    }

    /// Appends an output layer.
    pub fn output(self, count: usize, activation: ActivationKind) -> Self {
        self.layer(LayerConfig::output(count, activation))
    }

    /// Appends an arbitrary layer.
    pub fn layer(mut self, layer: LayerConfig) -> Self {
        self.config.layers.push(layer);
        self
    }

    /// Sets the weight initialization range.
    pub fn init_range(mut self, min: f64, max: f64) -> Self {
        self.config.init_range = (min, max);
        self
    }

    /// Sets the initialization seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.init_seed = Some(seed);
        self
    }

    /// Sets the bias neuron output value.
    pub fn bias_activation(mut self, value: f64) -> Self {
        self.config.bias_activation = value;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<NetworkConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Errors returned by [`NetworkConfig::validate`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A network needs at least an input and an output layer.
    #[error("At least 2 layers required, got {0}")]
    TooFewLayers(usize),

    /// A layer has no neurons.
    #[error("Layer {0} has zero neurons")]
    EmptyLayer(usize),

    /// Initialization range is empty or not finite.
    #[error("Invalid init range ({0}, {1})")]
    InvalidInitRange(f64, f64),

    /// Dropout rate outside `[0, 1)`.
    #[error("Layer {layer}: dropout rate must be in [0, 1), got {rate}")]
    InvalidDropout {
        /// Layer index.
        layer: usize,
        /// Rejected rate.
        rate: f64,
    },

    /// Any other invalid dimension or setting.
    #[error("Invalid dimension: {0}")]
    InvalidDimension(Cow<'static, str>),
}
