//! Weight update rules.
//!
//! Gradients from [`GradientCalc`](crate::GradientCalc) already point
//! downhill (`-dE/dw`), so every optimizer here *adds* its scaled step.

use crate::error::{FlatNetError, FlatNetResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Applies accumulated gradients to a flat weight vector.
pub trait Optimizer {
    /// Updates `weights` in place.
    ///
    /// # Errors
    ///
    /// [`FlatNetError::DimensionMismatch`] if the lengths differ.
    fn step(&mut self, weights: &mut [f64], gradients: &[f64]) -> FlatNetResult<()>;

    /// Clears internal state (velocities, moments).
    fn reset(&mut self);
}

fn check_lengths(weights: &[f64], gradients: &[f64]) -> FlatNetResult<()> {
    if weights.len() != gradients.len() {
        return Err(FlatNetError::dimension_mismatch(
            "gradients vs weights",
            weights.len(),
            gradients.len(),
        ));
    }
    Ok(())
}

/// Stochastic gradient descent with optional momentum.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sgd {
    /// Learning rate.
    pub learning_rate: f64,

    /// Momentum coefficient.
    pub momentum: f64,

    /// Velocity per weight, sized lazily on the first step.
    velocities: Vec<f64>,
}

impl Sgd {
    /// Creates an SGD optimizer.
    pub fn new(learning_rate: f64, momentum: f64) -> Self {
        Self {
            learning_rate,
            momentum,
            velocities: Vec::new(),
        }
    }

    /// SGD without momentum.
    pub fn vanilla(learning_rate: f64) -> Self {
        Self::new(learning_rate, 0.0)
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, weights: &mut [f64], gradients: &[f64]) -> FlatNetResult<()> {
        check_lengths(weights, gradients)?;
        if self.velocities.len() != weights.len() {
            self.velocities = vec![0.0; weights.len()];
        }

        for j in 0..weights.len() {
            self.velocities[j] = self.momentum * self.velocities[j] + gradients[j];
            weights[j] += self.learning_rate * self.velocities[j];
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.velocities.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// Adam optimizer configuration.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdamConfig {
    /// Learning rate (alpha).
    pub lr: f64,

    /// First moment decay (beta1).
    pub beta1: f64,

    /// Second moment decay (beta2).
    pub beta2: f64,

    /// Epsilon for numerical stability.
    pub epsilon: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            lr: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

impl AdamConfig {
    /// Creates config with learning rate.
    pub fn with_lr(lr: f64) -> Self {
        Self {
            lr,
            ..Default::default()
        }
    }
}

/// Adam optimizer over the whole weight vector.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Adam {
    /// Configuration.
    pub config: AdamConfig,

    /// First moment (mean of gradients).
    m: Vec<f64>,

    /// Second moment (variance of gradients).
    v: Vec<f64>,

    /// Timestep for bias correction.
    t: usize,
}

impl Adam {
    /// Creates a new Adam optimizer.
    pub fn new(config: AdamConfig) -> Self {
        Self {
            config,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }

    /// Gets current learning rate.
    #[inline]
    pub fn learning_rate(&self) -> f64 {
        self.config.lr
    }

    /// Sets learning rate.
    #[inline]
    pub fn set_learning_rate(&mut self, lr: f64) {
        self.config.lr = lr;
    }

    /// Steps taken since the last reset.
    #[inline]
    pub fn timestep(&self) -> usize {
        self.t
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(AdamConfig::default())
    }
}

impl Optimizer for Adam {
    fn step(&mut self, weights: &mut [f64], gradients: &[f64]) -> FlatNetResult<()> {
        check_lengths(weights, gradients)?;
        if self.m.len() != weights.len() {
            self.m = vec![0.0; weights.len()];
            self.v = vec![0.0; weights.len()];
            self.t = 0;
        }

        self.t += 1;
        let AdamConfig {
            lr,
            beta1,
            beta2,
            epsilon,
        } = self.config;

        // Bias correction factors
        let bc1 = 1.0 - beta1.powi(self.t as i32);
        let bc2 = 1.0 - beta2.powi(self.t as i32);
        let alpha = lr * bc2.sqrt() / bc1;

        for i in 0..weights.len() {
            let g = gradients[i];
            self.m[i] = beta1 * self.m[i] + (1.0 - beta1) * g;
            self.v[i] = beta2 * self.v[i] + (1.0 - beta2) * g * g;
            weights[i] += alpha * self.m[i] / (self.v[i].sqrt() + epsilon);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.m.iter_mut().for_each(|x| *x = 0.0);
        self.v.iter_mut().for_each(|x| *x = 0.0);
        self.t = 0;
    }
}
