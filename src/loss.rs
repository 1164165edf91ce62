//! Output error functions and error metrics.
//!
//! This module provides:
//!
//! - [`ErrorFunction`] - seeds the output layer's deltas before backpropagation
//! - [`ErrorMetric`] / [`ErrorAccumulator`] - running SSE, MSE or RMS over samples
//!
//! # Delta Convention
//!
//! Output deltas are `dE/dnet`. With the backward kernel's
//! `gradient += -(output * delta)`, the accumulated gradient is `-dE/dw`,
//! so optimizers add it to the weights.
//!
//! # Example
//!
//! ```rust
//! use flatnet::loss::{ErrorAccumulator, ErrorMetric};
//!
//! let mut acc = ErrorAccumulator::new(ErrorMetric::Mse);
//! acc.update(&[0.5, 1.0], &[0.0, 1.0]);
//! assert!((acc.calculate() - 0.125).abs() < 1e-12);
//! ```

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::activation::ActivationFunction;
use crate::error::{FlatNetError, FlatNetResult};

/// How the output layer's deltas are computed from actual and ideal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ErrorFunction {
    /// Squared error: `(actual - ideal) * f'(sum, actual)`.
    #[default]
    Output,
    /// Cross-entropy paired with softmax or sigmoid outputs: `actual - ideal`.
    CrossEntropy,
}

impl ErrorFunction {
    /// Writes output deltas into `delta`.
    ///
    /// All slices cover the output layer's logical neurons.
    ///
    /// # Errors
    ///
    /// [`FlatNetError::DimensionMismatch`] if the slice lengths differ.
    pub fn calculate_delta(
        &self,
        activation: &dyn ActivationFunction,
        sums: &[f64],
        actual: &[f64],
        ideal: &[f64],
        delta: &mut [f64],
    ) -> FlatNetResult<()> {
        let n = actual.len();
        for (name, len) in [("ideal", ideal.len()), ("sums", sums.len()), ("delta", delta.len())] {
            if len != n {
                return Err(FlatNetError::dimension_mismatch(name, n, len));
            }
        }

        match self {
            ErrorFunction::Output => {
                for i in 0..n {
                    delta[i] = (actual[i] - ideal[i]) * activation.derivative(sums[i], actual[i]);
                }
            }
            ErrorFunction::CrossEntropy => {
                for i in 0..n {
                    delta[i] = actual[i] - ideal[i];
                }
            }
        }
        Ok(())
    }
}

/// Aggregate reported by [`ErrorAccumulator::calculate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ErrorMetric {
    /// Sum of squared errors.
    Sse,
    /// Mean squared error per output element.
    #[default]
    Mse,
    /// Root of the mean squared error.
    Rms,
}

/// Running squared-error total over a set of samples.
#[derive(Debug, Clone, Default)]
pub struct ErrorAccumulator {
    metric: ErrorMetric,
    global_error: f64,
    element_count: usize,
    sample_count: usize,
}

impl ErrorAccumulator {
    /// Creates an empty accumulator.
    pub fn new(metric: ErrorMetric) -> Self {
        Self {
            metric,
            ..Default::default()
        }
    }

    /// Adds one sample. Extra elements on either side are ignored.
    pub fn update(&mut self, actual: &[f64], ideal: &[f64]) {
        for (a, i) in actual.iter().zip(ideal) {
            let diff = a - i;
            self.global_error += diff * diff;
        }
        self.element_count += actual.len().min(ideal.len());
        self.sample_count += 1;
    }

    /// Current error under the configured metric (0 when empty).
    pub fn calculate(&self) -> f64 {
        if self.element_count == 0 {
            return 0.0;
        }
        let mse = self.global_error / self.element_count as f64;
        match self.metric {
            ErrorMetric::Sse => self.global_error,
            ErrorMetric::Mse => mse,
            ErrorMetric::Rms => mse.sqrt(),
        }
    }

    /// Clears all totals.
    pub fn reset(&mut self) {
        self.global_error = 0.0;
        self.element_count = 0;
        self.sample_count = 0;
    }

    /// Samples seen since the last reset.
    #[inline]
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Configured metric.
    #[inline]
    pub fn metric(&self) -> ErrorMetric {
        self.metric
    }

    /// Switches the reported metric without clearing totals.
    pub fn set_metric(&mut self, metric: ErrorMetric) {
        self.metric = metric;
    }
}
