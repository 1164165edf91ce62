//! Activation functions.
//!
//! Every activation is applied to a whole layer at once: the forward kernel
//! first writes all pre-activation sums, then calls
//! [`ActivationFunction::activate`] on the complete output slice. Variants
//! such as [`Softmax`] depend on that, since each output needs the full
//! pre-activation vector.
//!
//! Layers hold activations as `Arc<dyn ActivationFunction>` so one instance
//! can be shared by several layers.
//!
//! # Example
//!
//! ```rust
//! use flatnet::activation::{ActivationFunction, ActivationKind};
//!
//! let sigmoid = ActivationKind::Sigmoid.build();
//! let mut values = [0.0, 2.0];
//! sigmoid.activate(&mut values);
//! assert!((values[0] - 0.5).abs() < 1e-12);
//! ```

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{FlatNetError, FlatNetResult};

/// Nonlinearity applied to a layer's sums, paired with its derivative.
pub trait ActivationFunction: fmt::Debug + Send + Sync {
    /// Activates `values` in place. The slice is one layer's full output range.
    fn activate(&self, values: &mut [f64]);

    /// Derivative evaluated from the pre-activation sum and the activated output.
    fn derivative(&self, sum: f64, output: f64) -> f64;

    /// Serializable tag for this activation.
    fn kind(&self) -> ActivationKind;

    /// Activates `buffer[offset..offset + count]` in place.
    ///
    /// # Errors
    ///
    /// [`FlatNetError::IndexOutOfRange`] if the range leaves the buffer.
    fn forward_in_place(&self, buffer: &mut [f64], offset: usize, count: usize) -> FlatNetResult<()> {
        let end = offset
            .checked_add(count)
            .ok_or_else(|| FlatNetError::index_out_of_range("buffer", offset, buffer.len()))?;
        if end > buffer.len() {
            return Err(FlatNetError::index_out_of_range("buffer", end - 1, buffer.len()));
        }
        self.activate(&mut buffer[offset..end]);
        Ok(())
    }
}

/// Tag identifying an activation variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ActivationKind {
    /// Identity.
    #[default]
    Linear,
    /// Logistic sigmoid.
    Sigmoid,
    /// Hyperbolic tangent.
    Tanh,
    /// Rectified linear unit.
    Relu,
    /// Normalized exponential over the whole layer.
    Softmax,
}

impl ActivationKind {
    /// Creates a shared instance of this activation.
    pub fn build(self) -> Arc<dyn ActivationFunction> {
        match self {
            ActivationKind::Linear => Arc::new(Linear),
            ActivationKind::Sigmoid => Arc::new(Sigmoid),
            ActivationKind::Tanh => Arc::new(Tanh),
            ActivationKind::Relu => Arc::new(Relu),
            ActivationKind::Softmax => Arc::new(Softmax),
        }
    }

    /// Short lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            ActivationKind::Linear => "linear",
            ActivationKind::Sigmoid => "sigmoid",
            ActivationKind::Tanh => "tanh",
            ActivationKind::Relu => "relu",
            ActivationKind::Softmax => "softmax",
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity activation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Linear;

impl ActivationFunction for Linear {
    #[inline]
    fn activate(&self, _values: &mut [f64]) {}

    #[inline]
    fn derivative(&self, _sum: f64, _output: f64) -> f64 {
        1.0
    }

    fn kind(&self) -> ActivationKind {
        ActivationKind::Linear
    }
}

/// Logistic sigmoid: `1 / (1 + e^-x)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

impl ActivationFunction for Sigmoid {
    fn activate(&self, values: &mut [f64]) {
        for v in values.iter_mut() {
            *v = 1.0 / (1.0 + (-*v).exp());
        }
    }

    #[inline]
    fn derivative(&self, _sum: f64, output: f64) -> f64 {
        output * (1.0 - output)
    }

    fn kind(&self) -> ActivationKind {
        ActivationKind::Sigmoid
    }
}

/// Hyperbolic tangent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tanh;

impl ActivationFunction for Tanh {
    fn activate(&self, values: &mut [f64]) {
        for v in values.iter_mut() {
            *v = v.tanh();
        }
    }

    #[inline]
    fn derivative(&self, _sum: f64, output: f64) -> f64 {
        1.0 - output * output
    }

    fn kind(&self) -> ActivationKind {
        ActivationKind::Tanh
    }
}

/// Rectified linear unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Relu;

impl ActivationFunction for Relu {
    fn activate(&self, values: &mut [f64]) {
        for v in values.iter_mut() {
            if *v < 0.0 {
                *v = 0.0;
            }
        }
    }

    #[inline]
    fn derivative(&self, sum: f64, _output: f64) -> f64 {
        if sum > 0.0 {
            1.0
        } else {
            0.0
        }
    }

    fn kind(&self) -> ActivationKind {
        ActivationKind::Relu
    }
}

/// Softmax over the whole layer.
///
/// The derivative is reported as 1.0; pair this with
/// [`ErrorFunction::CrossEntropy`](crate::loss::ErrorFunction::CrossEntropy),
/// whose delta already is `actual - ideal`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Softmax;

impl ActivationFunction for Softmax {
    fn activate(&self, values: &mut [f64]) {
        if values.is_empty() {
            return;
        }

        // Max subtraction keeps exp() from overflowing
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut sum = 0.0;
        for v in values.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }

        let inv = 1.0 / sum;
        for v in values.iter_mut() {
            *v *= inv;
        }
    }

    #[inline]
    fn derivative(&self, _sum: f64, _output: f64) -> f64 {
        1.0
    }

    fn kind(&self) -> ActivationKind {
        ActivationKind::Softmax
    }
}
