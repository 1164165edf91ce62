//! Gradient accumulator driving the backward pass.
//!
//! [`GradientCalc`] owns the two buffers the backward kernel writes:
//!
//! - `gradients` - one slot per weight, accumulated across samples
//! - `layer_delta` - one slot per neuron, overwritten layer by layer
//!
//! Both use the network's back-to-front layout, so a layer's weight or
//! neuron offset addresses them directly.
//!
//! # Example
//!
//! ```rust
//! use flatnet::{ErrorFunction, FlatNetwork, GradientCalc, NetworkConfig};
//!
//! let config = NetworkConfig { init_seed: Some(1), ..NetworkConfig::preset() };
//! let mut network = FlatNetwork::from_config(&config).unwrap();
//! let mut calc = GradientCalc::new(&network, ErrorFunction::Output).unwrap();
//!
//! calc.process(&mut network, &[1.0, 0.0], &[1.0]).unwrap();
//! assert_eq!(calc.gradients().len(), network.weight_count());
//! ```

use crate::buffer::FlatBuffer;
use crate::error::{FlatNetError, FlatNetResult};
use crate::loss::{ErrorAccumulator, ErrorFunction, ErrorMetric};
use crate::network::FlatNetwork;

/// Per-network gradient and delta storage.
#[derive(Debug, Clone)]
pub struct GradientCalc {
    gradients: FlatBuffer,
    layer_delta: FlatBuffer,
    error_function: ErrorFunction,
    error: ErrorAccumulator,
    /// Scratch for the output layer's activations
    actual: Vec<f64>,
}

impl GradientCalc {
    /// Creates an accumulator sized for `network`.
    ///
    /// # Errors
    ///
    /// [`FlatNetError::StructureNotFinalized`] if the network has no offsets yet.
    pub fn new(network: &FlatNetwork, error_function: ErrorFunction) -> FlatNetResult<Self> {
        if !network.is_finalized() {
            return Err(FlatNetError::not_finalized(0));
        }
        let mut calc = Self::with_counts(
            network.neuron_count(),
            network.weight_count(),
            error_function,
        );
        calc.actual = vec![0.0; network.output_count()];
        Ok(calc)
    }

    /// Creates an accumulator from raw buffer sizes.
    pub fn with_counts(neuron_count: usize, weight_count: usize, error_function: ErrorFunction) -> Self {
        Self {
            gradients: FlatBuffer::zeros("gradients", weight_count),
            layer_delta: FlatBuffer::zeros("deltas", neuron_count),
            error_function,
            error: ErrorAccumulator::new(ErrorMetric::Mse),
            actual: Vec::new(),
        }
    }

    /// Zeroes gradients, deltas and the running error.
    pub fn reset(&mut self) {
        self.gradients.zero();
        self.layer_delta.zero();
        self.error.reset();
    }

    /// Runs one sample forward, seeds the output deltas, and backpropagates.
    ///
    /// Gradients add onto whatever is already accumulated.
    ///
    /// # Errors
    ///
    /// - [`FlatNetError::DimensionMismatch`] if `input`/`ideal` widths are wrong
    ///   or this accumulator was sized for a different network
    /// - any kernel error from the forward or backward pass
    pub fn process(&mut self, network: &mut FlatNetwork, input: &[f64], ideal: &[f64]) -> FlatNetResult<()> {
        self.check_network(network)?;
        let output_count = network.output_count();
        if ideal.len() != output_count {
            return Err(FlatNetError::dimension_mismatch("ideal", output_count, ideal.len()));
        }

        self.actual.resize(output_count, 0.0);
        network.compute(input, &mut self.actual)?;
        self.error.update(&self.actual, ideal);

        let output_layer = network.layer(network.num_layers() - 1)?;
        let slice = output_layer.neuron_slice()?.prefix(output_count);
        let sums = network.buffers().sums.slice(slice)?;
        let delta = self.layer_delta.slice_mut(slice)?;
        self.error_function.calculate_delta(
            output_layer.activation().as_ref(),
            sums,
            &self.actual,
            ideal,
            delta,
        )?;

        network.backpropagate(self)
    }

    fn check_network(&self, network: &FlatNetwork) -> FlatNetResult<()> {
        if network.weight_count() != self.gradients.len() {
            return Err(FlatNetError::dimension_mismatch(
                "gradient buffer",
                network.weight_count(),
                self.gradients.len(),
            ));
        }
        if network.neuron_count() != self.layer_delta.len() {
            return Err(FlatNetError::dimension_mismatch(
                "delta buffer",
                network.neuron_count(),
                self.layer_delta.len(),
            ));
        }
        Ok(())
    }

    /// Accumulated gradients, indexed like the weight buffer.
    #[inline]
    pub fn gradients(&self) -> &[f64] {
        self.gradients.as_slice()
    }

    /// Per-neuron deltas from the last backward pass.
    #[inline]
    pub fn layer_delta(&self) -> &[f64] {
        self.layer_delta.as_slice()
    }

    /// Mutable deltas, for seeding the output layer by hand.
    #[inline]
    pub fn layer_delta_mut(&mut self) -> &mut [f64] {
        self.layer_delta.as_mut_slice()
    }

    /// Both buffers at once, as the backward kernel needs them.
    #[inline]
    pub fn buffers_mut(&mut self) -> (&mut FlatBuffer, &mut FlatBuffer) {
        (&mut self.gradients, &mut self.layer_delta)
    }

    /// Mean squared error over the samples processed since the last reset.
    #[inline]
    pub fn error(&self) -> f64 {
        self.error.calculate()
    }

    /// Running error totals.
    #[inline]
    pub fn error_accumulator(&self) -> &ErrorAccumulator {
        &self.error
    }

    /// Output error function in use.
    #[inline]
    pub fn error_function(&self) -> ErrorFunction {
        self.error_function
    }

    /// Multiplies every gradient by `factor` (batch averaging).
    pub fn scale_gradients(&mut self, factor: f64) {
        self.gradients.as_mut_slice().iter_mut().for_each(|g| *g *= factor);
    }
}
