//! Layer structure and the forward/backward kernels.
//!
//! # Offset Assignment (Critical!)
//!
//! Layers own no storage. [`Layer::finalize_structure`] hands each layer a
//! `(weight_index, neuron_index)` pair into the network's shared buffers. The
//! recurrence reads the *successor*, so the network folds from the last layer
//! to the first:
//!
//! - last layer: `weight_index = 0`, `neuron_index = 0`
//! - otherwise: `weight_index = next.weight_index + self.total_count * next.count`,
//!   `neuron_index = next.neuron_index + next.total_count`
//!
//! The output layer therefore sits at offset 0 of both buffers and the input
//! layer at the end. Each weight block `[weight_index, weight_index + span)`
//! holds the layer's *incoming* weights, `span = prev.total_count * count`;
//! the input layer has none (span 0, `weight_index == weight_count`).
//!
//! # Active Mask
//!
//! Every neuron carries an active flag. A connection contributes to a sum,
//! and receives gradient, only when both endpoints are active. The dense
//! loops never skip iterations; the flag is tested inline.
//!
//! While a dropout mask is sampled, the surviving logical neurons of a layer
//! feed their successor scaled by `1 / (1 - dropout_rate)`, so the expected
//! input of the next layer matches inference. The bias unit is never scaled.

use std::fmt;
use std::sync::Arc;

use rand::Rng;

use crate::activation::ActivationFunction;
use crate::buffer::{BufferSlice, NetworkBuffers};
use crate::config::LayerConfig;
use crate::error::{FlatNetError, FlatNetResult};
use crate::gradient::GradientCalc;
use crate::matrix::WeightMatrix;

/// Running totals threaded through structure finalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StructureCounts {
    neuron_count: usize,
    weight_count: usize,
}

impl StructureCounts {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds neurons (bias units included).
    #[inline]
    pub fn add_neuron_count(&mut self, count: usize) {
        self.neuron_count += count;
    }

    /// Adds weights.
    #[inline]
    pub fn add_weight_count(&mut self, count: usize) {
        self.weight_count += count;
    }

    /// Neurons counted so far.
    #[inline]
    pub fn neuron_count(&self) -> usize {
        self.neuron_count
    }

    /// Weights counted so far.
    #[inline]
    pub fn weight_count(&self) -> usize {
        self.weight_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LayerOffsets {
    weight_index: usize,
    neuron_index: usize,
}

/// One layer of a flat feed-forward network.
#[derive(Debug, Clone)]
pub struct Layer {
    /// Position in the network sequence (0 = input)
    layer_index: usize,
    /// Logical neurons, bias excluded
    count: usize,
    has_bias: bool,
    activation: Arc<dyn ActivationFunction>,
    /// One flag per neuron, bias included
    active: Vec<bool>,
    dropout_rate: f64,
    /// Output scale of kept logical neurons, 1.0 without a dropout mask
    keep_scale: f64,
    /// Assigned once by `finalize_structure`
    offsets: Option<LayerOffsets>,
    weight_matrix: Option<WeightMatrix>,
}

impl Layer {
    /// Creates an unfinalized layer.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    pub fn new(count: usize, has_bias: bool, activation: Arc<dyn ActivationFunction>) -> Self {
        assert!(count > 0, "Layer must have at least one neuron");
        let total = count + usize::from(has_bias);
        Self {
            layer_index: 0,
            count,
            has_bias,
            activation,
            active: vec![true; total],
            dropout_rate: 0.0,
            keep_scale: 1.0,
            offsets: None,
            weight_matrix: None,
        }
    }

    /// Creates a layer from its configuration.
    pub fn from_config(config: &LayerConfig) -> Self {
        let mut layer = Self::new(config.count, config.has_bias, config.activation.build());
        layer.dropout_rate = config.dropout_rate;
        layer
    }

    /// Configuration that recreates this layer (mask and offsets excluded).
    pub fn to_config(&self) -> LayerConfig {
        LayerConfig {
            count: self.count,
            has_bias: self.has_bias,
            activation: self.activation.kind(),
            dropout_rate: self.dropout_rate,
        }
    }

    /// Assigns this layer's buffer offsets and weight matrix view.
    ///
    /// `next` must already be finalized; the network calls this from the last
    /// layer to the first.
    ///
    /// # Errors
    ///
    /// - [`FlatNetError::AlreadyFinalized`] on a second call
    /// - [`FlatNetError::StructureNotFinalized`] if `next` has no offsets yet
    pub fn finalize_structure(
        &mut self,
        layer_index: usize,
        prev: Option<&Layer>,
        next: Option<&Layer>,
        counts: &mut StructureCounts,
    ) -> FlatNetResult<()> {
        if self.offsets.is_some() {
            return Err(FlatNetError::AlreadyFinalized);
        }

        let total = self.total_count();
        let offsets = match next {
            // Last layer: base case of the back-to-front fold
            None => LayerOffsets {
                weight_index: 0,
                neuron_index: 0,
            },
            Some(next) => {
                let next_offsets = next
                    .offsets
                    .ok_or_else(|| FlatNetError::not_finalized(layer_index + 1))?;
                LayerOffsets {
                    weight_index: next_offsets.weight_index + total * next.count,
                    neuron_index: next_offsets.neuron_index + next.total_count(),
                }
            }
        };

        counts.add_neuron_count(total);
        if let Some(prev) = prev {
            counts.add_weight_count(self.count * prev.total_count());
        }

        self.layer_index = layer_index;
        self.weight_matrix =
            prev.map(|p| WeightMatrix::new(offsets.weight_index, p.total_count(), self.count));
        self.offsets = Some(offsets);

        log::debug!(
            "finalized layer {}: count={}, total={}, weight_index={}, neuron_index={}",
            layer_index,
            self.count,
            total,
            offsets.weight_index,
            offsets.neuron_index
        );
        Ok(())
    }

    /// Forward kernel: writes this layer's sums and activated outputs.
    ///
    /// For each destination `ix`, sums `weight(y, ix) * prev_output[y]` over
    /// all `y < from_count` whose endpoints are both active, stores it in
    /// both `sums` and `outputs`, then activates the whole output slice at
    /// once.
    ///
    /// # Errors
    ///
    /// - [`FlatNetError::StructureNotFinalized`] before finalization (or for
    ///   the input layer, which has no weights)
    /// - [`FlatNetError::DimensionMismatch`] if `from_count != prev.total_count()`
    ///   or `to_count != self.count()`
    /// - [`FlatNetError::IndexOutOfRange`] if a range leaves a buffer
    pub fn compute_layer(
        &self,
        prev: &Layer,
        buffers: &mut NetworkBuffers,
        from_count: usize,
        to_count: usize,
    ) -> FlatNetResult<()> {
        let matrix = self.matrix()?;
        self.check_counts(prev, &matrix, from_count, to_count)?;

        let from_slice = prev.neuron_slice()?.prefix(from_count);
        let to_slice = self.neuron_slice()?.prefix(to_count);

        log::trace!(
            "compute_layer {}: {} -> {}",
            self.layer_index,
            from_count,
            to_count
        );

        let NetworkBuffers {
            sums,
            outputs,
            weights,
        } = buffers;

        // Validate every range before the first write
        let weights = weights.slice(matrix.slice())?;
        let inputs = outputs.slice(from_slice)?;
        outputs.check(to_slice)?;
        let layer_sums = sums.slice_mut(to_slice)?;

        for ix in 0..to_count {
            let row = &weights[ix * from_count..(ix + 1) * from_count];
            let mut sum = 0.0;
            for y in 0..from_count {
                if prev.is_active(y) && self.is_active(ix) {
                    sum += row[y] * inputs[y] * prev.output_scale(y);
                }
            }
            layer_sums[ix] = sum;
        }

        // Outputs start as the sums, then activate in one batch
        outputs.slice_mut(to_slice)?.copy_from_slice(layer_sums);
        self.activation
            .forward_in_place(outputs.as_mut_slice(), to_slice.offset, to_count)
    }

    /// Backward kernel: accumulates this layer's weight gradients and writes
    /// the predecessor's deltas.
    ///
    /// Reads the deltas already stored for this layer, so layers must be
    /// processed from the output backward. For each predecessor neuron `yi`:
    ///
    /// ```text
    /// gradient[w(yi, xi)] += -(s * prev_output[yi] * delta[xi])   (both active)
    /// delta[yi] = Σ_xi weight(yi, xi) * delta[xi] * s * prev.f'(sum[yi], output[yi])
    /// ```
    ///
    /// `s` is the predecessor's dropout scale for `yi` (1.0 without a mask).
    ///
    /// Gradients accumulate until the [`GradientCalc`] is reset.
    ///
    /// # Errors
    ///
    /// Same conditions as [`compute_layer`](Self::compute_layer), checked
    /// against the accumulator's buffers as well.
    pub fn compute_gradient(
        &self,
        prev: &Layer,
        calc: &mut GradientCalc,
        buffers: &NetworkBuffers,
        from_layer_size: usize,
        to_layer_size: usize,
    ) -> FlatNetResult<()> {
        let matrix = self.matrix()?;
        self.check_counts(prev, &matrix, from_layer_size, to_layer_size)?;

        let from_slice = prev.neuron_slice()?.prefix(from_layer_size);
        let to_slice = self.neuron_slice()?.prefix(to_layer_size);

        log::trace!(
            "compute_gradient {}: {} <- {}",
            self.layer_index,
            from_layer_size,
            to_layer_size
        );

        let weights = buffers.weights.slice(matrix.slice())?;
        let prev_outputs = buffers.outputs.slice(from_slice)?;
        let prev_sums = buffers.sums.slice(from_slice)?;

        let (gradients, layer_delta) = calc.buffers_mut();
        layer_delta.check(from_slice)?;
        layer_delta.check(to_slice)?;
        let gradients = gradients.slice_mut(matrix.slice())?;
        let delta = layer_delta.as_mut_slice();

        let prev_activation = prev.activation();
        for yi in 0..from_layer_size {
            let output = prev_outputs[yi];
            let scale = prev.output_scale(yi);
            let mut sum = 0.0;

            for xi in 0..to_layer_size {
                let x = to_slice.offset + xi;
                let wi = matrix.local_index(yi, xi);

                if prev.is_active(yi) && self.is_active(xi) {
                    gradients[wi] += -(scale * output * delta[x]);
                }
                sum += weights[wi] * delta[x];
            }

            delta[from_slice.offset + yi] =
                sum * scale * prev_activation.derivative(prev_sums[yi], output);
        }

        Ok(())
    }

    fn matrix(&self) -> FlatNetResult<WeightMatrix> {
        self.weight_matrix
            .ok_or_else(|| FlatNetError::not_finalized(self.layer_index))
    }

    fn check_counts(
        &self,
        prev: &Layer,
        matrix: &WeightMatrix,
        from_count: usize,
        to_count: usize,
    ) -> FlatNetResult<()> {
        if from_count != matrix.from_count() {
            return Err(FlatNetError::dimension_mismatch(
                "from_count vs weight matrix",
                matrix.from_count(),
                from_count,
            ));
        }
        if from_count != prev.total_count() {
            return Err(FlatNetError::dimension_mismatch(
                "from_count vs previous layer",
                prev.total_count(),
                from_count,
            ));
        }
        if to_count != matrix.to_count() || to_count != self.count {
            return Err(FlatNetError::dimension_mismatch(
                "to_count",
                self.count,
                to_count,
            ));
        }
        Ok(())
    }

    /// Position in the network (valid after finalization).
    #[inline]
    pub fn layer_index(&self) -> usize {
        self.layer_index
    }

    pub(crate) fn set_layer_index(&mut self, layer_index: usize) {
        self.layer_index = layer_index;
    }

    /// Start of this layer's incoming weight block, once finalized.
    #[inline]
    pub fn weight_index(&self) -> Option<usize> {
        self.offsets.map(|o| o.weight_index)
    }

    /// Start of this layer's neuron range, once finalized.
    #[inline]
    pub fn neuron_index(&self) -> Option<usize> {
        self.offsets.map(|o| o.neuron_index)
    }

    /// Incoming weight view; `None` for the input layer or before finalization.
    #[inline]
    pub fn weight_matrix(&self) -> Option<&WeightMatrix> {
        self.weight_matrix.as_ref()
    }

    /// Whether offsets have been assigned.
    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.offsets.is_some()
    }

    /// Neuron range `[neuron_index, neuron_index + total_count)`.
    pub fn neuron_slice(&self) -> FlatNetResult<BufferSlice> {
        self.offsets
            .map(|o| BufferSlice::new(o.neuron_index, self.total_count()))
            .ok_or_else(|| FlatNetError::not_finalized(self.layer_index))
    }

    /// Weight range `[weight_index, weight_index + weight_span)`.
    pub fn weight_slice(&self) -> FlatNetResult<BufferSlice> {
        self.offsets
            .map(|o| BufferSlice::new(o.weight_index, self.weight_span()))
            .ok_or_else(|| FlatNetError::not_finalized(self.layer_index))
    }

    /// Number of incoming weights (0 for the input layer).
    #[inline]
    pub fn weight_span(&self) -> usize {
        self.weight_matrix.map_or(0, |m| m.len())
    }

    /// Logical neurons, bias excluded.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Neurons including the bias unit.
    #[inline]
    pub fn total_count(&self) -> usize {
        self.count + usize::from(self.has_bias)
    }

    /// Whether a bias unit follows the logical neurons.
    #[inline]
    pub fn has_bias(&self) -> bool {
        self.has_bias
    }

    /// Index of the bias unit within this layer.
    #[inline]
    pub fn bias_index(&self) -> Option<usize> {
        self.has_bias.then_some(self.count)
    }

    /// Shared activation.
    #[inline]
    pub fn activation(&self) -> &Arc<dyn ActivationFunction> {
        &self.activation
    }

    /// Replaces the activation.
    pub fn set_activation(&mut self, activation: Arc<dyn ActivationFunction>) {
        self.activation = activation;
    }

    /// Configured dropout rate.
    #[inline]
    pub fn dropout_rate(&self) -> f64 {
        self.dropout_rate
    }

    /// Whether neuron `index` participates. Out-of-range indices are inactive.
    #[inline]
    pub fn is_active(&self, index: usize) -> bool {
        self.active.get(index).copied().unwrap_or(false)
    }

    /// Enables or disables neuron `index` (bias unit included).
    pub fn set_active(&mut self, index: usize, active: bool) -> FlatNetResult<()> {
        let total = self.active.len();
        let flag = self
            .active
            .get_mut(index)
            .ok_or_else(|| FlatNetError::dimension_mismatch("neuron index", total, index + 1))?;
        *flag = active;
        Ok(())
    }

    /// Re-enables every neuron and drops the dropout scale.
    pub fn activate_all(&mut self) {
        self.active.iter_mut().for_each(|a| *a = true);
        self.keep_scale = 1.0;
    }

    /// Scale applied to kept logical neurons while a dropout mask is in place.
    #[inline]
    pub fn keep_scale(&self) -> f64 {
        self.keep_scale
    }

    /// Factor neuron `index` contributes with; the bias unit is never scaled.
    #[inline]
    fn output_scale(&self, index: usize) -> f64 {
        if index < self.count {
            self.keep_scale
        } else {
            1.0
        }
    }

    /// Number of active neurons, bias included.
    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|&&a| a).count()
    }

    /// Samples a fresh dropout mask over the logical neurons.
    ///
    /// Each neuron stays active with probability `1 - dropout_rate` and is
    /// scaled by `1 / (1 - dropout_rate)` until [`activate_all`](Self::activate_all);
    /// the bias unit is never dropped. Returns the number of dropped neurons.
    pub fn apply_dropout<R: Rng + ?Sized>(&mut self, rng: &mut R) -> usize {
        let rate = self.dropout_rate;
        self.keep_scale = if rate > 0.0 && rate < 1.0 {
            1.0 / (1.0 - rate)
        } else {
            1.0
        };
        let mut dropped = 0;
        for flag in self.active.iter_mut().take(self.count) {
            *flag = rng.gen::<f64>() >= rate;
            if !*flag {
                dropped += 1;
            }
        }
        dropped
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Layer,count={}", self.count)?;
        match self.offsets {
            Some(o) => write!(
                f,
                ",weightIndex={},neuronIndex={}]",
                o.weight_index, o.neuron_index
            ),
            None => write!(f, ",unfinalized]"),
        }
    }
}
