//! Flat feed-forward network: layer sequence plus shared buffers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::buffer::NetworkBuffers;
use crate::config::{ConfigError, NetworkConfig, DEFAULT_BIAS_ACTIVATION, DEFAULT_INIT_RANGE};
use crate::error::{FlatNetError, FlatNetResult};
use crate::gradient::GradientCalc;
use crate::layer::{Layer, StructureCounts};
use crate::matrix::WeightMatrix;
use crate::optimizer::Optimizer;

#[cfg(feature = "serde")]
use crate::config::LayerConfig;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Ordered layers sharing one set of flat buffers.
///
/// Built in two phases: append layers with [`add_layer`](Self::add_layer),
/// then call [`finalize_structure`](Self::finalize_structure) once to assign
/// offsets and size the buffers. The topology is frozen afterwards.
#[derive(Debug, Clone)]
pub struct FlatNetwork {
    /// Layers: input -> hidden[0] -> ... -> output.
    layers: Vec<Layer>,

    /// Sums, outputs and weights for every layer.
    buffers: NetworkBuffers,

    /// Totals from the last finalize pass.
    counts: StructureCounts,

    finalized: bool,

    /// Uniform range used by `reset_weights`.
    init_range: (f64, f64),

    /// Output pinned on every bias neuron.
    bias_activation: f64,
}

impl Default for FlatNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatNetwork {
    /// Creates an empty, unfinalized network.
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_INIT_RANGE, DEFAULT_BIAS_ACTIVATION)
    }

    fn with_settings(init_range: (f64, f64), bias_activation: f64) -> Self {
        Self {
            layers: Vec::new(),
            buffers: NetworkBuffers::new(),
            counts: StructureCounts::new(),
            finalized: false,
            init_range,
            bias_activation,
        }
    }

    /// Builds, finalizes and initializes a network from configuration.
    ///
    /// Weights are drawn uniformly from `config.init_range`, seeded with
    /// `config.init_seed` when present.
    pub fn from_config(config: &NetworkConfig) -> FlatNetResult<Self> {
        let mut network = Self::from_layers(config)?;
        network.reset_weights(config.init_seed)?;
        Ok(network)
    }

    /// Builds and finalizes without touching the (zeroed) weights.
    fn from_layers(config: &NetworkConfig) -> FlatNetResult<Self> {
        config.validate()?;
        let mut network = Self::with_settings(config.init_range, config.bias_activation);
        for layer in &config.layers {
            network.add_layer(Layer::from_config(layer))?;
        }
        network.finalize_structure()?;
        Ok(network)
    }

    /// Configuration that recreates this topology.
    pub fn to_config(&self) -> NetworkConfig {
        NetworkConfig {
            layers: self.layers.iter().map(Layer::to_config).collect(),
            init_range: self.init_range,
            init_seed: None,
            bias_activation: self.bias_activation,
        }
    }

    /// Appends a layer.
    ///
    /// # Errors
    ///
    /// [`FlatNetError::AlreadyFinalized`] once offsets have been assigned.
    pub fn add_layer(&mut self, mut layer: Layer) -> FlatNetResult<()> {
        if self.finalized {
            return Err(FlatNetError::AlreadyFinalized);
        }
        layer.set_layer_index(self.layers.len());
        self.layers.push(layer);
        Ok(())
    }

    /// Assigns every layer's offsets and sizes the shared buffers.
    ///
    /// Layers are visited from last to first, since each layer's offsets are
    /// derived from its already-finalized successor. Bias neuron outputs are
    /// set to the configured bias activation.
    pub fn finalize_structure(&mut self) -> FlatNetResult<()> {
        if self.finalized {
            return Err(FlatNetError::AlreadyFinalized);
        }
        if self.layers.len() < 2 {
            return Err(ConfigError::TooFewLayers(self.layers.len()).into());
        }

        let mut counts = StructureCounts::new();
        for i in (0..self.layers.len()).rev() {
            let (head, tail) = self.layers.split_at_mut(i);
            if let Some((current, rest)) = tail.split_first_mut() {
                current.finalize_structure(i, head.last(), rest.first(), &mut counts)?;
            }
        }

        self.buffers
            .prepare(counts.neuron_count(), counts.weight_count());
        self.counts = counts;
        self.finalized = true;
        self.pin_bias_outputs()?;

        log::info!(
            "finalized network: {} layers, {} neurons, {} weights",
            self.layers.len(),
            counts.neuron_count(),
            counts.weight_count()
        );
        Ok(())
    }

    fn pin_bias_outputs(&mut self) -> FlatNetResult<()> {
        for layer in &self.layers {
            if let Some(bias) = layer.bias_index() {
                let slice = layer.neuron_slice()?;
                self.buffers
                    .outputs
                    .set(slice.offset + bias, self.bias_activation)?;
            }
        }
        Ok(())
    }

    fn ensure_finalized(&self) -> FlatNetResult<()> {
        if self.finalized {
            Ok(())
        } else {
            Err(FlatNetError::not_finalized(0))
        }
    }

    /// Whether offsets have been assigned.
    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// All layers, input first.
    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Layer at `index`.
    pub fn layer(&self, index: usize) -> FlatNetResult<&Layer> {
        self.layers.get(index).ok_or_else(|| {
            FlatNetError::index_out_of_range("layers", index, self.layers.len())
        })
    }

    /// Predecessor of layer `index` (`None` for the input layer).
    pub fn previous_layer(&self, index: usize) -> Option<&Layer> {
        index.checked_sub(1).and_then(|i| self.layers.get(i))
    }

    /// Successor of layer `index` (`None` for the output layer).
    pub fn next_layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index + 1)
    }

    /// Returns the number of layers.
    #[inline]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Input width.
    pub fn input_count(&self) -> usize {
        self.layers.first().map_or(0, Layer::count)
    }

    /// Output width.
    pub fn output_count(&self) -> usize {
        self.layers.last().map_or(0, Layer::count)
    }

    /// Neurons across all layers, bias units included.
    #[inline]
    pub fn neuron_count(&self) -> usize {
        self.counts.neuron_count()
    }

    /// Weights across all layers.
    #[inline]
    pub fn weight_count(&self) -> usize {
        self.counts.weight_count()
    }

    /// Shared buffers.
    #[inline]
    pub fn buffers(&self) -> &NetworkBuffers {
        &self.buffers
    }

    /// Output value of bias neurons.
    #[inline]
    pub fn bias_activation(&self) -> f64 {
        self.bias_activation
    }

    /// Changes the bias neuron output and re-pins it.
    pub fn set_bias_activation(&mut self, value: f64) -> FlatNetResult<()> {
        self.bias_activation = value;
        if self.finalized {
            self.pin_bias_outputs()?;
        }
        Ok(())
    }

    /// Flat weight vector in back-to-front layout.
    #[inline]
    pub fn weights(&self) -> &[f64] {
        self.buffers.weights.as_slice()
    }

    /// Mutable flat weight vector.
    #[inline]
    pub fn weights_mut(&mut self) -> &mut [f64] {
        self.buffers.weights.as_mut_slice()
    }

    fn matrix(&self, layer: usize) -> FlatNetResult<WeightMatrix> {
        self.ensure_finalized()?;
        self.layer(layer)?
            .weight_matrix()
            .copied()
            .ok_or_else(|| FlatNetError::dimension_mismatch("weighted layer index", 1, layer))
    }

    /// Weight from neuron `from` of layer `layer - 1` to neuron `to` of `layer`.
    pub fn weight(&self, layer: usize, from: usize, to: usize) -> FlatNetResult<f64> {
        self.matrix(layer)?.get(&self.buffers.weights, from, to)
    }

    /// Sets one incoming weight of `layer`.
    pub fn set_weight(&mut self, layer: usize, from: usize, to: usize, value: f64) -> FlatNetResult<()> {
        self.matrix(layer)?.set(&mut self.buffers.weights, from, to, value)
    }

    /// Redraws every weight uniformly from the init range.
    ///
    /// `None` seeds from entropy.
    pub fn reset_weights(&mut self, seed: Option<u64>) -> FlatNetResult<()> {
        self.ensure_finalized()?;
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (lo, hi) = self.init_range;
        for w in self.buffers.weights.as_mut_slice() {
            *w = rng.gen_range(lo..hi);
        }
        log::debug!("reset {} weights (seed={:?})", self.weight_count(), seed);
        Ok(())
    }

    /// Activated outputs of layer `index`, bias unit included.
    pub fn layer_output(&self, index: usize) -> FlatNetResult<&[f64]> {
        let slice = self.layer(index)?.neuron_slice()?;
        self.buffers.outputs.slice(slice)
    }

    /// Pre-activation sums of layer `index`, bias unit included.
    pub fn layer_sums(&self, index: usize) -> FlatNetResult<&[f64]> {
        let slice = self.layer(index)?.neuron_slice()?;
        self.buffers.sums.slice(slice)
    }

    /// Enables or disables one neuron.
    pub fn set_neuron_active(&mut self, layer: usize, neuron: usize, active: bool) -> FlatNetResult<()> {
        let count = self.layers.len();
        self.layers
            .get_mut(layer)
            .ok_or_else(|| FlatNetError::index_out_of_range("layers", layer, count))?
            .set_active(neuron, active)
    }

    /// Samples dropout masks on every layer with a nonzero dropout rate.
    ///
    /// Returns the total number of dropped neurons.
    pub fn sample_dropout<R: Rng + ?Sized>(&mut self, rng: &mut R) -> usize {
        self.layers
            .iter_mut()
            .filter(|l| l.dropout_rate() > 0.0)
            .map(|l| l.apply_dropout(rng))
            .sum()
    }

    /// Re-enables every neuron.
    pub fn clear_dropout(&mut self) {
        self.layers.iter_mut().for_each(Layer::activate_all);
    }

    /// Forward pass for a single sample.
    ///
    /// # Arguments
    /// * `input` - Input features `[input_count]`
    /// * `output` - Output buffer `[output_count]`
    pub fn compute(&mut self, input: &[f64], output: &mut [f64]) -> FlatNetResult<()> {
        self.ensure_finalized()?;
        if input.len() != self.input_count() {
            return Err(FlatNetError::dimension_mismatch("input", self.input_count(), input.len()));
        }
        if output.len() != self.output_count() {
            return Err(FlatNetError::dimension_mismatch("output", self.output_count(), output.len()));
        }

        let input_slice = self.layer(0)?.neuron_slice()?.prefix(input.len());
        self.buffers
            .outputs
            .slice_mut(input_slice)?
            .copy_from_slice(input);

        for i in 1..self.layers.len() {
            let prev = &self.layers[i - 1];
            let layer = &self.layers[i];
            layer.compute_layer(prev, &mut self.buffers, prev.total_count(), layer.count())?;
        }

        let last = self.layers.len() - 1;
        let output_slice = self.layers[last].neuron_slice()?.prefix(output.len());
        output.copy_from_slice(self.buffers.outputs.slice(output_slice)?);
        Ok(())
    }

    /// Runs the backward kernel from the output layer down to layer 1.
    ///
    /// The output layer's deltas in `calc` must already be seeded.
    pub fn backpropagate(&self, calc: &mut GradientCalc) -> FlatNetResult<()> {
        self.ensure_finalized()?;
        for i in (1..self.layers.len()).rev() {
            let prev = &self.layers[i - 1];
            let layer = &self.layers[i];
            layer.compute_gradient(prev, calc, &self.buffers, prev.total_count(), layer.count())?;
        }
        Ok(())
    }

    /// One mini-batch: accumulate, average, update.
    ///
    /// Returns the batch error measured before the update.
    pub fn train_batch<O, I, T>(
        &mut self,
        calc: &mut GradientCalc,
        optimizer: &mut O,
        inputs: &[I],
        ideals: &[T],
    ) -> FlatNetResult<f64>
    where
        O: Optimizer + ?Sized,
        I: AsRef<[f64]>,
        T: AsRef<[f64]>,
    {
        if inputs.len() != ideals.len() {
            return Err(FlatNetError::dimension_mismatch("batch ideals", inputs.len(), ideals.len()));
        }
        if inputs.is_empty() {
            return Err(FlatNetError::dimension_mismatch("batch size", 1, 0));
        }

        calc.reset();
        for (input, ideal) in inputs.iter().zip(ideals) {
            calc.process(self, input.as_ref(), ideal.as_ref())?;
        }
        calc.scale_gradients(1.0 / inputs.len() as f64);
        optimizer.step(self.buffers.weights.as_mut_slice(), calc.gradients())?;

        let error = calc.error();
        if !error.is_finite() {
            log::warn!("non-finite batch error ({}) over {} samples", error, inputs.len());
        }
        Ok(error)
    }

    /// Like [`train_batch`](Self::train_batch) with a fresh dropout mask
    /// sampled for the batch and cleared afterwards.
    pub fn train_batch_with_dropout<O, I, T, R>(
        &mut self,
        calc: &mut GradientCalc,
        optimizer: &mut O,
        inputs: &[I],
        ideals: &[T],
        rng: &mut R,
    ) -> FlatNetResult<f64>
    where
        O: Optimizer + ?Sized,
        I: AsRef<[f64]>,
        T: AsRef<[f64]>,
        R: Rng + ?Sized,
    {
        let dropped = self.sample_dropout(rng);
        log::trace!("dropout: {} neurons disabled", dropped);
        let result = self.train_batch(calc, optimizer, inputs, ideals);
        self.clear_dropout();
        result
    }
}

/// Serialized form of a finalized network.
#[cfg(feature = "serde")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    /// Format version, see [`SNAPSHOT_VERSION`](crate::SNAPSHOT_VERSION).
    pub version: u32,
    /// Layer configurations, input first.
    pub layers: Vec<LayerConfig>,
    /// Weight initialization range.
    pub init_range: (f64, f64),
    /// Bias neuron output.
    pub bias_activation: f64,
    /// Flat weights in back-to-front layout.
    pub weights: Vec<f64>,
}

#[cfg(feature = "serde")]
impl FlatNetwork {
    /// Captures topology and weights.
    pub fn to_snapshot(&self) -> FlatNetResult<NetworkSnapshot> {
        self.ensure_finalized()?;
        let config = self.to_config();
        Ok(NetworkSnapshot {
            version: crate::SNAPSHOT_VERSION,
            layers: config.layers,
            init_range: config.init_range,
            bias_activation: config.bias_activation,
            weights: self.weights().to_vec(),
        })
    }

    /// Rebuilds a finalized network from a snapshot.
    ///
    /// # Errors
    ///
    /// - [`FlatNetError::IncompatibleVersion`] on a format version mismatch
    /// - [`FlatNetError::DimensionMismatch`] if the weight count disagrees
    ///   with the layer configuration
    pub fn from_snapshot(snapshot: NetworkSnapshot) -> FlatNetResult<Self> {
        if snapshot.version != crate::SNAPSHOT_VERSION {
            return Err(FlatNetError::incompatible_version(
                crate::SNAPSHOT_VERSION,
                snapshot.version,
            ));
        }

        let config = NetworkConfig {
            layers: snapshot.layers,
            init_range: snapshot.init_range,
            init_seed: None,
            bias_activation: snapshot.bias_activation,
        };
        let mut network = Self::from_layers(&config)?;
        if snapshot.weights.len() != network.weight_count() {
            return Err(FlatNetError::dimension_mismatch(
                "snapshot weights",
                network.weight_count(),
                snapshot.weights.len(),
            ));
        }
        network.weights_mut().copy_from_slice(&snapshot.weights);
        Ok(network)
    }

    /// Saves network to bytes using bincode.
    pub fn to_bytes(&self) -> FlatNetResult<Vec<u8>> {
        let mut bytes = crate::MAGIC_SNAPSHOT.to_vec();
        bincode::serialize_into(&mut bytes, &self.to_snapshot()?)?;
        Ok(bytes)
    }

    /// Loads network from bytes.
    pub fn from_bytes(bytes: &[u8]) -> FlatNetResult<Self> {
        let magic = crate::MAGIC_SNAPSHOT;
        if bytes.len() < magic.len() || &bytes[..magic.len()] != magic {
            return Err(FlatNetError::BadMagic);
        }
        let snapshot: NetworkSnapshot = bincode::deserialize(&bytes[magic.len()..])?;
        Self::from_snapshot(snapshot)
    }
}
