//! # flatnet - Flat-Buffer Feed-Forward Networks
//!
//! Dense feed-forward networks whose layers own no storage: every sum,
//! output, weight, gradient and delta lives in a shared flat `f64` buffer,
//! and each layer addresses it through offsets assigned once at build time.
//!
//! ## Architecture
//! - Back-to-front layout: the output layer sits at offset 0 of every buffer
//! - Destination-major weights: `index(from, to) = offset + to * from_count + from`
//! - Per-neuron active mask (dropout) tested inline in both kernels
//!
//! ## Usage
//! ```rust
//! use flatnet::{ErrorFunction, FlatNetwork, GradientCalc, NetworkConfig, Sgd};
//!
//! let config = NetworkConfig { init_seed: Some(7), ..NetworkConfig::preset() };
//! let mut network = FlatNetwork::from_config(&config).unwrap();
//! let mut calc = GradientCalc::new(&network, ErrorFunction::Output).unwrap();
//! let mut sgd = Sgd::new(0.5, 0.0);
//!
//! let inputs = [[0.0, 0.0], [1.0, 1.0]];
//! let ideals = [[0.0], [1.0]];
//! let error = network.train_batch(&mut calc, &mut sgd, &inputs, &ideals).unwrap();
//! assert!(error.is_finite());
//!
//! let mut out = [0.0];
//! network.compute(&[1.0, 1.0], &mut out).unwrap();
//! ```

pub mod activation;
pub mod buffer;
pub mod config;
pub mod error;
pub mod gradient;
pub mod layer;
pub mod loss;
pub mod matrix;
pub mod network;
pub mod optimizer;

// Re-exports
pub use activation::{ActivationFunction, ActivationKind};
pub use buffer::{BufferSlice, FlatBuffer, NetworkBuffers};
pub use config::{
    ConfigError, LayerConfig, NetworkConfig, NetworkConfigBuilder, DEFAULT_BIAS_ACTIVATION,
    DEFAULT_INIT_RANGE,
};
pub use error::{FlatNetError, FlatNetResult};
pub use gradient::GradientCalc;
pub use layer::{Layer, StructureCounts};
pub use loss::{ErrorAccumulator, ErrorFunction, ErrorMetric};
pub use matrix::WeightMatrix;
pub use network::FlatNetwork;
#[cfg(feature = "serde")]
pub use network::NetworkSnapshot;
pub use optimizer::{Adam, AdamConfig, Optimizer, Sgd};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Magic bytes prefixed to serialized networks
pub const MAGIC_SNAPSHOT: &[u8; 8] = b"FLATNET1";

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;
