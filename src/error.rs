//! Unified error types for flatnet.
//!
//! This module provides [`FlatNetError`], the single error type returned by
//! every fallible operation in the crate. It uses the `thiserror` crate for
//! ergonomic error handling.
//!
//! The three kernel variants ([`StructureNotFinalized`], [`DimensionMismatch`],
//! [`IndexOutOfRange`]) are programming-contract violations. They are surfaced
//! before any buffer is written and are never retried.
//!
//! [`StructureNotFinalized`]: FlatNetError::StructureNotFinalized
//! [`DimensionMismatch`]: FlatNetError::DimensionMismatch
//! [`IndexOutOfRange`]: FlatNetError::IndexOutOfRange
//!
//! # Example
//!
//! ```rust
//! use flatnet::FlatNetError;
//!
//! fn check_width(expected: usize, got: usize) -> Result<(), FlatNetError> {
//!     if expected != got {
//!         return Err(FlatNetError::dimension_mismatch("input", expected, got));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_width(2, 3).is_err());
//! ```

use std::borrow::Cow;

use thiserror::Error;

use crate::config::ConfigError;

/// Unified error type for flatnet operations.
#[derive(Error, Debug)]
pub enum FlatNetError {
    /// A kernel or offset accessor was used before offsets were assigned.
    #[error("Structure not finalized: layer {layer} has no offsets assigned")]
    StructureNotFinalized {
        /// Index of the offending layer in the network sequence.
        layer: usize,
    },

    /// Count arguments disagree with the recorded layer counts or the
    /// weight matrix shape.
    #[error("Dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        /// What was being checked.
        context: Cow<'static, str>,
        /// Recorded dimension.
        expected: usize,
        /// Dimension received.
        got: usize,
    },

    /// A computed offset falls outside its shared buffer.
    ///
    /// This signals a finalize-pass bug, not a user input error.
    #[error("Index {index} out of range for {buffer} buffer (len {len})")]
    IndexOutOfRange {
        /// Name of the buffer that was addressed.
        buffer: &'static str,
        /// First offending index.
        index: usize,
        /// Length of the buffer.
        len: usize,
    },

    /// Offsets were already assigned; the topology is frozen.
    #[error("Structure already finalized")]
    AlreadyFinalized,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Incompatible snapshot format version.
    #[error("Incompatible model version: expected {expected}, got {got}")]
    IncompatibleVersion {
        /// Expected version.
        expected: u32,
        /// Actual version found.
        got: u32,
    },

    /// Snapshot encoding or decoding failed.
    #[cfg(feature = "serde")]
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Bytes handed to the snapshot loader do not start with the snapshot magic.
    #[error("Not a flatnet snapshot: bad magic bytes")]
    BadMagic,
}

/// Result type alias for flatnet operations.
pub type FlatNetResult<T> = Result<T, FlatNetError>;

impl FlatNetError {
    /// Creates a structure-not-finalized error for the given layer.
    pub fn not_finalized(layer: usize) -> Self {
        FlatNetError::StructureNotFinalized { layer }
    }

    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch<C: Into<Cow<'static, str>>>(
        context: C,
        expected: usize,
        got: usize,
    ) -> Self {
        FlatNetError::DimensionMismatch {
            context: context.into(),
            expected,
            got,
        }
    }

    /// Creates an index out of range error.
    pub fn index_out_of_range(buffer: &'static str, index: usize, len: usize) -> Self {
        FlatNetError::IndexOutOfRange { buffer, index, len }
    }

    /// Creates an incompatible version error.
    pub fn incompatible_version(expected: u32, got: u32) -> Self {
        FlatNetError::IncompatibleVersion { expected, got }
    }

    /// Returns true for the three kernel contract violations.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            FlatNetError::StructureNotFinalized { .. }
                | FlatNetError::DimensionMismatch { .. }
                | FlatNetError::IndexOutOfRange { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_finalized() {
        let err = FlatNetError::not_finalized(3);
        let msg = err.to_string();
        assert!(msg.contains("not finalized"));
        assert!(msg.contains('3'));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = FlatNetError::dimension_mismatch("from_count", 3, 4);
        let msg = err.to_string();
        assert!(msg.contains("from_count"));
        assert!(msg.contains("expected 3"));
        assert!(msg.contains("got 4"));
    }

    #[test]
    fn test_index_out_of_range() {
        let err = FlatNetError::index_out_of_range("weights", 12, 9);
        let msg = err.to_string();
        assert!(msg.contains("weights"));
        assert!(msg.contains("12"));
        assert!(msg.contains("len 9"));
    }

    #[test]
    fn test_bad_magic() {
        let err = FlatNetError::BadMagic;
        assert!(err.to_string().contains("magic"));
        assert!(!err.is_contract_violation());
    }

    #[test]
    fn test_config_error() {
        let err = FlatNetError::from(ConfigError::TooFewLayers(1));
        assert!(err.to_string().contains("Configuration error"));
        assert!(!err.is_contract_violation());
    }
}
