//! Weight matrix view into the shared weight buffer.
//!
//! # Layout (Critical!)
//!
//! Logical shape is `[from_count x to_count]`, but storage is
//! destination-major:
//!
//! ```text
//! index(from, to) = offset + to * from_count + from
//! ```
//!
//! All incoming weights of one destination neuron are contiguous, so the
//! forward kernel reads one row per destination. The backward kernel walks
//! the same elements with stride `from_count` when it fixes `from` and steps
//! `to`.

use crate::buffer::{BufferSlice, FlatBuffer};
use crate::error::{FlatNetError, FlatNetResult};

/// Non-owning `[from_count x to_count]` view over a weight arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeightMatrix {
    offset: usize,
    from_count: usize,
    to_count: usize,
}

impl WeightMatrix {
    /// Creates a view starting at `offset`.
    pub fn new(offset: usize, from_count: usize, to_count: usize) -> Self {
        Self {
            offset,
            from_count,
            to_count,
        }
    }

    /// First weight in the arena.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Source neurons, bias included.
    #[inline]
    pub fn from_count(&self) -> usize {
        self.from_count
    }

    /// Destination neurons.
    #[inline]
    pub fn to_count(&self) -> usize {
        self.to_count
    }

    /// `(from_count, to_count)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.from_count, self.to_count)
    }

    /// Number of weights.
    #[inline]
    pub fn len(&self) -> usize {
        self.from_count * self.to_count
    }

    /// True for a zero-sized matrix.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Range of the arena this matrix covers.
    #[inline]
    pub fn slice(&self) -> BufferSlice {
        BufferSlice::new(self.offset, self.len())
    }

    /// Arena index of the weight from `from` to `to`. Unchecked.
    #[inline]
    pub fn index(&self, from: usize, to: usize) -> usize {
        self.offset + to * self.from_count + from
    }

    /// Position relative to the matrix start. Unchecked.
    #[inline]
    pub(crate) fn local_index(&self, from: usize, to: usize) -> usize {
        to * self.from_count + from
    }

    /// Arena index of the weight from `from` to `to`.
    ///
    /// # Errors
    ///
    /// [`FlatNetError::DimensionMismatch`] if either coordinate is outside the
    /// shape.
    pub fn checked_index(&self, from: usize, to: usize) -> FlatNetResult<usize> {
        if from >= self.from_count {
            return Err(FlatNetError::dimension_mismatch(
                "weight matrix row",
                self.from_count,
                from + 1,
            ));
        }
        if to >= self.to_count {
            return Err(FlatNetError::dimension_mismatch(
                "weight matrix column",
                self.to_count,
                to + 1,
            ));
        }
        Ok(self.index(from, to))
    }

    /// Reads one weight from `weights`.
    pub fn get(&self, weights: &FlatBuffer, from: usize, to: usize) -> FlatNetResult<f64> {
        weights.get(self.checked_index(from, to)?)
    }

    /// Writes one weight into `weights`.
    pub fn set(&self, weights: &mut FlatBuffer, from: usize, to: usize, value: f64) -> FlatNetResult<()> {
        weights.set(self.checked_index(from, to)?, value)
    }
}
