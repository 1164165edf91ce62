//! Flat buffers shared by all layers.
//!
//! This module provides three types:
//!
//! - [`BufferSlice`] - an `(offset, len)` descriptor into a shared buffer
//! - [`FlatBuffer`] - one named, growable `f64` arena with checked access
//! - [`NetworkBuffers`] - the network-owned sums, outputs and weights arenas
//!
//! # Layout
//!
//! No layer owns storage. Each layer is handed slice descriptors once, during
//! structure finalization, and every kernel addresses the shared arenas
//! through them afterwards:
//!
//! ```text
//! outputs: [ output layer | hidden n | ... | hidden 1 | input layer ]
//!            ^ offset 0                                  ^ neuron_count - input.total
//! ```
//!
//! The layout runs from the output layer backward; callers must not assume a
//! forward order.

use std::ops::Range;

use crate::error::{FlatNetError, FlatNetResult};

/// Offset/length descriptor of one layer's range in a shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferSlice {
    /// First element.
    pub offset: usize,
    /// Number of elements.
    pub len: usize,
}

impl BufferSlice {
    /// Creates a descriptor.
    #[inline]
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// One past the last element.
    #[inline]
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Index range covered.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    /// Whether `index` falls inside this slice.
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index >= self.offset && index < self.end()
    }

    /// Whether two slices share any element.
    #[inline]
    pub fn overlaps(&self, other: &BufferSlice) -> bool {
        self.len > 0 && other.len > 0 && self.offset < other.end() && other.offset < self.end()
    }

    /// Narrows to the first `len` elements.
    #[inline]
    pub fn prefix(&self, len: usize) -> BufferSlice {
        BufferSlice::new(self.offset, len.min(self.len))
    }
}

/// Named contiguous `f64` arena.
///
/// Checked accessors return [`FlatNetError::IndexOutOfRange`] carrying the
/// buffer name. `Index`/`IndexMut` panic like a slice.
///
/// ```rust
/// use flatnet::{BufferSlice, FlatBuffer};
///
/// let mut buf = FlatBuffer::zeros("sums", 4);
/// buf.set(2, 1.5).unwrap();
/// assert_eq!(buf.slice(BufferSlice::new(1, 2)).unwrap(), &[0.0, 1.5]);
/// assert!(buf.get(4).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FlatBuffer {
    name: &'static str,
    data: Vec<f64>,
}

impl FlatBuffer {
    /// Creates an empty buffer.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            data: Vec::new(),
        }
    }

    /// Creates a zero-filled buffer of `len` elements.
    pub fn zeros(name: &'static str, len: usize) -> Self {
        Self {
            name,
            data: vec![0.0; len],
        }
    }

    /// Wraps existing values.
    pub fn from_vec(name: &'static str, data: Vec<f64>) -> Self {
        Self { name, data }
    }

    /// Buffer name used in error messages.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resizes, filling new elements with zero.
    pub fn resize(&mut self, len: usize) {
        self.data.resize(len, 0.0);
    }

    /// Fills with zeros.
    #[inline]
    pub fn zero(&mut self) {
        self.fill(0.0);
    }

    /// Fills with `value`.
    #[inline]
    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    /// Current length.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Is empty?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whole buffer.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Whole buffer, mutable.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Consumes the buffer.
    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Verifies that `slice` lies inside the buffer.
    #[inline]
    pub fn check(&self, slice: BufferSlice) -> FlatNetResult<()> {
        let len = self.data.len();
        match slice.offset.checked_add(slice.len) {
            Some(end) if end <= len => Ok(()),
            // Report the first element that falls outside
            Some(_) => Err(FlatNetError::index_out_of_range(
                self.name,
                slice.offset.max(len),
                len,
            )),
            None => Err(FlatNetError::index_out_of_range(self.name, slice.offset, len)),
        }
    }

    /// Verifies that a single index lies inside the buffer.
    #[inline]
    pub fn check_index(&self, index: usize) -> FlatNetResult<()> {
        if index < self.data.len() {
            Ok(())
        } else {
            Err(FlatNetError::index_out_of_range(self.name, index, self.data.len()))
        }
    }

    /// Reads one element.
    #[inline]
    pub fn get(&self, index: usize) -> FlatNetResult<f64> {
        self.check_index(index)?;
        Ok(self.data[index])
    }

    /// Writes one element.
    #[inline]
    pub fn set(&mut self, index: usize, value: f64) -> FlatNetResult<()> {
        self.check_index(index)?;
        self.data[index] = value;
        Ok(())
    }

    /// Adds to one element.
    #[inline]
    pub fn add(&mut self, index: usize, value: f64) -> FlatNetResult<()> {
        self.check_index(index)?;
        self.data[index] += value;
        Ok(())
    }

    /// Borrows the elements described by `slice`.
    #[inline]
    pub fn slice(&self, slice: BufferSlice) -> FlatNetResult<&[f64]> {
        self.check(slice)?;
        Ok(&self.data[slice.range()])
    }

    /// Mutably borrows the elements described by `slice`.
    #[inline]
    pub fn slice_mut(&mut self, slice: BufferSlice) -> FlatNetResult<&mut [f64]> {
        self.check(slice)?;
        Ok(&mut self.data[slice.range()])
    }
}

impl std::ops::Index<usize> for FlatBuffer {
    type Output = f64;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.data[index]
    }
}

impl std::ops::IndexMut<usize> for FlatBuffer {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.data[index]
    }
}

/// Shared neuron and weight arenas owned by a network.
///
/// | Buffer | Length | Written by |
/// |--------|--------|------------|
/// | `sums` | neuron count | forward kernel (pre-activation) |
/// | `outputs` | neuron count | forward kernel (post-activation), driver (inputs, bias) |
/// | `weights` | weight count | initialization, optimizers, snapshot load |
///
/// Gradients and deltas live in [`GradientCalc`](crate::GradientCalc).
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkBuffers {
    /// Pre-activation sums per neuron.
    pub sums: FlatBuffer,
    /// Activated outputs per neuron.
    pub outputs: FlatBuffer,
    /// All weights.
    pub weights: FlatBuffer,
}

impl Default for NetworkBuffers {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkBuffers {
    /// Creates empty buffers.
    pub fn new() -> Self {
        Self {
            sums: FlatBuffer::new("sums"),
            outputs: FlatBuffer::new("outputs"),
            weights: FlatBuffer::new("weights"),
        }
    }

    /// Sizes every buffer from the finalize counters and zeroes them.
    pub fn prepare(&mut self, neuron_count: usize, weight_count: usize) {
        self.sums.resize(neuron_count);
        self.outputs.resize(neuron_count);
        self.weights.resize(weight_count);
        self.sums.zero();
        self.outputs.zero();
        self.weights.zero();
        log::debug!(
            "prepared network buffers: {} neurons, {} weights",
            neuron_count,
            weight_count
        );
    }

    /// Neuron slots.
    #[inline]
    pub fn neuron_count(&self) -> usize {
        self.outputs.len()
    }

    /// Weight slots.
    #[inline]
    pub fn weight_count(&self) -> usize {
        self.weights.len()
    }
}
