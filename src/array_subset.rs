//! Array subsets and chunk/coordinate arithmetic.
//!
//! An [`ArraySubset`] represents a rectangular subset of an array or chunk.
//! [`iterators`] includes the index and chunk iterators used to decompose
//! region requests into chunk-aligned operations.
//!
//! This module also provides the pure chunk coordinate functions:
//! [`chunk_origin`], [`chunk_subset`], [`chunk_subset_clipped`], and
//! [`chunk_grid_shape`].

pub mod iterators;

use std::{fmt::Debug, num::NonZeroU64, ops::Range};

use iterators::{Chunks, ContiguousLinearisedIndices, Indices};

use derive_more::From;
use itertools::izip;
use thiserror::Error;

/// The shape of an array.
pub type ArrayShape = Vec<u64>;

/// The indices of an array element or chunk.
pub type ArrayIndices = Vec<u64>;

/// The shape of a chunk (positive extent per dimension).
pub type ChunkShape = Vec<NonZeroU64>;

/// Convert a chunk shape to an array shape.
#[must_use]
pub fn chunk_shape_to_array_shape(chunk_shape: &[NonZeroU64]) -> ArrayShape {
    chunk_shape.iter().map(|i| i.get()).collect()
}

/// Return the element offset of the origin of the chunk at `chunk_indices`.
#[must_use]
pub fn chunk_origin(chunk_indices: &[u64], chunk_shape: &[NonZeroU64]) -> ArrayIndices {
    std::iter::zip(chunk_indices, chunk_shape)
        .map(|(i, c)| i * c.get())
        .collect()
}

/// Return the subset covered by the chunk at `chunk_indices`, ignoring the
/// array bounds.
#[must_use]
pub fn chunk_subset(chunk_indices: &[u64], chunk_shape: &[NonZeroU64]) -> ArraySubset {
    ArraySubset {
        start: chunk_origin(chunk_indices, chunk_shape),
        shape: chunk_shape_to_array_shape(chunk_shape),
    }
}

/// Return the subset covered by the chunk at `chunk_indices`, clipped against
/// `array_shape`.
///
/// Chunks at the upper boundary of the array may be partial; the shape of the
/// returned subset is the clipped extent of the chunk.
///
/// # Errors
/// Returns [`IncompatibleDimensionalityError`] if the dimensionality of
/// `chunk_indices`, `chunk_shape`, and `array_shape` do not all match.
pub fn chunk_subset_clipped(
    chunk_indices: &[u64],
    chunk_shape: &[NonZeroU64],
    array_shape: &[u64],
) -> Result<ArraySubset, IncompatibleDimensionalityError> {
    if chunk_indices.len() != chunk_shape.len() {
        return Err(IncompatibleDimensionalityError::new(
            chunk_indices.len(),
            chunk_shape.len(),
        ));
    }
    chunk_subset(chunk_indices, chunk_shape).bound(array_shape)
}

/// Return the number of chunks along each dimension of an array with
/// `array_shape` chunked by `chunk_shape`.
///
/// # Errors
/// Returns [`IncompatibleDimensionalityError`] if the dimensionality of
/// `chunk_shape` does not match `array_shape`.
pub fn chunk_grid_shape(
    array_shape: &[u64],
    chunk_shape: &[NonZeroU64],
) -> Result<ArrayShape, IncompatibleDimensionalityError> {
    if array_shape.len() == chunk_shape.len() {
        Ok(std::iter::zip(array_shape, chunk_shape)
            .map(|(a, c)| a.div_ceil(c.get()))
            .collect())
    } else {
        Err(IncompatibleDimensionalityError::new(
            chunk_shape.len(),
            array_shape.len(),
        ))
    }
}

/// Returns true if the chunk at `chunk_indices` exists in an array with
/// `array_shape` chunked by `chunk_shape`.
#[must_use]
pub fn chunk_indices_inbounds(
    chunk_indices: &[u64],
    chunk_shape: &[NonZeroU64],
    array_shape: &[u64],
) -> bool {
    chunk_indices.len() == chunk_shape.len()
        && chunk_indices.len() == array_shape.len()
        && izip!(chunk_indices, chunk_shape, array_shape).all(|(i, c, a)| i * c.get() < *a)
}

/// An array subset.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct ArraySubset {
    /// The start of the array subset.
    start: ArrayIndices,
    /// The shape of the array subset.
    shape: ArrayShape,
}

impl std::fmt::Display for ArraySubset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.to_ranges())
    }
}

impl ArraySubset {
    /// Create a new empty array subset.
    #[must_use]
    pub fn new_empty(dimensionality: usize) -> Self {
        Self {
            start: vec![0; dimensionality],
            shape: vec![0; dimensionality],
        }
    }

    /// Create a new array subset from a list of [`Range`]s.
    #[must_use]
    pub fn new_with_ranges(ranges: &[Range<u64>]) -> Self {
        Self {
            start: ranges.iter().map(|range| range.start).collect(),
            shape: ranges.iter().map(|range| range.end - range.start).collect(),
        }
    }

    /// Create a new array subset with `shape` starting at the origin.
    #[must_use]
    pub fn new_with_shape(shape: ArrayShape) -> Self {
        Self {
            start: vec![0; shape.len()],
            shape,
        }
    }

    /// Create a new array subset.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if the lengths of `start`
    /// and `shape` do not match.
    pub fn new_with_start_shape(
        start: ArrayIndices,
        shape: ArrayShape,
    ) -> Result<Self, IncompatibleDimensionalityError> {
        if start.len() == shape.len() {
            Ok(Self { start, shape })
        } else {
            Err(IncompatibleDimensionalityError::new(
                start.len(),
                shape.len(),
            ))
        }
    }

    /// Return the array subset as a vec of ranges.
    #[must_use]
    pub fn to_ranges(&self) -> Vec<Range<u64>> {
        std::iter::zip(&self.start, &self.shape)
            .map(|(&start, &size)| start..start + size)
            .collect()
    }

    /// Return the start of the array subset.
    #[must_use]
    pub fn start(&self) -> &[u64] {
        &self.start
    }

    /// Return the shape of the array subset.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// Returns true if the array subset is empty (i.e. has a zero element in
    /// its shape).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shape.iter().any(|i| i == &0)
    }

    /// Return the dimensionality of the array subset.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.start.len()
    }

    /// Return the end (inclusive) of the array subset.
    ///
    /// Returns [`None`] if the array subset is empty.
    #[must_use]
    pub fn end_inc(&self) -> Option<ArrayIndices> {
        if self.is_empty() {
            None
        } else {
            Some(
                std::iter::zip(&self.start, &self.shape)
                    .map(|(start, size)| start + size - 1)
                    .collect(),
            )
        }
    }

    /// Return the end (exclusive) of the array subset.
    #[must_use]
    pub fn end_exc(&self) -> ArrayIndices {
        std::iter::zip(&self.start, &self.shape)
            .map(|(start, size)| start + size)
            .collect()
    }

    /// Return the number of elements of the array subset.
    ///
    /// Equal to the product of the components of its shape.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Return the number of elements of the array subset as a [`usize`].
    ///
    /// # Panics
    /// Panics if [`num_elements()`](Self::num_elements()) is greater than
    /// [`usize::MAX`].
    #[must_use]
    pub fn num_elements_usize(&self) -> usize {
        usize::try_from(self.num_elements()).unwrap()
    }

    /// Bound the array subset to the domain within `end` (exclusive).
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if `end` does not match the
    /// array subset dimensionality.
    pub fn bound(&self, end: &[u64]) -> Result<Self, IncompatibleDimensionalityError> {
        if end.len() == self.dimensionality() {
            let start: ArrayIndices = std::iter::zip(self.start(), end)
                .map(|(&a, &b)| std::cmp::min(a, b))
                .collect();
            let shape = izip!(&start, self.end_exc(), end)
                .map(|(&start, end_exc, &bound)| std::cmp::min(end_exc, bound) - start)
                .collect();
            Ok(Self { start, shape })
        } else {
            Err(IncompatibleDimensionalityError::new(
                end.len(),
                self.dimensionality(),
            ))
        }
    }

    /// Return the overlapping subset between this array subset and
    /// `subset_other`.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if the dimensionality of
    /// `subset_other` does not match the dimensionality of this array subset.
    pub fn overlap(&self, subset_other: &Self) -> Result<Self, IncompatibleDimensionalityError> {
        if subset_other.dimensionality() == self.dimensionality() {
            let mut ranges = Vec::with_capacity(self.dimensionality());
            for (start, size, other_start, other_size) in izip!(
                &self.start,
                &self.shape,
                subset_other.start(),
                subset_other.shape(),
            ) {
                let overlap_start = *std::cmp::max(start, other_start);
                let overlap_end =
                    std::cmp::max(overlap_start, std::cmp::min(start + size, other_start + other_size));
                ranges.push(overlap_start..overlap_end);
            }
            Ok(Self::new_with_ranges(&ranges))
        } else {
            Err(IncompatibleDimensionalityError::new(
                subset_other.dimensionality(),
                self.dimensionality(),
            ))
        }
    }

    /// Return the subset relative to `start`.
    ///
    /// Creates an array subset starting at [`ArraySubset::start()`] - `start`.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if the length of `start`
    /// does not match the dimensionality of this array subset.
    pub fn relative_to(&self, start: &[u64]) -> Result<Self, IncompatibleDimensionalityError> {
        if start.len() == self.dimensionality() {
            Ok(Self {
                start: std::iter::zip(self.start(), start)
                    .map(|(a, b)| a - b)
                    .collect(),
                shape: self.shape.clone(),
            })
        } else {
            Err(IncompatibleDimensionalityError::new(
                start.len(),
                self.dimensionality(),
            ))
        }
    }

    /// Returns true if the array subset is within the bounds of `array_shape`.
    #[must_use]
    pub fn inbounds(&self, array_shape: &[u64]) -> bool {
        if self.dimensionality() != array_shape.len() {
            return false;
        }
        for (subset_start, subset_shape, shape) in izip!(self.start(), self.shape(), array_shape) {
            if subset_start + subset_shape > *shape {
                return false;
            }
        }
        true
    }

    /// Returns an iterator over the indices of elements within the subset.
    #[must_use]
    pub fn indices(&self) -> Indices {
        Indices::new(self.clone())
    }

    /// Returns an iterator over the linearised element runs of the subset
    /// within an array with `array_shape`.
    ///
    /// # Errors
    /// Returns [`IncompatibleArraySubsetAndShapeError`] if `array_shape` does
    /// not encapsulate this array subset.
    pub fn contiguous_linearised_indices(
        &self,
        array_shape: &[u64],
    ) -> Result<ContiguousLinearisedIndices, IncompatibleArraySubsetAndShapeError> {
        ContiguousLinearisedIndices::new(self, array_shape.to_vec())
    }

    /// Returns the [`Chunks`] with `chunk_shape` overlapping the array subset.
    ///
    /// All chunks overlapping the array subset are returned, and they all have
    /// the same shape `chunk_shape`. Thus, the subsets of the chunks may
    /// extend over the bounds of the array subset.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if `chunk_shape` does not
    /// match the array subset dimensionality.
    pub fn chunks(
        &self,
        chunk_shape: &[NonZeroU64],
    ) -> Result<Chunks, IncompatibleDimensionalityError> {
        Chunks::new(self, chunk_shape)
    }

    /// Return the bytes of this array subset extracted from the `bytes` of an
    /// array with `array_shape` and `element_size`.
    ///
    /// # Errors
    /// Returns [`IncompatibleArraySubsetAndShapeError`] if `bytes` does not
    /// match the array size, or the subset is out of bounds of `array_shape`.
    ///
    /// # Panics
    /// Panics if a byte index exceeds [`usize::MAX`].
    pub fn extract_bytes(
        &self,
        bytes: &[u8],
        array_shape: &[u64],
        element_size: usize,
    ) -> Result<Vec<u8>, IncompatibleArraySubsetAndShapeError> {
        if bytes.len() as u64 != array_shape.iter().product::<u64>() * element_size as u64 {
            return Err(IncompatibleArraySubsetAndShapeError(
                self.clone(),
                array_shape.to_vec(),
            ));
        }
        let mut subset_bytes = vec![0u8; self.num_elements_usize() * element_size];
        let mut subset_offset = 0;
        let contiguous_indices = self.contiguous_linearised_indices(array_shape)?;
        let run_length = contiguous_indices.contiguous_elements_usize() * element_size;
        for array_index in &contiguous_indices {
            let byte_index = usize::try_from(array_index).unwrap() * element_size;
            subset_bytes[subset_offset..subset_offset + run_length]
                .copy_from_slice(&bytes[byte_index..byte_index + run_length]);
            subset_offset += run_length;
        }
        Ok(subset_bytes)
    }

    /// Inject `subset_bytes` into the `bytes` of an array with `array_shape`
    /// and `element_size` at this array subset.
    ///
    /// The inverse of [`extract_bytes`](Self::extract_bytes).
    ///
    /// # Errors
    /// Returns [`IncompatibleArraySubsetAndShapeError`] if `subset_bytes` or
    /// `bytes` have the wrong size, or the subset is out of bounds of
    /// `array_shape`.
    ///
    /// # Panics
    /// Panics if a byte index exceeds [`usize::MAX`].
    pub fn inject_bytes(
        &self,
        subset_bytes: &[u8],
        bytes: &mut [u8],
        array_shape: &[u64],
        element_size: usize,
    ) -> Result<(), IncompatibleArraySubsetAndShapeError> {
        if subset_bytes.len() as u64 != self.num_elements() * element_size as u64
            || bytes.len() as u64 != array_shape.iter().product::<u64>() * element_size as u64
        {
            return Err(IncompatibleArraySubsetAndShapeError(
                self.clone(),
                array_shape.to_vec(),
            ));
        }
        let mut subset_offset = 0;
        let contiguous_indices = self.contiguous_linearised_indices(array_shape)?;
        let run_length = contiguous_indices.contiguous_elements_usize() * element_size;
        for array_index in &contiguous_indices {
            let byte_index = usize::try_from(array_index).unwrap() * element_size;
            bytes[byte_index..byte_index + run_length]
                .copy_from_slice(&subset_bytes[subset_offset..subset_offset + run_length]);
            subset_offset += run_length;
        }
        Ok(())
    }
}

/// An incompatible dimensionality error.
#[derive(Copy, Clone, Debug, Error)]
#[error("incompatible dimensionality {0}, expected {1}")]
pub struct IncompatibleDimensionalityError(usize, usize);

impl IncompatibleDimensionalityError {
    /// Create a new incompatible dimensionality error.
    #[must_use]
    pub const fn new(got: usize, expected: usize) -> Self {
        Self(got, expected)
    }
}

/// An incompatible array subset and array shape error.
#[derive(Clone, Debug, Error, From)]
#[error("incompatible array subset {0} with array shape {1:?}")]
pub struct IncompatibleArraySubsetAndShapeError(ArraySubset, ArrayShape);
