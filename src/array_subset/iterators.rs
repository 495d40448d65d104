//! Iterators over [`ArraySubset`] elements and chunks.
//!
//! All iterators iterate over the last dimension fastest (i.e. C-contiguous
//! order).

use std::{iter::FusedIterator, num::NonZeroU64};

use itertools::izip;

use super::{
    chunk_shape_to_array_shape, chunk_subset, ArrayIndices, ArrayShape, ArraySubset,
    IncompatibleArraySubsetAndShapeError, IncompatibleDimensionalityError,
};

/// Iterates over the multidimensional indices of the elements within an array
/// subset.
///
/// A subset with dimensionality zero yields a single empty index.
pub struct Indices {
    subset: ArraySubset,
}

impl Indices {
    /// Create a new indices struct.
    #[must_use]
    pub fn new(subset: ArraySubset) -> Self {
        Self { subset }
    }

    /// Return the number of indices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subset.num_elements_usize()
    }

    /// Returns true if the number of indices is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> IntoIterator for &'a Indices {
    type Item = ArrayIndices;
    type IntoIter = IndicesIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        IndicesIterator {
            subset: &self.subset,
            next: if self.subset.is_empty() {
                None
            } else {
                Some(self.subset.start().to_vec())
            },
        }
    }
}

/// Serial indices iterator.
///
/// See [`Indices`].
pub struct IndicesIterator<'a> {
    subset: &'a ArraySubset,
    next: Option<ArrayIndices>,
}

impl Iterator for IndicesIterator<'_> {
    type Item = ArrayIndices;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        let mut successor = current.clone();
        let mut has_successor = false;
        for (index, start, size) in izip!(
            successor.iter_mut().rev(),
            self.subset.start().iter().rev(),
            self.subset.shape().iter().rev(),
        ) {
            *index += 1;
            if *index < start + size {
                has_successor = true;
                break;
            }
            *index = *start;
        }
        if has_successor {
            self.next = Some(successor);
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.next {
            Some(_) => (1, Some(self.subset.num_elements_usize())),
            None => (0, Some(0)),
        }
    }
}

impl FusedIterator for IndicesIterator<'_> {}

/// Iterates over the linearised indices of contiguous element runs within an
/// array subset of an array with a given shape.
///
/// Each item is the linearised element index of the start of a run of
/// [`contiguous_elements`](ContiguousLinearisedIndices::contiguous_elements)
/// elements.
pub struct ContiguousLinearisedIndices {
    array_shape: ArrayShape,
    outer: Indices,
    /// Fixed index components for the dimensions merged into a run.
    tail: ArrayIndices,
    contiguous_elements: u64,
    empty: bool,
}

impl ContiguousLinearisedIndices {
    /// Create a new contiguous linearised indices struct.
    ///
    /// # Errors
    /// Returns [`IncompatibleArraySubsetAndShapeError`] if `array_shape` does
    /// not encapsulate `subset`.
    pub fn new(
        subset: &ArraySubset,
        array_shape: ArrayShape,
    ) -> Result<Self, IncompatibleArraySubsetAndShapeError> {
        if !subset.inbounds(&array_shape) {
            return Err(IncompatibleArraySubsetAndShapeError(
                subset.clone(),
                array_shape,
            ));
        }
        let rank = subset.dimensionality();
        let mut contiguous_elements: u64 = 1;
        let mut inner = rank;
        for d in (0..rank).rev() {
            contiguous_elements *= subset.shape()[d];
            inner = d;
            if subset.start()[d] != 0 || subset.shape()[d] != array_shape[d] {
                break;
            }
        }
        let outer = ArraySubset::new_with_start_shape(
            subset.start()[..inner].to_vec(),
            subset.shape()[..inner].to_vec(),
        )
        .expect("start and shape slices have equal length");
        let mut tail = vec![0; rank - inner];
        if inner < rank {
            tail[0] = subset.start()[inner];
        }
        Ok(Self {
            array_shape,
            outer: Indices::new(outer),
            tail,
            contiguous_elements,
            empty: subset.is_empty(),
        })
    }

    /// Return the number of contiguous elements in each run.
    #[must_use]
    pub const fn contiguous_elements(&self) -> u64 {
        self.contiguous_elements
    }

    /// Return the number of contiguous elements in each run as a [`usize`].
    ///
    /// # Panics
    /// Panics if the number of contiguous elements exceeds [`usize::MAX`].
    #[must_use]
    pub fn contiguous_elements_usize(&self) -> usize {
        usize::try_from(self.contiguous_elements).unwrap()
    }
}

impl<'a> IntoIterator for &'a ContiguousLinearisedIndices {
    type Item = u64;
    type IntoIter = ContiguousLinearisedIndicesIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        ContiguousLinearisedIndicesIterator {
            parent: self,
            outer: if self.empty {
                None
            } else {
                Some(self.outer.into_iter())
            },
        }
    }
}

/// Serial contiguous linearised indices iterator.
///
/// See [`ContiguousLinearisedIndices`].
pub struct ContiguousLinearisedIndicesIterator<'a> {
    parent: &'a ContiguousLinearisedIndices,
    outer: Option<IndicesIterator<'a>>,
}

impl Iterator for ContiguousLinearisedIndicesIterator<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        let outer_index = self.outer.as_mut()?.next()?;
        let mut index = 0u64;
        let mut stride = 1u64;
        let rank = self.parent.array_shape.len();
        let inner = rank - self.parent.tail.len();
        for d in (0..rank).rev() {
            let component = if d < inner {
                outer_index[d]
            } else {
                self.parent.tail[d - inner]
            };
            index += component * stride;
            stride *= self.parent.array_shape[d];
        }
        Some(index)
    }
}

impl FusedIterator for ContiguousLinearisedIndicesIterator<'_> {}

/// Iterates over the chunks overlapping an array subset.
///
/// All chunks have the same shape, and may extend over the bounds of the array
/// subset since the start of the first chunk is aligned to the chunk size.
/// Chunk indices are yielded in lexicographic order.
///
/// The iterator item is an ([`ArrayIndices`], [`ArraySubset`]) tuple
/// corresponding to the chunk indices and the chunk's (unclipped) subset.
pub struct Chunks {
    indices: Indices,
    chunk_shape: Vec<NonZeroU64>,
}

impl Chunks {
    /// Create a new chunks iterator.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if `chunk_shape` does not
    /// match the dimensionality of `subset`.
    pub fn new(
        subset: &ArraySubset,
        chunk_shape: &[NonZeroU64],
    ) -> Result<Self, IncompatibleDimensionalityError> {
        if subset.dimensionality() != chunk_shape.len() {
            return Err(IncompatibleDimensionalityError::new(
                chunk_shape.len(),
                subset.dimensionality(),
            ));
        }
        let chunk_shape_u64 = chunk_shape_to_array_shape(chunk_shape);
        let indices = match subset.end_inc() {
            Some(end) => {
                let chunk_start: ArrayIndices = std::iter::zip(subset.start(), &chunk_shape_u64)
                    .map(|(s, c)| s / c)
                    .collect();
                let shape: ArrayShape = izip!(&end, &chunk_shape_u64, &chunk_start)
                    .map(|(&e, &c, &s)| (e / c).saturating_sub(s) + 1)
                    .collect();
                ArraySubset::new_with_start_shape(chunk_start, shape)
                    .expect("chunk start and shape have subset dimensionality")
                    .indices()
            }
            None => ArraySubset::new_empty(subset.dimensionality()).indices(),
        };
        Ok(Self {
            indices,
            chunk_shape: chunk_shape.to_vec(),
        })
    }

    /// Return the number of chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns true if the number of chunks is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> IntoIterator for &'a Chunks {
    type Item = (ArrayIndices, ArraySubset);
    type IntoIter = ChunksIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        ChunksIterator {
            inner: self.indices.into_iter(),
            chunk_shape: &self.chunk_shape,
        }
    }
}

/// Serial chunks iterator.
///
/// See [`Chunks`].
pub struct ChunksIterator<'a> {
    inner: IndicesIterator<'a>,
    chunk_shape: &'a [NonZeroU64],
}

impl Iterator for ChunksIterator<'_> {
    type Item = (ArrayIndices, ArraySubset);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|chunk_indices| {
            let subset = chunk_subset(&chunk_indices, self.chunk_shape);
            (chunk_indices, subset)
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl FusedIterator for ChunksIterator<'_> {}
