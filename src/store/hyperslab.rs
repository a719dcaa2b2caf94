use crate::error::HicError;

/// A rectangular, optionally strided selection over a dataset.
///
/// All three vectors have one entry per on-disk axis, slowest-moving
/// first, matching the dataset's `shape`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hyperslab {
    pub offset: Vec<u64>,
    pub count:  Vec<u64>,
    pub stride: Vec<u64>,
}

impl Hyperslab {
    /// The selection covering an entire dataset of the given shape.
    pub fn full(shape: &[u64]) -> Self {
        Hyperslab {
            offset: vec![0; shape.len()],
            count:  shape.to_vec(),
            stride: vec![1; shape.len()],
        }
    }

    /// Number of selected elements.
    pub fn n_elements(&self) -> u64 {
        self.count.iter().product()
    }

    /// Check the selection against a dataset shape.
    ///
    /// # Returns
    /// `Ok(())` if every axis stays within the dataset extent, otherwise
    /// [`HicError::SelectionOutOfBounds`] (or [`HicError::DimensionMismatch`]
    /// if the ranks disagree).
    pub fn validate(&self, shape: &[u64]) -> Result<(), HicError> {
        if self.offset.len() != shape.len()
            || self.count.len() != shape.len()
            || self.stride.len() != shape.len()
        {
            return Err(HicError::DimensionMismatch {
                expected: shape.len(),
                actual:   self.offset.len(),
            });
        }
        for (axis, &extent) in shape.iter().enumerate() {
            let (offset, count, stride) = (self.offset[axis], self.count[axis], self.stride[axis]);
            let last = (count.checked_sub(1))
                .filter(|_| stride != 0)
                .and_then(|n| n.checked_mul(stride))
                .and_then(|span| offset.checked_add(span));
            match last {
                Some(last) if last < extent => {}
                _ => {
                    return Err(HicError::SelectionOutOfBounds {
                        axis,
                        offset,
                        count,
                        stride,
                        extent,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Row-major element strides of a shape, in elements.
fn element_strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// Copy the selected elements of `src` (a full dataset payload with the
/// given shape) into the compact destination buffer.
pub fn copy_from(
    src: &[u8],
    shape: &[u64],
    elem_size: usize,
    slab: &Hyperslab,
    dest: &mut [u8],
) -> Result<(), HicError> {
    slab.validate(shape)?;
    let needed = slab.n_elements() as usize * elem_size;
    if dest.len() < needed {
        return Err(HicError::TooShortBuffer {
            actual:   dest.len(),
            expected: needed,
        });
    }
    walk(shape, elem_size, slab, |src_off, dst_off, run| {
        dest[dst_off..dst_off + run].copy_from_slice(&src[src_off..src_off + run]);
    });
    Ok(())
}

/// Copy the compact source buffer into the selected elements of `dst`
/// (a full dataset payload with the given shape).
pub fn copy_into(
    dst: &mut [u8],
    shape: &[u64],
    elem_size: usize,
    slab: &Hyperslab,
    src: &[u8],
) -> Result<(), HicError> {
    slab.validate(shape)?;
    let needed = slab.n_elements() as usize * elem_size;
    if src.len() < needed {
        return Err(HicError::TooShortBuffer {
            actual:   src.len(),
            expected: needed,
        });
    }
    walk(shape, elem_size, slab, |payload_off, compact_off, run| {
        dst[payload_off..payload_off + run].copy_from_slice(&src[compact_off..compact_off + run]);
    });
    Ok(())
}

/// Visit every selected run of contiguous bytes.
///
/// Calls `copy(payload_offset, compact_offset, run_bytes)` once per run.
/// When the innermost axis is unstrided the whole row is one run.
fn walk<F: FnMut(usize, usize, usize)>(
    shape: &[u64],
    elem_size: usize,
    slab: &Hyperslab,
    mut copy: F,
) {
    let rank = shape.len();
    if rank == 0 {
        return;
    }
    let strides = element_strides(shape);
    let last = rank - 1;
    let contiguous_row = slab.stride[last] == 1;
    let row_elems = if contiguous_row { slab.count[last] } else { 1 };

    let mut idx = vec![0u64; rank];
    let mut compact_off = 0usize;
    loop {
        let mut base = 0u64;
        for d in 0..rank {
            base += (slab.offset[d] + idx[d] * slab.stride[d]) * strides[d];
        }
        if contiguous_row {
            let run = row_elems as usize * elem_size;
            copy(base as usize * elem_size, compact_off, run);
            compact_off += run;
        } else {
            copy(base as usize * elem_size, compact_off, elem_size);
            compact_off += elem_size;
        }

        // advance the odometer, skipping the innermost axis when whole
        // rows are copied at once
        let mut d = if contiguous_row { last.wrapping_sub(1) } else { last };
        loop {
            if d == usize::MAX {
                return;
            }
            idx[d] += 1;
            if idx[d] < slab.count[d] {
                break;
            }
            idx[d] = 0;
            d = d.wrapping_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_selection_copies_everything() {
        let shape = [2u64, 3];
        let src: Vec<u8> = (0..6).collect();
        let mut dest = vec![0u8; 6];
        copy_from(&src, &shape, 1, &Hyperslab::full(&shape), &mut dest).unwrap();
        assert_eq!(dest, src);
    }

    #[test]
    fn offset_and_extent_select_a_window() {
        // 4x4 byte image, select the central 2x2
        let shape = [4u64, 4];
        let src: Vec<u8> = (0..16).collect();
        let slab = Hyperslab {
            offset: vec![1, 1],
            count:  vec![2, 2],
            stride: vec![1, 1],
        };
        let mut dest = vec![0u8; 4];
        copy_from(&src, &shape, 1, &slab, &mut dest).unwrap();
        assert_eq!(dest, vec![5, 6, 9, 10]);
    }

    #[test]
    fn strided_selection_decimates() {
        let shape = [6u64];
        let src: Vec<u8> = (0..6).collect();
        let slab = Hyperslab {
            offset: vec![0],
            count:  vec![3],
            stride: vec![2],
        };
        let mut dest = vec![0u8; 3];
        copy_from(&src, &shape, 1, &slab, &mut dest).unwrap();
        assert_eq!(dest, vec![0, 2, 4]);
    }

    #[test]
    fn out_of_bounds_selection_is_rejected() {
        let shape = [4u64];
        let slab = Hyperslab {
            offset: vec![2],
            count:  vec![3],
            stride: vec![1],
        };
        let mut dest = vec![0u8; 3];
        let err = copy_from(&[0u8; 4], &shape, 1, &slab, &mut dest).unwrap_err();
        assert!(matches!(err, HicError::SelectionOutOfBounds { axis: 0, .. }));
    }

    #[test]
    fn overflowing_selection_is_rejected() {
        let shape = [10u64];
        let slab = Hyperslab {
            offset: vec![1],
            count:  vec![2],
            stride: vec![u64::MAX],
        };
        assert!(matches!(
            slab.validate(&shape),
            Err(HicError::SelectionOutOfBounds { axis: 0, .. })
        ));
        let slab = Hyperslab {
            offset: vec![u64::MAX],
            count:  vec![2],
            stride: vec![2],
        };
        assert!(matches!(
            slab.validate(&shape),
            Err(HicError::SelectionOutOfBounds { axis: 0, .. })
        ));
    }

    #[test]
    fn short_destination_is_rejected() {
        let shape = [4u64];
        let mut dest = vec![0u8; 2];
        let err = copy_from(&[0u8; 4], &shape, 1, &Hyperslab::full(&shape), &mut dest).unwrap_err();
        assert!(matches!(
            err,
            HicError::TooShortBuffer {
                actual:   2,
                expected: 4
            }
        ));
    }

    #[test]
    fn write_back_round_trips() {
        let shape = [3u64, 3];
        let mut payload = vec![0u8; 9];
        let slab = Hyperslab {
            offset: vec![1, 0],
            count:  vec![2, 3],
            stride: vec![1, 1],
        };
        copy_into(&mut payload, &shape, 1, &slab, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(payload, vec![0, 0, 0, 1, 2, 3, 4, 5, 6]);
    }
}
