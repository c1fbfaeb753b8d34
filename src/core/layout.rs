use serde::{Serialize, Deserialize};

/// One dimension of a layout: logical extent plus physical stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutDim {
    pub extent: usize,
    pub stride: usize,
}

/// Shape + stride description mapping a logical multi-index to a physical
/// linear offset.
///
/// Logical linear indices are decomposed into coordinates with dimension 0
/// as the fastest-varying digit (column-major digit order), then dotted
/// with the strides. Resolution is pure stride arithmetic; out-of-bounds
/// indices are the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    dims: Vec<LayoutDim>,
}

impl Layout {
    /// Layout with explicit strides. Panics if `shape` and `strides`
    /// disagree on rank.
    pub fn from_strides(shape: &[usize], strides: &[usize]) -> Self {
        assert_eq!(
            shape.len(),
            strides.len(),
            "layout shape/stride rank mismatch: {} vs {}",
            shape.len(),
            strides.len()
        );
        let dims = shape
            .iter()
            .zip(strides.iter())
            .map(|(&extent, &stride)| LayoutDim { extent, stride })
            .collect();
        Self { dims }
    }

    /// Canonical packing with dimension 0 contiguous.
    pub fn col_major(shape: &[usize]) -> Self {
        Self::from_strides(shape, &coord_strides(shape))
    }

    /// Canonical packing with the last dimension contiguous.
    pub fn row_major(shape: &[usize]) -> Self {
        let mut strides = vec![0usize; shape.len()];
        let mut acc = 1usize;
        for d in (0..shape.len()).rev() {
            strides[d] = acc;
            acc *= shape[d];
        }
        Self::from_strides(shape, &strides)
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn extent(&self, dim: usize) -> usize {
        self.dims[dim].extent
    }

    pub fn stride(&self, dim: usize) -> usize {
        self.dims[dim].stride
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.extent).collect()
    }

    /// Total logical element count.
    pub fn size(&self) -> usize {
        self.dims.iter().map(|d| d.extent).product()
    }

    /// Maps an in-bounds logical linear index to a physical offset.
    pub fn offset(&self, linear_idx: usize) -> usize {
        let mut rem = linear_idx;
        let mut off = 0usize;
        for d in &self.dims {
            off += (rem % d.extent) * d.stride;
            rem /= d.extent;
        }
        off
    }

    /// Copy of this layout with the stride along `dim` replaced.
    pub fn with_stride(&self, dim: usize, stride: usize) -> Self {
        let mut dims = self.dims.clone();
        dims[dim].stride = stride;
        Self { dims }
    }

    pub fn same_shape(&self, other: &Layout) -> bool {
        self.rank() == other.rank()
            && self
                .dims
                .iter()
                .zip(other.dims.iter())
                .all(|(a, b)| a.extent == b.extent)
    }
}

/// Coordinate strides of `shape` in canonical column-major digit order:
/// the step, in logical linear indices, taken by incrementing one
/// coordinate of the corresponding dimension.
pub fn coord_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0usize; shape.len()];
    let mut acc = 1usize;
    for (d, &extent) in shape.iter().enumerate() {
        strides[d] = acc;
        acc *= extent;
    }
    strides
}

/// Composition used by the reduction kernels: maps a destination logical
/// index to the logical index of the *first* element of its reduction
/// group inside the source's coordinate space.
///
/// The map is the destination shape laid over the source's coordinate
/// strides, with the reduction dimension's stride scaled by the reduction
/// factor. Panics when the source extent along `red_dim` is not an exact
/// multiple of the destination extent.
pub fn reduction_index_map(dst_shape: &[usize], src_shape: &[usize], red_dim: usize) -> Layout {
    assert_eq!(
        dst_shape.len(),
        src_shape.len(),
        "reduction rank mismatch: dst {} vs src {}",
        dst_shape.len(),
        src_shape.len()
    );
    assert!(red_dim < src_shape.len(), "reduction dim {} out of range", red_dim);
    assert!(
        dst_shape[red_dim] > 0 && src_shape[red_dim] % dst_shape[red_dim] == 0,
        "source extent {} along dim {} is not a multiple of destination extent {}",
        src_shape[red_dim],
        red_dim,
        dst_shape[red_dim]
    );
    let factor = src_shape[red_dim] / dst_shape[red_dim];
    let mut strides = coord_strides(src_shape);
    strides[red_dim] *= factor;
    Layout::from_strides(dst_shape, &strides)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_col_major_offsets() {
        let l = Layout::col_major(&[4, 3]);
        // Linear index walks dim 0 fastest; col-major is contiguous in it.
        assert_eq!(l.offset(0), 0);
        assert_eq!(l.offset(1), 1);
        assert_eq!(l.offset(4), 4);
        assert_eq!(l.offset(11), 11);
        assert_eq!(l.size(), 12);
    }

    #[test]
    fn test_row_major_offsets() {
        let l = Layout::row_major(&[4, 3]);
        // Coordinate (1, 0) has linear index 1 and physical offset 3.
        assert_eq!(l.offset(1), 3);
        // Coordinate (0, 1) has linear index 4 and physical offset 1.
        assert_eq!(l.offset(4), 1);
        assert_eq!(l.offset(11), 11);
    }

    #[test]
    fn test_stride_replacement() {
        let l = Layout::col_major(&[4, 3]).with_stride(0, 8);
        assert_eq!(l.offset(2), 16);
        assert_eq!(l.stride(1), 4);
    }

    #[test]
    fn test_reduction_index_map_gathers_group_heads() {
        // Reduce an 8-extent dim 0 down to 2: factor 4.
        let map = reduction_index_map(&[2, 3], &[8, 3], 0);
        // dst (0, j) -> src (0, j); dst (1, j) -> src (4, j).
        assert_eq!(map.offset(0), 0);
        assert_eq!(map.offset(1), 4);
        assert_eq!(map.offset(2), 8); // dst (0, 1) -> src linear 8
        assert_eq!(map.offset(3), 12); // dst (1, 1) -> src linear 12
    }

    #[test]
    #[should_panic(expected = "not a multiple")]
    fn test_reduction_index_map_rejects_ragged_factor() {
        reduction_index_map(&[3, 3], &[8, 3], 0);
    }
}
