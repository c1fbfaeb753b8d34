use std::marker::PhantomData;

use crate::core::layout::{coord_strides, reduction_index_map, Layout};
use crate::core::tensor::GroupTensor;
use crate::kernels::{check_dtype, Element};

/// Final store of a reduction result, fused into the gather pass so
/// post-processing needs no second sweep over the destination.
pub trait ReductionEpilogue<T: Element> {
    fn run(&self, value: f32, dst: &mut [T], pos: usize);
}

/// Plain store.
#[derive(Debug, Clone, Copy)]
pub struct StoreEpilogue;

impl<T: Element> ReductionEpilogue<T> for StoreEpilogue {
    fn run(&self, value: f32, dst: &mut [T], pos: usize) {
        dst[pos] = T::from_f32(value);
    }
}

/// Divides by the reduction factor (averaging reduction).
#[derive(Debug, Clone, Copy)]
pub struct MeanEpilogue {
    pub factor: usize,
}

impl<T: Element> ReductionEpilogue<T> for MeanEpilogue {
    fn run(&self, value: f32, dst: &mut [T], pos: usize) {
        dst[pos] = T::from_f32(value / self.factor as f32);
    }
}

/// Multiplies by a fixed scale before the store.
#[derive(Debug, Clone, Copy)]
pub struct ScaleEpilogue {
    pub scale: f32,
}

impl<T: Element> ReductionEpilogue<T> for ScaleEpilogue {
    fn run(&self, value: f32, dst: &mut [T], pos: usize) {
        dst[pos] = T::from_f32(value * self.scale);
    }
}

/// Sum-reduction along one designated dimension with a fused epilogue.
///
/// For each destination logical index the kernel gathers
/// `reduction_factor` source elements spaced by the source's coordinate
/// stride along the reduction dimension, sums them in f32, and hands the
/// scalar plus the destination's physical offset to the epilogue. The
/// gather map is composed once at instantiation; the source extent along
/// the reduction dimension must be an exact multiple of the destination
/// extent.
#[derive(Debug, Clone)]
pub struct ReductionKernel<T, E> {
    dst: Layout,
    src: Layout,
    gather: Layout,
    coord_stride: usize,
    factor: usize,
    dst_numel: usize,
    group_size: usize,
    epilogue: E,
    _elem: PhantomData<T>,
}

impl<T: Element, E: ReductionEpilogue<T>> ReductionKernel<T, E> {
    pub fn new(dst: Layout, src: Layout, red_dim: usize, group_size: usize, epilogue: E) -> Self {
        assert!(group_size > 0, "lane group must not be empty");
        assert_eq!(dst.rank(), src.rank(), "reduction rank mismatch");
        for d in 0..dst.rank() {
            if d != red_dim {
                assert_eq!(
                    dst.extent(d),
                    src.extent(d),
                    "extent mismatch on non-reduction dim {}",
                    d
                );
            }
        }
        let dst_shape = dst.shape();
        let src_shape = src.shape();
        let gather = reduction_index_map(&dst_shape, &src_shape, red_dim);
        let coord_stride = coord_strides(&src_shape)[red_dim];
        let factor = src.extent(red_dim) / dst.extent(red_dim);
        let dst_numel = dst.size();
        Self {
            dst,
            src,
            gather,
            coord_stride,
            factor,
            dst_numel,
            group_size,
            epilogue,
            _elem: PhantomData,
        }
    }

    /// Instantiates against the layouts recorded in the tensor descriptors.
    pub fn for_tensors(
        dst: &GroupTensor,
        src: &GroupTensor,
        red_dim: usize,
        group_size: usize,
        epilogue: E,
    ) -> Self {
        check_dtype::<T>(dst);
        check_dtype::<T>(src);
        Self::new(dst.layout.clone(), src.layout.clone(), red_dim, group_size, epilogue)
    }

    pub fn reduction_factor(&self) -> usize {
        self.factor
    }

    pub fn run(&self, dst: &mut [T], src: &[T], lane_id: usize) {
        let mut i = lane_id;
        while i < self.dst_numel {
            // Logical index of the first element in the reduction group.
            let first = self.gather.offset(i);
            let mut result = 0.0f32;
            for k in 0..self.factor {
                result += src[self.src.offset(first + k * self.coord_stride)].to_f32();
            }
            let pos = self.dst.offset(i);
            self.epilogue.run(result, dst, pos);
            i += self.group_size;
        }
    }
}

/// Fills the running-max state with the most-negative representable value
/// (the "not yet initialized" sentinel), in the same 16-byte wide groups
/// as [`ClearKernel`]; the same width constraint applies.
///
/// [`ClearKernel`]: crate::kernels::ClearKernel
#[derive(Debug, Clone)]
pub struct InitMaxKernel<T> {
    num_groups: usize,
    group_size: usize,
    _elem: PhantomData<T>,
}

impl<T: Element> InitMaxKernel<T> {
    pub const WIDE: usize = 16 / std::mem::size_of::<T>();

    pub fn new(num_elems: usize, group_size: usize) -> Self {
        assert!(group_size > 0, "lane group must not be empty");
        assert!(
            num_elems % Self::WIDE == 0,
            "element count {} is not a multiple of the wide-group width {}",
            num_elems,
            Self::WIDE
        );
        Self {
            num_groups: num_elems / Self::WIDE,
            group_size,
            _elem: PhantomData,
        }
    }

    /// Instantiates against the layout recorded in a tensor descriptor.
    pub fn for_tensor(state: &GroupTensor, group_size: usize) -> Self {
        check_dtype::<T>(state);
        Self::new(state.num_elements(), group_size)
    }

    pub fn run(&self, state: &mut [T], lane_id: usize) {
        let mut g = lane_id;
        while g < self.num_groups {
            state[g * Self::WIDE..(g + 1) * Self::WIDE].fill(T::LOWEST);
            g += self.group_size;
        }
    }
}

/// Running maximum across loop iterations plus the per-iteration diff used
/// to rescale already-accumulated partial results when the maximum moves
/// (the online-softmax pattern).
///
/// Per iteration and destination index:
/// `max_val = max(running_max, max of the reduction group)`, then
/// `diff = old_running_max - max_val` — except that while the old value
/// still equals the sentinel, the diff reads back as the sentinel itself,
/// never a finite difference; downstream accumulation treats the sentinel
/// as "no rescale needed yet". The old value is read from the running-max
/// buffer through the diff layout, matching the generated kernels.
///
/// Both output layouts must have extent 1 along the reduction dimension;
/// both buffers must be sentinel-initialized with [`InitMaxKernel`].
#[derive(Debug, Clone)]
pub struct ReductionMaxKernel<T> {
    updated_max: Layout,
    diff: Layout,
    src: Layout,
    gather: Layout,
    coord_stride: usize,
    factor: usize,
    dst_numel: usize,
    group_size: usize,
    _elem: PhantomData<T>,
}

impl<T: Element> ReductionMaxKernel<T> {
    pub fn new(
        updated_max: Layout,
        diff: Layout,
        src: Layout,
        red_dim: usize,
        group_size: usize,
    ) -> Self {
        assert!(group_size > 0, "lane group must not be empty");
        assert_eq!(updated_max.rank(), src.rank(), "running-max rank mismatch");
        assert_eq!(diff.rank(), src.rank(), "diff rank mismatch");
        assert_eq!(
            updated_max.extent(red_dim),
            1,
            "running max must collapse the reduction dimension"
        );
        assert_eq!(
            diff.extent(red_dim),
            1,
            "diff must collapse the reduction dimension"
        );
        let dst_shape = updated_max.shape();
        let src_shape = src.shape();
        let gather = reduction_index_map(&dst_shape, &src_shape, red_dim);
        let coord_stride = coord_strides(&src_shape)[red_dim];
        let factor = src.extent(red_dim);
        let dst_numel = updated_max.size();
        Self {
            updated_max,
            diff,
            src,
            gather,
            coord_stride,
            factor,
            dst_numel,
            group_size,
            _elem: PhantomData,
        }
    }

    /// Instantiates against the layouts recorded in the tensor descriptors
    /// (the max/diff pair produced by one running-max reduction operator).
    pub fn for_tensors(
        updated_max: &GroupTensor,
        diff: &GroupTensor,
        src: &GroupTensor,
        red_dim: usize,
        group_size: usize,
    ) -> Self {
        check_dtype::<T>(updated_max);
        check_dtype::<T>(diff);
        check_dtype::<T>(src);
        Self::new(
            updated_max.layout.clone(),
            diff.layout.clone(),
            src.layout.clone(),
            red_dim,
            group_size,
        )
    }

    pub fn run(&self, updated_max: &mut [T], diff: &mut [T], src: &[T], lane_id: usize) {
        let mut i = lane_id;
        while i < self.dst_numel {
            let first = self.gather.offset(i);
            let mut max_val = updated_max[self.updated_max.offset(i)];
            let prev = updated_max[self.diff.offset(i)];
            for k in 0..self.factor {
                max_val = max_val.max(src[self.src.offset(first + k * self.coord_stride)]);
            }
            updated_max[self.updated_max.offset(i)] = max_val;
            // Sentinel carried forward until the first real fold.
            diff[self.diff.offset(i)] = if prev == T::LOWEST {
                T::LOWEST
            } else {
                prev.sub(max_val)
            };
            i += self.group_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::dispatch;

    #[test]
    fn test_sum_reduction_with_store() {
        // [8, 2] -> [2, 2] along dim 0: factor 4.
        let dst = Layout::col_major(&[2, 2]);
        let src = Layout::col_major(&[8, 2]);
        let kernel = ReductionKernel::<f32, _>::new(dst, src, 0, 4, StoreEpilogue);
        assert_eq!(kernel.reduction_factor(), 4);

        let src_data: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let mut dst_data = vec![0.0f32; 4];
        dispatch(4, |lane| kernel.run(&mut dst_data, &src_data, lane));

        // Column 0 holds 0..8, column 1 holds 8..16.
        assert_eq!(dst_data, vec![0.0 + 1.0 + 2.0 + 3.0, 4.0 + 5.0 + 6.0 + 7.0,
                                  8.0 + 9.0 + 10.0 + 11.0, 12.0 + 13.0 + 14.0 + 15.0]);
    }

    #[test]
    fn test_mean_epilogue_fuses_average() {
        let dst = Layout::col_major(&[1]);
        let src = Layout::col_major(&[4]);
        let kernel = ReductionKernel::<f32, _>::new(dst, src, 0, 2, MeanEpilogue { factor: 4 });
        let mut out = vec![0.0f32; 1];
        dispatch(2, |lane| kernel.run(&mut out, &[1.0, 2.0, 3.0, 6.0], lane));
        assert_eq!(out[0], 3.0);
    }

    #[test]
    #[should_panic(expected = "not a multiple")]
    fn test_ragged_factor_rejected_at_instantiation() {
        let dst = Layout::col_major(&[3]);
        let src = Layout::col_major(&[8]);
        let _ = ReductionKernel::<f32, _>::new(dst, src, 0, 4, StoreEpilogue);
    }

    #[test]
    fn test_running_max_sentinel_propagation() {
        let dst = Layout::col_major(&[1]);
        let group_size = 2;
        let init = InitMaxKernel::<f32>::new(4, group_size);
        let mut max_buf = vec![0.0f32; 4];
        let mut diff_buf = vec![0.0f32; 4];
        dispatch(group_size, |lane| init.run(&mut max_buf, lane));
        dispatch(group_size, |lane| init.run(&mut diff_buf, lane));
        assert!(diff_buf.iter().all(|&v| v == f32::MIN));

        // First fold: [3, 7, 2]. Max becomes 7; diff stays at the sentinel.
        let k1 = ReductionMaxKernel::<f32>::new(
            dst.clone(),
            dst.clone(),
            Layout::col_major(&[3]),
            0,
            group_size,
        );
        dispatch(group_size, |lane| {
            k1.run(&mut max_buf, &mut diff_buf, &[3.0, 7.0, 2.0], lane)
        });
        assert_eq!(max_buf[0], 7.0);
        assert_eq!(diff_buf[0], f32::MIN);

        // Second fold: [9]. Max becomes 9; diff is the old max minus the new.
        let k2 = ReductionMaxKernel::<f32>::new(
            dst.clone(),
            dst,
            Layout::col_major(&[1]),
            0,
            group_size,
        );
        dispatch(group_size, |lane| {
            k2.run(&mut max_buf, &mut diff_buf, &[9.0], lane)
        });
        assert_eq!(max_buf[0], 9.0);
        assert_eq!(diff_buf[0], 7.0 - 9.0);
    }
}
