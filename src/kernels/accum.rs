use std::marker::PhantomData;

use crate::core::layout::Layout;
use crate::core::tensor::GroupTensor;
use crate::kernels::{check_dtype, Element};

/// Zero-fills an accumulator buffer, operating on 16-byte wide groups of
/// elements at a time. The element count must be an exact multiple of the
/// wide width; layout resolution guarantees this upstream, and the
/// constructor re-checks it once so `run` stays check-free.
#[derive(Debug, Clone)]
pub struct ClearKernel<T> {
    num_groups: usize,
    group_size: usize,
    _elem: PhantomData<T>,
}

impl<T: Element> ClearKernel<T> {
    /// Elements per 16-byte wide group.
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
    pub fn for_tensor(accum: &GroupTensor, group_size: usize) -> Self {
        check_dtype::<T>(accum);
        Self::new(accum.num_elements(), group_size)
    }

    pub fn run(&self, accum: &mut [T], lane_id: usize) {
        let mut g = lane_id;
        while g < self.num_groups {
            accum[g * Self::WIDE..(g + 1) * Self::WIDE].fill(T::ZERO);
            g += self.group_size;
        }
    }
}

/// Folds one freshly produced tile into a persistent accumulator:
/// `accum[la(i)] += src[ls(i)]` for every logical index of the
/// accumulator.
#[derive(Debug, Clone)]
pub struct ForloopAccumKernel<T> {
    accum: Layout,
    src: Layout,
    numel: usize,
    group_size: usize,
    _elem: PhantomData<T>,
}

impl<T: Element> ForloopAccumKernel<T> {
    pub fn new(accum: Layout, src: Layout, group_size: usize) -> Self {
        assert!(group_size > 0, "lane group must not be empty");
        assert_eq!(
            accum.size(),
            src.size(),
            "accumulator and source element counts differ"
        );
        let numel = accum.size();
        Self {
            accum,
            src,
            numel,
            group_size,
            _elem: PhantomData,
        }
    }

    /// Instantiates against the layouts recorded in the tensor descriptors.
    pub fn for_tensors(accum: &GroupTensor, src: &GroupTensor, group_size: usize) -> Self {
        check_dtype::<T>(accum);
        check_dtype::<T>(src);
        Self::new(accum.layout.clone(), src.layout.clone(), group_size)
    }

    pub fn run(&self, accum: &mut [T], src: &[T], lane_id: usize) {
        let mut i = lane_id;
        while i < self.numel {
            let a = self.accum.offset(i);
            accum[a] = accum[a].add(src[self.src.offset(i)]);
            i += self.group_size;
        }
    }
}

/// Accumulation with a per-row correction factor folded into every
/// iteration:
/// `accum[i] = accum[i] * rescale[i % rescale_numel] + src[i]`.
///
/// The rescale factor typically comes from a companion running-max
/// reduction; its element count must evenly divide the accumulator's
/// outer extent so `i % rescale_numel` selects the row's factor.
#[derive(Debug, Clone)]
pub struct ForloopAccumRescaleKernel<T> {
    accum: Layout,
    src: Layout,
    rescale: Layout,
    numel: usize,
    rescale_numel: usize,
    group_size: usize,
    _elem: PhantomData<T>,
}

impl<T: Element> ForloopAccumRescaleKernel<T> {
    pub fn new(accum: Layout, src: Layout, rescale: Layout, group_size: usize) -> Self {
        assert!(group_size > 0, "lane group must not be empty");
        assert_eq!(
            accum.size(),
            src.size(),
            "accumulator and source element counts differ"
        );
        let rescale_numel = rescale.size();
        assert!(
            rescale_numel > 0 && accum.extent(0) % rescale_numel == 0,
            "rescale element count {} does not divide the accumulator's outer extent {}",
            rescale_numel,
            accum.extent(0)
        );
        let numel = accum.size();
        Self {
            accum,
            src,
            rescale,
            numel,
            rescale_numel,
            group_size,
            _elem: PhantomData,
        }
    }

    /// Instantiates against the layouts recorded in the tensor descriptors.
    pub fn for_tensors(
        accum: &GroupTensor,
        src: &GroupTensor,
        rescale: &GroupTensor,
        group_size: usize,
    ) -> Self {
        check_dtype::<T>(accum);
        check_dtype::<T>(src);
        check_dtype::<T>(rescale);
        Self::new(
            accum.layout.clone(),
            src.layout.clone(),
            rescale.layout.clone(),
            group_size,
        )
    }

    pub fn run(&self, accum: &mut [T], src: &[T], rescale: &[T], lane_id: usize) {
        let mut i = lane_id;
        while i < self.numel {
            let a = self.accum.offset(i);
            let r = rescale[self.rescale.offset(i % self.rescale_numel)];
            accum[a] = accum[a].mul(r).add(src[self.src.offset(i)]);
            i += self.group_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::dispatch;

    #[test]
    fn test_clear_zeroes_every_element() {
        let mut buf = vec![1.5f32; 64];
        let kernel = ClearKernel::<f32>::new(buf.len(), 7);
        dispatch(7, |lane| kernel.run(&mut buf, lane));
        assert!(buf.iter().all(|&v| v == 0.0));
    }

    #[test]
    #[should_panic(expected = "wide-group width")]
    fn test_clear_rejects_ragged_count() {
        // f32 wide groups hold 4 elements; 30 is not a multiple.
        let _ = ClearKernel::<f32>::new(30, 8);
    }

    #[test]
    fn test_accum_strided_layouts() {
        // Accumulator is column-major over [4, 2], source row-major: same
        // logical shape, different physical order.
        let accum_layout = Layout::col_major(&[4, 2]);
        let src_layout = Layout::row_major(&[4, 2]);
        let kernel = ForloopAccumKernel::<f32>::new(accum_layout.clone(), src_layout, 3);

        let mut accum = vec![0.0f32; 8];
        // src physical (row-major): value = 10*c0 + c1
        let src: Vec<f32> = (0..4)
            .flat_map(|c0| (0..2).map(move |c1| (10 * c0 + c1) as f32))
            .collect();
        dispatch(3, |lane| kernel.run(&mut accum, &src, lane));

        // accum physical (col-major): coordinate (c0, c1) at c0 + 4*c1.
        for c0 in 0..4 {
            for c1 in 0..2 {
                assert_eq!(accum[c0 + 4 * c1], (10 * c0 + c1) as f32);
            }
        }
    }

    #[test]
    fn test_accum_rescale_recurrence() {
        // 2 rows x 2 cols, one rescale factor per row.
        let layout = Layout::col_major(&[2, 2]);
        let rescale_layout = Layout::col_major(&[2]);
        let kernel = ForloopAccumRescaleKernel::<f32>::new(
            layout.clone(),
            layout.clone(),
            rescale_layout,
            4,
        );

        let mut accum = vec![1.0f32, 2.0, 3.0, 4.0];
        let src = vec![10.0f32, 20.0, 30.0, 40.0];
        let rescale = vec![0.5f32, 2.0];
        dispatch(4, |lane| kernel.run(&mut accum, &src, &rescale, lane));

        // accum[i] = accum[i] * rescale[i % 2] + src[i]
        assert_eq!(accum, vec![10.5, 24.0, 31.5, 48.0]);
    }
}
