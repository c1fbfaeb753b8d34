use std::marker::PhantomData;

use crate::core::layout::Layout;
use crate::core::tensor::GroupTensor;
use crate::kernels::{check_dtype, Element};

/// Per-iteration change against a record of last-seen values:
/// `delta[i] = src[i] - record[i]`, then `record[i] = src[i]`, both for
/// the same logical index before the next one. The record must be
/// zero-cleared before the first iteration with [`ClearKernel`], so the
/// first delta equals the first source.
///
/// The record read goes through the delta layout, the write through the
/// record layout; the two agree in every graph-constructed configuration.
///
/// [`ClearKernel`]: crate::kernels::ClearKernel
#[derive(Debug, Clone)]
pub struct DeltaKernel<T> {
    delta: Layout,
    record: Layout,
    src: Layout,
    numel: usize,
    group_size: usize,
    _elem: PhantomData<T>,
}

impl<T: Element> DeltaKernel<T> {
    pub fn new(delta: Layout, record: Layout, src: Layout, group_size: usize) -> Self {
        assert!(group_size > 0, "lane group must not be empty");
        assert_eq!(delta.size(), record.size(), "delta and record element counts differ");
        assert_eq!(delta.size(), src.size(), "delta and source element counts differ");
        let numel = delta.size();
        Self {
            delta,
            record,
            src,
            numel,
            group_size,
            _elem: PhantomData,
        }
    }

    /// Instantiates against the layouts recorded in the tensor descriptors
    /// (the delta/record pair produced by one loop-delta operator).
    pub fn for_tensors(
        delta: &GroupTensor,
        record: &GroupTensor,
        src: &GroupTensor,
        group_size: usize,
    ) -> Self {
        check_dtype::<T>(delta);
        check_dtype::<T>(record);
        check_dtype::<T>(src);
        Self::new(
            delta.layout.clone(),
            record.layout.clone(),
            src.layout.clone(),
            group_size,
        )
    }

    pub fn run(&self, delta: &mut [T], record: &mut [T], src: &[T], lane_id: usize) {
        let mut i = lane_id;
        while i < self.numel {
            let s = src[self.src.offset(i)];
            // delta = src - record
            delta[self.delta.offset(i)] = s.sub(record[self.delta.offset(i)]);
            record[self.record.offset(i)] = s;
            i += self.group_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{dispatch, ClearKernel};

    #[test]
    fn test_delta_tracks_previous_iteration() {
        let layout = Layout::col_major(&[8]);
        let group_size = 4;
        let kernel = DeltaKernel::<f32>::new(
            layout.clone(),
            layout.clone(),
            layout.clone(),
            group_size,
        );

        let mut record = vec![9.0f32; 8];
        let mut delta = vec![0.0f32; 8];
        let clear = ClearKernel::<f32>::new(8, group_size);
        dispatch(group_size, |lane| clear.run(&mut record, lane));

        let s1: Vec<f32> = (0..8).map(|i| i as f32).collect();
        dispatch(group_size, |lane| kernel.run(&mut delta, &mut record, &s1, lane));
        assert_eq!(delta, s1);
        assert_eq!(record, s1);

        let s2: Vec<f32> = (0..8).map(|i| (i * 3) as f32).collect();
        dispatch(group_size, |lane| kernel.run(&mut delta, &mut record, &s2, lane));
        let expect: Vec<f32> = (0..8).map(|i| (i * 2) as f32).collect();
        assert_eq!(delta, expect);
        assert_eq!(record, s2);
    }
}
