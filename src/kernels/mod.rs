//! # Thread-Group Numeric Kernels
//!
//! Stateless, layout-parameterized routines executed cooperatively by all
//! lanes of a thread group inside the generated accumulation loop. Every
//! kernel is instantiated once from layouts, element counts and the lane
//! group size (all fixed at instantiation), then `run` per lane: lane `l`
//! owns the strided index set `l, l + group_size, l + 2*group_size, ...`,
//! so no two lanes touch the same logical index within one call. Calls
//! assume a group-wide barrier immediately before and after; the kernels
//! themselves never block or branch on data.

pub mod accum;
pub mod delta;
pub mod reduce;
pub mod unary;

pub use accum::{ClearKernel, ForloopAccumKernel, ForloopAccumRescaleKernel};
pub use delta::DeltaKernel;
pub use reduce::{
    InitMaxKernel, MeanEpilogue, ReductionEpilogue, ReductionKernel, ReductionMaxKernel,
    ScaleEpilogue, StoreEpilogue,
};
pub use unary::apply_unary;

use bytemuck::Pod;
use half::{bf16, f16};

use crate::core::dtype::DataType;
use crate::core::tensor::GroupTensor;

/// A kernel instantiated for one element type must only be handed tensors
/// of that type; anything else is an inconsistent graph.
pub(crate) fn check_dtype<T: Element>(t: &GroupTensor) {
    assert_eq!(
        t.dtype,
        T::DTYPE,
        "tensor {:?} holds {} elements, kernel instantiated for {}",
        t.id,
        t.dtype.name(),
        T::DTYPE.name()
    );
}

/// Element datatype usable by the thread-group kernels.
///
/// `LOWEST` is the most-negative representable value, doubling as the
/// "not yet initialized" sentinel of the running-max reduction.
pub trait Element: Copy + Pod + PartialOrd + PartialEq + Send + Sync + 'static {
    const ZERO: Self;
    const LOWEST: Self;
    const DTYPE: DataType;

    fn from_f32(v: f32) -> Self;
    fn to_f32(self) -> f32;

    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;

    fn max(self, rhs: Self) -> Self {
        if rhs > self {
            rhs
        } else {
            self
        }
    }
}

impl Element for f32 {
    const ZERO: Self = 0.0;
    const LOWEST: Self = f32::MIN;
    const DTYPE: DataType = DataType::F32;

    fn from_f32(v: f32) -> Self {
        v
    }

    fn to_f32(self) -> f32 {
        self
    }

    fn add(self, rhs: Self) -> Self {
        self + rhs
    }

    fn sub(self, rhs: Self) -> Self {
        self - rhs
    }

    fn mul(self, rhs: Self) -> Self {
        self * rhs
    }
}

impl Element for f16 {
    const ZERO: Self = f16::ZERO;
    const LOWEST: Self = f16::MIN;
    const DTYPE: DataType = DataType::F16;

    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }

    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    fn add(self, rhs: Self) -> Self {
        f16::from_f32(self.to_f32() + rhs.to_f32())
    }

    fn sub(self, rhs: Self) -> Self {
        f16::from_f32(self.to_f32() - rhs.to_f32())
    }

    fn mul(self, rhs: Self) -> Self {
        f16::from_f32(self.to_f32() * rhs.to_f32())
    }
}

impl Element for bf16 {
    const ZERO: Self = bf16::ZERO;
    const LOWEST: Self = bf16::MIN;
    const DTYPE: DataType = DataType::Bf16;

    fn from_f32(v: f32) -> Self {
        bf16::from_f32(v)
    }

    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }

    fn add(self, rhs: Self) -> Self {
        bf16::from_f32(self.to_f32() + rhs.to_f32())
    }

    fn sub(self, rhs: Self) -> Self {
        bf16::from_f32(self.to_f32() - rhs.to_f32())
    }

    fn mul(self, rhs: Self) -> Self {
        bf16::from_f32(self.to_f32() * rhs.to_f32())
    }
}

/// Host-side stand-in for one cooperative kernel call: runs `f` once per
/// lane of the group. The barrier-at-call-boundary contract makes the
/// sequential order equivalent to the lockstep execution, since lanes own
/// disjoint index sets.
pub fn dispatch(group_size: usize, mut f: impl FnMut(usize)) {
    for lane_id in 0..group_size {
        f(lane_id);
    }
}
