//! # Fusor: Superoptimizing Compiler Core for Fused Tensor Kernels
//!
//! Fusor represents a tensor computation as a typed operator graph at two
//! levels — device-level tensors/operators and thread-group-level
//! tensors/operators — arbitrates layout-aware memory allocation for every
//! intermediate buffer, and provides the loop-accumulating numeric kernels
//! that run inside generated thread-group loop bodies.
//!
//! ## Core Modules
//!
//! - **[`core`]**: The two-level IR — layouts, tensors, operators, the
//!   graph lifecycle managers, and the memory arbiters.
//! - **[`kernels`]**: Thread-group numeric kernels (clear, accumulate,
//!   delta tracking, reductions with fused epilogues and running max).
//!
//! Graph construction is sequential: factories return `Some` outputs or
//! `None` when the allocation budget rejects the candidate, leaving no
//! partial state behind.

pub mod core;
pub mod kernels;

pub use crate::core::config::GraphConfig;
pub use crate::core::dtype::DataType;
pub use crate::core::graph::DeviceGraph;
pub use crate::core::group::GroupGraph;
pub use crate::core::layout::{coord_strides, reduction_index_map, Layout, LayoutDim};
pub use crate::core::memory::{DeviceMemoryManager, MemoryError, StackPool};
pub use crate::core::op::{DeviceOp, GroupOp, OpKind};
pub use crate::core::tensor::{DeviceTensor, GroupTensor, OpId, TensorId};
pub use crate::kernels::{
    apply_unary, dispatch, ClearKernel, DeltaKernel, Element, ForloopAccumKernel,
    ForloopAccumRescaleKernel, InitMaxKernel, MeanEpilogue, ReductionEpilogue, ReductionKernel,
    ReductionMaxKernel, ScaleEpilogue, StoreEpilogue,
};
