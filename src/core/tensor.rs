use serde::{Serialize, Deserialize};

use crate::core::dtype::DataType;
use crate::core::layout::Layout;

/// Unique tensor identity, monotonically increasing per graph and never
/// reused within a graph's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorId(pub u64);

/// Handle of the operator owning a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpId(pub u64);

/// Descriptor of one device-level intermediate buffer.
///
/// The owner op and output slot are set exactly once at construction; the
/// descriptor is valid only between its owning operator's construction and
/// destruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTensor {
    pub id: TensorId,
    pub dtype: DataType,
    pub layout: Layout,
    pub owner_op: OpId,
    pub owner_slot: usize,
    /// Byte offset inside the device heap.
    pub dmem_offset: usize,
}

impl DeviceTensor {
    pub fn num_elements(&self) -> usize {
        self.layout.size()
    }

    pub fn size_bytes(&self) -> usize {
        self.num_elements() * self.dtype.size_of()
    }
}

/// Descriptor of one thread-group-level intermediate buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTensor {
    pub id: TensorId,
    pub dtype: DataType,
    pub layout: Layout,
    pub owner_op: OpId,
    pub owner_slot: usize,
    /// Byte offset inside the shared-memory region.
    pub smem_offset: usize,
    /// Byte offset of the tensor's verification slot in the fingerprint pool.
    pub fingerprint_offset: usize,
    /// Whether the tensor's state has already passed through a loop-carried
    /// accumulation.
    pub after_accum: bool,
}

impl GroupTensor {
    pub fn num_elements(&self) -> usize {
        self.layout.size()
    }

    pub fn size_bytes(&self) -> usize {
        self.num_elements() * self.dtype.size_of()
    }
}
