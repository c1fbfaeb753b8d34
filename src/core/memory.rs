use thiserror::Error;
use tracing::debug;

use crate::core::tensor::TensorId;

/// Alignment granularity of device-heap allocations.
pub const DEVICE_ALIGN: usize = 256;
/// Alignment granularity of shared-memory and fingerprint allocations.
pub const SMEM_ALIGN: usize = 16;

pub(crate) fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Diagnosable allocator misuse. Infeasible requests are not errors; they
/// are reported by the feasibility query before any allocation happens.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("free at offset {0:#x} does not match any live allocation")]
    UnknownAllocation(usize),
    #[error("free of tensor {id:?} violates stack order (top of stack is {top:?})")]
    NonLifoFree { id: TensorId, top: Option<TensorId> },
}

/// Device-heap arbiter: fixed byte budget, first-fit free list with
/// coalescing. Frees may arrive in any order.
#[derive(Debug)]
pub struct DeviceMemoryManager {
    capacity: usize,
    /// Disjoint free ranges (offset, size), sorted by offset.
    free_list: Vec<(usize, usize)>,
    /// Live allocations offset -> footprint.
    in_use: Vec<(usize, usize)>,
}

impl DeviceMemoryManager {
    pub fn new(capacity: usize) -> Self {
        let capacity = align_up(capacity, DEVICE_ALIGN);
        Self {
            capacity,
            free_list: vec![(0, capacity)],
            in_use: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total free space across all ranges.
    pub fn remaining(&self) -> usize {
        self.free_list.iter().map(|&(_, size)| size).sum()
    }

    /// Pure feasibility query; never mutates state.
    pub fn can_allocate(&self, size_bytes: usize) -> bool {
        let footprint = align_up(size_bytes, DEVICE_ALIGN);
        self.free_list.iter().any(|&(_, size)| size >= footprint)
    }

    /// Assigns an offset and shrinks the budget. Must be preceded by a
    /// passing `can_allocate`; a failing call here is a protocol violation
    /// and aborts.
    pub fn allocate(&mut self, size_bytes: usize) -> usize {
        let footprint = align_up(size_bytes, DEVICE_ALIGN);
        let slot = self
            .free_list
            .iter()
            .position(|&(_, size)| size >= footprint)
            .unwrap_or_else(|| {
                panic!(
                    "device allocation of {} bytes without a passing feasibility check",
                    footprint
                )
            });
        let (offset, size) = self.free_list[slot];
        if size == footprint {
            self.free_list.remove(slot);
        } else {
            self.free_list[slot] = (offset + footprint, size - footprint);
        }
        self.in_use.push((offset, footprint));
        debug!(offset, footprint, "device heap allocate");
        offset
    }

    /// Returns a previously allocated range to the budget, coalescing with
    /// adjacent free ranges.
    pub fn free(&mut self, offset: usize) -> Result<(), MemoryError> {
        let slot = self
            .in_use
            .iter()
            .position(|&(off, _)| off == offset)
            .ok_or(MemoryError::UnknownAllocation(offset))?;
        let (_, footprint) = self.in_use.swap_remove(slot);

        let insert_at = self
            .free_list
            .iter()
            .position(|&(off, _)| off > offset)
            .unwrap_or(self.free_list.len());
        self.free_list.insert(insert_at, (offset, footprint));

        // Merge with the right neighbor, then the left.
        if insert_at + 1 < self.free_list.len() {
            let (off, size) = self.free_list[insert_at];
            let (next_off, next_size) = self.free_list[insert_at + 1];
            if off + size == next_off {
                self.free_list[insert_at] = (off, size + next_size);
                self.free_list.remove(insert_at + 1);
            }
        }
        if insert_at > 0 {
            let (prev_off, prev_size) = self.free_list[insert_at - 1];
            let (off, size) = self.free_list[insert_at];
            if prev_off + prev_size == off {
                self.free_list[insert_at - 1] = (prev_off, prev_size + size);
                self.free_list.remove(insert_at);
            }
        }
        debug!(offset, footprint, "device heap free");
        Ok(())
    }
}

/// Bump/stack arbiter for the shared-memory region and the fingerprint
/// pool: allocation grows a tail offset, and frees must name the most
/// recent live allocation (the destruction protocol's reverse order).
#[derive(Debug)]
pub struct StackPool {
    capacity: usize,
    top: usize,
    /// Live allocations in stack order: (owner tensor, offset, footprint).
    live: Vec<(TensorId, usize, usize)>,
}

impl StackPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            top: 0,
            live: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.top
    }

    /// Pure feasibility query; never mutates state.
    pub fn can_allocate(&self, size_bytes: usize) -> bool {
        self.can_allocate_all(&[size_bytes])
    }

    /// Feasibility of a whole batch of requests taken together (an
    /// operator's full output list).
    pub fn can_allocate_all(&self, sizes: &[usize]) -> bool {
        let total: usize = sizes.iter().map(|&s| align_up(s, SMEM_ALIGN)).sum();
        total <= self.remaining()
    }

    /// Assigns the next stack offset to `id`. Must be preceded by a passing
    /// feasibility check covering this request.
    pub fn allocate(&mut self, id: TensorId, size_bytes: usize) -> usize {
        let footprint = align_up(size_bytes, SMEM_ALIGN);
        assert!(
            self.top + footprint <= self.capacity,
            "stack allocation of {} bytes for {:?} without a passing feasibility check",
            footprint,
            id
        );
        let offset = self.top;
        self.top += footprint;
        self.live.push((id, offset, footprint));
        offset
    }

    /// Pops `id` off the stack. Out-of-order frees corrupt offset
    /// accounting and are rejected with a diagnosable error.
    pub fn free(&mut self, id: TensorId) -> Result<(), MemoryError> {
        match self.live.last().copied() {
            Some((top_id, _, footprint)) if top_id == id => {
                self.live.pop();
                self.top -= footprint;
                Ok(())
            }
            other => Err(MemoryError::NonLifoFree {
                id,
                top: other.map(|(top_id, _, _)| top_id),
            }),
        }
    }
}
