use serde::{Serialize, Deserialize};

/// Memory budgets arbitrated by a graph's allocators.
///
/// The shared-memory and fingerprint budgets bound every thread-group
/// graph independently; the device budget bounds the device-level heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub device_mem_bytes: usize,
    pub shared_mem_bytes: usize,
    pub fingerprint_mem_bytes: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            device_mem_bytes: 1 << 30,
            shared_mem_bytes: 96 * 1024,
            fingerprint_mem_bytes: 64 * 1024,
        }
    }
}

impl GraphConfig {
    pub fn with_budgets(device: usize, shared: usize, fingerprint: usize) -> Self {
        Self {
            device_mem_bytes: device,
            shared_mem_bytes: shared,
            fingerprint_mem_bytes: fingerprint,
        }
    }
}
