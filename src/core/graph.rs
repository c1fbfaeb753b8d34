use tracing::debug;

use crate::core::config::GraphConfig;
use crate::core::dtype::DataType;
use crate::core::layout::Layout;
use crate::core::memory::DeviceMemoryManager;
use crate::core::op::{DeviceOp, OpKind};
use crate::core::tensor::{DeviceTensor, OpId, TensorId};

/// Device-level graph: an ordered sequence of operators plus the device
/// heap scoped to the graph.
///
/// Operators are created only through the factory calls below. Each
/// factory checks allocation feasibility first and returns `None` without
/// any observable change when the outputs do not fit; a `None` result
/// means "try a different plan", never a fatal error. Construction is
/// sequential; factories mutate the heap's free-space tracker and must not
/// be called concurrently.
#[derive(Debug)]
pub struct DeviceGraph {
    pub ops: Vec<DeviceOp>,
    dmem: DeviceMemoryManager,
    next_tensor_id: u64,
    next_op_id: u64,
}

impl DeviceGraph {
    pub fn new(config: &GraphConfig) -> Self {
        Self {
            ops: Vec::new(),
            dmem: DeviceMemoryManager::new(config.device_mem_bytes),
            next_tensor_id: 0,
            next_op_id: 0,
        }
    }

    /// Graph-entry tensor backed by a fresh device allocation.
    pub fn input(&mut self, shape: &[usize], dtype: DataType) -> Option<DeviceTensor> {
        let layout = Layout::row_major(shape);
        let size = layout.size() * dtype.size_of();
        if !self.dmem.can_allocate(size) {
            debug!(size, "device input rejected: heap budget exhausted");
            return None;
        }
        let op_id = self.fresh_op_id();
        let output = DeviceTensor {
            id: self.fresh_tensor_id(),
            dtype,
            layout,
            owner_op: op_id,
            owner_slot: 0,
            dmem_offset: self.dmem.allocate(size),
        };
        self.ops.push(DeviceOp {
            id: op_id,
            kind: OpKind::Input,
            inputs: Vec::new(),
            outputs: vec![output.clone()],
            scalar: 0.0,
            min_val: 0.0,
            max_val: 0.0,
        });
        Some(output)
    }

    pub fn exp(&mut self, input: &DeviceTensor) -> Option<DeviceTensor> {
        self.element_unary(input, OpKind::Exp, 0.0, 0.0, 0.0)
    }

    pub fn square(&mut self, input: &DeviceTensor) -> Option<DeviceTensor> {
        self.element_unary(input, OpKind::Square, 0.0, 0.0, 0.0)
    }

    pub fn sqrt(&mut self, input: &DeviceTensor) -> Option<DeviceTensor> {
        self.element_unary(input, OpKind::Sqrt, 0.0, 0.0, 0.0)
    }

    pub fn silu(&mut self, input: &DeviceTensor) -> Option<DeviceTensor> {
        self.element_unary(input, OpKind::Silu, 0.0, 0.0, 0.0)
    }

    pub fn gelu(&mut self, input: &DeviceTensor) -> Option<DeviceTensor> {
        self.element_unary(input, OpKind::Gelu, 0.0, 0.0, 0.0)
    }

    pub fn relu(&mut self, input: &DeviceTensor) -> Option<DeviceTensor> {
        self.element_unary(input, OpKind::Relu, 0.0, 0.0, 0.0)
    }

    pub fn mul_scalar(&mut self, input: &DeviceTensor, scalar: f32) -> Option<DeviceTensor> {
        self.element_unary(input, OpKind::MulScalar, scalar, 0.0, 0.0)
    }

    /// Clamp to `[min_val, max_val]`: `max(min_val, min(max_val, x))`.
    pub fn clamp(
        &mut self,
        input: &DeviceTensor,
        min_val: f32,
        max_val: f32,
    ) -> Option<DeviceTensor> {
        self.element_unary(input, OpKind::Clamp, 0.0, min_val, max_val)
    }

    /// Shared construction path of the unary family: output shape and
    /// layout are identical to the input's.
    fn element_unary(
        &mut self,
        input: &DeviceTensor,
        kind: OpKind,
        scalar: f32,
        min_val: f32,
        max_val: f32,
    ) -> Option<DeviceTensor> {
        assert!(kind.is_unary(), "{} is not a unary kind", kind.name());
        self.assert_live(input);
        let size = input.size_bytes();
        if !self.dmem.can_allocate(size) {
            debug!(size, kind = kind.name(), "device operator rejected: heap budget exhausted");
            return None;
        }
        let op_id = self.fresh_op_id();
        let mut output = input.clone();
        output.id = self.fresh_tensor_id();
        output.owner_op = op_id;
        output.owner_slot = 0;
        output.dmem_offset = self.dmem.allocate(size);
        self.ops.push(DeviceOp {
            id: op_id,
            kind,
            inputs: vec![input.id],
            outputs: vec![output.clone()],
            scalar,
            min_val,
            max_val,
        });
        Some(output)
    }

    /// Destroys the most recently constructed operator, returning its
    /// output memory in reverse output order.
    pub fn pop_op(&mut self) -> Option<OpKind> {
        let op = self.ops.pop()?;
        for out in op.outputs.iter().rev() {
            self.dmem
                .free(out.dmem_offset)
                .expect("device graph freed an output twice");
        }
        Some(op.kind)
    }

    /// Tears the whole graph down, operators in reverse insertion order.
    pub fn clear(&mut self) {
        while self.pop_op().is_some() {}
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn remaining_memory(&self) -> usize {
        self.dmem.remaining()
    }

    /// Hand-off record for code-generation and inspection tooling: one
    /// record per operator with its kind tag, input ids, and output
    /// descriptors.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "graph_level": "device",
            "operators": self.ops,
        })
    }

    /// Inputs must be live outputs of this graph; anything else means the
    /// front-end built an inconsistent graph.
    fn assert_live(&self, t: &DeviceTensor) {
        let live = self.ops.iter().any(|op| {
            op.id == t.owner_op && op.outputs.get(t.owner_slot).map(|o| o.id) == Some(t.id)
        });
        assert!(live, "tensor {:?} is not a live output of this graph", t.id);
    }

    fn fresh_tensor_id(&mut self) -> TensorId {
        let id = TensorId(self.next_tensor_id);
        self.next_tensor_id += 1;
        id
    }

    fn fresh_op_id(&mut self) -> OpId {
        let id = OpId(self.next_op_id);
        self.next_op_id += 1;
        id
    }
}

impl Drop for DeviceGraph {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_graph() -> DeviceGraph {
        DeviceGraph::new(&GraphConfig::with_budgets(64 * 1024, 0, 0))
    }

    #[test]
    fn test_unary_output_mirrors_input_shape() {
        let mut g = small_graph();
        let x = g.input(&[8, 4], DataType::F32).unwrap();
        let y = g.exp(&x).unwrap();
        assert!(y.layout.same_shape(&x.layout));
        assert_eq!(y.dtype, x.dtype);
        assert_eq!(y.owner_slot, 0);
        assert_ne!(y.id, x.id);
        assert_eq!(g.num_ops(), 2);
    }

    #[test]
    fn test_clamp_records_bounds() {
        let mut g = small_graph();
        let x = g.input(&[4], DataType::F32).unwrap();
        let _ = g.clamp(&x, -1.0, 1.0).unwrap();
        let op = g.ops.last().unwrap();
        assert_eq!(op.kind, OpKind::Clamp);
        assert_eq!((op.min_val, op.max_val), (-1.0, 1.0));
    }

    #[test]
    fn test_pop_restores_budget() {
        let mut g = small_graph();
        let budget = g.remaining_memory();
        let x = g.input(&[16, 16], DataType::F32).unwrap();
        let _ = g.relu(&x).unwrap();
        assert!(g.remaining_memory() < budget);
        g.pop_op();
        g.pop_op();
        assert_eq!(g.remaining_memory(), budget);
    }

    #[test]
    #[should_panic(expected = "not a live output")]
    fn test_stale_input_aborts() {
        let mut g = small_graph();
        let x = g.input(&[4], DataType::F32).unwrap();
        g.pop_op();
        let _ = g.exp(&x);
    }

    #[test]
    fn test_json_record_shape() {
        let mut g = small_graph();
        let x = g.input(&[2, 2], DataType::F16).unwrap();
        let _ = g.mul_scalar(&x, 0.5).unwrap();
        let v = g.to_json();
        let ops = v["operators"].as_array().unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1]["kind"], "MulScalar");
        assert_eq!(ops[1]["inputs"][0], x.id.0);
        assert!(ops[1]["outputs"][0]["layout"].is_object());
    }
}
