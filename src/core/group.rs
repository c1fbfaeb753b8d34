use tracing::debug;

use crate::core::config::GraphConfig;
use crate::core::dtype::DataType;
use crate::core::layout::Layout;
use crate::core::memory::StackPool;
use crate::core::op::{GroupOp, OpKind};
use crate::core::tensor::{GroupTensor, OpId, TensorId};

/// Thread-group-level graph: operators whose outputs live in the bounded
/// shared-memory region of one cooperating lane group, with a verification
/// fingerprint slot tracked in lockstep with every tensor.
///
/// Shared-memory frees follow the destruction protocol's reverse order, so
/// both pools stay simple stacks; the pools reject anything else. The same
/// factory contract as the device level applies: feasibility first, `None`
/// on a miss with no state change, sequential construction only.
#[derive(Debug)]
pub struct GroupGraph {
    pub grid_dim: (u32, u32, u32),
    pub block_dim: (u32, u32, u32),
    /// Trip count of the generated accumulation loop.
    pub forloop_range: u32,
    /// Destination extent used by `reduce_to_dimx`.
    pub reduction_dimx: usize,
    pub ops: Vec<GroupOp>,
    smem: StackPool,
    fingerprint: StackPool,
    next_tensor_id: u64,
    next_op_id: u64,
}

impl GroupGraph {
    pub fn new(
        grid_dim: (u32, u32, u32),
        block_dim: (u32, u32, u32),
        forloop_range: u32,
        reduction_dimx: usize,
        config: &GraphConfig,
    ) -> Self {
        assert!(forloop_range > 0, "forloop range must be positive");
        assert!(reduction_dimx > 0, "reduction dimx must be positive");
        Self {
            grid_dim,
            block_dim,
            forloop_range,
            reduction_dimx,
            ops: Vec::new(),
            smem: StackPool::new(config.shared_mem_bytes),
            fingerprint: StackPool::new(config.fingerprint_mem_bytes),
            next_tensor_id: 0,
            next_op_id: 0,
        }
    }

    /// Number of cooperating lanes executing the group's kernels.
    pub fn group_size(&self) -> usize {
        (self.block_dim.0 * self.block_dim.1 * self.block_dim.2) as usize
    }

    /// Graph-entry tensor backed by fresh shared-memory and fingerprint
    /// slots.
    pub fn input(&mut self, shape: &[usize], dtype: DataType) -> Option<GroupTensor> {
        let layout = Layout::row_major(shape);
        let template = GroupTensor {
            id: TensorId(0),
            dtype,
            layout,
            owner_op: OpId(0),
            owner_slot: 0,
            smem_offset: 0,
            fingerprint_offset: 0,
            after_accum: false,
        };
        let outputs = self.admit(vec![template])?;
        self.push_op(OpKind::Input, Vec::new(), outputs, 0.0, 0.0, 0.0, 0)
            .pop()
    }

    pub fn exp(&mut self, input: &GroupTensor) -> Option<GroupTensor> {
        self.element_unary(input, OpKind::Exp, 0.0, 0.0, 0.0)
    }

    pub fn square(&mut self, input: &GroupTensor) -> Option<GroupTensor> {
        self.element_unary(input, OpKind::Square, 0.0, 0.0, 0.0)
    }

    pub fn sqrt(&mut self, input: &GroupTensor) -> Option<GroupTensor> {
        self.element_unary(input, OpKind::Sqrt, 0.0, 0.0, 0.0)
    }

    pub fn silu(&mut self, input: &GroupTensor) -> Option<GroupTensor> {
        self.element_unary(input, OpKind::Silu, 0.0, 0.0, 0.0)
    }

    pub fn gelu(&mut self, input: &GroupTensor) -> Option<GroupTensor> {
        self.element_unary(input, OpKind::Gelu, 0.0, 0.0, 0.0)
    }

    pub fn relu(&mut self, input: &GroupTensor) -> Option<GroupTensor> {
        self.element_unary(input, OpKind::Relu, 0.0, 0.0, 0.0)
    }

    pub fn mul_scalar(&mut self, input: &GroupTensor, scalar: f32) -> Option<GroupTensor> {
        self.element_unary(input, OpKind::MulScalar, scalar, 0.0, 0.0)
    }

    pub fn clamp(
        &mut self,
        input: &GroupTensor,
        min_val: f32,
        max_val: f32,
    ) -> Option<GroupTensor> {
        self.element_unary(input, OpKind::Clamp, 0.0, min_val, max_val)
    }

    fn element_unary(
        &mut self,
        input: &GroupTensor,
        kind: OpKind,
        scalar: f32,
        min_val: f32,
        max_val: f32,
    ) -> Option<GroupTensor> {
        assert!(kind.is_unary(), "{} is not a unary kind", kind.name());
        self.assert_live(input);
        let template = self.derive(input, 0);
        let outputs = self.admit(vec![template])?;
        self.push_op(kind, vec![input.id], outputs, scalar, min_val, max_val, 0)
            .pop()
    }

    /// Loop-carried accumulator over `forloop_range` iterations. The input
    /// must not itself be post-accumulation state.
    pub fn forloop_accum(&mut self, input: &GroupTensor) -> Option<GroupTensor> {
        self.assert_live(input);
        assert!(
            !input.after_accum,
            "accumulation input {:?} has already passed through a forloop accumulator",
            input.id
        );
        let mut template = self.derive(input, 0);
        template.after_accum = true;
        let outputs = self.admit(vec![template])?;
        self.push_op(OpKind::ForloopAccum, vec![input.id], outputs, 0.0, 0.0, 0.0, 0)
            .pop()
    }

    /// Accumulator with a per-row rescale factor folded into every
    /// iteration (exponential moving accumulation). The rescale element
    /// count must evenly divide the accumulator's outer extent.
    pub fn forloop_accum_rescale(
        &mut self,
        input: &GroupTensor,
        rescale: &GroupTensor,
    ) -> Option<GroupTensor> {
        self.assert_live(input);
        self.assert_live(rescale);
        assert!(
            !input.after_accum,
            "accumulation input {:?} has already passed through a forloop accumulator",
            input.id
        );
        assert!(
            rescale.num_elements() > 0
                && input.layout.extent(0) % rescale.num_elements() == 0,
            "rescale element count {} does not divide the accumulator's outer extent {}",
            rescale.num_elements(),
            input.layout.extent(0)
        );
        let mut template = self.derive(input, 0);
        template.after_accum = true;
        let outputs = self.admit(vec![template])?;
        self.push_op(
            OpKind::ForloopAccumRescale,
            vec![input.id, rescale.id],
            outputs,
            0.0,
            0.0,
            0.0,
            0,
        )
        .pop()
    }

    /// Delta tracking against a running record: two outputs, the
    /// per-iteration delta (inheriting the input's accumulation state) and
    /// the record of last-seen values.
    pub fn loop_delta(&mut self, input: &GroupTensor) -> Option<(GroupTensor, GroupTensor)> {
        self.assert_live(input);
        let delta = self.derive(input, 0);
        let mut record = delta.clone();
        record.owner_slot = 1;
        let outputs = self.admit(vec![delta, record])?;
        let mut outputs = self.push_op(
            OpKind::LoopDelta,
            vec![input.id],
            outputs,
            0.0,
            0.0,
            0.0,
            0,
        );
        let record = outputs.pop()?;
        let delta = outputs.pop()?;
        Some((delta, record))
    }

    /// Full reduction along `dim`: the destination extent collapses to 1.
    pub fn reduce(&mut self, input: &GroupTensor, dim: usize) -> Option<GroupTensor> {
        self.reduction_to(input, dim, 1)
    }

    /// Reduction along `dim` down to the graph's `reduction_dimx` extent.
    /// A source extent that is not an exact multiple of it is a structural
    /// error, rejected at construction rather than silently truncated.
    pub fn reduce_to_dimx(&mut self, input: &GroupTensor, dim: usize) -> Option<GroupTensor> {
        self.reduction_to(input, dim, self.reduction_dimx)
    }

    fn reduction_to(
        &mut self,
        input: &GroupTensor,
        dim: usize,
        dst_extent: usize,
    ) -> Option<GroupTensor> {
        self.assert_live(input);
        assert!(dim < input.layout.rank(), "reduction dim {} out of range", dim);
        assert!(
            input.layout.extent(dim) % dst_extent == 0,
            "source extent {} along dim {} is not a multiple of destination extent {}",
            input.layout.extent(dim),
            dim,
            dst_extent
        );
        let mut shape = input.layout.shape();
        shape[dim] = dst_extent;
        let mut template = self.derive(input, 0);
        template.layout = Layout::row_major(&shape);
        let outputs = self.admit(vec![template])?;
        self.push_op(OpKind::Reduce, vec![input.id], outputs, 0.0, 0.0, 0.0, dim)
            .pop()
    }

    /// Running-max reduction along `dim`: two outputs with extent 1 along
    /// the reduction dimension, the running maximum and the rescale diff.
    pub fn reduce_max(
        &mut self,
        input: &GroupTensor,
        dim: usize,
    ) -> Option<(GroupTensor, GroupTensor)> {
        self.assert_live(input);
        assert!(dim < input.layout.rank(), "reduction dim {} out of range", dim);
        let mut shape = input.layout.shape();
        shape[dim] = 1;
        let mut updated_max = self.derive(input, 0);
        updated_max.layout = Layout::row_major(&shape);
        let mut diff = updated_max.clone();
        diff.owner_slot = 1;
        let outputs = self.admit(vec![updated_max, diff])?;
        let mut outputs = self.push_op(
            OpKind::ReduceMax,
            vec![input.id],
            outputs,
            0.0,
            0.0,
            0.0,
            dim,
        );
        let diff = outputs.pop()?;
        let updated_max = outputs.pop()?;
        Some((updated_max, diff))
    }

    /// Destroys the most recently constructed operator, returning shared
    /// memory and fingerprint slots in reverse output order.
    pub fn pop_op(&mut self) -> Option<OpKind> {
        let op = self.ops.pop()?;
        for out in op.outputs.iter().rev() {
            self.fingerprint
                .free(out.id)
                .expect("fingerprint pool free out of destruction order");
            self.smem
                .free(out.id)
                .expect("shared-memory free out of destruction order");
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

    pub fn remaining_shared_memory(&self) -> usize {
        self.smem.remaining()
    }

    pub fn remaining_fingerprint_memory(&self) -> usize {
        self.fingerprint.remaining()
    }

    /// Hand-off record for code-generation and inspection tooling.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "graph_level": "thread_group",
            "grid_dim": [self.grid_dim.0, self.grid_dim.1, self.grid_dim.2],
            "block_dim": [self.block_dim.0, self.block_dim.1, self.block_dim.2],
            "forloop_range": self.forloop_range,
            "reduction_dimx": self.reduction_dimx,
            "operators": self.ops,
        })
    }

    /// Output template copying the input descriptor; ids and offsets are
    /// assigned by `admit`.
    fn derive(&self, input: &GroupTensor, slot: usize) -> GroupTensor {
        let mut t = input.clone();
        t.owner_slot = slot;
        t
    }

    /// Feasibility gate and allocation for a whole output list. Returns
    /// `None` without touching either pool when the batch does not fit.
    fn admit(&mut self, mut outputs: Vec<GroupTensor>) -> Option<Vec<GroupTensor>> {
        let sizes: Vec<usize> = outputs.iter().map(|t| t.size_bytes()).collect();
        if !self.smem.can_allocate_all(&sizes) || !self.fingerprint.can_allocate_all(&sizes) {
            debug!(
                total = sizes.iter().sum::<usize>(),
                "group operator rejected: shared-memory or fingerprint budget exhausted"
            );
            return None;
        }
        for (t, &size) in outputs.iter_mut().zip(sizes.iter()) {
            t.id = self.fresh_tensor_id();
            t.smem_offset = self.smem.allocate(t.id, size);
            t.fingerprint_offset = self.fingerprint.allocate(t.id, size);
        }
        Some(outputs)
    }

    /// Appends the operator record and stamps the owner on its outputs.
    fn push_op(
        &mut self,
        kind: OpKind,
        inputs: Vec<TensorId>,
        mut outputs: Vec<GroupTensor>,
        scalar: f32,
        min_val: f32,
        max_val: f32,
        dim: usize,
    ) -> Vec<GroupTensor> {
        debug_assert_eq!(outputs.len(), kind.num_outputs());
        let op_id = self.fresh_op_id();
        for t in outputs.iter_mut() {
            t.owner_op = op_id;
        }
        self.ops.push(GroupOp {
            id: op_id,
            kind,
            inputs,
            outputs: outputs.clone(),
            scalar,
            min_val,
            max_val,
            dim,
        });
        outputs
    }

    fn assert_live(&self, t: &GroupTensor) {
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

impl Drop for GroupGraph {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_graph() -> GroupGraph {
        GroupGraph::new((1, 1, 1), (128, 1, 1), 8, 4, &GraphConfig::default())
    }

    #[test]
    fn test_loop_delta_outputs() {
        let mut g = small_graph();
        let x = g.input(&[16, 4], DataType::F16).unwrap();
        let (delta, record) = g.loop_delta(&x).unwrap();
        assert_eq!(delta.owner_slot, 0);
        assert_eq!(record.owner_slot, 1);
        assert_eq!(delta.owner_op, record.owner_op);
        assert_ne!(delta.id, record.id);
        assert!(delta.layout.same_shape(&x.layout));
        assert!(record.layout.same_shape(&x.layout));
        assert!(!delta.after_accum);
    }

    #[test]
    fn test_delta_inherits_after_accum() {
        let mut g = small_graph();
        let x = g.input(&[16, 4], DataType::F16).unwrap();
        let acc = g.forloop_accum(&x).unwrap();
        assert!(acc.after_accum);
        let (delta, record) = g.loop_delta(&acc).unwrap();
        assert!(delta.after_accum);
        assert!(record.after_accum);
    }

    #[test]
    #[should_panic(expected = "already passed through")]
    fn test_double_accumulation_aborts() {
        let mut g = small_graph();
        let x = g.input(&[16, 4], DataType::F16).unwrap();
        let acc = g.forloop_accum(&x).unwrap();
        let _ = g.forloop_accum(&acc);
    }

    #[test]
    fn test_reduce_to_dimx_shape() {
        let mut g = small_graph();
        let x = g.input(&[16, 4], DataType::F32).unwrap();
        let r = g.reduce_to_dimx(&x, 0).unwrap();
        assert_eq!(r.layout.extent(0), 4);
        assert_eq!(r.layout.extent(1), 4);
        let m = g.reduce(&x, 1).unwrap();
        assert_eq!(m.layout.extent(1), 1);
    }

    #[test]
    #[should_panic(expected = "not a multiple")]
    fn test_ragged_reduction_rejected() {
        let mut g = small_graph();
        let x = g.input(&[18, 4], DataType::F32).unwrap();
        let _ = g.reduce_to_dimx(&x, 0);
    }

    #[test]
    fn test_reduce_max_pair() {
        let mut g = small_graph();
        let x = g.input(&[8, 4], DataType::F32).unwrap();
        let (max, diff) = g.reduce_max(&x, 1).unwrap();
        assert_eq!(max.layout.extent(1), 1);
        assert_eq!(diff.layout.extent(1), 1);
        assert_eq!(max.owner_slot, 0);
        assert_eq!(diff.owner_slot, 1);
    }

    #[test]
    fn test_fingerprint_tracks_teardown() {
        let mut g = small_graph();
        let smem_budget = g.remaining_shared_memory();
        let fp_budget = g.remaining_fingerprint_memory();
        let x = g.input(&[32, 4], DataType::F16).unwrap();
        let _ = g.loop_delta(&x).unwrap();
        assert!(g.remaining_shared_memory() < smem_budget);
        assert!(g.remaining_fingerprint_memory() < fp_budget);
        g.clear();
        assert_eq!(g.remaining_shared_memory(), smem_budget);
        assert_eq!(g.remaining_fingerprint_memory(), fp_budget);
    }
}
