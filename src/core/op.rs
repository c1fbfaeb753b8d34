use serde::{Serialize, Deserialize};

use crate::core::tensor::{DeviceTensor, GroupTensor, OpId, TensorId};

/// Closed enumeration of operator kinds across both graph levels.
///
/// Device-level factories construct only the input/unary subset; the
/// loop-carried kinds (accumulation, delta, reductions) exist at the
/// thread-group level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Input,
    Exp,
    Square,
    Sqrt,
    Silu,
    Gelu,
    Relu,
    Clamp,
    MulScalar,
    ForloopAccum,
    ForloopAccumRescale,
    LoopDelta,
    Reduce,
    ReduceMax,
}

impl OpKind {
    /// Fixed output arity of the kind.
    pub fn num_outputs(self) -> usize {
        match self {
            Self::LoopDelta | Self::ReduceMax => 2,
            _ => 1,
        }
    }

    /// Whether the kind belongs to the element-wise unary family.
    pub fn is_unary(self) -> bool {
        matches!(
            self,
            Self::Exp
                | Self::Square
                | Self::Sqrt
                | Self::Silu
                | Self::Gelu
                | Self::Relu
                | Self::Clamp
                | Self::MulScalar
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Exp => "exp",
            Self::Square => "square",
            Self::Sqrt => "sqrt",
            Self::Silu => "silu",
            Self::Gelu => "gelu",
            Self::Relu => "relu",
            Self::Clamp => "clamp",
            Self::MulScalar => "mul_scalar",
            Self::ForloopAccum => "forloop_accum",
            Self::ForloopAccumRescale => "forloop_accum_rescale",
            Self::LoopDelta => "loop_delta",
            Self::Reduce => "reduce",
            Self::ReduceMax => "reduce_max",
        }
    }
}

/// One operator of a device-level graph. Inputs are borrowed by id;
/// outputs are owned and live exactly as long as the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceOp {
    pub id: OpId,
    pub kind: OpKind,
    pub inputs: Vec<TensorId>,
    pub outputs: Vec<DeviceTensor>,
    pub scalar: f32,
    pub min_val: f32,
    pub max_val: f32,
}

/// One operator of a thread-group-level graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupOp {
    pub id: OpId,
    pub kind: OpKind,
    pub inputs: Vec<TensorId>,
    pub outputs: Vec<GroupTensor>,
    pub scalar: f32,
    pub min_val: f32,
    pub max_val: f32,
    /// Reduction dimension for `Reduce` / `ReduceMax`.
    pub dim: usize,
}
