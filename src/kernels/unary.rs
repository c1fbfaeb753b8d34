use rayon::prelude::*;

use crate::core::op::OpKind;
use crate::kernels::Element;

const PAR_CHUNK: usize = 4096;

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn eval(kind: OpKind, x: f32, scalar: f32, min_val: f32, max_val: f32) -> f32 {
    match kind {
        OpKind::Exp => x.exp(),
        OpKind::Square => x * x,
        OpKind::Sqrt => x.sqrt(),
        OpKind::Silu => x * sigmoid(x),
        // tanh approximation
        OpKind::Gelu => {
            0.5 * x * (1.0 + ((2.0 / std::f32::consts::PI).sqrt() * (x + 0.044715 * x * x * x)).tanh())
        }
        OpKind::Relu => x.max(0.0),
        OpKind::Clamp => min_val.max(max_val.min(x)),
        OpKind::MulScalar => x * scalar,
        _ => unreachable!("{} is not a unary kind", kind.name()),
    }
}

/// Host-side evaluation of one element-wise unary operator over a packed
/// buffer, chunked across the rayon pool. `kind` must belong to the unary
/// family; `scalar` feeds scalar-multiply, `min_val`/`max_val` feed clamp.
pub fn apply_unary<T: Element>(
    kind: OpKind,
    data: &mut [T],
    scalar: f32,
    min_val: f32,
    max_val: f32,
) {
    assert!(kind.is_unary(), "{} is not a unary kind", kind.name());
    data.par_chunks_mut(PAR_CHUNK).for_each(|chunk| {
        for v in chunk.iter_mut() {
            *v = T::from_f32(eval(kind, v.to_f32(), scalar, min_val, max_val));
        }
    });
}
