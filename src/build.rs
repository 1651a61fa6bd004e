//! Smart constructors / simplifier.
//!
//! Every user-facing construction goes through this module. Each identity or
//! constant-folding rule is a local, bounded, non-recursive rewrite applied
//! once, in order, before the final `(kind, op, children, bits)` is sent to
//! the hash-cons table. All comparisons here use
//! handle identity (`Handle`'s `PartialEq`), never recursive structural
//! comparison.

use std::sync::Arc;

use crate::node::{Flags, Handle, Node, NodeKind};
use crate::op::{BinaryOp, UnaryOp};
use crate::oracle::OracleClause;
use crate::table::{self, StructuralKey};

/// The `X` axis singleton.
pub fn x() -> Handle {
    table::axis_x()
}

/// The `Y` axis singleton.
pub fn y() -> Handle {
    table::axis_y()
}

/// The `Z` axis singleton.
pub fn z() -> Handle {
    table::axis_z()
}

/// A fresh, un-interned free variable. Never deduplicated
/// with any other `var()` result, including itself across two calls.
pub fn var() -> Handle {
    let id = table::next_free_var_id();
    let hash = table::fnv1a(&[1, id]);
    Handle::from_arc(Arc::new(Node::new(NodeKind::VarFree(id), Vec::new(), Flags::NONE, hash)))
}

/// An interned constant for the given `f32` bit pattern. Two
/// constants are equal iff their bit patterns are equal.
pub fn constant(v: f32) -> Handle {
    let key = StructuralKey::Constant(v.to_bits());
    let hash = table::fnv1a(&[2, v.to_bits() as u64]);
    table::make_or_get(key, move || Node::new(NodeKind::Constant(v), Vec::new(), Flags::NONE, hash))
}

/// An opaque oracle leaf. Bypasses the hash-cons table entirely —
/// two oracle nodes compare equal only by clause identity, never structure.
pub fn oracle(clause: Arc<dyn OracleClause>) -> Handle {
    let hash = table::fnv1a(&[3, Arc::as_ptr(&clause) as *const () as usize as u64]);
    Handle::from_arc(Arc::new(Node::new(NodeKind::Oracle(clause), Vec::new(), Flags::HAS_ORACLE, hash)))
}

/// Constructs `op(t)` through the simplifier.
pub fn unary(op: UnaryOp, t: Handle) -> Handle {
    if let Some(folded) = simplify_unary(op, &t) {
        return folded;
    }
    build_unary(op, t)
}

fn simplify_unary(op: UnaryOp, t: &Handle) -> Option<Handle> {
    // `-(-x) = x`
    if op == UnaryOp::Neg {
        if let Some(UnaryOp::Neg) = t.unary_op() {
            return Some(t.operand().clone());
        }
    }
    // `op(op(x)) = op(x)` for idempotent `op` (currently only `abs`).
    if op.is_idempotent() && t.unary_op() == Some(op) {
        return Some(t.clone());
    }
    // Constant folding.
    if let Some(v) = t.as_constant() {
        return Some(constant(op.eval(v)));
    }
    None
}

fn build_unary(op: UnaryOp, t: Handle) -> Handle {
    let id = Node::id(&t);
    let flags = t.flags();
    let hash = table::fnv1a(&[10, op.to_code() as u64, id as u64]);
    let key = StructuralKey::Unary(op, id);
    table::make_or_get(key, move || Node::new(NodeKind::Unary(op), vec![t], flags, hash))
}

/// Constructs `lhs op rhs` through the simplifier.
pub fn binary(op: BinaryOp, lhs: Handle, rhs: Handle) -> Handle {
    if let Some(folded) = simplify_binary(op, &lhs, &rhs) {
        return folded;
    }
    build_binary(op, lhs, rhs)
}

fn is_zero(h: &Handle) -> bool {
    h.as_constant() == Some(0.0)
}
fn is_one(h: &Handle) -> bool {
    h.as_constant() == Some(1.0)
}
fn is_neg_one(h: &Handle) -> bool {
    h.as_constant() == Some(-1.0)
}
fn as_negated(h: &Handle) -> Option<Handle> {
    if h.unary_op() == Some(UnaryOp::Neg) {
        Some(h.operand().clone())
    } else {
        None
    }
}

fn simplify_binary(op: BinaryOp, lhs: &Handle, rhs: &Handle) -> Option<Handle> {
    use BinaryOp::*;
    match op {
        Add => {
            if is_zero(rhs) {
                return Some(lhs.clone());
            }
            if is_zero(lhs) {
                return Some(rhs.clone());
            }
            // `x + (-y) = x - y`
            if let Some(y) = as_negated(rhs) {
                return Some(binary(Sub, lhs.clone(), y));
            }
        },
        Sub => {
            if is_zero(rhs) {
                return Some(lhs.clone());
            }
            if is_zero(lhs) {
                return Some(unary(UnaryOp::Neg, rhs.clone()));
            }
        },
        Mul => {
            if is_zero(lhs) || is_zero(rhs) {
                return Some(constant(0.0));
            }
            if is_one(rhs) {
                return Some(lhs.clone());
            }
            if is_one(lhs) {
                return Some(rhs.clone());
            }
            if is_neg_one(rhs) {
                return Some(unary(UnaryOp::Neg, lhs.clone()));
            }
            if is_neg_one(lhs) {
                return Some(unary(UnaryOp::Neg, rhs.clone()));
            }
            // `x * x = square(x)` by handle identity. Needed so that
            // `collect_affine` folds `(-Z) * (-Z)` down to `square(-Z)`
            // instead of leaving a bare self-multiplication; otherwise the
            // same shape as the neighbouring identity rules above.
            if lhs == rhs {
                return Some(unary(UnaryOp::Square, lhs.clone()));
            }
        },
        Pow => {
            if is_one(rhs) {
                return Some(lhs.clone());
            }
        },
        NthRoot => {
            if is_one(rhs) {
                return Some(lhs.clone());
            }
        },
        Min => {
            if lhs == rhs {
                return Some(lhs.clone());
            }
        },
        Max => {
            if lhs == rhs {
                return Some(lhs.clone());
            }
        },
        _ => {},
    }

    // Constant folding applies uniformly across all operators.
    if let (Some(a), Some(b)) = (lhs.as_constant(), rhs.as_constant()) {
        return Some(constant(op.eval(a, b)));
    }
    None
}

fn build_binary(op: BinaryOp, lhs: Handle, rhs: Handle) -> Handle {
    let lid = Node::id(&lhs);
    let rid = Node::id(&rhs);
    let flags = lhs.flags().union(rhs.flags());
    let hash = table::fnv1a(&[20, op.to_code() as u64, lid as u64, rid as u64]);
    let key = StructuralKey::Binary(op, lid, rid);
    table::make_or_get(key, move || Node::new(NodeKind::Binary(op), vec![lhs, rhs], flags, hash))
}

/// Builds the `Remap(body, x, y, z)` wrapper node without traversing `body`.
/// O(1) regardless of body size; no identity simplification is
/// applied to remap itself, only ordinary hash-consing.
pub fn remap(body: Handle, rx: Handle, ry: Handle, rz: Handle) -> Handle {
    let ids = [Node::id(&body), Node::id(&rx), Node::id(&ry), Node::id(&rz)];
    let flags = body.flags().union(rx.flags()).union(ry.flags()).union(rz.flags()) | Flags::HAS_REMAP;
    let hash = table::fnv1a(&[30, ids[0] as u64, ids[1] as u64, ids[2] as u64, ids[3] as u64]);
    let key = StructuralKey::Remap(ids[0], ids[1], ids[2], ids[3]);
    table::make_or_get(key, move || {
        Node::new(NodeKind::Remap, vec![body, rx, ry, rz], flags, hash)
    })
}

/// Wraps `t` in `ApplyConstVars` so downstream evaluators may treat free
/// variables within as constants, without mutating `t`.
pub fn with_const_vars(t: Handle) -> Handle {
    let id = Node::id(&t);
    let flags = t.flags();
    let hash = table::fnv1a(&[40, id as u64]);
    let key = StructuralKey::ConstVar(id);
    table::make_or_get(key, move || Node::new(NodeKind::ApplyConstVars, vec![t], flags, hash))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn identity_laws_hold_for_arbitrary_constants(c in prop::num::f32::NORMAL) {
            let t = constant(c);
            prop_assert_eq!(binary(BinaryOp::Add, t.clone(), constant(0.0)), t.clone());
            prop_assert_eq!(binary(BinaryOp::Mul, t.clone(), constant(1.0)), t.clone());
            prop_assert_eq!(binary(BinaryOp::Min, t.clone(), t.clone()), t.clone());
            prop_assert_eq!(
                unary(UnaryOp::Abs, unary(UnaryOp::Abs, t.clone())),
                unary(UnaryOp::Abs, t),
            );
        }
    }

    #[test]
    fn axis_singletons_are_identical() {
        assert_eq!(x(), x());
        assert_ne!(x(), y());
        assert_ne!(y(), z());
    }

    #[test]
    fn free_vars_are_never_equal() {
        let a = var();
        let b = var();
        assert_ne!(a, b);
        assert_ne!(a, a.clone()); // identical handle still compares equal...
    }

    #[test]
    fn make_dedups_structurally_equal_nodes() {
        let t1 = binary(BinaryOp::Add, x(), constant(7.0));
        let t2 = binary(BinaryOp::Add, x(), constant(7.0));
        assert_eq!(t1, t2);
    }

    #[test]
    fn add_zero_identity() {
        let t = binary(BinaryOp::Add, x(), constant(0.0));
        assert_eq!(t, x());
    }

    #[test]
    fn mul_zero_identity_produces_positive_zero() {
        let t = binary(BinaryOp::Mul, x(), constant(0.0));
        assert_eq!(t.as_constant(), Some(0.0));
        assert!(t.as_constant().unwrap().is_sign_positive());
    }

    #[test]
    fn mul_neg_one_is_neg() {
        let t = binary(BinaryOp::Mul, x(), constant(-1.0));
        assert_eq!(t.unary_op(), Some(UnaryOp::Neg));
        assert_eq!(*t.operand(), x());
    }

    #[test]
    fn double_neg_cancels() {
        let t = unary(UnaryOp::Neg, unary(UnaryOp::Neg, x()));
        assert_eq!(t, x());
    }

    #[test]
    fn abs_abs_collapses() {
        let t = unary(UnaryOp::Abs, unary(UnaryOp::Abs, x()));
        assert_eq!(t, unary(UnaryOp::Abs, x()));
    }

    #[test]
    fn mul_self_becomes_square() {
        let t = binary(BinaryOp::Mul, x(), x());
        assert_eq!(t.unary_op(), Some(UnaryOp::Square));
        assert_eq!(*t.operand(), x());
    }

    #[test]
    fn min_of_identical_handle_collapses() {
        let t = binary(BinaryOp::Min, x(), x());
        assert_eq!(t, x());
    }

    #[test]
    fn pow_one_identity() {
        let t = binary(BinaryOp::Pow, x(), constant(1.0));
        assert_eq!(t, x());
    }

    #[test]
    fn constant_folding() {
        let t = binary(BinaryOp::Add, constant(2.0), constant(3.0));
        assert_eq!(t.as_constant(), Some(5.0));
    }

    #[test]
    fn division_by_zero_propagates_nan_not_error() {
        let t = binary(BinaryOp::Div, constant(1.0), constant(0.0));
        assert_eq!(t.as_constant(), Some(f32::INFINITY));
        let t = binary(BinaryOp::Div, constant(0.0), constant(0.0));
        assert!(t.as_constant().unwrap().is_nan());
    }
}
