//! Structural canonicalisation, affine collection, and the composed
//! optimisation pipeline.

use std::collections::{HashMap, HashSet};

use crate::build;
use crate::node::{Handle, Node, NodeKind};
use crate::op::BinaryOp;
use crate::op::UnaryOp;
use crate::remap::flatten;

enum Frame {
    Enter(Handle),
    Visit(Handle),
}

/// Rebuilds `root` so that every reachable subtree is re-interned through
/// the constructors, guaranteeing a single record per structurally-equal subtree even if
/// the input graph was assembled by a path that bypassed the hash-cons
/// table — e.g. nodes built directly by a prior `deserialise` bug, or
/// by test code. `VarFree`/`Oracle` leaves pass through unchanged: they are
/// deliberately never deduplicated, so there is nothing to
/// re-intern.
pub fn unique(root: &Handle) -> Handle {
    let mut canon: HashMap<usize, Handle> = HashMap::new();
    let mut seen: HashSet<usize> = HashSet::new();
    let mut stack = vec![Frame::Enter(root.clone())];

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(h) => {
                let id = Node::id(&h);
                if !seen.insert(id) {
                    continue;
                }
                stack.push(Frame::Visit(h.clone()));
                for child in h.children.iter().rev() {
                    stack.push(Frame::Enter(child.clone()));
                }
            },
            Frame::Visit(h) => {
                let id = Node::id(&h);
                let get = |c: &Handle| -> Handle {
                    canon.get(&Node::id(c)).cloned().expect("child canonicalised before parent")
                };
                let rebuilt = match &h.kind {
                    NodeKind::Constant(v) => build::constant(*v),
                    NodeKind::VarX => build::x(),
                    NodeKind::VarY => build::y(),
                    NodeKind::VarZ => build::z(),
                    NodeKind::VarFree(_) | NodeKind::Oracle(_) => h.clone(),
                    NodeKind::Unary(op) => build::unary(*op, get(h.operand())),
                    NodeKind::Binary(op) => build::binary(*op, get(h.lhs()), get(h.rhs())),
                    NodeKind::Remap => build::remap(
                        get(h.remap_body()),
                        get(h.remap_x()),
                        get(h.remap_y()),
                        get(h.remap_z()),
                    ),
                    NodeKind::ApplyConstVars => build::with_const_vars(get(h.const_vars_body())),
                };
                canon.insert(id, rebuilt);
            },
        }
    }

    canon.get(&Node::id(root)).cloned().expect("root canonicalised")
}

/// An atom's accumulated coefficient, plus the running constant term, for
/// one affine-combinable subtree.
#[derive(Clone)]
struct Terms {
    /// Atom ids in first-occurrence order — the order newly-introduced
    /// atoms will appear in the printed sum.
    order: Vec<usize>,
    coeffs: HashMap<usize, (Handle, f32)>,
    constant: f32,
}

impl Terms {
    fn zero() -> Terms {
        Terms { order: Vec::new(), coeffs: HashMap::new(), constant: 0.0 }
    }

    fn constant(v: f32) -> Terms {
        Terms { order: Vec::new(), coeffs: HashMap::new(), constant: v }
    }

    fn atom(h: Handle) -> Terms {
        let id = Node::id(&h);
        let mut coeffs = HashMap::new();
        coeffs.insert(id, (h, 1.0));
        Terms { order: vec![id], coeffs, constant: 0.0 }
    }

    fn scaled(&self, factor: f32) -> Terms {
        let coeffs = self.coeffs.iter().map(|(id, (h, c))| (*id, (h.clone(), c * factor))).collect();
        Terms { order: self.order.clone(), coeffs, constant: self.constant * factor }
    }

    fn combine(mut self, other: Terms) -> Terms {
        self.constant += other.constant;
        for id in other.order {
            let (atom, coeff) = other.coeffs[&id].clone();
            match self.coeffs.get_mut(&id) {
                Some((_, existing)) => *existing += coeff,
                None => {
                    self.coeffs.insert(id, (atom, coeff));
                    self.order.push(id);
                },
            }
        }
        self
    }
}

fn materialize_terms(terms: &Terms) -> Handle {
    let live: Vec<(Handle, f32)> = terms
        .order
        .iter()
        .filter_map(|id| terms.coeffs.get(id))
        .filter(|(_, c)| *c != 0.0)
        .map(|(h, c)| (h.clone(), *c))
        .collect();

    if live.is_empty() {
        return build::constant(terms.constant);
    }
    if live.len() == 1 && terms.constant == 0.0 && live[0].1 == 1.0 {
        return live[0].0.clone();
    }

    let mut exprs: Vec<Handle> = live
        .into_iter()
        .map(|(atom, coeff)| {
            if coeff == 1.0 {
                atom
            } else if coeff == -1.0 {
                build::unary(UnaryOp::Neg, atom)
            } else {
                build::binary(BinaryOp::Mul, atom, build::constant(coeff))
            }
        })
        .collect();

    if terms.constant != 0.0 {
        exprs.push(build::constant(terms.constant));
    }

    let mut acc = exprs.pop().expect("at least one term");
    while let Some(next) = exprs.pop() {
        acc = build::binary(BinaryOp::Add, next, acc);
    }
    acc
}

/// Re-associates sums and scalar products into a canonical affine-sum form.
/// Descends through `+`, `-`, unary `-`, and constant-scaled
/// multiplication/division; every other operator is a boundary whose
/// subtree is independently `collect_affine`d and then used as a single
/// atom with coefficient 1.
///
/// Iterative, single bottom-up pass (no recursive function calls) so it
/// stays correct on graphs of depth ≥ 32,768.
pub fn collect_affine(root: &Handle) -> Handle {
    let mut seen: HashSet<usize> = HashSet::new();
    let mut contribution: HashMap<usize, Terms> = HashMap::new();
    let mut canon: HashMap<usize, Handle> = HashMap::new();
    let mut stack = vec![Frame::Enter(root.clone())];

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(h) => {
                let id = Node::id(&h);
                if !seen.insert(id) {
                    continue;
                }
                stack.push(Frame::Visit(h.clone()));
                for child in h.children.iter().rev() {
                    stack.push(Frame::Enter(child.clone()));
                }
            },
            Frame::Visit(h) => {
                let id = Node::id(&h);
                let terms_of = |child: &Handle, contribution: &HashMap<usize, Terms>, canon: &HashMap<usize, Handle>| -> Terms {
                    if let Some(v) = child.as_constant() {
                        return Terms::constant(v);
                    }
                    let cid = Node::id(child);
                    if let Some(t) = contribution.get(&cid) {
                        t.clone()
                    } else {
                        let atom = canon.get(&cid).cloned().unwrap_or_else(|| child.clone());
                        Terms::atom(atom)
                    }
                };

                let as_affine = match &h.kind {
                    NodeKind::Binary(BinaryOp::Add) => {
                        let l = terms_of(h.lhs(), &contribution, &canon);
                        let r = terms_of(h.rhs(), &contribution, &canon);
                        Some(l.combine(r))
                    },
                    NodeKind::Binary(BinaryOp::Sub) => {
                        let l = terms_of(h.lhs(), &contribution, &canon);
                        let r = terms_of(h.rhs(), &contribution, &canon);
                        Some(l.combine(r.scaled(-1.0)))
                    },
                    NodeKind::Unary(UnaryOp::Neg) => {
                        let t = terms_of(h.operand(), &contribution, &canon);
                        Some(t.scaled(-1.0))
                    },
                    NodeKind::Binary(BinaryOp::Mul) if h.lhs().as_constant().is_some() => {
                        let c = h.lhs().as_constant().unwrap();
                        let t = terms_of(h.rhs(), &contribution, &canon);
                        Some(t.scaled(c))
                    },
                    NodeKind::Binary(BinaryOp::Mul) if h.rhs().as_constant().is_some() => {
                        let c = h.rhs().as_constant().unwrap();
                        let t = terms_of(h.lhs(), &contribution, &canon);
                        Some(t.scaled(c))
                    },
                    NodeKind::Binary(BinaryOp::Div) if h.rhs().as_constant().map_or(false, |c| c != 0.0) => {
                        let c = h.rhs().as_constant().unwrap();
                        let t = terms_of(h.lhs(), &contribution, &canon);
                        Some(t.scaled(1.0 / c))
                    },
                    _ => None,
                };

                match as_affine {
                    Some(terms) => {
                        let rebuilt = materialize_terms(&terms);
                        contribution.insert(id, terms);
                        canon.insert(id, rebuilt);
                    },
                    None => {
                        let get = |c: &Handle| -> Handle {
                            canon.get(&Node::id(c)).cloned().unwrap_or_else(|| c.clone())
                        };
                        let rebuilt = match &h.kind {
                            NodeKind::Constant(_)
                            | NodeKind::VarX
                            | NodeKind::VarY
                            | NodeKind::VarZ
                            | NodeKind::VarFree(_)
                            | NodeKind::Oracle(_) => h.clone(),
                            NodeKind::Unary(op) => build::unary(*op, get(h.operand())),
                            NodeKind::Binary(op) => build::binary(*op, get(h.lhs()), get(h.rhs())),
                            NodeKind::Remap => build::remap(
                                get(h.remap_body()),
                                get(h.remap_x()),
                                get(h.remap_y()),
                                get(h.remap_z()),
                            ),
                            NodeKind::ApplyConstVars => build::with_const_vars(get(h.const_vars_body())),
                        };
                        canon.insert(id, rebuilt);
                    },
                }
            },
        }
    }

    canon.get(&Node::id(root)).cloned().expect("root processed")
}

/// The fixed composition `collect_affine ∘ unique ∘ flatten`.
pub fn optimized(root: &Handle) -> Handle {
    collect_affine(&unique(&flatten(root)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{binary, constant, unary, var, x, y, z};
    use crate::op::{BinaryOp, UnaryOp};

    #[test]
    fn unique_rebuilds_structurally_equal_graph() {
        let t = binary(BinaryOp::Add, x(), constant(1.0));
        assert_eq!(unique(&t), t);
    }

    #[test]
    fn unique_preserves_var_free_identity() {
        let v = var();
        let t = binary(BinaryOp::Add, v.clone(), constant(0.0));
        // `t` already simplifies to `v` via the constructors, so `unique` must too.
        assert_eq!(unique(&t), v);
    }

    #[test]
    fn collect_affine_merges_like_terms() {
        let two_x_plus_y = binary(BinaryOp::Add, binary(BinaryOp::Mul, constant(2.0), x()), y());
        let sum = binary(BinaryOp::Add, two_x_plus_y.clone(), two_x_plus_y);
        let collected = collect_affine(&sum);

        // 4x + 2y, in whatever term order this crate's collector settles on.
        assert_eq!(collected.binary_op(), Some(BinaryOp::Add));
        let flat = flatten_add_chain(&collected);
        assert_eq!(flat.len(), 2);
        assert!(flat.iter().any(|t| is_scaled_atom(t, &x(), 4.0)));
        assert!(flat.iter().any(|t| is_scaled_atom(t, &y(), 2.0)));
    }

    #[test]
    fn collect_affine_drops_zero_coefficient_terms() {
        let t = binary(BinaryOp::Sub, x(), x());
        // x - x folds to Constant(0) during construction already; collect_affine must
        // agree.
        assert_eq!(collect_affine(&t).as_constant(), Some(0.0));
    }

    #[test]
    fn collect_affine_reduces_single_unit_atom() {
        let t = binary(BinaryOp::Add, x(), constant(0.0));
        assert_eq!(collect_affine(&t), x());
    }

    #[test]
    fn collect_affine_handles_division_by_constant() {
        let t = binary(BinaryOp::Div, x(), constant(2.0));
        let collected = collect_affine(&t);
        assert_eq!(collected.binary_op(), Some(BinaryOp::Mul));
        assert_eq!(*collected.lhs(), x());
        assert_eq!(collected.rhs().as_constant(), Some(0.5));
    }

    #[test]
    fn collect_affine_treats_non_scalar_mul_as_boundary_atom() {
        let neg_z = unary(UnaryOp::Neg, z());
        let t = binary(BinaryOp::Mul, neg_z.clone(), neg_z);
        let collected = collect_affine(&t);
        assert_eq!(collected.unary_op(), Some(UnaryOp::Square));
    }

    fn flatten_add_chain(h: &crate::node::Handle) -> Vec<crate::node::Handle> {
        let mut out = Vec::new();
        let mut cur = h.clone();
        loop {
            if cur.binary_op() == Some(BinaryOp::Add) {
                out.push(cur.lhs().clone());
                cur = cur.rhs().clone();
            } else {
                out.push(cur);
                break;
            }
        }
        out
    }

    fn is_scaled_atom(term: &crate::node::Handle, atom: &crate::node::Handle, coeff: f32) -> bool {
        if coeff == 1.0 {
            return term == atom;
        }
        term.binary_op() == Some(BinaryOp::Mul)
            && *term.lhs() == *atom
            && term.rhs().as_constant() == Some(coeff)
    }

    #[test]
    fn optimized_is_fixed_composition() {
        let t = binary(BinaryOp::Add, x(), constant(0.0));
        let remapped = crate::build::remap(t, constant(3.0), y(), z());
        assert_eq!(optimized(&remapped), collect_affine(&unique(&flatten(&remapped))));
    }

    #[test]
    fn collect_affine_handles_deep_chain_without_overflow() {
        let mut t = x();
        for i in 0..40_000u32 {
            t = binary(BinaryOp::Add, t, constant(i as f32));
        }
        let collected = collect_affine(&t);
        assert!(collected.binary_op().is_some() || collected.as_constant().is_some());
    }
}
