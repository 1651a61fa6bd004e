//! Traversal.
//!
//! `walk` visits every *unique* node reachable from a root exactly once, in
//! deterministic post-order (children before parent, left-to-right among
//! siblings), using an explicit work stack instead of the call stack so it
//! stays correct on DAGs of depth ≥ 32,768.

use std::collections::HashSet;

use crate::node::{Handle, Node};

/// Deterministic post-order visitation of every unique node reachable from
/// `root`, each exactly once.
pub fn walk(root: &Handle) -> Vec<Handle> {
    enum Frame {
        Enter(Handle),
        Emit(Handle),
    }

    let mut out = Vec::new();
    let mut seen: HashSet<usize> = HashSet::new();
    let mut stack = vec![Frame::Enter(root.clone())];

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(h) => {
                let id = Node::id(&h);
                if !seen.insert(id) {
                    continue;
                }
                stack.push(Frame::Emit(h.clone()));
                // Push children in reverse so the stack pops them
                // left-to-right, giving left-before-right post-order.
                for child in h.children.iter().rev() {
                    stack.push(Frame::Enter(child.clone()));
                }
            },
            Frame::Emit(h) => out.push(h),
        }
    }

    out
}

/// Number of unique nodes reachable from `root`, i.e. the length of
/// `walk(root)`.
pub fn size(root: &Handle) -> usize {
    walk(root).len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{binary, constant, var, x, y};
    use crate::op::BinaryOp;

    #[test]
    fn walk_visits_shared_subtree_once() {
        let shared = binary(BinaryOp::Add, x(), constant(1.0));
        let t = binary(BinaryOp::Mul, shared.clone(), shared.clone());
        let visited = walk(&t);
        // shared, x, 1.0 collapse to the same three unique nodes plus the
        // root `Mul` — 4 total regardless of the two edges into `shared`.
        assert_eq!(visited.len(), 4);
    }

    #[test]
    fn walk_is_post_order_children_before_parent() {
        let t = binary(BinaryOp::Add, x(), y());
        let visited = walk(&t);
        let root_pos = visited.iter().position(|h| *h == t).unwrap();
        assert_eq!(root_pos, visited.len() - 1);
    }

    #[test]
    fn size_matches_walk_len() {
        let t = binary(BinaryOp::Add, x(), constant(2.0));
        assert_eq!(size(&t), walk(&t).len());
    }

    #[test]
    fn walk_handles_deep_chain_without_overflow() {
        let mut t = var();
        for _ in 0..40_000 {
            t = binary(BinaryOp::Add, t, constant(1.0));
        }
        let visited = walk(&t);
        assert!(visited.len() > 40_000);
    }
}
