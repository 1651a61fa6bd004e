//! Eager remap flattening.
//!
//! `remap` itself (the lazy, O(1) wrapper constructor) lives in
//! [`crate::build`] alongside the other smart constructors, since building it
//! is just another hash-cons lookup-or-insert. This module holds `flatten`:
//! the eager pass that walks a tree, substituting axis leaves for whatever
//! `Remap` nodes prescribe, iteratively (no call-stack recursion, so depth
//! >= 32,768 is safe) and memoized per call so a shared sub-DAG is
//! flattened once rather than once per incoming edge.

use std::collections::HashMap;

use crate::build;
use crate::node::{Handle, Node, NodeKind};
use crate::op::{BinaryOp, UnaryOp};

/// Current axis substitution in effect: `None` means "leave X/Y/Z alone",
/// `Some((x, y, z))` means "X/Y/Z within this scope mean these handles
/// instead" (already-flattened results, installed by an enclosing `Remap`).
type Subst = Option<(Handle, Handle, Handle)>;

fn subst_key(s: &Subst) -> (usize, usize, usize) {
    match s {
        None => (0, 0, 0),
        Some((x, y, z)) => (Node::id(x), Node::id(y), Node::id(z)),
    }
}

enum Task {
    Enter(Handle, Subst),
    FinishUnary { op: UnaryOp },
    FinishBinary { op: BinaryOp },
    FinishConstVars,
    FinishRemapAxes { body: Handle },
    Memoize { key: (usize, (usize, usize, usize)) },
}

/// Substitutes every `Remap` node's axis leaves into its body, eagerly,
/// bottom-up. Returns `root` unchanged (same handle) when no `Remap` is
/// reachable at all.
pub fn flatten(root: &Handle) -> Handle {
    if !root.flags().has_remap() {
        return root.clone();
    }

    let mut memo: HashMap<(usize, (usize, usize, usize)), Handle> = HashMap::new();
    let mut tasks = vec![Task::Enter(root.clone(), None)];
    let mut values: Vec<Handle> = Vec::new();

    while let Some(task) = tasks.pop() {
        match task {
            Task::Enter(node, subst) => {
                let key = (Node::id(&node), subst_key(&subst));
                if let Some(cached) = memo.get(&key) {
                    values.push(cached.clone());
                    continue;
                }
                if subst.is_none() && !node.flags().has_remap() {
                    memo.insert(key, node.clone());
                    values.push(node.clone());
                    continue;
                }
                match &node.kind {
                    NodeKind::Constant(_) | NodeKind::VarFree(_) | NodeKind::Oracle(_) => {
                        memo.insert(key, node.clone());
                        values.push(node.clone());
                    },
                    NodeKind::VarX => {
                        let result = subst.as_ref().map(|(x, _, _)| x.clone()).unwrap_or_else(|| node.clone());
                        memo.insert(key, result.clone());
                        values.push(result);
                    },
                    NodeKind::VarY => {
                        let result = subst.as_ref().map(|(_, y, _)| y.clone()).unwrap_or_else(|| node.clone());
                        memo.insert(key, result.clone());
                        values.push(result);
                    },
                    NodeKind::VarZ => {
                        let result = subst.as_ref().map(|(_, _, z)| z.clone()).unwrap_or_else(|| node.clone());
                        memo.insert(key, result.clone());
                        values.push(result);
                    },
                    NodeKind::Unary(op) => {
                        let op = *op;
                        let operand = node.operand().clone();
                        tasks.push(Task::Memoize { key });
                        tasks.push(Task::FinishUnary { op });
                        tasks.push(Task::Enter(operand, subst));
                    },
                    NodeKind::Binary(op) => {
                        let op = *op;
                        let lhs = node.lhs().clone();
                        let rhs = node.rhs().clone();
                        tasks.push(Task::Memoize { key });
                        tasks.push(Task::FinishBinary { op });
                        tasks.push(Task::Enter(rhs, subst.clone()));
                        tasks.push(Task::Enter(lhs, subst));
                    },
                    NodeKind::ApplyConstVars => {
                        let body = node.const_vars_body().clone();
                        tasks.push(Task::Memoize { key });
                        tasks.push(Task::FinishConstVars);
                        tasks.push(Task::Enter(body, subst));
                    },
                    NodeKind::Remap => {
                        let body = node.remap_body().clone();
                        let rx = node.remap_x().clone();
                        let ry = node.remap_y().clone();
                        let rz = node.remap_z().clone();
                        tasks.push(Task::Memoize { key });
                        tasks.push(Task::FinishRemapAxes { body });
                        tasks.push(Task::Enter(rz, subst.clone()));
                        tasks.push(Task::Enter(ry, subst.clone()));
                        tasks.push(Task::Enter(rx, subst));
                    },
                }
            },
            Task::FinishUnary { op } => {
                let operand = values.pop().expect("unary operand result missing");
                values.push(build::unary(op, operand));
            },
            Task::FinishBinary { op } => {
                let rhs = values.pop().expect("binary rhs result missing");
                let lhs = values.pop().expect("binary lhs result missing");
                values.push(build::binary(op, lhs, rhs));
            },
            Task::FinishConstVars => {
                let body = values.pop().expect("const-vars body result missing");
                values.push(build::with_const_vars(body));
            },
            Task::FinishRemapAxes { body } => {
                let new_rz = values.pop().expect("remap z result missing");
                let new_ry = values.pop().expect("remap y result missing");
                let new_rx = values.pop().expect("remap x result missing");
                // The body is flattened in a *fresh* scope: the outer
                // substitution only matters for resolving rx/ry/rz, not for
                // the body's own leaves, which now answer to the new triple.
                tasks.push(Task::Enter(body, Some((new_rx, new_ry, new_rz))));
            },
            Task::Memoize { key } => {
                let result = values.last().expect("result missing before memoize").clone();
                memo.insert(key, result);
            },
        }
    }

    values.pop().expect("flatten produced no result")
}
