//! Node storage and handles.
//!
//! A [`Node`] is heap-allocated and immutable once built; [`Handle`] is the
//! shared, thread-safe, counted owning reference to it (an `Arc<Node>` under
//! the hood, so handle copy/drop is already atomic). Structural
//! equality is never used by the passes in this crate — only `Handle`'s
//! identity equality (`Arc::ptr_eq`), matching its "Identity equality is
//! the fast equality used by all passes."

use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::oracle::OracleClause;
use crate::op::{BinaryOp, UnaryOp};

/// Subtree summary bits. Computed once at construction as the union of
/// child flags plus the node's own contribution; never recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// Any axis leaf (`VarX`/`VarY`/`VarZ`) reachable.
    pub const HAS_XYZ: Flags = Flags(0b001);
    /// Any `Remap` reachable.
    pub const HAS_REMAP: Flags = Flags(0b010);
    /// Any `Oracle` reachable.
    pub const HAS_ORACLE: Flags = Flags(0b100);

    pub fn union(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn has_xyz(self) -> bool {
        self.contains(Flags::HAS_XYZ)
    }

    pub fn has_remap(self) -> bool {
        self.contains(Flags::HAS_REMAP)
    }

    pub fn has_oracle(self) -> bool {
        self.contains(Flags::HAS_ORACLE)
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Flags) -> Flags {
        self.union(rhs)
    }
}

/// Tagged node payload. Children are stored separately, in
/// [`Node::children`], NOT inside this enum — that separation is what lets
/// [`Node`]'s destructor walk a DAG of depth ≥ 32,768 iteratively instead of
/// recursing once per level.
#[derive(Debug)]
pub(crate) enum NodeKind {
    Constant(f32),
    VarX,
    VarY,
    VarZ,
    VarFree(u64),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Remap,
    ApplyConstVars,
    Oracle(Arc<dyn OracleClause>),
}

impl NodeKind {
    pub(crate) fn arity(&self) -> usize {
        match self {
            NodeKind::Constant(_)
            | NodeKind::VarX
            | NodeKind::VarY
            | NodeKind::VarZ
            | NodeKind::VarFree(_)
            | NodeKind::Oracle(_) => 0,
            NodeKind::Unary(_) | NodeKind::ApplyConstVars => 1,
            NodeKind::Binary(_) => 2,
            NodeKind::Remap => 4,
        }
    }
}

/// A heap-allocated, immutable node record.
pub struct Node {
    pub(crate) kind: NodeKind,
    /// Children in construction order. Empty for leaves; length matches
    /// `kind.arity()` for everything else. lhs-before-rhs, body-then-x-y-z
    /// for `Remap`.
    pub(crate) children: Vec<Handle>,
    pub(crate) flags: Flags,
    /// Structural hash, combining opcode + child identities + constant
    /// bits. Not required for `HashMap` correctness (the hash-cons key's own
    /// `Hash` impl covers that) but kept as a first-class node attribute and
    /// exposed for diagnostics.
    pub(crate) struct_hash: u64,
    /// Guards against the hash-cons table entry being removed twice when a
    /// child `Node`, already drained of its own children by an ancestor's
    /// iterative drop, is then dropped a second time by the language's
    /// ordinary struct-field drop glue (see `impl Drop for Node`).
    detached: AtomicBool,
}

impl Node {
    pub(crate) fn new(
        kind: NodeKind,
        children: Vec<Handle>,
        flags: Flags,
        struct_hash: u64,
    ) -> Node {
        debug_assert_eq!(children.len(), kind.arity());
        Node { kind, children, flags, struct_hash, detached: AtomicBool::new(false) }
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn struct_hash(&self) -> u64 {
        self.struct_hash
    }

    /// Flips `detached` to `true`, returning the previous value. Used by
    /// [`crate::table::detach`] to make hash-cons removal idempotent (see
    /// `impl Drop for Node`).
    pub(crate) fn mark_detached(&self) -> bool {
        self.detached.swap(true, Ordering::AcqRel)
    }

    /// Process-wide record address, used as the fast identity equality
    /// check. Two handles to the same record always return the same id.
    pub fn id(this: &Handle) -> usize {
        Arc::as_ptr(&this.0) as *const () as usize
    }

    pub(crate) fn child(&self, i: usize) -> &Handle {
        &self.children[i]
    }

    pub fn unary_op(&self) -> Option<UnaryOp> {
        match self.kind {
            NodeKind::Unary(op) => Some(op),
            _ => None,
        }
    }

    pub fn binary_op(&self) -> Option<BinaryOp> {
        match self.kind {
            NodeKind::Binary(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<f32> {
        match self.kind {
            NodeKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_var_x(&self) -> bool {
        matches!(self.kind, NodeKind::VarX)
    }
    pub fn is_var_y(&self) -> bool {
        matches!(self.kind, NodeKind::VarY)
    }
    pub fn is_var_z(&self) -> bool {
        matches!(self.kind, NodeKind::VarZ)
    }

    pub fn free_var_id(&self) -> Option<u64> {
        match self.kind {
            NodeKind::VarFree(id) => Some(id),
            _ => None,
        }
    }

    pub fn oracle_clause(&self) -> Option<&Arc<dyn OracleClause>> {
        match &self.kind {
            NodeKind::Oracle(clause) => Some(clause),
            _ => None,
        }
    }

    pub fn is_remap(&self) -> bool {
        matches!(self.kind, NodeKind::Remap)
    }

    pub fn is_apply_const_vars(&self) -> bool {
        matches!(self.kind, NodeKind::ApplyConstVars)
    }

    /// `Unary` operand.
    pub fn operand(&self) -> &Handle {
        self.child(0)
    }

    /// `Binary` left operand.
    pub fn lhs(&self) -> &Handle {
        self.child(0)
    }

    /// `Binary` right operand.
    pub fn rhs(&self) -> &Handle {
        self.child(1)
    }

    /// `Remap` body.
    pub fn remap_body(&self) -> &Handle {
        self.child(0)
    }
    pub fn remap_x(&self) -> &Handle {
        self.child(1)
    }
    pub fn remap_y(&self) -> &Handle {
        self.child(2)
    }
    pub fn remap_z(&self) -> &Handle {
        self.child(3)
    }

    /// `ApplyConstVars` body.
    pub fn const_vars_body(&self) -> &Handle {
        self.child(0)
    }
}

impl Drop for Node {
    /// Iterative destructor: detaches `self` from the hash-cons
    /// table, then walks an explicit work stack of children instead of
    /// relying on the language's recursive struct-field drop, which would
    /// overflow the stack on graphs of depth ≥ 32,768.
    fn drop(&mut self) {
        let self_addr = self as *const Node as usize;
        crate::table::detach(self, self_addr);

        let mut stack: Vec<Handle> = std::mem::take(&mut self.children);
        while let Some(handle) = stack.pop() {
            // Capture the record's address while the `Arc` is still intact:
            // `try_unwrap` moves the `Node` out of its heap allocation, so
            // `&owned` below is a stack address that no longer matches the
            // table's stored `Weak` pointer.
            let addr = Node::id(&handle);
            match Arc::try_unwrap(handle.0) {
                Ok(mut owned) => {
                    // We are the last owner: detach it now (idempotent — the
                    // ordinary Drop glue that runs on `owned` when this match
                    // arm ends will call `detach` again, but by then
                    // `detached` is already true, so it is a no-op) and steal
                    // its children onto our explicit stack rather than
                    // letting them be dropped recursively by `owned`'s own
                    // field drop.
                    crate::table::detach(&owned, addr);
                    stack.append(&mut owned.children);
                }
                Err(_arc) => {
                    // Not the last owner: just let the handle's Drop run
                    // (decrements the atomic refcount), no recursion.
                }
            }
        }
    }
}

/// Shared, thread-safe, counted owning reference to a [`Node`].
///
/// `Handle`'s `PartialEq`/`Eq`/`Hash` are all identity-based (pointer
/// comparison): identity equality is the fast equality
/// used by all passes." Structural comparison is never performed directly by
/// callers; it only happens inside the hash-cons table.
#[derive(Clone)]
pub struct Handle(pub(crate) Arc<Node>);

impl Handle {
    pub(crate) fn from_arc(arc: Arc<Node>) -> Handle {
        Handle(arc)
    }

    pub(crate) fn as_arc(&self) -> &Arc<Node> {
        &self.0
    }

    pub fn id(&self) -> usize {
        Node::id(self)
    }

    pub fn flags(&self) -> Flags {
        self.0.flags
    }

    /// Number of live handles to this record, plus one if the hash-cons
    /// table (or a process-wide singleton slot) still holds it. Exposed for
    /// diagnostics and for the reference-count concurrency property: four
    /// workers churning transient trees through `X()` must leave its count
    /// back at baseline.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl Deref for Handle {
    type Target = Node;
    fn deref(&self) -> &Node {
        &self.0
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Handle {}

impl Hash for Handle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Node::id(self).hash(state)
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({:#x})", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_union_and_contains() {
        let f = Flags::HAS_XYZ | Flags::HAS_REMAP;
        assert!(f.has_xyz());
        assert!(f.has_remap());
        assert!(!f.has_oracle());
    }
}
