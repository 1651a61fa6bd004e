//! Hash-cons table and the process-wide axis singletons.
//!
//! The table is a process-wide, thread-safe map from a structural key to a
//! weak back-reference to the interned node. It is not an owner: entries are
//! erased by [`detach`] when the last external handle to a node is dropped
//! (called from `Node`'s destructor). `make_or_get` holds the table's lock
//! across the whole lookup-or-insert so two threads racing to build the same
//! structural key both observe the same record's linearisability
//! requirement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::node::{Flags, Handle, Node, NodeKind};
use crate::op::{BinaryOp, UnaryOp};

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub(crate) enum StructuralKey {
    Constant(u32),
    VarX,
    VarY,
    VarZ,
    Unary(UnaryOp, usize),
    Binary(BinaryOp, usize, usize),
    Remap(usize, usize, usize, usize),
    ConstVar(usize),
}

lazy_static::lazy_static! {
    static ref TABLE: Mutex<HashMap<StructuralKey, Weak<Node>>> = Mutex::new(HashMap::new());
}

/// Atomically looks up `key` in the table; on a hit, upgrades the existing
/// weak reference and returns a new handle to the *same* record. On a miss,
/// builds a fresh node via `build`, interns it, and returns a handle to it.
///
/// The whole lookup/build/insert sequence runs under one lock acquisition,
/// which is what makes `make` atomic with respect to concurrent callers
/// constructing the same key.
pub(crate) fn make_or_get(key: StructuralKey, build: impl FnOnce() -> Node) -> Handle {
    let mut table = TABLE.lock();
    if let Some(weak) = table.get(&key) {
        if let Some(arc) = weak.upgrade() {
            log::trace!("hash-cons hit");
            return Handle::from_arc(arc);
        }
    }
    log::trace!("hash-cons miss, allocating");
    let node = Arc::new(build());
    table.insert(key, Arc::downgrade(&node));
    Handle::from_arc(node)
}

fn addr(h: &Handle) -> usize {
    Node::id(h)
}

pub(crate) fn structural_key(node: &Node) -> Option<StructuralKey> {
    match &node.kind {
        NodeKind::Constant(v) => Some(StructuralKey::Constant(v.to_bits())),
        NodeKind::VarX => Some(StructuralKey::VarX),
        NodeKind::VarY => Some(StructuralKey::VarY),
        NodeKind::VarZ => Some(StructuralKey::VarZ),
        NodeKind::VarFree(_) | NodeKind::Oracle(_) => None,
        NodeKind::Unary(op) => Some(StructuralKey::Unary(*op, addr(node.child(0)))),
        NodeKind::Binary(op) => {
            Some(StructuralKey::Binary(*op, addr(node.child(0)), addr(node.child(1))))
        },
        NodeKind::Remap => Some(StructuralKey::Remap(
            addr(node.child(0)),
            addr(node.child(1)),
            addr(node.child(2)),
            addr(node.child(3)),
        )),
        NodeKind::ApplyConstVars => Some(StructuralKey::ConstVar(addr(node.child(0)))),
    }
}

/// Removes `node`'s entry from the table, if any, the first time it is
/// called for a given node (idempotent — see the comment in
/// `impl Drop for Node`). `VarFree` and `Oracle` nodes never had an entry
/// (they bypass interning) so this is a no-op for them.
///
/// `addr` is the record's address as captured from its `Handle` (`Node::id`)
/// while its `Arc` was still intact. It must be passed in rather than derived
/// from `node as *const Node`: the caller may be holding a `Node` that
/// `Arc::try_unwrap` has already moved out of its original heap allocation,
/// in which case `node`'s own address no longer matches the table's stored
/// `Weak` pointer.
pub(crate) fn detach(node: &Node, addr: usize) {
    if node.mark_detached() {
        return;
    }
    let Some(key) = structural_key(node) else { return };
    let mut table = TABLE.lock();
    if let Some(weak) = table.get(&key) {
        if weak.as_ptr() as *const () as usize == addr {
            table.remove(&key);
        }
    }
}

/// Current number of live hash-cons entries. Exposed for tests exercising
/// the reference-count concurrency property.
#[cfg(test)]
pub(crate) fn table_len() -> usize {
    TABLE.lock().len()
}

// AXIS SINGLETONS
// ================================================================================================

lazy_static::lazy_static! {
    static ref AXIS_X: Handle = Handle::from_arc(Arc::new(Node::new(
        NodeKind::VarX,
        Vec::new(),
        Flags::HAS_XYZ,
        fnv1a(&[0, 1]),
    )));
    static ref AXIS_Y: Handle = Handle::from_arc(Arc::new(Node::new(
        NodeKind::VarY,
        Vec::new(),
        Flags::HAS_XYZ,
        fnv1a(&[0, 2]),
    )));
    static ref AXIS_Z: Handle = Handle::from_arc(Arc::new(Node::new(
        NodeKind::VarZ,
        Vec::new(),
        Flags::HAS_XYZ,
        fnv1a(&[0, 3]),
    )));
}

pub(crate) fn axis_x() -> Handle {
    AXIS_X.clone()
}
pub(crate) fn axis_y() -> Handle {
    AXIS_Y.clone()
}
pub(crate) fn axis_z() -> Handle {
    AXIS_Z.clone()
}

static NEXT_FREE_VAR_ID: AtomicU64 = AtomicU64::new(0);

/// Allocates a fresh free-variable identity.
pub(crate) fn next_free_var_id() -> u64 {
    NEXT_FREE_VAR_ID.fetch_add(1, Ordering::Relaxed)
}

/// Simple, dependency-free structural hash combiner. Not load-bearing for correctness — `HashMap`'s own hashing
/// of `StructuralKey` is what the table actually relies on — but kept as a
/// first-class `Node` attribute and exposed for diagnostics.
pub(crate) fn fnv1a(words: &[u64]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for &word in words {
        for byte in word.to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(PRIME);
        }
    }
    hash
}
