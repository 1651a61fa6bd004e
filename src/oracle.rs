//! Oracle clause trait and deserialisation registry.
//!
//! The core treats oracle clauses as opaque, identity-compared leaves. It
//! never inspects their semantics — only their tag (for printing and
//! deserialisation dispatch) and their callbacks (for serialisation).

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::OracleError;

/// Capability set required of a user-supplied oracle clause.
///
/// Two `Oracle` nodes compare equal only when their clauses are the same
/// `Arc` allocation — `OracleClause` itself has no `PartialEq`
/// requirement, since the core never compares clauses structurally.
pub trait OracleClause: Send + Sync + std::fmt::Debug {
    /// Textual tag, used both by the printer (`'tag`) and as the
    /// registry key on deserialise.
    fn tag(&self) -> &str;

    /// Clone the clause into a fresh, independently-owned trait object.
    /// Note this does NOT create a node that compares equal to the
    /// original: clause identity is `Arc` pointer identity, and this
    /// produces a new `Arc`.
    fn clone_clause(&self) -> Arc<dyn OracleClause>;

    /// Append this clause's serialised payload (not including its tag,
    /// which the registry writes) to `out`.
    fn serialize(&self, out: &mut Vec<u8>);
}

/// Deserialisation constructor for one oracle tag: payload bytes in, a fresh
/// clause out.
pub type OracleFactory = fn(&[u8]) -> Result<(Arc<dyn OracleClause>, usize), OracleError>;

/// Maps oracle tags to the factory that can rebuild a clause of that kind.
///
/// Passed explicitly to [`crate::deserialise`] rather than held in a process
/// global, so a host program's oracle catalogue is always visible at the
/// call site.
#[derive(Default, Clone)]
pub struct OracleRegistry {
    factories: HashMap<String, OracleFactory>,
}

impl OracleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tag: impl Into<String>, factory: OracleFactory) {
        self.factories.insert(tag.into(), factory);
    }

    pub(crate) fn lookup(&self, tag: &str) -> Option<OracleFactory> {
        self.factories.get(tag).copied()
    }
}
