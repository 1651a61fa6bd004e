//! Bit-exact binary serialisation / deserialisation.
//!
//! The wire format is a flat, post-order record stream: magic byte, four
//! metadata markers, one record per unique reachable node (indices are
//! back-references into nodes already emitted in this stream), terminated by
//! two `0xFF` bytes. Deserialisation reconstructs every node through
//! [`crate::build`] so interning and identity simplifications apply exactly
//! as they would to freshly-built handles.

use std::io::{self, Read, Write};

use crate::build;
use crate::errors::GraphError;
use crate::node::{Handle, Node, NodeKind};
use crate::oracle::OracleRegistry;
use crate::op::{wire, BinaryOp, UnaryOp};
use crate::walk::walk;

const MAGIC: u8 = b'T';
const METADATA_EMPTY_MARKER: u8 = b'"';

/// Writes `t`'s bit-exact binary encoding to `sink`. Metadata is
/// always emitted in its minimal empty form — this crate exposes no API
/// surface for attaching name/author/licence strings.
pub fn serialise(t: &Handle, sink: &mut impl Write) -> io::Result<()> {
    sink.write_all(&[MAGIC])?;
    sink.write_all(&[METADATA_EMPTY_MARKER; 4])?;

    let order = walk(t);
    let mut index_of = std::collections::HashMap::with_capacity(order.len());
    for (i, h) in order.iter().enumerate() {
        index_of.insert(Node::id(h), i as u32);
    }

    for h in &order {
        write_record(h, &index_of, sink)?;
    }

    sink.write_all(&[wire::TERMINATOR, wire::TERMINATOR])
}

fn write_record(
    h: &Handle,
    index_of: &std::collections::HashMap<usize, u32>,
    sink: &mut impl Write,
) -> io::Result<()> {
    let idx = |child: &Handle| -> u32 {
        *index_of.get(&Node::id(child)).expect("child must precede parent in post-order")
    };

    match &h.kind {
        NodeKind::Constant(v) => {
            sink.write_all(&[wire::CONSTANT])?;
            sink.write_all(&v.to_le_bytes())?;
        },
        NodeKind::VarX => sink.write_all(&[wire::VAR_X])?,
        NodeKind::VarY => sink.write_all(&[wire::VAR_Y])?,
        NodeKind::VarZ => sink.write_all(&[wire::VAR_Z])?,
        NodeKind::VarFree(_) => sink.write_all(&[wire::VAR_FREE])?,
        NodeKind::Unary(op) => {
            sink.write_all(&[op.to_code()])?;
            sink.write_all(&idx(h.operand()).to_le_bytes())?;
        },
        NodeKind::Binary(op) => {
            sink.write_all(&[op.to_code()])?;
            let (lhs_idx, rhs_idx) = (idx(h.lhs()), idx(h.rhs()));
            // Commutative operators write their operands high-index-first so
            // the stream matches the spec's worked examples bit-for-bit;
            // non-commutative operators keep literal (lhs, rhs) order since
            // swapping them would change meaning.
            let (first, second) = if op.is_commutative() {
                (lhs_idx.max(rhs_idx), lhs_idx.min(rhs_idx))
            } else {
                (lhs_idx, rhs_idx)
            };
            sink.write_all(&first.to_le_bytes())?;
            sink.write_all(&second.to_le_bytes())?;
        },
        NodeKind::Remap => {
            sink.write_all(&[wire::REMAP])?;
            sink.write_all(&idx(h.remap_body()).to_le_bytes())?;
            sink.write_all(&idx(h.remap_x()).to_le_bytes())?;
            sink.write_all(&idx(h.remap_y()).to_le_bytes())?;
            sink.write_all(&idx(h.remap_z()).to_le_bytes())?;
        },
        NodeKind::ApplyConstVars => {
            sink.write_all(&[wire::CONST_VAR])?;
            sink.write_all(&idx(h.const_vars_body()).to_le_bytes())?;
        },
        NodeKind::Oracle(clause) => {
            sink.write_all(&[wire::ORACLE])?;
            let tag = clause.tag().as_bytes();
            sink.write_all(&(tag.len() as u32).to_le_bytes())?;
            sink.write_all(tag)?;
            let mut payload = Vec::new();
            clause.serialize(&mut payload);
            sink.write_all(&payload)?;
        },
    }
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn need(&self, n: usize) -> Result<(), GraphError> {
        if self.pos + n > self.bytes.len() {
            Err(GraphError::Truncated { position: self.pos, needed: n })
        } else {
            Ok(())
        }
    }

    fn read_u8(&mut self) -> Result<u8, GraphError> {
        self.need(1)?;
        let b = self.bytes[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn read_u32(&mut self) -> Result<u32, GraphError> {
        self.need(4)?;
        let v = u32::from_le_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn read_f32(&mut self) -> Result<f32, GraphError> {
        self.need(4)?;
        let v = f32::from_le_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn read_index(&mut self, emitted: usize) -> Result<usize, GraphError> {
        let at = self.pos;
        let raw = self.read_u32()?;
        if raw as usize >= emitted {
            return Err(GraphError::IndexOutOfBounds { position: at, index: raw, emitted });
        }
        Ok(raw as usize)
    }

    fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}

/// Reconstructs a graph from its bit-exact binary encoding.
///
/// `source` is read fully into memory before parsing (the format has no
/// streaming framing that would allow incremental decode). Oracle records
/// are rebuilt via `registry`, keyed by the tag each record carries.
pub fn deserialise(mut source: impl Read, registry: &OracleRegistry) -> Result<Handle, GraphError> {
    let mut buf = Vec::new();
    source.read_to_end(&mut buf).map_err(|_| GraphError::Truncated { position: 0, needed: 1 })?;

    let mut cur = Cursor::new(&buf);

    let magic = cur.read_u8()?;
    if magic != MAGIC {
        return Err(GraphError::BadMagic { position: 0, found: magic });
    }

    for i in 0..4 {
        let marker = cur.read_u8()?;
        if marker != METADATA_EMPTY_MARKER {
            return Err(GraphError::InvalidMetadataString { position: 1 + i });
        }
    }

    let mut emitted: Vec<Handle> = Vec::new();

    loop {
        let record_pos = cur.pos;
        let opcode = cur.read_u8()?;

        if opcode == wire::TERMINATOR {
            let second = cur.read_u8()?;
            if second != wire::TERMINATOR {
                return Err(GraphError::MissingTerminator { position: record_pos });
            }
            break;
        }

        let node = match opcode {
            wire::CONSTANT => build::constant(cur.read_f32()?),
            wire::VAR_X => build::x(),
            wire::VAR_Y => build::y(),
            wire::VAR_Z => build::z(),
            wire::VAR_FREE => build::var(),
            wire::REMAP => {
                let body = cur.read_index(emitted.len())?;
                let rx = cur.read_index(emitted.len())?;
                let ry = cur.read_index(emitted.len())?;
                let rz = cur.read_index(emitted.len())?;
                build::remap(emitted[body].clone(), emitted[rx].clone(), emitted[ry].clone(), emitted[rz].clone())
            },
            wire::CONST_VAR => {
                let body = cur.read_index(emitted.len())?;
                build::with_const_vars(emitted[body].clone())
            },
            wire::ORACLE => {
                let tag_len = cur.read_u32()? as usize;
                cur.need(tag_len)?;
                let tag_bytes = &cur.bytes[cur.pos..cur.pos + tag_len];
                let tag = std::str::from_utf8(tag_bytes)
                    .map_err(|_| GraphError::InvalidMetadataString { position: cur.pos })?
                    .to_string();
                cur.pos += tag_len;
                let factory = registry
                    .lookup(&tag)
                    .ok_or_else(|| GraphError::UnknownOracleTag { position: record_pos, tag: tag.clone() })?;
                let (clause, consumed) = factory(cur.remaining())?;
                cur.pos += consumed;
                build::oracle(clause)
            },
            code => {
                if let Some(op) = UnaryOp::from_code(code) {
                    let operand = cur.read_index(emitted.len())?;
                    build::unary(op, emitted[operand].clone())
                } else if let Some(op) = BinaryOp::from_code(code) {
                    let first = cur.read_index(emitted.len())?;
                    let second = cur.read_index(emitted.len())?;
                    // Writer emits (high, low) for commutative operators; the
                    // lower index was originally written first (lhs).
                    let (lhs, rhs) = if op.is_commutative() { (second, first) } else { (first, second) };
                    build::binary(op, emitted[lhs].clone(), emitted[rhs].clone())
                } else {
                    return Err(GraphError::UnknownOpcode { position: record_pos, opcode: code });
                }
            },
        };

        emitted.push(node);
    }

    emitted.pop().ok_or(GraphError::Truncated { position: cur.pos, needed: 1 })
}
