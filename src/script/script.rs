//! The script byte string
//!
//! Scripts are opaque byte strings iterated one operation at a time,
//! where an operation is either a bare opcode or a data push. Shape
//! checks walk operations in order; there is no general interpreter.

use super::opcodes::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One parsed script operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOp<'a> {
    /// A bare opcode byte
    Op(u8),
    /// A data push (the push marker is consumed with the data)
    Push(&'a [u8]),
}

impl<'a> ScriptOp<'a> {
    /// The opcode byte, or None for a push
    pub fn opcode(&self) -> Option<u8> {
        match self {
            ScriptOp::Op(op) => Some(*op),
            ScriptOp::Push(_) => None,
        }
    }

    /// The pushed data, or None for a bare opcode
    pub fn data(&self) -> Option<&'a [u8]> {
        match self {
            ScriptOp::Op(_) => None,
            ScriptOp::Push(data) => Some(data),
        }
    }
}

/// An opaque script byte string
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn new() -> Self {
        Script(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Append a bare opcode
    pub fn push_op(mut self, op: u8) -> Self {
        self.0.push(op);
        self
    }

    /// Append a data push
    pub fn push_data(mut self, data: &[u8]) -> Self {
        if data.len() <= MAX_DIRECT_PUSH as usize {
            self.0.push(data.len() as u8);
        } else {
            debug_assert!(data.len() <= u8::MAX as usize);
            self.0.push(OP_PUSHDATA1);
            self.0.push(data.len() as u8);
        }
        self.0.extend_from_slice(data);
        self
    }

    /// Append a scriptnum push
    pub fn push_num(self, value: i64) -> Self {
        let bytes = script_num_encode(value);
        self.push_data(&bytes)
    }

    /// Iterate operations front to back
    pub fn ops(&self) -> ScriptIter<'_> {
        ScriptIter { script: &self.0, pos: 0 }
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", hex::encode(&self.0))
    }
}

/// Cursor over a script's operations
pub struct ScriptIter<'a> {
    script: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for ScriptIter<'a> {
    type Item = ScriptOp<'a>;

    fn next(&mut self) -> Option<ScriptOp<'a>> {
        if self.pos >= self.script.len() {
            return None;
        }

        let byte = self.script[self.pos];
        self.pos += 1;

        // 0x00 is an empty push, 0x01..=0x4b direct pushes, OP_PUSHDATA1 length-prefixed
        let push_len = if byte <= MAX_DIRECT_PUSH {
            Some(byte as usize)
        } else if byte == OP_PUSHDATA1 {
            let len = *self.script.get(self.pos)? as usize;
            self.pos += 1;
            Some(len)
        } else {
            None
        };

        match push_len {
            Some(len) => {
                if self.pos + len > self.script.len() {
                    // Truncated push ends iteration
                    self.pos = self.script.len();
                    return None;
                }
                let data = &self.script[self.pos..self.pos + len];
                self.pos += len;
                Some(ScriptOp::Push(data))
            }
            None => Some(ScriptOp::Op(byte)),
        }
    }
}
