//! Compiled code of a scripted function.

use std::mem::size_of;

use crate::value::{ByteBuffer, UintBuffer};

use super::opcode::Opcode;

/// The bytecode of one function, with a source line per byte.
#[derive(Debug, Clone, Default)]
pub struct FnCode {
    /// The bytecode instructions.
    pub opcodes: ByteBuffer,
    /// Source line numbers, parallel to `opcodes`.
    pub oplines: UintBuffer,
    /// Maximum stack slots the function needs above its base.
    pub stack_size: usize,
}

impl FnCode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current offset (index of the next byte).
    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    /// Append one byte and record its source line.
    pub fn emit_byte(&mut self, byte: u8, line: u32) -> usize {
        let offset = self.opcodes.len();
        self.opcodes.write(byte);
        self.oplines.write(line);
        offset
    }

    pub fn emit_op(&mut self, op: Opcode, line: u32) -> usize {
        self.emit_byte(op as u8, line)
    }

    /// Append a big-endian short; returns the offset of its first byte.
    pub fn emit_short(&mut self, value: u16, line: u32) -> usize {
        let offset = self.emit_byte((value >> 8) as u8, line);
        self.emit_byte((value & 0xff) as u8, line);
        offset
    }

    pub fn patch_short(&mut self, offset: usize, value: u16) {
        self.opcodes[offset] = (value >> 8) as u8;
        self.opcodes[offset + 1] = (value & 0xff) as u8;
    }

    pub fn read_short(&self, offset: usize) -> u16 {
        ((self.opcodes[offset] as u16) << 8) | self.opcodes[offset + 1] as u16
    }

    /// Source line of the byte at `offset`.
    pub fn line_at(&self, offset: usize) -> u32 {
        match self.oplines.get(offset) {
            Some(line) => *line,
            None => self.oplines.last().copied().unwrap_or(0),
        }
    }

    pub fn size(&self) -> usize {
        self.opcodes.capacity() + self.oplines.capacity() * size_of::<u32>()
    }
}
