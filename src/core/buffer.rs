//! Append-only byte buffer that receives encoded machine code.
//!
//! All emission goes through [`BytecodeBuffer::append`]; nothing writes to an
//! absolute index. Offsets returned by earlier appends stay valid because the
//! buffer only grows, by reallocating and copying.

use crate::core::error::{CompileError, CompileResult};

/// Capacity of a freshly created buffer.
pub const INITIAL_CAPACITY: usize = 1024;

/// Growable sequence of encoded bytes with a write cursor at its end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BytecodeBuffer {
    bytes: Vec<u8>,
}

impl BytecodeBuffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    /// Append bytes and return the offset of the first one.
    pub fn append(&mut self, bytes: &[u8]) -> CompileResult<usize> {
        let offset = self.bytes.len();
        let required = offset
            .checked_add(bytes.len())
            .ok_or(CompileError::BufferGrowthFailure {
                requested: usize::MAX,
            })?;
        if required > self.bytes.capacity() {
            self.grow(required)?;
        }
        self.bytes.extend_from_slice(bytes);
        Ok(offset)
    }

    pub fn push_u8(&mut self, value: u8) -> CompileResult<usize> {
        self.append(&[value])
    }

    /// Append `value` until the length is a multiple of `alignment`.
    pub fn pad_to(&mut self, alignment: usize, value: u8) -> CompileResult<usize> {
        let offset = self.bytes.len();
        if alignment > 1 {
            let padding = (alignment - offset % alignment) % alignment;
            for _ in 0..padding {
                self.push_u8(value)?;
            }
        }
        Ok(self.bytes.len())
    }

    // Doubling growth keeps the sequence of capacities deterministic.
    fn grow(&mut self, required: usize) -> CompileResult<()> {
        let mut target = self.bytes.capacity().max(INITIAL_CAPACITY);
        while target < required {
            target = target
                .checked_mul(2)
                .ok_or(CompileError::BufferGrowthFailure { requested: required })?;
        }

        self.bytes
            .try_reserve_exact(target - self.bytes.len())
            .map_err(|_| CompileError::BufferGrowthFailure { requested: target })?;
        log::trace!("bytecode buffer grown to {} bytes", self.bytes.capacity());
        Ok(())
    }

    /// Offset at which the next byte will be written.
    pub fn current_offset(&self) -> usize {
        self.bytes.len()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
