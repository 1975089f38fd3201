// This module implements the per-function symbol table that maps stack-slot names to their
// frame locations. SymbolTable owns the monotonic frame-size counter: every declare() bumps it by
// the slot size in bits and binds the name to the post-bump value, so the first 32-bit slot
// lives at offset 32 and later slots sit strictly deeper. Offsets are measured downward from the
// frame base, like the stack itself. Each frame binding also remembers how many bits it covers,
// so the encoder can refuse accesses that would spill into a neighbouring slot. Besides frame
// slots, a name can be bound to an absolute address (PTR_DEC) or derived from another name plus
// a constant (PTR_DEC_OFF). Lookups go through a keyed hashbrown map compared by string
// equality, never by trusting a hash value. Names are declared at most once per function and
// are never removed mid-function.

//! Per-function symbol table for named stack slots.

use crate::core::error::{CompileError, CompileResult};
use crate::ir::Variable;
use hashbrown::HashMap;

/// Where a name lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Bits below the frame base.
    Frame(i64),
    /// Absolute address.
    Absolute(i64),
}

impl Location {
    /// The same kind of location moved by `extra`.
    pub fn offset_by(self, extra: i64) -> Self {
        match self {
            Location::Frame(offset) => Location::Frame(offset + extra),
            Location::Absolute(address) => Location::Absolute(address + extra),
        }
    }
}

/// A resolved name together with its extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub location: Location,
    /// Bits from `location` to the end of the enclosing frame slot. `None` for absolute
    /// bindings and for views that start outside the slot they were derived from.
    pub bits: Option<i64>,
}

impl Slot {
    fn frame(offset: i64, bits: i64) -> Self {
        Slot {
            location: Location::Frame(offset),
            bits: Some(bits),
        }
    }

    fn absolute(address: i64) -> Self {
        Slot {
            location: Location::Absolute(address),
            bits: None,
        }
    }

    /// Move the view by `extra` bits. A negative `extra` moves toward the frame base, which is
    /// toward higher addresses inside the same slot.
    pub fn offset_by(self, extra: i64) -> Self {
        let bits = match self.location {
            Location::Frame(_) => self.bits.and_then(|bits| {
                let left = bits + extra;
                (extra <= 0 && left > 0).then_some(left)
            }),
            Location::Absolute(_) => None,
        };
        Slot {
            location: self.location.offset_by(extra),
            bits,
        }
    }
}

/// Name to location mapping for one function scope.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, Slot>,
    frame_size: i64,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bits ever allocated in this scope.
    pub fn frame_size(&self) -> i64 {
        self.frame_size
    }

    /// Reserve `size_bits` on the frame and bind `name` to the new slot.
    pub fn declare(&mut self, name: &str, size_bits: i64) -> CompileResult<i64> {
        self.ensure_free(name)?;
        self.frame_size += size_bits;
        self.symbols
            .insert(name.to_string(), Slot::frame(self.frame_size, size_bits));
        log::trace!("declared `{}` at frame offset {}", name, self.frame_size);
        Ok(self.frame_size)
    }

    /// Bind `name` to `base`'s location plus `extra_offset`.
    pub fn declare_derived(
        &mut self,
        name: &str,
        base: &str,
        extra_offset: i64,
    ) -> CompileResult<Location> {
        let slot = self.lookup(base)?.offset_by(extra_offset);
        self.ensure_free(name)?;
        self.symbols.insert(name.to_string(), slot);
        Ok(slot.location)
    }

    /// Bind `name` to an absolute address.
    pub fn declare_absolute(&mut self, name: &str, address: i64) -> CompileResult<Location> {
        self.ensure_free(name)?;
        let slot = Slot::absolute(address);
        self.symbols.insert(name.to_string(), slot);
        Ok(slot.location)
    }

    /// Resolve `name` or `name,N`, adding the literal `N` after lookup.
    pub fn resolve(&self, text: &str) -> CompileResult<Location> {
        match text.split_once(',') {
            Some((name, extra)) => {
                let extra: i64 = extra.trim().parse().map_err(|_| CompileError::UnknownSymbol {
                    name: text.to_string(),
                })?;
                Ok(self.lookup(name.trim())?.offset_by(extra).location)
            }
            None => Ok(self.lookup(text.trim())?.location),
        }
    }

    /// Resolve an IR variable reference.
    pub fn resolve_variable(&self, var: &Variable) -> CompileResult<Location> {
        Ok(self.slot(var)?.location)
    }

    /// Resolve an IR variable reference along with the bits it may touch.
    pub fn slot(&self, var: &Variable) -> CompileResult<Slot> {
        let slot = self.lookup(&var.name)?;
        Ok(slot.offset_by(var.offset.map_or(0, i64::from)))
    }

    fn lookup(&self, name: &str) -> CompileResult<Slot> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::UnknownSymbol {
                name: name.to_string(),
            })
    }

    fn ensure_free(&self, name: &str) -> CompileResult<()> {
        if self.symbols.contains_key(name) {
            return Err(CompileError::DuplicateSymbol {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
