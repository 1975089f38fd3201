// This module provides CompilationContext, the explicit per-function state threaded through
// every encoding call. It owns the function's SymbolTable (which carries the monotonic frame
// size used for addressing), the live-frame counter (bits allocated and not yet released, used
// by STACK_FREE_FUNC), and borrows the pass-1 layouts needed to turn block indices and callee
// names into displacements. A fresh context is created for each function and dropped once its
// bytes are emitted, so nothing leaks between functions or between repeated compilations.
// liveFrame starts at zero on function entry and STACK_FREE_FUNC returns it to zero; there is
// no notion of nested scopes. STACK_SAVE pushes a saved frame pointer between slots, so the
// context records the frame size at every outstanding save and counts the saves that sit
// between a slot and the stack pointer when turning a frame offset into an rsp distance.

//! Per-function compilation state.

use crate::core::error::{CompileError, CompileResult, IrError};
use crate::core::layout::{BlockLayout, ModuleLayout};
use crate::core::symbols::SymbolTable;

/// Size of a pushed rbp.
const SAVED_FRAME_BITS: i64 = 64;

/// State for compiling exactly one function.
#[derive(Debug)]
pub struct CompilationContext<'a> {
    function: &'a str,
    symbols: SymbolTable,
    live_frame: i64,
    /// Frame size at each outstanding STACK_SAVE, innermost last.
    saved_frames: Vec<i64>,
    blocks: &'a BlockLayout,
    module: &'a ModuleLayout,
    base_offset: usize,
}

impl<'a> CompilationContext<'a> {
    /// Create a context for `function`, which starts at `base_offset` in the module.
    pub fn new(
        function: &'a str,
        blocks: &'a BlockLayout,
        module: &'a ModuleLayout,
        base_offset: usize,
    ) -> Self {
        Self {
            function,
            symbols: SymbolTable::new(),
            live_frame: 0,
            saved_frames: Vec::new(),
            blocks,
            module,
            base_offset,
        }
    }

    pub fn function_name(&self) -> &'a str {
        self.function
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    /// Total bits ever allocated in this function.
    pub fn frame_size(&self) -> i64 {
        self.symbols.frame_size()
    }

    /// Bits allocated and not yet released.
    pub fn live_frame(&self) -> i64 {
        self.live_frame
    }

    /// Reserve a frame slot of `bits` for `name` and return its frame offset.
    pub fn allocate(&mut self, name: &str, bits: i32) -> CompileResult<i64> {
        if bits <= 0 || bits % 8 != 0 {
            return Err(CompileError::InvalidAllocationSize {
                name: name.to_string(),
                bits,
            });
        }
        let offset = self.symbols.declare(name, i64::from(bits))?;
        self.live_frame += i64::from(bits);
        Ok(offset)
    }

    /// Release every live bit and return how many were released.
    pub fn release_frame(&mut self) -> i64 {
        std::mem::take(&mut self.live_frame)
    }

    /// Record a 64-bit frame pointer pushed below every slot allocated so far.
    pub fn save_frame(&mut self) {
        self.saved_frames.push(self.frame_size());
    }

    /// Pop the innermost saved frame pointer.
    pub fn load_frame(&mut self) -> CompileResult<()> {
        self.saved_frames
            .pop()
            .map(|_| ())
            .ok_or(CompileError::UnmatchedStackLoad)
    }

    /// Bits between the stack pointer and the frame location `offset`.
    pub fn stack_distance(&self, offset: i64) -> i64 {
        let saves_below = self
            .saved_frames
            .iter()
            .filter(|&&saved_at| offset <= saved_at)
            .count() as i64;
        self.frame_size() - offset + saves_below * SAVED_FRAME_BITS
    }

    /// Module offset of the function's first byte.
    pub fn base_offset(&self) -> usize {
        self.base_offset
    }

    /// Displacement from `next_offset` (function relative) to the start of block `target`.
    pub fn block_displacement(&self, target: i32, next_offset: usize) -> CompileResult<i64> {
        let start = usize::try_from(target)
            .ok()
            .and_then(|index| self.blocks.block_offset(index))
            .ok_or_else(|| IrError::InvalidBlockTarget {
                function: self.function.to_string(),
                block: self.block_at(next_offset),
                target: i64::from(target),
                block_count: self.blocks.block_count(),
            })?;
        Ok(start as i64 - next_offset as i64)
    }

    /// Displacement from `next_offset` (function relative) to the start of `callee`.
    pub fn call_displacement(&self, callee: &str, next_offset: usize) -> CompileResult<i64> {
        let target = self.module.function_offset(callee)?;
        Ok(target as i64 - (self.base_offset + next_offset) as i64)
    }

    // Index of the block containing `offset`, for error reporting.
    fn block_at(&self, offset: usize) -> usize {
        self.blocks
            .offsets()
            .iter()
            .rposition(|&start| start < offset)
            .unwrap_or(0)
    }
}
