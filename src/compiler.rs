// This module drives the two-pass backend over whole functions and modules. Pass 1 is the
// ModuleLayout/BlockLayout computation: every instruction's length comes from the static opcode
// table, giving the start offset of each block inside its function and of each function inside
// the module's code blob (functions are aligned and padded with INT3). Pass 2 walks the blocks in
// the same order with a fresh CompilationContext per function, handing each instruction to the
// x64 encoder, which resolves branch and call displacements against the pass-1 offsets. Any
// failure aborts the function and is returned with the function's name attached; nothing
// partial is kept. Module results (code, names, block offset tables) live in the session arena.

//! Function and module compilation.
//!
//! ```ignore
//! use quickfall::{compile_module, CompilationSession, CompileOptions};
//! use bumpalo::Bump;
//!
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let compiled = compile_module(&module, &session, &CompileOptions::default())?;
//! let entry = compiled.function_offset("main")?;
//! ```

use crate::core::{
    BytecodeBuffer, CompilationContext, CompilationSession, CompileError, CompileResult,
    FunctionSlot, ModuleLayout,
};
use crate::ir::{Function, Module};
use crate::x64::encode_instruction;

/// Filler between functions (INT3).
pub const PADDING_BYTE: u8 = 0xCC;

/// Options for module compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Byte alignment of every function start.
    pub function_alignment: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            function_alignment: 16,
        }
    }
}

/// Placement of one compiled function inside [`CompiledModule::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledFunction<'arena> {
    /// Function name.
    pub name: &'arena str,

    /// Offset of the first byte of block 0.
    pub offset: usize,

    /// Size of the function's code, without trailing padding.
    pub len: usize,

    /// Start offset of every block, relative to `offset`.
    pub block_offsets: &'arena [usize],
}

/// Machine code for a module plus the placement of each function.
#[derive(Debug, Clone)]
pub struct CompiledModule<'arena> {
    pub code: &'arena [u8],
    pub functions: Vec<CompiledFunction<'arena>>,
}

impl<'arena> CompiledModule<'arena> {
    pub fn function(&self, name: &str) -> Option<&CompiledFunction<'arena>> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Offset of `name` in the code, or `UnknownFunction`.
    pub fn function_offset(&self, name: &str) -> CompileResult<usize> {
        self.function(name)
            .map(|f| f.offset)
            .ok_or_else(|| CompileError::UnknownFunction {
                name: name.to_string(),
            })
    }

    /// Bytes of the named function.
    pub fn function_code(&self, name: &str) -> Option<&'arena [u8]> {
        let code = self.code;
        self.function(name).map(|f| &code[f.offset..f.offset + f.len])
    }
}

/// Compile a lone function to machine code starting at offset 0.
///
/// `CALL` may only target the function itself.
pub fn compile_function(function: &Function) -> CompileResult<Vec<u8>> {
    let layout = ModuleLayout::single(function);
    let slot = layout
        .function(function.name())
        .ok_or_else(|| CompileError::UnknownFunction {
            name: function.name().to_string(),
        })?;
    encode_function(function, slot, &layout, None).map_err(|e| e.in_function(function.name()))
}

/// Compile every function of `module` into one contiguous code blob.
pub fn compile_module<'arena>(
    module: &Module,
    session: &CompilationSession<'arena>,
    options: &CompileOptions,
) -> CompileResult<CompiledModule<'arena>> {
    let layout = ModuleLayout::compute(module, options.function_alignment)?;
    log::debug!(
        "laid out {} functions in {} bytes",
        layout.functions().len(),
        layout.code_size()
    );

    let mut code = BytecodeBuffer::with_capacity(layout.code_size());
    let mut functions = Vec::with_capacity(module.len());

    for (function, slot) in module.functions().iter().zip(layout.functions()) {
        code.pad_to(options.function_alignment, PADDING_BYTE)?;
        debug_assert_eq!(code.current_offset(), slot.offset);

        let bytes = encode_function(function, slot, &layout, Some(session))
            .map_err(|e| e.in_function(function.name()))?;
        code.append(&bytes)?;
        session.record_function_compiled(function.name(), bytes.len());

        functions.push(CompiledFunction {
            name: session.intern_str(function.name()),
            offset: slot.offset,
            len: bytes.len(),
            block_offsets: session.alloc_slice(slot.blocks.offsets()),
        });
    }

    log::debug!("{}", session.stats());
    Ok(CompiledModule {
        code: session.alloc_slice(code.as_bytes()),
        functions,
    })
}

// Pass 2 for one function.
fn encode_function(
    function: &Function,
    slot: &FunctionSlot,
    layout: &ModuleLayout,
    session: Option<&CompilationSession<'_>>,
) -> CompileResult<Vec<u8>> {
    function.validate()?;
    log::debug!("compiling `{}` at {:#x}", function.name(), slot.offset);

    let mut ctx = CompilationContext::new(function.name(), &slot.blocks, layout, slot.offset);
    let mut buf = BytecodeBuffer::with_capacity(slot.blocks.code_size());

    for (index, block) in function.blocks().iter().enumerate() {
        debug_assert_eq!(slot.blocks.block_offset(index), Some(buf.current_offset()));
        log::trace!("block @{index} at {:#06x}", buf.current_offset());

        for instruction in block.instructions() {
            encode_instruction(instruction, &mut ctx, &mut buf)?;
            if let Some(session) = session {
                session.record_instruction_compiled(instruction.opcode());
            }
        }
    }

    debug_assert_eq!(buf.len(), slot.blocks.code_size());
    Ok(buf.into_bytes())
}
