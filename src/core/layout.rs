// This module implements the first pass of the two-pass encoder: block and function layout.
// Branch encodings need the byte distance to their target block, and that distance depends on
// the encoded length of every instruction in between, including blocks that have not been
// visited yet. Because every opcode has a fixed encoded length (see Opcode::encoded_len), the
// layout can be computed from the IR alone. BlockLayout records, for one function, the byte
// offset at which each block starts relative to the function's first byte. ModuleLayout places
// every function of a module in one code blob, aligning function starts and resolving function
// names to offsets for CALL. The second pass re-traverses the blocks in the same order and must
// land on exactly these offsets.

//! Pass 1: block and function layout from the static opcode length table.

use crate::core::error::{CompileError, CompileResult};
use crate::ir::{Function, Module};
use hashbrown::HashMap;

/// Start offset of every block of one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    offsets: Vec<usize>,
    code_size: usize,
}

impl BlockLayout {
    pub fn compute(function: &Function) -> Self {
        let mut offsets = Vec::with_capacity(function.blocks().len());
        let mut cursor = 0usize;

        for block in function.blocks() {
            offsets.push(cursor);
            for instruction in block.instructions() {
                cursor += instruction.encoded_len();
            }
        }

        log::trace!(
            "layout of `{}`: {} blocks, {} bytes, offsets {:?}",
            function.name(),
            offsets.len(),
            cursor,
            offsets
        );

        Self {
            offsets,
            code_size: cursor,
        }
    }

    /// Byte offset of block `index` from the function start.
    pub fn block_offset(&self, index: usize) -> Option<usize> {
        self.offsets.get(index).copied()
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn block_count(&self) -> usize {
        self.offsets.len()
    }

    pub fn code_size(&self) -> usize {
        self.code_size
    }
}

/// Placement of one function inside the module's code blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSlot {
    pub name: String,
    pub offset: usize,
    pub blocks: BlockLayout,
}

/// Placement of every function of a module.
#[derive(Debug, Clone)]
pub struct ModuleLayout {
    functions: Vec<FunctionSlot>,
    by_name: HashMap<String, usize>,
    code_size: usize,
}

impl ModuleLayout {
    /// Lay functions out in order, each starting on an `alignment` boundary.
    pub fn compute(module: &Module, alignment: usize) -> CompileResult<Self> {
        let alignment = alignment.max(1);
        let mut functions = Vec::with_capacity(module.len());
        let mut by_name = HashMap::with_capacity(module.len());
        let mut cursor = 0usize;

        for function in module.functions() {
            if by_name.contains_key(function.name()) {
                return Err(CompileError::DuplicateFunction {
                    name: function.name().to_string(),
                });
            }

            let offset = align_up(cursor, alignment);
            let blocks = BlockLayout::compute(function);
            cursor = offset + blocks.code_size();

            by_name.insert(function.name().to_string(), functions.len());
            functions.push(FunctionSlot {
                name: function.name().to_string(),
                offset,
                blocks,
            });
        }

        Ok(Self {
            functions,
            by_name,
            code_size: cursor,
        })
    }

    /// Layout of a lone function placed at offset 0.
    pub fn single(function: &Function) -> Self {
        let blocks = BlockLayout::compute(function);
        let code_size = blocks.code_size();
        let mut by_name = HashMap::new();
        by_name.insert(function.name().to_string(), 0);

        Self {
            functions: vec![FunctionSlot {
                name: function.name().to_string(),
                offset: 0,
                blocks,
            }],
            by_name,
            code_size,
        }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSlot> {
        self.by_name.get(name).map(|&index| &self.functions[index])
    }

    /// Offset of the named function, or `UnknownFunction`.
    pub fn function_offset(&self, name: &str) -> CompileResult<usize> {
        self.function(name)
            .map(|slot| slot.offset)
            .ok_or_else(|| CompileError::UnknownFunction {
                name: name.to_string(),
            })
    }

    pub fn functions(&self) -> &[FunctionSlot] {
        &self.functions
    }

    /// Total size including alignment padding between functions.
    pub fn code_size(&self) -> usize {
        self.code_size
    }
}

pub(crate) fn align_up(offset: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return offset;
    }
    offset.div_ceil(alignment) * alignment
}
