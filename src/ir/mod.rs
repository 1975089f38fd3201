//! Quickfall IR: functions made of basic blocks of opcoded instructions.
//!
//! This is the backend's input language. Front ends (the language parser or the
//! textual listing reader in [`parser`]) produce [`Function`] values; the
//! backend consumes them without further interpretation.
//!
//! # Listing format
//!
//! ```text
//! ; Comments start with semicolon
//! function main {
//! @0:
//!     S_ALLOC 32 %x
//!     QUAD_SET %x 5
//!     BLOCK_SWAP 1
//! @1:
//!     RET
//! }
//! ```
//!
//! Instructions are validated against their opcode's signature when they are
//! constructed, so a malformed instruction never reaches the encoder.

use crate::core::error::IrError;
use std::fmt;

pub mod opcode;
pub mod parser;
pub mod serial;

pub use opcode::{OpInfo, Opcode};
pub use parser::{parse_function, parse_module};
pub use serial::{read_module, write_module};

/// Load a module from either serialized IR or a textual listing.
pub fn load_module(data: &[u8]) -> Result<Module, IrError> {
    if serial::is_serialized(data) {
        return read_module(data);
    }
    let text = std::str::from_utf8(data).map_err(|e| IrError::InvalidUtf8 {
        offset: e.valid_up_to(),
    })?;
    parse_module(text)
}

/// A named stack slot reference with an optional extra offset in bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    pub name: String,
    pub offset: Option<i32>,
}

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            offset: None,
        }
    }

    pub fn with_offset(name: impl Into<String>, offset: i32) -> Self {
        Self {
            name: name.into(),
            offset: Some(offset),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name)?;
        if let Some(offset) = self.offset {
            write!(f, ",{offset}")?;
        }
        Ok(())
    }
}

/// Instruction parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Parameter {
    Variable(Variable),
    IntLiteral(i32),
    StringLiteral(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Variable,
    Int,
    String,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamKind::Variable => "a variable",
            ParamKind::Int => "an integer literal",
            ParamKind::String => "a string literal",
        })
    }
}

impl Parameter {
    pub fn var(name: impl Into<String>) -> Self {
        Parameter::Variable(Variable::new(name))
    }

    pub fn var_offset(name: impl Into<String>, offset: i32) -> Self {
        Parameter::Variable(Variable::with_offset(name, offset))
    }

    pub fn int(value: i32) -> Self {
        Parameter::IntLiteral(value)
    }

    pub fn string(text: impl Into<String>) -> Self {
        Parameter::StringLiteral(text.into())
    }

    pub fn kind(&self) -> ParamKind {
        match self {
            Parameter::Variable(_) => ParamKind::Variable,
            Parameter::IntLiteral(_) => ParamKind::Int,
            Parameter::StringLiteral(_) => ParamKind::String,
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Variable(var) => var.fmt(f),
            Parameter::IntLiteral(value) => write!(f, "{value}"),
            Parameter::StringLiteral(text) => {
                f.write_str("\"")?;
                for c in text.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        '\r' => f.write_str("\\r")?,
                        c if c.is_control() => write!(f, "\\u{{{:x}}}", u32::from(c))?,
                        c => write!(f, "{c}")?,
                    }
                }
                f.write_str("\"")
            }
        }
    }
}

/// A single IR instruction whose parameters match its opcode's signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    opcode: Opcode,
    params: Vec<Parameter>,
}

impl Instruction {
    /// Build an instruction, checking the parameters against the opcode signature.
    pub fn new(opcode: Opcode, params: Vec<Parameter>) -> Result<Self, IrError> {
        let expected = opcode.params();
        if expected.len() != params.len() {
            return Err(IrError::ParameterCount {
                opcode,
                expected: expected.len(),
                found: params.len(),
            });
        }

        for (index, (param, kind)) in params.iter().zip(expected).enumerate() {
            if param.kind() != *kind {
                return Err(IrError::ParameterKind {
                    opcode,
                    index,
                    expected: *kind,
                    found: param.kind(),
                });
            }
        }

        if let Some(index) = opcode.binding_param() {
            if let Parameter::Variable(var) = &params[index] {
                if var.offset.is_some() {
                    return Err(IrError::UnexpectedOffset {
                        opcode,
                        name: var.name.clone(),
                    });
                }
            }
        }

        Ok(Self { opcode, params })
    }

    // Constructors for signatures that are correct by construction.
    fn checked(opcode: Opcode, params: Vec<Parameter>) -> Self {
        debug_assert!(Self::new(opcode, params.clone()).is_ok());
        Self { opcode, params }
    }

    pub fn s_alloc(bits: i32, name: impl Into<String>) -> Self {
        Self::checked(Opcode::SAlloc, vec![Parameter::int(bits), Parameter::var(name)])
    }

    pub fn ptr_set(target: Variable, value: i32) -> Self {
        Self::checked(Opcode::PtrSet, vec![Parameter::Variable(target), Parameter::int(value)])
    }

    pub fn duo_set(target: Variable, value: i32) -> Self {
        Self::checked(Opcode::DuoSet, vec![Parameter::Variable(target), Parameter::int(value)])
    }

    pub fn quad_set(target: Variable, value: i32) -> Self {
        Self::checked(Opcode::QuadSet, vec![Parameter::Variable(target), Parameter::int(value)])
    }

    pub fn oct_set(target: Variable, value: i32) -> Self {
        Self::checked(Opcode::OctSet, vec![Parameter::Variable(target), Parameter::int(value)])
    }

    pub fn ptr_dec(name: impl Into<String>, address: i32) -> Self {
        Self::checked(Opcode::PtrDec, vec![Parameter::var(name), Parameter::int(address)])
    }

    pub fn ptr_dec_off(name: impl Into<String>, base: Variable, offset: i32) -> Self {
        Self::checked(
            Opcode::PtrDecOff,
            vec![Parameter::var(name), Parameter::Variable(base), Parameter::int(offset)],
        )
    }

    /// IADD/ISUB/IMUL/IDIV/ICMP/ICMP_H/ICMP_L. Returns an error for any other opcode.
    pub fn binary(opcode: Opcode, output: Variable, lhs: Variable, rhs: Variable) -> Result<Self, IrError> {
        Self::new(
            opcode,
            vec![
                Parameter::Variable(output),
                Parameter::Variable(lhs),
                Parameter::Variable(rhs),
            ],
        )
    }

    pub fn prm_push(source: Variable, index: i32) -> Self {
        Self::checked(Opcode::PrmPush, vec![Parameter::Variable(source), Parameter::int(index)])
    }

    pub fn prm_load(target: Variable, index: i32) -> Self {
        Self::checked(Opcode::PrmLoad, vec![Parameter::Variable(target), Parameter::int(index)])
    }

    pub fn ret_push(source: Variable) -> Self {
        Self::checked(Opcode::RetPush, vec![Parameter::Variable(source)])
    }

    pub fn call(function: impl Into<String>) -> Self {
        Self::checked(Opcode::Call, vec![Parameter::string(function)])
    }

    pub fn ret() -> Self {
        Self::checked(Opcode::Ret, Vec::new())
    }

    pub fn stack_save() -> Self {
        Self::checked(Opcode::StackSave, Vec::new())
    }

    pub fn stack_load() -> Self {
        Self::checked(Opcode::StackLoad, Vec::new())
    }

    pub fn stack_free_func() -> Self {
        Self::checked(Opcode::StackFreeFunc, Vec::new())
    }

    pub fn block_swap(target: i32) -> Self {
        Self::checked(Opcode::BlockSwap, vec![Parameter::int(target)])
    }

    pub fn cond_block_swap(target: i32, condition: Variable) -> Self {
        Self::checked(
            Opcode::CondBlockSwap,
            vec![Parameter::int(target), Parameter::Variable(condition)],
        )
    }

    pub fn logical_block_swap(on_true: i32, on_false: i32, condition: Variable) -> Self {
        Self::checked(
            Opcode::LogicalBlockSwap,
            vec![
                Parameter::int(on_true),
                Parameter::int(on_false),
                Parameter::Variable(condition),
            ],
        )
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn encoded_len(&self) -> usize {
        self.opcode.encoded_len()
    }

    fn param(&self, index: usize, expected: ParamKind) -> Result<&Parameter, IrError> {
        let param = self.params.get(index).ok_or(IrError::ParameterCount {
            opcode: self.opcode,
            expected: self.opcode.params().len(),
            found: self.params.len(),
        })?;
        if param.kind() != expected {
            return Err(IrError::ParameterKind {
                opcode: self.opcode,
                index,
                expected,
                found: param.kind(),
            });
        }
        Ok(param)
    }

    pub fn var(&self, index: usize) -> Result<&Variable, IrError> {
        match self.param(index, ParamKind::Variable)? {
            Parameter::Variable(var) => Ok(var),
            other => Err(self.kind_error(index, ParamKind::Variable, other)),
        }
    }

    pub fn int(&self, index: usize) -> Result<i32, IrError> {
        match self.param(index, ParamKind::Int)? {
            Parameter::IntLiteral(value) => Ok(*value),
            other => Err(self.kind_error(index, ParamKind::Int, other)),
        }
    }

    pub fn string(&self, index: usize) -> Result<&str, IrError> {
        match self.param(index, ParamKind::String)? {
            Parameter::StringLiteral(text) => Ok(text),
            other => Err(self.kind_error(index, ParamKind::String, other)),
        }
    }

    fn kind_error(&self, index: usize, expected: ParamKind, found: &Parameter) -> IrError {
        IrError::ParameterKind {
            opcode: self.opcode,
            index,
            expected,
            found: found.kind(),
        }
    }

    /// Block indices this instruction may jump to.
    pub fn block_targets(&self) -> impl Iterator<Item = i32> + '_ {
        self.opcode
            .block_params()
            .iter()
            .filter_map(move |&index| self.int(index).ok())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode.mnemonic())?;
        for param in &self.params {
            write!(f, " {param}")?;
        }
        Ok(())
    }
}

/// Straight-line instruction sequence, identified by its index in the function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicBlock {
    instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Encoded size of the block in bytes.
    pub fn encoded_len(&self) -> usize {
        self.instructions.iter().map(Instruction::encoded_len).sum()
    }
}

impl From<Vec<Instruction>> for BasicBlock {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }
}

impl FromIterator<Instruction> for BasicBlock {
    fn from_iter<I: IntoIterator<Item = Instruction>>(iter: I) -> Self {
        Self {
            instructions: iter.into_iter().collect(),
        }
    }
}

/// A named function: the unit handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    name: String,
    blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
        }
    }

    pub fn with_blocks(name: impl Into<String>, blocks: Vec<BasicBlock>) -> Self {
        Self {
            name: name.into(),
            blocks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a block and return its index.
    pub fn push_block(&mut self, block: BasicBlock) -> usize {
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block(&self, index: usize) -> Option<&BasicBlock> {
        self.blocks.get(index)
    }

    pub fn block_mut(&mut self, index: usize) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(index)
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.blocks.iter().flat_map(|block| block.instructions().iter())
    }

    pub fn encoded_len(&self) -> usize {
        self.blocks.iter().map(BasicBlock::encoded_len).sum()
    }

    /// Check the ingestion contract: at least one block and in-range branch targets.
    pub fn validate(&self) -> Result<(), IrError> {
        if self.blocks.is_empty() {
            return Err(IrError::EmptyFunction {
                function: self.name.clone(),
            });
        }

        for (block_idx, block) in self.blocks.iter().enumerate() {
            for instruction in block.instructions() {
                for target in instruction.block_targets() {
                    if target < 0 || target as usize >= self.blocks.len() {
                        return Err(IrError::InvalidBlockTarget {
                            function: self.name.clone(),
                            block: block_idx,
                            target: i64::from(target),
                            block_count: self.blocks.len(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "function {} {{", self.name)?;
        for (index, block) in self.blocks.iter().enumerate() {
            writeln!(f, "@{index}:")?;
            for instruction in block.instructions() {
                writeln!(f, "    {instruction}")?;
            }
        }
        writeln!(f, "}}")
    }
}

/// Ordered collection of functions compiled into one image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, function: Function) {
        self.functions.push(function);
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name() == name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl From<Function> for Module {
    fn from(function: Function) -> Self {
        Self {
            functions: vec![function],
        }
    }
}

impl FromIterator<Function> for Module {
    fn from_iter<I: IntoIterator<Item = Function>>(iter: I) -> Self {
        Self {
            functions: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, function) in self.functions.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            function.fmt(f)?;
        }
        Ok(())
    }
}
