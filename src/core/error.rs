// This module defines the error types for the quickfall backend using the thiserror crate for
// idiomatic Rust error handling. IrError covers everything that can be wrong with the IR itself:
// parameter signatures that do not match an opcode, branch targets outside the function, and
// malformed serialized or textual input. CompileError is the main error enum for the encoding
// pipeline: duplicate and unknown symbols, unknown call targets, calling-convention registers
// that do not exist, operands wider than their slot, unbalanced frame saves, machine encoder
// failures, displacements and immediates that do not fit their encoding, buffer growth
// failures, executable image failures and I/O. Every variant carries the symbol, opcode or
// function name involved so the caller can report it. CompileResult<T> is the usual alias.

//! Error types for the quickfall backend.
//!
//! Using thiserror for more idiomatic error handling.

use crate::ir::{Opcode, ParamKind};
use thiserror::Error;

/// Errors in the shape or encoding of IR.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("{opcode} expects {expected} parameters, got {found}")]
    ParameterCount {
        opcode: Opcode,
        expected: usize,
        found: usize,
    },

    #[error("{opcode} parameter {index} must be {expected}, got {found}")]
    ParameterKind {
        opcode: Opcode,
        index: usize,
        expected: ParamKind,
        found: ParamKind,
    },

    #[error("{opcode} binds `{name}`, which cannot carry an offset suffix")]
    UnexpectedOffset { opcode: Opcode, name: String },

    #[error("function `{function}` has no basic blocks")]
    EmptyFunction { function: String },

    #[error("block {block} of `{function}` branches to block {target}, but only {block_count} blocks exist")]
    InvalidBlockTarget {
        function: String,
        block: usize,
        target: i64,
        block_count: usize,
    },

    #[error("unsupported opcode {opcode}")]
    UnsupportedOpcode { opcode: String },

    #[error("unexpected end of input at byte {offset}")]
    UnexpectedEof { offset: usize },

    #[error("input does not start with the QFIR magic")]
    BadMagic,

    #[error("unsupported serialized IR version {version}")]
    UnsupportedVersion { version: u16 },

    #[error("invalid parameter tag {tag:#04x} at byte {offset}")]
    InvalidParameterTag { tag: u8, offset: usize },

    #[error("invalid UTF-8 string at byte {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// Main error type for compilation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("symbol `{name}` is already declared in this function")]
    DuplicateSymbol { name: String },

    #[error("unknown symbol `{name}`")]
    UnknownSymbol { name: String },

    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },

    #[error("function `{name}` is defined more than once")]
    DuplicateFunction { name: String },

    #[error("parameter index {index} is out of range, the calling convention has {available} parameter registers")]
    ParameterIndexOutOfRange { index: i32, available: usize },

    #[error("{opcode} displacement {displacement} does not fit in {bits} bits")]
    DisplacementOverflow {
        opcode: Opcode,
        displacement: i64,
        bits: u32,
    },

    #[error("{opcode} immediate {value} does not fit in {bits} bits")]
    ImmediateOutOfRange { opcode: Opcode, value: i32, bits: u32 },

    #[error("cannot allocate {bits} bits for `{name}`: size must be a positive multiple of 8")]
    InvalidAllocationSize { name: String, bits: i32 },

    #[error("`{name}` is {bits} bits away from the stack pointer, which is not a whole byte")]
    UnalignedOffset { name: String, bits: i64 },

    #[error("stack frame of {bits} bits does not fit in a 32-bit displacement")]
    FrameOverflow { bits: i64 },

    #[error("{opcode} accesses `{name}` as {access} bits, but the slot holds {bits} bits")]
    OperandWidth {
        opcode: Opcode,
        name: String,
        access: u32,
        bits: i64,
    },

    #[error("STACK_LOAD has no matching STACK_SAVE")]
    UnmatchedStackLoad,

    #[error("{opcode} could not be encoded: {message}")]
    Encoding { opcode: Opcode, message: String },

    #[error("bytecode buffer could not grow to {requested} bytes")]
    BufferGrowthFailure { requested: usize },

    #[error(transparent)]
    Ir(#[from] IrError),

    #[error("failed to build executable image: {reason}")]
    Image { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("in function `{function}`: {source}")]
    InFunction {
        function: String,
        #[source]
        source: Box<CompileError>,
    },
}

impl CompileError {
    /// Attach the name of the function being compiled.
    pub fn in_function(self, function: &str) -> Self {
        match self {
            // Already attributed; keep the innermost function name.
            err @ CompileError::InFunction { .. } => err,
            err => CompileError::InFunction {
                function: function.to_string(),
                source: Box::new(err),
            },
        }
    }

    /// The underlying error without function attribution.
    pub fn root(&self) -> &CompileError {
        match self {
            CompileError::InFunction { source, .. } => source.root(),
            err => err,
        }
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
