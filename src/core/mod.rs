// This module serves as the hub for the architecture-independent parts of the quickfall backend.
// It exports the error types, the append-only bytecode buffer that receives encoded bytes, the
// per-function symbol table mapping slot names to frame locations, the pass-1 block and module
// layout computed from the static opcode length table, the explicit per-function compilation
// context that replaces global allocation counters, and the arena-backed compilation session
// holding module-wide results and statistics.

//! Core quickfall infrastructure
//!
//! # Key Components
//!
//! ## Bytecode buffer (`buffer`)
//! - Append-only, bounds-checked emission with deterministic doubling growth
//!
//! ## Symbol table (`symbols`)
//! - Keyed name to frame-offset mapping with monotonic allocation
//! - Derived (`name + N`) and absolute bindings
//!
//! ## Layout (`layout`)
//! - Pass 1 of the encoder: block and function start offsets
//!
//! ## Context and session (`context`, `session`)
//! - Per-function counters passed explicitly to the encoder
//! - Arena allocation for results that outlive a function

pub mod buffer;
pub mod context;
pub mod error;
pub mod layout;
pub mod session;
pub mod symbols;

pub use buffer::BytecodeBuffer;
pub use context::CompilationContext;
pub use error::{CompileError, CompileResult, IrError};
pub use layout::{BlockLayout, FunctionSlot, ModuleLayout};
pub use session::{CompilationSession, SessionStats};
pub use symbols::{Location, Slot, SymbolTable};
