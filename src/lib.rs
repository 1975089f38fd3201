//! Quickfall - ahead-of-time compiler backend.
//!
//! Lowers the Quickfall linear IR (functions made of basic blocks of opcoded
//! instructions) into x86-64 machine code for the Windows x64 ABI and packages
//! the result as a minimal PE32+ executable.
//!
//! # Primary Usage
//!
//! ```ignore
//! use quickfall::{compile_module, parse_module, write_executable_file};
//! use quickfall::{CompilationSession, CompileOptions, ImageConfig};
//! use bumpalo::Bump;
//!
//! let module = parse_module(&std::fs::read_to_string("main.qasm")?)?;
//!
//! // Compile with arena-backed session state
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let compiled = compile_module(&module, &session, &CompileOptions::default())?;
//!
//! write_executable_file("main.exe", &compiled, "main", &ImageConfig::default())?;
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - IR model, listing reader and binary serialization
//! - [`core`] - Shared infrastructure (buffer, symbols, layout, session)
//! - [`x64`] - x86-64 instruction encoding and calling convention
//! - [`compiler`] - Two-pass function and module compilation
//! - [`image`] - PE32+ executable writer
//! - [`disasm`] - Disassembly of compiled code

pub mod compiler;
pub mod core;
pub mod disasm;
pub mod image;
pub mod ir;
pub mod x64;

pub use compiler::{
    compile_function, compile_module, CompileOptions, CompiledFunction, CompiledModule,
};
pub use core::{
    BlockLayout, BytecodeBuffer, CompilationContext, CompilationSession, CompileError,
    CompileResult, IrError, Location, ModuleLayout, SessionStats, Slot, SymbolTable,
};
pub use disasm::{disassemble, DisassembledLine};
pub use image::{
    build_image, build_image_from_code, write_executable, write_executable_file, ImageConfig,
};
pub use ir::{
    load_module, parse_function, parse_module, read_module, write_module, BasicBlock, Function,
    Instruction, Module, Opcode, Parameter, Variable,
};
