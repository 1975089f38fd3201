//! x86-64 architecture-specific components.
//!
//! This module contains all x86-64 specific code:
//! - Instruction encoding (pass 2 of the backend)
//! - Windows x64 parameter and return registers

pub mod calling_convention;
pub mod encoder;

pub use calling_convention::{param_register, ParamRegister, PARAM_REGISTERS, RETURN_REGISTER};
pub use encoder::{encode_instruction, memory_operand, rel32, rel8};
