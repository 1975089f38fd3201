// This module implements the slice of the Windows x64 calling convention that the quickfall IR
// exposes: integer parameter registers and the return register. The first four integer
// parameters travel in RCX, RDX, R8 and R9 and integer results come back in EAX. The IR moves
// 32-bit values, which the encoder sign-extends into the full parameter register with MOVSXD so
// every parameter move carries a REX.W prefix and keeps one encoded length whichever register it
// targets. Index lookups are bounds-checked against the static table.

//! Windows x64 parameter and return registers.

use crate::core::error::{CompileError, CompileResult};
use iced_x86::Register;

/// One integer parameter register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamRegister {
    /// Full 64-bit register.
    pub register: Register,
    pub name: &'static str,
}

/// Integer parameter registers in argument order.
pub const PARAM_REGISTERS: [ParamRegister; 4] = [
    ParamRegister { register: Register::RCX, name: "rcx" },
    ParamRegister { register: Register::RDX, name: "rdx" },
    ParamRegister { register: Register::R8, name: "r8" },
    ParamRegister { register: Register::R9, name: "r9" },
];

/// Register holding a function's 32-bit result.
pub const RETURN_REGISTER: Register = Register::EAX;

/// Register carrying parameter `index`.
pub fn param_register(index: i32) -> CompileResult<ParamRegister> {
    usize::try_from(index)
        .ok()
        .and_then(|i| PARAM_REGISTERS.get(i))
        .copied()
        .ok_or(CompileError::ParameterIndexOutOfRange {
            index,
            available: PARAM_REGISTERS.len(),
        })
}
