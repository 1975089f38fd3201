//! Binary serialization of IR modules.
//!
//! This is the hand-off format between a front end and the backend when they
//! run as separate processes.
//!
//! ## Wire format
//!
//! ```text
//! Header: b"QFIR" | version(u16=1) | func_count(u32)
//! For each function:
//!   name(str) | block_count(u32) | [block]
//! For each block:
//!   instr_count(u32) | [instr]
//! Each instruction:
//!   opcode(u8) | param_count(u32) | [param]
//! Each parameter: tag(u8) + payload
//!   0 variable: name(str) | has_offset(u8) | [offset(i32)]
//!   1 integer:  value(i32)
//!   2 string:   text(str)
//! str = byte_len(u32) | UTF-8 bytes
//! ```
//!
//! All integers are little-endian.

use super::{BasicBlock, Function, Instruction, Module, Opcode, Parameter, Variable};
use crate::core::error::IrError;

pub const MAGIC: &[u8; 4] = b"QFIR";
pub const VERSION: u16 = 1;

const TAG_VARIABLE: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_STRING: u8 = 2;

/// Whether `data` starts with the serialized IR magic.
pub fn is_serialized(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

// ── Writer ───────────────────────────────────────────────────────────────────

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn len(&mut self, n: usize) {
        self.u32(n as u32);
    }
    fn str(&mut self, s: &str) {
        self.len(s.len());
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn param(&mut self, param: &Parameter) {
        match param {
            Parameter::Variable(var) => {
                self.u8(TAG_VARIABLE);
                self.str(&var.name);
                match var.offset {
                    Some(offset) => {
                        self.u8(1);
                        self.i32(offset);
                    }
                    None => self.u8(0),
                }
            }
            Parameter::IntLiteral(value) => {
                self.u8(TAG_INT);
                self.i32(*value);
            }
            Parameter::StringLiteral(text) => {
                self.u8(TAG_STRING);
                self.str(text);
            }
        }
    }

    fn function(&mut self, function: &Function) {
        self.str(function.name());
        self.len(function.blocks().len());
        for block in function.blocks() {
            self.len(block.len());
            for instruction in block.instructions() {
                self.u8(instruction.opcode().byte());
                self.len(instruction.params().len());
                for param in instruction.params() {
                    self.param(param);
                }
            }
        }
    }
}

/// Serialize `module` to bytes.
pub fn write_module(module: &Module) -> Vec<u8> {
    let mut w = Writer::new();
    w.buf.extend_from_slice(MAGIC);
    w.u16(VERSION);
    w.len(module.len());
    for function in module.functions() {
        w.function(function);
    }
    w.buf
}

// ── Reader ───────────────────────────────────────────────────────────────────

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], IrError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + N)
            .ok_or(IrError::UnexpectedEof { offset: self.pos })?;
        let mut out = [0; N];
        out.copy_from_slice(bytes);
        self.pos += N;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, IrError> {
        Ok(self.take::<1>()?[0])
    }
    fn u16(&mut self) -> Result<u16, IrError> {
        Ok(u16::from_le_bytes(self.take()?))
    }
    fn u32(&mut self) -> Result<u32, IrError> {
        Ok(u32::from_le_bytes(self.take()?))
    }
    fn i32(&mut self) -> Result<i32, IrError> {
        Ok(i32::from_le_bytes(self.take()?))
    }
    fn len(&mut self) -> Result<usize, IrError> {
        Ok(self.u32()? as usize)
    }

    fn str(&mut self) -> Result<String, IrError> {
        let len = self.len()?;
        let start = self.pos;
        let bytes = start
            .checked_add(len)
            .and_then(|end| self.data.get(start..end))
            .ok_or(IrError::UnexpectedEof { offset: start })?;
        let text = std::str::from_utf8(bytes)
            .map_err(|_| IrError::InvalidUtf8 { offset: start })?
            .to_owned();
        self.pos += len;
        Ok(text)
    }

    fn param(&mut self) -> Result<Parameter, IrError> {
        let offset = self.pos;
        match self.u8()? {
            TAG_VARIABLE => {
                let name = self.str()?;
                let var = match self.u8()? {
                    0 => Variable::new(name),
                    _ => Variable::with_offset(name, self.i32()?),
                };
                Ok(Parameter::Variable(var))
            }
            TAG_INT => Ok(Parameter::IntLiteral(self.i32()?)),
            TAG_STRING => Ok(Parameter::StringLiteral(self.str()?)),
            tag => Err(IrError::InvalidParameterTag { tag, offset }),
        }
    }

    fn instruction(&mut self) -> Result<Instruction, IrError> {
        let byte = self.u8()?;
        let opcode = Opcode::from_byte(byte).ok_or_else(|| IrError::UnsupportedOpcode {
            opcode: format!("{byte:#04x}"),
        })?;
        let count = self.len()?;
        let mut params = Vec::new();
        for _ in 0..count {
            params.push(self.param()?);
        }
        Instruction::new(opcode, params)
    }

    fn function(&mut self) -> Result<Function, IrError> {
        let mut function = Function::new(self.str()?);
        let block_count = self.len()?;
        for _ in 0..block_count {
            let instr_count = self.len()?;
            let mut block = BasicBlock::new();
            for _ in 0..instr_count {
                block.push(self.instruction()?);
            }
            function.push_block(block);
        }
        Ok(function)
    }
}

/// Deserialize a module written by [`write_module`].
pub fn read_module(data: &[u8]) -> Result<Module, IrError> {
    let mut r = Reader::new(data);
    if r.take::<4>().ok().as_ref() != Some(MAGIC) {
        return Err(IrError::BadMagic);
    }
    let version = r.u16()?;
    if version != VERSION {
        return Err(IrError::UnsupportedVersion { version });
    }

    let count = r.len()?;
    let mut module = Module::new();
    for _ in 0..count {
        module.push(r.function()?);
    }
    log::debug!("read {} functions from {} bytes of serialized IR", module.len(), data.len());
    Ok(module)
}
