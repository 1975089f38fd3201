// This module is pass 2 of the quickfall backend: it lowers one IR instruction at a time into
// x86-64 machine code using the iced-x86 encoder, appending to the function's BytecodeBuffer and
// updating the explicit CompilationContext. Dispatch is an exhaustive match over Opcode, so an
// opcode without an encoding is a compile-time error rather than a silent no-op. Every machine
// instruction is built from an explicit iced Code, and every named operand becomes a memory
// operand with a forced disp32, either [rsp + disp32] for frame slots or [disp32] for absolute
// bindings, which keeps each opcode's length fixed and equal to the entry in the opcode table
// that pass 1 used. Frame slots are addressed from rsp through the context, which accounts for
// saved frame pointers pushed after a slot was allocated. Accesses are checked against the
// slot's recorded width. Arithmetic goes through EAX (IDIV also clobbers EDX). Branches take
// their targets from the pass-1 block layout: BLOCK_SWAP and LOGICAL_BLOCK_SWAP use rel32 jumps,
// COND_BLOCK_SWAP uses a short rel8 jump and fails with DisplacementOverflow when the target is
// out of reach instead of truncating.

//! x86-64 instruction encoding for the Quickfall IR.
//!
//! See [`encode_instruction`] for the entry point. Offsets handed to the
//! context are relative to the start of the function being encoded.

use crate::core::{BytecodeBuffer, CompilationContext, CompileError, CompileResult, Location};
use crate::ir::{Instruction, Opcode, Variable};
use crate::x64::calling_convention::{param_register, RETURN_REGISTER};
use iced_x86::{Code, Encoder, IcedError, MemoryOperand, Register};

type MachineInstruction = iced_x86::Instruction;

/// `displ_size` that selects the disp32 form under 64-bit addressing.
const DISP32: u32 = 8;

const JNE_REL8_LEN: usize = 2;
const JNE_REL32_LEN: usize = 6;
const JMP_REL32_LEN: usize = 5;
const CALL_REL32_LEN: usize = 5;

/// Integer operations that go through EAX.
#[derive(Debug, Clone, Copy)]
enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Compare and materialize the flag with the given SETcc form.
    Compare(Code),
}

/// Encodes the machine instructions of one IR instruction into the function buffer.
struct Emitter<'b> {
    encoder: Encoder,
    buf: &'b mut BytecodeBuffer,
    /// Module offset of the function's first byte.
    base: u64,
    opcode: Opcode,
}

impl<'b> Emitter<'b> {
    fn new(buf: &'b mut BytecodeBuffer, base: usize, opcode: Opcode) -> Self {
        Self {
            encoder: Encoder::new(64),
            buf,
            base: base as u64,
            opcode,
        }
    }

    /// Module offset of the next byte.
    fn ip(&self) -> u64 {
        self.base + self.buf.current_offset() as u64
    }

    /// Module offset `len + displacement` bytes past the next byte.
    fn target(&self, len: usize, displacement: i64) -> u64 {
        (self.ip() as i64 + len as i64 + displacement) as u64
    }

    fn emit(&mut self, instruction: Result<MachineInstruction, IcedError>) -> CompileResult<()> {
        let opcode = self.opcode;
        let instruction = instruction.map_err(|err| encoding_error(opcode, err))?;
        let ip = self.ip();
        self.encoder
            .encode(&instruction, ip)
            .map_err(|err| encoding_error(opcode, err))?;
        self.buf.append(&self.encoder.take_buffer())?;
        Ok(())
    }
}

fn encoding_error(opcode: Opcode, err: IcedError) -> CompileError {
    CompileError::Encoding {
        opcode,
        message: err.to_string(),
    }
}

/// Encode `instruction`, appending its bytes to `buf`.
pub fn encode_instruction(
    instruction: &Instruction,
    ctx: &mut CompilationContext<'_>,
    buf: &mut BytecodeBuffer,
) -> CompileResult<()> {
    let opcode = instruction.opcode();
    let start = buf.current_offset();
    let mut em = Emitter::new(buf, ctx.base_offset(), opcode);

    match opcode {
        Opcode::Ret => {
            em.emit(Ok(MachineInstruction::with(Code::Retnq)))?;
        }

        Opcode::StackSave => {
            ctx.save_frame();
            em.emit(MachineInstruction::with1(Code::Push_r64, Register::RBP))?;
            em.emit(MachineInstruction::with2(
                Code::Mov_rm64_r64,
                Register::RBP,
                Register::RSP,
            ))?;
        }

        Opcode::StackLoad => {
            ctx.load_frame()?;
            em.emit(MachineInstruction::with1(Code::Pop_r64, Register::RBP))?;
        }

        Opcode::SAlloc => {
            let bits = instruction.int(0)?;
            let name = &instruction.var(1)?.name;
            ctx.allocate(name, bits)?;
            em.emit(MachineInstruction::with2(
                Code::Sub_rm64_imm32,
                Register::RSP,
                bits / 8,
            ))?;
        }

        Opcode::StackFreeFunc => {
            let bits = ctx.release_frame();
            let bytes = i32::try_from(bits / 8).map_err(|_| CompileError::FrameOverflow { bits })?;
            em.emit(MachineInstruction::with2(
                Code::Add_rm64_imm32,
                Register::RSP,
                bytes,
            ))?;
        }

        Opcode::PtrSet => {
            let (mem, value) = store_operands(instruction, ctx, 8)?;
            em.emit(MachineInstruction::with2(Code::Mov_rm8_imm8, mem, value))?;
        }

        Opcode::DuoSet => {
            let (mem, value) = store_operands(instruction, ctx, 16)?;
            em.emit(MachineInstruction::with2(Code::Mov_rm16_imm16, mem, value))?;
        }

        Opcode::QuadSet => {
            let (mem, value) = store_operands(instruction, ctx, 32)?;
            em.emit(MachineInstruction::with2(Code::Mov_rm32_imm32, mem, value))?;
        }

        Opcode::OctSet => {
            let (mem, value) = store_operands(instruction, ctx, 64)?;
            em.emit(MachineInstruction::with2(
                Code::Mov_r64_imm64,
                Register::RAX,
                i64::from(value),
            ))?;
            em.emit(MachineInstruction::with2(Code::Mov_rm64_r64, mem, Register::RAX))?;
        }

        Opcode::PtrDec => {
            let name = &instruction.var(0)?.name;
            let address = instruction.int(1)?;
            ctx.symbols_mut()
                .declare_absolute(name, i64::from(address))?;
        }

        Opcode::PtrDecOff => {
            let name = &instruction.var(0)?.name;
            let base = instruction.var(1)?;
            let extra = i64::from(base.offset.unwrap_or(0)) + i64::from(instruction.int(2)?);
            ctx.symbols_mut().declare_derived(name, &base.name, extra)?;
        }

        Opcode::IAdd => encode_alu(instruction, ctx, &mut em, AluOp::Add)?,
        Opcode::ISub => encode_alu(instruction, ctx, &mut em, AluOp::Sub)?,
        Opcode::IMul => encode_alu(instruction, ctx, &mut em, AluOp::Mul)?,
        Opcode::IDiv => encode_alu(instruction, ctx, &mut em, AluOp::Div)?,
        Opcode::ICmp => encode_alu(instruction, ctx, &mut em, AluOp::Compare(Code::Sete_rm8))?,
        Opcode::ICmpH => encode_alu(instruction, ctx, &mut em, AluOp::Compare(Code::Setg_rm8))?,
        Opcode::ICmpL => encode_alu(instruction, ctx, &mut em, AluOp::Compare(Code::Setge_rm8))?,

        Opcode::PrmPush => {
            let mem = memory_operand(ctx, instruction.var(0)?, opcode, 32)?;
            let reg = param_register(instruction.int(1)?)?;
            // movsxd reg64, dword [m]
            em.emit(MachineInstruction::with2(Code::Movsxd_r64_rm32, reg.register, mem))?;
        }

        Opcode::PrmLoad => {
            let mem = memory_operand(ctx, instruction.var(0)?, opcode, 32)?;
            let reg = param_register(instruction.int(1)?)?;
            // mov rax, reg64; mov [m], eax
            em.emit(MachineInstruction::with2(
                Code::Mov_rm64_r64,
                Register::RAX,
                reg.register,
            ))?;
            em.emit(MachineInstruction::with2(Code::Mov_rm32_r32, mem, Register::EAX))?;
        }

        Opcode::RetPush => {
            let mem = memory_operand(ctx, instruction.var(0)?, opcode, 32)?;
            em.emit(MachineInstruction::with2(Code::Mov_r32_rm32, RETURN_REGISTER, mem))?;
        }

        Opcode::Call => {
            let callee = instruction.string(0)?;
            let next = em.buf.current_offset() + CALL_REL32_LEN;
            let disp = rel32(opcode, ctx.call_displacement(callee, next)?)?;
            let target = em.target(CALL_REL32_LEN, i64::from(disp));
            em.emit(MachineInstruction::with_branch(Code::Call_rel32_64, target))?;
        }

        Opcode::BlockSwap => {
            let block = instruction.int(0)?;
            let next = em.buf.current_offset() + JMP_REL32_LEN;
            let disp = rel32(opcode, ctx.block_displacement(block, next)?)?;
            let target = em.target(JMP_REL32_LEN, i64::from(disp));
            em.emit(MachineInstruction::with_branch(Code::Jmp_rel32_64, target))?;
        }

        Opcode::CondBlockSwap => {
            let block = instruction.int(0)?;
            compare_to_zero(ctx, &mut em, instruction.var(1)?)?;

            let next = em.buf.current_offset() + JNE_REL8_LEN;
            let disp = rel8(opcode, ctx.block_displacement(block, next)?)?;
            let target = em.target(JNE_REL8_LEN, i64::from(disp));
            em.emit(MachineInstruction::with_branch(Code::Jne_rel8_64, target))?;
        }

        Opcode::LogicalBlockSwap => {
            let on_true = instruction.int(0)?;
            let on_false = instruction.int(1)?;
            compare_to_zero(ctx, &mut em, instruction.var(2)?)?;

            let next = em.buf.current_offset() + JNE_REL32_LEN;
            let disp = rel32(opcode, ctx.block_displacement(on_true, next)?)?;
            let target = em.target(JNE_REL32_LEN, i64::from(disp));
            em.emit(MachineInstruction::with_branch(Code::Jne_rel32_64, target))?;

            let next = em.buf.current_offset() + JMP_REL32_LEN;
            let disp = rel32(opcode, ctx.block_displacement(on_false, next)?)?;
            let target = em.target(JMP_REL32_LEN, i64::from(disp));
            em.emit(MachineInstruction::with_branch(Code::Jmp_rel32_64, target))?;
        }
    }

    log::trace!(
        "{:#06x}: {:<40} {:02x?}",
        start,
        instruction.to_string(),
        &buf.as_bytes()[start..]
    );
    debug_assert_eq!(
        buf.current_offset() - start,
        opcode.encoded_len(),
        "{opcode} emitted a different length than the layout table"
    );
    Ok(())
}

/// Resolve `var` to a disp32 memory operand at the current stack depth, checking that an
/// access of `access_bits` stays inside its slot.
pub fn memory_operand(
    ctx: &CompilationContext<'_>,
    var: &Variable,
    opcode: Opcode,
    access_bits: u32,
) -> CompileResult<MemoryOperand> {
    let slot = ctx.symbols().slot(var)?;
    if let Some(bits) = slot.bits {
        if i64::from(access_bits) > bits {
            return Err(CompileError::OperandWidth {
                opcode,
                name: var.to_string(),
                access: access_bits,
                bits,
            });
        }
    }

    match slot.location {
        Location::Frame(offset) => {
            let bits = ctx.stack_distance(offset);
            if bits % 8 != 0 {
                return Err(CompileError::UnalignedOffset {
                    name: var.to_string(),
                    bits,
                });
            }
            let disp = i32::try_from(bits / 8).map_err(|_| CompileError::FrameOverflow { bits })?;
            Ok(MemoryOperand::with_base_displ_size(
                Register::RSP,
                i64::from(disp),
                DISP32,
            ))
        }
        Location::Absolute(address) => {
            let address = i32::try_from(address).map_err(|_| CompileError::DisplacementOverflow {
                opcode,
                displacement: address,
                bits: 32,
            })?;
            Ok(MemoryOperand::with_base_displ_size(
                Register::None,
                i64::from(address),
                DISP32,
            ))
        }
    }
}

/// Check a displacement against the rel32 range.
pub fn rel32(opcode: Opcode, displacement: i64) -> CompileResult<i32> {
    i32::try_from(displacement).map_err(|_| CompileError::DisplacementOverflow {
        opcode,
        displacement,
        bits: 32,
    })
}

/// Check a displacement against the rel8 range.
pub fn rel8(opcode: Opcode, displacement: i64) -> CompileResult<i8> {
    i8::try_from(displacement).map_err(|_| CompileError::DisplacementOverflow {
        opcode,
        displacement,
        bits: 8,
    })
}

/// Immediate range accepted by a store of `bits`: signed or unsigned.
fn check_immediate(opcode: Opcode, value: i32, bits: u32) -> CompileResult<i32> {
    let fits = match bits {
        8 => (-128..=255).contains(&value),
        16 => (-32768..=65535).contains(&value),
        _ => true,
    };
    if fits {
        Ok(value)
    } else {
        Err(CompileError::ImmediateOutOfRange {
            opcode,
            value,
            bits,
        })
    }
}

fn store_operands(
    instruction: &Instruction,
    ctx: &CompilationContext<'_>,
    bits: u32,
) -> CompileResult<(MemoryOperand, i32)> {
    let opcode = instruction.opcode();
    let mem = memory_operand(ctx, instruction.var(0)?, opcode, bits)?;
    let value = check_immediate(opcode, instruction.int(1)?, bits)?;
    Ok((mem, value))
}

// cmp byte|dword [m], 0 over the whole condition slot
fn compare_to_zero(
    ctx: &CompilationContext<'_>,
    em: &mut Emitter<'_>,
    condition: &Variable,
) -> CompileResult<()> {
    let opcode = em.opcode;
    let (code, access) = match ctx.symbols().slot(condition)?.bits {
        Some(8) => (Code::Cmp_rm8_imm8, 8),
        Some(32) | None => (Code::Cmp_rm32_imm8, 32),
        Some(bits) => {
            return Err(CompileError::OperandWidth {
                opcode,
                name: condition.to_string(),
                access: 32,
                bits,
            })
        }
    };
    let mem = memory_operand(ctx, condition, opcode, access)?;
    em.emit(MachineInstruction::with2(code, mem, 0i32))
}

fn encode_alu(
    instruction: &Instruction,
    ctx: &CompilationContext<'_>,
    em: &mut Emitter<'_>,
    op: AluOp,
) -> CompileResult<()> {
    let opcode = instruction.opcode();
    let output = memory_operand(ctx, instruction.var(0)?, opcode, 32)?;
    let lhs = memory_operand(ctx, instruction.var(1)?, opcode, 32)?;
    let rhs = memory_operand(ctx, instruction.var(2)?, opcode, 32)?;

    em.emit(MachineInstruction::with2(Code::Mov_r32_rm32, Register::EAX, lhs))?;
    match op {
        AluOp::Add => em.emit(MachineInstruction::with2(Code::Add_r32_rm32, Register::EAX, rhs))?,
        AluOp::Sub => em.emit(MachineInstruction::with2(Code::Sub_r32_rm32, Register::EAX, rhs))?,
        AluOp::Mul => em.emit(MachineInstruction::with2(Code::Imul_r32_rm32, Register::EAX, rhs))?,
        AluOp::Div => {
            em.emit(Ok(MachineInstruction::with(Code::Cdq)))?;
            em.emit(MachineInstruction::with1(Code::Idiv_rm32, rhs))?;
        }
        AluOp::Compare(setcc) => {
            em.emit(MachineInstruction::with2(Code::Cmp_r32_rm32, Register::EAX, rhs))?;
            em.emit(MachineInstruction::with1(setcc, Register::AL))?;
            em.emit(MachineInstruction::with2(Code::Movzx_r32_rm8, Register::EAX, Register::AL))?;
        }
    }
    em.emit(MachineInstruction::with2(Code::Mov_rm32_r32, output, Register::EAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ModuleLayout;
    use crate::ir::{BasicBlock, Function};

    /// Encode every instruction of a single-block function and return the bytes.
    fn encode_all(instructions: Vec<Instruction>) -> CompileResult<Vec<u8>> {
        let func = Function::with_blocks("t", vec![BasicBlock::from(instructions)]);
        let module = ModuleLayout::single(&func);
        let slot = module.function("t").unwrap();
        let mut ctx = CompilationContext::new("t", &slot.blocks, &module, 0);
        let mut buf = BytecodeBuffer::new();
        for inst in func.instructions() {
            encode_instruction(inst, &mut ctx, &mut buf)?;
        }
        Ok(buf.into_bytes())
    }

    fn three_slots(opcode: Opcode) -> Vec<u8> {
        encode_all(vec![
            Instruction::s_alloc(32, "a"),
            Instruction::s_alloc(32, "b"),
            Instruction::s_alloc(32, "c"),
            Instruction::binary(opcode, Variable::new("c"), Variable::new("a"), Variable::new("b"))
                .unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn alloc_store_ret() {
        let code = encode_all(vec![
            Instruction::s_alloc(32, "x"),
            Instruction::quad_set(Variable::new("x"), 5),
            Instruction::ret(),
        ])
        .unwrap();

        assert_eq!(
            code,
            [
                0x48, 0x81, 0xEC, 4, 0, 0, 0, // sub rsp, 4
                0xC7, 0x84, 0x24, 0, 0, 0, 0, 5, 0, 0, 0, // mov dword [rsp+0], 5
                0xC3, // ret
            ]
        );
    }

    #[test]
    fn earlier_slots_sit_further_from_rsp() {
        let code = encode_all(vec![
            Instruction::s_alloc(32, "a"),
            Instruction::s_alloc(16, "b"),
            Instruction::ptr_set(Variable::new("a"), -1),
            Instruction::duo_set(Variable::new("b"), 0x1234),
        ])
        .unwrap();

        // mov byte [rsp+2], 0xff
        assert_eq!(&code[14..22], &[0xC6, 0x84, 0x24, 2, 0, 0, 0, 0xFF]);
        // mov word [rsp+0], 0x1234
        assert_eq!(&code[22..], &[0x66, 0xC7, 0x84, 0x24, 0, 0, 0, 0, 0x34, 0x12]);
    }

    #[test]
    fn oct_set_sign_extends_to_eight_bytes() {
        let code = encode_all(vec![
            Instruction::s_alloc(64, "q"),
            Instruction::oct_set(Variable::new("q"), -2),
        ])
        .unwrap();

        assert_eq!(
            &code[7..],
            &[
                0x48, 0xB8, 0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, // mov rax, -2
                0x48, 0x89, 0x84, 0x24, 0, 0, 0, 0, // mov [rsp+0], rax
            ]
        );
    }

    #[test]
    fn immediates_must_fit_their_width() {
        let err = encode_all(vec![
            Instruction::s_alloc(8, "b"),
            Instruction::ptr_set(Variable::new("b"), 256),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::ImmediateOutOfRange { opcode: Opcode::PtrSet, value: 256, bits: 8 }
        ));

        let err = encode_all(vec![
            Instruction::s_alloc(16, "w"),
            Instruction::duo_set(Variable::new("w"), -32769),
        ])
        .unwrap_err();
        assert!(matches!(err, CompileError::ImmediateOutOfRange { bits: 16, .. }));
    }

    #[test]
    fn absolute_bindings_use_disp32_addressing() {
        let code = encode_all(vec![
            Instruction::ptr_dec("port", 0x2000),
            Instruction::ptr_dec_off("port_hi", Variable::new("port"), 4),
            Instruction::quad_set(Variable::new("port_hi"), 7),
        ])
        .unwrap();

        assert_eq!(code, [0xC7, 0x04, 0x25, 0x04, 0x20, 0, 0, 7, 0, 0, 0]);
    }

    #[test]
    fn arithmetic_goes_through_eax() {
        let code = three_slots(Opcode::IAdd);
        assert_eq!(
            &code[21..],
            &[
                0x8B, 0x84, 0x24, 8, 0, 0, 0, // mov eax, [rsp+8]
                0x03, 0x84, 0x24, 4, 0, 0, 0, // add eax, [rsp+4]
                0x89, 0x84, 0x24, 0, 0, 0, 0, // mov [rsp+0], eax
            ]
        );
    }

    #[test]
    fn division_sign_extends_into_edx() {
        let code = three_slots(Opcode::IDiv);
        assert_eq!(
            &code[21..],
            &[
                0x8B, 0x84, 0x24, 8, 0, 0, 0, // mov eax, [rsp+8]
                0x99, // cdq
                0xF7, 0xBC, 0x24, 4, 0, 0, 0, // idiv dword [rsp+4]
                0x89, 0x84, 0x24, 0, 0, 0, 0, // mov [rsp+0], eax
            ]
        );
    }

    #[test]
    fn equality_uses_sete() {
        let code = three_slots(Opcode::ICmp);
        assert_eq!(
            &code[21..],
            &[
                0x8B, 0x84, 0x24, 8, 0, 0, 0, // mov eax, [rsp+8]
                0x3B, 0x84, 0x24, 4, 0, 0, 0, // cmp eax, [rsp+4]
                0x0F, 0x94, 0xC0, // sete al
                0x0F, 0xB6, 0xC0, // movzx eax, al
                0x89, 0x84, 0x24, 0, 0, 0, 0, // mov [rsp+0], eax
            ]
        );
    }

    #[test]
    fn comparisons_materialize_flags() {
        let code = encode_all(vec![
            Instruction::s_alloc(32, "a"),
            Instruction::binary(Opcode::ICmpL, Variable::new("a"), Variable::new("a"), Variable::new("a")).unwrap(),
        ])
        .unwrap();

        // setge al; movzx eax, al
        assert_eq!(&code[21..27], &[0x0F, 0x9D, 0xC0, 0x0F, 0xB6, 0xC0]);
        assert_eq!(code.len(), 7 + 27);
    }

    #[test]
    fn parameter_registers() {
        let code = encode_all(vec![
            Instruction::s_alloc(32, "p"),
            Instruction::prm_load(Variable::new("p"), 2),
            Instruction::prm_push(Variable::new("p"), 1),
        ])
        .unwrap();

        // mov rax, r8; mov [rsp+0], eax
        assert_eq!(
            &code[7..17],
            &[0x4C, 0x89, 0xC0, 0x89, 0x84, 0x24, 0, 0, 0, 0]
        );
        // movsxd rdx, dword [rsp+0]
        assert_eq!(&code[17..], &[0x48, 0x63, 0x94, 0x24, 0, 0, 0, 0]);

        let err = encode_all(vec![
            Instruction::s_alloc(32, "p"),
            Instruction::prm_push(Variable::new("p"), 4),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::ParameterIndexOutOfRange { index: 4, available: 4 }
        ));
    }

    #[test]
    fn return_value_moves_into_eax() {
        let code = encode_all(vec![
            Instruction::s_alloc(32, "r"),
            Instruction::ret_push(Variable::new("r")),
        ])
        .unwrap();
        assert_eq!(&code[7..], &[0x8B, 0x84, 0x24, 0, 0, 0, 0]);
    }

    #[test]
    fn frame_save_and_restore() {
        let code = encode_all(vec![
            Instruction::stack_save(),
            Instruction::stack_load(),
        ])
        .unwrap();
        // push rbp; mov rbp, rsp; pop rbp
        assert_eq!(code, [0x55, 0x48, 0x89, 0xE5, 0x5D]);

        let err = encode_all(vec![Instruction::stack_load()]).unwrap_err();
        assert!(matches!(err, CompileError::UnmatchedStackLoad));
    }

    #[test]
    fn saved_frame_pointer_is_skipped() {
        let code = encode_all(vec![
            Instruction::s_alloc(32, "x"),
            Instruction::stack_save(),
            Instruction::quad_set(Variable::new("x"), 5),
            Instruction::stack_load(),
            Instruction::quad_set(Variable::new("x"), 6),
        ])
        .unwrap();

        // mov dword [rsp+8], 5 while rbp sits on top of x
        assert_eq!(&code[11..22], &[0xC7, 0x84, 0x24, 8, 0, 0, 0, 5, 0, 0, 0]);
        // mov dword [rsp+0], 6 once it is popped
        assert_eq!(&code[23..], &[0xC7, 0x84, 0x24, 0, 0, 0, 0, 6, 0, 0, 0]);
    }

    #[test]
    fn free_releases_live_frame() {
        let code = encode_all(vec![
            Instruction::s_alloc(32, "a"),
            Instruction::s_alloc(64, "b"),
            Instruction::stack_free_func(),
            Instruction::stack_free_func(),
        ])
        .unwrap();

        assert_eq!(&code[14..21], &[0x48, 0x81, 0xC4, 12, 0, 0, 0]);
        assert_eq!(&code[21..], &[0x48, 0x81, 0xC4, 0, 0, 0, 0]);
    }

    #[test]
    fn byte_conditions_compare_one_byte() {
        let code = encode_all(vec![
            Instruction::s_alloc(32, "wide"),
            Instruction::quad_set(Variable::new("wide"), 0x100),
            Instruction::s_alloc(8, "flag"),
            Instruction::ptr_set(Variable::new("flag"), 0),
            Instruction::cond_block_swap(0, Variable::new("flag")),
        ])
        .unwrap();

        // cmp byte [rsp+0], 0
        assert_eq!(&code[33..41], &[0x80, 0xBC, 0x24, 0, 0, 0, 0, 0]);
        assert_eq!(code[41], 0x75);
    }

    #[test]
    fn accesses_stay_inside_their_slot() {
        let cases = [
            (
                vec![
                    Instruction::s_alloc(16, "half"),
                    Instruction::cond_block_swap(0, Variable::new("half")),
                ],
                Opcode::CondBlockSwap,
                32,
                16,
            ),
            (
                vec![
                    Instruction::s_alloc(64, "wide"),
                    Instruction::logical_block_swap(0, 0, Variable::new("wide")),
                ],
                Opcode::LogicalBlockSwap,
                32,
                64,
            ),
            (
                vec![
                    Instruction::s_alloc(16, "w"),
                    Instruction::quad_set(Variable::new("w"), 1),
                ],
                Opcode::QuadSet,
                32,
                16,
            ),
            (
                vec![
                    Instruction::s_alloc(32, "a"),
                    Instruction::s_alloc(8, "b"),
                    Instruction::binary(Opcode::IAdd, Variable::new("a"), Variable::new("a"), Variable::new("b"))
                        .unwrap(),
                ],
                Opcode::IAdd,
                32,
                8,
            ),
            (
                vec![
                    Instruction::s_alloc(8, "r"),
                    Instruction::ret_push(Variable::new("r")),
                ],
                Opcode::RetPush,
                32,
                8,
            ),
            (
                vec![
                    Instruction::s_alloc(32, "q"),
                    Instruction::oct_set(Variable::new("q"), 1),
                ],
                Opcode::OctSet,
                64,
                32,
            ),
        ];

        for (instructions, expected, access_bits, slot_bits) in cases {
            match encode_all(instructions).unwrap_err() {
                CompileError::OperandWidth { opcode, access, bits, .. } => {
                    assert_eq!(opcode, expected);
                    assert_eq!(access, access_bits);
                    assert_eq!(bits, slot_bits);
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    #[test]
    fn unknown_symbols_fail() {
        let err = encode_all(vec![Instruction::ret_push(Variable::new("nope"))]).unwrap_err();
        assert!(matches!(err, CompileError::UnknownSymbol { name } if name == "nope"));
    }

    #[test]
    fn unaligned_offsets_fail() {
        let err = encode_all(vec![
            Instruction::s_alloc(32, "a"),
            Instruction::quad_set(Variable::with_offset("a", 4), 1),
        ])
        .unwrap_err();
        assert!(matches!(err, CompileError::UnalignedOffset { bits: -4, .. }));
    }

    #[test]
    fn self_call() {
        let code = encode_all(vec![Instruction::call("t")]).unwrap();
        assert_eq!(code, [0xE8, 0xFB, 0xFF, 0xFF, 0xFF]);

        let err = encode_all(vec![Instruction::call("other")]).unwrap_err();
        assert!(matches!(err, CompileError::UnknownFunction { name } if name == "other"));
    }

    #[test]
    fn displacement_range_checks() {
        assert_eq!(rel8(Opcode::CondBlockSwap, 127).unwrap(), 127);
        assert_eq!(rel8(Opcode::CondBlockSwap, -128).unwrap(), -128);
        assert!(matches!(
            rel8(Opcode::CondBlockSwap, 128),
            Err(CompileError::DisplacementOverflow { displacement: 128, bits: 8, .. })
        ));
        assert!(rel32(Opcode::BlockSwap, i64::from(i32::MAX) + 1).is_err());
    }
}
