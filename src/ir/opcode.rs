//! Opcode catalogue of the Quickfall IR.
//!
//! Every opcode has a fixed parameter signature and a fixed encoded length on
//! x86-64. The length never depends on the instruction's parameters, which is
//! what lets the block layout be computed before any byte is emitted.

use super::ParamKind;
use std::fmt;

use super::ParamKind::{Int, String as Str, Variable as Var};

/// Operation codes. Discriminants are the serialized opcode bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Jump to a block unconditionally.
    BlockSwap = 0,
    /// Jump to a block if the condition slot is non-zero.
    CondBlockSwap = 1,
    /// Jump to one of two blocks depending on the condition slot.
    LogicalBlockSwap = 2,
    /// Reserve bits on the frame and bind a name to the new slot.
    SAlloc = 3,
    IAdd = 4,
    ISub = 5,
    IMul = 6,
    IDiv = 7,
    /// 32-bit equality.
    ICmp = 8,
    /// 32-bit signed greater-than.
    ICmpH = 9,
    /// 32-bit signed greater-or-equal.
    ICmpL = 10,
    /// Slot to parameter register.
    PrmPush = 11,
    /// Slot to return register.
    RetPush = 12,
    Call = 13,
    Ret = 14,
    StackSave = 15,
    StackLoad = 16,
    /// Release every frame bit still live in the function.
    StackFreeFunc = 17,
    /// Store 8 bits.
    PtrSet = 18,
    /// Store 32 bits.
    QuadSet = 19,
    /// Store 16 bits.
    DuoSet = 20,
    /// Store 64 bits.
    OctSet = 21,
    /// Bind a name to an absolute address.
    PtrDec = 22,
    /// Bind a name to another name's location plus an offset.
    PtrDecOff = 23,
    /// Parameter register to slot.
    PrmLoad = 24,
}

/// Static description of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    pub mnemonic: &'static str,
    pub params: &'static [ParamKind],
    /// Encoded size in bytes on x86-64.
    pub encoded_len: usize,
}

impl Opcode {
    pub const ALL: [Opcode; 25] = [
        Opcode::BlockSwap,
        Opcode::CondBlockSwap,
        Opcode::LogicalBlockSwap,
        Opcode::SAlloc,
        Opcode::IAdd,
        Opcode::ISub,
        Opcode::IMul,
        Opcode::IDiv,
        Opcode::ICmp,
        Opcode::ICmpH,
        Opcode::ICmpL,
        Opcode::PrmPush,
        Opcode::RetPush,
        Opcode::Call,
        Opcode::Ret,
        Opcode::StackSave,
        Opcode::StackLoad,
        Opcode::StackFreeFunc,
        Opcode::PtrSet,
        Opcode::QuadSet,
        Opcode::DuoSet,
        Opcode::OctSet,
        Opcode::PtrDec,
        Opcode::PtrDecOff,
        Opcode::PrmLoad,
    ];

    pub const fn info(self) -> OpInfo {
        use Opcode::*;
        match self {
            BlockSwap => OpInfo { mnemonic: "BLOCK_SWAP", params: &[Int], encoded_len: 5 },
            CondBlockSwap => OpInfo { mnemonic: "COND_BLOCK_SWAP", params: &[Int, Var], encoded_len: 10 },
            LogicalBlockSwap => OpInfo { mnemonic: "LOGICAL_BLOCK_SWAP", params: &[Int, Int, Var], encoded_len: 19 },
            SAlloc => OpInfo { mnemonic: "S_ALLOC", params: &[Int, Var], encoded_len: 7 },
            IAdd => OpInfo { mnemonic: "IADD", params: &[Var, Var, Var], encoded_len: 21 },
            ISub => OpInfo { mnemonic: "ISUB", params: &[Var, Var, Var], encoded_len: 21 },
            IMul => OpInfo { mnemonic: "IMUL", params: &[Var, Var, Var], encoded_len: 22 },
            IDiv => OpInfo { mnemonic: "IDIV", params: &[Var, Var, Var], encoded_len: 22 },
            ICmp => OpInfo { mnemonic: "ICMP", params: &[Var, Var, Var], encoded_len: 27 },
            ICmpH => OpInfo { mnemonic: "ICMP_H", params: &[Var, Var, Var], encoded_len: 27 },
            ICmpL => OpInfo { mnemonic: "ICMP_L", params: &[Var, Var, Var], encoded_len: 27 },
            PrmPush => OpInfo { mnemonic: "PRM_PUSH", params: &[Var, Int], encoded_len: 8 },
            RetPush => OpInfo { mnemonic: "RET_PUSH", params: &[Var], encoded_len: 7 },
            Call => OpInfo { mnemonic: "CALL", params: &[Str], encoded_len: 5 },
            Ret => OpInfo { mnemonic: "RET", params: &[], encoded_len: 1 },
            StackSave => OpInfo { mnemonic: "STACK_SAVE", params: &[], encoded_len: 4 },
            StackLoad => OpInfo { mnemonic: "STACK_LOAD", params: &[], encoded_len: 1 },
            StackFreeFunc => OpInfo { mnemonic: "STACK_FREE_FUNC", params: &[], encoded_len: 7 },
            PtrSet => OpInfo { mnemonic: "PTR_SET", params: &[Var, Int], encoded_len: 8 },
            QuadSet => OpInfo { mnemonic: "QUAD_SET", params: &[Var, Int], encoded_len: 11 },
            DuoSet => OpInfo { mnemonic: "DUO_SET", params: &[Var, Int], encoded_len: 10 },
            OctSet => OpInfo { mnemonic: "OCT_SET", params: &[Var, Int], encoded_len: 18 },
            PtrDec => OpInfo { mnemonic: "PTR_DEC", params: &[Var, Int], encoded_len: 0 },
            PtrDecOff => OpInfo { mnemonic: "PTR_DEC_OFF", params: &[Var, Var, Int], encoded_len: 0 },
            PrmLoad => OpInfo { mnemonic: "PRM_LOAD", params: &[Var, Int], encoded_len: 10 },
        }
    }

    pub const fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    pub const fn params(self) -> &'static [ParamKind] {
        self.info().params
    }

    pub const fn encoded_len(self) -> usize {
        self.info().encoded_len
    }

    /// Serialized opcode byte.
    pub const fn byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }

    /// Exact, case-sensitive mnemonic lookup.
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.mnemonic() == mnemonic)
    }

    /// Opcodes whose encoding refers to block offsets.
    pub const fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::BlockSwap | Opcode::CondBlockSwap | Opcode::LogicalBlockSwap
        )
    }

    /// Positions of block-index parameters.
    pub const fn block_params(self) -> &'static [usize] {
        match self {
            Opcode::BlockSwap | Opcode::CondBlockSwap => &[0],
            Opcode::LogicalBlockSwap => &[0, 1],
            _ => &[],
        }
    }

    /// Position of the parameter that this opcode binds as a new name, if any.
    pub const fn binding_param(self) -> Option<usize> {
        match self {
            Opcode::SAlloc => Some(1),
            Opcode::PtrDec | Opcode::PtrDecOff => Some(0),
            _ => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_match_table_order() {
        for (index, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(op.byte() as usize, index);
            assert_eq!(Opcode::from_byte(op.byte()), Some(*op));
        }
        assert_eq!(Opcode::from_byte(Opcode::ALL.len() as u8), None);
    }

    #[test]
    fn mnemonic_lookup_is_exact() {
        assert_eq!(Opcode::from_mnemonic("ICMP_H"), Some(Opcode::ICmpH));
        assert_eq!(Opcode::from_mnemonic("ICMP"), Some(Opcode::ICmp));
        assert_eq!(Opcode::from_mnemonic("icmp"), None);
        assert_eq!(Opcode::from_mnemonic("ICMP_"), None);
    }

    #[test]
    fn pointer_declarations_emit_nothing() {
        assert_eq!(Opcode::PtrDec.encoded_len(), 0);
        assert_eq!(Opcode::PtrDecOff.encoded_len(), 0);
        assert_eq!(Opcode::BlockSwap.encoded_len(), 5);
    }
}
