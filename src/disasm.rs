// This module turns encoder output back into readable x86-64 assembly with iced-x86. The CLI uses
// it for the disasm command and to print listings at trace level, and tests use it to check that
// every emitted byte sequence decodes to the intended instruction with the intended length and
// branch target. Module listings interleave function names and block labels taken from the
// compiled module's offset tables.

//! Disassembly of compiled code.

use crate::compiler::CompiledModule;
use iced_x86::{Decoder, DecoderOptions, Formatter, IntelFormatter};

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisassembledLine {
    /// Offset from the start of the decoded bytes.
    pub offset: usize,
    pub bytes: Vec<u8>,
    /// Intel syntax text.
    pub text: String,
    /// Absolute target of a near jump, conditional jump or call.
    pub branch_target: Option<u64>,
}

/// Decode `code` as 64-bit x86, with the first byte at address `base_ip`.
pub fn disassemble(code: &[u8], base_ip: u64) -> Vec<DisassembledLine> {
    let mut decoder = Decoder::with_ip(64, code, base_ip, DecoderOptions::NONE);
    let mut formatter = IntelFormatter::new();
    formatter.options_mut().set_first_operand_char_index(8);
    formatter.options_mut().set_space_after_operand_separator(true);

    let mut lines = Vec::new();
    for instruction in &mut decoder {
        let offset = (instruction.ip() - base_ip) as usize;
        let mut text = String::new();
        formatter.format(&instruction, &mut text);

        let is_branch = instruction.is_jmp_short_or_near()
            || instruction.is_jcc_short_or_near()
            || instruction.is_call_near();
        lines.push(DisassembledLine {
            offset,
            bytes: code[offset..offset + instruction.len()].to_vec(),
            text,
            branch_target: is_branch.then(|| instruction.near_branch_target()),
        });
    }
    lines
}

/// Format decoded lines as `offset: bytes text`.
pub fn format_lines(lines: &[DisassembledLine]) -> String {
    lines.iter().map(|line| format_line(line) + "\n").collect()
}

fn format_line(line: &DisassembledLine) -> String {
    let hex: Vec<String> = line.bytes.iter().map(|b| format!("{b:02X}")).collect();
    format!("{:08X}  {:<30} {}", line.offset, hex.join(" "), line.text)
}

/// Listing of a whole module with function and block labels.
pub fn format_module(module: &CompiledModule<'_>) -> String {
    let mut out = String::new();
    for function in &module.functions {
        let code = &module.code[function.offset..function.offset + function.len];
        out.push_str(function.name);
        out.push_str(":\n");

        for line in disassemble(code, function.offset as u64) {
            if let Some(block) = function.block_offsets.iter().position(|&o| o == line.offset) {
                out.push_str(&format!("  @{block}:\n"));
            }
            let shifted = DisassembledLine {
                offset: line.offset + function.offset,
                ..line
            };
            out.push_str("    ");
            out.push_str(&format_line(&shifted));
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_lengths_and_targets() {
        // sub rsp, 4; jmp +0; ret
        let code = [0x48, 0x81, 0xEC, 4, 0, 0, 0, 0xE9, 0, 0, 0, 0, 0xC3];
        let lines = disassemble(&code, 0x1000);

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].bytes.len(), 7);
        assert!(lines[0].text.starts_with("sub"));
        assert_eq!(lines[1].offset, 7);
        assert_eq!(lines[1].branch_target, Some(0x100C));
        assert_eq!(lines[2].text, "ret");
        assert_eq!(lines[2].branch_target, None);
    }

    #[test]
    fn listing_has_one_row_per_instruction() {
        let lines = disassemble(&[0x55, 0x5D, 0xC3], 0);
        let listing = format_lines(&lines);
        assert_eq!(listing.lines().count(), 3);
        assert!(listing.starts_with("00000000  55"));
    }

    #[test]
    fn module_listing_labels_blocks() {
        use crate::compiler::{compile_module, CompileOptions};
        use crate::core::CompilationSession;
        use crate::ir::{BasicBlock, Function, Instruction, Module};
        use bumpalo::Bump;

        let func = Function::with_blocks(
            "main",
            vec![
                BasicBlock::from(vec![Instruction::block_swap(1)]),
                BasicBlock::from(vec![Instruction::ret()]),
            ],
        );
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let compiled =
            compile_module(&Module::from(func), &session, &CompileOptions::default()).unwrap();

        let listing = format_module(&compiled);
        let rows: Vec<&str> = listing.lines().collect();
        assert_eq!(rows[0], "main:");
        assert_eq!(rows[1], "  @0:");
        assert!(rows[2].starts_with("    00000000  E9 00 00 00 00"));
        assert_eq!(rows[3], "  @1:");
        assert!(rows[4].starts_with("    00000005  C3"));
    }
}
