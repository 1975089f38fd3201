//! End-to-end encoding checks: IR in, machine code out, decoded with iced-x86.

use quickfall::{
    compile_function, compile_module, disassemble, parse_module, BasicBlock, CompilationSession,
    CompileError, CompileOptions, Function, Instruction, Module, Opcode, Variable,
};
use bumpalo::Bump;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Decoded text with the column padding collapsed.
fn asm(code: &[u8]) -> Vec<String> {
    disassemble(code, 0)
        .into_iter()
        .map(|line| line.text.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect()
}

fn func(name: &str, blocks: Vec<Vec<Instruction>>) -> Function {
    Function::with_blocks(name, blocks.into_iter().map(BasicBlock::from).collect())
}

#[test]
fn alloc_store_ret_scenario() {
    init_logging();
    let f = func(
        "main",
        vec![vec![
            Instruction::s_alloc(32, "x"),
            Instruction::quad_set(Variable::new("x"), 5),
            Instruction::ret(),
        ]],
    );

    let code = compile_function(&f).unwrap();
    assert_eq!(
        code,
        [
            0x48, 0x81, 0xEC, 0x04, 0x00, 0x00, 0x00, // sub rsp, 4
            0xC7, 0x84, 0x24, 0x00, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, // mov [rsp], 5
            0xC3, // ret
        ]
    );
    assert_eq!(code.len(), f.encoded_len());

    let lines = disassemble(&code, 0);
    assert_eq!(lines.len(), 3);
    assert!(lines[1].text.starts_with("mov"), "{}", lines[1].text);
}

#[test]
fn two_block_branch_scenario() {
    let f = func("main", vec![vec![Instruction::block_swap(1)], vec![Instruction::ret()]]);

    let code = compile_function(&f).unwrap();
    assert_eq!(code, [0xE9, 0, 0, 0, 0, 0xC3]);

    let lines = disassemble(&code, 0);
    assert_eq!(lines[0].bytes.len(), 5);
    assert_eq!(lines[0].branch_target, Some(5));
}

#[test]
fn branch_targets_land_on_block_starts() {
    let f = func(
        "loop",
        vec![
            vec![
                Instruction::s_alloc(32, "i"),
                Instruction::s_alloc(32, "c"),
                Instruction::quad_set(Variable::new("i"), 10),
                Instruction::block_swap(2),
            ],
            vec![
                Instruction::binary(Opcode::ISub, Variable::new("i"), Variable::new("i"), Variable::new("c"))
                    .unwrap(),
                Instruction::block_swap(2),
            ],
            vec![
                Instruction::binary(Opcode::ICmpH, Variable::new("c"), Variable::new("i"), Variable::new("c"))
                    .unwrap(),
                Instruction::logical_block_swap(1, 3, Variable::new("c")),
            ],
            vec![
                Instruction::cond_block_swap(0, Variable::new("c")),
                Instruction::stack_free_func(),
                Instruction::ret(),
            ],
        ],
    );

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let compiled = compile_module(&Module::from(f.clone()), &session, &CompileOptions::default()).unwrap();
    let starts = compiled.functions[0].block_offsets;
    assert_eq!(starts.len(), 4);

    // Every decoded branch must target the start of a block.
    let lines = disassemble(compiled.code, 0);
    let targets: Vec<u64> = lines.iter().filter_map(|l| l.branch_target).collect();
    let expected: Vec<u64> = [2usize, 2, 1, 3, 0]
        .iter()
        .map(|&b| starts[b] as u64)
        .collect();
    assert_eq!(targets, expected);

    // Decoded instruction boundaries line up with every block start.
    for start in starts {
        assert!(lines.iter().any(|l| l.offset == *start), "no instruction at {start}");
    }
    assert_eq!(compiled.code.len(), f.encoded_len());
}

fn short_branch_over(filler: usize) -> Function {
    func(
        "short",
        vec![
            vec![
                Instruction::s_alloc(32, "c"),
                Instruction::cond_block_swap(2, Variable::new("c")),
            ],
            vec![Instruction::ret(); filler],
            vec![Instruction::ret()],
        ],
    )
}

#[test]
fn short_displacement_boundary() {
    let code = compile_function(&short_branch_over(127)).unwrap();
    // cmp dword [rsp], 0; jne +127
    assert_eq!(&code[7..17], &[0x83, 0xBC, 0x24, 0, 0, 0, 0, 0, 0x75, 127]);
    let lines = disassemble(&code, 0);
    assert_eq!(lines[2].branch_target, Some(17 + 127));

    let err = compile_function(&short_branch_over(128)).unwrap_err();
    assert!(matches!(
        err.root(),
        CompileError::DisplacementOverflow {
            opcode: Opcode::CondBlockSwap,
            displacement: 128,
            bits: 8
        }
    ));
}

#[test]
fn backward_short_branch() {
    let f = func(
        "back",
        vec![
            vec![Instruction::s_alloc(32, "c")],
            vec![Instruction::cond_block_swap(1, Variable::new("c"))],
        ],
    );
    let code = compile_function(&f).unwrap();
    // jne back to offset 7 from the end of the 10 byte branch at 7
    assert_eq!(code[16] as i8, -10);
}

#[test]
fn compilation_is_deterministic() {
    let source = include_str!("../demos/factorial.qasm");
    let module = parse_module(source).unwrap();

    let compile = || {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let compiled = compile_module(&module, &session, &CompileOptions::default()).unwrap();
        compiled.code.to_vec()
    };
    assert_eq!(compile(), compile());
}

#[test]
fn unknown_symbols_are_rejected() {
    for instruction in [
        Instruction::quad_set(Variable::new("never"), 1),
        Instruction::ret_push(Variable::new("never")),
        Instruction::cond_block_swap(0, Variable::new("never")),
        Instruction::ptr_dec_off("alias", Variable::new("never"), 8),
    ] {
        let f = func("f", vec![vec![instruction]]);
        let err = compile_function(&f).unwrap_err();
        assert!(
            matches!(err.root(), CompileError::UnknownSymbol { name } if name == "never"),
            "{err}"
        );
    }
}

#[test]
fn duplicate_allocation_is_rejected() {
    let f = func(
        "f",
        vec![vec![Instruction::s_alloc(32, "x"), Instruction::s_alloc(64, "x")]],
    );
    let err = compile_function(&f).unwrap_err();
    assert!(matches!(err.root(), CompileError::DuplicateSymbol { name } if name == "x"));
    assert!(err.to_string().contains("`f`"));
}

#[test]
fn calls_reach_their_callee() {
    let module = parse_module(include_str!("../demos/factorial.qasm")).unwrap();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let compiled = compile_module(&module, &session, &CompileOptions::default()).unwrap();

    let main = compiled.function("main").unwrap();
    let factorial = compiled.function_offset("factorial").unwrap();
    let lines = disassemble(compiled.function_code("main").unwrap(), main.offset as u64);
    let call = lines.iter().find(|l| l.text.starts_with("call")).unwrap();
    assert_eq!(call.branch_target, Some(factorial as u64));

    // No byte sequence decodes as garbage.
    let all = disassemble(compiled.code, 0);
    assert!(all.iter().all(|l| !l.text.contains("bad")));

    let stats = session.stats();
    assert_eq!(stats.functions_compiled, 2);
    assert_eq!(stats.instruction_counts[&Opcode::Call], 1);
}

#[test]
fn derived_and_absolute_names() {
    let module = parse_module(include_str!("../demos/fields.qasm")).unwrap();
    let code = compile_function(&module.functions()[0]).unwrap();
    let lines = disassemble(&code, 0);

    // sub rsp, 8; mov [rsp], 0x10; mov [rsp+4], -1
    assert_eq!(lines[1].bytes[3..7], [0, 0, 0, 0]);
    assert_eq!(lines[2].bytes[3..7], [4, 0, 0, 0]);
    // mov word [0x2000], 0xBEEF
    assert_eq!(lines[3].bytes, [0x66, 0xC7, 0x04, 0x25, 0x00, 0x20, 0, 0, 0xEF, 0xBE]);
}

#[test]
fn narrow_conditions_ignore_their_neighbours() {
    let module = parse_module(
        "function main {
@0:
    S_ALLOC 32 %wide
    QUAD_SET %wide 0x100
    S_ALLOC 8 %flag
    PTR_SET %flag 0
    COND_BLOCK_SWAP 1 %flag
@1:
    RET
}",
    )
    .unwrap();
    let code = compile_function(&module.functions()[0]).unwrap();
    let text = asm(&code);
    assert_eq!(text[3], "mov byte ptr [rsp], 0");
    assert_eq!(text[4], "cmp byte ptr [rsp], 0");
    assert!(text[5].starts_with("jne"));
}

#[test]
fn slots_survive_a_frame_save() {
    let module = parse_module(
        "function main {
@0:
    S_ALLOC 32 %x
    STACK_SAVE
    QUAD_SET %x 5
    STACK_LOAD
    RET
}",
    )
    .unwrap();
    let code = compile_function(&module.functions()[0]).unwrap();
    assert_eq!(
        asm(&code),
        [
            "sub rsp, 4",
            "push rbp",
            "mov rbp, rsp",
            "mov dword ptr [rsp+8], 5",
            "pop rbp",
            "ret",
        ]
    );
}

#[test]
fn frame_saves_before_each_allocation() {
    // The shape a front end emits for consecutive declarations.
    let module = parse_module(
        "function main {
@0:
    STACK_SAVE
    S_ALLOC 32 %a
    STACK_SAVE
    S_ALLOC 32 %b
    QUAD_SET %a 1
    QUAD_SET %b 2
    RET
}",
    )
    .unwrap();
    let code = compile_function(&module.functions()[0]).unwrap();
    let text = asm(&code);
    assert_eq!(text[6], "mov dword ptr [rsp+0Ch], 1");
    assert_eq!(text[7], "mov dword ptr [rsp], 2");
}
