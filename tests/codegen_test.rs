// End-to-end compilations through compile_method with the baseline register
// allocator: constant returns, parameter arithmetic, diamond control flow with
// a phi, BSS string loads with their linker patches, JIT root tables, and
// strength-reduced constant division.

use bumpalo::Bump;
use kestrel::core::{CompilationKind, CompilationSession, CompilerOptions};
use kestrel::graph::instruction::StringLoadKind;
use kestrel::graph::{DataType, HGraph, HInstructionKind, LoopInformation, NO_DEX_PC};
use kestrel::x86::patch::LinkerPatch;
use kestrel::{
    compile_method, CompiledMethod, CpuFeatures, NaiveRegisterAllocator, RuntimeLayout,
};

fn compile(graph: &mut HGraph<'_>, options: CompilerOptions) -> CompiledMethod {
    let _ = env_logger::builder().is_test(true).try_init();
    graph.compute_reverse_post_order();
    let mut allocator = NaiveRegisterAllocator::new();
    compile_method(
        graph,
        &mut allocator,
        RuntimeLayout::for_testing(),
        CpuFeatures::default(),
        options,
    )
    .unwrap()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn test_return_constant() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = HGraph::new(&session, "Foo.answer");
    let entry = graph.entry_block();
    let exit = graph.add_block();
    graph.set_exit_block(exit);
    graph.connect(entry, exit);
    let value = graph.add_instruction(
        entry,
        HInstructionKind::IntConstant(42),
        DataType::Int32,
        vec![],
        NO_DEX_PC,
    );
    graph.add_instruction(entry, HInstructionKind::Return, DataType::Void, vec![value], 0);
    graph.add_instruction(exit, HInstructionKind::Exit, DataType::Void, vec![], NO_DEX_PC);

    let method = compile(&mut graph, CompilerOptions::default());
    // The constant is materialised into EAX for the managed ABI.
    assert!(contains(&method.code, &[0xB8, 42, 0, 0, 0]));
    assert_eq!(*method.code.last().unwrap(), 0xC3);
    assert!(method.linker_patches.is_empty());
    assert_eq!(method.number_of_jit_roots, 0);
}

#[test]
fn test_add_two_parameters() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = HGraph::new(&session, "Foo.add");
    graph.number_of_vregs = 2;
    let entry = graph.entry_block();
    let exit = graph.add_block();
    graph.set_exit_block(exit);
    graph.connect(entry, exit);
    let a = graph.add_instruction(
        entry,
        HInstructionKind::ParameterValue { index: 0 },
        DataType::Int32,
        vec![],
        NO_DEX_PC,
    );
    let b = graph.add_instruction(
        entry,
        HInstructionKind::ParameterValue { index: 1 },
        DataType::Int32,
        vec![],
        NO_DEX_PC,
    );
    let sum = graph.add_instruction(entry, HInstructionKind::Add, DataType::Int32, vec![a, b], 0);
    graph.add_instruction(entry, HInstructionKind::Return, DataType::Void, vec![sum], 1);
    graph.add_instruction(exit, HInstructionKind::Exit, DataType::Void, vec![], NO_DEX_PC);

    let method = compile(&mut graph, CompilerOptions::default());
    assert!(!method.code.is_empty());
    assert_eq!(method.frame_size % 16, 0);
    assert_eq!(*method.code.last().unwrap(), 0xC3);
}

#[test]
fn test_diamond_with_phi() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = HGraph::new(&session, "Foo.select");
    let entry = graph.entry_block();
    let then_block = graph.add_block();
    let else_block = graph.add_block();
    let merge = graph.add_block();
    let exit = graph.add_block();
    graph.set_exit_block(exit);
    graph.connect(entry, then_block);
    graph.connect(entry, else_block);
    graph.connect(then_block, merge);
    graph.connect(else_block, merge);
    graph.connect(merge, exit);

    let flag = graph.add_instruction(
        entry,
        HInstructionKind::ParameterValue { index: 0 },
        DataType::Bool,
        vec![],
        NO_DEX_PC,
    );
    let one = graph.add_instruction(
        entry,
        HInstructionKind::IntConstant(1),
        DataType::Int32,
        vec![],
        NO_DEX_PC,
    );
    let two = graph.add_instruction(
        entry,
        HInstructionKind::IntConstant(2),
        DataType::Int32,
        vec![],
        NO_DEX_PC,
    );
    graph.add_instruction(entry, HInstructionKind::If, DataType::Void, vec![flag], 0);
    graph.add_instruction(then_block, HInstructionKind::Goto, DataType::Void, vec![], 1);
    graph.add_instruction(else_block, HInstructionKind::Goto, DataType::Void, vec![], 2);
    let phi = graph.add_phi(merge, DataType::Int32, vec![one, two], 3);
    graph.add_instruction(merge, HInstructionKind::Return, DataType::Void, vec![phi], 3);
    graph.add_instruction(exit, HInstructionKind::Exit, DataType::Void, vec![], NO_DEX_PC);

    let method = compile(&mut graph, CompilerOptions::default());
    // A materialised If tests the flag and branches.
    let has_branch = method
        .code
        .windows(2)
        .any(|w| w[0] == 0x0F && (0x80..=0x8F).contains(&w[1]));
    assert!(has_branch);
    assert_eq!(*method.code.last().unwrap(), 0xC3);
}

#[test]
fn test_string_bss_entry_records_patch() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = HGraph::new(&session, "Foo.loadString");
    let entry = graph.entry_block();
    let exit = graph.add_block();
    graph.set_exit_block(exit);
    graph.connect(entry, exit);
    let base = graph.add_instruction(
        entry,
        HInstructionKind::ComputeBaseMethodAddress,
        DataType::Int32,
        vec![],
        NO_DEX_PC,
    );
    graph.add_instruction(
        entry,
        HInstructionKind::LoadString { string_index: 7, load_kind: StringLoadKind::BssEntry },
        DataType::Reference,
        vec![base],
        4,
    );
    graph.add_instruction(entry, HInstructionKind::ReturnVoid, DataType::Void, vec![], 5);
    graph.add_instruction(exit, HInstructionKind::Exit, DataType::Void, vec![], NO_DEX_PC);

    let method = compile(&mut graph, CompilerOptions::default());
    assert_eq!(method.linker_patches.len(), 1);
    match &method.linker_patches[0] {
        LinkerPatch::StringBssEntry { literal_offset, pc_insn_offset, target } => {
            assert_eq!(target.string_index, 7);
            // The literal slot sits after the landmark that computed the base.
            assert!(literal_offset > pc_insn_offset);
        }
        other => panic!("unexpected patch {:?}", other),
    }
    // The resolution slow path is a safepoint.
    assert!(!method.stack_maps.is_empty());
}

#[test]
fn test_jit_string_root() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = HGraph::new(&session, "Foo.jitString");
    let entry = graph.entry_block();
    let exit = graph.add_block();
    graph.set_exit_block(exit);
    graph.connect(entry, exit);
    graph.add_instruction(
        entry,
        HInstructionKind::LoadString {
            string_index: 3,
            load_kind: StringLoadKind::JitTableAddress,
        },
        DataType::Reference,
        vec![],
        0,
    );
    graph.add_instruction(entry, HInstructionKind::ReturnVoid, DataType::Void, vec![], 1);
    graph.add_instruction(exit, HInstructionKind::Exit, DataType::Void, vec![], NO_DEX_PC);

    let options = CompilerOptions { is_jit: true, ..CompilerOptions::default() };
    let method = compile(&mut graph, options);
    assert_eq!(method.number_of_jit_roots, 1);
    assert!(method.linker_patches.is_empty());
}

#[test]
fn test_division_by_constant_uses_magic_number() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = HGraph::new(&session, "Foo.divBySeven");
    let entry = graph.entry_block();
    let exit = graph.add_block();
    graph.set_exit_block(exit);
    graph.connect(entry, exit);
    let dividend = graph.add_instruction(
        entry,
        HInstructionKind::ParameterValue { index: 0 },
        DataType::Int32,
        vec![],
        NO_DEX_PC,
    );
    let seven = graph.add_instruction(
        entry,
        HInstructionKind::IntConstant(7),
        DataType::Int32,
        vec![],
        NO_DEX_PC,
    );
    let quotient = graph.add_instruction(
        entry,
        HInstructionKind::Div,
        DataType::Int32,
        vec![dividend, seven],
        0,
    );
    graph.add_instruction(entry, HInstructionKind::Return, DataType::Void, vec![quotient], 1);
    graph.add_instruction(exit, HInstructionKind::Exit, DataType::Void, vec![], NO_DEX_PC);

    let method = compile(&mut graph, CompilerOptions::default());
    // No idiv: the magic multiplier for 7 appears as an immediate.
    assert!(contains(&method.code, &0x92492493u32.to_le_bytes()));
}

#[test]
fn test_baseline_is_larger_than_optimized() {
    fn leaf<'a>(session: &CompilationSession<'a>) -> HGraph<'a> {
        let mut graph = HGraph::new(session, "Foo.leaf");
        let entry = graph.entry_block();
        let exit = graph.add_block();
        graph.set_exit_block(exit);
        graph.connect(entry, exit);
        graph.add_instruction(entry, HInstructionKind::ReturnVoid, DataType::Void, vec![], 0);
        graph.add_instruction(exit, HInstructionKind::Exit, DataType::Void, vec![], NO_DEX_PC);
        graph
    }

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut optimized_graph = leaf(&session);
    let optimized = compile(&mut optimized_graph, CompilerOptions::default());

    let mut baseline_graph = leaf(&session);
    let baseline_options = CompilerOptions {
        compilation_kind: CompilationKind::Baseline,
        ..CompilerOptions::default()
    };
    let baseline = compile(&mut baseline_graph, baseline_options);
    assert!(baseline.code.len() > optimized.code.len());
}

#[test]
fn test_compiled_method_carries_cfi() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = HGraph::new(&session, "Foo.add");
    graph.number_of_vregs = 2;
    let entry = graph.entry_block();
    let exit = graph.add_block();
    graph.set_exit_block(exit);
    graph.connect(entry, exit);
    let a = graph.add_instruction(
        entry,
        HInstructionKind::ParameterValue { index: 0 },
        DataType::Int32,
        vec![],
        NO_DEX_PC,
    );
    let b = graph.add_instruction(
        entry,
        HInstructionKind::ParameterValue { index: 1 },
        DataType::Int32,
        vec![],
        NO_DEX_PC,
    );
    let sum = graph.add_instruction(entry, HInstructionKind::Add, DataType::Int32, vec![a, b], 0);
    graph.add_instruction(entry, HInstructionKind::Return, DataType::Void, vec![sum], 1);
    graph.add_instruction(exit, HInstructionKind::Exit, DataType::Void, vec![], NO_DEX_PC);

    let method = compile(&mut graph, CompilerOptions::default());
    assert!(method.frame_size > 0);
    // The frame allocation shows up as a DW_CFA_def_cfa_offset directive.
    assert!(!method.cfi.is_empty());
    assert!(method.cfi.contains(&0x0E));
}

#[test]
fn test_loop_back_edge_merges_suspend_check() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = HGraph::new(&session, "Foo.spin");
    let entry = graph.entry_block();
    let header = graph.add_block();
    let body = graph.add_block();
    let ret_block = graph.add_block();
    let exit = graph.add_block();
    graph.set_exit_block(exit);
    graph.connect(entry, header);
    graph.connect(header, body);
    graph.connect(header, ret_block);
    graph.connect(body, header);
    graph.connect(ret_block, exit);

    let flag = graph.add_instruction(
        entry,
        HInstructionKind::ParameterValue { index: 0 },
        DataType::Bool,
        vec![],
        NO_DEX_PC,
    );
    graph.add_instruction(entry, HInstructionKind::Goto, DataType::Void, vec![], 0);
    let check =
        graph.add_instruction(header, HInstructionKind::SuspendCheck, DataType::Void, vec![], 1);
    graph.add_instruction(header, HInstructionKind::If, DataType::Void, vec![flag], 1);
    graph.add_instruction(body, HInstructionKind::Goto, DataType::Void, vec![], 2);
    graph.add_instruction(ret_block, HInstructionKind::ReturnVoid, DataType::Void, vec![], 3);
    graph.add_instruction(exit, HInstructionKind::Exit, DataType::Void, vec![], NO_DEX_PC);
    graph.block_mut(header).loop_information = Some(LoopInformation {
        back_edges: vec![body],
        suspend_check: Some(check),
        depth: 1,
        is_irreducible: false,
    });

    let method = compile(&mut graph, CompilerOptions::default());
    // fs testl [thread_flags], suspend_request_flags.
    let test_flags: [u8; 11] = [0x64, 0xF7, 0x05, 0, 0, 0, 0, 3, 0, 0, 0];
    let positions: Vec<usize> = method
        .code
        .windows(test_flags.len())
        .enumerate()
        .filter(|(_, w)| *w == test_flags)
        .map(|(i, _)| i)
        .collect();
    // The header emits nothing; the single check sits on the back edge and
    // jumps straight back to the header when no suspend is requested.
    assert_eq!(positions.len(), 1);
    let after = positions[0] + test_flags.len();
    assert_eq!(&method.code[after..after + 2], &[0x0F, 0x84]);
}

#[test]
fn test_osr_float_return_mirrors_to_x87() {
    fn float_leaf<'a>(session: &CompilationSession<'a>) -> HGraph<'a> {
        let mut graph = HGraph::new(session, "Foo.half");
        let entry = graph.entry_block();
        let exit = graph.add_block();
        graph.set_exit_block(exit);
        graph.connect(entry, exit);
        let value = graph.add_instruction(
            entry,
            HInstructionKind::FloatConstant(0.5),
            DataType::Float32,
            vec![],
            NO_DEX_PC,
        );
        graph.add_instruction(entry, HInstructionKind::Return, DataType::Void, vec![value], 0);
        graph.add_instruction(exit, HInstructionKind::Exit, DataType::Void, vec![], NO_DEX_PC);
        graph
    }

    // flds [esp]
    const FLDS: [u8; 3] = [0xD9, 0x04, 0x24];

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut plain_graph = float_leaf(&session);
    let plain = compile(&mut plain_graph, CompilerOptions::default());
    assert!(!contains(&plain.code, &FLDS));

    let mut osr_graph = float_leaf(&session);
    osr_graph.is_osr = true;
    let osr = compile(&mut osr_graph, CompilerOptions::default());
    assert!(contains(&osr.code, &FLDS));
}
