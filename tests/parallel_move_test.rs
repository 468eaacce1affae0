// Composite parallel-move scenarios through the public API: rotations wider
// than a two-element swap, constant materialisation into pairs and stack
// slots, and mixed register/memory sets of the shape phi shuffles produce.

use bumpalo::Bump;
use kestrel::core::CompilationSession;
use kestrel::graph::{DataType, HGraph, HInstructionKind, NO_DEX_PC};
use kestrel::locations::Location;
use kestrel::x86::assembler::X86Assembler;
use kestrel::x86::parallel_move::ParallelMoveResolverX86;
use kestrel::x86::{Register, XmmRegister};

#[test]
fn test_three_register_rotation() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let graph = HGraph::new(&session, "rotate");
    let mut asm = X86Assembler::new(false);
    let mut resolver = ParallelMoveResolverX86::new(&mut asm, &graph);
    resolver.add_move(
        Location::Register(Register::EAX),
        Location::Register(Register::ECX),
        DataType::Int32,
        None,
    );
    resolver.add_move(
        Location::Register(Register::ECX),
        Location::Register(Register::EDX),
        DataType::Int32,
        None,
    );
    resolver.add_move(
        Location::Register(Register::EDX),
        Location::Register(Register::EAX),
        DataType::Int32,
        None,
    );
    resolver.resolve().unwrap();
    assert_eq!(resolver.cycles_broken(), 1);
    assert!(!asm.finalize().is_empty());
}

#[test]
fn test_long_constant_into_pair() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = HGraph::new(&session, "const64");
    let entry = graph.entry_block();
    let value = graph.add_instruction(
        entry,
        HInstructionKind::LongConstant(0x1122_3344_5566_7788),
        DataType::Int64,
        vec![],
        NO_DEX_PC,
    );

    let mut asm = X86Assembler::new(false);
    let mut resolver = ParallelMoveResolverX86::new(&mut asm, &graph);
    resolver.add_move(
        Location::Constant(value),
        Location::RegisterPair(Register::EAX, Register::EDX),
        DataType::Int64,
        Some(value),
    );
    resolver.resolve().unwrap();
    let code = asm.finalize();
    // Both immediate halves appear in the stream.
    assert!(code.windows(4).any(|w| w == 0x5566_7788u32.to_le_bytes()));
    assert!(code.windows(4).any(|w| w == 0x1122_3344u32.to_le_bytes()));
}

#[test]
fn test_constant_into_stack_slot() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = HGraph::new(&session, "spillc");
    let entry = graph.entry_block();
    let value = graph.add_instruction(
        entry,
        HInstructionKind::IntConstant(42),
        DataType::Int32,
        vec![],
        NO_DEX_PC,
    );

    let mut asm = X86Assembler::new(false);
    let mut resolver = ParallelMoveResolverX86::new(&mut asm, &graph);
    resolver.add_move(
        Location::Constant(value),
        Location::StackSlot(12),
        DataType::Int32,
        Some(value),
    );
    resolver.resolve().unwrap();
    let code = asm.finalize();
    assert!(code.windows(4).any(|w| w == 42i32.to_le_bytes()));
}

#[test]
fn test_mixed_phi_shuffle_resolves() {
    // A register swap and a stack fill in one parallel set, the shape a loop
    // header phi shuffle takes.
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let graph = HGraph::new(&session, "shuffle");
    let mut asm = X86Assembler::new(false);
    let mut resolver = ParallelMoveResolverX86::new(&mut asm, &graph);
    resolver.add_move(
        Location::Register(Register::ESI),
        Location::Register(Register::EDI),
        DataType::Int32,
        None,
    );
    resolver.add_move(
        Location::Register(Register::EDI),
        Location::Register(Register::ESI),
        DataType::Int32,
        None,
    );
    resolver.add_move(
        Location::StackSlot(8),
        Location::Register(Register::ECX),
        DataType::Int32,
        None,
    );
    resolver.add_move(
        Location::FpuRegister(XmmRegister::XMM0),
        Location::StackSlot(24),
        DataType::Float32,
        None,
    );
    assert_eq!(resolver.num_moves(), 4);
    resolver.resolve().unwrap();
    assert_eq!(resolver.cycles_broken(), 1);
}

#[test]
fn test_double_between_stack_slots() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let graph = HGraph::new(&session, "wide");
    let mut asm = X86Assembler::new(false);
    let mut resolver = ParallelMoveResolverX86::new(&mut asm, &graph);
    resolver.add_move(
        Location::DoubleStackSlot(8),
        Location::DoubleStackSlot(24),
        DataType::Float64,
        None,
    );
    resolver.resolve().unwrap();
    assert!(!asm.finalize().is_empty());
}
