// The pipeline drives the CFG dumper around every pass; after register
// allocation the instruction lines carry concrete locations. These tests
// check the stream structure an external viewer depends on.

use bumpalo::Bump;
use kestrel::core::{CompilationSession, CompilerOptions};
use kestrel::graph::{DataType, HGraph, HInstructionKind, NO_DEX_PC};
use kestrel::pass::{OptimizationPass, PassDef, PassPipeline};
use kestrel::regalloc::{NaiveRegisterAllocator, RegisterAllocator};
use kestrel::visualizer::{Disassembler, HGraphVisualizer};
use kestrel::x86::locations_builder::LocationsBuilderX86;
use kestrel::x86::CpuFeatures;

fn diamond<'a>(session: &CompilationSession<'a>) -> HGraph<'a> {
    let mut graph = HGraph::new(session, "Foo.max");
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
    let max = graph.add_instruction(entry, HInstructionKind::Max, DataType::Int32, vec![a, b], 0);
    graph.add_instruction(entry, HInstructionKind::Return, DataType::Void, vec![max], 1);
    graph.add_instruction(exit, HInstructionKind::Exit, DataType::Void, vec![], NO_DEX_PC);
    graph.compute_reverse_post_order();
    graph
}

struct NoopPass;

impl OptimizationPass for NoopPass {
    fn name(&self) -> &'static str {
        "dead_code_elimination"
    }

    fn run(&mut self, _graph: &mut HGraph<'_>) -> bool {
        false
    }
}

#[test]
fn test_pipeline_dumps_before_and_after() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = diamond(&session);

    let mut buffer: Vec<u8> = Vec::new();
    let mut visualizer = HGraphVisualizer::new(&mut buffer, "Foo.max").unwrap();
    let defs = vec![PassDef::new(Box::new(NoopPass))];
    let mut pipeline = PassPipeline::new(&session, defs).unwrap();
    pipeline.run_all(&mut graph, Some(&mut visualizer)).unwrap();

    let text = String::from_utf8(buffer).unwrap();
    assert!(text.contains("name \"dead_code_elimination (before)\""));
    assert!(text.contains("name \"dead_code_elimination (after)\""));
    assert_eq!(text.matches("begin_cfg").count(), 2);
}

#[test]
fn test_locations_appear_after_allocation() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = diamond(&session);

    let mut before: Vec<u8> = Vec::new();
    let mut visualizer = HGraphVisualizer::new(&mut before, "Foo.max").unwrap();
    visualizer.dump_graph(&graph, "builder", true).unwrap();
    let before_text = String::from_utf8(before).unwrap();
    assert!(!before_text.contains("liveness:"));

    LocationsBuilderX86::new(CpuFeatures::default(), CompilerOptions::default())
        .run(&mut graph)
        .unwrap();
    NaiveRegisterAllocator::new().allocate(&mut graph).unwrap();

    let mut after: Vec<u8> = Vec::new();
    let mut visualizer = HGraphVisualizer::new(&mut after, "Foo.max").unwrap();
    visualizer.dump_graph(&graph, "register_allocation", true).unwrap();
    let after_text = String::from_utf8(after).unwrap();
    assert!(after_text.contains("liveness:"));
}

struct HexDisassembler;

impl Disassembler for HexDisassembler {
    fn disassemble(&self, _code_offset: usize, code: &[u8]) -> String {
        code.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ")
    }
}

#[test]
fn test_disassembly_dump_is_optional() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let graph = diamond(&session);
    let code = [0x55u8, 0xC3];
    let ranges = [(graph.entry_block(), 0usize, 2usize)];

    let mut with: Vec<u8> = Vec::new();
    let mut visualizer = HGraphVisualizer::new(&mut with, "Foo.max").unwrap();
    visualizer
        .dump_disassembly(&graph, &code, &ranges, Some(&HexDisassembler))
        .unwrap();
    let text = String::from_utf8(with).unwrap();
    assert!(text.contains("55 c3"));

    let mut without: Vec<u8> = Vec::new();
    let mut visualizer = HGraphVisualizer::new(&mut without, "Foo.max").unwrap();
    visualizer.dump_disassembly(&graph, &code, &ranges, None).unwrap();
    let text = String::from_utf8(without).unwrap();
    // Absence of a disassembler degrades to raw ranges.
    assert!(text.contains("0x0000..0x0002"));
}
