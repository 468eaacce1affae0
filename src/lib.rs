// Kestrel is the x86-32 back end of an optimizing JIT/AOT compiler for a
// managed bytecode runtime. It consumes an SSA control-flow graph and produces
// position-independent machine code together with the metadata the runtime
// needs: stack maps for every safepoint, typed linker patches for boot- and
// app-image references, and a JIT root table. Lowering runs in two passes over
// the graph: the location builder attaches a LocationSummary to every
// instruction, the register allocator makes every location concrete, and the
// code generator emits machine code from the concrete summaries, collecting
// slow paths and patch records along the way. compile_method wires the passes
// together; a failed compilation is logged and surfaced as an error so the
// caller can fall back to the interpreter.

//! x86-32 back end: SSA graph in, machine code and metadata out.

pub mod core;
pub mod graph;
pub mod locations;
pub mod pass;
pub mod regalloc;
pub mod runtime;
pub mod stack_map;
pub mod visualizer;
pub mod x86;

pub use crate::core::{
    CompilationKind, CompilationSession, CompileError, CompileResult, CompilerOptions,
};
pub use crate::graph::{BlockId, DataType, HGraph, HInstructionKind, InstrId};
pub use crate::regalloc::{NaiveRegisterAllocator, RegisterAllocator};
pub use crate::runtime::{QuickEntrypoint, RuntimeLayout};
pub use crate::x86::codegen::{CodeGeneratorX86, CompiledMethod};
pub use crate::x86::CpuFeatures;

use crate::x86::locations_builder::LocationsBuilderX86;
use log::{debug, warn};

/// Compiles a graph end to end: location building, register allocation, code
/// generation. The caller owns the graph and must have computed its reverse
/// post order.
pub fn compile_method(
    graph: &mut HGraph<'_>,
    allocator: &mut dyn RegisterAllocator,
    layout: RuntimeLayout,
    features: CpuFeatures,
    options: CompilerOptions,
) -> CompileResult<CompiledMethod> {
    debug!("compiling {}", graph.method_name);
    let result = (|| {
        LocationsBuilderX86::new(features, options.clone()).run(graph)?;
        allocator.allocate(graph)?;
        let mut codegen = CodeGeneratorX86::new(graph, layout, features, options);
        codegen.compile()?;
        Ok(codegen.into_compiled_method())
    })();
    if let Err(error) = &result {
        // The caller marks the method non-compilable and interprets it.
        warn!("compilation of {} failed: {}", graph.method_name, error);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;

    #[test]
    fn test_compile_method_end_to_end() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "Foo.leaf");
        let entry = graph.entry_block();
        let exit = graph.add_block();
        graph.set_exit_block(exit);
        graph.connect(entry, exit);
        graph.add_instruction(entry, HInstructionKind::ReturnVoid, DataType::Void, vec![], 0);
        graph.add_instruction(
            exit,
            HInstructionKind::Exit,
            DataType::Void,
            vec![],
            crate::graph::NO_DEX_PC,
        );
        graph.compute_reverse_post_order();

        let mut allocator = NaiveRegisterAllocator::new();
        let method = compile_method(
            &mut graph,
            &mut allocator,
            RuntimeLayout::for_testing(),
            CpuFeatures::default(),
            CompilerOptions::default(),
        )
        .unwrap();

        assert!(!method.code.is_empty());
        assert_eq!(method.frame_size % 16, 0);
        assert!(method.linker_patches.is_empty());
    }
}
