// This module defines the SSA control-flow graph the back end lowers. The
// graph, its blocks, and its instructions are arena-allocated through the
// compilation session (bumpalo collections) and addressed by plain indices
// (BlockId / InstrId); back-references that would otherwise form ownership
// cycles are indices, and teardown is a single arena drop. The graph tracks an
// entry block, an optional exit block, try/catch bound markers on blocks, the
// reverse-post-order used by the lowering passes, and the graph-wide flags the
// x86-32 back end consumes (uses_simd widens slow-path XMM saves to 16 bytes,
// is_osr enables the FP-return mirroring on return).

//! SSA control-flow graph.

pub mod block;
pub mod instruction;
pub mod types;

pub use block::{HBasicBlock, LoopInformation};
pub use instruction::{
    HEnvironment, HInstruction, HInstructionKind, SideEffects, NO_DEX_PC,
};
pub use types::DataType;

use crate::core::CompilationSession;
use crate::locations::LocationSummary;
use bumpalo::collections::Vec as ArenaVec;

/// Index of a basic block within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Index of an instruction within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl InstrId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The control-flow graph of one method.
pub struct HGraph<'arena> {
    blocks: ArenaVec<'arena, HBasicBlock>,
    instructions: ArenaVec<'arena, HInstruction>,
    entry_block: BlockId,
    exit_block: Option<BlockId>,
    reverse_post_order: Vec<BlockId>,
    /// Number of interpreter registers, for environment sizing.
    pub number_of_vregs: u16,
    /// Whether any instruction produces 128-bit SIMD values.
    pub uses_simd: bool,
    /// Whether this method is compiled for on-stack replacement.
    pub is_osr: bool,
    /// Whether the compiled method should run the entry/exit hooks.
    pub is_debuggable: bool,
    pub method_name: String,
}

impl<'arena> HGraph<'arena> {
    pub fn new(session: &CompilationSession<'arena>, method_name: &str) -> Self {
        let arena = session.arena();
        let mut graph = Self {
            blocks: ArenaVec::new_in(arena),
            instructions: ArenaVec::new_in(arena),
            entry_block: BlockId(0),
            exit_block: None,
            reverse_post_order: Vec::new(),
            number_of_vregs: 0,
            uses_simd: false,
            is_osr: false,
            is_debuggable: false,
            method_name: method_name.to_string(),
        };
        // Block 0 is always the entry block.
        graph.add_block();
        graph
    }

    pub fn entry_block(&self) -> BlockId {
        self.entry_block
    }

    pub fn exit_block(&self) -> Option<BlockId> {
        self.exit_block
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(HBasicBlock::new(id));
        id
    }

    pub fn set_exit_block(&mut self, block: BlockId) {
        self.exit_block = Some(block);
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_instructions(&self) -> usize {
        self.instructions.len()
    }

    pub fn block(&self, id: BlockId) -> &HBasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut HBasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn instr(&self, id: InstrId) -> &HInstruction {
        &self.instructions[id.index()]
    }

    pub fn instr_mut(&mut self, id: InstrId) -> &mut HInstruction {
        &mut self.instructions[id.index()]
    }

    /// Append a regular instruction to a block.
    pub fn add_instruction(
        &mut self,
        block: BlockId,
        kind: HInstructionKind,
        ty: DataType,
        inputs: Vec<InstrId>,
        dex_pc: u32,
    ) -> InstrId {
        let id = InstrId(self.instructions.len() as u32);
        let mut instr = HInstruction::new(id, kind, ty, inputs, dex_pc);
        instr.block = block;
        self.instructions.push(instr);
        self.blocks[block.index()].instructions.push(id);
        id
    }

    /// Append a phi to a block. Inputs are ordered by predecessor index.
    pub fn add_phi(
        &mut self,
        block: BlockId,
        ty: DataType,
        inputs: Vec<InstrId>,
        dex_pc: u32,
    ) -> InstrId {
        let id = InstrId(self.instructions.len() as u32);
        let mut instr = HInstruction::new(id, HInstructionKind::Phi, ty, inputs, dex_pc);
        instr.block = block;
        self.instructions.push(instr);
        self.blocks[block.index()].phis.push(id);
        id
    }

    /// Add a normal control-flow edge.
    pub fn connect(&mut self, pred: BlockId, succ: BlockId) {
        self.blocks[pred.index()].successors.push(succ);
        self.blocks[succ.index()].predecessors.push(pred);
    }

    /// Add an exceptional edge to a catch block.
    pub fn connect_exceptional(&mut self, pred: BlockId, catch: BlockId) {
        self.blocks[pred.index()].exceptional_successors.push(catch);
        self.blocks[catch.index()].predecessors.push(pred);
    }

    pub fn set_locations(&mut self, id: InstrId, summary: LocationSummary) {
        self.instructions[id.index()].locations = Some(summary);
    }

    pub fn set_environment(&mut self, id: InstrId, env: HEnvironment) {
        self.instructions[id.index()].environment = Some(env);
    }

    /// Recompute the reverse post order from the entry block.
    pub fn compute_reverse_post_order(&mut self) {
        let mut visited = vec![false; self.blocks.len()];
        let mut post_order = Vec::with_capacity(self.blocks.len());
        // Iterative DFS; the worklist entry tracks the next successor index.
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry_block, 0)];
        visited[self.entry_block.index()] = true;
        while let Some((block, succ_idx)) = stack.pop() {
            let successors = &self.blocks[block.index()].successors;
            if succ_idx < successors.len() {
                let next = successors[succ_idx];
                stack.push((block, succ_idx + 1));
                if !visited[next.index()] {
                    visited[next.index()] = true;
                    stack.push((next, 0));
                }
            } else {
                post_order.push(block);
            }
        }
        post_order.reverse();
        self.reverse_post_order = post_order;
    }

    pub fn reverse_post_order(&self) -> &[BlockId] {
        &self.reverse_post_order
    }

    /// Linear code layout order. Kept identical to reverse post order; a
    /// separate block-ordering pass may refine it.
    pub fn linear_order(&self) -> &[BlockId] {
        &self.reverse_post_order
    }

    pub fn instruction_ids(&self) -> impl Iterator<Item = InstrId> {
        (0..self.instructions.len() as u32).map(InstrId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;

    #[test]
    fn test_graph_construction() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "test");

        let entry = graph.entry_block();
        let body = graph.add_block();
        let exit = graph.add_block();
        graph.set_exit_block(exit);
        graph.connect(entry, body);
        graph.connect(body, exit);

        let c1 = graph.add_instruction(
            body,
            HInstructionKind::IntConstant(7),
            DataType::Int32,
            vec![],
            NO_DEX_PC,
        );
        let ret = graph.add_instruction(
            body,
            HInstructionKind::Return,
            DataType::Void,
            vec![c1],
            0,
        );

        assert_eq!(graph.instr(ret).inputs, vec![c1]);
        assert_eq!(graph.block(body).instructions, vec![c1, ret]);
        assert_eq!(graph.block(exit).predecessors, vec![body]);
    }

    #[test]
    fn test_reverse_post_order() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "test");

        let entry = graph.entry_block();
        let left = graph.add_block();
        let right = graph.add_block();
        let merge = graph.add_block();
        graph.connect(entry, left);
        graph.connect(entry, right);
        graph.connect(left, merge);
        graph.connect(right, merge);
        graph.compute_reverse_post_order();

        let rpo = graph.reverse_post_order();
        assert_eq!(rpo[0], entry);
        assert_eq!(*rpo.last().unwrap(), merge);
        assert_eq!(rpo.len(), 4);
    }

    #[test]
    fn test_loop_header_marking() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "test");

        let entry = graph.entry_block();
        let header = graph.add_block();
        graph.connect(entry, header);
        graph.connect(header, header);
        graph.block_mut(header).loop_information = Some(LoopInformation {
            back_edges: vec![header],
            suspend_check: None,
            depth: 1,
            is_irreducible: false,
        });

        assert!(graph.block(header).is_loop_header());
        assert!(!graph.block(entry).is_loop_header());
    }
}
