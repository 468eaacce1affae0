//! Basic blocks and loop information.

use super::{BlockId, InstrId};

/// Loop metadata attached to blocks inside a loop.
#[derive(Debug, Clone, Default)]
pub struct LoopInformation {
    /// Back edges into this header.
    pub back_edges: Vec<BlockId>,
    /// Suspend check hoisted to the loop header, if any.
    pub suspend_check: Option<InstrId>,
    /// Nesting depth, 1 for outermost loops.
    pub depth: u32,
    pub is_irreducible: bool,
}

/// A basic block: ordered phis, ordered instructions, terminated by a
/// control-transfer instruction.
#[derive(Debug, Clone)]
pub struct HBasicBlock {
    pub id: BlockId,
    pub phis: Vec<InstrId>,
    pub instructions: Vec<InstrId>,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
    /// Successors reached only on an exceptional edge.
    pub exceptional_successors: Vec<BlockId>,
    pub dominator: Option<BlockId>,
    /// Set when this block is a loop header.
    pub loop_information: Option<LoopInformation>,
    pub is_catch_block: bool,
    pub is_try_block: bool,
}

impl HBasicBlock {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            phis: Vec::new(),
            instructions: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            exceptional_successors: Vec::new(),
            dominator: None,
            loop_information: None,
            is_catch_block: false,
            is_try_block: false,
        }
    }

    pub fn is_loop_header(&self) -> bool {
        self.loop_information.is_some()
    }

    /// The terminating instruction, if the block is finished.
    pub fn last_instruction(&self) -> Option<InstrId> {
        self.instructions.last().copied()
    }

    /// Normal-edge successor used as the fallthrough target of an If.
    pub fn true_successor(&self) -> BlockId {
        self.successors[0]
    }

    pub fn false_successor(&self) -> BlockId {
        self.successors[1]
    }
}
