// This module resolves parallel move sets: the simultaneous location
// reassignments required at block boundaries (phi shuffles) and around calls.
// The resolver serialises a set of conceptually-parallel moves into machine
// code, breaking dependency cycles with exchanges instead of temporaries where
// x86 can express them: xchg for core registers, a three-instruction xorps
// dance for XMM pairs, a movhpd park for 64-bit FPU-register/register-pair
// exchanges, and push/pop sequences for memory operands. ESP-relative
// operands are re-displaced while pushes are outstanding. A move whose source
// equals its destination emits nothing. Constant sources are materialised
// directly into the destination, going through the stack for floating-point
// immediates.

//! Parallel move scheduling and cycle breaking.

use crate::core::CompileResult;
use crate::graph::{DataType, HGraph, HInstructionKind, InstrId};
use crate::locations::Location;
use crate::x86::assembler::{Address, X86Assembler};
use crate::x86::Register;
use log::trace;

/// One pending move of a typed value.
#[derive(Debug, Clone)]
pub struct MoveOperands {
    pub source: Location,
    pub destination: Location,
    pub ty: DataType,
    /// Constant node backing a `Location::Constant` source.
    pub instruction: Option<InstrId>,
}

impl MoveOperands {
    fn is_redundant(&self) -> bool {
        self.source == self.destination
    }
}

/// State of one move during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveState {
    Pending,
    InProgress,
    Done,
}

/// Serialises a parallel move set into the assembler.
pub struct ParallelMoveResolverX86<'a, 'g, 'arena> {
    asm: &'a mut X86Assembler,
    graph: &'g HGraph<'arena>,
    moves: Vec<MoveOperands>,
    states: Vec<MoveState>,
    /// Bytes pushed since resolution began; ESP-relative operands shift by it.
    stack_adjustment: i32,
    cycles_broken: usize,
}

impl<'a, 'g, 'arena> ParallelMoveResolverX86<'a, 'g, 'arena> {
    pub fn new(asm: &'a mut X86Assembler, graph: &'g HGraph<'arena>) -> Self {
        Self {
            asm,
            graph,
            moves: Vec::new(),
            states: Vec::new(),
            stack_adjustment: 0,
            cycles_broken: 0,
        }
    }

    pub fn add_move(
        &mut self,
        source: Location,
        destination: Location,
        ty: DataType,
        instruction: Option<InstrId>,
    ) {
        self.moves.push(MoveOperands { source, destination, ty, instruction });
    }

    pub fn num_moves(&self) -> usize {
        self.moves.len()
    }

    /// Number of dependency cycles broken with exchanges.
    pub fn cycles_broken(&self) -> usize {
        self.cycles_broken
    }

    /// Emit code performing every recorded move.
    pub fn resolve(&mut self) -> CompileResult<()> {
        self.states = self
            .moves
            .iter()
            .map(|m| if m.is_redundant() { MoveState::Done } else { MoveState::Pending })
            .collect();
        for i in 0..self.moves.len() {
            if self.states[i] == MoveState::Pending {
                self.perform_move(i)?;
            }
        }
        debug_assert_eq!(self.stack_adjustment, 0);
        Ok(())
    }

    /// Perform move `index`, first recursively clearing moves that read its
    /// destination. A move found in-progress closes a cycle.
    fn perform_move(&mut self, index: usize) -> CompileResult<()> {
        self.states[index] = MoveState::InProgress;
        let destination = self.moves[index].destination;

        for other in 0..self.moves.len() {
            if other == index || self.states[other] == MoveState::Done {
                continue;
            }
            if !Self::blocks_location(self.moves[other].source, destination) {
                continue;
            }
            if self.states[other] == MoveState::InProgress {
                // Cycle: swap this move's endpoints, then rewrite every
                // pending source that still named the old destination.
                trace!(
                    "breaking move cycle at {:?} <-> {:?}",
                    self.moves[index].source,
                    destination
                );
                self.cycles_broken += 1;
                self.emit_swap(index)?;
                let source = self.moves[index].source;
                for m in 0..self.moves.len() {
                    if self.states[m] != MoveState::Done
                        && Self::blocks_location(self.moves[m].source, destination)
                    {
                        self.moves[m].source = source;
                    }
                }
                self.states[index] = MoveState::Done;
                return Ok(());
            }
            self.perform_move(other)?;
        }

        self.emit_move(index)?;
        self.states[index] = MoveState::Done;
        Ok(())
    }

    /// Whether reading `source` observes `destination`. Register pairs alias
    /// their halves; stack slots alias by offset overlap.
    fn blocks_location(source: Location, destination: Location) -> bool {
        if source == destination {
            return true;
        }
        match (source, destination) {
            (Location::RegisterPair(lo, hi), Location::Register(r))
            | (Location::Register(r), Location::RegisterPair(lo, hi)) => r == lo || r == hi,
            (Location::StackSlot(a), Location::DoubleStackSlot(b))
            | (Location::DoubleStackSlot(b), Location::StackSlot(a)) => a >= b && a < b + 8,
            _ => false,
        }
    }

    fn stack_address(&self, offset: i32) -> Address {
        Address::displace(Register::ESP, offset + self.stack_adjustment)
    }

    fn push_reg(&mut self, reg: Register) {
        self.asm.pushl_reg(reg);
        self.asm.cfi_adjust_cfa_offset(4);
        self.stack_adjustment += 4;
    }

    fn push_mem(&mut self, offset: i32) {
        let addr = self.stack_address(offset);
        self.asm.pushl_mem(addr);
        self.asm.cfi_adjust_cfa_offset(4);
        self.stack_adjustment += 4;
    }

    fn pop_reg(&mut self, reg: Register) {
        self.asm.popl_reg(reg);
        self.asm.cfi_adjust_cfa_offset(-4);
        self.stack_adjustment -= 4;
    }

    fn pop_mem(&mut self, offset: i32) {
        self.stack_adjustment -= 4;
        let addr = self.stack_address(offset);
        self.asm.popl_mem(addr);
        self.asm.cfi_adjust_cfa_offset(-4);
    }

    fn adjust_esp(&mut self, delta: i32) {
        if delta > 0 {
            self.asm.subl_reg_imm(Register::ESP, delta);
        } else {
            self.asm.addl_reg_imm(Register::ESP, -delta);
        }
        self.asm.cfi_adjust_cfa_offset(delta);
        self.stack_adjustment += delta;
    }

    // === Plain moves ======================================================

    fn emit_move(&mut self, index: usize) -> CompileResult<()> {
        let mv = self.moves[index].clone();
        // Cycle breaking rewrites the surviving source to its destination;
        // such a move is already satisfied.
        if mv.is_redundant() {
            return Ok(());
        }
        if let Location::Constant(id) = mv.source {
            return self.emit_constant(id, mv.destination);
        }
        match (mv.source, mv.destination) {
            (Location::Register(src), Location::Register(dst)) => {
                self.asm.movl_reg_reg(dst, src);
            }
            (Location::Register(src), Location::StackSlot(off)) => {
                let addr = self.stack_address(off);
                self.asm.movl_mem_reg(addr, src);
            }
            (Location::StackSlot(off), Location::Register(dst)) => {
                let addr = self.stack_address(off);
                self.asm.movl_reg_mem(dst, addr);
            }
            (Location::StackSlot(src), Location::StackSlot(dst)) => {
                self.push_mem(src);
                self.pop_mem(dst);
            }
            (Location::RegisterPair(slo, shi), Location::RegisterPair(dlo, dhi)) => {
                // Halves resolved independently would be two moves; as one
                // move neither destination half may alias a source half that
                // is still needed, so order the copies accordingly.
                if dlo == shi {
                    self.asm.movl_reg_reg(dhi, shi);
                    self.asm.movl_reg_reg(dlo, slo);
                } else {
                    self.asm.movl_reg_reg(dlo, slo);
                    self.asm.movl_reg_reg(dhi, shi);
                }
            }
            (Location::RegisterPair(lo, hi), Location::DoubleStackSlot(off)) => {
                let addr_lo = self.stack_address(off);
                self.asm.movl_mem_reg(addr_lo, lo);
                let addr_hi = self.stack_address(off + 4);
                self.asm.movl_mem_reg(addr_hi, hi);
            }
            (Location::DoubleStackSlot(off), Location::RegisterPair(lo, hi)) => {
                let addr_lo = self.stack_address(off);
                self.asm.movl_reg_mem(lo, addr_lo);
                let addr_hi = self.stack_address(off + 4);
                self.asm.movl_reg_mem(hi, addr_hi);
            }
            (Location::DoubleStackSlot(src), Location::DoubleStackSlot(dst)) => {
                self.push_mem(src + 4);
                self.pop_mem(dst + 4);
                self.push_mem(src);
                self.pop_mem(dst);
            }
            (Location::FpuRegister(src), Location::FpuRegister(dst)) => {
                self.asm.movaps_reg_reg(dst, src);
            }
            (Location::FpuRegister(src), Location::StackSlot(off)) => {
                let addr = self.stack_address(off);
                self.asm.movss_mem_reg(addr, src);
            }
            (Location::StackSlot(off), Location::FpuRegister(dst)) => {
                let addr = self.stack_address(off);
                self.asm.movss_reg_mem(dst, addr);
            }
            (Location::FpuRegister(src), Location::DoubleStackSlot(off)) => {
                let addr = self.stack_address(off);
                self.asm.movsd_mem_reg(addr, src);
            }
            (Location::DoubleStackSlot(off), Location::FpuRegister(dst)) => {
                let addr = self.stack_address(off);
                self.asm.movsd_reg_mem(dst, addr);
            }
            (Location::FpuRegister(src), Location::SimdStackSlot(off)) => {
                let addr = self.stack_address(off);
                self.asm.movups_mem_reg(addr, src);
            }
            (Location::SimdStackSlot(off), Location::FpuRegister(dst)) => {
                let addr = self.stack_address(off);
                self.asm.movups_reg_mem(dst, addr);
            }
            (Location::SimdStackSlot(src), Location::SimdStackSlot(dst)) => {
                for word in 0..4 {
                    self.push_mem(src + word * 4);
                    self.pop_mem(dst + word * 4);
                }
            }
            (Location::FpuRegister(src), Location::RegisterPair(lo, hi)) => {
                // The source is consumed; parallel-move sources are read once.
                self.asm.movd_reg_xmm(lo, src);
                self.asm.psrlq_reg_imm(src, 32);
                self.asm.movd_reg_xmm(hi, src);
            }
            (Location::RegisterPair(lo, hi), Location::FpuRegister(dst)) => {
                self.push_reg(hi);
                self.push_reg(lo);
                let addr = self.stack_address(0);
                self.asm.movsd_reg_mem(dst, addr);
                self.adjust_esp(-8);
            }
            (source, destination) => {
                return Err(crate::core::CompileError::InvalidLocation {
                    context: "parallel move",
                    reason: format!("unsupported move {source:?} -> {destination:?}"),
                });
            }
        }
        Ok(())
    }

    fn emit_constant(&mut self, id: InstrId, destination: Location) -> CompileResult<()> {
        let kind = self.graph.instr(id).kind.clone();
        match (kind, destination) {
            (HInstructionKind::IntConstant(v), Location::Register(dst)) => {
                if v == 0 {
                    self.asm.xorl_reg_reg(dst, dst);
                } else {
                    self.asm.movl_reg_imm(dst, v);
                }
            }
            (HInstructionKind::IntConstant(v), Location::StackSlot(off)) => {
                let addr = self.stack_address(off);
                self.asm.movl_mem_imm(addr, v);
            }
            (HInstructionKind::NullConstant, Location::Register(dst)) => {
                self.asm.xorl_reg_reg(dst, dst);
            }
            (HInstructionKind::NullConstant, Location::StackSlot(off)) => {
                let addr = self.stack_address(off);
                self.asm.movl_mem_imm(addr, 0);
            }
            (HInstructionKind::LongConstant(v), Location::RegisterPair(lo, hi)) => {
                self.asm.movl_reg_imm(lo, v as i32);
                self.asm.movl_reg_imm(hi, (v >> 32) as i32);
            }
            (HInstructionKind::LongConstant(v), Location::DoubleStackSlot(off)) => {
                let addr_lo = self.stack_address(off);
                self.asm.movl_mem_imm(addr_lo, v as i32);
                let addr_hi = self.stack_address(off + 4);
                self.asm.movl_mem_imm(addr_hi, (v >> 32) as i32);
            }
            (HInstructionKind::FloatConstant(v), Location::FpuRegister(dst)) => {
                if v.to_bits() == 0 {
                    self.asm.xorps_reg_reg(dst, dst);
                } else {
                    self.asm.pushl_imm(v.to_bits() as i32);
                    self.asm.cfi_adjust_cfa_offset(4);
                    self.asm.movss_reg_mem(dst, Address::displace(Register::ESP, 0));
                    self.asm.addl_reg_imm(Register::ESP, 4);
                    self.asm.cfi_adjust_cfa_offset(-4);
                }
            }
            (HInstructionKind::FloatConstant(v), Location::StackSlot(off)) => {
                let addr = self.stack_address(off);
                self.asm.movl_mem_imm(addr, v.to_bits() as i32);
            }
            (HInstructionKind::DoubleConstant(v), Location::FpuRegister(dst)) => {
                if v.to_bits() == 0 {
                    self.asm.xorpd_reg_reg(dst, dst);
                } else {
                    let bits = v.to_bits();
                    self.asm.pushl_imm((bits >> 32) as i32);
                    self.asm.cfi_adjust_cfa_offset(4);
                    self.asm.pushl_imm(bits as i32);
                    self.asm.cfi_adjust_cfa_offset(4);
                    self.asm.movsd_reg_mem(dst, Address::displace(Register::ESP, 0));
                    self.asm.addl_reg_imm(Register::ESP, 8);
                    self.asm.cfi_adjust_cfa_offset(-8);
                }
            }
            (HInstructionKind::DoubleConstant(v), Location::DoubleStackSlot(off)) => {
                let bits = v.to_bits();
                let addr_lo = self.stack_address(off);
                self.asm.movl_mem_imm(addr_lo, bits as i32);
                let addr_hi = self.stack_address(off + 4);
                self.asm.movl_mem_imm(addr_hi, (bits >> 32) as i32);
            }
            (kind, destination) => {
                return Err(crate::core::CompileError::InvalidLocation {
                    context: "parallel move",
                    reason: format!(
                        "unsupported constant move {} -> {destination:?}",
                        kind.name()
                    ),
                });
            }
        }
        Ok(())
    }

    // === Exchanges ========================================================

    fn emit_swap(&mut self, index: usize) -> CompileResult<()> {
        let mv = self.moves[index].clone();
        match (mv.source, mv.destination) {
            (Location::Register(a), Location::Register(b)) => {
                self.asm.xchgl_reg_reg(a, b);
            }
            (Location::Register(reg), Location::StackSlot(off))
            | (Location::StackSlot(off), Location::Register(reg)) => {
                let addr = self.stack_address(off);
                self.asm.xchgl_reg_mem(reg, addr);
            }
            (Location::StackSlot(a), Location::StackSlot(b)) => {
                self.push_mem(a);
                self.push_mem(b);
                self.pop_mem(a);
                self.pop_mem(b);
            }
            (Location::RegisterPair(alo, ahi), Location::RegisterPair(blo, bhi)) => {
                self.asm.xchgl_reg_reg(alo, blo);
                self.asm.xchgl_reg_reg(ahi, bhi);
            }
            (Location::RegisterPair(lo, hi), Location::DoubleStackSlot(off))
            | (Location::DoubleStackSlot(off), Location::RegisterPair(lo, hi)) => {
                let addr_lo = self.stack_address(off);
                self.asm.xchgl_reg_mem(lo, addr_lo);
                let addr_hi = self.stack_address(off + 4);
                self.asm.xchgl_reg_mem(hi, addr_hi);
            }
            (Location::DoubleStackSlot(a), Location::DoubleStackSlot(b)) => {
                self.push_mem(a);
                self.push_mem(a + 4);
                self.push_mem(b);
                self.push_mem(b + 4);
                self.pop_mem(a + 4);
                self.pop_mem(a);
                self.pop_mem(b + 4);
                self.pop_mem(b);
            }
            (Location::FpuRegister(a), Location::FpuRegister(b)) => {
                // Three-xor exchange; no scratch register needed.
                self.asm.xorps_reg_reg(a, b);
                self.asm.xorps_reg_reg(b, a);
                self.asm.xorps_reg_reg(a, b);
            }
            (Location::FpuRegister(xmm), Location::StackSlot(off))
            | (Location::StackSlot(off), Location::FpuRegister(xmm)) => {
                // Spill the XMM below ESP, load the slot, copy the spilled
                // word into the slot.
                self.adjust_esp(4);
                self.asm.movss_mem_reg(Address::displace(Register::ESP, 0), xmm);
                let slot = self.stack_address(off);
                self.asm.movss_reg_mem(xmm, slot);
                self.asm.pushl_mem(Address::displace(Register::ESP, 0));
                self.asm.cfi_adjust_cfa_offset(4);
                self.stack_adjustment += 4;
                self.pop_mem(off);
                self.adjust_esp(-4);
            }
            (Location::FpuRegister(xmm), Location::DoubleStackSlot(off))
            | (Location::DoubleStackSlot(off), Location::FpuRegister(xmm)) => {
                self.adjust_esp(8);
                self.asm.movsd_mem_reg(Address::displace(Register::ESP, 0), xmm);
                let slot = self.stack_address(off);
                self.asm.movsd_reg_mem(xmm, slot);
                self.asm.pushl_mem(Address::displace(Register::ESP, 4));
                self.asm.cfi_adjust_cfa_offset(4);
                self.stack_adjustment += 4;
                self.pop_mem(off + 4);
                self.asm.pushl_mem(Address::displace(Register::ESP, 0));
                self.asm.cfi_adjust_cfa_offset(4);
                self.stack_adjustment += 4;
                self.pop_mem(off);
                self.adjust_esp(-8);
            }
            (Location::FpuRegister(xmm), Location::RegisterPair(lo, hi))
            | (Location::RegisterPair(lo, hi), Location::FpuRegister(xmm)) => {
                // Park the pair value in the high half of the XMM via movhpd,
                // write the old FP bits out through the stack into the pair,
                // then shift the parked value down.
                self.push_reg(hi);
                self.push_reg(lo);
                let top = Address::displace(Register::ESP, 0);
                self.asm.movhpd_reg_mem(xmm, top);
                self.asm.movsd_mem_reg(top, xmm);
                self.pop_reg(lo);
                self.pop_reg(hi);
                self.adjust_esp(8);
                self.asm.movhpd_mem_reg(Address::displace(Register::ESP, 0), xmm);
                self.asm.movsd_reg_mem(xmm, Address::displace(Register::ESP, 0));
                self.adjust_esp(-8);
            }
            (Location::SimdStackSlot(a), Location::SimdStackSlot(b)) => {
                for word in 0..4 {
                    self.push_mem(a + word * 4);
                    self.push_mem(b + word * 4);
                    self.pop_mem(a + word * 4);
                    self.pop_mem(b + word * 4);
                }
            }
            (source, destination) => {
                return Err(crate::core::CompileError::InvalidLocation {
                    context: "parallel move swap",
                    reason: format!("unsupported swap {source:?} <-> {destination:?}"),
                });
            }
        }
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CompilationSession;
    use crate::graph::{HInstructionKind, NO_DEX_PC};
    use crate::x86::XmmRegister;
    use bumpalo::Bump;

    fn graph(arena: &Bump) -> HGraph<'_> {
        let session = CompilationSession::new(arena);
        HGraph::new(&session, "moves")
    }

    #[test]
    fn test_redundant_move_is_free() {
        let arena = Bump::new();
        let g = graph(&arena);
        let mut asm = X86Assembler::new(false);
        let mut resolver = ParallelMoveResolverX86::new(&mut asm, &g);
        resolver.add_move(
            Location::Register(Register::EAX),
            Location::Register(Register::EAX),
            DataType::Int32,
            None,
        );
        resolver.resolve().unwrap();
        assert_eq!(asm.code_size(), 0);
    }

    #[test]
    fn test_chain_is_ordered() {
        // EAX -> ECX and ECX -> EDX must copy ECX out first.
        let arena = Bump::new();
        let g = graph(&arena);
        let mut asm = X86Assembler::new(false);
        let mut resolver = ParallelMoveResolverX86::new(&mut asm, &g);
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
        resolver.resolve().unwrap();
        assert_eq!(resolver.cycles_broken(), 0);
        // movl edx, ecx ; movl ecx, eax
        assert_eq!(asm.code(), &[0x89, 0xCA, 0x89, 0xC1]);
    }

    #[test]
    fn test_cycle_uses_exchange() {
        let arena = Bump::new();
        let g = graph(&arena);
        let mut asm = X86Assembler::new(false);
        let mut resolver = ParallelMoveResolverX86::new(&mut asm, &g);
        resolver.add_move(
            Location::Register(Register::EAX),
            Location::Register(Register::ECX),
            DataType::Int32,
            None,
        );
        resolver.add_move(
            Location::Register(Register::ECX),
            Location::Register(Register::EAX),
            DataType::Int32,
            None,
        );
        resolver.resolve().unwrap();
        assert_eq!(resolver.cycles_broken(), 1);
        // Exactly one xchg, no spills.
        assert_eq!(asm.code(), &[0x87, 0xC8]);
    }

    #[test]
    fn test_fpu_cycle_uses_xorps() {
        let arena = Bump::new();
        let g = graph(&arena);
        let mut asm = X86Assembler::new(false);
        let mut resolver = ParallelMoveResolverX86::new(&mut asm, &g);
        resolver.add_move(
            Location::FpuRegister(XmmRegister::XMM0),
            Location::FpuRegister(XmmRegister::XMM1),
            DataType::Float64,
            None,
        );
        resolver.add_move(
            Location::FpuRegister(XmmRegister::XMM1),
            Location::FpuRegister(XmmRegister::XMM0),
            DataType::Float64,
            None,
        );
        resolver.resolve().unwrap();
        assert_eq!(resolver.cycles_broken(), 1);
        // Three xorps.
        assert_eq!(asm.code().len(), 9);
        assert_eq!(&asm.code()[0..2], &[0x0F, 0x57]);
    }

    #[test]
    fn test_stack_to_stack_via_push_pop() {
        let arena = Bump::new();
        let g = graph(&arena);
        let mut asm = X86Assembler::new(false);
        let mut resolver = ParallelMoveResolverX86::new(&mut asm, &g);
        resolver.add_move(
            Location::StackSlot(8),
            Location::StackSlot(16),
            DataType::Int32,
            None,
        );
        resolver.resolve().unwrap();
        // pushl [esp+8] ; popl [esp+16] (push already retired when popping).
        assert_eq!(asm.code(), &[0xFF, 0x74, 0x24, 0x08, 0x8F, 0x44, 0x24, 0x10]);
    }

    #[test]
    fn test_constant_materialisation() {
        let arena = Bump::new();
        let mut g = graph(&arena);
        let entry = g.entry_block();
        let zero = g.add_instruction(
            entry,
            HInstructionKind::IntConstant(0),
            DataType::Int32,
            vec![],
            NO_DEX_PC,
        );
        let mut asm = X86Assembler::new(false);
        let mut resolver = ParallelMoveResolverX86::new(&mut asm, &g);
        resolver.add_move(
            Location::Constant(zero),
            Location::Register(Register::ESI),
            DataType::Int32,
            Some(zero),
        );
        resolver.resolve().unwrap();
        // Zero becomes xor.
        assert_eq!(asm.code(), &[0x31, 0xF6]);
    }

    #[test]
    fn test_pair_swap() {
        let arena = Bump::new();
        let g = graph(&arena);
        let mut asm = X86Assembler::new(false);
        let mut resolver = ParallelMoveResolverX86::new(&mut asm, &g);
        resolver.add_move(
            Location::RegisterPair(Register::EAX, Register::EDX),
            Location::RegisterPair(Register::ECX, Register::EBX),
            DataType::Int64,
            None,
        );
        resolver.add_move(
            Location::RegisterPair(Register::ECX, Register::EBX),
            Location::RegisterPair(Register::EAX, Register::EDX),
            DataType::Int64,
            None,
        );
        resolver.resolve().unwrap();
        assert_eq!(resolver.cycles_broken(), 1);
        // Two xchgs.
        assert_eq!(asm.code().len(), 4);
    }

    #[test]
    fn test_fpu_pair_swap_cycle() {
        let arena = Bump::new();
        let g = graph(&arena);
        let mut asm = X86Assembler::new(false);
        let mut resolver = ParallelMoveResolverX86::new(&mut asm, &g);
        resolver.add_move(
            Location::FpuRegister(XmmRegister::XMM0),
            Location::RegisterPair(Register::EAX, Register::EDX),
            DataType::Float64,
            None,
        );
        resolver.add_move(
            Location::RegisterPair(Register::EAX, Register::EDX),
            Location::FpuRegister(XmmRegister::XMM0),
            DataType::Int64,
            None,
        );
        resolver.resolve().unwrap();
        assert_eq!(resolver.cycles_broken(), 1);
        // The pair value is parked in the XMM high half with movhpd.
        assert!(asm.code().windows(3).any(|w| w == [0x66, 0x0F, 0x16]));
    }

    #[test]
    fn test_simd_slot_swap_cycle() {
        let arena = Bump::new();
        let g = graph(&arena);
        let mut asm = X86Assembler::new(false);
        let mut resolver = ParallelMoveResolverX86::new(&mut asm, &g);
        resolver.add_move(
            Location::SimdStackSlot(0),
            Location::SimdStackSlot(16),
            DataType::Float64,
            None,
        );
        resolver.add_move(
            Location::SimdStackSlot(16),
            Location::SimdStackSlot(0),
            DataType::Float64,
            None,
        );
        resolver.resolve().unwrap();
        assert_eq!(resolver.cycles_broken(), 1);
        // Four word exchanges of push/push/pop/pop; the very first push hits
        // [esp] with no displacement byte.
        assert_eq!(asm.code().len(), 63);
        assert_eq!(asm.cfi_cfa_offset(), 0);
    }
}
