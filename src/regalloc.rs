// This module defines the seam between the back end and the register
// allocator. The production allocator (linear scan over liveness intervals)
// lives outside this crate; everything here is the contract it must satisfy:
// resolve every Unallocated location left by the first lowering pass to a
// concrete one, fill the live-register set of calling instructions, and
// attach a location to every environment value. NaiveRegisterAllocator is the
// in-crate baseline used by the driver's tests. It assigns callee-saved home
// registers and spill slots round-robin without liveness analysis, which is
// sound for the short graphs the tests build but reuses homes on larger ones.

//! Register allocator interface and the baseline allocator.

use crate::core::{CompileError, CompileResult};
use crate::graph::{DataType, HGraph, InstrId};
use crate::locations::{Location, RegisterSet, UnallocatedKind};
use crate::x86::{Register, XmmRegister};
use hashbrown::HashMap;
use log::{debug, trace};

/// Resolves the location constraints produced by the first lowering pass.
///
/// On success every location of every non-elided instruction is concrete
/// and each environment carries one location per live value.
pub trait RegisterAllocator {
    fn allocate(&mut self, graph: &mut HGraph<'_>) -> CompileResult<()>;
}

/// Home registers handed to register-required outputs. Callee-saved, so
/// values survive runtime calls without slow-path cooperation.
const HOME_REGISTERS: [Register; 3] = [Register::ESI, Register::EDI, Register::EBP];

/// Scratch registers for staging inputs and temps at one instruction.
const SCRATCH_REGISTERS: [Register; 4] =
    [Register::EAX, Register::ECX, Register::EDX, Register::EBX];

/// XMM0-XMM3 carry FP arguments and XMM7 the hidden interface argument,
/// so homes come from the middle of the bank.
const HOME_FPU_REGISTERS: [XmmRegister; 3] =
    [XmmRegister::XMM4, XmmRegister::XMM5, XmmRegister::XMM6];

const SCRATCH_FPU_REGISTERS: [XmmRegister; 4] =
    [XmmRegister::XMM0, XmmRegister::XMM1, XmmRegister::XMM2, XmmRegister::XMM3];

/// Round-robin allocator with stack-slot homes for unconstrained values.
pub struct NaiveRegisterAllocator {
    homes: HashMap<InstrId, Location>,
    next_core: usize,
    next_fpu: usize,
    /// Next free spill slot offset; slot 0 holds the method pointer and the
    /// slots below `first_slot` stage outgoing call arguments.
    next_slot: i32,
}

impl Default for NaiveRegisterAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl NaiveRegisterAllocator {
    pub fn new() -> Self {
        Self {
            homes: HashMap::new(),
            next_core: 0,
            next_fpu: 0,
            next_slot: 32,
        }
    }

    fn spill_slot(&mut self, ty: DataType) -> Location {
        let offset = self.next_slot;
        if ty.is_64bit() {
            self.next_slot += 8;
            Location::DoubleStackSlot(offset)
        } else {
            self.next_slot += 4;
            Location::StackSlot(offset)
        }
    }

    fn home_register(&mut self) -> Register {
        let reg = HOME_REGISTERS[self.next_core % HOME_REGISTERS.len()];
        self.next_core += 1;
        reg
    }

    fn home_fpu_register(&mut self) -> XmmRegister {
        let reg = HOME_FPU_REGISTERS[self.next_fpu % HOME_FPU_REGISTERS.len()];
        self.next_fpu += 1;
        reg
    }

    /// A scratch register not yet claimed at the current instruction. When
    /// fixed constraints (EDX:EAX ties, shift counts in ECX) eat the whole
    /// scratch bank, falls back to callee-saved registers that no value
    /// currently calls home.
    fn take_scratch(&self, taken: &mut RegisterSet) -> CompileResult<Register> {
        for &reg in &SCRATCH_REGISTERS {
            if !taken.contains_core(reg) {
                taken.add_core(reg);
                return Ok(reg);
            }
        }
        for &reg in &HOME_REGISTERS {
            if !taken.contains_core(reg) && !self.register_is_home(reg) {
                taken.add_core(reg);
                return Ok(reg);
            }
        }
        Err(CompileError::RegisterAllocation {
            reason: "scratch registers exhausted at one instruction".to_string(),
        })
    }

    /// Like `take_scratch`, but never leaves the EAX/ECX/EDX/EBX bank since
    /// the callee-saved registers have no byte-addressable low half.
    fn take_byte_scratch(&self, taken: &mut RegisterSet) -> CompileResult<Register> {
        for &reg in &SCRATCH_REGISTERS {
            if !taken.contains_core(reg) {
                taken.add_core(reg);
                return Ok(reg);
            }
        }
        Err(CompileError::RegisterAllocation {
            reason: "byte-addressable scratch registers exhausted at one instruction".to_string(),
        })
    }

    /// Whether any value is currently homed in `reg`.
    fn register_is_home(&self, reg: Register) -> bool {
        self.homes.values().any(|home| match *home {
            Location::Register(r) => r == reg,
            Location::RegisterPair(lo, hi) => lo == reg || hi == reg,
            _ => false,
        })
    }

    fn take_fpu_scratch(&self, taken: &mut RegisterSet) -> CompileResult<XmmRegister> {
        for &reg in &SCRATCH_FPU_REGISTERS {
            if !taken.contains_fp(reg) {
                taken.add_fp(reg);
                return Ok(reg);
            }
        }
        Err(CompileError::RegisterAllocation {
            reason: "fpu scratch registers exhausted at one instruction".to_string(),
        })
    }

    /// Assign a concrete output location to every value, so input resolution
    /// can look up producers regardless of visit order (loop phis read their
    /// back-edge input before it is visited).
    fn assign_outputs(&mut self, graph: &mut HGraph<'_>) -> CompileResult<()> {
        let ids: Vec<InstrId> = graph.instruction_ids().collect();
        for id in ids {
            let ty = graph.instr(id).ty;
            let Some(summary) = &graph.instr(id).locations else { continue };
            let out = summary.out();
            let resolved = match out {
                Location::Unallocated(kind) => match kind {
                    UnallocatedKind::Any => self.spill_slot(ty),
                    UnallocatedKind::RequiresFpuRegister => {
                        Location::FpuRegister(self.home_fpu_register())
                    }
                    // Deferred until the first input is resolved.
                    UnallocatedKind::SameAsFirstInput => continue,
                    _ if ty.is_64bit() => {
                        // Only one callee-saved pair exists; wrap-around is
                        // the documented naive-mode limitation.
                        Location::RegisterPair(Register::ESI, Register::EDI)
                    }
                    _ => Location::Register(self.home_register()),
                },
                Location::Invalid => {
                    return Err(CompileError::RegisterAllocation {
                        reason: format!("instruction {:?} has an invalid output", id),
                    });
                }
                concrete => concrete,
            };
            if resolved != out {
                if let Some(summary) = &mut graph.instr_mut(id).locations {
                    summary.set_out(resolved);
                }
            }
            if resolved != Location::NoLocation {
                self.homes.insert(id, resolved);
            }
        }
        Ok(())
    }

    /// Concrete registers the summary already claims, so fixed constraints
    /// are never handed out twice at the same instruction.
    fn claimed_registers(summary_locations: &[Location]) -> RegisterSet {
        let mut taken = RegisterSet::empty();
        for &loc in summary_locations {
            match loc {
                Location::Register(r) => taken.add_core(r),
                Location::RegisterPair(lo, hi) => {
                    taken.add_core(lo);
                    taken.add_core(hi);
                }
                Location::FpuRegister(r) | Location::FpuRegisterPair(r, _) => taken.add_fp(r),
                _ => {}
            }
        }
        taken
    }

    fn resolve_instruction(&mut self, graph: &mut HGraph<'_>, id: InstrId) -> CompileResult<()> {
        let instr = graph.instr(id);
        let Some(summary) = &instr.locations else { return Ok(()) };
        let input_ids = instr.inputs.clone();
        let can_call = summary.can_call();
        let mut all: Vec<Location> = summary.inputs().to_vec();
        all.extend_from_slice(summary.temps());
        all.push(summary.out());
        let mut taken = Self::claimed_registers(&all);

        let mut inputs = summary.inputs().to_vec();
        for (i, loc) in inputs.iter_mut().enumerate() {
            let Location::Unallocated(kind) = *loc else { continue };
            let producer = input_ids.get(i).copied();
            let home = producer.and_then(|p| self.homes.get(&p).copied());
            let producer_ty = producer.map(|p| graph.instr(p).ty).unwrap_or(DataType::Int32);
            *loc = match kind {
                UnallocatedKind::Any => home.ok_or_else(|| CompileError::RegisterAllocation {
                    reason: format!("input {} of {:?} has no location", i, id),
                })?,
                UnallocatedKind::RegisterOrConstant => match home {
                    Some(c @ Location::Constant(_)) => c,
                    _ => Location::Register(self.take_scratch(&mut taken)?),
                },
                UnallocatedKind::ByteRegisterOrConstant => match home {
                    Some(c @ Location::Constant(_)) => c,
                    _ => Location::Register(self.take_byte_scratch(&mut taken)?),
                },
                UnallocatedKind::RequiresRegister if producer_ty.is_64bit() => {
                    let lo = self.take_scratch(&mut taken)?;
                    let hi = self.take_scratch(&mut taken)?;
                    Location::RegisterPair(lo, hi)
                }
                UnallocatedKind::RequiresRegister => {
                    Location::Register(self.take_scratch(&mut taken)?)
                }
                UnallocatedKind::RequiresFpuRegister => {
                    Location::FpuRegister(self.take_fpu_scratch(&mut taken)?)
                }
                UnallocatedKind::SameAsFirstInput => {
                    return Err(CompileError::RegisterAllocation {
                        reason: format!("input {} of {:?} uses an output-only constraint", i, id),
                    });
                }
            };
        }

        let mut temps = summary.temps().to_vec();
        for loc in temps.iter_mut() {
            let Location::Unallocated(kind) = *loc else { continue };
            *loc = match kind {
                UnallocatedKind::RequiresFpuRegister => {
                    Location::FpuRegister(self.take_fpu_scratch(&mut taken)?)
                }
                _ => Location::Register(self.take_scratch(&mut taken)?),
            };
        }

        // Two-operand outputs land on top of the staged first input.
        let out = summary.out();
        let resolved_out = if out == Location::Unallocated(UnallocatedKind::SameAsFirstInput) {
            Some(inputs.first().copied().ok_or_else(|| {
                CompileError::RegisterAllocation {
                    reason: format!("{:?} reuses its first input but has none", id),
                }
            })?)
        } else {
            None
        };

        let live = if can_call { self.live_homes(resolved_out.unwrap_or(out)) } else { RegisterSet::empty() };

        let env_locations: Option<Vec<Location>> = instr.environment.as_ref().map(|env| {
            env.values
                .iter()
                .map(|value| {
                    value
                        .and_then(|v| self.homes.get(&v).copied())
                        .unwrap_or(Location::Invalid)
                })
                .collect()
        });

        let instr = graph.instr_mut(id);
        if let Some(summary) = &mut instr.locations {
            summary.inputs_mut().copy_from_slice(&inputs);
            summary.temps_mut().copy_from_slice(&temps);
            if let Some(out) = resolved_out {
                summary.set_out(out);
                self.homes.insert(id, out);
            }
            summary.live_registers = live;
        }
        if let (Some(env), Some(locations)) = (&mut instr.environment, env_locations) {
            env.locations = locations;
        }
        Ok(())
    }

    /// Every register-homed value except the one this instruction defines.
    /// An over-approximation of the live set; safe for slow-path saves and
    /// stack-map register masks.
    fn live_homes(&self, own_out: Location) -> RegisterSet {
        let mut live = RegisterSet::empty();
        for &home in self.homes.values() {
            if home == own_out {
                continue;
            }
            match home {
                Location::Register(r) => live.add_core(r),
                Location::RegisterPair(lo, hi) => {
                    live.add_core(lo);
                    live.add_core(hi);
                }
                Location::FpuRegister(r) => live.add_fp(r),
                _ => {}
            }
        }
        live
    }
}

impl RegisterAllocator for NaiveRegisterAllocator {
    fn allocate(&mut self, graph: &mut HGraph<'_>) -> CompileResult<()> {
        debug!("naive allocation for {}", graph.method_name);
        self.assign_outputs(graph)?;
        let ids: Vec<InstrId> = graph.instruction_ids().collect();
        for id in ids {
            trace!("resolve {:?}", id);
            self.resolve_instruction(graph, id)?;
        }
        verify_all_concrete(graph)
    }
}

/// Post-allocation invariant: every summary of a non-elided instruction is
/// fully concrete.
pub fn verify_all_concrete(graph: &HGraph<'_>) -> CompileResult<()> {
    for id in graph.instruction_ids() {
        let instr = graph.instr(id);
        let Some(summary) = &instr.locations else { continue };
        if !summary.all_concrete() {
            return Err(CompileError::RegisterAllocation {
                reason: format!(
                    "{} ({:?}) still has unallocated locations",
                    instr.kind.name(),
                    id
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CompilationSession, CompilerOptions};
    use crate::graph::{HInstructionKind, NO_DEX_PC};
    use crate::x86::locations_builder::LocationsBuilderX86;
    use crate::x86::CpuFeatures;
    use bumpalo::Bump;

    fn lower_and_allocate(graph: &mut HGraph<'_>) {
        let builder = LocationsBuilderX86::new(CpuFeatures::default(), CompilerOptions::default());
        builder.run(graph).unwrap();
        NaiveRegisterAllocator::new().allocate(graph).unwrap();
    }

    #[test]
    fn test_add_becomes_concrete_two_operand() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "t");
        let entry = graph.entry_block();
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
        let add = graph.add_instruction(
            entry,
            HInstructionKind::Add,
            DataType::Int32,
            vec![a, b],
            NO_DEX_PC,
        );
        graph.add_instruction(entry, HInstructionKind::Return, DataType::Void, vec![add], 0);
        graph.compute_reverse_post_order();

        lower_and_allocate(&mut graph);

        let summary = graph.instr(add).locations();
        assert!(summary.all_concrete());
        // Two-operand form: the output overwrites the first input.
        assert_eq!(summary.out(), summary.in_at(0));
    }

    #[test]
    fn test_constants_stay_folded() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "t");
        let entry = graph.entry_block();
        let c = graph.add_instruction(
            entry,
            HInstructionKind::IntConstant(7),
            DataType::Int32,
            vec![],
            NO_DEX_PC,
        );
        let neg = graph.add_instruction(
            entry,
            HInstructionKind::Neg,
            DataType::Int32,
            vec![c],
            NO_DEX_PC,
        );
        graph.add_instruction(entry, HInstructionKind::Return, DataType::Void, vec![neg], 0);
        graph.compute_reverse_post_order();

        lower_and_allocate(&mut graph);

        assert_eq!(graph.instr(c).locations().out(), Location::Constant(c));
    }

    #[test]
    fn test_fixed_registers_survive() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "t");
        let entry = graph.entry_block();
        let a = graph.add_instruction(
            entry,
            HInstructionKind::ParameterValue { index: 0 },
            DataType::Int64,
            vec![],
            NO_DEX_PC,
        );
        let b = graph.add_instruction(
            entry,
            HInstructionKind::ParameterValue { index: 1 },
            DataType::Int64,
            vec![],
            NO_DEX_PC,
        );
        let mul = graph.add_instruction(
            entry,
            HInstructionKind::Mul,
            DataType::Int64,
            vec![a, b],
            NO_DEX_PC,
        );
        graph.add_instruction(entry, HInstructionKind::Return, DataType::Void, vec![mul], 0);
        graph.compute_reverse_post_order();

        lower_and_allocate(&mut graph);

        // The widening multiply keeps its EDX:EAX tie.
        let summary = graph.instr(mul).locations();
        assert_eq!(summary.in_at(0), Location::RegisterPair(Register::EAX, Register::EDX));
        assert_eq!(summary.out(), Location::RegisterPair(Register::EAX, Register::EDX));
        // The pair input and the EDX:EAX tie claim all four scratch
        // registers, so the temp must come from the callee-saved fallback.
        assert!(matches!(summary.temps()[0], Location::Register(_)));
        let Location::Register(temp) = summary.temps()[0] else { unreachable!() };
        assert!(HOME_REGISTERS.contains(&temp));
    }

    #[test]
    fn test_verify_rejects_unallocated() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "t");
        let entry = graph.entry_block();
        let id = graph.add_instruction(
            entry,
            HInstructionKind::ParameterValue { index: 0 },
            DataType::Int32,
            vec![],
            NO_DEX_PC,
        );
        let mut summary = crate::locations::LocationSummary::new(crate::locations::CallKind::NoCall);
        summary.set_out(Location::requires_register());
        graph.set_locations(id, summary);

        assert!(verify_all_concrete(&graph).is_err());
    }
}
