// This module defines the location model shared by the two lowering passes and
// the register allocator. A Location describes where a value may live: nowhere
// yet (Unallocated, carrying the constraint the allocator must satisfy), in a
// core register or pair, in an XMM register, in a stack slot of one of three
// widths, or folded into the instruction stream as a constant. LocationSummary
// is the one-per-instruction contract between the first lowering pass (which
// creates it), the register allocator (which makes every location concrete and
// fills the live-register set), and the second pass (which consumes only
// concrete locations). RegisterSet is the live-register bitmap captured by
// slow paths for caller-state preservation.

//! Value locations and per-instruction location summaries.

use crate::graph::InstrId;
use crate::x86::{Register, XmmRegister};

/// Constraint attached to an unallocated location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnallocatedKind {
    /// Register, stack slot or constant.
    Any,
    RequiresRegister,
    RequiresFpuRegister,
    RegisterOrConstant,
    /// Byte-addressable register (AL/BL/CL/DL) or constant.
    ByteRegisterOrConstant,
    /// Output reuses the first input's location (two-operand forms).
    SameAsFirstInput,
}

/// Where a value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Invalid,
    /// Value folded into the using instruction; payload is the constant node.
    Constant(InstrId),
    Register(Register),
    RegisterPair(Register, Register),
    FpuRegister(XmmRegister),
    FpuRegisterPair(XmmRegister, XmmRegister),
    /// 32-bit spill slot, offset from the frame base.
    StackSlot(i32),
    /// 64-bit spill slot.
    DoubleStackSlot(i32),
    /// 128-bit spill slot.
    SimdStackSlot(i32),
    Unallocated(UnallocatedKind),
    NoLocation,
}

impl Location {
    pub fn requires_register() -> Location {
        Location::Unallocated(UnallocatedKind::RequiresRegister)
    }

    pub fn requires_fpu_register() -> Location {
        Location::Unallocated(UnallocatedKind::RequiresFpuRegister)
    }

    pub fn any() -> Location {
        Location::Unallocated(UnallocatedKind::Any)
    }

    pub fn register_or_constant() -> Location {
        Location::Unallocated(UnallocatedKind::RegisterOrConstant)
    }

    pub fn byte_register_or_constant() -> Location {
        Location::Unallocated(UnallocatedKind::ByteRegisterOrConstant)
    }

    pub fn same_as_first_input() -> Location {
        Location::Unallocated(UnallocatedKind::SameAsFirstInput)
    }

    pub fn is_register(self) -> bool {
        matches!(self, Location::Register(_))
    }

    pub fn is_register_pair(self) -> bool {
        matches!(self, Location::RegisterPair(_, _))
    }

    pub fn is_fpu_register(self) -> bool {
        matches!(self, Location::FpuRegister(_))
    }

    pub fn is_stack_slot(self) -> bool {
        matches!(self, Location::StackSlot(_))
    }

    pub fn is_double_stack_slot(self) -> bool {
        matches!(self, Location::DoubleStackSlot(_))
    }

    pub fn is_constant(self) -> bool {
        matches!(self, Location::Constant(_))
    }

    pub fn is_unallocated(self) -> bool {
        matches!(self, Location::Unallocated(_))
    }

    /// Whether the location holds a value the second pass can consume.
    pub fn is_concrete(self) -> bool {
        !matches!(self, Location::Unallocated(_) | Location::Invalid)
    }

    pub fn as_register(self) -> Register {
        match self {
            Location::Register(r) => r,
            other => panic!("expected register location, found {:?}", other),
        }
    }

    pub fn as_fpu_register(self) -> XmmRegister {
        match self {
            Location::FpuRegister(r) => r,
            other => panic!("expected fpu register location, found {:?}", other),
        }
    }

    pub fn pair_low(self) -> Register {
        match self {
            Location::RegisterPair(lo, _) => lo,
            other => panic!("expected register pair, found {:?}", other),
        }
    }

    pub fn pair_high(self) -> Register {
        match self {
            Location::RegisterPair(_, hi) => hi,
            other => panic!("expected register pair, found {:?}", other),
        }
    }

    pub fn stack_offset(self) -> i32 {
        match self {
            Location::StackSlot(off)
            | Location::DoubleStackSlot(off)
            | Location::SimdStackSlot(off) => off,
            other => panic!("expected stack location, found {:?}", other),
        }
    }

    /// High 32-bit half of a double stack slot.
    pub fn high_stack_offset(self) -> i32 {
        self.stack_offset() + 4
    }
}

/// Whether the lowering of an instruction calls into the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    NoCall,
    CallOnSlowPath,
    CallOnMainOnly,
    CallOnMainAndSlowPath,
}

/// Bitmap of live core and floating-point registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSet {
    core: u32,
    fp: u32,
}

impl RegisterSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn add_core(&mut self, reg: Register) {
        self.core |= 1 << reg.encoding();
    }

    pub fn add_fp(&mut self, reg: XmmRegister) {
        self.fp |= 1 << reg.encoding();
    }

    pub fn remove_core(&mut self, reg: Register) {
        self.core &= !(1 << reg.encoding());
    }

    pub fn contains_core(&self, reg: Register) -> bool {
        self.core & (1 << reg.encoding()) != 0
    }

    pub fn contains_fp(&self, reg: XmmRegister) -> bool {
        self.fp & (1 << reg.encoding()) != 0
    }

    pub fn core_mask(&self) -> u32 {
        self.core
    }

    pub fn fp_mask(&self) -> u32 {
        self.fp
    }

    pub fn is_empty(&self) -> bool {
        self.core == 0 && self.fp == 0
    }

    pub fn core_registers(&self) -> impl Iterator<Item = Register> + '_ {
        (0u8..8).filter(|i| self.core & (1 << i) != 0).map(Register::from_encoding)
    }

    pub fn fp_registers(&self) -> impl Iterator<Item = XmmRegister> + '_ {
        (0u8..8).filter(|i| self.fp & (1 << i) != 0).map(XmmRegister::from_encoding)
    }
}

/// Location constraints and decisions for one instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSummary {
    pub call_kind: CallKind,
    inputs: Vec<Location>,
    output: Location,
    temps: Vec<Location>,
    /// Registers live across this instruction, filled by the allocator.
    pub live_registers: RegisterSet,
    /// Set when an intrinsic dispatcher replaced the standard summary.
    pub intrinsified: bool,
    /// Slow-path-only call sites may shrink the caller-save set.
    pub custom_slow_path_caller_saves: Option<RegisterSet>,
}

impl LocationSummary {
    pub fn new(call_kind: CallKind) -> Self {
        Self {
            call_kind,
            inputs: Vec::new(),
            output: Location::NoLocation,
            temps: Vec::new(),
            live_registers: RegisterSet::empty(),
            intrinsified: false,
            custom_slow_path_caller_saves: None,
        }
    }

    pub fn set_in_at(&mut self, index: usize, location: Location) {
        if self.inputs.len() <= index {
            self.inputs.resize(index + 1, Location::Invalid);
        }
        self.inputs[index] = location;
    }

    pub fn set_out(&mut self, location: Location) {
        self.output = location;
    }

    pub fn add_temp(&mut self, location: Location) {
        self.temps.push(location);
    }

    pub fn in_at(&self, index: usize) -> Location {
        self.inputs[index]
    }

    pub fn out(&self) -> Location {
        self.output
    }

    pub fn temp(&self, index: usize) -> Location {
        self.temps[index]
    }

    pub fn inputs(&self) -> &[Location] {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut [Location] {
        &mut self.inputs
    }

    pub fn temps(&self) -> &[Location] {
        &self.temps
    }

    pub fn temps_mut(&mut self) -> &mut [Location] {
        &mut self.temps
    }

    pub fn set_out_direct(&mut self) -> &mut Location {
        &mut self.output
    }

    pub fn can_call(&self) -> bool {
        self.call_kind != CallKind::NoCall
    }

    /// Post-allocation invariant: every location is concrete.
    pub fn all_concrete(&self) -> bool {
        self.inputs.iter().all(|l| l.is_concrete() || *l == Location::NoLocation)
            && self.temps.iter().all(|l| l.is_concrete())
            && (self.output.is_concrete() || self.output == Location::NoLocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_construction() {
        let mut summary = LocationSummary::new(CallKind::NoCall);
        summary.set_in_at(0, Location::requires_register());
        summary.set_in_at(1, Location::register_or_constant());
        summary.set_out(Location::same_as_first_input());

        assert!(summary.in_at(0).is_unallocated());
        assert!(!summary.all_concrete());
        assert!(!summary.can_call());
    }

    #[test]
    fn test_concrete_after_allocation() {
        let mut summary = LocationSummary::new(CallKind::NoCall);
        summary.set_in_at(0, Location::Register(Register::EAX));
        summary.set_in_at(1, Location::StackSlot(8));
        summary.set_out(Location::Register(Register::EAX));
        assert!(summary.all_concrete());
    }

    #[test]
    fn test_register_set() {
        let mut set = RegisterSet::empty();
        set.add_core(Register::EAX);
        set.add_core(Register::ESI);
        set.add_fp(XmmRegister::XMM3);

        assert!(set.contains_core(Register::EAX));
        assert!(!set.contains_core(Register::ECX));
        assert_eq!(set.core_mask(), 0b0100_0001);
        assert_eq!(set.core_registers().collect::<Vec<_>>(), vec![Register::EAX, Register::ESI]);
        assert!(set.contains_fp(XmmRegister::XMM3));
    }

    #[test]
    fn test_stack_offsets() {
        let loc = Location::DoubleStackSlot(16);
        assert_eq!(loc.stack_offset(), 16);
        assert_eq!(loc.high_stack_offset(), 20);
    }
}
