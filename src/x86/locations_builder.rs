// This module is the first lowering pass: it walks every instruction in
// reverse post order and attaches the LocationSummary the register allocator
// and the emission pass consume. The rules encode the x86-32 ABI quirks:
// 64-bit integers live in register pairs, only EAX/EBX/ECX/EDX are
// byte-addressable (setcc, byte stores), variable shift counts must sit in
// ECX, idiv/mul tie EAX and EDX, and most ALU forms are two-operand, expressed
// as SameAsFirstInput outputs. Instructions whose lowering may call the
// runtime are marked with the matching call kind so the allocator keeps their
// live sets; fixed calling-convention registers are assigned here for
// main-path runtime calls.

//! First lowering pass: location constraints.

use crate::core::{CompileError, CompileResult, CompilerOptions};
use crate::graph::instruction::{ClassLoadKind, MethodLoadKind, StringLoadKind, TypeCheckKind};
use crate::graph::{DataType, HGraph, HInstructionKind, InstrId};
use crate::locations::{CallKind, Location, LocationSummary};
use crate::x86::{CpuFeatures, Register, XmmRegister, RUNTIME_ARGUMENT_REGISTERS};
use log::trace;

/// Runtime-call argument staging for 64-bit values: first pair, second pair.
pub const RUNTIME_LONG_ARGUMENT_PAIRS: [(Register, Register); 2] =
    [(Register::EAX, Register::ECX), (Register::EDX, Register::EBX)];

/// Builds the per-instruction location summaries.
pub struct LocationsBuilderX86 {
    features: CpuFeatures,
    options: CompilerOptions,
}

impl LocationsBuilderX86 {
    pub fn new(features: CpuFeatures, options: CompilerOptions) -> Self {
        Self { features, options }
    }

    pub fn run(&self, graph: &mut HGraph<'_>) -> CompileResult<()> {
        // Instructions emitted at their use site (fused conditions) still get
        // a summary so the branch emission can find its operands; they just
        // produce no output location.
        let ids: Vec<InstrId> = graph.instruction_ids().collect();
        for id in ids {
            let summary = self.visit(graph, id)?;
            graph.set_locations(id, summary);
        }
        Ok(())
    }

    fn visit(&self, graph: &HGraph<'_>, id: InstrId) -> CompileResult<LocationSummary> {
        let instr = graph.instr(id);
        let ty = instr.ty;
        trace!("locations for {} ({:?})", instr.kind.name(), ty);
        let mut summary = match &instr.kind {
            HInstructionKind::IntConstant(_)
            | HInstructionKind::LongConstant(_)
            | HInstructionKind::FloatConstant(_)
            | HInstructionKind::DoubleConstant(_)
            | HInstructionKind::NullConstant => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                s.set_out(Location::Constant(id));
                s
            }

            HInstructionKind::ParameterValue { .. } => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                s.set_out(out_constraint(ty));
                s
            }

            HInstructionKind::CurrentMethod => {
                // The method pointer is stored at the frame base and never
                // moves; expose it as that slot.
                let mut s = LocationSummary::new(CallKind::NoCall);
                s.set_out(Location::StackSlot(0));
                s
            }

            HInstructionKind::Phi => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                for (i, _) in instr.inputs.iter().enumerate() {
                    s.set_in_at(i, Location::any());
                }
                s.set_out(Location::any());
                s
            }

            HInstructionKind::Add
            | HInstructionKind::Sub
            | HInstructionKind::And
            | HInstructionKind::Or
            | HInstructionKind::Xor => self.binary_op(ty),

            HInstructionKind::Min | HInstructionKind::Max => {
                let mut s = self.binary_op(ty);
                if ty.is_floating_point() {
                    // NaN and signed-zero handling compares both ways.
                    s.set_in_at(1, Location::requires_fpu_register());
                }
                s
            }

            HInstructionKind::Mul => match ty {
                DataType::Int32 => self.binary_op(ty),
                DataType::Int64 => {
                    // Widening mull ties EDX:EAX; decompose around it.
                    let mut s = LocationSummary::new(CallKind::NoCall);
                    s.set_in_at(0, Location::RegisterPair(Register::EAX, Register::EDX));
                    s.set_in_at(1, Location::requires_register());
                    s.set_out(Location::RegisterPair(Register::EAX, Register::EDX));
                    s.add_temp(Location::requires_register());
                    s
                }
                _ => self.binary_op(ty),
            },

            HInstructionKind::Div | HInstructionKind::Rem => {
                let is_div = matches!(instr.kind, HInstructionKind::Div);
                self.div_rem(graph, instr.inputs.get(1).copied(), ty, is_div)?
            }

            HInstructionKind::Neg => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                if ty.is_floating_point() {
                    s.set_in_at(0, Location::requires_fpu_register());
                    s.set_out(Location::same_as_first_input());
                    // Sign-mask construction.
                    s.add_temp(Location::requires_fpu_register());
                } else {
                    s.set_in_at(0, Location::requires_register());
                    s.set_out(Location::same_as_first_input());
                }
                s
            }

            HInstructionKind::X86FPNeg => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                s.set_in_at(0, Location::requires_fpu_register());
                // Method-address base for the constant-area sign mask.
                s.set_in_at(1, Location::requires_register());
                s.set_out(Location::same_as_first_input());
                s.add_temp(Location::requires_fpu_register());
                s
            }

            HInstructionKind::Abs => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                if ty.is_floating_point() {
                    s.set_in_at(0, Location::requires_fpu_register());
                    s.set_out(Location::same_as_first_input());
                    s.add_temp(Location::requires_fpu_register());
                } else {
                    s.set_in_at(0, Location::requires_register());
                    s.set_out(Location::same_as_first_input());
                    s.add_temp(Location::requires_register());
                }
                s
            }

            HInstructionKind::Not | HInstructionKind::BooleanNot => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                s.set_in_at(0, Location::requires_register());
                s.set_out(Location::same_as_first_input());
                s
            }

            HInstructionKind::Shl
            | HInstructionKind::Shr
            | HInstructionKind::UShr
            | HInstructionKind::Ror => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                s.set_in_at(0, Location::requires_register());
                let distance_is_constant = instr
                    .inputs
                    .get(1)
                    .map(|&d| graph.instr(d).kind.is_constant())
                    .unwrap_or(false);
                if distance_is_constant {
                    s.set_in_at(1, Location::register_or_constant());
                } else {
                    // Variable counts go through CL.
                    s.set_in_at(1, Location::Register(Register::ECX));
                }
                s.set_out(Location::same_as_first_input());
                if ty == DataType::Int64 && matches!(instr.kind, HInstructionKind::Ror) {
                    s.add_temp(Location::requires_register());
                }
                s
            }

            HInstructionKind::Compare { .. } => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                let in0 = graph.instr(instr.inputs[0]).ty;
                if in0.is_floating_point() {
                    s.set_in_at(0, Location::requires_fpu_register());
                    s.set_in_at(1, Location::requires_fpu_register());
                } else {
                    s.set_in_at(0, Location::requires_register());
                    s.set_in_at(1, Location::any());
                }
                s.set_out(Location::requires_register());
                s
            }

            HInstructionKind::Condition { .. } => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                let in0 = graph.instr(instr.inputs[0]).ty;
                if in0.is_floating_point() {
                    s.set_in_at(0, Location::requires_fpu_register());
                    s.set_in_at(1, Location::requires_fpu_register());
                } else {
                    s.set_in_at(0, Location::requires_register());
                    s.set_in_at(1, Location::any());
                }
                if !instr.is_emitted_at_use_site {
                    // setcc writes a byte register.
                    s.set_out(Location::requires_register());
                }
                s
            }

            HInstructionKind::Select => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                if ty.is_floating_point() {
                    s.set_in_at(0, Location::requires_fpu_register());
                    s.set_in_at(1, Location::requires_fpu_register());
                } else {
                    s.set_in_at(0, Location::requires_register());
                    s.set_in_at(1, Location::any());
                }
                s.set_in_at(2, Location::any());
                s.set_out(Location::same_as_first_input());
                s
            }

            HInstructionKind::Goto
            | HInstructionKind::Exit
            | HInstructionKind::TryBoundary { .. }
            | HInstructionKind::ReturnVoid
            | HInstructionKind::MemoryBarrier { .. }
            | HInstructionKind::ConstructorFence => LocationSummary::new(CallKind::NoCall),

            HInstructionKind::If | HInstructionKind::Deoptimize { .. } => {
                let call_kind = if matches!(instr.kind, HInstructionKind::Deoptimize { .. }) {
                    CallKind::CallOnSlowPath
                } else {
                    CallKind::NoCall
                };
                let mut s = LocationSummary::new(call_kind);
                let fused = graph.instr(instr.inputs[0]).is_emitted_at_use_site;
                if !fused {
                    s.set_in_at(0, Location::any());
                }
                s
            }

            HInstructionKind::Return => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                s.set_in_at(0, return_location(graph.instr(instr.inputs[0]).ty));
                s
            }

            HInstructionKind::Throw => {
                let mut s = LocationSummary::new(CallKind::CallOnMainOnly);
                s.set_in_at(0, Location::Register(RUNTIME_ARGUMENT_REGISTERS[0]));
                s
            }

            HInstructionKind::PackedSwitch { .. } => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                s.set_in_at(0, Location::requires_register());
                s
            }

            HInstructionKind::X86PackedSwitch { .. } => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                s.set_in_at(0, Location::requires_register());
                // Method-address base for the constant-area jump table.
                s.set_in_at(1, Location::requires_register());
                s.add_temp(Location::requires_register());
                s
            }

            HInstructionKind::NullCheck => {
                let mut s = LocationSummary::new(CallKind::CallOnSlowPath);
                if self.options.implicit_null_checks {
                    s.set_in_at(0, Location::any());
                } else {
                    s.set_in_at(0, Location::register_or_constant());
                }
                s
            }

            HInstructionKind::BoundsCheck { .. } => {
                let mut s = LocationSummary::new(CallKind::CallOnSlowPath);
                s.set_in_at(0, Location::register_or_constant());
                s.set_in_at(1, Location::any());
                s
            }

            HInstructionKind::DivZeroCheck => {
                let mut s = LocationSummary::new(CallKind::CallOnSlowPath);
                if ty == DataType::Int64 {
                    s.set_in_at(0, Location::any());
                    // Testing a pair for zero needs a scratch register.
                    s.add_temp(Location::requires_register());
                } else {
                    s.set_in_at(0, Location::register_or_constant());
                }
                s.set_out(Location::same_as_first_input());
                s
            }

            HInstructionKind::InstanceFieldGet { field }
            | HInstructionKind::StaticFieldGet { field } => {
                self.field_get(field.field_type, field.is_volatile)
            }

            HInstructionKind::InstanceFieldSet { field, write_barrier, .. }
            | HInstructionKind::StaticFieldSet { field, write_barrier, .. } => {
                let needs_barrier = !matches!(
                    write_barrier,
                    crate::graph::instruction::WriteBarrierKind::DontEmit
                );
                self.field_set(field.field_type, field.is_volatile, needs_barrier)
            }

            HInstructionKind::ArrayGet { component, .. } => {
                let mut s = LocationSummary::new(if self.needs_ref_read_barrier(*component) {
                    CallKind::CallOnSlowPath
                } else {
                    CallKind::NoCall
                });
                s.set_in_at(0, Location::requires_register());
                s.set_in_at(1, Location::register_or_constant());
                s.set_out(out_constraint(*component));
                if *component == DataType::Reference && self.baker_read_barrier() {
                    s.add_temp(Location::requires_register());
                }
                s
            }

            HInstructionKind::ArraySet { component, needs_type_check, write_barrier, .. } => {
                let call_kind = if *needs_type_check {
                    CallKind::CallOnSlowPath
                } else {
                    CallKind::NoCall
                };
                let mut s = LocationSummary::new(call_kind);
                s.set_in_at(0, Location::requires_register());
                s.set_in_at(1, Location::register_or_constant());
                s.set_in_at(
                    2,
                    match component {
                        DataType::Bool | DataType::Int8 | DataType::Uint8 => {
                            Location::byte_register_or_constant()
                        }
                        t if t.is_floating_point() => Location::requires_fpu_register(),
                        _ => Location::register_or_constant(),
                    },
                );
                let needs_barrier = !matches!(
                    write_barrier,
                    crate::graph::instruction::WriteBarrierKind::DontEmit
                );
                if *needs_type_check || self.needs_store_temps(*component, needs_barrier) {
                    s.add_temp(Location::requires_register());
                    s.add_temp(Location::requires_register());
                }
                s
            }

            HInstructionKind::ArrayLength { .. } => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                s.set_in_at(0, Location::requires_register());
                s.set_out(Location::requires_register());
                s
            }

            HInstructionKind::NewInstance { .. } => {
                let mut s = LocationSummary::new(CallKind::CallOnMainOnly);
                s.set_in_at(0, Location::Register(RUNTIME_ARGUMENT_REGISTERS[0]));
                s.set_out(Location::Register(Register::EAX));
                s
            }

            HInstructionKind::NewArray { .. } => {
                let mut s = LocationSummary::new(CallKind::CallOnMainOnly);
                s.set_in_at(0, Location::Register(RUNTIME_ARGUMENT_REGISTERS[0]));
                s.set_in_at(1, Location::Register(RUNTIME_ARGUMENT_REGISTERS[1]));
                s.set_out(Location::Register(Register::EAX));
                s
            }

            HInstructionKind::InstanceOf { check_kind } => {
                let mut s = LocationSummary::new(match check_kind {
                    TypeCheckKind::ExactCheck => CallKind::NoCall,
                    _ => CallKind::CallOnSlowPath,
                });
                s.set_in_at(0, Location::requires_register());
                if *check_kind == TypeCheckKind::BitstringCheck {
                    s.set_in_at(1, Location::register_or_constant());
                } else {
                    s.set_in_at(1, Location::any());
                }
                s.set_out(Location::requires_register());
                if self.options.needs_read_barrier() {
                    s.add_temp(Location::requires_register());
                }
                s
            }

            HInstructionKind::CheckCast { check_kind } => {
                let mut s = LocationSummary::new(CallKind::CallOnSlowPath);
                s.set_in_at(0, Location::requires_register());
                if *check_kind == TypeCheckKind::BitstringCheck {
                    s.set_in_at(1, Location::register_or_constant());
                } else {
                    s.set_in_at(1, Location::any());
                }
                s.add_temp(Location::requires_register());
                if matches!(check_kind, TypeCheckKind::InterfaceCheck) {
                    s.add_temp(Location::requires_register());
                }
                s
            }

            HInstructionKind::LoadClass { load_kind, .. } => {
                let mut s = match load_kind {
                    ClassLoadKind::RuntimeCall => {
                        let mut s = LocationSummary::new(CallKind::CallOnMainOnly);
                        s.set_out(Location::Register(Register::EAX));
                        s
                    }
                    _ => {
                        let mut s = LocationSummary::new(CallKind::CallOnSlowPath);
                        s.set_out(Location::requires_register());
                        s
                    }
                };
                // PC-relative kinds consume the method-address landmark.
                if !instr.inputs.is_empty() {
                    s.set_in_at(0, Location::requires_register());
                }
                s
            }

            HInstructionKind::LoadString { load_kind, .. } => {
                let mut s = match load_kind {
                    StringLoadKind::RuntimeCall => {
                        let mut s = LocationSummary::new(CallKind::CallOnMainOnly);
                        s.set_out(Location::Register(Register::EAX));
                        s
                    }
                    _ => {
                        let mut s = LocationSummary::new(CallKind::CallOnSlowPath);
                        s.set_out(Location::requires_register());
                        s
                    }
                };
                if !instr.inputs.is_empty() {
                    s.set_in_at(0, Location::requires_register());
                }
                s
            }

            HInstructionKind::LoadMethodHandle { .. } | HInstructionKind::LoadMethodType { .. } => {
                let mut s = LocationSummary::new(CallKind::CallOnMainOnly);
                s.set_out(Location::Register(Register::EAX));
                s
            }

            HInstructionKind::ClinitCheck => {
                let mut s = LocationSummary::new(CallKind::CallOnSlowPath);
                s.set_in_at(0, Location::requires_register());
                s.set_out(Location::same_as_first_input());
                s
            }

            HInstructionKind::MonitorOperation { .. } => {
                let mut s = LocationSummary::new(CallKind::CallOnMainOnly);
                s.set_in_at(0, Location::Register(RUNTIME_ARGUMENT_REGISTERS[0]));
                s
            }

            HInstructionKind::InvokeStaticOrDirect { load_kind, .. } => {
                // PC-relative dispatch consumes the method-address landmark as
                // an extra trailing input.
                let args = if method_load_kind_uses_base(*load_kind) {
                    &instr.inputs[..instr.inputs.len() - 1]
                } else {
                    instr.inputs.as_slice()
                };
                let mut s = self.invoke_summary(graph, args, ty);
                if method_load_kind_uses_base(*load_kind) {
                    s.set_in_at(instr.inputs.len() - 1, Location::requires_register());
                }
                match load_kind {
                    MethodLoadKind::Recursive | MethodLoadKind::StringInit { .. } => {}
                    _ => s.add_temp(Location::requires_register()),
                }
                s
            }

            HInstructionKind::InvokeVirtual { .. } | HInstructionKind::InvokeInterface { .. } => {
                let mut s = self.invoke_summary(graph, instr.inputs.as_slice(), ty);
                s.add_temp(Location::requires_register());
                if matches!(instr.kind, HInstructionKind::InvokeInterface { .. }) {
                    // Conflict-resolution hidden argument.
                    s.add_temp(Location::FpuRegister(crate::x86::HIDDEN_INTERFACE_ARGUMENT));
                }
                s
            }

            HInstructionKind::InvokePolymorphic { .. }
            | HInstructionKind::InvokeCustom { .. }
            | HInstructionKind::InvokeUnresolved { .. } => {
                self.invoke_summary(graph, instr.inputs.as_slice(), ty)
            }

            HInstructionKind::TypeConversion => {
                let from = graph.instr(instr.inputs[0]).ty;
                self.type_conversion(from, ty)?
            }

            HInstructionKind::SuspendCheck => LocationSummary::new(CallKind::CallOnSlowPath),

            HInstructionKind::ComputeBaseMethodAddress => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                s.set_out(Location::requires_register());
                s
            }

            HInstructionKind::X86LoadFromConstantTable => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                s.set_in_at(0, Location::requires_register());
                s.set_in_at(1, Location::Constant(instr.inputs[1]));
                s.set_out(out_constraint(ty));
                s
            }

            HInstructionKind::MethodEntryHook => LocationSummary::new(CallKind::CallOnSlowPath),

            HInstructionKind::MethodExitHook => {
                let mut s = LocationSummary::new(CallKind::CallOnSlowPath);
                if let Some(&value) = instr.inputs.first() {
                    s.set_in_at(0, return_location(graph.instr(value).ty));
                }
                s
            }
        };

        if let Some(intrinsified) = self.try_intrinsic(graph, id) {
            summary = intrinsified;
            summary.intrinsified = true;
        }
        Ok(summary)
    }

    /// Intrinsic recognition hook. Recognised invokes replace their standard
    /// calling-convention summary with an inline one.
    fn try_intrinsic(&self, graph: &HGraph<'_>, id: InstrId) -> Option<LocationSummary> {
        let _ = (graph, id, self.features.has_sse4_1);
        // No intrinsics are recognised yet; the dispatcher is the seam.
        None
    }

    fn baker_read_barrier(&self) -> bool {
        self.options.needs_read_barrier() && self.options.use_baker_read_barrier
    }

    fn needs_ref_read_barrier(&self, ty: DataType) -> bool {
        ty == DataType::Reference && self.options.needs_read_barrier()
    }

    /// Two-operand ALU shape shared by add/sub/and/or/xor/min/max.
    fn binary_op(&self, ty: DataType) -> LocationSummary {
        let mut s = LocationSummary::new(CallKind::NoCall);
        if ty.is_floating_point() {
            s.set_in_at(0, Location::requires_fpu_register());
            s.set_in_at(1, Location::any());
        } else {
            s.set_in_at(0, Location::requires_register());
            s.set_in_at(1, Location::any());
        }
        s.set_out(Location::same_as_first_input());
        s
    }

    fn div_rem(
        &self,
        graph: &HGraph<'_>,
        divisor: Option<InstrId>,
        ty: DataType,
        is_div: bool,
    ) -> CompileResult<LocationSummary> {
        match ty {
            DataType::Int32 => {
                let mut s = LocationSummary::new(CallKind::CallOnSlowPath);
                s.set_in_at(0, Location::Register(Register::EAX));
                s.set_in_at(1, Location::register_or_constant());
                s.set_out(Location::Register(if is_div {
                    Register::EAX
                } else {
                    Register::EDX
                }));
                s.add_temp(Location::Register(if is_div {
                    Register::EDX
                } else {
                    Register::EAX
                }));
                // Magic-number division keeps the numerator alive.
                let constant_divisor = divisor
                    .map(|d| graph.instr(d).kind.is_constant())
                    .unwrap_or(false);
                if constant_divisor {
                    s.add_temp(Location::requires_register());
                }
                Ok(s)
            }
            DataType::Int64 => {
                // No 64-bit divide instruction; the runtime helper does it.
                let mut s = LocationSummary::new(CallKind::CallOnMainOnly);
                let (lo0, hi0) = RUNTIME_LONG_ARGUMENT_PAIRS[0];
                let (lo1, hi1) = RUNTIME_LONG_ARGUMENT_PAIRS[1];
                s.set_in_at(0, Location::RegisterPair(lo0, hi0));
                s.set_in_at(1, Location::RegisterPair(lo1, hi1));
                s.set_out(Location::RegisterPair(Register::EAX, Register::EDX));
                Ok(s)
            }
            t if t.is_floating_point() => {
                let mut s = LocationSummary::new(CallKind::NoCall);
                if is_div {
                    s.set_in_at(0, Location::requires_fpu_register());
                    s.set_in_at(1, Location::any());
                    s.set_out(Location::same_as_first_input());
                } else {
                    // fprem works on the x87 stack; operands are pushed from
                    // memory and the status word is polled through AX.
                    s.set_in_at(0, Location::requires_fpu_register());
                    s.set_in_at(1, Location::requires_fpu_register());
                    s.set_out(Location::requires_fpu_register());
                    s.add_temp(Location::Register(Register::EAX));
                }
                Ok(s)
            }
            other => Err(CompileError::UnimplementedTypeCombination {
                operation: if is_div { "div" } else { "rem" },
                ty: other.to_string(),
            }),
        }
    }

    fn field_get(&self, field_type: DataType, is_volatile: bool) -> LocationSummary {
        let mut s = LocationSummary::new(if self.needs_ref_read_barrier(field_type) {
            CallKind::CallOnSlowPath
        } else {
            CallKind::NoCall
        });
        s.set_in_at(0, Location::requires_register());
        s.set_out(out_constraint(field_type));
        if field_type == DataType::Int64 && is_volatile {
            // The atomic 64-bit load goes through an XMM register.
            s.add_temp(Location::requires_fpu_register());
        }
        if field_type == DataType::Reference && self.baker_read_barrier() {
            s.add_temp(Location::requires_register());
        }
        s
    }

    fn needs_store_temps(&self, field_type: DataType, needs_write_barrier: bool) -> bool {
        field_type == DataType::Reference
            && (needs_write_barrier || self.options.poison_heap_references)
    }

    fn field_set(
        &self,
        field_type: DataType,
        is_volatile: bool,
        needs_write_barrier: bool,
    ) -> LocationSummary {
        let mut s = LocationSummary::new(CallKind::NoCall);
        s.set_in_at(0, Location::requires_register());
        s.set_in_at(
            1,
            match field_type {
                DataType::Bool | DataType::Int8 | DataType::Uint8 => {
                    Location::byte_register_or_constant()
                }
                t if t.is_floating_point() => Location::requires_fpu_register(),
                _ => Location::register_or_constant(),
            },
        );
        if field_type == DataType::Int64 && is_volatile {
            // Pair -> XMM assembly for the atomic store.
            s.add_temp(Location::requires_fpu_register());
            s.add_temp(Location::requires_fpu_register());
        }
        if self.needs_store_temps(field_type, needs_write_barrier) {
            // Card computation and reference poisoning clobber two registers.
            s.add_temp(Location::requires_register());
            s.add_temp(Location::requires_register());
        }
        s
    }

    /// Managed calling convention: ECX, EDX, EBX then stack; XMM0-3 for FP.
    fn invoke_summary(
        &self,
        graph: &HGraph<'_>,
        inputs: &[InstrId],
        return_type: DataType,
    ) -> LocationSummary {
        const CORE_ARGS: [Register; 3] = [Register::ECX, Register::EDX, Register::EBX];
        const FP_ARGS: [XmmRegister; 4] =
            [XmmRegister::XMM0, XmmRegister::XMM1, XmmRegister::XMM2, XmmRegister::XMM3];

        let mut s = LocationSummary::new(CallKind::CallOnMainAndSlowPath);
        let mut core_index = 0usize;
        let mut fp_index = 0usize;
        let mut stack_index = 0usize;
        for (i, &input) in inputs.iter().enumerate() {
            let ty = graph.instr(input).ty;
            let location = if ty.is_floating_point() {
                if fp_index < FP_ARGS.len() {
                    let reg = FP_ARGS[fp_index];
                    fp_index += 1;
                    Location::FpuRegister(reg)
                } else {
                    let slots = if ty.is_64bit() { 2 } else { 1 };
                    let off = outgoing_stack_offset(stack_index);
                    stack_index += slots;
                    if ty.is_64bit() {
                        Location::DoubleStackSlot(off)
                    } else {
                        Location::StackSlot(off)
                    }
                }
            } else if ty.is_64bit() {
                if core_index + 1 < CORE_ARGS.len() {
                    let lo = CORE_ARGS[core_index];
                    let hi = CORE_ARGS[core_index + 1];
                    core_index += 2;
                    Location::RegisterPair(lo, hi)
                } else {
                    core_index = CORE_ARGS.len();
                    let off = outgoing_stack_offset(stack_index);
                    stack_index += 2;
                    Location::DoubleStackSlot(off)
                }
            } else if core_index < CORE_ARGS.len() {
                let reg = CORE_ARGS[core_index];
                core_index += 1;
                Location::Register(reg)
            } else {
                let off = outgoing_stack_offset(stack_index);
                stack_index += 1;
                Location::StackSlot(off)
            };
            s.set_in_at(i, location);
        }
        if return_type != DataType::Void {
            s.set_out(return_location(return_type));
        }
        s
    }

    fn type_conversion(&self, from: DataType, to: DataType) -> CompileResult<LocationSummary> {
        let mut s = LocationSummary::new(CallKind::NoCall);
        match (from, to) {
            (DataType::Int32, DataType::Int64) => {
                // cdq sign-extends EAX into EDX.
                s.set_in_at(0, Location::Register(Register::EAX));
                s.set_out(Location::RegisterPair(Register::EAX, Register::EDX));
            }
            (DataType::Int64, DataType::Int32) => {
                s.set_in_at(0, Location::any());
                s.set_out(Location::requires_register());
            }
            (DataType::Int32 | DataType::Uint16 | DataType::Int16, DataType::Int8 | DataType::Uint8) => {
                s.set_in_at(0, Location::byte_register_or_constant());
                s.set_out(Location::requires_register());
            }
            (_, DataType::Int16 | DataType::Uint16) => {
                s.set_in_at(0, Location::any());
                s.set_out(Location::requires_register());
            }
            (DataType::Int32, DataType::Float32 | DataType::Float64) => {
                s.set_in_at(0, Location::requires_register());
                s.set_out(Location::requires_fpu_register());
            }
            (DataType::Int64, DataType::Float32 | DataType::Float64) => {
                // fildll needs a memory operand; the value is pushed.
                s.set_in_at(0, Location::any());
                s.set_out(Location::requires_fpu_register());
            }
            (DataType::Float32 | DataType::Float64, DataType::Int32) => {
                s.set_in_at(0, Location::requires_fpu_register());
                s.set_out(Location::requires_register());
                s.add_temp(Location::requires_fpu_register());
            }
            (DataType::Float32 | DataType::Float64, DataType::Int64) => {
                // Runtime helper per the quick ABI.
                let mut call = LocationSummary::new(CallKind::CallOnMainOnly);
                call.set_in_at(0, Location::FpuRegister(XmmRegister::XMM0));
                call.set_out(Location::RegisterPair(Register::EAX, Register::EDX));
                return Ok(call);
            }
            (DataType::Float32, DataType::Float64)
            | (DataType::Float64, DataType::Float32) => {
                s.set_in_at(0, Location::requires_fpu_register());
                s.set_out(Location::requires_fpu_register());
            }
            (from, to) => {
                return Err(CompileError::UnimplementedTypeCombination {
                    operation: "type conversion",
                    ty: format!("{from} -> {to}"),
                });
            }
        }
        Ok(s)
    }
}

/// Whether the method load kind reads through a method-address landmark.
pub fn method_load_kind_uses_base(kind: MethodLoadKind) -> bool {
    matches!(
        kind,
        MethodLoadKind::BootImageLinkTimePcRelative
            | MethodLoadKind::BootImageRelRo
            | MethodLoadKind::AppImageRelRo
            | MethodLoadKind::BssEntry
    )
}

/// Default output constraint for a produced value of the given type.
fn out_constraint(ty: DataType) -> Location {
    if ty.is_floating_point() {
        Location::requires_fpu_register()
    } else {
        Location::requires_register()
    }
}

/// Fixed ABI location of a returned value.
pub fn return_location(ty: DataType) -> Location {
    match ty {
        DataType::Void => Location::NoLocation,
        DataType::Float32 | DataType::Float64 => Location::FpuRegister(XmmRegister::XMM0),
        DataType::Int64 | DataType::Uint64 => {
            Location::RegisterPair(Register::EAX, Register::EDX)
        }
        _ => Location::Register(Register::EAX),
    }
}

/// ESP-relative offset of an outgoing stack argument at the call site.
/// Slot 0 starts just above the callee method slot.
pub fn outgoing_stack_offset(stack_index: usize) -> i32 {
    4 + (stack_index as i32) * 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CompilationSession;
    use crate::graph::NO_DEX_PC;
    use bumpalo::Bump;

    fn build(graph: &mut HGraph<'_>) {
        let builder =
            LocationsBuilderX86::new(CpuFeatures::default(), CompilerOptions::default());
        builder.run(graph).unwrap();
    }

    #[test]
    fn test_add_uses_two_operand_form() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "t");
        let b = graph.entry_block();
        let c1 = graph.add_instruction(
            b,
            HInstructionKind::IntConstant(1),
            DataType::Int32,
            vec![],
            NO_DEX_PC,
        );
        let c2 = graph.add_instruction(
            b,
            HInstructionKind::IntConstant(2),
            DataType::Int32,
            vec![],
            NO_DEX_PC,
        );
        let add = graph.add_instruction(
            b,
            HInstructionKind::Add,
            DataType::Int32,
            vec![c1, c2],
            NO_DEX_PC,
        );
        build(&mut graph);

        let locations = graph.instr(add).locations();
        assert_eq!(
            locations.out(),
            Location::same_as_first_input()
        );
        assert!(locations.in_at(0).is_unallocated());
    }

    #[test]
    fn test_div_fixes_eax_edx() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "t");
        let b = graph.entry_block();
        let p0 = graph.add_instruction(
            b,
            HInstructionKind::ParameterValue { index: 0 },
            DataType::Int32,
            vec![],
            NO_DEX_PC,
        );
        let p1 = graph.add_instruction(
            b,
            HInstructionKind::ParameterValue { index: 1 },
            DataType::Int32,
            vec![],
            NO_DEX_PC,
        );
        let div = graph.add_instruction(
            b,
            HInstructionKind::Div,
            DataType::Int32,
            vec![p0, p1],
            0,
        );
        build(&mut graph);

        let locations = graph.instr(div).locations();
        assert_eq!(locations.in_at(0), Location::Register(Register::EAX));
        assert_eq!(locations.out(), Location::Register(Register::EAX));
        assert_eq!(locations.temp(0), Location::Register(Register::EDX));
    }

    #[test]
    fn test_variable_shift_count_in_ecx() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "t");
        let b = graph.entry_block();
        let value = graph.add_instruction(
            b,
            HInstructionKind::ParameterValue { index: 0 },
            DataType::Int32,
            vec![],
            NO_DEX_PC,
        );
        let count = graph.add_instruction(
            b,
            HInstructionKind::ParameterValue { index: 1 },
            DataType::Int32,
            vec![],
            NO_DEX_PC,
        );
        let shl = graph.add_instruction(
            b,
            HInstructionKind::Shl,
            DataType::Int32,
            vec![value, count],
            NO_DEX_PC,
        );
        build(&mut graph);

        assert_eq!(
            graph.instr(shl).locations().in_at(1),
            Location::Register(Register::ECX)
        );
    }

    #[test]
    fn test_long_div_is_runtime_call() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "t");
        let b = graph.entry_block();
        let p0 = graph.add_instruction(
            b,
            HInstructionKind::ParameterValue { index: 0 },
            DataType::Int64,
            vec![],
            NO_DEX_PC,
        );
        let p1 = graph.add_instruction(
            b,
            HInstructionKind::ParameterValue { index: 1 },
            DataType::Int64,
            vec![],
            NO_DEX_PC,
        );
        let div = graph.add_instruction(
            b,
            HInstructionKind::Div,
            DataType::Int64,
            vec![p0, p1],
            0,
        );
        build(&mut graph);

        let locations = graph.instr(div).locations();
        assert!(locations.can_call());
        assert_eq!(
            locations.out(),
            Location::RegisterPair(Register::EAX, Register::EDX)
        );
    }

    #[test]
    fn test_volatile_long_field_set_gets_fpu_temps() {
        use crate::graph::instruction::{FieldInfo, WriteBarrierKind};
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "t");
        let b = graph.entry_block();
        let obj = graph.add_instruction(
            b,
            HInstructionKind::ParameterValue { index: 0 },
            DataType::Reference,
            vec![],
            NO_DEX_PC,
        );
        let value = graph.add_instruction(
            b,
            HInstructionKind::ParameterValue { index: 1 },
            DataType::Int64,
            vec![],
            NO_DEX_PC,
        );
        let set = graph.add_instruction(
            b,
            HInstructionKind::InstanceFieldSet {
                field: FieldInfo { offset: 16, field_type: DataType::Int64, is_volatile: true },
                write_barrier: WriteBarrierKind::DontEmit,
                value_can_be_null: true,
            },
            DataType::Void,
            vec![obj, value],
            0,
        );
        build(&mut graph);

        let locations = graph.instr(set).locations();
        assert_eq!(locations.temps().len(), 2);
        assert_eq!(locations.temp(0), Location::requires_fpu_register());
    }
}
