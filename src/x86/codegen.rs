// This module is the main emission pass of the x86-32 back end. It walks the
// graph in linear order with every location summary concretized by the
// register allocator and produces position-independent machine code plus the
// metadata the runtime needs to execute it: stack maps for every call and
// implicit-check site, linker patches for boot/app-image references, a JIT
// root table, and the constant area with its jump tables. Values are staged
// into the locations each summary demands through the parallel move resolver
// immediately before the instruction, so the allocator only has to satisfy
// fixed constraints at definition points. Out-of-line code is collected as
// SlowPathCode objects during the walk and emitted after the last block.
//
// PC-relative addressing on x86-32 has no RIP; methods that need it carry a
// ComputeBaseMethodAddress instruction whose call/pop/sub sequence leaves the
// code start address in a register. Constant-area displacements and jump
// table entries are all code-start-relative, which is what the assembler's
// deferred fix-ups produce.

//! Graph-to-machine-code emission for x86-32.

use crate::core::{CompileError, CompileResult, CompilerOptions};
use crate::graph::instruction::{
    is_fp_condition_false_if_nan, is_fp_condition_true_if_nan, ClassLoadKind, ComparisonBias,
    FieldInfo, IfCondition, MemBarrierKind, MethodLoadKind, StringLoadKind, TypeCheckKind,
    WriteBarrierKind,
};
use crate::graph::{BlockId, DataType, HGraph, HInstructionKind, InstrId};
use crate::locations::{Location, RegisterSet};
use crate::runtime::{QuickEntrypoint, RuntimeLayout};
use crate::stack_map::{StackMapKind, StackMapStream};
use crate::x86::assembler::{Address, Label, ScaleFactor, X86Assembler};
use crate::x86::locations_builder::{method_load_kind_uses_base, outgoing_stack_offset};
use crate::x86::parallel_move::ParallelMoveResolverX86;
use crate::x86::patch::{LinkerPatch, MethodReference, PatchTables, StringReference, TypeReference};
use crate::x86::slow_path::{
    ArraySetSlowPath, BoundsCheckSlowPath, CompileOptimizedSlowPath, DeoptimizationSlowPath,
    DivRemMinusOneSlowPath, DivZeroCheckSlowPath, LoadClassSlowPath, LoadStringSlowPath,
    MethodHookSlowPath, NullCheckSlowPath, ReadBarrierForHeapReferenceSlowPath,
    ReadBarrierForRootSlowPath, ReadBarrierMarkSlowPath, SlowPathCode, SuspendCheckSlowPath,
    TypeCheckSlowPath,
};
use crate::x86::{
    condition_code, unsigned_condition_code, Condition, CpuFeatures, Register, XmmRegister,
    CALLEE_SAVED_REGISTERS, HIDDEN_INTERFACE_ARGUMENT, METHOD_REGISTER,
};
use hashbrown::HashMap;
use log::{debug, trace};

/// Placeholder displacement for PC-relative patch slots. Large enough to
/// force a 32-bit displacement encoding.
const PLACEHOLDER_32BIT_OFFSET: i32 = 0x100;

/// The finished product of a compilation.
#[derive(Debug)]
pub struct CompiledMethod {
    pub code: Vec<u8>,
    pub frame_size: u32,
    pub core_spill_mask: u32,
    pub fpu_spill_mask: u32,
    pub stack_maps: Vec<u8>,
    /// DWARF unwinder directives covering every stack-pointer change.
    pub cfi: Vec<u8>,
    pub linker_patches: Vec<LinkerPatch>,
    pub number_of_jit_roots: u32,
}

/// A reserved jump-table area waiting for its entries.
struct JumpTableFixup {
    area_offset: i32,
    targets: Vec<BlockId>,
}

/// Emits machine code for one method.
pub struct CodeGeneratorX86<'g, 'arena> {
    graph: &'g HGraph<'arena>,
    options: CompilerOptions,
    features: CpuFeatures,
    layout: RuntimeLayout,
    asm: X86Assembler,
    block_labels: Vec<Label>,
    frame_entry_label: Label,
    slow_paths: Vec<Box<dyn SlowPathCode>>,
    stack_maps: StackMapStream,
    patches: PatchTables,
    /// Code offset of the address pushed by each ComputeBaseMethodAddress.
    method_address_offsets: HashMap<InstrId, u32>,
    jump_tables: Vec<JumpTableFixup>,
    /// ABI location of each ParameterValue on entry.
    incoming_params: HashMap<InstrId, Location>,
    frame_size: u32,
    core_spills: Vec<Register>,
    order: Vec<BlockId>,
    current_block_index: usize,
}

impl<'g, 'arena> CodeGeneratorX86<'g, 'arena> {
    pub fn new(
        graph: &'g HGraph<'arena>,
        layout: RuntimeLayout,
        features: CpuFeatures,
        options: CompilerOptions,
    ) -> Self {
        let mut asm = X86Assembler::new(options.poison_heap_references);
        let block_labels = (0..graph.num_blocks()).map(|_| asm.create_label()).collect();
        let frame_entry_label = asm.create_label();
        Self {
            graph,
            options,
            features,
            layout,
            asm,
            block_labels,
            frame_entry_label,
            slow_paths: Vec::new(),
            stack_maps: StackMapStream::new(),
            patches: PatchTables::default(),
            method_address_offsets: HashMap::new(),
            jump_tables: Vec::new(),
            incoming_params: HashMap::new(),
            frame_size: 0,
            core_spills: Vec::new(),
            order: Vec::new(),
            current_block_index: 0,
        }
    }

    pub fn assembler(&mut self) -> &mut X86Assembler {
        &mut self.asm
    }

    pub fn graph(&self) -> &HGraph<'arena> {
        self.graph
    }

    pub fn layout(&self) -> &RuntimeLayout {
        &self.layout
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn features(&self) -> CpuFeatures {
        self.features
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    pub fn code(&self) -> &[u8] {
        self.asm.code()
    }

    pub fn stack_map_stream(&self) -> &StackMapStream {
        &self.stack_maps
    }

    pub fn block_label(&self, block: BlockId) -> Label {
        self.block_labels[block.index()]
    }

    /// Lower the whole graph.
    pub fn compile(&mut self) -> CompileResult<()> {
        debug!(
            "compiling {} ({} blocks, {} instructions)",
            self.graph.method_name,
            self.graph.num_blocks(),
            self.graph.num_instructions()
        );
        self.order = if self.graph.linear_order().is_empty() {
            (0..self.graph.num_blocks() as u32).map(BlockId).collect()
        } else {
            self.graph.linear_order().to_vec()
        };
        self.compute_frame_layout();
        self.compute_parameter_locations();
        self.generate_frame_entry()?;
        for index in 0..self.order.len() {
            self.current_block_index = index;
            let block_id = self.order[index];
            self.emit_block(block_id)?;
        }
        self.finalize_code()?;
        debug!(
            "compiled {}: {} bytes, frame {} bytes, {} stack maps",
            self.graph.method_name,
            self.asm.code_size(),
            self.frame_size,
            self.stack_maps.num_entries()
        );
        Ok(())
    }

    // === Frame ============================================================

    fn compute_frame_layout(&mut self) {
        let g = self.graph;
        let mut spills: Vec<Register> = Vec::new();
        // The ArtMethod pointer occupies [ESP + 0].
        let mut max_extent: i32 = 4;
        for id in g.instruction_ids() {
            let instr = g.instr(id);
            let Some(summary) = &instr.locations else { continue };
            let all = summary
                .inputs()
                .iter()
                .chain(summary.temps().iter())
                .copied()
                .chain(std::iter::once(summary.out()));
            for loc in all {
                note_location(loc, &mut spills, &mut max_extent);
            }
            if let Some(env) = &instr.environment {
                for &loc in &env.locations {
                    note_location(loc, &mut spills, &mut max_extent);
                }
            }
        }
        spills.sort_by_key(|r| {
            CALLEE_SAVED_REGISTERS.iter().position(|&c| c == *r).unwrap_or(usize::MAX)
        });
        let raw = max_extent + 4 * spills.len() as i32 + 4;
        self.frame_size = ((raw + 15) & !15) as u32;
        self.core_spills = spills;
        trace!(
            "frame: size {} spills {:?} slot extent {}",
            self.frame_size,
            self.core_spills,
            max_extent
        );
    }

    /// The incoming managed-ABI location of every ParameterValue, mirroring
    /// the argument assignment used at call sites.
    fn compute_parameter_locations(&mut self) {
        const CORE_ARGS: [Register; 3] = [Register::ECX, Register::EDX, Register::EBX];
        const FP_ARGS: [XmmRegister; 4] =
            [XmmRegister::XMM0, XmmRegister::XMM1, XmmRegister::XMM2, XmmRegister::XMM3];

        let g = self.graph;
        let mut params: Vec<(u16, InstrId)> = Vec::new();
        for id in g.instruction_ids() {
            if let HInstructionKind::ParameterValue { index } = g.instr(id).kind {
                params.push((index, id));
            }
        }
        params.sort_by_key(|&(index, _)| index);

        let frame = self.frame_size as i32;
        let mut core_index = 0usize;
        let mut fp_index = 0usize;
        let mut stack_index = 0usize;
        for (_, id) in params {
            let ty = g.instr(id).ty;
            let location = if ty.is_floating_point() {
                if fp_index < FP_ARGS.len() {
                    let reg = FP_ARGS[fp_index];
                    fp_index += 1;
                    Location::FpuRegister(reg)
                } else {
                    let slots = if ty.is_64bit() { 2 } else { 1 };
                    let off = frame + outgoing_stack_offset(stack_index);
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
                    let off = frame + outgoing_stack_offset(stack_index);
                    stack_index += 2;
                    Location::DoubleStackSlot(off)
                }
            } else if core_index < CORE_ARGS.len() {
                let reg = CORE_ARGS[core_index];
                core_index += 1;
                Location::Register(reg)
            } else {
                let off = frame + outgoing_stack_offset(stack_index);
                stack_index += 1;
                Location::StackSlot(off)
            };
            self.incoming_params.insert(id, location);
        }
    }

    fn frame_adjust(&self) -> i32 {
        self.frame_size as i32 - 4 * (self.core_spills.len() as i32 + 1)
    }

    fn generate_frame_entry(&mut self) -> CompileResult<()> {
        self.asm.bind(self.frame_entry_label);
        // The return address is already on the stack.
        self.asm.cfi_set_cfa_offset(4);
        if self.options.implicit_null_checks {
            // Stack overflow probe; a fault here raises StackOverflowError.
            let probe = Address::displace(Register::ESP, -self.layout.stack_overflow_reserved_bytes);
            self.asm.testl_reg_mem(Register::EAX, probe);
        }
        for i in 0..self.core_spills.len() {
            let reg = self.core_spills[i];
            self.asm.pushl_reg(reg);
            self.asm.cfi_adjust_cfa_offset(4);
            self.asm.cfi_rel_offset(reg, 0);
        }
        let adjust = self.frame_adjust();
        if adjust != 0 {
            self.asm.subl_reg_imm(Register::ESP, adjust);
            self.asm.cfi_adjust_cfa_offset(adjust);
        }
        self.asm.movl_mem_reg(Address::displace(Register::ESP, 0), METHOD_REGISTER);

        if self.options.is_baseline() {
            // The hotness check sits after the frame is built so the slow
            // path finds the method pointer at [ESP + saved].
            let anchor = self
                .graph
                .block(self.graph.entry_block())
                .instructions
                .first()
                .copied();
            if let Some(anchor) = anchor {
                let hotness =
                    Address::displace(METHOD_REGISTER, self.layout.method_hotness_count_offset);
                let path = CompileOptimizedSlowPath::new(self, anchor);
                let entry = path.entry_label();
                let exit = path.exit_label();
                self.slow_paths.push(Box::new(path));
                self.asm.cmpw_mem_imm(hotness, 0);
                self.asm.j(Condition::Equal, entry);
                self.asm.addw_mem_imm(hotness, -1);
                self.asm.bind(exit);
            }
        }
        Ok(())
    }

    fn generate_frame_exit(&mut self) {
        // Code after the ret (other returns, slow paths) still runs under
        // the full frame; bracket the epilogue directives.
        self.asm.cfi_remember_state();
        let adjust = self.frame_adjust();
        if adjust != 0 {
            self.asm.addl_reg_imm(Register::ESP, adjust);
            self.asm.cfi_adjust_cfa_offset(-adjust);
        }
        for i in (0..self.core_spills.len()).rev() {
            let reg = self.core_spills[i];
            self.asm.popl_reg(reg);
            self.asm.cfi_adjust_cfa_offset(-4);
            self.asm.cfi_restore(reg);
        }
        self.asm.ret();
        self.asm.cfi_restore_state();
    }

    // === Block walk =======================================================

    fn next_block(&self) -> Option<BlockId> {
        self.order.get(self.current_block_index + 1).copied()
    }

    fn emit_block(&mut self, block_id: BlockId) -> CompileResult<()> {
        let g = self.graph;
        self.asm.bind(self.block_labels[block_id.index()]);
        let block = g.block(block_id);
        if block.is_catch_block {
            // Exception delivery lands here; the runtime looks the target up
            // by this stack map.
            let dex_pc = block
                .instructions
                .first()
                .map(|&id| g.instr(id).dex_pc)
                .unwrap_or(crate::graph::instruction::NO_DEX_PC);
            self.stack_maps.begin_stack_map_entry(
                dex_pc,
                self.asm.code_size() as u32,
                0,
                Vec::new(),
                StackMapKind::Catch,
            );
            self.stack_maps.end_stack_map_entry();
        }
        for i in 0..block.instructions.len() {
            let id = g.block(block_id).instructions[i];
            self.emit_instruction(id)?;
        }
        Ok(())
    }

    fn emit_instruction(&mut self, id: InstrId) -> CompileResult<()> {
        let g = self.graph;
        let instr = g.instr(id);
        if instr.is_emitted_at_use_site {
            return Ok(());
        }
        trace!("emit {:?} {}", id, instr.kind.name());
        match instr.kind {
            // Constants fold into their uses.
            HInstructionKind::IntConstant(_)
            | HInstructionKind::LongConstant(_)
            | HInstructionKind::FloatConstant(_)
            | HInstructionKind::DoubleConstant(_)
            | HInstructionKind::NullConstant => Ok(()),
            // Defined by the frame; the prologue already stored the method.
            HInstructionKind::CurrentMethod | HInstructionKind::Phi => Ok(()),
            HInstructionKind::ParameterValue { .. } => self.emit_parameter(id),

            HInstructionKind::Add
            | HInstructionKind::Sub
            | HInstructionKind::And
            | HInstructionKind::Or
            | HInstructionKind::Xor => self.emit_binary(id),
            HInstructionKind::Mul => self.emit_mul(id),
            HInstructionKind::Div => self.emit_div_rem(id, true),
            HInstructionKind::Rem => self.emit_div_rem(id, false),
            HInstructionKind::Neg => self.emit_neg(id),
            HInstructionKind::Abs => self.emit_abs(id),
            HInstructionKind::Min => self.emit_min_max(id, true),
            HInstructionKind::Max => self.emit_min_max(id, false),
            HInstructionKind::Not => self.emit_not(id),
            HInstructionKind::BooleanNot => self.emit_boolean_not(id),
            HInstructionKind::Shl
            | HInstructionKind::Shr
            | HInstructionKind::UShr
            | HInstructionKind::Ror => self.emit_shift(id),

            HInstructionKind::Compare { bias } => self.emit_compare(id, bias),
            HInstructionKind::Condition { cond, bias } => self.emit_condition(id, cond, bias),
            HInstructionKind::Select => self.emit_select(id),

            HInstructionKind::Goto | HInstructionKind::TryBoundary { .. } => self.emit_goto(id),
            HInstructionKind::If => self.emit_if(id),
            HInstructionKind::Return => self.emit_return(id),
            HInstructionKind::ReturnVoid => {
                self.generate_frame_exit();
                Ok(())
            }
            HInstructionKind::Exit => Ok(()),
            HInstructionKind::Throw => {
                self.stage_inputs(id)?;
                self.invoke_runtime(QuickEntrypoint::Throw, id)
            }
            HInstructionKind::Deoptimize { kind } => self.emit_deoptimize(id, kind),
            HInstructionKind::PackedSwitch { start_value } => {
                self.emit_packed_switch(id, start_value)
            }
            HInstructionKind::X86PackedSwitch { start_value } => {
                self.emit_jump_table_switch(id, start_value)
            }

            HInstructionKind::NullCheck => self.emit_null_check(id),
            HInstructionKind::BoundsCheck { is_string_char_at } => {
                self.emit_bounds_check(id, is_string_char_at)
            }
            HInstructionKind::DivZeroCheck => self.emit_div_zero_check(id),

            HInstructionKind::InstanceFieldGet { field }
            | HInstructionKind::StaticFieldGet { field } => self.emit_field_get(id, field),
            HInstructionKind::InstanceFieldSet { field, write_barrier, value_can_be_null }
            | HInstructionKind::StaticFieldSet { field, write_barrier, value_can_be_null } => {
                self.emit_field_set(id, field, write_barrier, value_can_be_null)
            }
            HInstructionKind::ArrayGet { component, is_string_char_at } => {
                self.emit_array_get(id, component, is_string_char_at)
            }
            HInstructionKind::ArraySet {
                component,
                needs_type_check,
                write_barrier,
                value_can_be_null,
            } => self.emit_array_set(id, component, needs_type_check, write_barrier, value_can_be_null),
            HInstructionKind::ArrayLength { is_string_length } => {
                self.emit_array_length(id, is_string_length)
            }

            HInstructionKind::NewInstance { .. } => {
                self.stage_inputs(id)?;
                self.invoke_runtime(QuickEntrypoint::AllocObjectWithChecks, id)
            }
            HInstructionKind::NewArray { .. } => {
                self.stage_inputs(id)?;
                self.invoke_runtime(QuickEntrypoint::AllocArrayResolved, id)
            }
            HInstructionKind::InstanceOf { check_kind } => self.emit_instance_of(id, check_kind),
            HInstructionKind::CheckCast { check_kind } => self.emit_check_cast(id, check_kind),
            HInstructionKind::LoadClass {
                type_index,
                load_kind,
                needs_access_check,
                generate_clinit_check,
            } => self.emit_load_class(id, type_index, load_kind, needs_access_check, generate_clinit_check),
            HInstructionKind::LoadString { string_index, load_kind } => {
                self.emit_load_string(id, string_index, load_kind)
            }
            HInstructionKind::LoadMethodHandle { method_handle_index } => {
                self.asm.movl_reg_imm(Register::EAX, method_handle_index as i32);
                self.invoke_runtime(QuickEntrypoint::ResolveMethodHandle, id)
            }
            HInstructionKind::LoadMethodType { proto_index } => {
                self.asm.movl_reg_imm(Register::EAX, proto_index as i32);
                self.invoke_runtime(QuickEntrypoint::ResolveMethodType, id)
            }
            HInstructionKind::ClinitCheck => self.emit_clinit_check(id),
            HInstructionKind::MonitorOperation { is_enter } => {
                self.stage_inputs(id)?;
                let entrypoint = if is_enter {
                    QuickEntrypoint::LockObject
                } else {
                    QuickEntrypoint::UnlockObject
                };
                self.invoke_runtime(entrypoint, id)
            }

            HInstructionKind::InvokeStaticOrDirect { method_index, load_kind } => {
                self.emit_invoke_static_or_direct(id, method_index, load_kind)
            }
            HInstructionKind::InvokeVirtual { vtable_index, .. } => {
                self.emit_invoke_virtual(id, vtable_index)
            }
            HInstructionKind::InvokeInterface { method_index, imt_index } => {
                self.emit_invoke_interface(id, method_index, imt_index)
            }
            HInstructionKind::InvokePolymorphic { .. } => {
                self.stage_inputs(id)?;
                self.invoke_runtime(QuickEntrypoint::QuickInvokePolymorphic, id)
            }
            HInstructionKind::InvokeCustom { .. } => {
                self.stage_inputs(id)?;
                self.invoke_runtime(QuickEntrypoint::QuickInvokeCustom, id)
            }
            HInstructionKind::InvokeUnresolved { .. } => {
                self.stage_inputs(id)?;
                self.invoke_runtime(QuickEntrypoint::QuickResolutionTrampoline, id)
            }

            HInstructionKind::TypeConversion => self.emit_type_conversion(id),
            HInstructionKind::MemoryBarrier { kind } => {
                self.emit_memory_barrier(kind);
                Ok(())
            }
            // x86 stores are not reordered with other stores.
            HInstructionKind::ConstructorFence => Ok(()),
            HInstructionKind::SuspendCheck => self.emit_suspend_check(id),

            HInstructionKind::ComputeBaseMethodAddress => self.emit_base_method_address(id),
            HInstructionKind::X86LoadFromConstantTable => self.emit_constant_table_load(id),
            HInstructionKind::X86FPNeg => self.emit_fp_neg_via_constant_area(id),

            HInstructionKind::MethodEntryHook => self.emit_method_hook(id, true),
            HInstructionKind::MethodExitHook => self.emit_method_hook(id, false),
        }
    }

    // === Value staging ====================================================

    /// Move each input's defining location into the slot the summary
    /// requires. Requirements left abstract (Any satisfied in place,
    /// folded constants, NoLocation) emit nothing.
    fn stage_inputs(&mut self, id: InstrId) -> CompileResult<()> {
        let g = self.graph;
        let instr = g.instr(id);
        let Some(summary) = &instr.locations else { return Ok(()) };
        let mut resolver = ParallelMoveResolverX86::new(&mut self.asm, g);
        for (i, &input) in instr.inputs.iter().enumerate() {
            if i >= summary.inputs().len() {
                continue;
            }
            let required = summary.in_at(i);
            match required {
                Location::Register(_)
                | Location::RegisterPair(_, _)
                | Location::FpuRegister(_)
                | Location::StackSlot(_)
                | Location::DoubleStackSlot(_) => {}
                _ => continue,
            }
            let def = g.instr(input);
            let Some(def_summary) = &def.locations else { continue };
            let source = def_summary.out();
            if source == required {
                continue;
            }
            let constant = match source {
                Location::Constant(cid) => Some(cid),
                _ => None,
            };
            resolver.add_move(source, required, def.ty, constant);
        }
        resolver.resolve()
    }

    fn emit_move(&mut self, destination: Location, source: Location, ty: DataType) -> CompileResult<()> {
        if source == destination {
            return Ok(());
        }
        let mut resolver = ParallelMoveResolverX86::new(&mut self.asm, self.graph);
        let constant = match source {
            Location::Constant(cid) => Some(cid),
            _ => None,
        };
        resolver.add_move(source, destination, ty, constant);
        resolver.resolve()
    }

    /// Move a 32-bit value between resolved locations.
    pub fn move32(&mut self, destination: Location, source: Location) -> CompileResult<()> {
        self.emit_move(destination, source, DataType::Int32)
    }

    /// Move a 64-bit value between resolved locations.
    pub fn move64(&mut self, destination: Location, source: Location) -> CompileResult<()> {
        self.emit_move(destination, source, DataType::Int64)
    }

    /// Schedule a set of conceptually-parallel moves.
    pub fn emit_parallel_moves(
        &mut self,
        moves: &[(Location, Location, DataType)],
    ) -> CompileResult<()> {
        let mut resolver = ParallelMoveResolverX86::new(&mut self.asm, self.graph);
        for &(source, destination, ty) in moves {
            let constant = match source {
                Location::Constant(cid) => Some(cid),
                _ => None,
            };
            resolver.add_move(source, destination, ty, constant);
        }
        resolver.resolve()
    }

    fn emit_parameter(&mut self, id: InstrId) -> CompileResult<()> {
        let out = self.graph.instr(id).locations().out();
        let ty = self.graph.instr(id).ty;
        let Some(&incoming) = self.incoming_params.get(&id) else {
            return Err(CompileError::CodeGeneration {
                reason: format!("parameter {:?} has no incoming location", id),
            });
        };
        self.emit_move(out, incoming, ty)
    }

    // === Runtime interaction ==============================================

    /// Call a runtime entrypoint through the thread-local table and record
    /// the safepoint.
    pub fn invoke_runtime(
        &mut self,
        entrypoint: QuickEntrypoint,
        instruction: InstrId,
    ) -> CompileResult<()> {
        let offset = self.layout.entrypoint_offset(entrypoint);
        self.asm.fs_prefix();
        self.asm.call_mem(Address::absolute(offset));
        self.record_pc_info(instruction);
        Ok(())
    }

    /// Record a stack map at the current code offset.
    pub fn record_pc_info(&mut self, instruction: InstrId) {
        let instr = self.graph.instr(instruction);
        let register_mask = instr
            .locations
            .as_ref()
            .map(|l| l.live_registers.core_mask())
            .unwrap_or(0);
        self.stack_maps.begin_stack_map_entry(
            instr.dex_pc,
            self.asm.code_size() as u32,
            register_mask,
            Vec::new(),
            StackMapKind::Default,
        );
        if let Some(env) = &instr.environment {
            for &loc in &env.locations {
                self.stack_maps.add_environment_location(loc);
            }
        }
        self.stack_maps.end_stack_map_entry();
    }

    fn live_register_set(&self, instruction: InstrId) -> RegisterSet {
        match &self.graph.instr(instruction).locations {
            Some(l) => l.custom_slow_path_caller_saves.unwrap_or(l.live_registers),
            None => RegisterSet::empty(),
        }
    }

    /// Spill the caller-saved registers live across a slow-path call.
    /// Returns the number of bytes pushed.
    pub fn save_live_registers(&mut self, instruction: InstrId) -> u32 {
        let live = self.live_register_set(instruction);
        let mut saved = 0u32;
        for reg in live.core_registers() {
            self.asm.pushl_reg(reg);
            self.asm.cfi_adjust_cfa_offset(4);
            saved += 4;
        }
        let fp: Vec<XmmRegister> = live.fp_registers().collect();
        if !fp.is_empty() {
            let slot = if self.graph.uses_simd { 16usize } else { 8usize };
            let bytes = (fp.len() * slot) as i32;
            self.asm.subl_reg_imm(Register::ESP, bytes);
            self.asm.cfi_adjust_cfa_offset(bytes);
            for (i, &reg) in fp.iter().enumerate() {
                let addr = Address::displace(Register::ESP, (i * slot) as i32);
                if self.graph.uses_simd {
                    self.asm.movups_mem_reg(addr, reg);
                } else {
                    self.asm.movsd_mem_reg(addr, reg);
                }
            }
            saved += bytes as u32;
        }
        saved
    }

    pub fn restore_live_registers(&mut self, instruction: InstrId) {
        let live = self.live_register_set(instruction);
        let fp: Vec<XmmRegister> = live.fp_registers().collect();
        if !fp.is_empty() {
            let slot = if self.graph.uses_simd { 16usize } else { 8usize };
            for (i, &reg) in fp.iter().enumerate() {
                let addr = Address::displace(Register::ESP, (i * slot) as i32);
                if self.graph.uses_simd {
                    self.asm.movups_reg_mem(reg, addr);
                } else {
                    self.asm.movsd_reg_mem(reg, addr);
                }
            }
            let bytes = (fp.len() * slot) as i32;
            self.asm.addl_reg_imm(Register::ESP, bytes);
            self.asm.cfi_adjust_cfa_offset(-bytes);
        }
        let cores: Vec<Register> = live.core_registers().collect();
        for &reg in cores.iter().rev() {
            self.asm.popl_reg(reg);
            self.asm.cfi_adjust_cfa_offset(-4);
        }
    }

    // === Constant helpers =================================================

    fn constant_i64(&self, id: InstrId) -> i64 {
        self.graph.instr(id).constant_value().unwrap_or(0)
    }

    fn constant_i32(&self, id: InstrId) -> i32 {
        self.constant_i64(id) as i32
    }
}

/// Note a concretized location's contribution to the frame.
fn note_location(location: Location, spills: &mut Vec<Register>, max_extent: &mut i32) {
    let mut note_reg = |reg: Register, spills: &mut Vec<Register>| {
        if CALLEE_SAVED_REGISTERS.contains(&reg) && !spills.contains(&reg) {
            spills.push(reg);
        }
    };
    match location {
        Location::Register(reg) => note_reg(reg, spills),
        Location::RegisterPair(lo, hi) => {
            note_reg(lo, spills);
            note_reg(hi, spills);
        }
        Location::StackSlot(off) => *max_extent = (*max_extent).max(off + 4),
        Location::DoubleStackSlot(off) => *max_extent = (*max_extent).max(off + 8),
        Location::SimdStackSlot(off) => *max_extent = (*max_extent).max(off + 16),
        _ => {}
    }
}

// === Control flow =========================================================

impl<'g, 'arena> CodeGeneratorX86<'g, 'arena> {
    /// Phi inputs flow along edges; emit the shuffle before leaving a block.
    fn emit_phi_moves(&mut self, from: BlockId, to: BlockId) -> CompileResult<()> {
        let g = self.graph;
        let successor = g.block(to);
        if successor.phis.is_empty() {
            return Ok(());
        }
        let pred_index = successor
            .predecessors
            .iter()
            .position(|&p| p == from)
            .ok_or_else(|| CompileError::CodeGeneration {
                reason: format!("{:?} is not a predecessor of {:?}", from, to),
            })?;
        let mut resolver = ParallelMoveResolverX86::new(&mut self.asm, g);
        for &phi_id in &successor.phis {
            let phi = g.instr(phi_id);
            let destination = phi.locations().out();
            let input = phi.inputs[pred_index];
            let source = g.instr(input).locations().out();
            let constant = match source {
                Location::Constant(cid) => Some(cid),
                _ => None,
            };
            resolver.add_move(source, destination, phi.ty, constant);
        }
        resolver.resolve()
    }

    fn emit_goto(&mut self, id: InstrId) -> CompileResult<()> {
        let g = self.graph;
        let block = g.instr(id).block;
        let successor = g.block(block).successors[0];
        self.emit_phi_moves(block, successor)?;
        // A back edge into a loop header with a hoisted suspend check merges
        // the check with the jump.
        if let Some(info) = &g.block(successor).loop_information {
            if info.back_edges.contains(&block) {
                if let Some(check) = info.suspend_check {
                    return self.generate_suspend_check(check, Some(successor));
                }
            }
        }
        if Some(successor) != self.next_block() {
            self.asm.jmp_label(self.block_label(successor));
        }
        Ok(())
    }

    fn emit_if(&mut self, id: InstrId) -> CompileResult<()> {
        let g = self.graph;
        let instr = g.instr(id);
        let block = g.block(instr.block);
        let true_successor = block.true_successor();
        let false_successor = block.false_successor();
        let true_label = self.block_label(true_successor);
        let false_label = self.block_label(false_successor);
        let next = self.next_block();

        let input = instr.inputs[0];
        let condition = g.instr(input);
        if condition.is_emitted_at_use_site
            && matches!(condition.kind, HInstructionKind::Condition { .. })
        {
            let false_is_fallthrough = Some(false_successor) == next;
            return self.generate_condition_branch(input, true_label, false_label, false_is_fallthrough);
        }

        // Materialized condition: branch on the boolean value.
        self.stage_inputs(id)?;
        match instr.locations().in_at(0) {
            Location::Register(reg) => self.asm.testl_reg_reg(reg, reg),
            Location::StackSlot(off) => {
                self.asm.cmpl_mem_imm(Address::displace(Register::ESP, off), 0)
            }
            Location::Constant(cid) => {
                let taken = self.constant_i32(cid) != 0;
                let successor = if taken { true_successor } else { false_successor };
                if Some(successor) != next {
                    let target = if taken { true_label } else { false_label };
                    self.asm.jmp_label(target);
                }
                return Ok(());
            }
            other => {
                return Err(CompileError::InvalidLocation {
                    context: "If condition",
                    reason: format!("{:?}", other),
                })
            }
        }
        self.asm.j(Condition::NotEqual, true_label);
        if Some(false_successor) != next {
            self.asm.jmp_label(false_label);
        }
        Ok(())
    }

    /// Branch on a fused condition. When `false_is_fallthrough` the final
    /// unconditional jump is elided.
    fn generate_condition_branch(
        &mut self,
        condition: InstrId,
        true_label: Label,
        false_label: Label,
        false_is_fallthrough: bool,
    ) -> CompileResult<()> {
        self.stage_inputs(condition)?;
        let g = self.graph;
        let instr = g.instr(condition);
        let (if_cond, bias) = match instr.kind {
            HInstructionKind::Condition { cond, bias } => (cond, bias),
            _ => {
                return Err(CompileError::CodeGeneration {
                    reason: format!("{:?} fused into a branch is not a condition", condition),
                })
            }
        };
        let locations = instr.locations();
        let ty = g.instr(instr.inputs[0]).ty;
        if ty.is_floating_point() {
            let lhs = locations.in_at(0).as_fpu_register();
            let rhs = locations.in_at(1).as_fpu_register();
            if ty == DataType::Float64 {
                self.asm.ucomisd_reg_reg(lhs, rhs);
            } else {
                self.asm.ucomiss_reg_reg(lhs, rhs);
            }
            if is_fp_condition_true_if_nan(if_cond, bias) {
                self.asm.j(Condition::ParityEven, true_label);
            } else if is_fp_condition_false_if_nan(if_cond, bias) {
                self.asm.j(Condition::ParityEven, false_label);
            }
            self.asm.j(unsigned_condition_code(if_cond), true_label);
        } else if ty.is_64bit() {
            self.generate_long_comparison_branch(
                if_cond,
                locations.in_at(0),
                locations.in_at(1),
                true_label,
                false_label,
            )?;
        } else {
            let lhs = locations.in_at(0).as_register();
            self.compare_int32(lhs, locations.in_at(1))?;
            self.asm.j(condition_code(if_cond), true_label);
        }
        if !false_is_fallthrough {
            self.asm.jmp_label(false_label);
        }
        Ok(())
    }

    fn compare_int32(&mut self, lhs: Register, rhs: Location) -> CompileResult<()> {
        match rhs {
            Location::Register(reg) => self.asm.cmpl_reg_reg(lhs, reg),
            Location::StackSlot(off) => {
                self.asm.cmpl_reg_mem(lhs, Address::displace(Register::ESP, off))
            }
            Location::Constant(cid) => {
                let value = self.constant_i32(cid);
                if value == 0 {
                    self.asm.testl_reg_reg(lhs, lhs);
                } else {
                    self.asm.cmpl_reg_imm(lhs, value);
                }
            }
            other => {
                return Err(CompileError::InvalidLocation {
                    context: "int32 comparison",
                    reason: format!("{:?}", other),
                })
            }
        }
        Ok(())
    }

    fn compare_long_half(&mut self, lhs: Register, rhs: Location, high: bool) -> CompileResult<()> {
        match rhs {
            Location::RegisterPair(lo, hi) => {
                self.asm.cmpl_reg_reg(lhs, if high { hi } else { lo })
            }
            Location::DoubleStackSlot(off) => {
                let disp = off + if high { 4 } else { 0 };
                self.asm.cmpl_reg_mem(lhs, Address::displace(Register::ESP, disp))
            }
            Location::Constant(cid) => {
                let value = self.constant_i64(cid);
                let half = if high { (value >> 32) as i32 } else { value as i32 };
                self.asm.cmpl_reg_imm(lhs, half);
            }
            other => {
                return Err(CompileError::InvalidLocation {
                    context: "int64 comparison",
                    reason: format!("{:?}", other),
                })
            }
        }
        Ok(())
    }

    /// Two-word comparison: decide on the high halves, fall back to an
    /// unsigned comparison of the low halves on a tie.
    fn generate_long_comparison_branch(
        &mut self,
        cond: IfCondition,
        lhs: Location,
        rhs: Location,
        true_label: Label,
        false_label: Label,
    ) -> CompileResult<()> {
        let lo = lhs.pair_low();
        let hi = lhs.pair_high();
        match cond {
            IfCondition::Equal => {
                self.compare_long_half(hi, rhs, true)?;
                self.asm.j(Condition::NotEqual, false_label);
                self.compare_long_half(lo, rhs, false)?;
                self.asm.j(Condition::Equal, true_label);
            }
            IfCondition::NotEqual => {
                self.compare_long_half(hi, rhs, true)?;
                self.asm.j(Condition::NotEqual, true_label);
                self.compare_long_half(lo, rhs, false)?;
                self.asm.j(Condition::NotEqual, true_label);
            }
            _ => {
                let (hi_true, hi_false) = match cond {
                    IfCondition::LessThan | IfCondition::LessThanOrEqual => {
                        (Condition::Less, Condition::Greater)
                    }
                    IfCondition::GreaterThan | IfCondition::GreaterThanOrEqual => {
                        (Condition::Greater, Condition::Less)
                    }
                    IfCondition::Below | IfCondition::BelowOrEqual => {
                        (Condition::Below, Condition::Above)
                    }
                    IfCondition::Above | IfCondition::AboveOrEqual => {
                        (Condition::Above, Condition::Below)
                    }
                    IfCondition::Equal | IfCondition::NotEqual => unreachable!(),
                };
                self.compare_long_half(hi, rhs, true)?;
                self.asm.j(hi_true, true_label);
                self.asm.j(hi_false, false_label);
                self.compare_long_half(lo, rhs, false)?;
                self.asm.j(unsigned_condition_code(cond), true_label);
            }
        }
        Ok(())
    }

    fn emit_deoptimize(
        &mut self,
        id: InstrId,
        kind: crate::graph::instruction::DeoptimizationKind,
    ) -> CompileResult<()> {
        let g = self.graph;
        let input = g.instr(id).inputs[0];
        let path = DeoptimizationSlowPath::new(self, id, kind);
        let entry = path.entry_label();
        self.slow_paths.push(Box::new(path));

        let condition = g.instr(input);
        if condition.is_emitted_at_use_site
            && matches!(condition.kind, HInstructionKind::Condition { .. })
        {
            let fall = self.asm.create_label();
            self.generate_condition_branch(input, entry, fall, true)?;
            self.asm.bind(fall);
            return Ok(());
        }
        self.stage_inputs(id)?;
        match g.instr(id).locations().in_at(0) {
            Location::Register(reg) => self.asm.testl_reg_reg(reg, reg),
            Location::StackSlot(off) => {
                self.asm.cmpl_mem_imm(Address::displace(Register::ESP, off), 0)
            }
            Location::Constant(cid) => {
                if self.constant_i32(cid) != 0 {
                    self.asm.jmp_label(entry);
                }
                return Ok(());
            }
            other => {
                return Err(CompileError::InvalidLocation {
                    context: "Deoptimize guard",
                    reason: format!("{:?}", other),
                })
            }
        }
        self.asm.j(Condition::NotEqual, entry);
        Ok(())
    }

    fn emit_return(&mut self, id: InstrId) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let ty = self.graph.instr(self.graph.instr(id).inputs[0]).ty;
        if self.graph.is_osr && ty.is_floating_point() {
            // The OSR entry stub expects FP results on the x87 stack as well.
            if ty == DataType::Float64 {
                self.asm.subl_reg_imm(Register::ESP, 8);
                self.asm.cfi_adjust_cfa_offset(8);
                self.asm
                    .movsd_mem_reg(Address::displace(Register::ESP, 0), XmmRegister::XMM0);
                self.asm.fldl(Address::displace(Register::ESP, 0));
                self.asm.addl_reg_imm(Register::ESP, 8);
                self.asm.cfi_adjust_cfa_offset(-8);
            } else {
                self.asm.subl_reg_imm(Register::ESP, 4);
                self.asm.cfi_adjust_cfa_offset(4);
                self.asm
                    .movss_mem_reg(Address::displace(Register::ESP, 0), XmmRegister::XMM0);
                self.asm.flds(Address::displace(Register::ESP, 0));
                self.asm.addl_reg_imm(Register::ESP, 4);
                self.asm.cfi_adjust_cfa_offset(-4);
            }
        }
        self.generate_frame_exit();
        Ok(())
    }

    fn emit_packed_switch(&mut self, id: InstrId, start_value: i32) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let g = self.graph;
        let instr = g.instr(id);
        let value = instr.locations().in_at(0).as_register();
        let successors = &g.block(instr.block).successors;
        let num_cases = successors.len() - 1;
        for i in 0..num_cases {
            let case_value = start_value.wrapping_add(i as i32);
            if case_value == 0 {
                self.asm.testl_reg_reg(value, value);
            } else {
                self.asm.cmpl_reg_imm(value, case_value);
            }
            self.asm.j(Condition::Equal, self.block_labels[successors[i].index()]);
        }
        let default = successors[num_cases];
        if Some(default) != self.next_block() {
            self.asm.jmp_label(self.block_label(default));
        }
        Ok(())
    }

    /// Dense switch through a jump table in the constant area. The base
    /// register holds the code start address, so table entries are plain
    /// code offsets.
    fn emit_jump_table_switch(&mut self, id: InstrId, start_value: i32) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let g = self.graph;
        let instr = g.instr(id);
        let locations = instr.locations();
        let value = locations.in_at(0).as_register();
        let base = locations.in_at(1).as_register();
        let temp = locations.temp(0).as_register();
        let successors = &g.block(instr.block).successors;
        let num_cases = successors.len() - 1;
        let default = successors[num_cases];

        if start_value != 0 {
            self.asm.leal(temp, Address::displace(value, -start_value));
        } else {
            self.asm.movl_reg_reg(temp, value);
        }
        self.asm.cmpl_reg_imm(temp, num_cases as i32 - 1);
        self.asm.j(Condition::Above, self.block_label(default));

        let area_offset = self.asm.reserve_jump_table(num_cases);
        let entry = self
            .asm
            .constant_area_indexed_address(area_offset, base, temp, ScaleFactor::Times4);
        self.asm.movl_reg_mem(temp, entry);
        self.asm.addl_reg_reg(temp, base);
        self.asm.jmp_reg(temp);
        self.jump_tables.push(JumpTableFixup {
            area_offset,
            targets: successors[..num_cases].to_vec(),
        });
        Ok(())
    }
}

// === Arithmetic ===========================================================

#[derive(Clone, Copy)]
enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
}

impl<'g, 'arena> CodeGeneratorX86<'g, 'arena> {
    fn alu_rr(&mut self, op: AluOp, dst: Register, src: Register) {
        match op {
            AluOp::Add => self.asm.addl_reg_reg(dst, src),
            AluOp::Sub => self.asm.subl_reg_reg(dst, src),
            AluOp::And => self.asm.andl_reg_reg(dst, src),
            AluOp::Or => self.asm.orl_reg_reg(dst, src),
            AluOp::Xor => self.asm.xorl_reg_reg(dst, src),
        }
    }

    fn alu_rm(&mut self, op: AluOp, dst: Register, src: Address) {
        match op {
            AluOp::Add => self.asm.addl_reg_mem(dst, src),
            AluOp::Sub => self.asm.subl_reg_mem(dst, src),
            AluOp::And => self.asm.andl_reg_mem(dst, src),
            AluOp::Or => self.asm.orl_reg_mem(dst, src),
            AluOp::Xor => self.asm.xorl_reg_mem(dst, src),
        }
    }

    fn alu_ri(&mut self, op: AluOp, dst: Register, imm: i32) {
        match op {
            AluOp::Add => self.asm.addl_reg_imm(dst, imm),
            AluOp::Sub => self.asm.subl_reg_imm(dst, imm),
            AluOp::And => self.asm.andl_reg_imm(dst, imm),
            AluOp::Or => self.asm.orl_reg_imm(dst, imm),
            AluOp::Xor => self.asm.xorl_reg_imm(dst, imm),
        }
    }

    /// High-half form: add/sub propagate the carry.
    fn alu_high_rr(&mut self, op: AluOp, dst: Register, src: Register) {
        match op {
            AluOp::Add => self.asm.adcl_reg_reg(dst, src),
            AluOp::Sub => self.asm.sbbl_reg_reg(dst, src),
            _ => self.alu_rr(op, dst, src),
        }
    }

    fn alu_high_rm(&mut self, op: AluOp, dst: Register, src: Address) {
        match op {
            AluOp::Add => self.asm.adcl_reg_mem(dst, src),
            AluOp::Sub => self.asm.sbbl_reg_mem(dst, src),
            _ => self.alu_rm(op, dst, src),
        }
    }

    fn alu_high_ri(&mut self, op: AluOp, dst: Register, imm: i32) {
        match op {
            AluOp::Add => self.asm.adcl_reg_imm(dst, imm),
            AluOp::Sub => self.asm.sbbl_reg_imm(dst, imm),
            _ => self.alu_ri(op, dst, imm),
        }
    }

    /// Push an FP constant and return its stack address. The caller pops
    /// `size_in_bytes` afterwards.
    fn push_fp_constant(&mut self, cid: InstrId, is_double: bool) -> Address {
        let bits = self.constant_i64(cid);
        if is_double {
            self.asm.pushl_imm((bits >> 32) as i32);
            self.asm.pushl_imm(bits as i32);
        } else {
            self.asm.pushl_imm(bits as i32);
        }
        Address::displace(Register::ESP, 0)
    }

    fn emit_binary(&mut self, id: InstrId) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let g = self.graph;
        let instr = g.instr(id);
        let op = match instr.kind {
            HInstructionKind::Add => AluOp::Add,
            HInstructionKind::Sub => AluOp::Sub,
            HInstructionKind::And => AluOp::And,
            HInstructionKind::Or => AluOp::Or,
            HInstructionKind::Xor => AluOp::Xor,
            _ => unreachable!(),
        };
        let locations = instr.locations();
        let rhs = locations.in_at(1);
        match instr.ty {
            DataType::Int64 | DataType::Uint64 => {
                let lo = locations.out().pair_low();
                let hi = locations.out().pair_high();
                match rhs {
                    Location::RegisterPair(rlo, rhi) => {
                        self.alu_rr(op, lo, rlo);
                        self.alu_high_rr(op, hi, rhi);
                    }
                    Location::DoubleStackSlot(off) => {
                        self.alu_rm(op, lo, Address::displace(Register::ESP, off));
                        self.alu_high_rm(op, hi, Address::displace(Register::ESP, off + 4));
                    }
                    Location::Constant(cid) => {
                        let value = self.constant_i64(cid);
                        self.alu_ri(op, lo, value as i32);
                        self.alu_high_ri(op, hi, (value >> 32) as i32);
                    }
                    other => {
                        return Err(CompileError::InvalidLocation {
                            context: "int64 binary operand",
                            reason: format!("{:?}", other),
                        })
                    }
                }
            }
            DataType::Float32 | DataType::Float64 => {
                let is_double = instr.ty == DataType::Float64;
                let out = locations.out().as_fpu_register();
                match rhs {
                    Location::FpuRegister(reg) => match (op, is_double) {
                        (AluOp::Add, false) => self.asm.addss_reg_reg(out, reg),
                        (AluOp::Add, true) => self.asm.addsd_reg_reg(out, reg),
                        (AluOp::Sub, false) => self.asm.subss_reg_reg(out, reg),
                        (AluOp::Sub, true) => self.asm.subsd_reg_reg(out, reg),
                        _ => {
                            return Err(CompileError::UnimplementedTypeCombination {
                                operation: "bitwise",
                                ty: instr.ty.to_string(),
                            })
                        }
                    },
                    Location::StackSlot(off) | Location::DoubleStackSlot(off) => {
                        let addr = Address::displace(Register::ESP, off);
                        match (op, is_double) {
                            (AluOp::Add, false) => self.asm.addss_reg_mem(out, addr),
                            (AluOp::Add, true) => self.asm.addsd_reg_mem(out, addr),
                            (AluOp::Sub, false) => self.asm.subss_reg_mem(out, addr),
                            (AluOp::Sub, true) => self.asm.subsd_reg_mem(out, addr),
                            _ => {
                                return Err(CompileError::UnimplementedTypeCombination {
                                    operation: "bitwise",
                                    ty: instr.ty.to_string(),
                                })
                            }
                        }
                    }
                    Location::Constant(cid) => {
                        let addr = self.push_fp_constant(cid, is_double);
                        match (op, is_double) {
                            (AluOp::Add, false) => self.asm.addss_reg_mem(out, addr),
                            (AluOp::Add, true) => self.asm.addsd_reg_mem(out, addr),
                            (AluOp::Sub, false) => self.asm.subss_reg_mem(out, addr),
                            (AluOp::Sub, true) => self.asm.subsd_reg_mem(out, addr),
                            _ => {
                                return Err(CompileError::UnimplementedTypeCombination {
                                    operation: "bitwise",
                                    ty: instr.ty.to_string(),
                                })
                            }
                        }
                        self.asm.addl_reg_imm(Register::ESP, if is_double { 8 } else { 4 });
                    }
                    other => {
                        return Err(CompileError::InvalidLocation {
                            context: "fp binary operand",
                            reason: format!("{:?}", other),
                        })
                    }
                }
            }
            _ => {
                let out = locations.out().as_register();
                match rhs {
                    Location::Register(reg) => self.alu_rr(op, out, reg),
                    Location::StackSlot(off) => {
                        self.alu_rm(op, out, Address::displace(Register::ESP, off))
                    }
                    Location::Constant(cid) => {
                        let value = self.constant_i32(cid);
                        self.alu_ri(op, out, value);
                    }
                    other => {
                        return Err(CompileError::InvalidLocation {
                            context: "int32 binary operand",
                            reason: format!("{:?}", other),
                        })
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_mul(&mut self, id: InstrId) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let g = self.graph;
        let instr = g.instr(id);
        let locations = instr.locations();
        match instr.ty {
            DataType::Int64 => {
                // in0 is pinned to EDX:EAX around the widening mull.
                let rhs = locations.in_at(1);
                let (rlo, rhi) = match rhs {
                    Location::RegisterPair(lo, hi) => (lo, hi),
                    other => {
                        return Err(CompileError::InvalidLocation {
                            context: "int64 multiply operand",
                            reason: format!("{:?}", other),
                        })
                    }
                };
                let temp = locations.temp(0).as_register();
                self.asm.movl_reg_reg(temp, Register::EAX);
                self.asm.imull_reg_reg(temp, rhi);
                self.asm.imull_reg_reg(Register::EDX, rlo);
                self.asm.addl_reg_reg(temp, Register::EDX);
                self.asm.mull_reg(rlo);
                self.asm.addl_reg_reg(Register::EDX, temp);
            }
            DataType::Float32 | DataType::Float64 => {
                let is_double = instr.ty == DataType::Float64;
                let out = locations.out().as_fpu_register();
                match locations.in_at(1) {
                    Location::FpuRegister(reg) => {
                        if is_double {
                            self.asm.mulsd_reg_reg(out, reg);
                        } else {
                            self.asm.mulss_reg_reg(out, reg);
                        }
                    }
                    Location::StackSlot(off) | Location::DoubleStackSlot(off) => {
                        let addr = Address::displace(Register::ESP, off);
                        if is_double {
                            self.asm.mulsd_reg_mem(out, addr);
                        } else {
                            self.asm.mulss_reg_mem(out, addr);
                        }
                    }
                    Location::Constant(cid) => {
                        let addr = self.push_fp_constant(cid, is_double);
                        if is_double {
                            self.asm.mulsd_reg_mem(out, addr);
                        } else {
                            self.asm.mulss_reg_mem(out, addr);
                        }
                        self.asm.addl_reg_imm(Register::ESP, if is_double { 8 } else { 4 });
                    }
                    other => {
                        return Err(CompileError::InvalidLocation {
                            context: "fp multiply operand",
                            reason: format!("{:?}", other),
                        })
                    }
                }
            }
            _ => {
                let out = locations.out().as_register();
                match locations.in_at(1) {
                    Location::Register(reg) => self.asm.imull_reg_reg(out, reg),
                    Location::StackSlot(off) => {
                        self.asm.imull_reg_mem(out, Address::displace(Register::ESP, off))
                    }
                    Location::Constant(cid) => {
                        let value = self.constant_i32(cid);
                        self.asm.imull_reg_reg_imm(out, out, value);
                    }
                    other => {
                        return Err(CompileError::InvalidLocation {
                            context: "int32 multiply operand",
                            reason: format!("{:?}", other),
                        })
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_div_rem(&mut self, id: InstrId, is_div: bool) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let instr = self.graph.instr(id);
        match instr.ty {
            DataType::Int32 => self.emit_div_rem_int32(id, is_div),
            DataType::Int64 => {
                let entrypoint = if is_div {
                    QuickEntrypoint::Ldiv
                } else {
                    QuickEntrypoint::Lmod
                };
                self.invoke_runtime(entrypoint, id)
            }
            DataType::Float32 | DataType::Float64 if is_div => self.emit_fp_div(id),
            DataType::Float32 | DataType::Float64 => self.emit_fp_rem(id),
            other => Err(CompileError::UnimplementedTypeCombination {
                operation: if is_div { "Div" } else { "Rem" },
                ty: other.to_string(),
            }),
        }
    }

    fn emit_div_rem_int32(&mut self, id: InstrId, is_div: bool) -> CompileResult<()> {
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        let rhs = locations.in_at(1);
        if let Location::Constant(cid) = rhs {
            let divisor = self.constant_i32(cid);
            return self.emit_div_rem_by_constant(id, divisor, is_div);
        }
        let divisor = rhs.as_register();
        let result = locations.out().as_register();
        self.asm.cmpl_reg_imm(divisor, -1);
        let path = DivRemMinusOneSlowPath::new(self, result, is_div);
        let entry = path.entry_label();
        let exit = path.exit_label();
        self.slow_paths.push(Box::new(path));
        // INT_MIN / -1 traps in idiv; divert it around the instruction.
        self.asm.j(Condition::Equal, entry);
        self.asm.cdq();
        self.asm.idivl_reg(divisor);
        self.asm.bind(exit);
        Ok(())
    }

    fn emit_div_rem_by_constant(&mut self, id: InstrId, divisor: i32, is_div: bool) -> CompileResult<()> {
        let locations = self.graph.instr(id).locations();
        if divisor == 1 || divisor == -1 {
            if is_div {
                if divisor == -1 {
                    self.asm.negl(Register::EAX);
                }
            } else {
                self.asm.xorl_reg_reg(Register::EDX, Register::EDX);
            }
            return Ok(());
        }
        if divisor == 0 {
            // A DivZeroCheck precedes this; the quotient is never consumed.
            return Ok(());
        }
        let numerator = locations.temp(1).as_register();
        let abs = divisor.unsigned_abs();
        if is_div && abs.is_power_of_two() {
            let shift = abs.trailing_zeros() as u8;
            // Round towards zero: add (abs - 1) to negative numerators.
            self.asm
                .leal(numerator, Address::displace(Register::EAX, abs as i32 - 1));
            self.asm.testl_reg_reg(Register::EAX, Register::EAX);
            self.asm.cmovl_reg_reg(Condition::GreaterEqual, numerator, Register::EAX);
            self.asm.sarl_reg_imm(numerator, shift);
            if divisor < 0 {
                self.asm.negl(numerator);
            }
            self.asm.movl_reg_reg(Register::EAX, numerator);
            return Ok(());
        }
        let (magic, shift) = magic_for_division(divisor);
        self.asm.movl_reg_reg(numerator, Register::EAX);
        self.asm.movl_reg_imm(Register::EAX, magic);
        self.asm.imull_reg(numerator);
        if divisor > 0 && magic < 0 {
            self.asm.addl_reg_reg(Register::EDX, numerator);
        } else if divisor < 0 && magic > 0 {
            self.asm.subl_reg_reg(Register::EDX, numerator);
        }
        if shift != 0 {
            self.asm.sarl_reg_imm(Register::EDX, shift);
        }
        // Quotients of negative numerators round up by one; correct with
        // the sign bit.
        self.asm.movl_reg_reg(Register::EAX, Register::EDX);
        self.asm.shrl_reg_imm(Register::EDX, 31);
        self.asm.addl_reg_reg(Register::EDX, Register::EAX);
        if is_div {
            self.asm.movl_reg_reg(Register::EAX, Register::EDX);
        } else {
            self.asm.imull_reg_reg_imm(Register::EDX, Register::EDX, divisor);
            self.asm.negl(Register::EDX);
            self.asm.addl_reg_reg(Register::EDX, numerator);
        }
        Ok(())
    }

    fn emit_fp_div(&mut self, id: InstrId) -> CompileResult<()> {
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        let is_double = instr.ty == DataType::Float64;
        let out = locations.out().as_fpu_register();
        match locations.in_at(1) {
            Location::FpuRegister(reg) => {
                if is_double {
                    self.asm.divsd_reg_reg(out, reg);
                } else {
                    self.asm.divss_reg_reg(out, reg);
                }
            }
            Location::StackSlot(off) | Location::DoubleStackSlot(off) => {
                let addr = Address::displace(Register::ESP, off);
                if is_double {
                    self.asm.divsd_reg_mem(out, addr);
                } else {
                    self.asm.divss_reg_mem(out, addr);
                }
            }
            Location::Constant(cid) => {
                let addr = self.push_fp_constant(cid, is_double);
                if is_double {
                    self.asm.divsd_reg_mem(out, addr);
                } else {
                    self.asm.divss_reg_mem(out, addr);
                }
                self.asm.addl_reg_imm(Register::ESP, if is_double { 8 } else { 4 });
            }
            other => {
                return Err(CompileError::InvalidLocation {
                    context: "fp divide operand",
                    reason: format!("{:?}", other),
                })
            }
        }
        Ok(())
    }

    /// FP remainder has Java semantics (result sign follows the dividend),
    /// which fprem implements and the SSE divide does not.
    fn emit_fp_rem(&mut self, id: InstrId) -> CompileResult<()> {
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        let is_double = instr.ty == DataType::Float64;
        let dividend = locations.in_at(0).as_fpu_register();
        let divisor = locations.in_at(1).as_fpu_register();
        let out = locations.out().as_fpu_register();

        self.asm.subl_reg_imm(Register::ESP, 16);
        if is_double {
            self.asm.movsd_mem_reg(Address::displace(Register::ESP, 8), divisor);
            self.asm.movsd_mem_reg(Address::displace(Register::ESP, 0), dividend);
            self.asm.fldl(Address::displace(Register::ESP, 8));
            self.asm.fldl(Address::displace(Register::ESP, 0));
        } else {
            self.asm.movss_mem_reg(Address::displace(Register::ESP, 4), divisor);
            self.asm.movss_mem_reg(Address::displace(Register::ESP, 0), dividend);
            self.asm.flds(Address::displace(Register::ESP, 4));
            self.asm.flds(Address::displace(Register::ESP, 0));
        }
        // fprem reduces by at most 2^63 per iteration; poll C2 until done.
        let retry = self.asm.create_near_label();
        self.asm.bind_near(retry)?;
        self.asm.fprem();
        self.asm.fnstsw();
        self.asm.testl_reg_imm(Register::EAX, 0x400);
        self.asm.j_near(Condition::NotEqual, retry)?;
        if is_double {
            self.asm.fstpl(Address::displace(Register::ESP, 0));
            self.asm.fstpl(Address::displace(Register::ESP, 8));
            self.asm.movsd_reg_mem(out, Address::displace(Register::ESP, 0));
        } else {
            self.asm.fstps(Address::displace(Register::ESP, 0));
            self.asm.fstps(Address::displace(Register::ESP, 4));
            self.asm.movss_reg_mem(out, Address::displace(Register::ESP, 0));
        }
        self.asm.addl_reg_imm(Register::ESP, 16);
        Ok(())
    }

    fn emit_neg(&mut self, id: InstrId) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        match instr.ty {
            DataType::Int32 => {
                self.asm.negl(locations.out().as_register());
            }
            DataType::Int64 => {
                let lo = locations.out().pair_low();
                let hi = locations.out().pair_high();
                self.asm.negl(lo);
                self.asm.adcl_reg_imm(hi, 0);
                self.asm.negl(hi);
            }
            DataType::Float32 => {
                let out = locations.out().as_fpu_register();
                let mask = locations.temp(0).as_fpu_register();
                self.asm.pushl_imm(i32::MIN);
                self.asm.movss_reg_mem(mask, Address::displace(Register::ESP, 0));
                self.asm.addl_reg_imm(Register::ESP, 4);
                self.asm.xorps_reg_reg(out, mask);
            }
            DataType::Float64 => {
                let out = locations.out().as_fpu_register();
                let mask = locations.temp(0).as_fpu_register();
                self.asm.pushl_imm(i32::MIN);
                self.asm.pushl_imm(0);
                self.asm.movsd_reg_mem(mask, Address::displace(Register::ESP, 0));
                self.asm.addl_reg_imm(Register::ESP, 8);
                self.asm.xorpd_reg_reg(out, mask);
            }
            other => {
                return Err(CompileError::UnimplementedTypeCombination {
                    operation: "Neg",
                    ty: other.to_string(),
                })
            }
        }
        Ok(())
    }

    fn emit_abs(&mut self, id: InstrId) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        match instr.ty {
            DataType::Int32 => {
                let out = locations.out().as_register();
                let temp = locations.temp(0).as_register();
                self.asm.movl_reg_reg(temp, out);
                self.asm.sarl_reg_imm(temp, 31);
                self.asm.addl_reg_reg(out, temp);
                self.asm.xorl_reg_reg(out, temp);
            }
            DataType::Int64 => {
                let lo = locations.out().pair_low();
                let hi = locations.out().pair_high();
                let temp = locations.temp(0).as_register();
                self.asm.movl_reg_reg(temp, hi);
                self.asm.sarl_reg_imm(temp, 31);
                self.asm.addl_reg_reg(lo, temp);
                self.asm.adcl_reg_reg(hi, temp);
                self.asm.xorl_reg_reg(lo, temp);
                self.asm.xorl_reg_reg(hi, temp);
            }
            DataType::Float32 => {
                let out = locations.out().as_fpu_register();
                let mask = locations.temp(0).as_fpu_register();
                self.asm.pushl_imm(i32::MAX);
                self.asm.movss_reg_mem(mask, Address::displace(Register::ESP, 0));
                self.asm.addl_reg_imm(Register::ESP, 4);
                self.asm.andps_reg_reg(out, mask);
            }
            DataType::Float64 => {
                let out = locations.out().as_fpu_register();
                let mask = locations.temp(0).as_fpu_register();
                self.asm.pushl_imm(i32::MAX);
                self.asm.pushl_imm(-1);
                self.asm.movsd_reg_mem(mask, Address::displace(Register::ESP, 0));
                self.asm.addl_reg_imm(Register::ESP, 8);
                self.asm.andpd_reg_reg(out, mask);
            }
            other => {
                return Err(CompileError::UnimplementedTypeCombination {
                    operation: "Abs",
                    ty: other.to_string(),
                })
            }
        }
        Ok(())
    }

    fn emit_min_max(&mut self, id: InstrId, is_min: bool) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        let rhs = locations.in_at(1);
        match instr.ty {
            DataType::Int32 => {
                let out = locations.out().as_register();
                let take_other = if is_min { Condition::Greater } else { Condition::Less };
                match rhs {
                    Location::Register(reg) => {
                        self.asm.cmpl_reg_reg(out, reg);
                        self.asm.cmovl_reg_reg(take_other, out, reg);
                    }
                    Location::StackSlot(off) => {
                        let addr = Address::displace(Register::ESP, off);
                        self.asm.cmpl_reg_mem(out, addr);
                        self.asm.cmovl_reg_mem(take_other, out, addr);
                    }
                    Location::Constant(cid) => {
                        let value = self.constant_i32(cid);
                        let keep = if is_min { Condition::LessEqual } else { Condition::GreaterEqual };
                        let done = self.asm.create_label();
                        self.asm.cmpl_reg_imm(out, value);
                        self.asm.j(keep, done);
                        self.asm.movl_reg_imm(out, value);
                        self.asm.bind(done);
                    }
                    other => {
                        return Err(CompileError::InvalidLocation {
                            context: "int32 min/max operand",
                            reason: format!("{:?}", other),
                        })
                    }
                }
            }
            DataType::Int64 => {
                let lo = locations.out().pair_low();
                let hi = locations.out().pair_high();
                let done = self.asm.create_label();
                let take = self.asm.create_label();
                let (keep_hi, take_hi) = if is_min {
                    (Condition::Less, Condition::Greater)
                } else {
                    (Condition::Greater, Condition::Less)
                };
                let keep_lo = if is_min { Condition::BelowEqual } else { Condition::AboveEqual };
                self.compare_long_half(hi, rhs, true)?;
                self.asm.j(keep_hi, done);
                self.asm.j(take_hi, take);
                self.compare_long_half(lo, rhs, false)?;
                self.asm.j(keep_lo, done);
                self.asm.bind(take);
                match rhs {
                    Location::RegisterPair(rlo, rhi) => {
                        self.asm.movl_reg_reg(lo, rlo);
                        self.asm.movl_reg_reg(hi, rhi);
                    }
                    Location::DoubleStackSlot(off) => {
                        self.asm.movl_reg_mem(lo, Address::displace(Register::ESP, off));
                        self.asm.movl_reg_mem(hi, Address::displace(Register::ESP, off + 4));
                    }
                    Location::Constant(cid) => {
                        let value = self.constant_i64(cid);
                        self.asm.movl_reg_imm(lo, value as i32);
                        self.asm.movl_reg_imm(hi, (value >> 32) as i32);
                    }
                    other => {
                        return Err(CompileError::InvalidLocation {
                            context: "int64 min/max operand",
                            reason: format!("{:?}", other),
                        })
                    }
                }
                self.asm.bind(done);
            }
            DataType::Float32 | DataType::Float64 => {
                let is_double = instr.ty == DataType::Float64;
                let out = locations.out().as_fpu_register();
                let other = rhs.as_fpu_register();
                let done = self.asm.create_label();
                let nan = self.asm.create_label();
                let take_other = self.asm.create_label();
                if is_double {
                    self.asm.ucomisd_reg_reg(out, other);
                } else {
                    self.asm.ucomiss_reg_reg(out, other);
                }
                self.asm.j(Condition::ParityEven, nan);
                self.asm.j(if is_min { Condition::Above } else { Condition::Below }, take_other);
                self.asm.j(if is_min { Condition::Below } else { Condition::Above }, done);
                // Equal operands still differ on signed zero; bitwise or
                // picks -0.0 for min, and picks +0.0 for max.
                if is_min {
                    if is_double {
                        self.asm.orpd_reg_reg(out, other);
                    } else {
                        self.asm.orps_reg_reg(out, other);
                    }
                } else if is_double {
                    self.asm.andpd_reg_reg(out, other);
                } else {
                    self.asm.andps_reg_reg(out, other);
                }
                self.asm.jmp_label(done);
                self.asm.bind(nan);
                if is_double {
                    self.asm.pushl_imm(0x7FF8_0000);
                    self.asm.pushl_imm(0);
                    self.asm.movsd_reg_mem(out, Address::displace(Register::ESP, 0));
                    self.asm.addl_reg_imm(Register::ESP, 8);
                } else {
                    self.asm.pushl_imm(0x7FC0_0000);
                    self.asm.movss_reg_mem(out, Address::displace(Register::ESP, 0));
                    self.asm.addl_reg_imm(Register::ESP, 4);
                }
                self.asm.jmp_label(done);
                self.asm.bind(take_other);
                self.asm.movaps_reg_reg(out, other);
                self.asm.bind(done);
            }
            other => {
                return Err(CompileError::UnimplementedTypeCombination {
                    operation: if is_min { "Min" } else { "Max" },
                    ty: other.to_string(),
                })
            }
        }
        Ok(())
    }

    fn emit_not(&mut self, id: InstrId) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        match instr.ty {
            DataType::Int64 => {
                self.asm.notl(locations.out().pair_low());
                self.asm.notl(locations.out().pair_high());
            }
            _ => self.asm.notl(locations.out().as_register()),
        }
        Ok(())
    }

    fn emit_boolean_not(&mut self, id: InstrId) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let out = self.graph.instr(id).locations().out().as_register();
        self.asm.xorl_reg_imm(out, 1);
        Ok(())
    }

    fn emit_shift(&mut self, id: InstrId) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let g = self.graph;
        let instr = g.instr(id);
        let locations = instr.locations();
        let distance = locations.in_at(1);
        let is_long = instr.ty == DataType::Int64;
        if !is_long {
            let out = locations.out().as_register();
            match distance {
                Location::Constant(cid) => {
                    let shift = (self.constant_i32(cid) & 31) as u8;
                    if shift != 0 {
                        match instr.kind {
                            HInstructionKind::Shl => self.asm.shll_reg_imm(out, shift),
                            HInstructionKind::Shr => self.asm.sarl_reg_imm(out, shift),
                            HInstructionKind::UShr => self.asm.shrl_reg_imm(out, shift),
                            HInstructionKind::Ror => self.asm.rorl_reg_imm(out, shift),
                            _ => unreachable!(),
                        }
                    }
                }
                _ => match instr.kind {
                    HInstructionKind::Shl => self.asm.shll_reg_cl(out),
                    HInstructionKind::Shr => self.asm.sarl_reg_cl(out),
                    HInstructionKind::UShr => self.asm.shrl_reg_cl(out),
                    HInstructionKind::Ror => self.asm.rorl_reg_cl(out),
                    _ => unreachable!(),
                },
            }
            return Ok(());
        }

        let lo = locations.out().pair_low();
        let hi = locations.out().pair_high();
        if let Location::Constant(cid) = distance {
            let mut shift = (self.constant_i32(cid) & 63) as u8;
            match instr.kind {
                HInstructionKind::Shl => {
                    if shift >= 32 {
                        self.asm.movl_reg_reg(hi, lo);
                        self.asm.xorl_reg_reg(lo, lo);
                        if shift > 32 {
                            self.asm.shll_reg_imm(hi, shift - 32);
                        }
                    } else if shift != 0 {
                        self.asm.shld_reg_reg_imm(hi, lo, shift);
                        self.asm.shll_reg_imm(lo, shift);
                    }
                }
                HInstructionKind::Shr => {
                    if shift >= 32 {
                        self.asm.movl_reg_reg(lo, hi);
                        self.asm.sarl_reg_imm(hi, 31);
                        if shift > 32 {
                            self.asm.sarl_reg_imm(lo, shift - 32);
                        }
                    } else if shift != 0 {
                        self.asm.shrd_reg_reg_imm(lo, hi, shift);
                        self.asm.sarl_reg_imm(hi, shift);
                    }
                }
                HInstructionKind::UShr => {
                    if shift >= 32 {
                        self.asm.movl_reg_reg(lo, hi);
                        self.asm.xorl_reg_reg(hi, hi);
                        if shift > 32 {
                            self.asm.shrl_reg_imm(lo, shift - 32);
                        }
                    } else if shift != 0 {
                        self.asm.shrd_reg_reg_imm(lo, hi, shift);
                        self.asm.shrl_reg_imm(hi, shift);
                    }
                }
                HInstructionKind::Ror => {
                    if shift >= 32 {
                        self.asm.xchgl_reg_reg(lo, hi);
                        shift -= 32;
                    }
                    if shift != 0 {
                        let temp = locations.temp(0).as_register();
                        self.asm.movl_reg_reg(temp, lo);
                        self.asm.shrd_reg_reg_imm(lo, hi, shift);
                        self.asm.shrd_reg_reg_imm(hi, temp, shift);
                    }
                }
                _ => unreachable!(),
            }
            return Ok(());
        }

        // Variable distance in CL. The hardware masks to 5 bits; the 32 bit
        // decides which half receives the shifted-out word.
        let done = self.asm.create_near_label();
        match instr.kind {
            HInstructionKind::Shl => {
                self.asm.shld_reg_reg_cl(hi, lo);
                self.asm.shll_reg_cl(lo);
                self.asm.testl_reg_imm(Register::ECX, 32);
                self.asm.j_near(Condition::Equal, done)?;
                self.asm.movl_reg_reg(hi, lo);
                self.asm.xorl_reg_reg(lo, lo);
            }
            HInstructionKind::Shr => {
                self.asm.shrd_reg_reg_cl(lo, hi);
                self.asm.sarl_reg_cl(hi);
                self.asm.testl_reg_imm(Register::ECX, 32);
                self.asm.j_near(Condition::Equal, done)?;
                self.asm.movl_reg_reg(lo, hi);
                self.asm.sarl_reg_imm(hi, 31);
            }
            HInstructionKind::UShr => {
                self.asm.shrd_reg_reg_cl(lo, hi);
                self.asm.shrl_reg_cl(hi);
                self.asm.testl_reg_imm(Register::ECX, 32);
                self.asm.j_near(Condition::Equal, done)?;
                self.asm.movl_reg_reg(lo, hi);
                self.asm.xorl_reg_reg(hi, hi);
            }
            HInstructionKind::Ror => {
                let temp = locations.temp(0).as_register();
                self.asm.movl_reg_reg(temp, lo);
                self.asm.shrd_reg_reg_cl(lo, hi);
                self.asm.shrd_reg_reg_cl(hi, temp);
                self.asm.testl_reg_imm(Register::ECX, 32);
                self.asm.j_near(Condition::Equal, done)?;
                self.asm.xchgl_reg_reg(lo, hi);
            }
            _ => unreachable!(),
        }
        self.asm.bind_near(done)?;
        Ok(())
    }

    /// Three-way comparison producing -1/0/1.
    fn emit_compare(&mut self, id: InstrId, bias: ComparisonBias) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let g = self.graph;
        let instr = g.instr(id);
        let locations = instr.locations();
        let ty = g.instr(instr.inputs[0]).ty;
        let out = locations.out().as_register();
        let less = self.asm.create_label();
        let greater = self.asm.create_label();
        let done = self.asm.create_label();
        match ty {
            DataType::Int64 => {
                let lhs = locations.in_at(0);
                let rhs = locations.in_at(1);
                let hi = lhs.pair_high();
                let lo = lhs.pair_low();
                self.compare_long_half(hi, rhs, true)?;
                self.asm.j(Condition::Less, less);
                self.asm.j(Condition::Greater, greater);
                self.compare_long_half(lo, rhs, false)?;
                self.asm.j(Condition::Below, less);
                self.asm.j(Condition::Above, greater);
            }
            DataType::Float32 | DataType::Float64 => {
                let lhs = locations.in_at(0).as_fpu_register();
                let rhs = locations.in_at(1).as_fpu_register();
                if ty == DataType::Float64 {
                    self.asm.ucomisd_reg_reg(lhs, rhs);
                } else {
                    self.asm.ucomiss_reg_reg(lhs, rhs);
                }
                match bias {
                    ComparisonBias::GtBias => self.asm.j(Condition::ParityEven, greater),
                    _ => self.asm.j(Condition::ParityEven, less),
                }
                self.asm.j(Condition::Below, less);
                self.asm.j(Condition::Above, greater);
            }
            _ => {
                let lhs = locations.in_at(0).as_register();
                self.compare_int32(lhs, locations.in_at(1))?;
                self.asm.j(Condition::Less, less);
                self.asm.j(Condition::Greater, greater);
            }
        }
        self.asm.xorl_reg_reg(out, out);
        self.asm.jmp_label(done);
        self.asm.bind(greater);
        self.asm.movl_reg_imm(out, 1);
        self.asm.jmp_label(done);
        self.asm.bind(less);
        self.asm.movl_reg_imm(out, -1);
        self.asm.bind(done);
        Ok(())
    }

    /// Materialize a condition into a 0/1 register value. Fused conditions
    /// never reach this point.
    fn emit_condition(&mut self, id: InstrId, cond: IfCondition, _bias: ComparisonBias) -> CompileResult<()> {
        let g = self.graph;
        let instr = g.instr(id);
        let ty = g.instr(instr.inputs[0]).ty;
        let out = instr.locations().out().as_register();
        if !ty.is_floating_point() && !ty.is_64bit() && out.is_byte_register() {
            self.stage_inputs(id)?;
            let locations = g.instr(id).locations();
            let lhs = locations.in_at(0).as_register();
            self.compare_int32(lhs, locations.in_at(1))?;
            self.asm.setb(condition_code(cond), out);
            self.asm.movzxb_reg_reg(out, out);
            return Ok(());
        }
        let true_label = self.asm.create_label();
        let false_label = self.asm.create_label();
        let done = self.asm.create_label();
        self.generate_condition_branch(id, true_label, false_label, false)?;
        self.asm.bind(false_label);
        self.asm.movl_reg_imm(out, 0);
        self.asm.jmp_label(done);
        self.asm.bind(true_label);
        self.asm.movl_reg_imm(out, 1);
        self.asm.bind(done);
        Ok(())
    }

    fn emit_select(&mut self, id: InstrId) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let g = self.graph;
        let instr = g.instr(id);
        let locations = instr.locations();
        let condition = locations.in_at(2);
        let true_value = locations.in_at(1);
        let ty = instr.ty;

        if let Location::Constant(cid) = condition {
            if self.constant_i32(cid) != 0 {
                let out = locations.out();
                return self.emit_move(out, true_value, ty);
            }
            return Ok(());
        }
        match condition {
            Location::Register(reg) => self.asm.testl_reg_reg(reg, reg),
            Location::StackSlot(off) => {
                self.asm.cmpl_mem_imm(Address::displace(Register::ESP, off), 0)
            }
            other => {
                return Err(CompileError::InvalidLocation {
                    context: "Select condition",
                    reason: format!("{:?}", other),
                })
            }
        }
        if ty == DataType::Int32 || ty == DataType::Reference {
            let out = locations.out().as_register();
            match true_value {
                Location::Register(reg) => {
                    self.asm.cmovl_reg_reg(Condition::NotEqual, out, reg);
                    return Ok(());
                }
                Location::StackSlot(off) => {
                    self.asm
                        .cmovl_reg_mem(Condition::NotEqual, out, Address::displace(Register::ESP, off));
                    return Ok(());
                }
                _ => {}
            }
        }
        let keep = self.asm.create_label();
        self.asm.j(Condition::Equal, keep);
        let out = locations.out();
        self.emit_move(out, true_value, ty)?;
        self.asm.bind(keep);
        Ok(())
    }
}

/// Magic-number constants for signed division by `divisor` (|divisor| >= 2).
/// Hacker's Delight, figure 10-1, 32-bit variant.
fn magic_for_division(divisor: i32) -> (i32, u8) {
    debug_assert!(divisor != 0 && divisor != 1 && divisor != -1);
    let two31: u64 = 0x8000_0000;
    let ad = divisor.unsigned_abs() as u64;
    let t = two31 + ((divisor as u32 as u64) >> 31);
    let anc = t - 1 - t % ad;
    let mut p: u32 = 31;
    let mut q1 = two31 / anc;
    let mut r1 = two31 - q1 * anc;
    let mut q2 = two31 / ad;
    let mut r2 = two31 - q2 * ad;
    loop {
        p += 1;
        q1 *= 2;
        r1 *= 2;
        if r1 >= anc {
            q1 += 1;
            r1 -= anc;
        }
        q2 *= 2;
        r2 *= 2;
        if r2 >= ad {
            q2 += 1;
            r2 -= ad;
        }
        let delta = ad - r2;
        if !(q1 < delta || (q1 == delta && r1 == 0)) {
            break;
        }
    }
    let mut magic = (q2 + 1) as u32 as i32;
    if divisor < 0 {
        magic = magic.wrapping_neg();
    }
    (magic, (p - 32) as u8)
}

// === Runtime checks =======================================================

impl<'g, 'arena> CodeGeneratorX86<'g, 'arena> {
    fn emit_null_check(&mut self, id: InstrId) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let object = self.graph.instr(id).locations().in_at(0);
        if self.options.implicit_null_checks {
            if let Location::Register(reg) = object {
                // A load from [reg] faults on null; the fault handler maps
                // the faulting pc back through the stack map.
                self.asm.testl_reg_mem(Register::EAX, Address::displace(reg, 0));
                self.record_pc_info(id);
                return Ok(());
            }
        }
        let path = NullCheckSlowPath::new(self, id);
        let entry = path.entry_label();
        self.slow_paths.push(Box::new(path));
        match object {
            Location::Register(reg) => {
                self.asm.testl_reg_reg(reg, reg);
                self.asm.j(Condition::Equal, entry);
            }
            Location::StackSlot(off) => {
                self.asm.cmpl_mem_imm(Address::displace(Register::ESP, off), 0);
                self.asm.j(Condition::Equal, entry);
            }
            Location::Constant(cid) => {
                if self.constant_i32(cid) == 0 {
                    self.asm.jmp_label(entry);
                }
            }
            other => {
                return Err(CompileError::InvalidLocation {
                    context: "NullCheck input",
                    reason: format!("{:?}", other),
                })
            }
        }
        Ok(())
    }

    fn emit_bounds_check(&mut self, id: InstrId, is_string_char_at: bool) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let locations = self.graph.instr(id).locations();
        let index = locations.in_at(0);
        let length = locations.in_at(1);
        let path = BoundsCheckSlowPath::new(self, id, index, length, is_string_char_at);
        let entry = path.entry_label();
        self.slow_paths.push(Box::new(path));
        match (index, length) {
            (Location::Constant(ci), Location::Constant(cl)) => {
                let i = self.constant_i32(ci);
                let l = self.constant_i32(cl);
                if (i as u32) >= (l as u32) {
                    self.asm.jmp_label(entry);
                }
            }
            (Location::Constant(ci), Location::Register(len)) => {
                self.asm.cmpl_reg_imm(len, self.constant_i32(ci));
                self.asm.j(Condition::BelowEqual, entry);
            }
            (Location::Constant(ci), Location::StackSlot(off)) => {
                let value = self.constant_i32(ci);
                self.asm.cmpl_mem_imm(Address::displace(Register::ESP, off), value);
                self.asm.j(Condition::BelowEqual, entry);
            }
            (Location::Register(idx), _) => {
                self.compare_int32(idx, length)?;
                self.asm.j(Condition::AboveEqual, entry);
            }
            (i, l) => {
                return Err(CompileError::InvalidLocation {
                    context: "BoundsCheck inputs",
                    reason: format!("{:?} vs {:?}", i, l),
                })
            }
        }
        Ok(())
    }

    fn emit_div_zero_check(&mut self, id: InstrId) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        let value = locations.in_at(0);
        let path = DivZeroCheckSlowPath::new(self, id);
        let entry = path.entry_label();
        self.slow_paths.push(Box::new(path));
        match value {
            Location::Register(reg) => self.asm.testl_reg_reg(reg, reg),
            Location::StackSlot(off) => {
                self.asm.cmpl_mem_imm(Address::displace(Register::ESP, off), 0)
            }
            Location::RegisterPair(lo, hi) => {
                let temp = locations.temp(0).as_register();
                self.asm.movl_reg_reg(temp, lo);
                self.asm.orl_reg_reg(temp, hi);
            }
            Location::DoubleStackSlot(off) => {
                let temp = locations.temp(0).as_register();
                self.asm.movl_reg_mem(temp, Address::displace(Register::ESP, off));
                self.asm.orl_reg_mem(temp, Address::displace(Register::ESP, off + 4));
            }
            Location::Constant(cid) => {
                if self.constant_i64(cid) == 0 {
                    self.asm.jmp_label(entry);
                }
                return Ok(());
            }
            other => {
                return Err(CompileError::InvalidLocation {
                    context: "DivZeroCheck input",
                    reason: format!("{:?}", other),
                })
            }
        }
        self.asm.j(Condition::Equal, entry);
        Ok(())
    }

    fn emit_suspend_check(&mut self, id: InstrId) -> CompileResult<()> {
        let g = self.graph;
        let block = g.instr(id).block;
        if let Some(info) = &g.block(block).loop_information {
            if info.suspend_check == Some(id) {
                // The back-edge goto emits this check, merged with the jump.
                return Ok(());
            }
        }
        self.generate_suspend_check(id, None)
    }

    /// Test the thread flags and call TestSuspend out of line when any are
    /// set. With a successor the fast path jumps straight to its block and
    /// the slow path resumes there; without one, execution falls through.
    fn generate_suspend_check(
        &mut self,
        id: InstrId,
        successor: Option<BlockId>,
    ) -> CompileResult<()> {
        let path = SuspendCheckSlowPath::new(self, id, successor);
        let entry = path.entry_label();
        let exit = path.exit_label();
        self.slow_paths.push(Box::new(path));
        self.asm.fs_prefix();
        self.asm.testl_mem_imm(
            Address::absolute(self.layout.thread_flags_offset),
            self.layout.suspend_request_flags,
        );
        match successor {
            None => {
                self.asm.j(Condition::NotEqual, entry);
                self.asm.bind(exit);
            }
            Some(successor) => {
                self.asm.j(Condition::Equal, self.block_label(successor));
                self.asm.jmp_label(entry);
            }
        }
        Ok(())
    }
}

// === Memory and objects ===================================================

impl<'g, 'arena> CodeGeneratorX86<'g, 'arena> {
    /// Load a heap reference and run it through the read barrier when the
    /// collector needs one.
    fn generate_reference_load(
        &mut self,
        id: InstrId,
        out: Location,
        object: Location,
        address: Address,
        offset: u32,
    ) -> CompileResult<()> {
        let out_reg = out.as_register();
        self.asm.movl_reg_mem(out_reg, address);
        self.asm.maybe_unpoison_heap_reference(out_reg);
        if !self.options.needs_read_barrier() {
            return Ok(());
        }
        if self.options.use_baker_read_barrier {
            let path = ReadBarrierMarkSlowPath::new(self, id, out_reg);
            let entry = path.entry_label();
            let exit = path.exit_label();
            self.slow_paths.push(Box::new(path));
            self.asm.fs_prefix();
            self.asm
                .cmpb_mem_imm(Address::absolute(self.layout.is_gc_marking_offset), 0);
            self.asm.j(Condition::NotEqual, entry);
            self.asm.bind(exit);
        } else {
            let path = ReadBarrierForHeapReferenceSlowPath::new(self, id, out, out, object, offset);
            let entry = path.entry_label();
            let exit = path.exit_label();
            self.slow_paths.push(Box::new(path));
            self.asm.jmp_label(entry);
            self.asm.bind(exit);
        }
        Ok(())
    }

    /// Read barrier for a GC root already loaded into `out`. Roots are never
    /// poisoned.
    fn generate_gc_root_barrier(&mut self, id: InstrId, out: Location) -> CompileResult<()> {
        if !self.options.needs_read_barrier() {
            return Ok(());
        }
        if self.options.use_baker_read_barrier {
            let reg = out.as_register();
            let path = ReadBarrierMarkSlowPath::new(self, id, reg);
            let entry = path.entry_label();
            let exit = path.exit_label();
            self.slow_paths.push(Box::new(path));
            self.asm.fs_prefix();
            self.asm
                .cmpb_mem_imm(Address::absolute(self.layout.is_gc_marking_offset), 0);
            self.asm.j(Condition::NotEqual, entry);
            self.asm.bind(exit);
        } else {
            let path = ReadBarrierForRootSlowPath::new(self, id, out, out);
            let entry = path.entry_label();
            let exit = path.exit_label();
            self.slow_paths.push(Box::new(path));
            self.asm.jmp_label(entry);
            self.asm.bind(exit);
        }
        Ok(())
    }

    fn generate_gc_root_load(&mut self, id: InstrId, out: Location, address: Address) -> CompileResult<()> {
        self.asm.movl_reg_mem(out.as_register(), address);
        self.generate_gc_root_barrier(id, out)
    }

    /// Mark the card covering `object` in the card table. `value` is given
    /// when the barrier may be skipped for null stores.
    fn mark_gc_card(
        &mut self,
        card: Register,
        temp: Register,
        object: Register,
        value: Option<Register>,
    ) -> CompileResult<()> {
        let done = self.asm.create_near_label();
        if let Some(value) = value {
            self.asm.testl_reg_reg(value, value);
            self.asm.j_near(Condition::Equal, done)?;
        }
        self.asm.fs_prefix();
        self.asm
            .movl_reg_mem(card, Address::absolute(self.layout.card_table_offset));
        self.asm.movl_reg_reg(temp, object);
        self.asm
            .shrl_reg_imm(temp, self.layout.card_table_shift as u8);
        self.asm.movb_mem_imm(
            Address::indexed(card, temp, ScaleFactor::Times1, 0),
            self.layout.dirty_card_value as i8,
        );
        self.asm.bind_near(done)?;
        Ok(())
    }

    fn emit_field_get(&mut self, id: InstrId, field: FieldInfo) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        let base = locations.in_at(0).as_register();
        let address = Address::displace(base, field.offset as i32);
        match field.field_type {
            DataType::Bool | DataType::Uint8 => {
                self.asm.movzxb_reg_mem(locations.out().as_register(), address)
            }
            DataType::Int8 => self.asm.movsxb_reg_mem(locations.out().as_register(), address),
            DataType::Uint16 => self.asm.movzxw_reg_mem(locations.out().as_register(), address),
            DataType::Int16 => self.asm.movsxw_reg_mem(locations.out().as_register(), address),
            DataType::Int32 | DataType::Uint32 => {
                self.asm.movl_reg_mem(locations.out().as_register(), address)
            }
            DataType::Reference => {
                let out = locations.out();
                let object = locations.in_at(0);
                self.generate_reference_load(id, out, object, address, field.offset)?;
            }
            DataType::Int64 | DataType::Uint64 => {
                let lo = locations.out().pair_low();
                let hi = locations.out().pair_high();
                if field.is_volatile {
                    // A single movsd keeps the 64-bit load atomic.
                    let xtemp = locations.temp(0).as_fpu_register();
                    self.asm.movsd_reg_mem(xtemp, address);
                    self.asm.movd_reg_xmm(lo, xtemp);
                    self.asm.psrlq_reg_imm(xtemp, 32);
                    self.asm.movd_reg_xmm(hi, xtemp);
                } else {
                    self.asm.movl_reg_mem(lo, address);
                    self.asm
                        .movl_reg_mem(hi, Address::displace(base, field.offset as i32 + 4));
                }
            }
            DataType::Float32 => self.asm.movss_reg_mem(locations.out().as_fpu_register(), address),
            DataType::Float64 => self.asm.movsd_reg_mem(locations.out().as_fpu_register(), address),
            DataType::Void => {
                return Err(CompileError::UnimplementedTypeCombination {
                    operation: "field get",
                    ty: field.field_type.to_string(),
                })
            }
        }
        if field.is_volatile {
            self.emit_memory_barrier(MemBarrierKind::LoadAny);
        }
        Ok(())
    }

    fn emit_field_set(
        &mut self,
        id: InstrId,
        field: FieldInfo,
        write_barrier: WriteBarrierKind,
        value_can_be_null: bool,
    ) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        let base = locations.in_at(0).as_register();
        let value = locations.in_at(1);
        let address = Address::displace(base, field.offset as i32);
        if field.is_volatile {
            self.emit_memory_barrier(MemBarrierKind::AnyStore);
        }
        match field.field_type {
            DataType::Bool | DataType::Int8 | DataType::Uint8 => match value {
                Location::Register(reg) => self.asm.movb_mem_reg(address, reg),
                Location::Constant(cid) => {
                    let v = self.constant_i32(cid);
                    self.asm.movb_mem_imm(address, v as i8);
                }
                other => {
                    return Err(CompileError::InvalidLocation {
                        context: "byte field store",
                        reason: format!("{:?}", other),
                    })
                }
            },
            DataType::Int16 | DataType::Uint16 => match value {
                Location::Register(reg) => self.asm.movw_mem_reg(address, reg),
                Location::Constant(cid) => {
                    let v = self.constant_i32(cid);
                    self.asm.movw_mem_imm(address, v as i16);
                }
                other => {
                    return Err(CompileError::InvalidLocation {
                        context: "half-word field store",
                        reason: format!("{:?}", other),
                    })
                }
            },
            DataType::Int32 | DataType::Uint32 => match value {
                Location::Register(reg) => self.asm.movl_mem_reg(address, reg),
                Location::Constant(cid) => {
                    let v = self.constant_i32(cid);
                    self.asm.movl_mem_imm(address, v);
                }
                other => {
                    return Err(CompileError::InvalidLocation {
                        context: "word field store",
                        reason: format!("{:?}", other),
                    })
                }
            },
            DataType::Reference => match value {
                Location::Constant(_) => self.asm.movl_mem_imm(address, 0),
                Location::Register(reg) => {
                    if self.asm.poisons_references() {
                        let temp = locations.temp(1).as_register();
                        self.asm.movl_reg_reg(temp, reg);
                        self.asm.poison_heap_reference(temp);
                        self.asm.movl_mem_reg(address, temp);
                    } else {
                        self.asm.movl_mem_reg(address, reg);
                    }
                }
                other => {
                    return Err(CompileError::InvalidLocation {
                        context: "reference field store",
                        reason: format!("{:?}", other),
                    })
                }
            },
            DataType::Int64 | DataType::Uint64 => {
                if field.is_volatile {
                    let xtemp0 = locations.temp(0).as_fpu_register();
                    match value {
                        Location::RegisterPair(lo, hi) => {
                            let xtemp1 = locations.temp(1).as_fpu_register();
                            self.asm.movd_xmm_reg(xtemp0, lo);
                            self.asm.movd_xmm_reg(xtemp1, hi);
                            self.asm.punpckldq_reg_reg(xtemp0, xtemp1);
                            self.asm.movsd_mem_reg(address, xtemp0);
                        }
                        Location::Constant(cid) => {
                            let v = self.constant_i64(cid);
                            self.asm.pushl_imm((v >> 32) as i32);
                            self.asm.pushl_imm(v as i32);
                            self.asm
                                .movsd_reg_mem(xtemp0, Address::displace(Register::ESP, 0));
                            self.asm.addl_reg_imm(Register::ESP, 8);
                            self.asm.movsd_mem_reg(address, xtemp0);
                        }
                        other => {
                            return Err(CompileError::InvalidLocation {
                                context: "volatile int64 field store",
                                reason: format!("{:?}", other),
                            })
                        }
                    }
                } else {
                    let high = Address::displace(base, field.offset as i32 + 4);
                    match value {
                        Location::RegisterPair(lo, hi) => {
                            self.asm.movl_mem_reg(address, lo);
                            self.asm.movl_mem_reg(high, hi);
                        }
                        Location::Constant(cid) => {
                            let v = self.constant_i64(cid);
                            self.asm.movl_mem_imm(address, v as i32);
                            self.asm.movl_mem_imm(high, (v >> 32) as i32);
                        }
                        other => {
                            return Err(CompileError::InvalidLocation {
                                context: "int64 field store",
                                reason: format!("{:?}", other),
                            })
                        }
                    }
                }
            }
            DataType::Float32 => match value {
                Location::FpuRegister(reg) => self.asm.movss_mem_reg(address, reg),
                Location::Constant(cid) => {
                    let v = self.constant_i64(cid);
                    self.asm.movl_mem_imm(address, v as i32);
                }
                other => {
                    return Err(CompileError::InvalidLocation {
                        context: "float field store",
                        reason: format!("{:?}", other),
                    })
                }
            },
            DataType::Float64 => match value {
                Location::FpuRegister(reg) => self.asm.movsd_mem_reg(address, reg),
                Location::Constant(cid) => {
                    let v = self.constant_i64(cid);
                    self.asm.movl_mem_imm(address, v as i32);
                    self.asm
                        .movl_mem_imm(Address::displace(base, field.offset as i32 + 4), (v >> 32) as i32);
                }
                other => {
                    return Err(CompileError::InvalidLocation {
                        context: "double field store",
                        reason: format!("{:?}", other),
                    })
                }
            },
            DataType::Void => {
                return Err(CompileError::UnimplementedTypeCombination {
                    operation: "field set",
                    ty: field.field_type.to_string(),
                })
            }
        }
        if field.is_volatile {
            self.emit_memory_barrier(MemBarrierKind::AnyAny);
        }
        if field.field_type == DataType::Reference && write_barrier != WriteBarrierKind::DontEmit {
            let card = locations.temp(0).as_register();
            let temp = locations.temp(1).as_register();
            let skip_for_null = write_barrier == WriteBarrierKind::EmitNotBeingReliedOn
                && value_can_be_null;
            let value_reg = match value {
                Location::Register(reg) if skip_for_null => Some(reg),
                _ => None,
            };
            self.mark_gc_card(card, temp, base, value_reg)?;
        }
        Ok(())
    }

    fn element_address(
        &self,
        base: Register,
        index: Location,
        size: usize,
        data_offset: i32,
    ) -> CompileResult<Address> {
        match index {
            Location::Constant(cid) => {
                let i = self.constant_i32(cid);
                Ok(Address::displace(base, data_offset + i * size as i32))
            }
            Location::Register(reg) => Ok(Address::indexed(
                base,
                reg,
                ScaleFactor::for_size(size),
                data_offset,
            )),
            other => Err(CompileError::InvalidLocation {
                context: "array index",
                reason: format!("{:?}", other),
            }),
        }
    }

    fn emit_array_get(
        &mut self,
        id: InstrId,
        component: DataType,
        is_string_char_at: bool,
    ) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        let base = locations.in_at(0).as_register();
        let index = locations.in_at(1);

        if is_string_char_at {
            // Compressed strings store bytes; bit 0 of the count word set
            // means uncompressed.
            let out = locations.out().as_register();
            let data_offset = self.layout.string_data_offset;
            let done = self.asm.create_near_label();
            let uncompressed = self.asm.create_near_label();
            self.asm.testb_mem_imm(
                Address::displace(base, self.layout.string_count_offset),
                1,
            );
            self.asm.j_near(Condition::NotEqual, uncompressed)?;
            let byte_addr = self.element_address(base, index, 1, data_offset)?;
            self.asm.movzxb_reg_mem(out, byte_addr);
            self.asm.jmp_near(done)?;
            self.asm.bind_near(uncompressed)?;
            let char_addr = self.element_address(base, index, 2, data_offset)?;
            self.asm.movzxw_reg_mem(out, char_addr);
            self.asm.bind_near(done)?;
            return Ok(());
        }

        let data_offset = self.layout.array_data_offset(component);
        let size = component.size_in_bytes();
        let address = self.element_address(base, index, size, data_offset)?;
        match component {
            DataType::Bool | DataType::Uint8 => {
                self.asm.movzxb_reg_mem(locations.out().as_register(), address)
            }
            DataType::Int8 => self.asm.movsxb_reg_mem(locations.out().as_register(), address),
            DataType::Uint16 => self.asm.movzxw_reg_mem(locations.out().as_register(), address),
            DataType::Int16 => self.asm.movsxw_reg_mem(locations.out().as_register(), address),
            DataType::Int32 | DataType::Uint32 => {
                self.asm.movl_reg_mem(locations.out().as_register(), address)
            }
            DataType::Reference => {
                let out = locations.out();
                let object = locations.in_at(0);
                self.generate_reference_load(id, out, object, address, data_offset as u32)?;
            }
            DataType::Int64 | DataType::Uint64 => {
                let high = self.element_address(base, index, size, data_offset + 4)?;
                self.asm.movl_reg_mem(locations.out().pair_low(), address);
                self.asm.movl_reg_mem(locations.out().pair_high(), high);
            }
            DataType::Float32 => {
                self.asm.movss_reg_mem(locations.out().as_fpu_register(), address)
            }
            DataType::Float64 => {
                self.asm.movsd_reg_mem(locations.out().as_fpu_register(), address)
            }
            DataType::Void => {
                return Err(CompileError::UnimplementedTypeCombination {
                    operation: "array get",
                    ty: component.to_string(),
                })
            }
        }
        Ok(())
    }

    fn emit_array_set(
        &mut self,
        id: InstrId,
        component: DataType,
        needs_type_check: bool,
        write_barrier: WriteBarrierKind,
        value_can_be_null: bool,
    ) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        let base = locations.in_at(0).as_register();
        let index = locations.in_at(1);
        let value = locations.in_at(2);
        let data_offset = self.layout.array_data_offset(component);
        let size = component.size_in_bytes();
        let address = self.element_address(base, index, size, data_offset)?;
        match component {
            DataType::Bool | DataType::Int8 | DataType::Uint8 => match value {
                Location::Register(reg) => self.asm.movb_mem_reg(address, reg),
                Location::Constant(cid) => {
                    let v = self.constant_i32(cid);
                    self.asm.movb_mem_imm(address, v as i8);
                }
                other => {
                    return Err(CompileError::InvalidLocation {
                        context: "byte array store",
                        reason: format!("{:?}", other),
                    })
                }
            },
            DataType::Int16 | DataType::Uint16 => match value {
                Location::Register(reg) => self.asm.movw_mem_reg(address, reg),
                Location::Constant(cid) => {
                    let v = self.constant_i32(cid);
                    self.asm.movw_mem_imm(address, v as i16);
                }
                other => {
                    return Err(CompileError::InvalidLocation {
                        context: "half-word array store",
                        reason: format!("{:?}", other),
                    })
                }
            },
            DataType::Int32 | DataType::Uint32 => match value {
                Location::Register(reg) => self.asm.movl_mem_reg(address, reg),
                Location::Constant(cid) => {
                    let v = self.constant_i32(cid);
                    self.asm.movl_mem_imm(address, v);
                }
                other => {
                    return Err(CompileError::InvalidLocation {
                        context: "word array store",
                        reason: format!("{:?}", other),
                    })
                }
            },
            DataType::Reference => {
                return self.emit_reference_array_set(
                    id,
                    address,
                    needs_type_check,
                    write_barrier,
                    value_can_be_null,
                );
            }
            DataType::Int64 | DataType::Uint64 => {
                let high = self.element_address(base, index, size, data_offset + 4)?;
                match value {
                    Location::RegisterPair(lo, hi) => {
                        self.asm.movl_mem_reg(address, lo);
                        self.asm.movl_mem_reg(high, hi);
                    }
                    Location::Constant(cid) => {
                        let v = self.constant_i64(cid);
                        self.asm.movl_mem_imm(address, v as i32);
                        self.asm.movl_mem_imm(high, (v >> 32) as i32);
                    }
                    other => {
                        return Err(CompileError::InvalidLocation {
                            context: "int64 array store",
                            reason: format!("{:?}", other),
                        })
                    }
                }
            }
            DataType::Float32 => match value {
                Location::FpuRegister(reg) => self.asm.movss_mem_reg(address, reg),
                Location::Constant(cid) => {
                    let v = self.constant_i64(cid);
                    self.asm.movl_mem_imm(address, v as i32);
                }
                other => {
                    return Err(CompileError::InvalidLocation {
                        context: "float array store",
                        reason: format!("{:?}", other),
                    })
                }
            },
            DataType::Float64 => {
                let high = self.element_address(base, index, size, data_offset + 4)?;
                match value {
                    Location::FpuRegister(reg) => self.asm.movsd_mem_reg(address, reg),
                    Location::Constant(cid) => {
                        let v = self.constant_i64(cid);
                        self.asm.movl_mem_imm(address, v as i32);
                        self.asm.movl_mem_imm(high, (v >> 32) as i32);
                    }
                    other => {
                        return Err(CompileError::InvalidLocation {
                            context: "double array store",
                            reason: format!("{:?}", other),
                        })
                    }
                }
            }
            DataType::Void => {
                return Err(CompileError::UnimplementedTypeCombination {
                    operation: "array set",
                    ty: component.to_string(),
                })
            }
        }
        Ok(())
    }

    fn emit_reference_array_set(
        &mut self,
        id: InstrId,
        address: Address,
        needs_type_check: bool,
        write_barrier: WriteBarrierKind,
        value_can_be_null: bool,
    ) -> CompileResult<()> {
        let locations = self.graph.instr(id).locations();
        let base = locations.in_at(0).as_register();
        let value = locations.in_at(2);

        if let Location::Constant(_) = value {
            // Null store: no type check, no barrier.
            self.asm.movl_mem_imm(address, 0);
            return Ok(());
        }
        let value_reg = value.as_register();
        let temp0 = locations.temp(0).as_register();
        let temp1 = locations.temp(1).as_register();

        let mut exit = None;
        if needs_type_check {
            let path = ArraySetSlowPath::new(self, id);
            let entry = path.entry_label();
            exit = Some(path.exit_label());
            self.slow_paths.push(Box::new(path));
            let do_store = self.asm.create_near_label();
            if value_can_be_null {
                self.asm.testl_reg_reg(value_reg, value_reg);
                self.asm.j_near(Condition::Equal, do_store)?;
            }
            let class_offset = self.layout.object_class_offset;
            self.asm
                .movl_reg_mem(temp0, Address::displace(base, class_offset));
            self.asm.maybe_unpoison_heap_reference(temp0);
            self.asm.movl_reg_mem(
                temp0,
                Address::displace(temp0, self.layout.class_component_type_offset),
            );
            self.asm.maybe_unpoison_heap_reference(temp0);
            self.asm
                .movl_reg_mem(temp1, Address::displace(value_reg, class_offset));
            self.asm.maybe_unpoison_heap_reference(temp1);
            self.asm.cmpl_reg_reg(temp0, temp1);
            self.asm.j(Condition::NotEqual, entry);
            self.asm.bind_near(do_store)?;
        }

        if self.asm.poisons_references() {
            self.asm.movl_reg_reg(temp0, value_reg);
            self.asm.poison_heap_reference(temp0);
            self.asm.movl_mem_reg(address, temp0);
        } else {
            self.asm.movl_mem_reg(address, value_reg);
        }

        if write_barrier != WriteBarrierKind::DontEmit {
            let skip_for_null =
                write_barrier == WriteBarrierKind::EmitNotBeingReliedOn && value_can_be_null;
            let null_checked = if skip_for_null { Some(value_reg) } else { None };
            self.mark_gc_card(temp0, temp1, base, null_checked)?;
        }
        if let Some(exit) = exit {
            self.asm.bind(exit);
        }
        Ok(())
    }

    fn emit_array_length(&mut self, id: InstrId, is_string_length: bool) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let locations = self.graph.instr(id).locations();
        let base = locations.in_at(0).as_register();
        let out = locations.out().as_register();
        let offset = if is_string_length {
            self.layout.string_count_offset
        } else {
            self.layout.array_length_offset
        };
        self.asm.movl_reg_mem(out, Address::displace(base, offset));
        if is_string_length {
            // Count word is (length << 1) | compression flag.
            self.asm.shrl_reg_imm(out, 1);
        }
        Ok(())
    }

    fn compare_class(&mut self, known: Register, class: Location) -> CompileResult<()> {
        match class {
            Location::Register(reg) => self.asm.cmpl_reg_reg(known, reg),
            Location::StackSlot(off) => {
                self.asm.cmpl_reg_mem(known, Address::displace(Register::ESP, off))
            }
            other => {
                return Err(CompileError::InvalidLocation {
                    context: "class comparison",
                    reason: format!("{:?}", other),
                })
            }
        }
        Ok(())
    }

    fn emit_instance_of(&mut self, id: InstrId, check_kind: TypeCheckKind) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let locations = self.graph.instr(id).locations();
        let object = locations.in_at(0).as_register();
        let class = locations.in_at(1);
        let out = locations.out().as_register();
        let zero = self.asm.create_label();
        let done = self.asm.create_label();

        self.asm.testl_reg_reg(object, object);
        self.asm.j(Condition::Equal, zero);
        self.asm
            .movl_reg_mem(out, Address::displace(object, self.layout.object_class_offset));
        self.asm.maybe_unpoison_heap_reference(out);
        match check_kind {
            TypeCheckKind::ExactCheck => {
                self.compare_class(out, class)?;
                self.asm.j(Condition::NotEqual, zero);
                self.asm.movl_reg_imm(out, 1);
                self.asm.jmp_label(done);
            }
            TypeCheckKind::ClassHierarchyCheck | TypeCheckKind::AbstractClassCheck => {
                let loop_label = self.asm.create_label();
                let success = self.asm.create_label();
                self.asm.bind(loop_label);
                self.compare_class(out, class)?;
                self.asm.j(Condition::Equal, success);
                self.asm.movl_reg_mem(
                    out,
                    Address::displace(out, self.layout.class_super_class_offset),
                );
                self.asm.maybe_unpoison_heap_reference(out);
                self.asm.testl_reg_reg(out, out);
                self.asm.j(Condition::NotEqual, loop_label);
                self.asm.jmp_label(zero);
                self.asm.bind(success);
                self.asm.movl_reg_imm(out, 1);
                self.asm.jmp_label(done);
            }
            _ => {
                let object_loc = locations.in_at(0);
                let path = TypeCheckSlowPath::new(self, id, object_loc, class, false);
                let entry = path.entry_label();
                let exit = path.exit_label();
                self.slow_paths.push(Box::new(path));
                self.asm.jmp_label(entry);
                self.asm.bind(exit);
                self.asm.jmp_label(done);
            }
        }
        self.asm.bind(zero);
        self.asm.xorl_reg_reg(out, out);
        self.asm.bind(done);
        Ok(())
    }

    fn emit_check_cast(&mut self, id: InstrId, check_kind: TypeCheckKind) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let locations = self.graph.instr(id).locations();
        let object = locations.in_at(0).as_register();
        let class = locations.in_at(1);
        let temp = locations.temp(0).as_register();
        let object_loc = locations.in_at(0);
        let path = TypeCheckSlowPath::new(self, id, object_loc, class, true);
        let entry = path.entry_label();
        self.slow_paths.push(Box::new(path));
        let done = self.asm.create_label();

        self.asm.testl_reg_reg(object, object);
        self.asm.j(Condition::Equal, done);
        self.asm
            .movl_reg_mem(temp, Address::displace(object, self.layout.object_class_offset));
        self.asm.maybe_unpoison_heap_reference(temp);
        match check_kind {
            TypeCheckKind::ExactCheck => {
                self.compare_class(temp, class)?;
                self.asm.j(Condition::NotEqual, entry);
            }
            TypeCheckKind::ClassHierarchyCheck | TypeCheckKind::AbstractClassCheck => {
                let loop_label = self.asm.create_label();
                self.asm.bind(loop_label);
                self.compare_class(temp, class)?;
                self.asm.j(Condition::Equal, done);
                self.asm.movl_reg_mem(
                    temp,
                    Address::displace(temp, self.layout.class_super_class_offset),
                );
                self.asm.maybe_unpoison_heap_reference(temp);
                self.asm.testl_reg_reg(temp, temp);
                self.asm.j(Condition::NotEqual, loop_label);
                self.asm.jmp_label(entry);
            }
            _ => {
                self.asm.jmp_label(entry);
            }
        }
        self.asm.bind(done);
        Ok(())
    }

    fn emit_load_class(
        &mut self,
        id: InstrId,
        type_index: u32,
        load_kind: ClassLoadKind,
        needs_access_check: bool,
        generate_clinit_check: bool,
    ) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        let out_loc = locations.out();
        match load_kind {
            ClassLoadKind::RuntimeCall => {
                self.asm.movl_reg_imm(Register::EAX, type_index as i32);
                let entrypoint = if needs_access_check {
                    QuickEntrypoint::ResolveTypeAndVerifyAccess
                } else {
                    QuickEntrypoint::ResolveType
                };
                return self.invoke_runtime(entrypoint, id);
            }
            ClassLoadKind::ReferrersClass => {
                let method = locations.in_at(0).as_register();
                return self.generate_gc_root_load(
                    id,
                    out_loc,
                    Address::displace(method, self.layout.method_declaring_class_offset),
                );
            }
            ClassLoadKind::BootImageLinkTimePcRelative => {
                let base = locations.in_at(0).as_register();
                let base_id = instr.inputs[0];
                let out = out_loc.as_register();
                self.asm
                    .leal(out, Address::displace(base, PLACEHOLDER_32BIT_OFFSET));
                let label = self.asm.create_label();
                self.asm.bind(label);
                self.patches.record_boot_image_type(
                    Some(base_id),
                    TypeReference { dex_file: 0, type_index },
                    label,
                );
            }
            ClassLoadKind::BootImageRelRo => {
                let base = locations.in_at(0).as_register();
                let base_id = instr.inputs[0];
                let out = out_loc.as_register();
                self.asm
                    .movl_reg_mem(out, Address::displace(base, PLACEHOLDER_32BIT_OFFSET));
                let label = self.asm.create_label();
                self.asm.bind(label);
                self.patches
                    .record_boot_image_other(Some(base_id), type_index, label);
            }
            ClassLoadKind::AppImageRelRo => {
                let base = locations.in_at(0).as_register();
                let base_id = instr.inputs[0];
                let out = out_loc.as_register();
                self.asm
                    .movl_reg_mem(out, Address::displace(base, PLACEHOLDER_32BIT_OFFSET));
                let label = self.asm.create_label();
                self.asm.bind(label);
                self.patches.record_app_image_type(
                    Some(base_id),
                    TypeReference { dex_file: 0, type_index },
                    label,
                );
            }
            ClassLoadKind::BssEntry | ClassLoadKind::BssEntryPublic | ClassLoadKind::BssEntryPackage => {
                let base = locations.in_at(0).as_register();
                let base_id = instr.inputs[0];
                let out = out_loc.as_register();
                self.asm
                    .movl_reg_mem(out, Address::displace(base, PLACEHOLDER_32BIT_OFFSET));
                let label = self.asm.create_label();
                self.asm.bind(label);
                let reference = TypeReference { dex_file: 0, type_index };
                match load_kind {
                    ClassLoadKind::BssEntry => {
                        self.patches.record_type_bss_entry(Some(base_id), reference, label)
                    }
                    ClassLoadKind::BssEntryPublic => self
                        .patches
                        .record_public_type_bss_entry(Some(base_id), reference, label),
                    _ => self
                        .patches
                        .record_package_type_bss_entry(Some(base_id), reference, label),
                }
                self.generate_gc_root_barrier(id, out_loc)?;
                // The BSS slot starts null; resolve through the runtime on
                // first use, initializing the class when required.
                let path = LoadClassSlowPath::new(
                    self,
                    id,
                    type_index,
                    generate_clinit_check,
                    needs_access_check,
                );
                let entry = path.entry_label();
                let exit = path.exit_label();
                self.slow_paths.push(Box::new(path));
                self.asm.testl_reg_reg(out, out);
                self.asm.j(Condition::Equal, entry);
                if generate_clinit_check {
                    self.asm.cmpb_mem_imm(
                        Address::displace(out, self.layout.class_status_offset),
                        self.layout.class_status_visibly_initialized as i8,
                    );
                    self.asm.j(Condition::Below, entry);
                }
                self.asm.bind(exit);
            }
            ClassLoadKind::JitTableAddress => {
                let out = out_loc.as_register();
                self.asm
                    .movl_reg_mem(out, Address::absolute(PLACEHOLDER_32BIT_OFFSET));
                let label = self.asm.create_label();
                self.asm.bind(label);
                self.patches
                    .record_jit_class_root(TypeReference { dex_file: 0, type_index }, label);
                self.generate_gc_root_barrier(id, out_loc)?;
            }
        }
        Ok(())
    }

    fn emit_load_string(
        &mut self,
        id: InstrId,
        string_index: u32,
        load_kind: StringLoadKind,
    ) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        let out_loc = locations.out();
        match load_kind {
            StringLoadKind::RuntimeCall => {
                self.asm.movl_reg_imm(Register::EAX, string_index as i32);
                return self.invoke_runtime(QuickEntrypoint::ResolveString, id);
            }
            StringLoadKind::BootImageLinkTimePcRelative => {
                let base = locations.in_at(0).as_register();
                let base_id = instr.inputs[0];
                let out = out_loc.as_register();
                self.asm
                    .leal(out, Address::displace(base, PLACEHOLDER_32BIT_OFFSET));
                let label = self.asm.create_label();
                self.asm.bind(label);
                self.patches.record_boot_image_string(
                    Some(base_id),
                    StringReference { dex_file: 0, string_index },
                    label,
                );
            }
            StringLoadKind::BootImageRelRo => {
                let base = locations.in_at(0).as_register();
                let base_id = instr.inputs[0];
                let out = out_loc.as_register();
                self.asm
                    .movl_reg_mem(out, Address::displace(base, PLACEHOLDER_32BIT_OFFSET));
                let label = self.asm.create_label();
                self.asm.bind(label);
                self.patches
                    .record_boot_image_other(Some(base_id), string_index, label);
            }
            StringLoadKind::BssEntry => {
                let base = locations.in_at(0).as_register();
                let base_id = instr.inputs[0];
                let out = out_loc.as_register();
                self.asm
                    .movl_reg_mem(out, Address::displace(base, PLACEHOLDER_32BIT_OFFSET));
                let label = self.asm.create_label();
                self.asm.bind(label);
                self.patches.record_string_bss_entry(
                    Some(base_id),
                    StringReference { dex_file: 0, string_index },
                    label,
                );
                self.generate_gc_root_barrier(id, out_loc)?;
                let path = LoadStringSlowPath::new(self, id, string_index);
                let entry = path.entry_label();
                let exit = path.exit_label();
                self.slow_paths.push(Box::new(path));
                self.asm.testl_reg_reg(out, out);
                self.asm.j(Condition::Equal, entry);
                self.asm.bind(exit);
            }
            StringLoadKind::JitTableAddress => {
                let out = out_loc.as_register();
                self.asm
                    .movl_reg_mem(out, Address::absolute(PLACEHOLDER_32BIT_OFFSET));
                let label = self.asm.create_label();
                self.asm.bind(label);
                self.patches.record_jit_string_root(
                    StringReference { dex_file: 0, string_index },
                    label,
                );
                self.generate_gc_root_barrier(id, out_loc)?;
            }
        }
        Ok(())
    }

    fn emit_clinit_check(&mut self, id: InstrId) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let g = self.graph;
        let instr = g.instr(id);
        let type_index = match g.instr(instr.inputs[0]).kind {
            HInstructionKind::LoadClass { type_index, .. } => type_index,
            _ => 0,
        };
        let class = instr.locations().in_at(0).as_register();
        let path = LoadClassSlowPath::new(self, id, type_index, true, false);
        let entry = path.entry_label();
        let exit = path.exit_label();
        self.slow_paths.push(Box::new(path));
        self.asm.cmpb_mem_imm(
            Address::displace(class, self.layout.class_status_offset),
            self.layout.class_status_visibly_initialized as i8,
        );
        self.asm.j(Condition::Below, entry);
        self.asm.bind(exit);
        Ok(())
    }
}

// === Invokes and conversions ==============================================

impl<'g, 'arena> CodeGeneratorX86<'g, 'arena> {
    fn emit_invoke_static_or_direct(
        &mut self,
        id: InstrId,
        method_index: u32,
        load_kind: MethodLoadKind,
    ) -> CompileResult<()> {
        self.stage_inputs(id)?;
        match load_kind {
            MethodLoadKind::StringInit { entrypoint_offset } => {
                self.asm.fs_prefix();
                self.asm.call_mem(Address::absolute(entrypoint_offset as i32));
                self.record_pc_info(id);
                return Ok(());
            }
            MethodLoadKind::Recursive => {
                self.asm
                    .movl_reg_mem(Register::EAX, Address::displace(Register::ESP, 0));
                self.asm.call_label(self.frame_entry_label);
                self.record_pc_info(id);
                return Ok(());
            }
            MethodLoadKind::RuntimeCall => {
                return self.invoke_runtime(QuickEntrypoint::QuickResolutionTrampoline, id);
            }
            _ => {}
        }
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        let temp = locations.temp(0).as_register();
        if let MethodLoadKind::JitDirectAddress { address } = load_kind {
            self.asm.movl_reg_imm(temp, address as i32);
        } else {
            debug_assert!(method_load_kind_uses_base(load_kind));
            let base_index = instr.inputs.len() - 1;
            let base = locations.in_at(base_index).as_register();
            let base_id = instr.inputs[base_index];
            let reference = MethodReference { dex_file: 0, index: method_index };
            match load_kind {
                MethodLoadKind::BootImageLinkTimePcRelative => {
                    self.asm
                        .leal(temp, Address::displace(base, PLACEHOLDER_32BIT_OFFSET));
                    let label = self.asm.create_label();
                    self.asm.bind(label);
                    self.patches
                        .record_boot_image_method(Some(base_id), reference, label);
                }
                MethodLoadKind::BootImageRelRo => {
                    self.asm
                        .movl_reg_mem(temp, Address::displace(base, PLACEHOLDER_32BIT_OFFSET));
                    let label = self.asm.create_label();
                    self.asm.bind(label);
                    self.patches
                        .record_boot_image_other(Some(base_id), method_index, label);
                }
                MethodLoadKind::AppImageRelRo => {
                    self.asm
                        .movl_reg_mem(temp, Address::displace(base, PLACEHOLDER_32BIT_OFFSET));
                    let label = self.asm.create_label();
                    self.asm.bind(label);
                    self.patches
                        .record_app_image_method(Some(base_id), reference, label);
                }
                MethodLoadKind::BssEntry => {
                    self.asm
                        .movl_reg_mem(temp, Address::displace(base, PLACEHOLDER_32BIT_OFFSET));
                    let label = self.asm.create_label();
                    self.asm.bind(label);
                    self.patches
                        .record_method_bss_entry(Some(base_id), reference, label);
                }
                _ => {
                    return Err(CompileError::CodeGeneration {
                        reason: format!("unexpected method load kind {:?}", load_kind),
                    })
                }
            }
        }
        if temp != METHOD_REGISTER {
            self.asm.movl_reg_reg(METHOD_REGISTER, temp);
        }
        self.asm.call_mem(Address::displace(
            METHOD_REGISTER,
            self.layout.method_quick_code_offset,
        ));
        self.record_pc_info(id);
        Ok(())
    }

    fn emit_invoke_virtual(&mut self, id: InstrId, vtable_index: u32) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let locations = self.graph.instr(id).locations();
        let temp = locations.temp(0).as_register();
        let receiver = locations.in_at(0).as_register();
        self.asm.movl_reg_mem(
            temp,
            Address::displace(receiver, self.layout.object_class_offset),
        );
        if self.options.implicit_null_checks {
            // The class load doubles as the receiver null check.
            self.record_pc_info(id);
        }
        self.asm.maybe_unpoison_heap_reference(temp);
        self.asm.movl_reg_mem(
            temp,
            Address::displace(temp, self.layout.embedded_vtable_entry_offset(vtable_index)),
        );
        if temp != METHOD_REGISTER {
            self.asm.movl_reg_reg(METHOD_REGISTER, temp);
        }
        self.asm.call_mem(Address::displace(
            METHOD_REGISTER,
            self.layout.method_quick_code_offset,
        ));
        self.record_pc_info(id);
        Ok(())
    }

    fn emit_invoke_interface(&mut self, id: InstrId, method_index: u32, imt_index: u32) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let locations = self.graph.instr(id).locations();
        let temp = locations.temp(0).as_register();
        let receiver = locations.in_at(0).as_register();
        self.asm.movl_reg_mem(
            temp,
            Address::displace(receiver, self.layout.object_class_offset),
        );
        if self.options.implicit_null_checks {
            self.record_pc_info(id);
        }
        self.asm.maybe_unpoison_heap_reference(temp);
        // The conflict trampoline finds the interface method index in XMM7.
        self.asm.movl_reg_imm(Register::EAX, method_index as i32);
        self.asm.movd_xmm_reg(HIDDEN_INTERFACE_ARGUMENT, Register::EAX);
        self.asm.movl_reg_mem(
            temp,
            Address::displace(temp, self.layout.imt_entry_offset(imt_index)),
        );
        if temp != METHOD_REGISTER {
            self.asm.movl_reg_reg(METHOD_REGISTER, temp);
        }
        self.asm.call_mem(Address::displace(
            METHOD_REGISTER,
            self.layout.method_quick_code_offset,
        ));
        self.record_pc_info(id);
        Ok(())
    }

    fn emit_type_conversion(&mut self, id: InstrId) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let g = self.graph;
        let instr = g.instr(id);
        let locations = instr.locations();
        let source_ty = g.instr(instr.inputs[0]).ty;
        let input = locations.in_at(0);
        match instr.ty {
            DataType::Int8 | DataType::Uint8 => {
                let out = locations.out().as_register();
                match input {
                    Location::Register(reg) => {
                        if instr.ty == DataType::Int8 {
                            self.asm.movsxb_reg_reg(out, reg);
                        } else {
                            self.asm.movzxb_reg_reg(out, reg);
                        }
                    }
                    Location::Constant(cid) => {
                        let v = self.constant_i64(cid);
                        let truncated = if instr.ty == DataType::Int8 {
                            v as i8 as i32
                        } else {
                            v as u8 as i32
                        };
                        self.asm.movl_reg_imm(out, truncated);
                    }
                    other => {
                        return Err(CompileError::InvalidLocation {
                            context: "byte conversion input",
                            reason: format!("{:?}", other),
                        })
                    }
                }
            }
            DataType::Int16 | DataType::Uint16 => {
                let out = locations.out().as_register();
                match input {
                    Location::Register(reg) => {
                        if instr.ty == DataType::Int16 {
                            self.asm.movsxw_reg_reg(out, reg);
                        } else {
                            self.asm.movzxw_reg_reg(out, reg);
                        }
                    }
                    Location::StackSlot(off) => {
                        let addr = Address::displace(Register::ESP, off);
                        if instr.ty == DataType::Int16 {
                            self.asm.movsxw_reg_mem(out, addr);
                        } else {
                            self.asm.movzxw_reg_mem(out, addr);
                        }
                    }
                    Location::Constant(cid) => {
                        let v = self.constant_i64(cid);
                        let truncated = if instr.ty == DataType::Int16 {
                            v as i16 as i32
                        } else {
                            v as u16 as i32
                        };
                        self.asm.movl_reg_imm(out, truncated);
                    }
                    other => {
                        return Err(CompileError::InvalidLocation {
                            context: "half-word conversion input",
                            reason: format!("{:?}", other),
                        })
                    }
                }
            }
            DataType::Int32 => match source_ty {
                DataType::Int64 | DataType::Uint64 => {
                    let out = locations.out().as_register();
                    match input {
                        Location::RegisterPair(lo, _) => self.asm.movl_reg_reg(out, lo),
                        Location::DoubleStackSlot(off) => {
                            self.asm.movl_reg_mem(out, Address::displace(Register::ESP, off))
                        }
                        Location::Constant(cid) => {
                            let v = self.constant_i64(cid);
                            self.asm.movl_reg_imm(out, v as i32);
                        }
                        other => {
                            return Err(CompileError::InvalidLocation {
                                context: "long-to-int input",
                                reason: format!("{:?}", other),
                            })
                        }
                    }
                }
                DataType::Float32 | DataType::Float64 => {
                    self.emit_fp_to_int32(id, source_ty == DataType::Float64)?;
                }
                other => {
                    return Err(CompileError::UnimplementedTypeCombination {
                        operation: "conversion to Int32",
                        ty: other.to_string(),
                    })
                }
            },
            DataType::Int64 => match source_ty {
                DataType::Float32 => return self.invoke_runtime(QuickEntrypoint::F2l, id),
                DataType::Float64 => return self.invoke_runtime(QuickEntrypoint::D2l, id),
                _ => {
                    // Input pinned to EAX, result to EAX:EDX.
                    self.asm.cdq();
                }
            },
            DataType::Float32 => match source_ty {
                DataType::Int64 | DataType::Uint64 => self.emit_long_to_fp(id, false)?,
                DataType::Float64 => {
                    let out = locations.out().as_fpu_register();
                    self.asm.cvtsd2ss_reg_reg(out, input.as_fpu_register());
                }
                _ => {
                    let out = locations.out().as_fpu_register();
                    self.asm.cvtsi2ss_reg_reg(out, input.as_register());
                }
            },
            DataType::Float64 => match source_ty {
                DataType::Int64 | DataType::Uint64 => self.emit_long_to_fp(id, true)?,
                DataType::Float32 => {
                    let out = locations.out().as_fpu_register();
                    self.asm.cvtss2sd_reg_reg(out, input.as_fpu_register());
                }
                _ => {
                    let out = locations.out().as_fpu_register();
                    self.asm.cvtsi2sd_reg_reg(out, input.as_register());
                }
            },
            other => {
                return Err(CompileError::UnimplementedTypeCombination {
                    operation: "conversion",
                    ty: other.to_string(),
                })
            }
        }
        Ok(())
    }

    /// Saturating FP-to-int: too-large values clamp to INT_MAX, NaN to zero,
    /// everything else truncates.
    fn emit_fp_to_int32(&mut self, id: InstrId, is_double: bool) -> CompileResult<()> {
        let locations = self.graph.instr(id).locations();
        let input = locations.in_at(0).as_fpu_register();
        let out = locations.out().as_register();
        let temp = locations.temp(0).as_fpu_register();
        let done = self.asm.create_label();
        let nan = self.asm.create_label();
        self.asm.movl_reg_imm(out, i32::MAX);
        if is_double {
            self.asm.cvtsi2sd_reg_reg(temp, out);
            self.asm.ucomisd_reg_reg(input, temp);
        } else {
            self.asm.cvtsi2ss_reg_reg(temp, out);
            self.asm.ucomiss_reg_reg(input, temp);
        }
        self.asm.j(Condition::AboveEqual, done);
        self.asm.j(Condition::ParityEven, nan);
        if is_double {
            self.asm.cvttsd2si_reg_reg(out, input);
        } else {
            self.asm.cvttss2si_reg_reg(out, input);
        }
        self.asm.jmp_label(done);
        self.asm.bind(nan);
        self.asm.xorl_reg_reg(out, out);
        self.asm.bind(done);
        Ok(())
    }

    /// int64 to float/double goes through the x87 unit, which converts a
    /// 64-bit integer in one instruction.
    fn emit_long_to_fp(&mut self, id: InstrId, is_double: bool) -> CompileResult<()> {
        let locations = self.graph.instr(id).locations();
        let input = locations.in_at(0);
        let out = locations.out().as_fpu_register();
        match input {
            Location::RegisterPair(lo, hi) => {
                self.asm.pushl_reg(hi);
                self.asm.pushl_reg(lo);
                self.asm.fildll(Address::displace(Register::ESP, 0));
            }
            Location::Constant(cid) => {
                let v = self.constant_i64(cid);
                self.asm.pushl_imm((v >> 32) as i32);
                self.asm.pushl_imm(v as i32);
                self.asm.fildll(Address::displace(Register::ESP, 0));
            }
            Location::DoubleStackSlot(off) => {
                self.asm.fildll(Address::displace(Register::ESP, off));
                self.asm.subl_reg_imm(Register::ESP, 8);
            }
            other => {
                return Err(CompileError::InvalidLocation {
                    context: "long-to-fp input",
                    reason: format!("{:?}", other),
                })
            }
        }
        if is_double {
            self.asm.fstpl(Address::displace(Register::ESP, 0));
            self.asm.movsd_reg_mem(out, Address::displace(Register::ESP, 0));
        } else {
            self.asm.fstps(Address::displace(Register::ESP, 0));
            self.asm.movss_reg_mem(out, Address::displace(Register::ESP, 0));
        }
        self.asm.addl_reg_imm(Register::ESP, 8);
        Ok(())
    }

    fn emit_memory_barrier(&mut self, kind: MemBarrierKind) {
        // x86 TSO already orders everything except store-load and
        // non-temporal stores.
        match kind {
            MemBarrierKind::AnyAny | MemBarrierKind::NTStoreStore => self.asm.mfence(),
            _ => {}
        }
    }

    /// Materialize the method's code start address. The call pushes the
    /// address of the pop; subtracting its code offset yields offset zero.
    fn emit_base_method_address(&mut self, id: InstrId) -> CompileResult<()> {
        let out = self.graph.instr(id).locations().out().as_register();
        self.asm.call_next_instruction();
        let anchor = self.asm.code_size() as u32;
        self.method_address_offsets.insert(id, anchor);
        self.asm.popl_reg(out);
        self.asm.subl_reg_imm(out, anchor as i32);
        Ok(())
    }

    fn emit_constant_table_load(&mut self, id: InstrId) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let g = self.graph;
        let instr = g.instr(id);
        let locations = instr.locations();
        let base = locations.in_at(0).as_register();
        match g.instr(instr.inputs[1]).kind {
            HInstructionKind::FloatConstant(v) => {
                let out = locations.out().as_fpu_register();
                let addr = self.asm.literal_float_address(v, base);
                self.asm.movss_reg_mem(out, addr);
            }
            HInstructionKind::DoubleConstant(v) => {
                let out = locations.out().as_fpu_register();
                let addr = self.asm.literal_double_address(v, base);
                self.asm.movsd_reg_mem(out, addr);
            }
            HInstructionKind::IntConstant(v) => {
                let out = locations.out().as_register();
                let addr = self.asm.literal_int32_address(v, base);
                self.asm.movl_reg_mem(out, addr);
            }
            ref other => {
                return Err(CompileError::CodeGeneration {
                    reason: format!("constant table load from {}", other.name()),
                })
            }
        }
        Ok(())
    }

    /// FP negation against a sign-bit mask in the constant area, avoiding
    /// the push/load sequence of the generic lowering.
    fn emit_fp_neg_via_constant_area(&mut self, id: InstrId) -> CompileResult<()> {
        self.stage_inputs(id)?;
        let instr = self.graph.instr(id);
        let locations = instr.locations();
        let base = locations.in_at(1).as_register();
        let out = locations.out().as_fpu_register();
        if instr.ty == DataType::Float64 {
            let addr = self.asm.literal_int64_address(i64::MIN, base);
            self.asm.xorpd_reg_mem(out, addr);
        } else {
            let addr = self.asm.literal_int32_address(i32::MIN, base);
            self.asm.xorps_reg_mem(out, addr);
        }
        Ok(())
    }

    fn emit_method_hook(&mut self, id: InstrId, is_entry: bool) -> CompileResult<()> {
        let path = MethodHookSlowPath::new(self, id, is_entry);
        let entry = path.entry_label();
        let exit = path.exit_label();
        self.slow_paths.push(Box::new(path));
        self.asm.fs_prefix();
        self.asm.cmpb_mem_imm(
            Address::absolute(self.layout.instrumentation_hooks_offset),
            0,
        );
        self.asm.j(Condition::NotEqual, entry);
        if !is_entry {
            self.asm.fs_prefix();
            self.asm.cmpb_mem_imm(
                Address::absolute(self.layout.deopt_check_required_offset),
                0,
            );
            self.asm.j(Condition::NotEqual, entry);
        }
        self.asm.bind(exit);
        Ok(())
    }
}

// === Finalization =========================================================

impl<'g, 'arena> CodeGeneratorX86<'g, 'arena> {
    /// Emit out-of-line code and append the constant area. Jump-table slots
    /// are filled with absolute code offsets once every label is bound.
    fn finalize_code(&mut self) -> CompileResult<()> {
        let mut paths = std::mem::take(&mut self.slow_paths);
        for path in paths.iter_mut() {
            trace!("slow path: {}", path.description());
            path.emit_native_code(self)?;
        }
        if !self.asm.is_constant_area_empty() || !self.jump_tables.is_empty() {
            let area_start = self.asm.add_constant_area() as i32;
            let tables = std::mem::take(&mut self.jump_tables);
            for table in &tables {
                for (i, &target) in table.targets.iter().enumerate() {
                    let position = (area_start + table.area_offset) as usize + i * 4;
                    let offset = self.asm.label_position(self.block_labels[target.index()]);
                    self.asm.patch_i32_at(position, offset as i32);
                }
            }
        }
        Ok(())
    }

    /// Package the generated code with its metadata.
    pub fn into_compiled_method(self) -> CompiledMethod {
        let linker_patches = self
            .patches
            .linker_patches(&self.asm, &self.method_address_offsets);
        let number_of_jit_roots = self.patches.number_of_jit_roots() as u32;
        let stack_maps = self.stack_maps.encode();
        let mut core_spill_mask = 0u32;
        for &reg in &self.core_spills {
            core_spill_mask |= 1 << reg.encoding();
        }
        let cfi = self.asm.cfi_data().to_vec();
        CompiledMethod {
            code: self.asm.finalize(),
            frame_size: self.frame_size,
            core_spill_mask,
            fpu_spill_mask: 0,
            stack_maps,
            cfi,
            linker_patches,
            number_of_jit_roots,
        }
    }

    /// Rewrite JIT root slots in `code` once the root table address is known.
    pub fn patch_jit_roots(&self, code: &mut [u8], roots_data_address: u32) {
        self.patches.patch_jit_roots(&self.asm, code, roots_data_address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CompilationKind, CompilationSession};
    use crate::graph::instruction::NO_DEX_PC;
    use crate::locations::{CallKind, LocationSummary};
    use bumpalo::Bump;

    fn compile(graph: &HGraph, options: CompilerOptions) -> (Vec<u8>, u32, usize) {
        let mut codegen = CodeGeneratorX86::new(
            graph,
            RuntimeLayout::for_testing(),
            CpuFeatures::default(),
            options,
        );
        codegen.compile().unwrap();
        let frame_size = codegen.frame_size();
        let num_maps = codegen.stack_map_stream().num_entries();
        let method = codegen.into_compiled_method();
        (method.code, frame_size, num_maps)
    }

    fn leaf_graph<'a>(session: &CompilationSession<'a>) -> HGraph<'a> {
        let mut graph = HGraph::new(session, "leaf");
        let entry = graph.entry_block();
        let exit = graph.add_block();
        graph.set_exit_block(exit);
        graph.connect(entry, exit);
        graph.add_instruction(entry, HInstructionKind::ReturnVoid, DataType::Void, vec![], 0);
        graph.add_instruction(exit, HInstructionKind::Exit, DataType::Void, vec![], NO_DEX_PC);
        graph.compute_reverse_post_order();
        graph
    }

    #[test]
    fn test_leaf_frame_layout() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let graph = leaf_graph(&session);
        let (code, frame_size, num_maps) = compile(&graph, CompilerOptions::default());
        // Method slot plus return address, aligned to 16.
        assert_eq!(frame_size, 16);
        assert_eq!(num_maps, 0);
        assert!(!code.is_empty());
        assert!(code.contains(&0xc3), "missing ret");
    }

    #[test]
    fn test_goto_to_next_block_is_elided() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let leaf = leaf_graph(&session);
        let (leaf_code, _, _) = compile(&leaf, CompilerOptions::default());

        let mut graph = HGraph::new(&session, "goto");
        let entry = graph.entry_block();
        let body = graph.add_block();
        let exit = graph.add_block();
        graph.set_exit_block(exit);
        graph.connect(entry, body);
        graph.connect(body, exit);
        graph.add_instruction(entry, HInstructionKind::Goto, DataType::Void, vec![], 0);
        graph.add_instruction(body, HInstructionKind::ReturnVoid, DataType::Void, vec![], 0);
        graph.add_instruction(exit, HInstructionKind::Exit, DataType::Void, vec![], NO_DEX_PC);
        graph.compute_reverse_post_order();
        let (code, _, _) = compile(&graph, CompilerOptions::default());
        assert_eq!(code.len(), leaf_code.len());
    }

    #[test]
    fn test_implicit_null_check_records_stack_map() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut graph = HGraph::new(&session, "null_check");
        let entry = graph.entry_block();
        let exit = graph.add_block();
        graph.set_exit_block(exit);
        graph.connect(entry, exit);
        let param = graph.add_instruction(
            entry,
            HInstructionKind::ParameterValue { index: 0 },
            DataType::Reference,
            vec![],
            0,
        );
        let mut param_summary = LocationSummary::new(CallKind::NoCall);
        param_summary.set_out(Location::Register(Register::ECX));
        graph.set_locations(param, param_summary);
        let check = graph.add_instruction(
            entry,
            HInstructionKind::NullCheck,
            DataType::Reference,
            vec![param],
            1,
        );
        let mut check_summary = LocationSummary::new(CallKind::NoCall);
        check_summary.set_in_at(0, Location::Register(Register::ECX));
        check_summary.set_out(Location::Register(Register::ECX));
        graph.set_locations(check, check_summary);
        graph.add_instruction(entry, HInstructionKind::ReturnVoid, DataType::Void, vec![], 2);
        graph.add_instruction(exit, HInstructionKind::Exit, DataType::Void, vec![], NO_DEX_PC);
        graph.compute_reverse_post_order();

        let (_, _, num_maps) = compile(&graph, CompilerOptions::default());
        assert_eq!(num_maps, 1);
    }

    #[test]
    fn test_baseline_emits_hotness_check() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let graph = leaf_graph(&session);
        let (optimized, _, _) = compile(&graph, CompilerOptions::default());
        let baseline_options = CompilerOptions {
            compilation_kind: CompilationKind::Baseline,
            ..CompilerOptions::default()
        };
        let (baseline, _, _) = compile(&graph, baseline_options);
        assert!(baseline.len() > optimized.len());
    }

    #[test]
    fn test_magic_division_constants() {
        assert_eq!(magic_for_division(3), (0x5555_5556, 0));
        assert_eq!(magic_for_division(5), (0x6666_6667, 1));
        assert_eq!(magic_for_division(7), (0x9249_2493_u32 as i32, 2));
        assert_eq!(magic_for_division(-5), ((0x6666_6667_u32 as i32).wrapping_neg(), 1));
    }
}
