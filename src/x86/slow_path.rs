// This module holds the out-of-line code fragments scheduled during the main
// emission pass. A slow path owns an entry label (jumped to from the fast
// path) and an exit label (the resume point); its body is emitted after all
// blocks, so the fast path stays straight-line. Paths that call the runtime
// save and restore the caller's recorded live registers around the call and
// record a safepoint; fatal paths (throws, deoptimization) never return and
// skip the save. Argument staging into the runtime calling convention
// (EAX/ECX/EDX/EBX) goes through the parallel move resolver so sources that
// alias argument registers are handled correctly.

//! Out-of-line slow paths.

use crate::core::CompileResult;
use crate::graph::instruction::DeoptimizationKind;
use crate::graph::{BlockId, DataType, InstrId};
use crate::locations::Location;
use crate::runtime::QuickEntrypoint;
use crate::x86::assembler::{Address, Label};
use crate::x86::codegen::CodeGeneratorX86;
use crate::x86::{Register, RUNTIME_ARGUMENT_REGISTERS};

/// An out-of-line code fragment.
pub trait SlowPathCode {
    fn entry_label(&self) -> Label;
    fn exit_label(&self) -> Label;
    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()>;
    /// Fatal paths never jump back to the fast path.
    fn is_fatal(&self) -> bool {
        false
    }
    fn description(&self) -> &'static str;
}

fn new_labels(codegen: &mut CodeGeneratorX86) -> (Label, Label) {
    let entry = codegen.assembler().create_label();
    let exit = codegen.assembler().create_label();
    (entry, exit)
}

// === Throwing checks ======================================================

pub struct NullCheckSlowPath {
    instruction: InstrId,
    entry: Label,
    exit: Label,
}

impl NullCheckSlowPath {
    pub fn new(codegen: &mut CodeGeneratorX86, instruction: InstrId) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { instruction, entry, exit }
    }
}

impl SlowPathCode for NullCheckSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        codegen.assembler().bind(self.entry);
        codegen.invoke_runtime(QuickEntrypoint::ThrowNullPointer, self.instruction)
    }

    fn is_fatal(&self) -> bool {
        true
    }

    fn description(&self) -> &'static str {
        "NullCheckSlowPath"
    }
}

pub struct BoundsCheckSlowPath {
    instruction: InstrId,
    index: Location,
    length: Location,
    is_string_char_at: bool,
    entry: Label,
    exit: Label,
}

impl BoundsCheckSlowPath {
    pub fn new(
        codegen: &mut CodeGeneratorX86,
        instruction: InstrId,
        index: Location,
        length: Location,
        is_string_char_at: bool,
    ) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { instruction, index, length, is_string_char_at, entry, exit }
    }
}

impl SlowPathCode for BoundsCheckSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        codegen.assembler().bind(self.entry);
        codegen.emit_parallel_moves(&[
            (
                self.index,
                Location::Register(RUNTIME_ARGUMENT_REGISTERS[0]),
                DataType::Int32,
            ),
            (
                self.length,
                Location::Register(RUNTIME_ARGUMENT_REGISTERS[1]),
                DataType::Int32,
            ),
        ])?;
        let entrypoint = if self.is_string_char_at {
            QuickEntrypoint::ThrowStringBounds
        } else {
            QuickEntrypoint::ThrowArrayBounds
        };
        codegen.invoke_runtime(entrypoint, self.instruction)
    }

    fn is_fatal(&self) -> bool {
        true
    }

    fn description(&self) -> &'static str {
        "BoundsCheckSlowPath"
    }
}

pub struct DivZeroCheckSlowPath {
    instruction: InstrId,
    entry: Label,
    exit: Label,
}

impl DivZeroCheckSlowPath {
    pub fn new(codegen: &mut CodeGeneratorX86, instruction: InstrId) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { instruction, entry, exit }
    }
}

impl SlowPathCode for DivZeroCheckSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        codegen.assembler().bind(self.entry);
        codegen.invoke_runtime(QuickEntrypoint::ThrowDivZero, self.instruction)
    }

    fn is_fatal(&self) -> bool {
        true
    }

    fn description(&self) -> &'static str {
        "DivZeroCheckSlowPath"
    }
}

/// INT_MIN / -1 overflows idiv; the quotient is INT_MIN and the remainder 0.
pub struct DivRemMinusOneSlowPath {
    result: Register,
    is_div: bool,
    entry: Label,
    exit: Label,
}

impl DivRemMinusOneSlowPath {
    pub fn new(codegen: &mut CodeGeneratorX86, result: Register, is_div: bool) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { result, is_div, entry, exit }
    }
}

impl SlowPathCode for DivRemMinusOneSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        let asm = codegen.assembler();
        asm.bind(self.entry);
        if self.is_div {
            // Dividend is still in the result register; negating it yields
            // INT_MIN again, the wrapped quotient.
            asm.negl(self.result);
        } else {
            asm.xorl_reg_reg(self.result, self.result);
        }
        asm.jmp_label(self.exit);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "DivRemMinusOneSlowPath"
    }
}

// === Suspend check ========================================================

pub struct SuspendCheckSlowPath {
    instruction: InstrId,
    /// Jump target after the runtime call; `None` resumes at the exit label.
    successor: Option<BlockId>,
    entry: Label,
    exit: Label,
}

impl SuspendCheckSlowPath {
    pub fn new(
        codegen: &mut CodeGeneratorX86,
        instruction: InstrId,
        successor: Option<BlockId>,
    ) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { instruction, successor, entry, exit }
    }
}

impl SlowPathCode for SuspendCheckSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        codegen.assembler().bind(self.entry);
        codegen.save_live_registers(self.instruction);
        codegen.invoke_runtime(QuickEntrypoint::TestSuspend, self.instruction)?;
        codegen.restore_live_registers(self.instruction);
        let target = match self.successor {
            Some(block) => codegen.block_label(block),
            None => self.exit,
        };
        codegen.assembler().jmp_label(target);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "SuspendCheckSlowPath"
    }
}

// === Resolution ===========================================================

pub struct LoadStringSlowPath {
    instruction: InstrId,
    string_index: u32,
    entry: Label,
    exit: Label,
}

impl LoadStringSlowPath {
    pub fn new(codegen: &mut CodeGeneratorX86, instruction: InstrId, string_index: u32) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { instruction, string_index, entry, exit }
    }
}

impl SlowPathCode for LoadStringSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        let out = codegen.graph().instr(self.instruction).locations().out();
        codegen.assembler().bind(self.entry);
        codegen.save_live_registers(self.instruction);
        codegen
            .assembler()
            .movl_reg_imm(RUNTIME_ARGUMENT_REGISTERS[0], self.string_index as i32);
        codegen.invoke_runtime(QuickEntrypoint::ResolveString, self.instruction)?;
        codegen.move32(out, Location::Register(Register::EAX))?;
        codegen.restore_live_registers(self.instruction);
        codegen.assembler().jmp_label(self.exit);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "LoadStringSlowPath"
    }
}

pub struct LoadClassSlowPath {
    instruction: InstrId,
    type_index: u32,
    /// Run static initialization rather than mere resolution.
    do_clinit: bool,
    check_access: bool,
    entry: Label,
    exit: Label,
}

impl LoadClassSlowPath {
    pub fn new(
        codegen: &mut CodeGeneratorX86,
        instruction: InstrId,
        type_index: u32,
        do_clinit: bool,
        check_access: bool,
    ) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { instruction, type_index, do_clinit, check_access, entry, exit }
    }
}

impl SlowPathCode for LoadClassSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        let out = codegen.graph().instr(self.instruction).locations().out();
        codegen.assembler().bind(self.entry);
        codegen.save_live_registers(self.instruction);
        codegen
            .assembler()
            .movl_reg_imm(RUNTIME_ARGUMENT_REGISTERS[0], self.type_index as i32);
        let entrypoint = if self.do_clinit {
            QuickEntrypoint::InitializeStaticStorage
        } else if self.check_access {
            QuickEntrypoint::ResolveTypeAndVerifyAccess
        } else {
            QuickEntrypoint::ResolveType
        };
        codegen.invoke_runtime(entrypoint, self.instruction)?;
        if out != Location::NoLocation {
            codegen.move32(out, Location::Register(Register::EAX))?;
        }
        codegen.restore_live_registers(self.instruction);
        codegen.assembler().jmp_label(self.exit);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "LoadClassSlowPath"
    }
}

// === Type checks ==========================================================

pub struct TypeCheckSlowPath {
    instruction: InstrId,
    object: Location,
    class: Location,
    fatal: bool,
    entry: Label,
    exit: Label,
}

impl TypeCheckSlowPath {
    pub fn new(
        codegen: &mut CodeGeneratorX86,
        instruction: InstrId,
        object: Location,
        class: Location,
        fatal: bool,
    ) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { instruction, object, class, fatal, entry, exit }
    }
}

impl SlowPathCode for TypeCheckSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        let out = codegen.graph().instr(self.instruction).locations().out();
        codegen.assembler().bind(self.entry);
        if !self.fatal {
            codegen.save_live_registers(self.instruction);
        }
        codegen.emit_parallel_moves(&[
            (
                self.object,
                Location::Register(RUNTIME_ARGUMENT_REGISTERS[0]),
                DataType::Reference,
            ),
            (
                self.class,
                Location::Register(RUNTIME_ARGUMENT_REGISTERS[1]),
                DataType::Reference,
            ),
        ])?;
        if self.fatal {
            // CheckCast failure throws; no resume.
            codegen.invoke_runtime(QuickEntrypoint::CheckInstanceOf, self.instruction)
        } else {
            codegen.invoke_runtime(QuickEntrypoint::InstanceofNonTrivial, self.instruction)?;
            codegen.move32(out, Location::Register(Register::EAX))?;
            codegen.restore_live_registers(self.instruction);
            codegen.assembler().jmp_label(self.exit);
            Ok(())
        }
    }

    fn is_fatal(&self) -> bool {
        self.fatal
    }

    fn description(&self) -> &'static str {
        "TypeCheckSlowPath"
    }
}

// === Array stores =========================================================

pub struct ArraySetSlowPath {
    instruction: InstrId,
    entry: Label,
    exit: Label,
}

impl ArraySetSlowPath {
    pub fn new(codegen: &mut CodeGeneratorX86, instruction: InstrId) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { instruction, entry, exit }
    }
}

impl SlowPathCode for ArraySetSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        let locations = codegen.graph().instr(self.instruction).locations().clone();
        codegen.assembler().bind(self.entry);
        codegen.save_live_registers(self.instruction);
        codegen.emit_parallel_moves(&[
            (
                locations.in_at(0),
                Location::Register(RUNTIME_ARGUMENT_REGISTERS[0]),
                DataType::Reference,
            ),
            (
                locations.in_at(1),
                Location::Register(RUNTIME_ARGUMENT_REGISTERS[1]),
                DataType::Int32,
            ),
            (
                locations.in_at(2),
                Location::Register(RUNTIME_ARGUMENT_REGISTERS[2]),
                DataType::Reference,
            ),
        ])?;
        codegen.invoke_runtime(QuickEntrypoint::AputObject, self.instruction)?;
        codegen.restore_live_registers(self.instruction);
        codegen.assembler().jmp_label(self.exit);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "ArraySetSlowPath"
    }
}

// === Deoptimization =======================================================

pub struct DeoptimizationSlowPath {
    instruction: InstrId,
    kind: DeoptimizationKind,
    entry: Label,
    exit: Label,
}

impl DeoptimizationSlowPath {
    pub fn new(
        codegen: &mut CodeGeneratorX86,
        instruction: InstrId,
        kind: DeoptimizationKind,
    ) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { instruction, kind, entry, exit }
    }
}

impl SlowPathCode for DeoptimizationSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        codegen.assembler().bind(self.entry);
        codegen.save_live_registers(self.instruction);
        codegen
            .assembler()
            .movl_reg_imm(RUNTIME_ARGUMENT_REGISTERS[0], self.kind as i32);
        // Control transfers to the interpreter; no return.
        codegen.invoke_runtime(QuickEntrypoint::Deoptimize, self.instruction)
    }

    fn is_fatal(&self) -> bool {
        true
    }

    fn description(&self) -> &'static str {
        "DeoptimizationSlowPath"
    }
}

// === Read barriers ========================================================

/// Baker read barrier mark: the register-specialized entrypoint preserves
/// every register, so no live-register save is needed.
pub struct ReadBarrierMarkSlowPath {
    instruction: InstrId,
    reference: Register,
    entry: Label,
    exit: Label,
}

impl ReadBarrierMarkSlowPath {
    pub fn new(codegen: &mut CodeGeneratorX86, instruction: InstrId, reference: Register) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { instruction, reference, entry, exit }
    }
}

impl SlowPathCode for ReadBarrierMarkSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        let _ = self.instruction;
        codegen.assembler().bind(self.entry);
        let offset = codegen
            .layout()
            .entrypoint_offset(QuickEntrypoint::ReadBarrierMarkReg(self.reference));
        let asm = codegen.assembler();
        asm.fs_prefix();
        asm.call_mem(Address::absolute(offset));
        asm.jmp_label(self.exit);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "ReadBarrierMarkSlowPath"
    }
}

/// Mark a reference loaded from a field and, if marking moved it, publish the
/// new address back into the field with a compare-and-swap.
pub struct ReadBarrierMarkAndUpdateFieldSlowPath {
    instruction: InstrId,
    reference: Register,
    field_address: Address,
    temp: Register,
    entry: Label,
    exit: Label,
}

impl ReadBarrierMarkAndUpdateFieldSlowPath {
    pub fn new(
        codegen: &mut CodeGeneratorX86,
        instruction: InstrId,
        reference: Register,
        field_address: Address,
        temp: Register,
    ) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { instruction, reference, field_address, temp, entry, exit }
    }
}

impl SlowPathCode for ReadBarrierMarkAndUpdateFieldSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        let _ = self.instruction;
        codegen.assembler().bind(self.entry);
        let offset = codegen
            .layout()
            .entrypoint_offset(QuickEntrypoint::ReadBarrierMarkReg(self.reference));
        let done = codegen.assembler().create_near_label();
        let asm = codegen.assembler();
        asm.movl_reg_reg(self.temp, self.reference);
        asm.fs_prefix();
        asm.call_mem(Address::absolute(offset));
        // Unchanged reference means the field is already correct.
        asm.cmpl_reg_reg(self.temp, self.reference);
        asm.j_near(crate::x86::Condition::Equal, done)?;
        // CAS the field from the old address to the marked one. cmpxchg
        // requires the expected value in EAX.
        let needs_eax_spill = self.reference != Register::EAX && self.temp != Register::EAX;
        if needs_eax_spill {
            asm.pushl_reg(Register::EAX);
            asm.cfi_adjust_cfa_offset(4);
        }
        asm.movl_reg_reg(Register::EAX, self.temp);
        asm.lock_cmpxchgl(self.field_address, self.reference);
        if needs_eax_spill {
            asm.popl_reg(Register::EAX);
            asm.cfi_adjust_cfa_offset(-4);
        }
        asm.bind_near(done)?;
        asm.jmp_label(self.exit);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "ReadBarrierMarkAndUpdateFieldSlowPath"
    }
}

/// Non-Baker heap-reference read barrier; full runtime call.
pub struct ReadBarrierForHeapReferenceSlowPath {
    instruction: InstrId,
    out: Location,
    reference: Location,
    object: Location,
    offset: u32,
    entry: Label,
    exit: Label,
}

impl ReadBarrierForHeapReferenceSlowPath {
    pub fn new(
        codegen: &mut CodeGeneratorX86,
        instruction: InstrId,
        out: Location,
        reference: Location,
        object: Location,
        offset: u32,
    ) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { instruction, out, reference, object, offset, entry, exit }
    }
}

impl SlowPathCode for ReadBarrierForHeapReferenceSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        codegen.assembler().bind(self.entry);
        codegen.save_live_registers(self.instruction);
        codegen.emit_parallel_moves(&[
            (
                self.reference,
                Location::Register(RUNTIME_ARGUMENT_REGISTERS[0]),
                DataType::Reference,
            ),
            (
                self.object,
                Location::Register(RUNTIME_ARGUMENT_REGISTERS[1]),
                DataType::Reference,
            ),
        ])?;
        codegen
            .assembler()
            .movl_reg_imm(RUNTIME_ARGUMENT_REGISTERS[2], self.offset as i32);
        codegen.invoke_runtime(QuickEntrypoint::ReadBarrierSlow, self.instruction)?;
        codegen.move32(self.out, Location::Register(Register::EAX))?;
        codegen.restore_live_registers(self.instruction);
        codegen.assembler().jmp_label(self.exit);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "ReadBarrierForHeapReferenceSlowPath"
    }
}

/// Read barrier for a GC root load.
pub struct ReadBarrierForRootSlowPath {
    instruction: InstrId,
    out: Location,
    root: Location,
    entry: Label,
    exit: Label,
}

impl ReadBarrierForRootSlowPath {
    pub fn new(
        codegen: &mut CodeGeneratorX86,
        instruction: InstrId,
        out: Location,
        root: Location,
    ) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { instruction, out, root, entry, exit }
    }
}

impl SlowPathCode for ReadBarrierForRootSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        codegen.assembler().bind(self.entry);
        codegen.save_live_registers(self.instruction);
        codegen.move32(
            Location::Register(RUNTIME_ARGUMENT_REGISTERS[0]),
            self.root,
        )?;
        codegen.invoke_runtime(QuickEntrypoint::ReadBarrierForRootSlow, self.instruction)?;
        codegen.move32(self.out, Location::Register(Register::EAX))?;
        codegen.restore_live_registers(self.instruction);
        codegen.assembler().jmp_label(self.exit);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "ReadBarrierForRootSlowPath"
    }
}

// === Instrumentation ======================================================

/// Method entry/exit hook. When the per-thread trace buffer is active the
/// record is written inline with rdtsc; otherwise the instrumentation
/// entrypoint is called.
pub struct MethodHookSlowPath {
    instruction: InstrId,
    is_entry: bool,
    entry: Label,
    exit: Label,
}

impl MethodHookSlowPath {
    pub fn new(codegen: &mut CodeGeneratorX86, instruction: InstrId, is_entry: bool) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { instruction, is_entry, entry, exit }
    }
}

impl SlowPathCode for MethodHookSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        codegen.assembler().bind(self.entry);
        let saved = codegen.save_live_registers(self.instruction);
        let cursor_offset = codegen.layout().trace_buffer_cursor_offset;

        let call_runtime = codegen.assembler().create_near_label();
        let done = codegen.assembler().create_near_label();
        {
            let asm = codegen.assembler();
            // Fast path: an active trace buffer cursor means a fast-trace
            // listener; append (method, timestamp) without calling out.
            asm.fs_prefix();
            asm.movl_reg_mem(Register::ECX, Address::absolute(cursor_offset));
            asm.testl_reg_reg(Register::ECX, Register::ECX);
            asm.j_near(crate::x86::Condition::Equal, call_runtime)?;
            asm.rdtsc();
            // Records grow downward: method pointer, then the timestamp pair.
            asm.subl_reg_imm(Register::ECX, 12);
            let method = Address::displace(Register::ESP, saved as i32);
            asm.movl_reg_mem(Register::EBX, method);
            asm.movl_mem_reg(Address::displace(Register::ECX, 0), Register::EBX);
            asm.movl_mem_reg(Address::displace(Register::ECX, 4), Register::EAX);
            asm.movl_mem_reg(Address::displace(Register::ECX, 8), Register::EDX);
            asm.fs_prefix();
            asm.movl_mem_reg(Address::absolute(cursor_offset), Register::ECX);
            asm.jmp_near(done)?;
            asm.bind_near(call_runtime)?;
        }
        // Runtime path: method pointer is the first argument.
        let method = Address::displace(Register::ESP, saved as i32);
        codegen
            .assembler()
            .movl_reg_mem(RUNTIME_ARGUMENT_REGISTERS[0], method);
        let entrypoint = if self.is_entry {
            QuickEntrypoint::MethodEntryHook
        } else {
            QuickEntrypoint::MethodExitHook
        };
        codegen.invoke_runtime(entrypoint, self.instruction)?;
        codegen.assembler().bind_near(done)?;
        codegen.restore_live_registers(self.instruction);
        codegen.assembler().jmp_label(self.exit);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "MethodHookSlowPath"
    }
}

/// Hotness counter overflow: request optimized (re)compilation.
pub struct CompileOptimizedSlowPath {
    instruction: InstrId,
    entry: Label,
    exit: Label,
}

impl CompileOptimizedSlowPath {
    pub fn new(codegen: &mut CodeGeneratorX86, instruction: InstrId) -> Self {
        let (entry, exit) = new_labels(codegen);
        Self { instruction, entry, exit }
    }
}

impl SlowPathCode for CompileOptimizedSlowPath {
    fn entry_label(&self) -> Label {
        self.entry
    }

    fn exit_label(&self) -> Label {
        self.exit
    }

    fn emit_native_code(&mut self, codegen: &mut CodeGeneratorX86) -> CompileResult<()> {
        codegen.assembler().bind(self.entry);
        let saved = codegen.save_live_registers(self.instruction);
        let method = Address::displace(Register::ESP, saved as i32);
        codegen
            .assembler()
            .movl_reg_mem(RUNTIME_ARGUMENT_REGISTERS[0], method);
        codegen.invoke_runtime(QuickEntrypoint::CompileOptimized, self.instruction)?;
        codegen.restore_live_registers(self.instruction);
        codegen.assembler().jmp_label(self.exit);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "CompileOptimizedSlowPath"
    }
}
