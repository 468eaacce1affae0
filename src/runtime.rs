// This module collects every runtime constant the back end needs behind a
// single RuntimeLayout descriptor passed into the code generator at
// construction: TLS offsets (thread flags, card table base, marking flag,
// trace buffer), object and array layout offsets, the class-status byte and
// the visibly-initialized threshold, vtable/IMT embedding, and the quick
// entrypoint table. Keeping these as instance data rather than compile-time
// constants lets the same back end target variant runtime layouts. Entry
// points are addressed as thread-relative offsets via the fs segment.

//! Runtime layout descriptor and quick entrypoints.

use crate::graph::DataType;
use crate::x86::Register;

/// Runtime entrypoints reachable from compiled code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuickEntrypoint {
    ThrowNullPointer,
    ThrowArrayBounds,
    ThrowStringBounds,
    ThrowDivZero,
    ThrowStackOverflow,
    Throw,
    TestSuspend,
    AllocObjectWithChecks,
    AllocArrayResolved,
    ResolveString,
    ResolveType,
    ResolveTypeAndVerifyAccess,
    InitializeStaticStorage,
    ResolveMethodHandle,
    ResolveMethodType,
    InstanceofNonTrivial,
    CheckInstanceOf,
    Deoptimize,
    QuickInvokeStaticTrampoline,
    QuickInvokePolymorphic,
    QuickInvokeCustom,
    QuickResolutionTrampoline,
    LockObject,
    UnlockObject,
    /// Reference array store with type and bounds checks.
    AputObject,
    /// 64-bit signed division helper.
    Ldiv,
    /// 64-bit signed remainder helper.
    Lmod,
    /// float -> int64 conversion helper.
    F2l,
    /// double -> int64 conversion helper.
    D2l,
    CompileOptimized,
    MethodEntryHook,
    MethodExitHook,
    ReadBarrierMarkReg(Register),
    ReadBarrierSlow,
    ReadBarrierForRootSlow,
}

/// Offsets describing the runtime's thread and object layout.
///
/// All offsets are in bytes. Thread-relative offsets are addressed through
/// the fs segment on x86-32.
#[derive(Debug, Clone)]
pub struct RuntimeLayout {
    /// Thread flags word checked by suspend checks.
    pub thread_flags_offset: i32,
    /// Mask of the flag bits that request a suspend or checkpoint.
    pub suspend_request_flags: i32,
    /// Card table base pointer in the TLS block.
    pub card_table_offset: i32,
    /// Per-thread "is GC marking" flag (concurrent-copying collector).
    pub is_gc_marking_offset: i32,
    /// Per-thread deoptimization check flag consulted by the exit hook.
    pub deopt_check_required_offset: i32,
    /// Per-thread method trace buffer cursor.
    pub trace_buffer_cursor_offset: i32,
    /// Per-thread byte set while method entry/exit listeners are installed.
    pub instrumentation_hooks_offset: i32,
    /// Top of the quick entrypoint table in the TLS block.
    pub entrypoints_offset: i32,
    /// Stack-overflow reserved region probed in the prologue.
    pub stack_overflow_reserved_bytes: i32,

    /// Object header: class pointer.
    pub object_class_offset: i32,
    /// Object header: monitor word.
    pub object_monitor_offset: i32,
    /// Lock word bit tested by the Baker read barrier fast path.
    pub lock_word_mark_bit: u32,

    /// Array length field.
    pub array_length_offset: i32,
    /// String length/flags field (low bit is the compression flag).
    pub string_count_offset: i32,
    /// First character of string data.
    pub string_data_offset: i32,

    /// Class status byte and the "visibly initialized" threshold value.
    pub class_status_offset: i32,
    pub class_status_visibly_initialized: u8,
    /// Primitive-type and component-type fields of a class.
    pub class_component_type_offset: i32,
    pub class_super_class_offset: i32,
    pub class_iftable_offset: i32,
    /// First embedded vtable entry; entries are 4 bytes on x86-32.
    pub class_embedded_vtable_offset: i32,
    /// IMT base inside ArtMethod-addressable storage.
    pub class_imt_offset: i32,

    /// ArtMethod: entry point from quick-compiled code.
    pub method_quick_code_offset: i32,
    /// ArtMethod: hotness counter half-word.
    pub method_hotness_count_offset: i32,
    /// ArtMethod: declaring class.
    pub method_declaring_class_offset: i32,

    /// Global instrumentation status byte address (profile builds).
    pub instrumentation_stub_fast_trace_listeners: u8,

    /// Card table shift used by the write barrier.
    pub card_table_shift: i32,
    /// Value written into a dirty card.
    pub dirty_card_value: u8,
}

impl RuntimeLayout {
    /// A layout with representative offsets, used by tests.
    pub fn for_testing() -> Self {
        Self {
            thread_flags_offset: 0,
            suspend_request_flags: 3,
            card_table_offset: 0x88,
            is_gc_marking_offset: 0x8c,
            deopt_check_required_offset: 0x90,
            trace_buffer_cursor_offset: 0x94,
            instrumentation_hooks_offset: 0x98,
            entrypoints_offset: 0x200,
            stack_overflow_reserved_bytes: 4096,
            object_class_offset: 0,
            object_monitor_offset: 4,
            lock_word_mark_bit: 29,
            array_length_offset: 8,
            string_count_offset: 8,
            string_data_offset: 16,
            class_status_offset: 0x70,
            class_status_visibly_initialized: 0xf0,
            class_component_type_offset: 0x10,
            class_super_class_offset: 0x14,
            class_iftable_offset: 0x18,
            class_embedded_vtable_offset: 0x100,
            class_imt_offset: 0x40,
            method_quick_code_offset: 0x18,
            method_hotness_count_offset: 0x12,
            method_declaring_class_offset: 0x0,
            instrumentation_stub_fast_trace_listeners: 2,
            card_table_shift: 10,
            dirty_card_value: 0x70,
        }
    }

    /// Thread-relative offset of a quick entrypoint.
    pub fn entrypoint_offset(&self, entrypoint: QuickEntrypoint) -> i32 {
        // Dense table indexed by discriminant; mark-register entrypoints are
        // register-specialized and live past the fixed slots.
        let index = match entrypoint {
            QuickEntrypoint::ThrowNullPointer => 0,
            QuickEntrypoint::ThrowArrayBounds => 1,
            QuickEntrypoint::ThrowStringBounds => 2,
            QuickEntrypoint::ThrowDivZero => 3,
            QuickEntrypoint::ThrowStackOverflow => 4,
            QuickEntrypoint::Throw => 5,
            QuickEntrypoint::TestSuspend => 6,
            QuickEntrypoint::AllocObjectWithChecks => 7,
            QuickEntrypoint::AllocArrayResolved => 8,
            QuickEntrypoint::ResolveString => 9,
            QuickEntrypoint::ResolveType => 10,
            QuickEntrypoint::ResolveTypeAndVerifyAccess => 11,
            QuickEntrypoint::InitializeStaticStorage => 12,
            QuickEntrypoint::ResolveMethodHandle => 13,
            QuickEntrypoint::ResolveMethodType => 14,
            QuickEntrypoint::InstanceofNonTrivial => 15,
            QuickEntrypoint::CheckInstanceOf => 16,
            QuickEntrypoint::Deoptimize => 17,
            QuickEntrypoint::QuickInvokeStaticTrampoline => 18,
            QuickEntrypoint::QuickInvokePolymorphic => 19,
            QuickEntrypoint::QuickInvokeCustom => 20,
            QuickEntrypoint::QuickResolutionTrampoline => 21,
            QuickEntrypoint::LockObject => 22,
            QuickEntrypoint::UnlockObject => 23,
            QuickEntrypoint::CompileOptimized => 24,
            QuickEntrypoint::MethodEntryHook => 25,
            QuickEntrypoint::MethodExitHook => 26,
            QuickEntrypoint::ReadBarrierSlow => 27,
            QuickEntrypoint::ReadBarrierForRootSlow => 28,
            QuickEntrypoint::AputObject => 29,
            QuickEntrypoint::Ldiv => 30,
            QuickEntrypoint::Lmod => 31,
            QuickEntrypoint::F2l => 32,
            QuickEntrypoint::D2l => 33,
            QuickEntrypoint::ReadBarrierMarkReg(reg) => 34 + reg.encoding() as i32,
        };
        self.entrypoints_offset + index * 4
    }

    /// Offset of the first element of an array of the given component type.
    pub fn array_data_offset(&self, component: DataType) -> i32 {
        // 64-bit elements start at a natural 8-byte boundary.
        match component.size_in_bytes() {
            8 => 16,
            _ => 12,
        }
    }

    /// Offset of a vtable entry with the given index.
    pub fn embedded_vtable_entry_offset(&self, index: u32) -> i32 {
        self.class_embedded_vtable_offset + (index as i32) * 4
    }

    /// Offset of an IMT entry with the given index.
    pub fn imt_entry_offset(&self, index: u32) -> i32 {
        self.class_imt_offset + (index as i32) * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_data_offsets() {
        let layout = RuntimeLayout::for_testing();
        assert_eq!(layout.array_data_offset(DataType::Int32), 12);
        assert_eq!(layout.array_data_offset(DataType::Reference), 12);
        assert_eq!(layout.array_data_offset(DataType::Int64), 16);
        assert_eq!(layout.array_data_offset(DataType::Float64), 16);
    }

    #[test]
    fn test_entrypoint_offsets_distinct() {
        let layout = RuntimeLayout::for_testing();
        let a = layout.entrypoint_offset(QuickEntrypoint::ThrowNullPointer);
        let b = layout.entrypoint_offset(QuickEntrypoint::TestSuspend);
        let mark_eax = layout.entrypoint_offset(QuickEntrypoint::ReadBarrierMarkReg(Register::EAX));
        let mark_esi = layout.entrypoint_offset(QuickEntrypoint::ReadBarrierMarkReg(Register::ESI));
        assert_ne!(a, b);
        assert_ne!(mark_eax, mark_esi);
    }
}
