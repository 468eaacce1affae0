// This module defines the IR instruction model for the kestrel back end. Each
// instruction is a tagged variant (HInstructionKind) with per-variant payload
// and a single discriminator, rather than a virtual hierarchy; the two lowering
// passes and the visualizer are implemented as matches on the discriminator.
// An HInstruction carries a stable id, a typed result, operand edges to other
// instructions, an optional environment (interpreter-register snapshot used to
// rebuild the deoptimization frame), a dex-pc, a side-effects descriptor, and
// the LocationSummary produced by the first lowering pass. Annotation enums
// carried by variants (write-barrier policy, type-check sub-kind, method/class/
// string load kinds, memory-barrier kind) are decided by earlier machine-
// independent passes; the back end only consumes them.

//! IR instructions: tagged variants, side effects, environments.

use super::types::DataType;
use super::{BlockId, InstrId};
use crate::locations::{Location, LocationSummary};

/// Sentinel for instructions without a source position.
pub const NO_DEX_PC: u32 = u32::MAX;

/// Condition kinds for If/Condition instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfCondition {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    // Unsigned comparisons.
    Below,
    BelowOrEqual,
    Above,
    AboveOrEqual,
}

impl IfCondition {
    pub fn opposite(self) -> IfCondition {
        match self {
            IfCondition::Equal => IfCondition::NotEqual,
            IfCondition::NotEqual => IfCondition::Equal,
            IfCondition::LessThan => IfCondition::GreaterThanOrEqual,
            IfCondition::LessThanOrEqual => IfCondition::GreaterThan,
            IfCondition::GreaterThan => IfCondition::LessThanOrEqual,
            IfCondition::GreaterThanOrEqual => IfCondition::LessThan,
            IfCondition::Below => IfCondition::AboveOrEqual,
            IfCondition::BelowOrEqual => IfCondition::Above,
            IfCondition::Above => IfCondition::BelowOrEqual,
            IfCondition::AboveOrEqual => IfCondition::Below,
        }
    }
}

/// NaN bias of a floating-point comparison.
///
/// `GtBias` means an unordered comparison outcome is treated as "greater",
/// `LtBias` as "less". Together with the condition this decides whether NaN
/// sends control to the true or the false side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonBias {
    None,
    GtBias,
    LtBias,
}

/// Whether a NaN operand makes the condition true.
pub fn is_fp_condition_true_if_nan(cond: IfCondition, bias: ComparisonBias) -> bool {
    match cond {
        IfCondition::NotEqual => true,
        IfCondition::Equal => false,
        IfCondition::GreaterThan | IfCondition::GreaterThanOrEqual => bias == ComparisonBias::GtBias,
        IfCondition::LessThan | IfCondition::LessThanOrEqual => bias == ComparisonBias::LtBias,
        // Unsigned conditions do not apply to FP comparisons.
        _ => false,
    }
}

/// Whether a NaN operand makes the condition false.
pub fn is_fp_condition_false_if_nan(cond: IfCondition, bias: ComparisonBias) -> bool {
    match cond {
        IfCondition::Equal => true,
        IfCondition::NotEqual => false,
        IfCondition::GreaterThan | IfCondition::GreaterThanOrEqual => bias == ComparisonBias::LtBias,
        IfCondition::LessThan | IfCondition::LessThanOrEqual => bias == ComparisonBias::GtBias,
        _ => false,
    }
}

/// Write-barrier emission policy for a reference store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBarrierKind {
    /// Unconditional card mark; later stores rely on it.
    EmitBeingReliedOn,
    /// Card mark skipped when the stored value is null.
    EmitNotBeingReliedOn,
    /// A coalesced barrier was emitted earlier in the block.
    DontEmit,
}

/// Type-check strategy annotated by reference type propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCheckKind {
    ExactCheck,
    ClassHierarchyCheck,
    AbstractClassCheck,
    InterfaceCheck,
    ArrayObjectCheck,
    ArrayCheck,
    UnresolvedCheck,
    BitstringCheck,
}

/// How an invoke-static/direct locates its callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodLoadKind {
    /// String.<init> special dispatch through a thread-local entrypoint.
    StringInit { entrypoint_offset: u32 },
    /// Recursive call to the method being compiled.
    Recursive,
    /// PC-relative reference into the boot image (boot-image compilation).
    BootImageLinkTimePcRelative,
    /// PC-relative entry in the boot-image relative-read-only region.
    BootImageRelRo,
    /// PC-relative entry in the app-image relative-read-only region.
    AppImageRelRo,
    /// PC-relative, lazily initialized BSS entry.
    BssEntry,
    /// Absolute address baked in at JIT time.
    JitDirectAddress { address: u32 },
    /// Dispatch through the runtime resolution entrypoint.
    RuntimeCall,
}

/// How a LoadClass locates its class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassLoadKind {
    ReferrersClass,
    BootImageLinkTimePcRelative,
    BootImageRelRo,
    AppImageRelRo,
    BssEntry,
    BssEntryPublic,
    BssEntryPackage,
    JitTableAddress,
    RuntimeCall,
}

/// How a LoadString locates its string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringLoadKind {
    BootImageLinkTimePcRelative,
    BootImageRelRo,
    BssEntry,
    JitTableAddress,
    RuntimeCall,
}

/// Memory barrier kinds. On x86 TSO only `AnyAny` and `NTStoreStore`
/// require a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemBarrierKind {
    AnyAny,
    LoadAny,
    StoreStore,
    AnyStore,
    NTStoreStore,
}

/// Reason recorded with a deoptimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeoptimizationKind {
    AotInlineCache,
    JitInlineCache,
    JitSameTarget,
    LoopBoundsBce,
    LoopNullBce,
    BlockBce,
    Cha,
    Inline,
}

/// Field access description shared by field get/set variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub offset: u32,
    pub field_type: DataType,
    pub is_volatile: bool,
}

/// Side-effects descriptor, a bit set over (write/read) x (heap locations)
/// plus the GC-trigger and dependency bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SideEffects(u64);

impl SideEffects {
    const FIELD_WRITE: u64 = 1 << 0;
    const ARRAY_WRITE: u64 = 1 << 1;
    const FIELD_READ: u64 = 1 << 2;
    const ARRAY_READ: u64 = 1 << 3;
    const CAN_TRIGGER_GC: u64 = 1 << 4;
    const DEPENDS_ON_GC: u64 = 1 << 5;

    pub fn none() -> Self {
        SideEffects(0)
    }

    pub fn all() -> Self {
        SideEffects(
            Self::FIELD_WRITE
                | Self::ARRAY_WRITE
                | Self::FIELD_READ
                | Self::ARRAY_READ
                | Self::CAN_TRIGGER_GC
                | Self::DEPENDS_ON_GC,
        )
    }

    pub fn field_write() -> Self {
        SideEffects(Self::FIELD_WRITE)
    }

    pub fn array_write() -> Self {
        SideEffects(Self::ARRAY_WRITE)
    }

    pub fn field_read() -> Self {
        SideEffects(Self::FIELD_READ)
    }

    pub fn array_read() -> Self {
        SideEffects(Self::ARRAY_READ)
    }

    pub fn can_trigger_gc() -> Self {
        SideEffects(Self::CAN_TRIGGER_GC)
    }

    pub fn union(self, other: SideEffects) -> SideEffects {
        SideEffects(self.0 | other.0)
    }

    pub fn includes_gc_trigger(self) -> bool {
        self.0 & Self::CAN_TRIGGER_GC != 0
    }

    pub fn does_any_write(self) -> bool {
        self.0 & (Self::FIELD_WRITE | Self::ARRAY_WRITE) != 0
    }

    pub fn does_any_read(self) -> bool {
        self.0 & (Self::FIELD_READ | Self::ARRAY_READ) != 0
    }
}

/// Snapshot of the interpreter-register state at a safepoint, used to
/// rebuild the deoptimization / exception frame.
#[derive(Debug, Clone)]
pub struct HEnvironment {
    pub dex_pc: u32,
    /// One entry per interpreter register; `None` for dead registers.
    pub values: Vec<Option<InstrId>>,
    /// Filled by the register allocator with the location of each live value.
    pub locations: Vec<Location>,
}

impl HEnvironment {
    pub fn new(dex_pc: u32, values: Vec<Option<InstrId>>) -> Self {
        let locations = vec![Location::Invalid; values.len()];
        Self { dex_pc, values, locations }
    }
}

/// The instruction variant and its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum HInstructionKind {
    // Constants.
    IntConstant(i32),
    LongConstant(i64),
    FloatConstant(f32),
    DoubleConstant(f64),
    NullConstant,

    // Values defined by the frame.
    ParameterValue { index: u16 },
    CurrentMethod,
    Phi,

    // Arithmetic.
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Abs,
    Min,
    Max,

    // Bitwise.
    And,
    Or,
    Xor,
    Not,
    BooleanNot,

    // Shifts and rotates. Input 1 is the distance.
    Shl,
    Shr,
    UShr,
    Ror,

    // Comparisons.
    Compare { bias: ComparisonBias },
    Condition { cond: IfCondition, bias: ComparisonBias },
    Select,

    // Control flow.
    Goto,
    If,
    TryBoundary { is_entry: bool },
    Return,
    ReturnVoid,
    Exit,
    Throw,
    Deoptimize { kind: DeoptimizationKind },
    PackedSwitch { start_value: i32 },
    X86PackedSwitch { start_value: i32 },

    // Implicit runtime checks.
    NullCheck,
    BoundsCheck { is_string_char_at: bool },
    DivZeroCheck,

    // Memory.
    InstanceFieldGet { field: FieldInfo },
    InstanceFieldSet {
        field: FieldInfo,
        write_barrier: WriteBarrierKind,
        value_can_be_null: bool,
    },
    StaticFieldGet { field: FieldInfo },
    StaticFieldSet {
        field: FieldInfo,
        write_barrier: WriteBarrierKind,
        value_can_be_null: bool,
    },
    ArrayGet { component: DataType, is_string_char_at: bool },
    ArraySet {
        component: DataType,
        needs_type_check: bool,
        write_barrier: WriteBarrierKind,
        value_can_be_null: bool,
    },
    ArrayLength { is_string_length: bool },

    // Objects.
    NewInstance { type_index: u32 },
    NewArray { type_index: u32 },
    InstanceOf { check_kind: TypeCheckKind },
    CheckCast { check_kind: TypeCheckKind },
    LoadClass {
        type_index: u32,
        load_kind: ClassLoadKind,
        needs_access_check: bool,
        generate_clinit_check: bool,
    },
    LoadString { string_index: u32, load_kind: StringLoadKind },
    LoadMethodHandle { method_handle_index: u32 },
    LoadMethodType { proto_index: u32 },
    ClinitCheck,
    MonitorOperation { is_enter: bool },

    // Invokes.
    InvokeStaticOrDirect { method_index: u32, load_kind: MethodLoadKind },
    InvokeVirtual { method_index: u32, vtable_index: u32 },
    InvokeInterface { method_index: u32, imt_index: u32 },
    InvokePolymorphic { proto_index: u32 },
    InvokeCustom { call_site_index: u32 },
    InvokeUnresolved { method_index: u32 },

    // Conversions and concurrency.
    TypeConversion,
    MemoryBarrier { kind: MemBarrierKind },
    ConstructorFence,
    SuspendCheck,

    // x86-32 architectural auxiliaries.
    ComputeBaseMethodAddress,
    X86LoadFromConstantTable,
    X86FPNeg,

    // Instrumentation (profile builds).
    MethodEntryHook,
    MethodExitHook,
}

impl HInstructionKind {
    /// Stable name used for logging, statistics and the visualizer.
    pub fn name(&self) -> &'static str {
        match self {
            HInstructionKind::IntConstant(_) => "IntConstant",
            HInstructionKind::LongConstant(_) => "LongConstant",
            HInstructionKind::FloatConstant(_) => "FloatConstant",
            HInstructionKind::DoubleConstant(_) => "DoubleConstant",
            HInstructionKind::NullConstant => "NullConstant",
            HInstructionKind::ParameterValue { .. } => "ParameterValue",
            HInstructionKind::CurrentMethod => "CurrentMethod",
            HInstructionKind::Phi => "Phi",
            HInstructionKind::Add => "Add",
            HInstructionKind::Sub => "Sub",
            HInstructionKind::Mul => "Mul",
            HInstructionKind::Div => "Div",
            HInstructionKind::Rem => "Rem",
            HInstructionKind::Neg => "Neg",
            HInstructionKind::Abs => "Abs",
            HInstructionKind::Min => "Min",
            HInstructionKind::Max => "Max",
            HInstructionKind::And => "And",
            HInstructionKind::Or => "Or",
            HInstructionKind::Xor => "Xor",
            HInstructionKind::Not => "Not",
            HInstructionKind::BooleanNot => "BooleanNot",
            HInstructionKind::Shl => "Shl",
            HInstructionKind::Shr => "Shr",
            HInstructionKind::UShr => "UShr",
            HInstructionKind::Ror => "Ror",
            HInstructionKind::Compare { .. } => "Compare",
            HInstructionKind::Condition { .. } => "Condition",
            HInstructionKind::Select => "Select",
            HInstructionKind::Goto => "Goto",
            HInstructionKind::If => "If",
            HInstructionKind::TryBoundary { .. } => "TryBoundary",
            HInstructionKind::Return => "Return",
            HInstructionKind::ReturnVoid => "ReturnVoid",
            HInstructionKind::Exit => "Exit",
            HInstructionKind::Throw => "Throw",
            HInstructionKind::Deoptimize { .. } => "Deoptimize",
            HInstructionKind::PackedSwitch { .. } => "PackedSwitch",
            HInstructionKind::X86PackedSwitch { .. } => "X86PackedSwitch",
            HInstructionKind::NullCheck => "NullCheck",
            HInstructionKind::BoundsCheck { .. } => "BoundsCheck",
            HInstructionKind::DivZeroCheck => "DivZeroCheck",
            HInstructionKind::InstanceFieldGet { .. } => "InstanceFieldGet",
            HInstructionKind::InstanceFieldSet { .. } => "InstanceFieldSet",
            HInstructionKind::StaticFieldGet { .. } => "StaticFieldGet",
            HInstructionKind::StaticFieldSet { .. } => "StaticFieldSet",
            HInstructionKind::ArrayGet { .. } => "ArrayGet",
            HInstructionKind::ArraySet { .. } => "ArraySet",
            HInstructionKind::ArrayLength { .. } => "ArrayLength",
            HInstructionKind::NewInstance { .. } => "NewInstance",
            HInstructionKind::NewArray { .. } => "NewArray",
            HInstructionKind::InstanceOf { .. } => "InstanceOf",
            HInstructionKind::CheckCast { .. } => "CheckCast",
            HInstructionKind::LoadClass { .. } => "LoadClass",
            HInstructionKind::LoadString { .. } => "LoadString",
            HInstructionKind::LoadMethodHandle { .. } => "LoadMethodHandle",
            HInstructionKind::LoadMethodType { .. } => "LoadMethodType",
            HInstructionKind::ClinitCheck => "ClinitCheck",
            HInstructionKind::MonitorOperation { .. } => "MonitorOperation",
            HInstructionKind::InvokeStaticOrDirect { .. } => "InvokeStaticOrDirect",
            HInstructionKind::InvokeVirtual { .. } => "InvokeVirtual",
            HInstructionKind::InvokeInterface { .. } => "InvokeInterface",
            HInstructionKind::InvokePolymorphic { .. } => "InvokePolymorphic",
            HInstructionKind::InvokeCustom { .. } => "InvokeCustom",
            HInstructionKind::InvokeUnresolved { .. } => "InvokeUnresolved",
            HInstructionKind::TypeConversion => "TypeConversion",
            HInstructionKind::MemoryBarrier { .. } => "MemoryBarrier",
            HInstructionKind::ConstructorFence => "ConstructorFence",
            HInstructionKind::SuspendCheck => "SuspendCheck",
            HInstructionKind::ComputeBaseMethodAddress => "ComputeBaseMethodAddress",
            HInstructionKind::X86LoadFromConstantTable => "X86LoadFromConstantTable",
            HInstructionKind::X86FPNeg => "X86FPNeg",
            HInstructionKind::MethodEntryHook => "MethodEntryHook",
            HInstructionKind::MethodExitHook => "MethodExitHook",
        }
    }

    /// Whether the lowering may invoke the runtime (on the main path or from
    /// a slow path).
    pub fn can_call(&self) -> bool {
        matches!(
            self,
            HInstructionKind::NewInstance { .. }
                | HInstructionKind::NewArray { .. }
                | HInstructionKind::Throw
                | HInstructionKind::MonitorOperation { .. }
                | HInstructionKind::InvokeStaticOrDirect { .. }
                | HInstructionKind::InvokeVirtual { .. }
                | HInstructionKind::InvokeInterface { .. }
                | HInstructionKind::InvokePolymorphic { .. }
                | HInstructionKind::InvokeCustom { .. }
                | HInstructionKind::InvokeUnresolved { .. }
                | HInstructionKind::SuspendCheck
                | HInstructionKind::NullCheck
                | HInstructionKind::BoundsCheck { .. }
                | HInstructionKind::DivZeroCheck
                | HInstructionKind::CheckCast { .. }
                | HInstructionKind::InstanceOf { .. }
                | HInstructionKind::LoadClass { .. }
                | HInstructionKind::LoadString { .. }
                | HInstructionKind::LoadMethodHandle { .. }
                | HInstructionKind::LoadMethodType { .. }
                | HInstructionKind::ClinitCheck
                | HInstructionKind::Deoptimize { .. }
                | HInstructionKind::MethodEntryHook
                | HInstructionKind::MethodExitHook
        )
    }

    /// Whether the instruction can throw into the enclosing handler.
    pub fn can_throw(&self) -> bool {
        matches!(
            self,
            HInstructionKind::NullCheck
                | HInstructionKind::BoundsCheck { .. }
                | HInstructionKind::DivZeroCheck
                | HInstructionKind::CheckCast { .. }
                | HInstructionKind::Throw
                | HInstructionKind::NewInstance { .. }
                | HInstructionKind::NewArray { .. }
                | HInstructionKind::LoadClass { .. }
                | HInstructionKind::LoadString { .. }
                | HInstructionKind::LoadMethodHandle { .. }
                | HInstructionKind::LoadMethodType { .. }
                | HInstructionKind::MonitorOperation { .. }
                | HInstructionKind::InvokeStaticOrDirect { .. }
                | HInstructionKind::InvokeVirtual { .. }
                | HInstructionKind::InvokeInterface { .. }
                | HInstructionKind::InvokePolymorphic { .. }
                | HInstructionKind::InvokeCustom { .. }
                | HInstructionKind::InvokeUnresolved { .. }
                | HInstructionKind::ArraySet { .. }
        )
    }

    /// Whether lowering needs the interpreter-frame environment.
    pub fn needs_environment(&self) -> bool {
        self.can_call() || matches!(self, HInstructionKind::Deoptimize { .. })
    }

    /// Whether this is a control-transfer instruction.
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            HInstructionKind::Goto
                | HInstructionKind::If
                | HInstructionKind::TryBoundary { .. }
                | HInstructionKind::Return
                | HInstructionKind::ReturnVoid
                | HInstructionKind::Exit
                | HInstructionKind::Throw
                | HInstructionKind::Deoptimize { .. }
                | HInstructionKind::PackedSwitch { .. }
                | HInstructionKind::X86PackedSwitch { .. }
        )
    }

    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            HInstructionKind::IntConstant(_)
                | HInstructionKind::LongConstant(_)
                | HInstructionKind::FloatConstant(_)
                | HInstructionKind::DoubleConstant(_)
                | HInstructionKind::NullConstant
        )
    }

    /// Default side effects for this kind.
    pub fn side_effects(&self) -> SideEffects {
        match self {
            k if k.can_call() => SideEffects::all(),
            HInstructionKind::InstanceFieldSet { .. } | HInstructionKind::StaticFieldSet { .. } => {
                SideEffects::field_write()
            }
            HInstructionKind::ArraySet { .. } => SideEffects::array_write(),
            HInstructionKind::InstanceFieldGet { .. } | HInstructionKind::StaticFieldGet { .. } => {
                SideEffects::field_read()
            }
            HInstructionKind::ArrayGet { .. } => SideEffects::array_read(),
            _ => SideEffects::none(),
        }
    }
}

/// An IR instruction node.
#[derive(Debug, Clone)]
pub struct HInstruction {
    pub id: InstrId,
    pub kind: HInstructionKind,
    pub ty: DataType,
    pub inputs: Vec<InstrId>,
    pub block: BlockId,
    pub dex_pc: u32,
    pub side_effects: SideEffects,
    pub environment: Option<HEnvironment>,
    pub locations: Option<LocationSummary>,
    /// True when the value is rematerialized at each use instead of being
    /// allocated a location (e.g. a condition fused into a branch).
    pub is_emitted_at_use_site: bool,
}

impl HInstruction {
    pub fn new(id: InstrId, kind: HInstructionKind, ty: DataType, inputs: Vec<InstrId>, dex_pc: u32) -> Self {
        let side_effects = kind.side_effects();
        Self {
            id,
            kind,
            ty,
            inputs,
            block: BlockId(u32::MAX),
            dex_pc,
            side_effects,
            environment: None,
            locations: None,
            is_emitted_at_use_site: false,
        }
    }

    pub fn can_call(&self) -> bool {
        self.kind.can_call()
    }

    pub fn can_throw(&self) -> bool {
        self.kind.can_throw()
    }

    pub fn needs_environment(&self) -> bool {
        self.kind.needs_environment()
    }

    /// The summary, which must exist after the first lowering pass.
    pub fn locations(&self) -> &LocationSummary {
        self.locations
            .as_ref()
            .expect("instruction has no location summary")
    }

    /// Constant payload widened to i64, for constants only.
    pub fn constant_value(&self) -> Option<i64> {
        match self.kind {
            HInstructionKind::IntConstant(v) => Some(v as i64),
            HInstructionKind::LongConstant(v) => Some(v),
            HInstructionKind::NullConstant => Some(0),
            HInstructionKind::FloatConstant(v) => Some(v.to_bits() as i64),
            HInstructionKind::DoubleConstant(v) => Some(v.to_bits() as i64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_bias_predicates() {
        // a > b with gt bias: NaN goes to the true side.
        assert!(is_fp_condition_true_if_nan(
            IfCondition::GreaterThan,
            ComparisonBias::GtBias
        ));
        // a < b with gt bias: NaN goes to the false side.
        assert!(is_fp_condition_false_if_nan(
            IfCondition::LessThan,
            ComparisonBias::GtBias
        ));
        // Equality is never true on NaN.
        assert!(is_fp_condition_false_if_nan(
            IfCondition::Equal,
            ComparisonBias::LtBias
        ));
        assert!(is_fp_condition_true_if_nan(
            IfCondition::NotEqual,
            ComparisonBias::GtBias
        ));
    }

    #[test]
    fn test_side_effect_defaults() {
        assert!(HInstructionKind::NewInstance { type_index: 3 }
            .side_effects()
            .includes_gc_trigger());
        assert!(HInstructionKind::ArraySet {
            component: DataType::Int32,
            needs_type_check: false,
            write_barrier: WriteBarrierKind::DontEmit,
            value_can_be_null: true,
        }
        .side_effects()
        .does_any_write());
        assert_eq!(HInstructionKind::Add.side_effects(), SideEffects::none());
    }

    #[test]
    fn test_condition_opposite() {
        assert_eq!(IfCondition::LessThan.opposite(), IfCondition::GreaterThanOrEqual);
        assert_eq!(IfCondition::Below.opposite(), IfCondition::AboveOrEqual);
    }
}
