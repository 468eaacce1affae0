//! Compilation options consumed across the back end.

/// What kind of code is being produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationKind {
    /// Quick baseline code with hotness counting.
    Baseline,
    /// Fully optimized code.
    Optimized,
    /// Optimized code entered through on-stack replacement.
    Osr,
}

/// Knobs the code generator and location builder consult.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// The collector requires read barriers on reference loads.
    pub emit_read_barriers: bool,
    /// Use the Baker fast path instead of the generic slow call.
    pub use_baker_read_barrier: bool,
    /// References are stored bitwise-negated in the heap.
    pub poison_heap_references: bool,
    /// Fold null checks into the first dependent memory access.
    pub implicit_null_checks: bool,
    /// Emit method entry/exit hook checks.
    pub debuggable: bool,
    /// JIT compilation (enables JIT root tables and direct addresses).
    pub is_jit: bool,
    pub compilation_kind: CompilationKind,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            emit_read_barriers: false,
            use_baker_read_barrier: false,
            poison_heap_references: false,
            implicit_null_checks: true,
            debuggable: false,
            is_jit: false,
            compilation_kind: CompilationKind::Optimized,
        }
    }
}

impl CompilerOptions {
    /// Whether reference loads need any read barrier instrumentation.
    pub fn needs_read_barrier(&self) -> bool {
        self.emit_read_barriers
    }

    pub fn is_baseline(&self) -> bool {
        self.compilation_kind == CompilationKind::Baseline
    }

    pub fn is_osr(&self) -> bool {
        self.compilation_kind == CompilationKind::Osr
    }
}
