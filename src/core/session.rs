// This module provides arena-based compilation session management using the
// bumpalo crate. CompilationSession is the central hub that owns the arena
// allocator and tracks per-compilation state with a unified lifetime: interned
// strings, statistics (instructions lowered, slow paths emitted, code size,
// patches recorded), and the should-stop flag the pass pipeline checks between
// passes. One session exists per method compilation; sessions share no mutable
// state, so multiple compilations can run on different host threads. All
// component-owned data structures (graph blocks, instructions, environments)
// allocate from the session arena and are freed collectively when the session
// is dropped.

//! Arena-based compilation session management.
//!
//! One `CompilationSession` per method compilation. All graph objects are
//! tied to the session lifetime, eliminating complex lifetime propagation.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::{Cell, RefCell};
use std::fmt;

/// Arena-based compilation session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for compilation objects.
    arena: &'arena Bump,

    /// Session statistics for debugging and tuning.
    stats: RefCell<SessionStats>,

    /// String interning for visualizer output and pass names.
    interned_strings: RefCell<HashMap<String, &'arena str>>,

    /// Cooperative cancellation flag, checked by the pipeline between passes.
    should_stop: Cell<bool>,

    /// Name of the method being compiled.
    method_name: RefCell<Option<String>>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
            should_stop: Cell::new(false),
            method_name: RefCell::new(None),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Allocate an object in the session arena.
    pub fn alloc<T>(&self, value: T) -> &'arena mut T {
        self.arena.alloc(value)
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }
        let interned: &'arena str = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Set the method being compiled.
    pub fn set_method_name(&self, name: &str) {
        *self.method_name.borrow_mut() = Some(name.to_string());
    }

    /// Name of the method being compiled, if set.
    pub fn method_name(&self) -> Option<String> {
        self.method_name.borrow().clone()
    }

    /// Request cooperative cancellation. Only honored between passes.
    pub fn request_stop(&self) {
        self.should_stop.set(true);
    }

    /// Whether the pipeline should stop before the next pass.
    pub fn should_stop(&self) -> bool {
        self.should_stop.get()
    }

    /// Record an instruction lowering.
    pub fn record_instruction_lowered(&self, kind: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.instructions_lowered += 1;
        *stats.instruction_counts.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Record an emitted slow path.
    pub fn record_slow_path(&self) {
        self.stats.borrow_mut().slow_paths_emitted += 1;
    }

    /// Record a linker patch enqueued during emission.
    pub fn record_patch(&self) {
        self.stats.borrow_mut().patches_recorded += 1;
    }

    /// Record final code size for the method.
    pub fn record_code_size(&self, size: usize) {
        self.stats.borrow_mut().code_size = size;
    }

    /// Record a parallel-move cycle broken with an exchange.
    pub fn record_move_cycle(&self) {
        self.stats.borrow_mut().move_cycles_broken += 1;
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Number of IR instructions lowered to machine code.
    pub instructions_lowered: usize,

    /// Count of each instruction kind lowered.
    pub instruction_counts: std::collections::HashMap<String, usize>,

    /// Number of slow paths emitted out of line.
    pub slow_paths_emitted: usize,

    /// Number of linker patches recorded.
    pub patches_recorded: usize,

    /// Parallel-move cycles broken with exchanges.
    pub move_cycles_broken: usize,

    /// Final code size in bytes.
    pub code_size: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Instructions lowered: {}", self.instructions_lowered)?;
        writeln!(f, "  Slow paths emitted: {}", self.slow_paths_emitted)?;
        writeln!(f, "  Patches recorded: {}", self.patches_recorded)?;
        writeln!(f, "  Move cycles broken: {}", self.move_cycles_broken)?;
        writeln!(f, "  Code size: {} bytes", self.code_size)?;

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Instruction breakdown:")?;
            let mut sorted: Vec<_> = self.instruction_counts.iter().collect();
            sorted.sort_by_key(|(_, count)| std::cmp::Reverse(*count));
            for (kind, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", kind, count)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let stats = session.stats();
        assert_eq!(stats.instructions_lowered, 0);
        assert_eq!(stats.slow_paths_emitted, 0);
        assert!(!session.should_stop());
    }

    #[test]
    fn test_string_interning() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let s1 = session.intern_str("loop_header");
        let s2 = session.intern_str("loop_header");
        let s3 = session.intern_str("exit");

        assert_eq!(s1.as_ptr(), s2.as_ptr());
        assert_ne!(s1.as_ptr(), s3.as_ptr());
    }

    #[test]
    fn test_statistics() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        session.record_instruction_lowered("Add");
        session.record_instruction_lowered("Add");
        session.record_instruction_lowered("ArrayGet");
        session.record_slow_path();
        session.record_code_size(96);

        let stats = session.stats();
        assert_eq!(stats.instructions_lowered, 3);
        assert_eq!(stats.instruction_counts["Add"], 2);
        assert_eq!(stats.slow_paths_emitted, 1);
        assert_eq!(stats.code_size, 96);
    }

    #[test]
    fn test_stop_request() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        session.request_stop();
        assert!(session.should_stop());
    }
}
