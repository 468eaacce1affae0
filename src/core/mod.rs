//! Shared infrastructure: compilation sessions, options and error types.

pub mod error;
pub mod options;
pub mod session;

pub use error::{CompileError, CompileResult};
pub use options::{CompilationKind, CompilerOptions};
pub use session::{CompilationSession, SessionStats};
