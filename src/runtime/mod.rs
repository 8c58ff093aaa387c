//! Script execution: the per-instance interpreter.

pub mod context;

pub use context::{ExecError, ScriptContext, Selection};
