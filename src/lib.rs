// ActionVM
// A tolerant interpreter for ActionScript 1/2 action bytecode

pub mod builtins;
pub mod bytecode;
pub mod config;
pub mod error;
pub mod host;
pub mod vm;

pub use bytecode::{ActionBuffer, ActionWriter};
pub use config::VmConfig;
pub use error::{AvmError, AvmResult, Diagnostic, DiagnosticKind};
pub use host::{Host, LogHost, MovieClip, RecordingHost, Timeline};
pub use vm::{Value, Vm};
