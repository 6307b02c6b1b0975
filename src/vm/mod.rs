pub mod caller;
pub mod closure;
pub mod environment;
pub mod interpreter;
pub mod object;
pub mod value;

pub use caller::{NativeFn, ValueCaller};
pub use closure::{Closure, Convention};
pub use environment::{Environment, WithEntry, WithStack};
pub use interpreter::Vm;
pub use object::{Accessor, ObjectKind, PropFlags, ScriptObject};
pub use value::{ObjectRef, Value};
