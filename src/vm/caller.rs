// ActionVM Value Caller
// Lets native functions call back into script code and reach the VM

use super::interpreter::Vm;
use super::value::{ObjectRef, Value};

/// Handed to every native function for the duration of its call.
pub trait ValueCaller {
    /// Call a callable value; failures are reported by the VM and yield undefined.
    fn call(&mut self, callee: &Value, this: Option<Value>, args: &[Value]) -> Value;

    fn vm(&self) -> &Vm;

    /// Navigation target of the calling context
    fn target(&self) -> ObjectRef;

    /// True when invoked by `new`.
    fn constructing(&self) -> bool;
}

/// Native function: receives `this` (undefined when absent), the arguments
/// and a caller. An `Err` is reported as a missing binding.
pub type NativeFn = fn(&Value, &[Value], &mut dyn ValueCaller) -> Result<Value, String>;
