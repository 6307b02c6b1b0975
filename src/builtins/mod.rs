// ActionVM Built-in Module
// Global object contents and the prototype objects shared by the
// built-in classes

mod array;
mod boolean;
mod global;
pub mod number;
pub mod object;
pub mod string;

use crate::vm::caller::NativeFn;
use crate::vm::interpreter::Vm;
use crate::vm::object::{PropFlags, ScriptObject};
use crate::vm::value::{ObjectRef, Value};

pub use array::create_array_prototype;
pub use boolean::create_boolean_prototype;
pub use number::create_number_prototype;
pub use string::create_string_prototype;

/// Prototype objects of the built-in classes. The VM owns them; instances
/// link to them weakly.
pub struct Prototypes {
    pub object: ObjectRef,
    pub array: ObjectRef,
    pub string: ObjectRef,
    pub number: ObjectRef,
    pub boolean: ObjectRef,
}

pub fn create_prototypes() -> Prototypes {
    let object = ScriptObject::new().into_ref();
    Prototypes {
        array: create_array_prototype(&object),
        string: create_string_prototype(&object),
        number: create_number_prototype(&object),
        boolean: create_boolean_prototype(&object),
        object,
    }
}

/// Populate the VM's global object.
pub fn install_globals(vm: &Vm) {
    let functions: [(&str, NativeFn); 8] = [
        ("trace", global::trace),
        ("getVersion", global::get_version),
        ("ASSetPropFlags", global::as_set_prop_flags),
        ("Object", object::object_constructor),
        ("Array", array::array_constructor),
        ("String", string::string_constructor),
        ("Number", number::number_constructor),
        ("Boolean", boolean::boolean_constructor),
    ];

    let global_object = vm.global();
    let mut global_object = global_object.borrow_mut();
    for (name, function) in functions {
        global_object.define(name, Value::NativeFn(function), PropFlags::new(PropFlags::DONT_ENUM));
    }
}

/// New prototype object holding `methods` as dont-enum members.
pub(crate) fn create_prototype(object_proto: &ObjectRef, methods: &[(&str, NativeFn)]) -> ObjectRef {
    let mut proto = ScriptObject::new();
    proto.set_proto(Some(object_proto));
    for (name, method) in methods {
        proto.define(name, Value::NativeFn(*method), PropFlags::new(PropFlags::DONT_ENUM));
    }
    proto.into_ref()
}

/// Helper: argument `index`, undefined when absent
pub fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

/// Helper: check minimum arity
pub fn check_arity_min(min: usize, got: usize) -> Result<(), String> {
    if got < min {
        Err(format!(
            "Expected at least {} argument{} but got {}",
            min,
            if min == 1 { "" } else { "s" },
            got
        ))
    } else {
        Ok(())
    }
}

/// Helper: the primitive inside a receiver, unwrapping boxed objects
pub fn primitive(this: &Value) -> Value {
    if let Value::Object(obj) = this {
        if let Some(inner) = obj.borrow().boxed_value() {
            return inner.clone();
        }
    }
    this.clone()
}
