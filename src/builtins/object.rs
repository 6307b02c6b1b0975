// Object built-in class
// Constructor plus the members every object carries

use super::{arg, check_arity_min};
use crate::vm::caller::ValueCaller;
use crate::vm::object::{Accessor, PropFlags, ScriptObject};
use crate::vm::value::Value;
use std::rc::Rc;

/// Install `addProperty` and `hasOwnProperty` as dont-enum members.
pub fn install_object_methods(obj: &mut ScriptObject) {
    let flags = PropFlags::new(PropFlags::DONT_ENUM);
    obj.define("addProperty", Value::NativeFn(object_add_property), flags);
    obj.define("hasOwnProperty", Value::NativeFn(object_has_own_property), flags);
}

pub fn object_constructor(_this: &Value, _args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    Ok(Value::Object(caller.vm().new_object()))
}

/// obj.addProperty(name, getter, setter) - Install an accessor
fn object_add_property(this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    check_arity_min(3, args.len())?;
    let object = this
        .to_object()
        .ok_or_else(|| "addProperty: receiver is not an object".to_string())?;
    let name = args[0].to_string_versioned(caller.vm().version());
    if name.is_empty() {
        return Ok(Value::Boolean(false));
    }
    let getter = args[1].clone();
    if !getter.is_callable() {
        return Err(format!("addProperty '{}': getter is not a function", name));
    }

    let accessor = Accessor {
        getter,
        setter: args[2].clone(),
        owner: Rc::downgrade(&object),
    };
    object
        .borrow_mut()
        .define(&name, Value::Accessor(Rc::new(accessor)), PropFlags::default());
    Ok(Value::Boolean(true))
}

/// obj.hasOwnProperty(name)
fn object_has_own_property(this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let name = arg(args, 0).to_string_versioned(caller.vm().version());
    let found = match this.to_object() {
        Some(object) => object.borrow().has_own(&name),
        None => false,
    };
    Ok(Value::Boolean(found))
}
