// Boolean built-in class

use super::{create_prototype, primitive};
use crate::vm::caller::ValueCaller;
use crate::vm::value::{ObjectRef, Value};

pub fn create_boolean_prototype(object_proto: &ObjectRef) -> ObjectRef {
    create_prototype(object_proto, &[("toString", boolean_to_string)])
}

pub fn boolean_constructor(_this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let b = args.first().map(Value::to_bool).unwrap_or(false);
    if caller.constructing() {
        return Ok(Value::Object(caller.vm().new_boxed(Value::Boolean(b))));
    }
    Ok(Value::Boolean(b))
}

fn boolean_to_string(this: &Value, _args: &[Value], _caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let text = if primitive(this).to_bool() { "true" } else { "false" };
    Ok(Value::from(text))
}
