// Array built-in class
// Arrays are objects with numeric members and a dont-enum length

use super::{arg, create_prototype};
use crate::vm::caller::ValueCaller;
use crate::vm::value::{ObjectRef, Value};

pub fn create_array_prototype(object_proto: &ObjectRef) -> ObjectRef {
    create_prototype(
        object_proto,
        &[
            ("push", array_push),
            ("pop", array_pop),
            ("join", array_join),
            ("toString", array_to_string),
        ],
    )
}

/// Array(n) makes n empty slots; any other argument list becomes the elements.
pub fn array_constructor(_this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let vm = caller.vm();
    if let [Value::Number(n)] = args {
        let array = vm.new_array(Vec::new());
        if n.is_finite() && *n > 0.0 {
            array.borrow_mut().set_member("length", Value::Number(n.floor()));
        }
        return Ok(Value::Object(array));
    }
    Ok(Value::Object(vm.new_array(args.to_vec())))
}

fn this_array(this: &Value) -> Result<ObjectRef, String> {
    match this.to_object() {
        Some(obj) if obj.borrow().is_array() => Ok(obj),
        _ => Err(format!("array method called on {:?}", this)),
    }
}

/// array.push(...values) - Append, returning the new length
fn array_push(this: &Value, args: &[Value], _caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let array = this_array(this)?;
    let mut array = array.borrow_mut();
    let mut len = array.array_len();
    for value in args {
        len = array.array_push(value.clone());
    }
    Ok(Value::Number(len as f64))
}

/// array.pop() - Remove and return the last element
fn array_pop(this: &Value, _args: &[Value], _caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let array = this_array(this)?;
    let value = array.borrow_mut().array_pop();
    Ok(value)
}

/// array.join([separator]) - Separator defaults to ","
fn array_join(this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let version = caller.vm().version();
    let separator = match arg(args, 0) {
        Value::Undefined => ",".to_string(),
        other => other.to_string_versioned(version),
    };
    let array = this_array(this)?;
    let values = array.borrow().array_values();
    let joined = values
        .iter()
        .map(|value| value.to_string_versioned(version))
        .collect::<Vec<_>>()
        .join(&separator);
    Ok(Value::from(joined))
}

fn array_to_string(this: &Value, _args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    array_join(this, &[], caller)
}
