// Global functions
// trace, getVersion and ASSetPropFlags

use super::check_arity_min;
use crate::vm::caller::ValueCaller;
use crate::vm::value::Value;

/// trace(message) - Send a message to the host's output
pub fn trace(_this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let vm = caller.vm();
    let message = super::arg(args, 0).to_string_versioned(vm.version());
    vm.host().trace(&message);
    Ok(Value::Undefined)
}

/// getVersion() - Player version string, same as `$version`
pub fn get_version(_this: &Value, _args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    Ok(Value::from(caller.vm().config().version_string()))
}

/// ASSetPropFlags(obj, props, set_true, [set_false]) - Change member flags.
/// `props` is null for every member, a comma-separated list or an array.
pub fn as_set_prop_flags(_this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    check_arity_min(3, args.len())?;
    let version = caller.vm().version();

    let object = args[0]
        .to_object()
        .ok_or_else(|| format!("ASSetPropFlags: {:?} is not an object", args[0]))?;

    let mut props = args[1].clone();
    let mut set_true = args[2].to_uint32();
    let set_false = match args.get(3) {
        Some(value) => value.to_uint32(),
        None if version == 5 => !0,
        None => 0,
    };

    if set_true == 0 && set_false == 0 {
        props = Value::Null;
        set_true = 1;
    }

    let names: Vec<String> = match &props {
        Value::Null => {
            object.borrow_mut().set_all_flags(set_true, set_false);
            return Ok(Value::Undefined);
        }
        Value::String(list) => list.split(',').map(str::to_owned).collect(),
        other => match other.to_object() {
            Some(list) if list.borrow().is_array() => {
                let values = list.borrow().array_values();
                values
                    .iter()
                    .map(|name| name.to_string_versioned(version))
                    .collect()
            }
            _ => return Err(format!("ASSetPropFlags: bad property list {:?}", other)),
        },
    };

    let mut object = object.borrow_mut();
    for name in names {
        if !object.set_flags(&name, set_true, set_false) {
            log::debug!("ASSetPropFlags: '{}' missing or protected", name);
        }
    }
    Ok(Value::Undefined)
}
