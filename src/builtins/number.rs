// Number built-in class

use super::{arg, create_prototype, primitive};
use crate::vm::caller::ValueCaller;
use crate::vm::value::{format_number, ObjectRef, Value};

pub fn create_number_prototype(object_proto: &ObjectRef) -> ObjectRef {
    create_prototype(object_proto, &[("toString", number_to_string)])
}

pub fn number_constructor(_this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let n = args.first().map(Value::to_number).unwrap_or(0.0);
    if caller.constructing() {
        return Ok(Value::Object(caller.vm().new_boxed(Value::Number(n))));
    }
    Ok(Value::Number(n))
}

/// number.toString([radix]) - Radix 2 to 36; other radixes print decimal
pub fn number_to_string(this: &Value, args: &[Value], _caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let n = primitive(this).to_number();
    let radix = match arg(args, 0) {
        Value::Undefined => 10,
        other => other.to_int32(),
    };
    if radix == 10 || !(2..=36).contains(&radix) {
        return Ok(Value::from(format_number(n)));
    }
    Ok(Value::from(to_radix(n, radix as u32)))
}

/// Integer part of `n` in `radix`.
fn to_radix(n: f64, radix: u32) -> String {
    if !n.is_finite() {
        return format_number(n);
    }
    let mut magnitude = n.abs().trunc() as u64;
    if magnitude == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while magnitude > 0 {
        let digit = (magnitude % radix as u64) as u32;
        digits.push(char::from_digit(digit, radix).unwrap_or('0'));
        magnitude /= radix as u64;
    }
    if n < 0.0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_radix() {
        assert_eq!(to_radix(255.0, 16), "ff");
        assert_eq!(to_radix(-5.9, 2), "-101");
        assert_eq!(to_radix(0.4, 8), "0");
        assert_eq!(to_radix(35.0, 36), "z");
    }
}
