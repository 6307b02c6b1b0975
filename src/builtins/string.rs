// String built-in class
// Methods work on character indices and serve both string primitives
// (through `lookup`) and String objects (through the prototype)

use super::{arg, create_prototype, primitive};
use crate::vm::caller::{NativeFn, ValueCaller};
use crate::vm::value::{ObjectRef, Value};
use rustc_hash::FxHashMap;
use std::sync::OnceLock;

const STRING_METHODS: [(&str, NativeFn); 13] = [
    ("charAt", string_char_at),
    ("charCodeAt", string_char_code_at),
    ("concat", string_concat),
    ("fromCharCode", string_from_char_code),
    ("indexOf", string_index_of),
    ("lastIndexOf", string_last_index_of),
    ("slice", string_slice),
    ("split", string_split),
    ("substr", string_substr),
    ("substring", string_substring),
    ("toLowerCase", string_to_lower_case),
    ("toUpperCase", string_to_upper_case),
    ("toString", string_to_string),
];

pub fn create_string_prototype(object_proto: &ObjectRef) -> ObjectRef {
    create_prototype(object_proto, &STRING_METHODS)
}

/// Method for a string primitive receiver; names are case-insensitive.
pub fn lookup(name: &str) -> Option<NativeFn> {
    static METHODS: OnceLock<FxHashMap<String, NativeFn>> = OnceLock::new();
    METHODS
        .get_or_init(|| {
            STRING_METHODS
                .iter()
                .map(|(name, method)| (name.to_ascii_lowercase(), *method))
                .collect()
        })
        .get(&name.to_ascii_lowercase())
        .copied()
}

pub fn string_constructor(_this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let text = match args.first() {
        Some(value) => value.to_string_versioned(caller.vm().version()),
        None => String::new(),
    };
    if caller.constructing() {
        return Ok(Value::Object(caller.vm().new_boxed(Value::from(text))));
    }
    Ok(Value::from(text))
}

fn this_chars(this: &Value, caller: &dyn ValueCaller) -> Vec<char> {
    primitive(this)
        .to_string_versioned(caller.vm().version())
        .chars()
        .collect()
}

fn text_arg(args: &[Value], index: usize, caller: &dyn ValueCaller) -> String {
    arg(args, index).to_string_versioned(caller.vm().version())
}

/// Integer argument, `default` when absent or undefined.
fn int_arg(args: &[Value], index: usize, default: i64) -> i64 {
    match args.get(index) {
        None | Some(Value::Undefined) => default,
        Some(value) => {
            let n = value.to_number();
            if n.is_nan() {
                0
            } else {
                n.trunc().clamp(i64::MIN as f64, i64::MAX as f64) as i64
            }
        }
    }
}

/// Negative positions count back from the end.
fn relative_index(index: i64, len: usize) -> usize {
    let len = len as i64;
    if index < 0 {
        (len + index).max(0) as usize
    } else {
        index.min(len) as usize
    }
}

fn find(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    if needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| haystack[i..].starts_with(needle))
}

fn rfind(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    let last = (haystack.len() - needle.len()).min(from);
    (0..=last).rev().find(|&i| haystack[i..].starts_with(needle))
}

fn collect(chars: &[char]) -> Value {
    Value::from(chars.iter().collect::<String>())
}

/// string.charAt(index) - Empty string when out of range
fn string_char_at(this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let chars = this_chars(this, caller);
    let index = int_arg(args, 0, 0);
    if index < 0 || index as usize >= chars.len() {
        return Ok(Value::from(""));
    }
    Ok(collect(&chars[index as usize..index as usize + 1]))
}

/// string.charCodeAt(index) - NaN when out of range
fn string_char_code_at(this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let chars = this_chars(this, caller);
    let index = int_arg(args, 0, 0);
    if index < 0 || index as usize >= chars.len() {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::Number(chars[index as usize] as u32 as f64))
}

fn string_concat(this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let version = caller.vm().version();
    let mut text = primitive(this).to_string_versioned(version);
    for value in args {
        text.push_str(&value.to_string_versioned(version));
    }
    Ok(Value::from(text))
}

/// String.fromCharCode(...codes)
fn string_from_char_code(_this: &Value, args: &[Value], _caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let text: String = args
        .iter()
        .filter_map(|code| char::from_u32(code.to_uint32()))
        .collect();
    Ok(Value::from(text))
}

/// string.indexOf(search, [start]) - -1 when not found
fn string_index_of(this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let chars = this_chars(this, caller);
    let needle: Vec<char> = text_arg(args, 0, caller).chars().collect();
    let start = int_arg(args, 1, 0).max(0) as usize;
    let found = find(&chars, &needle, start).map_or(-1.0, |i| i as f64);
    Ok(Value::Number(found))
}

/// string.lastIndexOf(search, [start]) - -1 when not found
fn string_last_index_of(this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let chars = this_chars(this, caller);
    let needle: Vec<char> = text_arg(args, 0, caller).chars().collect();
    let start = int_arg(args, 1, chars.len() as i64);
    if start < 0 {
        return Ok(Value::Number(-1.0));
    }
    let found = rfind(&chars, &needle, start as usize).map_or(-1.0, |i| i as f64);
    Ok(Value::Number(found))
}

/// string.slice(start, [end]) - Negative positions count from the end
fn string_slice(this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let chars = this_chars(this, caller);
    let start = relative_index(int_arg(args, 0, 0), chars.len());
    let end = relative_index(int_arg(args, 1, chars.len() as i64), chars.len());
    if start >= end {
        return Ok(Value::from(""));
    }
    Ok(collect(&chars[start..end]))
}

/// string.split([separator]) - Array of pieces; an empty separator splits
/// into characters
fn string_split(this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let text: String = this_chars(this, caller).into_iter().collect();
    let pieces: Vec<Value> = match arg(args, 0) {
        Value::Undefined => vec![Value::from(text)],
        separator => {
            let separator = separator.to_string_versioned(caller.vm().version());
            if separator.is_empty() {
                text.chars().map(|c| Value::from(String::from(c))).collect()
            } else {
                text.split(separator.as_str()).map(Value::from).collect()
            }
        }
    };
    Ok(Value::Object(caller.vm().new_array(pieces)))
}

/// string.substr(start, [length])
fn string_substr(this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let chars = this_chars(this, caller);
    let start = relative_index(int_arg(args, 0, 0), chars.len());
    let length = int_arg(args, 1, chars.len() as i64).max(0) as usize;
    let end = start.saturating_add(length).min(chars.len());
    Ok(collect(&chars[start..end]))
}

/// string.substring(start, [end]) - Negative positions clamp to 0 and the
/// bounds are swapped when reversed
fn string_substring(this: &Value, args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let chars = this_chars(this, caller);
    let clamp = |n: i64| n.clamp(0, chars.len() as i64) as usize;
    let mut start = clamp(int_arg(args, 0, 0));
    let mut end = clamp(int_arg(args, 1, chars.len() as i64));
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }
    Ok(collect(&chars[start..end]))
}

fn string_to_lower_case(this: &Value, _args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let text: String = this_chars(this, caller).into_iter().collect();
    Ok(Value::from(text.to_lowercase()))
}

fn string_to_upper_case(this: &Value, _args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let text: String = this_chars(this, caller).into_iter().collect();
    Ok(Value::from(text.to_uppercase()))
}

fn string_to_string(this: &Value, _args: &[Value], caller: &mut dyn ValueCaller) -> Result<Value, String> {
    let text: String = this_chars(this, caller).into_iter().collect();
    Ok(Value::from(text))
}
