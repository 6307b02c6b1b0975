// ActionVM Runtime Values
// Tagged value type and the coercion rules the action opcodes rely on

use super::caller::NativeFn;
use super::closure::Closure;
use super::object::{Accessor, ScriptObject};
use regex::Regex;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::OnceLock;

pub type ObjectRef = Rc<RefCell<ScriptObject>>;
pub type WeakObject = Weak<RefCell<ScriptObject>>;

/// Nested objects deeper than this render as empty text.
const MAX_TEXT_DEPTH: usize = 16;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    String(Rc<str>),
    Number(f64),
    Object(ObjectRef),
    NativeFn(NativeFn),
    ScriptFn(Rc<Closure>),
    /// getter/setter pair stored in a property slot
    Accessor(Rc<Accessor>),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::NativeFn(_) | Value::ScriptFn(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Result of the `typeof` action.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Object(obj) => {
                if obj.borrow().is_clip() {
                    "movieclip"
                } else {
                    "object"
                }
            }
            Value::NativeFn(_) | Value::ScriptFn(_) => "function",
            Value::Accessor(_) => "object",
        }
    }

    /// The object behind this value, if any. A script function exposes its
    /// property object (where `prototype` lives).
    pub fn to_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj.clone()),
            Value::ScriptFn(closure) => Some(closure.properties()),
            _ => None,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined | Value::Null => 0.0,
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            // Non-numeric text converts to 0 rather than NaN
            Value::String(s) => parse_number_strict(s).unwrap_or(0.0),
            Value::Object(obj) => {
                let obj = obj.borrow();
                if let Some(inner) = obj.boxed_value() {
                    return inner.to_number();
                }
                obj.text_value(7, 0)
                    .map(|text| parse_leading_number(&text))
                    .unwrap_or(0.0)
            }
            Value::NativeFn(_) | Value::ScriptFn(_) | Value::Accessor(_) => 0.0,
        }
    }

    pub fn to_bool(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => match &**s {
                "false" => false,
                "true" => true,
                _ => {
                    let n = self.to_number();
                    n != 0.0 && !n.is_nan()
                }
            },
            Value::Object(_) | Value::NativeFn(_) | Value::ScriptFn(_) | Value::Accessor(_) => true,
        }
    }

    /// String conversion for a given movie version; versions up to 6
    /// render undefined as the empty string.
    pub fn to_string_versioned(&self, version: u8) -> String {
        self.render(version, 0)
    }

    pub(crate) fn render(&self, version: u8, depth: usize) -> String {
        match self {
            Value::Undefined => {
                if version <= 6 {
                    String::new()
                } else {
                    "undefined".to_string()
                }
            }
            Value::Null => "null".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::String(s) => s.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Object(obj) => {
                if depth >= MAX_TEXT_DEPTH {
                    return String::new();
                }
                obj.borrow()
                    .text_value(version, depth + 1)
                    .unwrap_or_else(|| "[object Object]".to_string())
            }
            Value::NativeFn(_) | Value::ScriptFn(_) => "[type Function]".to_string(),
            Value::Accessor(_) => "[property]".to_string(),
        }
    }

    pub fn to_int32(&self) -> i32 {
        let n = self.to_number();
        if !n.is_finite() {
            return 0;
        }
        (n.trunc() % 4_294_967_296.0) as i64 as u32 as i32
    }

    pub fn to_uint32(&self) -> u32 {
        self.to_int32() as u32
    }

    /// Loose equality used by the typed `equal` action.
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::String(a), _) => **a == *other.to_string(),
            (Value::Number(a), _) => *a == other.to_number(),
            (Value::Boolean(a), _) => *a == other.to_bool(),
            (_, Value::String(_) | Value::Number(_) | Value::Boolean(_)) => other.loose_equals(self),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::ScriptFn(a), Value::ScriptFn(b)) => Rc::ptr_eq(a, b),
            (Value::NativeFn(a), Value::NativeFn(b)) => *a as usize == *b as usize,
            (Value::Accessor(a), Value::Accessor(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Same type tag, then loose equality.
    pub fn strict_equals(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other) && self.loose_equals(other)
    }

    /// Typed less-than: a string left operand compares as text.
    pub fn typed_less(&self, other: &Value) -> bool {
        if self.is_string() {
            *self.to_string() < *other.to_string()
        } else {
            self.to_number() < other.to_number()
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(u8::MAX, 0))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Object(obj) => write!(f, "<object {:p}>", Rc::as_ptr(obj)),
            Value::NativeFn(_) => write!(f, "<native fn>"),
            Value::ScriptFn(closure) => write!(f, "<fn {}>", closure.name),
            Value::Accessor(_) => write!(f, "<accessor>"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}

/// Format a number the way `%.14g` does, with NaN and the infinities spelled out.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }

    let scientific = format!("{:.13e}", n);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some(parts) => parts,
        None => return scientific,
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if !(-4..14).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs())
    } else {
        let decimals = (13 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, n)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn strict_number_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"^[\t\n\x0B\x0C\r ]*([+-])?(?:0[xX]([0-9a-fA-F]+)|((?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?)|((?i:inf(?:inity)?))|((?i:nan)))$",
            )
            .ok()
        })
        .as_ref()
}

fn leading_number_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^[\t\n\x0B\x0C\r ]*[+-]?(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?").ok()
        })
        .as_ref()
}

/// Whole-string numeric literal scan; any trailing garbage is a failure.
pub fn parse_number_strict(text: &str) -> Option<f64> {
    let caps = strict_number_pattern()?.captures(text)?;
    let negative = caps.get(1).map(|m| m.as_str() == "-").unwrap_or(false);

    let magnitude = if let Some(hex) = caps.get(2) {
        hex.as_str()
            .chars()
            .filter_map(|c| c.to_digit(16))
            .fold(0.0, |acc, digit| acc * 16.0 + digit as f64)
    } else if let Some(decimal) = caps.get(3) {
        decimal.as_str().parse::<f64>().ok()?
    } else if caps.get(4).is_some() {
        f64::INFINITY
    } else {
        f64::NAN
    };

    Some(if negative { -magnitude } else { magnitude })
}

/// Parse the longest numeric prefix, 0 when there is none.
pub fn parse_leading_number(text: &str) -> f64 {
    leading_number_pattern()
        .and_then(|pattern| pattern.find(text))
        .and_then(|m| m.as_str().trim_start().parse::<f64>().ok())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(8.0), "8");
        assert_eq!(format_number(-2.5), "-2.5");
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(1.0 / 3.0), "0.33333333333333");
        assert_eq!(format_number(1e15), "1e+15");
        assert_eq!(format_number(0.00001), "1e-05");
        assert_eq!(format_number(0.0001), "0.0001");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(-0.0), "0");
    }

    #[test]
    fn test_numeric_strings_round_trip() {
        for literal in ["0", "12", "-3", "12.5", "0.25", "1e+20", "Infinity", "-Infinity"] {
            let n = Value::from(literal).to_number();
            assert_eq!(format_number(n), literal);
        }
    }

    #[test]
    fn test_strict_scanner() {
        assert_eq!(parse_number_strict("  42"), Some(42.0));
        assert_eq!(parse_number_strict("0x1F"), Some(31.0));
        assert_eq!(parse_number_strict(".5e1"), Some(5.0));
        assert_eq!(parse_number_strict("12abc"), None);
        assert_eq!(parse_number_strict("42 "), None);
        assert_eq!(parse_number_strict(""), None);
        assert!(parse_number_strict("nan").unwrap().is_nan());
    }

    #[test]
    fn test_non_numeric_string_is_zero() {
        assert_eq!(Value::from("hello").to_number(), 0.0);
        assert_eq!(Value::from("3px").to_number(), 0.0);
        assert_eq!(parse_leading_number("3px"), 3.0);
    }

    #[test]
    fn test_to_bool() {
        assert!(Value::from("true").to_bool());
        assert!(!Value::from("false").to_bool());
        assert!(Value::from("2").to_bool());
        assert!(!Value::from("abc").to_bool());
        assert!(!Value::Number(f64::NAN).to_bool());
        assert!(!Value::Number(0.0).to_bool());
        assert!(!Value::Undefined.to_bool());
    }

    #[test]
    fn test_versioned_undefined() {
        assert_eq!(Value::Undefined.to_string_versioned(6), "");
        assert_eq!(Value::Undefined.to_string_versioned(7), "undefined");
        assert_eq!(Value::Undefined.to_string(), "undefined");
    }

    #[test]
    fn test_equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::from("5").loose_equals(&Value::Number(5.0)));
        assert!(!Value::from("5.0").loose_equals(&Value::Number(5.0)));
        assert!(Value::Number(5.0).loose_equals(&Value::from("5")));
        assert!(Value::Boolean(true).loose_equals(&Value::Number(1.0)));
        assert!(!Value::Number(1.0).strict_equals(&Value::from("1")));
    }

    #[test]
    fn test_int32_wraps() {
        assert_eq!(Value::Number(4_294_967_295.0).to_int32(), -1);
        assert_eq!(Value::Number(-1.5).to_int32(), -1);
        assert_eq!(Value::Number(f64::INFINITY).to_int32(), 0);
        assert_eq!(Value::Number(-1.0).to_uint32(), u32::MAX);
    }

    #[test]
    fn test_typed_less() {
        assert!(Value::from("abc").typed_less(&Value::from("abd")));
        assert!(Value::from("10").typed_less(&Value::from("9")));
        assert!(!Value::Number(10.0).typed_less(&Value::from("9")));
    }
}
