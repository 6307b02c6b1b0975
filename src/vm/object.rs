// ActionVM Script Objects
// Case-insensitive property tables with one level of prototype delegation

use super::value::{ObjectRef, Value, WeakObject};
use crate::host::Timeline;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Property attribute bits as used by `ASSetPropFlags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropFlags {
    bits: u8,
    protected: bool,
}

impl PropFlags {
    pub const DONT_ENUM: u8 = 0x01;
    pub const DONT_DELETE: u8 = 0x02;
    pub const READ_ONLY: u8 = 0x04;
    const MASK: u8 = 0x07;

    pub fn new(bits: u8) -> Self {
        Self {
            bits: bits & Self::MASK,
            protected: false,
        }
    }

    /// Flags that script code cannot change.
    pub fn protected(bits: u8) -> Self {
        Self {
            bits: bits & Self::MASK,
            protected: true,
        }
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn is_dont_enum(&self) -> bool {
        self.bits & Self::DONT_ENUM != 0
    }

    pub fn is_dont_delete(&self) -> bool {
        self.bits & Self::DONT_DELETE != 0
    }

    pub fn is_read_only(&self) -> bool {
        self.bits & Self::READ_ONLY != 0
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    /// Returns false (and changes nothing) when protected.
    pub fn apply(&mut self, set_true: u32, set_false: u32) -> bool {
        if self.protected {
            return false;
        }
        let bits = (self.bits as u32 & !set_false) | set_true;
        self.bits = bits as u8 & Self::MASK;
        true
    }
}

#[derive(Debug, Clone)]
pub struct Property {
    /// name as first written; lookups ignore case
    pub name: Rc<str>,
    pub value: Value,
    pub flags: PropFlags,
}

/// Getter/setter pair installed by `addProperty`.
pub struct Accessor {
    pub getter: Value,
    pub setter: Value,
    pub owner: WeakObject,
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("getter", &self.getter)
            .field("setter", &self.setter)
            .finish()
    }
}

/// A navigation target: script object backed by a timeline.
pub struct ClipData {
    pub timeline: Rc<dyn Timeline>,
    pub name: String,
    pub parent: Option<WeakObject>,
}

pub enum ObjectKind {
    Plain,
    Array,
    /// String/Number/Boolean wrapper object
    Boxed(Value),
    Clip(ClipData),
}

pub struct ScriptObject {
    members: Vec<Property>,
    index: FxHashMap<String, usize>,
    proto: Option<WeakObject>,
    kind: ObjectKind,
}

impl fmt::Debug for ScriptObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptObject")
            .field("members", &self.members)
            .finish_non_exhaustive()
    }
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Upper bound on the elements `array_values` materializes.
pub const MAX_DENSE_ELEMENTS: usize = 1 << 16;

/// Numeric member names below 2^32 - 1 are array indices.
fn array_index(name: &str) -> Option<usize> {
    name.parse::<u32>().ok().filter(|&i| i < u32::MAX).map(|i| i as usize)
}

/// Store a member through a shared handle. A clip's `_name` is rendered to
/// text before the object is borrowed, since the value may be the clip itself.
pub fn set_shared_member(object: &ObjectRef, name: &str, value: Value) -> Option<Rc<Accessor>> {
    let value = if name.eq_ignore_ascii_case("_name") && object.borrow().is_clip() {
        Value::from(value.to_string())
    } else {
        value
    };
    object.borrow_mut().set_member(name, value)
}

impl Default for ScriptObject {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptObject {
    pub fn new() -> Self {
        Self::with_kind(ObjectKind::Plain)
    }

    pub fn with_kind(kind: ObjectKind) -> Self {
        let mut obj = Self {
            members: Vec::new(),
            index: FxHashMap::default(),
            proto: None,
            kind,
        };
        if matches!(obj.kind, ObjectKind::Array) {
            obj.define("length", Value::Number(0.0), PropFlags::new(PropFlags::DONT_ENUM));
        }
        obj
    }

    pub fn new_clip(timeline: Rc<dyn Timeline>, name: &str, parent: Option<&ObjectRef>) -> Self {
        Self::with_kind(ObjectKind::Clip(ClipData {
            timeline,
            name: name.to_string(),
            parent: parent.map(Rc::downgrade),
        }))
    }

    pub fn into_ref(self) -> ObjectRef {
        Rc::new(RefCell::new(self))
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, ObjectKind::Array)
    }

    pub fn is_clip(&self) -> bool {
        matches!(self.kind, ObjectKind::Clip(_))
    }

    pub fn clip(&self) -> Option<&ClipData> {
        match &self.kind {
            ObjectKind::Clip(clip) => Some(clip),
            _ => None,
        }
    }

    pub fn timeline(&self) -> Option<Rc<dyn Timeline>> {
        self.clip().map(|clip| clip.timeline.clone())
    }

    pub fn clip_parent(&self) -> Option<ObjectRef> {
        self.clip()
            .and_then(|clip| clip.parent.as_ref())
            .and_then(|parent| parent.upgrade())
    }

    pub fn boxed_value(&self) -> Option<&Value> {
        match &self.kind {
            ObjectKind::Boxed(value) => Some(value),
            _ => None,
        }
    }

    pub fn proto(&self) -> Option<ObjectRef> {
        self.proto.as_ref().and_then(|proto| proto.upgrade())
    }

    pub fn set_proto(&mut self, proto: Option<&ObjectRef>) {
        self.proto = proto.map(Rc::downgrade);
    }

    pub fn get_own(&self, name: &str) -> Option<&Property> {
        self.index.get(&key(name)).map(|&slot| &self.members[slot])
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.index.contains_key(&key(name))
    }

    /// Own member, clip pseudo-property, or the prototype's own member.
    /// Accessors come back unresolved.
    pub fn get_member(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.clip_property(name) {
            return Some(value);
        }
        if let Some(prop) = self.get_own(name) {
            return Some(prop.value.clone());
        }
        let proto = self.proto()?;
        let inherited = proto.borrow().get_own(name).map(|prop| prop.value.clone());
        inherited
    }

    /// Store a member. When the slot (own or inherited) holds an accessor,
    /// nothing is stored and the accessor is returned so the caller can run
    /// its setter. Read-only is not checked here.
    pub fn set_member(&mut self, name: &str, value: Value) -> Option<Rc<Accessor>> {
        if let Some(&slot) = self.index.get(&key(name)) {
            if let Value::Accessor(accessor) = &self.members[slot].value {
                return Some(accessor.clone());
            }
        } else if let Some(proto) = self.proto() {
            let inherited = proto.borrow().get_own(name).map(|prop| prop.value.clone());
            if let Some(Value::Accessor(accessor)) = inherited {
                return Some(accessor);
            }
        }

        if let ObjectKind::Clip(clip) = &mut self.kind {
            if name.eq_ignore_ascii_case("_name") {
                // Object values must be rendered by the caller; see `set_shared_member`.
                clip.name = match &value {
                    Value::Object(_) => "[object Object]".to_string(),
                    other => other.to_string(),
                };
                return None;
            }
        }

        if let ObjectKind::Array = self.kind {
            if let Some(index) = array_index(name) {
                if index >= self.array_len() {
                    self.put("length", Value::Number(index as f64 + 1.0), None);
                }
            }
        }

        self.put(name, value, None);
        None
    }

    /// Insert or overwrite a member together with its flags.
    pub fn define(&mut self, name: &str, value: Value, flags: PropFlags) {
        self.put(name, value, Some(flags));
    }

    fn put(&mut self, name: &str, value: Value, flags: Option<PropFlags>) {
        let k = key(name);
        match self.index.get(&k) {
            Some(&slot) => {
                let prop = &mut self.members[slot];
                prop.value = value;
                if let Some(flags) = flags {
                    prop.flags = flags;
                }
            }
            None => {
                self.index.insert(k, self.members.len());
                self.members.push(Property {
                    name: Rc::from(name),
                    value,
                    flags: flags.unwrap_or_default(),
                });
            }
        }
    }

    /// `ASSetPropFlags` on one member; false if missing or protected.
    pub fn set_flags(&mut self, name: &str, set_true: u32, set_false: u32) -> bool {
        match self.index.get(&key(name)) {
            Some(&slot) => self.members[slot].flags.apply(set_true, set_false),
            None => false,
        }
    }

    pub fn set_all_flags(&mut self, set_true: u32, set_false: u32) {
        for prop in &mut self.members {
            prop.flags.apply(set_true, set_false);
        }
    }

    /// Names visited by `for..in`: own enumerable members first, then the
    /// prototype's enumerable members that are not shadowed.
    pub fn enumerate_keys(&self) -> Vec<Rc<str>> {
        let mut keys: Vec<Rc<str>> = self
            .members
            .iter()
            .filter(|prop| !prop.flags.is_dont_enum())
            .map(|prop| prop.name.clone())
            .collect();

        if let Some(proto) = self.proto() {
            let proto = proto.borrow();
            for prop in &proto.members {
                if !prop.flags.is_dont_enum() && !self.has_own(&prop.name) {
                    keys.push(prop.name.clone());
                }
            }
        }
        keys
    }

    pub fn member_names(&self) -> Vec<Rc<str>> {
        self.members.iter().map(|prop| prop.name.clone()).collect()
    }

    /// Stored `length`, clamped to the uint32 range. A reference stored in
    /// `length` counts as 0, since coercing it could borrow this object.
    pub fn array_len(&self) -> usize {
        self.get_own("length")
            .map(|prop| match &prop.value {
                Value::Object(_) => 0.0,
                other => other.to_number(),
            })
            .filter(|n| n.is_finite() && *n > 0.0)
            .map(|n| n.min(u32::MAX as f64) as usize)
            .unwrap_or(0)
    }

    /// Elements `0..length`, gaps as undefined. At most `MAX_DENSE_ELEMENTS`
    /// are produced.
    pub fn array_values(&self) -> Vec<Value> {
        (0..self.array_len().min(MAX_DENSE_ELEMENTS))
            .map(|i| {
                self.get_own(&i.to_string())
                    .map(|prop| prop.value.clone())
                    .unwrap_or_default()
            })
            .collect()
    }

    pub fn array_push(&mut self, value: Value) -> usize {
        let len = self.array_len();
        self.put(&len.to_string(), value, None);
        self.put("length", Value::Number(len as f64 + 1.0), None);
        len + 1
    }

    pub fn array_pop(&mut self) -> Value {
        let len = self.array_len();
        if len == 0 {
            return Value::Undefined;
        }
        let last = (len - 1).to_string();
        let value = self
            .get_own(&last)
            .map(|prop| prop.value.clone())
            .unwrap_or_default();
        self.put(&last, Value::Undefined, None);
        self.put("length", Value::Number((len - 1) as f64), None);
        value
    }

    /// Slash-syntax path of a clip, `/` for the root.
    pub fn target_path(&self) -> String {
        let Some(clip) = self.clip() else {
            return String::new();
        };
        let mut parent = self.clip_parent();
        if parent.is_none() {
            return "/".to_string();
        }
        let mut names = vec![clip.name.clone()];
        while let Some(current) = parent {
            let current = current.borrow();
            let next = current.clip_parent();
            if next.is_some() {
                if let Some(c) = current.clip() {
                    names.push(c.name.clone());
                }
            }
            parent = next;
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    fn clip_property(&self, name: &str) -> Option<Value> {
        let clip = self.clip()?;
        let value = match key(name).as_str() {
            "_name" => Value::from(clip.name.as_str()),
            "_currentframe" => Value::Number(clip.timeline.current_frame() as f64 + 1.0),
            "_totalframes" | "_framesloaded" => Value::Number(clip.timeline.frame_count() as f64),
            "_parent" => Value::Object(self.clip_parent()?),
            "_target" => Value::from(self.target_path()),
            _ => return None,
        };
        Some(value)
    }

    /// The "get text value" hook used by string conversion.
    pub fn text_value(&self, version: u8, depth: usize) -> Option<String> {
        match &self.kind {
            ObjectKind::Plain => None,
            ObjectKind::Boxed(value) => Some(value.render(version, depth)),
            ObjectKind::Array => Some(
                self.array_values()
                    .iter()
                    .map(|v| v.render(version, depth))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            ObjectKind::Clip(_) => {
                let path = self.target_path();
                Some(format!("_level0{}", path.trim_end_matches('/').replace('/', ".")))
            }
        }
    }
}
