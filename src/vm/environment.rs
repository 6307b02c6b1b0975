// ActionVM Environment
// Live machine state for one execution context: operand stack, named locals
// with frame barriers, registers, and the navigation target

use super::object::{set_shared_member, Accessor};
use super::value::{ObjectRef, Value, WeakObject};
use crate::error::Diagnostic;
use smallvec::SmallVec;
use std::rc::Rc;

pub const GLOBAL_REGISTER_COUNT: usize = 4;
pub const MAX_WITH_DEPTH: usize = 8;

/// One `with` scope: the object and the pc where the block ends.
#[derive(Debug, Clone)]
pub struct WithEntry {
    pub object: ObjectRef,
    pub end_pc: usize,
}

pub type WithStack = SmallVec<[WithEntry; MAX_WITH_DEPTH]>;

/// A with-stack entry captured by a closure; the object may be gone by the
/// time the closure runs.
#[derive(Debug, Clone)]
pub struct WeakWithEntry {
    pub object: WeakObject,
    pub end_pc: usize,
}

impl WeakWithEntry {
    pub fn capture(stack: &[WithEntry]) -> Vec<WeakWithEntry> {
        stack
            .iter()
            .map(|entry| WeakWithEntry {
                object: Rc::downgrade(&entry.object),
                end_pc: entry.end_pc,
            })
            .collect()
    }

    /// Live entries only.
    pub fn restore(snapshot: &[WeakWithEntry]) -> WithStack {
        snapshot
            .iter()
            .filter_map(|entry| {
                entry.object.upgrade().map(|object| WithEntry {
                    object,
                    end_pc: entry.end_pc,
                })
            })
            .collect()
    }
}

/// An accessor write discovered while resolving an assignment.
#[derive(Debug)]
pub struct PendingSetter {
    pub accessor: Rc<Accessor>,
    pub this: Value,
    pub value: Value,
}

#[derive(Debug, Clone)]
struct LocalSlot {
    /// empty = frame barrier
    name: Rc<str>,
    value: Value,
}

pub struct Environment {
    stack: Vec<Value>,
    locals: Vec<LocalSlot>,
    global_registers: [Value; GLOBAL_REGISTER_COUNT],
    local_registers: Vec<Value>,
    register_windows: Vec<usize>,
    target: ObjectRef,
    global: ObjectRef,
    verbose: bool,
}

/// Split `path:var` (or `path.var`, `path/var`) into its parts.
/// The last `:` wins; without one the last `.` or `/` is used.
pub fn parse_path(var_path: &str) -> Option<(&str, &str)> {
    let split = var_path
        .rfind(':')
        .or_else(|| var_path.rfind(&['.', '/'][..]))?;
    let path = &var_path[..split];
    let var = &var_path[split + 1..];
    let path = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    };
    Some((path, var))
}

fn has_path_separator(name: &str) -> bool {
    name.contains(&[':', '.', '/'][..])
}

impl Environment {
    pub fn new(target: ObjectRef, global: ObjectRef) -> Self {
        Self {
            stack: Vec::new(),
            locals: Vec::new(),
            global_registers: Default::default(),
            local_registers: Vec::new(),
            register_windows: Vec::new(),
            target,
            global,
            verbose: false,
        }
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    // Operand stack

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Undefined when empty.
    pub fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or_default()
    }

    /// Value `n` slots below the top; undefined past the bottom.
    pub fn top(&self, n: usize) -> Value {
        self.stack
            .len()
            .checked_sub(n + 1)
            .and_then(|i| self.stack.get(i))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_top(&mut self, n: usize, value: Value) {
        if let Some(i) = self.stack.len().checked_sub(n + 1) {
            self.stack[i] = value;
        }
    }

    pub fn drop(&mut self, count: usize) {
        let len = self.stack.len().saturating_sub(count);
        self.stack.truncate(len);
    }

    /// Value at absolute index `index` from the bottom.
    pub fn bottom(&self, index: usize) -> Value {
        self.stack.get(index).cloned().unwrap_or_default()
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    /// Argument `n` of a call whose first argument sits at `first_arg`.
    pub fn arg(&self, first_arg: usize, n: usize) -> Value {
        match first_arg.checked_sub(n) {
            Some(index) => self.bottom(index),
            None => Value::Undefined,
        }
    }

    // Named locals

    fn find_local(&self, name: &str) -> Option<usize> {
        for (i, slot) in self.locals.iter().enumerate().rev() {
            if slot.name.is_empty() {
                return None;
            }
            if &*slot.name == name {
                return Some(i);
            }
        }
        None
    }

    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.find_local(name).map(|i| self.locals[i].value.clone())
    }

    /// Assign in the current frame, adding the local if needed.
    pub fn set_local(&mut self, name: &str, value: Value) {
        match self.find_local(name) {
            Some(i) => self.locals[i].value = value,
            None => self.add_local(name, value),
        }
    }

    /// Make sure `name` exists in the current frame; leaves an existing value alone.
    pub fn declare_local(&mut self, name: &str) {
        if self.find_local(name).is_none() {
            self.add_local(name, Value::Undefined);
        }
    }

    pub fn add_local(&mut self, name: &str, value: Value) {
        if name.is_empty() {
            return;
        }
        self.locals.push(LocalSlot {
            name: Rc::from(name),
            value,
        });
    }

    pub fn add_frame_barrier(&mut self) {
        self.locals.push(LocalSlot {
            name: Rc::from(""),
            value: Value::Undefined,
        });
    }

    pub fn local_frame_top(&self) -> usize {
        self.locals.len()
    }

    pub fn set_local_frame_top(&mut self, top: usize) {
        self.locals.truncate(top);
    }

    // Registers

    pub fn push_register_window(&mut self, count: usize) {
        self.register_windows.push(self.local_registers.len());
        self.local_registers
            .resize(self.local_registers.len() + count, Value::Undefined);
    }

    pub fn pop_register_window(&mut self) {
        if let Some(start) = self.register_windows.pop() {
            self.local_registers.truncate(start);
        }
    }

    fn register_index(&self, register: usize, local: bool) -> Result<usize, Diagnostic> {
        if local {
            let start = self
                .register_windows
                .last()
                .copied()
                .ok_or_else(|| Diagnostic::malformed("local register used outside a function2"))?;
            let index = start + register;
            if index < self.local_registers.len() {
                return Ok(index);
            }
            Err(Diagnostic::malformed(format!(
                "local register {} out of range ({} allocated)",
                register,
                self.local_registers.len() - start
            )))
        } else if register < GLOBAL_REGISTER_COUNT {
            Ok(register)
        } else {
            Err(Diagnostic::malformed(format!(
                "global register {} out of range",
                register
            )))
        }
    }

    /// Out-of-range access yields global register 0 along with the diagnostic.
    pub fn register(&self, register: usize, local: bool) -> Result<Value, (Value, Diagnostic)> {
        match self.register_index(register, local) {
            Ok(index) if local => Ok(self.local_registers[index].clone()),
            Ok(index) => Ok(self.global_registers[index].clone()),
            Err(diag) => Err((self.global_registers[0].clone(), diag)),
        }
    }

    /// Out-of-range writes land in global register 0.
    pub fn set_register(&mut self, register: usize, local: bool, value: Value) -> Result<(), Diagnostic> {
        match self.register_index(register, local) {
            Ok(index) if local => {
                self.local_registers[index] = value;
                Ok(())
            }
            Ok(index) => {
                self.global_registers[index] = value;
                Ok(())
            }
            Err(diag) => {
                self.global_registers[0] = value;
                Err(diag)
            }
        }
    }

    /// Register `register` of the innermost window.
    pub fn local_register(&self, register: usize) -> Option<Value> {
        let start = *self.register_windows.last()?;
        self.local_registers.get(start + register).cloned()
    }

    pub fn global_register(&self, register: usize) -> Value {
        self.global_registers
            .get(register)
            .cloned()
            .unwrap_or_default()
    }

    // Targets

    pub fn target(&self) -> ObjectRef {
        self.target.clone()
    }

    pub fn set_target(&mut self, target: ObjectRef) {
        self.target = target;
    }

    pub fn global(&self) -> ObjectRef {
        self.global.clone()
    }

    /// Topmost clip above the current target.
    pub fn root(&self) -> ObjectRef {
        let mut current = self.target.clone();
        loop {
            let parent = current.borrow().clip_parent();
            match parent {
                Some(parent) => current = parent,
                None => return current,
            }
        }
    }

    /// Resolve a slash- or dot-separated target path against the current target.
    pub fn find_target(&self, path: &str) -> Option<ObjectRef> {
        if path.is_empty() {
            return Some(self.target.clone());
        }

        let (mut current, rest) = match path.strip_prefix('/') {
            Some(rest) => (self.root(), rest),
            None => (self.target.clone(), path),
        };

        let components: Vec<&str> = if rest.contains('/') {
            rest.split('/').collect()
        } else {
            rest.split('.').collect()
        };

        for component in components.into_iter().filter(|c| !c.is_empty()) {
            let next = match component {
                ".." | "_parent" => current.borrow().clip_parent(),
                "_root" | "_level0" => Some(self.root()),
                "_global" => Some(self.global.clone()),
                "this" | "." => Some(current.clone()),
                name => {
                    let member = current.borrow().get_member(name);
                    member.and_then(|v| v.to_object())
                }
            };
            current = next?;
        }
        Some(current)
    }

    // Variables

    /// Path-aware variable read. An unresolvable path is an error.
    pub fn get_variable(&self, name: &str, with_stack: &[WithEntry]) -> Result<Value, Diagnostic> {
        if let Some((path, var)) = parse_path(name) {
            return match self.find_target(path) {
                Some(target) => {
                    let value = target.borrow().get_member(var);
                    Ok(value.unwrap_or_default())
                }
                None => Err(Diagnostic::missing(format!(
                    "can't find target '{}' for variable '{}'",
                    path, name
                ))),
            };
        }
        Ok(self.get_variable_raw(name, with_stack))
    }

    /// Plain-name read through the scope chain.
    pub fn get_variable_raw(&self, name: &str, with_stack: &[WithEntry]) -> Value {
        if has_path_separator(name) {
            return Value::Undefined;
        }

        for entry in with_stack.iter().rev() {
            let member = entry.object.borrow().get_member(name);
            if let Some(value) = member {
                return value;
            }
        }

        if let Some(value) = self.get_local(name) {
            return value;
        }

        if name == "this" {
            return Value::Object(self.target.clone());
        }

        let member = self.target.borrow().get_member(name);
        if let Some(value) = member {
            return value;
        }

        match name {
            "_root" | "_level0" => return Value::Object(self.root()),
            "_global" => return Value::Object(self.global.clone()),
            _ => {}
        }

        let global = self.global.borrow().get_member(name);
        if let Some(value) = global {
            return value;
        }

        if self.verbose {
            log::debug!("variable '{}' not found", name);
        }
        Value::Undefined
    }

    /// Path-aware variable write.
    pub fn set_variable(
        &mut self,
        name: &str,
        value: Value,
        with_stack: &[WithEntry],
    ) -> Result<Option<PendingSetter>, Diagnostic> {
        if self.verbose {
            log::debug!("set variable '{}' = {}", name, value);
        }
        if let Some((path, var)) = parse_path(name) {
            let target = self.find_target(path).ok_or_else(|| {
                Diagnostic::missing(format!(
                    "can't find target '{}' for variable '{}'",
                    path, name
                ))
            })?;
            return Ok(Self::store_member(&target, var, value));
        }
        Ok(self.set_variable_raw(name, value, with_stack))
    }

    /// Assignment target: the innermost with-object having the member, then a
    /// local of the current frame, then the navigation target.
    pub fn set_variable_raw(
        &mut self,
        name: &str,
        value: Value,
        with_stack: &[WithEntry],
    ) -> Option<PendingSetter> {
        for entry in with_stack.iter().rev() {
            let exposes = entry.object.borrow().get_member(name).is_some();
            if exposes {
                return Self::store_member(&entry.object, name, value);
            }
        }

        if let Some(i) = self.find_local(name) {
            self.locals[i].value = value;
            return None;
        }

        let target = self.target.clone();
        Self::store_member(&target, name, value)
    }

    fn store_member(object: &ObjectRef, name: &str, value: Value) -> Option<PendingSetter> {
        let accessor = set_shared_member(object, name, value.clone())?;
        Some(PendingSetter {
            accessor,
            this: Value::Object(object.clone()),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MovieClip;
    use crate::vm::object::ScriptObject;

    fn env() -> Environment {
        let target = ScriptObject::new().into_ref();
        let global = ScriptObject::new().into_ref();
        Environment::new(target, global)
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(parse_path("/clip:x"), Some(("/clip", "x")));
        assert_eq!(parse_path("a.b.c"), Some(("a.b", "c")));
        assert_eq!(parse_path("a:b.c"), Some(("a", "b.c")));
        assert_eq!(parse_path("/x"), Some(("", "x")));
        assert_eq!(parse_path("plain"), None);
    }

    #[test]
    fn test_stack_is_tolerant() {
        let mut env = env();
        assert!(env.pop().is_undefined());
        env.push(Value::Number(1.0));
        env.push(Value::Number(2.0));
        assert_eq!(env.top(1), Value::Number(1.0));
        assert!(env.top(5).is_undefined());
        env.drop(10);
        assert_eq!(env.stack_size(), 0);
    }

    #[test]
    fn test_locals_stop_at_barrier() {
        let mut env = env();
        env.set_local("x", Value::Number(1.0));
        env.add_frame_barrier();
        assert_eq!(env.get_local("x"), None);
        env.set_local("x", Value::Number(2.0));
        assert_eq!(env.get_local("x"), Some(Value::Number(2.0)));

        env.set_local_frame_top(1);
        assert_eq!(env.get_local("x"), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_declare_local_keeps_existing_value() {
        let mut env = env();
        env.set_local("x", Value::Number(3.0));
        env.declare_local("x");
        assert_eq!(env.get_local("x"), Some(Value::Number(3.0)));
        env.declare_local("y");
        assert_eq!(env.get_local("y"), Some(Value::Undefined));
    }

    #[test]
    fn test_scope_resolution_order() {
        let mut env = env();
        env.global()
            .borrow_mut()
            .set_member("v", Value::from("global"));
        assert_eq!(env.get_variable_raw("v", &[]), Value::from("global"));

        env.target()
            .borrow_mut()
            .set_member("v", Value::from("target"));
        assert_eq!(env.get_variable_raw("v", &[]), Value::from("target"));

        env.set_local("v", Value::from("local"));
        assert_eq!(env.get_variable_raw("v", &[]), Value::from("local"));

        let scope = ScriptObject::new().into_ref();
        scope.borrow_mut().set_member("v", Value::from("with"));
        let with_stack = [WithEntry {
            object: scope,
            end_pc: 100,
        }];
        assert_eq!(env.get_variable_raw("v", &with_stack), Value::from("with"));
    }

    #[test]
    fn test_set_variable_targets() {
        let mut env = env();
        env.set_variable("a", Value::Number(1.0), &[]).unwrap();
        assert_eq!(
            env.target().borrow().get_member("a"),
            Some(Value::Number(1.0))
        );

        env.set_local("b", Value::Null);
        env.set_variable("b", Value::Number(2.0), &[]).unwrap();
        assert_eq!(env.get_local("b"), Some(Value::Number(2.0)));
        assert!(env.target().borrow().get_member("b").is_none());
    }

    #[test]
    fn test_register_out_of_range_substitutes_global_zero() {
        let mut env = env();
        env.set_register(0, false, Value::from("zero")).unwrap();
        let err = env.register(9, false).unwrap_err();
        assert_eq!(err.0, Value::from("zero"));

        assert!(env.set_register(2, true, Value::Null).is_err());
        assert_eq!(env.global_register(0), Value::Null);

        env.push_register_window(3);
        env.set_register(2, true, Value::Number(7.0)).unwrap();
        assert_eq!(env.local_register(2), Some(Value::Number(7.0)));
        env.pop_register_window();
        assert_eq!(env.local_register(2), None);
    }

    #[test]
    fn test_find_target_through_clips() {
        let root_timeline = Rc::new(MovieClip::new());
        let root = ScriptObject::new_clip(root_timeline.clone(), "_level0", None).into_ref();
        let child = ScriptObject::new_clip(root_timeline, "child", Some(&root)).into_ref();
        root.borrow_mut()
            .set_member("child", Value::Object(child.clone()));

        let env = Environment::new(child.clone(), ScriptObject::new().into_ref());
        assert!(Rc::ptr_eq(&env.root(), &root));
        assert!(Rc::ptr_eq(&env.find_target("..").unwrap(), &root));
        assert!(Rc::ptr_eq(&env.find_target("/child").unwrap(), &child));
        assert!(Rc::ptr_eq(&env.find_target("_root.child").unwrap(), &child));
        assert!(env.find_target("/nothing").is_none());
        assert_eq!(child.borrow().target_path(), "/child");
    }

    #[test]
    fn test_path_variable() {
        let root_timeline = Rc::new(MovieClip::new());
        let root = ScriptObject::new_clip(root_timeline, "_level0", None).into_ref();
        root.borrow_mut().set_member("score", Value::Number(10.0));
        let mut env = Environment::new(root, ScriptObject::new().into_ref());

        assert_eq!(env.get_variable("/:score", &[]).unwrap(), Value::Number(10.0));
        env.set_variable("/:score", Value::Number(11.0), &[]).unwrap();
        assert_eq!(env.get_variable("_root.score", &[]).unwrap(), Value::Number(11.0));
        assert!(env.get_variable("nowhere:score", &[]).is_err());
    }

    #[test]
    fn test_with_snapshot_drops_released_objects() {
        let kept = ScriptObject::new().into_ref();
        let released = ScriptObject::new().into_ref();
        let stack = [
            WithEntry {
                object: kept.clone(),
                end_pc: 10,
            },
            WithEntry {
                object: released,
                end_pc: 20,
            },
        ];
        let snapshot = WeakWithEntry::capture(&stack);
        drop(stack);

        let restored = WeakWithEntry::restore(&snapshot);
        assert_eq!(restored.len(), 1);
        assert!(Rc::ptr_eq(&restored[0].object, &kept));
        assert_eq!(restored[0].end_pc, 10);
    }
}
