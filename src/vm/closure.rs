// ActionVM Closures
// Script functions and their two calling conventions. Binding is kept free
// of the interpreter so each convention can be exercised on its own.

use super::environment::{Environment, WeakWithEntry, WithEntry, WithStack};
use super::object::ScriptObject;
use super::value::{ObjectRef, Value, WeakObject};
use crate::bytecode::{ActionBuffer, FunctionHeader};
use crate::error::Diagnostic;
use std::cell::OnceCell;
use std::rc::Rc;

// function2 implicit-binding flags
pub const PRELOAD_THIS: u16 = 0x0001;
pub const SUPPRESS_THIS: u16 = 0x0002;
pub const PRELOAD_ARGUMENTS: u16 = 0x0004;
pub const SUPPRESS_ARGUMENTS: u16 = 0x0008;
pub const PRELOAD_SUPER: u16 = 0x0010;
pub const SUPPRESS_SUPER: u16 = 0x0020;
pub const PRELOAD_ROOT: u16 = 0x0040;
pub const PRELOAD_PARENT: u16 = 0x0080;
pub const PRELOAD_GLOBAL: u16 = 0x0100;

/// Everything a convention may bind on entry, gathered by the caller.
#[derive(Debug, Clone, Default)]
pub struct CallSite {
    pub this: Option<Value>,
    pub args: Vec<Value>,
    /// navigation target, stands in for a missing `this`
    pub target: Value,
    pub super_proto: Option<Value>,
    pub arguments: Option<Value>,
    pub root: Value,
    pub parent: Value,
    pub global: Value,
}

#[derive(Debug, Clone)]
pub struct ClassicConvention {
    pub args: Vec<Rc<str>>,
}

impl ClassicConvention {
    /// Declared arguments become named locals; extra call-site values are
    /// dropped and missing ones are not created.
    pub fn bind(&self, env: &mut Environment, site: &CallSite) -> Vec<Diagnostic> {
        for (name, value) in self.args.iter().zip(site.args.iter()) {
            env.add_local(name, value.clone());
        }
        if let Some(this) = &site.this {
            env.add_local("this", this.clone());
            if let Some(super_proto) = &site.super_proto {
                env.add_local("super", super_proto.clone());
            }
        }
        Vec::new()
    }
}

#[derive(Debug, Clone)]
pub struct RegisterArg {
    /// 0 binds a named local instead
    pub register: u8,
    pub name: Rc<str>,
}

#[derive(Debug, Clone)]
pub struct RegisterConvention {
    pub args: Vec<RegisterArg>,
    pub register_count: u8,
    pub flags: u16,
}

impl RegisterConvention {
    pub fn needs_arguments(&self) -> bool {
        self.flags & PRELOAD_ARGUMENTS != 0 || self.flags & SUPPRESS_ARGUMENTS == 0
    }

    fn needs_super(&self) -> bool {
        self.flags & PRELOAD_SUPER != 0 || self.flags & SUPPRESS_SUPER == 0
    }

    /// Opens a register window and preloads it. Preloaded values take
    /// registers 1, 2, ... in flag order.
    pub fn bind(&self, env: &mut Environment, site: &CallSite) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        env.push_register_window(self.register_count as usize);

        for (arg, value) in self.args.iter().zip(site.args.iter()) {
            if arg.register == 0 {
                env.add_local(&arg.name, value.clone());
            } else if let Err(diag) = env.set_register(arg.register as usize, true, value.clone()) {
                diagnostics.push(diag);
            }
        }

        let mut register = 1;
        let mut preload = |env: &mut Environment, value: Value, diagnostics: &mut Vec<Diagnostic>| {
            if let Err(diag) = env.set_register(register, true, value) {
                diagnostics.push(diag);
            }
            register += 1;
        };

        let this = site.this.clone().unwrap_or_else(|| site.target.clone());
        if self.flags & PRELOAD_THIS != 0 {
            preload(env, this, &mut diagnostics);
        } else if self.flags & SUPPRESS_THIS == 0 {
            env.add_local("this", this);
        }

        let arguments = site.arguments.clone().unwrap_or_default();
        if self.flags & PRELOAD_ARGUMENTS != 0 {
            preload(env, arguments, &mut diagnostics);
        } else if self.flags & SUPPRESS_ARGUMENTS == 0 {
            env.add_local("arguments", arguments);
        }

        if self.needs_super() && site.super_proto.is_none() {
            diagnostics.push(Diagnostic::unimplemented("super is not available here"));
        }
        let super_proto = site.super_proto.clone().unwrap_or_default();
        if self.flags & PRELOAD_SUPER != 0 {
            preload(env, super_proto, &mut diagnostics);
        } else if self.flags & SUPPRESS_SUPER == 0 {
            env.add_local("super", super_proto);
        }

        if self.flags & PRELOAD_ROOT != 0 {
            preload(env, site.root.clone(), &mut diagnostics);
        }
        if self.flags & PRELOAD_PARENT != 0 {
            preload(env, site.parent.clone(), &mut diagnostics);
        }
        if self.flags & PRELOAD_GLOBAL != 0 {
            preload(env, site.global.clone(), &mut diagnostics);
        }

        diagnostics
    }
}

#[derive(Debug, Clone)]
pub enum Convention {
    Classic(ClassicConvention),
    Register(RegisterConvention),
}

impl Convention {
    pub fn bind(&self, env: &mut Environment, site: &CallSite) -> Vec<Diagnostic> {
        match self {
            Convention::Classic(classic) => classic.bind(env, site),
            Convention::Register(register) => register.bind(env, site),
        }
    }

    pub fn unbind(&self, env: &mut Environment) {
        if let Convention::Register(_) = self {
            env.pop_register_window();
        }
    }

    pub fn needs_arguments(&self) -> bool {
        match self {
            Convention::Classic(_) => false,
            Convention::Register(register) => register.needs_arguments(),
        }
    }
}

/// A script function: a body range inside an action buffer plus what it
/// captured when declared.
pub struct Closure {
    pub name: String,
    pub buffer: Rc<ActionBuffer>,
    pub start: usize,
    pub length: usize,
    scope: Vec<WeakWithEntry>,
    target: Option<WeakObject>,
    pub convention: Convention,
    properties: OnceCell<ObjectRef>,
}

impl Closure {
    pub fn new(
        name: &str,
        buffer: Rc<ActionBuffer>,
        start: usize,
        length: usize,
        convention: Convention,
    ) -> Self {
        Self {
            name: name.to_string(),
            buffer,
            start,
            length,
            scope: Vec::new(),
            target: None,
            convention,
            properties: OnceCell::new(),
        }
    }

    /// Build from a decoded `declare_function`/`declare_function2` header whose
    /// body begins at `start`.
    pub fn from_header(
        header: &FunctionHeader,
        buffer: Rc<ActionBuffer>,
        start: usize,
        with_stack: &[WithEntry],
        target: &ObjectRef,
    ) -> Self {
        let convention = if header.is_function2 {
            Convention::Register(RegisterConvention {
                args: header
                    .args
                    .iter()
                    .map(|arg| RegisterArg {
                        register: arg.register,
                        name: Rc::from(arg.name.as_str()),
                    })
                    .collect(),
                register_count: header.register_count,
                flags: header.flags,
            })
        } else {
            Convention::Classic(ClassicConvention {
                args: header
                    .args
                    .iter()
                    .map(|arg| Rc::from(arg.name.as_str()))
                    .collect(),
            })
        };

        let mut closure = Self::new(
            &header.name,
            buffer,
            start,
            header.body_length as usize,
            convention,
        );
        closure.scope = WeakWithEntry::capture(with_stack);
        closure.target = Some(Rc::downgrade(target));
        closure
    }

    pub fn is_register_based(&self) -> bool {
        matches!(self.convention, Convention::Register(_))
    }

    /// The target the function was declared on, while it is still alive.
    pub fn defining_target(&self) -> Option<ObjectRef> {
        self.target.as_ref().and_then(|target| target.upgrade())
    }

    /// The captured with-stack, minus objects that no longer exist.
    pub fn scope(&self) -> WithStack {
        WeakWithEntry::restore(&self.scope)
    }

    /// Member table of the function itself (`prototype` and friends).
    pub fn properties(&self) -> ObjectRef {
        self.properties
            .get_or_init(|| ScriptObject::new().into_ref())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::new(ScriptObject::new().into_ref(), ScriptObject::new().into_ref())
    }

    fn site(args: Vec<Value>) -> CallSite {
        CallSite {
            args,
            ..CallSite::default()
        }
    }

    #[test]
    fn test_classic_binds_only_declared_args() {
        let convention = ClassicConvention {
            args: vec![Rc::from("a"), Rc::from("b")],
        };
        let mut env = env();
        env.add_frame_barrier();
        let site = site(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);
        assert!(convention.bind(&mut env, &site).is_empty());

        assert_eq!(env.get_local("a"), Some(Value::Number(1.0)));
        assert_eq!(env.get_local("b"), Some(Value::Number(2.0)));
        assert_eq!(env.local_frame_top(), 3);
    }

    #[test]
    fn test_classic_missing_args_are_absent() {
        let convention = ClassicConvention {
            args: vec![Rc::from("a"), Rc::from("b")],
        };
        let mut env = env();
        env.add_frame_barrier();
        convention.bind(&mut env, &site(vec![Value::Null]));
        assert_eq!(env.get_local("a"), Some(Value::Null));
        assert_eq!(env.get_local("b"), None);
    }

    #[test]
    fn test_register_preloads_this_into_register_one() {
        let convention = RegisterConvention {
            args: Vec::new(),
            register_count: 2,
            flags: PRELOAD_THIS | SUPPRESS_ARGUMENTS | SUPPRESS_SUPER,
        };
        let this = Value::Object(ScriptObject::new().into_ref());
        let mut env = env();
        let site = CallSite {
            this: Some(this.clone()),
            ..CallSite::default()
        };
        assert!(convention.bind(&mut env, &site).is_empty());
        assert_eq!(env.local_register(1), Some(this));
        assert_eq!(env.get_local("this"), None);
    }

    #[test]
    fn test_register_preload_order() {
        let convention = RegisterConvention {
            args: vec![
                RegisterArg {
                    register: 4,
                    name: Rc::from("x"),
                },
                RegisterArg {
                    register: 0,
                    name: Rc::from("y"),
                },
            ],
            register_count: 5,
            flags: PRELOAD_THIS | PRELOAD_ARGUMENTS | SUPPRESS_SUPER | PRELOAD_ROOT,
        };
        let root = Value::from("root");
        let arguments = Value::from("args");
        let site = CallSite {
            this: Some(Value::from("this")),
            args: vec![Value::Number(1.0), Value::Number(2.0)],
            arguments: Some(arguments.clone()),
            root: root.clone(),
            ..CallSite::default()
        };
        let mut env = env();
        convention.bind(&mut env, &site);

        assert_eq!(env.local_register(1), Some(Value::from("this")));
        assert_eq!(env.local_register(2), Some(arguments));
        assert_eq!(env.local_register(3), Some(root));
        assert_eq!(env.local_register(4), Some(Value::Number(1.0)));
        assert_eq!(env.get_local("y"), Some(Value::Number(2.0)));

        Convention::Register(convention).unbind(&mut env);
        assert_eq!(env.local_register(1), None);
    }

    #[test]
    fn test_missing_super_is_reported() {
        let convention = RegisterConvention {
            args: Vec::new(),
            register_count: 1,
            flags: SUPPRESS_THIS | SUPPRESS_ARGUMENTS,
        };
        let mut env = env();
        let diagnostics = convention.bind(&mut env, &CallSite::default());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].kind,
            crate::error::DiagnosticKind::Unimplemented
        );
        assert_eq!(env.get_local("super"), Some(Value::Undefined));
    }

    #[test]
    fn test_arguments_only_built_when_needed() {
        let suppressed = RegisterConvention {
            args: Vec::new(),
            register_count: 0,
            flags: SUPPRESS_ARGUMENTS,
        };
        assert!(!suppressed.needs_arguments());
        let both = RegisterConvention {
            flags: PRELOAD_ARGUMENTS | SUPPRESS_ARGUMENTS,
            ..suppressed.clone()
        };
        assert!(both.needs_arguments());
        assert!(!Convention::Classic(ClassicConvention { args: Vec::new() }).needs_arguments());
    }
}
