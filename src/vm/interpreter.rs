// ActionVM Interpreter
// Walks action bytes against an Environment. Every problem is logged as a
// diagnostic and execution carries on with a substitute value.

use super::caller::ValueCaller;
use super::closure::{CallSite, Closure, Convention};
use super::environment::{Environment, PendingSetter, WithEntry, WithStack, MAX_WITH_DEPTH};
use super::object::{set_shared_member, ObjectKind, PropFlags, ScriptObject};
use super::value::{parse_number_strict, ObjectRef, Value};
use crate::builtins::{self, Prototypes};
use crate::bytecode::{decode, ActionBuffer, ActionCode, Instruction, PushItem};
use crate::config::VmConfig;
use crate::error::{Diagnostic, DiagnosticKind};
use crate::host::{Host, PlayState, Timeline};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

const RECENT_DIAGNOSTICS: usize = 64;

/// Names addressed by number in `get_property` / `set_property`.
const PROPERTY_NAMES: [&str; 22] = [
    "_x",
    "_y",
    "_xscale",
    "_yscale",
    "_currentframe",
    "_totalframes",
    "_alpha",
    "_visible",
    "_width",
    "_height",
    "_rotation",
    "_target",
    "_framesloaded",
    "_name",
    "_droptarget",
    "_url",
    "_highquality",
    "_focusrect",
    "_soundbuftime",
    "_quality",
    "_xmouse",
    "_ymouse",
];

const FSCOMMAND_PREFIX: &str = "FSCommand:";

#[derive(Default)]
struct DiagnosticLog {
    counts: FxHashMap<DiagnosticKind, usize>,
    recent: VecDeque<Diagnostic>,
}

/// The interpreter context: one per player instance.
pub struct Vm {
    config: VmConfig,
    global: ObjectRef,
    prototypes: Prototypes,
    host: Rc<dyn Host>,
    started: Instant,
    rng: RefCell<StdRng>,
    diagnostics: RefCell<DiagnosticLog>,
    /// pc of the action being executed, for diagnostics
    pc: Cell<Option<usize>>,
}

/// Native call context.
struct Invocation<'a> {
    vm: &'a Vm,
    env: &'a mut Environment,
    constructing: bool,
}

impl ValueCaller for Invocation<'_> {
    fn call(&mut self, callee: &Value, this: Option<Value>, args: &[Value]) -> Value {
        self.vm.call_with_args(self.env, callee, this, args)
    }

    fn vm(&self) -> &Vm {
        self.vm
    }

    fn target(&self) -> ObjectRef {
        self.env.target()
    }

    fn constructing(&self) -> bool {
        self.constructing
    }
}

impl Vm {
    pub fn new(config: VmConfig, host: Rc<dyn Host>) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let vm = Self {
            config,
            global: ScriptObject::new().into_ref(),
            prototypes: builtins::create_prototypes(),
            host,
            started: Instant::now(),
            rng: RefCell::new(rng),
            diagnostics: RefCell::new(DiagnosticLog::default()),
            pc: Cell::new(None),
        };
        builtins::install_globals(&vm);
        vm
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn version(&self) -> u8 {
        self.config.version
    }

    pub fn global(&self) -> ObjectRef {
        self.global.clone()
    }

    pub fn prototypes(&self) -> &Prototypes {
        &self.prototypes
    }

    pub fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    // Diagnostics

    pub fn report(&self, mut diagnostic: Diagnostic) {
        if diagnostic.pc.is_none() {
            diagnostic.pc = self.pc.get();
        }
        match diagnostic.kind {
            DiagnosticKind::Unimplemented => log::warn!("{}", diagnostic),
            _ => log::error!("{}", diagnostic),
        }
        let mut log = self.diagnostics.borrow_mut();
        *log.counts.entry(diagnostic.kind).or_insert(0) += 1;
        log.recent.push_back(diagnostic);
        if log.recent.len() > RECENT_DIAGNOSTICS {
            log.recent.pop_front();
        }
    }

    /// Most recent diagnostics, oldest first.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().recent.iter().cloned().collect()
    }

    pub fn diagnostic_count(&self, kind: DiagnosticKind) -> usize {
        self.diagnostics
            .borrow()
            .counts
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    pub fn clear_diagnostics(&self) {
        *self.diagnostics.borrow_mut() = DiagnosticLog::default();
    }

    // Object creation

    /// Plain object with the per-object builtins installed.
    pub fn new_object(&self) -> ObjectRef {
        let mut obj = ScriptObject::new();
        obj.set_proto(Some(&self.prototypes.object));
        builtins::object::install_object_methods(&mut obj);
        obj.into_ref()
    }

    pub fn new_array(&self, values: Vec<Value>) -> ObjectRef {
        let mut arr = ScriptObject::with_kind(ObjectKind::Array);
        arr.set_proto(Some(&self.prototypes.array));
        builtins::object::install_object_methods(&mut arr);
        for value in values {
            arr.array_push(value);
        }
        arr.into_ref()
    }

    /// Wrapper object for a string, number or boolean.
    pub fn new_boxed(&self, value: Value) -> ObjectRef {
        let proto = match &value {
            Value::String(_) => &self.prototypes.string,
            Value::Number(_) => &self.prototypes.number,
            Value::Boolean(_) => &self.prototypes.boolean,
            _ => &self.prototypes.object,
        };
        let mut obj = ScriptObject::with_kind(ObjectKind::Boxed(value));
        obj.set_proto(Some(proto));
        builtins::object::install_object_methods(&mut obj);
        obj.into_ref()
    }

    pub fn new_clip(&self, timeline: Rc<dyn Timeline>, name: &str, parent: Option<&ObjectRef>) -> ObjectRef {
        let mut clip = ScriptObject::new_clip(timeline, name, parent);
        clip.set_proto(Some(&self.prototypes.object));
        builtins::object::install_object_methods(&mut clip);
        clip.into_ref()
    }

    /// Members every root movie carries.
    pub fn prepare_root(&self, root: &ObjectRef) {
        root.borrow_mut().define(
            "$version",
            Value::from(self.config.version_string()),
            PropFlags::protected(PropFlags::DONT_ENUM),
        );
    }

    pub fn new_environment(&self, target: ObjectRef) -> Environment {
        let mut env = Environment::new(target, self.global.clone());
        env.set_verbose(self.config.verbose_action);
        env
    }

    // Entry points

    /// Run a whole buffer against `target` in a fresh environment.
    pub fn execute_buffer(&self, buffer: &Rc<ActionBuffer>, target: &ObjectRef) {
        let mut env = self.new_environment(target.clone());
        self.execute(&mut env, buffer, 0, buffer.len(), None, WithStack::new(), false);
    }

    /// Like `execute_buffer`, returning the value of a top-level `return`.
    pub fn evaluate(&self, buffer: &Rc<ActionBuffer>, target: &ObjectRef) -> Value {
        let mut env = self.new_environment(target.clone());
        let mut result = Value::Undefined;
        self.execute(
            &mut env,
            buffer,
            0,
            buffer.len(),
            Some(&mut result),
            WithStack::new(),
            false,
        );
        result
    }

    /// Run the actions of the clip's current frame.
    pub fn run_frame(&self, clip: &ObjectRef) {
        let timeline = clip.borrow().timeline();
        let Some(timeline) = timeline else {
            self.report(Diagnostic::missing("run_frame on an object that is not a clip"));
            return;
        };
        for buffer in timeline.frame_actions(timeline.current_frame()) {
            self.execute_buffer(&buffer, clip);
        }
    }

    /// Step a playing clip to its next frame and run it. False when the clip
    /// is stopped or already on its last frame.
    pub fn advance_frame(&self, clip: &ObjectRef) -> bool {
        let timeline = clip.borrow().timeline();
        let Some(timeline) = timeline else {
            return false;
        };
        if timeline.play_state() == PlayState::Stopped {
            return false;
        }
        let next = timeline.current_frame().saturating_add(1);
        if next >= timeline.frame_count() {
            return false;
        }
        timeline.goto_frame(next);
        self.run_frame(clip);
        true
    }

    /// Execute `length` bytes of `buffer` from `start`. `return` stores into
    /// `retval` and ends this window; `end` ends it too. The target in effect
    /// on entry is restored on exit.
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &self,
        env: &mut Environment,
        buffer: &Rc<ActionBuffer>,
        start: usize,
        length: usize,
        mut retval: Option<&mut Value>,
        with_stack: WithStack,
        is_function2: bool,
    ) {
        let original_target = env.target();
        let outer_pc = self.pc.get();
        let mut with_stack = with_stack;
        let stop_pc = start.saturating_add(length).min(buffer.len());
        let mut pc = start;

        while pc < stop_pc {
            while with_stack.last().is_some_and(|entry| pc >= entry.end_pc) {
                with_stack.pop();
            }
            self.pc.set(Some(pc));

            let decoded = match decode(buffer.bytes(), pc) {
                Ok(decoded) => decoded,
                Err(err) => {
                    self.report(Diagnostic::malformed(err.to_string()).at(pc));
                    match err.resume_at() {
                        Some(next) => {
                            pc = next;
                            continue;
                        }
                        None => break,
                    }
                }
            };

            if self.config.verbose_action {
                log::debug!("EX: {:4}\t{}", pc, decoded.instruction);
            }

            let mut next_pc = decoded.next_pc;
            match decoded.instruction {
                Instruction::Simple(ActionCode::End) => break,
                Instruction::Simple(ActionCode::Return) => {
                    let value = env.pop();
                    if let Some(slot) = retval.as_deref_mut() {
                        *slot = value;
                    }
                    break;
                }
                Instruction::Simple(code) => {
                    self.simple_action(env, code, &with_stack, &original_target)
                }
                Instruction::UnknownSimple(code) => {
                    self.report(Diagnostic::unimplemented(format!("action 0x{:02X}", code)))
                }

                Instruction::GotoFrame(frame) => {
                    if let Some(timeline) = self.target_timeline(env) {
                        timeline.goto_frame(frame as u32);
                    }
                }
                Instruction::GetUrl { url, window } => self.get_url(&url, &window, 0),
                Instruction::StoreRegister(register) => {
                    let value = env.top(0);
                    if let Err(diag) = env.set_register(register as usize, is_function2, value) {
                        self.report(diag);
                    }
                }
                Instruction::DeclareDictionary { .. } => {
                    if let Err(diag) = buffer.resolve_dictionary(pc, next_pc) {
                        self.report(diag);
                    }
                }
                Instruction::WaitForFrame { .. } => {}
                Instruction::WaitForFrame2 { .. } => {
                    env.pop();
                }
                Instruction::SetTarget(path) => {
                    if path.is_empty() {
                        env.set_target(original_target.clone());
                    } else {
                        match env.find_target(&path) {
                            Some(target) => env.set_target(target),
                            None => self.report(Diagnostic::missing(format!(
                                "set_target: can't find '{}'",
                                path
                            ))),
                        }
                    }
                }
                Instruction::GotoLabel(label) => {
                    if let Some(timeline) = self.target_timeline(env) {
                        if !timeline.goto_labeled_frame(&label) {
                            self.report(Diagnostic::missing(format!("unknown frame label '{}'", label)));
                        }
                    }
                }
                Instruction::DefineFunction(header) => {
                    let target = env.target();
                    let closure = Closure::from_header(&header, buffer.clone(), next_pc, &with_stack, &target);
                    next_pc += header.body_length as usize;
                    let function = Value::ScriptFn(Rc::new(closure));
                    if !header.name.is_empty() {
                        if let Some(pending) = env.set_variable_raw(&header.name, function.clone(), &[]) {
                            self.apply_setter(env, pending);
                        }
                    }
                    env.push(function);
                }
                Instruction::With { block_length } => {
                    let object = env.pop();
                    if with_stack.len() >= MAX_WITH_DEPTH {
                        self.report(Diagnostic::malformed(format!(
                            "with stack limit of {} exceeded",
                            MAX_WITH_DEPTH
                        )));
                    } else {
                        match object.to_object() {
                            Some(object) => with_stack.push(WithEntry {
                                object,
                                end_pc: next_pc + block_length as usize,
                            }),
                            None => self.report(Diagnostic::missing(format!(
                                "with on non-object {:?}",
                                object
                            ))),
                        }
                    }
                }
                Instruction::Push(items) => {
                    for item in items {
                        let value = self.push_item_value(env, buffer, item, is_function2);
                        env.push(value);
                    }
                }
                Instruction::Jump(offset) => match self.branch(next_pc, offset, start, stop_pc, buffer.len()) {
                    Some(target) => next_pc = target,
                    None => break,
                },
                Instruction::GetUrl2 { method } => {
                    let window = self.text(&env.pop());
                    let url = self.text(&env.pop());
                    self.get_url(&url, &window, method);
                }
                Instruction::If(offset) => {
                    if env.pop().to_bool() {
                        match self.branch(next_pc, offset, start, stop_pc, buffer.len()) {
                            Some(target) => next_pc = target,
                            None => break,
                        }
                    }
                }
                Instruction::CallFrame => {
                    let frame = env.pop();
                    self.call_frame(env, &frame);
                }
                Instruction::GotoFrame2 { play, scene_bias } => {
                    let frame = env.pop();
                    self.goto_frame_expression(env, &frame, play, scene_bias.unwrap_or(0));
                }
                Instruction::UnknownExtended { code, length } => self.report(Diagnostic::unimplemented(
                    format!("action 0x{:02X} with {} byte payload", code, length),
                )),
            }

            pc = next_pc;
        }

        env.set_target(original_target);
        self.pc.set(outer_pc);
    }

    fn branch(&self, next_pc: usize, offset: i16, start: usize, stop_pc: usize, buffer_len: usize) -> Option<usize> {
        let target = next_pc as isize + offset as isize;
        if target < 0 || target as usize > buffer_len {
            self.report(Diagnostic::malformed(format!(
                "branch to {} outside the action buffer",
                target
            )));
            return None;
        }
        let target = target as usize;
        if target < start || target > stop_pc {
            self.report(Diagnostic::malformed(format!(
                "branch to {}; this section only runs {}..{}",
                target, start, stop_pc
            )));
        }
        Some(target)
    }

    fn push_item_value(&self, env: &Environment, buffer: &ActionBuffer, item: PushItem, is_function2: bool) -> Value {
        match item {
            PushItem::String(s) => Value::from(s),
            PushItem::Float(f) => Value::Number(f as f64),
            PushItem::Null => Value::Null,
            PushItem::Undefined => Value::Undefined,
            PushItem::Register(register) => match env.register(register as usize, is_function2) {
                Ok(value) => value,
                Err((fallback, diag)) => {
                    self.report(diag);
                    fallback
                }
            },
            PushItem::Boolean(b) => Value::Boolean(b),
            PushItem::Double(d) => Value::Number(d),
            PushItem::Integer(i) => Value::Number(i as f64),
            PushItem::Dictionary(index) => match buffer.dictionary_entry(index as usize) {
                Some(entry) => Value::String(entry),
                None => {
                    self.report(Diagnostic::malformed(format!(
                        "dictionary index {} out of range ({} entries)",
                        index,
                        buffer.dictionary().len()
                    )));
                    Value::Number(0.0)
                }
            },
        }
    }

    fn text(&self, value: &Value) -> String {
        value.to_string_versioned(self.config.version)
    }

    fn simple_action(&self, env: &mut Environment, code: ActionCode, with_stack: &[WithEntry], original_target: &ObjectRef) {
        use ActionCode::*;
        let version = self.config.version;

        match code {
            NextFrame => {
                if let Some(timeline) = self.target_timeline(env) {
                    let next = timeline.current_frame().saturating_add(1);
                    if next < timeline.frame_count() {
                        timeline.goto_frame(next);
                    }
                }
            }
            PrevFrame => {
                if let Some(timeline) = self.target_timeline(env) {
                    let current = timeline.current_frame();
                    if current > 0 {
                        timeline.goto_frame(current - 1);
                    }
                }
            }
            Play => {
                if let Some(timeline) = self.target_timeline(env) {
                    timeline.set_play_state(PlayState::Playing);
                }
            }
            Stop => {
                if let Some(timeline) = self.target_timeline(env) {
                    timeline.set_play_state(PlayState::Stopped);
                }
            }
            ToggleQuality => {
                self.report(Diagnostic::unimplemented("toggle_quality"));
                self.host.toggle_quality();
            }
            StopSounds => self.host.stop_sounds(),

            Add => numeric(env, |a, b| a + b),
            Subtract => numeric(env, |a, b| a - b),
            Multiply => numeric(env, |a, b| a * b),
            Divide => numeric(env, |a, b| a / b),
            Equals => compare(env, |a, b| a.to_number() == b.to_number()),
            Less => compare(env, |a, b| a.to_number() < b.to_number()),
            And => compare(env, |a, b| a.to_bool() && b.to_bool()),
            Or => compare(env, |a, b| a.to_bool() || b.to_bool()),
            Not => {
                let value = env.pop();
                env.push(Value::Boolean(!value.to_bool()));
            }

            StringEquals => compare(env, |a, b| a.to_string_versioned(version) == b.to_string_versioned(version)),
            StringLess => compare(env, |a, b| a.to_string_versioned(version) < b.to_string_versioned(version)),
            StringGreater => compare(env, |a, b| a.to_string_versioned(version) > b.to_string_versioned(version)),
            StringLength => {
                let value = env.pop();
                env.push(Value::Number(self.text(&value).chars().count() as f64));
            }
            StringExtract => {
                let count = env.pop().to_int32();
                let index = env.pop().to_int32();
                let source = env.pop();
                env.push(Value::from(substring(&self.text(&source), index, count)));
            }
            StringAdd => {
                let b = env.pop();
                let a = env.pop();
                env.push(Value::from(self.text(&a) + &self.text(&b)));
            }

            Pop => {
                if env.stack_size() == 0 {
                    self.report(Diagnostic::malformed("pop on an empty stack"));
                }
                env.pop();
            }
            ToInteger => {
                let n = env.pop().to_number();
                env.push(Value::Number(if n.is_nan() { 0.0 } else { n.floor() }));
            }

            GetVariable => {
                let name = self.text(&env.pop());
                let value = self.read_variable(env, &name, with_stack);
                env.push(value);
            }
            SetVariable => {
                let value = env.pop();
                let name = self.text(&env.pop());
                self.write_variable(env, &name, value, with_stack);
            }
            SetTarget2 => {
                let target = env.pop();
                self.retarget(env, &target, original_target);
            }
            GetProperty => {
                let index = env.pop().to_number();
                let path = env.pop();
                let value = match (self.target_from_value(env, &path), property_name(index)) {
                    (Some(target), Some(name)) => self.member_of(env, &Value::Object(target), name),
                    (None, _) => {
                        self.report(Diagnostic::missing(format!("get_property: no target '{}'", self.text(&path))));
                        Value::Undefined
                    }
                    (_, None) => {
                        self.report(Diagnostic::malformed(format!("get_property: bad property number {}", index)));
                        Value::Undefined
                    }
                };
                env.push(value);
            }
            SetProperty => {
                let value = env.pop();
                let index = env.pop().to_number();
                let path = env.pop();
                match (self.target_from_value(env, &path), property_name(index)) {
                    (Some(target), Some(name)) => self.set_member_of(env, &Value::Object(target), name, value),
                    (None, _) => {
                        self.report(Diagnostic::missing(format!("set_property: no target '{}'", self.text(&path))))
                    }
                    (_, None) => self.report(Diagnostic::malformed(format!(
                        "set_property: bad property number {}",
                        index
                    ))),
                }
            }

            CloneSprite => {
                self.report(Diagnostic::unimplemented("duplicate_clip"));
                env.drop(3);
            }
            RemoveSprite => {
                self.report(Diagnostic::unimplemented("remove_clip"));
                env.drop(1);
            }
            StartDrag => {
                self.report(Diagnostic::unimplemented("start_drag"));
                let constrained = env.top(2).to_bool();
                env.drop(3);
                if constrained {
                    env.drop(4);
                }
            }
            EndDrag => self.report(Diagnostic::unimplemented("stop_drag")),

            Trace => {
                let message = self.text(&env.pop());
                self.host.trace(&message);
            }

            Throw | CastOp | ImplementsOp | InstanceOf | TargetPath | MbStringLength | MbStringExtract
            | MbCharToAscii | MbAsciiToChar => self.report(Diagnostic::unimplemented(code.name())),

            RandomNumber => {
                let max = env.pop().to_int32().max(1);
                let n = self.rng.borrow_mut().random_range(0..max);
                env.push(Value::Number(n as f64));
            }
            CharToAscii => {
                let text = self.text(&env.pop());
                let code = text.chars().next().map(|c| c as u32).unwrap_or(0);
                env.push(Value::Number(code as f64));
            }
            AsciiToChar => {
                let code = env.pop().to_uint32();
                let text = match char::from_u32(code) {
                    Some(c) if code != 0 => String::from(c),
                    _ => String::new(),
                };
                env.push(Value::from(text));
            }
            GetTime => {
                let elapsed = self.started.elapsed().as_millis() as f64;
                env.push(Value::Number(elapsed));
            }

            Delete => {
                self.report(Diagnostic::unimplemented("delete"));
                let name = self.text(&env.pop());
                let object = env.pop();
                self.set_member_of(env, &object, &name, Value::Undefined);
                env.push(Value::Boolean(true));
            }
            Delete2 => {
                self.report(Diagnostic::unimplemented("delete2"));
                let name = self.text(&env.pop());
                self.write_variable(env, &name, Value::Undefined, with_stack);
                env.push(Value::Boolean(true));
            }
            DefineLocal => {
                let value = env.pop();
                let name = self.text(&env.pop());
                env.set_local(&name, value);
            }
            DefineLocal2 => {
                let name = self.text(&env.pop());
                env.declare_local(&name);
            }

            CallFunction => {
                let name = self.text(&env.top(0));
                let (nargs, first_arg) = call_layout(env, 2);
                let function = self.read_variable(env, &name, with_stack);
                let result = if function.is_callable() {
                    self.call_value(&function, env, None, nargs, first_arg)
                } else {
                    self.report(Diagnostic::missing(format!("call_function: '{}' is not a function", name)));
                    Value::Undefined
                };
                env.drop(nargs + 2);
                env.push(result);
            }
            CallMethod => {
                let method = self.text(&env.top(0));
                let object = env.top(1);
                let (nargs, first_arg) = call_layout(env, 3);
                let result = self.call_method(env, &object, &method, nargs, first_arg);
                env.drop(nargs + 3);
                env.push(result);
            }
            NewObject => {
                let name = self.text(&env.top(0));
                let (nargs, first_arg) = call_layout(env, 2);
                let constructor = self.read_variable(env, &name, with_stack);
                let result = self.construct(env, &constructor, nargs, first_arg);
                env.drop(nargs + 2);
                env.push(result);
            }
            NewMethod => {
                let method = self.text(&env.top(0));
                let object = env.top(1);
                let (nargs, first_arg) = call_layout(env, 3);
                let constructor = if method.is_empty() || method == "undefined" {
                    object
                } else {
                    self.member_of(env, &object, &method)
                };
                let result = self.construct(env, &constructor, nargs, first_arg);
                env.drop(nargs + 3);
                env.push(result);
            }
            Modulo => {
                let y = env.pop().to_number();
                let x = env.pop().to_number();
                env.push(if y == 0.0 {
                    Value::Undefined
                } else {
                    Value::Number(x % y)
                });
            }

            InitArray => {
                let count = (env.pop().to_number().max(0.0) as usize).min(env.stack_size());
                let values: Vec<Value> = (0..count).map(|_| env.pop()).collect();
                let array = self.new_array(values);
                env.push(Value::Object(array));
            }
            InitObject => {
                let count = (env.pop().to_number().max(0.0) as usize).min(env.stack_size() / 2);
                let object = self.new_object();
                for _ in 0..count {
                    let value = env.pop();
                    let name = self.text(&env.pop());
                    set_shared_member(&object, &name, value);
                }
                env.push(Value::Object(object));
            }
            TypeOf => {
                let value = env.pop();
                env.push(Value::from(value.type_name()));
            }
            Enumerate => {
                let name = self.text(&env.pop());
                let object = self.read_variable(env, &name, with_stack);
                self.push_keys(env, &object);
            }
            Enumerate2 => {
                let object = env.pop();
                self.push_keys(env, &object);
            }

            Add2 => {
                let b = env.pop();
                let a = env.pop();
                let result = if a.is_string() || b.is_string() {
                    Value::from(self.text(&a) + &self.text(&b))
                } else {
                    Value::Number(a.to_number() + b.to_number())
                };
                env.push(result);
            }
            Less2 => compare(env, |a, b| a.typed_less(b)),
            Greater => compare(env, |a, b| {
                if a.is_string() {
                    a.to_string_versioned(version) > b.to_string_versioned(version)
                } else {
                    a.to_number() > b.to_number()
                }
            }),
            Equals2 => compare(env, |a, b| a.loose_equals(b)),
            StrictEquals => compare(env, |a, b| a.strict_equals(b)),
            ToNumber => {
                let n = env.pop().to_number();
                env.push(Value::Number(n));
            }
            ToString => {
                let text = self.text(&env.pop());
                env.push(Value::from(text));
            }
            PushDuplicate => env.push(env.top(0)),
            StackSwap => {
                let a = env.pop();
                let b = env.pop();
                env.push(a);
                env.push(b);
            }

            GetMember => {
                let name = self.text(&env.pop());
                let object = env.pop();
                let value = self.member_of(env, &object, &name);
                env.push(value);
            }
            SetMember => {
                let value = env.pop();
                let name = self.text(&env.pop());
                let object = env.pop();
                self.set_member_of(env, &object, &name, value);
            }
            Increment => {
                let n = env.pop().to_number();
                env.push(Value::Number(n + 1.0));
            }
            Decrement => {
                let n = env.pop().to_number();
                env.push(Value::Number(n - 1.0));
            }

            BitAnd => bitwise(env, |a, b| Value::Number((a & b) as f64)),
            BitOr => bitwise(env, |a, b| Value::Number((a | b) as f64)),
            BitXor => bitwise(env, |a, b| Value::Number((a ^ b) as f64)),
            BitLShift => bitwise(env, |a, b| Value::Number(a.wrapping_shl(b as u32 & 31) as f64)),
            BitRShift => bitwise(env, |a, b| Value::Number((a >> (b & 31)) as f64)),
            BitURShift => bitwise(env, |a, b| Value::Number(((a as u32) >> (b as u32 & 31)) as f64)),

            Extends => {
                let super_class = env.pop();
                let sub_class = env.pop();
                self.extends(&sub_class, &super_class);
            }

            // Handled by the loop or carried by an extended action.
            End | Return | GotoFrame | GetUrl | StoreRegister | ConstantPool | WaitForFrame
            | SetTarget | GotoLabel | WaitForFrame2 | DefineFunction2 | With | Push | Jump | GetUrl2
            | DefineFunction | If | Call | GotoFrame2 => {}
        }
    }

    // Variables and members

    fn read_variable(&self, env: &mut Environment, name: &str, with_stack: &[WithEntry]) -> Value {
        let value = match env.get_variable(name, with_stack) {
            Ok(value) => value,
            Err(diag) => {
                self.report(diag);
                Value::Undefined
            }
        };
        if self.config.verbose_action {
            log::debug!("get variable '{}' = {:?}", name, value);
        }
        self.resolve(env, value, None)
    }

    fn write_variable(&self, env: &mut Environment, name: &str, value: Value, with_stack: &[WithEntry]) {
        match env.set_variable(name, value, with_stack) {
            Ok(Some(pending)) => self.apply_setter(env, pending),
            Ok(None) => {}
            Err(diag) => self.report(diag),
        }
    }

    /// Run a getter when `value` is an accessor.
    fn resolve(&self, env: &mut Environment, value: Value, receiver: Option<Value>) -> Value {
        match value {
            Value::Accessor(accessor) => {
                let this = receiver.or_else(|| accessor.owner.upgrade().map(Value::Object));
                self.call_with_args(env, &accessor.getter, this, &[])
            }
            other => other,
        }
    }

    fn apply_setter(&self, env: &mut Environment, pending: PendingSetter) {
        self.call_with_args(env, &pending.accessor.setter, Some(pending.this), &[pending.value]);
    }

    /// Member read with accessor, `__resolve` and string `length` handling.
    pub fn member_of(&self, env: &mut Environment, object: &Value, name: &str) -> Value {
        if name.eq_ignore_ascii_case("length") {
            if let Some(text) = string_of(object) {
                return Value::Number(text.chars().count() as f64);
            }
        }

        if let Value::ScriptFn(closure) = object {
            if name.eq_ignore_ascii_case("prototype") {
                return Value::Object(self.function_prototype(closure));
            }
        }

        let Some(obj) = object.to_object() else {
            if self.config.verbose_action {
                log::debug!("get_member '{}' on non-object {:?}", name, object);
            }
            return Value::Undefined;
        };

        let found = obj.borrow().get_member(name);
        match found {
            Some(value) => self.resolve(env, value, Some(object.clone())),
            None => {
                let resolver = obj.borrow().get_member("__resolve");
                match resolver {
                    Some(resolver) if resolver.is_callable() => {
                        self.call_with_args(env, &resolver, Some(object.clone()), &[Value::from(name)])
                    }
                    _ => Value::Undefined,
                }
            }
        }
    }

    pub fn set_member_of(&self, env: &mut Environment, object: &Value, name: &str, value: Value) {
        let Some(obj) = object.to_object() else {
            self.report(Diagnostic::missing(format!(
                "set_member '{}' on non-object {:?}",
                name, object
            )));
            return;
        };
        let pending = set_shared_member(&obj, name, value.clone());
        if let Some(accessor) = pending {
            self.call_with_args(env, &accessor.setter, Some(object.clone()), &[value]);
        }
    }

    fn push_keys(&self, env: &mut Environment, object: &Value) {
        env.push(Value::Null);
        if let Some(obj) = object.to_object() {
            let keys = obj.borrow().enumerate_keys();
            for key in keys {
                env.push(Value::String(key));
            }
        }
    }

    // Targets and navigation

    fn target_timeline(&self, env: &Environment) -> Option<Rc<dyn Timeline>> {
        let timeline = env.target().borrow().timeline();
        if timeline.is_none() {
            self.report(Diagnostic::missing("current target is not a movie clip"));
        }
        timeline
    }

    fn target_from_value(&self, env: &Environment, value: &Value) -> Option<ObjectRef> {
        match value {
            Value::String(path) => env.find_target(path),
            Value::Undefined => Some(env.target()),
            other => other.to_object(),
        }
    }

    fn retarget(&self, env: &mut Environment, value: &Value, original_target: &ObjectRef) {
        match value {
            Value::Undefined => env.set_target(original_target.clone()),
            Value::String(path) if path.is_empty() => env.set_target(original_target.clone()),
            Value::String(path) => match env.find_target(path) {
                Some(target) => env.set_target(target),
                None => self.report(Diagnostic::missing(format!("set_target: can't find '{}'", path))),
            },
            other => match other.to_object() {
                Some(target) => env.set_target(target),
                None => self.report(Diagnostic::missing(format!("set_target to {:?}", other))),
            },
        }
    }

    fn get_url(&self, url: &str, window: &str, method: u8) {
        let is_command = url
            .get(..FSCOMMAND_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(FSCOMMAND_PREFIX));
        if is_command {
            self.host.fscommand(&url[FSCOMMAND_PREFIX.len()..], window);
        } else {
            self.host.get_url(url, window, method);
        }
    }

    fn frame_number(timeline: &dyn Timeline, frame: &Value, one_based: bool) -> Option<u32> {
        let bias = if one_based { 1.0 } else { 0.0 };
        let number = match frame {
            Value::String(label) => {
                if let Some(frame) = timeline.label_frame(label) {
                    return Some(frame);
                }
                parse_number_strict(label)?
            }
            other => other.to_number(),
        };
        if number.is_nan() {
            return None;
        }
        Some((number - bias).max(0.0) as u32)
    }

    /// Run another frame's actions now, against the current target.
    fn call_frame(&self, env: &mut Environment, frame: &Value) {
        let Some(timeline) = self.target_timeline(env) else {
            return;
        };
        match Self::frame_number(timeline.as_ref(), frame, false) {
            Some(number) if number < timeline.frame_count() => {
                let target = env.target();
                for buffer in timeline.frame_actions(number) {
                    self.execute_buffer(&buffer, &target);
                }
            }
            _ => self.report(Diagnostic::missing(format!("call_frame: no frame {:?}", frame))),
        }
    }

    fn goto_frame_expression(&self, env: &mut Environment, frame: &Value, play: bool, scene_bias: u16) {
        let Some(timeline) = self.target_timeline(env) else {
            return;
        };
        match Self::frame_number(timeline.as_ref(), frame, true) {
            Some(number) => timeline.goto_frame(number.saturating_add(scene_bias as u32)),
            None => {
                self.report(Diagnostic::missing(format!("goto_frame_expression: no frame {:?}", frame)));
                return;
            }
        }
        timeline.set_play_state(if play {
            PlayState::Playing
        } else {
            PlayState::Stopped
        });
    }

    // Calls

    /// Invoke `callee`; argument `n` sits at stack index `first_arg - n`.
    pub fn call_value(
        &self,
        callee: &Value,
        env: &mut Environment,
        this: Option<Value>,
        nargs: usize,
        first_arg: usize,
    ) -> Value {
        self.dispatch(callee, env, this, nargs, first_arg, false)
    }

    /// Call with an explicit argument list.
    pub fn call_with_args(&self, env: &mut Environment, callee: &Value, this: Option<Value>, args: &[Value]) -> Value {
        for arg in args.iter().rev() {
            env.push(arg.clone());
        }
        let first_arg = env.stack_size().saturating_sub(1);
        let result = self.call_value(callee, env, this, args.len(), first_arg);
        env.drop(args.len());
        result
    }

    fn dispatch(
        &self,
        callee: &Value,
        env: &mut Environment,
        this: Option<Value>,
        nargs: usize,
        first_arg: usize,
        constructing: bool,
    ) -> Value {
        match callee {
            Value::NativeFn(native) => {
                let args: Vec<Value> = (0..nargs).map(|i| env.arg(first_arg, i)).collect();
                let this = this.unwrap_or_default();
                let mut invocation = Invocation {
                    vm: self,
                    env,
                    constructing,
                };
                match native(&this, &args, &mut invocation) {
                    Ok(value) => value,
                    Err(message) => {
                        self.report(Diagnostic::missing(message));
                        Value::Undefined
                    }
                }
            }
            Value::ScriptFn(closure) => self.invoke_closure(closure, env, this, nargs, first_arg),
            other => {
                self.report(Diagnostic::missing(format!("call of non-function {:?}", other)));
                Value::Undefined
            }
        }
    }

    fn call_site(&self, env: &Environment, convention: &Convention, this: Option<Value>, args: Vec<Value>) -> CallSite {
        let target = env.target();
        let super_proto = this
            .as_ref()
            .and_then(|this| this.to_object())
            .and_then(|obj| {
                let proto = obj.borrow().proto();
                proto
            })
            .map(Value::Object);
        let arguments = if convention.needs_arguments() {
            Some(Value::Object(self.new_array(args.clone())))
        } else {
            None
        };
        let parent = target.borrow().clip_parent();
        CallSite {
            this,
            args,
            target: Value::Object(target),
            super_proto,
            arguments,
            root: Value::Object(env.root()),
            parent: parent.map(Value::Object).unwrap_or_default(),
            global: Value::Object(env.global()),
        }
    }

    fn invoke_closure(
        &self,
        closure: &Rc<Closure>,
        env: &mut Environment,
        this: Option<Value>,
        nargs: usize,
        first_arg: usize,
    ) -> Value {
        let args: Vec<Value> = (0..nargs).map(|i| env.arg(first_arg, i)).collect();

        let caller_target = env.target();
        if let Some(target) = closure.defining_target() {
            env.set_target(target);
        }

        let site = self.call_site(env, &closure.convention, this, args);
        let frame_top = env.local_frame_top();
        let stack_top = env.stack_size();
        env.add_frame_barrier();
        for diag in closure.convention.bind(env, &site) {
            self.report(diag);
        }

        let mut result = Value::Undefined;
        self.execute(
            env,
            &closure.buffer,
            closure.start,
            closure.length,
            Some(&mut result),
            closure.scope(),
            closure.is_register_based(),
        );

        closure.convention.unbind(env);
        env.set_local_frame_top(frame_top);
        env.drop(env.stack_size().saturating_sub(stack_top));
        env.set_target(caller_target);
        result
    }

    fn call_method(&self, env: &mut Environment, object: &Value, method: &str, nargs: usize, first_arg: usize) -> Value {
        if method.is_empty() || method == "undefined" {
            return self.call_value(object, env, None, nargs, first_arg);
        }

        match object {
            Value::String(_) => match builtins::string::lookup(method) {
                Some(native) => self.call_value(&Value::NativeFn(native), env, Some(object.clone()), nargs, first_arg),
                None => {
                    self.report(Diagnostic::missing(format!("string has no method '{}'", method)));
                    Value::Undefined
                }
            },
            Value::Number(_) if method.eq_ignore_ascii_case("toString") => self.call_value(
                &Value::NativeFn(builtins::number::number_to_string),
                env,
                Some(object.clone()),
                nargs,
                first_arg,
            ),
            _ if object.to_object().is_some() => {
                let function = self.member_of(env, object, method);
                if function.is_callable() {
                    self.call_value(&function, env, Some(object.clone()), nargs, first_arg)
                } else {
                    self.report(Diagnostic::missing(format!("method '{}' not found", method)));
                    Value::Undefined
                }
            }
            _ => {
                self.report(Diagnostic::missing(format!(
                    "call_method '{}' on non-object {:?}",
                    method, object
                )));
                Value::Undefined
            }
        }
    }

    /// `new`: natives build their own object; script constructors run with
    /// a fresh object as `this`, and that object is the result.
    pub fn construct(&self, env: &mut Environment, constructor: &Value, nargs: usize, first_arg: usize) -> Value {
        match constructor {
            Value::NativeFn(_) => self.dispatch(constructor, env, None, nargs, first_arg, true),
            Value::ScriptFn(closure) => {
                let proto = self.function_prototype(closure);
                let object = self.new_object();
                {
                    let mut obj = object.borrow_mut();
                    obj.set_proto(Some(&proto));
                    obj.define(
                        "constructor",
                        constructor.clone(),
                        PropFlags::new(PropFlags::DONT_ENUM),
                    );
                }
                self.invoke_closure(closure, env, Some(Value::Object(object.clone())), nargs, first_arg);
                Value::Object(object)
            }
            other => {
                self.report(Diagnostic::missing(format!("new on non-function {:?}", other)));
                Value::Undefined
            }
        }
    }

    /// The function's `prototype` object, created on first use.
    pub fn function_prototype(&self, closure: &Closure) -> ObjectRef {
        let properties = closure.properties();
        let existing = properties.borrow().get_member("prototype");
        if let Some(Value::Object(proto)) = existing {
            return proto;
        }
        let proto = self.new_object();
        properties.borrow_mut().define(
            "prototype",
            Value::Object(proto.clone()),
            PropFlags::new(PropFlags::DONT_ENUM),
        );
        proto
    }

    fn extends(&self, sub_class: &Value, super_class: &Value) {
        let super_proto = match super_class {
            Value::ScriptFn(closure) => self.function_prototype(closure),
            Value::NativeFn(_) => self.prototypes.object.clone(),
            other => {
                self.report(Diagnostic::missing(format!("extends: {:?} is not a class", other)));
                return;
            }
        };
        let Some(sub_properties) = sub_class.to_object() else {
            self.report(Diagnostic::missing(format!("extends: {:?} is not a class", sub_class)));
            return;
        };

        let proto = self.new_object();
        {
            let mut proto = proto.borrow_mut();
            proto.set_proto(Some(&super_proto));
            proto.define(
                "__constructor__",
                super_class.clone(),
                PropFlags::new(PropFlags::DONT_ENUM),
            );
        }
        sub_properties.borrow_mut().define(
            "prototype",
            Value::Object(proto),
            PropFlags::new(PropFlags::DONT_ENUM),
        );
    }
}

/// Argument count and first-argument index for a call whose callee data
/// occupies `header` slots on top of the stack.
fn call_layout(env: &Environment, header: usize) -> (usize, usize) {
    let nargs_value = env.top(header - 1).to_number();
    let available = env.stack_size().saturating_sub(header);
    let nargs = (nargs_value.max(0.0) as usize).min(available);
    (nargs, available.saturating_sub(1))
}

fn numeric(env: &mut Environment, op: fn(f64, f64) -> f64) {
    let b = env.pop().to_number();
    let a = env.pop().to_number();
    env.push(Value::Number(op(a, b)));
}

fn compare(env: &mut Environment, op: impl FnOnce(&Value, &Value) -> bool) {
    let b = env.pop();
    let a = env.pop();
    env.push(Value::Boolean(op(&a, &b)));
}

fn bitwise(env: &mut Environment, op: fn(i32, i32) -> Value) {
    let b = env.pop().to_int32();
    let a = env.pop().to_int32();
    env.push(op(a, b));
}

fn property_name(index: f64) -> Option<&'static str> {
    if index.is_nan() || index < 0.0 {
        return None;
    }
    PROPERTY_NAMES.get(index as usize).copied()
}

fn string_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_string()),
        Value::Object(obj) => match obj.borrow().boxed_value() {
            Some(Value::String(s)) => Some(s.to_string()),
            _ => None,
        },
        _ => None,
    }
}

/// 1-based substring with clamping; a negative count takes the rest.
fn substring(text: &str, index: i32, count: i32) -> String {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len() as i64;
    let base = (index as i64 - 1).clamp(0, len);
    let count = if count < 0 || base + count as i64 > len {
        len - base
    } else {
        count as i64
    };
    chars[base as usize..(base + count) as usize].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ActionWriter;
    use crate::host::{MovieClip, RecordingHost};
    use crate::vm::closure::{PRELOAD_THIS, SUPPRESS_ARGUMENTS, SUPPRESS_SUPER};
    use crate::vm::object::MAX_DENSE_ELEMENTS;
    use ActionCode::*;

    struct Fixture {
        vm: Vm,
        host: Rc<RecordingHost>,
        root: ObjectRef,
        timeline: Rc<MovieClip>,
    }

    fn fixture() -> Fixture {
        let host = Rc::new(RecordingHost::new());
        let config = VmConfig {
            random_seed: Some(7),
            ..VmConfig::default()
        };
        let vm = Vm::new(config, host.clone());
        let timeline = Rc::new(MovieClip::new());
        for _ in 0..3 {
            timeline.add_frame(Vec::new());
        }
        let root = vm.new_clip(timeline.clone(), "_level0", None);
        vm.prepare_root(&root);
        Fixture {
            vm,
            host,
            root,
            timeline,
        }
    }

    fn buffer(w: &ActionWriter) -> Rc<ActionBuffer> {
        Rc::new(ActionBuffer::read(&w.finish()).unwrap())
    }

    fn run(f: &Fixture, w: &ActionWriter) -> Value {
        f.vm.evaluate(&buffer(w), &f.root)
    }

    fn root_member(f: &Fixture, name: &str) -> Option<Value> {
        f.root.borrow().get_member(name)
    }

    #[test]
    fn test_numeric_add_of_string_literals() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_str("5").push_str("3").op(Add).op(Return);
        assert_eq!(run(&f, &w), Value::Number(8.0));
    }

    #[test]
    fn test_typed_add_concatenates_strings() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_str("5").push_number(3.0).op(Add2).op(Return);
        assert_eq!(run(&f, &w), Value::from("53"));

        let mut w = ActionWriter::new();
        w.push_number(5.0).push_number(3.0).op(Add2).op(Return);
        assert_eq!(run(&f, &w), Value::Number(8.0));
    }

    #[test]
    fn test_classic_function_ignores_extra_args() {
        let f = fixture();
        let mut body = ActionWriter::new();
        body.push_str("a")
            .op(GetVariable)
            .push_str("b")
            .op(GetVariable)
            .op(Add)
            .op(Return);

        let mut w = ActionWriter::new();
        w.define_function("f", &["a", "b"], &body.body())
            .op(Pop)
            .push_number(100.0)
            .push_number(2.0)
            .push_number(1.0)
            .push_number(3.0)
            .push_str("f")
            .op(CallFunction)
            .op(Return);
        assert_eq!(run(&f, &w), Value::Number(3.0));
        assert!(f.vm.diagnostics().is_empty());
    }

    #[test]
    fn test_function_locals_do_not_leak() {
        let f = fixture();
        let mut body = ActionWriter::new();
        body.push_str("tmp").push_number(1.0).op(DefineLocal);

        let mut w = ActionWriter::new();
        w.define_function("f", &[], &body.body())
            .op(Pop)
            .push_number(0.0)
            .push_str("f")
            .op(CallFunction)
            .op(Pop)
            .push_str("tmp")
            .op(GetVariable)
            .op(Return);
        assert_eq!(run(&f, &w), Value::Undefined);
    }

    #[test]
    fn test_function2_preloads_this_into_register_one() {
        let f = fixture();
        let mut body = ActionWriter::new();
        body.push_register(1).op(Return);

        let mut w = ActionWriter::new();
        w.define_function2(
            "g",
            2,
            PRELOAD_THIS | SUPPRESS_ARGUMENTS | SUPPRESS_SUPER,
            &[],
            &body.body(),
        )
        .op(Pop)
        // o = new Object(); o.g = g; return o.g()
        .push_str("o")
        .push_number(0.0)
        .push_str("Object")
        .op(NewObject)
        .op(SetVariable)
        .push_str("o")
        .op(GetVariable)
        .push_str("g")
        .push_str("g")
        .op(GetVariable)
        .op(SetMember)
        .push_number(0.0)
        .push_str("o")
        .op(GetVariable)
        .push_str("g")
        .op(CallMethod)
        .op(Return);

        let result = run(&f, &w);
        let o = root_member(&f, "o").unwrap();
        assert!(matches!(o, Value::Object(_)));
        assert_eq!(result, o);
    }

    #[test]
    fn test_function2_register_args() {
        let f = fixture();
        let mut body = ActionWriter::new();
        body.push_register(1)
            .push_str("y")
            .op(GetVariable)
            .op(Subtract)
            .op(Return);

        let mut w = ActionWriter::new();
        w.define_function2("h", 2, 0x02 | 0x08 | 0x20, &[(1, "x"), (0, "y")], &body.body())
            .op(Pop)
            .push_number(3.0)
            .push_number(10.0)
            .push_number(2.0)
            .push_str("h")
            .op(CallFunction)
            .op(Return);
        assert_eq!(run(&f, &w), Value::Number(7.0));
    }

    #[test]
    fn test_branch_if_true_false_falls_through() {
        let f = fixture();
        let mut tail = ActionWriter::new();
        tail.push_str("fallthrough").op(Return);
        let tail = tail.body();

        for (condition, expected) in [(false, "fallthrough"), (true, "branched")] {
            let mut w = ActionWriter::new();
            w.push_bool(condition)
                .branch_if_true(tail.len() as i16)
                .raw(&tail)
                .push_str("branched")
                .op(Return);
            assert_eq!(run(&f, &w), Value::from(expected));
        }
        assert!(f.vm.diagnostics().is_empty());
    }

    #[test]
    fn test_loop_with_backward_branch() {
        let f = fixture();
        // i = 0; do { i++ } while (i < 5); return i
        let mut w = ActionWriter::new();
        w.push_str("i").push_number(0.0).op(SetVariable);
        let loop_start = w.offset();
        w.push_str("i")
            .push_str("i")
            .op(GetVariable)
            .op(Increment)
            .op(SetVariable)
            .push_str("i")
            .op(GetVariable)
            .push_number(5.0)
            .op(Less2);
        let back = loop_start as i64 - (w.offset() as i64 + 5);
        w.branch_if_true(back as i16).push_str("i").op(GetVariable).op(Return);
        assert_eq!(run(&f, &w), Value::Number(5.0));
    }

    #[test]
    fn test_dictionary_executed_twice_keeps_table() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.declare_dictionary(&["alpha", "beta"])
            .push(&[PushItem::Dictionary(1)])
            .op(Return);
        let buffer = buffer(&w);

        assert_eq!(f.vm.evaluate(&buffer, &f.root), Value::from("beta"));
        assert_eq!(f.vm.evaluate(&buffer, &f.root), Value::from("beta"));
        assert_eq!(buffer.dictionary().len(), 2);
        assert!(f.vm.diagnostics().is_empty());
    }

    #[test]
    fn test_decoy_dictionary_is_ignored() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.declare_dictionary(&["real"])
            .declare_dictionary(&["decoy", "entries"])
            .push(&[PushItem::Dictionary(0)])
            .op(Return);
        assert_eq!(run(&f, &w), Value::from("real"));
        assert_eq!(f.vm.diagnostic_count(DiagnosticKind::MalformedBytecode), 1);
    }

    #[test]
    fn test_bad_dictionary_index_pushes_zero() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push(&[PushItem::Dictionary(3)]).op(Return);
        assert_eq!(run(&f, &w), Value::Number(0.0));
        assert_eq!(f.vm.diagnostic_count(DiagnosticKind::MalformedBytecode), 1);
    }

    #[test]
    fn test_with_shadows_locals() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_str("v").push_str("local").op(DefineLocal);
        // scope = { v: "with" }
        w.push_str("v")
            .push_str("with")
            .push_number(1.0)
            .op(InitObject)
            .store_register(0)
            .op(Pop);
        let mut block = ActionWriter::new();
        block.push_str("v").op(GetVariable).op(Return);
        let block = block.body();
        w.push_register(0)
            .with_block(block.len() as u16)
            .raw(&block);
        assert_eq!(run(&f, &w), Value::from("with"));
    }

    #[test]
    fn test_with_scope_expires() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_str("v").push_str("target").op(SetVariable);
        w.push_str("v")
            .push_str("with")
            .push_number(1.0)
            .op(InitObject);
        let mut block = ActionWriter::new();
        block.push_str("inside").push_str("v").op(GetVariable).op(SetVariable);
        let block = block.body();
        w.with_block(block.len() as u16)
            .raw(&block)
            .push_str("v")
            .op(GetVariable)
            .op(Return);

        assert_eq!(run(&f, &w), Value::from("target"));
        assert_eq!(root_member(&f, "inside"), Some(Value::from("with")));
    }

    #[test]
    fn test_trace_and_version() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_str("hello").op(Trace);
        w.push_str("$version").op(GetVariable).op(Trace);
        w.push_number(0.0).push_str("getVersion").op(CallFunction).op(Trace);
        w.push(&[PushItem::Undefined]).op(Trace);
        run(&f, &w);
        assert_eq!(
            f.host.traces(),
            vec!["hello", "ACTIONVM 7,0,0,0", "ACTIONVM 7,0,0,0", "undefined"]
        );
    }

    #[test]
    fn test_legacy_version_traces_undefined_as_empty() {
        let host = Rc::new(RecordingHost::new());
        let config = VmConfig {
            version: 6,
            ..VmConfig::default()
        };
        let vm = Vm::new(config, host.clone());
        let root = vm.new_clip(Rc::new(MovieClip::new()), "_level0", None);
        let mut w = ActionWriter::new();
        w.push(&[PushItem::Undefined]).op(Trace);
        vm.execute_buffer(&buffer(&w), &root);
        assert_eq!(host.traces(), vec![""]);
    }

    #[test]
    fn test_accessor_property() {
        let f = fixture();
        let mut getter = ActionWriter::new();
        getter.push_number(42.0).op(Return);
        let mut setter = ActionWriter::new();
        setter.push_str("written").push_str("value").op(GetVariable).op(SetVariable);

        let mut w = ActionWriter::new();
        w.define_function("getp", &[], &getter.body()).op(Pop);
        w.define_function("setp", &["value"], &setter.body()).op(Pop);
        w.push_str("o")
            .push_number(0.0)
            .push_str("Object")
            .op(NewObject)
            .op(SetVariable);
        // o.addProperty("p", getp, setp)
        w.push_str("setp")
            .op(GetVariable)
            .push_str("getp")
            .op(GetVariable)
            .push_str("p")
            .push_number(3.0)
            .push_str("o")
            .op(GetVariable)
            .push_str("addProperty")
            .op(CallMethod)
            .op(Pop);
        // o.p = 9
        w.push_str("o")
            .op(GetVariable)
            .push_str("p")
            .push_number(9.0)
            .op(SetMember);
        w.push_str("o").op(GetVariable).push_str("p").op(GetMember).op(Return);

        assert_eq!(run(&f, &w), Value::Number(42.0));
        assert_eq!(root_member(&f, "written"), Some(Value::Number(9.0)));
    }

    #[test]
    fn test_new_with_script_constructor() {
        let f = fixture();
        let mut body = ActionWriter::new();
        body.push_str("this")
            .op(GetVariable)
            .push_str("x")
            .push_str("x")
            .op(GetVariable)
            .op(SetMember);

        let mut w = ActionWriter::new();
        w.define_function("Point", &["x"], &body.body()).op(Pop);
        w.push_str("p")
            .push_number(5.0)
            .push_number(1.0)
            .push_str("Point")
            .op(NewObject)
            .op(SetVariable);
        w.push_str("p").op(GetVariable).push_str("x").op(GetMember).op(Return);
        assert_eq!(run(&f, &w), Value::Number(5.0));

        let p = root_member(&f, "p").and_then(|p| p.to_object()).unwrap();
        let constructor = p.borrow().get_member("constructor").unwrap();
        assert_eq!(Some(constructor), root_member(&f, "Point"));
        assert!(p.borrow().enumerate_keys().iter().all(|k| &**k == "x"));
    }

    #[test]
    fn test_extends_links_prototypes() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.define_function("Base", &[], &[]).op(Pop);
        w.define_function("Derived", &[], &[]).op(Pop);
        // Base.prototype.kind = "base"
        w.push_str("Base")
            .op(GetVariable)
            .push_str("prototype")
            .op(GetMember)
            .push_str("kind")
            .push_str("base")
            .op(SetMember);
        w.push_str("Derived")
            .op(GetVariable)
            .push_str("Base")
            .op(GetVariable)
            .op(Extends);
        // (new Derived()).kind
        w.push_number(0.0)
            .push_str("Derived")
            .op(NewObject)
            .push_str("kind")
            .op(GetMember)
            .op(Return);
        // lookup stops at Derived.prototype
        assert_eq!(run(&f, &w), Value::Undefined);

        let derived = root_member(&f, "Derived").unwrap();
        let Value::ScriptFn(derived) = derived else {
            panic!("Derived is not a function");
        };
        let proto = f.vm.function_prototype(&derived);
        assert_eq!(
            proto.borrow().get_member("kind"),
            Some(Value::from("base"))
        );
    }

    #[test]
    fn test_enumerate_pushes_terminator_then_keys() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_str("a")
            .push_number(1.0)
            .push_str("b")
            .push_number(2.0)
            .push_number(2.0)
            .op(InitObject)
            .op(Enumerate2)
            .op(Pop)
            .op(Pop)
            .op(Return);
        assert_eq!(run(&f, &w), Value::Null);
    }

    #[test]
    fn test_as_set_prop_flags_hides_members() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_str("o")
            .push_str("a")
            .push_number(1.0)
            .push_str("b")
            .push_number(2.0)
            .push_number(2.0)
            .op(InitObject)
            .op(SetVariable);
        // ASSetPropFlags(o, "a", 1)
        w.push_number(1.0)
            .push_str("a")
            .push_str("o")
            .op(GetVariable)
            .push_number(3.0)
            .push_str("ASSetPropFlags")
            .op(CallFunction)
            .op(Pop);
        run(&f, &w);

        let o = root_member(&f, "o").and_then(|o| o.to_object()).unwrap();
        let keys: Vec<String> = o.borrow().enumerate_keys().iter().map(|k| String::from(&**k)).collect();
        assert_eq!(keys, vec!["b"]);
        assert_eq!(o.borrow().get_member("a"), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_string_methods_on_primitives() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_number(0.0)
            .push_str("Hello")
            .push_str("toUpperCase")
            .op(CallMethod)
            .op(Return);
        assert_eq!(run(&f, &w), Value::from("HELLO"));

        let mut w = ActionWriter::new();
        w.push_str("héllo").push_str("length").op(GetMember).op(Return);
        assert_eq!(run(&f, &w), Value::Number(5.0));

        let mut w = ActionWriter::new();
        w.push_number(16.0)
            .push_number(1.0)
            .push_number(255.0)
            .push_str("toString")
            .op(CallMethod)
            .op(Return);
        assert_eq!(run(&f, &w), Value::from("ff"));
    }

    #[test]
    fn test_substring_and_string_ops() {
        assert_eq!(substring("abcdef", 2, 3), "bcd");
        assert_eq!(substring("abcdef", 0, 2), "ab");
        assert_eq!(substring("abcdef", 5, -1), "ef");
        assert_eq!(substring("abc", 10, 2), "");

        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_str("A").op(CharToAscii).op(Increment).op(AsciiToChar).op(Return);
        assert_eq!(run(&f, &w), Value::from("B"));
    }

    #[test]
    fn test_modulo_by_zero_is_undefined() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_number(7.0).push_number(0.0).op(Modulo).op(Return);
        assert_eq!(run(&f, &w), Value::Undefined);
        let mut w = ActionWriter::new();
        w.push_number(7.0).push_number(3.0).op(Modulo).op(Return);
        assert_eq!(run(&f, &w), Value::Number(1.0));
    }

    #[test]
    fn test_bitwise_ops() {
        let f = fixture();
        let cases: [(f64, f64, ActionCode, f64); 4] = [
            (6.0, 3.0, BitAnd, 2.0),
            (1.0, 31.0, BitLShift, -2147483648.0),
            (-8.0, 1.0, BitRShift, -4.0),
            (-1.0, 28.0, BitURShift, 15.0),
        ];
        for (a, b, op, expected) in cases {
            let mut w = ActionWriter::new();
            w.push_number(a).push_number(b).op(op).op(Return);
            assert_eq!(run(&f, &w), Value::Number(expected), "{}", op.name());
        }
    }

    #[test]
    fn test_random_is_in_range() {
        let f = fixture();
        for max in [0.0, 1.0, 10.0] {
            let mut w = ActionWriter::new();
            w.push_number(max).op(RandomNumber).op(Return);
            let n = run(&f, &w).to_number();
            assert!(n >= 0.0 && n < max.max(1.0));
        }
    }

    #[test]
    fn test_navigation_actions() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.goto_frame(2).op(Stop);
        run(&f, &w);
        assert_eq!(f.timeline.current_frame(), 2);
        assert_eq!(f.timeline.play_state(), PlayState::Stopped);

        f.timeline.add_label("start", 0);
        let mut w = ActionWriter::new();
        w.op(PrevFrame)
            .push_str("_currentframe")
            .op(GetVariable)
            .store_register(1)
            .op(Pop)
            .goto_label("start")
            .op(Play)
            .push_register(1)
            .op(Return);
        assert_eq!(run(&f, &w), Value::Number(2.0));
        assert_eq!(f.timeline.current_frame(), 0);
        assert_eq!(f.timeline.play_state(), PlayState::Playing);

        let mut w = ActionWriter::new();
        w.push_number(3.0).goto_frame_expression(false);
        run(&f, &w);
        assert_eq!(f.timeline.current_frame(), 2);
        assert_eq!(f.timeline.play_state(), PlayState::Stopped);
    }

    #[test]
    fn test_get_url_routes_fscommand() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.get_url("FSCommand:quit", "now")
            .get_url("http://example.com", "_blank")
            .push_str("fscommand:fullscreen")
            .push_str("true")
            .get_url2(0);
        run(&f, &w);
        assert_eq!(
            *f.host.commands.borrow(),
            vec![
                (String::from("quit"), String::from("now")),
                (String::from("fullscreen"), String::from("true"))
            ]
        );
        assert_eq!(f.host.urls.borrow()[0].0, "http://example.com");
    }

    #[test]
    fn test_call_frame_runs_other_frame() {
        let f = fixture();
        let mut frame = ActionWriter::new();
        frame.push_str("called").push_bool(true).op(SetVariable);
        let index = f.timeline.add_frame(vec![buffer(&frame)]);

        let mut w = ActionWriter::new();
        w.push_number(index as f64).raw(&[0x9E, 0x00, 0x00]);
        run(&f, &w);
        assert_eq!(root_member(&f, "called"), Some(Value::Boolean(true)));
    }

    #[test]
    fn test_set_target_and_path_variables() {
        let f = fixture();
        let child_timeline = Rc::new(MovieClip::new());
        let child = f.vm.new_clip(child_timeline, "child", Some(&f.root));
        f.root
            .borrow_mut()
            .set_member("child", Value::Object(child.clone()));

        let mut w = ActionWriter::new();
        w.set_target("child")
            .push_str("x")
            .push_number(1.0)
            .op(SetVariable)
            .push_str("where")
            .push_str("_target")
            .op(GetVariable)
            .op(SetVariable)
            .set_target("")
            .push_str("/child:x")
            .op(GetVariable)
            .op(Return);
        assert_eq!(run(&f, &w), Value::Number(1.0));
        assert_eq!(child.borrow().get_member("where"), Some(Value::from("/child")));
        assert_eq!(root_member(&f, "x"), None);
    }

    #[test]
    fn test_get_property_by_number() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_str("").push_number(13.0).op(GetProperty).op(Return);
        assert_eq!(run(&f, &w), Value::from("_level0"));

        let mut w = ActionWriter::new();
        w.push_str("").push_number(99.0).op(GetProperty).op(Return);
        assert_eq!(run(&f, &w), Value::Undefined);
        assert_eq!(f.vm.diagnostic_count(DiagnosticKind::MalformedBytecode), 1);
    }

    #[test]
    fn test_unimplemented_actions_continue() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_str("kept")
            .op(Throw)
            .op(InstanceOf)
            .raw(&[0x16])
            .op(Return);
        assert_eq!(run(&f, &w), Value::from("kept"));
        assert_eq!(f.vm.diagnostic_count(DiagnosticKind::Unimplemented), 3);
    }

    #[test]
    fn test_delete_falls_back_to_undefined() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_str("gone").push_number(1.0).op(SetVariable);
        w.push_str("gone").op(Delete2).op(Pop);
        w.push_str("gone").op(GetVariable).op(Return);
        assert_eq!(run(&f, &w), Value::Undefined);
        assert_eq!(f.vm.diagnostic_count(DiagnosticKind::Unimplemented), 1);
    }

    #[test]
    fn test_malformed_push_is_skipped() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.raw(&[0x96, 0x02, 0x00, 0x0F, 0x00]).push_str("after").op(Return);
        assert_eq!(run(&f, &w), Value::from("after"));
        assert_eq!(f.vm.diagnostic_count(DiagnosticKind::MalformedBytecode), 1);
    }

    #[test]
    fn test_register_out_of_range_uses_global_zero() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_str("zero")
            .store_register(0)
            .op(Pop)
            .push_register(9)
            .op(Return);
        assert_eq!(run(&f, &w), Value::from("zero"));
        assert_eq!(f.vm.diagnostics()[0].kind, DiagnosticKind::MalformedBytecode);
    }

    #[test]
    fn test_calling_non_function_is_missing_binding() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_number(0.0).push_str("nothing").op(CallFunction).op(Return);
        assert_eq!(run(&f, &w), Value::Undefined);
        assert_eq!(f.vm.diagnostic_count(DiagnosticKind::MissingBinding), 1);
    }

    #[test]
    fn test_array_builtins() {
        let f = fixture();
        let mut w = ActionWriter::new();
        // a = [1, 2]; a.push(3); return a.join("-")
        w.push_str("a")
            .push_number(2.0)
            .push_number(1.0)
            .push_number(2.0)
            .op(InitArray)
            .op(SetVariable);
        w.push_number(3.0)
            .push_number(1.0)
            .push_str("a")
            .op(GetVariable)
            .push_str("push")
            .op(CallMethod)
            .op(Pop);
        w.push_str("-")
            .push_number(1.0)
            .push_str("a")
            .op(GetVariable)
            .push_str("join")
            .op(CallMethod)
            .op(Return);
        assert_eq!(run(&f, &w), Value::from("1-2-3"));
    }

    #[test]
    fn test_run_and_advance_frames() {
        let host = Rc::new(RecordingHost::new());
        let vm = Vm::new(VmConfig::default(), host.clone());
        let timeline = Rc::new(MovieClip::new());
        for text in ["one", "two"] {
            let mut w = ActionWriter::new();
            w.push_str(text).op(Trace);
            timeline.add_frame(vec![buffer(&w)]);
        }
        let mut last = ActionWriter::new();
        last.push_str("three").op(Trace).op(Stop);
        timeline.add_frame(vec![buffer(&last)]);
        timeline.add_frame(Vec::new());

        let root = vm.new_clip(timeline, "_level0", None);
        vm.run_frame(&root);
        while vm.advance_frame(&root) {}
        assert_eq!(host.traces(), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_clip_name_assigned_from_itself() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_str("_name").push_str("this").op(GetVariable).op(SetVariable);
        w.push_str("this")
            .op(GetVariable)
            .push_str("_name")
            .push_str("this")
            .op(GetVariable)
            .op(SetMember);
        w.push_str("_name").op(GetVariable).op(Return);
        assert_eq!(run(&f, &w), Value::from("_level0"));
        assert!(f.vm.diagnostics().is_empty());
    }

    #[test]
    fn test_array_length_holding_the_array() {
        let f = fixture();
        let mut w = ActionWriter::new();
        // a = []; a.length = a; a[0] = 1; return a.length
        w.push_str("a").push_number(0.0).op(InitArray).op(SetVariable);
        w.push_str("a")
            .op(GetVariable)
            .push_str("length")
            .push_str("a")
            .op(GetVariable)
            .op(SetMember);
        w.push_str("a")
            .op(GetVariable)
            .push_str("0")
            .push_number(1.0)
            .op(SetMember);
        w.push_str("a")
            .op(GetVariable)
            .push_str("length")
            .op(GetMember)
            .op(Return);
        assert_eq!(run(&f, &w), Value::Number(1.0));
    }

    #[test]
    fn test_goto_frame_expression_bias_saturates() {
        let f = fixture();
        let mut w = ActionWriter::new();
        // goto_frame_expression with the scene-bias flag and a bias of 1
        w.push_number(5e9).raw(&[0x9F, 3, 0, 0x02, 1, 0]);
        run(&f, &w);
        assert_eq!(f.timeline.current_frame(), 2);
    }

    #[test]
    fn test_huge_array_text_is_bounded() {
        let f = fixture();
        let mut w = ActionWriter::new();
        // a = Array(4e9)
        w.push_str("a")
            .push_number(4e9)
            .push_number(1.0)
            .push_str("Array")
            .op(CallFunction)
            .op(SetVariable);
        run(&f, &w);

        let mut w = ActionWriter::new();
        w.push_str("a").op(GetVariable).push_str("length").op(GetMember).op(Return);
        assert_eq!(run(&f, &w), Value::Number(4e9));

        // each element renders as "undefined", joined with commas
        let mut w = ActionWriter::new();
        w.push_str("a").op(GetVariable).op(ToString).op(StringLength).op(Return);
        let text_len = run(&f, &w).to_number() as usize;
        assert_eq!(text_len, MAX_DENSE_ELEMENTS * 10 - 1);
    }

    #[test]
    fn test_function_declared_in_with_keeps_scope() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_str("v").push_str("target").op(SetVariable);
        w.push_str("v")
            .push_str("with")
            .push_number(1.0)
            .op(InitObject)
            .store_register(0)
            .op(Pop);
        let mut body = ActionWriter::new();
        body.push_str("v").op(GetVariable).op(Return);
        let mut block = ActionWriter::new();
        block.define_function("f", &[], &body.body()).op(Pop);
        let block = block.body();
        w.push_register(0)
            .with_block(block.len() as u16)
            .raw(&block)
            .push_number(0.0)
            .push_str("f")
            .op(CallFunction)
            .op(Return);
        assert_eq!(run(&f, &w), Value::from("with"));
    }

    #[test]
    fn test_function_scope_skips_released_with_object() {
        let f = fixture();
        let mut w = ActionWriter::new();
        w.push_str("v").push_str("target").op(SetVariable);
        // the with object is only referenced by the with-stack
        w.push_str("v")
            .push_str("with")
            .push_number(1.0)
            .op(InitObject);
        let mut body = ActionWriter::new();
        body.push_str("v").op(GetVariable).op(Return);
        let mut block = ActionWriter::new();
        block.define_function("f", &[], &body.body()).op(Pop);
        let block = block.body();
        w.with_block(block.len() as u16)
            .raw(&block)
            .push_number(0.0)
            .push_str("f")
            .op(CallFunction)
            .op(Return);
        assert_eq!(run(&f, &w), Value::from("target"));
    }
}
