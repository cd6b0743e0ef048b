//! Execution host for instrumented program images
//!
//! A small synchronous interpreter: one operand stack per invocation,
//! per-frame current-line tracking, lazy class initialization, and probe
//! dispatch into the trace session. Probes run on the executing thread, in
//! execution order; there is no background work anywhere.
//!
//! The interpreter maintains the shadow call stack that backs
//! [`crate::stack_walk::StackWalker`], so class initializers can attribute
//! themselves to the in-scope method that triggered them.
//!
//! Probe dispatch never fails: a value that does not match its probe's type
//! is reported and skipped, and the instrumented program keeps running.

use crate::ir::{Class, Insn, Method, Obj, Probe, Program, Value};
use crate::recorder::TraceSession;
use crate::stack_walk::{FrameView, ShadowStack};
use crate::types::{Descriptor, TypeCode};
use std::collections::HashSet;
use thiserror::Error;

/// Call-depth bound (guards against runaway recursion in images)
const MAX_CALL_DEPTH: usize = 512;

/// Failures of the execution host itself
///
/// These concern the hosted program, never the probes: probe-side problems
/// are logged and swallowed at the probe boundary.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("entry class {0} not found in image")]
    UnknownClass(String),
    #[error("method {class}.{method} not found in image")]
    UnknownMethod { class: String, method: String },
    #[error("operand stack underflow in {class}.{method}")]
    StackUnderflow { class: String, method: String },
    #[error("type mismatch in {class}.{method}: expected {expected}")]
    TypeMismatch {
        class: String,
        method: String,
        expected: &'static str,
    },
    #[error("invoke of {owner}.{name} carries unparsable descriptor")]
    BadInvoke { owner: String, name: String },
    #[error("call depth exceeded {MAX_CALL_DEPTH}")]
    DepthExceeded,
}

/// Interprets instrumented bodies, firing probes into the session
pub struct Interp<'p, 's> {
    program: &'p Program,
    session: &'s mut TraceSession,
    /// Shadow call stack, outermost first
    frames: Vec<FrameView>,
    /// Classes whose initializer already ran
    initialized: HashSet<String>,
}

impl<'p, 's> Interp<'p, 's> {
    pub fn new(program: &'p Program, session: &'s mut TraceSession) -> Self {
        Self {
            program,
            session,
            frames: Vec::new(),
            initialized: HashSet::new(),
        }
    }

    /// Run an image from its entry class
    ///
    /// The host constructs the entry class first when it has a no-argument
    /// constructor, then invokes `main`; an implicit constructor is
    /// exercised exactly like the original runtime would.
    pub fn run(&mut self, entry_class: &str) -> Result<(), ExecError> {
        let class = self
            .lookup(entry_class)
            .ok_or_else(|| ExecError::UnknownClass(entry_class.to_string()))?;

        self.ensure_initialized(entry_class)?;

        let receiver = match class.method("<init>") {
            Some(ctor) if ctor.descriptor == "()V" && !ctor.body.is_empty() => {
                let this = Value::Ref(Obj::new(&class.name, &class.fields));
                self.call_frame(class, ctor, vec![this.clone()])?;
                Some(this)
            }
            _ => None,
        };

        let main = class
            .method("main")
            .ok_or_else(|| ExecError::UnknownMethod {
                class: entry_class.to_string(),
                method: "main".to_string(),
            })?;

        let desc = Descriptor::parse(&main.descriptor).map_err(|_| ExecError::BadInvoke {
            owner: entry_class.to_string(),
            name: "main".to_string(),
        })?;
        let mut args: Vec<Value> = Vec::new();
        if !main.is_static {
            args.push(
                receiver.unwrap_or_else(|| Value::Ref(Obj::new(&class.name, &class.fields))),
            );
        }
        for code in &desc.params {
            if let Some(v) = Value::default_for(*code) {
                args.push(v);
            }
        }

        self.call_frame(class, main, args)?;
        Ok(())
    }

    /// Invoke one image method directly (embedding and test entry point)
    pub fn call(
        &mut self,
        class_name: &str,
        method_name: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, ExecError> {
        let class = self
            .lookup(class_name)
            .ok_or_else(|| ExecError::UnknownClass(class_name.to_string()))?;
        let method = class
            .method(method_name)
            .ok_or_else(|| ExecError::UnknownMethod {
                class: class_name.to_string(),
                method: method_name.to_string(),
            })?;
        self.ensure_initialized(class_name)?;
        self.call_frame(class, method, args)
    }

    /// Class lookup detached from `&mut self` so bodies can borrow the image
    /// while the interpreter mutates
    fn lookup(&self, name: &str) -> Option<&'p Class> {
        self.program.class(name)
    }

    /// Run the class initializer before a class's first use
    fn ensure_initialized(&mut self, class_name: &str) -> Result<(), ExecError> {
        if self.initialized.contains(class_name) {
            return Ok(());
        }
        self.initialized.insert(class_name.to_string());

        if let Some(class) = self.lookup(class_name) {
            if let Some(clinit) = class.method("<clinit>") {
                if !clinit.body.is_empty() {
                    self.call_frame(class, clinit, Vec::new())?;
                }
            }
        }
        Ok(())
    }

    /// Push a shadow frame, execute, pop
    fn call_frame(
        &mut self,
        class: &'p Class,
        method: &'p Method,
        args: Vec<Value>,
    ) -> Result<Option<Value>, ExecError> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(ExecError::DepthExceeded);
        }
        self.frames.push(FrameView {
            class_name: class.name.clone(),
            line: 0,
        });
        let result = self.exec_body(class, method, args);
        self.frames.pop();
        result
    }

    fn exec_body(
        &mut self,
        class: &'p Class,
        method: &'p Method,
        args: Vec<Value>,
    ) -> Result<Option<Value>, ExecError> {
        let ret_code = Descriptor::parse(&method.descriptor)
            .map(|d| d.ret)
            .unwrap_or(TypeCode::Void);
        let this_offset = usize::from(!method.is_static);

        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0usize;

        while pc < method.body.len() {
            match &method.body[pc] {
                Insn::Line(line) => {
                    if let Some(frame) = self.frames.last_mut() {
                        frame.line = *line;
                    }
                }
                Insn::Push(c) => stack.push(Value::from_const(c)),
                Insn::LoadArg(i) => {
                    stack.push(args.get(i + this_offset).cloned().unwrap_or(Value::Null));
                }
                Insn::LoadThis => {
                    stack.push(args.first().cloned().unwrap_or(Value::Null));
                }
                Insn::New(name) => {
                    self.ensure_initialized(name)?;
                    let decls = self.lookup(name).map(|c| c.fields.as_slice()).unwrap_or(&[]);
                    stack.push(Value::Ref(Obj::new(name, decls)));
                }
                Insn::GetField(name) => {
                    let target = pop(&mut stack, class, method)?;
                    match target {
                        Value::Ref(obj) => {
                            stack.push(obj.borrow().get(name).unwrap_or(Value::Null));
                        }
                        _ => return Err(type_mismatch(class, method, "object reference")),
                    }
                }
                Insn::PutField(name) => {
                    let value = pop(&mut stack, class, method)?;
                    let target = pop(&mut stack, class, method)?;
                    match target {
                        Value::Ref(obj) => obj.borrow_mut().put(name, value),
                        _ => return Err(type_mismatch(class, method, "object reference")),
                    }
                }
                Insn::Jump {
                    target,
                    conditional,
                } => {
                    if *conditional {
                        let taken = match pop(&mut stack, class, method)? {
                            Value::Int(v) => v != 0,
                            Value::Bool(b) => b,
                            _ => return Err(type_mismatch(class, method, "int condition")),
                        };
                        if taken {
                            pc = *target;
                            continue;
                        }
                    } else {
                        pc = *target;
                        continue;
                    }
                }
                Insn::Switch {
                    targets,
                    default_target,
                } => {
                    let index = match pop(&mut stack, class, method)? {
                        Value::Int(v) => v,
                        _ => return Err(type_mismatch(class, method, "int selector")),
                    };
                    pc = usize::try_from(index)
                        .ok()
                        .and_then(|i| targets.get(i).copied())
                        .unwrap_or(*default_target);
                    continue;
                }
                Insn::Cmp => {
                    let b = numeric(pop(&mut stack, class, method)?, class, method)?;
                    let a = numeric(pop(&mut stack, class, method)?, class, method)?;
                    let ord = match a.partial_cmp(&b) {
                        Some(std::cmp::Ordering::Less) => -1,
                        Some(std::cmp::Ordering::Greater) => 1,
                        _ => 0,
                    };
                    stack.push(Value::Int(ord));
                }
                Insn::Invoke {
                    owner,
                    name,
                    descriptor,
                } => {
                    self.exec_invoke(owner, name, descriptor, &mut stack, class, method)?;
                }
                Insn::Return => {
                    return if ret_code != TypeCode::Void {
                        Ok(Some(pop(&mut stack, class, method)?))
                    } else {
                        Ok(None)
                    };
                }
                Insn::Pop => {
                    pop(&mut stack, class, method)?;
                }
                Insn::Dup => {
                    let top = stack
                        .last()
                        .cloned()
                        .ok_or_else(|| underflow(class, method))?;
                    stack.push(top);
                }
                Insn::Probe(p) => self.dispatch_probe(p, &stack, &args, this_offset),
            }
            pc += 1;
        }

        // Falling off the end behaves like a void return
        Ok(None)
    }

    fn exec_invoke(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        stack: &mut Vec<Value>,
        class: &'p Class,
        method: &'p Method,
    ) -> Result<(), ExecError> {
        self.ensure_initialized(owner)?;

        let desc = Descriptor::parse(descriptor).map_err(|_| ExecError::BadInvoke {
            owner: owner.to_string(),
            name: name.to_string(),
        })?;

        let target = self
            .lookup(owner)
            .and_then(|c| {
                c.methods
                    .iter()
                    .find(|m| m.name == name && m.descriptor == descriptor)
                    .or_else(|| c.method(name))
            })
            .map(|m| (self.lookup(owner).unwrap(), m));

        let mut call_args: Vec<Value> = Vec::with_capacity(desc.params.len() + 1);
        for _ in 0..desc.params.len() {
            call_args.push(pop(stack, class, method)?);
        }
        call_args.reverse();

        // Receiver sits below the arguments; external targets are assumed
        // static unless they are constructors
        let has_receiver = match &target {
            Some((_, m)) => !m.is_static,
            None => name == "<init>",
        };
        if has_receiver {
            let receiver = pop(stack, class, method)?;
            call_args.insert(0, receiver);
        }

        match target {
            Some((target_class, target_method))
                if !target_method.is_abstract && !target_method.body.is_empty() =>
            {
                if let Some(v) = self.call_frame(target_class, target_method, call_args)? {
                    stack.push(v);
                }
            }
            _ => {
                // Out-of-image call: arguments are consumed, the return
                // value is the type's default
                if let Some(v) = Value::default_for(desc.ret) {
                    stack.push(v);
                }
            }
        }
        Ok(())
    }

    /// Dispatch one probe into the session; never fails
    fn dispatch_probe(&mut self, probe: &Probe, stack: &[Value], args: &[Value], this_offset: usize) {
        match probe {
            Probe::Enter(key) => {
                let walker = ShadowStack::new(&self.frames);
                self.session.on_entry(*key, Some(&walker));
            }
            Probe::CaptureArg { index, code } => {
                capture(self.session, *code, args.get(index + this_offset));
            }
            Probe::Block { method, line } => self.session.on_block(*method, *line),
            Probe::SetInvocationLine(line) => self.session.set_invocation_line(*line),
            Probe::BackupInvocationLine => self.session.backup_invocation_line(),
            Probe::SaveClinitInvocationLine => {
                let walker = ShadowStack::new(&self.frames);
                self.session.save_clinit_invocation_line(Some(&walker));
            }
            Probe::RestoreInvocationLine => self.session.restore_invocation_line(),
            Probe::Exit(key) => self.session.on_exit(*key),
            Probe::CaptureReturn { code } => {
                capture(self.session, *code, stack.last());
            }
        }
    }
}

/// Route a value to its typed probe; mismatches are reported, never raised
fn capture(session: &mut TraceSession, code: TypeCode, value: Option<&Value>) {
    let Some(value) = value else {
        tracing::error!("capture probe found no value for {code:?}");
        return;
    };
    match (code, value) {
        (TypeCode::Byte | TypeCode::Short | TypeCode::Int, Value::Int(v)) => {
            session.capture_int(*v)
        }
        (TypeCode::Long, Value::Long(v)) => session.capture_long(*v),
        (TypeCode::Float, Value::Float(v)) => session.capture_float(*v),
        (TypeCode::Double, Value::Double(v)) => session.capture_double(*v),
        (TypeCode::Char, Value::Char(v)) => session.capture_char(*v),
        (TypeCode::Bool, Value::Bool(v)) => session.capture_bool(*v),
        (TypeCode::Ref, v) => session.capture_ref(v),
        (code, other) => {
            tracing::error!("capture probe for {code:?} received {other:?}");
        }
    }
}

fn pop(
    stack: &mut Vec<Value>,
    class: &Class,
    method: &Method,
) -> Result<Value, ExecError> {
    stack.pop().ok_or_else(|| underflow(class, method))
}

fn underflow(class: &Class, method: &Method) -> ExecError {
    ExecError::StackUnderflow {
        class: class.name.clone(),
        method: method.name.clone(),
    }
}

fn type_mismatch(class: &Class, method: &Method, expected: &'static str) -> ExecError {
    ExecError::TypeMismatch {
        class: class.name.clone(),
        method: method.name.clone(),
        expected,
    }
}

fn numeric(v: Value, class: &Class, method: &Method) -> Result<f64, ExecError> {
    match v {
        Value::Int(i) => Ok(f64::from(i)),
        Value::Long(l) => Ok(l as f64),
        Value::Float(f) => Ok(f64::from(f)),
        Value::Double(d) => Ok(d),
        _ => Err(type_mismatch(class, method, "numeric operand")),
    }
}
