//! Program image model
//!
//! A program image is the compiled representation the rewriter operates on:
//! classes with slash-qualified names, a source-file attribute, and methods
//! whose bodies are flat instruction lists. Images load from JSON via serde.
//!
//! The runtime half of this module ([`Value`], [`Obj`], [`ArrayObj`]) is what
//! the execution host pushes around on its operand stack and what the
//! recorder and graph walker capture.

use crate::types::TypeCode;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

/// Index of an instruction within a method body
pub type InsnIndex = usize;

/// Key into the trace session's rewrite-time method registry
pub type MethodKey = usize;

/// A loadable program image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub classes: Vec<Class>,
}

impl Program {
    pub fn class(&self, name: &str) -> Option<&Class> {
        self.classes.iter().find(|c| c.name == name)
    }
}

/// One compiled class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
    /// Slash-qualified name, e.g. `demo/Fib`
    pub name: String,
    /// Source-file attribute, e.g. `Fib.java`; absent for generated classes
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<Method>,
}

impl Class {
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// An instance-field declaration; static and synthetic fields are carried so
/// the graph walker can exclude them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_synthetic: bool,
}

/// One compiled method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Method {
    /// Plain name; `<init>` and `<clinit>` have their usual special meaning
    pub name: String,
    /// `(IJLjava/lang/String;)V`-form descriptor
    pub descriptor: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub is_synthetic: bool,
    #[serde(default)]
    pub body: Vec<Insn>,
}

impl Method {
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn is_class_initializer(&self) -> bool {
        self.name == "<clinit>"
    }
}

/// A constant embedded in a method body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Const {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Bool(bool),
    Str(String),
    Null,
    /// An array literal; `elem_type` is the element runtime type in dotted
    /// form (`int`, `java.lang.String`, ...)
    Array {
        elem_type: String,
        primitive: bool,
        elems: Vec<Const>,
    },
}

/// One instruction of a method body
///
/// The vocabulary is the minimum the rewriter needs to reason about control
/// flow (line markers, jumps, switches, comparison and return families,
/// invokes) plus the handful of data moves the execution host needs to run a
/// body for real.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Insn {
    /// Line-number marker; line 0 is synthetic (no real source line)
    Line(u32),
    /// Push a constant
    Push(Const),
    /// Push declared parameter `n` (the implicit receiver is not counted)
    LoadArg(usize),
    /// Push the receiver of an instance method
    LoadThis,
    /// Allocate an instance of the named class and push the reference
    New(String),
    /// Pop a reference, push the named field's value
    GetField(String),
    /// Pop a value, pop a reference, store the value into the named field
    PutField(String),
    /// Transfer control to `target`; a conditional jump pops an int and
    /// branches when it is non-zero
    Jump {
        target: InsnIndex,
        conditional: bool,
    },
    /// Multi-way branch: pops an int used as an index into `targets`, with
    /// the explicit default taken for anything out of range
    Switch {
        targets: Vec<InsnIndex>,
        default_target: InsnIndex,
    },
    /// Long/float/double comparison: pops two numbers, pushes -1/0/1
    Cmp,
    /// Invoke `owner.name` with the given descriptor; arguments are popped
    /// right-to-left, the receiver (if any) below them
    Invoke {
        owner: String,
        name: String,
        descriptor: String,
    },
    /// Return from the method, popping the return value when non-void
    Return,
    Pop,
    Dup,
    /// An instrumentation probe inserted by the rewriter
    Probe(Probe),
}

/// Probes report one runtime event each to the trace recorder
///
/// These never appear in an image as authored; the rewriter inserts them and
/// the execution host dispatches them into the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Probe {
    /// Method entry marker; assigns the method id on first firing
    Enter(MethodKey),
    /// Capture declared parameter `index` with the typed probe for `code`
    CaptureArg { index: usize, code: TypeCode },
    /// Basic-block marker for `line`
    Block { method: MethodKey, line: u32 },
    /// Remember the current invocation line for the next entry that fires
    SetInvocationLine(u32),
    /// Preserve the pending invocation line across a class initializer
    BackupInvocationLine,
    /// Derive the class initializer's own invocation line from the stack
    SaveClinitInvocationLine,
    /// Restore the invocation line preserved by the backup probe
    RestoreInvocationLine,
    /// Method exit marker
    Exit(MethodKey),
    /// Capture the value about to be returned; reads the top of stack
    /// without consuming it (the two-slot duplicate of the wide forms
    /// collapses to a peek here)
    CaptureReturn { code: TypeCode },
}

/// A runtime value on the execution host's operand stack
#[derive(Debug, Clone)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Bool(bool),
    Str(String),
    Ref(ObjRef),
    Array(ArrayRef),
    Null,
}

pub type ObjRef = Rc<RefCell<Obj>>;
pub type ArrayRef = Rc<ArrayObj>;

/// A heap object: runtime type plus named fields in declaration order
#[derive(Debug)]
pub struct Obj {
    /// Slash-qualified runtime type name
    pub class_name: String,
    pub fields: Vec<ObjField>,
}

#[derive(Debug)]
pub struct ObjField {
    pub name: String,
    pub synthetic: bool,
    pub value: Value,
}

impl Obj {
    /// Allocate an instance with every declared instance field set to null
    pub fn new(class_name: &str, decls: &[FieldDecl]) -> ObjRef {
        let fields = decls
            .iter()
            .filter(|d| !d.is_static)
            .map(|d| ObjField {
                name: d.name.clone(),
                synthetic: d.is_synthetic,
                value: Value::Null,
            })
            .collect();
        Rc::new(RefCell::new(Obj {
            class_name: class_name.to_string(),
            fields,
        }))
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.clone())
    }

    pub fn put(&mut self, name: &str, value: Value) {
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(f) => f.value = value,
            None => self.fields.push(ObjField {
                name: name.to_string(),
                synthetic: false,
                value,
            }),
        }
    }
}

/// An immutable array value
#[derive(Debug)]
pub struct ArrayObj {
    /// Element runtime type in dotted form
    pub elem_type: String,
    pub primitive: bool,
    pub elems: Vec<Value>,
}

impl Value {
    pub fn from_const(c: &Const) -> Value {
        match c {
            Const::Int(v) => Value::Int(*v),
            Const::Long(v) => Value::Long(*v),
            Const::Float(v) => Value::Float(*v),
            Const::Double(v) => Value::Double(*v),
            Const::Char(v) => Value::Char(*v),
            Const::Bool(v) => Value::Bool(*v),
            Const::Str(v) => Value::Str(v.clone()),
            Const::Null => Value::Null,
            Const::Array {
                elem_type,
                primitive,
                elems,
            } => Value::Array(Rc::new(ArrayObj {
                elem_type: elem_type.clone(),
                primitive: *primitive,
                elems: elems.iter().map(Value::from_const).collect(),
            })),
        }
    }

    /// The zero/null value handed back for calls that leave the image
    pub fn default_for(code: TypeCode) -> Option<Value> {
        match code {
            TypeCode::Byte | TypeCode::Short | TypeCode::Int => Some(Value::Int(0)),
            TypeCode::Long => Some(Value::Long(0)),
            TypeCode::Float => Some(Value::Float(0.0)),
            TypeCode::Double => Some(Value::Double(0.0)),
            TypeCode::Char => Some(Value::Char('\0')),
            TypeCode::Bool => Some(Value::Bool(false)),
            TypeCode::Ref => Some(Value::Null),
            TypeCode::Void => None,
        }
    }
}
