//! Heap object types.

use std::any::Any;
use std::fmt;
use std::mem::size_of;
use std::rc::Rc;

use crate::error::VmError;
use crate::gc::ObjRef;
use crate::vm::chunk::FnCode;
use crate::vm::fiber::CallFrame;
use crate::vm::Vm;

use super::buffer::{ClosureBuffer, UintBuffer, VarBuffer};
use super::map::{MapEntry, VarMap};
use super::{hash_string, Var, VarType};

/// Name of the function holding a module's top-level code.
pub const IMPLICIT_MAIN_NAME: &str = "@main";

/// Name of the constructor method.
pub const CTOR_NAME: &str = "_init";

/// Native attribute hooks of classes with a native payload.
pub const GETTER_NAME: &str = "@getter";
pub const SETTER_NAME: &str = "@setter";

/// A native function: the VM, the receiver (`Null` for plain calls) and the
/// arguments.
pub type NativeFn = fn(&mut Vm, Var, &[Var]) -> Result<Var, VmError>;

/// Host data attached to an instance of a native class.
pub type NativePayload = Box<dyn Any>;

/// Allocates the native payload of a new instance.
pub type NewInstanceFn = fn() -> NativePayload;

/// Releases the native payload of a collected instance.
pub type DeleteInstanceFn = fn(NativePayload);

/// Every heap-allocated value.
pub enum Object {
    String(PkString),
    List(List),
    Map(VarMap),
    Range(Range),
    Module(Module),
    Function(Function),
    Closure(Closure),
    MethodBind(MethodBind),
    Upvalue(Upvalue),
    Fiber(Box<crate::vm::fiber::Fiber>),
    Class(Class),
    Instance(Instance),
}

impl Object {
    /// The script-visible type. Functions and upvalues are never exposed; they
    /// report the type of what wraps them.
    pub fn var_type(&self) -> VarType {
        match self {
            Object::String(_) => VarType::String,
            Object::List(_) => VarType::List,
            Object::Map(_) => VarType::Map,
            Object::Range(_) => VarType::Range,
            Object::Module(_) => VarType::Module,
            Object::Function(_) | Object::Closure(_) => VarType::Closure,
            Object::MethodBind(_) => VarType::MethodBind,
            Object::Upvalue(_) => VarType::Object,
            Object::Fiber(_) => VarType::Fiber,
            Object::Class(_) => VarType::Class,
            Object::Instance(_) => VarType::Instance,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Function(_) => "Func",
            Object::Upvalue(_) => "Upvalue",
            other => other.var_type().name(),
        }
    }

    /// Bytes owned by this object, as accounted by the heap.
    pub fn size(&self) -> usize {
        let owned = match self {
            Object::String(s) => s.value.capacity(),
            Object::List(l) => l.elements.capacity() * size_of::<Var>(),
            Object::Map(m) => m.capacity() * size_of::<MapEntry>(),
            Object::Range(_) => 0,
            Object::Module(m) => {
                m.name.capacity()
                    + m.path.as_ref().map_or(0, String::capacity)
                    + m.constants.capacity() * size_of::<Var>()
                    + m.globals.capacity() * size_of::<Var>()
                    + m.global_names.capacity() * size_of::<u32>()
            }
            Object::Function(f) => {
                let code = match &f.kind {
                    FnKind::Script(code) => code.size(),
                    FnKind::Native(_) => 0,
                };
                f.name.capacity() + f.docstring.as_ref().map_or(0, String::capacity) + code
            }
            Object::Closure(c) => c.upvalues.capacity() * size_of::<ObjRef>(),
            Object::MethodBind(_) => 0,
            Object::Upvalue(_) => 0,
            Object::Fiber(f) => {
                size_of::<crate::vm::fiber::Fiber>()
                    + f.stack.capacity() * size_of::<Var>()
                    + f.frames.capacity() * size_of::<CallFrame>()
                    + f.open_upvalues.capacity() * size_of::<(usize, ObjRef)>()
            }
            Object::Class(c) => {
                c.name.capacity()
                    + c.docstring.as_ref().map_or(0, String::capacity)
                    + c.methods.capacity() * size_of::<ObjRef>()
                    + c.static_attribs.capacity() * size_of::<MapEntry>()
            }
            Object::Instance(i) => i.attribs.capacity() * size_of::<MapEntry>(),
        };
        size_of::<Object>() + owned
    }

    /// Push every handle this object references.
    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        fn var(out: &mut Vec<ObjRef>, v: &Var) {
            if let Var::Object(r) = v {
                out.push(*r);
            }
        }

        match self {
            Object::String(_) | Object::Range(_) => {}
            Object::List(l) => l.elements.iter().for_each(|v| var(out, v)),
            Object::Map(m) => {
                for (key, value) in m.iter() {
                    var(out, &key);
                    var(out, &value);
                }
            }
            Object::Module(m) => {
                m.constants.iter().for_each(|v| var(out, v));
                m.globals.iter().for_each(|v| var(out, v));
                out.extend(m.body);
            }
            Object::Function(f) => out.extend(f.owner),
            Object::Closure(c) => {
                out.push(c.function);
                out.extend(c.upvalues.iter().copied());
            }
            Object::MethodBind(mb) => {
                out.push(mb.method);
                if let Some(instance) = &mb.instance {
                    var(out, instance);
                }
            }
            Object::Upvalue(Upvalue::Open { fiber, .. }) => out.push(*fiber),
            Object::Upvalue(Upvalue::Closed(v)) => var(out, v),
            Object::Fiber(f) => f.trace(out),
            Object::Class(c) => {
                out.extend(c.owner);
                out.extend(c.super_class);
                out.extend(c.methods.iter().copied());
                out.extend(c.ctor);
                for (key, value) in c.static_attribs.iter() {
                    var(out, &key);
                    var(out, &value);
                }
            }
            Object::Instance(i) => {
                out.push(i.class);
                for (key, value) in i.attribs.iter() {
                    var(out, &key);
                    var(out, &value);
                }
            }
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::String(s) => write!(f, "String({:?})", s.as_str()),
            Object::Function(func) => write!(f, "Func({})", func.name),
            Object::Class(cls) => write!(f, "Class({})", cls.name),
            Object::Module(m) => write!(f, "Module({})", m.name),
            other => write!(f, "{}", other.type_name()),
        }
    }
}

/// Immutable text with a cached hash. Length and indexing count chars.
#[derive(Debug, Clone)]
pub struct PkString {
    value: String,
    hash: u32,
    length: usize,
}

impl PkString {
    pub fn new(value: String) -> Self {
        let hash = hash_string(&value);
        let length = value.chars().count();
        Self {
            value,
            hash,
            length,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Number of chars.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn char_at(&self, index: usize) -> Option<char> {
        if self.length == self.value.len() {
            self.value.as_bytes().get(index).map(|b| *b as char)
        } else {
            self.value.chars().nth(index)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct List {
    pub elements: VarBuffer,
}

impl List {
    pub fn new(elements: VarBuffer) -> Self {
        Self { elements }
    }
}

/// A half-open numeric interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub from: f64,
    pub to: f64,
}

/// A compilation unit: constants, globals and the top-level body.
#[derive(Debug, Default)]
pub struct Module {
    pub name: String,
    /// Resolved path for script modules; `None` for string and core modules.
    pub path: Option<String>,
    pub constants: VarBuffer,
    pub globals: VarBuffer,
    /// Indices into `constants` naming each global.
    pub global_names: UintBuffer,
    /// The closure of the implicit main function.
    pub body: Option<ObjRef>,
    pub initialized: bool,
}

pub enum FnKind {
    Native(NativeFn),
    Script(Rc<FnCode>),
}

impl fmt::Debug for FnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FnKind::Native(_) => write!(f, "Native"),
            FnKind::Script(code) => write!(f, "Script({} bytes)", code.opcodes.len()),
        }
    }
}

/// Arity of a variadic function.
pub const ARITY_VARIADIC: i32 = -1;

/// Arity of a function whose parameter list hasn't been compiled yet.
pub const ARITY_UNRESOLVED: i32 = -2;

#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub owner: Option<ObjRef>,
    pub docstring: Option<String>,
    pub arity: i32,
    pub upvalue_count: usize,
    pub is_method: bool,
    pub kind: FnKind,
}

impl Function {
    pub fn is_native(&self) -> bool {
        matches!(self.kind, FnKind::Native(_))
    }

    pub fn code(&self) -> Option<&Rc<FnCode>> {
        match &self.kind {
            FnKind::Script(code) => Some(code),
            FnKind::Native(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// A captured variable: aliasing a live fiber stack slot, or holding its own
/// copy once that slot is gone.
#[derive(Debug, Clone, Copy)]
pub enum Upvalue {
    Open { fiber: ObjRef, slot: usize },
    Closed(Var),
}

#[derive(Debug, Clone, Copy)]
pub struct MethodBind {
    pub method: ObjRef,
    /// `None` for an unbound method.
    pub instance: Option<Var>,
}

pub struct Class {
    pub name: String,
    pub owner: Option<ObjRef>,
    pub super_class: Option<ObjRef>,
    pub docstring: Option<String>,
    /// The primitive type this class describes; `Instance` for script classes.
    pub class_of: VarType,
    pub methods: ClosureBuffer,
    pub static_attribs: VarMap,
    pub ctor: Option<ObjRef>,
    pub new_fn: Option<NewInstanceFn>,
    pub delete_fn: Option<DeleteInstanceFn>,
}

impl Class {
    pub fn new(name: impl Into<String>, owner: Option<ObjRef>, class_of: VarType) -> Self {
        Self {
            name: name.into(),
            owner,
            super_class: None,
            docstring: None,
            class_of,
            methods: ClosureBuffer::new(),
            static_attribs: VarMap::new(),
            ctor: None,
            new_fn: None,
            delete_fn: None,
        }
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("class_of", &self.class_of)
            .field("methods", &self.methods.len())
            .finish()
    }
}

pub struct Instance {
    pub class: ObjRef,
    pub attribs: VarMap,
    pub native: Option<NativePayload>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class)
            .field("attribs", &self.attribs.len())
            .field("native", &self.native.is_some())
            .finish()
    }
}

pub use crate::vm::fiber::FiberState;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strings_count_chars() {
        let s = PkString::new("héllo".to_string());
        assert_eq!(s.len(), 5);
        assert_eq!(s.char_at(1), Some('é'));
        assert_eq!(s.char_at(5), None);
        assert_eq!(s.hash(), hash_string("héllo"));
    }

    #[test]
    fn test_list_size_tracks_capacity() {
        let mut list = List::default();
        let empty = Object::List(list.clone()).size();
        list.elements.write(Var::Null);
        let grown = Object::List(list).size();
        assert!(grown > empty);
    }

    #[test]
    fn test_trace_reports_children() {
        let a = ObjRef::new(1, 0);
        let b = ObjRef::new(2, 0);
        let list = Object::List(List::new(vec![Var::Object(a), Var::Null, Var::Object(b)].into()));
        let mut out = Vec::new();
        list.trace(&mut out);
        assert_eq!(out, vec![a, b]);
    }
}
