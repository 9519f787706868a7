//! The value model: tagged scalars, heap objects and their shared semantics.

pub mod buffer;
pub mod format;
pub mod map;
pub mod object;

use std::collections::HashSet;
use std::fmt;

use crate::gc::{Heap, ObjRef};

pub use buffer::{Buffer, ByteBuffer, ClosureBuffer, StringBuffer, UintBuffer, VarBuffer};
pub use map::VarMap;
pub use object::{
    Class, Closure, DeleteInstanceFn, FiberState, FnKind, Function, Instance, List, MethodBind,
    Module, NativeFn, NativePayload, NewInstanceFn, Object, PkString, Range, Upvalue,
    ARITY_UNRESOLVED, ARITY_VARIADIC, CTOR_NAME, GETTER_NAME, IMPLICIT_MAIN_NAME, SETTER_NAME,
};

/// A tagged value. Objects are handles into the VM heap.
#[derive(Debug, Clone, Copy)]
pub enum Var {
    Null,
    Bool(bool),
    Number(f64),
    Object(ObjRef),
}

impl Var {
    pub fn is_null(&self) -> bool {
        matches!(self, Var::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Var::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Var::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjRef> {
        match self {
            Var::Object(r) => Some(*r),
            _ => None,
        }
    }

    /// Bool or number as a float.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Var::Number(n) => Some(*n),
            Var::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// A numeric value with no fractional part.
    pub fn as_integer(&self) -> Option<i64> {
        let n = self.as_numeric()?;
        if n.floor() == n && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
            Some(n as i64)
        } else {
            None
        }
    }

    /// Identity: identical bits for scalars, the same handle for objects.
    pub fn same(&self, other: &Var) -> bool {
        match (self, other) {
            (Var::Null, Var::Null) => true,
            (Var::Bool(a), Var::Bool(b)) => a == b,
            (Var::Number(a), Var::Number(b)) => a.to_bits() == b.to_bits(),
            (Var::Object(a), Var::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Var) -> bool {
        self.same(other)
    }
}

impl From<bool> for Var {
    fn from(b: bool) -> Self {
        Var::Bool(b)
    }
}

impl From<f64> for Var {
    fn from(n: f64) -> Self {
        Var::Number(n)
    }
}

impl From<ObjRef> for Var {
    fn from(r: ObjRef) -> Self {
        Var::Object(r)
    }
}

/// Every kind of value visible to scripts. The first thirteen index the
/// builtin class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    Object,
    Null,
    Bool,
    Number,
    String,
    List,
    Map,
    Range,
    Module,
    Closure,
    MethodBind,
    Fiber,
    Class,
    Instance,
}

impl VarType {
    /// Types with a builtin class, in class-table order.
    pub const BUILTINS: [VarType; 13] = [
        VarType::Object,
        VarType::Null,
        VarType::Bool,
        VarType::Number,
        VarType::String,
        VarType::List,
        VarType::Map,
        VarType::Range,
        VarType::Module,
        VarType::Closure,
        VarType::MethodBind,
        VarType::Fiber,
        VarType::Class,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            VarType::Object => "Object",
            VarType::Null => "Null",
            VarType::Bool => "Bool",
            VarType::Number => "Number",
            VarType::String => "String",
            VarType::List => "List",
            VarType::Map => "Map",
            VarType::Range => "Range",
            VarType::Module => "Module",
            VarType::Closure => "Closure",
            VarType::MethodBind => "MethodBind",
            VarType::Fiber => "Fiber",
            VarType::Class => "Class",
            VarType::Instance => "Inst",
        }
    }

    /// Index into the builtin class table.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Heap {
    pub fn var_type(&self, v: Var) -> VarType {
        match v {
            Var::Null => VarType::Null,
            Var::Bool(_) => VarType::Bool,
            Var::Number(_) => VarType::Number,
            Var::Object(r) => self.get(r).var_type(),
        }
    }

    /// Type name as shown in error messages: instances report their class.
    pub fn type_name(&self, v: Var) -> String {
        match v {
            Var::Object(r) => match self.get(r) {
                Object::Instance(inst) => self.class(inst.class).name.clone(),
                obj => obj.type_name().to_string(),
            },
            other => self.var_type(other).name().to_string(),
        }
    }

    pub fn is_type(&self, v: Var, ty: VarType) -> bool {
        match v {
            Var::Object(r) => self.get(r).var_type() == ty,
            other => self.var_type(other) == ty,
        }
    }

    pub fn to_bool(&self, v: Var) -> bool {
        match v {
            Var::Null => false,
            Var::Bool(b) => b,
            Var::Number(n) => n != 0.0,
            Var::Object(r) => match self.get(r) {
                Object::String(s) => !s.is_empty(),
                Object::List(l) => !l.elements.is_empty(),
                Object::Map(m) => !m.is_empty(),
                _ => true,
            },
        }
    }

    /// The hash of a hashable value, `None` for lists, maps and the like.
    pub fn hash_of(&self, v: Var) -> Option<u32> {
        match v {
            Var::Null => Some(hash_bits(1)),
            Var::Bool(b) => Some(hash_bits(2 | b as u64)),
            Var::Number(n) => Some(hash_bits(n.to_bits())),
            Var::Object(r) => match self.get(r) {
                Object::String(s) => Some(s.hash()),
                Object::Range(range) => {
                    Some(hash_bits(range.from.to_bits()) ^ hash_bits(range.to.to_bits()))
                }
                Object::Class(_) => Some(hash_bits(r.bits())),
                _ => None,
            },
        }
    }

    pub fn is_hashable(&self, v: Var) -> bool {
        self.hash_of(v).is_some()
    }

    /// Value equality. `+0 == -0`; strings, ranges, lists and maps compare
    /// by content.
    ///
    /// Containers are walked with a worklist, so nesting depth is bounded
    /// by memory. A pair of containers met again is assumed equal, which
    /// makes cyclic structures of the same shape compare equal.
    pub fn equals(&self, a: Var, b: Var) -> bool {
        let mut pending = vec![(a, b)];
        let mut seen: HashSet<(ObjRef, ObjRef), ahash::RandomState> = HashSet::default();

        while let Some((a, b)) = pending.pop() {
            if a.same(&b) {
                continue;
            }
            if let (Var::Number(x), Var::Number(y)) = (a, b) {
                if x != y {
                    return false;
                }
                continue;
            }
            let (Var::Object(ra), Var::Object(rb)) = (a, b) else {
                return false;
            };

            match (self.get(ra), self.get(rb)) {
                (Object::Range(x), Object::Range(y)) => {
                    if x.from != y.from || x.to != y.to {
                        return false;
                    }
                }
                (Object::String(x), Object::String(y)) => {
                    if x.hash() != y.hash() || x.as_str() != y.as_str() {
                        return false;
                    }
                }
                (Object::List(x), Object::List(y)) => {
                    if x.elements.len() != y.elements.len() {
                        return false;
                    }
                    if seen.insert((ra, rb)) {
                        pending.extend(x.elements.iter().copied().zip(y.elements.iter().copied()));
                    }
                }
                (Object::Map(x), Object::Map(y)) => {
                    if x.len() != y.len() {
                        return false;
                    }
                    if !seen.insert((ra, rb)) {
                        continue;
                    }
                    for (key, value) in x.iter() {
                        match y.get(self, key) {
                            Some(other) => pending.push((value, other)),
                            None => return false,
                        }
                    }
                }
                _ => return false,
            }
        }
        true
    }
}

/// FNV-1a over the bytes of `text`.
pub fn hash_string(text: &str) -> u32 {
    const FNV_PRIME: u32 = 16777619;
    const FNV_OFFSET_BASIS: u32 = 2166136261;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in text.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Thomas Wang's 64-bit integer hash, folded to 30 bits.
pub fn hash_bits(mut hash: u64) -> u32 {
    hash = (!hash).wrapping_add(hash << 18);
    hash ^= hash >> 31;
    hash = hash.wrapping_mul(21);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 6);
    hash ^= hash >> 22;
    (hash & 0x3fff_ffff) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_distinguishes_signed_zero() {
        assert!(!Var::Number(0.0).same(&Var::Number(-0.0)));
        assert!(Var::Number(f64::NAN).same(&Var::Number(f64::NAN)));
        assert!(Var::Null.same(&Var::Null));
        assert!(!Var::Null.same(&Var::Bool(false)));
    }

    #[test]
    fn test_equals_treats_signed_zero_as_equal() {
        let heap = Heap::new(1024, 1024, 75);
        assert!(heap.equals(Var::Number(0.0), Var::Number(-0.0)));
        assert!(!heap.equals(Var::Number(f64::NAN), Var::Number(1.0)));
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Var::Bool(true).as_numeric(), Some(1.0));
        assert_eq!(Var::Number(3.0).as_integer(), Some(3));
        assert_eq!(Var::Number(3.5).as_integer(), None);
        assert_eq!(Var::Null.as_numeric(), None);
    }

    #[test]
    fn test_fnv_matches_reference_values() {
        assert_eq!(hash_string(""), 2166136261);
        assert_eq!(hash_string("a"), 0xe40c292c);
    }

    #[test]
    fn test_builtin_order_matches_type_index() {
        for (i, ty) in VarType::BUILTINS.iter().enumerate() {
            assert_eq!(ty.index(), i);
        }
        assert_eq!(VarType::Instance.index(), 13);
    }
}
