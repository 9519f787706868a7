//! Class operations for the VM: method lookup, attribute and subscript
//! access, construction and the iteration protocol.

use crate::error::VmError;
use crate::gc::ObjRef;
use crate::value::{Object, Var, VarType, GETTER_NAME, SETTER_NAME};

use super::fiber::FiberState;
use super::Vm;

/// A range slice resolved against a sequence length.
struct Slice {
    start: usize,
    length: usize,
    reversed: bool,
}

impl Vm {
    /// The class of any value: the builtin class of a primitive, or the
    /// instance's own class.
    pub(crate) fn get_class(&self, value: Var) -> ObjRef {
        if let Var::Object(r) = value {
            if let Object::Instance(inst) = self.heap.get(r) {
                return inst.class;
            }
        }
        self.builtin_classes[self.heap.var_type(value).index()]
    }

    /// Search `class` and its super chain for the method `name`.
    pub(crate) fn class_get_method(&self, class: ObjRef, name: &str) -> Option<ObjRef> {
        let mut current = Some(class);
        while let Some(c) = current {
            let cls = self.heap.class(c);
            let found = cls.methods.iter().copied().find(|method| {
                let function = self.heap.function(self.heap.closure(*method).function);
                debug_assert!(function.is_method);
                function.name == name
            });
            if found.is_some() {
                return found;
            }
            current = cls.super_class;
        }
        None
    }

    pub(crate) fn has_method(&self, self_: Var, name: &str) -> Option<ObjRef> {
        self.class_get_method(self.get_class(self_), name)
    }

    /// The callable for `self_.name(...)`: a method of its class, otherwise
    /// the attribute of that name.
    pub(crate) fn get_method(&mut self, self_: Var, name: ObjRef) -> Result<Var, VmError> {
        let method = self.has_method(self_, self.heap.str(name));
        match method {
            Some(method) => Ok(Var::Object(method)),
            None => self.get_attrib(self_, name),
        }
    }

    /// The method `name` of the parent of `self_`'s class.
    pub(crate) fn get_super_method(&self, self_: Var, name: ObjRef) -> Result<ObjRef, VmError> {
        let Some(parent) = self.heap.class(self.get_class(self_)).super_class else {
            return Err(VmError::new(format!(
                "'{}' object has no parent class.",
                self.heap.type_name(self_)
            )));
        };
        let name = self.heap.str(name);
        self.class_get_method(parent, name).ok_or_else(|| {
            VmError::new(format!(
                "'{}' class has no method named '{}'.",
                self.heap.class(parent).name,
                name
            ))
        })
    }

    /// The `self` a constructor of `class` runs on. Primitive classes build
    /// their value in the constructor and start from null.
    pub(crate) fn pre_construct_self(&mut self, class: ObjRef) -> Result<Var, VmError> {
        let class_of = self.heap.class(class).class_of;
        match class_of {
            VarType::Object | VarType::Module | VarType::Closure | VarType::Class => {
                Err(VmError::new(format!(
                    "Class '{}' cannot be instanciated.",
                    class_of.name()
                )))
            }
            VarType::Instance => Ok(Var::Object(self.new_instance(class))),
            _ => Ok(Var::Null),
        }
    }

    /// Call the unary overload `name` of an instance, if it has one.
    pub(crate) fn call_unary_method(
        &mut self,
        self_: Var,
        name: &str,
    ) -> Result<Option<Var>, VmError> {
        if !self.heap.is_type(self_, VarType::Instance) {
            return Ok(None);
        }
        match self.has_method(self_, name) {
            Some(method) => self.call_closure(self_, method, &[]).map(Some),
            None => Ok(None),
        }
    }

    /// Call the binary overload `name` of an instance, if it has one.
    pub(crate) fn call_binary_method(
        &mut self,
        self_: Var,
        other: Var,
        name: &str,
    ) -> Result<Option<Var>, VmError> {
        if !self.heap.is_type(self_, VarType::Instance) {
            return Ok(None);
        }
        match self.has_method(self_, name) {
            Some(method) => self.call_closure(self_, method, &[other]).map(Some),
            None => Ok(None),
        }
    }

    /// `on.name`.
    pub(crate) fn get_attrib(&mut self, on: Var, name: ObjRef) -> Result<Var, VmError> {
        let attrib = self.heap.str(name).to_string();
        if attrib == "_class" {
            return Ok(Var::Object(self.get_class(on)));
        }
        let Var::Object(r) = on else {
            return Err(self.no_attrib(on, &attrib));
        };

        match self.heap.get(r) {
            Object::String(s) => {
                if attrib == "length" {
                    return Ok(Var::Number(s.len() as f64));
                }
            }

            Object::List(list) => {
                if attrib == "length" {
                    return Ok(Var::Number(list.elements.len() as f64));
                }
            }

            Object::Map(_) => {}

            Object::Range(range) => {
                let range = *range;
                match attrib.as_str() {
                    "as_list" => {
                        let mut elements = Vec::new();
                        let mut i = range.from;
                        while i < range.to {
                            elements.push(Var::Number(i));
                            i += 1.0;
                        }
                        return Ok(Var::Object(self.new_list(elements)));
                    }
                    "first" => return Ok(Var::Number(range.from)),
                    "last" => return Ok(Var::Number(range.to)),
                    _ => {}
                }
            }

            Object::Module(_) => {
                if let Some(value) = self.module_get_global(r, &attrib) {
                    return Ok(value);
                }
            }

            Object::Closure(closure) => {
                let function = self.heap.function(closure.function);
                match attrib.as_str() {
                    "name" => {
                        let name = function.name.clone();
                        return Ok(Var::Object(self.new_string(name)));
                    }
                    "_docs" => {
                        let docs = function.docstring.clone().unwrap_or_default();
                        return Ok(Var::Object(self.new_string(docs)));
                    }
                    "arity" => return Ok(Var::Number(function.arity as f64)),
                    _ => {}
                }
            }

            Object::MethodBind(mb) => {
                let mb = *mb;
                let function = self.heap.function(self.heap.closure(mb.method).function);
                match attrib.as_str() {
                    "_docs" => {
                        let docs = function.docstring.clone().unwrap_or_default();
                        return Ok(Var::Object(self.new_string(docs)));
                    }
                    "name" => {
                        let name = function.name.clone();
                        return Ok(Var::Object(self.new_string(name)));
                    }
                    "instance" => return Ok(mb.instance.unwrap_or(Var::Null)),
                    _ => {}
                }
            }

            Object::Fiber(fiber) => match attrib.as_str() {
                "is_done" => return Ok(Var::Bool(fiber.state == FiberState::Done)),
                "function" => return Ok(Var::Object(fiber.closure)),
                "error" => {
                    let Some(error) = fiber.error.clone() else {
                        return Ok(Var::Null);
                    };
                    return Ok(Var::Object(self.new_string(error)));
                }
                _ => {}
            },

            Object::Class(cls) => {
                match attrib.as_str() {
                    "_docs" => {
                        let docs = cls.docstring.clone().unwrap_or_default();
                        return Ok(Var::Object(self.new_string(docs)));
                    }
                    "name" => {
                        let name = cls.name.clone();
                        return Ok(Var::Object(self.new_string(name)));
                    }
                    "parent" => return Ok(cls.super_class.map_or(Var::Null, Var::Object)),
                    _ => {}
                }

                if let Some(value) = cls.static_attribs.get(&self.heap, Var::Object(name)) {
                    return Ok(value);
                }
                let method = cls.methods.iter().copied().find(|method| {
                    self.heap.function(self.heap.closure(*method).function).name == attrib
                });
                if let Some(method) = method {
                    return Ok(Var::Object(self.new_method_bind(method, None)));
                }
            }

            Object::Instance(inst) => {
                if inst.native.is_some() {
                    if let Some(getter) = self.has_method(on, GETTER_NAME) {
                        return self.call_closure(on, getter, &[Var::Object(name)]);
                    }
                }
                let inst = self.heap.instance(r);
                if let Some(value) = inst.attribs.get(&self.heap, Var::Object(name)) {
                    return Ok(value);
                }
                if let Some(method) = self.has_method(on, &attrib) {
                    return Ok(Var::Object(self.new_method_bind(method, Some(on))));
                }
            }

            Object::Function(_) | Object::Upvalue(_) => {
                panic!("{} is not a first class value", self.heap.type_name(on))
            }
        }

        Err(self.no_attrib(on, &attrib))
    }

    fn no_attrib(&self, on: Var, attrib: &str) -> VmError {
        VmError::new(format!(
            "'{}' object has no attribute named '{}'.",
            self.heap.type_name(on),
            attrib
        ))
    }

    /// `on.name = value`.
    pub(crate) fn set_attrib(&mut self, on: Var, name: ObjRef, value: Var) -> Result<(), VmError> {
        if let Var::Object(r) = on {
            match self.heap.get(r) {
                Object::Module(_) => {
                    let attrib = self.heap.str(name).to_string();
                    self.module_set_global(r, &attrib, value);
                    return Ok(());
                }
                Object::Class(_) => {
                    self.heap.with_statics(r, |statics, heap| {
                        statics.set(heap, Var::Object(name), value)
                    });
                    return Ok(());
                }
                Object::Instance(inst) => {
                    if inst.native.is_some() {
                        if let Some(setter) = self.has_method(on, SETTER_NAME) {
                            self.call_closure(on, setter, &[Var::Object(name), value])?;
                            return Ok(());
                        }
                    }
                    self.heap.with_attribs(r, |attribs, heap| {
                        attribs.set(heap, Var::Object(name), value)
                    });
                    return Ok(());
                }
                Object::Function(_) | Object::Upvalue(_) => {
                    panic!("{} is not a first class value", self.heap.type_name(on))
                }
                _ => {}
            }
        }

        Err(VmError::new(format!(
            "'{}' object has no mutable attribute named '{}'",
            self.heap.type_name(on),
            self.heap.str(name)
        )))
    }

    /// Resolve a range against a sequence of `count` elements.
    fn normalize_slice(&self, range: ObjRef, count: usize) -> Result<Slice, VmError> {
        let range = *self.heap.range(range);
        if range.from.floor() != range.from || range.to.floor() != range.to {
            return Err(VmError::new("Expected a whole number."));
        }

        let count = count as i64;
        let mut from = range.from as i64;
        let mut to = range.to as i64;
        if from < 0 {
            from += count;
        }
        if to < 0 {
            to += count;
        }

        let mut reversed = false;
        if to < from {
            std::mem::swap(&mut from, &mut to);
            reversed = true;
        }

        if from < 0 || to >= count {
            // 0..0, 0..-1, -1..0 and -1..-1 slice an empty sequence.
            if count == 0 && (from == 0 || from == -1) && (to == 0 || to == -1) {
                return Ok(Slice {
                    start: 0,
                    length: 0,
                    reversed: false,
                });
            }
            return Err(VmError::new("Index out of bound."));
        }

        Ok(Slice {
            start: from as usize,
            length: (to - from + 1) as usize,
            reversed,
        })
    }

    /// Normalize a possibly negative index into `0..count`.
    fn normalize_index(index: i64, count: usize) -> Option<usize> {
        let index = if index < 0 { index + count as i64 } else { index };
        if index < 0 || index >= count as i64 {
            None
        } else {
            Some(index as usize)
        }
    }

    /// `on[key]`.
    pub(crate) fn get_subscript(&mut self, on: Var, key: Var) -> Result<Var, VmError> {
        let Var::Object(r) = on else {
            return Err(self.not_subscriptable(on));
        };

        match self.heap.get(r) {
            Object::String(s) => {
                if let Some(index) = key.as_integer() {
                    let Some(index) = Self::normalize_index(index, s.len()) else {
                        return Err(VmError::new("String index out of bound."));
                    };
                    let c = s.char_at(index).map(String::from).unwrap_or_default();
                    return Ok(Var::Object(self.new_string(c)));
                }
                if let Some(range) = self.as_range(key) {
                    let slice = self.normalize_slice(range, s.len())?;
                    if slice.start == 0 && slice.length == s.len() && !slice.reversed {
                        return Ok(on);
                    }
                    let chars = s.as_str().chars().skip(slice.start).take(slice.length);
                    let text: String = if slice.reversed {
                        chars.collect::<Vec<_>>().into_iter().rev().collect()
                    } else {
                        chars.collect()
                    };
                    return Ok(Var::Object(self.new_string(text)));
                }
            }

            Object::List(list) => {
                if let Some(index) = key.as_integer() {
                    let Some(index) = Self::normalize_index(index, list.elements.len()) else {
                        return Err(VmError::new("List index out of bound."));
                    };
                    return Ok(list.elements[index]);
                }
                if let Some(range) = self.as_range(key) {
                    let slice = self.normalize_slice(range, list.elements.len())?;
                    let window = &list.elements[slice.start..slice.start + slice.length];
                    let elements: Vec<Var> = if slice.reversed {
                        window.iter().rev().copied().collect()
                    } else {
                        window.to_vec()
                    };
                    return Ok(Var::Object(self.new_list(elements)));
                }
            }

            Object::Map(map) => {
                if let Some(value) = map.get(&self.heap, key) {
                    return Ok(value);
                }
                if !self.heap.is_hashable(key) {
                    return Err(VmError::new(format!(
                        "Unhashable key '{}'.",
                        self.heap.type_name(key)
                    )));
                }
                let repr = self.to_repr(key)?;
                return Err(VmError::new(format!("Key '{}' not exists", repr)));
            }

            Object::Instance(_) => {
                if let Some(value) = self.call_binary_method(on, key, "[]")? {
                    return Ok(value);
                }
            }

            Object::Function(_) | Object::Upvalue(_) => {
                panic!("{} is not a first class value", self.heap.type_name(on))
            }

            _ => {}
        }

        Err(self.not_subscriptable(on))
    }

    /// `on[key] = value`.
    pub(crate) fn set_subscript(&mut self, on: Var, key: Var, value: Var) -> Result<(), VmError> {
        let Var::Object(r) = on else {
            return Err(self.not_subscriptable(on));
        };

        match self.heap.get(r) {
            Object::List(list) => {
                let Some(index) = key.as_integer() else {
                    return Err(VmError::new("List index must be an Integer."));
                };
                let Some(index) = Self::normalize_index(index, list.elements.len()) else {
                    return Err(VmError::new("List index out of bound."));
                };
                self.heap.list_mut(r).elements[index] = value;
                return Ok(());
            }

            Object::Map(_) => {
                if !self.heap.is_hashable(key) {
                    return Err(VmError::new(format!(
                        "{} type is not hashable.",
                        self.heap.type_name(key)
                    )));
                }
                self.heap.with_map(r, |map, heap| map.set(heap, key, value));
                return Ok(());
            }

            Object::Instance(_) => {
                if let Some(method) = self.has_method(on, "[]=") {
                    self.call_closure(on, method, &[key, value])?;
                    return Ok(());
                }
            }

            Object::Function(_) | Object::Upvalue(_) => {
                panic!("{} is not a first class value", self.heap.type_name(on))
            }

            _ => {}
        }

        Err(self.not_subscriptable(on))
    }

    fn not_subscriptable(&self, on: Var) -> VmError {
        VmError::new(format!(
            "{} type is not subscriptable.",
            self.heap.type_name(on)
        ))
    }

    fn as_range(&self, value: Var) -> Option<ObjRef> {
        match value {
            Var::Object(r) if matches!(self.heap.get(r), Object::Range(_)) => Some(r),
            _ => None,
        }
    }

    /// Reject sequences a `for` loop can't walk.
    pub(crate) fn check_iterable(&self, sequence: Var) -> Result<(), VmError> {
        match sequence {
            Var::Null => Err(VmError::new("Null is not iterable.")),
            Var::Bool(_) => Err(VmError::new("Boolenan is not iterable.")),
            Var::Number(_) => Err(VmError::new("Number is not iterable.")),
            Var::Object(r) => match self.heap.get(r) {
                Object::String(_) | Object::List(_) | Object::Map(_) | Object::Range(_) => Ok(()),
                _ => Err(VmError::new(format!(
                    "{} is not iterable.",
                    self.heap.type_name(sequence)
                ))),
            },
        }
    }

    /// Advance the `(sequence, cursor, value)` triple on top of the stack.
    /// Returns false once the sequence is exhausted.
    pub(crate) fn iterate(&mut self, fiber: ObjRef) -> Result<bool, VmError> {
        let sequence = self.expect_object(self.peek(fiber, 3));
        let Var::Number(cursor) = self.peek(fiber, 2) else {
            panic!("iteration cursor is not a number");
        };
        let it = cursor as usize;

        let (value, next) = match self.heap.get(sequence) {
            Object::String(s) => {
                let Some(c) = s.char_at(it) else {
                    return Ok(false);
                };
                let c = self.new_string(String::from(c));
                (Var::Object(c), cursor + 1.0)
            }

            Object::List(list) => match list.elements.get(it) {
                Some(element) => (*element, cursor + 1.0),
                None => return Ok(false),
            },

            Object::Map(map) => match map.next_occupied(it) {
                Some((slot, key, _)) => (key, (slot + 1) as f64),
                None => return Ok(false),
            },

            Object::Range(range) => {
                let (from, to) = (range.from, range.to);
                // A nan bound never compares past the end.
                if from == to || from.is_nan() || to.is_nan() {
                    return Ok(false);
                }
                let (current, done) = if from <= to {
                    let current = from + cursor;
                    (current, current >= to)
                } else {
                    let current = from - cursor;
                    (current, current <= to)
                };
                if done {
                    return Ok(false);
                }
                (Var::Number(current), cursor + 1.0)
            }

            _ => panic!("iterating a value ITER_TEST rejected"),
        };

        let stack = &mut self.heap.fiber_mut(fiber).stack;
        let len = stack.len();
        stack[len - 1] = value;
        stack[len - 2] = Var::Number(next);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use pretty_assertions::assert_eq;

    fn quiet_vm() -> Vm {
        Vm::new(Configuration {
            stderr_write: None,
            ..Configuration::default()
        })
    }

    fn global_repr(vm: &Vm, module: ObjRef, name: &str) -> String {
        let value = vm.get_global(module, name).unwrap();
        vm.heap.repr(value)
    }

    #[test]
    fn test_slices_count_from_the_end() {
        let mut vm = quiet_vm();
        let source = "\
a = [1, 2, 3, 4][1..-1]
b = 'hello'[-1..0]
c = [][0..-1]
d = 'abc'[-1]
";
        let module = vm.run_source("@slices", source).unwrap();
        assert_eq!(global_repr(&vm, module, "a"), "[2, 3, 4]");
        assert_eq!(global_repr(&vm, module, "b"), "\"olleh\"");
        assert_eq!(global_repr(&vm, module, "c"), "[]");
        assert_eq!(global_repr(&vm, module, "d"), "\"c\"");
    }

    #[test]
    fn test_out_of_bound_index() {
        let mut vm = quiet_vm();
        let err = vm.run_source("@oob", "l = [1]\nx = l[3]\n").unwrap_err();
        assert_eq!(err.as_runtime().unwrap().message, "List index out of bound.");
    }

    #[test]
    fn test_missing_map_key_shows_repr() {
        let mut vm = quiet_vm();
        let err = vm.run_source("@key", "m = {}\nx = m['k']\n").unwrap_err();
        assert_eq!(err.as_runtime().unwrap().message, "Key '\"k\"' not exists");
    }

    #[test]
    fn test_missing_attribute_names_the_type() {
        let mut vm = quiet_vm();
        let err = vm.run_source("@attr", "x = 1.foo\n").unwrap_err();
        assert_eq!(
            err.as_runtime().unwrap().message,
            "'Number' object has no attribute named 'foo'."
        );
    }

    #[test]
    fn test_builtin_attributes() {
        let mut vm = quiet_vm();
        let source = "\
r = 2..5
first = r.first
items = r.as_list
n = 'héllo'.length
def f(a, b) \"adds\" return a + b end
arity = f.arity
docs = f._docs
";
        let module = vm.run_source("@attrs", source).unwrap();
        assert_eq!(global_repr(&vm, module, "first"), "2");
        assert_eq!(global_repr(&vm, module, "items"), "[2, 3, 4]");
        assert_eq!(global_repr(&vm, module, "n"), "5");
        assert_eq!(global_repr(&vm, module, "arity"), "2");
        assert_eq!(global_repr(&vm, module, "docs"), "\"adds\"");
    }

    #[test]
    fn test_super_method_resolves_parent() {
        let mut vm = quiet_vm();
        let source = "\
class A
  def name() return 'A' end
end
class B is A
  def name() return 'B' + super() end
end
x = B().name()
";
        let module = vm.run_source("@super", source).unwrap();
        assert_eq!(global_repr(&vm, module, "x"), "\"BA\"");
    }

    #[test]
    fn test_primitive_classes_cannot_all_be_constructed() {
        let mut vm = quiet_vm();
        let err = vm.run_source("@obj", "o = Object()\n").unwrap_err();
        assert_eq!(
            err.as_runtime().unwrap().message,
            "Class 'Object' cannot be instanciated."
        );
    }

    #[test]
    fn test_iterating_a_number_fails() {
        let mut vm = quiet_vm();
        let err = vm.run_source("@iter", "for i in 3 do end\n").unwrap_err();
        assert_eq!(err.as_runtime().unwrap().message, "Number is not iterable.");
    }
}
