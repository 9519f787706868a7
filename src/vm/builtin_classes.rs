//! Builtin classes: one per primitive type, with their constructors and
//! native methods.

use crate::error::VmError;
use crate::gc::ObjRef;
use crate::value::{Class, NativeFn, Object, Var, VarType, ARITY_VARIADIC};

use super::builtins::{check_argc, validate_integer, validate_numeric};
use super::fiber::FiberState;
use super::vm_ops::too_deep_to_format;
use super::Vm;

type MethodDef = (&'static str, NativeFn, i32, &'static str);

const CONSTRUCTORS: [(VarType, NativeFn, i32); 8] = [
    (VarType::Null, ctor_null, 0),
    (VarType::Bool, ctor_bool, 1),
    (VarType::Number, ctor_number, 1),
    (VarType::String, ctor_string, ARITY_VARIADIC),
    (VarType::List, ctor_list, ARITY_VARIADIC),
    (VarType::Map, ctor_map, 0),
    (VarType::Range, ctor_range, 2),
    (VarType::Fiber, ctor_fiber, 1),
];

const OBJECT_METHODS: &[MethodDef] = &[
    ("typename", obj_typename, 0, "Object.typename() -> String\n\nThe type name of the object."),
    ("_repr", obj_repr, 0, "Object._repr() -> String\n\nThe repr string of the object."),
];

const NUMBER_METHODS: &[MethodDef] = &[
    (
        "times",
        number_times,
        1,
        "Number.times(f:Closure)\n\nCall f with 0, 1, ... for the floor of the number \
         times.",
    ),
    ("isint", number_isint, 0, "Number.isint() -> Bool\n\nTrue for whole numbers."),
    (
        "isbyte",
        number_isbyte,
        0,
        "Number.isbyte() -> Bool\n\nTrue for whole numbers from 0x00 to 0xff.",
    ),
];

const STRING_METHODS: &[MethodDef] = &[
    (
        "strip",
        string_strip,
        0,
        "String.strip() -> String\n\nA copy without leading and trailing whitespace.",
    ),
    ("lower", string_lower, 0, "String.lower() -> String\n\nA lower case copy."),
    ("upper", string_upper, 0, "String.upper() -> String\n\nAn upper case copy."),
    (
        "find",
        string_find,
        ARITY_VARIADIC,
        "String.find(sub:String[, start:Number=0]) -> Number\n\nThe first index of sub \
         from start, or -1.",
    ),
    (
        "replace",
        string_replace,
        ARITY_VARIADIC,
        "String.replace(old:String, new:String[, count:Number=-1]) -> String\n\nA copy \
         with count occurrences of old replaced, all of them for -1.",
    ),
    (
        "split",
        string_split,
        1,
        "String.split(sep:String) -> List\n\nThe parts of the string between sep.",
    ),
    (
        "startswith",
        string_startswith,
        1,
        "String.startswith(prefix:String|List) -> Bool\n\nTrue if the string starts \
         with the prefix or one of the prefixes.",
    ),
    (
        "endswith",
        string_endswith,
        1,
        "String.endswith(suffix:String|List) -> Bool\n\nTrue if the string ends with \
         the suffix or one of the suffixes.",
    ),
];

const LIST_METHODS: &[MethodDef] = &[
    ("clear", list_clear, 0, "List.clear() -> Null\n\nRemove every element."),
    (
        "find",
        list_find,
        1,
        "List.find(value:Var) -> Number\n\nThe index of the first equal element, or -1.",
    ),
    (
        "append",
        list_append,
        1,
        "List.append(value:Var) -> List\n\nAppend the value and return the list.",
    ),
    (
        "pop",
        list_pop,
        ARITY_VARIADIC,
        "List.pop(index:Number=-1) -> Var\n\nRemove and return the element at index.",
    ),
    (
        "insert",
        list_insert,
        2,
        "List.insert(index:Number, value:Var) -> Null\n\nInsert the value at \
         0 <= index <= length.",
    ),
];

const MAP_METHODS: &[MethodDef] = &[
    ("clear", map_clear, 0, "Map.clear() -> Null\n\nRemove every entry."),
    (
        "get",
        map_get,
        ARITY_VARIADIC,
        "Map.get(key:Var, default=Null) -> Var\n\nThe value of key, or the default.",
    ),
    ("has", map_has, 1, "Map.has(key:Var) -> Bool\n\nTrue if the key exists."),
    ("pop", map_pop, 1, "Map.pop(key:Var) -> Var\n\nRemove the key and return its value."),
];

const METHOD_BIND_METHODS: &[MethodDef] = &[(
    "bind",
    method_bind_bind,
    1,
    "MethodBind.bind(instance:Var) -> MethodBind\n\nBind the method to an instance \
     whose class has it.",
)];

const CLASS_METHODS: &[MethodDef] = &[(
    "methods",
    class_methods,
    0,
    "Class.methods() -> List\n\nUnbound method binds of the class.",
)];

const MODULE_METHODS: &[MethodDef] = &[(
    "globals",
    module_globals,
    0,
    "Module.globals() -> List\n\nThe values of the module's globals.",
)];

const FIBER_METHODS: &[MethodDef] = &[
    (
        "run",
        fiber_run,
        ARITY_VARIADIC,
        "Fiber.run(...) -> Var\n\nStart the fiber with the arguments. Returns its \
         return value or the value it yields.",
    ),
    (
        "resume",
        fiber_resume,
        ARITY_VARIADIC,
        "Fiber.resume([value:Var]) -> Var\n\nContinue a yielded fiber; the value becomes \
         the result of its yield().",
    ),
];

impl Vm {
    pub(crate) fn initialize_builtin_classes(&mut self) {
        for ty in VarType::BUILTINS {
            let mut class = Class::new(ty.name(), None, ty);
            if ty != VarType::Object {
                class.super_class = Some(self.builtin_classes[VarType::Object.index()]);
            }
            let class = self.allocate(Object::Class(class));
            self.builtin_classes.push(class);
        }

        for (ty, native, arity) in CONSTRUCTORS {
            let name = format!("@ctor{}", ty.name());
            let ctor = self.new_native_closure(&name, None, native, arity, None);
            self.heap.class_mut(self.builtin_classes[ty.index()]).ctor = Some(ctor);
        }

        let methods: [(VarType, &[MethodDef]); 9] = [
            (VarType::Object, OBJECT_METHODS),
            (VarType::Number, NUMBER_METHODS),
            (VarType::String, STRING_METHODS),
            (VarType::List, LIST_METHODS),
            (VarType::Map, MAP_METHODS),
            (VarType::MethodBind, METHOD_BIND_METHODS),
            (VarType::Class, CLASS_METHODS),
            (VarType::Module, MODULE_METHODS),
            (VarType::Fiber, FIBER_METHODS),
        ];
        for (ty, defs) in methods {
            for &(name, native, arity, docstring) in defs {
                self.add_builtin_method(ty, name, native, arity, docstring);
            }
        }
    }

    fn add_builtin_method(
        &mut self,
        ty: VarType,
        name: &str,
        native: NativeFn,
        arity: i32,
        docstring: &str,
    ) {
        let closure = self.new_native_closure(name, None, native, arity, Some(docstring));
        let function = self.heap.closure(closure).function;
        self.heap.function_mut(function).is_method = true;

        let class = self.builtin_classes[ty.index()];
        self.heap.class_mut(class).methods.write(closure);
        self.heap.remeasure(class);
    }
}

/// Parse a numeric string: an optional sign, then a `0b`/`0x` literal or a
/// decimal with an optional exponent.
fn parse_number(text: &str) -> Result<f64, &'static str> {
    const INVALID: &str = "Invalid numeric string.";

    let (sign, digits) = match text.as_bytes().first() {
        Some(b'-') => (-1.0, &text[1..]),
        Some(b'+') => (1.0, &text[1..]),
        _ => (1.0, text),
    };

    let radix = match digits.get(..2) {
        Some("0b") | Some("0B") => Some(2),
        Some("0x") | Some("0X") => Some(16),
        _ => None,
    };
    if let Some(radix) = radix {
        let literal = &digits[2..];
        if literal.is_empty() {
            return Err(INVALID);
        }
        return match u64::from_str_radix(literal, radix) {
            Ok(value) => Ok(sign * value as f64),
            Err(_) if literal.chars().all(|c| c.is_digit(radix)) => {
                Err(if radix == 2 {
                    "Binary literal is too long."
                } else {
                    "Hex literal is too long."
                })
            }
            Err(_) => Err(INVALID),
        };
    }

    let well_formed = !digits.is_empty()
        && digits.starts_with(|c: char| c.is_ascii_digit() || c == '.')
        && digits
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !well_formed {
        return Err(INVALID);
    }
    digits.parse::<f64>().map(|n| sign * n).map_err(|_| INVALID)
}

fn ctor_null(_vm: &mut Vm, _self: Var, _args: &[Var]) -> Result<Var, VmError> {
    Ok(Var::Null)
}

fn ctor_bool(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    Ok(Var::Bool(vm.heap.to_bool(args[0])))
}

fn ctor_number(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    if let Some(n) = args[0].as_numeric() {
        return Ok(Var::Number(n));
    }
    if let Var::Object(r) = args[0] {
        if let Object::String(s) = vm.heap.get(r) {
            return parse_number(s.as_str())
                .map(Var::Number)
                .map_err(VmError::new);
        }
    }
    Err(VmError::new("Argument must be numeric or string."))
}

fn ctor_string(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    check_argc(args, 0, 1)?;
    let Some(&value) = args.first() else {
        return Ok(Var::Object(vm.new_string("")));
    };
    if vm.heap.is_type(value, VarType::String) {
        return Ok(value);
    }
    let text = vm.to_string(value)?;
    Ok(Var::Object(vm.new_string(text)))
}

fn ctor_list(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    Ok(Var::Object(vm.new_list(args.to_vec())))
}

fn ctor_map(vm: &mut Vm, _self: Var, _args: &[Var]) -> Result<Var, VmError> {
    Ok(Var::Object(vm.new_map()))
}

fn ctor_range(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    let from = validate_numeric(args[0], "Argument 1")?;
    let to = validate_numeric(args[1], "Argument 2")?;
    Ok(Var::Object(vm.new_range(from, to)))
}

fn ctor_fiber(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    let closure = vm.validate_arg(args, 1, VarType::Closure, "closure")?;
    Ok(Var::Object(vm.new_fiber(closure)))
}

fn obj_typename(vm: &mut Vm, self_: Var, _args: &[Var]) -> Result<Var, VmError> {
    let name = vm.heap.type_name(self_);
    Ok(Var::Object(vm.new_string(name)))
}

fn obj_repr(vm: &mut Vm, self_: Var, _args: &[Var]) -> Result<Var, VmError> {
    let text = vm.heap.try_repr(self_).ok_or_else(too_deep_to_format)?;
    Ok(Var::Object(vm.new_string(text)))
}

fn self_number(self_: Var) -> f64 {
    match self_ {
        Var::Number(n) => n,
        other => panic!("Number method called on {:?}", other),
    }
}

fn number_times(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    let count = self_number(self_).floor() as i64;
    let closure = vm.validate_arg(args, 1, VarType::Closure, "closure")?;
    for i in 0..count {
        vm.call_closure(Var::Null, closure, &[Var::Number(i as f64)])?;
    }
    Ok(Var::Null)
}

fn number_isint(_vm: &mut Vm, self_: Var, _args: &[Var]) -> Result<Var, VmError> {
    let n = self_number(self_);
    Ok(Var::Bool(n.floor() == n))
}

fn number_isbyte(_vm: &mut Vm, self_: Var, _args: &[Var]) -> Result<Var, VmError> {
    let n = self_number(self_);
    Ok(Var::Bool(n.floor() == n && (0.0..=255.0).contains(&n)))
}

fn self_text(vm: &Vm, self_: Var) -> String {
    vm.heap.str(vm.expect_object(self_)).to_string()
}

fn string_strip(vm: &mut Vm, self_: Var, _args: &[Var]) -> Result<Var, VmError> {
    let text = self_text(vm, self_);
    let stripped = text.trim();
    if stripped.len() == text.len() {
        return Ok(self_);
    }
    Ok(Var::Object(vm.new_string(stripped)))
}

fn string_lower(vm: &mut Vm, self_: Var, _args: &[Var]) -> Result<Var, VmError> {
    let text = self_text(vm, self_).to_lowercase();
    Ok(Var::Object(vm.new_string(text)))
}

fn string_upper(vm: &mut Vm, self_: Var, _args: &[Var]) -> Result<Var, VmError> {
    let text = self_text(vm, self_).to_uppercase();
    Ok(Var::Object(vm.new_string(text)))
}

fn string_find(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    check_argc(args, 1, 2)?;
    let sub = vm.validate_arg(args, 1, VarType::String, "string")?;
    let start = match args.get(1) {
        Some(&start) => validate_integer(start, "Argument 2")?,
        None => 0,
    };

    let text = self_text(vm, self_);
    let sub = vm.heap.str(sub);
    let length = text.chars().count() as i64;
    if start < 0 || start >= length {
        return Ok(Var::Number(-1.0));
    }

    // Indices count chars, the search runs on bytes.
    let offset = text
        .char_indices()
        .nth(start as usize)
        .map_or(text.len(), |(at, _)| at);
    let index = text[offset..]
        .find(sub)
        .map_or(-1, |at| text[..offset + at].chars().count() as i64);
    Ok(Var::Number(index as f64))
}

fn string_replace(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    check_argc(args, 2, 3)?;
    let old = vm.validate_arg(args, 1, VarType::String, "string")?;
    let new = vm.validate_arg(args, 2, VarType::String, "string")?;
    let count = match args.get(2) {
        Some(&count) => validate_integer(count, "Argument 3")?,
        None => -1,
    };
    if count < -1 {
        return Err(VmError::new("count should either be >= 0 or -1"));
    }

    let text = self_text(vm, self_);
    let (old, new) = (vm.heap.str(old), vm.heap.str(new));
    let replaced = if count == -1 {
        text.replace(old, new)
    } else {
        text.replacen(old, new, count as usize)
    };
    Ok(Var::Object(vm.new_string(replaced)))
}

fn string_split(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    let sep = vm.validate_arg(args, 1, VarType::String, "string")?;
    let sep = vm.heap.str(sep).to_string();
    if sep.is_empty() {
        return Err(VmError::new("Cannot use empty string as a seperator."));
    }
    let text = self_text(vm, self_);
    let parts = text.split(sep.as_str()).map(str::to_string).collect();
    Ok(Var::Object(vm.new_string_list(parts)))
}

/// The candidate affixes of `startswith`/`endswith`: one string or a list of
/// strings.
fn affixes(vm: &Vm, value: Var, what: &str) -> Result<Vec<String>, VmError> {
    let text_of = |v: Var| match v {
        Var::Object(r) => match vm.heap.get(r) {
            Object::String(s) => Some(s.as_str().to_string()),
            _ => None,
        },
        _ => None,
    };

    if let Some(text) = text_of(value) {
        return Ok(vec![text]);
    }
    if vm.heap.is_type(value, VarType::List) {
        let list = vm.heap.list(vm.expect_object(value));
        return list
            .elements
            .iter()
            .map(|&element| {
                text_of(element)
                    .ok_or_else(|| VmError::new(format!("Expected a String for {}.", what)))
            })
            .collect();
    }
    let plural = if what == "prefix" { "prifiexes" } else { "suffixes" };
    Err(VmError::new(format!(
        "Expected a String or a List of {}.",
        plural
    )))
}

fn string_startswith(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    let prefixes = affixes(vm, args[0], "prefix")?;
    let text = vm.heap.str(vm.expect_object(self_));
    Ok(Var::Bool(prefixes.iter().any(|p| text.starts_with(p.as_str()))))
}

fn string_endswith(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    let suffixes = affixes(vm, args[0], "suffix")?;
    let text = vm.heap.str(vm.expect_object(self_));
    Ok(Var::Bool(suffixes.iter().any(|s| text.ends_with(s.as_str()))))
}

fn list_clear(vm: &mut Vm, self_: Var, _args: &[Var]) -> Result<Var, VmError> {
    let list = vm.expect_object(self_);
    vm.heap.list_mut(list).elements.clear();
    vm.heap.remeasure(list);
    Ok(Var::Null)
}

fn list_find(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    let list = vm.heap.list(vm.expect_object(self_));
    let index = list
        .elements
        .iter()
        .position(|&element| vm.heap.equals(element, args[0]));
    Ok(Var::Number(index.map_or(-1.0, |i| i as f64)))
}

fn list_append(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    let list = vm.expect_object(self_);
    vm.heap.list_mut(list).elements.write(args[0]);
    vm.heap.remeasure(list);
    Ok(self_)
}

fn list_pop(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    check_argc(args, 0, 1)?;
    let list = vm.expect_object(self_);
    let length = vm.heap.list(list).elements.len() as i64;
    if length == 0 {
        return Err(VmError::new("Cannot pop from an empty list."));
    }

    let mut index = match args.first() {
        Some(&index) => validate_integer(index, "Argument 1")?,
        None => -1,
    };
    if index < 0 {
        index += length;
    }
    if index < 0 || index >= length {
        return Err(VmError::new("List.pop index out of bounds."));
    }
    let value = vm.heap.list_mut(list).elements.remove(index as usize);
    vm.heap.remeasure(list);
    Ok(value)
}

fn list_insert(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    let list = vm.expect_object(self_);
    let index = validate_integer(args[0], "Argument 1")?;
    let length = vm.heap.list(list).elements.len() as i64;
    if index < 0 || index > length {
        return Err(VmError::new("List.insert index out of bounds."));
    }
    vm.heap.list_mut(list).elements.insert(index as usize, args[1]);
    vm.heap.remeasure(list);
    Ok(Var::Null)
}

fn map_clear(vm: &mut Vm, self_: Var, _args: &[Var]) -> Result<Var, VmError> {
    let map = vm.expect_object(self_);
    vm.heap.with_map(map, |m, _| m.clear());
    Ok(Var::Null)
}

fn map_get(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    check_argc(args, 1, 2)?;
    let default = args.get(1).copied().unwrap_or(Var::Null);
    let map = vm.heap.map(vm.expect_object(self_));
    Ok(map.get(&vm.heap, args[0]).unwrap_or(default))
}

fn map_has(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    let map = vm.heap.map(vm.expect_object(self_));
    Ok(Var::Bool(map.contains_key(&vm.heap, args[0])))
}

fn map_pop(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    let map = vm.expect_object(self_);
    let key = args[0];
    match vm.heap.with_map(map, |m, heap| m.remove(heap, key)) {
        Some(value) => Ok(value),
        None => {
            let key = vm.to_repr(key)?;
            Err(VmError::new(format!("Key '{}' does not exists.", key)))
        }
    }
}

fn method_bind_bind(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    let bind = vm.expect_object(self_);
    let method = vm.heap.method_bind(bind).method;
    let name = vm.heap.function(vm.heap.closure(method).function).name.clone();

    let instance = args[0];
    if vm.has_method(instance, &name) != Some(method) {
        return Err(VmError::new(
            "Cannot bind method, instance and method types miss-match.",
        ));
    }
    vm.heap.method_bind_mut(bind).instance = Some(instance);
    Ok(self_)
}

fn class_methods(vm: &mut Vm, self_: Var, _args: &[Var]) -> Result<Var, VmError> {
    let class = vm.expect_object(self_);
    let methods: Vec<ObjRef> = vm
        .heap
        .class(class)
        .methods
        .iter()
        .copied()
        .filter(|&method| {
            let function = vm.heap.closure(method).function;
            !vm.heap.function(function).name.starts_with('@')
        })
        .collect();

    let list = vm.new_list(Vec::with_capacity(methods.len()));
    let mut vm = vm.protect(list);
    for method in methods {
        let bind = vm.new_method_bind(method, None);
        vm.heap.list_mut(list).elements.write(Var::Object(bind));
    }
    vm.heap.remeasure(list);
    Ok(Var::Object(list))
}

fn module_globals(vm: &mut Vm, self_: Var, _args: &[Var]) -> Result<Var, VmError> {
    let m = vm.heap.module(vm.expect_object(self_));
    let globals: Vec<Var> = m
        .global_names
        .iter()
        .zip(m.globals.iter())
        .filter(|(name, _)| match m.constants[**name as usize] {
            Var::Object(name) => !vm.heap.str(name).starts_with('@'),
            _ => false,
        })
        .map(|(_, &value)| value)
        .collect();
    Ok(Var::Object(vm.new_list(globals)))
}

fn fiber_run(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    let fiber = vm.expect_object(self_);
    vm.prepare_fiber(fiber, args)?;
    if let Some(native) = vm.fiber_native(fiber) {
        return vm.run_native_fiber(fiber, native);
    }
    // The dispatch loop continues in the started fiber.
    vm.start_fiber(fiber);
    Ok(Var::Null)
}

fn fiber_resume(vm: &mut Vm, self_: Var, args: &[Var]) -> Result<Var, VmError> {
    check_argc(args, 0, 1)?;
    let fiber = vm.expect_object(self_);
    let value = args.first().copied().unwrap_or(Var::Null);
    vm.switch_fiber(fiber, value)?;
    vm.heap.fiber_mut(fiber).state = FiberState::Running;
    Ok(Var::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn run(source: &str) -> String {
        let out = Rc::new(RefCell::new(String::new()));
        let sink = Rc::clone(&out);
        let mut vm = Vm::new(Configuration {
            stdout_write: Some(Box::new(move |text| sink.borrow_mut().push_str(text))),
            stderr_write: None,
            ..Configuration::default()
        });
        vm.run_source("@classes", source).unwrap();
        let text = out.borrow().clone();
        text
    }

    fn error(source: &str) -> String {
        let mut vm = Vm::new(Configuration {
            stdout_write: None,
            stderr_write: None,
            ..Configuration::default()
        });
        let err = vm.run_source("@classes", source).unwrap_err();
        err.as_runtime().unwrap().message.clone()
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42"), Ok(42.0));
        assert_eq!(parse_number("-1.5e2"), Ok(-150.0));
        assert_eq!(parse_number("0x1f"), Ok(31.0));
        assert_eq!(parse_number("-0b101"), Ok(-5.0));
        assert_eq!(parse_number("0x"), Err("Invalid numeric string."));
        assert_eq!(parse_number("12abc"), Err("Invalid numeric string."));
        assert_eq!(parse_number("inf"), Err("Invalid numeric string."));
    }

    #[test]
    fn test_class_hierarchy() {
        let vm = Vm::new(Configuration::default());
        let object = vm.builtin_classes[VarType::Object.index()];
        assert_eq!(vm.heap.class(object).super_class, None);
        for ty in &VarType::BUILTINS[1..] {
            let class = vm.builtin_classes[ty.index()];
            assert_eq!(vm.heap.class(class).super_class, Some(object));
            assert_eq!(vm.heap.class(class).class_of, *ty);
        }
    }

    #[test]
    fn test_constructors() {
        let source = "\
print(Null(), Bool(0), Number('0x10'), Number(true), String(), String(12))
print(List(1, 'a'), Map(), Range(1, 3), Fiber(fn end).is_done)
";
        assert_eq!(
            run(source),
            "null false 16 1  12\n[1, \"a\"] {} [Range:1..3] false\n"
        );
        assert_eq!(error("Number('abc')\n"), "Invalid numeric string.");
        assert_eq!(error("Number([])\n"), "Argument must be numeric or string.");
        assert_eq!(error("Object()\n"), "Class 'Object' cannot be instanciated.");
        assert_eq!(error("Range(1, 'a')\n"), "Argument 2 must be a numeric value.");
        assert_eq!(error("Fiber(1)\n"), "Expected a closure at argument 1.");
    }

    #[test]
    fn test_object_and_number_methods() {
        let source = "\
total = 0
def add(i) total += i end
4.times(add)
print(total, 1.typename(), 'x'._repr(), 2.0.isint(), 2.5.isint(), 255.isbyte(), 256.isbyte())
";
        assert_eq!(run(source), "6 Number \"x\" true false true false\n");
    }

    #[test]
    fn test_string_methods() {
        let source = "\
s = '  Hello World  '.strip()
print(s.lower(), s.upper(), s.find('o'), s.find('o', 5), s.find('z'))
print('a-b-c'.replace('-', '+'), 'a-b-c'.replace('-', '', 1), 'a,b,,c'.split(','))
print(s.startswith('He'), s.startswith(['x', 'Hello']), s.endswith('d'), s.endswith(['x']))
";
        assert_eq!(
            run(source),
            "hello world HELLO WORLD 4 7 -1\n\
             a+b+c ab-c [\"a\", \"b\", \"\", \"c\"]\n\
             true true true false\n"
        );
        assert_eq!(
            error("'a'.split('')\n"),
            "Cannot use empty string as a seperator."
        );
        assert_eq!(
            error("'a'.replace('a', 'b', -2)\n"),
            "count should either be >= 0 or -1"
        );
        assert_eq!(
            error("'a'.startswith(1)\n"),
            "Expected a String or a List of prifiexes."
        );
        assert_eq!(error("'a'.find()\n"), "Expected at least 1 argument(s).");
    }

    #[test]
    fn test_list_methods() {
        let source = "\
l = [1, 2, 3].append(4)
print(l.pop(), l.pop(0), l, l.find(3), l.find(9))
l.insert(1, 'x')
print(l)
l.clear()
print(l)
";
        assert_eq!(run(source), "4 1 [2, 3] 1 -1\n[2, \"x\", 3]\n[]\n");
        assert_eq!(error("[].pop()\n"), "Cannot pop from an empty list.");
        assert_eq!(error("[1].pop(3)\n"), "List.pop index out of bounds.");
        assert_eq!(error("[1].insert(5, 0)\n"), "List.insert index out of bounds.");
    }

    #[test]
    fn test_map_methods() {
        let source = "\
m = {'a': 1}
print(m.get('a'), m.get('b'), m.get('b', 0), m.has('a'), m.pop('a'), m.has('a'))
m['x'] = 1
m.clear()
print(m)
";
        assert_eq!(run(source), "1 null 0 true 1 false\n{}\n");
        assert_eq!(error("{}.pop('k')\n"), "Key '\"k\"' does not exists.");
    }

    #[test]
    fn test_reflection_methods() {
        let source = "\
class A
  def _init() self.v = 7 end
  def get() return self.v end
end
class B
  def get() return 0 end
end
ms = A.methods()
print(ms.length, ms[1].name)
print(A.get.bind(A())())
";
        assert_eq!(run(source), "2 get\n7\n");
        assert_eq!(
            error("class A\n  def f() end\nend\nclass B end\nA.f.bind(B())\n"),
            "Cannot bind method, instance and method types miss-match."
        );
    }

    #[test]
    fn test_module_globals_skip_special_names() {
        let source = "\
import lang
g = lang.globals()
print(g.length, g[0], g[1])
";
        assert_eq!(run(source), "4 lang [Closure:gc]\n");
    }

    #[test]
    fn test_fiber_run_and_resume() {
        let source = "\
def gen(n)
  i = yield(n)
  yield(i * 2)
  return 'done'
end
f = Fiber(gen)
print(f.run(5))
print(f.resume(4))
print(f.resume(), f.is_done)
";
        assert_eq!(run(source), "5\n8\ndone true\n");
        assert_eq!(
            error("f = Fiber(fn end)\nf.run()\nf.resume()\n"),
            "The fiber has done running."
        );
    }
}
