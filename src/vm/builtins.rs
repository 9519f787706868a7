//! Builtin functions and the `lang` module.
//!
//! Builtins are native closures held by the VM; the compiler resolves their
//! names before globals and emits `PUSH_BUILTIN_FN` with their index.

use crate::error::VmError;
use crate::gc::ObjRef;
use crate::value::{NativeFn, Object, Var, VarType, ARITY_VARIADIC};

use super::opcode::Opcode;
use super::Vm;

/// `(name, native, arity, docstring)` of every builtin function, in the
/// order of their indices.
const BUILTIN_FNS: [(&str, NativeFn, i32, &str); 16] = [
    (
        "help",
        core_help,
        ARITY_VARIADIC,
        "help([value:Closure|MethodBind|Class]) -> Null\n\n\
         Print the docstring of the value.",
    ),
    (
        "dir",
        core_dir,
        1,
        "dir(v:Var) -> List[String]\n\n\
         Names of the globals of a module, or the attributes and methods \
         of any other value.",
    ),
    (
        "assert",
        core_assert,
        ARITY_VARIADIC,
        "assert(condition:Bool [, msg:String]) -> Null\n\n\
         Fail the current fiber with the optional message if the condition \
         is false.",
    ),
    (
        "bin",
        core_bin,
        1,
        "bin(value:Number) -> String\n\n\
         The binary text of an integer with the '0b' prefix.",
    ),
    (
        "hex",
        core_hex,
        1,
        "hex(value:Number) -> String\n\n\
         The hexadecimal text of an integer with the '0x' prefix.",
    ),
    (
        "yield",
        core_yield,
        ARITY_VARIADIC,
        "yield([value:Var]) -> Var\n\n\
         Suspend the running fiber and hand the value to its caller. The \
         value the fiber is resumed with becomes the result of yield().",
    ),
    (
        "str",
        core_str,
        1,
        "str(value:Var) -> String\n\n\
         The string representation of the value.",
    ),
    (
        "chr",
        core_chr,
        1,
        "chr(value:Number) -> String\n\n\
         The one character string of a byte value.",
    ),
    (
        "ord",
        core_ord,
        1,
        "ord(value:String) -> Number\n\n\
         The code point of a one character string.",
    ),
    (
        "min",
        core_min,
        2,
        "min(a:Var, b:Var) -> Var\n\n\
         The lesser of a and b.",
    ),
    (
        "max",
        core_max,
        2,
        "max(a:Var, b:Var) -> Var\n\n\
         The greater of a and b.",
    ),
    (
        "print",
        core_print,
        ARITY_VARIADIC,
        "print(...) -> Null\n\n\
         Write the arguments separated by spaces to stdout and end the line.",
    ),
    (
        "input",
        core_input,
        ARITY_VARIADIC,
        "input([msg:Var]) -> String\n\n\
         Print the optional message and read a line from stdin without its \
         line ending.",
    ),
    (
        "exit",
        core_exit,
        ARITY_VARIADIC,
        "exit([value:Number]) -> Null\n\n\
         Stop the script and return the exit code (default 0) to the host.",
    ),
    (
        "list_append",
        core_list_append,
        2,
        "list_append(self:List, value:Var) -> List\n\n\
         Append the value to the list and return the list.",
    ),
    (
        "list_join",
        core_list_join,
        1,
        "list_join(self:List) -> String\n\n\
         Concatenate the string form of every element.",
    ),
];

impl Vm {
    pub(crate) fn initialize_builtin_fns(&mut self) {
        for (name, native, arity, docstring) in BUILTIN_FNS {
            let closure = self.new_native_closure(name, None, native, arity, Some(docstring));
            self.builtin_fns.push(closure);
        }
    }

    /// Register the `lang` module.
    pub(crate) fn initialize_lang_module(&mut self) {
        let lang = self.new_module("lang");
        self.module_add_function(
            lang,
            "gc",
            lang_gc,
            0,
            Some("lang.gc() -> Number\n\nRun a collection and return the bytes freed."),
        );
        self.module_add_function(
            lang,
            "write",
            lang_write,
            ARITY_VARIADIC,
            Some("lang.write(...) -> Null\n\nWrite the arguments to stdout as they are."),
        );
        self.module_add_function(
            lang,
            "modules",
            lang_modules,
            0,
            Some("lang.modules() -> List\n\nEvery registered module."),
        );
    }

    /// The object of `args[arg - 1]` if it has type `ty`. `what` names the
    /// type in the error.
    pub(super) fn validate_arg(
        &self,
        args: &[Var],
        arg: usize,
        ty: VarType,
        what: &str,
    ) -> Result<ObjRef, VmError> {
        match args[arg - 1] {
            Var::Object(r) if self.heap.var_type(Var::Object(r)) == ty => Ok(r),
            _ => Err(VmError::new(format!(
                "Expected a {} at argument {}.",
                what, arg
            ))),
        }
    }

    /// Method names of `class` and its parents, most derived first.
    pub(super) fn collect_method_names(&self, class: ObjRef, names: &mut Vec<String>) {
        let mut current = Some(class);
        while let Some(c) = current {
            let cls = self.heap.class(c);
            for method in cls.methods.iter() {
                let function = self.heap.closure(*method).function;
                names.push(self.heap.function(function).name.clone());
            }
            current = cls.super_class;
        }
    }

    /// A new list of new strings.
    pub(super) fn new_string_list(&mut self, names: Vec<String>) -> ObjRef {
        let list = self.new_list(Vec::with_capacity(names.len()));
        let mut vm = self.protect(list);
        for name in names {
            let string = vm.new_string(name);
            vm.heap.list_mut(list).elements.write(Var::Object(string));
        }
        vm.heap.remeasure(list);
        list
    }
}

pub(super) fn check_argc(args: &[Var], min: usize, max: usize) -> Result<(), VmError> {
    if args.len() < min {
        return Err(VmError::new(format!(
            "Expected at least {} argument(s).",
            min
        )));
    }
    if args.len() > max {
        return Err(VmError::new(format!(
            "Expected at most {} argument(s).",
            max
        )));
    }
    Ok(())
}

pub(super) fn validate_integer(value: Var, name: &str) -> Result<i64, VmError> {
    value
        .as_integer()
        .ok_or_else(|| VmError::new(format!("{} must be an Integer.", name)))
}

pub(super) fn validate_numeric(value: Var, name: &str) -> Result<f64, VmError> {
    value
        .as_numeric()
        .ok_or_else(|| VmError::new(format!("{} must be a numeric value.", name)))
}

// help([value]) - print a docstring, or the signatures of every builtin
fn core_help(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    if args.len() > 1 {
        return Err(VmError::new("Invalid argument count."));
    }
    if vm.config.stdout_write.is_none() {
        return Ok(Var::Null);
    }

    let Some(&value) = args.first() else {
        let mut text = String::new();
        for (_, _, _, docstring) in BUILTIN_FNS {
            let signature = docstring.lines().next().unwrap_or_default();
            text.push_str(signature);
            text.push('\n');
        }
        vm.write_stdout(&text);
        return Ok(Var::Null);
    };

    let text = match value {
        Var::Object(r) => match vm.heap.get(r) {
            Object::Closure(closure) => {
                let function = vm.heap.function(closure.function);
                match &function.docstring {
                    Some(doc) => format!("{}\n\n", doc),
                    None => format!("function '{}()' doesn't have a docstring.\n", function.name),
                }
            }
            Object::MethodBind(mb) => {
                let function = vm.heap.function(vm.heap.closure(mb.method).function);
                match &function.docstring {
                    Some(doc) => format!("{}\n\n", doc),
                    None => format!("method '{}()' doesn't have a docstring.\n", function.name),
                }
            }
            Object::Class(cls) => match &cls.docstring {
                Some(doc) => format!("{}\n\n", doc),
                None => format!("class '{}' doesn't have a docstring.\n", cls.name),
            },
            _ => return Err(help_type_error()),
        },
        _ => return Err(help_type_error()),
    };
    vm.write_stdout(&text);
    Ok(Var::Null)
}

fn help_type_error() -> VmError {
    VmError::new("Expected a Closure, MethodBind or Class to get help.")
}

// dir(v) - global names of a module, attributes and methods of anything else
fn core_dir(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    let value = args[0];
    let mut names = Vec::new();

    match vm.heap.var_type(value) {
        VarType::Module => {
            let module = vm.expect_object(value);
            let m = vm.heap.module(module);
            for &index in m.global_names.iter() {
                if let Var::Object(name) = m.constants[index as usize] {
                    names.push(vm.heap.str(name).to_string());
                }
            }
        }
        VarType::Class => vm.collect_method_names(vm.expect_object(value), &mut names),
        VarType::Instance => {
            let instance = vm.expect_object(value);
            for key in vm.heap.instance(instance).attribs.keys() {
                names.push(vm.heap.display(key));
            }
            vm.collect_method_names(vm.heap.instance(instance).class, &mut names);
        }
        _ => vm.collect_method_names(vm.get_class(value), &mut names),
    }

    Ok(Var::Object(vm.new_string_list(names)))
}

// assert(condition [, msg]) - fail the fiber if the condition is false
fn core_assert(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    if args.is_empty() || args.len() > 2 {
        return Err(VmError::new("Invalid argument count."));
    }
    if vm.heap.to_bool(args[0]) {
        return Ok(Var::Null);
    }
    match args.get(1) {
        Some(&message) => {
            let message = vm.to_string(message)?;
            Err(VmError::new(format!("Assertion failed: '{}'.", message)))
        }
        None => Err(VmError::new("Assertion failed.")),
    }
}

// bin(value) - "0b101", "-0b11"
fn core_bin(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    let value = validate_integer(args[0], "Argument 1")?;
    let sign = if value < 0 { "-" } else { "" };
    let text = format!("{}0b{:b}", sign, value.unsigned_abs());
    Ok(Var::Object(vm.new_string(text)))
}

// hex(value) - "0xff", "-0x10"; limited to 32 bit magnitudes
fn core_hex(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    let value = validate_integer(args[0], "Argument 1")?;
    if value.unsigned_abs() > u32::MAX as u64 {
        return Err(VmError::new("Integer is too large."));
    }
    let sign = if value < 0 { "-" } else { "" };
    let text = format!("{}0x{:x}", sign, value.unsigned_abs());
    Ok(Var::Object(vm.new_string(text)))
}

// yield([value]) - suspend the running fiber
fn core_yield(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    if args.len() > 1 {
        return Err(VmError::new("Invalid argument count."));
    }
    vm.yield_fiber(args.first().copied().unwrap_or(Var::Null));
    Ok(Var::Null)
}

// str(value) - string form, honoring _str and _repr overloads
fn core_str(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    if vm.heap.is_type(args[0], VarType::String) {
        return Ok(args[0]);
    }
    let text = vm.to_string(args[0])?;
    Ok(Var::Object(vm.new_string(text)))
}

// chr(value) - the character of a byte value
fn core_chr(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    let value = validate_integer(args[0], "Argument 1")?;
    let Ok(byte) = u8::try_from(value) else {
        return Err(VmError::new("The number should be in range 0x00 to 0xff."));
    };
    let text = char::from(byte).to_string();
    Ok(Var::Object(vm.new_string(text)))
}

// ord(value) - code point of a one character string
fn core_ord(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    let string = vm.validate_arg(args, 1, VarType::String, "string")?;
    let s = vm.heap.string(string);
    match (s.len(), s.char_at(0)) {
        (1, Some(c)) => Ok(Var::Number(c as u32 as f64)),
        _ => Err(VmError::new("Expected a string of length 1.")),
    }
}

fn is_lesser(vm: &mut Vm, a: Var, b: Var) -> Result<bool, VmError> {
    let lesser = vm.binary_op(Opcode::LT, a, b, false)?;
    Ok(vm.heap.to_bool(lesser))
}

// min(a, b)
fn core_min(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    let (a, b) = (args[0], args[1]);
    Ok(if is_lesser(vm, a, b)? { a } else { b })
}

// max(a, b)
fn core_max(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    let (a, b) = (args[0], args[1]);
    Ok(if is_lesser(vm, a, b)? { b } else { a })
}

// print(...) - space separated, newline terminated
fn core_print(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    if vm.config.stdout_write.is_none() {
        return Ok(Var::Null);
    }
    let mut line = String::new();
    for (i, &arg) in args.iter().enumerate() {
        if i != 0 {
            line.push(' ');
        }
        line.push_str(&vm.to_string(arg)?);
    }
    line.push('\n');
    vm.write_stdout(&line);
    Ok(Var::Null)
}

// input([msg]) - read a line from the host
fn core_input(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    if args.len() > 1 {
        return Err(VmError::new("Invalid argument count."));
    }
    if vm.config.stdin_read.is_none() {
        return Ok(Var::Null);
    }
    if let Some(&prompt) = args.first() {
        let prompt = vm.to_string(prompt)?;
        vm.write_stdout(&prompt);
    }

    let line = vm.config.stdin_read.as_ref().and_then(|read| read());
    match line {
        Some(line) => Ok(Var::Object(vm.new_string(line))),
        None => Err(VmError::new("Input function failed.")),
    }
}

// exit([code]) - unwind to the host with the exit code
fn core_exit(_vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    if args.len() > 1 {
        return Err(VmError::new("Invalid argument count."));
    }
    let code = match args.first() {
        Some(&value) => validate_integer(value, "Argument 1")?,
        None => 0,
    };
    Err(VmError::Exit(code as i32))
}

// list_append(list, value) - used by list literals and comprehensions
fn core_list_append(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    let list = vm.validate_arg(args, 1, VarType::List, "list")?;
    vm.heap.list_mut(list).elements.write(args[1]);
    vm.heap.remeasure(list);
    Ok(Var::Object(list))
}

// list_join(list) - used by string interpolation
fn core_list_join(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    let list = vm.validate_arg(args, 1, VarType::List, "list")?;
    let elements = vm.heap.list(list).elements.as_slice().to_vec();
    let mut text = String::new();
    for element in elements {
        text.push_str(&vm.to_string(element)?);
    }
    Ok(Var::Object(vm.new_string(text)))
}

// lang.gc() - collect now, return the bytes freed
fn lang_gc(vm: &mut Vm, _self: Var, _args: &[Var]) -> Result<Var, VmError> {
    let freed = vm.collect_garbage();
    Ok(Var::Number(freed as f64))
}

// lang.write(...) - like print, without separators or newline
fn lang_write(vm: &mut Vm, _self: Var, args: &[Var]) -> Result<Var, VmError> {
    let mut text = String::new();
    for &arg in args {
        text.push_str(&vm.to_string(arg)?);
    }
    vm.write_stdout(&text);
    Ok(Var::Null)
}

// lang.modules() - registered modules, without the special '@' ones
fn lang_modules(vm: &mut Vm, _self: Var, _args: &[Var]) -> Result<Var, VmError> {
    let mut modules: Vec<Var> = Vec::new();
    for &module in vm.modules.values() {
        let visible = !vm.heap.module(module).name.starts_with('@');
        if visible && !modules.iter().any(|m| *m == Var::Object(module)) {
            modules.push(Var::Object(module));
        }
    }
    Ok(Var::Object(vm.new_list(modules)))
}

#[cfg(test)]
mod tests {
    use crate::config::Configuration;
    use crate::error::PocketError;
    use crate::vm::Vm;
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
        vm.run_source("@builtins", source).unwrap();
        let text = out.borrow().clone();
        text
    }

    fn error(source: &str) -> String {
        let mut vm = Vm::new(Configuration {
            stdout_write: Some(Box::new(|_| {})),
            stderr_write: None,
            ..Configuration::default()
        });
        let err = vm.run_source("@builtins", source).unwrap_err();
        err.as_runtime().unwrap().message.clone()
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(
            run("print(bin(5), bin(-3), bin(0), hex(255), hex(-16))\n"),
            "0b101 -0b11 0b0 0xff -0x10\n"
        );
        assert_eq!(error("hex(4294967296)\n"), "Integer is too large.");
        assert_eq!(error("bin(1.5)\n"), "Argument 1 must be an Integer.");
    }

    #[test]
    fn test_chr_and_ord() {
        assert_eq!(run("print(chr(65), ord('a'), ord(chr(200)))\n"), "A 97 200\n");
        assert_eq!(
            error("chr(256)\n"),
            "The number should be in range 0x00 to 0xff."
        );
        assert_eq!(error("ord('ab')\n"), "Expected a string of length 1.");
        assert_eq!(error("ord(1)\n"), "Expected a string at argument 1.");
    }

    #[test]
    fn test_min_max_and_str() {
        assert_eq!(
            run("print(min(3, 2), max(3, 2), min(-1, 0.5), str(1.5) + str(null))\n"),
            "2 3 -1 1.5null\n"
        );
        assert_eq!(
            error("min('a', 'b')\n"),
            "Unsupported operand types for operator '<' String and String"
        );
    }

    #[test]
    fn test_assert_messages() {
        assert_eq!(error("assert(1 == 2)\n"), "Assertion failed.");
        assert_eq!(
            error("assert(false, 'bad ' + str(1))\n"),
            "Assertion failed: 'bad 1'."
        );
        assert_eq!(error("assert()\n"), "Invalid argument count.");
        assert_eq!(run("assert(true)\nprint('ok')\n"), "ok\n");
    }

    #[test]
    fn test_help_prints_docstrings() {
        let source = "\
def f()
  \"Adds nothing.\"
end
def g() end
class C end
help(f)
help(g)
help(C)
";
        assert_eq!(
            run(source),
            "Adds nothing.\n\nfunction 'g()' doesn't have a docstring.\n\
             class 'C' doesn't have a docstring.\n"
        );
        assert!(run("help()\n").contains("print(...) -> Null\n"));

        let mut silent = Vm::new(Configuration {
            stdout_write: None,
            stderr_write: None,
            ..Configuration::default()
        });
        assert!(silent.run_source("@builtins", "help(1)\n").is_ok());
        assert_eq!(
            error("help(1)\n"),
            "Expected a Closure, MethodBind or Class to get help."
        );
    }

    #[test]
    fn test_dir_lists_names() {
        let source = "\
class A
  def f() end
end
a = A()
a.x = 1
print(dir(a))
print('append' in dir([]))
";
        assert_eq!(run(source), "[\"x\", \"f\", \"typename\", \"_repr\"]\ntrue\n");
    }

    #[test]
    fn test_list_helpers() {
        assert_eq!(
            run("l = list_append([1], 2)\nprint(l, list_join([1, 'a', null]))\n"),
            "[1, 2] 1anull\n"
        );
    }

    #[test]
    fn test_exit_unwinds_with_code() {
        let mut vm = Vm::new(Configuration {
            stdout_write: None,
            stderr_write: None,
            ..Configuration::default()
        });
        let err = vm.run_source("@exit", "exit(3)\nprint('unreachable')\n").unwrap_err();
        assert!(matches!(err, PocketError::Exit(3)));
    }

    #[test]
    fn test_input_reads_from_host() {
        let out = Rc::new(RefCell::new(String::new()));
        let sink = Rc::clone(&out);
        let mut vm = Vm::new(Configuration {
            stdout_write: Some(Box::new(move |text| sink.borrow_mut().push_str(text))),
            stdin_read: Some(Box::new(|| Some("world".to_string()))),
            ..Configuration::default()
        });
        vm.run_source("@input", "name = input('name? ')\nprint('hi ' + name)\n")
            .unwrap();
        assert_eq!(out.borrow().as_str(), "name? hi world\n");
    }

    #[test]
    fn test_lang_module() {
        let source = "\
import lang
lang.write('a', 1, '\\n')
x = [1, 2, 3]
x = null
print(lang.gc() >= 0)
";
        assert_eq!(run(source), "a1\ntrue\n");
    }
}
