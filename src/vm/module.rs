//! Object construction, module constant pools and globals.
//!
//! Every constructor here allocates through [`Vm::allocate`] and may run a
//! collection, so anything a caller holds only in Rust locals must be
//! protected first.

use std::rc::Rc;

use crate::gc::ObjRef;
use crate::value::{
    Class, Closure, FnKind, Function, Instance, List, MethodBind, Module, NativeFn, Object,
    PkString, Range, Var, VarMap, VarType, ARITY_UNRESOLVED, IMPLICIT_MAIN_NAME,
};

use super::chunk::FnCode;
use super::Vm;

/// Globals per module, addressed by a one-byte operand.
pub const MAX_GLOBALS: usize = 256;

/// Constants per module, addressed by a two-byte operand.
pub const MAX_CONSTANTS: usize = 1 << 16;

impl Vm {
    pub(crate) fn new_string(&mut self, text: impl Into<String>) -> ObjRef {
        self.allocate(Object::String(PkString::new(text.into())))
    }

    pub(crate) fn new_list(&mut self, elements: Vec<Var>) -> ObjRef {
        self.allocate(Object::List(List::new(elements.into())))
    }

    pub(crate) fn new_map(&mut self) -> ObjRef {
        self.allocate(Object::Map(VarMap::new()))
    }

    pub(crate) fn new_range(&mut self, from: f64, to: f64) -> ObjRef {
        self.allocate(Object::Range(Range { from, to }))
    }

    /// A closure without captured upvalues.
    pub(crate) fn new_closure(&mut self, function: ObjRef) -> ObjRef {
        self.allocate(Object::Closure(Closure {
            function,
            upvalues: Vec::new(),
        }))
    }

    pub(crate) fn new_method_bind(&mut self, method: ObjRef, instance: Option<Var>) -> ObjRef {
        self.allocate(Object::MethodBind(MethodBind { method, instance }))
    }

    /// A native function wrapped in a closure. Functions with an owner are
    /// kept in its constant pool.
    pub(crate) fn new_native_closure(
        &mut self,
        name: &str,
        owner: Option<ObjRef>,
        native: NativeFn,
        arity: i32,
        docstring: Option<&str>,
    ) -> ObjRef {
        let function = self.allocate(Object::Function(Function {
            name: name.to_string(),
            owner,
            docstring: docstring.map(str::to_string),
            arity,
            upvalue_count: 0,
            is_method: false,
            kind: FnKind::Native(native),
        }));
        let mut vm = self.protect(function);
        if let Some(owner) = owner {
            vm.module_add_constant(owner, Var::Object(function));
        }
        vm.new_closure(function)
    }

    /// A scripted function with empty code, added to `owner`'s constants.
    /// Returns the function and its constant index.
    pub(crate) fn new_script_function(
        &mut self,
        name: &str,
        owner: ObjRef,
        is_method: bool,
    ) -> (ObjRef, usize) {
        let function = self.allocate(Object::Function(Function {
            name: name.to_string(),
            owner: Some(owner),
            docstring: None,
            arity: ARITY_UNRESOLVED,
            upvalue_count: 0,
            is_method,
            kind: FnKind::Script(Rc::new(FnCode::new())),
        }));
        let mut vm = self.protect(function);
        let index = vm.module_add_constant(owner, Var::Object(function));
        vm.module_add_string(owner, name);
        (function, index)
    }

    /// A script class. With an owner it is added to the constants and bound
    /// to a global of the same name; the constant index is returned.
    pub(crate) fn new_class(
        &mut self,
        name: &str,
        super_class: Option<ObjRef>,
        owner: Option<ObjRef>,
        docstring: Option<&str>,
    ) -> (ObjRef, Option<usize>) {
        let mut class = Class::new(name, owner, VarType::Instance);
        class.super_class = super_class;
        class.docstring = docstring.map(str::to_string);
        let class = self.allocate(Object::Class(class));

        let Some(owner) = owner else {
            return (class, None);
        };
        let mut vm = self.protect(class);
        vm.module_add_string(owner, name);
        let index = vm.module_add_constant(owner, Var::Object(class));
        vm.module_set_global(owner, name, Var::Object(class));
        (class, Some(index))
    }

    pub(crate) fn new_instance(&mut self, class: ObjRef) -> ObjRef {
        let native = self.heap.class(class).new_fn.map(|new_fn| new_fn());
        self.allocate(Object::Instance(Instance {
            class,
            attribs: VarMap::new(),
            native,
        }))
    }

    /// A module that isn't registered yet, with its `__file__` and `_name`
    /// globals set.
    pub(crate) fn create_module(&mut self, name: &str, path: Option<&str>) -> ObjRef {
        let module = self.allocate(Object::Module(Module {
            name: name.to_string(),
            path: path.map(str::to_string),
            ..Module::default()
        }));
        let mut vm = self.protect(module);
        if let Some(path) = path {
            let file = vm.new_string(path);
            vm.module_set_global(module, "__file__", Var::Object(file));
        }
        let name = vm.new_string(name);
        vm.module_set_global(module, "_name", Var::Object(name));
        module
    }

    /// Create and register a module the host can fill with functions.
    pub fn new_module(&mut self, name: &str) -> ObjRef {
        let module = self.create_module(name, None);
        self.register_module(name, module);
        module
    }

    pub(crate) fn register_module(&mut self, key: &str, module: ObjRef) {
        self.modules.insert(key.to_string(), module);
    }

    /// Add a native function as a global of `module`.
    pub fn module_add_function(
        &mut self,
        module: ObjRef,
        name: &str,
        native: NativeFn,
        arity: i32,
        docstring: Option<&str>,
    ) {
        let closure = self.new_native_closure(name, Some(module), native, arity, docstring);
        let mut vm = self.protect(closure);
        vm.module_set_global(module, name, Var::Object(closure));
    }

    /// Give `module` its implicit main function, bound to the `@main` global.
    pub(crate) fn module_add_main(&mut self, module: ObjRef) {
        let (function, _) = self.new_script_function(IMPLICIT_MAIN_NAME, module, false);
        self.heap.function_mut(function).arity = 0;
        let body = self.new_closure(function);
        let m = self.heap.module_mut(module);
        m.body = Some(body);
        m.initialized = false;
        self.module_set_global(module, IMPLICIT_MAIN_NAME, Var::Object(body));
    }

    /// Index of `value` in the constant pool, added if no identical
    /// constant exists.
    pub(crate) fn module_add_constant(&mut self, module: ObjRef, value: Var) -> usize {
        let constants = &self.heap.module(module).constants;
        if let Some(index) = constants.iter().position(|c| c.same(&value)) {
            return index;
        }
        self.heap.module_mut(module).constants.write(value);
        self.heap.remeasure(module);
        self.heap.module(module).constants.len() - 1
    }

    /// The name string `name` in the constant pool, added if missing.
    pub(crate) fn module_add_string(&mut self, module: ObjRef, name: &str) -> (ObjRef, usize) {
        if let Some(found) = self.module_find_string(module, name) {
            return found;
        }
        let string = self.new_string(name);
        self.heap
            .module_mut(module)
            .constants
            .write(Var::Object(string));
        self.heap.remeasure(module);
        (string, self.heap.module(module).constants.len() - 1)
    }

    fn module_find_string(&self, module: ObjRef, name: &str) -> Option<(ObjRef, usize)> {
        let constants = &self.heap.module(module).constants;
        constants.iter().enumerate().find_map(|(i, c)| match c {
            Var::Object(r) => match self.heap.get(*r) {
                Object::String(s) if s.as_str() == name => Some((*r, i)),
                _ => None,
            },
            _ => None,
        })
    }

    pub(crate) fn module_global_index(&self, module: ObjRef, name: &str) -> Option<usize> {
        let m = self.heap.module(module);
        m.global_names.iter().position(|&index| {
            match m.constants.get(index as usize) {
                Some(Var::Object(r)) => self.heap.str(*r) == name,
                _ => false,
            }
        })
    }

    /// Set the global `name`, creating it if needed. Returns its index.
    pub(crate) fn module_set_global(&mut self, module: ObjRef, name: &str, value: Var) -> usize {
        if let Some(index) = self.module_global_index(module, name) {
            self.heap.module_mut(module).globals[index] = value;
            return index;
        }

        // The value may only be reachable from the caller's locals.
        match value {
            Var::Object(r) => self.protect(r).module_define_global(module, name, value),
            _ => self.module_define_global(module, name, value),
        }
    }

    fn module_define_global(&mut self, module: ObjRef, name: &str, value: Var) -> usize {
        let (_, name_index) = self.module_add_string(module, name);
        let m = self.heap.module_mut(module);
        m.global_names.write(name_index as u32);
        m.globals.write(value);
        self.heap.remeasure(module);
        self.heap.module(module).globals.len() - 1
    }

    pub(crate) fn module_get_global(&self, module: ObjRef, name: &str) -> Option<Var> {
        self.module_global_index(module, name)
            .map(|index| self.heap.module(module).globals[index])
    }

    /// The constant at `index` of `module`.
    pub(crate) fn constant(&self, module: ObjRef, index: usize) -> Var {
        self.heap.module(module).constants[index]
    }

    /// The string constant at `index` of `module`.
    pub(crate) fn constant_string(&self, module: ObjRef, index: usize) -> ObjRef {
        match self.constant(module, index) {
            Var::Object(r) => r,
            other => panic!("constant {} is not a string: {:?}", index, other),
        }
    }
}
