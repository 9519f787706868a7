//! The bytecode virtual machine: state, host entry points and the dispatch
//! loop.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::config::{CompileOptions, Configuration};
use crate::error::{PocketError, VmError};
use crate::gc::{Heap, ObjRef};
use crate::value::{Closure, Object, Var, VarType, CTOR_NAME, IMPLICIT_MAIN_NAME};

use super::chunk::FnCode;
use super::fiber::FiberState;
use super::opcode::Opcode;

/// A host reference that keeps a value alive until released.
#[derive(Debug, PartialEq, Eq)]
pub struct Handle(usize);

/// The bytecode VM. Owns the heap and every piece of runtime state.
pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) config: Configuration,

    /// The fiber being executed.
    pub(crate) fiber: Option<ObjRef>,

    /// Imported modules, keyed by name or resolved path.
    pub(crate) modules: IndexMap<String, ObjRef, ahash::RandomState>,
    /// Extra directories tried when an import doesn't resolve.
    pub(crate) search_paths: Vec<String>,

    pub(crate) builtin_fns: Vec<ObjRef>,
    /// Indexed by [`VarType::index`].
    pub(crate) builtin_classes: Vec<ObjRef>,

    /// Temporary GC roots, see [`Vm::protect`].
    pub(crate) temp_refs: Vec<ObjRef>,
    pub(crate) handles: Vec<Option<Var>>,
    free_handles: Vec<usize>,

    /// Modules with a compilation in progress, innermost last.
    pub(crate) compiling: Vec<ObjRef>,
}

/// The execution registers of the running frame, cached out of the heap.
pub(crate) struct Registers {
    pub fiber: ObjRef,
    pub closure: ObjRef,
    pub module: ObjRef,
    pub code: Rc<FnCode>,
    pub ip: usize,
    pub rbp: usize,
}

impl Registers {
    fn read_byte(&mut self) -> usize {
        let byte = self.code.opcodes[self.ip];
        self.ip += 1;
        byte as usize
    }

    fn read_short(&mut self) -> usize {
        let short = self.code.read_short(self.ip);
        self.ip += 2;
        short as usize
    }
}

impl Vm {
    pub fn new(config: Configuration) -> Self {
        let heap = Heap::new(
            config.initial_heap_size,
            config.min_heap_size,
            config.heap_fill_percent,
        );
        let mut vm = Self {
            heap,
            config,
            fiber: None,
            modules: IndexMap::default(),
            search_paths: Vec::new(),
            builtin_fns: Vec::new(),
            builtin_classes: Vec::new(),
            temp_refs: Vec::new(),
            handles: Vec::new(),
            free_handles: Vec::new(),
            compiling: Vec::new(),
        };
        vm.initialize_builtin_classes();
        vm.initialize_builtin_fns();
        vm.initialize_lang_module();
        vm
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn add_search_path(&mut self, path: impl Into<String>) {
        self.search_paths.push(path.into());
    }

    pub fn new_handle(&mut self, value: Var) -> Handle {
        match self.free_handles.pop() {
            Some(index) => {
                self.handles[index] = Some(value);
                Handle(index)
            }
            None => {
                self.handles.push(Some(value));
                Handle(self.handles.len() - 1)
            }
        }
    }

    pub fn handle_value(&self, handle: &Handle) -> Var {
        self.handles[handle.0].unwrap_or(Var::Null)
    }

    pub fn release_handle(&mut self, handle: Handle) {
        self.handles[handle.0] = None;
        self.free_handles.push(handle.0);
    }

    pub fn find_module(&self, name: &str) -> Option<ObjRef> {
        if let Some(module) = self.modules.get(name) {
            return Some(*module);
        }
        self.modules
            .values()
            .copied()
            .find(|m| self.heap.module(*m).name == name)
    }

    pub fn get_global(&self, module: ObjRef, name: &str) -> Option<Var> {
        self.module_get_global(module, name)
    }

    pub fn set_global(&mut self, module: ObjRef, name: &str, value: Var) {
        self.module_set_global(module, name, value);
    }

    /// Compile `source` as a new main module registered under `path` and run
    /// its body. Paths starting with `@` name string modules without a file.
    pub fn run_source(&mut self, path: &str, source: &str) -> Result<ObjRef, PocketError> {
        let file = if path.starts_with('@') {
            None
        } else {
            Some(path)
        };
        let module = self.create_module(IMPLICIT_MAIN_NAME, file);
        self.register_module(path, module);
        self.compile(module, source, &CompileOptions::default())?;
        self.run_module(module)?;
        Ok(module)
    }

    /// Run the compiled body of `module` to completion.
    pub fn run_module(&mut self, module: ObjRef) -> Result<Var, PocketError> {
        let Some(body) = self.heap.module(module).body else {
            return Ok(Var::Null);
        };
        self.heap.module_mut(module).initialized = true;
        let fiber = self.new_fiber(body);
        let mut vm = self.protect(fiber);
        vm.run_fiber(fiber, &[])
    }

    /// Start a new fiber with `args` and run it until it returns or yields.
    pub fn run_fiber(&mut self, fiber: ObjRef, args: &[Var]) -> Result<Var, PocketError> {
        let last = self.fiber;
        let result = self.start_fiber_from_host(fiber, args);
        self.fiber = last;
        self.host_result(fiber, result)
    }

    /// Resume a yielded fiber; `value` becomes the result of its `yield()`.
    pub fn resume_fiber(&mut self, fiber: ObjRef, value: Var) -> Result<Var, PocketError> {
        let last = self.fiber;
        self.fiber = None;
        let result = match self.switch_fiber(fiber, value) {
            Ok(()) => self.execute(fiber),
            Err(err) => Err(err),
        };
        self.fiber = last;
        self.host_result(fiber, result)
    }

    /// Call `closure` synchronously and return its result.
    pub fn call_function(&mut self, closure: ObjRef, args: &[Var]) -> Result<Var, PocketError> {
        self.call_method(Var::Null, closure, args)
    }

    /// Call `closure` with `self_` as its receiver.
    pub fn call_method(
        &mut self,
        self_: Var,
        closure: ObjRef,
        args: &[Var],
    ) -> Result<Var, PocketError> {
        self.call_closure(self_, closure, args).map_err(|err| {
            self.report_runtime_error(&err);
            PocketError::from(err)
        })
    }

    fn start_fiber_from_host(&mut self, fiber: ObjRef, args: &[Var]) -> Result<(), VmError> {
        self.fiber = None;
        self.prepare_fiber(fiber, args)?;
        if let Some(native) = self.fiber_native(fiber) {
            return self.run_native_fiber(fiber, native).map(|_| ());
        }
        self.execute(fiber)
    }

    fn host_result(
        &mut self,
        fiber: ObjRef,
        result: Result<(), VmError>,
    ) -> Result<Var, PocketError> {
        match result {
            Ok(()) => Ok(self.heap.fiber(fiber).result()),
            Err(err) => {
                self.report_runtime_error(&err);
                Err(err.into())
            }
        }
    }

    pub(crate) fn write_stdout(&self, text: &str) {
        if let Some(write) = &self.config.stdout_write {
            write(text);
        }
    }

    pub(crate) fn write_stderr(&self, text: &str) {
        if let Some(write) = &self.config.stderr_write {
            write(text);
        }
    }

    /// Run `fiber` from its current frame until it finishes, yields without
    /// a caller, or fails. A failure aborts the fiber and its callers.
    pub(crate) fn execute(&mut self, fiber: ObjRef) -> Result<(), VmError> {
        self.fiber = Some(fiber);
        self.heap.fiber_mut(fiber).state = FiberState::Running;

        let mut regs = self.load_registers(fiber);
        match self.dispatch(&mut regs) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.save_ip(&regs);
                Err(self.fail_fiber(regs.fiber, err))
            }
        }
    }

    pub(crate) fn load_registers(&self, fiber: ObjRef) -> Registers {
        let f = self.heap.fiber(fiber);
        let frame = match f.frames.last() {
            Some(frame) => *frame,
            None => panic!("fiber has no call frame"),
        };
        let function = self.heap.function(self.heap.closure(frame.closure).function);
        let (Some(code), Some(module)) = (function.code(), function.owner) else {
            panic!("call frame of native function {}", function.name);
        };
        Registers {
            fiber,
            closure: frame.closure,
            module,
            code: Rc::clone(code),
            ip: frame.ip,
            rbp: frame.rbp,
        }
    }

    pub(crate) fn save_ip(&mut self, regs: &Registers) {
        if let Some(frame) = self.heap.fiber_mut(regs.fiber).frames.last_mut() {
            frame.ip = regs.ip;
        }
    }

    pub(crate) fn push(&mut self, fiber: ObjRef, value: Var) {
        self.heap.fiber_mut(fiber).stack.push(value);
    }

    pub(crate) fn pop(&mut self, fiber: ObjRef) -> Var {
        match self.heap.fiber_mut(fiber).stack.pop() {
            Some(value) => value,
            None => panic!("stack underflow"),
        }
    }

    fn drop_values(&mut self, fiber: ObjRef, count: usize) {
        let stack = &mut self.heap.fiber_mut(fiber).stack;
        let len = stack.len() - count;
        stack.truncate(len);
    }

    /// The value `depth` slots below the top; 1 is the top.
    pub(crate) fn peek(&self, fiber: ObjRef, depth: usize) -> Var {
        let stack = &self.heap.fiber(fiber).stack;
        stack[stack.len() - depth]
    }

    fn set_peek(&mut self, fiber: ObjRef, depth: usize, value: Var) {
        let stack = &mut self.heap.fiber_mut(fiber).stack;
        let at = stack.len() - depth;
        stack[at] = value;
    }

    fn local_slot(&self, regs: &Registers, index: usize) -> usize {
        regs.rbp + 1 + index
    }

    fn dispatch(&mut self, r: &mut Registers) -> Result<(), VmError> {
        loop {
            let byte = r.code.opcodes[r.ip];
            r.ip += 1;
            let Some(op) = Opcode::from_byte(byte) else {
                panic!("invalid opcode {:#04x}", byte);
            };

            match op {
                Opcode::PUSH_CONSTANT => {
                    let index = r.read_short();
                    let value = self.constant(r.module, index);
                    self.push(r.fiber, value);
                }
                Opcode::PUSH_NULL => self.push(r.fiber, Var::Null),
                Opcode::PUSH_0 => self.push(r.fiber, Var::Number(0.0)),
                Opcode::PUSH_TRUE => self.push(r.fiber, Var::Bool(true)),
                Opcode::PUSH_FALSE => self.push(r.fiber, Var::Bool(false)),

                Opcode::SWAP => {
                    let stack = &mut self.heap.fiber_mut(r.fiber).stack;
                    let len = stack.len();
                    stack.swap(len - 1, len - 2);
                }
                Opcode::DUP => {
                    let top = self.peek(r.fiber, 1);
                    self.push(r.fiber, top);
                }

                Opcode::PUSH_LIST => {
                    let size = r.read_short();
                    let list = self.new_list(Vec::with_capacity(size));
                    self.push(r.fiber, Var::Object(list));
                }
                Opcode::PUSH_MAP => {
                    let map = self.new_map();
                    self.push(r.fiber, Var::Object(map));
                }
                Opcode::PUSH_SELF => {
                    let self_ = self
                        .heap
                        .fiber(r.fiber)
                        .frames
                        .last()
                        .map_or(Var::Null, |frame| frame.self_);
                    self.push(r.fiber, self_);
                }

                Opcode::LIST_APPEND => {
                    let element = self.peek(r.fiber, 1);
                    let list = self.expect_object(self.peek(r.fiber, 2));
                    self.heap.list_mut(list).elements.write(element);
                    self.heap.remeasure(list);
                    self.drop_values(r.fiber, 1);
                }
                Opcode::MAP_INSERT => {
                    let value = self.peek(r.fiber, 1);
                    let key = self.peek(r.fiber, 2);
                    let map = self.expect_object(self.peek(r.fiber, 3));
                    if !self.heap.is_hashable(key) {
                        return Err(VmError::new(format!(
                            "{} type is not hashable.",
                            self.heap.type_name(key)
                        )));
                    }
                    self.heap.with_map(map, |m, heap| m.set(heap, key, value));
                    self.heap.remeasure(map);
                    self.drop_values(r.fiber, 2);
                }

                Opcode::PUSH_LOCAL_0
                | Opcode::PUSH_LOCAL_1
                | Opcode::PUSH_LOCAL_2
                | Opcode::PUSH_LOCAL_3
                | Opcode::PUSH_LOCAL_4
                | Opcode::PUSH_LOCAL_5
                | Opcode::PUSH_LOCAL_6
                | Opcode::PUSH_LOCAL_7
                | Opcode::PUSH_LOCAL_8
                | Opcode::PUSH_LOCAL_N => {
                    let index = match op {
                        Opcode::PUSH_LOCAL_N => r.read_byte(),
                        _ => (op as u8 - Opcode::PUSH_LOCAL_0 as u8) as usize,
                    };
                    let slot = self.local_slot(r, index);
                    let value = self.heap.fiber(r.fiber).stack[slot];
                    self.push(r.fiber, value);
                }

                Opcode::STORE_LOCAL_0
                | Opcode::STORE_LOCAL_1
                | Opcode::STORE_LOCAL_2
                | Opcode::STORE_LOCAL_3
                | Opcode::STORE_LOCAL_4
                | Opcode::STORE_LOCAL_5
                | Opcode::STORE_LOCAL_6
                | Opcode::STORE_LOCAL_7
                | Opcode::STORE_LOCAL_8
                | Opcode::STORE_LOCAL_N => {
                    let index = match op {
                        Opcode::STORE_LOCAL_N => r.read_byte(),
                        _ => (op as u8 - Opcode::STORE_LOCAL_0 as u8) as usize,
                    };
                    let slot = self.local_slot(r, index);
                    let value = self.peek(r.fiber, 1);
                    self.heap.fiber_mut(r.fiber).stack[slot] = value;
                }

                Opcode::PUSH_GLOBAL => {
                    let index = r.read_byte();
                    let value = self.heap.module(r.module).globals[index];
                    self.push(r.fiber, value);
                }
                Opcode::STORE_GLOBAL => {
                    let index = r.read_byte();
                    let value = self.peek(r.fiber, 1);
                    self.heap.module_mut(r.module).globals[index] = value;
                }

                Opcode::PUSH_BUILTIN_FN => {
                    let index = r.read_byte();
                    let function = self.builtin_fns[index];
                    self.push(r.fiber, Var::Object(function));
                }
                Opcode::PUSH_BUILTIN_TY => {
                    let index = r.read_byte();
                    let class = self.builtin_classes[index];
                    self.push(r.fiber, Var::Object(class));
                }

                Opcode::PUSH_UPVALUE => {
                    let index = r.read_byte();
                    let upvalue = self.heap.closure(r.closure).upvalues[index];
                    let value = self.read_upvalue(upvalue);
                    self.push(r.fiber, value);
                }
                Opcode::STORE_UPVALUE => {
                    let index = r.read_byte();
                    let upvalue = self.heap.closure(r.closure).upvalues[index];
                    let value = self.peek(r.fiber, 1);
                    self.write_upvalue(upvalue, value);
                }

                Opcode::PUSH_CLOSURE => {
                    let index = r.read_short();
                    let function = self.expect_object(self.constant(r.module, index));
                    let count = self.heap.function(function).upvalue_count;

                    // Captured upvalues stay rooted through the fiber's open
                    // list until the closure holds them.
                    let mut upvalues = Vec::with_capacity(count);
                    for _ in 0..count {
                        let is_immediate = r.read_byte() != 0;
                        let index = r.read_byte();
                        let upvalue = if is_immediate {
                            let slot = self.local_slot(r, index);
                            self.capture_upvalue(r.fiber, slot)
                        } else {
                            self.heap.closure(r.closure).upvalues[index]
                        };
                        upvalues.push(upvalue);
                    }
                    let closure = self.allocate(Object::Closure(Closure {
                        function,
                        upvalues,
                    }));
                    self.push(r.fiber, Var::Object(closure));
                }

                Opcode::CREATE_CLASS => {
                    let base = self.peek(r.fiber, 1);
                    let base = match base {
                        Var::Object(b) if matches!(self.heap.get(b), Object::Class(_)) => b,
                        _ => return Err(VmError::new("Cannot inherit a non class object.")),
                    };
                    let class_of = self.heap.class(base).class_of;
                    if class_of != VarType::Instance && class_of != VarType::Object {
                        return Err(VmError::new(format!(
                            "{} type cannot be inherited.",
                            class_of.name()
                        )));
                    }

                    let index = r.read_short();
                    let derived = self.expect_object(self.constant(r.module, index));
                    let (new_fn, delete_fn) = {
                        let b = self.heap.class(base);
                        (b.new_fn, b.delete_fn)
                    };
                    let d = self.heap.class_mut(derived);
                    d.super_class = Some(base);
                    if d.new_fn.is_none() {
                        d.new_fn = new_fn;
                        d.delete_fn = delete_fn;
                    }
                    self.set_peek(r.fiber, 1, Var::Object(derived));
                }
                Opcode::BIND_METHOD => {
                    let method = self.expect_object(self.peek(r.fiber, 1));
                    let class = self.expect_object(self.peek(r.fiber, 2));
                    let is_ctor =
                        self.heap.function(self.heap.closure(method).function).name == CTOR_NAME;
                    let cls = self.heap.class_mut(class);
                    if is_ctor {
                        cls.ctor = Some(method);
                    }
                    cls.methods.write(method);
                    self.heap.remeasure(class);
                    self.drop_values(r.fiber, 1);
                }

                Opcode::CLOSE_UPVALUE => {
                    let top = self.heap.fiber(r.fiber).stack.len() - 1;
                    self.close_upvalues(r.fiber, top);
                    self.drop_values(r.fiber, 1);
                }
                Opcode::POP => self.drop_values(r.fiber, 1),

                Opcode::IMPORT => {
                    let index = r.read_short();
                    let path = self.constant_string(r.module, index);
                    let path = self.heap.str(path).to_string();
                    let from = self.heap.module(r.module).path.clone();
                    let module = self.import_module(from.as_deref(), &path)?;
                    self.push(r.fiber, Var::Object(module));

                    if !self.heap.module(module).initialized {
                        self.heap.module_mut(module).initialized = true;
                        if let Some(body) = self.heap.module(module).body {
                            self.save_ip(r);
                            let ret = self.heap.fiber(r.fiber).stack.len() - 1;
                            self.push_call_frame(r.fiber, body, ret, Var::Null)?;
                            *r = self.load_registers(r.fiber);
                        }
                    }
                }

                Opcode::SUPER_CALL | Opcode::METHOD_CALL | Opcode::CALL | Opcode::TAIL_CALL => {
                    let argc = r.read_byte();
                    let ret = self.heap.fiber(r.fiber).stack.len() - argc - 1;
                    self.heap.fiber_mut(r.fiber).ret = ret;

                    let (callable, self_) = match op {
                        Opcode::SUPER_CALL => {
                            let name = self.constant_string(r.module, r.read_short());
                            let receiver = self.heap.fiber(r.fiber).stack[ret];
                            let method = self.get_super_method(receiver, name)?;
                            (Var::Object(method), receiver)
                        }
                        Opcode::METHOD_CALL => {
                            let name = self.constant_string(r.module, r.read_short());
                            let receiver = self.heap.fiber(r.fiber).stack[ret];
                            let method = self.get_method(receiver, name)?;
                            (method, receiver)
                        }
                        _ => (self.heap.fiber(r.fiber).stack[ret], Var::Null),
                    };

                    // The receiver stays rooted through the fiber's self
                    // register while its slot awaits the result.
                    self.heap.fiber_mut(r.fiber).self_ = self_;
                    self.heap.fiber_mut(r.fiber).stack[ret] = Var::Null;

                    let tail = op == Opcode::TAIL_CALL;
                    if !self.call_value(r, callable, self_, argc, ret, tail)? {
                        return Ok(());
                    }
                }

                Opcode::ITER_TEST => {
                    let sequence = self.peek(r.fiber, 3);
                    self.check_iterable(sequence)?;
                }
                Opcode::ITER => {
                    let exit = r.read_short();
                    if !self.iterate(r.fiber)? {
                        r.ip += exit;
                    }
                }

                Opcode::JUMP => {
                    let offset = r.read_short();
                    r.ip += offset;
                }
                Opcode::LOOP => {
                    let offset = r.read_short();
                    r.ip -= offset;
                }
                Opcode::JUMP_IF | Opcode::JUMP_IF_NOT => {
                    let offset = r.read_short();
                    let condition = self.pop(r.fiber);
                    if self.heap.to_bool(condition) == (op == Opcode::JUMP_IF) {
                        r.ip += offset;
                    }
                }
                Opcode::OR | Opcode::AND => {
                    let offset = r.read_short();
                    let value = self.peek(r.fiber, 1);
                    if self.heap.to_bool(value) == (op == Opcode::OR) {
                        r.ip += offset;
                    } else {
                        self.drop_values(r.fiber, 1);
                    }
                }

                Opcode::RETURN => {
                    if !self.return_from_frame(r) {
                        return Ok(());
                    }
                }

                Opcode::GET_ATTRIB | Opcode::GET_ATTRIB_KEEP => {
                    let name = self.constant_string(r.module, r.read_short());
                    let on = self.peek(r.fiber, 1);
                    let value = self.get_attrib(on, name)?;
                    if op == Opcode::GET_ATTRIB {
                        self.set_peek(r.fiber, 1, value);
                    } else {
                        self.push(r.fiber, value);
                    }
                }
                Opcode::SET_ATTRIB => {
                    let name = self.constant_string(r.module, r.read_short());
                    let value = self.peek(r.fiber, 1);
                    let on = self.peek(r.fiber, 2);
                    self.set_attrib(on, name, value)?;
                    self.drop_values(r.fiber, 2);
                    self.push(r.fiber, value);
                }

                Opcode::GET_SUBSCRIPT | Opcode::GET_SUBSCRIPT_KEEP => {
                    let key = self.peek(r.fiber, 1);
                    let on = self.peek(r.fiber, 2);
                    let value = self.get_subscript(on, key)?;
                    if op == Opcode::GET_SUBSCRIPT {
                        self.drop_values(r.fiber, 2);
                    }
                    self.push(r.fiber, value);
                }
                Opcode::SET_SUBSCRIPT => {
                    let value = self.peek(r.fiber, 1);
                    let key = self.peek(r.fiber, 2);
                    let on = self.peek(r.fiber, 3);
                    self.set_subscript(on, key, value)?;
                    self.drop_values(r.fiber, 3);
                    self.push(r.fiber, value);
                }

                Opcode::POSITIVE | Opcode::NEGATIVE | Opcode::NOT | Opcode::BIT_NOT => {
                    let value = self.peek(r.fiber, 1);
                    let result = self.unary_op(op, value)?;
                    self.set_peek(r.fiber, 1, result);
                }

                Opcode::ADD
                | Opcode::SUBTRACT
                | Opcode::MULTIPLY
                | Opcode::DIVIDE
                | Opcode::EXPONENT
                | Opcode::MOD
                | Opcode::BIT_AND
                | Opcode::BIT_OR
                | Opcode::BIT_XOR
                | Opcode::BIT_LSHIFT
                | Opcode::BIT_RSHIFT => {
                    let inplace = r.read_byte() != 0;
                    let b = self.peek(r.fiber, 1);
                    let a = self.peek(r.fiber, 2);
                    let result = self.binary_op(op, a, b, inplace)?;
                    self.drop_values(r.fiber, 2);
                    self.push(r.fiber, result);
                }

                Opcode::EQEQ
                | Opcode::NOTEQ
                | Opcode::LT
                | Opcode::LTEQ
                | Opcode::GT
                | Opcode::GTEQ
                | Opcode::RANGE
                | Opcode::IN
                | Opcode::IS => {
                    let b = self.peek(r.fiber, 1);
                    let a = self.peek(r.fiber, 2);
                    let result = self.binary_op(op, a, b, false)?;
                    self.drop_values(r.fiber, 2);
                    self.push(r.fiber, result);
                }

                Opcode::REPL_PRINT => {
                    let value = self.peek(r.fiber, 1);
                    if !value.is_null() {
                        let text = self.to_repr(value)?;
                        self.write_stdout(&text);
                        self.write_stdout("\n");
                    }
                }

                Opcode::END => panic!("executed END of {}", self.frame_function_name(r)),
            }
        }
    }

    /// Pop the current frame, handing its value to the frame below or, after
    /// the last frame, to the fiber's caller. Returns false once the loop
    /// has nothing left to run.
    fn return_from_frame(&mut self, r: &mut Registers) -> bool {
        self.close_upvalues(r.fiber, r.rbp + 1);
        let value = self.pop(r.fiber);

        let f = self.heap.fiber_mut(r.fiber);
        f.frames.pop();
        f.stack.truncate(r.rbp);
        f.stack.push(value);
        if !f.frames.is_empty() {
            *r = self.load_registers(r.fiber);
            return true;
        }

        f.ret = r.rbp;
        f.state = FiberState::Done;
        let caller = f.caller.take();
        tracing::trace!(fiber = ?r.fiber, caller = ?caller, "fiber done");

        match caller {
            None => false,
            Some(caller) => {
                self.fiber = Some(caller);
                let c = self.heap.fiber_mut(caller);
                let ret = c.ret;
                c.stack[ret] = value;
                *r = self.load_registers(caller);
                true
            }
        }
    }

    fn frame_function_name(&self, r: &Registers) -> String {
        let function = self.heap.closure(r.closure).function;
        self.heap.function(function).name.clone()
    }

    /// The handle of an object operand the compiler guarantees.
    pub(crate) fn expect_object(&self, value: Var) -> ObjRef {
        match value {
            Var::Object(r) => r,
            other => panic!("expected an object operand, found {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_recycled() {
        let mut vm = Vm::new(Configuration::default());
        let a = vm.new_handle(Var::Number(1.0));
        assert_eq!(vm.handle_value(&a), Var::Number(1.0));
        vm.release_handle(a);
        let b = vm.new_handle(Var::Bool(true));
        assert_eq!(b, Handle(0));
        assert_eq!(vm.handle_value(&b), Var::Bool(true));
    }

    #[test]
    fn test_run_source_registers_module() {
        let mut vm = Vm::new(Configuration::default());
        let module = vm.run_source("@demo", "x = 40 + 2\n").unwrap();
        assert_eq!(vm.find_module("@demo"), Some(module));
        assert_eq!(vm.get_global(module, "x"), Some(Var::Number(42.0)));
    }

    #[test]
    fn test_host_calls_return_values() {
        let mut vm = Vm::new(Configuration::default());
        let module = vm
            .run_source("@calls", "def add(a, b)\n  return a + b\nend\n")
            .unwrap();
        let add = vm.get_global(module, "add").unwrap().as_object().unwrap();
        let sum = vm
            .call_function(add, &[Var::Number(2.0), Var::Number(3.0)])
            .unwrap();
        assert_eq!(sum, Var::Number(5.0));
    }

    #[test]
    fn test_runtime_error_is_returned() {
        let mut vm = Vm::new(Configuration {
            stderr_write: None,
            ..Configuration::default()
        });
        let err = vm.run_source("@err", "x = null + 1\n").unwrap_err();
        let runtime = err.as_runtime().unwrap();
        assert_eq!(
            runtime.message,
            "Unsupported operand types for operator '+' Null and Number"
        );
        assert_eq!(runtime.trace.len(), 1);
        assert_eq!(runtime.trace[0].line, 1);
    }
}
