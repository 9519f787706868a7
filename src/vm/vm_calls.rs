//! Function call dispatch for the VM.

use crate::error::VmError;
use crate::gc::ObjRef;
use crate::value::{FnKind, NativeFn, Object, Var, ARITY_VARIADIC};

use super::fiber::{CallFrame, FiberState};
use super::vm::{Registers, Vm};

impl Vm {
    /// Call `callable` with the `argc` arguments above the `ret` slot.
    /// Returns false when the call suspended the last running fiber.
    pub(crate) fn call_value(
        &mut self,
        r: &mut Registers,
        callable: Var,
        mut self_: Var,
        argc: usize,
        ret: usize,
        tail: bool,
    ) -> Result<bool, VmError> {
        let closure = match callable {
            Var::Object(c) => match self.heap.get(c) {
                Object::Closure(_) => c,
                Object::MethodBind(mb) => match mb.instance {
                    Some(instance) => {
                        let method = mb.method;
                        self_ = instance;
                        self.heap.fiber_mut(r.fiber).self_ = instance;
                        method
                    }
                    None => return Err(VmError::new("Cannot call an unbound method.")),
                },
                Object::Class(_) => {
                    self_ = self.pre_construct_self(c)?;
                    let f = self.heap.fiber_mut(r.fiber);
                    f.self_ = self_;
                    f.stack[ret] = self_;

                    match self.constructor_of(c) {
                        Some(ctor) => ctor,
                        None => {
                            if argc != 0 {
                                return Err(VmError::new(format!(
                                    "Expected exactly 0 argument(s) for constructor {}.",
                                    self.heap.class(c).name
                                )));
                            }
                            let f = self.heap.fiber_mut(r.fiber);
                            f.self_ = Var::Null;
                            f.stack.truncate(ret + 1);
                            return Ok(true);
                        }
                    }
                }
                _ => return Err(self.not_callable(callable)),
            },
            _ => return Err(self.not_callable(callable)),
        };

        let function = self.heap.function(self.heap.closure(closure).function);
        if function.arity != ARITY_VARIADIC && function.arity != argc as i32 {
            return Err(VmError::new(format!(
                "Expected exactly {} argument(s) for function {}",
                function.arity, function.name
            )));
        }

        if let FnKind::Native(native) = function.kind {
            return self.call_native(r, native, self_);
        }

        if tail {
            self.reuse_call_frame(r.fiber, closure, argc)?;
        } else {
            self.save_ip(r);
            self.push_call_frame(r.fiber, closure, ret, self_)?;
        }
        *r = self.load_registers(r.fiber);
        Ok(true)
    }

    fn not_callable(&self, callable: Var) -> VmError {
        VmError::new(format!(
            "Expected a callable to call, instead got '{}'.",
            self.heap.type_name(callable)
        ))
    }

    /// The first constructor found up the super chain of `class`.
    pub(crate) fn constructor_of(&self, class: ObjRef) -> Option<ObjRef> {
        let mut current = Some(class);
        while let Some(c) = current {
            let cls = self.heap.class(c);
            if cls.ctor.is_some() {
                return cls.ctor;
            }
            current = cls.super_class;
        }
        None
    }

    /// Run a native with the arguments above the fiber's `ret` slot, which
    /// receives its result.
    fn call_native(
        &mut self,
        r: &mut Registers,
        native: NativeFn,
        self_: Var,
    ) -> Result<bool, VmError> {
        self.save_ip(r);
        let fiber = r.fiber;
        let args = {
            let f = self.heap.fiber(fiber);
            f.stack[f.ret + 1..].to_vec()
        };

        let result = native(self, self_, &args);
        self.heap.fiber_mut(fiber).self_ = Var::Null;
        let value = result?;

        // Fiber switches leave their own value in the return slot.
        let switched = self.fiber != Some(fiber);
        let f = self.heap.fiber_mut(fiber);
        let ret = f.ret;
        f.stack.truncate(ret + 1);
        if !switched {
            f.stack[ret] = value;
        }

        match self.fiber {
            None => Ok(false),
            Some(current) => {
                if current != fiber {
                    *r = self.load_registers(current);
                }
                Ok(true)
            }
        }
    }

    /// Push a frame for the scripted `closure` whose return slot is `rbp`.
    pub(crate) fn push_call_frame(
        &mut self,
        fiber: ObjRef,
        closure: ObjRef,
        rbp: usize,
        self_: Var,
    ) -> Result<(), VmError> {
        let stack_size = self.script_stack_size(closure);
        let needed = self.heap.fiber(fiber).stack.len() + stack_size + 1;
        self.ensure_stack(fiber, needed)?;

        let f = self.heap.fiber_mut(fiber);
        let capacity = f.frames.capacity();
        f.frames.push(CallFrame {
            closure,
            ip: 0,
            rbp,
            self_,
        });
        f.self_ = Var::Null;
        if f.frames.capacity() != capacity {
            self.heap.remeasure(fiber);
        }
        Ok(())
    }

    /// Replace the current frame with a call of `closure`, moving its
    /// arguments down to the frame base.
    fn reuse_call_frame(
        &mut self,
        fiber: ObjRef,
        closure: ObjRef,
        argc: usize,
    ) -> Result<(), VmError> {
        let rbp = match self.heap.fiber(fiber).frames.last() {
            Some(frame) => frame.rbp,
            None => panic!("tail call without a frame"),
        };
        self.close_upvalues(fiber, rbp + 1);

        let f = self.heap.fiber_mut(fiber);
        let self_ = f.self_;
        f.self_ = Var::Null;
        let first_arg = f.stack.len() - argc;
        f.stack.copy_within(first_arg.., rbp + 1);
        f.stack.truncate(rbp + 1 + argc);
        f.stack[rbp] = Var::Null;
        if let Some(frame) = f.frames.last_mut() {
            frame.closure = closure;
            frame.ip = 0;
            frame.self_ = self_;
        }

        let stack_size = self.script_stack_size(closure);
        self.ensure_stack(fiber, rbp + 1 + stack_size)
    }

    fn script_stack_size(&self, closure: ObjRef) -> usize {
        let function = self.heap.function(self.heap.closure(closure).function);
        function.code().map_or(0, |code| code.stack_size)
    }

    /// The native function of a fiber's closure, if it has one.
    pub(crate) fn fiber_native(&self, fiber: ObjRef) -> Option<NativeFn> {
        let closure = self.heap.fiber(fiber).closure;
        match self.heap.function(self.heap.closure(closure).function).kind {
            FnKind::Native(native) => Some(native),
            FnKind::Script(_) => None,
        }
    }

    /// Run a prepared fiber whose closure is native. It completes in one go.
    pub(crate) fn run_native_fiber(
        &mut self,
        fiber: ObjRef,
        native: NativeFn,
    ) -> Result<Var, VmError> {
        let last = self.fiber;
        let (self_, args) = {
            let f = self.heap.fiber_mut(fiber);
            f.state = FiberState::Running;
            let self_ = f.self_;
            f.self_ = Var::Null;
            (self_, f.stack[1..].to_vec())
        };
        self.fiber = Some(fiber);
        let result = native(self, self_, &args);
        self.fiber = last;

        let f = self.heap.fiber_mut(fiber);
        f.state = FiberState::Done;
        f.stack.truncate(1);
        f.ret = 0;
        match result {
            Ok(value) => {
                f.stack[0] = value;
                Ok(value)
            }
            Err(err) => {
                if let VmError::Runtime(runtime) = &err {
                    f.error = Some(runtime.message.clone());
                }
                Err(err)
            }
        }
    }

    /// Call `closure` on a fresh fiber and wait for its result. Used by
    /// natives and the host to call back into scripts.
    pub(crate) fn call_closure(
        &mut self,
        self_: Var,
        closure: ObjRef,
        args: &[Var],
    ) -> Result<Var, VmError> {
        let fiber = self.new_fiber(closure);
        let mut vm = self.protect(fiber);
        let last = vm.fiber;
        {
            let f = vm.heap.fiber_mut(fiber);
            f.self_ = self_;
            f.native = last;
        }
        vm.prepare_fiber(fiber, args)?;

        let result = match vm.fiber_native(fiber) {
            Some(native) => vm.run_native_fiber(fiber, native).map(|_| ()),
            None => vm.execute(fiber),
        };
        vm.fiber = last;
        result?;
        Ok(vm.heap.fiber(fiber).result())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    fn global(vm: &Vm, module: ObjRef, name: &str) -> ObjRef {
        vm.get_global(module, name).unwrap().as_object().unwrap()
    }

    #[test]
    fn test_tail_calls_run_in_constant_frames() {
        let mut vm = Vm::new(Configuration {
            max_stack_size: 1024,
            ..Configuration::default()
        });
        let source = "\
def count(n, acc)
  if n == 0 then return acc end
  return count(n - 1, acc + 1)
end
";
        let module = vm.run_source("@tail", source).unwrap();
        let count = global(&vm, module, "count");
        let result = vm
            .call_function(count, &[Var::Number(5000.0), Var::Number(0.0)])
            .unwrap();
        assert_eq!(result, Var::Number(5000.0));
    }

    #[test]
    fn test_native_closures_are_callable_from_host() {
        let mut vm = Vm::new(Configuration::default());
        let module = vm.run_source("@n", "f = str\n").unwrap();
        let f = global(&vm, module, "f");
        let result = vm.call_function(f, &[Var::Number(12.0)]).unwrap();
        assert_eq!(vm.heap.display(result), "12");
    }

    #[test]
    fn test_unbound_method_call_fails() {
        let mut vm = Vm::new(Configuration {
            stderr_write: None,
            ..Configuration::default()
        });
        let source = "\
class A
  def f() return 1 end
end
m = A.f
m()
";
        let err = vm.run_source("@unbound", source).unwrap_err();
        assert_eq!(
            err.as_runtime().unwrap().message,
            "Cannot call an unbound method."
        );
    }

    #[test]
    fn test_class_without_constructor_takes_no_arguments() {
        let mut vm = Vm::new(Configuration {
            stderr_write: None,
            ..Configuration::default()
        });
        let err = vm.run_source("@ctor", "class P end\np = P(1)\n").unwrap_err();
        assert_eq!(
            err.as_runtime().unwrap().message,
            "Expected exactly 0 argument(s) for constructor P."
        );
    }
}
