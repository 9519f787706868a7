//! Fibers: stackful coroutines with explicit run/yield/resume transfer.
//!
//! A fiber owns its value stack and call frames. Exactly one fiber runs at a
//! time; `caller` links the fiber that ran or resumed it, `native` links the
//! fiber that was running when a host or native call created it.

use crate::error::VmError;
use crate::gc::ObjRef;
use crate::value::buffer::power_of_two_ceil;
use crate::value::{Object, Var, ARITY_VARIADIC};

use super::Vm;

/// Minimum slot count of a new fiber's stack.
pub const MIN_STACK_SIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    New,
    Running,
    Yielded,
    Done,
}

impl FiberState {
    pub fn name(&self) -> &'static str {
        match self {
            FiberState::New => "new",
            FiberState::Running => "running",
            FiberState::Yielded => "yielded",
            FiberState::Done => "done",
        }
    }
}

/// One activation of a scripted function.
#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    pub closure: ObjRef,
    /// Offset of the next instruction.
    pub ip: usize,
    /// Stack index of the return slot; locals start right above it.
    pub rbp: usize,
    pub self_: Var,
}

#[derive(Debug)]
pub struct Fiber {
    pub state: FiberState,
    pub closure: ObjRef,
    /// The value stack; its length is the stack pointer.
    pub stack: Vec<Var>,
    pub frames: Vec<CallFrame>,
    /// Open upvalues as `(slot, upvalue)`, sorted by descending slot.
    pub open_upvalues: Vec<(usize, ObjRef)>,
    /// `self` for the next frame pushed.
    pub self_: Var,
    pub caller: Option<ObjRef>,
    pub native: Option<ObjRef>,
    pub error: Option<String>,
    /// Slot receiving the value of the call in progress.
    pub ret: usize,
}

impl Fiber {
    pub fn is_done(&self) -> bool {
        self.state == FiberState::Done
    }

    /// The value the fiber returned, or the last value it yielded.
    pub fn result(&self) -> Var {
        self.stack.get(self.ret).copied().unwrap_or(Var::Null)
    }

    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        out.push(self.closure);
        for v in &self.stack {
            if let Var::Object(r) = v {
                out.push(*r);
            }
        }
        for frame in &self.frames {
            out.push(frame.closure);
            if let Var::Object(r) = frame.self_ {
                out.push(r);
            }
        }
        out.extend(self.open_upvalues.iter().map(|(_, upvalue)| *upvalue));
        if let Var::Object(r) = self.self_ {
            out.push(r);
        }
        out.extend(self.caller);
        out.extend(self.native);
    }
}

impl Vm {
    /// A new fiber that will run `closure`. The return slot is pushed and a
    /// scripted closure gets its first frame.
    pub fn new_fiber(&mut self, closure: ObjRef) -> ObjRef {
        let function = self.heap.closure(closure).function;
        let stack_size = self
            .heap
            .function(function)
            .code()
            .map(|code| code.stack_size);

        let mut stack = match stack_size {
            Some(size) => Vec::with_capacity(power_of_two_ceil(size + 1).max(MIN_STACK_SIZE)),
            None => Vec::with_capacity(MIN_STACK_SIZE),
        };
        stack.push(Var::Null);

        let frames = match stack_size {
            Some(_) => vec![CallFrame {
                closure,
                ip: 0,
                rbp: 0,
                self_: Var::Null,
            }],
            None => Vec::new(),
        };

        self.allocate(Object::Fiber(Box::new(Fiber {
            state: FiberState::New,
            closure,
            stack,
            frames,
            open_upvalues: Vec::new(),
            self_: Var::Null,
            caller: None,
            native: None,
            error: None,
            ret: 0,
        })))
    }

    /// Check the arity and state of a new fiber and pass its arguments.
    pub(crate) fn prepare_fiber(&mut self, fiber: ObjRef, args: &[Var]) -> Result<(), VmError> {
        let closure = self.heap.fiber(fiber).closure;
        let function = self.heap.function(self.heap.closure(closure).function);
        debug_assert!(function.arity >= ARITY_VARIADIC, "function arity not resolved");

        if function.arity != ARITY_VARIADIC && args.len() as i32 != function.arity {
            return Err(VmError::new(format!(
                "Expected exactly {} argument(s) for function {}.",
                function.arity, function.name
            )));
        }
        let is_native = function.is_native();

        match self.heap.fiber(fiber).state {
            FiberState::New => {}
            FiberState::Running => {
                return Err(VmError::new("The fiber has already been running."))
            }
            FiberState::Yielded => {
                return Err(VmError::new(
                    "Cannot run a fiber which is yielded, use fiber_resume() instead.",
                ))
            }
            FiberState::Done => return Err(VmError::new("The fiber has done running.")),
        }

        self.ensure_stack(fiber, 1 + args.len())?;
        let f = self.heap.fiber_mut(fiber);
        debug_assert!(f.stack.len() == 1 && f.ret == 0);
        f.stack.extend_from_slice(args);

        if !is_native {
            f.frames[0].self_ = f.self_;
            f.self_ = Var::Null;
        }
        Ok(())
    }

    /// Resume a yielded fiber: `value` becomes the result of its `yield()`
    /// and the current fiber becomes its caller.
    pub(crate) fn switch_fiber(&mut self, fiber: ObjRef, value: Var) -> Result<(), VmError> {
        match self.heap.fiber(fiber).state {
            FiberState::Yielded => {}
            FiberState::New => {
                return Err(VmError::new(
                    "The fiber hasn't started. call fiber_run() to start.",
                ))
            }
            FiberState::Running => {
                return Err(VmError::new("The fiber has already been running."))
            }
            FiberState::Done => return Err(VmError::new("The fiber has done running.")),
        }

        let caller = self.fiber;
        let f = self.heap.fiber_mut(fiber);
        debug_assert!(!f.frames.is_empty());
        let ret = f.ret;
        f.stack[ret] = value;
        f.caller = caller;
        self.fiber = Some(fiber);
        tracing::trace!(fiber = ?fiber, caller = ?caller, "fiber resumed");
        Ok(())
    }

    /// Suspend the current fiber and hand `value` to its caller, if any.
    /// Without a caller the value stays in the fiber's return slot.
    pub(crate) fn yield_fiber(&mut self, value: Var) {
        let Some(current) = self.fiber else {
            return;
        };
        let caller = self.heap.fiber(current).caller;
        match caller {
            Some(caller) => {
                let c = self.heap.fiber_mut(caller);
                let ret = c.ret;
                c.stack[ret] = value;
            }
            None => {
                let f = self.heap.fiber_mut(current);
                let ret = f.ret;
                f.stack[ret] = value;
            }
        }

        let f = self.heap.fiber_mut(current);
        f.caller = None;
        f.state = FiberState::Yielded;
        self.fiber = caller;
        tracing::trace!(fiber = ?current, caller = ?caller, "fiber yielded");
    }

    /// Make room for `needed` slots on the fiber's stack, doubling the
    /// capacity up to the configured maximum.
    pub(crate) fn ensure_stack(&mut self, fiber: ObjRef, needed: usize) -> Result<(), VmError> {
        if needed > self.config.max_stack_size {
            return Err(VmError::new("Maximum stack limit reached."));
        }
        let f = self.heap.fiber_mut(fiber);
        if needed <= f.stack.capacity() {
            return Ok(());
        }
        let target = power_of_two_ceil(needed).min(self.config.max_stack_size);
        let additional = target - f.stack.len();
        f.stack.reserve_exact(additional);
        self.heap.remeasure(fiber);
        Ok(())
    }

    /// Mark `fiber` as running and link it under the current fiber.
    pub(crate) fn start_fiber(&mut self, fiber: ObjRef) {
        let caller = self.fiber;
        let f = self.heap.fiber_mut(fiber);
        f.caller = caller;
        f.state = FiberState::Running;
        self.fiber = Some(fiber);
        tracing::trace!(fiber = ?fiber, caller = ?caller, "fiber started");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    fn fiber_of(vm: &mut Vm, source: &str) -> ObjRef {
        vm.run_source("@test", source).unwrap();
        let main = vm.find_module("@test").unwrap();
        let closure = vm.get_global(main, "f").unwrap().as_object().unwrap();
        vm.new_fiber(closure)
    }

    #[test]
    fn test_new_fiber_has_return_slot_and_frame() {
        let mut vm = Vm::new(Configuration::default());
        let fiber = fiber_of(&mut vm, "def f(a, b) return a + b end\n");
        let f = vm.heap.fiber(fiber);
        assert_eq!(f.state, FiberState::New);
        assert_eq!(f.stack.len(), 1);
        assert_eq!(f.frames.len(), 1);
        assert!(f.stack.capacity() >= MIN_STACK_SIZE);
    }

    #[test]
    fn test_prepare_checks_arity() {
        let mut vm = Vm::new(Configuration::default());
        let fiber = fiber_of(&mut vm, "def f(a, b) return a + b end\n");
        let err = vm.prepare_fiber(fiber, &[Var::Number(1.0)]).unwrap_err();
        assert_eq!(
            err.message(),
            "Expected exactly 2 argument(s) for function f."
        );
        vm.prepare_fiber(fiber, &[Var::Number(1.0), Var::Number(2.0)])
            .unwrap();
        assert_eq!(vm.heap.fiber(fiber).stack.len(), 3);
    }

    #[test]
    fn test_switch_rejects_new_and_done_fibers() {
        let mut vm = Vm::new(Configuration::default());
        let fiber = fiber_of(&mut vm, "def f() end\n");
        let err = vm.switch_fiber(fiber, Var::Null).unwrap_err();
        assert_eq!(
            err.message(),
            "The fiber hasn't started. call fiber_run() to start."
        );
        vm.heap.fiber_mut(fiber).state = FiberState::Done;
        let err = vm.switch_fiber(fiber, Var::Null).unwrap_err();
        assert_eq!(err.message(), "The fiber has done running.");
    }

    #[test]
    fn test_stack_limit() {
        let mut vm = Vm::new(Configuration {
            max_stack_size: 256,
            ..Configuration::default()
        });
        let fiber = fiber_of(&mut vm, "def f() end\n");
        assert!(vm.ensure_stack(fiber, 200).is_ok());
        let err = vm.ensure_stack(fiber, 257).unwrap_err();
        assert_eq!(err.message(), "Maximum stack limit reached.");
    }
}
