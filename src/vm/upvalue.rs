//! Capturing and closing upvalues.
//!
//! While the variable is still on its fiber's stack the upvalue is open and
//! aliases the stack slot. Once the slot is about to be popped the upvalue
//! is closed and keeps its own copy of the value.

use crate::gc::ObjRef;
use crate::value::{Object, Upvalue, Var};

use super::Vm;

impl Vm {
    /// The open upvalue for `slot` of `fiber`, created if not captured yet.
    /// Two closures capturing one local share one upvalue.
    pub(crate) fn capture_upvalue(&mut self, fiber: ObjRef, slot: usize) -> ObjRef {
        let open = &self.heap.fiber(fiber).open_upvalues;

        // Sorted by descending slot.
        let mut at = 0;
        while at < open.len() && open[at].0 > slot {
            at += 1;
        }
        if at < open.len() && open[at].0 == slot {
            return open[at].1;
        }

        let upvalue = self.allocate(Object::Upvalue(Upvalue::Open { fiber, slot }));
        self.heap
            .fiber_mut(fiber)
            .open_upvalues
            .insert(at, (slot, upvalue));
        self.heap.remeasure(fiber);
        upvalue
    }

    /// Close every open upvalue of `fiber` at `from` or above.
    pub(crate) fn close_upvalues(&mut self, fiber: ObjRef, from: usize) {
        loop {
            let f = self.heap.fiber_mut(fiber);
            let Some(&(slot, upvalue)) = f.open_upvalues.first() else {
                break;
            };
            if slot < from {
                break;
            }
            let value = f.stack[slot];
            f.open_upvalues.remove(0);
            *self.heap.upvalue_mut(upvalue) = Upvalue::Closed(value);
        }
    }

    pub(crate) fn read_upvalue(&self, upvalue: ObjRef) -> Var {
        match *self.heap.upvalue(upvalue) {
            Upvalue::Open { fiber, slot } => self.heap.fiber(fiber).stack[slot],
            Upvalue::Closed(value) => value,
        }
    }

    pub(crate) fn write_upvalue(&mut self, upvalue: ObjRef, value: Var) {
        match *self.heap.upvalue(upvalue) {
            Upvalue::Open { fiber, slot } => self.heap.fiber_mut(fiber).stack[slot] = value,
            Upvalue::Closed(_) => *self.heap.upvalue_mut(upvalue) = Upvalue::Closed(value),
        }
    }
}
