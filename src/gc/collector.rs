//! Root marking, collection triggers and temporary roots.

use std::ops::{Deref, DerefMut};
use std::time::Instant;

use crate::value::Object;
use crate::vm::Vm;

use super::ObjRef;

/// Depth of the temporary root stack.
pub const MAX_TEMP_REFERENCES: usize = 64;

impl Vm {
    /// Run a full collection now. Returns the number of bytes freed.
    pub fn collect_garbage(&mut self) -> usize {
        self.collect_with(&[])
    }

    /// Collect, treating `extra` as additional roots. Used by allocation to
    /// keep the children of the object being inserted alive.
    pub(crate) fn collect_with(&mut self, extra: &[ObjRef]) -> usize {
        let started = Instant::now();
        let before = self.heap.bytes_allocated();

        self.heap.begin_marking();
        self.mark_roots();
        for r in extra {
            self.heap.mark(*r);
        }
        self.heap.trace_gray();
        let freed = self.heap.sweep(started);

        let stats = self.heap.stats();
        tracing::debug!(
            before,
            freed,
            live_objects = stats.live_objects,
            live_bytes = stats.live_bytes,
            next_gc = self.heap.next_gc(),
            pause_us = stats.last_pause.as_micros() as u64,
            "gc cycle"
        );
        freed
    }

    fn mark_roots(&mut self) {
        let heap = &mut self.heap;

        for r in self.builtin_fns.iter().chain(self.builtin_classes.iter()) {
            heap.mark(*r);
        }
        for r in self.modules.values() {
            heap.mark(*r);
        }
        for r in self.temp_refs.iter() {
            heap.mark(*r);
        }
        for v in self.handles.iter().flatten() {
            heap.mark_var(*v);
        }
        for r in self.compiling.iter() {
            heap.mark(*r);
        }
        if let Some(fiber) = self.fiber {
            heap.mark(fiber);
        }
    }

    /// Move `object` into the heap, collecting first if it would pass the
    /// threshold.
    pub(crate) fn allocate(&mut self, object: Object) -> ObjRef {
        let size = object.size();
        if self.heap.should_collect(size) {
            let mut children = Vec::new();
            object.trace(&mut children);
            self.collect_with(&children);
        }
        self.heap.insert(object)
    }

    /// Root `r` until the returned guard drops. Guards nest in LIFO order.
    pub fn protect(&mut self, r: ObjRef) -> Protected<'_> {
        debug_assert!(
            self.temp_refs.len() < MAX_TEMP_REFERENCES,
            "Too many temp references"
        );
        self.temp_refs.push(r);
        Protected { vm: self }
    }
}

/// A temporary GC root. Derefs to the VM so work can continue through it.
pub struct Protected<'a> {
    vm: &'a mut Vm,
}

impl Deref for Protected<'_> {
    type Target = Vm;

    fn deref(&self) -> &Vm {
        self.vm
    }
}

impl DerefMut for Protected<'_> {
    fn deref_mut(&mut self) -> &mut Vm {
        self.vm
    }
}

impl Drop for Protected<'_> {
    fn drop(&mut self) {
        self.vm.temp_refs.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::value::{List, PkString, Var};

    fn string(vm: &mut Vm, text: &str) -> ObjRef {
        vm.allocate(Object::String(PkString::new(text.to_string())))
    }

    #[test]
    fn test_protected_objects_survive_collection() {
        let mut vm = Vm::new(Configuration::default());
        let kept = string(&mut vm, "kept");
        let lost = string(&mut vm, "lost");
        {
            let mut guard = vm.protect(kept);
            guard.collect_garbage();
        }
        assert!(vm.heap.contains(kept));
        assert!(!vm.heap.contains(lost));
        assert!(vm.temp_refs.is_empty());
    }

    #[test]
    fn test_allocation_keeps_children_of_new_object() {
        let mut vm = Vm::new(Configuration::stress_gc());
        let inner = string(&mut vm, "inner");
        let list = vm.allocate(Object::List(List::new(vec![Var::Object(inner)].into())));
        let _guard = vm.protect(list);
        assert!(_guard.heap.contains(inner));
    }

    #[test]
    fn test_accounting_matches_live_objects_after_collection() {
        let mut vm = Vm::new(Configuration::default());
        for i in 0..100 {
            string(&mut vm, &format!("garbage {}", i));
        }
        vm.collect_garbage();
        assert_eq!(vm.heap.bytes_allocated(), vm.heap.measure_live_bytes());
        assert!(vm.heap.stats().objects_freed >= 100);
    }

    #[test]
    fn test_handles_are_roots() {
        let mut vm = Vm::new(Configuration::default());
        let r = string(&mut vm, "held");
        let handle = vm.new_handle(Var::Object(r));
        vm.collect_garbage();
        assert!(vm.heap.contains(r));
        vm.release_handle(handle);
        vm.collect_garbage();
        assert!(!vm.heap.contains(r));
    }
}
