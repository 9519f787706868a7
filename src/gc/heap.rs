//! The object arena: slots, handles and byte accounting.

use std::fmt;
use std::time::{Duration, Instant};

use crate::value::{
    Class, Closure, Function, Instance, List, MethodBind, Module, NativePayload, Object, PkString,
    Range, Upvalue, VarMap,
};
use crate::vm::fiber::Fiber;

/// A handle to a heap object. Handles stay valid while the object is
/// reachable; the generation catches use of a recycled slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef {
    index: u32,
    generation: u32,
}

impl ObjRef {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Identity bits, for hashing and display.
    pub fn bits(&self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Garbage collector statistics.
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collections.
    pub collections: usize,
    /// Total objects freed.
    pub objects_freed: usize,
    /// Total bytes freed.
    pub bytes_freed: usize,
    /// Duration of the last collection.
    pub last_pause: Duration,
    /// Total time spent collecting.
    pub total_pause: Duration,
    /// Objects alive after the last collection.
    pub live_objects: usize,
    /// Bytes alive after the last collection.
    pub live_bytes: usize,
}

struct Slot {
    object: Option<Object>,
    marked: bool,
    /// Bytes accounted for the object at its last measurement.
    size: usize,
    generation: u32,
}

/// Mark-sweep heap. Objects live in slots addressed by [`ObjRef`]; freed
/// slots are recycled through a free list.
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,

    pub(crate) bytes_allocated: usize,
    pub(crate) next_gc: usize,
    min_heap_size: usize,
    heap_fill_percent: usize,

    /// Set while marking; allocation is forbidden then.
    marking: bool,
    /// Marked objects whose children haven't been marked yet.
    gray: Vec<ObjRef>,

    stats: GcStats,
}

macro_rules! typed_accessors {
    ($($get:ident, $get_mut:ident => $variant:ident($ty:ty);)*) => {
        $(
            pub fn $get(&self, r: ObjRef) -> &$ty {
                match self.get(r) {
                    Object::$variant(obj) => obj,
                    other => panic!(
                        concat!("expected ", stringify!($variant), " object, found {}"),
                        other.type_name()
                    ),
                }
            }

            pub fn $get_mut(&mut self, r: ObjRef) -> &mut $ty {
                match self.get_mut(r) {
                    Object::$variant(obj) => obj,
                    other => panic!(
                        concat!("expected ", stringify!($variant), " object, found {}"),
                        other.type_name()
                    ),
                }
            }
        )*
    };
}

impl Heap {
    pub fn new(initial_heap_size: usize, min_heap_size: usize, heap_fill_percent: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            bytes_allocated: 0,
            next_gc: initial_heap_size,
            min_heap_size,
            heap_fill_percent,
            marking: false,
            gray: Vec::new(),
            stats: GcStats::default(),
        }
    }

    /// Place an object in the arena. Never collects; see `Vm::allocate`.
    pub fn insert(&mut self, object: Object) -> ObjRef {
        debug_assert!(
            !self.marking,
            "No new allocation is allowed while garbage collection is running."
        );

        let size = object.size();
        self.bytes_allocated += size;
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.object = Some(object);
            slot.marked = false;
            slot.size = size;
            return ObjRef::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            object: Some(object),
            marked: false,
            size,
            generation: 0,
        });
        ObjRef::new(index, 0)
    }

    /// Whether allocating `incoming` more bytes passes the threshold.
    pub fn should_collect(&self, incoming: usize) -> bool {
        self.bytes_allocated + incoming > self.next_gc
    }

    /// Re-account an object after it grew or shrank in place.
    pub fn remeasure(&mut self, r: ObjRef) {
        let size = self.get(r).size();
        let slot = &mut self.slots[r.index()];
        self.bytes_allocated = (self.bytes_allocated + size).saturating_sub(slot.size);
        slot.size = size;
    }

    pub fn contains(&self, r: ObjRef) -> bool {
        matches!(
            self.slots.get(r.index()),
            Some(Slot { object: Some(_), generation, .. }) if *generation == r.generation
        )
    }

    pub fn get(&self, r: ObjRef) -> &Object {
        match self.slots.get(r.index()) {
            Some(Slot {
                object: Some(object),
                generation,
                ..
            }) if *generation == r.generation => object,
            _ => panic!("use of a collected object {:?}", r),
        }
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Object {
        match self.slots.get_mut(r.index()) {
            Some(Slot {
                object: Some(object),
                generation,
                ..
            }) if *generation == r.generation => object,
            _ => panic!("use of a collected object {:?}", r),
        }
    }

    typed_accessors! {
        string, string_mut => String(PkString);
        list, list_mut => List(List);
        map, map_mut => Map(VarMap);
        range, range_mut => Range(Range);
        module, module_mut => Module(Module);
        function, function_mut => Function(Function);
        closure, closure_mut => Closure(Closure);
        method_bind, method_bind_mut => MethodBind(MethodBind);
        upvalue, upvalue_mut => Upvalue(Upvalue);
        class, class_mut => Class(Class);
        instance, instance_mut => Instance(Instance);
    }

    pub fn fiber(&self, r: ObjRef) -> &Fiber {
        match self.get(r) {
            Object::Fiber(fiber) => fiber.as_ref(),
            other => panic!("expected Fiber object, found {}", other.type_name()),
        }
    }

    pub fn fiber_mut(&mut self, r: ObjRef) -> &mut Fiber {
        match self.get_mut(r) {
            Object::Fiber(fiber) => fiber.as_mut(),
            other => panic!("expected Fiber object, found {}", other.type_name()),
        }
    }

    /// Text of a string object.
    pub fn str(&self, r: ObjRef) -> &str {
        self.string(r).as_str()
    }

    /// Run `f` on a map stored in the heap. The map is moved out for the
    /// duration, so `f` may read other objects through the heap.
    pub fn with_map<R>(&mut self, r: ObjRef, f: impl FnOnce(&mut VarMap, &Heap) -> R) -> R {
        let mut map = std::mem::take(self.map_mut(r));
        let result = f(&mut map, self);
        *self.map_mut(r) = map;
        self.remeasure(r);
        result
    }

    /// Same as [`Heap::with_map`] for an instance's attribute map.
    pub fn with_attribs<R>(&mut self, r: ObjRef, f: impl FnOnce(&mut VarMap, &Heap) -> R) -> R {
        let mut map = std::mem::take(&mut self.instance_mut(r).attribs);
        let result = f(&mut map, self);
        self.instance_mut(r).attribs = map;
        self.remeasure(r);
        result
    }

    /// Same as [`Heap::with_map`] for a class's static attributes.
    pub fn with_statics<R>(&mut self, r: ObjRef, f: impl FnOnce(&mut VarMap, &Heap) -> R) -> R {
        let mut map = std::mem::take(&mut self.class_mut(r).static_attribs);
        let result = f(&mut map, self);
        self.class_mut(r).static_attribs = map;
        self.remeasure(r);
        result
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    pub fn live_objects(&self) -> usize {
        self.live
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Sum of the sizes of every live object, measured now.
    pub fn measure_live_bytes(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.object.as_ref())
            .map(Object::size)
            .sum()
    }

    pub(crate) fn begin_marking(&mut self) {
        debug_assert!(self.gray.is_empty());
        self.marking = true;
    }

    pub(crate) fn mark(&mut self, r: ObjRef) {
        let Some(slot) = self.slots.get_mut(r.index()) else {
            return;
        };
        if slot.generation != r.generation || slot.object.is_none() || slot.marked {
            return;
        }
        slot.marked = true;
        self.gray.push(r);
    }

    pub(crate) fn mark_var(&mut self, v: crate::value::Var) {
        if let crate::value::Var::Object(r) = v {
            self.mark(r);
        }
    }

    /// Blacken the gray list until no marked object has unmarked children.
    pub(crate) fn trace_gray(&mut self) {
        let mut children = Vec::new();
        while let Some(r) = self.gray.pop() {
            children.clear();
            self.get(r).trace(&mut children);
            for child in children.iter() {
                self.mark(*child);
            }
        }
    }

    /// Free every unmarked object, clear the marks, and recompute the
    /// accounting from the survivors. Returns the bytes freed.
    pub(crate) fn sweep(&mut self, started: Instant) -> usize {
        let before = self.bytes_allocated;

        // Native payloads are handed to their class's delete callback, which
        // has to be looked up before the class itself may be freed.
        let mut releases: Vec<(fn(NativePayload), NativePayload)> = Vec::new();
        for index in 0..self.slots.len() {
            let slot = &self.slots[index];
            if slot.marked {
                continue;
            }
            let Some(Object::Instance(inst)) = &slot.object else {
                continue;
            };
            if inst.native.is_none() {
                continue;
            }
            let Some(delete_fn) = self.class(inst.class).delete_fn else {
                continue;
            };
            if let Some(Object::Instance(inst)) = &mut self.slots[index].object {
                if let Some(payload) = inst.native.take() {
                    releases.push((delete_fn, payload));
                }
            }
        }

        let mut freed_objects = 0;
        let mut live_bytes = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
                if let Some(object) = &slot.object {
                    slot.size = object.size();
                }
                live_bytes += slot.size;
            } else {
                slot.object = None;
                slot.size = 0;
                self.free.push(index as u32);
                freed_objects += 1;
            }
        }
        self.marking = false;

        for (delete_fn, payload) in releases {
            delete_fn(payload);
        }

        self.live -= freed_objects;
        self.bytes_allocated = live_bytes;
        self.next_gc = live_bytes + live_bytes * self.heap_fill_percent / 100;
        if self.next_gc < self.min_heap_size {
            self.next_gc = self.min_heap_size;
        }

        let pause = started.elapsed();
        let freed_bytes = before.saturating_sub(live_bytes);
        self.stats.collections += 1;
        self.stats.objects_freed += freed_objects;
        self.stats.bytes_freed += freed_bytes;
        self.stats.last_pause = pause;
        self.stats.total_pause += pause;
        self.stats.live_objects = self.live;
        self.stats.live_bytes = live_bytes;

        freed_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Var;

    fn string(text: &str) -> Object {
        Object::String(PkString::new(text.to_string()))
    }

    #[test]
    fn test_insert_accounts_bytes() {
        let mut heap = Heap::new(1 << 20, 1 << 20, 75);
        let obj = string("hello");
        let size = obj.size();
        let r = heap.insert(obj);
        assert_eq!(heap.bytes_allocated(), size);
        assert_eq!(heap.str(r), "hello");
        assert_eq!(heap.live_objects(), 1);
    }

    #[test]
    fn test_sweep_frees_unmarked_and_recycles_slots() {
        let mut heap = Heap::new(1 << 20, 0, 75);
        let keep = heap.insert(string("keep"));
        let drop = heap.insert(string("drop"));

        heap.begin_marking();
        heap.mark(keep);
        heap.trace_gray();
        let freed = heap.sweep(Instant::now());

        assert!(freed > 0);
        assert!(heap.contains(keep));
        assert!(!heap.contains(drop));
        assert_eq!(heap.bytes_allocated(), heap.measure_live_bytes());

        let reused = heap.insert(string("new"));
        assert_eq!(reused.index(), drop.index());
        assert_ne!(reused, drop);
    }

    #[test]
    fn test_marking_follows_children() {
        let mut heap = Heap::new(1 << 20, 0, 75);
        let inner = heap.insert(string("inner"));
        let list = heap.insert(Object::List(List::new(vec![Var::Object(inner)].into())));

        heap.begin_marking();
        heap.mark(list);
        heap.trace_gray();
        heap.sweep(Instant::now());

        assert!(heap.contains(inner));
        assert_eq!(heap.stats().collections, 1);
        assert_eq!(heap.stats().live_objects, 2);
    }

    #[test]
    fn test_threshold_follows_fill_percent() {
        let mut heap = Heap::new(1 << 20, 0, 100);
        let r = heap.insert(string("x"));
        heap.begin_marking();
        heap.mark(r);
        heap.trace_gray();
        heap.sweep(Instant::now());
        assert_eq!(heap.next_gc(), heap.bytes_allocated() * 2);
    }
}
