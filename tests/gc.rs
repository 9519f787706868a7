mod common;

use common::Session;
use pocketvm::{Configuration, Var};
use pretty_assertions::assert_eq;

const WORKLOAD: &str = "\
class Node
  def _init(value, link) self.value = value; self.link = link end
end
def build(n)
  head = null
  for i in 0..n do head = Node(i, head) end
  return head
end
def total(node)
  sum = 0
  while node != null
    sum += node.value
    node = node.link
  end
  return sum
end
words = {}
for i in 0..40
  words['k' + str(i)] = [i, str(i) * 3, 0..i]
end
print(total(build(100)), words['k7'][1], 'k39' in words)
";

#[test]
fn test_stress_collection_preserves_program_results() {
    let mut relaxed = Session::new();
    relaxed.run(WORKLOAD).unwrap();

    let mut stressed = Session::stressed();
    stressed.run(WORKLOAD).unwrap();

    assert_eq!(stressed.stdout(), relaxed.stdout());
    assert!(stressed.vm.heap().stats().collections > 0);
}

#[test]
fn test_accounting_is_exact_after_collection() {
    let mut session = Session::new();
    session
        .run("garbage = []\nfor i in 0..200 do garbage.append([i, str(i)]) end\ngarbage = null\n")
        .unwrap();
    let freed = session.vm.collect_garbage();
    assert!(freed > 0);

    let heap = session.vm.heap();
    assert_eq!(heap.bytes_allocated(), heap.measure_live_bytes());
    assert_eq!(heap.stats().live_bytes, heap.bytes_allocated());
}

#[test]
fn test_self_containing_list_lives_until_unreachable() {
    let mut session = Session::new();
    let module = session.run("a = [1]\na.append(a)\n").unwrap();
    let r = session.global(module, "a").as_object().unwrap();

    session.vm.collect_garbage();
    assert!(session.vm.heap().contains(r));
    assert_eq!(session.vm.heap().repr(Var::Object(r)), "[1, [...]]");

    session.vm.set_global(module, "a", Var::Null);
    assert!(session.vm.collect_garbage() > 0);
    let heap = session.vm.heap();
    assert!(!heap.contains(r));
    assert_eq!(heap.bytes_allocated(), heap.measure_live_bytes());
}

#[test]
fn test_lang_gc_reports_freed_bytes() {
    let mut session = Session::new();
    let module = session
        .run("import lang\nx = [1, 2, 3]\nx = null\nfreed = lang.gc()\n")
        .unwrap();
    match session.global(module, "freed") {
        Var::Number(n) => assert!(n > 0.0),
        other => panic!("expected a number, got {:?}", other),
    }
}

#[test]
fn test_handles_keep_values_alive() {
    let mut session = Session::new();
    let module = session.run("def make() return ['kept'] end\n").unwrap();
    let make = session.global(module, "make").as_object().unwrap();
    let list = session.vm.call_function(make, &[]).unwrap();
    let handle = session.vm.new_handle(list);

    session.vm.collect_garbage();
    let r = list.as_object().unwrap();
    assert!(session.vm.heap().contains(r));
    assert_eq!(session.vm.heap().repr(session.vm.handle_value(&handle)), "[\"kept\"]");

    session.vm.release_handle(handle);
    session.vm.collect_garbage();
    assert!(!session.vm.heap().contains(r));
}

#[test]
fn test_threshold_tracks_live_bytes() {
    let mut session = Session::with_config(Configuration {
        initial_heap_size: 4096,
        min_heap_size: 1024,
        heap_fill_percent: 50,
        ..Configuration::default()
    });
    session
        .run("keep = []\nfor i in 0..300 do keep.append(str(i)) end\n")
        .unwrap();
    let heap = session.vm.heap();
    assert!(heap.stats().collections > 0);
    assert!(heap.next_gc() >= 1024);
}
