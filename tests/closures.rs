mod common;

use common::{output, Session};
use pretty_assertions::assert_eq;

#[test]
fn test_closures_in_one_scope_share_upvalues() {
    let source = "\
def pair()
  n = 0
  inc = fn n += 1 end
  get = fn return n end
  return [inc, get]
end
p = pair()
p[0](); p[0]()
print(p[1]())
";
    assert_eq!(output(source), "2\n");
}

#[test]
fn test_upvalues_forward_through_enclosing_functions() {
    let source = "\
def outer()
  x = 'a'
  return fn
    return fn return x + '!' end
  end
end
print(outer()()())
";
    assert_eq!(output(source), "a!\n");
}

#[test]
fn test_each_iteration_captures_a_new_local() {
    let source = "\
fns = []
for i in 0..3
  k = i
  fns.append(fn return k * k end)
end
print(fns[0](), fns[1](), fns[2]())
";
    assert_eq!(output(source), "0 1 4\n");
}

#[test]
fn test_closed_upvalues_survive_collection() {
    let mut session = Session::stressed();
    let source = "\
def counter(start)
  n = start
  return fn n += 1; return n end
end
c = counter(10)
junk = []
for i in 0..50 do junk.append(str(i)) end
print(c(), c())
";
    session.run(source).unwrap();
    assert_eq!(session.stdout(), "11 12\n");
}

#[test]
fn test_closure_attributes() {
    let source = "\
def add(a, b)
  \"Add two values.\"
  return a + b
end
print(add.name, add.arity, add._docs)
f = fn(x) return x end
print(f.arity)
";
    assert_eq!(output(source), "add 2 Add two values.\n1\n");
}

#[test]
fn test_host_calls_closure() {
    let mut session = Session::new();
    let module = session
        .run("def scale(x) return x * factor end\nfactor = 3\n")
        .unwrap();
    let scale = session.global(module, "scale").as_object().unwrap();
    let result = session
        .vm
        .call_function(scale, &[pocketvm::Var::Number(7.0)])
        .unwrap();
    assert_eq!(result, pocketvm::Var::Number(21.0));
}
