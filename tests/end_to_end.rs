// `def` and `class` blocks consume no statement end after `end`, so each
// definition here is followed by a newline rather than `;`.

mod common;

use common::{compile_error, output, runtime_error, Session};
use pocketvm::Var;
use pretty_assertions::assert_eq;

#[test]
fn test_function_call() {
    let mut session = Session::new();
    let module = session.run("def f(x) return x + 1 end\nr = f(41)\n").unwrap();
    assert_eq!(session.global(module, "r"), Var::Number(42.0));

    assert_eq!(
        compile_error("def f(x) return x + 1 end; r = f(41)\n"),
        "Expected an expression."
    );
}

#[test]
fn test_for_over_range() {
    assert_eq!(output("for i in 0..3 do print(i) end\n"), "0\n1\n2\n");
}

#[test]
fn test_class_with_constructor() {
    let source = "\
class C is Object
  def _init(n) self.n = n end
  def get() return self.n end
end
print(C(5).get())
";
    assert_eq!(output(source), "5\n");
}

#[test]
fn test_closure_factory() {
    let source = "\
def make()
  x = 0
  return fn() x = x + 1; return x end
end
a = make(); b = make()
print(a(), b())
c = make()
print(c(), c())
";
    assert_eq!(output(source), "1 1\n1 2\n");
}

#[test]
fn test_fiber_run_and_resume() {
    let source = "\
fiber = Fiber(fn() yield(1); yield(2); return 3 end)
print(fiber.run())
print(fiber.resume())
print(fiber.resume())
";
    assert_eq!(output(source), "1\n2\n3\n");

    let failed = format!("{}fiber.resume()\n", source);
    assert_eq!(runtime_error(&failed), "The fiber has done running.");
}

#[test]
fn test_recursive_program() {
    let source = "\
def fib(n)
  if n < 2 then return n end
  return fib(n - 1) + fib(n - 2)
end
print(fib(20))
";
    assert_eq!(output(source), "6765\n");
}

#[test]
fn test_runtime_error_report() {
    let mut session = Session::new();
    let source = "\
def inner() return [1][3] end
def outer()
  x = inner()
  return x
end
outer()
";
    let err = session.run(source).unwrap_err();
    let runtime = err.as_runtime().unwrap();
    assert_eq!(runtime.message, "List index out of bound.");
    let functions: Vec<&str> = runtime.trace.iter().map(|f| f.function.as_str()).collect();
    assert_eq!(functions, vec!["inner", "outer", "@main"]);
    assert!(session.stderr().starts_with("Error: List index out of bound.\n"));
}
