mod common;

use common::{compile_error, output, runtime_error, Session};
use pocketvm::Var;
use pretty_assertions::assert_eq;

#[test]
fn test_function_locals_do_not_leak_to_globals() {
    let mut session = Session::new();
    let module = session
        .run("x = 1\ndef f()\n  y = 2\n  return y\nend\nz = f()\n")
        .unwrap();
    assert_eq!(session.global(module, "z"), Var::Number(2.0));
    assert_eq!(session.vm.get_global(module, "y"), None);
}

#[test]
fn test_assignment_inside_function_updates_global() {
    assert_eq!(
        output("count = 0\ndef bump() count += 1 end\nbump(); bump()\nprint(count)\n"),
        "2\n"
    );
}

#[test]
fn test_global_functions_can_be_referenced_before_definition() {
    let source = "\
def first() return second() * 2 end
def second() return 21 end
print(first())
";
    assert_eq!(output(source), "42\n");
}

#[test]
fn test_forward_reference_to_missing_global_fails() {
    let mut session = Session::new();
    let err = session.run("def f() return g() end\n").unwrap_err();
    let failure = match err {
        pocketvm::PocketError::Compile(failure) => failure,
        other => panic!("expected a compile error, got {}", other),
    };
    assert_eq!(failure.errors()[0].message(), "Name 'g' is not defined.");
    assert_eq!(failure.errors()[0].line(), 1);
}

#[test]
fn test_builtins_can_be_shadowed() {
    let source = "def show(x) return 'v=' + str(x) end\nmin = 5\nprint(show(min))\n";
    assert_eq!(output(source), "v=5\n");
}

#[test]
fn test_parameters_shadow_outer_bindings() {
    let source = "\
x = 1
def f(x)
  x = 5
  return x
end
def g()
  y = 'outer'
  h = fn(y) y = 'inner'; return y end
  return [h('arg'), y]
end
r = g()
print(f(2), x)
print(r[0], r[1])
";
    assert_eq!(output(source), "5 1\ninner outer\n");
}

#[test]
fn test_block_locals_end_with_their_block() {
    let source = "def f()\n  if true then\n    inner = 1\n  end\n  return inner\nend\nx = inner\n";
    assert_eq!(compile_error(source), "Name 'inner' is not defined.");
}

#[test]
fn test_definitions_are_rejected_in_conditions() {
    assert_eq!(
        compile_error("if x = 1 then print(x) end\n"),
        "Variable definition isn't allowed here."
    );
}

#[test]
fn test_module_globals_are_visible_through_the_module() {
    let mut session = Session::new();
    let module = session.run("greeting = 'hi'\n").unwrap();
    session.vm.set_global(module, "greeting", Var::Bool(true));
    assert_eq!(session.global(module, "greeting"), Var::Bool(true));
    assert_eq!(session.vm.find_module("@test"), Some(module));
}

#[test]
fn test_calling_a_non_callable_fails() {
    assert_eq!(
        runtime_error("x = 3\nx()\n"),
        "Expected a callable to call, instead got 'Number'."
    );
}
