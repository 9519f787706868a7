mod common;

use common::{output, runtime_error, Session};
use pocketvm::vm::FiberState;
use pocketvm::Var;
use pretty_assertions::assert_eq;

#[test]
fn test_host_drives_a_generator() {
    let mut session = Session::new();
    let module = session
        .run("def gen(step)\n  for i in 0..3 do yield(i * step) end\n  return 'end'\nend\n")
        .unwrap();
    let gen = session.global(module, "gen").as_object().unwrap();
    let fiber = session.vm.new_fiber(gen);
    let handle = session.vm.new_handle(Var::Object(fiber));

    let vm = &mut session.vm;
    assert_eq!(vm.run_fiber(fiber, &[Var::Number(10.0)]).unwrap(), Var::Number(0.0));
    assert_eq!(vm.heap().fiber(fiber).state, FiberState::Yielded);
    assert_eq!(vm.resume_fiber(fiber, Var::Null).unwrap(), Var::Number(10.0));
    assert_eq!(vm.resume_fiber(fiber, Var::Null).unwrap(), Var::Number(20.0));

    let last = vm.resume_fiber(fiber, Var::Null).unwrap();
    assert_eq!(vm.heap().display(last), "end");
    assert!(vm.heap().fiber(fiber).is_done());

    let err = vm.resume_fiber(fiber, Var::Null).unwrap_err();
    assert_eq!(err.as_runtime().unwrap().message, "The fiber has done running.");
    vm.release_handle(handle);
}

#[test]
fn test_resume_value_becomes_yield_result() {
    let source = "\
def echo()
  got = yield('ready')
  while got != null
    got = yield('got ' + got)
  end
  return 'bye'
end
f = Fiber(echo)
print(f.run())
print(f.resume('a'))
print(f.resume('b'))
print(f.resume(), f.is_done)
";
    assert_eq!(output(source), "ready\ngot a\ngot b\nbye true\n");
}

#[test]
fn test_nested_fibers_yield_to_their_runner() {
    let source = "\
inner = Fiber(fn
  yield('inner 1')
  return 'inner done'
end)
outer = Fiber(fn
  yield(inner.run())
  yield(inner.resume())
end)
print(outer.run())
print(outer.resume())
print(inner.is_done, outer.is_done)
";
    assert_eq!(output(source), "inner 1\ninner done\ntrue false\n");
}

#[test]
fn test_fiber_state_errors() {
    assert_eq!(
        runtime_error("f = Fiber(fn yield() end)\nf.run()\nf.run()\n"),
        "Cannot run a fiber which is yielded, use fiber_resume() instead."
    );
    assert_eq!(
        runtime_error("f = Fiber(fn end)\nf.resume()\n"),
        "The fiber hasn't started. call fiber_run() to start."
    );
    assert_eq!(
        runtime_error("f = Fiber(fn(a) end)\nf.run()\n"),
        "Expected exactly 1 argument(s) for function @func."
    );
}

#[test]
fn test_error_in_fiber_aborts_the_caller_chain() {
    let mut session = Session::new();
    let source = "\
f = Fiber(fn
  yield(1)
  x = null + 1
end)
f.run()
f.resume()
";
    let err = session.run(source).unwrap_err();
    assert_eq!(
        err.as_runtime().unwrap().message,
        "Unsupported operand types for operator '+' Null and Number"
    );
    let module = session.vm.find_module("@test").unwrap();
    let fiber = session.global(module, "f").as_object().unwrap();
    let fiber = session.vm.heap().fiber(fiber);
    assert!(fiber.is_done());
    assert_eq!(
        fiber.error.as_deref(),
        Some("Unsupported operand types for operator '+' Null and Number")
    );
}

#[test]
fn test_fiber_attributes() {
    let source = "\
def work() yield() end
f = Fiber(work)
print(f.is_done, f.function.name)
f.run(); f.resume()
print(f.is_done, f)
";
    assert_eq!(output(source), "false work\ntrue [Fiber:work]\n");
}

#[test]
fn test_yield_outside_a_fiber_suspends_main() {
    let mut session = Session::new();
    let module = session.run("x = 1\nyield(5)\nx = 2\n").unwrap();
    assert_eq!(session.global(module, "x"), Var::Number(1.0));
}
