mod common;

use common::{compile_error, Session};
use pocketvm::{CompileFailure, CompileOptions, PocketError};
use pretty_assertions::assert_eq;

#[test]
fn test_lexical_errors_reach_the_host() {
    assert_eq!(compile_error("x = \"abc\n"), "Non terminated string.");
    assert_eq!(compile_error("x = 0b2\n"), "Invalid binary literal.");
    assert_eq!(compile_error("x = 1 ? 2\n"), "Invalid character '?'");
    assert_eq!(compile_error("x = '\\q'\n"), "Invalid escape character.");
}

#[test]
fn test_statement_structure_errors() {
    assert_eq!(
        compile_error("def f()\n  return 1\n"),
        "Expected 'end' after function definition end."
    );
    assert_eq!(compile_error("continue\n"), "Cannot use 'continue' outside a loop.");
    assert_eq!(
        compile_error("def f() return self end\n"),
        "Invalid use of 'self'."
    );
}

#[test]
fn test_report_names_path_and_line() {
    let mut session = Session::new();
    let err = session.run("x = 1\ny = (2 +\n").unwrap_err();
    let PocketError::Compile(failure) = err else {
        panic!("expected a compile error");
    };
    let first = &failure.errors()[0];
    assert_eq!(first.path(), "@??");
    assert!(first.is_syntax());
    assert!(session
        .stderr()
        .starts_with(&format!("@??:{} error: {}\n", first.line(), first.message())));
}

#[test]
fn test_semantic_errors_are_all_collected() {
    let mut session = Session::new();
    let err = session.run("a = b\nc = d\n").unwrap_err();
    let PocketError::Compile(failure) = err else {
        panic!("expected a compile error");
    };
    let messages: Vec<(u32, &str)> = failure
        .errors()
        .iter()
        .map(|e| (e.line(), e.message()))
        .collect();
    assert_eq!(
        messages,
        vec![(1, "Name 'b' is not defined."), (2, "Name 'd' is not defined.")]
    );
}

#[test]
fn test_failed_module_keeps_previous_globals() {
    let mut session = Session::new();
    let module = session.run("kept = 1\n").unwrap();
    let err = session
        .vm
        .compile(module, "added = 2\nbroken = )\n", &CompileOptions::default())
        .unwrap_err();
    assert!(matches!(err, CompileFailure::Errors(_)));
    assert!(session.vm.get_global(module, "kept").is_some());
    assert!(session.vm.get_global(module, "added").is_none());
}

#[test]
fn test_repl_mode_asks_for_more_input() {
    let mut session = Session::with_config(pocketvm::Configuration {
        stderr_write: None,
        ..pocketvm::Configuration::default()
    });
    let module = session.run("").unwrap();
    let options = CompileOptions {
        repl_mode: true,
        ..CompileOptions::default()
    };
    let err = session
        .vm
        .compile(module, "def f()\n", &options)
        .unwrap_err();
    assert_eq!(err, CompileFailure::UnexpectedEof);
}
