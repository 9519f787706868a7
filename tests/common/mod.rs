//! Shared harness for the integration suites: a VM with captured output.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use pocketvm::{Configuration, ObjRef, PocketError, Var, Vm};

pub struct Session {
    pub vm: Vm,
    stdout: Rc<RefCell<String>>,
    stderr: Rc<RefCell<String>>,
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(Configuration::default())
    }

    /// A session that collects garbage on every allocation.
    pub fn stressed() -> Self {
        Self::with_config(Configuration::stress_gc())
    }

    pub fn with_config(config: Configuration) -> Self {
        let stdout = Rc::new(RefCell::new(String::new()));
        let stderr = Rc::new(RefCell::new(String::new()));
        let out = Rc::clone(&stdout);
        let err = Rc::clone(&stderr);
        let vm = Vm::new(Configuration {
            stdout_write: Some(Box::new(move |text| out.borrow_mut().push_str(text))),
            stderr_write: Some(Box::new(move |text| err.borrow_mut().push_str(text))),
            ..config
        });
        Self { vm, stdout, stderr }
    }

    pub fn run(&mut self, source: &str) -> Result<ObjRef, PocketError> {
        self.vm.run_source("@test", source)
    }

    pub fn stdout(&self) -> String {
        self.stdout.borrow().clone()
    }

    pub fn stderr(&self) -> String {
        self.stderr.borrow().clone()
    }

    pub fn global(&self, module: ObjRef, name: &str) -> Var {
        self.vm
            .get_global(module, name)
            .unwrap_or_else(|| panic!("global '{}' is not defined", name))
    }
}

/// Stdout of running `source` in a fresh session.
pub fn output(source: &str) -> String {
    let mut session = Session::new();
    if let Err(err) = session.run(source) {
        panic!("script failed: {}\n{}", err, session.stderr());
    }
    session.stdout()
}

/// The message of the runtime error `source` fails with.
pub fn runtime_error(source: &str) -> String {
    let mut session = Session::new();
    match session.run(source) {
        Err(PocketError::Runtime(err)) => err.message,
        Err(other) => panic!("expected a runtime error, got {}", other),
        Ok(_) => panic!("expected a runtime error, script succeeded"),
    }
}

/// The first diagnostic `source` fails to compile with.
pub fn compile_error(source: &str) -> String {
    let mut session = Session::new();
    match session.run(source) {
        Err(PocketError::Compile(failure)) => failure.errors()[0].message().to_string(),
        Err(other) => panic!("expected a compile error, got {}", other),
        Ok(_) => panic!("expected a compile error, script compiled"),
    }
}
