//! pocketvm: a small embeddable scripting language runtime.
//!
//! Scripts are compiled in a single pass to bytecode and run on a
//! stack-based VM with fibers and a mark-sweep garbage collector.
//!
//! # Embedding
//!
//! ```no_run
//! use pocketvm::{Configuration, Vm};
//!
//! let mut vm = Vm::new(Configuration::default());
//! vm.run_source("@main", "print('hello')").unwrap();
//! ```

// Allow some clippy lints that are stylistic and not critical
#![allow(clippy::module_inception)]
#![allow(clippy::result_large_err)]
#![allow(clippy::type_complexity)]
#![allow(clippy::new_without_default)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::collapsible_else_if)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::manual_strip)]

pub mod config;
pub mod error;
pub mod gc;
pub mod lexer;
pub mod value;
pub mod vm;

pub use config::{CompileOptions, Configuration};
pub use error::{CompileError, CompileFailure, PocketError, RuntimeError};
pub use gc::ObjRef;
pub use value::Var;
pub use vm::{Handle, Vm};

/// Run a program from source code with the default configuration.
pub fn run(source: &str) -> Result<(), PocketError> {
    run_with_config(source, Configuration::default())
}

/// Run a program from source code on a VM built from `config`.
pub fn run_with_config(source: &str, config: Configuration) -> Result<(), PocketError> {
    let mut vm = Vm::new(config);
    vm.run_source("@main", source)?;
    Ok(())
}

/// Run the script at `path`; its imports resolve relative to it.
pub fn run_file(path: &std::path::Path, config: Configuration) -> Result<(), PocketError> {
    let source = std::fs::read_to_string(path)?;
    let path = config::normalize(path);
    let mut vm = Vm::new(config);
    vm.run_source(&path.to_string_lossy(), &source)?;
    Ok(())
}
