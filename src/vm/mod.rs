//! The pocketvm runtime: single-pass compiler, stack-based bytecode VM,
//! fibers, modules and the core library.
//!
//! Source is compiled straight to bytecode per module without an AST. The
//! [`Vm`] owns every object through its [`crate::gc::Heap`] and runs one
//! fiber at a time.

pub mod builtin_classes;
pub mod builtins;
pub mod chunk;
pub mod compiler;
pub mod compiler_classes;
pub mod compiler_exprs;
pub mod compiler_stmts;
pub mod fiber;
pub mod import;
pub mod module;
pub mod opcode;
pub mod upvalue;
#[allow(clippy::module_inception)]
pub mod vm;
pub mod vm_calls;
pub mod vm_classes;
pub mod vm_errors;
pub mod vm_ops;

pub use chunk::FnCode;
pub use fiber::{CallFrame, Fiber, FiberState};
pub use opcode::Opcode;
pub use vm::{Handle, Vm};
