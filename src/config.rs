//! VM configuration: host callbacks, GC tuning and compile options.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Component, Path, PathBuf};

/// Writes a chunk of text to an output stream.
pub type WriteFn = Box<dyn Fn(&str)>;

/// Reads one line of input, without the trailing newline.
pub type ReadFn = Box<dyn Fn() -> Option<String>>;

/// Resolves an import path. The first argument is the path of the importing
/// module (or a search path), `None` when importing from a string module.
pub type ResolvePathFn = Box<dyn Fn(Option<&str>, &str) -> Option<String>>;

/// Loads the source of a resolved module path.
pub type LoadScriptFn = Box<dyn Fn(&str) -> Option<String>>;

pub const DEFAULT_INITIAL_HEAP_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_MIN_HEAP_SIZE: usize = 1024 * 1024;
pub const DEFAULT_HEAP_FILL_PERCENT: usize = 75;

/// Maximum fiber stack size, in slots.
pub const DEFAULT_MAX_STACK_SIZE: usize = 128 * 1024;

/// Extension tried when resolving an import path.
pub const SCRIPT_EXTENSION: &str = ".pk";

/// File a package directory is imported through.
pub const PACKAGE_INIT: &str = "_init.pk";

/// Host hooks and runtime tuning for a [`crate::vm::Vm`].
///
/// Output callbacks set to `None` silence that stream.
pub struct Configuration {
    pub stdout_write: Option<WriteFn>,
    pub stderr_write: Option<WriteFn>,
    pub stdin_read: Option<ReadFn>,
    pub resolve_path_fn: Option<ResolvePathFn>,
    pub load_script_fn: Option<LoadScriptFn>,

    /// Highlight error reports in red.
    pub use_color: bool,

    pub initial_heap_size: usize,
    pub min_heap_size: usize,
    pub heap_fill_percent: usize,

    pub max_stack_size: usize,
}

impl Configuration {
    /// A configuration that collects garbage on every allocation.
    pub fn stress_gc() -> Self {
        Self {
            initial_heap_size: 0,
            min_heap_size: 0,
            heap_fill_percent: 0,
            ..Self::default()
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            stdout_write: Some(Box::new(|text| {
                let mut out = io::stdout();
                let _ = out.write_all(text.as_bytes());
                let _ = out.flush();
            })),
            stderr_write: Some(Box::new(|text| {
                let _ = io::stderr().write_all(text.as_bytes());
            })),
            stdin_read: Some(Box::new(read_line)),
            resolve_path_fn: Some(Box::new(resolve_path)),
            load_script_fn: Some(Box::new(|path| std::fs::read_to_string(path).ok())),
            use_color: false,
            initial_heap_size: DEFAULT_INITIAL_HEAP_SIZE,
            min_heap_size: DEFAULT_MIN_HEAP_SIZE,
            heap_fill_percent: DEFAULT_HEAP_FILL_PERCENT,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("stdout_write", &self.stdout_write.is_some())
            .field("stderr_write", &self.stderr_write.is_some())
            .field("stdin_read", &self.stdin_read.is_some())
            .field("resolve_path_fn", &self.resolve_path_fn.is_some())
            .field("load_script_fn", &self.load_script_fn.is_some())
            .field("use_color", &self.use_color)
            .field("initial_heap_size", &self.initial_heap_size)
            .field("min_heap_size", &self.min_heap_size)
            .field("heap_fill_percent", &self.heap_fill_percent)
            .field("max_stack_size", &self.max_stack_size)
            .finish()
    }
}

/// Per-compilation switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Keep every call frame (no tail calls) for readable traces.
    pub debug: bool,
    /// Print the value of top-level expression statements and report
    /// incomplete input as `UnexpectedEof`.
    pub repl_mode: bool,
}

fn read_line() -> Option<String> {
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => {
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            Some(line)
        }
    }
}

/// Default import resolver: relative to the importing file's directory (or
/// the working directory), trying the path as is, with the script extension,
/// and as a package directory.
pub fn resolve_path(from: Option<&str>, path: &str) -> Option<String> {
    let base = match from {
        Some(from) => {
            let from = Path::new(from);
            if from.is_dir() {
                from.to_path_buf()
            } else {
                from.parent().map(Path::to_path_buf).unwrap_or_default()
            }
        }
        None => std::env::current_dir().ok()?,
    };

    let joined = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        base.join(path)
    };

    let candidates = [
        joined.clone(),
        PathBuf::from(format!("{}{}", joined.display(), SCRIPT_EXTENSION)),
        joined.join(PACKAGE_INIT),
    ];

    candidates
        .iter()
        .find(|candidate| candidate.is_file())
        .map(|found| normalize(found).to_string_lossy().into_owned())
}

/// Lexically normalize a path: drop `.` components and fold `..`.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
