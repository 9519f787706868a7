//! Error types for compilation and execution.

use std::fmt;

use thiserror::Error;

/// Number of frames kept at each end of a long runtime trace.
pub const TRACE_KEEP_FRAMES: usize = 10;

/// A single compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("{path}:{line} error: {message}")]
    Syntax {
        path: String,
        line: u32,
        message: String,
    },

    #[error("{path}:{line} error: {message}")]
    Semantic {
        path: String,
        line: u32,
        message: String,
    },

    #[error("{path}:{line} error: {message}")]
    Resolve {
        path: String,
        line: u32,
        message: String,
    },
}

impl CompileError {
    pub fn syntax(path: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self::Syntax {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub fn semantic(path: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self::Semantic {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub fn resolve(path: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self::Resolve {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub fn line(&self) -> u32 {
        match self {
            Self::Syntax { line, .. } => *line,
            Self::Semantic { line, .. } => *line,
            Self::Resolve { line, .. } => *line,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Syntax { path, .. } => path,
            Self::Semantic { path, .. } => path,
            Self::Resolve { path, .. } => path,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Syntax { message, .. } => message,
            Self::Semantic { message, .. } => message,
            Self::Resolve { message, .. } => message,
        }
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. })
    }
}

/// Why a compilation produced no usable bytecode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileFailure {
    #[error("{}", join_diagnostics(.0))]
    Errors(Vec<CompileError>),

    /// Only produced in REPL mode: the input ended inside an open construct.
    #[error("Unexpected end of input")]
    UnexpectedEof,
}

impl CompileFailure {
    pub fn errors(&self) -> &[CompileError] {
        match self {
            Self::Errors(errors) => errors,
            Self::UnexpectedEof => &[],
        }
    }
}

fn join_diagnostics(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// One entry of a runtime call-stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub function: String,
    /// Path of the owning module, `None` for modules compiled from a string.
    pub path: Option<String>,
    pub line: u32,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "  {}() [{}:{}]", self.function, path, self.line),
            None => write!(f, "  [at:{:2}] {}()", self.line, self.function),
        }
    }
}

/// A runtime error and the call stack it unwound through, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceFrame>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Trace lines as reported: long traces keep their innermost and
    /// outermost frames with a skip marker in between.
    pub fn trace_lines(&self) -> Vec<String> {
        let count = self.trace.len();
        if count <= 2 * TRACE_KEEP_FRAMES {
            return self.trace.iter().map(|frame| frame.to_string()).collect();
        }

        let mut lines = Vec::with_capacity(2 * TRACE_KEEP_FRAMES + 1);
        for frame in &self.trace[..TRACE_KEEP_FRAMES] {
            lines.push(frame.to_string());
        }
        lines.push(format!(
            "  ...  skipping {} stack frames",
            count - 2 * TRACE_KEEP_FRAMES
        ));
        for frame in &self.trace[count - TRACE_KEEP_FRAMES..] {
            lines.push(frame.to_string());
        }
        lines
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for line in self.trace_lines() {
            write!(f, "\n{}", line)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// What unwinds the dispatch loop: a runtime error, or a request to exit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("exit({0})")]
    Exit(i32),
}

impl VmError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Runtime(RuntimeError::new(message))
    }

    pub fn message(&self) -> String {
        match self {
            Self::Runtime(err) => err.message.clone(),
            Self::Exit(code) => format!("exit({})", code),
        }
    }
}

/// A unified error type for the host-facing API.
#[derive(Debug, Error)]
pub enum PocketError {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileFailure),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Exit requested with code {0}")]
    Exit(i32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<VmError> for PocketError {
    fn from(err: VmError) -> Self {
        match err {
            VmError::Runtime(err) => Self::Runtime(err),
            VmError::Exit(code) => Self::Exit(code),
        }
    }
}

impl PocketError {
    /// The runtime error, if this is one.
    pub fn as_runtime(&self) -> Option<&RuntimeError> {
        match self {
            Self::Runtime(err) => Some(err),
            _ => None,
        }
    }
}
