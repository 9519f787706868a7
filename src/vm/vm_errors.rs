//! Runtime failure handling and error reports.

use colored::Colorize;

use crate::error::{CompileError, TraceFrame, VmError};
use crate::gc::ObjRef;

use super::fiber::FiberState;
use super::Vm;

/// Width of the line-number gutter in source excerpts.
const LINE_NUMBER_WIDTH: usize = 5;

impl Vm {
    /// End `fiber` and every fiber in its caller chain with `err`, appending
    /// their frames to the trace.
    pub(crate) fn fail_fiber(&mut self, fiber: ObjRef, err: VmError) -> VmError {
        let mut err = err;
        let mut current = Some(fiber);
        while let Some(f) = current {
            if let VmError::Runtime(runtime) = &mut err {
                self.append_trace(f, &mut runtime.trace);
                self.heap.fiber_mut(f).error = Some(runtime.message.clone());
            }
            let fb = self.heap.fiber_mut(f);
            fb.state = FiberState::Done;
            current = fb.caller.take();
        }
        self.fiber = None;

        match &err {
            VmError::Runtime(runtime) => tracing::debug!(
                message = %runtime.message,
                frames = runtime.trace.len(),
                "runtime error"
            ),
            VmError::Exit(code) => tracing::debug!(code, "exit requested"),
        }
        err
    }

    /// The frames of `fiber`, innermost first.
    fn append_trace(&self, fiber: ObjRef, trace: &mut Vec<TraceFrame>) {
        for frame in self.heap.fiber(fiber).frames.iter().rev() {
            let function = self.heap.function(self.heap.closure(frame.closure).function);
            let line = function
                .code()
                .map_or(0, |code| code.line_at(frame.ip.saturating_sub(1)));
            let path = function
                .owner
                .and_then(|owner| self.heap.module(owner).path.clone());
            trace.push(TraceFrame {
                function: function.name.clone(),
                path,
                line,
            });
        }
    }

    fn red(&self, text: &str) -> String {
        if self.config.use_color {
            text.red().to_string()
        } else {
            text.to_string()
        }
    }

    /// Write `Error: message` and the trace to stderr.
    pub(crate) fn report_runtime_error(&self, err: &VmError) {
        let VmError::Runtime(runtime) = err else {
            return;
        };
        if self.config.stderr_write.is_none() {
            return;
        }
        let mut out = self.red("Error: ");
        out.push_str(&runtime.message);
        out.push('\n');
        for line in runtime.trace_lines() {
            out.push_str(&line);
            out.push('\n');
        }
        self.write_stderr(&out);
    }

    /// Write a compile error with an excerpt of the surrounding lines, the
    /// offending token underlined.
    pub(crate) fn report_compile_error(
        &self,
        error: &CompileError,
        source: &str,
        at: usize,
        length: usize,
    ) {
        if self.config.stderr_write.is_none() {
            return;
        }
        let mut out = format!("{}:{}", error.path(), error.line());
        out.push_str(&self.red(" error: "));
        out.push_str(error.message());
        out.push('\n');
        out.push_str(&self.source_excerpt(source, error.line() as usize, at, length));
        self.write_stderr(&out);
    }

    fn source_excerpt(&self, source: &str, line: usize, at: usize, length: usize) -> String {
        let start = line.saturating_sub(2).max(1);
        let end = start + 5;
        let at = at.min(source.len());

        let mut out = String::new();
        let mut offset = 0;
        for (index, text) in source.split('\n').enumerate() {
            let number = index + 1;
            let line_start = offset;
            offset += text.len() + 1;
            if number < start {
                continue;
            }
            if number >= end {
                break;
            }

            out.push_str(&format!("{:>width$} | ", number, width = LINE_NUMBER_WIDTH));
            if number != line || at < line_start || at > line_start + text.len() {
                out.push_str(text);
                out.push('\n');
                continue;
            }

            let column = at - line_start;
            let token_end = (column + length).min(text.len());
            let token = text.get(column..token_end).unwrap_or_default();
            out.push_str(text.get(..column).unwrap_or_default());
            out.push_str(&self.red(token));
            out.push_str(text.get(token_end..).unwrap_or_default());
            out.push('\n');

            out.push_str(&" ".repeat(LINE_NUMBER_WIDTH));
            out.push_str(" | ");
            for c in text.get(..column).unwrap_or_default().chars() {
                out.push(if c == '\t' { '\t' } else { ' ' });
            }
            out.push_str(&self.red(&"~".repeat(length.max(1))));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_excerpt_underlines_token() {
        let vm = Vm::new(Configuration::default());
        let source = "a = 1\nb = $\nc = 3\n";
        let at = source.find('$').unwrap();
        let excerpt = vm.source_excerpt(source, 2, at, 1);
        assert_eq!(
            excerpt,
            "    1 | a = 1\n    2 | b = $\n      |     ~\n    3 | c = 3\n    4 | \n"
        );
    }

    #[test]
    fn test_failed_fiber_is_done_with_error() {
        let mut vm = Vm::new(Configuration {
            stderr_write: None,
            ..Configuration::default()
        });
        let source = "def f() return null + 1 end\n";
        let module = vm.run_source("@fail", source).unwrap();
        let f = vm.get_global(module, "f").unwrap().as_object().unwrap();
        let fiber = vm.new_fiber(f);
        let _guard = vm.new_handle(crate::value::Var::Object(fiber));
        assert!(vm.run_fiber(fiber, &[]).is_err());
        let fb = vm.heap.fiber(fiber);
        assert_eq!(fb.state, FiberState::Done);
        assert_eq!(
            fb.error.as_deref(),
            Some("Unsupported operand types for operator '+' Null and Number")
        );
    }
}
