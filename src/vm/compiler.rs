//! Single-pass compiler: source text straight to bytecode.
//!
//! There is no syntax tree. The compiler pulls tokens from the scanner one at
//! a time and emits code into the function being compiled, resolving names
//! to locals, upvalues, globals or builtins as it goes. Globals used inside a
//! function before their definition are recorded as forward names and
//! patched once the whole module is compiled.

use std::rc::Rc;

use crate::config::CompileOptions;
use crate::error::{CompileError, CompileFailure};
use crate::gc::ObjRef;
use crate::lexer::{LexErrorKind, Scanner, Token, TokenKind};
use crate::value::{FnKind, Var, VarType};

use super::chunk::FnCode;
use super::module::{MAX_CONSTANTS, MAX_GLOBALS};
use super::opcode::Opcode;
use super::Vm;

/// Scope depth of module-level code.
pub(crate) const DEPTH_GLOBAL: i32 = -1;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_FORWARD_NAMES: usize = 256;
pub(crate) const MAX_BREAK_PATCH: usize = 256;
const MAX_JUMP: usize = 1 << 16;

/// Name of function literals.
pub(crate) const LITERAL_FN_NAME: &str = "@func";

/// Binding power of infix operators, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Precedence {
    None,
    Lowest,
    LogicalOr,
    LogicalAnd,
    Equality,
    Test,
    Comparison,
    BitwiseOr,
    BitwiseXor,
    BitwiseAnd,
    BitwiseShift,
    Range,
    Term,
    Factor,
    Unary,
    Exponent,
    Call,
    Subscript,
    Attrib,
    Primary,
}

impl Precedence {
    /// The next tighter level, used for left associative operators.
    pub(crate) fn next(self) -> Self {
        use Precedence::*;
        match self {
            None => Lowest,
            Lowest => LogicalOr,
            LogicalOr => LogicalAnd,
            LogicalAnd => Equality,
            Equality => Test,
            Test => Comparison,
            Comparison => BitwiseOr,
            BitwiseOr => BitwiseXor,
            BitwiseXor => BitwiseAnd,
            BitwiseAnd => BitwiseShift,
            BitwiseShift => Range,
            Range => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Exponent,
            Exponent => Call,
            Call => Subscript,
            Subscript => Attrib,
            Attrib | Primary => Primary,
        }
    }
}

/// What kind of function is being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FuncType {
    /// The implicit body of a module.
    Main,
    /// `def name() ... end` at module level.
    TopLevel,
    /// `fn ... end` expression.
    Literal,
    Method,
    Constructor,
}

#[derive(Debug, Clone)]
pub(crate) struct Local {
    pub name: String,
    pub depth: i32,
    /// Captured by an inner function; closed instead of popped.
    pub is_upvalue: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UpvalueInfo {
    /// Captures a local of the enclosing function rather than one of its
    /// upvalues.
    pub is_immediate: bool,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Loop {
    /// Offset the loop jumps back to.
    pub start: usize,
    /// Jumps emitted by `break`, patched to the loop exit.
    pub patches: Vec<usize>,
    /// Scope depth the loop was entered at.
    pub depth: i32,
}

/// A function being compiled.
pub(crate) struct Func {
    pub kind: FuncType,
    /// Scope depth the function was defined at.
    pub depth: i32,
    pub locals: Vec<Local>,
    pub upvalues: Vec<UpvalueInfo>,
    pub loops: Vec<Loop>,
    /// Current stack height above the frame base.
    pub stack_size: i32,
    pub max_stack: usize,
    pub function: ObjRef,
    pub code: FnCode,
}

/// A global read before the compiler saw its definition.
struct ForwardName {
    function: ObjRef,
    /// Offset of the `PUSH_GLOBAL` operand to patch.
    offset: usize,
    token: Token,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NameKind {
    NotDefined,
    Local,
    Upvalue,
    Global,
    BuiltinFn,
    BuiltinTy,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct NameSearch {
    pub kind: NameKind,
    pub index: usize,
}

impl NameSearch {
    fn found(kind: NameKind, index: usize) -> Self {
        Self { kind, index }
    }
}

pub(crate) struct Compiler<'vm, 'src> {
    pub(super) vm: &'vm mut Vm,
    scanner: Scanner<'src>,
    pub(super) source: &'src str,
    pub(super) module: ObjRef,
    pub(super) options: CompileOptions,
    path: String,

    pub(super) previous: Token,
    pub(super) current: Token,

    pub(super) scope_depth: i32,
    /// Functions being compiled, innermost last.
    pub(super) funcs: Vec<Func>,
    forwards: Vec<ForwardName>,
    errors: Vec<CompileError>,

    /// The statement just compiled defined a new local, which owns the
    /// value left on the stack.
    pub(super) new_local: bool,
    /// The expression being parsed may be an assignment target.
    pub(super) l_value: bool,
    /// A new variable may be defined here.
    pub(super) can_define: bool,
    /// The last infix operator parsed was a call.
    pub(super) is_last_call: bool,
    /// A single call argument follows without parentheses.
    pub(super) optional_call_paren: bool,
    pub(super) parsing_class: bool,

    need_more_lines: bool,
    pub(super) has_syntax_error: bool,
    pub(super) has_errors: bool,

    main_function: ObjRef,
    pub(super) bifn_list_join: usize,
}

impl Vm {
    /// Compile `source` into the body of `module`. A module compiled before
    /// keeps its globals and constants and gets a new body; on failure the
    /// globals and constants added by this compilation are discarded.
    pub fn compile(
        &mut self,
        module: ObjRef,
        source: &str,
        options: &CompileOptions,
    ) -> Result<(), CompileFailure> {
        self.compiling.push(module);
        if self.heap.module(module).body.is_none() {
            self.module_add_main(module);
        }
        let result = Compiler::new(self, module, source, *options).compile_module();
        self.compiling.pop();

        if let Err(failure) = &result {
            tracing::debug!(
                module = %self.heap.module(module).name,
                errors = failure.errors().len(),
                "compilation failed"
            );
        }
        result
    }
}

impl<'vm, 'src> Compiler<'vm, 'src> {
    fn new(vm: &'vm mut Vm, module: ObjRef, source: &'src str, options: CompileOptions) -> Self {
        let path = match &vm.heap.module(module).path {
            Some(path) => path.clone(),
            None if options.repl_mode => "@REPL".to_string(),
            None => "@??".to_string(),
        };
        let main_function = match vm.heap.module(module).body {
            Some(body) => vm.heap.closure(body).function,
            None => panic!("compiling a module without a body"),
        };
        let bifn_list_join = match find_builtin_fn(vm, "list_join") {
            Some(index) => index,
            None => panic!("builtin list_join is not registered"),
        };

        Self {
            vm,
            scanner: Scanner::new(source),
            source,
            module,
            options,
            path,
            previous: Token::new(TokenKind::Error, 0, 0, 1),
            current: Token::new(TokenKind::Error, 0, 0, 1),
            scope_depth: DEPTH_GLOBAL,
            funcs: Vec::new(),
            forwards: Vec::new(),
            errors: Vec::new(),
            new_local: false,
            l_value: false,
            can_define: true,
            is_last_call: false,
            optional_call_paren: false,
            parsing_class: false,
            need_more_lines: false,
            has_syntax_error: false,
            has_errors: false,
            main_function,
            bifn_list_join,
        }
    }

    fn compile_module(mut self) -> Result<(), CompileFailure> {
        let (constants_count, globals_count) = {
            let m = self.vm.heap.module(self.module);
            (m.constants.len(), m.globals.len())
        };

        self.push_func(FuncType::Main, self.main_function);

        self.lex_token();
        self.skip_new_lines();
        while !self.match_token(TokenKind::Eof) && !self.has_syntax_error {
            self.compile_top_level_statement();
            self.skip_new_lines();
        }
        self.emit_function_end();

        let main = self.pop_func();
        if !self.has_errors {
            self.install_code(main);
        }

        if !self.has_syntax_error {
            self.resolve_forwards();
        }

        if self.has_errors {
            let m = self.vm.heap.module_mut(self.module);
            m.constants.truncate(constants_count);
            m.globals.truncate(globals_count);
            m.global_names.truncate(globals_count);
            self.vm.heap.remeasure(self.module);

            if self.options.repl_mode && self.need_more_lines {
                return Err(CompileFailure::UnexpectedEof);
            }
            return Err(CompileFailure::Errors(self.errors));
        }
        Ok(())
    }

    /// Patch every forward name to its global, now that all globals of the
    /// module are known.
    fn resolve_forwards(&mut self) {
        let forwards = std::mem::take(&mut self.forwards);
        for forward in forwards {
            let name = forward.token.lexeme(self.source);
            match self.vm.module_global_index(self.module, name) {
                Some(index) => {
                    if let FnKind::Script(code) =
                        &mut self.vm.heap.function_mut(forward.function).kind
                    {
                        Rc::make_mut(code).opcodes[forward.offset] = index as u8;
                    }
                }
                None => {
                    // Not an unexpected end of input: the name is missing.
                    self.need_more_lines = false;
                    let message = format!("Name '{}' is not defined.", name);
                    let error = CompileError::resolve(&self.path, forward.token.line, message);
                    self.report(error, &forward.token);
                }
            }
        }
    }

    // Tokens.

    /// Advance: current becomes previous and the next token is scanned.
    pub(super) fn lex_token(&mut self) {
        let next = self.scanner.next_token();
        self.previous = std::mem::replace(&mut self.current, next);

        for error in self.scanner.take_errors() {
            let mut token = self.current.clone();
            token.line = error.line;
            match error.kind {
                LexErrorKind::Syntax => self.syntax_error(&token, error.message),
                LexErrorKind::Semantic => self.semantic_error(&token, error.message),
            }
        }
    }

    pub(super) fn peek(&self) -> TokenKind {
        self.current.kind
    }

    /// Consume the current token if it is `expected`.
    pub(super) fn match_token(&mut self, expected: TokenKind) -> bool {
        if self.peek() != expected {
            return false;
        }
        self.lex_token();
        !self.has_syntax_error
    }

    /// Consume the current token, reporting `message` if it isn't `expected`.
    pub(super) fn consume(&mut self, expected: TokenKind, message: &str) {
        self.lex_token();
        if self.has_syntax_error {
            return;
        }
        if self.previous.kind != expected {
            let token = self.previous.clone();
            self.syntax_error(&token, message);
        }
    }

    /// Consume one or more newlines.
    pub(super) fn match_line(&mut self) -> bool {
        let mut consumed = false;
        if self.peek() == TokenKind::Line {
            while self.peek() == TokenKind::Line {
                self.lex_token();
                if self.has_syntax_error {
                    return false;
                }
            }
            consumed = true;
        }

        // An open construct at the end of REPL input asks for more lines.
        if self.options.repl_mode && !self.has_errors && self.peek() == TokenKind::Eof {
            self.need_more_lines = true;
        }
        consumed
    }

    pub(super) fn skip_new_lines(&mut self) {
        self.match_line();
    }

    /// A `;`, newlines, or a peeked `end`, `else` or `elif`.
    pub(super) fn match_end_statement(&mut self) -> bool {
        if self.match_token(TokenKind::Semicolon) {
            self.skip_new_lines();
            return true;
        }
        if self.match_line() || self.peek() == TokenKind::Eof {
            return true;
        }
        matches!(
            self.peek(),
            TokenKind::End | TokenKind::Else | TokenKind::Elif
        )
    }

    pub(super) fn consume_end_statement(&mut self) {
        if !self.match_end_statement() {
            let token = self.current.clone();
            self.syntax_error(&token, "Expected statement end with '\\n' or ';'.");
        }
    }

    /// An optional `do` or `then` followed by optional newlines; at least
    /// one of them is required.
    pub(super) fn consume_start_block(&mut self, delimiter: TokenKind) {
        let mut consumed = self.match_token(delimiter);
        if self.match_line() {
            consumed = true;
        }
        if !consumed {
            let message = match delimiter {
                TokenKind::Do => "Expected enter block with newline or 'do'.",
                _ => "Expected enter block with newline or 'then'.",
            };
            let token = self.previous.clone();
            self.syntax_error(&token, message);
        }
    }

    /// Consume `=` or a compound assignment operator.
    pub(super) fn match_assignment(&mut self) -> bool {
        if !self.peek().is_assignment() {
            return false;
        }
        self.lex_token();
        !self.has_syntax_error
    }

    /// Source text of the previous token.
    pub(super) fn previous_text(&self) -> &'src str {
        self.previous.lexeme(self.source)
    }

    // Diagnostics.

    fn report(&mut self, error: CompileError, token: &Token) {
        self.has_errors = true;
        // Incomplete REPL input isn't an error worth printing.
        if !self.need_more_lines {
            self.vm
                .report_compile_error(&error, self.source, token.start, token.length);
        }
        self.errors.push(error);
    }

    /// Only the first syntax error is reported.
    pub(super) fn syntax_error(&mut self, token: &Token, message: impl Into<String>) {
        if self.has_syntax_error {
            return;
        }
        self.has_syntax_error = true;
        let error = CompileError::syntax(&self.path, token.line, message);
        self.report(error, token);
    }

    /// Dropped once a syntax error was reported.
    pub(super) fn semantic_error(&mut self, token: &Token, message: impl Into<String>) {
        if self.has_syntax_error {
            return;
        }
        let error = CompileError::semantic(&self.path, token.line, message);
        self.report(error, token);
    }

    pub(super) fn check_max_constants(&mut self, index: usize) {
        if index >= MAX_CONSTANTS {
            let token = self.previous.clone();
            self.semantic_error(
                &token,
                format!(
                    "A module should contain at most {} unique constants.",
                    MAX_CONSTANTS
                ),
            );
        }
    }

    // Name resolution.

    pub(super) fn func(&self) -> &Func {
        match self.funcs.last() {
            Some(func) => func,
            None => panic!("no function being compiled"),
        }
    }

    pub(super) fn func_mut(&mut self) -> &mut Func {
        match self.funcs.last_mut() {
            Some(func) => func,
            None => panic!("no function being compiled"),
        }
    }

    /// Innermost local of `funcs[func]` named `name`.
    fn find_local(&self, func: usize, name: &str) -> Option<usize> {
        self.funcs[func]
            .locals
            .iter()
            .rposition(|local| local.name == name)
    }

    fn add_upvalue(&mut self, func: usize, index: usize, is_immediate: bool) -> Option<usize> {
        let info = UpvalueInfo {
            is_immediate,
            index,
        };
        if let Some(existing) = self.funcs[func].upvalues.iter().position(|u| *u == info) {
            return Some(existing);
        }
        if self.funcs[func].upvalues.len() == MAX_UPVALUES {
            let token = self.previous.clone();
            self.semantic_error(
                &token,
                format!(
                    "A function cannot capture more than {} upvalues.",
                    MAX_UPVALUES
                ),
            );
            return None;
        }
        self.funcs[func].upvalues.push(info);
        Some(self.funcs[func].upvalues.len() - 1)
    }

    /// Resolve `name` as an upvalue of `funcs[func]`, capturing it through
    /// every enclosing function in between.
    fn find_upvalue(&mut self, func: usize, name: &str) -> Option<usize> {
        // Functions defined at module level only see globals.
        if self.funcs[func].depth <= DEPTH_GLOBAL || func == 0 {
            return None;
        }
        let outer = func - 1;

        if let Some(index) = self.find_local(outer, name) {
            self.funcs[outer].locals[index].is_upvalue = true;
            return self.add_upvalue(func, index, true);
        }

        let index = self.find_upvalue(outer, name)?;
        self.add_upvalue(func, index, false)
    }

    pub(super) fn search_name(&mut self, name: &str) -> NameSearch {
        let func = self.funcs.len() - 1;
        if let Some(index) = self.find_local(func, name) {
            return NameSearch::found(NameKind::Local, index);
        }
        if let Some(index) = self.find_upvalue(func, name) {
            return NameSearch::found(NameKind::Upvalue, index);
        }
        if let Some(index) = self.vm.module_global_index(self.module, name) {
            return NameSearch::found(NameKind::Global, index);
        }
        if let Some(index) = find_builtin_fn(self.vm, name) {
            return NameSearch::found(NameKind::BuiltinFn, index);
        }
        if let Some(index) = find_builtin_class(self.vm, name) {
            return NameSearch::found(NameKind::BuiltinTy, index);
        }
        NameSearch::found(NameKind::NotDefined, 0)
    }

    // Scopes and variables.

    /// Define `name` in the current scope: a global at module level, a
    /// local otherwise. An existing global is reused as is.
    pub(super) fn add_variable(&mut self, name: &str) -> usize {
        if self.scope_depth == DEPTH_GLOBAL {
            if let Some(index) = self.vm.module_global_index(self.module, name) {
                return index;
            }
            if self.vm.heap.module(self.module).globals.len() >= MAX_GLOBALS {
                self.max_variables_error("globals");
                return 0;
            }
            return self.vm.module_set_global(self.module, name, Var::Null);
        }

        if self.func().locals.len() >= MAX_LOCALS {
            self.max_variables_error("locals");
            return 0;
        }
        let depth = self.scope_depth;
        let func = self.func_mut();
        func.locals.push(Local {
            name: name.to_string(),
            depth,
            is_upvalue: false,
        });
        func.locals.len() - 1
    }

    fn max_variables_error(&mut self, what: &str) {
        let token = self.previous.clone();
        self.semantic_error(
            &token,
            format!("A module should contain at most {} {}.", MAX_LOCALS, what),
        );
    }

    pub(super) fn add_forward(&mut self, offset: usize, token: Token) {
        if self.forwards.len() == MAX_FORWARD_NAMES {
            self.semantic_error(
                &token,
                format!(
                    "A module should contain at most {} implicit forward function declarations.",
                    MAX_FORWARD_NAMES
                ),
            );
            return;
        }
        let function = self.func().function;
        self.forwards.push(ForwardName {
            function,
            offset,
            token,
        });
    }

    pub(super) fn add_constant(&mut self, value: Var) -> usize {
        let index = self.vm.module_add_constant(self.module, value);
        self.check_max_constants(index);
        index
    }

    /// Index of the string constant `text`.
    pub(super) fn add_string(&mut self, text: &str) -> usize {
        let (_, index) = self.vm.module_add_string(self.module, text);
        self.check_max_constants(index);
        index
    }

    pub(super) fn enter_block(&mut self) {
        self.scope_depth += 1;
    }

    /// Grow or shrink the tracked stack height.
    pub(super) fn change_stack(&mut self, delta: i32) {
        let func = self.func_mut();
        func.stack_size += delta;
        if func.stack_size > func.max_stack as i32 {
            func.max_stack = func.stack_size as usize;
        }
    }

    /// Emit the pops for every local at `depth` or deeper, without
    /// forgetting them: `break` and `continue` leave mid-scope. Returns how
    /// many were popped.
    pub(super) fn pop_locals(&mut self, depth: i32) -> usize {
        let captured: Vec<bool> = self
            .func()
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth >= depth)
            .map(|local| local.is_upvalue)
            .collect();
        for is_upvalue in &captured {
            let op = if *is_upvalue {
                Opcode::CLOSE_UPVALUE
            } else {
                Opcode::POP
            };
            self.emit_byte(op as u8);
        }
        captured.len()
    }

    pub(super) fn exit_block(&mut self) {
        let popped = self.pop_locals(self.scope_depth);
        let func = self.func_mut();
        let count = func.locals.len() - popped;
        func.locals.truncate(count);
        func.stack_size -= popped as i32;
        self.scope_depth -= 1;
    }

    pub(super) fn push_func(&mut self, kind: FuncType, function: ObjRef) {
        self.funcs.push(Func {
            kind,
            depth: self.scope_depth,
            locals: Vec::new(),
            upvalues: Vec::new(),
            loops: Vec::new(),
            stack_size: 0,
            max_stack: 0,
            function,
            code: FnCode::new(),
        });
    }

    pub(super) fn pop_func(&mut self) -> Func {
        match self.funcs.pop() {
            Some(func) => func,
            None => panic!("no function being compiled"),
        }
    }

    /// Give the compiled function its code and upvalue count.
    pub(super) fn install_code(&mut self, func: Func) {
        let mut code = func.code;
        code.stack_size = func.max_stack;
        let function = self.vm.heap.function_mut(func.function);
        function.upvalue_count = func.upvalues.len();
        function.kind = FnKind::Script(Rc::new(code));
        self.vm.heap.remeasure(func.function);
    }

    // Code emission.

    pub(super) fn code(&mut self) -> &mut FnCode {
        &mut self.func_mut().code
    }

    /// Emit a raw byte on the previous token's line.
    pub(super) fn emit_byte(&mut self, byte: u8) -> usize {
        let line = self.previous.line;
        self.code().emit_byte(byte, line)
    }

    /// Emit a big-endian short; returns the offset of its first byte.
    pub(super) fn emit_short(&mut self, value: usize) -> usize {
        let line = self.previous.line;
        self.code().emit_short(value as u16, line)
    }

    /// Emit an opcode and account for its stack effect. Calls adjust the
    /// stack for their arguments themselves.
    pub(super) fn emit_op(&mut self, op: Opcode) {
        self.emit_byte(op as u8);
        self.change_stack(op.stack_effect());
    }

    /// Jump back to the start of the innermost loop.
    pub(super) fn emit_loop_jump(&mut self) {
        self.emit_op(Opcode::LOOP);
        let start = match self.func().loops.last() {
            Some(l) => l.start,
            None => panic!("loop jump outside a loop"),
        };
        let offset = self.code().len() - start + 2;
        self.emit_short(offset);
    }

    /// The operation of a compound assignment, marked in place.
    pub(super) fn emit_assigned_op(&mut self, assignment: TokenKind) {
        let op = match assignment {
            TokenKind::PlusEq => Opcode::ADD,
            TokenKind::MinusEq => Opcode::SUBTRACT,
            TokenKind::StarEq => Opcode::MULTIPLY,
            TokenKind::SlashEq => Opcode::DIVIDE,
            TokenKind::PercentEq => Opcode::MOD,
            TokenKind::StarStarEq => Opcode::EXPONENT,
            TokenKind::AmpEq => Opcode::BIT_AND,
            TokenKind::PipeEq => Opcode::BIT_OR,
            TokenKind::CaretEq => Opcode::BIT_XOR,
            TokenKind::ShiftRightEq => Opcode::BIT_RSHIFT,
            TokenKind::ShiftLeftEq => Opcode::BIT_LSHIFT,
            other => panic!("{} is not a compound assignment", other),
        };
        self.emit_op(op);
        self.emit_byte(1);
    }

    /// The implicit return at the end of every function. The frame's
    /// return slot is what gets returned, so the stack is left untouched.
    pub(super) fn emit_function_end(&mut self) {
        self.emit_byte(Opcode::RETURN as u8);
        self.emit_op(Opcode::END);
    }

    /// Point the jump operand at `at` to the current offset.
    pub(super) fn patch_jump(&mut self, at: usize) {
        let offset = self.code().len() - (at + 2);
        if offset >= MAX_JUMP {
            let token = self.previous.clone();
            self.semantic_error(&token, "Too large address offset to jump to.");
            return;
        }
        self.code().patch_short(at, offset as u16);
    }

    pub(super) fn patch_list_size(&mut self, at: usize, size: usize) {
        self.code().patch_short(at, size.min(u16::MAX as usize) as u16);
    }

    pub(super) fn emit_push_value(&mut self, kind: NameKind, index: usize) {
        match kind {
            NameKind::NotDefined => debug_assert!(self.has_errors),
            NameKind::Local => self.emit_local(Opcode::PUSH_LOCAL_0, Opcode::PUSH_LOCAL_N, index),
            NameKind::Upvalue => self.emit_with_byte(Opcode::PUSH_UPVALUE, index),
            NameKind::Global => self.emit_with_byte(Opcode::PUSH_GLOBAL, index),
            NameKind::BuiltinFn => self.emit_with_byte(Opcode::PUSH_BUILTIN_FN, index),
            NameKind::BuiltinTy => self.emit_with_byte(Opcode::PUSH_BUILTIN_TY, index),
        }
    }

    /// Store the stack top into the named value, leaving it on the stack.
    pub(super) fn emit_store_value(&mut self, kind: NameKind, index: usize) {
        match kind {
            NameKind::NotDefined | NameKind::BuiltinFn | NameKind::BuiltinTy => {
                debug_assert!(self.has_errors)
            }
            NameKind::Local => self.emit_local(Opcode::STORE_LOCAL_0, Opcode::STORE_LOCAL_N, index),
            NameKind::Upvalue => self.emit_with_byte(Opcode::STORE_UPVALUE, index),
            NameKind::Global => self.emit_with_byte(Opcode::STORE_GLOBAL, index),
        }
    }

    /// Locals 0 to 8 have their own opcodes.
    fn emit_local(&mut self, first: Opcode, wide: Opcode, index: usize) {
        if index < 9 {
            self.emit_byte(first as u8 + index as u8);
            self.change_stack(first.stack_effect());
        } else {
            self.emit_with_byte(wide, index);
        }
    }

    fn emit_with_byte(&mut self, op: Opcode, operand: usize) {
        self.emit_op(op);
        self.emit_byte(operand as u8);
    }
}

/// Index of the builtin function `name`.
pub(crate) fn find_builtin_fn(vm: &Vm, name: &str) -> Option<usize> {
    vm.builtin_fns.iter().position(|&closure| {
        let function = vm.heap.closure(closure).function;
        vm.heap.function(function).name == name
    })
}

/// Index of the builtin class `name`; instances have no builtin class.
pub(crate) fn find_builtin_class(vm: &Vm, name: &str) -> Option<usize> {
    vm.builtin_classes
        .iter()
        .take(VarType::Instance.index())
        .position(|&class| vm.heap.class(class).name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use pretty_assertions::assert_eq;

    fn quiet_vm() -> Vm {
        Vm::new(Configuration {
            stderr_write: None,
            ..Configuration::default()
        })
    }

    fn compile(
        vm: &mut Vm,
        source: &str,
        options: CompileOptions,
    ) -> Result<ObjRef, CompileFailure> {
        let module = vm.create_module("test", None);
        vm.register_module("@test", module);
        vm.compile(module, source, &options).map(|_| module)
    }

    fn messages(failure: &CompileFailure) -> Vec<String> {
        failure.errors().iter().map(|e| e.message().to_string()).collect()
    }

    fn body_code(vm: &Vm, module: ObjRef) -> Rc<FnCode> {
        let body = vm.heap.module(module).body.unwrap();
        let function = vm.heap.closure(body).function;
        Rc::clone(vm.heap.function(function).code().unwrap())
    }

    #[test]
    fn test_precedence_is_ordered() {
        assert!(Precedence::LogicalOr < Precedence::LogicalAnd);
        assert!(Precedence::Term < Precedence::Factor);
        assert_eq!(Precedence::Term.next(), Precedence::Factor);
        assert_eq!(Precedence::Primary.next(), Precedence::Primary);
    }

    #[test]
    fn test_body_ends_with_return_and_end() {
        let mut vm = quiet_vm();
        let module = compile(&mut vm, "x = 1\n", CompileOptions::default()).unwrap();
        let code = body_code(&vm, module);
        let n = code.len();
        assert_eq!(code.opcodes[n - 2], Opcode::RETURN as u8);
        assert_eq!(code.opcodes[n - 1], Opcode::END as u8);
    }

    #[test]
    fn test_only_first_syntax_error_is_reported() {
        let mut vm = quiet_vm();
        let err = compile(&mut vm, "x = )\ny = ]\n", CompileOptions::default()).unwrap_err();
        assert_eq!(messages(&err), vec!["Expected an expression."]);
        assert!(err.errors()[0].is_syntax());
    }

    #[test]
    fn test_semantic_errors_accumulate() {
        let mut vm = quiet_vm();
        let err = compile(&mut vm, "a = b\nc = d\n", CompileOptions::default()).unwrap_err();
        assert_eq!(
            messages(&err),
            vec!["Name 'b' is not defined.", "Name 'd' is not defined."]
        );
    }

    #[test]
    fn test_forward_names_resolve_after_module() {
        let mut vm = quiet_vm();
        let source = "def f() return g() end\ndef g() return 1 end\n";
        assert!(compile(&mut vm, source, CompileOptions::default()).is_ok());

        let err = compile(&mut vm, "def f() return h() end\n", CompileOptions::default())
            .unwrap_err();
        assert_eq!(messages(&err), vec!["Name 'h' is not defined."]);
        assert!(matches!(err.errors()[0], CompileError::Resolve { line: 1, .. }));
    }

    #[test]
    fn test_failed_compile_rolls_back_globals() {
        let mut vm = quiet_vm();
        let module = compile(&mut vm, "a = 1\n", CompileOptions::default()).unwrap();
        let before = vm.heap.module(module).globals.len();
        assert!(vm
            .compile(module, "b = 2\nc = )\n", &CompileOptions::default())
            .is_err());
        assert_eq!(vm.heap.module(module).globals.len(), before);
        assert!(vm.get_global(module, "b").is_none());
    }

    #[test]
    fn test_repl_incomplete_input_is_unexpected_eof() {
        let mut vm = quiet_vm();
        let repl = CompileOptions {
            repl_mode: true,
            ..CompileOptions::default()
        };
        let err = compile(&mut vm, "def f()\n", repl).unwrap_err();
        assert_eq!(err, CompileFailure::UnexpectedEof);

        let err = compile(&mut vm, "x = )\n", repl).unwrap_err();
        assert!(matches!(err, CompileFailure::Errors(_)));
        assert!(compile(&mut vm, "x = 1\n", repl).is_ok());
    }

    #[test]
    fn test_tail_calls_are_kept_in_debug_mode() {
        let source = "def f(n) return f(n) end\n";
        let tail_calls = |options: CompileOptions| {
            let mut vm = quiet_vm();
            let module = compile(&mut vm, source, options).unwrap();
            vm.run_module(module).unwrap();
            let f = vm.get_global(module, "f").unwrap().as_object().unwrap();
            let function = vm.heap.closure(f).function;
            let code = Rc::clone(vm.heap.function(function).code().unwrap());
            code.opcodes.contains(&(Opcode::TAIL_CALL as u8))
        };
        assert!(tail_calls(CompileOptions::default()));
        assert!(!tail_calls(CompileOptions {
            debug: true,
            ..CompileOptions::default()
        }));
    }

    #[test]
    fn test_stack_size_covers_locals() {
        let mut vm = quiet_vm();
        let source = "def f(a, b)\n  c = a + b\n  return [c, a, b]\nend\n";
        let module = compile(&mut vm, source, CompileOptions::default()).unwrap();
        vm.run_module(module).unwrap();
        let f = vm.get_global(module, "f").unwrap().as_object().unwrap();
        let function = vm.heap.closure(f).function;
        assert!(vm.heap.function(function).code().unwrap().stack_size >= 4);
        assert_eq!(vm.heap.function(function).arity, 2);
    }
}
