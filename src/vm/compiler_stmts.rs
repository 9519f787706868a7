//! Statement compilation: functions, blocks, control flow and imports.

use crate::lexer::{Token, TokenKind};
use crate::value::CTOR_NAME;

use super::compiler::{Compiler, FuncType, Loop, NameKind, LITERAL_FN_NAME, MAX_BREAK_PATCH};
use super::opcode::Opcode;

/// What ends a block and how it's entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BlockType {
    Func,
    Loop,
    If,
    Else,
}

impl<'vm, 'src> Compiler<'vm, 'src> {
    /// Compile a function definition. Literals leave their closure on the
    /// stack, top-level functions are stored in a global and methods are
    /// bound to the class below them.
    pub(super) fn compile_function(&mut self, fn_type: FuncType) {
        let mut fn_type = fn_type;
        let mut name = "(?)".to_string();
        let mut operator_argc = None;

        if fn_type == FuncType::Literal {
            name = LITERAL_FN_NAME.to_string();
        } else if self.match_token(TokenKind::Name) {
            name = self.previous_text().to_string();
        } else {
            let operator = match fn_type {
                FuncType::Method => self.match_operator_method(),
                _ => None,
            };
            match operator {
                Some((symbol, argc)) => {
                    name = symbol.to_string();
                    operator_argc = Some(argc);
                }
                None if !self.has_syntax_error => {
                    let token = self.previous.clone();
                    self.syntax_error(&token, "Expected a function name.");
                }
                None => {}
            }
        }
        if self.has_syntax_error {
            return;
        }

        let is_method = fn_type == FuncType::Method;
        let (function, fn_index) = self.vm.new_script_function(&name, self.module, is_method);
        self.check_max_constants(fn_index);

        let global_index = match fn_type {
            FuncType::TopLevel => Some(self.add_variable(&name)),
            _ => None,
        };
        if fn_type == FuncType::Method && name == CTOR_NAME {
            fn_type = FuncType::Constructor;
        }

        self.push_func(fn_type, function);
        self.enter_block();

        let mut argc = 0;
        if self.match_token(TokenKind::LParen) && !self.match_token(TokenKind::RParen) {
            loop {
                self.skip_new_lines();
                self.consume(TokenKind::Name, "Expected a parameter name.");
                argc += 1;

                let param = self.previous_text();
                if self.func().locals.iter().any(|local| local.name == param) {
                    let token = self.previous.clone();
                    self.semantic_error(&token, "Multiple definition of a parameter.");
                }
                self.add_variable(param);

                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
            self.consume(TokenKind::RParen, "Expected ')' after parameter list.");
        }

        if let Some(expected) = operator_argc {
            if argc != expected {
                let token = self.previous.clone();
                self.semantic_error(&token, format!("Expected exactly {} parameters.", expected));
            }
        }

        self.vm.heap.function_mut(function).arity = argc as i32;
        self.change_stack(argc as i32);

        self.skip_new_lines();
        if self.match_token(TokenKind::String) {
            let docstring = self.previous.string().to_string();
            self.add_string(&docstring);
            self.vm.heap.function_mut(function).docstring = Some(docstring);
        }

        self.compile_block_body(BlockType::Func);

        if fn_type == FuncType::Constructor {
            self.emit_op(Opcode::PUSH_SELF);
            self.emit_op(Opcode::RETURN);
        }

        self.consume(TokenKind::End, "Expected 'end' after function definition end.");
        self.exit_block();
        self.emit_function_end();

        let func = self.pop_func();
        let upvalues = func.upvalues.clone();
        self.install_code(func);

        // Back in the enclosing function: create the closure there.
        self.emit_op(Opcode::PUSH_CLOSURE);
        self.emit_short(fn_index);
        for upvalue in upvalues {
            self.emit_byte(upvalue.is_immediate as u8);
            self.emit_byte(upvalue.index as u8);
        }

        match fn_type {
            FuncType::TopLevel => {
                if let Some(index) = global_index {
                    self.emit_store_value(NameKind::Global, index);
                }
                self.emit_op(Opcode::POP);
            }
            FuncType::Method | FuncType::Constructor => self.emit_op(Opcode::BIND_METHOD),
            FuncType::Literal | FuncType::Main => {}
        }
    }

    /// Statements up to (not including) the `end` of a block, or an `else`
    /// or `elif` for if blocks.
    pub(super) fn compile_block_body(&mut self, block: BlockType) {
        self.enter_block();

        match block {
            BlockType::If => self.consume_start_block(TokenKind::Then),
            BlockType::Loop => self.consume_start_block(TokenKind::Do),
            BlockType::Func | BlockType::Else => {}
        }
        self.skip_new_lines();

        loop {
            let next = self.peek();
            let ends = match next {
                TokenKind::End | TokenKind::Eof => true,
                TokenKind::Else | TokenKind::Elif => block == BlockType::If,
                _ => false,
            };
            if ends || self.has_syntax_error {
                break;
            }
            self.compile_statement();
            self.skip_new_lines();
        }

        self.exit_block();
    }

    /// Emit the import of a dotted module path and return the token naming
    /// the module.
    ///
    /// ```text
    /// import foo.bar    "foo/bar"
    /// import .qux       "./qux"
    /// import ^^foo.bar  "../../foo/bar"
    /// ```
    fn compile_import_path(&mut self) -> Option<Token> {
        let mut path = String::new();
        if self.match_token(TokenKind::Dot) {
            path.push_str("./");
        } else {
            while self.match_token(TokenKind::Caret) {
                path.push_str("../");
            }
        }

        let mut module: Option<Token> = None;
        loop {
            self.consume(TokenKind::Name, "Expected a module name");
            if self.has_syntax_error {
                return None;
            }
            if module.is_some() {
                path.push('/');
            }
            path.push_str(self.previous_text());
            module = Some(self.previous.clone());

            if !self.match_token(TokenKind::Dot) {
                break;
            }
        }

        let index = self.add_string(&path);
        self.emit_op(Opcode::IMPORT);
        self.emit_short(index);
        module
    }

    /// Bind the value on the stack top to a global and pop it.
    fn store_import(&mut self, token: &Token) {
        let name = token.lexeme(self.source);
        let index = self.add_variable(name);
        self.emit_store_value(NameKind::Global, index);
        self.emit_op(Opcode::POP);
    }

    /// `import a.b [as c] [, ...]`
    fn compile_regular_import(&mut self) {
        loop {
            let Some(mut module) = self.compile_import_path() else {
                return;
            };
            if self.match_token(TokenKind::As) {
                self.consume(TokenKind::Name, "Expected a name after 'as'.");
                if self.has_syntax_error {
                    return;
                }
                module = self.previous.clone();
            }
            self.store_import(&module);

            if !self.match_token(TokenKind::Comma) {
                break;
            }
            self.skip_new_lines();
        }
        self.consume_end_statement();
    }

    /// `from a.b import c [as d] [, ...]`
    fn compile_from_import(&mut self) {
        if self.compile_import_path().is_none() {
            return;
        }
        self.consume(TokenKind::Import, "Expected keyword 'import'.");
        if self.has_syntax_error {
            return;
        }

        loop {
            self.consume(TokenKind::Name, "Expected symbol to import.");
            if self.has_syntax_error {
                return;
            }
            let mut symbol = self.previous.clone();
            let index = self.add_string(self.previous_text());

            // The module stays on the stack for the next symbol.
            self.emit_op(Opcode::GET_ATTRIB_KEEP);
            self.emit_short(index);

            if self.match_token(TokenKind::As) {
                self.consume(TokenKind::Name, "Expected a name after 'as'.");
                symbol = self.previous.clone();
            }
            self.store_import(&symbol);

            if !self.match_token(TokenKind::Comma) {
                break;
            }
            self.skip_new_lines();
        }

        self.emit_op(Opcode::POP);
        self.consume_end_statement();
    }

    /// Compile a condition where no variable may be defined.
    fn compile_condition(&mut self) {
        let can_define = self.can_define;
        self.can_define = false;
        self.compile_expression();
        self.can_define = can_define;
    }

    fn compile_if_statement(&mut self, elif: bool) {
        self.skip_new_lines();
        self.compile_condition();

        self.emit_op(Opcode::JUMP_IF_NOT);
        let if_patch = self.emit_short(0xffff);

        self.compile_block_body(BlockType::If);

        if self.match_token(TokenKind::Elif) {
            self.emit_op(Opcode::JUMP);
            let exit_jump = self.emit_short(0xffff);
            self.patch_jump(if_patch);

            self.enter_block();
            self.compile_if_statement(true);
            self.exit_block();

            self.patch_jump(exit_jump);
        } else if self.match_token(TokenKind::Else) {
            self.emit_op(Opcode::JUMP);
            let exit_jump = self.emit_short(0xffff);
            self.patch_jump(if_patch);
            self.compile_block_body(BlockType::Else);
            self.patch_jump(exit_jump);
        } else {
            self.patch_jump(if_patch);
        }

        // The outermost `if` consumes the shared `end`.
        if !elif {
            self.skip_new_lines();
            self.consume(TokenKind::End, "Expected 'end' after statement end.");
        }
    }

    fn enter_loop(&mut self) {
        let start = self.code().len();
        let depth = self.scope_depth;
        self.func_mut().loops.push(Loop {
            start,
            patches: Vec::new(),
            depth,
        });
    }

    /// Patch the `break` jumps of the innermost loop to here.
    fn exit_loop(&mut self) {
        let Some(finished) = self.func_mut().loops.pop() else {
            return;
        };
        for patch in finished.patches {
            self.patch_jump(patch);
        }
    }

    fn compile_while_statement(&mut self) {
        self.enter_loop();
        self.compile_condition();

        self.emit_op(Opcode::JUMP_IF_NOT);
        let exit_patch = self.emit_short(0xffff);

        self.compile_block_body(BlockType::Loop);

        self.emit_loop_jump();
        self.patch_jump(exit_patch);
        self.exit_loop();

        self.skip_new_lines();
        self.consume(TokenKind::End, "Expected 'end' after statement end.");
    }

    /// The sequence, the iteration cursor and the loop variable live in
    /// three hidden locals of the loop scope.
    fn compile_for_statement(&mut self) {
        self.enter_block();
        self.consume(TokenKind::Name, "Expected an iterator name.");
        let iterator = self.previous_text();
        self.consume(TokenKind::In, "Expected 'in' after iterator name.");

        self.add_variable("@Sequence");
        self.compile_condition();

        self.add_variable("@iterator");
        self.emit_op(Opcode::PUSH_0);

        self.add_variable(iterator);
        self.emit_op(Opcode::PUSH_NULL);

        self.emit_op(Opcode::ITER_TEST);

        self.enter_loop();
        self.emit_op(Opcode::ITER);
        let exit_patch = self.emit_short(0xffff);

        self.compile_block_body(BlockType::Loop);

        self.emit_loop_jump();
        self.patch_jump(exit_patch);
        self.exit_loop();

        self.skip_new_lines();
        self.consume(TokenKind::End, "Expected 'end' after statement end.");
        self.exit_block();
    }

    fn compile_break(&mut self) {
        let Some(depth) = self.func().loops.last().map(|l| l.depth) else {
            let token = self.previous.clone();
            self.syntax_error(&token, "Cannot use 'break' outside a loop.");
            return;
        };
        if self.func().loops.last().map_or(0, |l| l.patches.len()) >= MAX_BREAK_PATCH {
            let token = self.previous.clone();
            self.semantic_error(
                &token,
                format!("Too many break statements ({}).", MAX_BREAK_PATCH),
            );
        }

        self.consume_end_statement();
        self.pop_locals(depth + 1);

        self.emit_op(Opcode::JUMP);
        let patch = self.emit_short(0xffff);
        if let Some(innermost) = self.func_mut().loops.last_mut() {
            innermost.patches.push(patch);
        }
    }

    fn compile_continue(&mut self) {
        let Some(depth) = self.func().loops.last().map(|l| l.depth) else {
            let token = self.previous.clone();
            self.syntax_error(&token, "Cannot use 'continue' outside a loop.");
            return;
        };
        self.consume_end_statement();
        self.pop_locals(depth + 1);
        self.emit_loop_jump();
    }

    fn compile_return(&mut self) {
        if self.func().kind == FuncType::Main {
            let token = self.previous.clone();
            self.syntax_error(&token, "Invalid 'return' outside a function.");
            return;
        }

        let is_ctor = self.func().kind == FuncType::Constructor;
        if self.match_end_statement() {
            // Constructors return self.
            let op = if is_ctor {
                Opcode::PUSH_SELF
            } else {
                Opcode::PUSH_NULL
            };
            self.emit_op(op);
            self.emit_op(Opcode::RETURN);
            return;
        }

        if is_ctor {
            let token = self.previous.clone();
            self.syntax_error(&token, "Cannor 'return' a value from constructor.");
        }

        self.compile_condition();

        // A returned call reuses the current frame, except in debug builds
        // where every frame shows up in the trace.
        if self.is_last_call && !self.options.debug {
            let code = self.code();
            let at = code.len() - 2;
            if code.opcodes[at] == Opcode::CALL as u8 {
                code.opcodes[at] = Opcode::TAIL_CALL as u8;
            }
        }

        self.consume_end_statement();
        self.emit_op(Opcode::RETURN);
    }

    pub(super) fn compile_statement(&mut self) {
        let mut is_temporary = false;
        let mut is_expression = false;

        if self.match_token(TokenKind::Break) {
            self.compile_break();
        } else if self.match_token(TokenKind::Continue) {
            self.compile_continue();
        } else if self.match_token(TokenKind::Return) {
            self.compile_return();
        } else if self.match_token(TokenKind::If) {
            self.compile_if_statement(false);
        } else if self.match_token(TokenKind::While) {
            self.compile_while_statement();
        } else if self.match_token(TokenKind::For) {
            self.compile_for_statement();
        } else {
            self.new_local = false;
            self.compile_expression();
            self.consume_end_statement();

            is_expression = true;
            is_temporary = !self.new_local;
            self.new_local = false;
        }

        // The REPL echoes the value of module level expressions.
        let main = self.func().kind == FuncType::Main;
        if self.options.repl_mode && main && is_expression {
            self.emit_op(Opcode::REPL_PRINT);
        }
        if is_temporary {
            self.emit_op(Opcode::POP);
        }
    }

    /// Classes, functions and imports may only appear at module level.
    pub(super) fn compile_top_level_statement(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.compile_class();
        } else if self.match_token(TokenKind::Def) {
            self.compile_function(FuncType::TopLevel);
        } else if self.match_token(TokenKind::Import) {
            self.compile_regular_import();
        } else if self.match_token(TokenKind::From) {
            self.compile_from_import();
        } else {
            self.compile_statement();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Configuration;
    use crate::error::PocketError;
    use crate::vm::Vm;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn run(source: &str) -> String {
        let out = Rc::new(RefCell::new(String::new()));
        let sink = Rc::clone(&out);
        let mut vm = Vm::new(Configuration {
            stdout_write: Some(Box::new(move |text| sink.borrow_mut().push_str(text))),
            ..Configuration::default()
        });
        vm.run_source("@stmt", source).unwrap();
        let text = out.borrow().clone();
        text
    }

    fn compile_error(source: &str) -> String {
        let mut vm = Vm::new(Configuration {
            stderr_write: None,
            ..Configuration::default()
        });
        match vm.run_source("@bad", source).unwrap_err() {
            PocketError::Compile(failure) => failure.errors()[0].message().to_string(),
            other => panic!("expected a compile error, got {}", other),
        }
    }

    #[test]
    fn test_if_elif_else_chain() {
        let source = "\
def grade(n)
  if n > 90 then return 'a'
  elif n > 50 then return 'b'
  else return 'c' end
end
print(grade(95), grade(60), grade(10))
";
        assert_eq!(run(source), "a b c\n");
    }

    #[test]
    fn test_while_with_break_and_continue() {
        let source = "\
i = 0; total = 0
while i < 10
  i += 1
  if i % 2 == 0 then continue end
  if i > 7 then break end
  total += i
end
print(total)
";
        assert_eq!(run(source), "16\n");
    }

    #[test]
    fn test_for_loops_over_sequences() {
        let source = "\
s = ''
for c in 'abc' do s += c.upper() end
for i in 0..3 do s += str(i) end
for x in [7, 8] do s += str(x) end
print(s)
";
        assert_eq!(run(source), "ABC01278\n");
    }

    #[test]
    fn test_break_closes_captured_locals() {
        let source = "\
fns = []
for i in 0..5
  j = i * 10
  fns.append(fn return j end)
  if i == 1 then break end
end
print(fns[0](), fns[1]())
";
        assert_eq!(run(source), "0 10\n");
    }

    #[test]
    fn test_locals_are_scoped_to_blocks() {
        let source = "\
def f()
  x = 1
  if true then
    y = x + 1
    x = y
  end
  return x
end
print(f())
";
        assert_eq!(run(source), "2\n");
    }

    #[test]
    fn test_statement_errors() {
        assert_eq!(compile_error("break\n"), "Cannot use 'break' outside a loop.");
        assert_eq!(compile_error("return 1\n"), "Invalid 'return' outside a function.");
        assert_eq!(
            compile_error("while true print(1) end\n"),
            "Expected enter block with newline or 'do'."
        );
        assert_eq!(
            compile_error("def f(a, a) end\n"),
            "Multiple definition of a parameter."
        );
        assert_eq!(
            compile_error("x = 1 y = 2\n"),
            "Expected statement end with '\\n' or ';'."
        );
        assert_eq!(compile_error("def () end\n"), "Expected a function name.");
    }
}
