//! Expression parsing: a Pratt parser driven by the token kinds.

use crate::lexer::TokenKind;
use crate::value::Var;

use super::compiler::{Compiler, FuncType, NameKind, Precedence, DEPTH_GLOBAL};
use super::opcode::Opcode;

/// Binding power of `kind` as an infix operator.
fn infix_precedence(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Dot => Precedence::Attrib,
        TokenKind::DotDot => Precedence::Range,
        TokenKind::LParen => Precedence::Call,
        TokenKind::LBracket => Precedence::Subscript,
        TokenKind::Percent | TokenKind::Star | TokenKind::Slash => Precedence::Factor,
        TokenKind::Plus | TokenKind::Minus => Precedence::Term,
        TokenKind::StarStar => Precedence::Exponent,
        TokenKind::Amp => Precedence::BitwiseAnd,
        TokenKind::Pipe => Precedence::BitwiseOr,
        TokenKind::Caret => Precedence::BitwiseXor,
        TokenKind::ShiftLeft | TokenKind::ShiftRight => Precedence::BitwiseShift,
        TokenKind::Gt | TokenKind::Lt | TokenKind::GtEq | TokenKind::LtEq => {
            Precedence::Comparison
        }
        TokenKind::EqEq | TokenKind::NotEq => Precedence::Equality,
        TokenKind::In | TokenKind::Is => Precedence::Test,
        TokenKind::And => Precedence::LogicalAnd,
        TokenKind::Or => Precedence::LogicalOr,
        _ => Precedence::None,
    }
}

fn has_prefix(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::LParen
            | TokenKind::LBracket
            | TokenKind::LBrace
            | TokenKind::Tilde
            | TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Not
            | TokenKind::Fn
            | TokenKind::Null
            | TokenKind::True
            | TokenKind::False
            | TokenKind::SelfKw
            | TokenKind::Super
            | TokenKind::Name
            | TokenKind::Number
            | TokenKind::String
            | TokenKind::StringInterp
    )
}

impl<'vm, 'src> Compiler<'vm, 'src> {
    /// Compile an expression, leaving its value on the stack.
    pub(super) fn compile_expression(&mut self) {
        self.parse_precedence(Precedence::Lowest);
    }

    pub(super) fn parse_precedence(&mut self, precedence: Precedence) {
        self.lex_token();
        if self.has_syntax_error {
            return;
        }

        let kind = self.previous.kind;
        if !has_prefix(kind) {
            let token = self.previous.clone();
            self.syntax_error(&token, "Expected an expression.");
            return;
        }

        let l_value = self.l_value;
        let can_define = self.can_define;
        // Only a bare name can define a variable.
        if kind != TokenKind::Name {
            self.can_define = false;
        }

        self.l_value = precedence <= Precedence::Lowest;
        self.prefix(kind);

        self.can_define = false;
        self.is_last_call = false;

        while infix_precedence(self.peek()) >= precedence {
            self.lex_token();
            if self.has_syntax_error {
                return;
            }
            let op = self.previous.kind;
            self.infix(op);
            self.is_last_call = op == TokenKind::LParen;
        }

        self.l_value = l_value;
        self.can_define = can_define;
    }

    fn prefix(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::LParen => self.expr_grouping(),
            TokenKind::LBracket => self.expr_list(),
            TokenKind::LBrace => self.expr_map(),
            TokenKind::Tilde | TokenKind::Plus | TokenKind::Minus | TokenKind::Not => {
                self.expr_unary_op()
            }
            TokenKind::Fn => self.expr_function(),
            TokenKind::Null | TokenKind::True | TokenKind::False => self.expr_value(),
            TokenKind::SelfKw => self.expr_self(),
            TokenKind::Super => self.expr_super(),
            TokenKind::Name => self.expr_name(),
            TokenKind::Number | TokenKind::String => self.expr_literal(),
            TokenKind::StringInterp => self.expr_interpolation(),
            other => panic!("no prefix rule for {}", other),
        }
    }

    fn infix(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::Dot => self.expr_attrib(),
            TokenKind::LParen => self.compile_call(Opcode::CALL, None),
            TokenKind::LBracket => self.expr_subscript(),
            TokenKind::And => self.expr_and(),
            TokenKind::Or => self.expr_or(),
            _ => self.expr_binary_op(),
        }
    }

    /// Arguments of a call whose callee (and receiver) is on the stack.
    /// Method and super calls name the method by its string constant.
    pub(super) fn compile_call(&mut self, call: Opcode, method: Option<usize>) {
        let mut argc = 0;

        if self.optional_call_paren {
            self.optional_call_paren = false;
            self.compile_expression();
            argc = 1;
        } else if !self.match_token(TokenKind::RParen) {
            loop {
                self.skip_new_lines();
                self.compile_expression();
                self.skip_new_lines();
                argc += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
            self.consume(TokenKind::RParen, "Expected ')' after parameter list.");
        }

        self.emit_op(call);
        self.emit_byte(argc as u8);
        if let Some(method) = method {
            self.emit_short(method);
        }

        // The arguments are popped and the callee replaced by the result.
        self.change_stack(-(argc as i32));
    }

    /// `f fn ... end` passes the literal without parentheses.
    fn compile_optional_paren_call(&mut self, method: Option<usize>) -> bool {
        if self.peek() != TokenKind::Fn {
            return false;
        }
        self.optional_call_paren = true;
        let call = match method {
            Some(_) => Opcode::METHOD_CALL,
            None => Opcode::CALL,
        };
        self.compile_call(call, method);
        true
    }

    fn expr_literal(&mut self) {
        let index = match self.previous.kind {
            TokenKind::Number => self.add_constant(Var::Number(self.previous.number())),
            _ => {
                let text = self.previous.string().to_string();
                self.add_string(&text)
            }
        };
        self.emit_op(Opcode::PUSH_CONSTANT);
        self.emit_short(index);
    }

    /// `"Hello $name!"` compiles to `list_join(["Hello ", name, "!"])`.
    fn expr_interpolation(&mut self) {
        let list_join = self.bifn_list_join;
        self.emit_op(Opcode::PUSH_BUILTIN_FN);
        self.emit_byte(list_join as u8);

        self.emit_op(Opcode::PUSH_LIST);
        let size_at = self.emit_short(0);

        let mut size = 0;
        loop {
            self.expr_literal();
            self.emit_op(Opcode::LIST_APPEND);
            size += 1;

            self.skip_new_lines();
            self.compile_expression();
            self.emit_op(Opcode::LIST_APPEND);
            size += 1;
            self.skip_new_lines();

            if !self.match_token(TokenKind::StringInterp) {
                break;
            }
        }

        // The tail of the string; skipped when empty.
        self.consume(TokenKind::String, "Non terminated interpolated string.");
        if self.previous.kind == TokenKind::String && !self.previous.string().is_empty() {
            self.expr_literal();
            self.emit_op(Opcode::LIST_APPEND);
            size += 1;
        }
        self.patch_list_size(size_at, size);

        self.emit_op(Opcode::CALL);
        self.emit_byte(1);
        self.change_stack(-1);
    }

    fn expr_function(&mut self) {
        let can_define = self.can_define;
        self.can_define = true;
        self.compile_function(FuncType::Literal);
        self.can_define = can_define;
    }

    pub(super) fn expr_name(&mut self) {
        let token = self.previous.clone();
        let name = self.previous_text();
        let result = self.search_name(name);

        if self.l_value && self.match_assignment() {
            let assignment = self.previous.kind;
            self.skip_new_lines();

            let mut kind = result.kind;
            let mut index = result.index;
            let mut new_local = false;

            if assignment == TokenKind::Eq {
                // Assigning a builtin name shadows it with a variable.
                if matches!(
                    result.kind,
                    NameKind::NotDefined | NameKind::BuiltinFn | NameKind::BuiltinTy
                ) {
                    kind = if self.scope_depth == DEPTH_GLOBAL {
                        NameKind::Global
                    } else {
                        NameKind::Local
                    };
                    index = self.add_variable(name);
                    new_local = kind == NameKind::Local;

                    if !self.can_define {
                        self.semantic_error(&token, "Variable definition isn't allowed here.");
                    }
                }

                let can_define = self.can_define;
                self.can_define = false;
                self.compile_expression();
                self.can_define = can_define;
            } else {
                if result.kind == NameKind::NotDefined {
                    self.semantic_error(&token, format!("Name '{}' is not defined.", name));
                }
                self.emit_push_value(kind, index);
                self.compile_expression();
                self.emit_assigned_op(assignment);
            }

            if new_local {
                // The value already sits in the new local's slot.
                self.new_local = true;
                debug_assert!(self.has_errors || self.func().stack_size - 1 == index as i32);
            } else {
                self.emit_store_value(kind, index);
            }
            return;
        }

        if result.kind == NameKind::NotDefined {
            if self.scope_depth == DEPTH_GLOBAL {
                self.semantic_error(&token, format!("Name '{}' is not defined.", name));
            } else {
                // Maybe a global defined later in the module.
                self.emit_op(Opcode::PUSH_GLOBAL);
                let at = self.emit_byte(0xff);
                self.add_forward(at, token);
            }
        } else {
            self.emit_push_value(result.kind, result.index);
        }

        self.compile_optional_paren_call(None);
    }

    // `a or b`: when `a` is truthy it stays as the result and `b` is
    // skipped, otherwise `a` is popped and `b` evaluated. `and` mirrors it.

    fn expr_or(&mut self) {
        self.emit_op(Opcode::OR);
        let patch = self.emit_short(0xffff);
        self.skip_new_lines();
        self.parse_precedence(Precedence::LogicalOr);
        self.patch_jump(patch);
    }

    fn expr_and(&mut self) {
        self.emit_op(Opcode::AND);
        let patch = self.emit_short(0xffff);
        self.skip_new_lines();
        self.parse_precedence(Precedence::LogicalAnd);
        self.patch_jump(patch);
    }

    fn expr_binary_op(&mut self) {
        let op = self.previous.kind;
        self.skip_new_lines();
        self.parse_precedence(infix_precedence(op).next());

        let arithmetic = match op {
            TokenKind::Percent => Some(Opcode::MOD),
            TokenKind::Plus => Some(Opcode::ADD),
            TokenKind::Minus => Some(Opcode::SUBTRACT),
            TokenKind::Star => Some(Opcode::MULTIPLY),
            TokenKind::Slash => Some(Opcode::DIVIDE),
            TokenKind::StarStar => Some(Opcode::EXPONENT),
            TokenKind::Amp => Some(Opcode::BIT_AND),
            TokenKind::Pipe => Some(Opcode::BIT_OR),
            TokenKind::Caret => Some(Opcode::BIT_XOR),
            TokenKind::ShiftRight => Some(Opcode::BIT_RSHIFT),
            TokenKind::ShiftLeft => Some(Opcode::BIT_LSHIFT),
            _ => None,
        };
        if let Some(opcode) = arithmetic {
            self.emit_op(opcode);
            self.emit_byte(0);
            return;
        }

        let opcode = match op {
            TokenKind::DotDot => Opcode::RANGE,
            TokenKind::Gt => Opcode::GT,
            TokenKind::Lt => Opcode::LT,
            TokenKind::EqEq => Opcode::EQEQ,
            TokenKind::NotEq => Opcode::NOTEQ,
            TokenKind::GtEq => Opcode::GTEQ,
            TokenKind::LtEq => Opcode::LTEQ,
            TokenKind::In => Opcode::IN,
            TokenKind::Is => Opcode::IS,
            other => panic!("{} is not a binary operator", other),
        };
        self.emit_op(opcode);
    }

    fn expr_unary_op(&mut self) {
        let op = self.previous.kind;
        self.skip_new_lines();
        self.parse_precedence(Precedence::Unary.next());

        let opcode = match op {
            TokenKind::Tilde => Opcode::BIT_NOT,
            TokenKind::Plus => Opcode::POSITIVE,
            TokenKind::Minus => Opcode::NEGATIVE,
            _ => Opcode::NOT,
        };
        self.emit_op(opcode);
    }

    fn expr_grouping(&mut self) {
        self.skip_new_lines();
        self.compile_expression();
        self.skip_new_lines();
        self.consume(TokenKind::RParen, "Expected ')' after expression.");
    }

    fn expr_list(&mut self) {
        self.emit_op(Opcode::PUSH_LIST);
        let size_at = self.emit_short(0);

        let mut size = 0;
        loop {
            self.skip_new_lines();
            if self.peek() == TokenKind::RBracket {
                break;
            }
            self.compile_expression();
            self.emit_op(Opcode::LIST_APPEND);
            size += 1;
            self.skip_new_lines();
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }

        self.skip_new_lines();
        self.consume(TokenKind::RBracket, "Expected ']' after list elements.");
        self.patch_list_size(size_at, size);
    }

    fn expr_map(&mut self) {
        self.emit_op(Opcode::PUSH_MAP);

        loop {
            self.skip_new_lines();
            if self.peek() == TokenKind::RBrace {
                break;
            }
            self.compile_expression();
            self.consume(TokenKind::Colon, "Expected ':' after map's key.");
            self.compile_expression();
            self.emit_op(Opcode::MAP_INSERT);
            self.skip_new_lines();
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }

        self.skip_new_lines();
        self.consume(TokenKind::RBrace, "Expected '}' after map elements.");
    }

    fn expr_attrib(&mut self) {
        self.consume(TokenKind::Name, "Expected an attribute name after '.'.");
        let name = self.previous_text();
        let index = self.add_string(name);

        if self.match_token(TokenKind::LParen) {
            self.compile_call(Opcode::METHOD_CALL, Some(index));
            return;
        }
        if self.compile_optional_paren_call(Some(index)) {
            return;
        }

        if self.l_value && self.match_assignment() {
            let assignment = self.previous.kind;
            self.skip_new_lines();
            if assignment == TokenKind::Eq {
                self.compile_expression();
            } else {
                self.emit_op(Opcode::GET_ATTRIB_KEEP);
                self.emit_short(index);
                self.compile_expression();
                self.emit_assigned_op(assignment);
            }
            self.emit_op(Opcode::SET_ATTRIB);
            self.emit_short(index);
        } else {
            self.emit_op(Opcode::GET_ATTRIB);
            self.emit_short(index);
        }
    }

    fn expr_subscript(&mut self) {
        self.compile_expression();
        self.consume(TokenKind::RBracket, "Expected ']' after subscription ends.");

        if self.l_value && self.match_assignment() {
            let assignment = self.previous.kind;
            self.skip_new_lines();
            if assignment == TokenKind::Eq {
                self.compile_expression();
            } else {
                self.emit_op(Opcode::GET_SUBSCRIPT_KEEP);
                self.compile_expression();
                self.emit_assigned_op(assignment);
            }
            self.emit_op(Opcode::SET_SUBSCRIPT);
        } else {
            self.emit_op(Opcode::GET_SUBSCRIPT);
        }
    }

    fn expr_value(&mut self) {
        let opcode = match self.previous.kind {
            TokenKind::Null => Opcode::PUSH_NULL,
            TokenKind::True => Opcode::PUSH_TRUE,
            _ => Opcode::PUSH_FALSE,
        };
        self.emit_op(opcode);
    }

    fn in_method(&self) -> bool {
        matches!(self.func().kind, FuncType::Method | FuncType::Constructor)
    }

    fn expr_self(&mut self) {
        if self.in_method() {
            self.emit_op(Opcode::PUSH_SELF);
            return;
        }

        let token = self.previous.clone();
        if self.parsing_class {
            self.semantic_error(&token, "Closures cannot capture 'self'.");
        } else {
            self.semantic_error(&token, "Invalid use of 'self'.");
        }
    }

    /// `super()` calls the overridden version of the current method,
    /// `super.name()` any method of the parent class.
    fn expr_super(&mut self) {
        if !self.in_method() {
            let token = self.previous.clone();
            self.semantic_error(&token, "Invalid use of 'super'.");
            return;
        }

        let name = if self.match_token(TokenKind::LParen) {
            let function = self.func().function;
            self.vm.heap.function(function).name.clone()
        } else {
            self.consume(TokenKind::Dot, "Invalid use of 'super'.");
            self.consume(TokenKind::Name, "Expected a method name after 'super'.");
            let name = self.previous_text().to_string();
            self.consume(TokenKind::LParen, "Expected symbol '('.");
            name
        };
        if self.has_syntax_error {
            return;
        }

        self.emit_op(Opcode::PUSH_SELF);
        let index = self.add_string(&name);
        self.compile_call(Opcode::SUPER_CALL, Some(index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::vm::Vm;
    use pretty_assertions::assert_eq;

    fn eval(source: &str) -> String {
        let mut vm = Vm::new(Configuration::default());
        let module = vm.run_source("@expr", source).unwrap();
        let value = vm.get_global(module, "r").unwrap();
        vm.heap.repr(value)
    }

    fn compile_error(source: &str) -> String {
        let mut vm = Vm::new(Configuration {
            stderr_write: None,
            ..Configuration::default()
        });
        let err = vm.run_source("@bad", source).unwrap_err();
        match err {
            crate::error::PocketError::Compile(failure) => {
                failure.errors()[0].message().to_string()
            }
            other => panic!("expected a compile error, got {}", other),
        }
    }

    #[test]
    fn test_infix_binding() {
        assert!(infix_precedence(TokenKind::Star) > infix_precedence(TokenKind::Plus));
        assert_eq!(infix_precedence(TokenKind::Not), Precedence::None);
        assert!(!has_prefix(TokenKind::Star));
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval("r = 1 + 2 * 3 - 4 / 2\n"), "5");
        assert_eq!(eval("r = (1 + 2) * 3\n"), "9");
        assert_eq!(eval("r = -2 ** 2\n"), "-4");
        assert_eq!(eval("r = 2 ** 3 ** 2\n"), "64");
        assert_eq!(eval("r = 1 + 2 == 3 and not false\n"), "true");
    }

    #[test]
    fn test_logical_operators_short_circuit() {
        assert_eq!(eval("r = null or 'x'\n"), "\"x\"");
        assert_eq!(eval("r = 0 and [][5]\n"), "0");
    }

    #[test]
    fn test_collections_and_subscripts() {
        assert_eq!(eval("r = [1, 2,\n 3]\n"), "[1, 2, 3]");
        assert_eq!(eval("r = {'a': 1}['a']\n"), "1");
        assert_eq!(eval("l = [1, 2]\nl[0] += 10\nr = l\n"), "[11, 2]");
        assert_eq!(eval("r = []\n"), "[]");
    }

    #[test]
    fn test_string_interpolation() {
        assert_eq!(eval("n = 3\nr = \"n=$n, ${n * 2}!\"\n"), "\"n=3, 6!\"");
        assert_eq!(eval("r = \"${1 + 1}\"\n"), "\"2\"");
    }

    #[test]
    fn test_compound_assignment_on_attributes() {
        let source = "\
class C
  def _init() self.x = 1 end
end
c = C()
c.x += 4
r = c.x
";
        assert_eq!(eval(source), "5");
    }

    #[test]
    fn test_function_literal_without_parentheses() {
        let source = "\
def apply(f) return f() end
r = apply fn return 7 end
";
        assert_eq!(eval(source), "7");
    }

    #[test]
    fn test_expression_errors() {
        assert_eq!(compile_error("x = *\n"), "Expected an expression.");
        assert_eq!(compile_error("x = self\n"), "Invalid use of 'self'.");
        assert_eq!(compile_error("def f() super() end\n"), "Invalid use of 'super'.");
        assert_eq!(compile_error("x = y\n"), "Name 'y' is not defined.");
        assert_eq!(compile_error("x = [1, 2\n"), "Expected ']' after list elements.");
    }
}
