//! Class declaration compilation.

use crate::lexer::TokenKind;
use crate::value::VarType;

use super::compiler::{Compiler, FuncType, NameKind};
use super::opcode::Opcode;

impl<'vm, 'src> Compiler<'vm, 'src> {
    /// `class Name [is Base] ["docstring"] (def ... end)* end`
    ///
    /// The class is created at runtime by `CREATE_CLASS` from the base on
    /// the stack, each method is bound to it, and it ends up in the global
    /// of its name.
    pub(super) fn compile_class(&mut self) {
        self.consume(TokenKind::Name, "Expected a class name.");
        if self.has_syntax_error {
            return;
        }
        let name = self.previous_text();

        let object = self.vm.builtin_classes[VarType::Object.index()];
        let (class, index) = self
            .vm
            .new_class(name, Some(object), Some(self.module), None);
        let Some(class_index) = index else {
            panic!("a class with an owner has a constant index");
        };
        self.check_max_constants(class_index);
        self.parsing_class = true;

        if self.match_token(TokenKind::Is) {
            self.consume(TokenKind::Name, "Expected a class name to inherit.");
            if !self.has_syntax_error {
                self.expr_name();
            }
        } else {
            self.emit_push_value(NameKind::BuiltinTy, VarType::Object.index());
        }
        if self.has_syntax_error {
            self.parsing_class = false;
            return;
        }

        self.emit_op(Opcode::CREATE_CLASS);
        self.emit_short(class_index);

        self.skip_new_lines();
        if self.match_token(TokenKind::String) {
            let docstring = self.previous.string().to_string();
            self.add_string(&docstring);
            self.vm.heap.class_mut(class).docstring = Some(docstring);
        }

        self.skip_new_lines();
        while !self.match_token(TokenKind::End) {
            if self.has_syntax_error {
                break;
            }
            if self.match_token(TokenKind::Eof) {
                let token = self.previous.clone();
                self.syntax_error(&token, "Unexpected EOF while parsing class.");
                break;
            }

            self.consume(TokenKind::Def, "Expected method definition.");
            if self.has_syntax_error {
                break;
            }
            self.compile_function(FuncType::Method);
            if self.has_syntax_error {
                break;
            }
            self.skip_new_lines();
        }

        let index = self.add_variable(name);
        self.emit_store_value(NameKind::Global, index);
        self.emit_op(Opcode::POP);
        self.parsing_class = false;
    }

    /// An operator overload after `def`, as its method name and the exact
    /// number of parameters it takes.
    pub(super) fn match_operator_method(&mut self) -> Option<(&'static str, usize)> {
        let unary_self = |this: &mut Self, name: &'static str| {
            if this.match_token(TokenKind::SelfKw) {
                return Some((name, 0));
            }
            let token = this.previous.clone();
            this.syntax_error(&token, "Expected keyword self for unary operator definition.");
            None
        };

        if self.match_token(TokenKind::Plus) {
            if self.match_token(TokenKind::SelfKw) {
                return Some(("+self", 0));
            }
            return Some(("+", 1));
        }
        if self.match_token(TokenKind::Minus) {
            if self.match_token(TokenKind::SelfKw) {
                return Some(("-self", 0));
            }
            return Some(("-", 1));
        }
        if self.match_token(TokenKind::Tilde) {
            return unary_self(self, "~self");
        }
        if self.match_token(TokenKind::Not) {
            return unary_self(self, "!self");
        }
        if self.match_token(TokenKind::LBracket) {
            if self.match_token(TokenKind::RBracket) {
                if self.match_token(TokenKind::Eq) {
                    return Some(("[]=", 2));
                }
                return Some(("[]", 1));
            }
            let token = self.previous.clone();
            self.syntax_error(&token, "Invalid operator method symbol.");
            return None;
        }

        const BINARY: [(TokenKind, &str); 25] = [
            (TokenKind::PlusEq, "+="),
            (TokenKind::MinusEq, "-="),
            (TokenKind::Star, "*"),
            (TokenKind::StarEq, "*="),
            (TokenKind::Slash, "/"),
            (TokenKind::StarStar, "**"),
            (TokenKind::SlashEq, "/="),
            (TokenKind::Percent, "%"),
            (TokenKind::PercentEq, "%="),
            (TokenKind::StarStarEq, "**="),
            (TokenKind::Amp, "&"),
            (TokenKind::AmpEq, "&="),
            (TokenKind::Pipe, "|"),
            (TokenKind::PipeEq, "|="),
            (TokenKind::Caret, "^"),
            (TokenKind::CaretEq, "^="),
            (TokenKind::ShiftLeft, "<<"),
            (TokenKind::ShiftLeftEq, "<<="),
            (TokenKind::ShiftRight, ">>"),
            (TokenKind::ShiftRightEq, ">>="),
            (TokenKind::EqEq, "=="),
            (TokenKind::Gt, ">"),
            (TokenKind::Lt, "<"),
            (TokenKind::DotDot, ".."),
            (TokenKind::In, "in"),
        ];
        for (kind, name) in BINARY {
            if self.match_token(kind) {
                return Some((name, 1));
            }
        }
        None
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
        vm.run_source("@class", source).unwrap();
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
    fn test_constructor_and_methods() {
        let source = "\
class Point
  def _init(x, y)
    self.x = x; self.y = y
  end
  def sum() return self.x + self.y end
end
p = Point(3, 4)
print(p.sum(), p.x)
";
        assert_eq!(run(source), "7 3\n");
    }

    #[test]
    fn test_inheritance_and_super_calls() {
        let source = "\
class Animal
  def _init(name) self.name = name end
  def speak() return self.name + ' makes a sound' end
end
class Dog is Animal
  def _init(name) super(name) end
  def speak() return super.speak() + ' (woof)' end
end
print(Dog('rex').speak())
print(Dog('rex') is Animal)
";
        assert_eq!(run(source), "rex makes a sound (woof)\ntrue\n");
    }

    #[test]
    fn test_operator_methods() {
        let source = "\
class Vec
  def _init(x) self.x = x end
  def +(other) return Vec(self.x + other.x) end
  def -self() return Vec(-self.x) end
  def ==(other) return self.x == other.x end
  def [](i) return self.x * i end
  def _str() return 'Vec(' + str(self.x) + ')' end
end
a = Vec(1) + Vec(2)
print(a, -a, a == Vec(3), a[10])
";
        assert_eq!(run(source), "Vec(3) Vec(-3) true 30\n");
    }

    #[test]
    fn test_class_docstring() {
        let mut vm = Vm::new(Configuration::default());
        let module = vm
            .run_source("@doc", "class A\n  \"About A.\"\nend\n")
            .unwrap();
        let class = vm.get_global(module, "A").unwrap().as_object().unwrap();
        assert_eq!(vm.heap.class(class).docstring.as_deref(), Some("About A."));
    }

    #[test]
    fn test_class_errors() {
        assert_eq!(compile_error("class end\n"), "Expected a class name.");
        assert_eq!(
            compile_error("class A\n  x = 1\nend\n"),
            "Expected method definition."
        );
        assert_eq!(
            compile_error("class A\n  def ~(x) end\nend\n"),
            "Expected keyword self for unary operator definition."
        );
        assert_eq!(
            compile_error("class A\n  def +(a, b) end\nend\n"),
            "Expected exactly 1 parameters."
        );
        assert_eq!(
            compile_error("class A\n  def f() return self end\n"),
            "Unexpected EOF while parsing class."
        );
        assert_eq!(
            compile_error("class A\n  def _init() return 1 end\nend\n"),
            "Cannor 'return' a value from constructor."
        );
    }
}
