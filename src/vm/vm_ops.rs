//! Operator semantics: numeric fast paths, builtin specializations and
//! instance overloads, plus value-to-text conversion.

use crate::error::VmError;
use crate::gc::ObjRef;
use crate::value::{Object, Var, VarType};

use super::opcode::Opcode;
use super::Vm;

const RIGHT_OPERAND: &str = "Right operand";

/// The source symbol of a binary operator, which also names its overload.
fn operator_symbol(op: Opcode) -> &'static str {
    match op {
        Opcode::ADD => "+",
        Opcode::SUBTRACT => "-",
        Opcode::MULTIPLY => "*",
        Opcode::DIVIDE => "/",
        Opcode::EXPONENT => "**",
        Opcode::MOD => "%",
        Opcode::BIT_AND => "&",
        Opcode::BIT_OR => "|",
        Opcode::BIT_XOR => "^",
        Opcode::BIT_LSHIFT => "<<",
        Opcode::BIT_RSHIFT => ">>",
        Opcode::EQEQ | Opcode::NOTEQ => "==",
        Opcode::LT => "<",
        Opcode::GT => ">",
        Opcode::RANGE => "..",
        Opcode::IN => "in",
        other => panic!("{} is not a binary operator", other.name()),
    }
}

fn shift_left(value: i64, by: i64) -> i64 {
    if (0..64).contains(&by) {
        value.wrapping_shl(by as u32)
    } else {
        0
    }
}

fn shift_right(value: i64, by: i64) -> i64 {
    if (0..64).contains(&by) {
        value >> by
    } else if value < 0 {
        -1
    } else {
        0
    }
}

pub(crate) fn too_deep_to_format() -> VmError {
    VmError::new("Maximum recursion depth exceeded.")
}

impl Vm {
    pub(crate) fn unary_op(&mut self, op: Opcode, value: Var) -> Result<Var, VmError> {
        match op {
            Opcode::POSITIVE => {
                if value.as_numeric().is_some() {
                    return Ok(value);
                }
                self.unary_overload(value, "+self", "unary +")
            }
            Opcode::NEGATIVE => {
                if let Some(n) = value.as_numeric() {
                    return Ok(Var::Number(-n));
                }
                self.unary_overload(value, "-self", "unary -")
            }
            Opcode::BIT_NOT => {
                if let Some(i) = value.as_integer() {
                    return Ok(Var::Number(!i as f64));
                }
                self.unary_overload(value, "~self", "unary ~")
            }
            Opcode::NOT => match self.call_unary_method(value, "!self")? {
                Some(result) => Ok(result),
                None => Ok(Var::Bool(!self.heap.to_bool(value))),
            },
            other => panic!("{} is not a unary operator", other.name()),
        }
    }

    fn unary_overload(&mut self, value: Var, method: &str, op: &str) -> Result<Var, VmError> {
        if let Some(result) = self.call_unary_method(value, method)? {
            return Ok(result);
        }
        Err(VmError::new(format!(
            "Unsupported operand ({}) for unary operator {}.",
            self.heap.type_name(value),
            op
        )))
    }

    /// Apply a binary operator. `inplace` marks compound assignment, which
    /// lets lists grow in place and tries the `op=` overload first.
    pub(crate) fn binary_op(
        &mut self,
        op: Opcode,
        a: Var,
        b: Var,
        inplace: bool,
    ) -> Result<Var, VmError> {
        match op {
            Opcode::ADD => self.add(a, b, inplace),
            Opcode::SUBTRACT => self.arithmetic(op, a, b, inplace, |x, y| x - y),
            Opcode::MULTIPLY => self.multiply(a, b, inplace),
            Opcode::DIVIDE => self.arithmetic(op, a, b, inplace, |x, y| x / y),
            Opcode::EXPONENT => self.arithmetic(op, a, b, inplace, f64::powf),
            Opcode::MOD => self.arithmetic(op, a, b, inplace, |x, y| x % y),

            Opcode::BIT_AND => self.bitwise(op, a, b, inplace, |x, y| x & y),
            Opcode::BIT_OR => self.bitwise(op, a, b, inplace, |x, y| x | y),
            Opcode::BIT_XOR => self.bitwise(op, a, b, inplace, |x, y| x ^ y),
            Opcode::BIT_LSHIFT => self.bitwise(op, a, b, inplace, shift_left),
            Opcode::BIT_RSHIFT => self.bitwise(op, a, b, inplace, shift_right),

            Opcode::EQEQ => self.equals(a, b),
            Opcode::NOTEQ => {
                let equal = self.equals(a, b)?;
                Ok(Var::Bool(!self.heap.to_bool(equal)))
            }
            Opcode::LT => self.compare(op, a, b, |x, y| x < y),
            Opcode::GT => self.compare(op, a, b, |x, y| x > y),
            Opcode::LTEQ => {
                let lesser = self.compare(Opcode::LT, a, b, |x, y| x < y)?;
                if self.heap.to_bool(lesser) {
                    return Ok(lesser);
                }
                self.equals(a, b)
            }
            Opcode::GTEQ => {
                let greater = self.compare(Opcode::GT, a, b, |x, y| x > y)?;
                if self.heap.to_bool(greater) {
                    return Ok(greater);
                }
                self.equals(a, b)
            }

            Opcode::RANGE => self.range(a, b),
            Opcode::IN => self.contains(a, b).map(Var::Bool),
            Opcode::IS => self.is_instance(a, b).map(Var::Bool),

            other => panic!("{} is not a binary operator", other.name()),
        }
    }

    /// Numeric left operand: the right one must be numeric too.
    fn numeric_operands(&self, a: Var, b: Var) -> Option<Result<(f64, f64), VmError>> {
        let x = a.as_numeric()?;
        Some(match b.as_numeric() {
            Some(y) => Ok((x, y)),
            None => Err(VmError::new(format!(
                "{} must be a numeric value.",
                RIGHT_OPERAND
            ))),
        })
    }

    /// Try the instance overloads of `op`, the compound form first.
    fn binary_overload(
        &mut self,
        op: Opcode,
        a: Var,
        b: Var,
        inplace: bool,
    ) -> Result<Var, VmError> {
        let symbol = operator_symbol(op);
        if self.heap.is_type(a, VarType::Instance) {
            if inplace {
                let compound = format!("{}=", symbol);
                if let Some(result) = self.call_binary_method(a, b, &compound)? {
                    return Ok(result);
                }
            }
            if let Some(result) = self.call_binary_method(a, b, symbol)? {
                return Ok(result);
            }
        }
        Err(VmError::new(format!(
            "Unsupported operand types for operator '{}' {} and {}",
            symbol,
            self.heap.type_name(a),
            self.heap.type_name(b)
        )))
    }

    fn arithmetic(
        &mut self,
        op: Opcode,
        a: Var,
        b: Var,
        inplace: bool,
        apply: fn(f64, f64) -> f64,
    ) -> Result<Var, VmError> {
        if let Some(operands) = self.numeric_operands(a, b) {
            let (x, y) = operands?;
            return Ok(Var::Number(apply(x, y)));
        }
        self.binary_overload(op, a, b, inplace)
    }

    fn bitwise(
        &mut self,
        op: Opcode,
        a: Var,
        b: Var,
        inplace: bool,
        apply: fn(i64, i64) -> i64,
    ) -> Result<Var, VmError> {
        if let Some(x) = a.as_integer() {
            let Some(y) = b.as_integer() else {
                return Err(VmError::new(format!("{} must be an Integer.", RIGHT_OPERAND)));
            };
            return Ok(Var::Number(apply(x, y) as f64));
        }
        self.binary_overload(op, a, b, inplace)
    }

    fn compare(
        &mut self,
        op: Opcode,
        a: Var,
        b: Var,
        apply: fn(f64, f64) -> bool,
    ) -> Result<Var, VmError> {
        if let Some(operands) = self.numeric_operands(a, b) {
            let (x, y) = operands?;
            return Ok(Var::Bool(apply(x, y)));
        }
        self.binary_overload(op, a, b, false)
    }

    fn add(&mut self, a: Var, b: Var, inplace: bool) -> Result<Var, VmError> {
        if let Some(operands) = self.numeric_operands(a, b) {
            let (x, y) = operands?;
            return Ok(Var::Number(x + y));
        }

        if let (Var::Object(ra), Var::Object(rb)) = (a, b) {
            match (self.heap.get(ra), self.heap.get(rb)) {
                (Object::String(x), Object::String(y)) => {
                    let joined = format!("{}{}", x.as_str(), y.as_str());
                    return Ok(Var::Object(self.new_string(joined)));
                }
                (Object::List(x), Object::List(y)) => {
                    if inplace {
                        let tail = y.elements.to_vec();
                        self.heap.list_mut(ra).elements.concat(&tail);
                        self.heap.remeasure(ra);
                        return Ok(a);
                    }
                    let mut elements = x.elements.to_vec();
                    elements.extend_from_slice(&y.elements);
                    return Ok(Var::Object(self.new_list(elements)));
                }
                _ => {}
            }
        }

        self.binary_overload(Opcode::ADD, a, b, inplace)
    }

    fn multiply(&mut self, a: Var, b: Var, inplace: bool) -> Result<Var, VmError> {
        if let Some(operands) = self.numeric_operands(a, b) {
            let (x, y) = operands?;
            return Ok(Var::Number(x * y));
        }

        if let Var::Object(r) = a {
            if let Object::String(s) = self.heap.get(r) {
                if let Some(count) = b.as_integer() {
                    if s.is_empty() {
                        return Ok(a);
                    }
                    // A negative count repeats nothing.
                    let repeated = s.as_str().repeat(count.max(0) as usize);
                    return Ok(Var::Object(self.new_string(repeated)));
                }
            }
        }

        self.binary_overload(Opcode::MULTIPLY, a, b, inplace)
    }

    fn equals(&mut self, a: Var, b: Var) -> Result<Var, VmError> {
        if let Some(result) = self.call_binary_method(a, b, "==")? {
            return Ok(result);
        }
        Ok(Var::Bool(self.heap.equals(a, b)))
    }

    fn range(&mut self, a: Var, b: Var) -> Result<Var, VmError> {
        if let (Var::Number(from), Var::Number(to)) = (a, b) {
            return Ok(Var::Object(self.new_range(from, to)));
        }

        if let Var::Object(r) = a {
            if matches!(self.heap.get(r), Object::String(_)) {
                let tail = self.to_string(b)?;
                let joined = format!("{}{}", self.heap.str(r), tail);
                return Ok(Var::Object(self.new_string(joined)));
            }
        }

        self.binary_overload(Opcode::RANGE, a, b, false)
    }

    /// `element in container`.
    pub(crate) fn contains(&mut self, element: Var, container: Var) -> Result<bool, VmError> {
        if let Var::Object(r) = container {
            match self.heap.get(r) {
                Object::String(s) => {
                    let Some(sub) = self.as_string(element) else {
                        return Err(VmError::new("Expected a string operand."));
                    };
                    return Ok(s.as_str().contains(self.heap.str(sub)));
                }
                Object::List(list) => {
                    return Ok(list
                        .elements
                        .iter()
                        .any(|item| self.heap.equals(element, *item)));
                }
                Object::Map(map) => return Ok(map.contains_key(&self.heap, element)),
                Object::Instance(_) => {
                    if let Some(result) = self.call_binary_method(container, element, "in")? {
                        return Ok(self.heap.to_bool(result));
                    }
                }
                _ => {}
            }
        }

        Err(VmError::new(format!(
            "Argument of type {} is not iterable.",
            self.heap.type_name(container)
        )))
    }

    /// `value is class`: true when `class` is on the value's class chain.
    pub(crate) fn is_instance(&self, value: Var, class: Var) -> Result<bool, VmError> {
        let class = match class {
            Var::Object(r) if matches!(self.heap.get(r), Object::Class(_)) => r,
            _ => return Err(VmError::new("Right operand must be a class.")),
        };
        let mut current = Some(self.get_class(value));
        while let Some(c) = current {
            if c == class {
                return Ok(true);
            }
            current = self.heap.class(c).super_class;
        }
        Ok(false)
    }

    fn as_string(&self, value: Var) -> Option<ObjRef> {
        match value {
            Var::Object(r) if matches!(self.heap.get(r), Object::String(_)) => Some(r),
            _ => None,
        }
    }

    /// The `str()` text of a value. Instances may override it with `_str` or
    /// `_repr`.
    pub(crate) fn to_string(&mut self, value: Var) -> Result<String, VmError> {
        match self.instance_text(value, false)? {
            Some(text) => Ok(text),
            None => self.heap.try_display(value).ok_or_else(too_deep_to_format),
        }
    }

    /// The `repr()` text of a value. Instances may override it with `_repr`.
    pub(crate) fn to_repr(&mut self, value: Var) -> Result<String, VmError> {
        match self.instance_text(value, true)? {
            Some(text) => Ok(text),
            None => self.heap.try_repr(value).ok_or_else(too_deep_to_format),
        }
    }

    fn instance_text(&mut self, value: Var, repr: bool) -> Result<Option<String>, VmError> {
        if !self.heap.is_type(value, VarType::Instance) {
            return Ok(None);
        }
        let method = if repr {
            None
        } else {
            self.has_method(value, "_str")
        };
        let Some(method) = method.or_else(|| self.has_method(value, "_repr")) else {
            return Ok(None);
        };
        // Builtin text methods end up here again through to_string.
        let function = self.heap.closure(method).function;
        if self.heap.function(function).is_native() {
            return Ok(None);
        }

        let result = self.call_closure(value, method, &[])?;
        match self.as_string(result) {
            Some(text) => Ok(Some(self.heap.str(text).to_string())),
            None => Err(VmError::new("method _str returned non-string type.")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use pretty_assertions::assert_eq;

    fn eval(source: &str, name: &str) -> String {
        let mut vm = Vm::new(Configuration::default());
        let module = vm.run_source("@ops", source).unwrap();
        let value = vm.get_global(module, name).unwrap();
        vm.heap.repr(value)
    }

    fn error(source: &str) -> String {
        let mut vm = Vm::new(Configuration {
            stderr_write: None,
            ..Configuration::default()
        });
        let err = vm.run_source("@ops", source).unwrap_err();
        err.as_runtime().unwrap().message.clone()
    }

    #[test]
    fn test_bools_are_numeric() {
        assert_eq!(eval("x = true + 1\n", "x"), "2");
        assert_eq!(eval("x = -true\n", "x"), "-1");
    }

    #[test]
    fn test_string_repetition() {
        assert_eq!(eval("x = 'ab' * 3\n", "x"), "\"ababab\"");
        assert_eq!(eval("x = 'ab' * -1\n", "x"), "\"\"");
    }

    #[test]
    fn test_list_concat_in_place_keeps_identity() {
        let source = "\
a = [1]
b = a
a += [2]
c = a + [3]
";
        assert_eq!(eval(source, "b"), "[1, 2]");
        assert_eq!(eval(source, "c"), "[1, 2, 3]");
    }

    #[test]
    fn test_bitwise_and_shifts() {
        assert_eq!(eval("x = 6 & 3\n", "x"), "2");
        assert_eq!(eval("x = 1 << 4\n", "x"), "16");
        assert_eq!(eval("x = ~0\n", "x"), "-1");
        assert_eq!(error("x = 1 | 0.5\n"), "Right operand must be an Integer.");
    }

    #[test]
    fn test_right_operand_must_be_numeric() {
        assert_eq!(error("x = 1 + 'a'\n"), "Right operand must be a numeric value.");
    }

    #[test]
    fn test_unsupported_unary() {
        assert_eq!(
            error("x = -'a'\n"),
            "Unsupported operand (String) for unary operator unary -."
        );
    }

    #[test]
    fn test_operator_overloads() {
        let source = "\
class V
  def _init(x) self.x = x end
  def +(other) return V(self.x + other.x) end
  def +=(other) self.x += other.x; return self end
  def ==(other) return self.x == other.x end
  def _str() return 'V(' + str(self.x) + ')' end
end
a = V(1) + V(2)
b = V(1)
b += V(5)
same = V(3) == V(3)
text = str(a)
";
        assert_eq!(eval(source, "same"), "true");
        assert_eq!(eval(source, "text"), "\"V(3)\"");
    }

    #[test]
    fn test_comparisons_fall_back_to_equality() {
        assert_eq!(eval("x = 2 <= 2\n", "x"), "true");
        assert_eq!(eval("x = 3 >= 4\n", "x"), "false");
    }

    #[test]
    fn test_membership() {
        assert_eq!(eval("x = 'ell' in 'hello'\n", "x"), "true");
        assert_eq!(eval("x = [1, 2] in [[1, 2]]\n", "x"), "true");
        assert_eq!(eval("x = 'k' in {'k': 1}\n", "x"), "true");
        assert_eq!(error("x = 1 in 2\n"), "Argument of type Number is not iterable.");
    }

    #[test]
    fn test_is_walks_the_class_chain() {
        let source = "\
class A end
class B is A end
x = B() is A
y = 1 is Number
z = 'a' is Object
";
        assert_eq!(eval(source, "x"), "true");
        assert_eq!(eval(source, "y"), "true");
        assert_eq!(eval(source, "z"), "true");
    }

    #[test]
    fn test_string_range_concatenates() {
        assert_eq!(eval("x = 'n=' .. 4\n", "x"), "\"n=4\"");
    }
}
