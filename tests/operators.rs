mod common;

use common::{output, runtime_error};
use pretty_assertions::assert_eq;

#[test]
fn test_numeric_operators() {
    assert_eq!(
        output("print(7 / 2, 7 % 3, 2 ** 10, -(3 - 5), 0.1 + 0.2 == 0.3)\n"),
        "3.5 1 1024 2 false\n"
    );
    assert_eq!(output("print(5 ^ 3, 5 | 2, 1 << 3, 16 >> 2)\n"), "6 7 8 4\n");
}

#[test]
fn test_builtin_specializations() {
    let source = "\
print('ab' + 'cd', 'ab' * 2, [1] + [2], 'v' .. 1.5)
r = 1..4
print(r, r is Range, r.last)
";
    assert_eq!(output(source), "abcd abab [1, 2] v1.5\n[Range:1..4] true 4\n");
}

#[test]
fn test_structural_equality() {
    let source = "\
print([1, [2, 'x']] == [1, [2, 'x']], {'a': [1]} == {'a': [1]})
print([1, 2] == [2, 1], 1..3 == 1..3, null == false)
";
    assert_eq!(output(source), "true true\nfalse true false\n");
}

#[test]
fn test_equality_of_cyclic_lists_terminates() {
    let source = "\
a = []; a.append(a)
b = []; b.append(b)
c = [1]; c.append(c)
print(a == a, a == b, a == c)
print(a)
";
    assert_eq!(output(source), "true true false\n[[...]]\n");
}

#[test]
fn test_deeply_nested_lists_compare_by_content() {
    let source = "\
a = []
b = []
for i in 0..1000
  a = [a]
  b = [b]
end
print(a == b, a == [b])
";
    assert_eq!(output(source), "true false\n");
}

#[test]
fn test_formatting_deep_lists_is_an_error() {
    let source = "\
a = []
for i in 0..20000 do a = [a] end
print(str(a).length > 0)
";
    assert_eq!(runtime_error(source), "Maximum recursion depth exceeded.");

    let nested = "a = []\nfor i in 0..100 do a = [a] end\nprint(str(a).length)\n";
    assert_eq!(output(nested), "202\n");
}

#[test]
fn test_numeric_addition_ignores_class_overloads() {
    let source = "\
class V
  def +(other) return 'overload' end
end
print(1 + 2, V() + 1, 2.5 + true)
";
    assert_eq!(output(source), "3 overload 3.5\n");
}

#[test]
fn test_compound_assignment_prefers_in_place_overload() {
    let source = "\
class Acc
  def _init() self.items = [] end
  def +=(x) self.items.append(x); return self end
  def +(x) return 'copied' end
end
a = Acc()
keep = a
a += 1
a += 2
print(keep.items, a == keep, a + 0)
";
    assert_eq!(output(source), "[1, 2] true copied\n");
}

#[test]
fn test_comparison_overloads() {
    let source = "\
class Money
  def _init(v) self.v = v end
  def <(other) return self.v < other.v end
  def >(other) return self.v > other.v end
end
print(Money(1) < Money(2), Money(1) > Money(2), min(Money(3), Money(2)).v)
";
    assert_eq!(output(source), "true false 2\n");
}

#[test]
fn test_operator_errors() {
    assert_eq!(
        runtime_error("x = [] - []\n"),
        "Unsupported operand types for operator '-' List and List"
    );
    assert_eq!(
        runtime_error("x = {} < {}\n"),
        "Unsupported operand types for operator '<' Map and Map"
    );
    assert_eq!(
        runtime_error("x = 1 in 5\n"),
        "Argument of type Number is not iterable."
    );
}
