//! Text conversion of values: `str()` and `repr()` forms.

use std::fmt::Write;

use crate::gc::{Heap, ObjRef};

use super::{Object, Var};

/// Render a number: `nan`, `+inf`, `-inf`, or the shortest text that reads
/// back to the same value. Integral values have no fraction.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "+" } else { "-" };
        format!("{}inf", sign)
    } else {
        format!("{}", n)
    }
}

/// Lists and maps nested deeper than this are not rendered.
pub const MAX_FORMAT_DEPTH: usize = 512;

impl Heap {
    /// The `str()` form: strings are raw, everything else as `repr()`.
    /// Containers past [`MAX_FORMAT_DEPTH`] are cut to `...`.
    pub fn display(&self, v: Var) -> String {
        let mut out = String::new();
        self.write_value(&mut out, v, &mut Vec::new(), false);
        out
    }

    /// The `repr()` form: strings are quoted and escaped.
    pub fn repr(&self, v: Var) -> String {
        let mut out = String::new();
        self.write_value(&mut out, v, &mut Vec::new(), true);
        out
    }

    /// Like [`Heap::display`], but `None` when nesting is too deep.
    pub fn try_display(&self, v: Var) -> Option<String> {
        let mut out = String::new();
        self.write_value(&mut out, v, &mut Vec::new(), false).then_some(out)
    }

    /// Like [`Heap::repr`], but `None` when nesting is too deep.
    pub fn try_repr(&self, v: Var) -> Option<String> {
        let mut out = String::new();
        self.write_value(&mut out, v, &mut Vec::new(), true).then_some(out)
    }

    /// `outer` holds the lists and maps being printed, to cut cycles.
    /// Returns false if a container was cut for depth.
    fn write_value(
        &self,
        out: &mut String,
        v: Var,
        outer: &mut Vec<ObjRef>,
        repr: bool,
    ) -> bool {
        let r = match v {
            Var::Null => {
                out.push_str("null");
                return true;
            }
            Var::Bool(b) => {
                out.push_str(if b { "true" } else { "false" });
                return true;
            }
            Var::Number(n) => {
                out.push_str(&format_number(n));
                return true;
            }
            Var::Object(r) => r,
        };

        match self.get(r) {
            Object::String(s) => {
                if outer.is_empty() && !repr {
                    out.push_str(s.as_str());
                } else {
                    write_quoted(out, s.as_str());
                }
            }

            Object::List(list) => {
                if list.elements.is_empty() {
                    out.push_str("[]");
                    return true;
                }
                if outer.contains(&r) {
                    out.push_str("[...]");
                    return true;
                }
                if outer.len() >= MAX_FORMAT_DEPTH {
                    out.push_str("...");
                    return false;
                }
                outer.push(r);
                out.push('[');
                let mut complete = true;
                for (i, element) in list.elements.iter().enumerate() {
                    if i != 0 {
                        out.push_str(", ");
                    }
                    complete &= self.write_value(out, *element, outer, true);
                }
                out.push(']');
                outer.pop();
                return complete;
            }

            Object::Map(map) => {
                if map.capacity() == 0 {
                    out.push_str("{}");
                    return true;
                }
                if outer.contains(&r) {
                    out.push_str("{...}");
                    return true;
                }
                if outer.len() >= MAX_FORMAT_DEPTH {
                    out.push_str("...");
                    return false;
                }
                outer.push(r);
                out.push('{');
                let mut complete = true;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i != 0 {
                        out.push_str(", ");
                    }
                    complete &= self.write_value(out, key, outer, true);
                    out.push(':');
                    complete &= self.write_value(out, value, outer, true);
                }
                out.push('}');
                outer.pop();
                return complete;
            }

            Object::Range(range) => {
                let _ = write!(
                    out,
                    "[Range:{}..{}]",
                    format_number(range.from),
                    format_number(range.to)
                );
            }

            Object::Module(module) => {
                if module.name.is_empty() {
                    let path = module.path.as_deref().unwrap_or_default();
                    let _ = write!(out, "[Module:\"{}\"]", path);
                } else {
                    let _ = write!(out, "[Module:{}]", module.name);
                }
            }

            Object::Function(func) => {
                let _ = write!(out, "[Func:{}]", func.name);
            }
            Object::Closure(closure) => {
                let _ = write!(out, "[Closure:{}]", self.function(closure.function).name);
            }
            Object::MethodBind(mb) => {
                let name = &self.function(self.closure(mb.method).function).name;
                let _ = write!(out, "[MethodBind:{}]", name);
            }
            Object::Fiber(fiber) => {
                let name = &self.function(self.closure(fiber.closure).function).name;
                let _ = write!(out, "[Fiber:{}]", name);
            }
            Object::Upvalue(_) => out.push_str("[Upvalue]"),
            Object::Class(cls) => {
                let _ = write!(out, "[Class:{}]", cls.name);
            }
            Object::Instance(inst) => {
                let _ = write!(
                    out,
                    "['{}' instance at 0x{:08x}]",
                    self.class(inst.class).name,
                    r.bits() as u32
                );
            }
        }
        true
    }
}

fn write_quoted(out: &mut String, text: &str) {
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_print_shortest_form() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(-0.5), "-0.5");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(f64::NAN), "nan");
        assert_eq!(format_number(f64::INFINITY), "+inf");
        assert_eq!(format_number(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_quoting_escapes_control_chars() {
        let mut out = String::new();
        write_quoted(&mut out, "a\"b\n\x01");
        assert_eq!(out, "\"a\\\"b\\n\\x01\"");
    }

    #[test]
    fn test_scalars_render() {
        let heap = Heap::new(1 << 20, 1 << 20, 75);
        assert_eq!(heap.display(Var::Null), "null");
        assert_eq!(heap.display(Var::Bool(true)), "true");
        assert_eq!(heap.repr(Var::Number(3.0)), "3");
    }
}
