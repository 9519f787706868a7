//! Bytecode opcodes.
//!
//! Instructions are one opcode byte followed by 0-3 operand bytes; shorts
//! are big-endian. `PUSH_CLOSURE` is additionally followed by one
//! `(is_immediate, index)` byte pair per captured upvalue.

macro_rules! opcodes {
    ($( $(#[$doc:meta])* $name:ident = ($params:expr, $stack:expr), )*) => {
        /// A single bytecode instruction.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        #[allow(non_camel_case_types, clippy::upper_case_acronyms)]
        pub enum Opcode {
            $( $(#[$doc])* $name, )*
        }

        const OPCODES: &[Opcode] = &[$( Opcode::$name, )*];

        impl Opcode {
            /// Decode an opcode byte.
            pub fn from_byte(byte: u8) -> Option<Opcode> {
                OPCODES.get(byte as usize).copied()
            }

            /// Number of operand bytes that follow the opcode.
            pub fn params(self) -> usize {
                match self {
                    $( Opcode::$name => $params, )*
                }
            }

            /// Net stack effect. Calls report 0; the compiler accounts for
            /// their arguments itself.
            pub fn stack_effect(self) -> i32 {
                match self {
                    $( Opcode::$name => $stack, )*
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $( Opcode::$name => stringify!($name), )*
                }
            }
        }
    };
}

opcodes! {
    /// Push a constant; 2 bytes constant index.
    PUSH_CONSTANT = (2, 1),
    PUSH_NULL = (0, 1),
    PUSH_0 = (0, 1),
    PUSH_TRUE = (0, 1),
    PUSH_FALSE = (0, 1),
    /// Swap the top two values.
    SWAP = (0, 0),
    DUP = (0, 1),

    /// Push a new list; 2 bytes capacity hint.
    PUSH_LIST = (2, 1),
    PUSH_MAP = (0, 1),
    PUSH_SELF = (0, 1),
    /// Pop a value and append it to the list below it.
    LIST_APPEND = (0, -1),
    /// Pop a key and value and insert them into the map below.
    MAP_INSERT = (0, -2),

    PUSH_LOCAL_0 = (0, 1),
    PUSH_LOCAL_1 = (0, 1),
    PUSH_LOCAL_2 = (0, 1),
    PUSH_LOCAL_3 = (0, 1),
    PUSH_LOCAL_4 = (0, 1),
    PUSH_LOCAL_5 = (0, 1),
    PUSH_LOCAL_6 = (0, 1),
    PUSH_LOCAL_7 = (0, 1),
    PUSH_LOCAL_8 = (0, 1),
    /// 1 byte local index.
    PUSH_LOCAL_N = (1, 1),

    STORE_LOCAL_0 = (0, 0),
    STORE_LOCAL_1 = (0, 0),
    STORE_LOCAL_2 = (0, 0),
    STORE_LOCAL_3 = (0, 0),
    STORE_LOCAL_4 = (0, 0),
    STORE_LOCAL_5 = (0, 0),
    STORE_LOCAL_6 = (0, 0),
    STORE_LOCAL_7 = (0, 0),
    STORE_LOCAL_8 = (0, 0),
    STORE_LOCAL_N = (1, 0),

    /// 1 byte global index.
    PUSH_GLOBAL = (1, 1),
    STORE_GLOBAL = (1, 0),
    /// 1 byte builtin function index.
    PUSH_BUILTIN_FN = (1, 1),
    /// 1 byte builtin class index.
    PUSH_BUILTIN_TY = (1, 1),
    /// 1 byte upvalue index.
    PUSH_UPVALUE = (1, 1),
    STORE_UPVALUE = (1, 0),

    /// 2 bytes function constant index, then the upvalue pairs.
    PUSH_CLOSURE = (2, 1),
    /// Pop the base class, push the new class; 2 bytes class constant index.
    CREATE_CLASS = (2, 0),
    /// Pop a method closure and bind it to the class below it.
    BIND_METHOD = (0, -1),

    /// Close the upvalue of the top slot, then pop it.
    CLOSE_UPVALUE = (0, -1),
    POP = (0, -1),

    /// 2 bytes constant index of the module path.
    IMPORT = (2, 1),

    /// 1 byte argc, 2 bytes method name index.
    SUPER_CALL = (3, 0),
    METHOD_CALL = (3, 0),
    /// 1 byte argc.
    CALL = (1, 0),
    TAIL_CALL = (1, 0),

    /// Check the sequence under the iteration slots is iterable.
    ITER_TEST = (0, 0),
    /// Advance the (sequence, cursor, value) triple; 2 bytes exit jump.
    ITER = (2, 0),

    JUMP = (2, 0),
    LOOP = (2, 0),
    JUMP_IF = (2, -1),
    JUMP_IF_NOT = (2, -1),
    /// Jump keeping the value when true, else pop it; 2 bytes offset.
    OR = (2, -1),
    /// Jump keeping the value when false, else pop it; 2 bytes offset.
    AND = (2, -1),

    RETURN = (0, -1),

    /// 2 bytes attribute name index.
    GET_ATTRIB = (2, 0),
    GET_ATTRIB_KEEP = (2, 1),
    SET_ATTRIB = (2, -1),

    GET_SUBSCRIPT = (0, -1),
    GET_SUBSCRIPT_KEEP = (0, 1),
    SET_SUBSCRIPT = (0, -2),

    POSITIVE = (0, 0),
    NEGATIVE = (0, 0),
    NOT = (0, 0),
    BIT_NOT = (0, 0),

    /// 1 byte: non-zero for the compound-assignment form.
    ADD = (1, -1),
    SUBTRACT = (1, -1),
    MULTIPLY = (1, -1),
    DIVIDE = (1, -1),
    EXPONENT = (1, -1),
    MOD = (1, -1),
    BIT_AND = (1, -1),
    BIT_OR = (1, -1),
    BIT_XOR = (1, -1),
    BIT_LSHIFT = (1, -1),
    BIT_RSHIFT = (1, -1),

    EQEQ = (0, -1),
    NOTEQ = (0, -1),
    LT = (0, -1),
    LTEQ = (0, -1),
    GT = (0, -1),
    GTEQ = (0, -1),

    RANGE = (0, -1),
    IN = (0, -1),
    IS = (0, -1),

    /// Print the top value in REPL sessions.
    REPL_PRINT = (0, 0),

    END = (0, 0),
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_round_trip() {
        for &op in OPCODES {
            assert_eq!(Opcode::from_byte(op as u8), Some(op));
        }
        assert_eq!(Opcode::from_byte(255), None);
    }

    #[test]
    fn test_local_opcodes_are_contiguous() {
        assert_eq!(
            Opcode::PUSH_LOCAL_8 as u8 - Opcode::PUSH_LOCAL_0 as u8,
            8
        );
        assert_eq!(
            Opcode::STORE_LOCAL_8 as u8 - Opcode::STORE_LOCAL_0 as u8,
            8
        );
    }

    #[test]
    fn test_operand_sizes() {
        assert_eq!(Opcode::METHOD_CALL.params(), 3);
        assert_eq!(Opcode::ITER.params(), 2);
        assert_eq!(Opcode::MAP_INSERT.stack_effect(), -2);
    }
}
