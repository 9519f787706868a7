//! Lexer: source text to tokens, one at a time.

pub mod scanner;
pub mod token;

pub use scanner::{LexError, LexErrorKind, Scanner, MAX_STR_INTERP_DEPTH};
pub use token::{Literal, Token, TokenKind};
