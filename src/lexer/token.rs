//! Token definitions for the lexer.

/// All token types of the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Error,
    Eof,
    Line,

    // Symbols
    Dot,          // .
    DotDot,       // ..
    Comma,        // ,
    Colon,        // :
    Semicolon,    // ;
    LParen,       // (
    RParen,       // )
    LBracket,     // [
    RBracket,     // ]
    LBrace,       // {
    RBrace,       // }
    Percent,      // %
    Tilde,        // ~
    Amp,          // &
    Pipe,         // |
    Caret,        // ^
    Arrow,        // ->
    Plus,         // +
    Minus,        // -
    Star,         // *
    Slash,        // /
    StarStar,     // **
    Eq,           // =
    Gt,           // >
    Lt,           // <
    EqEq,         // ==
    NotEq,        // !=
    GtEq,         // >=
    LtEq,         // <=
    PlusEq,       // +=
    MinusEq,      // -=
    StarEq,       // *=
    SlashEq,      // /=
    PercentEq,    // %=
    StarStarEq,   // **=
    AmpEq,        // &=
    PipeEq,       // |=
    CaretEq,      // ^=
    ShiftRight,   // >>
    ShiftLeft,    // <<
    ShiftRightEq, // >>=
    ShiftLeftEq,  // <<=

    // Keywords
    Class,
    From,
    Import,
    As,
    Def,
    Native,
    Fn,
    End,
    Null,
    In,
    Is,
    And,
    Or,
    Not,
    True,
    False,
    SelfKw,
    Super,
    Do,
    Then,
    While,
    For,
    If,
    Elif,
    Else,
    Break,
    Continue,
    Return,

    Name,
    Number,
    String,

    /// A string segment followed by an interpolated name or expression:
    /// `"a $b c ${d} e"` lexes as `StringInterp("a ")`, `Name(b)`,
    /// `StringInterp(" c ")`, `Name(d)`, `String(" e")`.
    StringInterp,
}

impl TokenKind {
    /// Check if this identifier is a keyword and return the corresponding kind.
    pub fn keyword(ident: &str) -> Option<TokenKind> {
        match ident {
            "class" => Some(TokenKind::Class),
            "from" => Some(TokenKind::From),
            "import" => Some(TokenKind::Import),
            "as" => Some(TokenKind::As),
            "def" => Some(TokenKind::Def),
            "native" => Some(TokenKind::Native),
            "fn" => Some(TokenKind::Fn),
            "end" => Some(TokenKind::End),
            "null" => Some(TokenKind::Null),
            "in" => Some(TokenKind::In),
            "is" => Some(TokenKind::Is),
            "and" => Some(TokenKind::And),
            "or" => Some(TokenKind::Or),
            "not" => Some(TokenKind::Not),
            "true" => Some(TokenKind::True),
            "false" => Some(TokenKind::False),
            "self" => Some(TokenKind::SelfKw),
            "super" => Some(TokenKind::Super),
            "do" => Some(TokenKind::Do),
            "then" => Some(TokenKind::Then),
            "while" => Some(TokenKind::While),
            "for" => Some(TokenKind::For),
            "if" => Some(TokenKind::If),
            "elif" => Some(TokenKind::Elif),
            "else" => Some(TokenKind::Else),
            "break" => Some(TokenKind::Break),
            "continue" => Some(TokenKind::Continue),
            "return" => Some(TokenKind::Return),
            _ => None,
        }
    }

    /// Compound assignment operators.
    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            TokenKind::Eq
                | TokenKind::PlusEq
                | TokenKind::MinusEq
                | TokenKind::StarEq
                | TokenKind::SlashEq
                | TokenKind::PercentEq
                | TokenKind::StarStarEq
                | TokenKind::AmpEq
                | TokenKind::PipeEq
                | TokenKind::CaretEq
                | TokenKind::ShiftRightEq
                | TokenKind::ShiftLeftEq
        )
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            TokenKind::Error => "<error>",
            TokenKind::Eof => "<eof>",
            TokenKind::Line => "<newline>",
            TokenKind::Dot => ".",
            TokenKind::DotDot => "..",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Semicolon => ";",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Percent => "%",
            TokenKind::Tilde => "~",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Arrow => "->",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::StarStar => "**",
            TokenKind::Eq => "=",
            TokenKind::Gt => ">",
            TokenKind::Lt => "<",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::GtEq => ">=",
            TokenKind::LtEq => "<=",
            TokenKind::PlusEq => "+=",
            TokenKind::MinusEq => "-=",
            TokenKind::StarEq => "*=",
            TokenKind::SlashEq => "/=",
            TokenKind::PercentEq => "%=",
            TokenKind::StarStarEq => "**=",
            TokenKind::AmpEq => "&=",
            TokenKind::PipeEq => "|=",
            TokenKind::CaretEq => "^=",
            TokenKind::ShiftRight => ">>",
            TokenKind::ShiftLeft => "<<",
            TokenKind::ShiftRightEq => ">>=",
            TokenKind::ShiftLeftEq => "<<=",
            TokenKind::Class => "class",
            TokenKind::From => "from",
            TokenKind::Import => "import",
            TokenKind::As => "as",
            TokenKind::Def => "def",
            TokenKind::Native => "native",
            TokenKind::Fn => "fn",
            TokenKind::End => "end",
            TokenKind::Null => "null",
            TokenKind::In => "in",
            TokenKind::Is => "is",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Not => "not",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::SelfKw => "self",
            TokenKind::Super => "super",
            TokenKind::Do => "do",
            TokenKind::Then => "then",
            TokenKind::While => "while",
            TokenKind::For => "for",
            TokenKind::If => "if",
            TokenKind::Elif => "elif",
            TokenKind::Else => "else",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Return => "return",
            TokenKind::Name => "<name>",
            TokenKind::Number => "<number>",
            TokenKind::String => "<string>",
            TokenKind::StringInterp => "<string>",
        };
        write!(f, "{}", text)
    }
}

/// The value carried by literal tokens.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Literal {
    #[default]
    None,
    Number(f64),
    Str(String),
}

/// A token with its kind and source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first char.
    pub start: usize,
    /// Length in bytes.
    pub length: usize,
    pub line: u32,
    pub literal: Literal,
}

impl Token {
    pub fn new(kind: TokenKind, start: usize, length: usize, line: u32) -> Self {
        Self {
            kind,
            start,
            length,
            line,
            literal: Literal::None,
        }
    }

    pub fn eof(position: usize, line: u32) -> Self {
        Self::new(TokenKind::Eof, position, 0, line)
    }

    /// The source text of the token.
    pub fn lexeme<'s>(&self, source: &'s str) -> &'s str {
        source.get(self.start..self.start + self.length).unwrap_or("")
    }

    pub fn number(&self) -> f64 {
        match self.literal {
            Literal::Number(n) => n,
            _ => 0.0,
        }
    }

    pub fn string(&self) -> &str {
        match &self.literal {
            Literal::Str(s) => s,
            _ => "",
        }
    }
}
