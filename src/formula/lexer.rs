//! Tokenizer for formula text.
use crate::compute::error::{EvalError, EvalResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Let,
    Const,
    Var,
    If,
    Else,
    For,
    While,
    Do,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Return,
    Function,
    True,
    False,
    Null,
    Undefined,
    In,
    TypeOf,
}

/// Words that exist in the host syntax but are never available to formulas.
const RESERVED: &[&str] = &[
    "import", "export", "new", "class", "this", "await", "async", "yield", "delete", "throw",
    "try", "catch", "finally", "with", "debugger", "super", "extends", "void", "instanceof",
];

fn keyword(word: &str) -> Option<Keyword> {
    Some(match word {
        "let" => Keyword::Let,
        "const" => Keyword::Const,
        "var" => Keyword::Var,
        "if" => Keyword::If,
        "else" => Keyword::Else,
        "for" => Keyword::For,
        "while" => Keyword::While,
        "do" => Keyword::Do,
        "switch" => Keyword::Switch,
        "case" => Keyword::Case,
        "default" => Keyword::Default,
        "break" => Keyword::Break,
        "continue" => Keyword::Continue,
        "return" => Keyword::Return,
        "function" => Keyword::Function,
        "true" => Keyword::True,
        "false" => Keyword::False,
        "null" => Keyword::Null,
        "undefined" => Keyword::Undefined,
        "in" => Keyword::In,
        "typeof" => Keyword::TypeOf,
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,
    Ellipsis,
    Question,
    Coalesce,
    Arrow,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,
    Bang,
    Assign,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    StarStarAssign,
    PlusPlus,
    MinusMinus,
}

/// Longest match first.
const PUNCTUATORS: &[(&str, Punct)] = &[
    ("**=", Punct::StarStarAssign),
    ("===", Punct::EqEqEq),
    ("!==", Punct::NotEqEq),
    ("...", Punct::Ellipsis),
    ("**", Punct::StarStar),
    ("==", Punct::EqEq),
    ("!=", Punct::NotEq),
    ("<=", Punct::LtEq),
    (">=", Punct::GtEq),
    ("&&", Punct::AndAnd),
    ("||", Punct::OrOr),
    ("??", Punct::Coalesce),
    ("=>", Punct::Arrow),
    ("+=", Punct::PlusAssign),
    ("-=", Punct::MinusAssign),
    ("*=", Punct::StarAssign),
    ("/=", Punct::SlashAssign),
    ("%=", Punct::PercentAssign),
    ("++", Punct::PlusPlus),
    ("--", Punct::MinusMinus),
    ("(", Punct::LParen),
    (")", Punct::RParen),
    ("{", Punct::LBrace),
    ("}", Punct::RBrace),
    ("[", Punct::LBracket),
    ("]", Punct::RBracket),
    (",", Punct::Comma),
    (";", Punct::Semi),
    (":", Punct::Colon),
    (".", Punct::Dot),
    ("?", Punct::Question),
    ("+", Punct::Plus),
    ("-", Punct::Minus),
    ("*", Punct::Star),
    ("/", Punct::Slash),
    ("%", Punct::Percent),
    ("!", Punct::Bang),
    ("=", Punct::Assign),
    ("<", Punct::Lt),
    (">", Punct::Gt),
];

#[derive(Debug, Clone, PartialEq)]
pub enum RawTemplatePart {
    Text(String),
    /// Source of an `${...}` hole with its starting position.
    Expr { source: String, line: usize, column: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Template(Vec<RawTemplatePart>),
    Ident(String),
    Keyword(Keyword),
    Reserved(String),
    Punct(Punct),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
    /// A line break separates this token from the previous one.
    pub newline_before: bool,
}

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self::at(source, 1, 1)
    }

    /// A lexer whose positions are offset, used for template holes.
    pub fn at(source: &str, line: usize, column: usize) -> Self {
        Self { chars: source.chars().collect(), pos: 0, line, column }
    }

    pub fn tokenize(mut self) -> EvalResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let newline_before = self.skip_trivia()?;
            let (line, column) = (self.line, self.column);
            let kind = match self.peek() {
                None => TokenKind::Eof,
                Some(c) if c.is_ascii_digit() => self.number()?,
                Some('.') if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.number()?,
                Some(c) if c == '"' || c == '\'' => self.string(c)?,
                Some('`') => self.template()?,
                Some(c) if is_ident_start(c) => self.word(),
                Some(_) => self.punct()?,
            };
            let done = kind == TokenKind::Eof;
            tokens.push(Token { kind, line, column, newline_before });
            if done {
                return Ok(tokens);
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> EvalError {
        EvalError::syntax(message, self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Skips whitespace and comments; reports whether a newline was crossed.
    fn skip_trivia(&mut self) -> EvalResult<bool> {
        let mut newline = false;
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some('\n'), _) => {
                    newline = true;
                    self.bump();
                }
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(), self.peek_at(1)) {
                            (Some('*'), Some('/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(c), _) => {
                                if c == '\n' {
                                    newline = true;
                                }
                                self.bump();
                            }
                            (None, _) => return Err(self.error("unterminated comment")),
                        }
                    }
                }
                _ => return Ok(newline),
            }
        }
    }

    fn number(&mut self) -> EvalResult<TokenKind> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.bump();
            } else if c == '_' {
                self.bump();
            } else if (c == 'e' || c == 'E')
                && self
                    .peek_at(1)
                    .is_some_and(|n| n.is_ascii_digit() || n == '+' || n == '-')
            {
                text.push(c);
                self.bump();
                if let Some(sign) = self.peek().filter(|s| *s == '+' || *s == '-') {
                    text.push(sign);
                    self.bump();
                }
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error(format!("invalid number literal '{}'", text)))
    }

    fn escape(&mut self) -> EvalResult<char> {
        match self.bump() {
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('r') => Ok('\r'),
            Some('0') => Ok('\0'),
            Some('u') => {
                let mut hex = String::new();
                for _ in 0..4 {
                    match self.bump() {
                        Some(h) if h.is_ascii_hexdigit() => hex.push(h),
                        _ => return Err(self.error("invalid unicode escape")),
                    }
                }
                u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error("invalid unicode escape"))
            }
            Some(c) => Ok(c),
            None => Err(self.error("unterminated string")),
        }
    }

    fn string(&mut self, quote: char) -> EvalResult<TokenKind> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(TokenKind::Str(out)),
                Some('\\') => out.push(self.escape()?),
                Some('\n') | None => return Err(self.error("unterminated string")),
                Some(c) => out.push(c),
            }
        }
    }

    fn template(&mut self) -> EvalResult<TokenKind> {
        self.bump();
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated template literal")),
                Some('`') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    text.push(self.escape()?);
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    self.bump();
                    self.bump();
                    if !text.is_empty() {
                        parts.push(RawTemplatePart::Text(std::mem::take(&mut text)));
                    }
                    let (line, column) = (self.line, self.column);
                    let mut depth = 0usize;
                    let mut source = String::new();
                    loop {
                        match self.bump() {
                            None => return Err(self.error("unterminated template hole")),
                            Some('}') if depth == 0 => break,
                            Some(c) => {
                                if c == '{' {
                                    depth += 1;
                                } else if c == '}' {
                                    depth -= 1;
                                }
                                source.push(c);
                            }
                        }
                    }
                    parts.push(RawTemplatePart::Expr { source, line, column });
                }
                Some(c) => {
                    self.bump();
                    text.push(c);
                }
            }
        }
        if !text.is_empty() {
            parts.push(RawTemplatePart::Text(text));
        }
        Ok(TokenKind::Template(parts))
    }

    fn word(&mut self) -> TokenKind {
        let mut word = String::new();
        while let Some(c) = self.peek().filter(|c| is_ident_continue(*c)) {
            word.push(c);
            self.bump();
        }
        if let Some(kw) = keyword(&word) {
            TokenKind::Keyword(kw)
        } else if RESERVED.contains(&word.as_str()) {
            TokenKind::Reserved(word)
        } else {
            TokenKind::Ident(word)
        }
    }

    fn punct(&mut self) -> EvalResult<TokenKind> {
        for (text, punct) in PUNCTUATORS {
            let matches = text.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c));
            if matches {
                for _ in 0..text.chars().count() {
                    self.bump();
                }
                return Ok(TokenKind::Punct(*punct));
            }
        }
        let c = self.peek().unwrap_or('\0');
        Err(self.error(format!("unexpected character '{}'", c)))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
