//! Lexer and recursive-descent parser for ALU expressions.
//!
//! Grammar:
//!
//! ```text
//! Expr    := Product (("+" | "-") Product)*
//! Product := Term ("*" Term)?
//! Term    := Symbol | "-" Term | "(" Expr ")"
//! ```
//!
//! The same grammar parses user expressions (symbols `strm1..strm4`,
//! `c1..c4`) and shape patterns (placeholders `a`, `b`, `c`, `k`); the
//! [`Vocabulary`] decides which identifiers are accepted.
//!
//! Input is capped at [`MAX_TOKENS`] tokens and [`MAX_NESTING`] levels of
//! negation or parentheses, which bounds the tree depth for every later
//! recursive pass.

use std::fmt;

/// Most tokens an expression may contain.
pub const MAX_TOKENS: usize = 256;

/// Deepest run of nested negations and parentheses.
pub const MAX_NESTING: usize = 64;

/// A leaf of an expression.
///
/// In expressions the payload is the 1-based stream or register number. In
/// shape patterns it is the 0-based placeholder slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Symbol {
    /// A row stream feeding an ALU port.
    Stream(u8),
    /// A constant register.
    Const(u8),
}

impl Symbol {
    /// Returns `true` for stream symbols.
    #[must_use]
    pub const fn is_stream(self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(n) => write!(f, "strm{n}"),
            Self::Const(n) => write!(f, "c{n}"),
        }
    }
}

/// Which identifiers a parse accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vocabulary {
    /// `strm1..strm4` and `c1..c4`.
    Expression,
    /// `a`, `b`, `c` (stream placeholders) and `k` (constant placeholder).
    Pattern,
}

impl Vocabulary {
    fn resolve(self, ident: &str) -> Option<Symbol> {
        match self {
            Self::Expression => {
                if let Some(n) = ident.strip_prefix("strm") {
                    return register_number(n).map(Symbol::Stream);
                }
                ident.strip_prefix('c').and_then(register_number).map(Symbol::Const)
            }
            Self::Pattern => match ident {
                "a" => Some(Symbol::Stream(0)),
                "b" => Some(Symbol::Stream(1)),
                "c" => Some(Symbol::Stream(2)),
                "k" => Some(Symbol::Const(0)),
                _ => None,
            },
        }
    }

    const fn expected(self) -> &'static str {
        match self {
            Self::Expression => "strm1..strm4 or c1..c4",
            Self::Pattern => "a, b, c or k",
        }
    }
}

fn register_number(digits: &str) -> Option<u8> {
    match digits {
        "1" => Some(1),
        "2" => Some(2),
        "3" => Some(3),
        "4" => Some(4),
        _ => None,
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ast {
    /// A symbol.
    Symbol(Symbol),
    /// Unary negation.
    Neg(Box<Ast>),
    /// Sum.
    Add(Box<Ast>, Box<Ast>),
    /// Difference.
    Sub(Box<Ast>, Box<Ast>),
    /// Product.
    Mul(Box<Ast>, Box<Ast>),
}

/// A parse failure with the byte offset it occurred at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Byte offset into the source.
    pub position: usize,
    /// What went wrong.
    pub message: String,
}

impl ParseError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Ident(&'a str),
    Plus,
    Minus,
    Star,
    LParen,
    RParen,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(s) => write!(f, "'{s}'"),
            Self::Plus => f.write_str("'+'"),
            Self::Minus => f.write_str("'-'"),
            Self::Star => f.write_str("'*'"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token<'_>)>, ParseError> {
    let mut tokens = Vec::new();
    let bytes = src.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        let b = bytes[pos];
        let token = match b {
            b' ' | b'\t' | b'\n' | b'\r' => {
                pos += 1;
                continue;
            }
            _ if tokens.len() == MAX_TOKENS => {
                return Err(ParseError::new(
                    pos,
                    format!("expression is longer than {MAX_TOKENS} tokens"),
                ));
            }
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b if b.is_ascii_alphabetic() || b == b'_' => {
                let start = pos;
                while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_')
                {
                    pos += 1;
                }
                tokens.push((start, Token::Ident(&src[start..pos])));
                continue;
            }
            _ => {
                let ch = src[pos..].chars().next().unwrap_or('?');
                return Err(ParseError::new(pos, format!("unexpected character '{ch}'")));
            }
        };
        tokens.push((pos, token));
        pos += 1;
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<(usize, Token<'a>)>,
    cursor: usize,
    end: usize,
    depth: usize,
    vocabulary: Vocabulary,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.cursor).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.cursor).map_or(self.end, |(p, _)| *p)
    }

    fn bump(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.cursor).map(|(_, t)| t.clone());
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    /// Runs `f` one nesting level deeper.
    fn nested<T>(
        &mut self,
        position: usize,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth == MAX_NESTING {
            return Err(ParseError::new(
                position,
                format!("expression nests deeper than {MAX_NESTING} levels"),
            ));
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn expr(&mut self) -> Result<Ast, ParseError> {
        let mut lhs = self.product()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.bump();
                    lhs = Ast::Add(Box::new(lhs), Box::new(self.product()?));
                }
                Some(Token::Minus) => {
                    self.bump();
                    lhs = Ast::Sub(Box::new(lhs), Box::new(self.product()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn product(&mut self) -> Result<Ast, ParseError> {
        let lhs = self.term()?;
        if self.peek() != Some(&Token::Star) {
            return Ok(lhs);
        }
        self.bump();
        let rhs = self.term()?;
        if self.peek() == Some(&Token::Star) {
            return Err(ParseError::new(
                self.position(),
                "a product takes at most two factors, parenthesise further factors",
            ));
        }
        Ok(Ast::Mul(Box::new(lhs), Box::new(rhs)))
    }

    fn term(&mut self) -> Result<Ast, ParseError> {
        let position = self.position();
        match self.bump() {
            Some(Token::Minus) => {
                self.nested(position, |p| Ok(Ast::Neg(Box::new(p.term()?))))
            }
            Some(Token::LParen) => self.nested(position, |p| {
                let inner = p.expr()?;
                match p.bump() {
                    Some(Token::RParen) => Ok(inner),
                    Some(t) => Err(ParseError::new(
                        p.tokens[p.cursor - 1].0,
                        format!("expected ')', found {t}"),
                    )),
                    None => Err(ParseError::new(p.end, "unclosed '('")),
                }
            }),
            Some(Token::Ident(name)) => self
                .vocabulary
                .resolve(name)
                .map(Ast::Symbol)
                .ok_or_else(|| {
                    ParseError::new(
                        position,
                        format!(
                            "unknown symbol '{name}', expected {}",
                            self.vocabulary.expected()
                        ),
                    )
                }),
            Some(t) => Err(ParseError::new(position, format!("expected a term, found {t}"))),
            None => Err(ParseError::new(position, "unexpected end of expression")),
        }
    }
}

/// Parses `src` into an expression tree.
///
/// # Errors
///
/// Returns a [`ParseError`] for unknown characters or symbols, unbalanced
/// parentheses, products with more than two factors, trailing input, and
/// input past [`MAX_TOKENS`] or [`MAX_NESTING`].
pub fn parse(src: &str, vocabulary: Vocabulary) -> Result<Ast, ParseError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        cursor: 0,
        end: src.len(),
        depth: 0,
        vocabulary,
    };
    let ast = parser.expr()?;
    if let Some(t) = parser.peek() {
        let message = format!("unexpected {t} after expression");
        return Err(ParseError::new(parser.position(), message));
    }
    Ok(ast)
}
