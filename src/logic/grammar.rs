//! Lexer and recursive-descent parser of the query language.
//!
//! ```text
//! query   := or*                      juxtaposed conditions are or-ed
//! or      := and ("|" and)*
//! and     := unary ("&" unary)*
//! unary   := "!" unary | "(" or ")" | cond
//! cond    := path relop value ("," value)*
//!          | path ("&" | "|")? "{" or "}"
//!          | SYM | SYM ("." SYM)+ | SYM ":" SYM
//! path    := "."? hop ("." hop)*
//! hop     := "~"? SYM
//! relop   := ("&" | "|")? ("=" | "==" | "!=" | "<" | "<=" | ">" | ">=")
//! value   := SYM | STRING | SYM ("." SYM)+ | SYM ":" SYM
//! SYM     := [\w-]+
//! ```

use std::fmt;

use crate::error::{HermsError, Result};

/// All-match or any-match over the values reached through a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Match {
    All,
    Any,
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Match::All => write!(f, "&"),
            Match::Any => write!(f, "|"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    pub fn is_equality(self) -> bool {
        matches!(self, Comparison::Eq | Comparison::Ne)
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// Relational operator with its optional match-mode prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelOp {
    pub mode: Option<Match>,
    pub cmp: Comparison,
}

impl RelOp {
    /// Mode in effect: explicit prefix, otherwise any-match.
    pub fn effective_mode(&self) -> Match {
        self.mode.unwrap_or(Match::Any)
    }
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(mode) = self.mode {
            write!(f, "{}", mode)?;
        }
        write!(f, "{}", self.cmp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathHop {
    /// Traverse the property from the referenced node back to the referrers.
    pub reverse: bool,
    pub name: String,
}

impl fmt::Display for PathHop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.reverse {
            write!(f, "~")?;
        }
        write!(f, "{}", self.name)
    }
}

/// Bare identifier condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ident {
    Name(String),
    Dotted(Vec<String>),
    Qualified { ns: String, name: String },
}

/// Right-hand side of a relational condition, as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Sym(String),
    Str(String),
    Dotted(Vec<String>),
    Qualified { ns: String, name: String },
}

impl Literal {
    pub fn text(&self) -> String {
        match self {
            Literal::Sym(s) | Literal::Str(s) => s.clone(),
            Literal::Dotted(parts) => parts.join("."),
            Literal::Qualified { ns, name } => format!("{}:{}", ns, name),
        }
    }
}

/// Concrete syntax tree. Cached by [`Query`](crate::logic::Query) and
/// re-bound without re-parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cond {
    Or(Vec<Cond>),
    And(Vec<Cond>),
    Not(Box<Cond>),
    Pred(Ident),
    Rel {
        path: Vec<PathHop>,
        op: RelOp,
        values: Vec<Literal>,
    },
    Apply {
        path: Vec<PathHop>,
        mode: Match,
        body: Box<Cond>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Sym(String),
    Str(String),
    Dot,
    Colon,
    Comma,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Tilde,
    Bang,
    And,
    Or,
    Rel(RelOp),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Sym(s) => write!(f, "'{}'", s),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Dot => write!(f, "'.'"),
            Token::Colon => write!(f, "':'"),
            Token::Comma => write!(f, "','"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::LBrace => write!(f, "'{{'"),
            Token::RBrace => write!(f, "'}}'"),
            Token::Tilde => write!(f, "'~'"),
            Token::Bang => write!(f, "'!'"),
            Token::And => write!(f, "'&'"),
            Token::Or => write!(f, "'|'"),
            Token::Rel(op) => write!(f, "'{}'", op),
        }
    }
}

fn is_sym_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn lex(text: &str) -> Result<Vec<(usize, Token)>> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let peek = |i: usize| chars.get(i).map(|(_, c)| *c);

    while let Some(&(pos, c)) = chars.get(i) {
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let (token, width) = match c {
            '.' => (Token::Dot, 1),
            ':' => (Token::Colon, 1),
            ',' => (Token::Comma, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '{' => (Token::LBrace, 1),
            '}' => (Token::RBrace, 1),
            '~' => (Token::Tilde, 1),
            '&' | '|' => {
                let mode = if c == '&' { Match::All } else { Match::Any };
                // a prefix glued to a relational operator selects its match mode
                match lex_relop(peek(i + 1), peek(i + 2)) {
                    Some((cmp, w)) => (
                        Token::Rel(RelOp {
                            mode: Some(mode),
                            cmp,
                        }),
                        1 + w,
                    ),
                    None if c == '&' => (Token::And, 1),
                    None => (Token::Or, 1),
                }
            }
            '!' | '=' | '<' | '>' => match lex_relop(Some(c), peek(i + 1)) {
                Some((cmp, w)) => (Token::Rel(RelOp { mode: None, cmp }), w),
                None => (Token::Bang, 1),
            },
            '"' => {
                let mut value = String::new();
                let mut j = i + 1;
                loop {
                    match peek(j) {
                        None => {
                            return Err(HermsError::query(format!(
                                "unterminated string at position {}",
                                pos
                            )))
                        }
                        Some('"') => break,
                        Some('\\') => {
                            let escaped = peek(j + 1).ok_or_else(|| {
                                HermsError::query(format!(
                                    "unterminated string at position {}",
                                    pos
                                ))
                            })?;
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => other,
                            });
                            j += 2;
                        }
                        Some(other) => {
                            value.push(other);
                            j += 1;
                        }
                    }
                }
                (Token::Str(value), j + 1 - i)
            }
            c if is_sym_char(c) => {
                let mut j = i;
                while peek(j).map_or(false, is_sym_char) {
                    j += 1;
                }
                let sym: String = chars[i..j].iter().map(|(_, c)| *c).collect();
                (Token::Sym(sym), j - i)
            }
            other => {
                return Err(HermsError::query(format!(
                    "unexpected character '{}' at position {}",
                    other, pos
                )))
            }
        };
        tokens.push((pos, token));
        i += width;
    }
    Ok(tokens)
}

/// Relational operator starting with `first`, and its width in characters.
fn lex_relop(first: Option<char>, second: Option<char>) -> Option<(Comparison, usize)> {
    match (first?, second) {
        ('=', Some('=')) => Some((Comparison::Eq, 2)),
        ('=', _) => Some((Comparison::Eq, 1)),
        ('!', Some('=')) => Some((Comparison::Ne, 2)),
        ('<', Some('=')) => Some((Comparison::Le, 2)),
        ('<', _) => Some((Comparison::Lt, 1)),
        ('>', Some('=')) => Some((Comparison::Ge, 2)),
        ('>', _) => Some((Comparison::Gt, 1)),
        _ => None,
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, msg: &str) -> HermsError {
        match self.tokens.get(self.pos) {
            Some((at, token)) => {
                HermsError::query(format!("{}: unexpected {} at position {}", msg, token, at))
            }
            None => HermsError::query(format!("{}: unexpected end of query at {}", msg, self.len)),
        }
    }

    fn expect(&mut self, expected: Token, msg: &str) -> Result<()> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(msg))
        }
    }

    fn sym(&mut self, msg: &str) -> Result<String> {
        match self.peek() {
            Some(Token::Sym(_)) => match self.next() {
                Some(Token::Sym(s)) => Ok(s),
                _ => Err(self.error(msg)),
            },
            _ => Err(self.error(msg)),
        }
    }

    fn query(&mut self) -> Result<Option<Cond>> {
        let mut terms = Vec::new();
        while self.peek().is_some() {
            terms.push(self.or()?);
        }
        Ok(match terms.len() {
            0 => None,
            1 => terms.pop(),
            _ => Some(Cond::Or(terms)),
        })
    }

    fn or(&mut self) -> Result<Cond> {
        let mut terms = vec![self.and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            terms.push(self.and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Cond::Or(terms)
        })
    }

    fn and(&mut self) -> Result<Cond> {
        let mut terms = vec![self.unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            terms.push(self.unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Cond::And(terms)
        })
    }

    fn unary(&mut self) -> Result<Cond> {
        match self.peek() {
            Some(Token::Bang) => {
                self.pos += 1;
                Ok(Cond::Not(Box::new(self.unary()?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.or()?;
                self.expect(Token::RParen, "expected ')'")?;
                Ok(inner)
            }
            _ => self.cond(),
        }
    }

    fn cond(&mut self) -> Result<Cond> {
        let leading_dot = self.peek() == Some(&Token::Dot);
        if leading_dot {
            self.pos += 1;
        }
        let first_reverse = self.peek() == Some(&Token::Tilde);
        if !first_reverse && !leading_dot {
            if let (Some(Token::Sym(_)), Some(Token::Colon)) = (self.peek(), self.peek_at(1)) {
                let ns = self.sym("expected a type name")?;
                self.pos += 1;
                let name = self.sym("expected a node name after ':'")?;
                return Ok(Cond::Pred(Ident::Qualified { ns, name }));
            }
        }

        let path = self.path()?;
        match self.peek() {
            Some(Token::Rel(op)) => {
                let op = *op;
                self.pos += 1;
                let mut values = vec![self.value()?];
                if op.cmp.is_equality() {
                    while self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                        values.push(self.value()?);
                    }
                }
                Ok(Cond::Rel { path, op, values })
            }
            Some(Token::LBrace) => self.apply(path, Match::Any),
            Some(Token::And) | Some(Token::Or) if self.peek_at(1) == Some(&Token::LBrace) => {
                let mode = if self.next() == Some(Token::And) {
                    Match::All
                } else {
                    Match::Any
                };
                self.apply(path, mode)
            }
            _ => {
                if leading_dot || path.iter().any(|h| h.reverse) {
                    return Err(self.error("a property path needs a condition"));
                }
                let mut names: Vec<String> = path.into_iter().map(|h| h.name).collect();
                Ok(Cond::Pred(if names.len() == 1 {
                    Ident::Name(names.remove(0))
                } else {
                    Ident::Dotted(names)
                }))
            }
        }
    }

    fn apply(&mut self, path: Vec<PathHop>, mode: Match) -> Result<Cond> {
        self.expect(Token::LBrace, "expected '{'")?;
        let body = self.or()?;
        self.expect(Token::RBrace, "expected '}'")?;
        Ok(Cond::Apply {
            path,
            mode,
            body: Box::new(body),
        })
    }

    fn path(&mut self) -> Result<Vec<PathHop>> {
        let mut hops = vec![self.hop()?];
        while self.peek() == Some(&Token::Dot) {
            self.pos += 1;
            hops.push(self.hop()?);
        }
        Ok(hops)
    }

    fn hop(&mut self) -> Result<PathHop> {
        let reverse = self.peek() == Some(&Token::Tilde);
        if reverse {
            self.pos += 1;
        }
        let name = self.sym("expected a property name")?;
        Ok(PathHop { reverse, name })
    }

    fn value(&mut self) -> Result<Literal> {
        if !matches!(self.peek(), Some(Token::Str(_)) | Some(Token::Sym(_))) {
            return Err(self.error("expected a value"));
        }
        match self.next() {
            Some(Token::Str(s)) => Ok(Literal::Str(s)),
            Some(Token::Sym(first)) => match self.peek() {
                Some(Token::Colon) => {
                    self.pos += 1;
                    let name = self.sym("expected a node name after ':'")?;
                    Ok(Literal::Qualified { ns: first, name })
                }
                Some(Token::Dot) => {
                    let mut parts = vec![first];
                    while self.peek() == Some(&Token::Dot) {
                        self.pos += 1;
                        parts.push(self.sym("expected a name after '.'")?);
                    }
                    Ok(Literal::Dotted(parts))
                }
                _ => Ok(Literal::Sym(first)),
            },
            _ => Err(self.error("expected a value")),
        }
    }
}

/// Parse query text. Empty (or blank) text yields `None`, which means
/// "every node".
pub fn parse(text: &str) -> Result<Option<Cond>> {
    let mut parser = Parser {
        tokens: lex(text)?,
        pos: 0,
        len: text.len(),
    };
    parser.query()
}
