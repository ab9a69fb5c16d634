//! Tokenizer for PowerShell source.
//!
//! The lexer is byte-oriented: every structural character in PowerShell is
//! ASCII, so slicing at token boundaries is always valid UTF-8. Non-ASCII
//! bytes are treated as word characters.

use super::syntax::QuoteKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `$name`, `${name}`, `$env:NAME`, `@splat`
    Variable,
    StringLiteral(QuoteKind),
    /// Bareword, command name or number.
    Word,
    /// Identifier following `.` or `::`.
    Member,
    /// Dash-prefixed word: a command parameter or an operator like `-eq`.
    Parameter,
    /// `=`, `+=`, `-=`, `*=`, `/=`, `%=`, `??=`
    Assign,
    /// Any other operator: `+`, `!`, `..`, `>`, `2>&1`, ...
    Operator,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    /// `$(`
    SubExprStart,
    /// `@(`
    ArrayStart,
    /// `@{`
    HashStart,
    Dot,
    ColonColon,
    Comma,
    Semicolon,
    Pipe,
    /// `&` call operator.
    Ampersand,
    /// `&&` or `||`
    ChainOperator,
    Newline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    /// Whitespace (or a comment) separates this token from the previous one.
    pub spaced: bool,
}

impl Token {
    pub fn text<'s>(&self, source: &'s str) -> &'s str {
        source.get(self.start..self.end).unwrap_or("")
    }
}

/// Result of lexing: tokens plus comment spans.
#[derive(Debug, Default)]
pub struct Lexed {
    pub tokens: Vec<Token>,
    pub comments: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub offset: usize,
    pub message: String,
}

pub fn tokenize(source: &str) -> Result<Lexed, LexError> {
    Lexer::new(source).run()
}

struct Lexer<'s> {
    src: &'s [u8],
    pos: usize,
    spaced: bool,
    out: Lexed,
}

fn is_word_stop(b: u8) -> bool {
    matches!(
        b,
        b' ' | b'\t'
            | b'\r'
            | b'\n'
            | 0x0c
            | b'('
            | b')'
            | b'{'
            | b'}'
            | b'['
            | b']'
            | b';'
            | b','
            | b'|'
            | b'&'
            | b'"'
            | b'\''
            | b'$'
            | b'='
            | b'>'
            | b'<'
    )
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

fn is_variable_char(b: u8) -> bool {
    is_ident(b) || b == b':'
}

impl<'s> Lexer<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
            spaced: true,
            out: Lexed::default(),
        }
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.pos + ahead).copied()
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.out.tokens.push(Token {
            kind,
            start,
            end: self.pos,
            spaced: self.spaced,
        });
        self.spaced = false;
    }

    fn previous(&self) -> Option<&Token> {
        self.out.tokens.last()
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> LexError {
        LexError {
            offset,
            message: message.into(),
        }
    }

    fn run(mut self) -> Result<Lexed, LexError> {
        while let Some(b) = self.peek(0) {
            let start = self.pos;
            match b {
                b' ' | b'\t' | b'\r' | 0x0c => {
                    self.pos += 1;
                    self.spaced = true;
                }
                b'`' if matches!(self.peek(1), Some(b'\n')) => {
                    self.pos += 2;
                    self.spaced = true;
                }
                b'`' if matches!((self.peek(1), self.peek(2)), (Some(b'\r'), Some(b'\n'))) => {
                    self.pos += 3;
                    self.spaced = true;
                }
                b'\n' => {
                    self.pos += 1;
                    self.push(TokenKind::Newline, start);
                    self.spaced = true;
                }
                b'#' => {
                    while self.peek(0).is_some_and(|c| c != b'\n') {
                        self.pos += 1;
                    }
                    let end = if self.src.get(self.pos - 1) == Some(&b'\r') {
                        self.pos - 1
                    } else {
                        self.pos
                    };
                    self.out.comments.push((start, end));
                    self.spaced = true;
                }
                b'<' if self.peek(1) == Some(b'#') => self.block_comment(start)?,
                b'$' => self.dollar(start)?,
                b'@' => self.at(start)?,
                b'"' => self.double_string(start, false)?,
                b'\'' => self.single_string(start, false)?,
                b'(' => self.single(TokenKind::LParen, start),
                b')' => self.single(TokenKind::RParen, start),
                b'{' => self.single(TokenKind::LBrace, start),
                b'}' => self.single(TokenKind::RBrace, start),
                b'[' => self.single(TokenKind::LBracket, start),
                b']' => self.single(TokenKind::RBracket, start),
                b',' => self.single(TokenKind::Comma, start),
                b';' => self.single(TokenKind::Semicolon, start),
                b'|' => {
                    if self.peek(1) == Some(b'|') {
                        self.pos += 2;
                        self.push(TokenKind::ChainOperator, start);
                    } else {
                        self.single(TokenKind::Pipe, start);
                    }
                }
                b'&' => {
                    if self.peek(1) == Some(b'&') {
                        self.pos += 2;
                        self.push(TokenKind::ChainOperator, start);
                    } else {
                        self.single(TokenKind::Ampersand, start);
                    }
                }
                b':' if self.peek(1) == Some(b':') => {
                    self.pos += 2;
                    self.push(TokenKind::ColonColon, start);
                    self.member();
                }
                b'.' => self.dot(start),
                b'-' => self.dash(start),
                b'=' => self.single(TokenKind::Assign, start),
                b'+' | b'*' | b'/' | b'%' => self.arithmetic(start),
                b'!' => self.single(TokenKind::Operator, start),
                b'>' | b'<' => self.redirection(start),
                b'?' if self.peek(1) == Some(b'?') => {
                    self.pos += 2;
                    if self.peek(0) == Some(b'=') {
                        self.pos += 1;
                        self.push(TokenKind::Assign, start);
                    } else {
                        self.push(TokenKind::Operator, start);
                    }
                }
                _ => self.word(start),
            }
        }
        Ok(self.out)
    }

    fn single(&mut self, kind: TokenKind, start: usize) {
        self.pos += 1;
        self.push(kind, start);
    }

    fn block_comment(&mut self, start: usize) -> Result<(), LexError> {
        self.pos += 2;
        loop {
            match self.peek(0) {
                Some(b'#') if self.peek(1) == Some(b'>') => {
                    self.pos += 2;
                    break;
                }
                Some(_) => self.pos += 1,
                None => return Err(self.error(start, "unterminated block comment")),
            }
        }
        self.out.comments.push((start, self.pos));
        self.spaced = true;
        Ok(())
    }

    fn dollar(&mut self, start: usize) -> Result<(), LexError> {
        match self.peek(1) {
            Some(b'(') => {
                self.pos += 2;
                self.push(TokenKind::SubExprStart, start);
            }
            Some(b'{') => {
                self.pos += 2;
                while self.peek(0).is_some_and(|c| c != b'}') {
                    self.pos += 1;
                }
                if self.peek(0).is_none() {
                    return Err(self.error(start, "unterminated braced variable"));
                }
                self.pos += 1;
                self.push(TokenKind::Variable, start);
            }
            Some(b'$' | b'?' | b'^' | b'_') if !self.peek(2).is_some_and(is_ident) => {
                self.pos += 2;
                self.push(TokenKind::Variable, start);
            }
            Some(c) if is_ident(c) => {
                self.pos += 1;
                while self.peek(0).is_some_and(is_variable_char) {
                    // `$a::Member` and a trailing `:` are not part of the name
                    if self.peek(0) == Some(b':') && !self.peek(1).is_some_and(is_ident) {
                        break;
                    }
                    self.pos += 1;
                }
                self.push(TokenKind::Variable, start);
            }
            _ => {
                self.pos += 1;
                self.push(TokenKind::Word, start);
            }
        }
        Ok(())
    }

    fn at(&mut self, start: usize) -> Result<(), LexError> {
        match self.peek(1) {
            Some(b'(') => {
                self.pos += 2;
                self.push(TokenKind::ArrayStart, start);
            }
            Some(b'{') => {
                self.pos += 2;
                self.push(TokenKind::HashStart, start);
            }
            Some(b'"') if self.here_string_opens() => {
                self.pos += 1;
                self.double_string(start, true)?;
            }
            Some(b'\'') if self.here_string_opens() => {
                self.pos += 1;
                self.single_string(start, true)?;
            }
            Some(c) if is_ident(c) && self.spaced => {
                self.pos += 1;
                while self.peek(0).is_some_and(is_ident) {
                    self.pos += 1;
                }
                self.push(TokenKind::Variable, start);
            }
            _ => self.word(start),
        }
        Ok(())
    }

    /// `@"` or `@'` followed only by whitespace up to the end of the line.
    fn here_string_opens(&self) -> bool {
        let mut i = self.pos + 2;
        while let Some(&c) = self.src.get(i) {
            match c {
                b' ' | b'\t' | b'\r' => i += 1,
                b'\n' => return true,
                _ => return false,
            }
        }
        false
    }

    fn double_string(&mut self, start: usize, here: bool) -> Result<(), LexError> {
        // positioned on the opening quote
        self.pos += 1;
        loop {
            let Some(c) = self.peek(0) else {
                return Err(self.error(start, "unterminated string literal"));
            };
            match c {
                b'`' => self.pos += 2,
                b'$' if self.peek(1) == Some(b'(') => {
                    self.pos += 2;
                    self.skip_subexpression(start)?;
                }
                b'"' if here => {
                    if self.peek(1) == Some(b'@') && self.at_line_start() {
                        self.pos += 2;
                        break;
                    }
                    self.pos += 1;
                }
                b'"' => {
                    if self.peek(1) == Some(b'"') {
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                        break;
                    }
                }
                _ => self.pos += 1,
            }
        }
        let kind = if here {
            QuoteKind::DoubleHere
        } else {
            QuoteKind::Double
        };
        self.push(TokenKind::StringLiteral(kind), start);
        Ok(())
    }

    fn single_string(&mut self, start: usize, here: bool) -> Result<(), LexError> {
        self.pos += 1;
        loop {
            let Some(c) = self.peek(0) else {
                return Err(self.error(start, "unterminated string literal"));
            };
            match c {
                b'\'' if here => {
                    if self.peek(1) == Some(b'@') && self.at_line_start() {
                        self.pos += 2;
                        break;
                    }
                    self.pos += 1;
                }
                b'\'' => {
                    if self.peek(1) == Some(b'\'') {
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                        break;
                    }
                }
                _ => self.pos += 1,
            }
        }
        let kind = if here {
            QuoteKind::SingleHere
        } else {
            QuoteKind::Single
        };
        self.push(TokenKind::StringLiteral(kind), start);
        Ok(())
    }

    /// Here-string terminators must start a line (leading whitespace allowed).
    fn at_line_start(&self) -> bool {
        let mut i = self.pos;
        while i > 0 {
            i -= 1;
            match self.src[i] {
                b' ' | b'\t' => continue,
                b'\n' => return true,
                _ => return false,
            }
        }
        false
    }

    /// Skip a `$( ... )` inside an expandable string, honoring nesting.
    fn skip_subexpression(&mut self, string_start: usize) -> Result<(), LexError> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.peek(0) {
                Some(b'(') => depth += 1,
                Some(b')') => depth -= 1,
                Some(b'\'') => {
                    self.pos += 1;
                    while self.peek(0).is_some_and(|c| c != b'\'') {
                        self.pos += 1;
                    }
                }
                Some(_) => {}
                None => return Err(self.error(string_start, "unterminated subexpression in string")),
            }
            self.pos += 1;
        }
        Ok(())
    }

    fn dot(&mut self, start: usize) {
        if self.peek(1) == Some(b'.') {
            self.pos += 2;
            self.push(TokenKind::Operator, start);
            return;
        }
        let member_access = !self.spaced
            && matches!(
                self.previous().map(|t| t.kind),
                Some(
                    TokenKind::Variable
                        | TokenKind::RParen
                        | TokenKind::RBracket
                        | TokenKind::RBrace
                        | TokenKind::Member
                        | TokenKind::StringLiteral(_)
                )
            );
        if member_access {
            self.pos += 1;
            self.push(TokenKind::Dot, start);
            self.member();
        } else if self.peek(1).map_or(true, |c| c == b' ' || c == b'\t') {
            // dot-source operator
            self.pos += 1;
            self.push(TokenKind::Operator, start);
        } else {
            self.word(start);
        }
    }

    /// Lex an identifier directly following `.` or `::` as a member name.
    fn member(&mut self) {
        let start = self.pos;
        while self.peek(0).is_some_and(is_ident) {
            self.pos += 1;
        }
        if self.pos > start {
            self.push(TokenKind::Member, start);
        }
    }

    fn dash(&mut self, start: usize) {
        match self.peek(1) {
            Some(c) if c.is_ascii_alphabetic() => {
                self.pos += 1;
                while self.peek(0).is_some_and(|c| is_ident(c) || c == b'-') {
                    self.pos += 1;
                }
                if self.peek(0) == Some(b':') && self.peek(1) != Some(b':') {
                    self.pos += 1;
                }
                self.push(TokenKind::Parameter, start);
            }
            Some(c) if c.is_ascii_digit() => self.word(start),
            Some(b'=') => {
                self.pos += 2;
                self.push(TokenKind::Assign, start);
            }
            Some(b'-') => {
                self.pos += 2;
                self.push(TokenKind::Operator, start);
            }
            _ => self.single(TokenKind::Operator, start),
        }
    }

    fn arithmetic(&mut self, start: usize) {
        let c = self.src[self.pos];
        match self.peek(1) {
            Some(b'=') => {
                self.pos += 2;
                self.push(TokenKind::Assign, start);
            }
            Some(b'+') if c == b'+' => {
                self.pos += 2;
                self.push(TokenKind::Operator, start);
            }
            // `*`, `/` and `%` double as wildcards, paths and the ForEach-Object alias
            _ if c != b'+' => self.word(start),
            _ => self.single(TokenKind::Operator, start),
        }
    }

    fn redirection(&mut self, start: usize) {
        self.pos += 1;
        if self.peek(0) == Some(b'>') {
            self.pos += 1;
        }
        if self.peek(0) == Some(b'&') && self.peek(1).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 2;
        }
        self.push(TokenKind::Operator, start);
    }

    fn word(&mut self, start: usize) {
        loop {
            match self.peek(0) {
                Some(b'`') => self.pos += 2,
                Some(c) if !is_word_stop(c) => self.pos += 1,
                _ => break,
            }
        }
        // numeric redirection like `2>&1`
        if self.peek(0) == Some(b'>')
            && self.pos - start == 1
            && self.src[start].is_ascii_digit()
        {
            self.redirection(start);
            return;
        }
        if self.pos == start {
            self.pos += 1;
        }
        self.pos = self.pos.min(self.src.len());
        self.push(TokenKind::Word, start);
    }
}
