//! Tokenizer with Python-style significant indentation.
//!
//! Newlines inside brackets are ignored; at bracket depth zero each logical
//! line ends with a `Newline` token and indentation changes become `Indent` /
//! `Dedent` tokens.

use std::fmt;

use super::SyntaxError;
use super::ast::Line;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Int(i128),
    Float(f64),
    Str(String),
    /// Body of an f-string with escapes already resolved.
    FStr(String),

    Newline,
    Indent,
    Dedent,
    Eof,

    // Keywords
    And,
    Or,
    Not,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Is,
    Def,
    Return,
    Break,
    Continue,
    Pass,
    Import,
    From,
    As,
    True,
    False,
    None,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    DoubleSlashEq,
    PercentEq,
    DoubleStarEq,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
}

impl TokenKind {
    fn keyword(word: &str) -> Option<Self> {
        Some(match word {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "is" => TokenKind::Is,
            "def" => TokenKind::Def,
            "return" => TokenKind::Return,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "pass" => TokenKind::Pass,
            "import" => TokenKind::Import,
            "from" => TokenKind::From,
            "as" => TokenKind::As,
            "True" => TokenKind::True,
            "False" => TokenKind::False,
            "None" => TokenKind::None,
            _ => return None,
        })
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Name(n) => return write!(f, "name '{n}'"),
            TokenKind::Int(n) => return write!(f, "number {n}"),
            TokenKind::Float(n) => return write!(f, "number {n}"),
            TokenKind::Str(_) | TokenKind::FStr(_) => "string literal",
            TokenKind::Newline => "end of line",
            TokenKind::Indent => "indent",
            TokenKind::Dedent => "dedent",
            TokenKind::Eof => "end of input",
            TokenKind::And => "'and'",
            TokenKind::Or => "'or'",
            TokenKind::Not => "'not'",
            TokenKind::If => "'if'",
            TokenKind::Elif => "'elif'",
            TokenKind::Else => "'else'",
            TokenKind::While => "'while'",
            TokenKind::For => "'for'",
            TokenKind::In => "'in'",
            TokenKind::Is => "'is'",
            TokenKind::Def => "'def'",
            TokenKind::Return => "'return'",
            TokenKind::Break => "'break'",
            TokenKind::Continue => "'continue'",
            TokenKind::Pass => "'pass'",
            TokenKind::Import => "'import'",
            TokenKind::From => "'from'",
            TokenKind::As => "'as'",
            TokenKind::True => "'True'",
            TokenKind::False => "'False'",
            TokenKind::None => "'None'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::DoubleSlash => "'//'",
            TokenKind::Percent => "'%'",
            TokenKind::DoubleStar => "'**'",
            TokenKind::Assign => "'='",
            TokenKind::EqEq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::Lt => "'<'",
            TokenKind::Le => "'<='",
            TokenKind::Gt => "'>'",
            TokenKind::Ge => "'>='",
            TokenKind::PlusEq => "'+='",
            TokenKind::MinusEq => "'-='",
            TokenKind::StarEq => "'*='",
            TokenKind::SlashEq => "'/='",
            TokenKind::DoubleSlashEq => "'//='",
            TokenKind::PercentEq => "'%='",
            TokenKind::DoubleStarEq => "'**='",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::Comma => "','",
            TokenKind::Colon => "':'",
            TokenKind::Dot => "'.'",
            TokenKind::Semicolon => "';'",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: Line,
}

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: Line,
    indents: Vec<usize>,
    depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            indents: vec![0],
            depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    /// Lexes a source fragment that is a single expression, e.g. an f-string field.
    pub fn for_expression(source: &str, line: Line) -> Self {
        let mut lexer = Self::new(source);
        lexer.line = line;
        // Bracket mode: newlines and indentation are insignificant.
        lexer.depth = 1;
        lexer.at_line_start = false;
        lexer
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        loop {
            if self.at_line_start && self.depth == 0 {
                self.indentation()?;
            }
            let Some(c) = self.peek() else { break };
            match c {
                ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.end_logical_line();
                        self.at_line_start = true;
                    }
                    self.line += 1;
                }
                '"' | '\'' => self.string(false, false)?,
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                c if c == '_' || c.is_alphabetic() => self.word()?,
                _ => self.operator()?,
            }
        }

        if self.depth == 0 {
            self.end_logical_line();
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent);
        }
        self.push(TokenKind::Eof);
        Ok(self.tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, kind: TokenKind) {
        self.tokens.push(Token {
            kind,
            line: self.line,
        });
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.line)
    }

    fn skip_comment(&mut self) {
        while self.peek().is_some_and(|c| c != '\n') {
            self.pos += 1;
        }
    }

    fn end_logical_line(&mut self) {
        let needs_newline = self
            .tokens
            .last()
            .is_some_and(|t| !matches!(t.kind, TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent));
        if needs_newline {
            self.push(TokenKind::Newline);
        }
    }

    /// Measures the indentation of the next non-blank line and emits
    /// `Indent`/`Dedent` tokens against the indent stack.
    fn indentation(&mut self) -> Result<(), SyntaxError> {
        let width = loop {
            let mut width = 0;
            while let Some(c) = self.peek() {
                match c {
                    ' ' => width += 1,
                    '\t' => width = (width / 8 + 1) * 8,
                    '\r' | '\x0c' => {}
                    _ => break,
                }
                self.pos += 1;
            }
            match self.peek() {
                None => return Ok(()),
                Some('\n') => {
                    self.pos += 1;
                    self.line += 1;
                }
                Some('#') => self.skip_comment(),
                Some(_) => break width,
            }
        };
        self.at_line_start = false;

        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(TokenKind::Indent);
        } else if width < current {
            while self.indents.last().is_some_and(|&top| top > width) {
                self.indents.pop();
                self.push(TokenKind::Dedent);
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(self
                    .error("unindent does not match any outer indentation level")
                    .indentation());
            }
        }
        Ok(())
    }

    fn word(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c == '_' || c.is_alphanumeric())
        {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('"' | '\'')) {
            let prefix = word.to_ascii_lowercase();
            match prefix.as_str() {
                "f" => return self.string(true, false),
                "r" => return self.string(false, true),
                "rf" | "fr" => return self.string(true, true),
                "b" | "rb" | "br" => return Err(self.error("bytes literals are not supported")),
                _ => {}
            }
        }

        let kind = TokenKind::keyword(&word).unwrap_or(TokenKind::Name(word));
        self.push(kind);
        Ok(())
    }

    fn number(&mut self) -> Result<(), SyntaxError> {
        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.pos += 2;
                let digits = self.take_digits(|c| c.is_digit(radix));
                let value = i128::from_str_radix(&digits, radix)
                    .map_err(|_| self.error("invalid integer literal"))?;
                self.push(TokenKind::Int(value));
                return Ok(());
            }
        }

        let mut text = self.take_digits(|c| c.is_ascii_digit());
        let mut is_float = false;
        if self.peek() == Some('.') {
            is_float = true;
            self.pos += 1;
            text.push('.');
            text.push_str(&self.take_digits(|c| c.is_ascii_digit()));
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = self.peek_at(1);
            let digit_at = if matches!(sign, Some('+' | '-')) { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push('e');
                self.pos += 1;
                if let Some(s @ ('+' | '-')) = sign {
                    text.push(s);
                    self.pos += 1;
                }
                text.push_str(&self.take_digits(|c| c.is_ascii_digit()));
            }
        }
        if self.peek().is_some_and(|c| c == '_' || c.is_alphabetic()) {
            return Err(self.error("invalid decimal literal"));
        }

        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error("invalid float literal"))?;
            self.push(TokenKind::Float(value));
        } else {
            let value: i128 = text
                .parse()
                .map_err(|_| self.error("integer literal is too large"))?;
            self.push(TokenKind::Int(value));
        }
        Ok(())
    }

    /// Collects digits accepted by `accept`, skipping `_` separators.
    fn take_digits(&mut self, accept: impl Fn(char) -> bool) -> String {
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if accept(c) {
                digits.push(c);
            } else if c != '_' {
                break;
            }
            self.pos += 1;
        }
        digits
    }

    fn string(&mut self, formatted: bool, raw: bool) -> Result<(), SyntaxError> {
        let start_line = self.line;
        let Some(quote) = self.peek() else {
            return Err(self.error("unterminated string literal"));
        };
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut value = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(SyntaxError::new(
                    format!("unterminated string literal (detected at line {})", self.line),
                    start_line,
                ));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }
            match c {
                '\n' if !triple => {
                    return Err(SyntaxError::new(
                        format!("unterminated string literal (detected at line {})", self.line),
                        start_line,
                    ));
                }
                '\n' => {
                    self.line += 1;
                    value.push('\n');
                    self.pos += 1;
                }
                '\\' if !raw => {
                    self.pos += 1;
                    self.escape(&mut value)?;
                }
                _ => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }

        let kind = if formatted {
            TokenKind::FStr(value)
        } else {
            TokenKind::Str(value)
        };
        self.tokens.push(Token {
            kind,
            line: start_line,
        });
        Ok(())
    }

    /// Resolves one escape sequence; the backslash is already consumed.
    fn escape(&mut self, out: &mut String) -> Result<(), SyntaxError> {
        let Some(c) = self.peek() else {
            return Err(self.error("unterminated string literal"));
        };
        self.pos += 1;
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            '\n' => self.line += 1,
            'x' | 'u' => {
                let len = if c == 'x' { 2 } else { 4 };
                let hex: String = self.chars.iter().skip(self.pos).take(len).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == len)
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error(format!("truncated \\{c} escape")))?;
                self.pos += len;
                out.push(code);
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn operator(&mut self) -> Result<(), SyntaxError> {
        let c = self.peek().unwrap_or('\0');
        let next = self.peek_at(1);
        let third = self.peek_at(2);

        let (kind, len) = match (c, next, third) {
            ('*', Some('*'), Some('=')) => (TokenKind::DoubleStarEq, 3),
            ('/', Some('/'), Some('=')) => (TokenKind::DoubleSlashEq, 3),
            ('*', Some('*'), _) => (TokenKind::DoubleStar, 2),
            ('/', Some('/'), _) => (TokenKind::DoubleSlash, 2),
            ('=', Some('='), _) => (TokenKind::EqEq, 2),
            ('!', Some('='), _) => (TokenKind::NotEq, 2),
            ('<', Some('='), _) => (TokenKind::Le, 2),
            ('>', Some('='), _) => (TokenKind::Ge, 2),
            ('+', Some('='), _) => (TokenKind::PlusEq, 2),
            ('-', Some('='), _) => (TokenKind::MinusEq, 2),
            ('*', Some('='), _) => (TokenKind::StarEq, 2),
            ('/', Some('='), _) => (TokenKind::SlashEq, 2),
            ('%', Some('='), _) => (TokenKind::PercentEq, 2),
            ('+', _, _) => (TokenKind::Plus, 1),
            ('-', _, _) => (TokenKind::Minus, 1),
            ('*', _, _) => (TokenKind::Star, 1),
            ('/', _, _) => (TokenKind::Slash, 1),
            ('%', _, _) => (TokenKind::Percent, 1),
            ('=', _, _) => (TokenKind::Assign, 1),
            ('<', _, _) => (TokenKind::Lt, 1),
            ('>', _, _) => (TokenKind::Gt, 1),
            (',', _, _) => (TokenKind::Comma, 1),
            (':', _, _) => (TokenKind::Colon, 1),
            ('.', _, _) => (TokenKind::Dot, 1),
            (';', _, _) => (TokenKind::Semicolon, 1),
            ('(', _, _) => (TokenKind::LParen, 1),
            ('[', _, _) => (TokenKind::LBracket, 1),
            ('{', _, _) => (TokenKind::LBrace, 1),
            (')', _, _) => (TokenKind::RParen, 1),
            (']', _, _) => (TokenKind::RBracket, 1),
            ('}', _, _) => (TokenKind::RBrace, 1),
            (other, _, _) => return Err(self.error(format!("invalid character '{other}'"))),
        };

        match kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => self.depth += 1,
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                self.depth = self.depth.saturating_sub(1);
            }
            _ => {}
        }
        self.pos += len;
        self.push(kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn indentation_produces_indent_and_dedent() {
        let tokens = kinds("if x:\n    y = 1\nz = 2\n");
        assert!(tokens.contains(&TokenKind::Indent));
        assert!(tokens.contains(&TokenKind::Dedent));
        assert_eq!(tokens.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        let tokens = kinds("x = [1,\n  2]\n");
        let newlines = tokens.iter().filter(|t| **t == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!tokens.contains(&TokenKind::Indent));
    }

    #[test]
    fn numbers_and_operators() {
        assert_eq!(
            kinds("1_000 // 3.5e1 ** 0x10"),
            vec![
                TokenKind::Int(1000),
                TokenKind::DoubleSlash,
                TokenKind::Float(35.0),
                TokenKind::DoubleStar,
                TokenKind::Int(16),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_resolve_escapes() {
        assert_eq!(kinds(r#"'a\tb'"#)[0], TokenKind::Str("a\tb".into()));
        assert_eq!(kinds(r#"r'a\tb'"#)[0], TokenKind::Str("a\\tb".into()));
        assert_eq!(kinds(r#"f"{x}\n""#)[0], TokenKind::FStr("{x}\n".into()));
        assert_eq!(kinds("'''a\nb'''")[0], TokenKind::Str("a\nb".into()));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::new("x = 'abc\n").tokenize().unwrap_err();
        assert!(err.message.starts_with("unterminated string literal"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn bad_dedent_is_an_indentation_error() {
        let err = Lexer::new("if x:\n    y = 1\n  z = 2\n").tokenize().unwrap_err();
        assert!(err.indentation);
        assert_eq!(err.line, 3);
    }
}
