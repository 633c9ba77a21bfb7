pub mod ast;
mod lexer;
#[allow(clippy::module_inception)]
mod parser;

use std::fmt;

pub use parser::Parser;

use ast::Line;

/// A snippet that could not be tokenized or parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub line: Line,
    /// Reported as `IndentationError` rather than `SyntaxError`.
    pub indentation: bool,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: Line) -> Self {
        Self {
            message: message.into(),
            line,
            indentation: false,
        }
    }

    #[must_use]
    pub fn indentation(mut self) -> Self {
        self.indentation = true;
        self
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.indentation {
            "IndentationError"
        } else {
            "SyntaxError"
        };
        write!(f, "{kind}: {} (line {})", self.message, self.line)
    }
}

impl std::error::Error for SyntaxError {}

/// Parses a whole snippet.
pub fn parse_program(source: &str) -> Result<Vec<ast::Stmt>, SyntaxError> {
    Parser::new(source)?.parse_program()
}
