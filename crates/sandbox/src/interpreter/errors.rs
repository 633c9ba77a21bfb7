//! Errors raised inside a running snippet.

use std::fmt;

use crate::parser::SyntaxError;
use crate::parser::ast::Line;

/// Python-style exception class names reported back to the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    SyntaxError,
    IndentationError,
    NameError,
    TypeError,
    ValueError,
    ZeroDivisionError,
    IndexError,
    KeyError,
    AttributeError,
    ImportError,
    OverflowError,
    MemoryError,
    RecursionError,
    OutputLimitError,
    RuntimeError,
}

impl ExceptionKind {
    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::SyntaxError => "SyntaxError",
            ExceptionKind::IndentationError => "IndentationError",
            ExceptionKind::NameError => "NameError",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::ZeroDivisionError => "ZeroDivisionError",
            ExceptionKind::IndexError => "IndexError",
            ExceptionKind::KeyError => "KeyError",
            ExceptionKind::AttributeError => "AttributeError",
            ExceptionKind::ImportError => "ImportError",
            ExceptionKind::OverflowError => "OverflowError",
            ExceptionKind::MemoryError => "MemoryError",
            ExceptionKind::RecursionError => "RecursionError",
            ExceptionKind::OutputLimitError => "OutputLimitError",
            ExceptionKind::RuntimeError => "RuntimeError",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    pub kind: ExceptionKind,
    pub message: String,
    pub line: Option<Line>,
}

impl Exception {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    /// Attaches `line` unless a more precise line is already known.
    #[must_use]
    pub fn at_line(mut self, line: Line) -> Self {
        self.line.get_or_insert(line);
        self
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.name())?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        Ok(())
    }
}

impl From<SyntaxError> for Exception {
    fn from(err: SyntaxError) -> Self {
        let kind = if err.indentation {
            ExceptionKind::IndentationError
        } else {
            ExceptionKind::SyntaxError
        };
        Self {
            kind,
            message: err.message,
            line: Some(err.line),
        }
    }
}

pub fn type_error(message: impl Into<String>) -> Exception {
    Exception::new(ExceptionKind::TypeError, message)
}

pub fn value_error(message: impl Into<String>) -> Exception {
    Exception::new(ExceptionKind::ValueError, message)
}

pub fn index_error(message: impl Into<String>) -> Exception {
    Exception::new(ExceptionKind::IndexError, message)
}

pub fn zero_division(message: impl Into<String>) -> Exception {
    Exception::new(ExceptionKind::ZeroDivisionError, message)
}

pub fn overflow() -> Exception {
    Exception::new(ExceptionKind::OverflowError, "integer result too large")
}

pub fn recursion_error(context: &str) -> Exception {
    Exception::new(
        ExceptionKind::RecursionError,
        format!("maximum recursion depth exceeded{context}"),
    )
}

/// Why execution stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Raised(Exception),
    /// The run was cancelled or hit its deadline.
    Interrupted,
}

impl Fault {
    #[must_use]
    pub fn at_line(self, line: Line) -> Self {
        match self {
            Fault::Raised(e) => Fault::Raised(e.at_line(line)),
            Fault::Interrupted => Fault::Interrupted,
        }
    }
}

impl From<Exception> for Fault {
    fn from(e: Exception) -> Self {
        Fault::Raised(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_message_and_line() {
        let e = zero_division("division by zero").at_line(3);
        assert_eq!(e.to_string(), "ZeroDivisionError: division by zero (line 3)");
    }

    #[test]
    fn inner_line_wins() {
        let e = type_error("bad").at_line(7).at_line(2);
        assert_eq!(e.line, Some(7));
    }
}
