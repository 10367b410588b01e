use std::ops::Range;
use thiserror::Error;

use crate::token::{Token, TokenType};

#[derive(Debug, Error)]
pub enum ServoError {
    #[error("Could not read or write: {0}")]
    Io(#[from] std::io::Error),

    #[error("[line {line}] Error: {message}")]
    Scan {
        message: String,
        line: usize,
        span: Range<usize>,
    },

    #[error("[line {line}] Error{location}: {message}")]
    Parse {
        message: String,
        line: usize,
        location: String,
        span: Range<usize>,
    },

    #[error("[line {line}] Error{location}: {message}")]
    Resolution {
        message: String,
        line: usize,
        location: String,
        span: Range<usize>,
    },

    #[error("[line {line}] Error{location}: {message}")]
    Runtime {
        message: String,
        line: usize,
        location: String,
        span: Range<usize>,
    },
}

/// `" at 'x'"` for ordinary tokens, `" at end"` for end of input.
fn location(token: &Token) -> String {
    if token.token_type == TokenType::Eof {
        " at end".to_string()
    } else {
        format!(" at '{}'", token.lexeme)
    }
}

impl ServoError {
    pub fn parse(token: &Token, message: impl Into<String>) -> Self {
        ServoError::Parse {
            message: message.into(),
            line: token.line,
            location: location(token),
            span: token.span.clone(),
        }
    }

    pub fn resolution(token: &Token, message: impl Into<String>) -> Self {
        ServoError::Resolution {
            message: message.into(),
            line: token.line,
            location: location(token),
            span: token.span.clone(),
        }
    }

    pub fn runtime(token: &Token, message: impl Into<String>) -> Self {
        ServoError::Runtime {
            message: message.into(),
            line: token.line,
            location: location(token),
            span: token.span.clone(),
        }
    }

    /// Runtime faults exit with a different status than static errors.
    pub fn is_runtime(&self) -> bool {
        matches!(self, ServoError::Runtime { .. })
    }

    pub fn message(&self) -> String {
        match self {
            ServoError::Io(e) => e.to_string(),
            ServoError::Scan { message, .. }
            | ServoError::Parse { message, .. }
            | ServoError::Resolution { message, .. }
            | ServoError::Runtime { message, .. } => message.clone(),
        }
    }

    pub fn span(&self) -> Option<Range<usize>> {
        match self {
            ServoError::Io(_) => None,
            ServoError::Scan { span, .. }
            | ServoError::Parse { span, .. }
            | ServoError::Resolution { span, .. }
            | ServoError::Runtime { span, .. } => Some(span.clone()),
        }
    }
}
