//! Error types for tether_dom

use thiserror::Error;

/// Markup fragment parse errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarkupError {
    #[error("markup syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("unclosed element <{tag}>")]
    Unclosed { tag: String },

    #[error("mismatched closing tag: expected </{expected}>, found </{found}>")]
    MismatchedClose { expected: String, found: String },
}

/// Binding expression compile errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,

    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("unexpected trailing input `{rest}`")]
    Trailing { rest: String },
}

pub type MarkupResult<T> = std::result::Result<T, MarkupError>;
