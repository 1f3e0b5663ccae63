//! Error types for tether_app

use tether_core::{ConfigError, RenderError};
use tether_dom::{MarkupError, NodeId};
use thiserror::Error;

/// Errors that can occur in a Tether application
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid or unparsable configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Markup could not be parsed
    #[error("Markup error: {0}")]
    Markup(#[from] MarkupError),

    /// No component is registered for a tag
    #[error("No component registered for <{tag}>")]
    UnknownComponent { tag: String },

    /// The node does not exist (or is not an element)
    #[error("Node {0:?} is not an element of this document")]
    UnknownNode(NodeId),

    /// The document is borrowed by a render in progress
    #[error("Document is busy: {0}")]
    DocumentBusy(String),

    /// A component's event handler failed
    #[error("Handler of <{tag}> failed: {source}")]
    Handler {
        tag: String,
        #[source]
        source: RenderError,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Other(err.to_string())
    }
}

impl From<std::cell::BorrowMutError> for AppError {
    fn from(err: std::cell::BorrowMutError) -> Self {
        AppError::DocumentBusy(err.to_string())
    }
}

/// Result type for tether_app operations
pub type Result<T> = std::result::Result<T, AppError>;
