//! Error types for tether_core

use thiserror::Error;

/// A runtime fault surfaced through [`Diagnostics`](crate::diagnostics::Diagnostics)
///
/// Faults are reported, never thrown: the operation that produced one
/// degrades to a no-op and the rest of the pass continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Fault {
    /// Render logic tried to mutate state through the read accessor
    #[error("write to `{path}` rejected: render state is read-only")]
    ReadOnlyWrite { path: String },

    /// A render callback returned an error during a dispatch pass
    #[error("render {render} failed: {message}")]
    RenderFailed { render: String, message: String },

    /// A declarative binding could not be evaluated
    #[error("invalid binding {attribute}=\"{expression}\": {reason}")]
    InvalidBinding {
        attribute: String,
        expression: String,
        reason: String,
    },

    /// Component logic failed to produce a render callback
    #[error("component <{tag}> failed to set up: {message}")]
    ComponentSetup { tag: String, message: String },

    /// A write through the write accessor could not be applied
    #[error("write to `{path}` ignored: {reason}")]
    IgnoredWrite { path: String, reason: String },
}

impl Fault {
    /// Short machine-friendly name, used as a tracing field
    pub fn kind(&self) -> &'static str {
        match self {
            Fault::ReadOnlyWrite { .. } => "read_only_write",
            Fault::RenderFailed { .. } => "render_failed",
            Fault::InvalidBinding { .. } => "invalid_binding",
            Fault::ComponentSetup { .. } => "component_setup",
            Fault::IgnoredWrite { .. } => "ignored_write",
        }
    }
}

/// Error returned by render callbacks
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RenderError {
    pub fn msg(message: impl Into<String>) -> Self {
        RenderError::Message(message.into())
    }
}

/// Errors from loading engine configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result of a render callback
pub type RenderResult = std::result::Result<(), RenderError>;
