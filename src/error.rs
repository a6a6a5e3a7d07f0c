//! Errors surfaced by the rendering bridge.

use http::StatusCode;
use thiserror::Error;

/// Component-originated render failure, as classified by the script
/// environment's `isRenderError` predicate.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct RenderError {
    message: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl RenderError {
    pub fn new<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: source.to_string(),
            source: Box::new(source),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// The component tree threw while rendering
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Any other failure of the script call, passed through untouched
    #[error(transparent)]
    Execution(anyhow::Error),

    #[error("Template execution failed: {0}")]
    Template(#[source] std::io::Error),

    #[error("JSON encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Error {
    pub fn is_render_error(&self) -> bool {
        matches!(self, Error::Render(_))
    }

    /// Status a host should answer with for this failure
    pub fn status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Message that is safe to show to a client. Only render errors carry
    /// detail; everything else is reported generically.
    pub fn public_message(&self) -> &str {
        match self {
            Error::Render(e) => e.message(),
            _ => "Internal Server Error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
