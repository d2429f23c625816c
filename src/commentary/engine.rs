//! Commentary engine trait definition.

use async_trait::async_trait;
use thiserror::Error;

/// Everything an engine gets to work with for one track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPrompt {
    pub name: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    /// Sectioned context text from the prompt builder.
    pub context: String,
}

/// Errors that can occur when interacting with a commentary engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Request timeout")]
    Timeout,
}

/// A backend that turns a [`TrackPrompt`] into a few sentences of
/// commentary.
///
/// Implementations can connect to different LLM backends while providing a
/// unified interface.
#[async_trait]
pub trait CommentaryEngine: Send + Sync {
    /// Best-effort connection warm-up, fired while metadata is fetched.
    async fn prewarm(&self);

    async fn generate(&self, prompt: &TrackPrompt) -> Result<String, EngineError>;

    /// Abort whatever the engine is generating right now, if anything.
    async fn cancel_current(&self);
}
