//! Commentary generation for the currently playing track.

pub mod engine;
pub mod openai;
pub mod orchestrator;
pub mod prompt;

use uuid::Uuid;

pub use engine::{CommentaryEngine, EngineError, TrackPrompt};
pub use openai::OpenAiEngine;
pub use orchestrator::{CommentaryError, CommentaryOrchestrator};
pub use prompt::PromptBuilder;

/// Normalized track identity submitted to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentaryRequest {
    pub persistent_id: String,
    pub name: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
}

/// Outcome of one successful generation, immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentaryResult {
    pub id: Uuid,
    pub commentary: String,
    pub catalog_url: Option<String>,
    pub track_name: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
}
