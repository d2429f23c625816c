//! Liner Notes Daemon Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod commentary;
pub mod config;
pub mod gatekeeper;
pub mod history;
pub mod metadata;
pub mod pipeline;
pub mod player;
pub mod scrobble;

// Re-export commonly used types for convenience
pub use commentary::{
    CommentaryEngine, CommentaryOrchestrator, CommentaryRequest, CommentaryResult, OpenAiEngine,
};
pub use config::{AppConfig, CliConfig, FileConfig};
pub use gatekeeper::{Decision, GatekeeperConfig, RejectReason, TrackGatekeeper};
pub use history::{CommentaryRecord, HistoryStore, SqliteHistoryStore};
pub use metadata::{ItunesMetadataProvider, MetadataProvider, MetadataResult};
pub use pipeline::{PipelineSettings, PlaybackPipeline};
pub use player::{PlayerState, TrackEvent};
pub use scrobble::{
    LastFmClient, PendingQueue, ScrobbleCandidate, ScrobbleService, ScrobbleTracker, Session,
};
