//! Single-flight coordination of commentary generation.
//!
//! At most one "tracked" generation is in flight at a time: a new `process`
//! call cancels the previous one before starting. `regenerate` runs the same
//! body untracked, so it neither cancels nor is cancelled by `process`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::engine::{CommentaryEngine, TrackPrompt};
use super::prompt::PromptBuilder;
use super::{CommentaryRequest, CommentaryResult};
use crate::history::{CommentaryRecord, HistoryStore};
use crate::metadata::{MetadataProvider, MetadataResult};

/// How long a metadata fetch may take before we proceed without it.
const METADATA_TIMEOUT: Duration = Duration::from_secs(15);

/// How long generation may take before the attempt is abandoned.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors produced by a generation attempt.
#[derive(Debug, Error, PartialEq)]
pub enum CommentaryError {
    #[error("generation was cancelled")]
    Cancelled,

    #[error("commentary engine returned nothing")]
    EmptyResponse,

    #[error("AI unavailable: {0}")]
    AiUnavailable(String),
}

/// Runs generation attempts against the engine, metadata provider and
/// history store.
pub struct CommentaryOrchestrator {
    engine: Arc<dyn CommentaryEngine>,
    metadata: Arc<dyn MetadataProvider>,
    history: Arc<dyn HistoryStore>,
    tracked: Mutex<Option<(u64, CancellationToken)>>,
    generation: AtomicU64,
}

impl CommentaryOrchestrator {
    pub fn new(
        engine: Arc<dyn CommentaryEngine>,
        metadata: Arc<dyn MetadataProvider>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            engine,
            metadata,
            history,
            tracked: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Process a track change: cancel the previous tracked attempt, fetch
    /// context, generate commentary, save to history.
    pub async fn process(
        &self,
        request: CommentaryRequest,
    ) -> Result<CommentaryResult, CommentaryError> {
        let token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut tracked = self.tracked.lock().unwrap();
            if let Some((_, previous)) = tracked.replace((generation, token.clone())) {
                previous.cancel();
            }
        }

        let result = self.run_commentary(&request, &token).await;

        // Clear the slot only if a newer attempt has not replaced us.
        let mut tracked = self.tracked.lock().unwrap();
        if tracked.as_ref().map(|(installed, _)| *installed) == Some(generation) {
            *tracked = None;
        }
        drop(tracked);

        result
    }

    /// Regenerate commentary for a track without touching in-flight work.
    pub async fn regenerate(
        &self,
        request: CommentaryRequest,
    ) -> Result<CommentaryResult, CommentaryError> {
        let token = CancellationToken::new();
        self.run_commentary(&request, &token).await
    }

    /// Cancel any tracked attempt and poke the engine.
    pub async fn cancel(&self) {
        let tracked = { self.tracked.lock().unwrap().take() };
        if let Some((_, token)) = tracked {
            token.cancel();
        }
        self.engine.cancel_current().await;
    }

    async fn run_commentary(
        &self,
        request: &CommentaryRequest,
        cancel: &CancellationToken,
    ) -> Result<CommentaryResult, CommentaryError> {
        let metadata_fetch = async {
            let fetch = self.metadata.fetch(
                &request.name,
                &request.artist,
                &request.album,
                &request.genre,
            );
            match tokio::time::timeout(METADATA_TIMEOUT, fetch).await {
                Ok(metadata) => metadata,
                Err(_) => {
                    warn!(
                        track = %request.name,
                        "Metadata fetch timed out, proceeding with basic info"
                    );
                    MetadataResult::default()
                }
            }
        };
        let ((), metadata) = tokio::join!(self.engine.prewarm(), metadata_fetch);

        if cancel.is_cancelled() {
            debug!(track = %request.name, "Generation cancelled after metadata fetch");
            return Err(CommentaryError::Cancelled);
        }

        let context = PromptBuilder::build(
            &request.name,
            &request.artist,
            &request.album,
            &request.genre,
            &metadata,
        );
        let prompt = TrackPrompt {
            name: request.name.clone(),
            artist: request.artist.clone(),
            album: request.album.clone(),
            genre: request.genre.clone(),
            context,
        };

        let commentary = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(track = %request.name, "Generation cancelled");
                return Err(CommentaryError::Cancelled);
            }
            outcome = tokio::time::timeout(GENERATION_TIMEOUT, self.engine.generate(&prompt)) => {
                match outcome {
                    Ok(Ok(text)) => text,
                    Ok(Err(e)) => return Err(CommentaryError::AiUnavailable(e.to_string())),
                    Err(_) => {
                        return Err(CommentaryError::AiUnavailable(
                            "commentary generation timed out".to_string(),
                        ))
                    }
                }
            }
        };

        if commentary.is_empty() {
            return Err(CommentaryError::EmptyResponse);
        }

        let id = Uuid::new_v4();
        let record = CommentaryRecord {
            id,
            track_name: request.name.clone(),
            artist: request.artist.clone(),
            album: request.album.clone(),
            genre: request.genre.clone(),
            commentary: commentary.clone(),
            timestamp: Utc::now(),
            catalog_url: metadata.catalog_url.clone(),
            persistent_id: request.persistent_id.clone(),
            favorited: false,
            scrobbled: false,
            thumbnail: None,
        };
        if let Err(e) = self.history.save(&record) {
            warn!(error = %e, "Failed to save commentary to history");
        }

        Ok(CommentaryResult {
            id,
            commentary,
            catalog_url: metadata.catalog_url,
            track_name: request.name.clone(),
            artist: request.artist.clone(),
            album: request.album.clone(),
            genre: request.genre.clone(),
        })
    }
}
