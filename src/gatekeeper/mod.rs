//! Decides whether a track-change event should trigger commentary.
//!
//! Noisy players repeat events, fire transitions while paused, and rush
//! through tracks the user is skipping past. The gatekeeper filters all of
//! that down to at most one accept per genuinely-listened track.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::player::PlayerState;

/// Per-evaluation settings, resolved by the caller from user preferences.
#[derive(Debug, Clone)]
pub struct GatekeeperConfig {
    /// User explicitly paused commentary generation.
    pub paused_by_user: bool,
    /// Minimum time the previous track must have played before a new track
    /// is eligible. Zero disables the check.
    pub skip_threshold: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Paused,
    NotPlaying,
    Duplicate,
    SkipThreshold,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::Paused => "paused",
            RejectReason::NotPlaying => "not-playing",
            RejectReason::Duplicate => "duplicate",
            RejectReason::SkipThreshold => "skip-threshold",
        };
        f.write_str(s)
    }
}

/// Stateful accept/reject filter over a stream of track-change events.
///
/// State only ever advances on the accept path and the skip-threshold
/// reject path; every other rejection leaves it untouched.
#[derive(Debug, Default)]
pub struct TrackGatekeeper {
    last_track_id: Option<String>,
    track_start_time: Option<Instant>,
}

impl TrackGatekeeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &mut self,
        track_id: &str,
        player_state: PlayerState,
        config: &GatekeeperConfig,
    ) -> Decision {
        if config.paused_by_user {
            debug!("Commentary paused by user, ignoring track change");
            return Decision::Reject(RejectReason::Paused);
        }

        if player_state != PlayerState::Playing {
            debug!(state = ?player_state, "Not playing, ignoring track change");
            return Decision::Reject(RejectReason::NotPlaying);
        }

        if self.last_track_id.as_deref() == Some(track_id) {
            debug!(track_id = %track_id, "Duplicate track event, ignoring");
            return Decision::Reject(RejectReason::Duplicate);
        }

        // The previous track counts as skipped when it played for less than
        // the threshold; the new track still becomes the reference point so
        // the next change is measured against it.
        if let Some(started) = self.track_start_time {
            if config.skip_threshold > Duration::ZERO {
                let elapsed = started.elapsed();
                if elapsed < config.skip_threshold {
                    debug!(
                        elapsed_secs = elapsed.as_secs_f64(),
                        threshold_secs = config.skip_threshold.as_secs_f64(),
                        "Previous track skipped too quickly, suppressing commentary"
                    );
                    self.track_start_time = Some(Instant::now());
                    self.last_track_id = Some(track_id.to_string());
                    return Decision::Reject(RejectReason::SkipThreshold);
                }
            }
        }

        self.track_start_time = Some(Instant::now());
        self.last_track_id = Some(track_id.to_string());
        Decision::Accept
    }
}
