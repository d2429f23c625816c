//! Play-time accumulation and scrobble eligibility.
//!
//! Tracks one playing track at a time. Play time only accrues while the
//! player reports Playing; pausing freezes the accumulator. A track becomes
//! scrobble-eligible once half its duration (capped at four minutes) has
//! actually been listened to, and only tracks longer than 30 seconds ever
//! qualify.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Tracks shorter than this are never scrobbled.
const MIN_TRACK_SECONDS: f64 = 30.0;
/// Eligibility threshold cap, per the scrobbling rules.
const MAX_THRESHOLD: Duration = Duration::from_secs(240);

/// The track currently being listened to.
#[derive(Debug, Clone)]
pub struct PlayingTrack {
    pub artist: String,
    pub track: String,
    pub album: String,
    pub duration_seconds: f64,
    pub started_at: DateTime<Utc>,
    accumulated_play: Duration,
    last_resumed_at: Instant,
}

impl PlayingTrack {
    pub fn new(
        artist: impl Into<String>,
        track: impl Into<String>,
        album: impl Into<String>,
        duration_seconds: f64,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            artist: artist.into(),
            track: track.into(),
            album: album.into(),
            duration_seconds,
            started_at,
            accumulated_play: Duration::ZERO,
            last_resumed_at: Instant::now(),
        }
    }

    fn play_time(&self, is_playing: bool) -> Duration {
        if is_playing {
            self.accumulated_play + self.last_resumed_at.elapsed()
        } else {
            self.accumulated_play
        }
    }
}

/// Snapshot handed to the submitter once a track is eligible.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrobbleCandidate {
    pub artist: String,
    pub track: String,
    pub album: String,
    pub duration_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

/// State machine over at most one [`PlayingTrack`].
#[derive(Debug, Default)]
pub struct ScrobbleTracker {
    current: Option<PlayingTrack>,
    is_playing: bool,
    scrobbled: bool,
}

impl ScrobbleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tracked state with a freshly started track.
    pub fn track_started(&mut self, track: PlayingTrack) {
        self.current = Some(track);
        self.is_playing = true;
        self.scrobbled = false;
    }

    /// Fold the elapsed playing stretch into the accumulator. No-op when
    /// already paused or when nothing is tracked.
    pub fn pause(&mut self) {
        if !self.is_playing {
            return;
        }
        let Some(track) = self.current.as_mut() else {
            return;
        };
        track.accumulated_play += track.last_resumed_at.elapsed();
        self.is_playing = false;
    }

    /// Restart the playing stretch. No-op when already playing or when
    /// nothing is tracked.
    pub fn resume(&mut self) {
        if self.is_playing {
            return;
        }
        let Some(track) = self.current.as_mut() else {
            return;
        };
        track.last_resumed_at = Instant::now();
        self.is_playing = true;
    }

    /// Actual listened time for the current track.
    pub fn play_time(&self) -> Duration {
        self.current
            .as_ref()
            .map(|t| t.play_time(self.is_playing))
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_scrobbled(&self) -> bool {
        self.scrobbled
    }

    /// Mark the current track as submitted so it cannot scrobble twice.
    pub fn mark_scrobbled(&mut self) {
        self.scrobbled = true;
    }

    /// Remaining listening time until the track is scrobble-eligible.
    ///
    /// `None` when there is nothing to scrobble (no track, already
    /// scrobbled, or the track is too short); `Some(Duration::ZERO)` once
    /// the threshold has been reached.
    pub fn time_until_scrobble_point(&self) -> Option<Duration> {
        let track = self.current.as_ref()?;
        if self.scrobbled {
            return None;
        }
        if track.duration_seconds <= MIN_TRACK_SECONDS {
            debug!(
                track = %track.track,
                duration_secs = track.duration_seconds,
                "Track too short to scrobble"
            );
            return None;
        }

        let threshold = Duration::from_secs_f64(track.duration_seconds * 0.5).min(MAX_THRESHOLD);
        let elapsed = track.play_time(self.is_playing);
        let remaining = threshold.saturating_sub(elapsed);
        if remaining > Duration::ZERO {
            debug!(
                track = %track.track,
                remaining_secs = remaining.as_secs_f64(),
                elapsed_secs = elapsed.as_secs_f64(),
                "Scrobble point not reached yet"
            );
        }
        Some(remaining)
    }

    /// Snapshot of the current track for submission.
    ///
    /// Does not check play time; callers gate on
    /// [`time_until_scrobble_point`](Self::time_until_scrobble_point) first.
    pub fn candidate(&self) -> Option<ScrobbleCandidate> {
        let track = self.current.as_ref()?;
        if track.duration_seconds <= MIN_TRACK_SECONDS {
            return None;
        }
        Some(ScrobbleCandidate {
            artist: track.artist.clone(),
            track: track.track.clone(),
            album: track.album.clone(),
            duration_seconds: track.duration_seconds,
            timestamp: track.started_at,
        })
    }

    /// Clear all state.
    pub fn reset(&mut self) {
        self.current = None;
        self.is_playing = false;
        self.scrobbled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(duration_seconds: f64) -> (ScrobbleTracker, DateTime<Utc>) {
        let t0 = Utc::now();
        let mut tracker = ScrobbleTracker::new();
        tracker.track_started(PlayingTrack::new("Artist", "Track", "Album", duration_seconds, t0));
        (tracker, t0)
    }

    async fn advance_secs(secs: u64) {
        tokio::time::advance(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_time_accrues_while_playing() {
        let (tracker, _) = started(200.0);
        advance_secs(10).await;
        assert_eq!(tracker.play_time(), Duration::from_secs(10));
        advance_secs(5).await;
        assert_eq!(tracker.play_time(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_freezes_play_time() {
        let (mut tracker, _) = started(200.0);
        advance_secs(5).await;
        tracker.pause();
        advance_secs(60).await;
        assert_eq!(tracker.play_time(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_then_resume_preserves_accumulated_total() {
        let (mut tracker, _) = started(200.0);
        advance_secs(50).await;
        tracker.pause();
        advance_secs(30).await;
        tracker.resume();
        advance_secs(20).await;
        assert_eq!(tracker.play_time(), Duration::from_secs(70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_redundant_pause_and_resume_are_noops() {
        let mut tracker = ScrobbleTracker::new();
        tracker.pause();
        tracker.resume();
        assert_eq!(tracker.play_time(), Duration::ZERO);

        let (mut tracker, _) = started(200.0);
        advance_secs(10).await;
        tracker.resume();
        advance_secs(5).await;
        assert_eq!(tracker.play_time(), Duration::from_secs(15));

        tracker.pause();
        tracker.pause();
        assert_eq!(tracker.play_time(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_track_is_never_eligible() {
        let (tracker, _) = started(30.0);
        assert_eq!(tracker.time_until_scrobble_point(), None);
        assert!(tracker.candidate().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_is_half_duration() {
        let (tracker, _) = started(100.0);
        assert_eq!(
            tracker.time_until_scrobble_point(),
            Some(Duration::from_secs(50))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_capped_at_four_minutes() {
        let (tracker, _) = started(500.0);
        assert_eq!(
            tracker.time_until_scrobble_point(),
            Some(Duration::from_secs(240))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_play_reaches_scrobble_point() {
        let (tracker, t0) = started(200.0);
        advance_secs(100).await;
        assert_eq!(tracker.time_until_scrobble_point(), Some(Duration::ZERO));

        let candidate = tracker.candidate().unwrap();
        assert_eq!(candidate.artist, "Artist");
        assert_eq!(candidate.track, "Track");
        assert_eq!(candidate.album, "Album");
        assert_eq!(candidate.duration_seconds, 200.0);
        assert_eq!(candidate.timestamp, t0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_delays_scrobble_point_by_pause_length() {
        let (mut tracker, _) = started(200.0);
        advance_secs(50).await;
        tracker.pause();
        advance_secs(30).await;
        // Frozen mid-pause: 50s listened, 50s still to go.
        assert_eq!(
            tracker.time_until_scrobble_point(),
            Some(Duration::from_secs(50))
        );

        tracker.resume();
        advance_secs(49).await;
        let remaining = tracker.time_until_scrobble_point().unwrap();
        assert!(remaining > Duration::ZERO);

        advance_secs(1).await;
        assert_eq!(tracker.time_until_scrobble_point(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_candidate_does_not_check_play_time() {
        let (tracker, t0) = started(200.0);
        // No listening yet, but the snapshot is still available.
        let candidate = tracker.candidate().unwrap();
        assert_eq!(candidate.timestamp, t0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_scrobbled_ends_eligibility() {
        let (mut tracker, _) = started(200.0);
        advance_secs(100).await;
        tracker.mark_scrobbled();
        assert!(tracker.is_scrobbled());
        assert_eq!(tracker.time_until_scrobble_point(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_track_clears_scrobbled_flag() {
        let (mut tracker, _) = started(200.0);
        tracker.mark_scrobbled();

        tracker.track_started(PlayingTrack::new("B", "Next", "", 180.0, Utc::now()));
        assert!(!tracker.is_scrobbled());
        assert_eq!(
            tracker.time_until_scrobble_point(),
            Some(Duration::from_secs(90))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_everything() {
        let (mut tracker, _) = started(200.0);
        advance_secs(10).await;
        tracker.reset();
        assert_eq!(tracker.play_time(), Duration::ZERO);
        assert!(tracker.candidate().is_none());
        assert_eq!(tracker.time_until_scrobble_point(), None);
    }
}
