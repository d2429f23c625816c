//! Scrobbling: play-time tracking, signed submission, retry queue, auth.

pub mod client;
pub mod queue;
pub mod rate_limit;
pub mod signing;
pub mod tracker;

pub use client::{loved_track_key, LastFmClient, ScrobbleError, ScrobbleService, Session};
pub use queue::{PendingQueue, PendingScrobble};
pub use rate_limit::RateLimiter;
pub use tracker::{PlayingTrack, ScrobbleCandidate, ScrobbleTracker};
