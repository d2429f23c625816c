//! Signed scrobbling client for the Last.fm API.
//!
//! Submission is best-effort: every scrobble first flushes previously queued
//! entries, and anything that cannot be delivered lands in the pending queue
//! for the next attempt. Auth is the desktop token handshake: request a
//! token, send the user to the authorization page, poll for the session.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::queue::{PendingQueue, PendingScrobble};
use super::rate_limit::RateLimiter;
use super::signing;
use super::tracker::ScrobbleCandidate;

const DEFAULT_API_BASE: &str = "https://ws.audioscrobbler.com/2.0/?format=json";
const DEFAULT_AUTH_BASE: &str = "https://www.last.fm/api/auth/";

/// API error code for a token the user has not authorized yet.
const CODE_NOT_YET_AUTHORIZED: i64 = 14;
/// Per-item ignored code for rate/daily limits; such items are retried.
const IGNORED_CODE_LIMIT_EXCEEDED: &str = "5";

const AUTH_POLL_INTERVAL: Duration = Duration::from_secs(3);
const AUTH_POLL_ATTEMPTS: u32 = 40;
const LOVED_TRACKS_LIMIT: u32 = 1000;

#[derive(Debug, Error)]
pub enum ScrobbleError {
    #[error("scrobbling is not configured")]
    NotConfigured,

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("HTTP {status}")]
    Http { status: u16, body: Option<String> },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("invalid response")]
    InvalidResponse,
}

/// An authenticated Last.fm session, persisted across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    pub username: String,
}

impl Session {
    /// Read a previously saved session. Absent or unreadable files yield
    /// `None`; the daemon just runs unauthenticated.
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read session file");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt session file");
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)
            .with_context(|| format!("failed to write session file {:?}", path))
    }
}

/// Normalized key for matching loved tracks against local history.
pub fn loved_track_key(artist: &str, track: &str) -> String {
    format!("{}\t{}", artist.to_lowercase(), track.to_lowercase())
}

/// Scrobbling operations the playback pipeline depends on.
///
/// All operations are best-effort and never surface errors; failed scrobbles
/// are queued for retry, everything else is just logged.
#[async_trait]
pub trait ScrobbleService: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Submit one scrobble, flushing queued ones first. Failures enqueue.
    async fn scrobble(&self, candidate: &ScrobbleCandidate);

    async fn update_now_playing(&self, artist: &str, track: &str, album: &str, duration_seconds: f64);

    async fn love(&self, artist: &str, track: &str);

    async fn unlove(&self, artist: &str, track: &str);

    /// Normalized keys of the user's loved tracks; empty on any failure.
    async fn loved_track_keys(&self) -> HashSet<String>;
}

pub struct LastFmClient {
    http: reqwest::Client,
    api_key: String,
    shared_secret: String,
    api_base: String,
    auth_base: String,
    session: RwLock<Option<Session>>,
    pending: Mutex<PendingQueue>,
    rate_limiter: RateLimiter,
}

impl LastFmClient {
    pub fn new(
        api_key: impl Into<String>,
        shared_secret: impl Into<String>,
        queue_path: impl Into<PathBuf>,
        requests_per_second: f64,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            shared_secret: shared_secret.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            auth_base: DEFAULT_AUTH_BASE.to_string(),
            session: RwLock::new(None),
            pending: Mutex::new(PendingQueue::load(queue_path)),
            rate_limiter: RateLimiter::new(requests_per_second),
        })
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_auth_base(mut self, base: impl Into<String>) -> Self {
        self.auth_base = base.into();
        self
    }

    pub fn set_session(&self, session: Session) {
        *self.session.write().unwrap() = Some(session);
        debug!("Session updated");
    }

    pub fn clear_session(&self) {
        *self.session.write().unwrap() = None;
        debug!("Session cleared");
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().unwrap().clone()
    }

    fn ensure_configured(&self) -> Result<(), ScrobbleError> {
        if self.api_key.is_empty() || self.shared_secret.is_empty() {
            return Err(ScrobbleError::NotConfigured);
        }
        Ok(())
    }

    /// Request a token for the desktop auth handshake.
    pub async fn get_request_token(&self) -> Result<String, ScrobbleError> {
        self.ensure_configured()?;
        let params = self.signed_params("auth.getToken", Vec::new(), None);
        let bytes = self.post(&params).await?;
        let response: TokenResponse =
            serde_json::from_slice(&bytes).map_err(|_| ScrobbleError::InvalidResponse)?;
        info!("Got auth request token");
        Ok(response.token)
    }

    /// User-facing page where the request token is authorized.
    pub fn authorization_url(&self, token: &str) -> String {
        format!(
            "{}?api_key={}&token={}",
            self.auth_base,
            urlencoding::encode(&self.api_key),
            urlencoding::encode(token)
        )
    }

    /// Exchange an authorized token for a session, storing it on success.
    pub async fn get_session(&self, token: &str) -> Result<Session, ScrobbleError> {
        self.ensure_configured()?;
        let extra = vec![("token".to_string(), token.to_string())];
        let params = self.signed_params("auth.getSession", extra, None);
        let bytes = self.post(&params).await?;
        let response: SessionResponse =
            serde_json::from_slice(&bytes).map_err(|_| ScrobbleError::InvalidResponse)?;

        let session = Session {
            key: response.session.key,
            username: response.session.name,
        };
        info!(username = %session.username, "Authenticated");
        self.set_session(session.clone());
        Ok(session)
    }

    /// Poll [`get_session`](Self::get_session) until the user authorizes the
    /// token in their browser. The "not yet authorized" API error keeps the
    /// poll going; any other error ends the attempt.
    pub async fn await_session(&self, token: &str) -> Result<Session, ScrobbleError> {
        for _ in 0..AUTH_POLL_ATTEMPTS {
            tokio::time::sleep(AUTH_POLL_INTERVAL).await;
            match self.get_session(token).await {
                Ok(session) => return Ok(session),
                Err(ScrobbleError::Api {
                    code: CODE_NOT_YET_AUTHORIZED,
                    ..
                }) => {
                    debug!("Token not authorized yet, still polling");
                }
                Err(e) => return Err(e),
            }
        }
        Err(ScrobbleError::AuthFailed(
            "timed out waiting for authorization".to_string(),
        ))
    }

    /// Sort, sign and assemble the request parameters. The signature covers
    /// everything inserted so far; `format` lives in the URL, not the body.
    fn signed_params(
        &self,
        method: &str,
        extra: Vec<(String, String)>,
        session_key: Option<&str>,
    ) -> BTreeMap<String, String> {
        let mut params: BTreeMap<String, String> = extra.into_iter().collect();
        params.insert("method".to_string(), method.to_string());
        params.insert("api_key".to_string(), self.api_key.clone());
        if let Some(sk) = session_key {
            params.insert("sk".to_string(), sk.to_string());
        }
        let signature = signing::sign(&params, &self.shared_secret);
        params.insert("api_sig".to_string(), signature);
        params
    }

    async fn post(&self, params: &BTreeMap<String, String>) -> Result<Vec<u8>, ScrobbleError> {
        self.rate_limiter.wait().await;

        let response = self.http.post(&self.api_base).form(params).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        // Error envelopes can arrive with any HTTP status, so check the body
        // first: the auth poll relies on seeing the API error code.
        if let Ok(api_error) = serde_json::from_slice::<ApiErrorResponse>(&bytes) {
            return Err(ScrobbleError::Api {
                code: api_error.error,
                message: api_error.message,
            });
        }
        if !status.is_success() {
            return Err(ScrobbleError::Http {
                status: status.as_u16(),
                body: String::from_utf8(bytes.to_vec()).ok(),
            });
        }
        Ok(bytes.to_vec())
    }

    async fn submit_batch(
        &self,
        items: &[PendingScrobble],
        session_key: &str,
    ) -> Result<ScrobbleResponse, ScrobbleError> {
        let params = self.signed_params(
            "track.scrobble",
            batch_params(items),
            Some(session_key),
        );
        let bytes = self.post(&params).await?;
        serde_json::from_slice(&bytes).map_err(|_| ScrobbleError::InvalidResponse)
    }

    /// Submit queued scrobbles in one batch. On success, entries ignored for
    /// rate/daily limits go back to the front of the queue; any other
    /// outcome removes them. A failed request leaves the queue untouched.
    async fn flush_pending(&self, pending: &mut PendingQueue, session_key: &str) {
        if pending.is_empty() {
            return;
        }
        let batch = pending.batch();
        debug!(count = batch.len(), "Flushing pending scrobbles");

        match self.submit_batch(&batch, session_key).await {
            Ok(response) => {
                let results = &response.scrobbles.scrobble;
                let retry: Vec<PendingScrobble> = batch
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| {
                        results
                            .get(*i)
                            .map(|r| r.ignored_message.code == IGNORED_CODE_LIMIT_EXCEEDED)
                            .unwrap_or(false)
                    })
                    .map(|(_, item)| item.clone())
                    .collect();
                pending.confirm(batch.len(), retry);
                info!(
                    count = batch.len(),
                    accepted = response.scrobbles.attr.accepted,
                    ignored = response.scrobbles.attr.ignored,
                    "Flushed pending scrobbles"
                );
            }
            Err(e) => {
                warn!(error = %e, "Failed to flush pending scrobbles");
            }
        }
    }
}

#[async_trait]
impl ScrobbleService for LastFmClient {
    fn is_authenticated(&self) -> bool {
        self.session.read().unwrap().is_some()
    }

    async fn scrobble(&self, candidate: &ScrobbleCandidate) {
        let Some(session) = self.session() else {
            debug!("Skipping scrobble (not authenticated)");
            return;
        };

        let item = pending_scrobble(candidate);
        debug!(
            track = %item.track,
            artist = %item.artist,
            timestamp = item.timestamp,
            "Submitting scrobble"
        );

        // Lock held across flush and submit so attempts stay serialized.
        let mut pending = self.pending.lock().await;
        self.flush_pending(&mut pending, &session.key).await;

        match self.submit_batch(std::slice::from_ref(&item), &session.key).await {
            Ok(response) => {
                info!(
                    track = %item.track,
                    artist = %item.artist,
                    accepted = response.scrobbles.attr.accepted,
                    ignored = response.scrobbles.attr.ignored,
                    "Scrobbled"
                );
            }
            Err(e) => {
                warn!(error = %e, "Scrobble failed, queuing for retry");
                pending.push(item);
                debug!(pending = pending.len(), "Scrobble queued");
            }
        }
    }

    async fn update_now_playing(&self, artist: &str, track: &str, album: &str, duration_seconds: f64) {
        let Some(session) = self.session() else {
            debug!("Skipping now playing update (not authenticated)");
            return;
        };

        let mut extra = vec![
            ("artist".to_string(), artist.to_string()),
            ("track".to_string(), track.to_string()),
        ];
        if !album.is_empty() {
            extra.push(("album".to_string(), album.to_string()));
        }
        if duration_seconds > 0.0 {
            extra.push(("duration".to_string(), (duration_seconds as i64).to_string()));
        }
        let params = self.signed_params("track.updateNowPlaying", extra, Some(&session.key));

        match self.post(&params).await {
            Ok(_) => info!(track = %track, artist = %artist, "Now playing updated"),
            Err(e) => warn!(error = %e, "Now playing update failed"),
        }
    }

    async fn love(&self, artist: &str, track: &str) {
        let Some(session) = self.session() else {
            debug!("Skipping love (not authenticated)");
            return;
        };
        let extra = vec![
            ("artist".to_string(), artist.to_string()),
            ("track".to_string(), track.to_string()),
        ];
        let params = self.signed_params("track.love", extra, Some(&session.key));
        match self.post(&params).await {
            Ok(_) => debug!(track = %track, artist = %artist, "Loved track"),
            Err(e) => warn!(error = %e, "Failed to love track"),
        }
    }

    async fn unlove(&self, artist: &str, track: &str) {
        let Some(session) = self.session() else {
            debug!("Skipping unlove (not authenticated)");
            return;
        };
        let extra = vec![
            ("artist".to_string(), artist.to_string()),
            ("track".to_string(), track.to_string()),
        ];
        let params = self.signed_params("track.unlove", extra, Some(&session.key));
        match self.post(&params).await {
            Ok(_) => debug!(track = %track, artist = %artist, "Unloved track"),
            Err(e) => warn!(error = %e, "Failed to unlove track"),
        }
    }

    async fn loved_track_keys(&self) -> HashSet<String> {
        let Some(session) = self.session() else {
            debug!("Skipping loved tracks fetch (not authenticated)");
            return HashSet::new();
        };

        // Read method, unsigned.
        let mut params = BTreeMap::new();
        params.insert("method".to_string(), "user.getLovedTracks".to_string());
        params.insert("api_key".to_string(), self.api_key.clone());
        params.insert("user".to_string(), session.username.clone());
        params.insert("limit".to_string(), LOVED_TRACKS_LIMIT.to_string());

        let result: Result<LovedTracksResponse, ScrobbleError> = async {
            let bytes = self.post(&params).await?;
            serde_json::from_slice(&bytes).map_err(|_| ScrobbleError::InvalidResponse)
        }
        .await;

        match result {
            Ok(response) => {
                let keys: HashSet<String> = response
                    .lovedtracks
                    .track
                    .into_iter()
                    .map(|t| loved_track_key(&t.artist.name, &t.name))
                    .collect();
                info!(count = keys.len(), "Fetched loved tracks");
                keys
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch loved tracks");
                HashSet::new()
            }
        }
    }
}

fn pending_scrobble(candidate: &ScrobbleCandidate) -> PendingScrobble {
    PendingScrobble {
        artist: candidate.artist.clone(),
        track: candidate.track.clone(),
        album: candidate.album.clone(),
        timestamp: candidate.timestamp.timestamp(),
        duration: candidate.duration_seconds as i64,
    }
}

/// Indexed batch fields; empty albums and unknown durations are omitted.
fn batch_params(items: &[PendingScrobble]) -> Vec<(String, String)> {
    let mut params = Vec::new();
    for (i, item) in items.iter().enumerate() {
        params.push((format!("artist[{i}]"), item.artist.clone()));
        params.push((format!("track[{i}]"), item.track.clone()));
        params.push((format!("timestamp[{i}]"), item.timestamp.to_string()));
        if !item.album.is_empty() {
            params.push((format!("album[{i}]"), item.album.clone()));
        }
        if item.duration > 0 {
            params.push((format!("duration[{i}]"), item.duration.to_string()));
        }
    }
    params
}

// Wire models. Several endpoints return a single object where a batch would
// be an array, so list fields go through `one_or_many`.

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: i64,
    message: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
struct SessionResponse {
    session: SessionBody,
}

#[derive(Deserialize)]
struct SessionBody {
    name: String,
    key: String,
}

#[derive(Deserialize)]
struct ScrobbleResponse {
    scrobbles: ScrobblesBody,
}

#[derive(Deserialize)]
struct ScrobblesBody {
    #[serde(rename = "@attr")]
    attr: ScrobblesAttr,
    #[serde(default, deserialize_with = "one_or_many")]
    scrobble: Vec<ScrobbleResult>,
}

#[derive(Deserialize)]
struct ScrobblesAttr {
    accepted: i64,
    ignored: i64,
}

#[derive(Deserialize)]
struct ScrobbleResult {
    #[serde(rename = "ignoredMessage")]
    ignored_message: IgnoredMessage,
}

#[derive(Deserialize)]
struct IgnoredMessage {
    code: String,
}

#[derive(Deserialize)]
struct LovedTracksResponse {
    lovedtracks: LovedTracksBody,
}

#[derive(Deserialize)]
struct LovedTracksBody {
    #[serde(default, deserialize_with = "one_or_many")]
    track: Vec<LovedTrack>,
}

#[derive(Deserialize)]
struct LovedTrack {
    name: String,
    artist: LovedTrackArtist,
}

#[derive(Deserialize)]
struct LovedTrackArtist {
    name: String,
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        other => serde_json::from_value(other).map(|t| vec![t]).unwrap_or_default(),
    })
}
