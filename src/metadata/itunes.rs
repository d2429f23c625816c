//! Metadata lookup against the iTunes Search API.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{MetadataProvider, MetadataResult, SongInfo};
use crate::scrobble::RateLimiter;

const DEFAULT_API_BASE: &str = "https://itunes.apple.com/search";
const RESULT_LIMIT: u32 = 5;

/// Polite default pace for the unauthenticated search API.
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 2.0;

pub struct ItunesMetadataProvider {
    http: reqwest::Client,
    api_base: String,
    rate_limiter: RateLimiter,
}

impl ItunesMetadataProvider {
    pub fn new(requests_per_second: f64) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            rate_limiter: RateLimiter::new(requests_per_second),
        })
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    async fn search(&self, term: &str) -> Result<SearchResponse, reqwest::Error> {
        self.rate_limiter.wait().await;
        self.http
            .get(&self.api_base)
            .query(&[
                ("media", "music"),
                ("entity", "song"),
                ("limit", &RESULT_LIMIT.to_string()),
                ("term", term),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl MetadataProvider for ItunesMetadataProvider {
    async fn fetch(&self, name: &str, artist: &str, _album: &str, _genre: &str) -> MetadataResult {
        let term = format!("{artist} {name}");
        match self.search(&term).await {
            Ok(response) => {
                let metadata = select_result(&response.results, artist)
                    .map(to_metadata)
                    .unwrap_or_default();
                debug!(
                    term = %term,
                    results = response.results.len(),
                    found = metadata.song.is_some(),
                    "Metadata lookup finished"
                );
                metadata
            }
            Err(e) => {
                warn!(term = %term, error = %e, "Metadata lookup failed");
                MetadataResult::default()
            }
        }
    }
}

/// Prefer an exact (case-insensitive) artist match, else the top result.
fn select_result<'a>(results: &'a [SearchResult], artist: &str) -> Option<&'a SearchResult> {
    results
        .iter()
        .find(|r| {
            r.artist_name
                .as_deref()
                .map(|a| a.eq_ignore_ascii_case(artist))
                .unwrap_or(false)
        })
        .or_else(|| results.first())
}

fn to_metadata(result: &SearchResult) -> MetadataResult {
    MetadataResult {
        song: Some(SongInfo {
            genres: result.primary_genre_name.iter().cloned().collect(),
            release_date: result
                .release_date
                .as_deref()
                .and_then(|d| d.split('T').next())
                .map(str::to_string),
        }),
        external_context: None,
        catalog_url: result.track_view_url.clone(),
        artwork_url: result.artwork_url.clone(),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SearchResult {
    #[serde(rename = "artistName")]
    artist_name: Option<String>,
    #[serde(rename = "primaryGenreName")]
    primary_genre_name: Option<String>,
    #[serde(rename = "releaseDate")]
    release_date: Option<String>,
    #[serde(rename = "trackViewUrl")]
    track_view_url: Option<String>,
    #[serde(rename = "artworkUrl100")]
    artwork_url: Option<String>,
}
