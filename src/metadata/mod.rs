//! Track metadata enrichment.
//!
//! Providers are best-effort: whatever could be found comes back, and any
//! failure yields an empty result rather than an error.

use async_trait::async_trait;

pub mod itunes;

pub use itunes::ItunesMetadataProvider;

/// Everything a provider managed to find out about a track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataResult {
    pub song: Option<SongInfo>,
    /// Editorial or encyclopedic text about the track or artist, if any.
    pub external_context: Option<String>,
    /// Link to the track in the provider's catalog.
    pub catalog_url: Option<String>,
    pub artwork_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SongInfo {
    pub genres: Vec<String>,
    /// `YYYY-MM-DD` when known.
    pub release_date: Option<String>,
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Look up a track. Never fails; missing data is just absent.
    async fn fetch(&self, name: &str, artist: &str, album: &str, genre: &str) -> MetadataResult;
}
