//! Sectioned prompt text for commentary generation.
//!
//! The engine receives `[Section]...[End Section]` blocks: a `[Song]` block
//! that is always present, and a `[Context]` block when the metadata carried
//! editorial text worth keeping. Promotional copy is dropped entirely.

use lazy_static::lazy_static;
use regex::Regex;

use crate::metadata::MetadataResult;

lazy_static! {
    static ref HTML_TAG_RE: Regex = Regex::new(r"<[^>]+>").expect("invalid HTML tag regex");
    static ref URL_RE: Regex = Regex::new(r"https?://\S+").expect("invalid URL regex");
}

const PROMO_PHRASES: [&str; 8] = [
    "Pre-add", "pre-add", "Pre-save", "pre-save", "Listen now", "listen now", "Stream now",
    "stream now",
];

pub struct PromptBuilder;

impl PromptBuilder {
    /// Build the sectioned context block for one track. Always returns at
    /// least a `[Song]` section.
    pub fn build(
        name: &str,
        artist: &str,
        album: &str,
        genre: &str,
        metadata: &MetadataResult,
    ) -> String {
        let mut sections = vec![Self::song_section(name, artist, album, genre, metadata)];

        if let Some(context) = metadata.external_context.as_deref() {
            let cleaned = strip_urls(&strip_html(context));
            if !cleaned.is_empty() && !is_promotional(&cleaned) {
                sections.push(format!("[Context]\n{cleaned}\n[End Context]"));
            }
        }

        sections.join("\n\n")
    }

    fn song_section(
        name: &str,
        artist: &str,
        album: &str,
        genre: &str,
        metadata: &MetadataResult,
    ) -> String {
        let mut parts: Vec<String> = [name, artist, album]
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        let genres: Vec<String> = match metadata.song.as_ref().filter(|s| !s.genres.is_empty()) {
            Some(song) => song.genres.clone(),
            None if !genre.is_empty() => vec![genre.to_string()],
            None => Vec::new(),
        };
        if !genres.is_empty() {
            parts.push(format!("Genre: {}", genres.join(", ")));
        }

        if let Some(date) = metadata.song.as_ref().and_then(|s| s.release_date.as_deref()) {
            parts.push(format!("Released: {date}"));
        }

        format!("[Song]\n{}\n[End Song]", parts.join("\n"))
    }
}

fn strip_html(text: &str) -> String {
    HTML_TAG_RE.replace_all(text, "").into_owned()
}

fn strip_urls(text: &str) -> String {
    URL_RE.replace_all(text, "").trim().to_string()
}

fn is_promotional(text: &str) -> bool {
    PROMO_PHRASES.iter().any(|phrase| text.contains(phrase))
}
