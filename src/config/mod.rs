mod file_config;

pub use file_config::{
    CommentaryConfig, FileConfig, HistoryConfig, LastfmConfig, PlayerConfig, ScrobblerConfig,
};

use anyhow::Result;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding the history database, pending queue and session
    /// file.
    pub data_dir: PathBuf,

    pub lastfm: LastfmSettings,
    pub commentary: CommentarySettings,
    pub player: PlayerSettings,
    pub history: HistorySettings,
    pub scrobbler: ScrobblerSettings,
}

#[derive(Debug, Clone)]
pub struct LastfmSettings {
    pub api_key: Option<String>,
    pub shared_secret: Option<String>,
    pub enabled: bool,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommentarySettings {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub system_prompt: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub skip_threshold_seconds: f64,
    pub paused: bool,
}

#[derive(Debug, Clone)]
pub struct HistorySettings {
    pub capacity: usize,
}

#[derive(Debug, Clone)]
pub struct ScrobblerSettings {
    pub requests_per_second: f64,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .or_else(|| cli.data_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("data_dir must be specified via --data-dir or in config file")
            })?;

        let lastfm_file = file.lastfm.unwrap_or_default();
        let lastfm = LastfmSettings {
            api_key: lastfm_file.api_key,
            shared_secret: lastfm_file.shared_secret,
            enabled: lastfm_file.enabled.unwrap_or(true),
            api_base: lastfm_file.api_base,
        };

        let commentary_file = file.commentary.unwrap_or_default();
        let commentary = CommentarySettings {
            api_base: commentary_file
                .api_base
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: commentary_file.api_key,
            model: commentary_file
                .model
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            system_prompt: commentary_file.system_prompt,
            enabled: commentary_file.enabled.unwrap_or(true),
        };

        let player_file = file.player.unwrap_or_default();
        let player = PlayerSettings {
            skip_threshold_seconds: player_file.skip_threshold_seconds.unwrap_or(5.0),
            paused: player_file.paused.unwrap_or(false),
        };

        let history_file = file.history.unwrap_or_default();
        let history = HistorySettings {
            capacity: history_file.capacity.unwrap_or(200),
        };

        let scrobbler_file = file.scrobbler.unwrap_or_default();
        let scrobbler = ScrobblerSettings {
            requests_per_second: scrobbler_file.requests_per_second.unwrap_or(1.0),
        };

        Ok(Self {
            data_dir,
            lastfm,
            commentary,
            player,
            history,
            scrobbler,
        })
    }

    pub fn history_db_path(&self) -> PathBuf {
        self.data_dir.join("history.db")
    }

    pub fn pending_queue_path(&self) -> PathBuf {
        self.data_dir.join("pending_scrobbles.json")
    }

    pub fn session_file_path(&self) -> PathBuf {
        self.data_dir.join("lastfm_session.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_cli_only_uses_defaults() {
        let cli = CliConfig {
            data_dir: Some(PathBuf::from("/var/lib/linernotes")),
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/linernotes"));
        assert!(config.lastfm.api_key.is_none());
        assert!(config.lastfm.enabled);
        assert_eq!(config.commentary.api_base, "https://api.openai.com/v1");
        assert_eq!(config.commentary.model, "gpt-4o-mini");
        assert!(config.commentary.system_prompt.is_none());
        assert!(config.commentary.enabled);
        assert_eq!(config.player.skip_threshold_seconds, 5.0);
        assert!(!config.player.paused);
        assert_eq!(config.history.capacity, 200);
        assert_eq!(config.scrobbler.requests_per_second, 1.0);
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let cli = CliConfig {
            data_dir: Some(PathBuf::from("/should/be/overridden")),
        };
        let file_config = FileConfig {
            data_dir: Some("/toml/data".to_string()),
            lastfm: Some(LastfmConfig {
                api_key: Some("abc".to_string()),
                shared_secret: Some("s3cr3t".to_string()),
                enabled: Some(false),
                api_base: None,
            }),
            player: Some(PlayerConfig {
                skip_threshold_seconds: Some(2.5),
                paused: None,
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/toml/data"));
        assert_eq!(config.lastfm.api_key.as_deref(), Some("abc"));
        assert!(!config.lastfm.enabled);
        assert_eq!(config.player.skip_threshold_seconds, 2.5);
        // Unset section fields keep their defaults.
        assert!(!config.player.paused);
        assert_eq!(config.history.capacity, 200);
    }

    #[test]
    fn test_resolve_missing_data_dir_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("data_dir"));
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/data"

[lastfm]
api_key = "abc123"
shared_secret = "s3cr3t"

[commentary]
model = "llama3"
api_base = "http://localhost:11434/v1"

[history]
capacity = 50
"#,
        )
        .unwrap();

        let file_config = FileConfig::load(&path).unwrap();
        let config = AppConfig::resolve(&CliConfig::default(), Some(file_config)).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert_eq!(config.lastfm.api_key.as_deref(), Some("abc123"));
        assert_eq!(config.commentary.model, "llama3");
        assert_eq!(config.commentary.api_base, "http://localhost:11434/v1");
        assert_eq!(config.history.capacity, 50);
        // Sections absent from the file resolve to defaults.
        assert_eq!(config.scrobbler.requests_per_second, 1.0);
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "data_dir = [not valid").unwrap();
        assert!(FileConfig::load(&path).is_err());
    }

    #[test]
    fn test_data_file_paths() {
        let config = AppConfig::resolve(
            &CliConfig {
                data_dir: Some(PathBuf::from("/data")),
            },
            None,
        )
        .unwrap();
        assert_eq!(config.history_db_path(), PathBuf::from("/data/history.db"));
        assert_eq!(
            config.pending_queue_path(),
            PathBuf::from("/data/pending_scrobbles.json")
        );
        assert_eq!(
            config.session_file_path(),
            PathBuf::from("/data/lastfm_session.json")
        );
    }
}
