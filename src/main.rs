use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use linernotes::commentary::{CommentaryEngine, CommentaryOrchestrator, OpenAiEngine};
use linernotes::config::{AppConfig, CliConfig, FileConfig};
use linernotes::history::{HistoryStore, SqliteHistoryStore};
use linernotes::metadata::{itunes, ItunesMetadataProvider, MetadataProvider};
use linernotes::pipeline::{PipelineSettings, PlaybackPipeline};
use linernotes::player;
use linernotes::scrobble::{LastFmClient, ScrobbleService, Session};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(name = "linernotes", version, about = "Scrobbling and AI commentary for whatever is playing")]
struct CliArgs {
    /// Directory for state files (history database, pending scrobbles,
    /// session).
    #[clap(long, value_parser = parse_path)]
    data_dir: Option<PathBuf>,

    /// Path to a TOML configuration file.
    #[clap(long, value_parser = parse_path)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon, reading player events from stdin.
    Run,

    /// Connect the scrobbling account via the browser handshake.
    Auth {
        /// Remove the stored session instead of connecting.
        #[clap(long)]
        disconnect: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        data_dir: cli_args.data_dir.clone(),
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    match cli_args.command {
        Command::Run => run_daemon(config).await,
        Command::Auth { disconnect } => run_auth(config, disconnect).await,
    }
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data dir {:?}", config.data_dir))?;

    info!("Opening history database at {:?}...", config.history_db_path());
    let history: Arc<dyn HistoryStore> = Arc::new(SqliteHistoryStore::new(
        &config.history_db_path(),
        config.history.capacity,
    )?);

    let metadata: Arc<dyn MetadataProvider> = Arc::new(ItunesMetadataProvider::new(
        itunes::DEFAULT_REQUESTS_PER_SECOND,
    )?);

    let engine: Arc<dyn CommentaryEngine> = Arc::new(OpenAiEngine::new(
        config.commentary.api_base.clone(),
        config.commentary.model.clone(),
        config.commentary.api_key.clone(),
        config.commentary.system_prompt.clone(),
    ));
    let orchestrator = Arc::new(CommentaryOrchestrator::new(
        engine,
        metadata.clone(),
        history.clone(),
    ));

    let mut client = LastFmClient::new(
        config.lastfm.api_key.clone().unwrap_or_default(),
        config.lastfm.shared_secret.clone().unwrap_or_default(),
        config.pending_queue_path(),
        config.scrobbler.requests_per_second,
    )?;
    if let Some(base) = &config.lastfm.api_base {
        client = client.with_api_base(base);
    }
    if let Some(session) = Session::load(&config.session_file_path()) {
        info!(username = %session.username, "Loaded scrobbling session");
        client.set_session(session);
    }
    let scrobbler: Arc<dyn ScrobbleService> = Arc::new(client);

    let settings = PipelineSettings {
        commentary_enabled: config.commentary.enabled,
        scrobbling_enabled: config.lastfm.enabled,
        paused_by_user: config.player.paused,
        skip_threshold: Duration::from_secs_f64(config.player.skip_threshold_seconds),
    };
    let pipeline = PlaybackPipeline::new(scrobbler, orchestrator, metadata, history, settings)?;

    let events = player::spawn_stdin_source(64);
    info!("Listening for player events on stdin");

    tokio::select! {
        _ = pipeline.run(events) => info!("Player event stream ended"),
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
    }
    Ok(())
}

async fn run_auth(config: AppConfig, disconnect: bool) -> Result<()> {
    let session_path = config.session_file_path();

    if disconnect {
        match std::fs::remove_file(&session_path) {
            Ok(()) => println!("Disconnected, session removed."),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                println!("No session to remove.");
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to remove session file {:?}", session_path))
            }
        }
        return Ok(());
    }

    let (Some(api_key), Some(shared_secret)) =
        (config.lastfm.api_key.clone(), config.lastfm.shared_secret.clone())
    else {
        bail!("lastfm api_key and shared_secret must be configured before connecting");
    };

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data dir {:?}", config.data_dir))?;

    let mut client = LastFmClient::new(
        api_key,
        shared_secret,
        config.pending_queue_path(),
        config.scrobbler.requests_per_second,
    )?;
    if let Some(base) = &config.lastfm.api_base {
        client = client.with_api_base(base);
    }

    let token = client.get_request_token().await?;
    println!("Open this page in your browser and allow access:");
    println!();
    println!("  {}", client.authorization_url(&token));
    println!();
    println!("Waiting for authorization...");

    let session = client.await_session(&token).await?;
    session.save(&session_path)?;
    println!("Connected as {}.", session.username);
    Ok(())
}
