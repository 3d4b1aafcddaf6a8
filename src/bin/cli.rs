use ai_playlist_spotify_transfer as lib;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lib::api::spotify::SpotifyProvider;
use lib::api::{spotify_auth, MusicProvider};
use lib::config::Config;
use lib::generator::{self, GeneratedPlaylist};
use lib::library;
use lib::reconciler::PlaylistReconciler;
use lib::store::Store;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::subscriber as tracing_subscriber_global;
use tracing_appender::rolling::RollingFileAppender;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "ai-playlist", version)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Local user id the command runs as
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate config file and exit
    ConfigValidate,
    /// Print the Spotify authorization URL for the user
    AuthUrl,
    /// Link a Spotify account from the redirect URL (interactive if omitted)
    Connect {
        #[arg(long)]
        redirect_url: Option<String>,
    },
    /// Forget the user's Spotify credential
    Disconnect,
    /// Serve the OAuth redirect page (long-running)
    Callback,
    /// Store a playlist from a model response containing a JSON song array
    Import {
        /// The natural-language request the songs were generated for
        #[arg(long)]
        query: String,
        /// Playlist name
        #[arg(long)]
        name: Option<String>,
        /// File with the model response; "-" reads stdin
        #[arg(long, default_value = "-")]
        file: String,
        /// Transfer to Spotify right after storing
        #[arg(long)]
        transfer: bool,
    },
    /// List the user's playlists
    List,
    /// Show a playlist and its tracks
    Show {
        #[arg(long)]
        playlist: i64,
    },
    /// Delete a playlist and its tracks
    Delete {
        #[arg(long)]
        playlist: i64,
    },
    /// Create the playlist on Spotify
    Transfer {
        #[arg(long)]
        playlist: i64,
    },
}

fn resolve_config(explicit: Option<&PathBuf>) -> Result<Config> {
    // Explicit --config overrides; otherwise use the per-user config file if
    // present, falling back to defaults plus environment.
    let path = match explicit {
        Some(p) => Some(p.clone()),
        None => dirs::config_dir()
            .map(|d| d.join("ai-playlist").join("config.toml"))
            .filter(|p| p.exists()),
    };
    match path {
        Some(p) => Config::from_path(&p).with_context(|| format!("loading config from {}", p.display())),
        None => {
            let mut cfg = Config::default();
            cfg.apply_env();
            cfg.validate()?;
            Ok(cfg)
        }
    }
}

fn init_logging(cfg: &Config) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    // Initialize log->tracing bridge and structured logging.
    // Logs go to stdout and, when the log dir is usable, a daily-rotated file.
    let _ = LogTracer::init();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match std::fs::create_dir_all(&cfg.log_dir) {
        Ok(()) => {
            let file_appender: RollingFileAppender = tracing_appender::rolling::daily(&cfg.log_dir, "ai-playlist.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (Some(fmt::layer().with_writer(non_blocking)), Some(guard))
        }
        Err(e) => {
            eprintln!("log dir {} unusable ({}); logging to stderr only", cfg.log_dir.display(), e);
            (None, None)
        }
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer);
    tracing_subscriber_global::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;
    Ok(guard)
}

fn read_input(file: &str) -> Result<String> {
    if file == "-" {
        let mut s = String::new();
        std::io::stdin().read_to_string(&mut s)?;
        Ok(s)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file))
    }
}

fn provider(cfg: &Config) -> Result<Arc<dyn MusicProvider>> {
    let p = SpotifyProvider::new(cfg.spotify.clone(), cfg.request_timeout())?;
    if !p.is_configured() {
        tracing::warn!("Spotify client_id/client_secret not configured; Spotify calls will fail");
    }
    Ok(Arc::new(p))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::ConfigValidate = cli.command {
        match resolve_config(cli.config.as_ref()) {
            Ok(_) => println!("OK"),
            Err(e) => {
                eprintln!("Config validation failed: {:#}", e);
                std::process::exit(2);
            }
        }
        return Ok(());
    }

    let cfg = resolve_config(cli.config.as_ref())?;
    let _guard = init_logging(&cfg)?;
    let store = Store::open(cfg.db_path.clone()).await?;
    let user = cli.user.as_deref();

    match cli.command {
        Commands::ConfigValidate => {}
        Commands::AuthUrl => {
            let user_id = user.context("--user is required")?;
            println!("{}", spotify_auth::authorize_url(&cfg.spotify, user_id)?);
        }
        Commands::Connect { redirect_url } => {
            let redirect = match redirect_url {
                Some(u) => u,
                None => {
                    let user_id = user.context("--user is required")?;
                    println!(
                        "Open this URL in your browser and authorize the application:\n\n{}\n",
                        spotify_auth::authorize_url(&cfg.spotify, user_id)?
                    );
                    println!("Paste redirect URL:");
                    let mut input = String::new();
                    std::io::stdin().read_line(&mut input)?;
                    input
                }
            };
            let (code, state) = spotify_auth::code_and_state_from_redirect(&redirect)?;
            let provider = provider(&cfg)?;
            let cred = spotify_auth::connect(&store, provider.as_ref(), user, &code, &state).await?;
            println!(
                "Connected Spotify account {}",
                cred.remote_display_name.as_deref().unwrap_or(&cred.remote_user_id)
            );
        }
        Commands::Disconnect => {
            if spotify_auth::disconnect(&store, user).await? {
                println!("Spotify disconnected");
            } else {
                println!("No Spotify account was connected");
            }
        }
        Commands::Callback => {
            lib::callback::serve(&cfg.callback_addr)
                .await
                .context("running callback server")?;
        }
        Commands::Import { query, name, file, transfer } => {
            let tracks = generator::parse_track_list(&read_input(&file)?)?;
            let generated = GeneratedPlaylist { query, name, tracks };
            let reconciler = if transfer {
                Some(PlaylistReconciler::new(&cfg, store.clone(), provider(&cfg)?))
            } else {
                None
            };
            let id = generator::generate_playlist(&store, reconciler.as_ref(), user, generated).await?;
            println!("Stored playlist {}", id);
        }
        Commands::List => {
            for p in library::list_user_playlists(&store, user).await? {
                println!(
                    "{}\t{}\t{}",
                    p.id,
                    p.name,
                    p.remote_url.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Show { playlist } => {
            let (p, tracks) = library::get_playlist_with_tracks(&store, user, playlist).await?;
            println!("{} ({})", p.name, p.description);
            if let Some(url) = &p.remote_url {
                println!("Spotify: {}", url);
            }
            for t in tracks {
                let mark = if t.remote_track_id.is_some() { "*" } else { " " };
                println!("{} {} - {}", mark, t.name, t.artist);
            }
        }
        Commands::Delete { playlist } => {
            library::delete_playlist(&store, user, playlist).await?;
            println!("Deleted playlist {}", playlist);
        }
        Commands::Transfer { playlist } => {
            let reconciler = PlaylistReconciler::new(&cfg, store.clone(), provider(&cfg)?);
            let summary = reconciler.transfer(playlist, user).await?;
            println!("{}", summary.remote_url);
            println!(
                "{}/{} tracks found, {} added",
                summary.tracks_found, summary.total_tracks, summary.tracks_added
            );
            for miss in &summary.not_found {
                println!("not found: {}", miss);
            }
        }
    }

    Ok(())
}
