use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

mod bot;
mod config;
mod error;
mod governor;
mod media;
mod pipeline;
mod post;
mod utils;

use crate::config::Config;
use crate::media::Fetcher;
use crate::post::{Endpoints, PostClient, PostReference};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the Discord bot (default)
    Run,
    /// Print the guest and bearer tokens acquired for a post
    Tokens { url: String },
    /// Print the media and text extracted from a post
    Extract { url: String },
}

fn get_config_path(args: &Args) -> Option<PathBuf> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }

    for var in ["BIRDGRAB_CONFIG", "CONFIG_FILE"] {
        if let Ok(path) = std::env::var(var) {
            return Some(PathBuf::from(path));
        }
    }

    let candidates = [
        std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        dirs::home_dir().map(|home| home.join(".config")),
    ];
    candidates
        .into_iter()
        .flatten()
        .map(|dir| dir.join("birdgrab").join("config.toml"))
        .find(|path| path.exists())
}

fn init_logging(format: &str) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    if format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

fn post_client(config: &Config) -> Result<PostClient> {
    let fetcher = Fetcher::from_config(&config.upstream)?;
    Ok(PostClient::new(fetcher, Endpoints::default())
        .with_save_dir(config.upstream.save_data_dir.clone()))
}

async fn print_tokens(config: &Config, url: &str, cancel: &CancellationToken) -> Result<()> {
    let post = PostReference::parse(url)?;
    let credentials = post_client(config)?.credentials(&post, cancel).await?;
    println!("{credentials}");
    Ok(())
}

async fn print_extraction(config: &Config, url: &str, cancel: &CancellationToken) -> Result<()> {
    let post = PostReference::parse(url)?;
    let result = post_client(config)?.fetch_post(&post, cancel).await?;
    println!("{result}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = get_config_path(&args);
    let config = match &config_path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    init_logging(config.get_logging_format());

    match &config_path {
        Some(path) => info!("Loaded config from: {}", path.display()),
        None => info!("No config file found, using defaults"),
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Received Ctrl-C");
        shutdown.cancel();
    });

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            info!("Starting birdgrab...");
            bot::run(&config, cancel).await
        }
        Command::Tokens { url } => print_tokens(&config, &url, &cancel).await,
        Command::Extract { url } => print_extraction(&config, &url, &cancel).await,
    }
}
