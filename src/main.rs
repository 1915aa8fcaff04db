use anyhow::{Context, Result};
use clap::Parser;
use debrid_dav::{CliArgs, Config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "debrid-dav")]
#[command(about = "Serve a debrid account's torrents as a mountable WebDAV filesystem")]
#[command(version)]
struct Cli {
    /// Config file (TOML, or JSON by extension)
    #[arg(short, long, env = "DEBRID_DAV_CONFIG")]
    config: Option<PathBuf>,

    /// Provider API base URL
    #[arg(long)]
    api_url: Option<String>,

    /// Provider token; repeat for rotation. The first one owns the catalog.
    #[arg(short, long = "token")]
    tokens: Vec<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Default mount point for `rclone mount`
    #[arg(short, long)]
    mount_point: Option<PathBuf>,

    /// SQLite database for repair state and the catalog snapshot
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn args(&self) -> CliArgs {
        CliArgs {
            api_url: self.api_url.clone(),
            tokens: self.tokens.clone(),
            port: self.port,
            mount_point: self.mount_point.clone(),
            config_file: self.config.clone(),
            database: self.database.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

fn setup_logging(level: &str, verbose: u8, quiet: bool) -> Result<()> {
    use tracing_subscriber::fmt;

    if quiet {
        let subscriber = fmt()
            .with_max_level(tracing::Level::ERROR)
            .without_time()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        return Ok(());
    }

    let level = match verbose {
        0 => level
            .parse::<tracing::Level>()
            .with_context(|| format!("Unknown log level: {}", level))?,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber = fmt().with_max_level(level).with_target(true).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_with_cli(&cli.args()).context("Failed to load configuration")?;
    setup_logging(&config.logging.level, cli.verbose, cli.quiet)?;

    debrid_dav::run(config).await
}
