use std::io::BufRead;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use media_relay::db::{self, CacheRepo};
use media_relay::{
    Config, Dispatcher, Format, GatewayClient, JobProcessor, Platform, SharedIdentity,
    StorageUploader, SystemClock,
};

/// Media Relay - fetch media through responder bots into an archive chat
#[derive(Parser)]
#[command(name = "mediarelay", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Retrieve a URL and print its archive reference
    Fetch {
        /// Content URL
        url: String,
        /// Desired format (e.g. 720p, mp3, label:HD)
        #[arg(short, long)]
        format: Option<Format>,
        /// Platform, when it should be checked against the URL
        #[arg(short, long)]
        platform: Option<Platform>,
        /// Requester recorded in the queue
        #[arg(short, long, default_value = "cli")]
        requester: String,
    },
    /// Look a URL up in the cache without contacting anything
    Lookup {
        /// Content URL
        url: String,
        /// Desired format
        #[arg(short, long)]
        format: Option<Format>,
    },
    /// List the formats a responder offers for a URL
    Formats {
        /// Content URL
        url: String,
    },
    /// Retrieve every URL read from stdin, one per line
    Batch {
        /// Desired format for every URL
        #[arg(short, long)]
        format: Option<Format>,
        /// Requester recorded in the queue
        #[arg(short, long, default_value = "batch")]
        requester: String,
    },
    /// Verify the identity, archive chat and responders
    Check,
    /// Show cache statistics
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,media_relay=info",
        1 => "info,media_relay=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;

    match cli.command {
        Command::Fetch {
            url,
            format,
            platform,
            requester,
        } => cmd_fetch(&config, &requester, &url, platform, format).await,
        Command::Lookup { url, format } => cmd_lookup(&config, &url, format.as_ref()),
        Command::Formats { url } => cmd_formats(&config, &url).await,
        Command::Batch { format, requester } => cmd_batch(&config, &requester, format).await,
        Command::Check => cmd_check(&config).await,
        Command::Stats => cmd_stats(&config),
    }
}

/// Wire the gateway, identity, archive and cache into a running dispatcher
fn start_dispatcher(config: &Config) -> anyhow::Result<Dispatcher> {
    let gateway = Arc::new(GatewayClient::new(config.gateway_settings()?)?);
    let identity = Arc::new(SharedIdentity::new(
        gateway.clone(),
        Arc::new(SystemClock),
        config.reconnect_pause,
    ));
    let uploader = StorageUploader::new(gateway, config.attribution.clone());
    let cache = CacheRepo::new(db::init(&config.database_path)?);

    let processor = JobProcessor::new(identity, config.responders.clone(), uploader, cache);
    Ok(Dispatcher::start(processor))
}

/// Retrieve one URL
async fn cmd_fetch(
    config: &Config,
    requester: &str,
    url: &str,
    platform: Option<Platform>,
    format: Option<Format>,
) -> anyhow::Result<()> {
    let dispatcher = start_dispatcher(config)?;
    let handle = dispatcher.submit(requester, url, platform, format)?;

    if handle.from_cache() {
        tracing::info!("already archived");
    }
    let result = handle.await_result().await;
    dispatcher.shutdown().await;

    let reference = result?;
    println!("{reference}");
    Ok(())
}

/// Look a URL up in the cache
fn cmd_lookup(config: &Config, url: &str, format: Option<&Format>) -> anyhow::Result<()> {
    let platform = Platform::detect(url)?;
    let format = config
        .responders
        .iter()
        .find(|profile| profile.platform == platform)
        .map_or_else(|| format.cloned(), |profile| profile.effective_format(format));

    let cache = CacheRepo::new(db::init(&config.database_path)?);
    match cache.get(url, format.as_ref())? {
        Some(reference) => println!("{reference}"),
        None => println!("not cached"),
    }
    Ok(())
}

/// List offered formats
async fn cmd_formats(config: &Config, url: &str) -> anyhow::Result<()> {
    let dispatcher = start_dispatcher(config)?;
    let labels = dispatcher.probe_formats(url).await;
    dispatcher.shutdown().await;

    for label in labels? {
        println!("{label}");
    }
    Ok(())
}

/// Submit every URL on stdin, then wait for all of them
async fn cmd_batch(config: &Config, requester: &str, format: Option<Format>) -> anyhow::Result<()> {
    let dispatcher = start_dispatcher(config)?;

    let mut handles = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let url = line.trim();
        if url.is_empty() || url.starts_with('#') {
            continue;
        }
        match dispatcher.submit(requester, url, None, format.clone()) {
            Ok(handle) => handles.push((url.to_string(), handle)),
            Err(e) => println!("{url}\terror: {e}"),
        }
    }
    tracing::info!(jobs = handles.len(), "batch submitted");

    let results = futures::future::join_all(
        handles
            .into_iter()
            .map(|(url, handle)| async move { (url, handle.await_result().await) }),
    )
    .await;

    let mut failures = 0usize;
    for (url, result) in results {
        match result {
            Ok(reference) => println!("{url}\t{reference}"),
            Err(reason) => {
                failures += 1;
                println!("{url}\tfailed: {reason}");
            }
        }
    }
    dispatcher.shutdown().await;

    if failures > 0 {
        anyhow::bail!("{failures} job(s) failed");
    }
    Ok(())
}

/// Verify connectivity
async fn cmd_check(config: &Config) -> anyhow::Result<()> {
    let dispatcher = start_dispatcher(config)?;
    let items = dispatcher.check().await?;
    dispatcher.shutdown().await;

    let mut failed = 0usize;
    for item in &items {
        match &item.error {
            None => println!("ok    {}", item.name),
            Some(error) => {
                failed += 1;
                println!("FAIL  {}: {error}", item.name);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} check(s) failed");
    }
    Ok(())
}

/// Print cache statistics
fn cmd_stats(config: &Config) -> anyhow::Result<()> {
    let cache = CacheRepo::new(db::init(&config.database_path)?);
    let stats = cache.stats()?;

    println!("cached entries: {}", stats.total);
    for (platform, count) in &stats.per_platform {
        println!("  {platform:<10} {count}");
    }
    Ok(())
}
