//! ircbook - Main entry point
//!
//! Searches an IRC ebook channel and optionally downloads the best match.

use anyhow::{Context, Result};
use ircbook::{
    CliArgs, Config, ConnectionManager, DownloadCoordinator, EventBus, ProgressDisplay, SearchCoordinator,
    SessionRegistry,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        match panic_info.location() {
            Some(location) => error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
            None => error!("PANIC occurred at an unknown location"),
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic handler
    setup_panic_handler();

    // Parse CLI arguments
    let args = CliArgs::parse_args();

    // Initialize logging
    init_logging(&args);
    info!("ircbook starting");
    debug!("CLI arguments: {:?}", args);

    // Create configuration
    let config = Config::from_args(&args).context("Failed to build configuration")?;
    config.validate().context("Invalid configuration")?;

    let events = EventBus::new();
    let printer = spawn_event_printer(&events, config.is_quiet(), config.json);

    let irc = Arc::new(config.irc.clone());
    let registry = Arc::new(SessionRegistry::new(ConnectionManager::new(irc, events.clone())));

    // Ctrl-C cancels whatever is in flight; sessions are closed below
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, shutting down");
                cancel.cancel();
            }
        });
    }

    let result = run(&config, &registry, &events, &cancel).await;
    registry.close_all().await;

    // Dropping the last senders lets the printer drain and exit
    drop(registry);
    drop(events);
    if printer.await.is_err() {
        debug!("Event printer ended abnormally");
    }

    let mut progress = ProgressDisplay::new(config.is_quiet(), config.json);
    match result {
        Ok(message) => {
            progress.print_complete(&message)?;
            info!("ircbook finished");
            Ok(())
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            progress.print_error(&format!("{:#}", e))?;
            Err(e)
        }
    }
}

/// Connect, search and optionally download
async fn run(
    config: &Config,
    registry: &Arc<SessionRegistry>,
    events: &EventBus,
    cancel: &CancellationToken,
) -> Result<String> {
    let session_id = registry.acquire(cancel).await.context("Failed to connect")?;

    let search = SearchCoordinator::new(registry.clone(), events.clone());
    let candidates = search
        .search(&session_id, &config.query, cancel)
        .await
        .context("Search failed")?;

    let mut progress = ProgressDisplay::new(config.is_quiet(), config.json);
    progress.print_candidates(&candidates)?;

    if !config.download {
        return Ok(format!("Found {} candidate(s)", candidates.len()));
    }

    let download = DownloadCoordinator::new(registry.clone(), events.clone());
    let file = download
        .download_with_fallback(&session_id, &candidates, &config.irc.download_dir, cancel)
        .await
        .context("Download failed")?;
    info!("Saved {} (sha1 {})", file.path.display(), file.sha1);
    Ok(format!("Downloaded {}", file.path.display()))
}

/// Print engine events as they arrive
fn spawn_event_printer(events: &EventBus, quiet: bool, json: bool) -> tokio::task::JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        let mut display = ProgressDisplay::new(quiet, json);
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = display.handle_event(&event) {
                        debug!("Failed to print event: {}", e);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => debug!("Event printer skipped {} events", n),
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let level = args.log_level();
    // RUST_LOG wins over -v/-q
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ircbook={}", level.as_str().to_lowercase())));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }

    debug!("Logging initialized with level: {:?}", level);
}
