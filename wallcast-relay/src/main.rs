//! wallcast-relay - Mirror a VK community wall into a Telegram channel
//!
//! Polls the wall at a fixed interval, republishes posts it has not seen
//! before and answers `/start` in bot chats until it is told to stop.

use clap::Parser;
use libwallcast::logging::{LogFormat, LoggingConfig};
use libwallcast::{Config, RelayContext, Result, Shutdown};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "wallcast-relay")]
#[command(version)]
#[command(about = "Mirror a VK community wall into a Telegram channel")]
#[command(long_about = "\
wallcast-relay - Mirror a VK community wall into a Telegram channel

DESCRIPTION:
    wallcast-relay is a long-running daemon that reads the newest posts of
    a VK community wall and republishes new ones to a Telegram channel.

    Every post is attempted exactly once. The text of each attempt is
    recorded in a SQLite database, successful or not, and a post whose
    text is already recorded is never sent again. The bot also answers
    /start with a short greeting.

USAGE:
    # Run in foreground (logs to stderr)
    wallcast-relay

    # Use a specific config file
    wallcast-relay --config ./wallcast.toml

    # Poll every minute with JSON logs
    wallcast-relay --poll-interval 60 --log-format json

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current post)

CONFIGURATION:
    Configuration file: ~/.config/wallcast/config.toml
    Database location: ~/.local/share/wallcast/parsed_posts.db

    [vk]
    group_id = \"123456\"
    access_token = \"...\"

    [telegram]
    bot_token = \"...\"
    channel_id = \"@my_channel\"

    [relay]
    poll_interval = 300  # seconds between polls
    post_delay = 5       # seconds after every publish attempt
    publish_delay = 5    # extra seconds after a successful publish
    on_error = \"continue\"  # continue | restart | exit

    Credentials can also come from WALLCAST_VK_GROUP_ID,
    WALLCAST_VK_ACCESS_TOKEN, WALLCAST_TELEGRAM_BOT_TOKEN and
    WALLCAST_TELEGRAM_CHANNEL_ID.

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or credential error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH", env = "WALLCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to check the wall for new posts (default: 300)")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Log output format
    #[arg(long, value_name = "FORMAT", env = "WALLCAST_LOG_FORMAT", default_value = "text")]
    #[arg(help = "Log format: text, json or pretty")]
    log_format: LogFormat,

    /// Run once and exit (for testing)
    #[arg(long, hide = true)]
    #[arg(help = "Process the wall once and exit (for testing)")]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let mut logging = LoggingConfig::from_env(cli.verbose);
    logging.format = cli.log_format;
    logging.init();

    // Run the daemon and handle errors
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_or_env(path)?,
        None => Config::load()?,
    };

    if let Some(poll_interval) = cli.poll_interval {
        config.relay.poll_interval = poll_interval;
        config.validate()?;
    }

    info!("wallcast-relay daemon starting");
    info!("Poll interval: {}s", config.relay.poll_interval);

    let ctx = RelayContext::from_config(config).await?;
    ctx.authenticate().await?;

    if cli.once {
        // Run once for testing
        let report = ctx.sync_loop().run_cycle().await?;
        info!(
            "Published {} of {} fetched post(s), {} failed",
            report.published, report.fetched, report.failed
        );
        ctx.db().close().await;
        info!("wallcast-relay: processed posts once, exiting");
        return Ok(());
    }

    let (tx, shutdown) = Shutdown::channel();
    setup_signal_handlers(tx)?;

    let result = ctx.run(shutdown).await;
    ctx.db().close().await;
    result?;

    info!("wallcast-relay daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: watch::Sender<bool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    // Spawn thread to handle signals
    std::thread::spawn(move || {
        for sig in signals.forever() {
            if sig == SIGTERM || sig == SIGINT {
                info!("Received shutdown signal, stopping gracefully...");
                let _ = shutdown.send(true);
                break;
            }
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: watch::Sender<bool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping gracefully...");
            let _ = shutdown.send(true);
        }
    });

    Ok(())
}
