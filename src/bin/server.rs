use clap::Parser;
use marlinkv::{Config, Server};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 3535)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("marlinkv={log_level}"))
        .init();

    info!(
        "Starting MarlinKV v{} on {}:{}",
        env!("CARGO_PKG_VERSION"),
        args.bind,
        args.port
    );

    // Create configuration
    let config = if let Some(config_path) = args.config {
        Config::from_file(&config_path)?
    } else {
        Config {
            bind_addr: args.bind,
            port: args.port,
            ..Default::default()
        }
    };

    // Create the server and wire up graceful shutdown
    let server = Server::new(config)?;
    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, shutting down gracefully...");
        shutdown.store(true, std::sync::atomic::Ordering::Release);
    })?;

    // Run the event loop
    if let Err(e) = server.run() {
        error!("Server error: {e}");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
