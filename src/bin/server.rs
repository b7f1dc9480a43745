use clap::Parser;
use pulse_relay::{console, Config, Server};
use std::io;
use std::thread;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on [1024, 65535]
    #[arg(value_parser = clap::value_parser!(u16).range(1024..))]
    port: u16,

    /// Maximum connected clients; a negative value removes the limit
    #[arg(allow_negative_numbers = true)]
    max_clients: i64,

    /// Non-zero reads operator commands from stdin
    #[arg(allow_negative_numbers = true)]
    interactive: i64,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file path; command-line values override its port and limits
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
        .with_env_filter(format!("pulse_relay={},pulse_relay_server={}", log_level, log_level))
        .init();

    let mut config = match args.config {
        Some(config_path) => Config::from_file(&config_path)?,
        None => Config {
            bind_addr: args.bind,
            log_level: log_level.to_string(),
            ..Default::default()
        },
    };
    config.port = args.port;
    config.max_clients = Config::client_limit_from_arg(args.max_clients);
    config.interactive = args.interactive != 0;

    info!(
        "Starting pulse-relay v{} on {}",
        env!("CARGO_PKG_VERSION"),
        config.listen_addr()
    );
    match config.max_clients {
        Some(limit) => info!("Accepting up to {} client(s)", limit),
        None => info!("No client limit"),
    }

    let interactive = config.interactive;
    let server = Server::bind(config)?;
    let handle = server.handle();

    // Setup signal handlers for graceful shutdown
    let signal_handle = handle.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, shutting down gracefully...");
        signal_handle.shutdown();
    })?;

    if interactive {
        let console_handle = handle.clone();
        thread::Builder::new()
            .name("console".to_string())
            .spawn(move || {
                let exit = console::run(io::stdin().lock(), console_handle.mailbox());
                info!("Console finished: {:?}", exit);
            })?;
    }

    if let Err(e) = server.run() {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
