use clap::Parser;
use pulse_relay::Client;
use std::io::{self, BufRead};
use std::process;
use std::thread;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address or device name of the server
    address: String,

    /// Server port [1024, 65535]
    #[arg(value_parser = clap::value_parser!(u16).range(1024..))]
    port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("pulse_relay={},pulse_relay_client={}", log_level, log_level))
        .init();

    let client = Client::connect(&args.address, args.port)?;
    let (mut receiver, sender) = client.split()?;

    let signal_sender = sender.clone();
    ctrlc::set_handler(move || {
        info!("Closing connection with server...");
        if let Err(e) = signal_sender.shutdown() {
            warn!("Failed to close connection: {}", e);
        }
        process::exit(0);
    })?;

    thread::Builder::new()
        .name("receiver".to_string())
        .spawn(move || loop {
            match receiver.next_message() {
                Ok(Some(message)) => info!(
                    "Message received from server: {}",
                    String::from_utf8_lossy(&message)
                ),
                Ok(None) => {
                    info!("Connection with server lost, exiting...");
                    process::exit(0);
                }
                Err(e) => {
                    error!("Failed to receive from server: {}", e);
                    process::exit(1);
                }
            }
        })?;

    info!("Type messages to be sent to server:");
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        sender.send_line(&line)?;
    }

    info!("Closing connection with server...");
    sender.shutdown()?;
    Ok(())
}
