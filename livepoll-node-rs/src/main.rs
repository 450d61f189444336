//! Livepoll Node
//!
//! Serves live vote updates over WebSocket and takes poll administration
//! commands from stdin.

mod console;
mod ws;

use std::io::{self, BufRead};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use livepoll_core::{EngineConfig, PollEngine};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use console::Command;

/// Live poll node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address the WebSocket endpoint listens on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Directory for durable storage (in-memory when omitted)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Updates a subscriber may have queued before it is dropped
    #[arg(long, default_value = "64")]
    subscriber_buffer: usize,

    /// Do not fsync the write-ahead log after every write
    #[arg(long)]
    no_fsync: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt().with_env_filter(filter).with_target(false).init();

    let mut config = EngineConfig::default().with_subscriber_buffer(args.subscriber_buffer);
    if let Some(dir) = &args.data_dir {
        config = config.with_storage_dir(dir);
    }
    if args.no_fsync {
        config = config.without_fsync();
    }

    let engine = Arc::new(PollEngine::open(config)?);

    let listener = TcpListener::bind(args.bind).await?;
    info!("Livepoll node listening on ws://{}/ws/polls/{{pollId}}", listener.local_addr()?);
    tokio::spawn(ws::serve(listener, engine.clone()));

    // Console runs on its own thread; stdin reads block
    let (command_tx, mut command_rx) = tokio::sync::mpsc::channel::<Command>(16);
    std::thread::spawn(move || {
        println!("\n{}\n", console::HELP);

        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }

            match console::parse(&line) {
                Ok(command) => {
                    let quit = command == Command::Quit;
                    if command_tx.blocking_send(command).is_err() || quit {
                        break;
                    }
                }
                Err(e) => println!("{}", e),
            }
        }
    });

    loop {
        tokio::select! {
            Some(command) = command_rx.recv() => {
                match command {
                    Command::Quit => break,
                    Command::Help => println!("{}", console::HELP),
                    command => {
                        // Commands may write and fsync the WAL
                        let engine = engine.clone();
                        match tokio::task::spawn_blocking(move || console::execute(&engine, command)).await {
                            Ok(Ok(output)) => println!("{}", output),
                            Ok(Err(e)) => println!("error: {}", e),
                            Err(e) => warn!("Console command failed: {}", e),
                        }
                    }
                }
            }

            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    info!("Livepoll node shutting down");
    Ok(())
}
