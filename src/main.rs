//! ttsbridge main entry point
//!
//! Serves the method channel over stdio: one JSON method call per line on
//! stdin, replies and `speak.*` events as JSON lines on stdout.

use anyhow::Context;
use log::{error, info, warn};
use std::io::{self, BufRead};
use std::process;
use std::sync::{Arc, Mutex};
use ttsbridge::channel::{write_line, JsonLineSink, MethodCall, MethodResult};
use ttsbridge::config::BridgeConfig;
use ttsbridge::TtsBridge;

fn main() {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let debug_mode = args.iter().any(|arg| arg == "--debug" || arg == "-d");

    // Initialize logger; stdout belongs to the channel, so logs never go there
    if debug_mode {
        use std::fs::OpenOptions;
        match OpenOptions::new()
            .create(true)
            .append(true)
            .open("ttsbridge.log")
        {
            Ok(log_file) => {
                env_logger::Builder::new()
                    .filter_level(log::LevelFilter::Debug)
                    .target(env_logger::Target::Pipe(Box::new(log_file)))
                    .init();
            }
            Err(e) => {
                eprintln!("Warning: Failed to open ttsbridge.log for debug logging: {}", e);
                eprintln!("Continuing without file logging...");
                env_logger::Builder::new()
                    .filter_level(log::LevelFilter::Warn)
                    .init();
            }
        }

        info!(
            "ttsbridge version {} starting (debug mode, logging to ttsbridge.log)",
            ttsbridge::VERSION
        );
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Error)
            .init();
    }

    if let Err(e) = run(&args) {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Value following `--config`, if given
fn config_arg(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|arg| arg == "--config" || arg == "-c")
        .and_then(|idx| args.get(idx + 1))
        .map(String::as_str)
}

fn run(args: &[String]) -> anyhow::Result<()> {
    let config = match config_arg(args) {
        Some(path) => BridgeConfig::load_from(path),
        None => BridgeConfig::load(),
    }
    .context("Failed to load configuration")?;
    info!("Configuration loaded from {:?}", config.path());

    let output = Arc::new(Mutex::new(io::stdout()));
    let bridge = TtsBridge::with_configured_backend(&config, JsonLineSink::new(Arc::clone(&output)))
        .context("Failed to start speech bridge")?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read method call")?;
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<MethodCall>(&line) {
            Ok(call) => bridge.handle(&call).to_reply(call.id.as_ref()),
            Err(e) => {
                warn!("Malformed method call {:?}: {}", line, e);
                MethodResult::Error {
                    code: "malformed_call".to_string(),
                    message: e.to_string(),
                }
                .to_reply(None)
            }
        };
        write_line(&output, &reply).context("Failed to write reply")?;
    }

    info!("Input closed, finishing queued speech");
    bridge
        .shutdown()
        .context("Failed to deliver pending speech events")?;
    Ok(())
}
