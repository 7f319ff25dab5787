use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use ipclane::{ClientEndpoint, EchoHandler, FixedMessage, Framing, IpcConfig, Message, Mode, ServerEndpoint, VariableMessage};
use log::info;
use std::fs;
use std::path::PathBuf;

mod cli;

use cli::Cli;
use cli::commands::Commands;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ipclane")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("ipclane.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn run_application(cli: &Cli, config: &IpcConfig) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
        println!("  socket prefix: {}", config.socket_prefix.display());
    }

    match &cli.command {
        Commands::Serve {
            socket,
            framing,
            workers,
        } => {
            let workers = workers.unwrap_or(config.worker_threads);
            match framing.unwrap_or(config.framing) {
                Framing::Fixed => serve::<FixedMessage>(config, socket, workers),
                Framing::Variable => serve::<VariableMessage>(config, socket, workers),
            }
        }
        Commands::Send {
            payload,
            socket,
            framing,
            mode,
            repeat,
        } => match framing.unwrap_or(config.framing) {
            Framing::Fixed => send::<FixedMessage>(config, socket, payload, *mode, *repeat),
            Framing::Variable => send::<VariableMessage>(config, socket, payload, *mode, *repeat),
        },
    }
}

fn serve<M: Message>(config: &IpcConfig, socket: &str, workers: usize) -> Result<()> {
    let mut server = ServerEndpoint::<M>::bind(config.clone(), socket, EchoHandler).context("Failed to bind socket")?;
    server.run(workers).context("Failed to start server")?;

    println!(
        "{} {} ({} workers, Ctrl-C to stop)",
        "Serving on".green(),
        server.socket_path().display(),
        workers
    );

    wait_for_interrupt()?;

    println!("{} ({} live connections)", "Stopping...".cyan(), server.connections());
    server.stop();
    Ok(())
}

fn wait_for_interrupt() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("Failed to wait for Ctrl-C")?;
    Ok(())
}

fn send<M: Message>(config: &IpcConfig, socket: &str, payload: &str, mode: Mode, repeat: usize) -> Result<()> {
    let client = ClientEndpoint::<M>::new(config.clone(), socket).context("Failed to create client")?;

    if !client.connect_blocking() {
        eyre::bail!("Could not connect to {}", client.socket_path().display());
    }

    let pending: Vec<_> = (0..repeat)
        .map(|_| client.send(M::new(payload.as_bytes(), mode)))
        .collect();

    for (index, reply) in pending.into_iter().enumerate() {
        match reply.wait() {
            Ok(reply) => println!(
                "{} #{} [{} bytes, {}, ts {}] {}",
                "Reply:".green(),
                index,
                reply.payload_length(),
                reply.mode(),
                reply.timestamp(),
                String::from_utf8_lossy(reply.payload())
            ),
            Err(e) => println!("{} #{} {}", "Failed:".red(), index, e),
        }
    }

    client.disconnect();
    Ok(())
}

fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = IpcConfig::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
