//! RTT Console - Main Entry Point

use clap::Parser;
use std::io::IsTerminal;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

use rtt_console::{
    config::{Args, LoggingConfig},
    console::{PlainSurface, TerminalSurface},
    terminal::{self, TerminalModes},
    transport, Config, Session,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Handle special flags first
    if args.generate_config {
        let config = Config::default();
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    // Logging comes from the merged config, so load errors go straight to stderr
    let mut config = match Config::load(args.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("rtt-console: failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    config.merge_args(&args);

    init_logging(&config.logging)?;

    info!("Starting RTT console v{}", env!("CARGO_PKG_VERSION"));
    debug!("Command line args: {:?}", args);

    if args.validate_config {
        config.validate()?;
        println!("Configuration is valid");
        return Ok(());
    }

    if args.show_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    config.validate().map_err(|e| {
        error!("Configuration validation failed: {}", e);
        e
    })?;

    // Unreachable driver, socket or probe is fatal before anything is drawn
    let transport = transport::connect(&config).await.map_err(|e| {
        error!("{}", e);
        e
    })?;
    let description = transport.describe();
    let (session, handle) = Session::new(&config, transport);

    let interactive = !config.console.plain && std::io::stdout().is_terminal();
    let result = if interactive {
        let mut modes = TerminalModes::enable(config.console.mouse)?;
        let front_end = tokio::spawn(terminal::drive(handle.clone()));
        let result = session
            .run(TerminalSurface::stdout(config.console.timestamps))
            .await;
        handle.shutdown();
        let _ = front_end.await;
        modes.undo();
        result
    } else {
        eprintln!("rtt-console: connected to {}", description);
        let front_end = tokio::spawn(terminal::drive_plain(handle.clone()));
        let result = session
            .run(PlainSurface::stdout(config.console.timestamps))
            .await;
        handle.shutdown();
        let _ = front_end.await;
        result
    };

    match result {
        Ok(summary) => {
            info!(
                "Received {} lines ({} bytes) from {}",
                summary.latest_seq, summary.acquisition.bytes, description
            );
            Ok(())
        }
        Err(e) => {
            error!("Session ended: {}", e);
            eprintln!("rtt-console: {}", e);
            std::process::exit(1);
        }
    }
}

/// Initialize logging system
fn init_logging(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false);

    // Configure output destination
    if let Some(log_file) = &logging.file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;

        subscriber.with_writer(file).with_ansi(false).init();
    } else {
        subscriber.with_writer(std::io::stderr).init();
    }

    debug!("Logging initialized with level: {}", logging.level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from([
            "rtt-console",
            "--log-level", "debug",
            "--transport", "probe",
            "--chip", "nRF52840_xxAA",
            "--poll-interval", "25",
        ]);

        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.chip.as_deref(), Some("nRF52840_xxAA"));
        assert_eq!(args.poll_interval, Some(25));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport.port, 19021);
        assert_eq!(config.probe.speed_khz, 1000);
    }
}
