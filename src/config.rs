//! Configuration management for the RTT console

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use crate::error::{ConsoleError, Result};

/// Default file (relative to the working directory) holding the last attached chip name
pub const LAST_CHIP_FILE: &str = ".rtt_console_last_chip";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "rtt-console")]
#[command(about = "Pausable console for RTT output from embedded targets")]
#[command(version)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); overrides logging.level
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log file path (defaults to stderr)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Transport backend
    #[arg(short, long, value_enum)]
    pub transport: Option<TransportKind>,

    /// Host of the RTT telnet relay
    #[arg(long)]
    pub host: Option<String>,

    /// Port of the RTT telnet relay
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Target chip name (probe transport)
    #[arg(long)]
    pub chip: Option<String>,

    /// Probe selector: "auto" or a substring of the probe identifier
    #[arg(long = "probe")]
    pub probe_selector: Option<String>,

    /// Probe clock speed in kHz
    #[arg(long)]
    pub speed: Option<u32>,

    /// Debug wire protocol
    #[arg(long, value_enum)]
    pub protocol: Option<WireProtocolKind>,

    /// Minimum interval between RTT polls in milliseconds
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// RTT up channel to read (all channels when omitted)
    #[arg(long)]
    pub up_channel: Option<usize>,

    /// RTT down channel to write
    #[arg(long)]
    pub down_channel: Option<usize>,

    /// Firmware ELF used to locate the _SEGGER_RTT control block
    #[arg(long)]
    pub elf: Option<PathBuf>,

    /// Exact RTT control block address (hex with 0x prefix, or decimal)
    #[arg(long, value_parser = parse_address)]
    pub control_block: Option<u64>,

    /// Maximum number of lines kept in scrollback
    #[arg(long)]
    pub max_lines: Option<usize>,

    /// Maximum number of text bytes kept in scrollback
    #[arg(long)]
    pub max_bytes: Option<usize>,

    /// Prefix each line with its arrival time
    #[arg(long)]
    pub timestamps: bool,

    /// Do not show the in-progress partial line in the footer
    #[arg(long)]
    pub no_partial: bool,

    /// Do not capture the mouse (disables right-button pause)
    #[arg(long)]
    pub no_mouse: bool,

    /// Plain line output without raw mode, footer or mouse handling
    #[arg(long)]
    pub plain: bool,

    /// Generate default configuration file
    #[arg(long)]
    pub generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,

    /// Show current configuration and exit
    #[arg(long)]
    pub show_config: bool,
}

/// Parse an address given as "0x..." hex or plain decimal
pub fn parse_address(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex address '{}': {}", s, e))
    } else {
        s.parse::<u64>().map_err(|e| format!("Invalid address '{}': {}", s, e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Socket relay exposed by the debug-probe driver
    Telnet,
    /// Direct RTT polling through probe-rs
    Probe,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Telnet => write!(f, "telnet"),
            TransportKind::Probe => write!(f, "probe"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WireProtocolKind {
    Swd,
    Jtag,
}

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub probe: ProbeConfig,
    pub console: ConsoleConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file or create default
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let content = std::fs::read_to_string(path)
                .map_err(|e| ConsoleError::InvalidConfig(format!("Failed to read config file: {}", e)))?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| ConsoleError::InvalidConfig(format!("Invalid TOML syntax: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Merge command line arguments into configuration.
    ///
    /// Only arguments given on the command line override the loaded values.
    pub fn merge_args(&mut self, args: &Args) {
        if let Some(kind) = args.transport {
            self.transport.kind = kind;
        }
        if let Some(host) = &args.host {
            self.transport.host = host.clone();
        }
        if let Some(port) = args.port {
            self.transport.port = port;
        }
        if let Some(chip) = &args.chip {
            self.probe.chip = Some(chip.clone());
        }
        if let Some(selector) = &args.probe_selector {
            self.probe.probe_selector = selector.clone();
        }
        if let Some(speed) = args.speed {
            self.probe.speed_khz = speed;
        }
        if let Some(protocol) = args.protocol {
            self.probe.protocol = protocol;
        }
        if let Some(interval) = args.poll_interval {
            self.probe.poll_interval_ms = interval;
        }
        if args.up_channel.is_some() {
            self.probe.up_channel = args.up_channel;
        }
        if let Some(channel) = args.down_channel {
            self.probe.down_channel = channel;
        }
        if args.elf.is_some() {
            self.probe.elf = args.elf.clone();
        }
        if args.control_block.is_some() {
            self.probe.control_block_address = args.control_block;
        }
        if args.max_lines.is_some() {
            self.console.max_lines = args.max_lines;
        }
        if args.max_bytes.is_some() {
            self.console.max_bytes = args.max_bytes;
        }
        if args.timestamps {
            self.console.timestamps = true;
        }
        if args.no_partial {
            self.console.show_partial = false;
        }
        if args.no_mouse {
            self.console.mouse = false;
        }
        if args.plain {
            self.console.plain = true;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.log_file.is_some() {
            self.logging.file = args.log_file.clone();
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.transport.kind == TransportKind::Telnet && self.transport.host.trim().is_empty() {
            return Err(ConsoleError::InvalidConfig("transport.host must not be empty".to_string()));
        }
        if self.transport.read_timeout_ms == 0 {
            return Err(ConsoleError::InvalidConfig("transport.read_timeout_ms must be > 0".to_string()));
        }
        if self.probe.speed_khz == 0 {
            return Err(ConsoleError::InvalidConfig("probe.speed_khz must be > 0".to_string()));
        }
        if self.probe.poll_interval_ms == 0 {
            return Err(ConsoleError::InvalidConfig("probe.poll_interval_ms must be > 0".to_string()));
        }
        if self.probe.read_buffer_size == 0 {
            return Err(ConsoleError::InvalidConfig("probe.read_buffer_size must be > 0".to_string()));
        }
        if self.console.terminator.is_empty() {
            return Err(ConsoleError::InvalidConfig("console.terminator must not be empty".to_string()));
        }
        if self.console.page_size == 0 {
            return Err(ConsoleError::InvalidConfig("console.page_size must be > 0".to_string()));
        }
        if self.console.max_lines == Some(0) {
            return Err(ConsoleError::InvalidConfig("console.max_lines must be > 0 when set".to_string()));
        }
        if self.console.max_bytes == Some(0) {
            return Err(ConsoleError::InvalidConfig("console.max_bytes must be > 0 when set".to_string()));
        }
        Ok(())
    }

    /// Generate TOML configuration string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ConsoleError::InvalidConfig(format!("Failed to serialize config: {}", e)))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Upper bound on one blocking read; also bounds how long shutdown takes to be observed
    pub read_timeout_ms: u64,
    pub read_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Telnet,
            host: "127.0.0.1".to_string(),
            port: 19021,
            connect_timeout_ms: 5000,
            read_timeout_ms: 250,
            read_buffer_size: 4096,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProbeConfig {
    pub chip: Option<String>,
    pub probe_selector: String,
    pub speed_khz: u32,
    pub protocol: WireProtocolKind,
    pub poll_interval_ms: u64,
    pub read_buffer_size: usize,
    pub up_channel: Option<usize>,
    pub down_channel: usize,
    pub control_block_address: Option<u64>,
    pub elf: Option<PathBuf>,
    pub attach_retries: u32,
    pub attach_retry_delay_ms: u64,
    pub remember_chip: bool,
    /// Where the last attached chip name is kept
    pub last_chip_file: PathBuf,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            chip: None,
            probe_selector: "auto".to_string(),
            speed_khz: 1000,
            protocol: WireProtocolKind::Swd,
            poll_interval_ms: 10,
            read_buffer_size: 1024,
            up_channel: None,
            down_channel: 0,
            control_block_address: None,
            elf: None,
            attach_retries: 20,
            attach_retry_delay_ms: 100,
            remember_chip: true,
            last_chip_file: PathBuf::from(LAST_CHIP_FILE),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConsoleConfig {
    pub terminator: String,
    pub strip_carriage_return: bool,
    pub write_terminator: String,
    pub max_lines: Option<usize>,
    pub max_bytes: Option<usize>,
    pub timestamps: bool,
    pub show_partial: bool,
    pub page_size: usize,
    pub mouse: bool,
    pub plain: bool,
    pub reveal_on_exit: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            terminator: "\n".to_string(),
            strip_carriage_return: true,
            write_terminator: "\n".to_string(),
            max_lines: None,
            max_bytes: None,
            timestamps: false,
            show_partial: true,
            page_size: 20,
            mouse: true,
            plain: false,
            reveal_on_exit: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
        }
    }
}

/// Read the chip name saved by a previous run, if any
pub fn recall_chip(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let chip = content.trim();
            if chip.is_empty() {
                None
            } else {
                debug!("Recalled last used chip '{}' from {}", chip, path.display());
                Some(chip.to_string())
            }
        }
        Err(_) => None,
    }
}

/// Save the chip name for the next run
pub fn remember_chip(path: &Path, chip: &str) {
    if let Err(e) = std::fs::write(path, chip) {
        warn!("Failed to save last used chip to {}: {}", path.display(), e);
    }
}
