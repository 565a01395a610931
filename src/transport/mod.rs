//! Byte-level transports carrying the RTT channel
//!
//! Both backends expose the same read/write/liveness capability set and are
//! selected once at session setup. The acquisition loop only looks at the
//! [`Cadence`] to decide whether to block on reads or to poll on a timer.

pub mod elf;
pub mod probe;
pub mod scripted;
pub mod telnet;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{Config, TransportKind};
use crate::error::Result;

pub use probe::ProbeTransport;
pub use scripted::ScriptedTransport;
pub use telnet::TelnetTransport;

/// How the acquisition loop should schedule reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Block on the transport until data arrives (socket relay)
    EventDriven,
    /// Sample at most once per interval (direct memory polling)
    FixedInterval(Duration),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Human readable description for logs and the console banner
    fn describe(&self) -> String;

    fn cadence(&self) -> Cadence;

    /// Whether the backend has a host-to-target path at all
    fn supports_write(&self) -> bool;

    fn is_alive(&self) -> bool;

    /// Read whatever is ready, waiting at most `timeout`.
    ///
    /// An empty vec means nothing was ready. An error means the transport
    /// is gone and the session must end.
    async fn read_available(&self, timeout: Duration) -> Result<Vec<u8>>;

    /// Write bytes towards the target, returning how many were accepted
    async fn write(&self, bytes: &[u8]) -> Result<usize>;
}

/// Open the transport selected by the configuration
pub async fn connect(config: &Config) -> Result<Arc<dyn Transport>> {
    info!("Opening {} transport", config.transport.kind);
    let transport: Arc<dyn Transport> = match config.transport.kind {
        TransportKind::Telnet => Arc::new(TelnetTransport::connect(&config.transport).await?),
        TransportKind::Probe => Arc::new(ProbeTransport::attach(&config.probe).await?),
    };
    info!("Connected: {}", transport.describe());
    Ok(transport)
}
