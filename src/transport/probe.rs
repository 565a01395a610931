//! Direct RTT transport using probe-rs
//!
//! Polls the RTT ring buffers in target memory through the debug probe. The
//! probe link has a hard throughput ceiling set by the wire clock, so reads
//! are scheduled on a fixed interval instead of blocking.

use async_trait::async_trait;
use probe_rs::probe::list::Lister;
use probe_rs::probe::WireProtocol;
use probe_rs::rtt::{Rtt, ScanRegion};
use probe_rs::{Permissions, Session};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{elf, Cadence, Transport};
use crate::config::{recall_chip, remember_chip, ProbeConfig, WireProtocolKind};
use crate::error::{ConsoleError, Result, RttError};

/// Consecutive zero-byte writes tolerated before a write is reported as failed
const WRITE_STALL_LIMIT: u32 = 50;

/// Attached probe session and RTT control block
struct RttLink {
    session: Session,
    rtt: Rtt,
    /// Up channel to try first on the next read when reading all channels
    next_up: usize,
}

pub struct ProbeTransport {
    link: Mutex<RttLink>,
    alive: AtomicBool,
    poll_interval: Duration,
    up_channel: Option<usize>,
    down_channel: usize,
    writable: bool,
    read_buffer_size: usize,
    description: String,
}

impl ProbeTransport {
    /// Open the probe, attach to the target and locate the RTT control block.
    ///
    /// Any failure here is reported as `TransportUnavailable`.
    pub async fn attach(config: &ProbeConfig) -> Result<Self> {
        let chip_file = config.last_chip_file.as_path();
        let chip = config
            .chip
            .clone()
            .or_else(|| recall_chip(chip_file))
            .ok_or_else(|| {
                ConsoleError::TransportUnavailable(
                    "No target chip given (use --chip or probe.chip)".to_string(),
                )
            })?;

        let probes = Lister::new().list_all();
        if probes.is_empty() {
            return Err(ConsoleError::TransportUnavailable(
                "No debug probes found".to_string(),
            ));
        }
        let selected = if config.probe_selector.eq_ignore_ascii_case("auto") {
            probes.first()
        } else {
            probes
                .iter()
                .find(|p| p.identifier.contains(&config.probe_selector))
        }
        .ok_or_else(|| {
            ConsoleError::TransportUnavailable(format!(
                "No probe matches '{}' ({} found)",
                config.probe_selector,
                probes.len()
            ))
        })?;

        info!("Opening probe: {}", selected.identifier);
        let mut probe = selected.open().map_err(|e| {
            ConsoleError::TransportUnavailable(format!(
                "Failed to open probe '{}': {}",
                selected.identifier, e
            ))
        })?;

        let protocol = match config.protocol {
            WireProtocolKind::Swd => WireProtocol::Swd,
            WireProtocolKind::Jtag => WireProtocol::Jtag,
        };
        probe.select_protocol(protocol).map_err(|e| {
            ConsoleError::TransportUnavailable(format!("Failed to select {:?}: {}", protocol, e))
        })?;
        let speed = probe.set_speed(config.speed_khz).map_err(|e| {
            ConsoleError::TransportUnavailable(format!(
                "Failed to set speed {} kHz: {}",
                config.speed_khz, e
            ))
        })?;

        info!("Attaching to {} over {:?} at {} kHz", chip, protocol, speed);
        let mut session = probe.attach(chip.as_str(), Permissions::default()).map_err(|e| {
            ConsoleError::TransportUnavailable(format!("Failed to attach to target '{}': {}", chip, e))
        })?;

        let scan_region = scan_region_for(config);
        let mut rtt = attach_rtt(&mut session, &scan_region, config).await?;

        let up_count = rtt.up_channels().len();
        let down_count = rtt.down_channels().len();
        for (i, channel) in rtt.up_channels().iter().enumerate() {
            debug!(
                "Up channel {}: {} ({} bytes)",
                i,
                channel.name().unwrap_or("unnamed"),
                channel.buffer_size()
            );
        }
        for (i, channel) in rtt.down_channels().iter().enumerate() {
            debug!(
                "Down channel {}: {} ({} bytes)",
                i,
                channel.name().unwrap_or("unnamed"),
                channel.buffer_size()
            );
        }

        if up_count == 0 {
            return Err(ConsoleError::TransportUnavailable(
                "RTT control block has no up channels".to_string(),
            ));
        }
        if let Some(channel) = config.up_channel {
            if channel >= up_count {
                return Err(ConsoleError::TransportUnavailable(
                    RttError::UpChannelNotFound(channel).to_string(),
                ));
            }
        }
        let writable = config.down_channel < down_count;
        if !writable {
            info!(
                "Down channel {} not present ({} available), input is disabled",
                config.down_channel, down_count
            );
        }

        if config.remember_chip {
            remember_chip(chip_file, &chip);
        }

        let description = format!(
            "{} on {} ({} up, {} down channels)",
            chip, selected.identifier, up_count, down_count
        );
        info!(
            "RTT attached: {} up channels, {} down channels, polling every {} ms",
            up_count, down_count, config.poll_interval_ms
        );

        Ok(Self {
            link: Mutex::new(RttLink {
                session,
                rtt,
                next_up: 0,
            }),
            alive: AtomicBool::new(true),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            up_channel: config.up_channel,
            down_channel: config.down_channel,
            writable,
            read_buffer_size: config.read_buffer_size,
            description,
        })
    }

    fn mark_lost(&self, reason: String) -> ConsoleError {
        if self.alive.swap(false, Ordering::SeqCst) {
            warn!("Probe connection lost: {}", reason);
        }
        ConsoleError::TransportLost(reason)
    }
}

/// Control block location: explicit address, then ELF symbol, then a RAM scan
fn scan_region_for(config: &ProbeConfig) -> ScanRegion {
    if let Some(address) = config.control_block_address {
        info!("RTT scan: using exact address 0x{:08X}", address);
        return ScanRegion::Exact(address);
    }
    if let Some(elf_path) = &config.elf {
        match elf::find_control_block(elf_path) {
            Ok(address) => return ScanRegion::Exact(address),
            Err(e) => warn!("{}; falling back to RAM scan", e),
        }
    }
    info!("RTT scan: scanning target RAM");
    ScanRegion::Ram
}

/// Attach RTT, waiting for the firmware to initialise its control block
async fn attach_rtt(
    session: &mut Session,
    scan_region: &ScanRegion,
    config: &ProbeConfig,
) -> Result<Rtt> {
    let attempts = config.attach_retries.max(1);
    let delay = Duration::from_millis(config.attach_retry_delay_ms);

    for attempt in 1..=attempts {
        let result = {
            let mut core = session.core(0).map_err(|e| {
                ConsoleError::TransportUnavailable(format!("Failed to get core: {}", e))
            })?;
            Rtt::attach_region(&mut core, scan_region)
        };

        match result {
            Ok(rtt) => return Ok(rtt),
            Err(probe_rs::rtt::Error::ControlBlockNotFound) if attempt < attempts => {
                debug!(
                    "RTT control block not found yet (attempt {}/{}), retrying in {:?}",
                    attempt, attempts, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(probe_rs::rtt::Error::ControlBlockNotFound) => {
                return Err(ConsoleError::TransportUnavailable(format!(
                    "{} after {} attempts; make sure the firmware initialises RTT",
                    RttError::ControlBlockNotFound,
                    attempts
                )));
            }
            Err(e) => {
                return Err(ConsoleError::TransportUnavailable(
                    RttError::AttachFailed(e.to_string()).to_string(),
                ));
            }
        }
    }

    Err(ConsoleError::TransportUnavailable(
        RttError::ControlBlockNotFound.to_string(),
    ))
}

#[async_trait]
impl Transport for ProbeTransport {
    fn describe(&self) -> String {
        self.description.clone()
    }

    fn cadence(&self) -> Cadence {
        Cadence::FixedInterval(self.poll_interval)
    }

    fn supports_write(&self) -> bool {
        self.writable
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Take one sample of the up channel(s). The timeout is not used: a
    /// single RTT read over the probe completes in bounded time.
    async fn read_available(&self, _timeout: Duration) -> Result<Vec<u8>> {
        if !self.is_alive() {
            return Err(ConsoleError::TransportLost("probe session closed".to_string()));
        }

        let mut link = self.link.lock().await;
        let RttLink {
            session,
            rtt,
            next_up,
        } = &mut *link;

        let mut core = match session.core(0) {
            Ok(core) => core,
            Err(e) => return Err(self.mark_lost(format!("failed to get core: {}", e))),
        };

        let channels = rtt.up_channels();
        let count = channels.len();
        let (first, tries) = match self.up_channel {
            Some(channel) => (channel, 1),
            None => (*next_up % count.max(1), count),
        };

        let mut buffer = vec![0u8; self.read_buffer_size];
        for offset in 0..tries {
            let index = (first + offset) % count.max(1);
            let Some(channel) = channels.get_mut(index) else {
                return Err(self.mark_lost(RttError::UpChannelNotFound(index).to_string()));
            };
            match channel.read(&mut core, &mut buffer) {
                Ok(0) => continue,
                Ok(n) => {
                    buffer.truncate(n);
                    *next_up = (index + 1) % count.max(1);
                    return Ok(buffer);
                }
                Err(e) => {
                    return Err(self.mark_lost(format!("RTT read from up channel {} failed: {}", index, e)));
                }
            }
        }
        Ok(Vec::new())
    }

    async fn write(&self, bytes: &[u8]) -> Result<usize> {
        if !self.writable {
            return Ok(0);
        }

        let mut written = 0;
        let mut stalls = 0;
        while written < bytes.len() {
            let n = {
                let mut link = self.link.lock().await;
                let RttLink { session, rtt, .. } = &mut *link;
                let mut core = session
                    .core(0)
                    .map_err(|e| ConsoleError::WriteFailed(format!("failed to get core: {}", e)))?;
                let channel = rtt.down_channels().get_mut(self.down_channel).ok_or_else(|| {
                    ConsoleError::WriteFailed(format!("down channel {} not found", self.down_channel))
                })?;
                channel
                    .write(&mut core, &bytes[written..])
                    .map_err(|e| ConsoleError::WriteFailed(format!("RTT write failed: {}", e)))?
            };

            if n == 0 {
                stalls += 1;
                if stalls >= WRITE_STALL_LIMIT {
                    return Err(ConsoleError::WriteFailed(format!(
                        "down channel {} stayed full, {} of {} bytes written",
                        self.down_channel,
                        written,
                        bytes.len()
                    )));
                }
                tokio::time::sleep(self.poll_interval).await;
            } else {
                written += n;
                stalls = 0;
            }
        }

        debug!("Wrote {} bytes to RTT down channel {}", written, self.down_channel);
        Ok(written)
    }
}
