//! Acquisition loop: transport reads → reassembler → scrollback → renderer notification

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::console::{CompletedLine, LineReassembler, Progress, SharedScrollback};
use crate::error::{ConsoleError, Result};
use crate::transport::{Cadence, Transport};

/// Counters reported when the loop stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionSummary {
    pub chunks: u64,
    pub bytes: u64,
    pub lines: u64,
    pub decode_anomalies: u64,
}

pub struct AcquisitionLoop {
    transport: Arc<dyn Transport>,
    reassembler: LineReassembler,
    scrollback: SharedScrollback,
    progress: watch::Sender<Progress>,
    read_timeout: Duration,
    publish_partial: bool,
    summary: AcquisitionSummary,
}

impl AcquisitionLoop {
    pub fn new(
        transport: Arc<dyn Transport>,
        reassembler: LineReassembler,
        scrollback: SharedScrollback,
        progress: watch::Sender<Progress>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            reassembler,
            scrollback,
            progress,
            read_timeout,
            publish_partial: true,
            summary: AcquisitionSummary::default(),
        }
    }

    /// Publish the in-progress line with each update
    pub fn publish_partial(mut self, publish_partial: bool) -> Self {
        self.publish_partial = publish_partial;
        self
    }

    /// Run until shutdown is requested or the transport goes away.
    ///
    /// Any partial line is flushed into the scrollback before returning.
    /// Transport loss is returned as `TransportLost` after that flush.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<AcquisitionSummary> {
        let cadence = self.transport.cadence();
        info!("Acquisition started ({:?}) on {}", cadence, self.transport.describe());

        let outcome = match cadence {
            Cadence::EventDriven => self.run_event_driven(&mut shutdown).await,
            Cadence::FixedInterval(interval) => self.run_polling(interval, &mut shutdown).await,
        };

        if let Some(line) = self.reassembler.flush() {
            debug!("Flushing partial line of {} bytes", line.text.len());
            self.append(vec![line])?;
        }

        outcome?;
        info!(
            "Acquisition stopped: {} lines from {} bytes",
            self.summary.lines, self.summary.bytes
        );
        Ok(self.summary)
    }

    async fn run_event_driven(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            self.check_alive()?;

            let transport = self.transport.clone();
            tokio::select! {
                biased;
                _ = shutdown.changed() => return Ok(()),
                chunk = transport.read_available(self.read_timeout) => self.ingest(chunk?)?,
            }
        }
    }

    async fn run_polling(
        &mut self,
        interval: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return Ok(()),
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                return Ok(());
            }
            self.check_alive()?;

            let chunk = self.transport.read_available(self.read_timeout.min(interval)).await?;
            self.ingest(chunk)?;
        }
    }

    fn check_alive(&self) -> Result<()> {
        if self.transport.is_alive() {
            Ok(())
        } else {
            Err(ConsoleError::TransportLost(format!(
                "{} is no longer alive",
                self.transport.describe()
            )))
        }
    }

    fn ingest(&mut self, chunk: Vec<u8>) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        trace!("Received {} bytes", chunk.len());
        self.summary.chunks += 1;
        self.summary.bytes += chunk.len() as u64;
        let lines = self.reassembler.feed(&chunk);
        self.append(lines)
    }

    fn append(&mut self, lines: Vec<CompletedLine>) -> Result<()> {
        let latest_seq = {
            let mut scrollback = self
                .scrollback
                .write()
                .map_err(|_| ConsoleError::InternalError("scrollback lock poisoned".to_string()))?;
            for line in lines {
                if line.lossy {
                    self.summary.decode_anomalies += 1;
                    if self.summary.decode_anomalies == 1 {
                        warn!("Target output contains invalid UTF-8; showing replacement characters");
                    } else {
                        debug!("Invalid UTF-8 in line {}", scrollback.latest_seq() + 1);
                    }
                }
                scrollback.append(line);
                self.summary.lines += 1;
            }
            scrollback.latest_seq()
        };

        let partial = if self.publish_partial {
            self.reassembler.partial().into_owned()
        } else {
            String::new()
        };
        self.progress.send_replace(Progress { latest_seq, partial });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{Capacity, ScrollbackBuffer};
    use crate::transport::ScriptedTransport;
    use std::time::Instant;

    fn texts(scrollback: &SharedScrollback) -> Vec<String> {
        let buffer = scrollback.read().unwrap();
        buffer
            .slice(1, buffer.latest_seq())
            .into_iter()
            .map(|line| line.text)
            .collect()
    }

    fn acquisition(
        transport: Arc<ScriptedTransport>,
    ) -> (AcquisitionLoop, SharedScrollback, watch::Receiver<Progress>) {
        let scrollback = ScrollbackBuffer::shared(Capacity::unbounded());
        let (progress_tx, progress_rx) = watch::channel(Progress::default());
        let acquisition = AcquisitionLoop::new(
            transport,
            LineReassembler::default(),
            scrollback.clone(),
            progress_tx,
            Duration::from_millis(10),
        );
        (acquisition, scrollback, progress_rx)
    }

    #[tokio::test]
    async fn test_hang_up_flushes_partial_and_reports_loss() {
        let transport = Arc::new(
            ScriptedTransport::default().with_chunks(["hello wor", "ld\nfoo\nba", "r\ntail"]),
        );
        transport.hang_up_when_drained();
        let (acquisition, scrollback, progress) = acquisition(transport);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = acquisition.run(shutdown_rx).await;
        assert!(matches!(result, Err(ConsoleError::TransportLost(_))));
        assert_eq!(texts(&scrollback), vec!["hello world", "foo", "bar", "tail"]);
        assert_eq!(progress.borrow().latest_seq, 4);
    }

    #[tokio::test]
    async fn test_shutdown_is_observed_within_one_read() {
        let transport = Arc::new(ScriptedTransport::default().with_chunks(["boot\n", "half"]));
        let (acquisition, scrollback, _progress) = acquisition(transport);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(acquisition.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let requested = Instant::now();
        shutdown_tx.send(true).unwrap();
        let summary = task.await.unwrap().unwrap();

        assert!(requested.elapsed() < Duration::from_millis(500));
        assert_eq!(summary.lines, 2);
        assert_eq!(summary.bytes, 9);
        assert_eq!(texts(&scrollback), vec!["boot", "half"]);
    }

    #[tokio::test]
    async fn test_read_error_ends_session() {
        let transport = Arc::new(ScriptedTransport::default().with_chunks(["ok\n"]));
        transport.push_read_failure("probe unplugged");
        let (acquisition, scrollback, _progress) = acquisition(transport);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let error = acquisition.run(shutdown_rx).await.unwrap_err();
        assert_eq!(error.to_string(), "Transport lost: probe unplugged");
        assert_eq!(texts(&scrollback), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_polling_respects_interval() {
        let interval = Duration::from_millis(20);
        let transport = Arc::new(ScriptedTransport::new(Cadence::FixedInterval(interval)));
        let (acquisition, _scrollback, _progress) = acquisition(transport.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(acquisition.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        // First tick fires immediately, then at most one read per interval
        assert!(transport.reads() <= 200 / 20 + 4, "polled {} times", transport.reads());
        assert!(transport.reads() >= 2);
    }

    #[tokio::test]
    async fn test_decode_anomalies_are_counted() {
        let transport = Arc::new(ScriptedTransport::default().with_chunks([&b"ok\n\xfe\xff\n"[..]]));
        transport.hang_up_when_drained();
        let (acquisition, scrollback, _progress) = acquisition(transport);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        assert!(acquisition.run(shutdown_rx).await.is_err());
        let buffer = scrollback.read().unwrap();
        let lines = buffer.slice(1, buffer.latest_seq());
        assert_eq!(lines.len(), 2);
        assert!(!lines[0].lossy);
        assert!(lines[1].lossy);
        assert_eq!(lines[1].text, "\u{fffd}\u{fffd}");
    }

    #[tokio::test]
    async fn test_partial_is_published() {
        let transport = Arc::new(ScriptedTransport::default().with_chunks(["line\nprompt> "]));
        let (acquisition, _scrollback, mut progress) = acquisition(transport);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(acquisition.run(shutdown_rx));

        progress.changed().await.unwrap();
        assert_eq!(
            *progress.borrow(),
            Progress { latest_seq: 1, partial: "prompt> ".to_string() }
        );
        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }
}
