//! Forwarding of typed lines to the target

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::renderer::RenderCommand;
use crate::error::Result;
use crate::transport::Transport;

pub struct WriteRelay {
    transport: Arc<dyn Transport>,
    terminator: Vec<u8>,
    queue: VecDeque<Vec<u8>>,
}

impl WriteRelay {
    pub fn new(transport: Arc<dyn Transport>, terminator: &[u8]) -> Self {
        Self {
            transport,
            terminator: terminator.to_vec(),
            queue: VecDeque::new(),
        }
    }

    /// Queue one line; the terminator is appended here.
    /// Does nothing when the transport has no write path.
    pub fn submit(&mut self, text: &str) {
        if !self.transport.supports_write() {
            debug!("Dropping input, {} has no write path", self.transport.describe());
            return;
        }
        let mut entry = Vec::with_capacity(text.len() + self.terminator.len());
        entry.extend_from_slice(text.as_bytes());
        entry.extend_from_slice(&self.terminator);
        self.queue.push_back(entry);
    }

    /// Write queued entries in order, returning the number of bytes written.
    ///
    /// The entry that fails is dropped and the error returned; entries
    /// behind it stay queued for the next flush.
    pub async fn flush(&mut self) -> Result<usize> {
        if !self.transport.supports_write() {
            self.queue.clear();
            return Ok(0);
        }

        let mut total = 0;
        while let Some(entry) = self.queue.pop_front() {
            total += self.transport.write(&entry).await?;
        }
        Ok(total)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// Write path task: forwards submitted lines until shutdown or until the input side closes.
///
/// Failures are reported to the console as notices and never stop the task.
pub async fn run_relay(
    mut relay: WriteRelay,
    mut input: mpsc::Receiver<String>,
    notices: mpsc::Sender<RenderCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    if !relay.transport.supports_write() {
        info!("{} does not accept input; typed lines are ignored", relay.transport.describe());
    }

    loop {
        let line = tokio::select! {
            _ = shutdown.changed() => break,
            line = input.recv() => line,
        };
        let Some(line) = line else { break };
        relay.submit(&line);

        // A write stuck on a full link must not hold up shutdown
        let flushed = tokio::select! {
            _ = shutdown.changed() => break,
            flushed = relay.flush() => flushed,
        };
        match flushed {
            Ok(0) => {}
            Ok(n) => debug!("Relayed {} bytes to target", n),
            Err(e) => {
                warn!("{}", e);
                let _ = notices.send(RenderCommand::Notice(e.to_string())).await;
            }
        }
        if *shutdown.borrow() {
            break;
        }
    }

    if relay.pending() > 0 {
        debug!("Write relay stopping with {} unsent lines", relay.pending());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;

    #[test]
    fn test_submit_appends_terminator_and_flushes_in_order() {
        let transport = Arc::new(ScriptedTransport::default());
        let mut relay = WriteRelay::new(transport.clone(), b"\r\n");
        relay.submit("reset");
        relay.submit("status");
        assert_eq!(relay.pending(), 2);

        let written = tokio_test::block_on(relay.flush()).unwrap();
        assert_eq!(written, 15);
        assert_eq!(relay.pending(), 0);
        assert_eq!(
            transport.written(),
            vec![b"reset\r\n".to_vec(), b"status\r\n".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_failed_entry_is_dropped_and_rest_kept() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.fail_next_writes(1);
        let mut relay = WriteRelay::new(transport.clone(), b"\n");
        relay.submit("first");
        relay.submit("second");

        assert!(relay.flush().await.is_err());
        assert_eq!(relay.pending(), 1);
        assert_eq!(relay.flush().await.unwrap(), 7);
        assert_eq!(transport.written(), vec![b"second\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_unsupported_write_is_a_no_op() {
        let transport = Arc::new(ScriptedTransport::default().read_only());
        let mut relay = WriteRelay::new(transport.clone(), b"\n");
        relay.submit("ignored");
        assert_eq!(relay.pending(), 0);
        assert_eq!(relay.flush().await.unwrap(), 0);
        assert!(transport.written().is_empty());
    }

    #[tokio::test]
    async fn test_relay_task_reports_failures_as_notices() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.fail_next_writes(1);
        let relay = WriteRelay::new(transport.clone(), b"\n");
        let (input_tx, input_rx) = mpsc::channel(4);
        let (notice_tx, mut notice_rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_relay(relay, input_rx, notice_tx, shutdown_rx));

        input_tx.send("lost".to_string()).await.unwrap();
        input_tx.send("kept".to_string()).await.unwrap();
        drop(input_tx);
        task.await.unwrap();

        assert!(matches!(notice_rx.recv().await, Some(RenderCommand::Notice(_))));
        assert_eq!(transport.written(), vec![b"kept\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_a_stalled_write() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.stall_writes();
        let relay = WriteRelay::new(transport.clone(), b"\n");
        let (input_tx, input_rx) = mpsc::channel(4);
        let (notice_tx, _notice_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_relay(relay, input_rx, notice_tx, shutdown_rx));

        input_tx.send("stuck".to_string()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(std::time::Duration::from_millis(500), task)
            .await
            .expect("relay kept waiting on the write")
            .unwrap();
        assert!(transport.written().is_empty());
    }
}
