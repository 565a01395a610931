//! In-memory transport for running the console pipeline without hardware

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{Cadence, Transport};
use crate::error::{ConsoleError, Result};

#[derive(Debug)]
enum ReadStep {
    Data(Vec<u8>),
    Fail(String),
}

/// Transport that replays queued chunks and records writes.
///
/// Reads pop one queued step at a time; with nothing queued a read waits out
/// its timeout and returns an empty chunk, or reports a hang-up once
/// [`ScriptedTransport::hang_up_when_drained`] was requested.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<ReadStep>>,
    written: Mutex<Vec<Vec<u8>>>,
    write_failures: AtomicUsize,
    stall_writes: AtomicBool,
    alive: AtomicBool,
    hang_up_when_drained: AtomicBool,
    writable: bool,
    cadence: Cadence,
    reads: AtomicUsize,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new(Cadence::EventDriven)
    }
}

impl ScriptedTransport {
    pub fn new(cadence: Cadence) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            written: Mutex::new(Vec::new()),
            write_failures: AtomicUsize::new(0),
            stall_writes: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            hang_up_when_drained: AtomicBool::new(false),
            writable: true,
            cadence,
            reads: AtomicUsize::new(0),
        }
    }

    /// Transport without a write path
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn with_chunks<I, C>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        for chunk in chunks {
            self.push_chunk(chunk.as_ref());
        }
        self
    }

    pub fn push_chunk(&self, chunk: &[u8]) {
        self.lock_steps().push_back(ReadStep::Data(chunk.to_vec()));
    }

    /// Queue a read error; the transport reports itself dead when it is reached
    pub fn push_read_failure(&self, reason: &str) {
        self.lock_steps().push_back(ReadStep::Fail(reason.to_string()));
    }

    /// Report a hang-up once every queued chunk has been read
    pub fn hang_up_when_drained(&self) {
        self.hang_up_when_drained.store(true, Ordering::SeqCst);
    }

    /// Make the next `count` writes fail
    pub fn fail_next_writes(&self, count: usize) {
        self.write_failures.store(count, Ordering::SeqCst);
    }

    /// Make every following write wait forever, like a link that stopped draining
    pub fn stall_writes(&self) {
        self.stall_writes.store(true, Ordering::SeqCst);
    }

    /// Every successful write, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written
            .lock()
            .map(|written| written.clone())
            .unwrap_or_default()
    }

    /// Number of read calls so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn lock_steps(&self) -> std::sync::MutexGuard<'_, VecDeque<ReadStep>> {
        self.steps.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn describe(&self) -> String {
        "scripted transport".to_string()
    }

    fn cadence(&self) -> Cadence {
        self.cadence
    }

    fn supports_write(&self) -> bool {
        self.writable
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn read_available(&self, timeout: Duration) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.is_alive() {
            return Err(ConsoleError::TransportLost("scripted transport closed".to_string()));
        }

        let step = self.lock_steps().pop_front();
        match step {
            Some(ReadStep::Data(chunk)) => Ok(chunk),
            Some(ReadStep::Fail(reason)) => {
                self.alive.store(false, Ordering::SeqCst);
                Err(ConsoleError::TransportLost(reason))
            }
            None if self.hang_up_when_drained.load(Ordering::SeqCst) => {
                self.alive.store(false, Ordering::SeqCst);
                Ok(Vec::new())
            }
            None => {
                if self.cadence == Cadence::EventDriven {
                    tokio::time::sleep(timeout).await;
                }
                Ok(Vec::new())
            }
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<usize> {
        if self.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let failed = self
            .write_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ConsoleError::WriteFailed("scripted write failure".to_string()));
        }
        if let Ok(mut written) = self.written.lock() {
            written.push(bytes.to_vec());
        }
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_chunks_then_hangs_up() {
        let transport = ScriptedTransport::default().with_chunks(["a", "b"]);
        transport.hang_up_when_drained();
        let timeout = Duration::from_millis(1);
        assert_eq!(transport.read_available(timeout).await.unwrap(), b"a");
        assert_eq!(transport.read_available(timeout).await.unwrap(), b"b");
        assert!(transport.read_available(timeout).await.unwrap().is_empty());
        assert!(!transport.is_alive());
        assert_eq!(transport.reads(), 3);
    }

    #[tokio::test]
    async fn test_write_failures_are_counted_down() {
        let transport = ScriptedTransport::default();
        transport.fail_next_writes(1);
        assert!(transport.write(b"x").await.is_err());
        assert_eq!(transport.write(b"y").await.unwrap(), 1);
        assert_eq!(transport.written(), vec![b"y".to_vec()]);
    }
}
