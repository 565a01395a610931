//! Session lifecycle: one transport, one scrollback, and the tasks around them

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::acquisition::{AcquisitionLoop, AcquisitionSummary};
use crate::config::Config;
use crate::console::{
    run_relay, Capacity, ConsoleSurface, LineReassembler, Progress, RenderCommand, RenderLoop,
    Renderer, ScrollbackBuffer, SharedScrollback, WriteRelay,
};
use crate::error::{ConsoleError, Result};
use crate::transport::Transport;

const COMMAND_QUEUE: usize = 64;
const INPUT_QUEUE: usize = 64;

/// Cloneable handle used by front-ends to steer a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<RenderCommand>,
    input: mpsc::Sender<String>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    pub async fn send(&self, command: RenderCommand) {
        if self.commands.send(command).await.is_err() {
            debug!("Render loop already stopped");
        }
    }

    pub async fn pause(&self) {
        self.send(RenderCommand::Pause).await;
    }

    pub async fn resume(&self) {
        self.send(RenderCommand::Resume).await;
    }

    /// Queue a line for the target
    pub async fn submit(&self, text: impl Into<String>) {
        if self.input.send(text.into()).await.is_err() {
            debug!("Write relay already stopped");
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Receiver that changes once shutdown is requested
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// Which of the two long-running halves stopped first
enum Finished {
    Acquisition(Result<AcquisitionSummary>),
    Render(std::result::Result<Result<Renderer>, JoinError>),
}

/// What a finished session leaves behind
#[derive(Debug)]
pub struct SessionSummary {
    pub acquisition: AcquisitionSummary,
    /// Last sequence number revealed on the console
    pub revealed_seq: u64,
    /// Last sequence number in the scrollback
    pub latest_seq: u64,
}

pub struct Session {
    transport: Arc<dyn Transport>,
    scrollback: SharedScrollback,
    reassembler: LineReassembler,
    read_timeout: Duration,
    write_terminator: Vec<u8>,
    page_size: usize,
    reveal_on_exit: bool,
    show_partial: bool,
    commands: mpsc::Receiver<RenderCommand>,
    notices: mpsc::Sender<RenderCommand>,
    input: mpsc::Receiver<String>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Session {
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> (Self, SessionHandle) {
        let console = &config.console;
        let scrollback = ScrollbackBuffer::shared(Capacity {
            max_lines: console.max_lines,
            max_bytes: console.max_bytes,
        });
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
        let (shutdown_tx, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);

        let session = Self {
            transport,
            scrollback,
            reassembler: LineReassembler::new(
                console.terminator.as_bytes(),
                console.strip_carriage_return,
            ),
            read_timeout: Duration::from_millis(config.transport.read_timeout_ms),
            write_terminator: console.write_terminator.as_bytes().to_vec(),
            page_size: console.page_size,
            reveal_on_exit: console.reveal_on_exit,
            show_partial: console.show_partial,
            commands: command_rx,
            notices: command_tx.clone(),
            input: input_rx,
            shutdown: shutdown.clone(),
        };
        let handle = SessionHandle {
            commands: command_tx,
            input: input_tx,
            shutdown,
        };
        (session, handle)
    }

    /// The scrollback stays readable after the session ends
    pub fn scrollback(&self) -> SharedScrollback {
        self.scrollback.clone()
    }

    /// Run acquisition, rendering and the write relay until shutdown or transport loss.
    ///
    /// Returns `TransportLost` when the transport went away; everything that
    /// arrived before that is in the scrollback and has been handed to the
    /// surface.
    pub async fn run<S>(self, surface: S) -> Result<SessionSummary>
    where
        S: ConsoleSurface + 'static,
    {
        let (progress_tx, progress_rx) = watch::channel(Progress::default());

        let mut render = tokio::spawn(
            RenderLoop::new(surface, self.scrollback.clone())
                .page_size(self.page_size)
                .reveal_on_exit(self.reveal_on_exit)
                .show_partial(self.show_partial)
                .run(progress_rx, self.commands),
        );

        let relay = tokio::spawn(run_relay(
            WriteRelay::new(self.transport.clone(), &self.write_terminator),
            self.input,
            self.notices,
            self.shutdown.subscribe(),
        ));

        let acquisition = AcquisitionLoop::new(
            self.transport.clone(),
            self.reassembler,
            self.scrollback.clone(),
            progress_tx,
            self.read_timeout,
        )
        .publish_partial(self.show_partial)
        .run(self.shutdown.subscribe());
        tokio::pin!(acquisition);

        // The render loop only ends on its own when the surface fails
        let first = tokio::select! {
            outcome = &mut acquisition => Finished::Acquisition(outcome),
            rendered = &mut render => Finished::Render(rendered),
        };
        let (outcome, rendered) = match first {
            Finished::Acquisition(outcome) => (outcome, render.await),
            Finished::Render(rendered) => {
                warn!("Console output stopped, ending acquisition");
                self.shutdown.send_replace(true);
                (acquisition.await, rendered)
            }
        };

        // Stop the write path and every front-end
        self.shutdown.send_replace(true);
        if let Err(e) = relay.await {
            warn!("Write relay task failed: {}", e);
        }
        let renderer = match rendered {
            Ok(Ok(renderer)) => renderer,
            Ok(Err(e)) => {
                error!("Console output failed: {}", e);
                outcome?;
                return Err(e);
            }
            Err(e) => {
                error!("Render task failed: {}", e);
                outcome?;
                return Err(ConsoleError::InternalError(format!("render task failed: {}", e)));
            }
        };

        let latest_seq = self
            .scrollback
            .read()
            .map(|buffer| buffer.latest_seq())
            .map_err(|_| ConsoleError::InternalError("scrollback lock poisoned".to_string()))?;
        let revealed_seq = renderer.cursor();

        let acquisition = outcome?;
        info!(
            "Session ended: {} lines received, {} revealed",
            latest_seq, revealed_seq
        );
        Ok(SessionSummary {
            acquisition,
            revealed_seq,
            latest_seq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{Footer, Line, MemorySurface};
    use crate::transport::ScriptedTransport;
    use std::io;

    /// Surface whose output side has gone away, like a closed pipe
    struct ClosedPipe;

    impl ConsoleSurface for ClosedPipe {
        fn reveal(&mut self, _lines: &[Line]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader went away"))
        }

        fn history(&mut self, _lines: &[Line]) -> io::Result<()> {
            Ok(())
        }

        fn notice(&mut self, _message: &str) -> io::Result<()> {
            Ok(())
        }

        fn footer(&mut self, _footer: &Footer) -> io::Result<()> {
            Ok(())
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.transport.read_timeout_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_transport_loss_ends_session_after_rendering() {
        let transport = Arc::new(ScriptedTransport::default().with_chunks(["a\nb\n", "c"]));
        transport.hang_up_when_drained();
        let (session, _handle) = Session::new(&test_config(), transport);
        let surface = MemorySurface::new();

        let result = session.run(surface.clone()).await;
        assert!(matches!(result, Err(ConsoleError::TransportLost(_))));
        assert_eq!(surface.revealed_texts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_handle_shutdown_stops_session() {
        let transport = Arc::new(ScriptedTransport::default().with_chunks(["x\n"]));
        let (session, handle) = Session::new(&test_config(), transport);
        let scrollback = session.scrollback();
        let task = tokio::spawn(session.run(MemorySurface::new()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.shutdown();
        let summary = task.await.unwrap().unwrap();

        assert!(handle.is_shutdown());
        assert_eq!(summary.latest_seq, 1);
        assert_eq!(summary.revealed_seq, 1);
        assert_eq!(scrollback.read().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_surface_failure_ends_session() {
        // The transport stays alive, so only the output failure can end the run
        let transport = Arc::new(ScriptedTransport::default().with_chunks(["a\nb\ntail"]));
        let (session, handle) = Session::new(&test_config(), transport);
        let scrollback = session.scrollback();

        let result = tokio::time::timeout(Duration::from_secs(1), session.run(ClosedPipe))
            .await
            .expect("session kept reading after the surface failed");

        match result {
            Err(ConsoleError::IoError(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected result: {:?}", other.map(|s| s.latest_seq)),
        }
        assert!(handle.is_shutdown());
        assert_eq!(scrollback.read().unwrap().latest_seq(), 3);
    }
}
