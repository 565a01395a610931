//! Pausable reveal of scrollback lines
//!
//! [`Renderer`] is the pure follow/pause state machine. [`RenderLoop`] is the
//! task around it: it owns the surface, receives [`Progress`] from the
//! acquisition loop and [`RenderCommand`]s from the interaction layer, and is
//! the only place the reveal cursor and pause flag change.

use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use super::scrollback::SharedScrollback;
use super::surface::{ConsoleSurface, Footer};
use crate::error::{ConsoleError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RenderState {
    #[default]
    Following,
    Paused,
}

/// Inclusive range of sequence numbers to reveal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reveal {
    pub from: u64,
    pub to: u64,
}

#[derive(Debug, Default)]
pub struct Renderer {
    state: RenderState,
    cursor: u64,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Last revealed sequence number
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Lines appended up to `latest` that are not revealed yet
    pub fn withheld(&self, latest: u64) -> u64 {
        latest.saturating_sub(self.cursor)
    }

    /// New lines are available up to `latest`
    pub fn notify(&mut self, latest: u64) -> Option<Reveal> {
        if self.state == RenderState::Paused || latest <= self.cursor {
            return None;
        }
        let reveal = Reveal {
            from: self.cursor + 1,
            to: latest,
        };
        self.cursor = latest;
        Some(reveal)
    }

    /// Freeze the cursor at the last revealed line. Returns whether the state changed.
    pub fn pause(&mut self) -> bool {
        if self.state == RenderState::Paused {
            return false;
        }
        self.state = RenderState::Paused;
        true
    }

    /// Return to following, revealing everything withheld in one batch.
    /// A no-op while already following.
    pub fn resume(&mut self, latest: u64) -> Option<Reveal> {
        if self.state == RenderState::Following {
            return None;
        }
        self.state = RenderState::Following;
        self.notify(latest)
    }
}

/// Acquisition state published after every chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub latest_seq: u64,
    pub partial: String,
}

/// Messages from the interaction layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCommand {
    Pause,
    Resume,
    TogglePause,
    PageUp,
    PageDown,
    /// The input line being typed changed
    Input(String),
    /// Diagnostic to show on the console
    Notice(String),
}

pub struct RenderLoop<S: ConsoleSurface> {
    renderer: Renderer,
    surface: S,
    scrollback: SharedScrollback,
    page_size: u64,
    reveal_on_exit: bool,
    show_partial: bool,
    /// Last sequence number of the scrollback page on screen
    page_end: Option<u64>,
    latest: u64,
    partial: String,
    input: String,
}

impl<S: ConsoleSurface> RenderLoop<S> {
    pub fn new(surface: S, scrollback: SharedScrollback) -> Self {
        Self {
            renderer: Renderer::new(),
            surface,
            scrollback,
            page_size: 20,
            reveal_on_exit: true,
            show_partial: true,
            page_end: None,
            latest: 0,
            partial: String::new(),
            input: String::new(),
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1) as u64;
        self
    }

    pub fn reveal_on_exit(mut self, reveal_on_exit: bool) -> Self {
        self.reveal_on_exit = reveal_on_exit;
        self
    }

    pub fn show_partial(mut self, show_partial: bool) -> Self {
        self.show_partial = show_partial;
        self
    }

    /// Run until the acquisition side drops its progress sender
    pub async fn run(
        mut self,
        mut progress: watch::Receiver<Progress>,
        mut commands: mpsc::Receiver<RenderCommand>,
    ) -> Result<Renderer> {
        let mut commands_open = true;
        loop {
            tokio::select! {
                changed = progress.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let update = progress.borrow_and_update().clone();
                    self.on_progress(update)?;
                }
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command)?,
                    None => commands_open = false,
                },
            }
        }

        // Drain whatever was published between the last wake-up and the hang-up
        let last = progress.borrow().clone();
        self.on_progress(last)?;
        while let Ok(command) = commands.try_recv() {
            self.on_command(command)?;
        }
        if self.reveal_on_exit && self.renderer.state() == RenderState::Paused {
            debug!(
                "Releasing {} withheld lines on exit",
                self.renderer.withheld(self.latest)
            );
            self.resume()?;
        }
        self.partial.clear();
        self.redraw_footer()?;
        Ok(self.renderer)
    }

    fn on_progress(&mut self, progress: Progress) -> Result<()> {
        self.latest = progress.latest_seq;
        if let Some(reveal) = self.renderer.notify(self.latest) {
            self.reveal(reveal)?;
        }
        if self.show_partial {
            self.partial = progress.partial;
        }
        self.redraw_footer()
    }

    fn on_command(&mut self, command: RenderCommand) -> Result<()> {
        trace!("Render command: {:?}", command);
        match command {
            RenderCommand::Pause => self.pause()?,
            RenderCommand::Resume => self.resume()?,
            RenderCommand::TogglePause => match self.renderer.state() {
                RenderState::Following => self.pause()?,
                RenderState::Paused => self.resume()?,
            },
            RenderCommand::PageUp => self.page_up()?,
            RenderCommand::PageDown => self.page_down()?,
            RenderCommand::Input(text) => {
                self.input = text;
                self.redraw_footer()?;
            }
            RenderCommand::Notice(message) => {
                self.surface.notice(&message).map_err(ConsoleError::from)?;
            }
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if self.renderer.pause() {
            debug!("Paused at line {}", self.renderer.cursor());
            self.redraw_footer()?;
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        if self.renderer.state() == RenderState::Paused {
            self.page_end = None;
            if let Some(reveal) = self.renderer.resume(self.latest) {
                debug!("Resuming, revealing lines {}..={}", reveal.from, reveal.to);
                self.reveal(reveal)?;
            }
            self.redraw_footer()?;
        }
        Ok(())
    }

    fn page_up(&mut self) -> Result<()> {
        self.pause()?;
        let end = match self.page_end {
            Some(end) => end.saturating_sub(self.page_size),
            None => self.renderer.cursor(),
        };
        self.show_page(end)
    }

    fn page_down(&mut self) -> Result<()> {
        let Some(end) = self.page_end else {
            return Ok(());
        };
        let cursor = self.renderer.cursor();
        if end >= cursor {
            return Ok(());
        }
        self.show_page((end + self.page_size).min(cursor))
    }

    fn show_page(&mut self, end: u64) -> Result<()> {
        let lines = {
            let scrollback = self.read_scrollback()?;
            let oldest = scrollback.oldest_seq().unwrap_or(1);
            if end < oldest {
                Vec::new()
            } else {
                let start = end.saturating_sub(self.page_size - 1).max(oldest);
                scrollback.slice(start, end)
            }
        };
        match lines.last() {
            Some(last) => {
                self.page_end = Some(last.seq);
                self.surface.history(&lines).map_err(ConsoleError::from)
            }
            None => self
                .surface
                .notice("start of scrollback")
                .map_err(ConsoleError::from),
        }
    }

    fn reveal(&mut self, reveal: Reveal) -> Result<()> {
        let lines = self.read_scrollback()?.slice(reveal.from, reveal.to);
        let first = lines.first().map(|line| line.seq).unwrap_or(reveal.to + 1);
        if first > reveal.from {
            let missed = first - reveal.from;
            self.surface
                .notice(&format!("{} lines left scrollback before they were shown", missed))
                .map_err(ConsoleError::from)?;
        }
        self.surface.reveal(&lines).map_err(ConsoleError::from)
    }

    fn redraw_footer(&mut self) -> Result<()> {
        let footer = Footer {
            state: self.renderer.state(),
            withheld: self.renderer.withheld(self.latest),
            partial: self.partial.clone(),
            input: self.input.clone(),
        };
        self.surface.footer(&footer).map_err(ConsoleError::from)
    }

    fn read_scrollback(&self) -> Result<std::sync::RwLockReadGuard<'_, super::ScrollbackBuffer>> {
        self.scrollback
            .read()
            .map_err(|_| ConsoleError::InternalError("scrollback lock poisoned".to_string()))
    }
}
