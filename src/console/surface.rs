//! Output surfaces the render loop draws on

use crossterm::cursor::MoveToColumn;
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType};
use crossterm::queue;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use super::renderer::RenderState;
use super::scrollback::Line;

/// Status shown below the revealed output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Footer {
    pub state: RenderState,
    /// Lines appended but not yet revealed
    pub withheld: u64,
    /// In-progress line from the target
    pub partial: String,
    /// Text being typed for the target
    pub input: String,
}

impl Footer {
    pub fn render(&self) -> String {
        let mut text = String::new();
        if self.state == RenderState::Paused {
            text.push_str(&format!("[PAUSED +{}] ", self.withheld));
        }
        if !self.input.is_empty() {
            text.push_str("> ");
            text.push_str(&self.input);
        } else {
            text.push_str(&self.partial);
        }
        text
    }
}

pub trait ConsoleSurface: Send {
    /// Append newly revealed lines to the live output
    fn reveal(&mut self, lines: &[Line]) -> io::Result<()>;

    /// Show a page of scrollback without touching the live output position
    fn history(&mut self, lines: &[Line]) -> io::Result<()>;

    /// Show a diagnostic from the console itself
    fn notice(&mut self, message: &str) -> io::Result<()>;

    fn footer(&mut self, footer: &Footer) -> io::Result<()>;
}

/// Raw-mode terminal surface with a redrawn footer line
pub struct TerminalSurface<W: Write + Send> {
    out: W,
    timestamps: bool,
    footer: Footer,
}

impl TerminalSurface<io::Stdout> {
    pub fn stdout(timestamps: bool) -> Self {
        Self::new(io::stdout(), timestamps)
    }
}

impl<W: Write + Send> TerminalSurface<W> {
    pub fn new(out: W, timestamps: bool) -> Self {
        Self {
            out,
            timestamps,
            footer: Footer::default(),
        }
    }

    fn clear_footer(&mut self) -> io::Result<()> {
        queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine))
    }

    fn draw_footer(&mut self) -> io::Result<()> {
        let text = self.footer.render();
        if text.is_empty() {
            return self.out.flush();
        }
        let width = crossterm::terminal::size()
            .map(|(columns, _)| columns as usize)
            .unwrap_or(80);
        let visible: String = text.chars().take(width.saturating_sub(1)).collect();
        if self.footer.state == RenderState::Paused {
            queue!(self.out, SetAttribute(Attribute::Reverse), Print(visible), SetAttribute(Attribute::Reset))?;
        } else {
            queue!(self.out, Print(visible))?;
        }
        self.out.flush()
    }
}

impl<W: Write + Send> ConsoleSurface for TerminalSurface<W> {
    fn reveal(&mut self, lines: &[Line]) -> io::Result<()> {
        self.clear_footer()?;
        for line in lines {
            queue!(self.out, Print(line.display(self.timestamps)), Print("\r\n"))?;
        }
        self.draw_footer()
    }

    fn history(&mut self, lines: &[Line]) -> io::Result<()> {
        self.clear_footer()?;
        if let (Some(first), Some(last)) = (lines.first(), lines.last()) {
            queue!(
                self.out,
                SetAttribute(Attribute::Dim),
                Print(format!("-- scrollback {}..{} --\r\n", first.seq, last.seq))
            )?;
            for line in lines {
                queue!(self.out, Print("| "), Print(line.display(self.timestamps)), Print("\r\n"))?;
            }
            queue!(self.out, SetAttribute(Attribute::Reset))?;
        }
        self.draw_footer()
    }

    fn notice(&mut self, message: &str) -> io::Result<()> {
        self.clear_footer()?;
        queue!(
            self.out,
            SetForegroundColor(Color::Yellow),
            Print(format!("-- {} --", message)),
            ResetColor,
            Print("\r\n")
        )?;
        self.draw_footer()
    }

    fn footer(&mut self, footer: &Footer) -> io::Result<()> {
        self.footer = footer.clone();
        self.clear_footer()?;
        self.draw_footer()
    }
}

/// Line-oriented surface for pipes and dumb terminals; notices go to stderr
pub struct PlainSurface<W: Write + Send> {
    out: W,
    timestamps: bool,
}

impl PlainSurface<io::Stdout> {
    pub fn stdout(timestamps: bool) -> Self {
        Self::new(io::stdout(), timestamps)
    }
}

impl<W: Write + Send> PlainSurface<W> {
    pub fn new(out: W, timestamps: bool) -> Self {
        Self { out, timestamps }
    }
}

impl<W: Write + Send> ConsoleSurface for PlainSurface<W> {
    fn reveal(&mut self, lines: &[Line]) -> io::Result<()> {
        for line in lines {
            writeln!(self.out, "{}", line.display(self.timestamps))?;
        }
        self.out.flush()
    }

    fn history(&mut self, lines: &[Line]) -> io::Result<()> {
        for line in lines {
            writeln!(self.out, "| {}", line.display(self.timestamps))?;
        }
        self.out.flush()
    }

    fn notice(&mut self, message: &str) -> io::Result<()> {
        eprintln!("rtt-console: {}", message);
        Ok(())
    }

    fn footer(&mut self, _footer: &Footer) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryLog {
    revealed: Vec<Line>,
    history: Vec<Vec<Line>>,
    notices: Vec<String>,
    footer: Footer,
}

/// Surface recording everything it is asked to show; clones share the record
#[derive(Debug, Clone, Default)]
pub struct MemorySurface {
    log: Arc<Mutex<MemoryLog>>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_log<T>(&self, f: impl FnOnce(&mut MemoryLog) -> T) -> T {
        let mut log = self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut log)
    }

    pub fn revealed(&self) -> Vec<Line> {
        self.with_log(|log| log.revealed.clone())
    }

    pub fn revealed_seqs(&self) -> Vec<u64> {
        self.with_log(|log| log.revealed.iter().map(|line| line.seq).collect())
    }

    pub fn revealed_texts(&self) -> Vec<String> {
        self.with_log(|log| log.revealed.iter().map(|line| line.text.clone()).collect())
    }

    pub fn history_pages(&self) -> Vec<Vec<u64>> {
        self.with_log(|log| {
            log.history
                .iter()
                .map(|page| page.iter().map(|line| line.seq).collect())
                .collect()
        })
    }

    pub fn notices(&self) -> Vec<String> {
        self.with_log(|log| log.notices.clone())
    }

    pub fn footer(&self) -> Footer {
        self.with_log(|log| log.footer.clone())
    }
}

impl ConsoleSurface for MemorySurface {
    fn reveal(&mut self, lines: &[Line]) -> io::Result<()> {
        self.with_log(|log| log.revealed.extend_from_slice(lines));
        Ok(())
    }

    fn history(&mut self, lines: &[Line]) -> io::Result<()> {
        self.with_log(|log| log.history.push(lines.to_vec()));
        Ok(())
    }

    fn notice(&mut self, message: &str) -> io::Result<()> {
        self.with_log(|log| log.notices.push(message.to_string()));
        Ok(())
    }

    fn footer(&mut self, footer: &Footer) -> io::Result<()> {
        let footer = footer.clone();
        self.with_log(|log| log.footer = footer);
        Ok(())
    }
}
