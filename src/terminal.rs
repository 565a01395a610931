//! Interactive front-end: terminal modes and translation of key/mouse events
//!
//! Holding the right mouse button pauses the console and releasing it
//! resumes, so output can be read without it scrolling away. Everything the
//! user does here becomes a message on the [`SessionHandle`].

use anyhow::Result;
use crossterm::event::{
    DisableMouseCapture, EnableMouseCapture, Event, EventStream, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::ExecutableCommand;
use futures::StreamExt;
use std::io::{self, stdout, BufRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::console::RenderCommand;
use crate::session::SessionHandle;

const LINE_QUEUE: usize = 16;

/// Tracks which terminal modes were enabled so they can be undone
#[derive(Debug, Default)]
pub struct TerminalModes {
    raw_mode: bool,
    mouse_capture: bool,
}

impl TerminalModes {
    pub fn enable(mouse: bool) -> Result<Self> {
        let mut modes = Self::default();

        enable_raw_mode()?;
        modes.raw_mode = true;

        if mouse {
            match stdout().execute(EnableMouseCapture) {
                Ok(_) => modes.mouse_capture = true,
                Err(e) => warn!("Mouse capture unavailable: {}", e),
            }
        }
        Ok(modes)
    }

    /// Restore the terminal; safe to call more than once
    pub fn undo(&mut self) {
        if self.mouse_capture {
            if let Err(e) = stdout().execute(DisableMouseCapture) {
                warn!("Failed to disable mouse capture: {}", e);
            }
            self.mouse_capture = false;
        }
        if self.raw_mode {
            if let Err(e) = disable_raw_mode() {
                warn!("Failed to disable raw mode: {}", e);
            }
            self.raw_mode = false;
        }
    }
}

impl Drop for TerminalModes {
    fn drop(&mut self) {
        self.undo();
    }
}

/// What one terminal event asks the session to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Command(RenderCommand),
    Submit(String),
    Quit,
}

/// The line being typed for the target
#[derive(Debug, Default)]
pub struct InputLine {
    text: String,
}

impl InputLine {
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Map a terminal event to session actions, editing `input` as needed
pub fn translate(event: &Event, input: &mut InputLine) -> Vec<Action> {
    match event {
        Event::Key(key) => translate_key(key, input),
        Event::Mouse(mouse) => translate_mouse(mouse).into_iter().collect(),
        Event::Paste(text) => {
            input.text.push_str(text);
            vec![Action::Command(RenderCommand::Input(input.text.clone()))]
        }
        _ => Vec::new(),
    }
}

fn translate_key(key: &KeyEvent, input: &mut InputLine) -> Vec<Action> {
    if key.kind == KeyEventKind::Release {
        return Vec::new();
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match key.code {
        KeyCode::Char('c') if ctrl => vec![Action::Quit],
        KeyCode::Char('d') if ctrl && input.text.is_empty() => vec![Action::Quit],
        KeyCode::Char('s') if ctrl => vec![Action::Command(RenderCommand::Pause)],
        KeyCode::Char('q') if ctrl => vec![Action::Command(RenderCommand::Resume)],
        KeyCode::F(2) => vec![Action::Command(RenderCommand::TogglePause)],
        KeyCode::PageUp => vec![Action::Command(RenderCommand::PageUp)],
        KeyCode::PageDown => vec![Action::Command(RenderCommand::PageDown)],
        KeyCode::Enter => {
            let line = std::mem::take(&mut input.text);
            vec![
                Action::Submit(line),
                Action::Command(RenderCommand::Input(String::new())),
            ]
        }
        KeyCode::Backspace => {
            if input.text.pop().is_some() {
                vec![Action::Command(RenderCommand::Input(input.text.clone()))]
            } else {
                Vec::new()
            }
        }
        KeyCode::Esc if !input.text.is_empty() => {
            input.text.clear();
            vec![Action::Command(RenderCommand::Input(String::new()))]
        }
        KeyCode::Char(c) if !ctrl => {
            input.text.push(c);
            vec![Action::Command(RenderCommand::Input(input.text.clone()))]
        }
        _ => Vec::new(),
    }
}

fn translate_mouse(mouse: &MouseEvent) -> Option<Action> {
    let command = match mouse.kind {
        MouseEventKind::Down(MouseButton::Right) => RenderCommand::Pause,
        MouseEventKind::Up(MouseButton::Right) => RenderCommand::Resume,
        MouseEventKind::ScrollUp => RenderCommand::PageUp,
        MouseEventKind::ScrollDown => RenderCommand::PageDown,
        _ => return None,
    };
    Some(Action::Command(command))
}

/// Read terminal events and steer the session until quit or shutdown
pub async fn drive(handle: SessionHandle) {
    let mut events = EventStream::new();
    let mut shutdown = handle.shutdown_signal();
    let mut input = InputLine::default();

    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = events.next() => event,
        };

        let event = match event {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!("Terminal input error: {}", e);
                continue;
            }
            None => {
                debug!("Terminal event stream ended");
                break;
            }
        };

        for action in translate(&event, &mut input) {
            match action {
                Action::Command(command) => handle.send(command).await,
                Action::Submit(line) => handle.submit(line).await,
                Action::Quit => {
                    debug!("Quit requested from terminal");
                    handle.shutdown();
                    return;
                }
            }
        }
    }
}

/// Plain front-end: stdin lines go to the target, Ctrl-C quits
pub async fn drive_plain(handle: SessionHandle) {
    let lines = forward_lines(BufReader::new(std::io::stdin()));
    drive_lines(handle, lines).await;
}

/// Read lines on a detached thread.
///
/// A blocked read cannot be cancelled, so the thread is never joined and
/// shutdown does not wait for the reader. It ends on EOF, on a read error,
/// or once the receiver is gone.
pub fn forward_lines<R>(reader: R) -> mpsc::Receiver<io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_QUEUE);
    let spawned = std::thread::Builder::new()
        .name("stdin-lines".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to start stdin reader: {}", e);
    }
    rx
}

/// Forward received lines to the target until shutdown or Ctrl-C
pub async fn drive_lines(handle: SessionHandle, mut lines: mpsc::Receiver<io::Result<String>>) {
    let mut shutdown = handle.shutdown_signal();
    let mut input_open = true;

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                handle.shutdown();
                break;
            }
            line = lines.recv(), if input_open => match line {
                Some(Ok(line)) => handle.submit(line).await,
                Some(Err(e)) => {
                    warn!("Failed to read stdin: {}", e);
                    input_open = false;
                }
                None => input_open = false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::Session;
    use crate::transport::ScriptedTransport;
    use std::io::{Cursor, Read};
    use std::sync::Arc;
    use std::time::Duration;

    /// Reader whose read never returns within a test run, like an idle tty
    struct IdleTerminal;

    impl Read for IdleTerminal {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(Duration::from_secs(60));
            Ok(0)
        }
    }

    fn key(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent::new(code, modifiers))
    }

    fn mouse(kind: MouseEventKind) -> Event {
        Event::Mouse(MouseEvent {
            kind,
            column: 0,
            row: 0,
            modifiers: KeyModifiers::NONE,
        })
    }

    #[test]
    fn test_right_button_hold_pauses_and_release_resumes() {
        let mut input = InputLine::default();
        assert_eq!(
            translate(&mouse(MouseEventKind::Down(MouseButton::Right)), &mut input),
            vec![Action::Command(RenderCommand::Pause)]
        );
        assert_eq!(
            translate(&mouse(MouseEventKind::Up(MouseButton::Right)), &mut input),
            vec![Action::Command(RenderCommand::Resume)]
        );
        assert!(translate(&mouse(MouseEventKind::Down(MouseButton::Left)), &mut input).is_empty());
    }

    #[test]
    fn test_typing_and_enter_submit_a_line() {
        let mut input = InputLine::default();
        for c in "led on".chars() {
            translate(&key(KeyCode::Char(c), KeyModifiers::NONE), &mut input);
        }
        translate(&key(KeyCode::Backspace, KeyModifiers::NONE), &mut input);
        assert_eq!(input.text(), "led o");

        let actions = translate(&key(KeyCode::Enter, KeyModifiers::NONE), &mut input);
        assert_eq!(
            actions,
            vec![
                Action::Submit("led o".to_string()),
                Action::Command(RenderCommand::Input(String::new())),
            ]
        );
        assert_eq!(input.text(), "");
    }

    #[test]
    fn test_control_keys() {
        let mut input = InputLine::default();
        assert_eq!(
            translate(&key(KeyCode::Char('s'), KeyModifiers::CONTROL), &mut input),
            vec![Action::Command(RenderCommand::Pause)]
        );
        assert_eq!(
            translate(&key(KeyCode::Char('q'), KeyModifiers::CONTROL), &mut input),
            vec![Action::Command(RenderCommand::Resume)]
        );
        assert_eq!(
            translate(&key(KeyCode::Char('c'), KeyModifiers::CONTROL), &mut input),
            vec![Action::Quit]
        );
        assert_eq!(
            translate(&key(KeyCode::F(2), KeyModifiers::NONE), &mut input),
            vec![Action::Command(RenderCommand::TogglePause)]
        );
    }

    #[test]
    fn test_ctrl_d_only_quits_on_empty_input() {
        let mut input = InputLine::default();
        translate(&key(KeyCode::Char('x'), KeyModifiers::NONE), &mut input);
        assert!(translate(&key(KeyCode::Char('d'), KeyModifiers::CONTROL), &mut input).is_empty());
        translate(&key(KeyCode::Esc, KeyModifiers::NONE), &mut input);
        assert_eq!(
            translate(&key(KeyCode::Char('d'), KeyModifiers::CONTROL), &mut input),
            vec![Action::Quit]
        );
    }

    #[tokio::test]
    async fn test_forward_lines_reads_until_eof() {
        let mut lines = forward_lines(Cursor::new(b"help\nreset\n".to_vec()));
        assert_eq!(lines.recv().await.unwrap().unwrap(), "help");
        assert_eq!(lines.recv().await.unwrap().unwrap(), "reset");
        assert!(lines.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_for_blocked_stdin() {
        let transport = Arc::new(ScriptedTransport::default());
        let (_session, handle) = Session::new(&Config::default(), transport);
        let lines = forward_lines(BufReader::new(IdleTerminal));
        let front_end = tokio::spawn(drive_lines(handle.clone(), lines));

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();

        tokio::time::timeout(Duration::from_millis(500), front_end)
            .await
            .expect("front-end kept waiting on stdin")
            .unwrap();
    }

    #[tokio::test]
    async fn test_typed_lines_reach_the_target() {
        let transport = Arc::new(ScriptedTransport::default());
        let mut config = Config::default();
        config.transport.read_timeout_ms = 10;
        let (session, handle) = Session::new(&config, transport.clone());
        let task = tokio::spawn(session.run(crate::console::MemorySurface::new()));
        let lines = forward_lines(Cursor::new(b"led on\nled off\n".to_vec()));
        let front_end = tokio::spawn(drive_lines(handle.clone(), lines));

        for _ in 0..200 {
            if transport.written().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.shutdown();
        front_end.await.unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(
            transport.written(),
            vec![b"led on\n".to_vec(), b"led off\n".to_vec()]
        );
    }
}
