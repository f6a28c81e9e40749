// src/terminal.rs

use crate::constants::FIXATION_TEXT;
use crate::error::{MidError, Result};
use crate::frontend::{AbortSignal, Frontend, KeyPress, Stimulus};
use crate::timing::{Clock, SystemClock};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::style::Print;
use crossterm::terminal::{self, ClearType};
use crossterm::{cursor, execute, queue};
use log::{debug, warn};
use std::io::{self, IsTerminal, Stdout, Write};
use std::time::Duration;

/// Full-screen text frontend. Images are shown by file name.
///
/// Raw mode swallows SIGINT, so Ctrl-C is read as a key and raises the
/// shared abort signal directly.
pub struct TerminalFrontend {
    out: Stdout,
    clock: SystemClock,
    abort: AbortSignal,
    active: bool,
}

impl TerminalFrontend {
    pub fn new(abort: AbortSignal) -> Result<Self> {
        let mut out = io::stdout();
        if !out.is_terminal() {
            return Err(MidError::Frontend("stdout is not a terminal".into()));
        }
        terminal::enable_raw_mode()?;
        execute!(out, terminal::EnterAlternateScreen, cursor::Hide)?;
        debug!("[Terminal] Raw mode on");
        Ok(TerminalFrontend {
            out,
            clock: SystemClock::new(),
            abort,
            active: true,
        })
    }

    fn draw_centered(&mut self, lines: &[String]) -> Result<()> {
        let (cols, rows) = terminal::size()?;
        queue!(self.out, terminal::Clear(ClearType::All))?;

        let top = (rows as usize).saturating_sub(lines.len()) / 2;
        for (i, line) in lines.iter().enumerate() {
            let width = line.chars().count();
            let col = (cols as usize).saturating_sub(width) / 2;
            queue!(
                self.out,
                cursor::MoveTo(col as u16, (top + i) as u16),
                Print(line)
            )?;
        }
        self.out.flush()?;
        Ok(())
    }
}

fn render(stimulus: &Stimulus) -> Vec<String> {
    match stimulus {
        Stimulus::Fixation => vec![FIXATION_TEXT.to_string()],
        Stimulus::Text(text) => text.lines().map(str::to_string).collect(),
        Stimulus::Image { path, caption } => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let mut lines = vec![format!("[{}]", name)];
            if let Some(caption) = caption {
                lines.push(String::new());
                lines.extend(caption.lines().map(str::to_string));
            }
            lines
        }
    }
}

/// Key names as they appear in `resp_keys` and `abort_key`.
pub fn key_name(code: KeyCode) -> String {
    match code {
        KeyCode::Char(' ') => "space".to_string(),
        KeyCode::Char(c) => c.to_lowercase().to_string(),
        KeyCode::Esc => "escape".to_string(),
        KeyCode::Enter => "return".to_string(),
        KeyCode::Tab => "tab".to_string(),
        KeyCode::Backspace => "backspace".to_string(),
        KeyCode::Left => "left".to_string(),
        KeyCode::Right => "right".to_string(),
        KeyCode::Up => "up".to_string(),
        KeyCode::Down => "down".to_string(),
        KeyCode::F(n) => format!("f{}", n),
        other => format!("{:?}", other).to_lowercase(),
    }
}

impl Frontend for TerminalFrontend {
    fn show(&mut self, stimulus: &Stimulus) -> Result<()> {
        self.draw_centered(&render(stimulus))
    }

    fn poll_keys(&mut self) -> Result<Vec<KeyPress>> {
        let mut keys = Vec::new();
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
                    warn!("[Terminal] Ctrl-C received");
                    self.abort.trigger();
                    continue;
                }
                keys.push(KeyPress {
                    key: key_name(key.code),
                    at: self.clock.now(),
                });
            }
        }
        Ok(keys)
    }

    fn clear_keys(&mut self) -> Result<()> {
        self.poll_keys().map(|_| ())
    }

    fn now(&self) -> Duration {
        self.clock.now()
    }

    fn sleep(&mut self, duration: Duration) {
        self.clock.sleep(duration);
    }

    fn close(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = execute!(self.out, cursor::Show, terminal::LeaveAlternateScreen) {
            warn!("[Terminal] Failed to leave alternate screen: {}", e);
        }
        if let Err(e) = terminal::disable_raw_mode() {
            warn!("[Terminal] Failed to disable raw mode: {}", e);
        }
        debug!("[Terminal] Restored");
    }
}

impl Drop for TerminalFrontend {
    fn drop(&mut self) {
        self.close();
    }
}
