//! Display surface: plain engine text, colored status lines, screen clearing.

use std::io::{self, Stdout, Write};

use crossterm::{cursor::MoveTo, execute, terminal::Clear, terminal::ClearType};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Status,
    Warning,
    Error,
}

pub struct Printer<W: Write> {
    out: W,
    terminal: bool,
}

impl Printer<Stdout> {
    pub fn stdout() -> Self {
        let terminal = io::stdout().is_terminal();
        Self { out: io::stdout(), terminal }
    }
}

impl<W: Write> Printer<W> {
    /// `terminal` enables colors and real screen clearing.
    pub fn new(out: W, terminal: bool) -> Self {
        Self { out, terminal }
    }

    pub fn print(&mut self, tone: Tone, text: &str) {
        let _ = if self.terminal {
            match tone {
                Tone::Plain => writeln!(self.out, "{}", text),
                Tone::Status => writeln!(self.out, "{}", text.cyan()),
                Tone::Warning => writeln!(self.out, "{}", text.yellow()),
                Tone::Error => writeln!(self.out, "{}", text.red()),
            }
        } else {
            writeln!(self.out, "{}", text)
        };
    }

    pub fn line(&mut self, text: &str) {
        self.print(Tone::Plain, text);
    }

    pub fn status(&mut self, text: &str) {
        self.print(Tone::Status, text);
    }

    pub fn warning(&mut self, text: &str) {
        self.print(Tone::Warning, text);
    }

    pub fn error(&mut self, text: &str) {
        self.print(Tone::Error, text);
    }

    /// Writes without a newline and flushes, for prompts.
    pub fn prompt(&mut self, text: &str) {
        let _ = write!(self.out, "{}", text);
        let _ = self.out.flush();
    }

    pub fn clear_screen(&mut self) {
        if self.terminal {
            let _ = execute!(self.out, Clear(ClearType::All), Clear(ClearType::Purge), MoveTo(0, 0));
        }
    }

    pub fn flush(&mut self) {
        let _ = self.out.flush();
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
