//! Operator-facing console output: stage banners and ✓/✗ markers.
use std::io::{self, IsTerminal, Write};

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Whether stdout should carry ANSI colors.
pub fn color_enabled(no_color_flag: bool) -> bool {
    if no_color_flag || std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    io::stdout().is_terminal()
}

pub struct Console<W: Write> {
    out: W,
    color: bool,
}

impl<W: Write> Console<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("{code}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    /// `[n/total] title` progress banner.
    pub fn stage(&mut self, ordinal: u8, total: u8, title: &str) -> io::Result<()> {
        let banner = self.paint(BOLD, &format!("[{ordinal}/{total}] {title}"));
        writeln!(self.out, "{banner}")
    }

    /// Unnumbered banner, used for the final report.
    pub fn heading(&mut self, title: &str) -> io::Result<()> {
        let banner = self.paint(BOLD, &format!("=== {title} ==="));
        writeln!(self.out, "{banner}")
    }

    pub fn ok(&mut self, message: &str) -> io::Result<()> {
        let marker = self.paint(GREEN, "✓");
        writeln!(self.out, "{marker} {message}")
    }

    pub fn fail(&mut self, message: &str) -> io::Result<()> {
        let marker = self.paint(RED, "✗");
        writeln!(self.out, "{marker} {message}")
    }

    pub fn warn(&mut self, message: &str) -> io::Result<()> {
        let marker = self.paint(YELLOW, "!");
        writeln!(self.out, "{marker} {message}")
    }

    pub fn hint(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "  → {message}")
    }

    /// Raw collaborator output, newline-terminated.
    pub fn block(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes())?;
        if !text.is_empty() && !text.ends_with('\n') {
            writeln!(self.out)?;
        }
        self.out.flush()
    }
}
