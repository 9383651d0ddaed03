//! Terminal styling helpers

use owo_colors::{OwoColorize, Style, colors::css};

/// Whether stdout supports coloured output.
pub fn supports_color() -> bool {
    supports_color::on(supports_color::Stream::Stdout).is_some()
}

fn paint(text: &str, style: Style) -> String {
    if supports_color() {
        text.style(style).to_string()
    } else {
        text.to_string()
    }
}

/// Extension trait for colorizing output
pub trait Colorize {
    /// Color as success (green)
    fn success(&self) -> String;
    /// Color as warning (amber)
    fn warning(&self) -> String;
    /// Highlight as a heading (bold)
    fn heading(&self) -> String;
    /// Dim the text
    fn dim(&self) -> String;
}

impl<T: AsRef<str> + ?Sized> Colorize for T {
    fn success(&self) -> String {
        paint(self.as_ref(), Style::new().fg::<css::Green>())
    }

    fn warning(&self) -> String {
        paint(self.as_ref(), Style::new().fg::<css::Orange>())
    }

    fn heading(&self) -> String {
        paint(self.as_ref(), Style::new().bold())
    }

    fn dim(&self) -> String {
        paint(self.as_ref(), Style::new().dimmed())
    }
}
