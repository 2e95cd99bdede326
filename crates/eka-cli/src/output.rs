//! Report formatting for the `eka` subcommands, written through `termcolor`.

use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Color mode for a `--color` value.
///
/// A set `NO_COLOR` turns color off whatever the flag says. Values other
/// than `always` and `never` leave the decision to terminal detection.
pub fn resolve_color_choice(flag: Option<&str>) -> ColorChoice {
    let no_color = std::env::var_os("NO_COLOR").is_some();
    match flag {
        _ if no_color => ColorChoice::Never,
        Some("always") => ColorChoice::Always,
        Some("never") => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

/// Styled writer for command reports on stdout.
pub struct StyledOutput {
    stdout: StandardStream,
}

impl StyledOutput {
    /// Writer on stdout using `choice`.
    pub fn new(choice: ColorChoice) -> Self {
        Self {
            stdout: StandardStream::stdout(choice),
        }
    }

    fn write_styled(&mut self, text: &str, color: Option<Color>, bold: bool) {
        let mut spec = ColorSpec::new();
        spec.set_fg(color).set_bold(bold);
        let _ = self.stdout.set_color(&spec);
        let _ = write!(self.stdout, "{}", text);
        let _ = self.stdout.reset();
    }

    /// Bold section title on its own line.
    pub fn heading(&mut self, text: &str) {
        self.write_styled(text, None, true);
        self.newline();
    }

    /// `label: value` row with the label dimmed and padded.
    pub fn field(&mut self, label: &str, value: impl std::fmt::Display) {
        self.write_styled(&format!("{:<18}", format!("{}:", label)), Some(Color::Cyan), false);
        let _ = writeln!(self.stdout, "{}", value);
    }

    /// Green bold line.
    pub fn success(&mut self, text: &str) {
        self.write_styled(text, Some(Color::Green), true);
        self.newline();
    }

    /// Yellow bold line.
    pub fn warning(&mut self, text: &str) {
        self.write_styled(text, Some(Color::Yellow), true);
        self.newline();
    }

    /// Plain line.
    pub fn line(&mut self, text: &str) {
        let _ = writeln!(self.stdout, "{}", text);
    }

    /// Newline.
    pub fn newline(&mut self) {
        let _ = writeln!(self.stdout);
    }

    /// Flush stdout.
    pub fn flush(&mut self) {
        let _ = self.stdout.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_flag() {
        if std::env::var_os("NO_COLOR").is_some() {
            assert_eq!(resolve_color_choice(Some("always")), ColorChoice::Never);
            return;
        }
        assert_eq!(resolve_color_choice(Some("always")), ColorChoice::Always);
        assert_eq!(resolve_color_choice(Some("never")), ColorChoice::Never);
        assert_eq!(resolve_color_choice(Some("auto")), ColorChoice::Auto);
        assert_eq!(resolve_color_choice(None), ColorChoice::Auto);
    }

    #[test]
    fn test_unrecognized_color_value_is_auto() {
        if std::env::var_os("NO_COLOR").is_some() {
            return;
        }
        assert_eq!(resolve_color_choice(Some("sometimes")), ColorChoice::Auto);
    }
}
