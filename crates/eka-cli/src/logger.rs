//! stderr logger for the `log` facade.
//!
//! Lines look like `[DEBUG] message`. The level comes from `-v` (repeatable)
//! or, without it, from `EKA_LOG` (`off|error|warn|info|debug|trace`).

use std::io::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Environment variable consulted when no `-v` is given
pub const LOG_ENV: &str = "EKA_LOG";

struct StderrLogger {
    level: LevelFilter,
    choice: ColorChoice,
}

fn level_color(level: Level) -> Color {
    match level {
        Level::Error => Color::Red,
        Level::Warn => Color::Yellow,
        Level::Info => Color::Green,
        Level::Debug => Color::Cyan,
        Level::Trace => Color::Magenta,
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut stderr = StandardStream::stderr(self.choice);
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(level_color(record.level()))).set_bold(true);
        let _ = stderr.set_color(&spec);
        let _ = write!(stderr, "[{}]", record.level());
        let _ = stderr.reset();
        let _ = writeln!(stderr, " {}", record.args());
    }

    fn flush(&self) {}
}

/// Level for a `-v` count, falling back to the environment value.
pub fn resolve_level(verbose: u8, env: Option<&str>) -> LevelFilter {
    match verbose {
        0 => env
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(LevelFilter::Warn),
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the logger. A second call is a no-op.
pub fn init(verbose: u8, choice: ColorChoice) {
    let env = std::env::var(LOG_ENV).ok();
    let level = resolve_level(verbose, env.as_deref());
    if log::set_boxed_logger(Box::new(StderrLogger { level, choice })).is_ok() {
        log::set_max_level(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_count_wins() {
        assert_eq!(resolve_level(1, Some("error")), LevelFilter::Info);
        assert_eq!(resolve_level(2, None), LevelFilter::Debug);
        assert_eq!(resolve_level(5, None), LevelFilter::Trace);
    }

    #[test]
    fn test_env_level() {
        assert_eq!(resolve_level(0, Some("debug")), LevelFilter::Debug);
        assert_eq!(resolve_level(0, Some("TRACE")), LevelFilter::Trace);
        assert_eq!(resolve_level(0, Some("off")), LevelFilter::Off);
    }

    #[test]
    fn test_default_level() {
        assert_eq!(resolve_level(0, None), LevelFilter::Warn);
        assert_eq!(resolve_level(0, Some("loud")), LevelFilter::Warn);
    }
}
