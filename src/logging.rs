// ============================================================================
// logging.rs — leveled console diagnostics
// ============================================================================
//
// The reference tool has no structured-logging crate; it prints
// "[LEVEL] message"-style banners straight to stdout/stderr, colored by
// severity. This module keeps that convention rather than introducing a
// `log`/`tracing` dependency the rest of the corpus doesn't reach for here.

use colored::Colorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Runtime verbosity: debug-level lines only show under `--verbose`;
/// info-level lines are suppressed under `--quiet`. Warnings and errors
/// always show.
#[derive(Debug, Clone, Copy)]
pub struct Verbosity {
    pub verbose: bool,
    pub quiet: bool,
}

impl Verbosity {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Verbosity { verbose, quiet }
    }

    fn shows(&self, level: Level) -> bool {
        match level {
            Level::Debug => self.verbose,
            Level::Info => !self.quiet,
            Level::Warn | Level::Error => true,
        }
    }

    pub fn log(&self, level: Level, message: &str) {
        if !self.shows(level) {
            return;
        }
        let line = match level {
            Level::Debug => format!("[DEBUG] {message}").dimmed().to_string(),
            Level::Info => format!("[INFO] {message}"),
            Level::Warn => format!("[WARN] {message}").yellow().to_string(),
            Level::Error => format!("[ERROR] {message}").red().to_string(),
        };
        if level >= Level::Warn {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(Level::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::Error, message.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_suppresses_info_not_warn() {
        let v = Verbosity::new(false, true);
        assert!(!v.shows(Level::Info));
        assert!(v.shows(Level::Warn));
        assert!(v.shows(Level::Error));
    }

    #[test]
    fn verbose_shows_debug() {
        let v = Verbosity::new(true, false);
        assert!(v.shows(Level::Debug));
    }

    #[test]
    fn default_hides_debug() {
        let v = Verbosity::new(false, false);
        assert!(!v.shows(Level::Debug));
        assert!(v.shows(Level::Info));
    }
}
