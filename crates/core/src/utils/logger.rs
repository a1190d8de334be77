use std::fmt::Display;

use chrono::Local;
use gshare_config::debug_enabled;

/// Leveled logger stamped per component. Info and debug go to stdout,
/// warnings and errors to stderr so the interactive prompts stay clean.
/// Debug lines are emitted only when GSHARE_DEBUG is set.
pub struct Logger {
    service: &'static str,
}

impl Logger {
    pub const fn new(service: &'static str) -> Self {
        Self { service }
    }

    fn line(&self, level: &str, msg: impl Display) -> String {
        format!(
            "[{}] {} {}: {}",
            self.service,
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            level,
            msg
        )
    }

    pub fn info(&self, msg: impl Display) {
        println!("{}", self.line("INFO", msg));
    }

    pub fn debug(&self, msg: impl Display) {
        if debug_enabled() {
            println!("{}", self.line("DEBUG", msg));
        }
    }

    pub fn warn(&self, msg: impl Display) {
        eprintln!("{}", self.line("WARN", msg));
    }

    pub fn error(&self, msg: impl Display) {
        eprintln!("{}", self.line("ERROR", msg));
    }
}
