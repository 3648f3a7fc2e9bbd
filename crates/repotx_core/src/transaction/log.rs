//! Buffered per-attempt transaction log.

use super::options::LogLevel;
use std::cell::RefCell;
use std::fmt;
use std::time::Instant;

/// Statement log of one attempt.
///
/// Messages are buffered and emitted as one block when the attempt commits
/// or rolls back.
#[derive(Debug)]
pub struct TransactionLog {
    level: LogLevel,
    started: Instant,
    messages: RefCell<Vec<String>>,
}

impl TransactionLog {
    /// Creates an empty log keeping messages accepted by `level`.
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            started: Instant::now(),
            messages: RefCell::new(Vec::new()),
        }
    }

    /// Level of the log.
    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Records a statement-level message.
    pub fn debug(&self, message: impl fmt::Display) {
        self.record(LogLevel::Debug, message);
    }

    /// Records a summary message.
    pub fn info(&self, message: impl fmt::Display) {
        self.record(LogLevel::Info, message);
    }

    fn record(&self, at: LogLevel, message: impl fmt::Display) {
        if self.level.accepts(at) {
            let elapsed = self.started.elapsed().as_millis();
            self.messages
                .borrow_mut()
                .push(format!("[+{elapsed}ms] {message}"));
        }
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty()
    }

    /// Recorded messages.
    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }

    /// Renders every message on its own line, each starting with `prefix`.
    pub fn format(&self, prefix: &str) -> String {
        self.messages
            .borrow()
            .iter()
            .map(|message| format!("{prefix}{message}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_level_keeps_everything() {
        let log = TransactionLog::new(LogLevel::Debug);
        log.debug("select");
        log.info("commit");
        assert_eq!(log.messages().len(), 2);
        assert!(log.messages()[0].ends_with("select"));
    }

    #[test]
    fn info_level_drops_statements() {
        let log = TransactionLog::new(LogLevel::Info);
        log.debug("select");
        log.info("commit");
        assert_eq!(log.messages().len(), 1);
        assert!(log.messages()[0].ends_with("commit"));
    }

    #[test]
    fn off_level_keeps_nothing() {
        let log = TransactionLog::new(LogLevel::Off);
        log.info("commit");
        assert!(log.is_empty());
        assert_eq!(log.format("  "), "");
    }

    #[test]
    fn format_prefixes_lines() {
        let log = TransactionLog::new(LogLevel::Debug);
        log.debug("a");
        log.debug("b");
        let text = log.format("> ");
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|line| line.starts_with("> [+")));
    }
}
