//! Capture of `tracing` output.

use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tracing::Level;

/// Shared in-memory sink for formatted log lines.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl LogBuffer {
    /// Everything written so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }

    /// Lines containing `needle`.
    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_owned)
            .collect()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a thread-local subscriber that records events at `level`
/// and above, returning the result and the captured output.
pub fn capture_logs<T>(level: Level, f: impl FnOnce() -> T) -> (T, LogBuffer) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .without_time()
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, info};

    #[test]
    fn captures_events_at_or_above_level() {
        let ((), logs) = capture_logs(Level::INFO, || {
            debug!("hidden");
            info!(answer = 42, "visible");
        });

        assert!(logs.contents().contains("visible"));
        assert!(logs.contents().contains("answer=42"));
        assert!(logs.lines_containing("hidden").is_empty());
    }
}
