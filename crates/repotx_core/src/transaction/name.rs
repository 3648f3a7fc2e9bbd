//! Transaction names for logs and statistics.

use std::fmt;
use std::panic::Location;
use std::path::Path;

/// Name of a transaction: a short name for statistics and a log name that
/// may carry the call site line and a log context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxName {
    name: String,
    log_name: String,
}

impl TxName {
    /// Creates a name whose log name is the same string.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            log_name: name.clone(),
            name,
        }
    }

    /// Creates a name with a distinct log name.
    pub fn with_log_name(name: impl Into<String>, log_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log_name: log_name.into(),
        }
    }

    /// Short name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name used in log lines.
    pub fn log_name(&self) -> &str {
        &self.log_name
    }

    /// Returns a copy with `/context` appended to the log name.
    #[must_use]
    pub fn with_context(&self, context: Option<&str>) -> Self {
        match context {
            Some(context) => Self::with_log_name(&self.name, format!("{}/{context}", self.log_name)),
            None => self.clone(),
        }
    }
}

impl fmt::Display for TxName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.log_name)
    }
}

/// Derives transaction names from the call site of `tx()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TxNameGenerator {
    /// Source file stem, e.g. `transfer` with log name `transfer:42`.
    #[default]
    Short,
    /// Source path without extension, e.g. `src/bank/transfer:42`.
    Long,
    /// The constant name `tx`.
    Anonymous,
}

impl TxNameGenerator {
    /// Name for a transaction started at `location`.
    pub fn generate(self, location: &Location<'_>) -> TxName {
        let path = Path::new(location.file());
        let name = match self {
            Self::Anonymous => return TxName::new("tx"),
            Self::Short => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned()),
            Self::Long => Some(
                path.with_extension("")
                    .to_string_lossy()
                    .replace('\\', "/"),
            ),
        };
        let name = name.unwrap_or_else(|| location.file().to_owned());
        let log_name = format!("{name}:{}", location.line());
        TxName::with_log_name(name, log_name)
    }
}
