use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Policy applied when a file was modified on both sides since the last sync.
///
/// `PreferNewer` is last-writer-wins by modification time; the local side
/// wins ties so the decision is a pure function of the two timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
pub enum ConflictPolicy {
    #[value(name = "prefer-newer")]
    PreferNewer,
    #[value(name = "prefer-local")]
    PreferLocal,
    #[value(name = "prefer-remote")]
    PreferRemote,
}
