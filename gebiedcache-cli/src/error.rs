//! CLI error type.

use std::fmt;

use gebiedcache::config::ConfigError;

/// Errors reported by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Configuration file or key problem.
    Config(String),
    /// Logging could not be set up.
    Logging(String),
    /// An HTTP client could not be created.
    Source(String),
    /// The async runtime could not be started.
    Runtime(String),
    /// Area codes that are not CBS buurt/wijk/gemeente codes.
    InvalidCodes(Vec<String>),
    /// Some areas could not be loaded.
    Unavailable { failed: usize, total: usize },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(msg) => write!(f, "Logging error: {}", msg),
            CliError::Source(msg) => write!(f, "Backend error: {}", msg),
            CliError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
            CliError::InvalidCodes(codes) => write!(
                f,
                "Not a CBS area code: {} (expected BUxxxxxxxx, WKxxxxxx or GMxxxx)",
                codes.join(", ")
            ),
            CliError::Unavailable { failed, total } => {
                write!(f, "{} of {} area(s) unavailable", failed, total)
            }
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}
