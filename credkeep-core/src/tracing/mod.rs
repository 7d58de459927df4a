//! Structured logging setup
//!
//! The library only emits `tracing` events; it never installs a subscriber
//! by itself. Applications and tests that want output call
//! [`init_tracing`] once at startup.
//!
//! Usernames appear only at debug level. Secret payloads are never logged.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Global flag indicating whether tracing has been initialized
static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Target used by every event this crate emits
pub const LOG_TARGET: &str = "credkeep_core";

/// Errors that can occur during tracing initialization
#[derive(Debug, Error)]
pub enum TracingError {
    /// Failed to initialize tracing subscriber
    #[error("Failed to initialize tracing: {0}")]
    InitializationFailed(String),

    /// Tracing already initialized
    #[error("Tracing has already been initialized")]
    AlreadyInitialized,

    /// Failed to create log file
    #[error("Failed to create log file: {0}")]
    FileCreationFailed(String),
}

/// Result type for tracing operations
pub type TracingResult<T> = Result<T, TracingError>;

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingLevel {
    /// Errors only
    Error,
    /// Errors and warnings
    Warn,
    /// Errors, warnings and lifecycle events (default)
    #[default]
    Info,
    /// Protocol exchanges, including usernames
    Debug,
    /// Everything
    Trace,
}

impl std::str::FromStr for TracingLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for TracingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// Output destination for log events
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingOutput {
    /// Standard output
    Stdout,
    /// Standard error
    #[default]
    Stderr,
    /// A log file, truncated on initialization
    File(PathBuf),
}

/// Configuration for [`init_tracing`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Level applied to this crate's events
    pub level: TracingLevel,
    /// Output destination
    pub output: TracingOutput,
    /// Custom filter directives; overrides `level` when set
    pub filter: Option<String>,
}

impl TracingConfig {
    /// Creates a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log level
    #[must_use]
    pub const fn with_level(mut self, level: TracingLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the output destination
    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    /// Sets custom filter directives
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Debug level on stdout, for local troubleshooting
    #[must_use]
    pub const fn development() -> Self {
        Self {
            level: TracingLevel::Debug,
            output: TracingOutput::Stdout,
            filter: None,
        }
    }

    /// Filter directives derived from this configuration
    #[must_use]
    pub fn directives(&self) -> String {
        self.filter
            .clone()
            .unwrap_or_else(|| format!("{LOG_TARGET}={}", self.level))
    }
}

/// Installs a global subscriber for the given configuration
///
/// # Errors
///
/// Returns an error if:
/// - Tracing has already been initialized
/// - The filter directives are invalid
/// - File output is configured but the file cannot be created
pub fn init_tracing(config: &TracingConfig) -> TracingResult<()> {
    if TRACING_INITIALIZED.load(Ordering::SeqCst) {
        return Err(TracingError::AlreadyInitialized);
    }

    let filter = EnvFilter::try_new(config.directives())
        .map_err(|e| TracingError::InitializationFailed(e.to_string()))?;

    let (writer, ansi) = match &config.output {
        TracingOutput::Stdout => (BoxMakeWriter::new(std::io::stdout), true),
        TracingOutput::Stderr => (BoxMakeWriter::new(std::io::stderr), true),
        TracingOutput::File(path) => {
            let file = std::fs::File::create(path)
                .map_err(|e| TracingError::FileCreationFailed(e.to_string()))?;
            (BoxMakeWriter::new(std::sync::Mutex::new(file)), false)
        }
    };

    // The flag is only claimed once nothing else can fail before try_init.
    if TRACING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(TracingError::AlreadyInitialized);
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(ansi)
                .with_writer(writer),
        )
        .try_init()
        .map_err(|e| {
            TRACING_INITIALIZED.store(false, Ordering::SeqCst);
            TracingError::InitializationFailed(e.to_string())
        })?;

    tracing::info!(level = %config.level, "Tracing initialized");
    Ok(())
}

/// Checks if tracing has been initialized
#[must_use]
pub fn is_tracing_initialized() -> bool {
    TRACING_INITIALIZED.load(Ordering::SeqCst)
}

/// Span names for the client's operations
pub mod span_names {
    /// Opening a transfer session
    pub const SESSION_OPEN: &str = "session.open";
    /// Closing a transfer session
    pub const SESSION_CLOSE: &str = "session.close";
    /// Binding a collection by name
    pub const COLLECTION_RESOLVE: &str = "collection.resolve";
    /// Showing a prompt and waiting for it
    pub const PROMPT_DRIVE: &str = "prompt.drive";
    /// Attribute search within the collection
    pub const ITEM_SEARCH: &str = "item.search";
    /// Loading one record
    pub const ITEM_LOAD: &str = "item.load";
    /// Creating or replacing one record
    pub const ITEM_SAVE: &str = "item.save";
    /// Deleting one record
    pub const ITEM_DELETE: &str = "item.delete";
    /// Enumerating every record of the collection
    pub const ITEM_LOAD_ALL: &str = "item.load_all";
    /// Building a client over a transport
    pub const CLIENT_CONNECT: &str = "client.connect";
    /// Releasing a client's session
    pub const CLIENT_CLOSE: &str = "client.close";
}
