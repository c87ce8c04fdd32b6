//! Structured JSONL logging for the Pulse mining engine
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines format for log aggregation (default)
//! - **User Context Injection**: Tag spans with the user the work is done for
//! - **File Rotation**: Daily/hourly log rotation via tracing-appender
//!
//! # Quick Start
//!
//! ```ignore
//! use pulse_logging::{PulseSubscriberBuilder, LogConfig};
//!
//! // What the `pulse` binary installs: warnings as JSONL on stderr
//! let _guard = PulseSubscriberBuilder::new()
//!     .with_config(LogConfig::cli())
//!     .init()?;
//!
//! // A host running the janitor: daily files, engine details at debug
//! let _guard = PulseSubscriberBuilder::new()
//!     .with_config(LogConfig::service("/var/log/pulse").with_target("pulse_mining", "debug"))
//!     .init()?;
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{
    ConsoleConfig, ConsoleFormat, ConsoleStream, FileConfig, JsonlConfig, LogConfig,
    PULSE_TARGETS, RotationStrategy,
};
pub use context::{UserContextData, UserContextGuard};
pub use layers::{UserContextExtension, UserContextLayer};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber was already installed
    #[error("Failed to install subscriber: {0}")]
    Init(#[from] TryInitError),

    /// The log file or directory could not be created
    #[error("Failed to open log file: {0}")]
    Io(#[from] std::io::Error),
}

/// Builder for configuring and initializing the logging subscriber
///
/// By default, console output uses JSONL on stdout. The presets on
/// [`LogConfig`] cover the CLI, development, services and tests.
#[derive(Debug, Clone, Default)]
pub struct PulseSubscriberBuilder {
    config: LogConfig,
}

impl PulseSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the base level; per-target directives still apply on top
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    pub fn with_console(mut self, console: ConsoleConfig) -> Self {
        self.config.console = console;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber globally
    ///
    /// Returns a guard that must be kept alive for the duration of the
    /// program when file output is enabled.
    pub fn init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.config.directives()));

        let mut layers: Vec<BoxedLayer> = vec![UserContextLayer::new().boxed()];
        let mut guard = None;

        if let Some(console) = self.console_layer() {
            layers.push(console);
        }
        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            layers.push(self.jsonl_layer(writer));
            guard = Some(file_guard);
        }

        Registry::default().with(layers).with(env_filter).try_init()?;
        Ok(guard)
    }

    fn console_layer(&self) -> Option<BoxedLayer> {
        let console = self.config.console;
        let layer = match (console.format, console.stream) {
            (ConsoleFormat::Off, _) => return None,
            (ConsoleFormat::Jsonl, ConsoleStream::Stdout) => self.jsonl_layer(std::io::stdout),
            (ConsoleFormat::Jsonl, ConsoleStream::Stderr) => self.jsonl_layer(std::io::stderr),
            (ConsoleFormat::Pretty, ConsoleStream::Stdout) => fmt::layer()
                .pretty()
                .with_ansi(console.ansi)
                .with_writer(std::io::stdout)
                .boxed(),
            (ConsoleFormat::Pretty, ConsoleStream::Stderr) => fmt::layer()
                .pretty()
                .with_ansi(console.ansi)
                .with_writer(std::io::stderr)
                .boxed(),
            (ConsoleFormat::Compact, ConsoleStream::Stdout) => fmt::layer()
                .compact()
                .with_ansi(console.ansi)
                .with_test_writer()
                .boxed(),
            (ConsoleFormat::Compact, ConsoleStream::Stderr) => fmt::layer()
                .compact()
                .with_ansi(console.ansi)
                .with_writer(std::io::stderr)
                .boxed(),
        };
        Some(layer)
    }

    fn jsonl_layer<W>(&self, writer: W) -> BoxedLayer
    where
        W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
    {
        let jsonl = &self.config.jsonl;
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(jsonl.include_spans)
            .flatten_event(jsonl.flatten_events)
            .with_file(jsonl.include_location)
            .with_line_number(jsonl.include_location)
            .with_writer(writer)
            .boxed()
    }
}

/// Non-blocking writer for the configured file; `Never` truncates a single file
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory)?;
    let rotation = match config.rotation {
        RotationStrategy::Never => {
            let path = config.directory.join(format!("{}.log", config.prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };
    let appender = RollingFileAppender::new(rotation, &config.directory, &config.prefix);
    Ok(tracing_appender::non_blocking(appender))
}
