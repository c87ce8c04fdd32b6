//! Logging presets for the engine, the CLI and long-running hosts
//!
//! A [`LogConfig`] turns into one `EnvFilter` directive string plus the set of
//! sinks to install. `RUST_LOG`, when set, replaces the directives entirely.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Crates of this workspace, in the order their directives are emitted
pub const PULSE_TARGETS: [&str; 4] = ["pulse_core", "pulse_storage", "pulse_mining", "pulse_cli"];

/// What to install and at which levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for every target without its own directive
    pub level: String,
    /// Per-target overrides, e.g. `pulse_mining = "debug"`
    pub targets: BTreeMap<String, String>,
    pub console: ConsoleConfig,
    /// Rolling JSONL file next to (or instead of) the console
    pub file: Option<FileConfig>,
    pub jsonl: JsonlConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            targets: BTreeMap::new(),
            console: ConsoleConfig::default(),
            file: None,
            jsonl: JsonlConfig::default(),
        }
    }
}

impl LogConfig {
    /// `pulse` CLI: warnings only, as JSONL on stderr so stdout stays readable
    pub fn cli() -> Self {
        Self {
            level: "warn".to_string(),
            console: ConsoleConfig {
                format: ConsoleFormat::Jsonl,
                stream: ConsoleStream::Stderr,
                ansi: false,
            },
            ..Self::default()
        }
    }

    /// Human-readable output with the workspace crates at `debug`
    ///
    /// Dependencies (redb, tokio) stay at `info`.
    pub fn development() -> Self {
        let mut config = Self {
            level: "info".to_string(),
            console: ConsoleConfig {
                format: ConsoleFormat::Pretty,
                stream: ConsoleStream::Stderr,
                ansi: true,
            },
            ..Self::default()
        };
        for target in PULSE_TARGETS {
            config = config.with_target(target, "debug");
        }
        config
    }

    /// Host process running the engine and its janitor: daily JSONL files only
    ///
    /// Per-activity debug lines from the engine are kept out; session
    /// lifecycle and cleanup passes log at `info`.
    pub fn service(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            level: "info".to_string(),
            console: ConsoleConfig {
                format: ConsoleFormat::Off,
                ..ConsoleConfig::default()
            },
            file: Some(FileConfig {
                directory: log_dir.into(),
                ..FileConfig::default()
            }),
            ..Self::default()
        }
        .with_target("pulse_storage", "warn")
    }

    /// Unit and integration tests: only the workspace crates, at `warn`
    pub fn testing() -> Self {
        Self {
            level: "off".to_string(),
            console: ConsoleConfig {
                format: ConsoleFormat::Compact,
                stream: ConsoleStream::Stdout,
                ansi: false,
            },
            ..Self::default()
        }
        .with_pulse_level("warn")
    }

    /// Override the level of one target
    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.targets.insert(target.into(), level.into());
        self
    }

    /// Set every workspace crate to `level`
    pub fn with_pulse_level(mut self, level: &str) -> Self {
        for target in PULSE_TARGETS {
            self = self.with_target(target, level);
        }
        self
    }

    /// `EnvFilter` directives: the base level first, then each target
    pub fn directives(&self) -> String {
        let mut directives = vec![self.level.clone()];
        directives.extend(
            self.targets
                .iter()
                .map(|(target, level)| format!("{}={}", target, level)),
        );
        directives.join(",")
    }
}

/// Where console lines go and how they look
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub format: ConsoleFormat,
    pub stream: ConsoleStream,
    /// Colors; only honored by the text formats
    pub ansi: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            format: ConsoleFormat::Jsonl,
            stream: ConsoleStream::Stdout,
            ansi: false,
        }
    }
}

impl ConsoleConfig {
    pub fn enabled(&self) -> bool {
        self.format != ConsoleFormat::Off
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleFormat {
    #[default]
    Jsonl,
    /// Multi-line, for a developer watching a simulation
    Pretty,
    /// One line per event, for test output
    Compact,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleStream {
    #[default]
    Stdout,
    Stderr,
}

/// Rolling log files, always JSONL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File name prefix; the appender adds the date or hour
    pub prefix: String,
    pub rotation: RotationStrategy,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "pulse-mining".to_string(),
            rotation: RotationStrategy::Daily,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Matches the daily activity counters, one file per mining day
    #[default]
    Daily,
    Hourly,
    /// Single `<prefix>.log`, truncated on start
    Never,
}

/// Shape of each JSON line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonlConfig {
    /// `user`, `kind` and friends at the top level instead of under `fields`
    pub flatten_events: bool,
    /// Enclosing spans, so a credit line carries the `record_activity` span
    pub include_spans: bool,
    pub include_location: bool,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            flatten_events: true,
            include_spans: true,
            include_location: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_preset_keeps_stdout_clean() {
        let config = LogConfig::cli();
        assert_eq!(config.directives(), "warn");
        assert_eq!(config.console.stream, ConsoleStream::Stderr);
        assert_eq!(config.console.format, ConsoleFormat::Jsonl);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_development_raises_workspace_crates_only() {
        let config = LogConfig::development();
        assert_eq!(
            config.directives(),
            "info,pulse_cli=debug,pulse_core=debug,pulse_mining=debug,pulse_storage=debug"
        );
        assert_eq!(config.console.format, ConsoleFormat::Pretty);
        assert!(config.console.ansi);
    }

    #[test]
    fn test_service_writes_daily_files() {
        let config = LogConfig::service("/var/log/pulse");
        assert!(!config.console.enabled());
        assert_eq!(config.directives(), "info,pulse_storage=warn");

        let file = config.file.unwrap();
        assert_eq!(file.directory, PathBuf::from("/var/log/pulse"));
        assert_eq!(file.prefix, "pulse-mining");
        assert_eq!(file.rotation, RotationStrategy::Daily);
    }

    #[test]
    fn test_testing_silences_dependencies() {
        let config = LogConfig::testing();
        assert!(config.directives().starts_with("off,"));
        assert!(config.directives().contains("pulse_mining=warn"));
        assert_eq!(config.console.format, ConsoleFormat::Compact);
    }

    #[test]
    fn test_target_override_replaces_previous() {
        let config = LogConfig::cli()
            .with_target("pulse_mining", "debug")
            .with_target("pulse_mining", "trace");
        assert_eq!(config.directives(), "warn,pulse_mining=trace");
    }

    #[test]
    fn test_partial_deserialize() {
        let config: LogConfig = serde_json::from_str(
            r#"{"level":"warn","targets":{"pulse_mining":"debug"},"console":{"format":"off"}}"#,
        )
        .unwrap();
        assert_eq!(config.directives(), "warn,pulse_mining=debug");
        assert!(!config.console.enabled());
        assert!(config.jsonl.flatten_events);
    }
}
