//! Runtime configuration types.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where WAIT and GETTICK get their time from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    /// Milliseconds of real time
    #[default]
    Wall,
    /// Manual clock that jumps straight to the end of every WAIT
    Simulated,
}

/// Report output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Runtime configuration for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub clock: ClockMode,
    /// Stop after this many executed instructions (None = unlimited)
    pub max_steps: Option<u64>,
    /// Stop after this much wall time (None = unlimited)
    pub time_budget_ms: Option<u64>,
    /// Treat memory faults as fatal instead of logging and continuing
    pub halt_on_fault: bool,
    pub trace: bool,
    pub dump_memory: bool,
    /// Initial sensor values for the headless host, one per input port
    pub sensors: [f32; 4],
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            clock: ClockMode::Wall,
            max_steps: None,
            time_budget_ms: None,
            halt_on_fault: false,
            trace: false,
            dump_memory: false,
            sensors: [0.0; 4],
        }
    }
}

impl RuntimeConfig {
    /// Load a configuration file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = RuntimeConfig::parse("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.clock, ClockMode::Wall);
        assert!(!config.halt_on_fault);
    }

    #[test]
    fn test_parse_all_keys() {
        let config = RuntimeConfig::parse(
            r#"
clock = "simulated"
max_steps = 5000
time_budget_ms = 250
halt_on_fault = true
trace = true
dump_memory = true
sensors = [0.5, 0.0, 0.0, 120.0]
"#,
        )
        .unwrap();
        assert_eq!(config.clock, ClockMode::Simulated);
        assert_eq!(config.max_steps, Some(5000));
        assert_eq!(config.time_budget_ms, Some(250));
        assert!(config.halt_on_fault);
        assert!(config.trace);
        assert!(config.dump_memory);
        assert_eq!(config.sensors, [0.5, 0.0, 0.0, 120.0]);
    }

    #[test]
    fn test_parse_rejects_unknown_clock() {
        assert!(RuntimeConfig::parse(r#"clock = "lunar""#).is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let err = RuntimeConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("missing.toml"));

        let path = dir.path().join("bad.toml");
        fs::write(&path, "max_steps = \"many\"").unwrap();
        let err = RuntimeConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
