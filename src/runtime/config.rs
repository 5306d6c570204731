use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Engine switches. Loaded from the `[engine]` table of a TOML file and
/// adjustable through `GOFAST_*` environment variables.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct EngineConfig {
    /// Lower channel operations on predeclared element types to typed closures.
    pub native_fast_path: bool,
    /// Emit a `trace!` event for every executed instruction.
    pub trace: bool,
    /// Upper bound on instructions executed by one top-level call.
    pub max_steps: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            native_fast_path: true,
            trace: false,
            max_steps: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {error}")]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("invalid engine config: {message}")]
    Parse { message: String },
    #[error("invalid value `{value}` for {key}")]
    InvalidOverride { key: &'static str, value: String },
}

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    engine: EngineConfig,
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(|error| ConfigError::Parse {
            message: error.to_string(),
        })?;
        Ok(raw.engine)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup("GOFAST_NATIVE_FAST_PATH") {
            self.native_fast_path = parse_flag("GOFAST_NATIVE_FAST_PATH", &value)?;
        }
        if let Some(value) = lookup("GOFAST_TRACE") {
            self.trace = parse_flag("GOFAST_TRACE", &value)?;
        }
        if let Some(value) = lookup("GOFAST_MAX_STEPS").filter(|v| !v.trim().is_empty()) {
            let steps = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidOverride {
                    key: "GOFAST_MAX_STEPS",
                    value: value.clone(),
                })?;
            self.max_steps = Some(steps);
        }
        Ok(self)
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidOverride {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_enable_fast_path() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.native_fast_path);
    }

    #[test]
    fn loads_engine_table_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[engine]\nnative-fast-path = false\ntrace = true\nmax-steps = 500"
        )
        .unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert!(!config.native_fast_path);
        assert!(config.trace);
        assert_eq!(config.max_steps, Some(500));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = EngineConfig::from_toml_str("[engine]\nfast = true").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let err = EngineConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("engine.toml"));
    }

    #[test]
    fn environment_overrides_win() {
        let config = EngineConfig::default()
            .apply_overrides(|key| match key {
                "GOFAST_NATIVE_FAST_PATH" => Some("off".to_string()),
                "GOFAST_MAX_STEPS" => Some("42".to_string()),
                _ => None,
            })
            .unwrap();
        assert!(!config.native_fast_path);
        assert_eq!(config.max_steps, Some(42));

        let err = EngineConfig::default()
            .apply_overrides(|key| (key == "GOFAST_TRACE").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { key: "GOFAST_TRACE", .. }));
    }
}
