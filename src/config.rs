//! Environment-driven configuration for the capture binary.

use std::env;
use std::path::PathBuf;

/// Deployment environment, selects the log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Human readable logs.
    Development,
    /// JSON logs.
    Production,
}

impl Environment {
    /// Name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    /// Read `ENVIRONMENT`; anything but `production`/`prod` is development.
    #[must_use]
    pub fn from_env() -> Self {
        Self::parse(env::var("ENVIRONMENT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_lowercase).as_deref() {
            Some("production" | "prod") => Self::Production,
            _ => Self::Development,
        }
    }
}

/// Which driver the binary runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Video4Linux2 device.
    V4l2,
    /// Synthetic frames, no hardware.
    Mock,
}

impl Backend {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_lowercase).as_deref() {
            Some("mock") => Self::Mock,
            _ => Self::V4l2,
        }
    }
}

/// Settings for one capture run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Log format.
    pub environment: Environment,
    /// Driver to use.
    pub backend: Backend,
    /// 1-based device index.
    pub camera_index: u32,
    /// Name of the processing shown next to the raw view; empty for none.
    pub processing: String,
    /// Frames to capture before exiting.
    pub frame_count: u32,
    /// Where to dump the last converted frame.
    pub dump_path: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            backend: Backend::V4l2,
            camera_index: 1,
            processing: String::new(),
            frame_count: 30,
            dump_path: None,
        }
    }
}

impl CaptureConfig {
    /// Read `ENVIRONMENT`, `CAMERA_BACKEND`, `CAMERA_INDEX`,
    /// `CAMERA_PROCESSING`, `FRAME_COUNT` and `DUMP_PATH`.
    ///
    /// Missing or unparsable values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let camera_index = lookup("CAMERA_INDEX")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.camera_index);

        let frame_count = lookup("FRAME_COUNT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.frame_count);

        Self {
            environment: Environment::parse(lookup("ENVIRONMENT").as_deref()),
            backend: Backend::parse(lookup("CAMERA_BACKEND").as_deref()),
            camera_index,
            processing: lookup("CAMERA_PROCESSING").unwrap_or_default(),
            frame_count,
            dump_path: lookup("DUMP_PATH")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> CaptureConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        CaptureConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(config_from(&[]), CaptureConfig::default());
    }

    #[test]
    fn test_reads_all_values() {
        let config = config_from(&[
            ("ENVIRONMENT", "Production"),
            ("CAMERA_BACKEND", "mock"),
            ("CAMERA_INDEX", "2"),
            ("CAMERA_PROCESSING", "edges"),
            ("FRAME_COUNT", "5"),
            ("DUMP_PATH", "/tmp/frame.txt"),
        ]);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.backend, Backend::Mock);
        assert_eq!(config.camera_index, 2);
        assert_eq!(config.processing, "edges");
        assert_eq!(config.frame_count, 5);
        assert_eq!(config.dump_path, Some(PathBuf::from("/tmp/frame.txt")));
    }

    #[test]
    fn test_bad_numbers_fall_back() {
        let config = config_from(&[("CAMERA_INDEX", "first"), ("FRAME_COUNT", "-1")]);
        assert_eq!(config.camera_index, 1);
        assert_eq!(config.frame_count, 30);
    }

    #[test]
    fn test_environment_names() {
        assert_eq!(Environment::parse(Some("prod")), Environment::Production);
        assert_eq!(Environment::parse(Some("staging")), Environment::Development);
        assert_eq!(Environment::Production.as_str(), "production");
    }
}
