//! Configuration persistence
//!
//! Any serde-serializable settings struct can be loaded from or saved to a
//! `.toml` or `.ron` file through the [`Config`] trait.

use std::path::Path;

pub use serde::{Deserialize, Serialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        match Format::of(path)? {
            Format::Toml => toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            Format::Ron => ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
        }
    }

    /// Load configuration from file, falling back to defaults when the file
    /// does not exist yet
    fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            log::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match Format::of(path)? {
            Format::Toml => toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?,
            Format::Ron => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
        };

        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Ron,
}

impl Format {
    fn of(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("ron") => Ok(Self::Ron),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        samples: u32,
    }

    impl Config for Sample {}

    fn temp_path(file: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("viewer_engine_{}_{}", std::process::id(), file))
    }

    #[test]
    fn test_toml_and_ron_roundtrip() {
        let sample = Sample { name: "viewer".into(), samples: 4 };

        for file in ["sample.toml", "sample.ron"] {
            let path = temp_path(file);
            sample.save_to_file(&path).unwrap();
            let loaded = Sample::load_from_file(&path).unwrap();
            assert_eq!(loaded, sample);
            let _ = std::fs::remove_file(&path);
        }
    }

    #[test]
    fn test_unsupported_extension_rejected() {
        let err = Sample::default().save_to_file(temp_path("sample.json")).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let loaded = Sample::load_or_default(temp_path("does_not_exist.toml")).unwrap();
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn test_parse_error_reported() {
        let path = temp_path("broken.toml");
        std::fs::write(&path, "name = [unterminated").unwrap();
        let err = Sample::load_from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let _ = std::fs::remove_file(&path);
    }
}
