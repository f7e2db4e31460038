use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables read once when an [`crate::fs::Fs`] is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsOptions {
    /// Refuse reads that are not at the current handle position
    pub no_seek: bool,
    /// Skip hash verification of fully read files
    pub no_checksum: bool,
    /// Reject every mutating operation
    pub read_only: bool,
    /// Report the parent directory's time instead of per-file mod times
    pub no_mod_time: bool,
    /// How long a directory listing stays valid
    #[serde(with = "duration_secs")]
    pub dir_cache_time: Duration,
    /// Change-notification poll interval, zero disables polling
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    pub dir_perms: u32,
    pub file_perms: u32,
}

impl Default for VfsOptions {
    fn default() -> Self {
        Self {
            no_seek: false,
            no_checksum: false,
            read_only: false,
            no_mod_time: false,
            dir_cache_time: Duration::from_secs(5),
            poll_interval: Duration::from_secs(60),
            dir_perms: 0o777,
            file_perms: 0o666,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Directory exposed by the local backend
    pub source: PathBuf,
    pub options: VfsOptions,
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("."),
            options: VfsOptions::default(),
            log_filter: String::from("info"),
        }
    }
}

impl MountConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: MountConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: MountConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}

/// Durations as (possibly fractional) seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let opts = VfsOptions::default();
        assert!(!opts.no_seek);
        assert!(!opts.no_checksum);
        assert!(!opts.read_only);
        assert!(!opts.no_mod_time);
        assert_eq!(opts.dir_cache_time, Duration::from_secs(5));
        assert_eq!(opts.poll_interval, Duration::from_secs(60));
        assert_eq!(opts.dir_perms, 0o777);
        assert_eq!(opts.file_perms, 0o666);
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
source = "/srv/data"
log_filter = "debug"

[options]
read_only = true
dir_cache_time = 0.5
poll_interval = 0
"#
        )
        .unwrap();

        let config = MountConfig::from_file(file.path()).unwrap();
        assert_eq!(config.source, PathBuf::from("/srv/data"));
        assert_eq!(config.log_filter, "debug");
        assert!(config.options.read_only);
        assert!(!config.options.no_seek);
        assert_eq!(config.options.dir_cache_time, Duration::from_millis(500));
        assert_eq!(config.options.poll_interval, Duration::ZERO);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{
                "source": "/mnt/remote",
                "options": {{ "no_checksum": true, "dir_cache_time": 30 }}
            }}"#
        )
        .unwrap();

        let config = MountConfig::from_file(file.path()).unwrap();
        assert_eq!(config.source, PathBuf::from("/mnt/remote"));
        assert!(config.options.no_checksum);
        assert_eq!(config.options.dir_cache_time, Duration::from_secs(30));
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_from_file_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        let result = MountConfig::from_file(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_negative_duration_rejected() {
        let result: Result<VfsOptions, _> = serde_json::from_str(r#"{"dir_cache_time": -1}"#);
        assert!(result.is_err());
    }
}
