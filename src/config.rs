//! Resolver/cache tunables, loaded from an optional TOML file
//! with environment-variable overrides, library-level siblings of the
//! `--cache-dir`/`--cache-age`/`--verbose` CLI-level knobs a front-end
//! would expose, since the CLI itself is out of scope here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunables for the per-source local cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory holding per-source mirror clones and exports.
    pub cache_dir: PathBuf,
    /// How long a cached ref list is trusted before `SyncSourceFor` is
    /// forced regardless of gateway state.
    #[serde(with = "duration_secs")]
    pub max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_age: Duration::from_secs(60 * 60),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("depsolve-core-cache")
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Tunables for solver-level and VCS-driver behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub cache: CacheConfig,
    /// How long a VCS subprocess may go without stdout/stderr activity
    /// before being killed.
    #[serde(with = "duration_secs")]
    pub inactivity_timeout: Duration,
    /// Path to the `git` binary; defaults to resolving `git` on `PATH`.
    pub git_command: Option<String>,
    pub downgrade: bool,
    pub verbose: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            inactivity_timeout: Duration::from_secs(30),
            git_command: None,
            downgrade: false,
            verbose: false,
        }
    }
}

impl ResolverConfig {
    /// Loads a config from `path`, falling back to defaults for any field
    /// the file omits, then applying `DEPSOLVE_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| Error::FileSystem {
                path: path.to_path_buf(),
                error: e.kind(),
            })?;
            toml::from_str(&raw).map_err(|e| Error::Other(e.to_string().into()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("DEPSOLVE_CACHE_DIR") {
            self.cache.cache_dir = PathBuf::from(dir);
        }
        if let Ok(git) = std::env::var("DEPSOLVE_GIT_COMMAND") {
            self.git_command = Some(git);
        }
        if std::env::var("DEPSOLVE_VERBOSE").is_ok() {
            self.verbose = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_cache_dir() {
        let config = ResolverConfig::default();
        assert!(config.cache.cache_dir.ends_with("depsolve-core-cache"));
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_missing() {
        let config = ResolverConfig::load(Path::new("/nonexistent/depsolve.toml")).unwrap();
        assert_eq!(config.inactivity_timeout, Duration::from_secs(30));
    }
}
