use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG: &str = "config.yml";
pub const DEFAULT_EXTRACT_FILE: &str = "extract.yml";
pub const DEFAULT_TIMEOUT_SECS: f64 = 60.0;
pub const ENV_VAR: &str = "TEST_ENV";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub base: BaseConfig,
    /// Environment name to base URL.
    #[serde(default)]
    pub environments: BTreeMap<String, String>,
    /// Seconds, used when a request does not set its own timeout.
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub extract_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseConfig {
    #[serde(default)]
    pub default_url: Option<String>,
}

impl Config {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Picks the base URL for `env`, falling back to `TEST_ENV` and then to
    /// `base.default_url`.
    pub fn base_url(&self, env: Option<&str>) -> anyhow::Result<Option<String>> {
        let from_env = std::env::var(ENV_VAR).ok().filter(|v| !v.trim().is_empty());
        self.base_url_for(env.map(str::to_string).or(from_env).as_deref())
    }

    fn base_url_for(&self, env: Option<&str>) -> anyhow::Result<Option<String>> {
        match env {
            Some(name) => match self.environments.get(name) {
                Some(url) => Ok(Some(url.clone())),
                None => bail!("unknown environment '{name}'"),
            },
            None => Ok(self.base.default_url.clone()),
        }
    }

    pub fn extract_file(&self) -> PathBuf {
        self.extract_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EXTRACT_FILE))
    }

    pub fn timeout(&self) -> anyhow::Result<Duration> {
        let secs = self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS).max(0.0);
        match Duration::try_from_secs_f64(secs) {
            Ok(timeout) => Ok(timeout),
            Err(err) => bail!("invalid timeout {secs}: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        serde_yaml::from_str(
            r#"
base:
  default_url: http://dev.example.com
environments:
  test: http://test.example.com
  prod: http://api.example.com
timeout: 5
"#,
        )
        .expect("valid config")
    }

    #[test]
    fn selects_named_environment() {
        let config = sample();
        assert_eq!(
            config.base_url_for(Some("prod")).expect("known env"),
            Some("http://api.example.com".to_string())
        );
        assert_eq!(
            config.base_url_for(None).expect("default"),
            Some("http://dev.example.com".to_string())
        );
        assert!(config.base_url_for(Some("staging")).is_err());
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = sample();
        assert_eq!(config.timeout().expect("timeout"), Duration::from_secs(5));
        assert_eq!(config.extract_file(), PathBuf::from(DEFAULT_EXTRACT_FILE));

        let empty = Config::default();
        assert_eq!(empty.timeout().expect("timeout"), Duration::from_secs(60));
        assert_eq!(empty.base_url_for(None).expect("default"), None);
    }

    #[test]
    fn oversized_timeout_is_an_error() {
        let config: Config = serde_yaml::from_str("timeout: 1e30\n").expect("valid config");
        assert!(config.timeout().is_err());

        let config: Config = serde_yaml::from_str("timeout: .inf\n").expect("valid config");
        assert!(config.timeout().is_err());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::load(&dir.path().join("nope.yml")).expect("defaults");
        assert!(config.environments.is_empty());

        let path = dir.path().join("config.yml");
        fs::write(&path, "extract_file: vars.yml\n").expect("write");
        let config = Config::load(&path).expect("parsed");
        assert_eq!(config.extract_file(), PathBuf::from("vars.yml"));
    }
}
