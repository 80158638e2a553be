//! Client configuration and engine factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use quizsync_core::clock::SystemClock;
use quizsync_core::traits::{PersistentStore, TimeSource};
use quizsync_core::{EngineParts, SyncConfig, SyncEngine};

use crate::http::{HttpBackend, DEFAULT_TIMEOUT_SECS};
use crate::public_time::{WorldTimeSource, DEFAULT_PUBLIC_TIME_URL};
use crate::reachability::HttpReachability;

/// Connection to the quiz backend.
///
/// Note: Custom Debug impl masks credentials to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Project API key, sent as `apikey`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// The signed-in user's bearer token.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |s: &Option<String>| s.as_ref().map(|_| "***");
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &mask(&self.api_key))
            .field("access_token", &mask(&self.access_token))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            access_token: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Public fallback time service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeConfig {
    #[serde(default = "default_true")]
    pub use_public_fallback: bool,
    #[serde(default = "default_public_time_url")]
    pub public_url: String,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            use_public_fallback: true,
            public_url: default_public_time_url(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReachabilityConfig {
    /// URL probed by the polling fallback. Defaults to the backend base URL.
    #[serde(default)]
    pub probe_url: Option<String>,
}

/// Top-level quizsync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuizSyncConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub time: TimeConfig,
    #[serde(default)]
    pub reachability: ReachabilityConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_base_url() -> String {
    "http://localhost:54321/rest/v1".to_string()
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_true() -> bool {
    true
}
fn default_public_time_url() -> String {
    DEFAULT_PUBLIC_TIME_URL.to_string()
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Resolve env vars in every string the user may template.
fn resolve_config(config: &mut QuizSyncConfig) {
    let backend = &mut config.backend;
    backend.base_url = resolve_env_vars(&backend.base_url);
    backend.api_key = backend.api_key.as_deref().map(resolve_env_vars);
    backend.access_token = backend.access_token.as_deref().map(resolve_env_vars);
    config.time.public_url = resolve_env_vars(&config.time.public_url);
    config.reachability.probe_url = config
        .reachability
        .probe_url
        .as_deref()
        .map(resolve_env_vars);
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `quizsync.toml` in the current directory
/// 2. `~/.config/quizsync/config.toml`
///
/// Environment variable overrides: `QUIZSYNC_API_KEY`, `QUIZSYNC_ACCESS_TOKEN`,
/// `QUIZSYNC_BASE_URL`.
pub fn load_config() -> Result<QuizSyncConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<QuizSyncConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("quizsync.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<QuizSyncConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => QuizSyncConfig::default(),
    };

    // Apply env var overrides
    if let Ok(key) = std::env::var("QUIZSYNC_API_KEY") {
        config.backend.api_key = Some(key);
    }
    if let Ok(token) = std::env::var("QUIZSYNC_ACCESS_TOKEN") {
        config.backend.access_token = Some(token);
    }
    if let Ok(url) = std::env::var("QUIZSYNC_BASE_URL") {
        config.backend.base_url = url;
    }

    resolve_config(&mut config);
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("quizsync"))
}

/// Build the HTTP-backed engine described by `config` over `store`.
///
/// The engine is not started; call [`SyncEngine::start`] from inside a
/// runtime. The returned reachability handle receives the platform's
/// online/offline events.
pub fn connect(
    config: &QuizSyncConfig,
    store: Arc<dyn PersistentStore>,
) -> Result<(SyncEngine, Arc<HttpReachability>)> {
    let timeout = Duration::from_secs(config.backend.timeout_secs);
    let backend = Arc::new(HttpBackend::new(
        &config.backend.base_url,
        config.backend.api_key.clone(),
        config.backend.access_token.clone(),
        timeout,
    )?);

    let fallback_time: Option<Arc<dyn TimeSource>> = if config.time.use_public_fallback {
        Some(Arc::new(WorldTimeSource::new(&config.time.public_url, timeout)?))
    } else {
        None
    };

    let probe_url = config
        .reachability
        .probe_url
        .clone()
        .unwrap_or_else(|| config.backend.base_url.clone());
    let reachability = Arc::new(HttpReachability::new(&probe_url, timeout)?);

    let engine = SyncEngine::new(
        EngineParts {
            store,
            clock: Arc::new(SystemClock),
            sink: backend.clone(),
            leaderboard: backend.clone(),
            primary_time: backend,
            fallback_time,
            connectivity: reachability.clone(),
        },
        config.sync.clone(),
    );
    Ok((engine, reachability))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizsync_core::lock::LockWindow;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_QUIZSYNC_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_QUIZSYNC_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_QUIZSYNC_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        std::env::remove_var("_QUIZSYNC_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = QuizSyncConfig::default();
        assert_eq!(config.backend.timeout_secs, 15);
        assert!(config.time.use_public_fallback);
        assert_eq!(config.sync.leaderboard_size, 10);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[backend]
base_url = "https://example.supabase.co/rest/v1"
api_key = "anon"

[time]
use_public_fallback = false

[reachability]
probe_url = "https://example.supabase.co/health"

[sync]
lock_window = "daily"
poll_interval_secs = 60

[sync.scoring]
high_stakes_threshold = 2000
"#;
        let config: QuizSyncConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.backend.api_key.as_deref(), Some("anon"));
        assert!(!config.time.use_public_fallback);
        assert_eq!(config.sync.lock_window, LockWindow::Daily);
        assert_eq!(config.sync.poll_interval_secs, 60);
        assert_eq!(config.sync.scoring.high_stakes_threshold, 2000);
        assert_eq!(config.sync.scoring.penalty_per_wrong, 15);
    }

    #[test]
    fn load_explicit_path_resolves_env() {
        std::env::set_var("_QUIZSYNC_TEST_KEY", "from-env");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quizsync.toml");
        std::fs::write(&path, "[backend]\napi_key = \"${_QUIZSYNC_TEST_KEY}\"\n").unwrap();

        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.backend.api_key.as_deref(), Some("from-env"));
        std::env::remove_var("_QUIZSYNC_TEST_KEY");
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        assert!(load_config_from(Some(Path::new("/nonexistent/quizsync.toml"))).is_err());
    }

    #[test]
    fn debug_masks_credentials() {
        let backend = BackendConfig {
            api_key: Some("secret-key".into()),
            access_token: Some("secret-token".into()),
            ..BackendConfig::default()
        };
        let printed = format!("{backend:?}");
        assert!(!printed.contains("secret"));
        assert!(printed.contains("***"));
    }
}
