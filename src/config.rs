//! Configuration for wildscan.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (WILDSCAN_HOME, WILDSCAN_STORE, GEMINI_API_KEY)
//! 2. Config file (.wildscan/config.yaml)
//! 3. Defaults (~/.wildscan)
//!
//! Config file discovery:
//! - Searches current directory and parents for .wildscan/config.yaml
//! - Paths in config file are relative to the .wildscan/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::gemini::{DEFAULT_ENDPOINT, DEFAULT_MODEL};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".wildscan";

// ============================================================================
// File schema
// ============================================================================

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub collections: Option<Collections>,
    #[serde(default)]
    pub hashing: Option<HashingConfig>,
    #[serde(default)]
    pub enrichment: Option<EnrichmentConfig>,
    #[serde(default)]
    pub notifications: Option<NotificationsConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// Local store directory (relative to .wildscan/)
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HashingConfig {
    pub enabled: Option<bool>,
    pub fetch_timeout_seconds: Option<u64>,
    pub max_concurrent: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    pub system_alerts: Option<bool>,
    pub toast_limit: Option<usize>,
}

// ============================================================================
// Resolved settings
// ============================================================================

/// Names of the live collections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Collections {
    pub cases: String,
    pub evidence: String,
    pub case_status: String,
    pub case_reads: String,
    pub notifications: String,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            cases: "cases".to_string(),
            evidence: "evidence".to_string(),
            case_status: "case_status".to_string(),
            case_reads: "case_reads".to_string(),
            notifications: "notifications".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HashingSettings {
    /// When false, hashing fails with `HashingUnsupported`
    pub enabled: bool,
    pub fetch_timeout_seconds: u64,
    pub max_concurrent: usize,
}

impl Default for HashingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            fetch_timeout_seconds: 30,
            max_concurrent: 4,
        }
    }
}

impl HashingSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentSettings {
    pub model: String,
    pub endpoint: String,
    pub timeout_seconds: u64,

    /// Only ever taken from GEMINI_API_KEY
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_seconds: 20,
            api_key: None,
        }
    }
}

impl EnrichmentSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationSettings {
    pub system_alerts: bool,

    /// Most recent toasts kept on screen
    pub toast_limit: usize,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            system_alerts: true,
            toast_limit: 3,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Absolute path to wildscan home
    pub home: PathBuf,
    /// Local document store directory
    pub store_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub collections: Collections,
    pub hashing: HashingSettings,
    pub enrichment: EnrichmentSettings,
    pub notifications: NotificationSettings,
}

// ============================================================================
// Loading
// ============================================================================

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Resolve configuration from a start directory and an environment lookup
fn load_config_with(
    start: &Path,
    default_home: PathBuf,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let config_file = find_config_file(start);
    let file = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    // Relative paths in the file resolve against .wildscan/
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(start)
        .to_path_buf();

    let home = env("WILDSCAN_HOME")
        .map(PathBuf::from)
        .or_else(|| file.home.as_deref().map(|h| resolve_path(&config_dir, h)))
        .unwrap_or(default_home);

    let store_dir = env("WILDSCAN_STORE")
        .map(PathBuf::from)
        .or_else(|| file.store.dir.as_deref().map(|d| resolve_path(&config_dir, d)))
        .unwrap_or_else(|| home.join("store"));

    let hashing_defaults = HashingSettings::default();
    let hashing = match &file.hashing {
        Some(h) => HashingSettings {
            enabled: h.enabled.unwrap_or(hashing_defaults.enabled),
            fetch_timeout_seconds: h
                .fetch_timeout_seconds
                .unwrap_or(hashing_defaults.fetch_timeout_seconds),
            max_concurrent: h
                .max_concurrent
                .unwrap_or(hashing_defaults.max_concurrent)
                .max(1),
        },
        None => hashing_defaults,
    };

    let mut enrichment = EnrichmentSettings::default();
    if let Some(e) = &file.enrichment {
        if let Some(model) = &e.model {
            enrichment.model = model.clone();
        }
        if let Some(endpoint) = &e.endpoint {
            enrichment.endpoint = endpoint.clone();
        }
        if let Some(timeout) = e.timeout_seconds {
            enrichment.timeout_seconds = timeout;
        }
    }
    enrichment.api_key = env("GEMINI_API_KEY").filter(|k| !k.trim().is_empty());

    let notification_defaults = NotificationSettings::default();
    let notifications = match &file.notifications {
        Some(n) => NotificationSettings {
            system_alerts: n.system_alerts.unwrap_or(notification_defaults.system_alerts),
            toast_limit: n.toast_limit.unwrap_or(notification_defaults.toast_limit),
        },
        None => notification_defaults,
    };

    Ok(ResolvedConfig {
        home,
        store_dir,
        config_file,
        collections: file.collections.unwrap_or_default(),
        hashing,
        enrichment,
        notifications,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;

    load_config_with(&cwd, default_home, |key| std::env::var(key).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
