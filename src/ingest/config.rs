// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::sync::SyncOptions;

pub const ENV_CONFIG_PATH: &str = "VENVI_CONFIG_PATH";
pub const ENV_ADMIN_TOKEN: &str = "VENVI_ADMIN_TOKEN";

/// Sync and source settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub deadline_secs: u64,
    pub request_timeout_secs: u64,
    pub max_concurrency: usize,
    /// Empty = every known source.
    pub enabled: Vec<String>,
    pub base_urls: BTreeMap<String, String>,
    pub store_path: Option<PathBuf>,
    pub admin_token: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 6 * 3600,
            deadline_secs: 300,
            request_timeout_secs: 30,
            max_concurrency: 4,
            enabled: Vec::new(),
            base_urls: BTreeMap::new(),
            store_path: None,
            admin_token: None,
        }
    }
}

impl SyncConfig {
    pub fn is_enabled(&self, source: &str) -> bool {
        self.enabled.is_empty() || self.enabled.iter().any(|s| s.eq_ignore_ascii_case(source))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            deadline: Duration::from_secs(self.deadline_secs.max(1)),
            max_concurrency: self.max_concurrency.max(1),
        }
    }

    fn cleaned(mut self) -> Self {
        let mut seen = std::collections::BTreeSet::new();
        self.enabled = self
            .enabled
            .into_iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();
        self.admin_token = self
            .admin_token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        self
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = std::env::var(ENV_ADMIN_TOKEN) {
            let token = token.trim();
            if !token.is_empty() {
                self.admin_token = Some(token.to_string());
            }
        }
        self
    }
}

/// Load from an explicit path. Supports TOML or JSON formats.
pub fn load_from(path: &Path) -> Result<SyncConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sync config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg = parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing sync config {}", path.display()))?;
    Ok(cfg.with_env_overrides())
}

/// Load using env var + fallbacks:
/// 1) $VENVI_CONFIG_PATH
/// 2) config/venvi.toml
/// 3) config/venvi.json
/// 4) defaults
pub fn load_default() -> Result<SyncConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/venvi.toml");
    if toml_p.exists() {
        return load_from(&toml_p);
    }
    let json_p = PathBuf::from("config/venvi.json");
    if json_p.exists() {
        return load_from(&json_p);
    }
    Ok(SyncConfig::default().with_env_overrides())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<SyncConfig> {
    let looks_json = s.trim_start().starts_with('{');
    if hint_ext == "json" || looks_json {
        let cfg: SyncConfig = serde_json::from_str(s)?;
        return Ok(cfg.cleaned());
    }
    let cfg: SyncConfig = toml::from_str(s)?;
    Ok(cfg.cleaned())
}
