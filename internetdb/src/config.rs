use anyhow::{Context, Result};
use internetdb_core::{ReclaimMode, RefreshSettings, Schedule, SearchMode, StorageMode};
use serde::Deserialize;
use snapshot_fetch::{NetworkSettings, DEFAULT_UPSTREAM_URL};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG: &str = "internetdb.yaml";
pub const API_KEY_ENV: &str = "SHODAN_ENTERPRISE_API_KEY";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub api_key: Option<String>,
    pub upstream_url: String,
    pub refresh_schedule: String,
    pub less_storage_more_downtime: bool,
    pub minimize_database_size: bool,
    pub reclaim: ReclaimMode,
    pub enable_domain_and_cve_searching: bool,
    pub use_preformatted_database: bool,
    pub max_results: usize,
    pub log_level: Option<String>,
    pub minimum_free_bytes: Option<u64>,
    pub network: NetworkSettings,
}

impl Default for Config {
    fn default() -> Self {
        let defaults = RefreshSettings::default();
        Config {
            data_dir: PathBuf::from("data"),
            api_key: None,
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            refresh_schedule: "30d".to_string(),
            less_storage_more_downtime: true,
            minimize_database_size: defaults.minimize_database_size,
            reclaim: defaults.reclaim,
            enable_domain_and_cve_searching: false,
            use_preformatted_database: false,
            max_results: defaults.max_results,
            log_level: None,
            minimum_free_bytes: None,
            network: NetworkSettings::default(),
        }
    }
}

impl Config {
    /// The configured key wins; the environment is only a fallback.
    pub fn api_key(&self, env_key: Option<String>) -> Option<String> {
        [self.api_key.clone(), env_key]
            .into_iter()
            .flatten()
            .map(|k| k.trim().to_string())
            .find(|k| !k.is_empty())
    }

    pub fn refresh_settings(&self, env_key: Option<String>) -> Result<RefreshSettings> {
        let schedule: Schedule = self.refresh_schedule.parse().map_err(anyhow::Error::msg)?;
        let defaults = RefreshSettings::default();
        Ok(RefreshSettings {
            api_key: self.api_key(env_key),
            schedule,
            storage_mode: if self.less_storage_more_downtime { StorageMode::LowStorage } else { StorageMode::HighStorage },
            minimize_database_size: self.minimize_database_size,
            reclaim: self.reclaim,
            search_mode: SearchMode::from_full_text_flag(self.enable_domain_and_cve_searching),
            use_preformatted_database: self.use_preformatted_database,
            max_results: self.max_results,
            minimum_free_bytes: self.minimum_free_bytes.unwrap_or(defaults.minimum_free_bytes),
        })
    }
}

/// Loads the given file, or `./internetdb.yaml` when present, else defaults.
/// An explicitly named file must exist and parse.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if p.exists() { p.to_path_buf() } else { return Ok(Config::default()); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    if s.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_without_file() {
        let cfg = Config::default();
        let settings = cfg.refresh_settings(None).unwrap();
        assert_eq!(settings.storage_mode, StorageMode::LowStorage);
        assert_eq!(settings.search_mode, SearchMode::UniqueIp);
        assert_eq!(settings.schedule, Schedule::default());
        assert_eq!(settings.max_results, 30);
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn yaml_keys_map_to_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("internetdb.yaml");
        fs::write(
            &path,
            r#"
data_dir: /var/lib/internetdb
refresh_schedule: 12h
less_storage_more_downtime: false
reclaim: incremental
enable_domain_and_cve_searching: true
max_results: 5
minimum_free_bytes: 1000
network:
  proxy: http://proxy.local:3128
  reject_unauthorized: false
"#,
        )
        .unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/internetdb"));
        assert_eq!(cfg.network.proxy.as_deref(), Some("http://proxy.local:3128"));
        assert!(!cfg.network.reject_unauthorized);
        let settings = cfg.refresh_settings(None).unwrap();
        assert_eq!(settings.schedule, Schedule::Every(Duration::from_secs(43_200)));
        assert_eq!(settings.storage_mode, StorageMode::HighStorage);
        assert_eq!(settings.reclaim, ReclaimMode::Incremental);
        assert_eq!(settings.search_mode, SearchMode::FullText);
        assert_eq!(settings.max_results, 5);
        assert_eq!(settings.minimum_free_bytes, 1000);
    }

    #[test]
    fn configured_key_beats_environment() {
        let mut cfg = Config::default();
        assert_eq!(cfg.api_key(Some("env".into())).as_deref(), Some("env"));
        cfg.api_key = Some("  ".into());
        assert_eq!(cfg.api_key(Some("env".into())).as_deref(), Some("env"));
        cfg.api_key = Some("file".into());
        assert_eq!(cfg.api_key(Some("env".into())).as_deref(), Some("file"));
    }

    #[test]
    fn bad_schedule_is_rejected() {
        let cfg = Config { refresh_schedule: "0 0 1 * *".into(), ..Config::default() };
        assert!(cfg.refresh_settings(None).is_err());
    }

    #[test]
    fn missing_explicit_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.yaml"))).is_err());
    }
}
