use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Automatic re-admission of failed tasks (optional section in config.toml).
///
/// Off by default: re-enqueueing a failed task is normally a caller decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRetryConfig {
    /// When false the section is ignored.
    pub enabled: bool,
    /// Base delay in seconds before the first automatic re-admission.
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for AutoRetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_delay_secs: 5.0,
            max_delay_secs: 300,
        }
    }
}

/// Global configuration loaded from `~/.config/datafetch/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum number of tasks transferring at the same time.
    pub max_concurrent_tasks: usize,
    /// Fallback cadence of the admission loop when no wake-up event arrives.
    pub admission_interval_secs: u64,
    /// Worker threads reserved for blocking protocol clients (FTP, SFTP).
    pub blocking_workers: usize,
    /// Read/write chunk size in bytes; cancellation is checked between chunks.
    pub chunk_size: usize,
    /// Emit a progress update at most once per this many bytes...
    pub progress_byte_interval: u64,
    /// ...or once per this many milliseconds, whichever comes first.
    pub progress_interval_ms: u64,
    /// Glob applied in directory mode when a task has no pattern of its own.
    pub default_filename_pattern: String,
    /// Connect timeout for every protocol.
    pub connect_timeout_secs: u64,
    /// Buffered progress events per notifier subscriber.
    pub notifier_capacity: usize,
    /// Optional auto-retry policy; if missing, failed tasks stay failed.
    #[serde(default)]
    pub auto_retry: Option<AutoRetryConfig>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            admission_interval_secs: 5,
            blocking_workers: 4,
            chunk_size: 8 * 1024,
            progress_byte_interval: 64 * 1024,
            progress_interval_ms: 500,
            default_filename_pattern: "*.nc".to_string(),
            connect_timeout_secs: 30,
            notifier_capacity: 256,
            auto_retry: None,
        }
    }
}

impl FetchConfig {
    pub fn admission_interval(&self) -> Duration {
        Duration::from_secs(self.admission_interval_secs.max(1))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// Auto-retry settings if the section is present and enabled.
    pub fn auto_retry_enabled(&self) -> Option<&AutoRetryConfig> {
        self.auto_retry.as_ref().filter(|r| r.enabled)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("datafetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FetchConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FetchConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: FetchConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = FetchConfig::default();
        assert_eq!(cfg.max_concurrent_tasks, 10);
        assert_eq!(cfg.chunk_size, 8192);
        assert_eq!(cfg.progress_byte_interval, 65536);
        assert_eq!(cfg.progress_interval_ms, 500);
        assert_eq!(cfg.default_filename_pattern, "*.nc");
        assert!(cfg.auto_retry_enabled().is_none());
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = FetchConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: FetchConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_concurrent_tasks, cfg.max_concurrent_tasks);
        assert_eq!(parsed.blocking_workers, cfg.blocking_workers);
        assert_eq!(parsed.default_filename_pattern, cfg.default_filename_pattern);
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            max_concurrent_tasks = 3
            admission_interval_secs = 1
            blocking_workers = 2
            chunk_size = 4096
            progress_byte_interval = 1024
            progress_interval_ms = 100
            default_filename_pattern = "*.grib2"
            connect_timeout_secs = 5
            notifier_capacity = 16
        "#;
        let cfg: FetchConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_concurrent_tasks, 3);
        assert_eq!(cfg.blocking_workers, 2);
        assert_eq!(cfg.default_filename_pattern, "*.grib2");
        assert!(cfg.auto_retry.is_none());
        assert_eq!(cfg.progress_interval(), Duration::from_millis(100));
    }

    #[test]
    fn config_toml_auto_retry_section() {
        let toml = r#"
            max_concurrent_tasks = 4
            admission_interval_secs = 5
            blocking_workers = 2
            chunk_size = 8192
            progress_byte_interval = 65536
            progress_interval_ms = 500
            default_filename_pattern = "*.nc"
            connect_timeout_secs = 30
            notifier_capacity = 64

            [auto_retry]
            enabled = true
            base_delay_secs = 0.5
            max_delay_secs = 15
        "#;
        let cfg: FetchConfig = toml::from_str(toml).unwrap();
        let retry = cfg.auto_retry_enabled().unwrap();
        assert!((retry.base_delay_secs - 0.5).abs() < 1e-9);
        assert_eq!(retry.max_delay_secs, 15);
    }

    #[test]
    fn disabled_auto_retry_is_ignored() {
        let mut cfg = FetchConfig::default();
        cfg.auto_retry = Some(AutoRetryConfig::default());
        assert!(cfg.auto_retry_enabled().is_none());
    }
}
