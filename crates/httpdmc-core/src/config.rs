use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::wire::CurlOptions;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per ranged operation (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (0 = retry immediately).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_secs: 0.0,
            max_delay_secs: 5,
        }
    }
}

/// Global configuration loaded from `~/.config/httpdmc/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmcConfig {
    /// Upper bound on parallel streams per transfer.
    pub max_streams: usize,
    /// Streams used when the location does not ask for a count.
    pub default_streams: usize,
    /// Minimum bytes reserved per ranged request.
    pub chunk_size: u64,
    /// Location changes allowed per operation.
    pub max_redirects: u32,
    /// Cap on an HTML index body fetched for listing.
    pub listing_body_limit: u64,
    pub connect_timeout_secs: u64,
    /// Abort a request whose throughput stays below this many bytes/sec ...
    pub low_speed_limit: u32,
    /// ... for this many seconds.
    pub low_speed_time_secs: u64,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for DmcConfig {
    fn default() -> Self {
        Self {
            max_streams: 20,
            default_streams: 1,
            chunk_size: 1024 * 1024,
            max_redirects: 10,
            listing_body_limit: 10 * 1024 * 1024,
            connect_timeout_secs: 30,
            low_speed_limit: 1024,
            low_speed_time_secs: 60,
            retry: None,
        }
    }
}

impl DmcConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        let r = self.retry.clone().unwrap_or_default();
        RetryPolicy {
            max_attempts: r.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(r.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs(r.max_delay_secs),
        }
    }

    pub fn curl_options(&self) -> CurlOptions {
        CurlOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            low_speed_limit: self.low_speed_limit,
            low_speed_time: Duration::from_secs(self.low_speed_time_secs),
            timeout: None,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("httpdmc")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DmcConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DmcConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from(&path)
}

/// Load configuration from an explicit file.
pub fn load_from(path: &Path) -> Result<DmcConfig> {
    let data = fs::read_to_string(path)?;
    let cfg: DmcConfig = toml::from_str(&data)?;
    Ok(cfg)
}
