//! Configuration Vault – reads/writes `~/.memline/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use memline_runtime::SessionConfig;
use serde::{Deserialize, Serialize};

/// Persisted operator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the gateway serving the memory feeds and `/events`.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Wall-clock period of one playback tick, in milliseconds.
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,

    #[serde(default = "default_speed_multiplier")]
    pub speed_multiplier: f64,

    /// Number of live events kept for the events view.
    #[serde(default = "default_live_retention")]
    pub live_retention: usize,

    /// `limit` passed to each bulk feed request.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Select every newly arriving live entry.
    #[serde(default = "default_auto_select_live")]
    pub auto_select_live: bool,
}

fn default_gateway_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_tick_period_ms() -> u64 {
    1000
}
fn default_speed_multiplier() -> f64 {
    1.0
}
fn default_live_retention() -> usize {
    memline_engine::DEFAULT_RETENTION
}
fn default_fetch_limit() -> usize {
    100
}
fn default_reconnect_delay_ms() -> u64 {
    3000
}
fn default_auto_select_live() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            tick_period_ms: default_tick_period_ms(),
            speed_multiplier: default_speed_multiplier(),
            live_retention: default_live_retention(),
            fetch_limit: default_fetch_limit(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            auto_select_live: default_auto_select_live(),
        }
    }
}

impl Config {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tick_period: Duration::from_millis(self.tick_period_ms.max(1)),
            speed_multiplier: self.speed_multiplier,
            live_retention: self.live_retention,
            auto_select_live: self.auto_select_live,
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Return the path to `~/.memline/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".memline").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `MEMLINE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MEMLINE_GATEWAY_URL` | `gateway_url` |
/// | `MEMLINE_TICK_MS` | `tick_period_ms` |
/// | `MEMLINE_SPEED` | `speed_multiplier` |
///
/// Unparseable or out-of-range values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("MEMLINE_GATEWAY_URL")
        && !v.trim().is_empty()
    {
        cfg.gateway_url = v;
    }
    if let Ok(v) = std::env::var("MEMLINE_TICK_MS")
        && let Ok(ms) = v.parse::<u64>()
        && ms > 0
    {
        cfg.tick_period_ms = ms;
    }
    if let Ok(v) = std::env::var("MEMLINE_SPEED")
        && let Ok(speed) = v.parse::<f64>()
        && speed.is_finite()
        && speed > 0.0
    {
        cfg.speed_multiplier = speed;
    }
}

/// Save the config to disk, creating `~/.memline/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_custom_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            gateway_url: "http://robot:9000".into(),
            tick_period_ms: 250,
            auto_select_live: false,
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.tick_period_ms, 250);
        assert!(!loaded.auto_select_live);
        assert_eq!(loaded.live_retention, 50);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "fetch_limit = 10\n").unwrap();
        let loaded = load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.fetch_limit, 10);
        assert_eq!(loaded.reconnect_delay_ms, 3000);
    }

    #[test]
    fn garbage_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "gateway_url = [").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn config_path_points_to_memline_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".memline"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn session_config_converts_units() {
        let cfg = Config {
            tick_period_ms: 0,
            speed_multiplier: 2.0,
            ..Config::default()
        };
        let session = cfg.session_config();
        assert_eq!(session.tick_period, Duration::from_millis(1));
        assert_eq!(session.speed_multiplier, 2.0);
        assert_eq!(cfg.reconnect_delay(), Duration::from_secs(3));
    }

    #[test]
    fn env_overrides() {
        // SAFETY: the only test in this crate that touches MEMLINE_* vars.
        unsafe {
            std::env::set_var("MEMLINE_GATEWAY_URL", "http://gw:8181");
            std::env::set_var("MEMLINE_TICK_MS", "200");
            std::env::set_var("MEMLINE_SPEED", "-3");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.gateway_url, "http://gw:8181");
        assert_eq!(cfg.tick_period_ms, 200);
        assert_eq!(cfg.speed_multiplier, 1.0);
        unsafe {
            std::env::remove_var("MEMLINE_GATEWAY_URL");
            std::env::remove_var("MEMLINE_TICK_MS");
            std::env::remove_var("MEMLINE_SPEED");
        }
    }
}
