//! Configuration vault – reads/writes `~/.robowatch/config.toml`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use robowatch_engine::{AlarmPolicy, MonitorConfig};
use robowatch_middleware::SessionCredentials;
use serde::{Deserialize, Serialize};

/// Where fleet data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// The REST backend at `api_base_url`.
    #[default]
    Http,
    /// The in-process simulated fleet.
    Sim,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Http => write!(f, "http"),
            SourceKind::Sim => write!(f, "sim"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(SourceKind::Http),
            "sim" => Ok(SourceKind::Sim),
            other => Err(format!("unknown source {other:?} (expected http or sim)")),
        }
    }
}

/// Persisted user configuration stored in `~/.robowatch/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the fleet REST API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default)]
    pub source: SourceKind,

    #[serde(default = "default_interval_ms")]
    pub reconcile_interval_ms: u64,

    #[serde(default = "default_interval_ms")]
    pub alarm_poll_interval_ms: u64,

    /// How far back each alarm poll looks.
    #[serde(default = "default_alarm_horizon_secs")]
    pub alarm_horizon_secs: u64,

    /// How long an alarm stays on screen.
    #[serde(default = "default_alarm_display_ms")]
    pub alarm_display_ms: u64,

    #[serde(default = "default_max_in_flight_ticks")]
    pub max_in_flight_ticks: usize,

    /// Per-request timeout for the REST client.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Anti-forgery token sent as `X-CSRFToken` on writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,

    /// Raw `Cookie` header forwarded on writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_cookie: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| if v.is_some() { "<redacted>" } else { "<not set>" };
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field("source", &self.source)
            .field("reconcile_interval_ms", &self.reconcile_interval_ms)
            .field("alarm_poll_interval_ms", &self.alarm_poll_interval_ms)
            .field("alarm_horizon_secs", &self.alarm_horizon_secs)
            .field("alarm_display_ms", &self.alarm_display_ms)
            .field("max_in_flight_ticks", &self.max_in_flight_ticks)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("csrf_token", &redact(&self.csrf_token))
            .field("session_cookie", &redact(&self.session_cookie))
            .finish()
    }
}

fn default_api_base_url() -> String {
    "http://localhost:8000/api".to_string()
}
fn default_interval_ms() -> u64 {
    2_000
}
fn default_alarm_horizon_secs() -> u64 {
    300
}
fn default_alarm_display_ms() -> u64 {
    3_000
}
fn default_max_in_flight_ticks() -> usize {
    1
}
fn default_request_timeout_ms() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            source: SourceKind::default(),
            reconcile_interval_ms: default_interval_ms(),
            alarm_poll_interval_ms: default_interval_ms(),
            alarm_horizon_secs: default_alarm_horizon_secs(),
            alarm_display_ms: default_alarm_display_ms(),
            max_in_flight_ticks: default_max_in_flight_ticks(),
            request_timeout_ms: default_request_timeout_ms(),
            csrf_token: None,
            session_cookie: None,
        }
    }
}

impl Config {
    /// Engine timings derived from this config.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            reconcile_interval: Duration::from_millis(self.reconcile_interval_ms),
            alarm_poll_interval: Duration::from_millis(self.alarm_poll_interval_ms),
            alarm_policy: AlarmPolicy {
                horizon: Duration::from_secs(self.alarm_horizon_secs),
                display_duration: Duration::from_millis(self.alarm_display_ms),
            },
            max_in_flight_ticks: self.max_in_flight_ticks,
        }
    }

    pub fn session(&self) -> SessionCredentials {
        SessionCredentials {
            csrf_token: self.csrf_token.clone(),
            cookie: self.session_cookie.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Return the path to `~/.robowatch/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".robowatch").join("config.toml")
}

/// Load the config from disk with environment overrides applied.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    Ok(load_from(&config_path())?.map(|mut cfg| {
        apply_env_overrides(&mut cfg);
        cfg
    }))
}

/// The saved config, or the defaults, with environment overrides applied.
pub fn load_or_default() -> Result<Config, String> {
    match load()? {
        Some(cfg) => Ok(cfg),
        None => Ok(env_defaults()),
    }
}

/// The defaults with environment overrides applied.  Used when no config
/// file exists or the file cannot be read.
pub fn env_defaults() -> Config {
    let mut cfg = Config::default();
    apply_env_overrides(&mut cfg);
    cfg
}

/// Parse the file at `path` as-is.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `ROBOWATCH_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROBOWATCH_API_URL` | `api_base_url` |
/// | `ROBOWATCH_SOURCE` | `source` |
/// | `ROBOWATCH_RECONCILE_MS` | `reconcile_interval_ms` |
/// | `ROBOWATCH_ALARM_POLL_MS` | `alarm_poll_interval_ms` |
/// | `ROBOWATCH_ALARM_HORIZON_SECS` | `alarm_horizon_secs` |
/// | `ROBOWATCH_ALARM_DISPLAY_MS` | `alarm_display_ms` |
/// | `ROBOWATCH_CSRF_TOKEN` | `csrf_token` |
/// | `ROBOWATCH_SESSION_COOKIE` | `session_cookie` |
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ROBOWATCH_API_URL") {
        cfg.api_base_url = v;
    }
    if let Ok(v) = std::env::var("ROBOWATCH_SOURCE")
        && let Ok(source) = v.parse()
    {
        cfg.source = source;
    }
    override_u64("ROBOWATCH_RECONCILE_MS", &mut cfg.reconcile_interval_ms);
    override_u64("ROBOWATCH_ALARM_POLL_MS", &mut cfg.alarm_poll_interval_ms);
    override_u64("ROBOWATCH_ALARM_HORIZON_SECS", &mut cfg.alarm_horizon_secs);
    override_u64("ROBOWATCH_ALARM_DISPLAY_MS", &mut cfg.alarm_display_ms);
    if let Ok(v) = std::env::var("ROBOWATCH_CSRF_TOKEN") {
        cfg.csrf_token = Some(v);
    }
    if let Ok(v) = std::env::var("ROBOWATCH_SESSION_COOKIE") {
        cfg.session_cookie = Some(v);
    }
}

fn override_u64(var: &str, field: &mut u64) {
    if let Ok(v) = std::env::var(var)
        && let Ok(n) = v.trim().parse::<u64>()
    {
        *field = n;
    }
}

/// Save the config to disk, creating `~/.robowatch/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner-only directory (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // The file may hold session secrets: owner-only (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_debug_redacts_session_secrets() {
        let cfg = Config {
            csrf_token: Some("csrf-super-secret".into()),
            session_cookie: Some("sessionid=cookie-secret".into()),
            ..Config::default()
        };
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("csrf-super-secret"));
        assert!(!debug_str.contains("cookie-secret"));
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn config_debug_shows_not_set_for_missing_secrets() {
        let debug_str = format!("{:?}", Config::default());
        assert!(debug_str.contains("<not set>"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.alarm_horizon_secs, 300);
        assert_eq!(loaded.alarm_display_ms, 3_000);
        assert_eq!(loaded.reconcile_interval_ms, 2_000);
        assert!(loaded.csrf_token.is_none());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "source = \"sim\"\nalarm_display_ms = 1500\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.source, SourceKind::Sim);
        assert_eq!(loaded.alarm_display_ms, 1_500);
        assert_eq!(loaded.alarm_poll_interval_ms, 2_000);
        assert_eq!(loaded.max_in_flight_ticks, 1);
    }

    #[test]
    fn monitor_config_carries_timings() {
        let cfg = Config {
            reconcile_interval_ms: 500,
            alarm_horizon_secs: 60,
            alarm_display_ms: 1_000,
            ..Config::default()
        };
        let monitor = cfg.monitor_config();
        assert_eq!(monitor.reconcile_interval, Duration::from_millis(500));
        assert_eq!(monitor.alarm_poll_interval, Duration::from_secs(2));
        assert_eq!(monitor.alarm_policy.horizon, Duration::from_secs(60));
        assert_eq!(monitor.alarm_policy.display_duration, Duration::from_secs(1));
    }

    #[test]
    fn config_path_points_to_robowatch_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".robowatch"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn source_kind_parses_case_insensitively() {
        assert_eq!("SIM".parse::<SourceKind>(), Ok(SourceKind::Sim));
        assert_eq!(" http ".parse::<SourceKind>(), Ok(SourceKind::Http));
        assert!("grpc".parse::<SourceKind>().is_err());
    }

    #[test]
    fn apply_env_overrides_changes_api_url() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("ROBOWATCH_API_URL", "http://fleet-host:8000/api") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.api_base_url, "http://fleet-host:8000/api");
        unsafe { std::env::remove_var("ROBOWATCH_API_URL") };
    }

    #[test]
    fn env_defaults_honours_overrides() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("ROBOWATCH_ALARM_POLL_MS", "750") };
        let cfg = env_defaults();
        assert_eq!(cfg.alarm_poll_interval_ms, 750);
        assert_eq!(cfg.source, Config::default().source);
        unsafe { std::env::remove_var("ROBOWATCH_ALARM_POLL_MS") };
    }

    #[test]
    fn apply_env_overrides_changes_alarm_display() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("ROBOWATCH_ALARM_DISPLAY_MS", "4500") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.alarm_display_ms, 4_500);
        unsafe { std::env::remove_var("ROBOWATCH_ALARM_DISPLAY_MS") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_interval() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("ROBOWATCH_RECONCILE_MS", "fast") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.reconcile_interval_ms, 2_000);
        unsafe { std::env::remove_var("ROBOWATCH_RECONCILE_MS") };
    }

    #[test]
    fn apply_env_overrides_sets_csrf_token() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("ROBOWATCH_CSRF_TOKEN", "tok-123") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.session().csrf_token.as_deref(), Some("tok-123"));
        unsafe { std::env::remove_var("ROBOWATCH_CSRF_TOKEN") };
    }
}
