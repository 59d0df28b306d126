use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub geocoder: GeocoderConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Locality REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Bearer token attached to every request when set.  How it is obtained
    /// is the auth layer's business.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    #[serde(default = "default_geocoder_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Player session timings and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_movement_check_secs")]
    pub movement_check_secs: u64,
    /// Euclidean displacement (degrees) that counts as having moved.
    #[serde(default = "default_movement_threshold_deg")]
    pub movement_threshold_deg: f64,
    #[serde(default = "default_pause_timeout_secs")]
    pub pause_timeout_secs: u64,
    #[serde(default = "default_debounce_ms")]
    pub radius_debounce_ms: u64,
    #[serde(default = "default_radius_km")]
    pub default_radius_km: f64,
}

/// Map grid and camera behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    #[serde(default = "default_grid_size_deg")]
    pub grid_size_deg: f64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Below this zoom level nothing is fetched and no pins are shown.
    #[serde(default = "default_min_fetch_zoom")]
    pub min_fetch_zoom: i32,
    #[serde(default = "default_debounce_ms")]
    pub region_debounce_ms: u64,
    /// Max camera drift (degrees) still considered "following the user".
    #[serde(default = "default_lock_tolerance_deg")]
    pub lock_tolerance_deg: f64,
    #[serde(default = "default_user_zoom_delta")]
    pub user_zoom_delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

impl SessionConfig {
    pub fn movement_check_interval(&self) -> Duration {
        Duration::from_secs(self.movement_check_secs)
    }

    pub fn pause_timeout(&self) -> Duration {
        Duration::from_secs(self.pause_timeout_secs)
    }

    pub fn radius_debounce(&self) -> Duration {
        Duration::from_millis(self.radius_debounce_ms)
    }
}

impl MapConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn region_debounce(&self) -> Duration {
        Duration::from_millis(self.region_debounce_ms)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: default_geocoder_base_url(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            movement_check_secs: default_movement_check_secs(),
            movement_threshold_deg: default_movement_threshold_deg(),
            pause_timeout_secs: default_pause_timeout_secs(),
            radius_debounce_ms: default_debounce_ms(),
            default_radius_km: default_radius_km(),
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            grid_size_deg: default_grid_size_deg(),
            cache_ttl_secs: default_cache_ttl_secs(),
            min_fetch_zoom: default_min_fetch_zoom(),
            region_debounce_ms: default_debounce_ms(),
            lock_tolerance_deg: default_lock_tolerance_deg(),
            user_zoom_delta: default_user_zoom_delta(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_geocoder_base_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_user_agent() -> String {
    concat!("tunemap/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_movement_check_secs() -> u64 {
    300
}

fn default_movement_threshold_deg() -> f64 {
    0.001
}

fn default_pause_timeout_secs() -> u64 {
    300
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_radius_km() -> f64 {
    2.0
}

fn default_grid_size_deg() -> f64 {
    0.1
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_min_fetch_zoom() -> i32 {
    10
}

fn default_lock_tolerance_deg() -> f64 {
    0.0005
}

fn default_user_zoom_delta() -> f64 {
    0.02
}

fn default_volume() -> f32 {
    0.5
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the grid and session maths cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let map = &self.map;
        anyhow::ensure!(
            map.grid_size_deg.is_finite() && map.grid_size_deg > 0.0,
            "[map] grid_size_deg must be a positive number, got {}",
            map.grid_size_deg
        );
        anyhow::ensure!(map.cache_ttl_secs > 0, "[map] cache_ttl_secs must be at least 1");
        anyhow::ensure!(
            map.lock_tolerance_deg.is_finite() && map.lock_tolerance_deg >= 0.0,
            "[map] lock_tolerance_deg must be zero or more, got {}",
            map.lock_tolerance_deg
        );
        anyhow::ensure!(
            map.user_zoom_delta.is_finite() && map.user_zoom_delta > 0.0,
            "[map] user_zoom_delta must be a positive number, got {}",
            map.user_zoom_delta
        );

        let session = &self.session;
        anyhow::ensure!(
            session.default_radius_km.is_finite() && session.default_radius_km > 0.0,
            "[session] default_radius_km must be a positive number, got {}",
            session.default_radius_km
        );
        anyhow::ensure!(
            session.movement_threshold_deg.is_finite() && session.movement_threshold_deg >= 0.0,
            "[session] movement_threshold_deg must be zero or more, got {}",
            session.movement_threshold_deg
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.mpv.default_volume),
            "[mpv] default_volume must be within 0..=1, got {}",
            self.mpv.default_volume
        );
        Ok(())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8990);
        assert_eq!(config.session.pause_timeout(), Duration::from_secs(300));
        assert_eq!(config.session.movement_check_interval(), Duration::from_secs(300));
        assert_eq!(config.map.region_debounce(), Duration::from_millis(500));
        assert!(config.daemon.state_file.ends_with("tunemap/state.json"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            [api]
            base_url = "https://api.example.org"
            token = "abc"

            [map]
            grid_size_deg = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(config.api.base_url, "https://api.example.org");
        assert_eq!(config.api.token.as_deref(), Some("abc"));
        assert_eq!(config.map.grid_size_deg, 0.25);
        assert_eq!(config.map.min_fetch_zoom, 10);
        assert_eq!(config.session.default_radius_km, 2.0);
    }

    #[test]
    fn test_degenerate_grid_is_rejected() {
        for bad in ["0.0", "-0.1", "nan", "inf"] {
            let err = Config::from_toml_str(&format!("[map]\ngrid_size_deg = {bad}\n")).unwrap_err();
            assert!(err.to_string().contains("grid_size_deg"), "{bad}: {err}");
        }
    }

    #[test]
    fn test_other_map_limits_are_checked() {
        assert!(Config::from_toml_str("[map]\ncache_ttl_secs = 0\n").is_err());
        assert!(Config::from_toml_str("[map]\nlock_tolerance_deg = -1.0\n").is_err());
        assert!(Config::from_toml_str("[map]\nlock_tolerance_deg = 0.0\n").is_ok());
        assert!(Config::from_toml_str("[mpv]\ndefault_volume = 1.5\n").is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back = Config::from_toml_str(&text).unwrap();
        assert_eq!(back.map.cache_ttl_secs, config.map.cache_ttl_secs);
        assert_eq!(back.geocoder.base_url, config.geocoder.base_url);
    }
}
