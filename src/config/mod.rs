use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "EZDV_";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub session: SessionConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "ezdv.local".to_string(),
            port: 80,
            path: "/ws".to_string(),
        }
    }
}

impl DeviceConfig {
    pub fn url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, self.path)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub upload_pace_ms: u64,
    pub outbound_queue: usize,
    pub action_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 1000,
            connect_timeout_ms: 5000,
            upload_pace_ms: 0,
            outbound_queue: 64,
            action_queue: 64,
        }
    }
}

impl SessionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn upload_pace(&self) -> Duration {
        Duration::from_millis(self.upload_pace_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 7171,
            token: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();
        let config_path = active_config_path();

        if let Ok(raw) = fs::read_to_string(&config_path) {
            config = toml::from_str::<Config>(&raw)
                .map_err(|err| format!("{}: {err}", config_path.display()))?;
        }

        config.apply_env_overrides()?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Device
        if let Ok(val) = env::var(format!("{}DEVICE_HOST", ENV_PREFIX)) {
            self.device.host = val;
        }
        if let Ok(val) = env::var(format!("{}DEVICE_PORT", ENV_PREFIX)) {
            self.device.port = val
                .parse()
                .map_err(|_| format!("{}DEVICE_PORT is not a port: {val}", ENV_PREFIX))?;
        }
        if let Ok(val) = env::var(format!("{}DEVICE_PATH", ENV_PREFIX)) {
            self.device.path = val;
        }

        // Session
        if let Ok(val) = env::var(format!("{}RECONNECT_DELAY_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.session.reconnect_delay_ms = ms;
            }
        }
        if let Ok(val) = env::var(format!("{}CONNECT_TIMEOUT_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.session.connect_timeout_ms = ms;
            }
        }
        if let Ok(val) = env::var(format!("{}UPLOAD_PACE_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.session.upload_pace_ms = ms;
            }
        }

        // Control API
        if let Ok(val) = env::var(format!("{}SERVER_ENABLED", ENV_PREFIX)) {
            self.server.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var(format!("{}SERVER_PORT", ENV_PREFIX)) {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = env::var(format!("{}SERVER_TOKEN", ENV_PREFIX)) {
            self.server.token = Some(val);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.device.host.trim().is_empty() {
            return Err("device.host must be set".into());
        }
        if self.device.port == 0 {
            return Err("device.port must be non-zero".into());
        }
        if !self.device.path.starts_with('/') {
            return Err("device.path must start with '/'".into());
        }
        if self.session.reconnect_delay_ms == 0 {
            return Err("session.reconnect_delay_ms must be non-zero".into());
        }
        if self.session.connect_timeout_ms == 0 {
            return Err("session.connect_timeout_ms must be non-zero".into());
        }
        if self.session.outbound_queue == 0 || self.session.action_queue == 0 {
            return Err("session queue sizes must be non-zero".into());
        }
        if self.server.enabled && self.server.port == 0 {
            return Err("server.port must be non-zero".into());
        }
        if let Some(token) = &self.server.token {
            if token.trim().is_empty() {
                return Err("server.token must not be blank when set".into());
            }
        }
        Ok(())
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err("config.toml already exists".into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    let base = env::var("APPDATA")
        .or_else(|_| env::var("XDG_CONFIG_HOME"))
        .map(PathBuf::from)
        .or_else(|_| env::var("HOME").map(|home| Path::new(&home).join(".config")))
        .unwrap_or_else(|_| PathBuf::from("."));
    base.join("ezdv-client").join(CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}
