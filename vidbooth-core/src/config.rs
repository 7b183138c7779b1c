use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct VidboothConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub bus: BusConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Externally reachable base URL for download links. When unset, the
    /// request's Host header is used (breaks behind a TLS terminator).
    pub public_url: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            log_level: "info".to_string(),
            public_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub upload_dir: String,
    pub max_upload_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: "uploads/videos".to_string(),
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetentionConfig {
    pub sweep_interval_minutes: u64,
    pub max_age_hours: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_minutes: 60,
            max_age_hours: 24,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusConfig {
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

impl VidboothConfig {
    /// Load configuration from an optional TOML file layered with
    /// `VIDBOOTH__SECTION__KEY` environment overrides. A bare `PORT`
    /// variable is honored last for parity with the kiosk deploy scripts.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("VIDBOOTH")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        let mut cfg: VidboothConfig = s.try_deserialize()?;

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse::<u16>() {
                cfg.service.port = port;
            }
        }

        Ok(cfg)
    }

    /// Upload directory with `~` expanded.
    pub fn upload_dir(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(shellexpand::tilde(&self.storage.upload_dir).into_owned())
    }
}
