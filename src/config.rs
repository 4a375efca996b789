use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Main configuration structure. Every section has sensible defaults so a
/// missing or partial file still yields a runnable daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub crawler: CrawlerSettings,
    pub storage: StorageSettings,
    pub proxy: ProxySettings,
    pub stealth: StealthSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Crawler engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerSettings {
    /// Number of workers in the pool
    pub max_workers: usize,

    /// Capacity of the bounded task and result queues
    pub queue_size: usize,

    /// Minimum interval between requests to one domain, in milliseconds
    pub rate_limit: u64,

    /// User agent applied when fingerprinting is disabled
    pub user_agent: String,

    /// Overall per-request timeout in seconds
    pub timeout: u64,

    /// Response bodies are truncated beyond this many bytes
    pub max_body_bytes: usize,
}

/// Storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub postgresql: PostgresSettings,
    pub mongodb: MongoSettings,
    pub redis: RedisSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl PostgresSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoSettings {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: i64,
}

impl RedisSettings {
    pub fn connection_string(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!("redis://:{}@{}:{}/{}", self.password, self.host, self.port, self.db)
        }
    }
}

/// Proxy subsystem settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub enabled: bool,

    /// Seconds between forced rotations; reserved for timed strategies
    pub rotation_interval: u64,

    /// Seconds between health check sweeps
    pub health_check_interval: u64,

    /// Endpoint probed through each proxy to determine liveness
    pub test_url: String,

    pub pools: Vec<PoolSettings>,
}

/// One named pool of upstream proxies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub name: String,

    /// e.g. "residential", "datacenter"
    #[serde(rename = "type")]
    pub pool_type: String,

    pub providers: Vec<String>,

    /// `host:port` or `user:pass@host:port`
    pub endpoints: Vec<String>,
}

/// Fingerprinting settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StealthSettings {
    pub enabled: bool,
    pub fingerprint_rotation: bool,
    pub canvas_noise: bool,
    pub webgl_spoofing: bool,
    pub user_agent_rotation: bool,

    /// Fixed PRNG seed for reproducible profile generation
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            crawler: CrawlerSettings::default(),
            storage: StorageSettings::default(),
            proxy: ProxySettings::default(),
            stealth: StealthSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            max_workers: 1000,
            queue_size: 10_000,
            rate_limit: 1000,
            user_agent: "crawlerd/1.0".to_string(),
            timeout: 30,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "crawler".to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
        }
    }
}

impl Default for MongoSettings {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "crawler".to_string(),
        }
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: String::new(),
            db: 0,
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            rotation_interval: 600,
            health_check_interval: 60,
            test_url: "http://httpbin.org/ip".to_string(),
            pools: vec![],
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            pool_type: "datacenter".to_string(),
            providers: vec![],
            endpoints: vec![],
        }
    }
}

impl Default for StealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            fingerprint_rotation: true,
            canvas_noise: true,
            webgl_spoofing: true,
            user_agent_rotation: true,
            seed: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file. A missing file yields the
    /// default configuration; a malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Configuration file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }
}
