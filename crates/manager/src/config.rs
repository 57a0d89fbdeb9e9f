use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::pool::slot::Viewport;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub bind_address: String,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub pull_on_start: bool,
    pub pool: PoolSettings,
}

/// Knobs that shape the pool itself: image, naming, port strides, retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub browser_image_name: String,
    pub browser_prefix: String,
    pub num_browsers: usize,
    pub base_browser_port: u16,
    pub base_app_port: u16,
    pub base_vnc_port: u16,
    pub resolution: Viewport,
    /// Extra environment variables merged into every `run`.
    pub launch_args: HashMap<String, String>,
    /// Extra flags passed verbatim to `run`, e.g. `--shm-size=2g`.
    pub additional_docker_args: Vec<String>,
    pub max_retries: u32,
    pub kill_wait_time_ms: u64,
    /// Overrides the agent host for every slot when set.
    pub connection_host: Option<String>,
    /// Forwarded into the container environment when set.
    pub pod_ip: Option<String>,
}

impl ManagerConfig {
    /// Load configuration from file or environment variables.
    /// Priority: Environment Variables > Config File > Defaults
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("MANAGER_CONFIG_FILE")
            .unwrap_or_else(|_| "/etc/browser-pool/manager.toml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!("Loading configuration from: {}", config_path);
            Self::from_file(&config_path)?
        } else {
            tracing::info!(
                "Config file not found at {}, using environment variables",
                config_path
            );
            Self::default()
        };

        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let mut file = File::open(path).with_context(|| format!("open {}", path))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .with_context(|| format!("read {}", path))?;

        let config: ManagerConfig =
            toml::from_str(&contents).with_context(|| format!("parse {}", path))?;
        Ok(config)
    }

    /// Environment variables override file config.
    fn apply_env(&mut self) {
        if let Ok(bind) = std::env::var("MANAGER_BIND_ADDRESS") {
            self.bind_address = bind;
        }
        if let Some(pull) = env_parse("PULL_ON_START") {
            self.pull_on_start = pull;
        }
        self.pool.apply_env();
    }

    /// Validate configuration values before the pool boots on them.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.bind_address
            .parse::<std::net::SocketAddr>()
            .context("Invalid bind_address")?;
        self.pool.validate()
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            enable_cors: true,
            cors_origins: vec![],
            pull_on_start: false,
            pool: PoolSettings::default(),
        }
    }
}

impl PoolSettings {
    fn apply_env(&mut self) {
        if let Ok(image) = std::env::var("BROWSER_IMAGE_NAME") {
            self.browser_image_name = image;
        }
        if let Ok(prefix) = std::env::var("BROWSER_PREFIX") {
            self.browser_prefix = prefix;
        }
        if let Some(n) = env_parse("NUM_BROWSERS") {
            self.num_browsers = n;
        }
        if let Some(port) = env_parse("BASE_BROWSER_PORT") {
            self.base_browser_port = port;
        }
        if let Some(port) = env_parse("BASE_APP_PORT") {
            self.base_app_port = port;
        }
        if let Some(port) = env_parse("BASE_VNC_PORT") {
            self.base_vnc_port = port;
        }
        if let Ok(res) = std::env::var("RESOLUTION") {
            match res.parse() {
                Ok(viewport) => self.resolution = viewport,
                Err(_) => tracing::warn!("Ignoring unparsable RESOLUTION: {}", res),
            }
        }
        if let Some(retries) = env_parse("MAX_RETRIES") {
            self.max_retries = retries;
        }
        if let Some(wait) = env_parse("KILL_WAIT_TIME") {
            self.kill_wait_time_ms = wait;
        }
        if let Ok(host) = std::env::var("BROWSER_CONNECTION_HOST") {
            if !host.is_empty() {
                self.connection_host = Some(host);
            }
        }
        if let Ok(ip) = std::env::var("BROWSER_POD_IP") {
            if !ip.is_empty() {
                self.pod_ip = Some(ip);
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.browser_image_name.is_empty() {
            anyhow::bail!("browser_image_name must not be empty");
        }
        if self.browser_prefix.is_empty() {
            anyhow::bail!("browser_prefix must not be empty");
        }
        if self.num_browsers == 0 {
            anyhow::bail!("num_browsers must be > 0");
        }
        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be > 0");
        }
        if !self.resolution.is_allowed() {
            anyhow::bail!("resolution {} is not in the allowed set", self.resolution);
        }

        // The three port strides must stay disjoint or two slots would
        // collide on a host port.
        let n = self.num_browsers as u16;
        let strides = [
            ("base_browser_port", self.base_browser_port),
            ("base_app_port", self.base_app_port),
            ("base_vnc_port", self.base_vnc_port),
        ];
        for (name, base) in &strides {
            if base.checked_add(n).is_none() {
                anyhow::bail!("{} + num_browsers overflows the port range", name);
            }
        }
        for (i, (name_a, base_a)) in strides.iter().enumerate() {
            for (name_b, base_b) in strides.iter().skip(i + 1) {
                let disjoint = base_a + n <= *base_b || base_b + n <= *base_a;
                if !disjoint {
                    anyhow::bail!(
                        "{} and {} overlap for a pool of {} browsers",
                        name_a,
                        name_b,
                        self.num_browsers
                    );
                }
            }
        }
        Ok(())
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            browser_image_name: "browser-node:latest".to_string(),
            browser_prefix: "browser".to_string(),
            num_browsers: 2,
            base_browser_port: 10222,
            base_app_port: 7070,
            base_vnc_port: 15900,
            resolution: Viewport {
                width: 1280,
                height: 720,
            },
            launch_args: HashMap::new(),
            additional_docker_args: vec![],
            max_retries: 3,
            kill_wait_time_ms: 2000,
            connection_host: None,
            pod_ip: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Defaults ────────────────────────────────────────────────

    #[test]
    fn test_defaults_validate() {
        let config = ManagerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.pool.num_browsers, 2);
        assert_eq!(config.pool.base_app_port, 7070);
    }

    // ── Validation ──────────────────────────────────────────────

    #[test]
    fn test_validate_zero_browsers() {
        let mut settings = PoolSettings::default();
        settings.num_browsers = 0;
        let result = settings.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("num_browsers"));
    }

    #[test]
    fn test_validate_empty_image() {
        let mut settings = PoolSettings::default();
        settings.browser_image_name = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_disallowed_resolution() {
        let mut settings = PoolSettings::default();
        settings.resolution = Viewport {
            width: 800,
            height: 600,
        };
        let result = settings.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("resolution"));
    }

    #[test]
    fn test_validate_overlapping_port_strides() {
        let mut settings = PoolSettings::default();
        settings.base_app_port = 7070;
        settings.base_vnc_port = 7071;
        settings.num_browsers = 4;
        let result = settings.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("overlap"));
    }

    #[test]
    fn test_validate_adjacent_strides_ok() {
        let mut settings = PoolSettings::default();
        settings.base_app_port = 7070;
        settings.base_vnc_port = 7074;
        settings.num_browsers = 4;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_bind_address() {
        let mut config = ManagerConfig::default();
        config.bind_address = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    // ── TOML round-trip ─────────────────────────────────────────

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ManagerConfig = toml::from_str(
            r#"
            bind_address = "127.0.0.1:9000"

            [pool]
            browser_prefix = "bx"
            num_browsers = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.pool.browser_prefix, "bx");
        assert_eq!(config.pool.num_browsers, 4);
        // Untouched keys fall back to defaults.
        assert_eq!(config.pool.base_vnc_port, 15900);
        assert_eq!(config.pool.max_retries, 3);
    }

    #[test]
    fn test_resolution_from_toml_string() {
        let settings: PoolSettings = toml::from_str(r#"resolution = "1920x1080""#).unwrap();
        assert_eq!(
            settings.resolution,
            Viewport {
                width: 1920,
                height: 1080
            }
        );
    }
}
