use anyhow::Error;
use confique::Config;
use std::sync::{Arc, OnceLock};
use url::Url;

#[derive(Debug, Config)]
pub struct CaosConfig {
    #[config(env = "CAOS_API_URL", default = "http://localhost:8080/api/v1")]
    pub api_url: String,

    #[config(env = "CAOS_API_TIMEOUT_SECONDS", default = 30)]
    pub api_timeout_seconds: u64,

    #[config(env = "CAOS_USERNAME")]
    pub username: Option<String>,

    #[config(env = "CAOS_PASSWORD")]
    pub password: Option<String>,

    /// Reference width used by the points-per-pixel guard.
    #[config(env = "CAOS_GRAPH_WIDTH_PIXELS", default = 1280)]
    pub graph_width_pixels: u32,

    /// Above this many points per pixel the granularity is coarsened.
    #[config(env = "CAOS_MAX_POINTS_PER_PIXEL", default = 2.0)]
    pub max_points_per_pixel: f64,

    #[config(env = "CAOS_SENTRY_DSN")]
    pub sentry_dsn: Option<String>,
}

impl CaosConfig {
    pub fn load() -> Result<CaosConfig, Error> {
        let c = CaosConfig::builder().env().file("settings.toml").load()?;

        Ok(c)
    }

    pub fn parse_api_url(&self) -> Result<Url, Error> {
        let url = Url::parse(&self.api_url)?;
        if url.cannot_be_a_base() {
            anyhow::bail!("API URL cannot be used as a base: {}", self.api_url);
        }
        Ok(url)
    }
}

static CAOS_CONFIG: OnceLock<Arc<CaosConfig>> = OnceLock::new();

pub fn get() -> Result<Arc<CaosConfig>, Error> {
    CAOS_CONFIG.get().cloned().ok_or_else(|| {
        Error::msg(
            "Configuration not loaded. Please call load_configuration() before using the configuration",
        )
    })
}

pub fn load_configuration() -> Result<(), Error> {
    // Check if the configuration has already been loaded
    if CAOS_CONFIG.get().is_some() {
        return Ok(());
    }

    // Load configuration
    let config = CaosConfig::load()?;
    CAOS_CONFIG.get_or_init(|| Arc::new(config));

    Ok(())
}

use std::sync::Mutex;

// Used by integration tests - must be always available for test compilation
#[allow(dead_code)] // Used by integration tests, not visible in cargo check
static TEST_CONFIG_INIT: Mutex<()> = Mutex::new(());

/// Test-only function to ensure configuration is loaded exactly once per test run
/// Available for both unit tests and integration tests
#[allow(dead_code)] // Used by integration tests, not visible in cargo check
pub fn load_configuration_for_tests() -> Result<(), Error> {
    let _guard = TEST_CONFIG_INIT.lock().unwrap();

    // If config is already loaded, return success
    if CAOS_CONFIG.get().is_some() {
        return Ok(());
    }

    // Load default configuration for tests
    let config = CaosConfig::load()?;
    CAOS_CONFIG.get_or_init(|| Arc::new(config));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // These tests touch process environment variables, so they cannot
    // run concurrently with each other.
    #[test]
    #[serial]
    fn test_load_config() {
        let config = CaosConfig::load().unwrap();

        assert_eq!(config.api_url, "http://localhost:8080/api/v1");
        assert_eq!(config.api_timeout_seconds, 30);
        assert_eq!(config.graph_width_pixels, 1280);

        temp_env::with_var("CAOS_API_URL", Some("https://caos.example.org/api"), || {
            let config = CaosConfig::load().unwrap();
            assert_eq!(config.api_url, "https://caos.example.org/api");
        });
    }

    #[test]
    #[serial]
    fn test_parse_api_url() {
        let config = CaosConfig::load().unwrap();
        let url = config.parse_api_url().unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.port(), Some(8080));

        temp_env::with_var("CAOS_API_URL", Some("not a url"), || {
            let config = CaosConfig::load().unwrap();
            assert!(config.parse_api_url().is_err());
        });
    }

    #[test]
    #[serial]
    fn test_load_configuration() {
        load_configuration().unwrap();
        assert!(CAOS_CONFIG.get().is_some());

        let config = get().unwrap();
        assert_eq!(config.api_timeout_seconds, 30);
    }
}
