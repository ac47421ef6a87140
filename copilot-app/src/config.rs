//! Widget configuration
//!
//! Layered with the `config` crate: defaults, then the TOML file, then
//! `COPILOT_WIDGET_*` environment variables. Command line flags are
//! applied on top by the caller.

use std::path::Path;
use std::time::Duration;

use copilot_core::directory::Directory;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{Origin, Url};

use crate::bridge::{BridgeOptions, DEFAULT_PORT, DEFAULT_PORT_ATTEMPTS};

/// Query parameter of the widget page URL naming the hosting origin
pub const HOST_ORIGIN_PARAM: &str = "lwcParentOrigin";

/// Prefix of environment overrides, e.g. `COPILOT_WIDGET_HOST_ORIGIN`
pub const ENV_PREFIX: &str = "COPILOT_WIDGET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("Invalid hosting origin '{value}': {reason}")]
    InvalidOrigin { value: String, reason: String },
    #[error("Invalid widget URL '{value}': {reason}")]
    InvalidWidgetUrl { value: String, reason: String },
    #[error("port_attempts must be at least 1")]
    NoPorts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    /// Expected origin of the hosting context
    pub host_origin: Option<String>,
    /// Fail calls instead of posting to `*` when the origin is unknown
    pub strict_origin: bool,
    /// Per-call timeout; unset means calls wait until teardown
    pub call_timeout_ms: Option<u64>,
    /// First port to try for the widget endpoint (0 picks a free port)
    pub port: u16,
    pub port_attempts: u16,
    /// Also write a daily-rolled log file
    pub log_file: bool,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            host_origin: None,
            strict_origin: false,
            call_timeout_ms: None,
            port: DEFAULT_PORT,
            port_attempts: DEFAULT_PORT_ATTEMPTS,
            log_file: false,
        }
    }
}

impl WidgetConfig {
    /// Load from `path`, or from the default config file when `path` is
    /// `None` (a missing default file is not an error).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`WidgetConfig::load`], reading overrides from `env` instead of
    /// the process environment when given
    fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        match path {
            Some(path) => {
                builder = builder.add_source(
                    config::File::from(path)
                        .format(config::FileFormat::Toml)
                        .required(true),
                );
            }
            None => {
                if let Some(path) = Directory::config_file() {
                    builder = builder.add_source(
                        config::File::from(path.as_path())
                            .format(config::FileFormat::Toml)
                            .required(false),
                    );
                }
            }
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        let config: WidgetConfig = builder.build()?.try_deserialize()?;
        config.validated()
    }

    /// Normalize the hosting origin and check invariants
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.port_attempts == 0 {
            return Err(ConfigError::NoPorts);
        }
        self.host_origin = self
            .host_origin
            .as_deref()
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(normalize_origin)
            .transpose()?;
        Ok(self)
    }

    /// Take the hosting origin from the widget page URL unless one is
    /// already configured
    pub fn apply_widget_url(&mut self, widget_url: &str) -> Result<(), ConfigError> {
        if self.host_origin.is_some() {
            return Ok(());
        }
        if let Some(origin) = host_origin_from_widget_url(widget_url)? {
            tracing::info!("Hosting origin detected from widget URL: {}", origin);
            self.host_origin = Some(origin);
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            host_origin: self.host_origin.clone(),
            strict_origin: self.strict_origin,
            call_timeout: self.call_timeout(),
        }
    }
}

/// Reduce a URL or origin string to `scheme://host[:port]`
pub fn normalize_origin(value: &str) -> Result<String, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidOrigin {
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    match url.origin() {
        origin @ Origin::Tuple(..) => Ok(origin.ascii_serialization()),
        Origin::Opaque(_) => Err(ConfigError::InvalidOrigin {
            value: value.to_string(),
            reason: "opaque origin".to_string(),
        }),
    }
}

/// Read the hosting origin from the widget page URL's query string
pub fn host_origin_from_widget_url(widget_url: &str) -> Result<Option<String>, ConfigError> {
    let url = Url::parse(widget_url).map_err(|e| ConfigError::InvalidWidgetUrl {
        value: widget_url.to_string(),
        reason: e.to_string(),
    })?;
    url.query_pairs()
        .find(|(key, _)| key == HOST_ORIGIN_PARAM)
        .map(|(_, value)| normalize_origin(&value))
        .transpose()
}
