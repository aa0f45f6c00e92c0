//! Agent configuration
//!
//! Loaded once at startup from a TOML file and immutable afterwards. A missing
//! required setting is the only error that stops the agent.

use gharswitch_shared::{codec, timing, Channel};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `auth.device_secret`
pub const DEVICE_SECRET_ENV: &str = "GHARSWITCH_DEVICE_SECRET";

/// Default identity exchange endpoint (custom token -> ID token)
pub const DEFAULT_IDENTITY_URL: &str =
    "https://identitytoolkit.googleapis.com/v1/accounts:signInWithCustomToken";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required setting `{0}`")]
    Missing(&'static str),

    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub device: DeviceConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    /// Channel name -> GPIO pin
    #[serde(default = "default_channels")]
    pub channels: BTreeMap<String, u32>,
}

/// Identity of this unit within its tenant
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub tenant_id: String,
    pub device_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Database root, e.g. `https://project.firebaseio.com`
    pub base_url: String,
    /// Let the store stamp `lastSeen` instead of using the local clock
    #[serde(default = "default_true")]
    pub server_timestamps: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Token minting function
    pub token_url: String,
    #[serde(default = "default_identity_url")]
    pub identity_url: String,
    pub api_key: String,
    #[serde(default)]
    pub device_secret: String,
}

/// How commands reach the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Long-lived event stream subscription
    #[default]
    Stream,
    /// Periodic snapshot of the pending queue
    Poll,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub source: SourceKind,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub read_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Longer event lines are dropped without closing the stream
    pub max_line_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Stream,
            reconnect_delay_ms: timing::RECONNECT_DELAY_MS,
            max_reconnect_delay_ms: timing::MAX_RECONNECT_DELAY_MS,
            read_timeout_ms: timing::STREAM_READ_TIMEOUT_MS,
            poll_interval_ms: timing::POLL_INTERVAL_MS,
            max_line_bytes: codec::MAX_LINE_LEN,
        }
    }
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub interval_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            interval_ms: timing::HEARTBEAT_INTERVAL_MS,
        }
    }
}

impl PresenceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// What to do with a command naming a channel this device does not have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownChannelPolicy {
    /// Reject and leave it pending for external cleanup
    #[default]
    Leave,
    /// Reject and delete it from the pending queue
    Delete,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub unknown_channel: UnknownChannelPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    /// Log relay changes only
    #[default]
    Simulated,
    /// Drive pins through the Linux sysfs GPIO interface
    Sysfs,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub kind: ActuatorKind,
    /// Relay boards that switch on a low level
    pub active_low: bool,
    pub gpio_root: PathBuf,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            kind: ActuatorKind::Simulated,
            active_low: false,
            gpio_root: PathBuf::from("/sys/class/gpio"),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    timing::REQUEST_TIMEOUT_MS
}

fn default_identity_url() -> String {
    DEFAULT_IDENTITY_URL.to_string()
}

fn default_channels() -> BTreeMap<String, u32> {
    [("s1", 15), ("s2", 14), ("s3", 13), ("s4", 12)]
        .into_iter()
        .map(|(name, pin)| (name.to_string(), pin))
        .collect()
}

impl AgentConfig {
    /// Read, apply environment overrides, and validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: AgentConfig = toml::from_str(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate without consulting the environment
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup(DEVICE_SECRET_ENV).filter(|s| !s.is_empty()) {
            self.auth.device_secret = secret;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("device.tenant_id", &self.device.tenant_id),
            ("device.device_id", &self.device.device_id),
            ("store.base_url", &self.store.base_url),
            ("auth.token_url", &self.auth.token_url),
            ("auth.identity_url", &self.auth.identity_url),
            ("auth.api_key", &self.auth.api_key),
            ("auth.device_secret", &self.auth.device_secret),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(field));
            }
        }

        if !self.store.base_url.starts_with("http://") && !self.store.base_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid {
                field: "store.base_url",
                reason: format!("not an http(s) URL: {}", self.store.base_url),
            });
        }

        if self.channels.is_empty() {
            return Err(ConfigError::Missing("channels"));
        }

        let stream = &self.stream;
        if stream.reconnect_delay_ms == 0 || stream.max_reconnect_delay_ms < stream.reconnect_delay_ms
        {
            return Err(ConfigError::Invalid {
                field: "stream.max_reconnect_delay_ms",
                reason: "must be at least reconnect_delay_ms, which must be non-zero".into(),
            });
        }

        for (field, value) in [
            ("stream.read_timeout_ms", stream.read_timeout_ms),
            ("stream.poll_interval_ms", stream.poll_interval_ms),
            ("presence.interval_ms", self.presence.interval_ms),
            ("store.request_timeout_ms", self.store.request_timeout_ms),
            ("stream.max_line_bytes", stream.max_line_bytes as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be non-zero".into(),
                });
            }
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.store.request_timeout_ms)
    }

    /// Configured channels with their pins
    pub fn channel_pins(&self) -> BTreeMap<Channel, u32> {
        self.channels
            .iter()
            .map(|(name, pin)| (Channel::new(name.clone()), *pin))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [device]
        tenant_id = "tnt_A"
        device_id = "PICO_001"

        [store]
        base_url = "https://example.firebaseio.com"

        [auth]
        token_url = "https://example.net/getDeviceToken"
        api_key = "key"
        device_secret = "secret"
    "#;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_toml(MINIMAL).unwrap();

        assert_eq!(config.stream.source, SourceKind::Stream);
        assert_eq!(config.stream.reconnect_delay(), Duration::from_secs(10));
        assert_eq!(config.presence.interval(), Duration::from_secs(120));
        assert_eq!(config.stream.max_line_bytes, 16 * 1024 * 1024);
        assert_eq!(config.auth.identity_url, DEFAULT_IDENTITY_URL);
        assert!(config.store.server_timestamps);
        assert_eq!(config.commands.unknown_channel, UnknownChannelPolicy::Leave);
        assert_eq!(config.actuator.kind, ActuatorKind::Simulated);

        let pins = config.channel_pins();
        assert_eq!(pins.len(), 4);
        assert_eq!(pins[&Channel::from("s1")], 15);
        assert_eq!(pins[&Channel::from("s4")], 12);
    }

    #[test]
    fn test_overrides() {
        let content = format!(
            "{}
            [stream]
            source = \"poll\"
            poll_interval_ms = 5000

            [commands]
            unknown_channel = \"delete\"

            [channels]
            s1 = 2
            s2 = 4
            ",
            MINIMAL
        );
        let config = AgentConfig::from_toml(&content).unwrap();

        assert_eq!(config.stream.source, SourceKind::Poll);
        assert_eq!(config.stream.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.commands.unknown_channel, UnknownChannelPolicy::Delete);
        assert_eq!(config.channels.len(), 2);
    }

    #[test]
    fn test_missing_secret() {
        let content = MINIMAL.replace("device_secret = \"secret\"", "");
        let result = AgentConfig::from_toml(&content);
        assert!(matches!(result, Err(ConfigError::Missing("auth.device_secret"))));
    }

    #[test]
    fn test_secret_from_environment() {
        let content = MINIMAL.replace("device_secret = \"secret\"", "");
        let mut config: AgentConfig = toml::from_str(&content).unwrap();
        config.apply_env(|key| (key == DEVICE_SECRET_ENV).then(|| "from-env".to_string()));

        assert!(config.validate().is_ok());
        assert_eq!(config.auth.device_secret, "from-env");
    }

    #[test]
    fn test_missing_device_section() {
        let content = MINIMAL.replace("[device]", "[other]");
        assert!(matches!(
            AgentConfig::from_toml(&content),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_backoff() {
        let content = format!(
            "{}
            [stream]
            reconnect_delay_ms = 30000
            max_reconnect_delay_ms = 1000
            ",
            MINIMAL
        );
        assert!(matches!(
            AgentConfig::from_toml(&content),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_zero_line_cap_is_invalid() {
        let content = format!(
            "{}
            [stream]
            max_line_bytes = 0
            ",
            MINIMAL
        );
        assert!(matches!(
            AgentConfig::from_toml(&content),
            Err(ConfigError::Invalid {
                field: "stream.max_line_bytes",
                ..
            })
        ));
    }

    #[test]
    fn test_non_http_base_url() {
        let content = MINIMAL.replace("https://example.firebaseio.com", "example.firebaseio.com");
        assert!(matches!(
            AgentConfig::from_toml(&content),
            Err(ConfigError::Invalid {
                field: "store.base_url",
                ..
            })
        ));
    }

    #[test]
    fn test_example_file_needs_secret_from_env() {
        let example = include_str!("../gharswitch.example.toml");
        assert!(matches!(
            AgentConfig::from_toml(example),
            Err(ConfigError::Missing("auth.device_secret"))
        ));

        let mut config: AgentConfig = toml::from_str(example).unwrap();
        config.apply_env(|key| (key == DEVICE_SECRET_ENV).then(|| "s3cret".to_string()));
        config.validate().unwrap();
        assert_eq!(config.auth.device_secret, "s3cret");
        assert_eq!(config.commands.unknown_channel, UnknownChannelPolicy::Leave);
        assert_eq!(config.channel_pins().len(), 4);
    }
}
