//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`,
//! so a settings file may specify any subset of fields.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the relay.
///
/// ```json
/// {
///   "server": { "port": 3001 },
///   "cors": { "devMode": true },
///   "bots": { "lifetimeMs": 20000 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and per-connection transport settings.
    pub server: ServerSettings,
    /// Cross-origin access policy.
    pub cors: CorsSettings,
    /// Synthetic bot peer simulation.
    pub bots: BotSettings,
    /// Outbound alerting.
    pub notifications: NotificationSettings,
}

impl RelaySettings {
    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxSendQueue must be at least 1".into(),
            ));
        }
        if self.server.ping_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.pingIntervalSecs must be at least 1".into(),
            ));
        }
        if self.bots.enabled && self.bots.sweep_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "bots.sweepIntervalMs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Bounded outbound queue length per connection.
    pub max_send_queue: usize,
    /// Interval between keep-alive pings on each socket.
    pub ping_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
            max_send_queue: 256,
            ping_interval_secs: 30,
        }
    }
}

/// Cross-origin policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CorsSettings {
    /// Allow every origin (`*`).
    pub dev_mode: bool,
    /// Exact origins allowed outside dev mode.
    pub allowed_origins: Vec<String>,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            dev_mode: false,
            allowed_origins: vec!["https://demo.netismic.com".into()],
        }
    }
}

/// Bot peer simulation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BotSettings {
    /// Hand a lone visitor a synthetic peer.
    pub enabled: bool,
    /// How long a bot stays listed before its owner is told it left.
    pub lifetime_ms: u64,
    /// Period of the expiry sweep.
    pub sweep_interval_ms: u64,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            lifetime_ms: 20_000,
            sweep_interval_ms: 2_500,
        }
    }
}

/// Telegram alerting for lone visitors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    /// Send an alert when a visitor arrives to an empty relay.
    pub enabled: bool,
    /// Bot API token.
    pub telegram_bot_token: String,
    /// Destination chat.
    pub telegram_chat_id: String,
    /// Bot API base URL.
    pub api_base: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
            api_base: "https://api.telegram.org".into(),
        }
    }
}
