// Application configuration
// Logging can only be switched off entirely in development builds

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // logging is on in debug builds

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // logging is off in release builds

// Extra switches for development builds
#[cfg(debug_assertions)]
pub mod dev {
    // Flip to false to silence logging in a debug build.
    // Only honoured when debug_assertions are on.
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    // Release builds cannot turn these back on
    pub const ENABLE_LOGGING: bool = false;
}

/// How long the offer/answer waits for candidate gathering before packaging
/// whatever candidates are already known. Short enough to keep the QR code
/// scannable.
pub const DEFAULT_GATHERING_TIMEOUT: Duration = Duration::from_millis(500);

/// Label of the data channel the initiator opens
pub const DEFAULT_CHANNEL_LABEL: &str = "chat";

/// ICE server configuration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(id: &str, url: &str) -> Self {
        Self {
            id: id.into(),
            r#type: "stun".into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(SessionError::Validation(format!(
                "ICE server {} has an empty URL",
                self.id
            )));
        }
        if self.r#type == "turn" && (self.username.is_none() || self.credential.is_none()) {
            return Err(SessionError::Validation(format!(
                "TURN server {} requires username and credential",
                self.id
            )));
        }
        Ok(())
    }
}

/// Default STUN pair
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig::stun("default-stun", "stun:stun.l.google.com:19302"),
        ServerConfig::stun("default-stun-1", "stun:stun1.l.google.com:19302"),
    ]
}

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub gathering_timeout: Duration,
    pub channel_label: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            gathering_timeout: DEFAULT_GATHERING_TIMEOUT,
            channel_label: DEFAULT_CHANNEL_LABEL.into(),
        }
    }
}

impl SessionConfig {
    /// Replaces the ICE server list. Every server is validated first; on
    /// error the config is left untouched.
    pub fn with_ice_servers(mut self, servers: Vec<ServerConfig>) -> Result<Self> {
        for server in &servers {
            server.validate()?;
        }
        self.ice_servers = servers;
        Ok(self)
    }

    pub fn with_gathering_timeout(mut self, timeout: Duration) -> Self {
        self.gathering_timeout = timeout;
        self
    }

    pub fn with_channel_label(mut self, label: impl Into<String>) -> Self {
        self.channel_label = label.into();
        self
    }
}
