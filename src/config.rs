//! Configuration for framed connections.

use crate::error::ConfigError;

/// Largest body the 4-byte header can announce; the default limit.
pub const MAX_FRAME_LEN_DEFAULT: u32 = u32::MAX;

/// Environment variable holding the validation identifier.
pub const ENV_IDENTIFIER: &str = "FRAMELINK_IDENTIFIER";

/// Environment variable holding the optional frame size limit in bytes.
pub const ENV_MAX_FRAME_BYTES: &str = "FRAMELINK_MAX_FRAME_BYTES";

/// Configuration for a single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Identifier both peers exchange during validation.
    pub identifier: String,
    /// Largest message body accepted in either direction.
    pub max_frame_len: u32,
}

impl LinkConfig {
    /// Create a configuration for the given identifier.
    ///
    /// The identifier length is fixed for the connection's lifetime and both
    /// peers must use the same value to validate.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            max_frame_len: MAX_FRAME_LEN_DEFAULT,
        }
    }

    /// Set the largest message body accepted in either direction.
    pub fn with_max_frame_len(mut self, max_frame_len: u32) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Create configuration from environment variables.
    ///
    /// Expected variables:
    /// - `FRAMELINK_IDENTIFIER`: validation identifier (required)
    /// - `FRAMELINK_MAX_FRAME_BYTES`: frame size limit (optional)
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is missing or the limit does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let identifier = lookup(ENV_IDENTIFIER).ok_or(ConfigError::Missing(ENV_IDENTIFIER))?;
        let mut config = Self::new(identifier);

        if let Some(value) = lookup(ENV_MAX_FRAME_BYTES) {
            config.max_frame_len = value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: ENV_MAX_FRAME_BYTES,
                value: value.clone(),
            })?;
        }

        Ok(config)
    }
}
