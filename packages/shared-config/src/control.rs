//! Control server configuration types

use std::net::IpAddr;

use crate::{get_env_or_default, parse_env, parse_list_env, ConfigError, ConfigResult};

/// Where the control server binds and how callers authenticate against it
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Address the control server binds to (default: 127.0.0.1)
    pub bind_address: String,

    /// Control server port (default: 8888)
    pub port: u16,

    /// Tokens accepted by the control server
    pub api_tokens: Vec<String>,

    /// Whether the server must refuse requests when it has no tokens
    pub require_auth: bool,

    /// Token the CLI presents (falls back to the first server token)
    pub client_token: Option<String>,

    /// Explicit base URL for the CLI, overriding address and port
    pub url: Option<String>,
}

impl ControlConfig {
    /// Load control configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let api_tokens = parse_list_env("LIBRARIAN_API_TOKENS");
        let client_token = std::env::var("LIBRARIAN_API_TOKEN")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| api_tokens.first().cloned());

        let bind_address = get_env_or_default("LIBRARIAN_BIND_ADDRESS", "127.0.0.1");
        if bind_address.trim().is_empty() || bind_address.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidAddress(bind_address));
        }

        let url = std::env::var("LIBRARIAN_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(ref url) = url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl(
                    "LIBRARIAN_URL".to_string(),
                    url.clone(),
                ));
            }
        }

        Ok(Self {
            bind_address,
            port: parse_env("LIBRARIAN_PORT", 8888)?,
            api_tokens,
            require_auth: parse_env("LIBRARIAN_REQUIRE_AUTH", false)?,
            client_token,
            url,
        })
    }

    /// Create a loopback configuration on the given port (useful for testing)
    pub fn local(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Check whether any token is configured
    pub fn has_tokens(&self) -> bool {
        !self.api_tokens.is_empty()
    }

    /// Check whether the bind address only accepts local connections
    pub fn is_loopback(&self) -> bool {
        is_loopback_address(&self.bind_address)
    }

    /// Base URL the CLI uses to reach the control server
    pub fn base_url(&self) -> String {
        if let Some(ref url) = self.url {
            return url.trim_end_matches('/').to_string();
        }
        let host = match self.bind_address.as_str() {
            "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8888,
            api_tokens: Vec::new(),
            require_auth: false,
            client_token: None,
            url: None,
        }
    }
}

/// Check whether an address string names the local loopback interface
pub fn is_loopback_address(address: &str) -> bool {
    let trimmed = address.trim().trim_start_matches('[').trim_end_matches(']');
    if trimmed.eq_ignore_ascii_case("localhost") {
        return true;
    }
    trimmed
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
