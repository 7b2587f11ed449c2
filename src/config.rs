use std::{env, fmt, net::SocketAddr};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    WebSocket,
    Http,
    Both,
}

impl TransportMode {
    pub fn websocket_enabled(self) -> bool {
        matches!(self, Self::WebSocket | Self::Both)
    }

    pub fn http_enabled(self) -> bool {
        matches!(self, Self::Http | Self::Both)
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WebSocket => "websocket",
            Self::Http => "http",
            Self::Both => "both",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_token: Option<String>,
    pub bind_addr: String,
    pub bind_port: u16,
    pub transport: TransportMode,
    pub server_name: String,
    pub session_buffer: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("MCP_TRANSPORT must be one of: websocket, http, both")]
    InvalidTransport,
    #[error("MCP_SERVER_NAME must not be empty")]
    EmptyServerName,
    #[error("MCP_SESSION_BUFFER must be a positive integer")]
    InvalidSessionBuffer,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_token = lookup("MCP_API_TOKEN")
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = lookup("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);

        let transport = match lookup("MCP_TRANSPORT")
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty())
            .as_deref()
        {
            None | Some("both") => TransportMode::Both,
            Some("websocket") | Some("ws") => TransportMode::WebSocket,
            Some("http") | Some("sse") => TransportMode::Http,
            Some(_) => return Err(ConfigError::InvalidTransport),
        };

        let server_name = match lookup("MCP_SERVER_NAME") {
            Some(value) => {
                let value = value.trim().to_string();
                if value.is_empty() {
                    return Err(ConfigError::EmptyServerName);
                }
                value
            }
            None => "mcp-server".to_string(),
        };

        let session_buffer = lookup("MCP_SESSION_BUFFER")
            .map(|value| {
                value
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|size| *size > 0)
                    .ok_or(ConfigError::InvalidSessionBuffer)
            })
            .transpose()?
            .unwrap_or(32);

        let config = Self {
            api_token,
            bind_addr,
            bind_port,
            transport,
            server_name,
            session_buffer,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}
