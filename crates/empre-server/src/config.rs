//! Server configuration.

use serde::{Deserialize, Serialize};

/// What the hub does with a recipient whose outbound queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlowConsumerPolicy {
    /// Drop the message for that recipient and keep the connection.
    Drop,
    /// Evict the connection; the client reconnects and refetches history.
    #[default]
    Disconnect,
}

impl std::str::FromStr for SlowConsumerPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "disconnect" => Ok(Self::Disconnect),
            other => Err(format!("unknown slow consumer policy: {other}")),
        }
    }
}

/// Configuration for the chat server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind. `0` auto-assigns.
    pub port: u16,
    /// Capacity of each connection's outbound queue.
    pub max_send_queue: usize,
    /// Capacity of the hub's event channel.
    pub hub_queue: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a connection after this many seconds without a pong.
    pub heartbeat_timeout_secs: u64,
    /// Max WebSocket frame size in bytes.
    pub max_message_size: usize,
    pub slow_consumer: SlowConsumerPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_send_queue: 256,
            hub_queue: 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024,
            slow_consumer: SlowConsumerPolicy::Disconnect,
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
