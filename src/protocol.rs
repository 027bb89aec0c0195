//! Console WebSocket frame format.
//!
//! Every frame in both directions is a JSON object `{ "event": …, "args": [...] }`.
//!
//! | Direction | Event            | `args[0]`                              |
//! |-----------|------------------|----------------------------------------|
//! | out       | `auth`           | connection token                       |
//! | out       | `send command`   | command line                           |
//! | in        | `auth success`   | (none)                                 |
//! | in        | `console output` | raw text chunk (may contain ANSI)      |
//! | in        | `jwt error`      | reason                                 |
//! | in        | `token expiring` | (none)                                 |
//! | in        | `token expired`  | (none)                                 |
//! | in        | `status`         | power state (`running`, `offline`, …)  |
//! | in        | `stats`          | JSON-encoded [`ResourceStats`]         |
//! | in        | `daemon error`   | message                                |

use serde::Deserialize;
use serde_json::{json, Value};

/// Outbound `auth` frame carrying a freshly issued token.
pub fn auth_frame(token: &str) -> String {
    json!({ "event": "auth", "args": [token] }).to_string()
}

/// Outbound `send command` frame.
pub fn command_frame(command: &str) -> String {
    json!({ "event": "send command", "args": [command] }).to_string()
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    args: Option<Vec<Value>>,
}

impl RawFrame {
    fn first_arg(&self) -> &str {
        self.args
            .as_ref()
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    AuthSuccess,
    ConsoleOutput(String),
    JwtError(String),
    TokenExpiring,
    TokenExpired,
    Status(String),
    Stats(ResourceStats),
    DaemonError(String),
    /// Anything else (`install output`, `backup completed`, …), by event name.
    Other(String),
}

impl InboundFrame {
    /// Decode a text frame. Fails only if the frame is not a JSON object with
    /// a string `event`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawFrame = serde_json::from_str(text)?;
        let frame = match raw.event.as_str() {
            "auth success" => Self::AuthSuccess,
            "console output" => Self::ConsoleOutput(raw.first_arg().to_string()),
            "jwt error" => Self::JwtError(raw.first_arg().to_string()),
            "token expiring" => Self::TokenExpiring,
            "token expired" => Self::TokenExpired,
            "status" => Self::Status(raw.first_arg().to_string()),
            "stats" => match serde_json::from_str(raw.first_arg()) {
                Ok(stats) => Self::Stats(stats),
                Err(_) => Self::Other(raw.event),
            },
            "daemon error" => Self::DaemonError(raw.first_arg().to_string()),
            _ => Self::Other(raw.event),
        };
        Ok(frame)
    }
}

/// Resource usage snapshot from a `stats` frame. Missing fields are zero.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResourceStats {
    pub memory_bytes: u64,
    pub memory_limit_bytes: u64,
    /// CPU usage, in percent of one core.
    pub cpu_absolute: f64,
    pub disk_bytes: u64,
    pub network: NetworkStats,
    /// Process uptime in milliseconds.
    pub uptime: u64,
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NetworkStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}
