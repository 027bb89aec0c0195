//! Error types.
//!
//! Library operations return one of the enums below. The console session
//! never surfaces these to its caller: provisioning and transport failures
//! are absorbed by the reconnect machinery and only logged, tagged with a
//! [`SessionFault`].

use std::path::PathBuf;

/// Errors returned by [`crate::provisioner::CredentialSource::issue`].
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// The panel rejected the account credentials (HTTP 401/403).
    #[error("not authorized: account session is invalid")]
    NotAuthorized,
    /// The panel could not issue a credential (server offline, not permitted,
    /// `success: false`, or any other non-2xx status).
    #[error("server unavailable: {0}")]
    ServerUnavailable(String),
    /// HTTP transport error (connection refused, timeout, DNS failure, etc.).
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),
    /// The response body was not a valid connection-token envelope.
    #[error("invalid response from panel: {0}")]
    InvalidResponse(String),
}

/// Errors from opening or using a console transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),
    #[error("websocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("websocket connect timed out after {0}s")]
    Timeout(u64),
    /// The transport's pump task has gone away.
    #[error("transport closed")]
    Closed,
    /// The outbound queue is full; the frame was dropped.
    #[error("outbound queue full")]
    Backpressure,
}

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Why a console session left (or refused to act in) the open state.
///
/// Used as a structured log field; the UI only ever sees connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionFault {
    /// Credential provisioning failed; the keep-alive will retry.
    #[error("credential unavailable")]
    CredentialUnavailable,
    /// The daemon rejected or expired the token.
    #[error("auth rejected")]
    AuthRejected,
    /// The transport closed or could not be opened.
    #[error("transport closed")]
    TransportClosed,
    /// A command was submitted while the session was not open.
    #[error("send ignored")]
    SendIgnored,
}
