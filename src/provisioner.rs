//! Connection-token provisioning over the panel's REST API.
//!
//! [`TokenProvisioner`] wraps `reqwest::Client` and requests a single-use
//! console credential for one server:
//!
//! ```text
//! POST {panel}{token_path}          Authorization: Bearer <api_key>
//! → { "success": true,
//!     "data": { "token": "...", "connection_string": "wss://...", "server_uuid": "..." },
//!     "error_message": null }
//! ```
//!
//! `success` defaults to `true` when absent, and `socket` is accepted in place
//! of `connection_string`, so a stock panel response decodes as well.
//!
//! Nothing is cached: every call hits the panel and yields an unrelated
//! credential. Retrying is the session's job, not ours.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::{ConsoleConfig, ResolvedInstance};
use crate::error::ProvisionError;

/// A one-shot authorization for a single console connection attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionCredential {
    /// WebSocket URL of the daemon's console endpoint.
    pub endpoint_url: String,
    /// Token sent in the `auth` frame.
    pub auth_token: String,
    /// Server identity as reported by the panel (full UUID).
    pub server_identity: String,
    /// The identifier the credential was requested for.
    pub issued_for_server: String,
}

impl fmt::Debug for ConnectionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCredential")
            .field("endpoint_url", &self.endpoint_url)
            .field("auth_token", &"<redacted>")
            .field("server_identity", &self.server_identity)
            .field("issued_for_server", &self.issued_for_server)
            .finish()
    }
}

/// Anything that can hand out console credentials.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn issue(&self, server: &str) -> Result<ConnectionCredential, ProvisionError>;
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default = "default_success")]
    success: bool,
    data: Option<TokenData>,
    error_message: Option<String>,
}

fn default_success() -> bool {
    true
}

#[derive(Deserialize)]
struct TokenData {
    token: String,
    #[serde(alias = "socket")]
    connection_string: String,
    #[serde(default)]
    server_uuid: String,
}

/// HTTP client for the connection-token endpoint of one panel account.
pub struct TokenProvisioner {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    token_path: String,
    connect_timeout: Duration,
}

impl TokenProvisioner {
    /// `token_path` may contain `{server}`, replaced per request.
    pub fn new(
        base_url: &str,
        api_key: &str,
        token_path: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ProvisionError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("panel-console/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            token_path: token_path.to_string(),
            connect_timeout,
        })
    }

    pub fn from_instance(
        instance: &ResolvedInstance,
        console: &ConsoleConfig,
    ) -> Result<Self, ProvisionError> {
        Self::new(
            &instance.url,
            &instance.api_key,
            &console.token_path,
            console.connect_timeout(),
            console.request_timeout(),
        )
    }

    /// The panel's base URL (without trailing slash).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// TCP connect timeout applied to token requests.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    fn token_url(&self, server: &str) -> String {
        format!(
            "{}{}",
            self.base_url,
            self.token_path.replace("{server}", server)
        )
    }

    async fn handle_response(
        resp: reqwest::Response,
        server: &str,
    ) -> Result<ConnectionCredential, ProvisionError> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProvisionError::NotAuthorized);
        }

        let body = resp.text().await?;
        let envelope = serde_json::from_str::<Envelope>(&body);

        if !status.is_success() {
            // Prefer the panel's message, then the raw body
            let message = envelope
                .ok()
                .and_then(|e| e.error_message)
                .or_else(|| Some(body.trim().to_string()).filter(|b| !b.is_empty()))
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(ProvisionError::ServerUnavailable(message));
        }

        let envelope = envelope
            .map_err(|e| ProvisionError::InvalidResponse(format!("Invalid JSON from panel: {e}")))?;
        if !envelope.success {
            return Err(ProvisionError::ServerUnavailable(
                envelope
                    .error_message
                    .unwrap_or_else(|| "panel refused to issue a connection token".into()),
            ));
        }

        let data = envelope
            .data
            .ok_or_else(|| ProvisionError::InvalidResponse("missing data".into()))?;
        if data.token.is_empty() || data.connection_string.is_empty() {
            return Err(ProvisionError::InvalidResponse(
                "empty token or connection string".into(),
            ));
        }

        let server_identity = if data.server_uuid.is_empty() {
            server.to_string()
        } else {
            data.server_uuid
        };
        Ok(ConnectionCredential {
            endpoint_url: data.connection_string,
            auth_token: data.token,
            server_identity,
            issued_for_server: server.to_string(),
        })
    }
}

#[async_trait]
impl CredentialSource for TokenProvisioner {
    async fn issue(&self, server: &str) -> Result<ConnectionCredential, ProvisionError> {
        let resp = self
            .http
            .post(self.token_url(server))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        Self::handle_response(resp, server).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;

    const PATH: &str = "/api/client/servers/{server}/connection-token";

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn issue_handler(
        State(counter): State<Arc<AtomicUsize>>,
        Path(server): Path<String>,
        headers: HeaderMap,
    ) -> (StatusCode, Json<Value>) {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer key") {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "errors": [] })));
        }
        match server.as_str() {
            "offline" => (
                StatusCode::OK,
                Json(json!({ "success": false, "error_message": "Server is offline" })),
            ),
            "conflict" => (
                StatusCode::CONFLICT,
                Json(json!({ "success": false, "error_message": "Server is installing" })),
            ),
            "stock" => (
                StatusCode::OK,
                Json(json!({ "data": { "token": "t", "socket": "wss://node/api/servers/x/ws" } })),
            ),
            _ => {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                (
                    StatusCode::OK,
                    Json(json!({
                        "success": true,
                        "data": {
                            "token": format!("token-{n}"),
                            "connection_string": format!("wss://node.example.com/api/servers/{server}/ws"),
                            "server_uuid": format!("{server}-full-uuid"),
                        }
                    })),
                )
            }
        }
    }

    async fn panel() -> String {
        let router = Router::new()
            .route(PATH, post(issue_handler))
            .route(
                "/broken/{server}",
                post(|| async { (StatusCode::OK, "<html>maintenance</html>") }),
            )
            .with_state(Arc::new(AtomicUsize::new(0)));
        serve(router).await
    }

    fn provisioner(base: &str, key: &str, path: &str) -> TokenProvisioner {
        TokenProvisioner::new(
            base,
            key,
            path,
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn issues_fresh_credential_per_call() {
        let base = panel().await;
        let p = provisioner(&format!("{base}/"), "key", PATH);

        let first = p.issue("abc123").await.unwrap();
        assert_eq!(first.auth_token, "token-1");
        assert_eq!(first.endpoint_url, "wss://node.example.com/api/servers/abc123/ws");
        assert_eq!(first.server_identity, "abc123-full-uuid");
        assert_eq!(first.issued_for_server, "abc123");

        let second = p.issue("abc123").await.unwrap();
        assert_eq!(second.auth_token, "token-2");
    }

    #[tokio::test]
    async fn unauthorized_maps_to_not_authorized() {
        let base = panel().await;
        let err = provisioner(&base, "wrong", PATH).issue("abc").await.unwrap_err();
        assert!(matches!(err, ProvisionError::NotAuthorized));
    }

    #[tokio::test]
    async fn refused_envelope_maps_to_server_unavailable() {
        let base = panel().await;
        let p = provisioner(&base, "key", PATH);

        match p.issue("offline").await.unwrap_err() {
            ProvisionError::ServerUnavailable(msg) => assert_eq!(msg, "Server is offline"),
            other => panic!("unexpected error: {other}"),
        }
        match p.issue("conflict").await.unwrap_err() {
            ProvisionError::ServerUnavailable(msg) => assert_eq!(msg, "Server is installing"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn stock_panel_response_is_accepted() {
        let base = panel().await;
        let c = provisioner(&base, "key", PATH).issue("stock").await.unwrap();
        assert_eq!(c.endpoint_url, "wss://node/api/servers/x/ws");
        assert_eq!(c.server_identity, "stock");
    }

    #[tokio::test]
    async fn non_json_success_is_invalid_response() {
        let base = panel().await;
        let err = provisioner(&base, "key", "/broken/{server}")
            .issue("abc")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn unknown_route_is_server_unavailable() {
        let base = panel().await;
        let err = provisioner(&base, "key", "/nope/{server}")
            .issue("abc")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ServerUnavailable(_)));
    }

    #[tokio::test]
    async fn connection_refused_is_network_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = provisioner(&format!("http://{addr}"), "key", PATH)
            .issue("abc")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Network(_)));
    }

    #[test]
    fn from_instance_uses_configured_timeouts() {
        let instance = ResolvedInstance {
            name: "home".into(),
            url: "https://panel.example.com/".into(),
            api_key: "key".into(),
        };
        let console = ConsoleConfig {
            connect_timeout_secs: 3,
            ..ConsoleConfig::default()
        };
        let p = TokenProvisioner::from_instance(&instance, &console).unwrap();
        assert_eq!(p.connect_timeout(), Duration::from_secs(3));
        assert_eq!(p.base_url(), "https://panel.example.com");
        assert_eq!(
            p.token_url("abc"),
            "https://panel.example.com/api/client/servers/abc/connection-token"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let c = ConnectionCredential {
            endpoint_url: "wss://x".into(),
            auth_token: "secret".into(),
            server_identity: "s".into(),
            issued_for_server: "s".into(),
        };
        assert!(!format!("{c:?}").contains("secret"));
    }
}
