//! Test server harness for E2E testing
//!
//! Provides `TestRelayServer` for spawning real relay instances in tests.

use metrics_exporter_prometheus::PrometheusBuilder;
use relay_service::config::Config;
use relay_service::identity::mock::StaticIdentityProvider;
use relay_service::models::CONTEXT_ID_HEADER;
use relay_service::registry::RegistryHandle;
use relay_service::routes::{self, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// Client side of a stream opened against the test server.
pub type TestStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Test harness for spawning the Notification Relay in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_issue_session() -> Result<()> {
///     let identity = StaticIdentityProvider::new().with_user("tok-a", "alice");
///     let server = TestRelayServer::spawn(identity).await?;
///
///     let response = server.issue_session("tok-a").await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestRelayServer {
    addr: SocketAddr,
    config: Config,
    registry: RegistryHandle,
    shutdown: CancellationToken,
    client: reqwest::Client,
    _handle: JoinHandle<()>,
}

impl TestRelayServer {
    /// Spawn a server with default configuration.
    pub async fn spawn(identity: StaticIdentityProvider) -> Result<Self, anyhow::Error> {
        Self::spawn_with(identity, &[]).await
    }

    /// Spawn a server with extra environment-style overrides
    /// (e.g. `("MAX_SESSIONS", "2")`).
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start its own registry actor
    /// - Start the HTTP server in the background
    ///
    /// No sweeper is started; tests drive reclaim through `registry()`.
    pub async fn spawn_with(
        identity: StaticIdentityProvider,
        overrides: &[(&str, &str)],
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            (
                "IDENTITY_SERVICE_URL".to_string(),
                "http://identity.test".to_string(),
            ),
        ]);
        for (key, value) in overrides {
            vars.insert((*key).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let registry = RegistryHandle::new(config.max_sessions);
        let shutdown = CancellationToken::new();
        let state = Arc::new(AppState::new(
            config.clone(),
            registry.clone(),
            Arc::new(identity),
            shutdown.clone(),
        ));

        // Handle without a global recorder, so many servers can share a process
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            registry,
            shutdown,
            client: reqwest::Client::new(),
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the WebSocket URL of the stream endpoint.
    pub fn stream_url(&self) -> String {
        format!("ws://{}/v1/stream", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the server's registry, for assertions and driving reclaim.
    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Close every open stream, as the server does at shutdown.
    pub fn close_streams(&self) {
        self.shutdown.cancel();
    }

    /// `POST /v1/session` with `credential` in the auth cookie.
    pub async fn issue_session(&self, credential: &str) -> Result<reqwest::Response, anyhow::Error> {
        Ok(self
            .client
            .post(format!("{}/v1/session", self.url()))
            .header(
                "cookie",
                format!("{}={}", self.config.auth_cookie_name, credential),
            )
            .send()
            .await?)
    }

    /// Issue a session and return the `context-id` header value.
    pub async fn issue_context_id(&self, credential: &str) -> Result<String, anyhow::Error> {
        let response = self.issue_session(credential).await?;
        anyhow::ensure!(
            response.status().is_success(),
            "session issuance failed with {}",
            response.status()
        );
        let context_id = response
            .headers()
            .get(CONTEXT_ID_HEADER)
            .ok_or_else(|| anyhow::anyhow!("missing {} header", CONTEXT_ID_HEADER))?
            .to_str()?
            .to_string();
        Ok(context_id)
    }

    /// `POST /v1/notification/send` as `credential`.
    pub async fn send_notification(
        &self,
        credential: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, anyhow::Error> {
        Ok(self
            .client
            .post(format!("{}/v1/notification/send", self.url()))
            .header(
                "cookie",
                format!("{}={}", self.config.auth_cookie_name, credential),
            )
            .json(body)
            .send()
            .await?)
    }

    /// Open a stream presenting `context_id` in the handshake header.
    ///
    /// Rejected handshakes surface as `tungstenite::Error::Http` carrying the
    /// server's response.
    pub async fn connect_stream(
        &self,
        context_id: &str,
    ) -> Result<TestStream, tokio_tungstenite::tungstenite::Error> {
        let mut request = self.stream_url().into_client_request()?;
        let value = HeaderValue::from_str(context_id).map_err(|e| {
            tokio_tungstenite::tungstenite::Error::HttpFormat(e.into())
        })?;
        request.headers_mut().insert(CONTEXT_ID_HEADER, value);

        let (stream, _response) = connect_async(request).await?;
        Ok(stream)
    }

    /// Open a stream authenticated as `credential`, without a context id.
    ///
    /// Under the request-scoped policy the upgrade request is itself admitted.
    pub async fn connect_stream_as(
        &self,
        credential: &str,
    ) -> Result<TestStream, tokio_tungstenite::tungstenite::Error> {
        let mut request = self.stream_url().into_client_request()?;
        let cookie = format!("{}={}", self.config.auth_cookie_name, credential);
        let value = HeaderValue::from_str(&cookie).map_err(|e| {
            tokio_tungstenite::tungstenite::Error::HttpFormat(e.into())
        })?;
        request.headers_mut().insert("cookie", value);

        let (stream, _response) = connect_async(request).await?;
        Ok(stream)
    }

    /// Open a stream presenting `context_id` as a query parameter.
    pub async fn connect_stream_with_query(
        &self,
        context_id: &str,
    ) -> Result<TestStream, tokio_tungstenite::tungstenite::Error> {
        let url = format!("{}?context_id={}", self.stream_url(), context_id);
        let (stream, _response) = connect_async(url).await?;
        Ok(stream)
    }
}

impl Drop for TestRelayServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self._handle.abort();
        self.registry.cancel();
    }
}
