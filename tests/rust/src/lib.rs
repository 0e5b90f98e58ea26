//! Shared test utilities and fixtures for scope client integration tests.

pub use scope_client::{ScopeClient, TokenState};
pub use scope_core::{ClientEvent, ClientOptions, ScopeConfig, ScopeError};

/// Default instance the fake scope hands out
pub const INSTANCE_ID: &str = "localhost:27017";
pub const DEPLOYMENT_ID: &str = "deployment-1";
pub const SEED: &str = "mongodb://localhost:27017";

/// Initialize test logging once; `RUST_LOG` controls verbosity
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Session payload fixtures
pub mod fixtures {
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    use super::{DEPLOYMENT_ID, INSTANCE_ID};

    /// A token endpoint response expiring `expires_in` from now
    pub fn session_json(token: &str, expires_in: Duration) -> Value {
        session_for(token, expires_in, INSTANCE_ID)
    }

    pub fn session_for(token: &str, expires_in: Duration, instance_id: &str) -> Value {
        let now = Utc::now();
        json!({
            "token": token,
            "created_at": now.to_rfc3339(),
            "expires_at": (now + expires_in).to_rfc3339(),
            "instance_id": instance_id,
            "deployment_id": DEPLOYMENT_ID,
        })
    }

    /// `n` documents `{_id: start + i}`
    pub fn docs(start: usize, n: usize) -> Value {
        Value::Array((start..start + n).map(|i| json!({ "_id": i })).collect())
    }
}

/// Fake scope service on top of wiremock
pub mod scope {
    use chrono::Duration;
    use serde_json::Value;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::fixtures::session_json;
    use super::{ClientOptions, ScopeClient, ScopeConfig, SEED};

    pub struct FakeScope {
        pub server: MockServer,
    }

    impl FakeScope {
        /// Start a server with no mocks mounted
        pub async fn bare() -> Self {
            Self {
                server: MockServer::start().await,
            }
        }

        /// Start a server whose token endpoint hands out one-hour sessions
        pub async fn start() -> Self {
            let scope = Self::bare().await;
            scope
                .mount_token(session_json("tok-1", Duration::hours(1)))
                .await;
            scope
        }

        pub fn uri(&self) -> String {
            self.server.uri()
        }

        pub fn config(&self) -> ScopeConfig {
            ScopeConfig::new(self.uri(), SEED).unwrap()
        }

        /// Client without the streaming transport
        pub fn client(&self) -> ScopeClient {
            self.client_with(ClientOptions::default().with_open_stream(false))
        }

        pub fn client_with(&self, options: ClientOptions) -> ScopeClient {
            ScopeClient::with_options(self.config(), options).unwrap()
        }

        /// Client reaching this server through another address, such as a
        /// stream server fronting it
        pub fn client_via(&self, scope_uri: &str, options: ClientOptions) -> ScopeClient {
            ScopeClient::with_options(ScopeConfig::new(scope_uri, SEED).unwrap(), options).unwrap()
        }

        pub fn address(&self) -> std::net::SocketAddr {
            *self.server.address()
        }

        pub async fn mount_token(&self, session: Value) {
            Mock::given(method("POST"))
                .and(path("/api/v1/token"))
                .respond_with(ResponseTemplate::new(200).set_body_json(session))
                .mount(&self.server)
                .await;
        }

        /// Answer `GET /api/v1{api_path}` with `body`
        pub async fn mount_get(&self, api_path: &str, body: Value) {
            Mock::given(method("GET"))
                .and(path(format!("/api/v1{}", api_path)))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .mount(&self.server)
                .await;
        }

        /// Requests received on `api_path` with `verb`
        pub async fn hits(&self, verb: &str, api_path: &str) -> usize {
            let full = format!("/api/v1{}", api_path);
            self.server
                .received_requests()
                .await
                .unwrap_or_default()
                .iter()
                .filter(|r| r.method.as_str() == verb && r.url.path() == full)
                .count()
        }
    }
}

/// In-process streaming server
pub mod stream_server {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use futures::{SinkExt, StreamExt};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::broadcast;
    use tokio_tungstenite::{accept_async, tungstenite::Message};
    use url::Url;

    /// Accepts WebSocket connections, records every client frame and
    /// answers each subscribe with `replies` data frames `{n: i}`.
    /// Frames sent through [`StreamServer::push`] reach every connection.
    ///
    /// With an upstream, plain HTTP connections are proxied to it so one
    /// address serves both the API and the stream.
    pub struct StreamServer {
        pub addr: SocketAddr,
        received: Arc<Mutex<Vec<Value>>>,
        push: broadcast::Sender<String>,
    }

    impl StreamServer {
        pub async fn start(replies: usize) -> Self {
            Self::start_with(replies, None).await
        }

        /// Front `upstream` (usually a wiremock server)
        pub async fn in_front_of(upstream: SocketAddr, replies: usize) -> Self {
            Self::start_with(replies, Some(upstream)).await
        }

        async fn start_with(replies: usize, upstream: Option<SocketAddr>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let received = Arc::new(Mutex::new(Vec::new()));
            let (push, _) = broadcast::channel::<String>(64);

            let accept_received = Arc::clone(&received);
            let accept_push = push.clone();
            tokio::spawn(async move {
                while let Ok((tcp, _)) = listener.accept().await {
                    let received = Arc::clone(&accept_received);
                    let pushed = accept_push.subscribe();
                    tokio::spawn(async move {
                        match upstream {
                            Some(upstream) if !is_upgrade(&tcp).await => proxy(tcp, upstream).await,
                            _ => serve_socket(tcp, received, pushed, replies).await,
                        }
                    });
                }
            });

            Self {
                addr,
                received,
                push,
            }
        }

        /// `ws://` address of the stream
        pub fn url(&self) -> Url {
            Url::parse(&format!("ws://{}", self.addr)).unwrap()
        }

        /// `http://` address to use as a scope URL
        pub fn http_uri(&self) -> String {
            format!("http://{}", self.addr)
        }

        /// Every frame received so far
        pub fn received(&self) -> Vec<Value> {
            self.received.lock().clone()
        }

        /// Frames whose event is `event`
        pub fn received_on(&self, event: &str) -> Vec<Value> {
            self.received()
                .into_iter()
                .filter(|f| f["event"] == event)
                .collect()
        }

        pub fn push(&self, frame: Value) {
            let _ = self.push.send(frame.to_string());
        }
    }

    /// Peek at the request head for a WebSocket upgrade
    async fn is_upgrade(tcp: &TcpStream) -> bool {
        let mut buf = vec![0u8; 4096];
        loop {
            let Ok(n) = tcp.peek(&mut buf).await else { return false };
            let head = String::from_utf8_lossy(&buf[..n]).to_ascii_lowercase();
            if head.contains("\r\n\r\n") || n == buf.len() || n == 0 {
                return head.contains("upgrade: websocket");
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }

    async fn proxy(mut tcp: TcpStream, upstream: SocketAddr) {
        let Ok(mut upstream) = TcpStream::connect(upstream).await else { return };
        let _ = tokio::io::copy_bidirectional(&mut tcp, &mut upstream).await;
    }

    async fn serve_socket(
        tcp: TcpStream,
        received: Arc<Mutex<Vec<Value>>>,
        mut pushed: broadcast::Receiver<String>,
        replies: usize,
    ) {
        let Ok(socket) = accept_async(tcp).await else { return };
        let (mut sink, mut stream) = socket.split();
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else { continue };
                        let event = frame["event"].as_str().unwrap_or_default().to_string();
                        received.lock().push(frame);
                        if event.ends_with("/unsubscribe") {
                            continue;
                        }
                        for n in 0..replies {
                            let reply = json!({"event": event, "data": {"n": n}});
                            if sink.send(Message::Text(reply.to_string().into())).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => {}
                },
                text = pushed.recv() => match text {
                    Ok(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            return;
                        }
                    }
                    Err(_) => return,
                },
            }
        }
    }
}

/// Event testing utilities
pub mod events {
    use std::time::Duration;

    use scope_core::{ClientEvent, EventReceiver};

    /// Collect events from a receiver with a timeout
    pub async fn collect_events(rx: &mut EventReceiver, timeout: Duration) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => break, // Bus gone
                Err(_) => break,   // Timeout
            }
        }

        events
    }

    /// Wait for a specific event type
    pub async fn wait_for_event<F>(
        rx: &mut EventReceiver,
        timeout: Duration,
        predicate: F,
    ) -> Option<ClientEvent>
    where
        F: Fn(&ClientEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }

            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) if predicate(&event) => return Some(event),
                Ok(Some(_)) => continue,
                Ok(None) => return None,
                Err(_) => return None,
            }
        }
    }
}

/// Async test helpers
pub mod async_helpers {
    use std::future::Future;
    use std::time::Duration;

    /// Default timeout for async operations in tests
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Run an async operation with a timeout
    pub async fn with_timeout<F, T>(future: F) -> T
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(DEFAULT_TIMEOUT, future)
            .await
            .expect("Operation timed out")
    }

    /// Poll `check` until it holds or the default timeout passes
    pub async fn eventually<F>(mut check: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }
}
