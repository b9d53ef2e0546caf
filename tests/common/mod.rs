//! Shared test harness: a catcher upstream that records whatever reaches it
//! (echoing WebSocket traffic), plus setup glue that wires a relay to it.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hyper::header::{HeaderMap, HeaderValue, CONNECTION, SEC_WEBSOCKET_ACCEPT, UPGRADE};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use traffic_relay::config::{ConfigFile, RelayOptions};
use traffic_relay::traffic::{default_factories, load_plugins, PluginFactory};
use traffic_relay::Service;

/// Body the catcher answers plain HTTP requests with.
pub const CATCHER_BODY: &str = "hello from the catcher";

/// One request as observed by the catcher.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect()
    }
}

/// Black-box upstream: records every request, answers 200, echoes WebSockets.
pub struct Catcher {
    local_addr: SocketAddr,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Catcher {
    pub async fn start() -> Self {
        let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));

        let captured = Arc::clone(&requests);
        let make_service = make_service_fn(move |_conn: &AddrStream| {
            let captured = Arc::clone(&captured);
            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    let captured = Arc::clone(&captured);
                    async move { handle_catcher_request(request, captured).await }
                }))
            }
        });

        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = Server::bind(&addr).serve(make_service);
        let local_addr = server.local_addr();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        let handle = tokio::spawn(async move {
            let _ = graceful.await;
        });

        Self {
            local_addr,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<CapturedRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    /// Poll until a captured request satisfies the predicate. Fire-and-forget
    /// side effects land asynchronously, so tests wait rather than assert.
    pub async fn wait_for_request<F>(&self, timeout: Duration, predicate: F) -> Option<CapturedRequest>
    where
        F: Fn(&CapturedRequest) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(found) = self.requests().into_iter().find(|r| predicate(r)) {
                return Some(found);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn handle_catcher_request(
    mut request: Request<Body>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
) -> Result<Response<Body>, Infallible> {
    if request.headers().contains_key(UPGRADE) {
        return Ok(websocket_echo_response(&mut request));
    }

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    let headers = request.headers().clone();
    let body = hyper::body::to_bytes(request.into_body())
        .await
        .map(|b| b.to_vec())
        .unwrap_or_default();

    captured.lock().unwrap().push(CapturedRequest {
        method,
        path,
        query,
        headers,
        body,
    });

    Ok(Response::new(Body::from(CATCHER_BODY)))
}

/// Complete the WebSocket handshake and echo every message back.
fn websocket_echo_response(request: &mut Request<Body>) -> Response<Body> {
    let Some(key) = request
        .headers()
        .get("sec-websocket-key")
        .map(|k| derive_accept_key(k.as_bytes()))
    else {
        return Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(Body::from("missing Sec-WebSocket-Key"))
            .unwrap();
    };

    let mut request = std::mem::take(request);
    tokio::spawn(async move {
        let upgraded = match hyper::upgrade::on(&mut request).await {
            Ok(upgraded) => upgraded,
            Err(_) => return,
        };
        let ws = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
        let (mut sink, mut stream) = ws.split();
        while let Some(Ok(message)) = stream.next().await {
            if message.is_text() || message.is_binary() {
                if sink.send(message).await.is_err() {
                    break;
                }
            } else if message.is_close() {
                break;
            }
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, HeaderValue::from_static("Upgrade"))
        .header(UPGRADE, HeaderValue::from_static("websocket"))
        .header(SEC_WEBSOCKET_ACCEPT, key)
        .body(Body::empty())
        .unwrap()
}

/// A started catcher + relay pair, the setup most end-to-end tests need.
pub struct TestHarness {
    pub catcher: Catcher,
    pub relay: Service,
}

impl TestHarness {
    /// Start a catcher and a relay targeting it, with the default plugin
    /// registry and the given extra configuration.
    pub async fn start(config_yaml: &str) -> Self {
        Self::start_with_factories(config_yaml, default_factories()).await
    }

    pub async fn start_with_factories(
        config_yaml: &str,
        factories: Vec<Box<dyn PluginFactory>>,
    ) -> Self {
        let catcher = Catcher::start().await;
        let config = config_with_relay_section(config_yaml, &catcher.http_url());
        let options = RelayOptions::read(&config).expect("relay options");
        let plugins = load_plugins(&factories, &config).expect("plugin load");
        let mut relay = Service::new(options, plugins);
        relay.start("127.0.0.1").await.expect("relay start");
        Self { catcher, relay }
    }

    pub fn http_url(&self) -> String {
        self.relay.http_url().unwrap()
    }

    pub fn ws_url(&self) -> String {
        self.relay.ws_url().unwrap()
    }

    pub async fn shutdown(mut self) {
        self.relay.close().await;
        self.catcher.close().await;
    }
}

/// Merge `relay.port: 0` and `relay.target: <catcher>` into a test config.
fn config_with_relay_section(config_yaml: &str, target: &str) -> ConfigFile {
    use serde_yaml::{Mapping, Value};

    let value: Value = serde_yaml::from_str(config_yaml).expect("test config YAML");
    let mut root = match value {
        Value::Null => Mapping::new(),
        Value::Mapping(map) => map,
        _ => panic!("test config must be a mapping"),
    };

    let relay = root
        .entry(Value::from("relay"))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if relay.is_null() {
        *relay = Value::Mapping(Mapping::new());
    }
    let Value::Mapping(relay) = relay else {
        panic!("relay section must be a mapping");
    };
    relay.insert(Value::from("port"), Value::from(0));
    relay.insert(Value::from("target"), Value::from(target));

    let merged = serde_yaml::to_string(&Value::Mapping(root)).expect("merged YAML");
    ConfigFile::from_yaml_str(&merged).expect("merged config")
}

/// GET a URL and return (status, body).
pub async fn get(url: &str) -> (StatusCode, Vec<u8>) {
    let client = hyper::Client::new();
    let response = client.get(url.parse().unwrap()).await.expect("GET");
    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body())
        .await
        .unwrap()
        .to_vec();
    (status, body)
}

/// Send a request and return (status, body).
pub async fn send(request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let client = hyper::Client::new();
    let response = client.request(request).await.expect("request");
    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body())
        .await
        .unwrap()
        .to_vec();
    (status, body)
}
