//! The relay service: owns the inbound listener and wires the traffic
//! pipeline to the forwarder and the WebSocket tunnel.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::RelayOptions;
use crate::error::{RelayError, RelayResult};
use crate::proxy::{forwarder, tunnel};
use crate::traffic::pipeline::{Flow, TrafficPipeline};
use crate::traffic::plugin::{RequestInfo, TrafficPlugin};

pub struct Service {
    options: RelayOptions,
    pipeline: Arc<TrafficPipeline>,
    running: Option<RunningServer>,
}

struct RunningServer {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Service {
    pub fn new(options: RelayOptions, plugins: Vec<Box<dyn TrafficPlugin>>) -> Self {
        let pipeline = Arc::new(TrafficPipeline::new(plugins, options.max_body_size));
        Self {
            options,
            pipeline,
            running: None,
        }
    }

    /// Bind the inbound listener and start serving. With `relay.port` 0 the
    /// OS assigns an ephemeral port, readable via [`Service::local_addr`].
    pub async fn start(&mut self, host: &str) -> RelayResult<()> {
        if self.running.is_some() {
            return Err(RelayError::internal("service already started"));
        }

        let addr = resolve_bind_addr(host, self.options.port)?;
        let handler = RelayHandler {
            pipeline: Arc::clone(&self.pipeline),
            options: Arc::new(self.options.clone()),
        };

        let make_service = make_service_fn(move |conn: &AddrStream| {
            let handler = handler.clone();
            let remote = conn.remote_addr();
            async move {
                Ok::<_, Infallible>(service_fn(move |mut request| {
                    let handler = handler.clone();
                    request.extensions_mut().insert(remote);
                    async move { handler.handle_request(request).await }
                }))
            }
        });

        let server = Server::try_bind(&addr)
            .map_err(|e| RelayError::Io {
                message: format!("failed to bind {}: {}", addr, e),
            })?
            .serve(make_service);
        let local_addr = server.local_addr();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(e) = graceful.await {
                error!("relay server error: {}", e);
            }
        });

        info!(
            addr = %local_addr,
            target = %self.options.target,
            "relay listening"
        );

        self.running = Some(RunningServer {
            local_addr,
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// The bound listener address, available once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Base URL for HTTP clients of the relay.
    pub fn http_url(&self) -> Option<String> {
        self.local_addr().map(|addr| format!("http://{}", addr))
    }

    /// Base URL for WebSocket clients of the relay.
    pub fn ws_url(&self) -> Option<String> {
        self.local_addr().map(|addr| format!("ws://{}", addr))
    }

    /// Names of the loaded plugins, in pipeline order.
    pub fn plugin_names(&self) -> Vec<&str> {
        self.pipeline.plugin_names()
    }

    /// Drain in-flight requests and stop the listener.
    pub async fn close(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(());
            if let Err(e) = running.handle.await {
                warn!("relay server task ended abnormally: {}", e);
            }
        }
    }
}

fn resolve_bind_addr(host: &str, port: u16) -> RelayResult<SocketAddr> {
    use std::net::ToSocketAddrs;
    (host, port)
        .to_socket_addrs()
        .map_err(|e| RelayError::Io {
            message: format!("cannot resolve bind host {}: {}", host, e),
        })?
        .next()
        .ok_or_else(|| RelayError::Io {
            message: format!("bind host {} resolves to no addresses", host),
        })
}

#[derive(Clone)]
struct RelayHandler {
    pipeline: Arc<TrafficPipeline>,
    options: Arc<RelayOptions>,
}

impl RelayHandler {
    async fn handle_request(&self, request: Request<Body>) -> Result<Response<Body>, Infallible> {
        // Handler-owned short-circuit: browsers probe this constantly and it
        // should never reach the upstream.
        if request.uri().path() == "/favicon.ico" {
            return Ok(simple_response(StatusCode::NOT_FOUND, "Not found"));
        }

        let client_addr = request
            .extensions()
            .get::<SocketAddr>()
            .copied()
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 0)));
        let mut info = RequestInfo::new(client_addr, "http", self.options.target.clone());

        match self.pipeline.process(request, &mut info).await {
            Flow::Serviced(response) => Ok(response),
            Flow::Upgrade(request) => {
                match tunnel::tunnel(request, &self.options.target).await {
                    Ok(response) => Ok(response),
                    Err(e) => {
                        warn!("tunnel failed: {}", e);
                        Ok(error_response(e))
                    }
                }
            }
            Flow::Forward(request) => {
                match forwarder::forward(request, &self.options.target, self.options.max_body_size)
                    .await
                {
                    Ok(response) => Ok(response),
                    Err(e) => {
                        warn!("forward failed: {}", e);
                        Ok(error_response(e))
                    }
                }
            }
        }
    }
}

fn error_response(error: RelayError) -> Response<Body> {
    match error {
        RelayError::Timeout { .. } => {
            simple_response(StatusCode::GATEWAY_TIMEOUT, "Upstream timeout")
        }
        RelayError::PayloadTooLarge { .. } => {
            simple_response(StatusCode::SERVICE_UNAVAILABLE, "Maximum body size exceeded")
        }
        _ => simple_response(StatusCode::BAD_GATEWAY, "Bad gateway"),
    }
}

fn simple_response(status: StatusCode, message: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(message))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
