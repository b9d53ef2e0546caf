//! The request pipeline: ordered plugin execution and the decision of what
//! to do with the request afterwards.

use hyper::header::{HeaderValue, CONTENT_LENGTH, UPGRADE};
use hyper::{Body, Request, Response, StatusCode};
use tracing::{debug, warn};

use crate::traffic::plugin::{RequestInfo, TrafficPlugin};
use crate::version::{RELAY_RELEASE, RELAY_VERSION_HEADER};

/// What the pipeline decided to do with a request.
pub enum Flow {
    /// An interceptor produced the response; nothing is forwarded.
    Serviced(Response<Body>),
    /// The request asks for a WebSocket upgrade; hand off to the tunnel.
    Upgrade(Request<Body>),
    /// Forward the request to the upstream.
    Forward(Request<Body>),
}

/// Runs the plugin chain and applies the post-pipeline gates.
pub struct TrafficPipeline {
    plugins: Vec<Box<dyn TrafficPlugin>>,
    max_body_size: Option<u64>,
}

impl TrafficPipeline {
    pub fn new(plugins: Vec<Box<dyn TrafficPlugin>>, max_body_size: Option<u64>) -> Self {
        Self {
            plugins,
            max_body_size,
        }
    }

    /// Names of the loaded plugins, in execution order.
    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Run every plugin in registration order, then decide the flow.
    ///
    /// All plugins run even after the request has been serviced: they observe
    /// `info.serviced` and must no-op their own response writing, which lets
    /// downstream plugins watch traffic they are not allowed to answer.
    pub async fn process(&self, mut request: Request<Body>, info: &mut RequestInfo) -> Flow {
        let mut serviced_response = None;

        for plugin in &self.plugins {
            if let Some(response) = plugin.handle_request(&mut request, info).await {
                if info.serviced {
                    warn!(
                        plugin = plugin.name(),
                        "plugin produced a response for an already-serviced request; discarding"
                    );
                } else {
                    debug!(plugin = plugin.name(), "request serviced by plugin");
                    info.serviced = true;
                    serviced_response = Some(response);
                }
            }
        }

        if let Some(response) = serviced_response {
            return Flow::Serviced(response);
        }

        if is_websocket_upgrade(&request) {
            // Tunnel mode bypasses the body-size gate; the upstream request
            // still carries the forwarded headers.
            stamp_forwarded_headers(&mut request, info);
            return Flow::Upgrade(request);
        }

        if let Some(cap) = self.max_body_size {
            match declared_content_length(&request) {
                Some(length) if length <= cap => {}
                declared => {
                    // Fail closed: an undeclared or oversized body is refused
                    // before any upstream contact.
                    warn!(
                        ?declared,
                        cap, "request body exceeds or does not declare a length within the cap"
                    );
                    return Flow::Serviced(body_too_large_response());
                }
            }
        }

        stamp_forwarded_headers(&mut request, info);
        Flow::Forward(request)
    }
}

/// Whether the request asks to be upgraded to a WebSocket.
pub fn is_websocket_upgrade(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

fn declared_content_length(request: &Request<Body>) -> Option<u64> {
    request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

fn body_too_large_response() -> Response<Body> {
    Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .body(Body::from("Maximum body size exceeded"))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Stamp the standard forwarded headers. The `X-Forwarded-*` family is
/// appended so client-sent values survive as separate entries; the relay
/// version is authoritative and inserted.
fn stamp_forwarded_headers(request: &mut Request<Body>, info: &RequestInfo) {
    let headers = request.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&info.client_addr.ip().to_string()) {
        headers.append("x-forwarded-for", value);
    }
    if let Ok(value) = HeaderValue::from_str(&info.client_addr.port().to_string()) {
        headers.append("x-forwarded-port", value);
    }
    headers.append("x-forwarded-proto", HeaderValue::from_static(info.inbound_scheme));
    headers.insert(RELAY_VERSION_HEADER, HeaderValue::from_static(RELAY_RELEASE));
}
