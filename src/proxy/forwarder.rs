//! HTTP forwarder: dispatches pipeline output to the upstream target and
//! streams the response back.

use std::time::Duration;

use hyper::body::HttpBody as _;
use hyper::header::{HeaderMap, HOST};
use hyper::{Body, Request, Response, Uri};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{RelayError, RelayResult};
use crate::proxy::http_client::shared_client;

/// Request-level timeout for upstream calls.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Standard hop-by-hop headers that must not cross the relay.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Forward a request to the upstream target, optionally guarding the body
/// stream against exceeding `limit` bytes.
///
/// The outbound URL joins the target's scheme and authority with the inbound
/// path and query. Errors map to status codes at the caller: `Timeout` to
/// 504, `PayloadTooLarge` to 503, everything else to 502.
pub async fn forward(
    request: Request<Body>,
    target: &Uri,
    limit: Option<u64>,
) -> RelayResult<Response<Body>> {
    let (mut parts, inbound_body) = request.into_parts();

    let authority = target
        .authority()
        .ok_or_else(|| RelayError::proxy(format!("target URL missing authority: {}", target)))?;
    let scheme = target.scheme_str().unwrap_or("http");
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    parts.uri = format!("{}://{}{}", scheme, authority, path_and_query)
        .parse()
        .map_err(|e| RelayError::proxy(format!("invalid upstream URL: {}", e)))?;

    strip_hop_by_hop_headers(&mut parts.headers);
    parts.headers.insert(
        HOST,
        authority
            .as_str()
            .parse()
            .map_err(|e| RelayError::proxy(format!("invalid upstream host: {}", e)))?,
    );

    debug!(uri = %parts.uri, "forwarding request upstream");

    let body = match limit {
        Some(max) => {
            let (body, exceeded_rx) = limited_body(inbound_body, max);
            let upstream_request = Request::from_parts(parts, body);
            return send_with_limit(upstream_request, exceeded_rx).await;
        }
        None => inbound_body,
    };

    let upstream_request = Request::from_parts(parts, body);
    let response = tokio::time::timeout(UPSTREAM_TIMEOUT, shared_client().request(upstream_request))
        .await
        .map_err(|_| RelayError::timeout(UPSTREAM_TIMEOUT, "upstream request"))?
        .map_err(RelayError::from)?;
    Ok(build_downstream_response(response))
}

async fn send_with_limit(
    upstream_request: Request<Body>,
    mut exceeded_rx: oneshot::Receiver<()>,
) -> RelayResult<Response<Body>> {
    let request_future = shared_client().request(upstream_request);
    tokio::select! {
        _ = &mut exceeded_rx => Err(RelayError::payload_too_large(
            "streamed body exceeded the configured cap",
        )),
        result = tokio::time::timeout(UPSTREAM_TIMEOUT, request_future) => match result {
            Ok(Ok(response)) => Ok(build_downstream_response(response)),
            // The upstream may report the aborted body before the limiter's
            // signal is observed; prefer the limit error in that case.
            Ok(Err(e)) => match exceeded_rx.try_recv() {
                Ok(()) => Err(RelayError::payload_too_large(
                    "streamed body exceeded the configured cap",
                )),
                _ => Err(RelayError::from(e)),
            },
            Err(_) => Err(RelayError::timeout(UPSTREAM_TIMEOUT, "upstream request")),
        },
    }
}

/// Wrap a body so the copy aborts once more than `max` bytes have streamed,
/// catching bodies that exceed their declared length.
fn limited_body(mut inbound: Body, max: u64) -> (Body, oneshot::Receiver<()>) {
    let (mut tx, body) = Body::channel();
    let (exceeded_tx, exceeded_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let mut sent: u64 = 0;
        while let Some(chunk) = inbound.data().await {
            match chunk {
                Ok(chunk) => {
                    sent += chunk.len() as u64;
                    if sent > max {
                        let _ = exceeded_tx.send(());
                        tx.abort();
                        return;
                    }
                    if tx.send_data(chunk).await.is_err() {
                        return;
                    }
                }
                Err(_) => {
                    tx.abort();
                    return;
                }
            }
        }
    });

    (body, exceeded_rx)
}

fn build_downstream_response(upstream: Response<Body>) -> Response<Body> {
    let (parts, body) = upstream.into_parts();
    let mut builder = Response::builder().status(parts.status);
    for (name, value) in parts.headers.iter() {
        if !is_hop_by_hop_header(name.as_str()) {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(body)
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

pub fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    // Names listed in Connection are hop-by-hop too; collect them before
    // the header itself is removed.
    let connection_listed: Vec<String> = headers
        .get("connection")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(|name| name.trim().to_ascii_lowercase())
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
    for name in connection_listed {
        headers.remove(name.as_str());
    }
}
