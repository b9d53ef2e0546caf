//! WebSocket tunnel: once both sides agree to upgrade, the relay becomes a
//! transparent byte pipe between the client and the upstream.

use hyper::header::HOST;
use hyper::{Body, Request, Response, StatusCode, Uri};
use tracing::{debug, warn};

use crate::error::{RelayError, RelayResult};
use crate::proxy::forwarder::UPSTREAM_TIMEOUT;
use crate::proxy::http_client::shared_client;

/// Relay a WebSocket upgrade request.
///
/// The upstream is dialed with the same path/query and the full inbound
/// header set (upgrade headers intact). On a 101 from the upstream, its
/// response is mirrored to the client and both connections are upgraded; a
/// spawned task then copies bytes in both directions until either side
/// closes. A non-101 upstream response passes through verbatim.
pub async fn tunnel(mut request: Request<Body>, target: &Uri) -> RelayResult<Response<Body>> {
    let authority = target
        .authority()
        .ok_or_else(|| RelayError::proxy(format!("target URL missing authority: {}", target)))?;
    let scheme = target.scheme_str().unwrap_or("http");
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let upstream_uri: Uri = format!("{}://{}{}", scheme, authority, path_and_query)
        .parse()
        .map_err(|e| RelayError::proxy(format!("invalid upstream URL: {}", e)))?;

    let mut upstream_request = Request::builder()
        .method(request.method().clone())
        .uri(upstream_uri)
        .body(Body::empty())?;
    *upstream_request.headers_mut() = request.headers().clone();
    upstream_request.headers_mut().insert(
        HOST,
        authority
            .as_str()
            .parse()
            .map_err(|e| RelayError::proxy(format!("invalid upstream host: {}", e)))?,
    );

    let upstream_response =
        tokio::time::timeout(UPSTREAM_TIMEOUT, shared_client().request(upstream_request))
            .await
            .map_err(|_| RelayError::timeout(UPSTREAM_TIMEOUT, "upstream upgrade"))?
            .map_err(RelayError::from)?;

    if upstream_response.status() != StatusCode::SWITCHING_PROTOCOLS {
        debug!(
            status = %upstream_response.status(),
            "upstream declined the upgrade"
        );
        return Ok(upstream_response);
    }

    // Mirror the upstream's 101 (accept key and friends included) so the
    // client handshake completes against the upstream's own answer.
    let mut response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .body(Body::empty())?;
    *response.headers_mut() = upstream_response.headers().clone();

    tokio::spawn(async move {
        let mut upstream = match hyper::upgrade::on(upstream_response).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!("upstream upgrade failed: {}", e);
                return;
            }
        };
        let mut client = match hyper::upgrade::on(&mut request).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!("client upgrade failed: {}", e);
                return;
            }
        };

        match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
            Ok((client_to_upstream, upstream_to_client)) => debug!(
                client_to_upstream,
                upstream_to_client, "tunnel closed cleanly"
            ),
            Err(e) => debug!("tunnel closed: {}", e),
        }
    });

    Ok(response)
}
