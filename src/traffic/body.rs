//! Body capture-and-rewind helpers.
//!
//! Request bodies are single-consumer streams, so every plugin read goes
//! through [`capture`], which buffers the body and installs a fresh,
//! identical one before returning. A plugin that rewrites the body uses
//! [`replace`], which keeps the body bytes and the `Content-Length` header
//! in agreement — the invariant the forwarder relies on.

use bytes::Bytes;
use hyper::header::CONTENT_LENGTH;
use hyper::{Body, Request};

use crate::error::{RelayError, RelayResult};

/// Read the full request body, then install an identical replacement so the
/// request remains forwardable. Returns the captured bytes.
pub async fn capture(request: &mut Request<Body>) -> RelayResult<Bytes> {
    let body = std::mem::replace(request.body_mut(), Body::empty());
    let bytes = hyper::body::to_bytes(body)
        .await
        .map_err(|e| RelayError::internal(format!("failed to read request body: {}", e)))?;
    *request.body_mut() = Body::from(bytes.clone());
    Ok(bytes)
}

/// Install a new request body and bring `Content-Length` along with it.
pub fn replace(request: &mut Request<Body>, bytes: Vec<u8>) {
    let len = bytes.len();
    request
        .headers_mut()
        .insert(CONTENT_LENGTH, hyper::header::HeaderValue::from(len));
    *request.body_mut() = Body::from(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_leaves_request_readable() {
        let mut request = Request::builder()
            .uri("http://localhost/")
            .body(Body::from("payload bytes"))
            .unwrap();

        let first = capture(&mut request).await.unwrap();
        assert_eq!(&first[..], b"payload bytes");

        // The body can be captured again with identical contents.
        let second = capture(&mut request).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_replace_updates_content_length() {
        let mut request = Request::builder()
            .uri("http://localhost/")
            .header(CONTENT_LENGTH, "4")
            .body(Body::from("body"))
            .unwrap();

        replace(&mut request, b"a longer body".to_vec());
        assert_eq!(request.headers().get(CONTENT_LENGTH).unwrap(), "13");

        let bytes = capture(&mut request).await.unwrap();
        assert_eq!(&bytes[..], b"a longer body");
    }
}
