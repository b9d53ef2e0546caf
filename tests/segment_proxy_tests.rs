//! End-to-end tests for the segment fan-out plugin.

mod common;

use std::time::Duration;

use hyper::header::CONTENT_TYPE;
use hyper::{Body, Method, Request, StatusCode};

use common::{send, TestHarness};
use traffic_relay::{encode_data, Encoding};

fn bundle_request(harness: &TestHarness, path_and_query: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(format!("{}{}", harness.http_url(), path_and_query))
        .header(CONTENT_TYPE, "text/plain")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_navigate_event_fans_out_a_page_call() {
    let harness = TestHarness::start("segment-proxy:\n").await;

    let bundle = r#"{"writeKey":"k","Evts":[{"Kind":37,"Args":["https://example.com"]}]}"#;
    let request = bundle_request(
        &harness,
        "/rec/bundle/v2?writeKey=k&UserId=u",
        bundle.as_bytes().to_vec(),
    );
    let (status, _) = send(request).await;
    assert_eq!(status, StatusCode::OK);

    // The original request reaches the upstream unmodified.
    let original = harness
        .catcher
        .wait_for_request(Duration::from_secs(2), |r| r.path == "/rec/bundle/v2")
        .await
        .expect("original bundle forwarded");
    assert_eq!(original.body, bundle.as_bytes());
    assert_eq!(original.query.as_deref(), Some("writeKey=k&UserId=u"));

    // The side-effect POST lands independently.
    let page = harness
        .catcher
        .wait_for_request(Duration::from_secs(2), |r| r.path == "/v1/page")
        .await
        .expect("page event delivered");
    assert_eq!(page.method, "POST");
    assert_eq!(page.header("content-type"), Some("application/json"));

    let json: serde_json::Value = serde_json::from_slice(&page.body).unwrap();
    assert_eq!(json["writeKey"], "k");
    assert_eq!(json["userId"], "u");
    assert_eq!(json["properties"]["url"], "https://example.com");
    assert_eq!(json["name"], "track https://example.com");
    assert!(json["timestamp"].is_i64());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_multiple_navigate_events_fan_out_individually() {
    let harness = TestHarness::start("segment-proxy:\n").await;

    let bundle = r#"{"writeKey":"k","Evts":[
        {"Kind":37,"Args":["https://example.com"]},
        {"Kind":1,"Args":["not-a-navigate-event"]},
        {"Kind":37,"Args":["https://example.org"]}
    ]}"#;
    let request = bundle_request(
        &harness,
        "/rec/bundle/v2?writeKey=k&UserId=u",
        bundle.as_bytes().to_vec(),
    );
    let (status, _) = send(request).await;
    assert_eq!(status, StatusCode::OK);

    for url in ["https://example.com", "https://example.org"] {
        let page = harness
            .catcher
            .wait_for_request(Duration::from_secs(2), |r| {
                r.path == "/v1/page"
                    && serde_json::from_slice::<serde_json::Value>(&r.body)
                        .map(|json| json["properties"]["url"] == url)
                        .unwrap_or(false)
            })
            .await;
        assert!(page.is_some(), "missing page event for {}", url);
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn test_nested_bundle_paths_are_matched() {
    let harness = TestHarness::start("segment-proxy:\n").await;

    let bundle = r#"{"writeKey":"k","Evts":[{"Kind":37,"Args":["https://example.com"]}]}"#;
    let request = bundle_request(
        &harness,
        "/api/v1/rec/bundle/v2/data?writeKey=k&UserId=u",
        bundle.as_bytes().to_vec(),
    );
    send(request).await;

    // The original path is preserved end to end.
    assert!(harness
        .catcher
        .wait_for_request(Duration::from_secs(2), |r| r.path
            == "/api/v1/rec/bundle/v2/data")
        .await
        .is_some());
    assert!(harness
        .catcher
        .wait_for_request(Duration::from_secs(2), |r| r.path == "/v1/page")
        .await
        .is_some());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_gzip_bundles_are_decoded() {
    let harness = TestHarness::start("segment-proxy:\n").await;

    let bundle = r#"{"writeKey":"k","Evts":[{"Kind":37,"Args":["https://example.com"]}]}"#;
    let encoded = encode_data(bundle.as_bytes(), Encoding::Gzip).unwrap();
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!(
            "{}/rec/bundle/v2?writeKey=k&UserId=u",
            harness.http_url()
        ))
        .header("Content-Encoding", "gzip")
        .body(Body::from(encoded.clone()))
        .unwrap();
    let (status, _) = send(request).await;
    assert_eq!(status, StatusCode::OK);

    // The original body stays gzip-framed; only the fan-out reads it.
    let original = harness
        .catcher
        .wait_for_request(Duration::from_secs(2), |r| r.path == "/rec/bundle/v2")
        .await
        .unwrap();
    assert_eq!(original.body, encoded);

    assert!(harness
        .catcher
        .wait_for_request(Duration::from_secs(2), |r| r.path == "/v1/page")
        .await
        .is_some());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_non_matching_traffic_is_ignored() {
    let harness = TestHarness::start("segment-proxy:\n").await;

    // Wrong path: nothing fans out.
    let request = bundle_request(
        &harness,
        "/other/path?UserId=u",
        br#"{"writeKey":"k","Evts":[{"Kind":37,"Args":["https://example.com"]}]}"#.to_vec(),
    );
    send(request).await;

    // Non-navigate events: nothing fans out either.
    let request = bundle_request(
        &harness,
        "/rec/bundle/v2?UserId=u",
        br#"{"writeKey":"k","Evts":[{"Kind":1,"Args":["other-event"]}]}"#.to_vec(),
    );
    send(request).await;

    // Unparseable bundles pass through untouched.
    let request = bundle_request(&harness, "/rec/bundle/v2?UserId=u", b"not json".to_vec());
    let (status, _) = send(request).await;
    assert_eq!(status, StatusCode::OK);

    assert!(harness
        .catcher
        .wait_for_request(Duration::from_millis(300), |r| r.path == "/v1/page")
        .await
        .is_none());
    assert_eq!(harness.catcher.requests().len(), 3);

    harness.shutdown().await;
}
