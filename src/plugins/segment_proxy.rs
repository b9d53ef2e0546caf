//! Segment event fan-out plugin.
//!
//! Watches for Segment-shaped recording bundles and re-publishes every
//! navigate event as an independent `POST /v1/page` against the upstream
//! target. The original request is always passed through untouched; the
//! fan-out requests are fire-and-forget with a bounded timeout so they can
//! never block or outlive the relay indefinitely.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use hyper::{Body, Method, Request, Response, Uri};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info as log_info, warn};

use crate::config::Section;
use crate::encoding::{decode_data, Encoding};
use crate::error::RelayResult;
use crate::proxy::http_client::shared_client;
use crate::traffic::body;
use crate::traffic::plugin::{PluginFactory, RequestInfo, TrafficPlugin};

pub const PLUGIN_NAME: &str = "segment-proxy";

/// Bundle paths contain this marker.
const BUNDLE_PATH_MARKER: &str = "/rec/bundle/v2";

/// Event kind for page navigations.
const NAVIGATE_EVENT_KIND: i64 = 37;

/// Side-effect requests may not outlive this bound.
const SIDE_EFFECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct SegmentEvent {
    #[serde(rename = "Kind", default)]
    kind: i64,
    #[serde(rename = "Args", default)]
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SegmentBundle {
    #[serde(rename = "writeKey", default)]
    write_key: String,
    #[serde(rename = "Evts", default)]
    events: Vec<SegmentEvent>,
}

pub struct SegmentProxyFactory;

impl PluginFactory for SegmentProxyFactory {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn new_plugin(
        &self,
        section: Option<&Section>,
    ) -> RelayResult<Option<Box<dyn TrafficPlugin>>> {
        // The section has no options; its presence enables the plugin.
        if section.is_none() {
            return Ok(None);
        }
        Ok(Some(Box::new(SegmentProxyPlugin)))
    }
}

struct SegmentProxyPlugin;

#[async_trait]
impl TrafficPlugin for SegmentProxyPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn handle_request(
        &self,
        request: &mut Request<Body>,
        info: &mut RequestInfo,
    ) -> Option<Response<Body>> {
        if info.serviced {
            return None;
        }

        if !request.uri().path().contains(BUNDLE_PATH_MARKER) {
            return None;
        }

        let captured = match body::capture(request).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(plugin = PLUGIN_NAME, "failed to read request body: {}", e);
                return None;
            }
        };
        if captured.is_empty() {
            return None;
        }

        let encoding = match Encoding::for_request(request) {
            Ok(encoding) => encoding,
            Err(e) => {
                warn!(plugin = PLUGIN_NAME, "cannot determine body encoding: {}", e);
                return None;
            }
        };
        let content = match decode_data(&captured, encoding) {
            Ok(content) => content,
            Err(e) => {
                warn!(plugin = PLUGIN_NAME, "failed to decode bundle body: {}", e);
                return None;
            }
        };

        let Ok(bundle) = serde_json::from_slice::<SegmentBundle>(&content) else {
            return None;
        };

        let user_id = query_param(request.uri(), "UserId").unwrap_or_default();

        let mut published = 0;
        for event in &bundle.events {
            if event.kind != NAVIGATE_EVENT_KIND {
                continue;
            }
            let Some(url) = first_string_arg(&event.args) else {
                continue;
            };
            if self.publish_page_event(request, info, &bundle.write_key, &user_id, url) {
                published += 1;
            }
        }

        if published > 0 {
            log_info!(
                plugin = PLUGIN_NAME,
                count = published,
                path = request.uri().path(),
                "published navigate events"
            );
        }

        None
    }
}

impl SegmentProxyPlugin {
    /// Spawn one fire-and-forget page event. Returns whether the request
    /// could be constructed; delivery errors are only logged.
    fn publish_page_event(
        &self,
        original: &Request<Body>,
        info: &RequestInfo,
        write_key: &str,
        user_id: &str,
        url: &str,
    ) -> bool {
        let payload = json!({
            "writeKey": write_key,
            "userId": user_id,
            "timestamp": Utc::now().timestamp(),
            "properties": { "url": url },
            "name": format!("track {}", url),
        });
        let payload = match serde_json::to_vec(&payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(plugin = PLUGIN_NAME, "failed to serialize page event: {}", e);
                return false;
            }
        };

        let Some(authority) = info.target.authority() else {
            warn!(plugin = PLUGIN_NAME, "target URL has no authority");
            return false;
        };
        let scheme = info.target.scheme_str().unwrap_or("http");
        let uri: Uri = match format!("{}://{}/v1/page", scheme, authority).parse() {
            Ok(uri) => uri,
            Err(e) => {
                warn!(plugin = PLUGIN_NAME, "failed to build page event URL: {}", e);
                return false;
            }
        };

        let mut event_request = match Request::builder()
            .method(Method::POST)
            .uri(uri.clone())
            .body(Body::from(payload))
        {
            Ok(request) => request,
            Err(e) => {
                warn!(plugin = PLUGIN_NAME, "failed to build page event request: {}", e);
                return false;
            }
        };

        // Side-effect requests inherit the original headers minus the body
        // length, which belongs to the new payload.
        for (name, value) in original.headers() {
            if name != CONTENT_LENGTH {
                event_request.headers_mut().append(name, value.clone());
            }
        }
        event_request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
            event_request.headers_mut().insert(HOST, host);
        }

        debug!(plugin = PLUGIN_NAME, %uri, url, "publishing navigate event");

        tokio::spawn(async move {
            let outcome =
                tokio::time::timeout(SIDE_EFFECT_TIMEOUT, shared_client().request(event_request))
                    .await;
            match outcome {
                Ok(Ok(response)) => {
                    debug!(plugin = PLUGIN_NAME, status = %response.status(), "page event delivered")
                }
                Ok(Err(e)) => warn!(plugin = PLUGIN_NAME, "page event delivery failed: {}", e),
                Err(_) => warn!(plugin = PLUGIN_NAME, "page event delivery timed out"),
            }
        });

        true
    }
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    })
}

fn first_string_arg(args: &serde_json::Value) -> Option<&str> {
    args.as_array()?.first()?.as_str()
}
