//! Content enricher plugin.
//!
//! Injects configured headers (overwriting) and adds configured fields to
//! JSON object bodies, but only where the field is absent, so enrichment is
//! idempotent. Enrichment never blocks traffic: parse failures leave the
//! body untouched.

use async_trait::async_trait;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, StatusCode};
use tracing::{debug, warn};

use crate::config::Section;
use crate::encoding::{decode_data, encode_data, Encoding};
use crate::error::{RelayError, RelayResult};
use crate::traffic::body;
use crate::traffic::plugin::{PluginFactory, RequestInfo, TrafficPlugin};
use crate::version::RELAY_RELEASE;

pub const PLUGIN_NAME: &str = "enrich-content";

/// Stamped on every request the enricher has processed.
pub const ENRICHER_VERSION_HEADER: &str = "x-relay-content-enricher-version";

pub struct ContentEnricherFactory;

impl PluginFactory for ContentEnricherFactory {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn new_plugin(
        &self,
        section: Option<&Section>,
    ) -> RelayResult<Option<Box<dyn TrafficPlugin>>> {
        let Some(section) = section else {
            return Ok(None);
        };

        let body_enrichments = section.get_value_map("body")?.unwrap_or_default();

        let mut header_enrichments = Vec::new();
        for (name, value) in section.get_str_map("headers")?.unwrap_or_default() {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                RelayError::config(format!("invalid '{}' header name '{}': {}", PLUGIN_NAME, name, e))
            })?;
            let value = HeaderValue::from_str(&value).map_err(|e| {
                RelayError::config(format!("invalid '{}' header value for {}: {}", PLUGIN_NAME, name, e))
            })?;
            header_enrichments.push((name, value));
        }

        if body_enrichments.is_empty() && header_enrichments.is_empty() {
            return Ok(None);
        }

        Ok(Some(Box::new(ContentEnricherPlugin {
            body_enrichments,
            header_enrichments,
        })))
    }
}

struct ContentEnricherPlugin {
    body_enrichments: Vec<(String, serde_json::Value)>,
    header_enrichments: Vec<(HeaderName, HeaderValue)>,
}

#[async_trait]
impl TrafficPlugin for ContentEnricherPlugin {
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

        for (name, value) in &self.header_enrichments {
            request.headers_mut().insert(name.clone(), value.clone());
        }

        if let Err(response) = self.enrich_body_content(request).await {
            return Some(response);
        }

        request.headers_mut().insert(
            ENRICHER_VERSION_HEADER,
            HeaderValue::from_static(RELAY_RELEASE),
        );

        None
    }
}

impl ContentEnricherPlugin {
    /// Add absent fields to a JSON object body. Failures to read the body
    /// are answered with a 500; everything else passes through.
    async fn enrich_body_content(&self, request: &mut Request<Body>) -> Result<(), Response<Body>> {
        if self.body_enrichments.is_empty() || !is_json_content_type(request) {
            return Ok(());
        }

        let encoding = match Encoding::for_request(request) {
            Ok(encoding) => encoding,
            Err(e) => {
                warn!(plugin = PLUGIN_NAME, "cannot determine body encoding: {}", e);
                return Ok(());
            }
        };

        let captured = match body::capture(request).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(plugin = PLUGIN_NAME, "error reading request body: {}", e);
                return Err(Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::from("Error reading request body"))
                    .unwrap_or_else(|_| Response::new(Body::empty())));
            }
        };
        if captured.is_empty() {
            debug!(plugin = PLUGIN_NAME, "skipping enrichment for empty body");
            return Ok(());
        }

        let decoded = match decode_data(&captured, encoding) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(plugin = PLUGIN_NAME, "failed to decode request body: {}", e);
                return Ok(());
            }
        };

        let mut json: serde_json::Value = match serde_json::from_slice(&decoded) {
            Ok(json) => json,
            Err(e) => {
                warn!(plugin = PLUGIN_NAME, "cannot enrich non-JSON body: {}", e);
                return Ok(());
            }
        };
        let Some(object) = json.as_object_mut() else {
            debug!(plugin = PLUGIN_NAME, "skipping enrichment for non-object JSON body");
            return Ok(());
        };

        for (key, value) in &self.body_enrichments {
            if !object.contains_key(key) {
                object.insert(key.clone(), value.clone());
            } else {
                debug!(plugin = PLUGIN_NAME, key = %key, "field already present, not enriched");
            }
        }

        let serialized = match serde_json::to_vec(&json) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!(plugin = PLUGIN_NAME, "error serializing enriched body: {}", e);
                return Ok(());
            }
        };

        match encode_data(&serialized, encoding) {
            Ok(encoded) => body::replace(request, encoded),
            Err(e) => warn!(plugin = PLUGIN_NAME, "failed to re-encode request body: {}", e),
        }

        Ok(())
    }
}

fn is_json_content_type(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(';')
                .next()
                .unwrap_or("")
                .trim()
                .eq_ignore_ascii_case("application/json")
        })
        .unwrap_or(false)
}
