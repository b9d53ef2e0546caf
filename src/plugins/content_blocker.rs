//! Content blocker plugin.
//!
//! Applies ordered exclude/mask regex rules to header values and to
//! JSON/text request bodies, transparently decoding and re-encoding gzip
//! bodies. Exclusion always takes priority over masking: rules are
//! stable-sorted so every exclude rule runs before any mask rule.
//!
//! This plugin cannot inspect upgraded connections, so a request that asks
//! for an upgrade while the blocker is active is refused outright.

use async_trait::async_trait;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE, UPGRADE};
use hyper::{Body, Request, Response, StatusCode};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::Section;
use crate::encoding::{decode_data, encode_data, Encoding};
use crate::error::{RelayError, RelayResult};
use crate::traffic::body;
use crate::traffic::plugin::{PluginFactory, RequestInfo, TrafficPlugin};
use crate::version::RELAY_RELEASE;

pub const PLUGIN_NAME: &str = "block-content";

/// Stamped on every request the blocker has processed.
pub const BLOCKER_VERSION_HEADER: &str = "x-relay-content-blocker-version";

/// Single-rule aliases for the `body` and `header` rule lists.
const ENV_RULE_OPTIONS: &[(&str, RuleKind, RuleTarget)] = &[
    ("TRAFFIC_EXCLUDE_BODY_CONTENT", RuleKind::Exclude, RuleTarget::Body),
    ("TRAFFIC_MASK_BODY_CONTENT", RuleKind::Mask, RuleTarget::Body),
    ("TRAFFIC_EXCLUDE_HEADER_CONTENT", RuleKind::Exclude, RuleTarget::Header),
    ("TRAFFIC_MASK_HEADER_CONTENT", RuleKind::Mask, RuleTarget::Header),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    Exclude,
    Mask,
}

impl RuleKind {
    fn parse(kind: &str) -> RelayResult<Self> {
        match kind {
            "exclude" => Ok(RuleKind::Exclude),
            "mask" => Ok(RuleKind::Mask),
            other => Err(RelayError::config(format!(
                "unknown '{}' rule kind: {}",
                PLUGIN_NAME, other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RuleTarget {
    Body,
    Header,
}

struct BlockRule {
    kind: RuleKind,
    pattern: Regex,
}

impl BlockRule {
    fn apply<'t>(&self, text: &'t str) -> std::borrow::Cow<'t, str> {
        match self.kind {
            RuleKind::Exclude => self.pattern.replace_all(text, ""),
            RuleKind::Mask => self
                .pattern
                .replace_all(text, |caps: &regex::Captures| {
                    "*".repeat(caps[0].chars().count())
                }),
        }
    }
}

pub struct ContentBlockerFactory;

impl PluginFactory for ContentBlockerFactory {
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

        let mut body_rules = parse_rules(section, "body")?;
        let mut header_rules = parse_rules(section, "header")?;

        for (option, kind, target) in ENV_RULE_OPTIONS {
            if let Some(pattern) = section.get_str(option)? {
                let rule = compile_rule(*kind, &pattern)?;
                match target {
                    RuleTarget::Body => body_rules.push(rule),
                    RuleTarget::Header => header_rules.push(rule),
                }
            }
        }

        if body_rules.is_empty() && header_rules.is_empty() {
            return Ok(None);
        }

        // Exclusion-over-masking is an invariant, not a config accident:
        // stable-sort so exclude rules always run first.
        body_rules.sort_by_key(|rule| rule.kind == RuleKind::Mask);
        header_rules.sort_by_key(|rule| rule.kind == RuleKind::Mask);

        Ok(Some(Box::new(ContentBlockerPlugin {
            body_rules,
            header_rules,
        })))
    }
}

fn parse_rules(section: &Section, key: &str) -> RelayResult<Vec<BlockRule>> {
    let Some(entries) = section.get_rule_list(key)? else {
        return Ok(Vec::new());
    };
    entries
        .iter()
        .map(|(kind, pattern)| compile_rule(RuleKind::parse(kind)?, pattern))
        .collect()
}

fn compile_rule(kind: RuleKind, pattern: &str) -> RelayResult<BlockRule> {
    let pattern = Regex::new(pattern).map_err(|e| {
        RelayError::config(format!("invalid '{}' rule regex: {}", PLUGIN_NAME, e))
    })?;
    Ok(BlockRule { kind, pattern })
}

struct ContentBlockerPlugin {
    body_rules: Vec<BlockRule>,
    header_rules: Vec<BlockRule>,
}

#[async_trait]
impl TrafficPlugin for ContentBlockerPlugin {
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

        // Upgraded connections would bypass body inspection; fail closed.
        if request.headers().contains_key(UPGRADE) {
            warn!(
                plugin = PLUGIN_NAME,
                "refusing upgrade request while content blocking is active"
            );
            return Some(
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::from("Upgrades are not supported with content blocking"))
                    .unwrap_or_else(|_| Response::new(Body::empty())),
            );
        }

        self.block_header_content(request);
        self.block_body_content(request).await;

        request.headers_mut().insert(
            BLOCKER_VERSION_HEADER,
            HeaderValue::from_static(RELAY_RELEASE),
        );

        None
    }
}

impl ContentBlockerPlugin {
    fn apply_rules(rules: &[BlockRule], text: &str) -> String {
        let mut text = text.to_string();
        for rule in rules {
            text = rule.apply(&text).into_owned();
        }
        text
    }

    /// Rewrite each header value independently; names are never touched.
    fn block_header_content(&self, request: &mut Request<Body>) {
        if self.header_rules.is_empty() {
            return;
        }

        let names: Vec<HeaderName> = request.headers().keys().cloned().collect();
        for name in names {
            let values: Vec<HeaderValue> = request.headers().get_all(&name).iter().cloned().collect();
            let mut rewritten = Vec::with_capacity(values.len());
            let mut changed = false;
            for value in values {
                match value.to_str() {
                    Ok(text) => {
                        let blocked = Self::apply_rules(&self.header_rules, text);
                        if blocked != text {
                            changed = true;
                        }
                        match HeaderValue::from_str(&blocked) {
                            Ok(value) => rewritten.push(value),
                            Err(_) => rewritten.push(value.clone()),
                        }
                    }
                    Err(_) => {
                        debug!(plugin = PLUGIN_NAME, header = %name, "skipping non-ASCII header value");
                        rewritten.push(value);
                    }
                }
            }
            if changed {
                let headers = request.headers_mut();
                headers.remove(&name);
                for value in rewritten {
                    headers.append(&name, value);
                }
            }
        }
    }

    /// Rewrite JSON/text bodies, decoding and re-encoding as needed. Any
    /// failure along the way leaves the original body untouched.
    async fn block_body_content(&self, request: &mut Request<Body>) {
        if self.body_rules.is_empty() || !has_text_content_type(request) {
            return;
        }

        let encoding = match Encoding::for_request(request) {
            Ok(encoding) => encoding,
            Err(e) => {
                warn!(plugin = PLUGIN_NAME, "cannot determine body encoding: {}", e);
                return;
            }
        };

        let captured = match body::capture(request).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(plugin = PLUGIN_NAME, "failed to read request body: {}", e);
                return;
            }
        };
        if captured.is_empty() {
            return;
        }

        let decoded = match decode_data(&captured, encoding) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(plugin = PLUGIN_NAME, "failed to decode request body: {}", e);
                return;
            }
        };

        let text = match String::from_utf8(decoded) {
            Ok(text) => text,
            Err(e) => {
                warn!(plugin = PLUGIN_NAME, "request body is not UTF-8: {}", e);
                return;
            }
        };

        let blocked = Self::apply_rules(&self.body_rules, &text);

        match encode_data(blocked.as_bytes(), encoding) {
            Ok(encoded) => body::replace(request, encoded),
            Err(e) => warn!(plugin = PLUGIN_NAME, "failed to re-encode request body: {}", e),
        }
    }
}

fn has_text_content_type(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            let media = v.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            media == "application/json" || media.starts_with("text/")
        })
        .unwrap_or(false)
}
