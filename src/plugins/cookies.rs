//! Cookie allowlist plugin.
//!
//! All inbound `Cookie` headers are parsed, filtered against the allowlist,
//! and re-emitted as at most one merged header. With no configuration the
//! allowlist is empty, so no cookies reach the upstream by default.

use std::collections::HashSet;

use async_trait::async_trait;
use hyper::header::{HeaderValue, COOKIE};
use hyper::{Body, Request, Response};
use tracing::debug;

use crate::config::Section;
use crate::error::RelayResult;
use crate::traffic::plugin::{PluginFactory, RequestInfo, TrafficPlugin};

pub const PLUGIN_NAME: &str = "cookies";

/// Space-separated allowlist alias, merged with `allowlist`.
pub const COOKIES_ENV_OPTION: &str = "TRAFFIC_RELAY_COOKIES";

pub struct CookiesFactory;

impl PluginFactory for CookiesFactory {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn new_plugin(
        &self,
        section: Option<&Section>,
    ) -> RelayResult<Option<Box<dyn TrafficPlugin>>> {
        let mut allowed = HashSet::new();
        if let Some(section) = section {
            if let Some(names) = section.get_str_list("allowlist")? {
                allowed.extend(names);
            }
            if let Some(tokens) = section.get_str(COOKIES_ENV_OPTION)? {
                allowed.extend(tokens.split_whitespace().map(str::to_string));
            }
        }
        // Always active: the empty allowlist is the default-drop policy.
        Ok(Some(Box::new(CookiesPlugin { allowed })))
    }
}

struct CookiesPlugin {
    allowed: HashSet<String>,
}

#[async_trait]
impl TrafficPlugin for CookiesPlugin {
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

        let mut kept = Vec::new();
        let mut seen = HashSet::new();
        for header in request.headers().get_all(COOKIE) {
            let Ok(value) = header.to_str() else {
                debug!(plugin = PLUGIN_NAME, "dropping non-ASCII Cookie header");
                continue;
            };
            for cookie in value.split(';') {
                let cookie = cookie.trim();
                if cookie.is_empty() {
                    continue;
                }
                let name = cookie.split('=').next().unwrap_or(cookie);
                if self.allowed.contains(name) && seen.insert(name.to_string()) {
                    kept.push(cookie.to_string());
                }
            }
        }

        let headers = request.headers_mut();
        headers.remove(COOKIE);
        if !kept.is_empty() {
            if let Ok(merged) = HeaderValue::from_str(&kept.join("; ")) {
                headers.insert(COOKIE, merged);
            }
        }

        None
    }
}
