//! Header allowlist/blocklist plugin.
//!
//! The blocklist is applied first, then the allowlist when one is
//! configured; a name on both lists stays blocked. Matching is
//! case-insensitive. Unless overridden, the blocklist contains `Cookie`, so
//! cookie policy stays with the cookies plugin.

use std::collections::HashSet;

use async_trait::async_trait;
use hyper::header::HeaderName;
use hyper::{Body, Request, Response};

use crate::config::Section;
use crate::error::RelayResult;
use crate::traffic::plugin::{PluginFactory, RequestInfo, TrafficPlugin};

pub const PLUGIN_NAME: &str = "headers";

pub struct HeadersFactory;

impl PluginFactory for HeadersFactory {
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

        let blocklist: HashSet<String> = match section.get_str_list("blocklist")? {
            Some(names) => names.iter().map(|n| n.to_ascii_lowercase()).collect(),
            None => ["cookie".to_string()].into(),
        };
        let allowlist: Option<HashSet<String>> = section
            .get_str_list("allowlist")?
            .map(|names| names.iter().map(|n| n.to_ascii_lowercase()).collect());

        Ok(Some(Box::new(HeadersPlugin {
            blocklist,
            allowlist,
        })))
    }
}

struct HeadersPlugin {
    blocklist: HashSet<String>,
    allowlist: Option<HashSet<String>>,
}

#[async_trait]
impl TrafficPlugin for HeadersPlugin {
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

        // Header names in hyper are already lowercase.
        let doomed: Vec<HeaderName> = request
            .headers()
            .keys()
            .filter(|name| {
                let name = name.as_str();
                if self.blocklist.contains(name) {
                    return true;
                }
                match &self.allowlist {
                    Some(allowed) => !allowed.contains(name),
                    None => false,
                }
            })
            .cloned()
            .collect();

        let headers = request.headers_mut();
        for name in doomed {
            headers.remove(name);
        }

        None
    }
}
