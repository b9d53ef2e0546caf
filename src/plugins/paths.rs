//! Path-prefix rewriting plugin.
//!
//! The `paths` section is an ordered mapping of source prefixes to target
//! prefixes. The first matching prefix rewrites the request path; requests
//! that match nothing pass through untouched.

use async_trait::async_trait;
use hyper::http::uri::{PathAndQuery, Uri};
use hyper::{Body, Request, Response};
use tracing::{debug, warn};

use crate::config::Section;
use crate::error::RelayResult;
use crate::traffic::plugin::{PluginFactory, RequestInfo, TrafficPlugin};

pub const PLUGIN_NAME: &str = "paths";

pub struct PathsFactory;

impl PluginFactory for PathsFactory {
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
        let rules = section.str_entries()?;
        if rules.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(PathsPlugin { rules })))
    }
}

struct PathsPlugin {
    rules: Vec<(String, String)>,
}

#[async_trait]
impl TrafficPlugin for PathsPlugin {
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

        let path = request.uri().path();
        let Some((source, target)) = self
            .rules
            .iter()
            .find(|(source, _)| path.starts_with(source.as_str()))
        else {
            return None;
        };

        let rewritten = format!("{}{}", target, &path[source.len()..]);
        let path_and_query = match request.uri().query() {
            Some(query) => format!("{}?{}", rewritten, query),
            None => rewritten.clone(),
        };

        match path_and_query.parse::<PathAndQuery>() {
            Ok(pq) => {
                let mut parts = request.uri().clone().into_parts();
                parts.path_and_query = Some(pq);
                match Uri::from_parts(parts) {
                    Ok(uri) => {
                        debug!(plugin = PLUGIN_NAME, from = path, to = %rewritten, "rewrote path");
                        *request.uri_mut() = uri;
                    }
                    Err(e) => warn!(plugin = PLUGIN_NAME, "invalid rewritten URI: {}", e),
                }
            }
            Err(e) => warn!(plugin = PLUGIN_NAME, "invalid rewritten path: {}", e),
        }

        None
    }
}
