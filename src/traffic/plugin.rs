use std::net::SocketAddr;

use async_trait::async_trait;
use hyper::{Body, Request, Response, Uri};

use crate::config::Section;
use crate::error::RelayResult;

/// Per-request state threaded through the traffic pipeline.
///
/// `serviced` is the single-writer signal that a response has already been
/// produced: once set, no later stage may write a response. Plugins receive
/// the current value so they can short-circuit their own work, and they may
/// still observe the request after it has been serviced.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// True once some interceptor has produced the response.
    pub serviced: bool,
    /// Address of the inbound client connection.
    pub client_addr: SocketAddr,
    /// Scheme of the inbound transport, "http" or "https".
    pub inbound_scheme: &'static str,
    /// Upstream base URL the relay forwards to.
    pub target: Uri,
}

impl RequestInfo {
    pub fn new(client_addr: SocketAddr, inbound_scheme: &'static str, target: Uri) -> Self {
        Self {
            serviced: false,
            client_addr,
            inbound_scheme,
            target,
        }
    }
}

/// An ordered element of the request-processing pipeline.
///
/// A plugin may mutate the request (headers, URI, method, body) or answer it
/// outright by returning a response, which marks the request as serviced and
/// prevents any later stage from writing. Plugins must be no-ops on requests
/// that are already serviced, and any plugin that reads the body must leave
/// behind a fresh, equivalent body (see [`crate::traffic::body`]).
#[async_trait]
pub trait TrafficPlugin: Send + Sync {
    /// Stable identifier, also the name of the plugin's config section.
    fn name(&self) -> &str;

    /// Process one request. `Some(response)` services the request.
    async fn handle_request(
        &self,
        request: &mut Request<Body>,
        info: &mut RequestInfo,
    ) -> Option<Response<Body>>;
}

/// Builds a plugin from its configuration section.
///
/// Returning `Ok(None)` means the plugin has no effective configuration and
/// should be skipped. Errors (malformed regex, type mismatches) are fatal at
/// load time.
pub trait PluginFactory: Send + Sync {
    /// The plugin name, used as the config section key.
    fn name(&self) -> &'static str;

    /// Instantiate the plugin from its section, if it has anything to do.
    fn new_plugin(&self, section: Option<&Section>)
        -> RelayResult<Option<Box<dyn TrafficPlugin>>>;
}
