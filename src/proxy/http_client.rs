//! Shared upstream HTTP client.
//!
//! A single pooled hyper client is reused for every upstream call so
//! connections are pooled process-wide. The client speaks both http and
//! https (rustls with webpki roots) and is safe for concurrent use.

use std::time::Duration;

use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use once_cell::sync::Lazy;

static SHARED_CLIENT: Lazy<Client<HttpsConnector<HttpConnector>, Body>> = Lazy::new(build_client);

/// The process-wide upstream client.
pub fn shared_client() -> &'static Client<HttpsConnector<HttpConnector>, Body> {
    &SHARED_CLIENT
}

fn build_client() -> Client<HttpsConnector<HttpConnector>, Body> {
    let mut http = HttpConnector::new();
    http.enforce_http(false); // allow https URIs through the base connector
    http.set_nodelay(true);

    let https = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();

    Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(32)
        .build::<_, Body>(https)
}
