/// Release string reported by the relay in its version headers.
pub const RELAY_RELEASE: &str = concat!("v", env!("CARGO_PKG_VERSION"));

/// Header stamped on every forwarded request. Lowercase because hyper
/// stores and writes canonical lowercase names.
pub const RELAY_VERSION_HEADER: &str = "x-relay-version";
