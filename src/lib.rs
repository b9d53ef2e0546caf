pub mod config;
pub mod encoding;
pub mod error;
pub mod plugins;
pub mod proxy;
pub mod service;
pub mod traffic;
pub mod version;

// Re-export commonly used types
pub use config::{ConfigFile, RelayOptions, Section};
pub use encoding::{decode_data, encode_data, Encoding};
pub use error::{RelayError, RelayResult};
pub use service::Service;
pub use traffic::{PluginFactory, RequestInfo, TrafficPlugin};
