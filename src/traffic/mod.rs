pub mod body;
pub mod loader;
pub mod pipeline;
pub mod plugin;

pub use loader::{default_factories, load_plugins};
pub use pipeline::{Flow, TrafficPipeline};
pub use plugin::{PluginFactory, RequestInfo, TrafficPlugin};
