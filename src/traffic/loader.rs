//! Plugin registry and loader.
//!
//! Factories are resolved against the configuration file in registration
//! order, which fixes the pipeline's execution order. Factories that report
//! no effective configuration are dropped; factory errors abort startup.

use tracing::{debug, info};

use crate::config::ConfigFile;
use crate::error::RelayResult;
use crate::plugins::{
    content_blocker::ContentBlockerFactory, content_enricher::ContentEnricherFactory,
    cookies::CookiesFactory, headers::HeadersFactory, paths::PathsFactory,
    segment_proxy::SegmentProxyFactory,
};
use crate::traffic::plugin::{PluginFactory, TrafficPlugin};

/// The factories available in production, in pipeline order.
pub fn default_factories() -> Vec<Box<dyn PluginFactory>> {
    vec![
        Box::new(ContentBlockerFactory),
        Box::new(ContentEnricherFactory),
        Box::new(CookiesFactory),
        Box::new(HeadersFactory),
        Box::new(PathsFactory),
        Box::new(SegmentProxyFactory),
    ]
}

/// Instantiate plugins from their factories, preserving registration order.
pub fn load_plugins(
    factories: &[Box<dyn PluginFactory>],
    config: &ConfigFile,
) -> RelayResult<Vec<Box<dyn TrafficPlugin>>> {
    let mut plugins = Vec::new();
    for factory in factories {
        let section = config.section(factory.name());
        match factory.new_plugin(section.as_ref())? {
            Some(plugin) => {
                info!(plugin = factory.name(), "Loaded traffic plugin");
                plugins.push(plugin);
            }
            None => {
                debug!(
                    plugin = factory.name(),
                    "Plugin has no effective configuration, skipping"
                );
            }
        }
    }
    Ok(plugins)
}
