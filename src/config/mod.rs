//! Configuration loading for the relay.
//!
//! Configuration is a YAML document with one top-level section per plugin
//! name plus a `relay` section for the relay itself. Sections are accessed
//! through the dynamically typed [`Section`] view because every plugin owns
//! its own section schema. `${VAR}` references in the raw document are
//! expanded from the environment before parsing.

pub mod relay;
pub mod section;

pub use relay::RelayOptions;
pub use section::Section;

use std::env;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use tracing::info;

use crate::error::{RelayError, RelayResult};

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern"));

/// A parsed configuration document.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    root: Mapping,
}

impl ConfigFile {
    /// Parse a configuration document from a YAML string. An empty document
    /// is valid and yields a configuration with no sections.
    pub fn from_yaml_str(yaml: &str) -> RelayResult<Self> {
        let value: Value = serde_yaml::from_str(yaml)?;
        match value {
            Value::Null => Ok(Self::default()),
            Value::Mapping(root) => Ok(Self { root }),
            _ => Err(RelayError::config(
                "configuration document must be a mapping of sections",
            )),
        }
    }

    /// Load a configuration document from a file, expanding `${VAR}`
    /// environment references first.
    pub async fn from_path<P: AsRef<Path>>(path: P) -> RelayResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let expanded = expand_env_vars(&content);
        let file = Self::from_yaml_str(&expanded)?;
        info!("Configuration loaded from {:?}", path.as_ref());
        Ok(file)
    }

    /// Look up a section by name. A section that is present but empty
    /// (`segment-proxy:`) is returned as an empty view.
    pub fn section<'a>(&'a self, name: &'a str) -> Option<Section<'a>> {
        match self.root.get(name) {
            None => None,
            Some(Value::Null) => Some(Section::new(name, None)),
            Some(Value::Mapping(map)) => Some(Section::new(name, Some(map))),
            // A scalar section is almost certainly a config mistake, but it
            // is the plugin's job to reject its own options; expose it as
            // empty so the plugin's "no relevant options" path applies.
            Some(_) => Some(Section::new(name, None)),
        }
    }
}

/// Expand `${VAR}` references from the process environment. Unset variables
/// are left in place so the YAML error points at the real problem.
fn expand_env_vars(content: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(content, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
