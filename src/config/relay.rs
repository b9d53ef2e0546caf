use hyper::Uri;

use crate::config::ConfigFile;
use crate::error::{RelayError, RelayResult};

/// Options consumed by the relay service itself, read from the `relay`
/// configuration section.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Inbound listener port; 0 selects an ephemeral port.
    pub port: u16,
    /// Upstream base URL. Required.
    pub target: Uri,
    /// Inbound body cap in bytes. None means unlimited.
    pub max_body_size: Option<u64>,
}

impl RelayOptions {
    /// Read relay options from a configuration file. `relay.target` is
    /// required; everything else has defaults.
    pub fn read(file: &ConfigFile) -> RelayResult<Self> {
        let section = file
            .section("relay")
            .ok_or_else(|| RelayError::config("missing 'relay' configuration section"))?;

        let port = match section.get_u64("port")? {
            None => 0,
            Some(p) => u16::try_from(p)
                .map_err(|_| RelayError::config(format!("'relay.port' out of range: {}", p)))?,
        };

        let target = section
            .get_str("target")?
            .ok_or_else(|| RelayError::config("'relay.target' is required"))?;
        let target: Uri = target
            .parse()
            .map_err(|e| RelayError::config(format!("'relay.target' is not a valid URL: {}", e)))?;
        if target.scheme_str().is_none() || target.authority().is_none() {
            return Err(RelayError::config(
                "'relay.target' must be an absolute URL with scheme and host",
            ));
        }

        let max_body_size = section.get_u64("max-body-size")?.filter(|size| *size > 0);

        Ok(Self {
            port,
            target,
            max_body_size,
        })
    }
}
