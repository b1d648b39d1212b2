pub mod backup;
pub mod topology;

use cirrus_config_hcl::HclParser;
use cirrus_engine::config::{CirrusConfig, TomlParser};

use crate::error::CliError;

pub(crate) fn load_config(path: &str) -> Result<CirrusConfig, CliError> {
    tracing::debug!(config = %path, "loading configuration");
    Ok(CirrusConfig::load_with(path, &[&TomlParser, &HclParser])?)
}
