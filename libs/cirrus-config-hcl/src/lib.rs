use cirrus_engine::config::{CirrusConfig, ConfigParser};
use cirrus_engine::error::EngineError;

pub struct HclParser;

impl ConfigParser for HclParser {
    fn extensions(&self) -> &[&str] {
        &["hcl"]
    }

    fn parse(&self, content: &str) -> Result<CirrusConfig, EngineError> {
        hcl::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cirrus_api::backup::BackupMode;
    use cirrus_engine::topology::ScalingMode;

    use super::*;

    #[test]
    fn parses_hcl_config() {
        let config = HclParser
            .parse(
                r#"
retry {
  max_attempts = 3
  delay_ms     = 100
}

topologies = [
  { name = "orders", mode = "horizontal", max_per_topic = 100 },
  { name = "quotes", expected_subscribers = 15000 },
]

backup {
  poll_interval_secs = 120

  naming {
    prefix    = "bkp"
    delimiter = "-"
  }

  tables = [
    {
      source_table                 = "customers"
      incremental_frequency_secs   = 3600
      switch_target_frequency_secs = 604800
      retention_secs               = 2592000
      mode                         = "incremental"
    },
  ]
}
"#,
            )
            .unwrap();
        config.validate().unwrap();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.topology("orders").unwrap().mode, ScalingMode::Horizontal);
        assert_eq!(config.topology("quotes").unwrap().expected_subscribers, 15000);

        let backup = config.backup.unwrap();
        assert_eq!(backup.poll_interval, Duration::from_secs(120));
        assert_eq!(backup.naming.delimiter, "-");
        assert_eq!(backup.tables[0].mode, BackupMode::Incremental);
        assert_eq!(backup.tables[0].timeout, Duration::from_secs(3600));
    }

    #[test]
    fn syntax_errors_are_config_errors() {
        assert!(matches!(HclParser.parse("retry {"), Err(EngineError::Config(_))));
    }
}
