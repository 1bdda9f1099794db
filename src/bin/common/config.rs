use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use roscube::modules::pipeline::config::PipelineConfig;
use serde_derive::{Deserialize, Serialize};

use crate::common::helpers::CliError;

/// Command line configuration: the pipeline settings plus the collaborators
/// the binary wires in.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigContainer {
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
    /// local mirror of the reanalysis archive
    pub mirror_dir: PathBuf,
    /// fitted rate-of-spread model, yaml or json
    pub model_path: PathBuf,
}

impl ConfigContainer {
    pub fn from_file(config_file: &str) -> Result<ConfigContainer, CliError> {
        // Check the file extension to determine which method to use
        if config_file.ends_with(".yaml") || config_file.ends_with(".yml") {
            Self::from_yaml(config_file)
        } else {
            Err(CliError::from(format!(
                "Unsupported config file format: {}",
                config_file
            )))
        }
    }

    pub fn from_yaml(config_file: &str) -> Result<Self, CliError> {
        let mut file = File::open(config_file)
            .map_err(|err| format!("Cannot open config file {}: {}", config_file, err))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|err| format!("Cannot read config file {}: {}", config_file, err))?;

        Self::from_yaml_str(&contents)
            .map_err(|err| format!("Cannot parse config file {}: {}", config_file, err).into())
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, CliError> {
        let conf = serde_yaml::from_str(contents).map_err(|err| format!("{}", err))?;
        Ok(conf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_settings_are_flattened() {
        let yaml = r#"
grid:
  bbox: { north: 43.0, west: -10.0, south: 36.9, east: -6.0 }
cache:
  dir: /tmp/roscube/cache
fetch:
  cache_dir: /tmp/roscube/sources
history_policy: Truncate
mirror_dir: /data/mirror
model_path: /data/model.yaml
"#;
        let conf = ConfigContainer::from_yaml_str(yaml).unwrap();
        assert_eq!(conf.mirror_dir, PathBuf::from("/data/mirror"));
        assert_eq!(conf.pipeline.feature_map_version, 1);
        assert_eq!(conf.pipeline.fetch.latency_days, 5);
        assert!(conf.pipeline.boundary.is_none());
        assert_eq!(conf.pipeline.history_policy, roscube::modules::temporal::HistoryPolicy::Truncate);
    }

    #[test]
    fn unknown_extensions_are_refused() {
        assert!(ConfigContainer::from_file("config.txt").is_err());
    }
}
