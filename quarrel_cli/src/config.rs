use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    /// Root for `diffs/` and `diffs-summary/`; created at startup.
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Inputs to replay; merged with paths given on the command line.
    pub input_paths: Option<Vec<PathBuf>>,
}

fn default_output_root() -> PathBuf {
    PathBuf::from("output")
}

impl DriverConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: DriverConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            input_paths: None,
        }
    }
}
