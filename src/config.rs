use crate::{error::GraphOpError, properties::GroupId};
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::PathBuf,
};

pub const DEFAULT_REAP_BATCH_SIZE: usize = 256;

/// One `[[lock_candidates]]` table: `table.column` references `target.id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockCandidateRecord {
    pub target: String,
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphOpsConfig {
    /// Reserved system group that is never reported as a dangling location.
    pub user_group: GroupId,
    pub reap_batch_size: usize,
    pub database: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub lock_candidates: Vec<LockCandidateRecord>,
}

impl Default for GraphOpsConfig {
    fn default() -> Self {
        GraphOpsConfig {
            user_group: GroupId::USER,
            reap_batch_size: DEFAULT_REAP_BATCH_SIZE,
            database: None,
            cache_dir: None,
            lock_candidates: Vec::new(),
        }
    }
}

impl GraphOpsConfig {
    pub fn validate(&self) -> Result<(), GraphOpError> {
        if self.reap_batch_size == 0 {
            return Err(GraphOpError::Config(
                "reap_batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<GraphOpsConfig, GraphOpError>;
    fn store(&self, config: &GraphOpsConfig) -> Result<(), GraphOpError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn load(&self) -> Result<GraphOpsConfig, GraphOpError> {
        tracing::debug!("Attempting to read config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(GraphOpsConfig::default());
        }
        let content = read_to_string(&self.path)?;
        let config: GraphOpsConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn store(&self, config: &GraphOpsConfig) -> Result<(), GraphOpError> {
        tracing::debug!("Attempting to write config to: {:?}", &self.path);
        config.validate()?;
        let toml_string = toml::to_string(config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_log::test;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let provider = TomlConfigProvider::new(dir.path().join("graphops.toml"));
        let config = provider.load().unwrap();
        assert_eq!(config, GraphOpsConfig::default());
        assert_eq!(config.user_group, GroupId(1));
    }

    #[test]
    fn parses_lock_candidates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graphops.toml");
        std::fs::write(
            &path,
            r#"
user_group = 3
reap_batch_size = 10

[[lock_candidates]]
target = "Image"
table = "DatasetImageLink"
column = "child"
"#,
        )
        .unwrap();
        let provider = TomlConfigProvider::new(path);
        let config = provider.load().unwrap();
        assert_eq!(config.user_group, GroupId(3));
        assert_eq!(config.reap_batch_size, 10);
        assert_eq!(config.lock_candidates.len(), 1);
        assert_eq!(config.lock_candidates[0].column, "child");

        provider.store(&config).unwrap();
        assert_eq!(provider.load().unwrap(), config);
    }

    #[test]
    fn rejects_zero_batch_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graphops.toml");
        std::fs::write(&path, "reap_batch_size = 0\n").unwrap();
        assert!(TomlConfigProvider::new(path).load().is_err());
    }
}
