use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse failed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Engine settings.
///
/// Every field has a default, so a partial JSON object (or `{}`) is a valid
/// configuration.
///
/// ```
/// use basemirror::BaseConfig;
///
/// let config = BaseConfig::from_json_str(r#"{"weakPoolTtlMs": 500}"#).unwrap();
/// assert_eq!(config.weak_pool_ttl_ms, 500);
/// assert_eq!(config.record_id_prefix, "rec");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BaseConfig {
    /// How long a weakly pooled query result stays reusable after its last access.
    pub weak_pool_ttl_ms: u64,
    pub record_id_prefix: String,
    /// Number of random alphanumerics after the prefix of a generated id.
    pub generated_id_length: usize,
    pub max_records_per_mutation: usize,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            weak_pool_ttl_ms: 10_000,
            record_id_prefix: "rec".to_string(),
            generated_id_length: 14,
            max_records_per_mutation: 50,
        }
    }
}

impl BaseConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: BaseConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.record_id_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "recordIdPrefix must not be empty".to_string(),
            ));
        }
        if self.generated_id_length == 0 {
            return Err(ConfigError::Invalid(
                "generatedIdLength must be positive".to_string(),
            ));
        }
        if self.max_records_per_mutation == 0 {
            return Err(ConfigError::Invalid(
                "maxRecordsPerMutation must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn weak_pool_ttl(&self) -> Duration {
        Duration::from_millis(self.weak_pool_ttl_ms)
    }
}
