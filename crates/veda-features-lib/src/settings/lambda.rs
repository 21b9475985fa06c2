//! Function deployment settings (`VEDA_*`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::de;
use crate::error::{Error, Result};

fn default_memory() -> u32 {
    8192
}

fn default_timeout() -> u32 {
    30
}

fn default_api_code_key() -> String {
    "veda-features-service-api.zip".to_string()
}

fn default_bootstrap_code_key() -> String {
    "veda-features-lambda-bootstrap.zip".to_string()
}

/// Settings bound to the API and bootstrap functions at synthesis time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LambdaSettings {
    /// Extra environment variables for the API function.
    #[serde(default, deserialize_with = "de::string_map")]
    pub env: BTreeMap<String, String>,

    /// API function memory in MB.
    #[serde(default = "default_memory")]
    pub features_memory: u32,

    /// API function timeout in seconds.
    #[serde(default = "default_timeout")]
    pub features_timeout: u32,

    /// Optional root path for all API endpoints.
    #[serde(default)]
    pub features_root_path: String,

    #[serde(default)]
    pub features_stage: String,

    /// Complete URL of a custom host; overrides the host used in response links.
    #[serde(default)]
    pub custom_host: String,

    /// Bucket holding the function packages. A template parameter is used when absent.
    #[serde(default, deserialize_with = "de::non_empty")]
    pub lambda_code_bucket: Option<String>,

    #[serde(default = "default_api_code_key")]
    pub features_api_code_key: String,

    #[serde(default = "default_bootstrap_code_key")]
    pub bootstrap_code_key: String,
}

impl Default for LambdaSettings {
    fn default() -> Self {
        Self {
            env: BTreeMap::new(),
            features_memory: default_memory(),
            features_timeout: default_timeout(),
            features_root_path: String::new(),
            features_stage: String::new(),
            custom_host: String::new(),
            lambda_code_bucket: None,
            features_api_code_key: default_api_code_key(),
            bootstrap_code_key: default_bootstrap_code_key(),
        }
    }
}

impl LambdaSettings {
    /// Environment variable prefix for this group.
    pub const ENV_PREFIX: &'static str = "VEDA_";

    /// Load and validate from `VEDA_*` variables.
    pub fn from_env() -> Result<Self> {
        let settings: Self = super::extract(Self::ENV_PREFIX)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate loaded values against Lambda limits.
    pub fn validate(&self) -> Result<()> {
        if !(128..=10240).contains(&self.features_memory) {
            return Err(Error::invalid_setting(
                "features_memory",
                "must be between 128 and 10240 MB",
            ));
        }
        if !(1..=900).contains(&self.features_timeout) {
            return Err(Error::invalid_setting(
                "features_timeout",
                "must be between 1 and 900 seconds",
            ));
        }
        if !self.features_root_path.is_empty() && !self.features_root_path.starts_with('/') {
            return Err(Error::invalid_setting(
                "features_root_path",
                "must start with '/'",
            ));
        }
        Ok(())
    }

    /// Custom host, if one is configured.
    pub fn custom_host(&self) -> Option<&str> {
        Some(self.custom_host.trim()).filter(|host| !host.is_empty())
    }
}
