//! Application-wide deployment settings (`VEDA_*`).

use serde::{Deserialize, Serialize};

use super::de;
use crate::error::{Error, Result};

fn default_app_name() -> String {
    "veda-features-api".to_string()
}

/// Deployment target account and region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployEnv {
    pub account: Option<String>,
    pub region: Option<String>,
}

/// Application settings shared by every stage of the deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// App name used to name the stack and its resources.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Deployment stage, i.e. `dev`, `staging`, `prod`.
    pub stage: String,

    /// Account id, required when deploying into an existing VPC.
    #[serde(default, deserialize_with = "de::non_empty")]
    pub cdk_default_account: Option<String>,

    /// Region, required when deploying into an existing VPC.
    #[serde(default, deserialize_with = "de::non_empty")]
    pub cdk_default_region: Option<String>,

    /// Existing VPC to deploy into. A new VPC is created when absent.
    #[serde(default, deserialize_with = "de::non_empty")]
    pub vpc_id: Option<String>,

    /// Subnets for the database and functions when deploying into an existing VPC.
    #[serde(default, deserialize_with = "de::string_list")]
    pub subnet_ids: Vec<String>,

    /// Name of the IAM policy used as permissions boundary for every role.
    #[serde(default, deserialize_with = "de::non_empty")]
    pub permissions_boundary_policy_name: Option<String>,
}

impl AppSettings {
    /// Environment variable prefix for this group.
    pub const ENV_PREFIX: &'static str = "VEDA_";

    /// Load and validate from `VEDA_*` variables.
    pub fn from_env() -> Result<Self> {
        let settings: Self = super::extract(Self::ENV_PREFIX)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate loaded values.
    pub fn validate(&self) -> Result<()> {
        if self.stage.trim().is_empty() {
            return Err(Error::invalid_setting("stage", "must not be empty"));
        }
        if self.app_name.trim().is_empty() {
            return Err(Error::invalid_setting("app_name", "must not be empty"));
        }
        if let Some(bad) = self.subnet_ids.iter().find(|id| !is_valid_subnet_id(id)) {
            return Err(Error::invalid_setting(
                "subnet_ids",
                format!("'{}' is not a subnet id (expected subnet-<8 or 17 hex digits>)", bad),
            ));
        }
        if let Some(vpc_id) = &self.vpc_id {
            if !vpc_id.starts_with("vpc-") {
                return Err(Error::invalid_setting(
                    "vpc_id",
                    format!("'{}' is not a VPC id", vpc_id),
                ));
            }
        }
        Ok(())
    }

    /// Stage name, always lowercase.
    pub fn stage_name(&self) -> String {
        self.stage.to_lowercase()
    }

    /// Name of the deployed stack: `{app_name}-{stage_name}`.
    pub fn stack_name(&self) -> String {
        format!("{}-{}", self.app_name, self.stage_name())
    }

    /// Explicit account/region, only needed when targeting an existing VPC.
    pub fn deploy_env(&self) -> Option<DeployEnv> {
        self.vpc_id.as_ref().map(|_| DeployEnv {
            account: self.cdk_default_account.clone(),
            region: self.cdk_default_region.clone(),
        })
    }
}

/// Check a subnet id against `subnet-` followed by 8 or 17 lowercase hex digits.
pub fn is_valid_subnet_id(value: &str) -> bool {
    match value.strip_prefix("subnet-") {
        Some(hex) => {
            matches!(hex.len(), 8 | 17)
                && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn settings(stage: &str) -> AppSettings {
        AppSettings {
            app_name: default_app_name(),
            stage: stage.to_string(),
            cdk_default_account: None,
            cdk_default_region: None,
            vpc_id: None,
            subnet_ids: Vec::new(),
            permissions_boundary_policy_name: None,
        }
    }

    #[test]
    fn stage_name_is_lowercase() {
        for stage in ["Dev", "DEV", "dev", "StAgInG"] {
            assert_eq!(settings(stage).stage_name(), stage.to_lowercase());
        }
    }

    #[test]
    fn stack_name_joins_app_and_stage() {
        assert_eq!(settings("Prod").stack_name(), "veda-features-api-prod");
    }

    #[test]
    fn subnet_id_pattern() {
        assert!(is_valid_subnet_id("subnet-0123abcd"));
        assert!(is_valid_subnet_id("subnet-0123456789abcdef0"));
        assert!(!is_valid_subnet_id("subnet-0123ABCD"));
        assert!(!is_valid_subnet_id("subnet-0123abc"));
        assert!(!is_valid_subnet_id("subnet-0123456789abcdef"));
        assert!(!is_valid_subnet_id("sub-0123abcd"));
        assert!(!is_valid_subnet_id("subnet-0123abcg"));
        assert!(!is_valid_subnet_id(""));
    }

    #[test]
    fn deploy_env_only_with_vpc() {
        let mut s = settings("dev");
        s.cdk_default_account = Some("123456789012".to_string());
        assert!(s.deploy_env().is_none());

        s.vpc_id = Some("vpc-0abc".to_string());
        let env = s.deploy_env().unwrap();
        assert_eq!(env.account.as_deref(), Some("123456789012"));
    }

    #[test]
    fn from_env_loads_prefixed_values() {
        Jail::expect_with(|jail| {
            jail.set_env("VEDA_STAGE", "Dev");
            jail.set_env("VEDA_SUBNET_IDS", "subnet-0123abcd,subnet-89abcdef");
            jail.set_env("VEDA_CDK_DEFAULT_ACCOUNT", "123456789012");
            jail.set_env("VEDA_SOMETHING_UNRELATED", "ignored");
            let s = AppSettings::from_env().map_err(|e| e.to_string())?;
            assert_eq!(s.app_name, "veda-features-api");
            assert_eq!(s.stage_name(), "dev");
            assert_eq!(s.subnet_ids.len(), 2);
            assert_eq!(s.cdk_default_account.as_deref(), Some("123456789012"));
            Ok(())
        });
    }

    #[test]
    fn from_env_rejects_malformed_subnet() {
        Jail::expect_with(|jail| {
            jail.set_env("VEDA_STAGE", "dev");
            jail.set_env("VEDA_SUBNET_IDS", "subnet-0123abcd,not-a-subnet");
            match AppSettings::from_env() {
                Err(Error::InvalidSetting { field, .. }) => assert_eq!(field, "subnet_ids"),
                other => panic!("expected invalid subnet error, got {:?}", other),
            }
            Ok(())
        });
    }

    #[test]
    fn from_env_requires_stage() {
        Jail::expect_with(|_jail| {
            assert!(AppSettings::from_env().is_err());
            Ok(())
        });
    }
}
