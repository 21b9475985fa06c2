//! Custom domain settings (`VEDA_DOMAIN_*`).

use serde::{Deserialize, Serialize};

use super::de;
use crate::error::{Error, Result};

/// A Route 53 hosted zone reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZone {
    pub id: String,
    pub name: String,
}

/// Settings controlling the optional custom subdomain of the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSettings {
    /// Create a certificate, custom domain and DNS record for the API.
    #[serde(default)]
    pub create_custom_subdomains: bool,

    #[serde(default, deserialize_with = "de::non_empty")]
    pub hosted_zone_id: Option<String>,

    #[serde(default, deserialize_with = "de::non_empty")]
    pub hosted_zone_name: Option<String>,

    /// Explicit subdomain prefix; the stage name is used when absent.
    #[serde(default, deserialize_with = "de::non_empty")]
    pub api_prefix: Option<String>,

    #[serde(default, deserialize_with = "de::non_empty")]
    pub alt_hosted_zone_id: Option<String>,

    #[serde(default, deserialize_with = "de::non_empty")]
    pub alt_hosted_zone_name: Option<String>,
}

impl DomainSettings {
    /// Environment variable prefix for this group.
    pub const ENV_PREFIX: &'static str = "VEDA_DOMAIN_";

    /// Load and validate from `VEDA_DOMAIN_*` variables.
    pub fn from_env() -> Result<Self> {
        let settings: Self = super::extract(Self::ENV_PREFIX)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate loaded values.
    pub fn validate(&self) -> Result<()> {
        if !self.create_custom_subdomains {
            return Ok(());
        }
        if self.hosted_zone_id.is_none() {
            return Err(Error::invalid_setting(
                "hosted_zone_id",
                "required when create_custom_subdomains is enabled",
            ));
        }
        if self.hosted_zone_name.is_none() {
            return Err(Error::invalid_setting(
                "hosted_zone_name",
                "required when create_custom_subdomains is enabled",
            ));
        }
        Ok(())
    }

    /// Hosted zone to bind into, or `None` when custom domains are disabled.
    ///
    /// With `alt_domain` the alternate zone is used; it must be configured.
    pub fn hosted_zone(&self, alt_domain: bool) -> Result<Option<HostedZone>> {
        if !self.create_custom_subdomains {
            return Ok(None);
        }
        let (id, name, field) = if alt_domain {
            (
                &self.alt_hosted_zone_id,
                &self.alt_hosted_zone_name,
                "alt_hosted_zone_id",
            )
        } else {
            (&self.hosted_zone_id, &self.hosted_zone_name, "hosted_zone_id")
        };
        match (id, name) {
            (Some(id), Some(name)) => Ok(Some(HostedZone {
                id: id.clone(),
                name: name.trim_end_matches('.').to_string(),
            })),
            _ => Err(Error::invalid_setting(field, "hosted zone id and name are required")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> DomainSettings {
        DomainSettings {
            create_custom_subdomains: true,
            hosted_zone_id: Some("Z0123".to_string()),
            hosted_zone_name: Some("example.com.".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn disabled_has_no_zone() {
        let settings = DomainSettings::default();
        settings.validate().unwrap();
        assert!(settings.hosted_zone(false).unwrap().is_none());
    }

    #[test]
    fn enabled_requires_zone() {
        let settings = DomainSettings {
            create_custom_subdomains: true,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zone_name_loses_trailing_dot() {
        let zone = enabled().hosted_zone(false).unwrap().unwrap();
        assert_eq!(zone.name, "example.com");
        assert_eq!(zone.id, "Z0123");
    }

    #[test]
    fn alt_zone_must_be_configured() {
        assert!(enabled().hosted_zone(true).is_err());
    }
}
