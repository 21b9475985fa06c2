//! `domain-name`: print the custom host the API is bound to.

use anyhow::{Context, Result};

use veda_features_lib::domain::features_domain_name;
use veda_features_lib::settings::load_dotenv;
use veda_features_lib::{AppSettings, DomainSettings};

/// The features host name, `None` when custom subdomains are disabled.
pub fn resolve_domain_name(
    app: &AppSettings,
    domain: &DomainSettings,
    alt_domain: bool,
) -> Result<Option<String>> {
    features_domain_name(domain, &app.stage_name(), alt_domain)
        .context("failed to resolve the features domain name")
}

/// Handle the domain-name subcommand. Prints nothing when disabled.
pub fn handle_domain_name(alt_domain: bool) -> Result<()> {
    load_dotenv();
    let app = AppSettings::from_env().context("failed to load application settings")?;
    let domain = DomainSettings::from_env().context("failed to load domain settings")?;
    if let Some(name) = resolve_domain_name(&app, &domain, alt_domain)? {
        println!("{}", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn app(stage: &str) -> AppSettings {
        serde_json::from_value(json!({ "stage": stage })).unwrap()
    }

    fn zone(prefix: Option<&str>) -> DomainSettings {
        DomainSettings {
            create_custom_subdomains: true,
            hosted_zone_id: Some("Z123".to_string()),
            hosted_zone_name: Some("example.com.".to_string()),
            api_prefix: prefix.map(str::to_string),
            ..DomainSettings::default()
        }
    }

    #[test]
    fn disabled_domains_resolve_to_nothing() {
        let name = resolve_domain_name(&app("dev"), &DomainSettings::default(), false).unwrap();
        assert_eq!(name, None);
    }

    #[test]
    fn stage_names_the_subdomain() {
        let name = resolve_domain_name(&app("Staging"), &zone(None), false).unwrap();
        assert_eq!(name.as_deref(), Some("staging-features.example.com"));
    }

    #[test]
    fn prefix_overrides_stage() {
        let name = resolve_domain_name(&app("dev"), &zone(Some("Earth")), false).unwrap();
        assert_eq!(name.as_deref(), Some("earth-features.example.com"));
    }

    #[test]
    fn alt_domain_requires_alt_zone() {
        assert!(resolve_domain_name(&app("dev"), &zone(None), true).is_err());
    }
}
