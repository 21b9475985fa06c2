//! Top-level synthesis: settings in, template out.

use crate::api::{self, ApiHandle};
use crate::database::{self, DatabaseHandle};
use crate::domain::{self, DomainBinding};
use crate::error::Result;
use crate::network::{self, VpcHandle};
use crate::settings::StackSettings;
use crate::template::{intrinsic, Template};

/// The synthesized stack and the handles of its stages.
#[derive(Debug, Clone)]
pub struct FeaturesStack {
    pub name: String,
    pub template: Template,
    pub vpc: VpcHandle,
    pub database: DatabaseHandle,
    pub domain: Option<DomainBinding>,
    pub api: ApiHandle,
}

impl FeaturesStack {
    /// Run every stage in order: network, database and bootstrap, domain, API.
    pub fn build(settings: &StackSettings) -> Result<Self> {
        settings.app.validate()?;
        settings.database.validate()?;
        settings.domain.validate()?;
        settings.lambda.validate()?;

        let name = settings.app.stack_name();
        let stage = settings.app.stage_name();
        let mut template = Template::new(format!("VEDA features API stack ({})", name));

        let vpc = network::provision(&mut template, &settings.app)?;
        let database = database::provision(
            &mut template,
            &settings.app,
            &settings.database,
            &settings.lambda,
            &vpc,
        )?;
        let domain = domain::provision(&mut template, &settings.domain, &stage, false)?;
        let api = api::provision(
            &mut template,
            &settings.app,
            &settings.lambda,
            &vpc,
            &database,
            domain.as_ref(),
        )?;

        if let Some(policy) = &settings.app.permissions_boundary_policy_name {
            apply_permissions_boundary(&mut template, policy);
        }

        tracing::info!(
            stack = %name,
            resources = template.resources.len(),
            outputs = template.outputs.len(),
            "synthesized stack"
        );

        Ok(Self {
            name,
            template,
            vpc,
            database,
            domain,
            api,
        })
    }

    /// Synthesize the template only.
    pub fn synthesize(settings: &StackSettings) -> Result<Template> {
        Ok(Self::build(settings)?.template)
    }
}

/// Set the permissions boundary on every IAM role in the template.
pub fn apply_permissions_boundary(template: &mut Template, policy_name: &str) {
    let arn = intrinsic::account_policy_arn(policy_name);
    for resource in template.resources.values_mut() {
        if resource.resource_type == "AWS::IAM::Role" {
            resource.set_property("PermissionsBoundary", arn.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{AppSettings, DatabaseSettings, DomainSettings, LambdaSettings};
    use serde_json::json;

    fn settings() -> StackSettings {
        StackSettings {
            app: AppSettings {
                app_name: "veda-features-api".to_string(),
                stage: "Dev".to_string(),
                cdk_default_account: None,
                cdk_default_region: None,
                vpc_id: None,
                subnet_ids: Vec::new(),
                permissions_boundary_policy_name: None,
            },
            database: DatabaseSettings::with_schema_version("0.1.1"),
            domain: DomainSettings::default(),
            lambda: LambdaSettings::default(),
        }
    }

    #[test]
    fn stack_name_is_lowercase() {
        let stack = FeaturesStack::build(&settings()).unwrap();
        assert_eq!(stack.name, "veda-features-api-dev");
        assert!(stack.domain.is_none());
    }

    #[test]
    fn api_never_references_admin_secret() {
        let mut s = settings();
        s.database.use_rds_proxy = true;
        let stack = FeaturesStack::build(&s).unwrap();
        let admin = &stack.database.admin_secret;

        for id in [&stack.api.function, &stack.api.role] {
            let resource = stack.template.resource(id).unwrap();
            let text = serde_json::to_string(resource).unwrap();
            assert!(!text.contains(admin.as_str()), "{} references {}", id, admin);
        }

        let bootstrap_role = stack
            .template
            .resource(&stack.database.bootstrap.role)
            .unwrap();
        let text = serde_json::to_string(bootstrap_role).unwrap();
        assert!(text.contains(admin.as_str()));
    }

    #[test]
    fn permissions_boundary_applies_to_every_role() {
        let mut s = settings();
        s.app.permissions_boundary_policy_name = Some("veda-boundary".to_string());
        s.database.use_rds_proxy = true;
        let template = FeaturesStack::synthesize(&s).unwrap();

        let roles: Vec<_> = template.resources_of_type("AWS::IAM::Role").collect();
        assert_eq!(roles.len(), 3);
        for (_, role) in roles {
            assert_eq!(
                role.properties["PermissionsBoundary"],
                json!({ "Fn::Sub": "arn:${AWS::Partition}:iam::${AWS::AccountId}:policy/veda-boundary" })
            );
        }
    }

    #[test]
    fn no_boundary_without_policy_name() {
        let template = FeaturesStack::synthesize(&settings()).unwrap();
        for (_, role) in template.resources_of_type("AWS::IAM::Role") {
            assert!(role.property("PermissionsBoundary").is_none());
        }
    }

    #[test]
    fn domain_mapping_follows_domain_settings() {
        let mut s = settings();
        s.domain = DomainSettings {
            create_custom_subdomains: true,
            hosted_zone_id: Some("Z0123".to_string()),
            hosted_zone_name: Some("example.com".to_string()),
            ..Default::default()
        };
        let stack = FeaturesStack::build(&s).unwrap();
        assert_eq!(
            stack.domain.as_ref().map(|d| d.host.as_str()),
            Some("dev-features.example.com")
        );
        assert!(stack.template.resource("FeaturesApiMapping").is_some());
    }

    #[test]
    fn invalid_instance_class_fails_synthesis() {
        let mut s = settings();
        s.database.rds_instance_class = "NOPE".to_string();
        assert!(FeaturesStack::synthesize(&s).is_err());
    }

    #[test]
    fn synthesis_is_deterministic() {
        let a = FeaturesStack::synthesize(&settings())
            .unwrap()
            .to_json_string(false)
            .unwrap();
        let b = FeaturesStack::synthesize(&settings())
            .unwrap()
            .to_json_string(false)
            .unwrap();
        assert_eq!(a, b);
    }
}
