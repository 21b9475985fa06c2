//! Deploy side of database bootstrapping.
//!
//! Describes the application credential secret, the function that creates
//! the application role, database and schema, and the custom resource that
//! triggers it. The function itself lives in `veda-features-lambda-bootstrap`
//! and reads the same [`BootstrapProperties`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::network::VpcHandle;
use crate::resources::{self, CodeLocation, FunctionSpec};
use crate::settings::{DatabaseSettings, LambdaSettings};
use crate::template::{intrinsic, stable_suffix, Resource, Template};

/// Custom resource type handled by the bootstrap function.
pub const CUSTOM_RESOURCE_TYPE: &str = "Custom::Bootstrapper";

/// Logical id of the bootstrap custom resource.
pub const CUSTOM_RESOURCE_ID: &str = "Bootstrapper";

/// Construct name used in physical secret names.
pub const CONSTRUCT_NAME: &str = "features-tipg-db";

/// Timeout of the bootstrap function.
pub const FUNCTION_TIMEOUT_SECS: u32 = 120;
const FUNCTION_MEMORY_MB: u32 = 256;
const LOG_RETENTION_DAYS: u32 = 7;
const POSTGRES_PORT: u16 = 5432;

/// Properties of the bootstrap custom resource.
///
/// Synthesized with template values and received by the function as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapProperties<T = String> {
    /// Admin connection secret.
    pub conn_secret_arn: T,
    /// Application credential secret to bootstrap.
    pub new_user_secret_arn: T,
    /// Changing this value re-runs the bootstrap on update.
    pub database_schema_version: T,
}

/// What the database provisioner hands over.
#[derive(Debug, Clone)]
pub struct BootstrapTarget<'a> {
    pub stack_name: &'a str,
    pub instance: &'a str,
    pub instance_security_group: &'a str,
    pub admin_secret: &'a str,
    /// Resources the custom resource must wait for (secret attachment etc).
    pub wait_for: Vec<String>,
}

/// Resources added by [`provision`].
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapHandle {
    /// The application credential secret.
    pub secret: String,
    pub function: String,
    pub role: String,
    pub security_group: String,
    pub custom_resource: String,
}

/// Physical name of the application credential secret.
pub fn secret_name(stack_name: &str) -> String {
    let path = format!("{}/{}", stack_name, CONSTRUCT_NAME);
    format!("{}/{}", path, stable_suffix(&path))
}

/// JSON template of the application secret, with the host left as a `Fn::Sub` placeholder.
fn secret_string_template(database: &DatabaseSettings, host_placeholder: &str) -> Result<String> {
    let mut fields = BTreeMap::new();
    fields.insert("dbname", json!(database.dbname));
    fields.insert("engine", json!("postgres"));
    fields.insert("port", json!(POSTGRES_PORT));
    fields.insert("host", json!(host_placeholder));
    fields.insert("username", json!(database.user));
    Ok(serde_json::to_string(&fields)?)
}

/// Add the application secret, bootstrap function and custom resource.
pub fn provision(
    template: &mut Template,
    target: &BootstrapTarget<'_>,
    database: &DatabaseSettings,
    lambda: &LambdaSettings,
    vpc: &VpcHandle,
) -> Result<BootstrapHandle> {
    let host = format!("${{{}.Endpoint.Address}}", target.instance);
    let secret = template.add_resource(
        "FeaturesTipgDbSecret",
        Resource::new(
            "AWS::SecretsManager::Secret",
            json!({
                "Name": secret_name(target.stack_name),
                "Description": format!("TIPG database bootstrapped by {} stack", target.stack_name),
                "GenerateSecretString": {
                    "SecretStringTemplate": intrinsic::sub(secret_string_template(database, &host)?),
                    "GenerateStringKey": "password",
                    "ExcludePunctuation": true
                }
            }),
        ),
    );

    // the function reads the admin secret and the application secret only
    let role = template.add_resource(
        "FeaturesTipgDbBootstrapRole",
        resources::function_role(
            &[target.admin_secret, secret.as_str()],
            "read-database-secrets",
        ),
    );
    let security_group = template.add_resource(
        "FeaturesTipgDbBootstrapSecurityGroup",
        resources::security_group(vpc, "Database bootstrap function"),
    );
    template.add_resource(
        "FeaturesTipgDbBootstrapIngress",
        resources::tcp_ingress(
            target.instance_security_group,
            &security_group,
            POSTGRES_PORT,
            "Database bootstrap function",
        ),
    );

    let code = CodeLocation::resolve(template, lambda, &lambda.bootstrap_code_key);
    let function = template.add_resource(
        "FeaturesTipgDbBootstrapFunction",
        resources::function(
            &FunctionSpec {
                description: format!("Bootstraps the {} database", database.dbname),
                code: &code,
                role: &role,
                security_group: &security_group,
                memory_mb: FUNCTION_MEMORY_MB,
                timeout_secs: FUNCTION_TIMEOUT_SECS,
                environment: BTreeMap::from([("RUST_LOG".to_string(), json!("info"))]),
            },
            vpc,
        ),
    );
    let log_group = template.add_resource(
        "FeaturesTipgDbBootstrapLogGroup",
        resources::function_log_group(&function, LOG_RETENTION_DAYS),
    );

    let properties = BootstrapProperties::<Value> {
        conn_secret_arn: intrinsic::reference(target.admin_secret),
        new_user_secret_arn: intrinsic::reference(&secret),
        database_schema_version: json!(database.schema_version),
    };
    let mut custom = Resource::new(CUSTOM_RESOURCE_TYPE, serde_json::to_value(&properties)?)
        .retain()
        .depends_on(target.instance)
        .depends_on(&log_group)
        .depends_on("FeaturesTipgDbBootstrapIngress");
    custom.set_property("ServiceToken", intrinsic::get_att(&function, "Arn"));
    for id in &target.wait_for {
        custom = custom.depends_on(id.as_str());
    }
    let custom_resource = template.add_resource(CUSTOM_RESOURCE_ID, custom);

    Ok(BootstrapHandle {
        secret,
        function,
        role,
        security_group,
        custom_resource,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisioned() -> (Template, BootstrapHandle) {
        let mut template = Template::new("t");
        let vpc = VpcHandle::Imported {
            vpc_id: "vpc-0123abcd".to_string(),
            subnet_ids: vec!["subnet-0123abcd".to_string()],
        };
        let target = BootstrapTarget {
            stack_name: "veda-features-api-dev",
            instance: "FeaturesDb",
            instance_security_group: "FeaturesDbSecurityGroup",
            admin_secret: "FeaturesDbAdminSecret",
            wait_for: vec!["FeaturesDbAdminSecretAttachment".to_string()],
        };
        let handle = provision(
            &mut template,
            &target,
            &DatabaseSettings::with_schema_version("0.1.1"),
            &LambdaSettings::default(),
            &vpc,
        )
        .unwrap();
        (template, handle)
    }

    #[test]
    fn custom_resource_carries_properties() {
        let (template, handle) = provisioned();
        let custom = template.resource(&handle.custom_resource).unwrap();
        assert_eq!(custom.resource_type, CUSTOM_RESOURCE_TYPE);
        assert_eq!(custom.properties["conn_secret_arn"], json!({ "Ref": "FeaturesDbAdminSecret" }));
        assert_eq!(custom.properties["new_user_secret_arn"], json!({ "Ref": handle.secret }));
        assert_eq!(custom.properties["database_schema_version"], "0.1.1");
        assert_eq!(
            custom.properties["ServiceToken"],
            json!({ "Fn::GetAtt": [handle.function, "Arn"] })
        );
        assert!(custom.depends_on.contains(&"FeaturesDbAdminSecretAttachment".to_string()));
        assert_eq!(custom.deletion_policy, Some(crate::template::Policy::Retain));
    }

    #[test]
    fn secret_template_prefills_connection_fields() {
        let (template, handle) = provisioned();
        let secret = template.resource(&handle.secret).unwrap();
        let generate = &secret.properties["GenerateSecretString"];
        assert_eq!(generate["ExcludePunctuation"], true);
        assert_eq!(generate["GenerateStringKey"], "password");
        let raw = generate["SecretStringTemplate"]["Fn::Sub"].as_str().unwrap();
        let fields: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(fields["dbname"], "postgis-features");
        assert_eq!(fields["username"], "veda");
        assert_eq!(fields["port"], 5432);
        assert_eq!(fields["host"], "${FeaturesDb.Endpoint.Address}");
        assert!(secret.properties["Name"]
            .as_str()
            .unwrap()
            .starts_with("veda-features-api-dev/features-tipg-db/"));
    }

    #[test]
    fn function_has_two_minute_timeout_and_week_of_logs() {
        let (template, handle) = provisioned();
        let function = template.resource(&handle.function).unwrap();
        assert_eq!(function.properties["Timeout"], 120);
        let logs = template.resource("FeaturesTipgDbBootstrapLogGroup").unwrap();
        assert_eq!(logs.properties["RetentionInDays"], 7);
    }

    #[test]
    fn properties_deserialize_from_event_strings() {
        let props: BootstrapProperties = serde_json::from_value(json!({
            "ServiceToken": "arn:aws:lambda:function",
            "conn_secret_arn": "arn:admin",
            "new_user_secret_arn": "arn:app",
            "database_schema_version": "0.1.1"
        }))
        .unwrap();
        assert_eq!(props.new_user_secret_arn, "arn:app");
    }
}
