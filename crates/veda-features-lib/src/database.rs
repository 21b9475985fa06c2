//! PostgreSQL instance provisioning.
//!
//! Adds the parameter group, subnet group, security group, admin secret and
//! instance, the bootstrap resources, and optionally an RDS proxy whose
//! secret replaces the application secret downstream.

use serde_json::{json, Map, Value};

use crate::bootstrap::{self, BootstrapHandle, BootstrapTarget};
use crate::error::Result;
use crate::network::VpcHandle;
use crate::resources;
use crate::settings::{AppSettings, DatabaseSettings, LambdaSettings};
use crate::template::{intrinsic, stable_suffix, Output, Resource, Template};

const ALLOCATED_STORAGE_GIB: u32 = 100;
const POSTGRES_PORT: u16 = 5432;

/// Characters excluded from generated admin passwords.
const ADMIN_PASSWORD_EXCLUDE: &str = " %+~`#$&*()|[]{}:;<>?!'/@\"\\";

/// Which kind of instance is described.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceSource {
    Fresh { storage_encrypted: bool },
    Snapshot { snapshot_id: String },
}

/// Resolved instance settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseInstanceConfig {
    pub identifier: String,
    pub instance_type: String,
    pub engine_version: String,
    pub publicly_accessible: bool,
    pub max_allocated_storage: Option<u32>,
    pub source: InstanceSource,
}

impl DatabaseInstanceConfig {
    pub fn from_settings(stack_name: &str, settings: &DatabaseSettings) -> Result<Self> {
        let source = match &settings.snapshot_id {
            Some(snapshot_id) => InstanceSource::Snapshot {
                snapshot_id: snapshot_id.clone(),
            },
            None => InstanceSource::Fresh {
                storage_encrypted: settings.rds_encryption,
            },
        };
        Ok(Self {
            identifier: format!("{}-featuresdb-postgres", stack_name),
            instance_type: settings.instance_type()?,
            engine_version: settings.rds_engine_full_version.clone(),
            publicly_accessible: settings.publicly_accessible,
            max_allocated_storage: settings.max_allocated_storage(),
            source,
        })
    }

    /// Instance properties; credentials are dynamic references into `admin_secret`.
    fn properties(
        &self,
        admin_secret: &str,
        parameter_group: &str,
        subnet_group: &str,
        security_group: &str,
    ) -> Value {
        let mut props = Map::new();
        props.insert("DBInstanceIdentifier".into(), json!(self.identifier));
        props.insert("Engine".into(), json!("postgres"));
        props.insert("EngineVersion".into(), json!(self.engine_version));
        props.insert("DBInstanceClass".into(), json!(self.instance_type));
        props.insert("AllocatedStorage".into(), json!(ALLOCATED_STORAGE_GIB.to_string()));
        props.insert("StorageType".into(), json!("gp2"));
        props.insert(
            "MasterUserPassword".into(),
            intrinsic::secret_value(admin_secret, "password"),
        );
        props.insert(
            "DBParameterGroupName".into(),
            intrinsic::reference(parameter_group),
        );
        props.insert("DBSubnetGroupName".into(), intrinsic::reference(subnet_group));
        props.insert(
            "VPCSecurityGroups".into(),
            json!([intrinsic::get_att(security_group, "GroupId")]),
        );
        props.insert("PubliclyAccessible".into(), json!(self.publicly_accessible));
        props.insert("DeletionProtection".into(), json!(true));
        props.insert("CopyTagsToSnapshot".into(), json!(true));
        if let Some(max) = self.max_allocated_storage {
            props.insert("MaxAllocatedStorage".into(), json!(max));
        }

        match &self.source {
            InstanceSource::Fresh { storage_encrypted } => {
                props.insert(
                    "MasterUsername".into(),
                    intrinsic::secret_value(admin_secret, "username"),
                );
                if *storage_encrypted {
                    props.insert("StorageEncrypted".into(), json!(true));
                }
            }
            // encryption and master username come from the snapshot
            InstanceSource::Snapshot { snapshot_id } => {
                props.insert("DBSnapshotIdentifier".into(), json!(snapshot_id));
            }
        }
        Value::Object(props)
    }
}

/// Resources added by [`provision`].
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseHandle {
    pub instance: String,
    pub security_group: String,
    /// Admin credentials. Only the bootstrap function may read this.
    pub admin_secret: String,
    /// Application credentials consumed downstream (proxy secret when a proxy is used).
    pub app_secret: String,
    pub proxy: Option<String>,
    pub bootstrap: BootstrapHandle,
    pub publicly_accessible: bool,
}

/// Parameter group values, as strings.
pub fn parameter_group_parameters(settings: &DatabaseSettings) -> Value {
    json!({
        "max_locks_per_transaction": settings.max_locks_per_transaction.to_string(),
        "work_mem": settings.work_mem.to_string(),
        "temp_buffers": settings.temp_buffers.to_string(),
        "random_page_cost": settings.random_page_cost.to_string(),
        "max_connections": settings.max_connections.to_string()
    })
}

/// Subnets the instance (and proxy) are placed in.
///
/// Configured subnet ids win; otherwise public subnets when the instance is
/// publicly accessible and private subnets when it is not.
pub fn select_subnets(app: &AppSettings, settings: &DatabaseSettings, vpc: &VpcHandle) -> Vec<Value> {
    if !app.subnet_ids.is_empty() {
        return app.subnet_ids.iter().map(|id| json!(id)).collect();
    }
    if settings.publicly_accessible {
        vpc.public_subnet_ids()
    } else {
        vpc.private_subnet_ids()
    }
}

/// Add the database, its bootstrap and the optional proxy to the template.
pub fn provision(
    template: &mut Template,
    app: &AppSettings,
    settings: &DatabaseSettings,
    lambda: &LambdaSettings,
    vpc: &VpcHandle,
) -> Result<DatabaseHandle> {
    let stack_name = app.stack_name();
    let config = DatabaseInstanceConfig::from_settings(&stack_name, settings)?;
    let subnets = select_subnets(app, settings, vpc);

    let parameter_group = template.add_resource(
        "FeaturesDbParameterGroup",
        Resource::new(
            "AWS::RDS::DBParameterGroup",
            json!({
                "Family": settings.parameter_group_family(),
                "Description": format!("Parameter group for {}", config.identifier),
                "Parameters": parameter_group_parameters(settings)
            }),
        ),
    );
    let subnet_group = template.add_resource(
        "FeaturesDbSubnetGroup",
        Resource::new(
            "AWS::RDS::DBSubnetGroup",
            json!({
                "DBSubnetGroupDescription": format!("Subnets for {}", config.identifier),
                "SubnetIds": subnets
            }),
        ),
    );
    let security_group = template.add_resource(
        "FeaturesDbSecurityGroup",
        resources::security_group(vpc, "Features database"),
    );

    let admin_secret = template.add_resource(
        "FeaturesDbAdminSecret",
        Resource::new(
            "AWS::SecretsManager::Secret",
            json!({
                "Description": format!("Admin credentials for {}", config.identifier),
                "GenerateSecretString": {
                    "SecretStringTemplate": serde_json::to_string(&json!({ "username": settings.admin_user }))?,
                    "GenerateStringKey": "password",
                    "PasswordLength": 30,
                    "ExcludeCharacters": ADMIN_PASSWORD_EXCLUDE
                }
            }),
        ),
    );

    let instance = template.add_resource(
        "FeaturesDb",
        Resource::new(
            "AWS::RDS::DBInstance",
            config.properties(&admin_secret, &parameter_group, &subnet_group, &security_group),
        )
        .retain(),
    );

    // fills host, port and engine into the admin secret
    let attachment = template.add_resource(
        "FeaturesDbAdminSecretAttachment",
        Resource::new(
            "AWS::SecretsManager::SecretTargetAttachment",
            json!({
                "SecretId": intrinsic::reference(&admin_secret),
                "TargetId": intrinsic::reference(&instance),
                "TargetType": "AWS::RDS::DBInstance"
            }),
        ),
    );

    let bootstrap = bootstrap::provision(
        template,
        &BootstrapTarget {
            stack_name: &stack_name,
            instance: &instance,
            instance_security_group: &security_group,
            admin_secret: &admin_secret,
            wait_for: vec![attachment],
        },
        settings,
        lambda,
        vpc,
    )?;

    let mut app_secret = bootstrap.secret.clone();
    let mut proxy = None;
    if settings.use_rds_proxy {
        let (proxy_id, proxy_secret) = provision_proxy(
            template,
            &stack_name,
            settings,
            &subnets,
            &ProxyTarget {
                instance: &instance,
                security_group: &security_group,
                admin_secret: &admin_secret,
                app_secret: &bootstrap.secret,
            },
        )?;
        template.add_output(
            "RdsProxyEndpoint",
            Output::new(intrinsic::get_att(&proxy_id, "Endpoint"))
                .with_description("Endpoint of the features database proxy"),
        );
        app_secret = proxy_secret;
        proxy = Some(proxy_id);
    }

    template.add_output(
        "FeaturesDbSecretName",
        Output::new(intrinsic::reference(&app_secret))
            .with_description(
                "Secret holding the connection info for the features-database postgres database",
            )
            .with_export(format!("{}-featuresdb-secret-name", stack_name)),
    );

    tracing::debug!(
        identifier = %config.identifier,
        instance_type = %config.instance_type,
        from_snapshot = settings.snapshot_id.is_some(),
        proxy = proxy.is_some(),
        "described features database"
    );

    Ok(DatabaseHandle {
        instance,
        security_group,
        admin_secret,
        app_secret,
        proxy,
        bootstrap,
        publicly_accessible: settings.publicly_accessible,
    })
}

struct ProxyTarget<'a> {
    instance: &'a str,
    security_group: &'a str,
    admin_secret: &'a str,
    app_secret: &'a str,
}

fn provision_proxy(
    template: &mut Template,
    stack_name: &str,
    settings: &DatabaseSettings,
    subnets: &[Value],
    target: &ProxyTarget<'_>,
) -> Result<(String, String)> {
    let role = template.add_resource(
        "FeaturesDbProxyRole",
        Resource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Principal": { "Service": "rds.amazonaws.com" },
                        "Action": "sts:AssumeRole"
                    }]
                },
                "Policies": [resources::secret_read_policy(
                    &[target.admin_secret, target.app_secret],
                    "read-proxy-secrets",
                )]
            }),
        ),
    );

    let auth: Vec<Value> = [target.admin_secret, target.app_secret]
        .iter()
        .map(|secret| {
            json!({
                "AuthScheme": "SECRETS",
                "IAMAuth": "DISABLED",
                "SecretArn": intrinsic::reference(secret)
            })
        })
        .collect();

    let proxy = template.add_resource(
        "FeaturesDbProxy",
        Resource::new(
            "AWS::RDS::DBProxy",
            json!({
                "DBProxyName": format!("{}-proxy", stack_name),
                "EngineFamily": "POSTGRESQL",
                "RequireTLS": false,
                "DebugLogging": false,
                "RoleArn": intrinsic::get_att(&role, "Arn"),
                "Auth": auth,
                "VpcSubnetIds": subnets,
                "VpcSecurityGroupIds": [intrinsic::get_att(target.security_group, "GroupId")]
            }),
        ),
    );
    template.add_resource(
        "FeaturesDbProxyTargetGroup",
        Resource::new(
            "AWS::RDS::DBProxyTargetGroup",
            json!({
                "DBProxyName": intrinsic::reference(&proxy),
                "TargetGroupName": "default",
                "DBInstanceIdentifiers": [intrinsic::reference(target.instance)]
            }),
        ),
    );
    // proxy and instance share a security group
    template.add_resource(
        "FeaturesDbProxyIngress",
        resources::tcp_ingress(
            target.security_group,
            target.security_group,
            POSTGRES_PORT,
            "Features database proxy",
        ),
    );

    let path = format!("{}/rds-proxy-features-database", stack_name);
    let fields = json!({
        "dbname": settings.dbname,
        "engine": "postgres",
        "port": POSTGRES_PORT.to_string(),
        "host": format!("${{{}.Endpoint}}", proxy),
        "username": settings.user,
        // same password as the bootstrapped application user
        "password": intrinsic::secret_json_key(target.app_secret, "password")
    });
    let secret = template.add_resource(
        "FeaturesDbProxySecret",
        Resource::new(
            "AWS::SecretsManager::Secret",
            json!({
                "Name": format!("{}/{}", path, stable_suffix(&path)),
                "Description": "Features API RDS Proxy Secrets",
                "SecretString": intrinsic::sub(serde_json::to_string(&fields)?)
            }),
        ),
    );

    Ok((proxy, secret))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> AppSettings {
        AppSettings {
            app_name: "veda-features-api".to_string(),
            stage: "dev".to_string(),
            cdk_default_account: None,
            cdk_default_region: None,
            vpc_id: None,
            subnet_ids: Vec::new(),
            permissions_boundary_policy_name: None,
        }
    }

    fn created_vpc() -> VpcHandle {
        VpcHandle::Created {
            vpc: "Vpc".to_string(),
            public_subnets: vec!["Pub1".to_string(), "Pub2".to_string()],
            private_subnets: vec!["Priv1".to_string(), "Priv2".to_string()],
        }
    }

    fn synth(settings: &DatabaseSettings) -> (Template, DatabaseHandle) {
        let mut template = Template::new("t");
        let handle = provision(
            &mut template,
            &app(),
            settings,
            &LambdaSettings::default(),
            &created_vpc(),
        )
        .unwrap();
        (template, handle)
    }

    #[test]
    fn fresh_instance_is_retained_and_protected() {
        let (template, handle) = synth(&DatabaseSettings::with_schema_version("0.1.1"));
        let db = template.resource(&handle.instance).unwrap();
        assert_eq!(db.properties["DBInstanceIdentifier"], "veda-features-api-dev-featuresdb-postgres");
        assert_eq!(db.properties["DBInstanceClass"], "db.t3.large");
        assert_eq!(db.properties["DeletionProtection"], true);
        assert_eq!(db.properties["MaxAllocatedStorage"], 500);
        assert!(db.property("MasterUsername").is_some());
        assert!(db.property("StorageEncrypted").is_none());
        assert!(db.property("DBSnapshotIdentifier").is_none());
        assert_eq!(db.deletion_policy, Some(crate::template::Policy::Retain));
        assert_eq!(db.update_replace_policy, Some(crate::template::Policy::Retain));
    }

    #[test]
    fn encryption_only_applies_to_fresh_instances() {
        let mut settings = DatabaseSettings::with_schema_version("0.1.1");
        settings.rds_encryption = true;
        let (template, handle) = synth(&settings);
        let db = template.resource(&handle.instance).unwrap();
        assert_eq!(db.properties["StorageEncrypted"], true);

        settings.snapshot_id = Some("rds:snap-2024".to_string());
        let (template, handle) = synth(&settings);
        let db = template.resource(&handle.instance).unwrap();
        assert!(db.property("StorageEncrypted").is_none());
        assert!(db.property("MasterUsername").is_none());
        assert_eq!(db.properties["DBSnapshotIdentifier"], "rds:snap-2024");
    }

    #[test]
    fn max_allocated_storage_is_optional() {
        let mut settings = DatabaseSettings::with_schema_version("0.1.1");
        settings.max_allocated_storage = 0;
        let (template, handle) = synth(&settings);
        let db = template.resource(&handle.instance).unwrap();
        assert!(db.property("MaxAllocatedStorage").is_none());
    }

    #[test]
    fn parameter_group_carries_tuning() {
        let (template, _) = synth(&DatabaseSettings::with_schema_version("0.1.1"));
        let group = template.resource("FeaturesDbParameterGroup").unwrap();
        assert_eq!(group.properties["Family"], "postgres14");
        let params = &group.properties["Parameters"];
        assert_eq!(params["max_locks_per_transaction"], "64");
        assert_eq!(params["work_mem"], "8192");
        assert_eq!(params["temp_buffers"], "32000");
        assert_eq!(params["random_page_cost"], "1.1");
        assert_eq!(params["max_connections"], "475");
    }

    #[test]
    fn subnet_selection_follows_accessibility() {
        let vpc = created_vpc();
        let mut settings = DatabaseSettings::with_schema_version("0.1.1");
        assert_eq!(select_subnets(&app(), &settings, &vpc), vpc.public_subnet_ids());
        settings.publicly_accessible = false;
        assert_eq!(select_subnets(&app(), &settings, &vpc), vpc.private_subnet_ids());

        let mut configured = app();
        configured.subnet_ids = vec!["subnet-0123abcd".to_string()];
        assert_eq!(select_subnets(&configured, &settings, &vpc), vec![json!("subnet-0123abcd")]);
    }

    #[test]
    fn without_proxy_app_secret_is_bootstrapped_secret() {
        let (template, handle) = synth(&DatabaseSettings::with_schema_version("0.1.1"));
        assert!(handle.proxy.is_none());
        assert_eq!(handle.app_secret, handle.bootstrap.secret);
        let output = &template.outputs["FeaturesDbSecretName"];
        assert_eq!(output.value, json!({ "Ref": handle.bootstrap.secret }));
        assert_eq!(
            output.export,
            Some(json!({ "Name": "veda-features-api-dev-featuresdb-secret-name" }))
        );
        assert!(!template.outputs.contains_key("RdsProxyEndpoint"));
    }

    #[test]
    fn proxy_secret_reuses_bootstrapped_password() {
        let mut settings = DatabaseSettings::with_schema_version("0.1.1");
        settings.use_rds_proxy = true;
        let (template, handle) = synth(&settings);

        let proxy = handle.proxy.clone().unwrap();
        assert_ne!(handle.app_secret, handle.bootstrap.secret);
        let secret = template.resource(&handle.app_secret).unwrap();
        assert!(secret.property("GenerateSecretString").is_none());
        let raw = secret.properties["SecretString"]["Fn::Sub"].as_str().unwrap();
        let fields: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(fields["host"], format!("${{{}.Endpoint}}", proxy));
        assert_eq!(
            fields["password"],
            format!(
                "{{{{resolve:secretsmanager:${{{}}}:SecretString:password}}}}",
                handle.bootstrap.secret
            )
        );

        let db_proxy = template.resource(&proxy).unwrap();
        assert_eq!(db_proxy.properties["RequireTLS"], false);
        assert_eq!(db_proxy.properties["DBProxyName"], "veda-features-api-dev-proxy");
        assert!(template.outputs.contains_key("RdsProxyEndpoint"));
    }
}
