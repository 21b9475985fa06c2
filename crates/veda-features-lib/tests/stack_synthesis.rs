//! End-to-end synthesis from environment variables.

use figment::Jail;
use serde_json::Value;
use veda_features_lib::{FeaturesStack, StackSettings};

fn resource_types(template: &Value) -> Vec<String> {
    template["Resources"]
        .as_object()
        .map(|resources| {
            resources
                .values()
                .filter_map(|r| r["Type"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn synthesizes_imported_vpc_stack_from_env() {
    Jail::expect_with(|jail| {
        jail.set_env("VEDA_STAGE", "Staging");
        jail.set_env("VEDA_VPC_ID", "vpc-0a1b2c3d");
        jail.set_env("VEDA_SUBNET_IDS", "subnet-0a1b2c3d,subnet-0a1b2c3d4e5f60718");
        jail.set_env("VEDA_FEATURES_DB_SCHEMA_VERSION", "0.1.1");
        jail.set_env("VEDA_FEATURES_DB_USE_RDS_PROXY", "true");
        jail.set_env("VEDA_FEATURES_DB_RDS_ENGINE_FULL_VERSION", "14.10");
        jail.set_env("VEDA_PERMISSIONS_BOUNDARY_POLICY_NAME", "boundary");

        let settings = StackSettings::from_env().map_err(|e| e.to_string())?;
        assert_eq!(settings.database.rds_engine_full_version, "14.10");

        let stack = FeaturesStack::build(&settings).map_err(|e| e.to_string())?;
        assert_eq!(stack.name, "veda-features-api-staging");

        let template = stack.template.to_json_value().map_err(|e| e.to_string())?;
        let types = resource_types(&template);
        assert!(!types.iter().any(|t| t == "AWS::EC2::VPC"));
        assert!(types.iter().any(|t| t == "AWS::RDS::DBProxy"));
        assert!(types.iter().any(|t| t == "Custom::Bootstrapper"));

        let db = &template["Resources"]["FeaturesDb"]["Properties"];
        assert_eq!(db["EngineVersion"], "14.10");
        assert_eq!(
            db["DBInstanceIdentifier"],
            "veda-features-api-staging-featuresdb-postgres"
        );

        let subnets = &template["Resources"]["FeaturesDbSubnetGroup"]["Properties"]["SubnetIds"];
        assert_eq!(subnets.as_array().map(Vec::len), Some(2));

        let export = &template["Outputs"]["FeaturesDbSecretName"]["Export"]["Name"];
        assert_eq!(export, "veda-features-api-staging-featuresdb-secret-name");
        Ok(())
    });
}

#[test]
fn missing_stage_fails_fast() {
    Jail::expect_with(|jail| {
        jail.set_env("VEDA_FEATURES_DB_SCHEMA_VERSION", "0.1.1");
        assert!(StackSettings::from_env().is_err());
        Ok(())
    });
}

#[test]
fn created_vpc_places_function_in_private_subnets() {
    Jail::expect_with(|jail| {
        jail.set_env("VEDA_STAGE", "dev");
        jail.set_env("VEDA_FEATURES_DB_SCHEMA_VERSION", "0.1.1");
        jail.set_env("VEDA_LAMBDA_CODE_BUCKET", "veda-artifacts");

        let settings = StackSettings::from_env().map_err(|e| e.to_string())?;
        let template = FeaturesStack::synthesize(&settings)
            .and_then(|t| Ok(t.to_json_value()?))
            .map_err(|e| e.to_string())?;

        let function = &template["Resources"]["FeaturesApiFunction"]["Properties"];
        assert_eq!(function["Code"]["S3Bucket"], "veda-artifacts");
        assert_eq!(function["MemorySize"], 8192);
        let subnets = function["VpcConfig"]["SubnetIds"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert_eq!(subnets.len(), 2);
        assert!(subnets
            .iter()
            .all(|s| s["Ref"].as_str().is_some_and(|id| id.starts_with("VpcPrivateSubnet"))));
        assert!(template.get("Parameters").is_none());
        Ok(())
    });
}
