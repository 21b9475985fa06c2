//! Builders for resources shared by several provisioners (roles, security
//! groups, functions and their log groups).

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::network::VpcHandle;
use crate::settings::LambdaSettings;
use crate::template::{intrinsic, Parameter, Resource, Template};

/// Template parameter holding the function package bucket when it is not configured.
pub const CODE_BUCKET_PARAMETER: &str = "LambdaCodeBucket";

/// Where a function package lives.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeLocation {
    pub bucket: Value,
    pub key: String,
}

impl CodeLocation {
    /// Resolve the package bucket, registering a template parameter when none is configured.
    pub fn resolve(template: &mut Template, settings: &LambdaSettings, key: &str) -> Self {
        let bucket = match &settings.lambda_code_bucket {
            Some(bucket) => Value::String(bucket.clone()),
            None => {
                template.add_parameter(
                    CODE_BUCKET_PARAMETER,
                    Parameter {
                        parameter_type: "String".to_string(),
                        description: "S3 bucket holding the function packages".to_string(),
                        default: None,
                    },
                );
                intrinsic::reference(CODE_BUCKET_PARAMETER)
            }
        };
        Self {
            bucket,
            key: key.to_string(),
        }
    }
}

/// Execution role for a function inside the VPC that may read the given secrets.
///
/// `readable_secrets` are secret logical ids; nothing else is granted.
pub fn function_role(readable_secrets: &[&str], policy_name: &str) -> Resource {
    let mut properties = json!({
        "AssumeRolePolicyDocument": {
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": "lambda.amazonaws.com" },
                "Action": "sts:AssumeRole"
            }]
        },
        "ManagedPolicyArns": [
            intrinsic::aws_managed_policy_arn("service-role/AWSLambdaBasicExecutionRole"),
            intrinsic::aws_managed_policy_arn("service-role/AWSLambdaVPCAccessExecutionRole")
        ]
    });

    if !readable_secrets.is_empty() {
        properties["Policies"] = json!([secret_read_policy(readable_secrets, policy_name)]);
    }

    Resource::new("AWS::IAM::Role", properties)
}

/// Inline policy granting read access to the given secrets.
pub fn secret_read_policy(readable_secrets: &[&str], policy_name: &str) -> Value {
    let resources: Vec<Value> = readable_secrets
        .iter()
        .map(|id| intrinsic::reference(id))
        .collect();
    json!({
        "PolicyName": policy_name,
        "PolicyDocument": {
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": ["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"],
                "Resource": resources
            }]
        }
    })
}

/// Security group with unrestricted egress.
pub fn security_group(vpc: &VpcHandle, description: &str) -> Resource {
    Resource::new(
        "AWS::EC2::SecurityGroup",
        json!({
            "GroupDescription": description,
            "VpcId": vpc.vpc_id(),
            "SecurityGroupEgress": [{
                "CidrIp": "0.0.0.0/0",
                "IpProtocol": "-1",
                "Description": "Allow all outbound traffic by default"
            }]
        }),
    )
}

/// Allow TCP traffic on `port` into `target_group` from `source_group`.
pub fn tcp_ingress(target_group: &str, source_group: &str, port: u16, description: &str) -> Resource {
    Resource::new(
        "AWS::EC2::SecurityGroupIngress",
        json!({
            "GroupId": intrinsic::get_att(target_group, "GroupId"),
            "SourceSecurityGroupId": intrinsic::get_att(source_group, "GroupId"),
            "IpProtocol": "tcp",
            "FromPort": port,
            "ToPort": port,
            "Description": description
        }),
    )
}

/// Parameters of a function resource.
#[derive(Debug, Clone)]
pub struct FunctionSpec<'a> {
    pub description: String,
    pub code: &'a CodeLocation,
    pub role: &'a str,
    pub security_group: &'a str,
    pub memory_mb: u32,
    pub timeout_secs: u32,
    pub environment: BTreeMap<String, Value>,
}

/// A function running the custom Rust runtime, placed in the private subnets.
pub fn function(spec: &FunctionSpec<'_>, vpc: &VpcHandle) -> Resource {
    let mut properties = json!({
        "Description": spec.description,
        "Runtime": "provided.al2023",
        "Handler": "bootstrap",
        "Architectures": ["arm64"],
        "Code": {
            "S3Bucket": spec.code.bucket,
            "S3Key": spec.code.key
        },
        "MemorySize": spec.memory_mb,
        "Timeout": spec.timeout_secs,
        "Role": intrinsic::get_att(spec.role, "Arn"),
        "VpcConfig": {
            "SubnetIds": vpc.private_subnet_ids(),
            "SecurityGroupIds": [intrinsic::get_att(spec.security_group, "GroupId")]
        }
    });
    if !spec.environment.is_empty() {
        properties["Environment"] = json!({ "Variables": spec.environment });
    }
    Resource::new("AWS::Lambda::Function", properties).depends_on(spec.role)
}

/// Log group of a function with a fixed retention.
pub fn function_log_group(function: &str, retention_days: u32) -> Resource {
    Resource::new(
        "AWS::Logs::LogGroup",
        json!({
            "LogGroupName": intrinsic::sub(format!("/aws/lambda/${{{}}}", function)),
            "RetentionInDays": retention_days
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_only_grants_listed_secrets() {
        let role = function_role(&["AppSecret"], "read-secrets");
        let statement = &role.properties["Policies"][0]["PolicyDocument"]["Statement"][0];
        assert_eq!(statement["Resource"], json!([{ "Ref": "AppSecret" }]));
    }

    #[test]
    fn role_without_secrets_has_no_inline_policy() {
        let role = function_role(&[], "unused");
        assert!(role.property("Policies").is_none());
    }

    #[test]
    fn code_location_uses_parameter_without_bucket() {
        let mut template = Template::new("t");
        let location = CodeLocation::resolve(&mut template, &LambdaSettings::default(), "k.zip");
        assert_eq!(location.bucket, json!({ "Ref": CODE_BUCKET_PARAMETER }));
        assert!(template.parameters.contains_key(CODE_BUCKET_PARAMETER));

        let mut template = Template::new("t");
        let settings = LambdaSettings {
            lambda_code_bucket: Some("my-bucket".to_string()),
            ..Default::default()
        };
        let location = CodeLocation::resolve(&mut template, &settings, "k.zip");
        assert_eq!(location.bucket, json!("my-bucket"));
        assert!(template.parameters.is_empty());
    }

    #[test]
    fn log_group_names_follow_function() {
        let group = function_log_group("BootstrapFunction", 7);
        assert_eq!(
            group.properties["LogGroupName"],
            json!({ "Fn::Sub": "/aws/lambda/${BootstrapFunction}" })
        );
        assert_eq!(group.properties["RetentionInDays"], 7);
    }
}
