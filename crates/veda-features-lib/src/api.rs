//! Deployment description of the API function and its HTTP API.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::database::DatabaseHandle;
use crate::domain::DomainBinding;
use crate::error::Result;
use crate::network::VpcHandle;
use crate::resources::{self, CodeLocation, FunctionSpec};
use crate::settings::{AppSettings, LambdaSettings};
use crate::template::{intrinsic, Output, Resource, Template};

const LOG_RETENTION_DAYS: u32 = 7;
const POSTGRES_PORT: u16 = 5432;

/// Resources added by [`provision`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApiHandle {
    pub function: String,
    pub role: String,
    pub http_api: String,
    pub stage: String,
}

/// Environment of the API function.
///
/// Extra variables from `LambdaSettings::env` come first so the connection
/// and routing variables always win.
pub fn function_environment(
    lambda: &LambdaSettings,
    app_secret: &str,
    domain: Option<&DomainBinding>,
) -> BTreeMap<String, Value> {
    let mut env: BTreeMap<String, Value> = lambda
        .env
        .iter()
        .map(|(key, value)| (key.clone(), json!(value)))
        .collect();
    env.insert(
        "VEDA_FEATURES_POSTGIS_SECRET_ARN".to_string(),
        intrinsic::reference(app_secret),
    );
    env.insert(
        "VEDA_FEATURES_ROOT_PATH".to_string(),
        json!(lambda.features_root_path),
    );
    env.insert("VEDA_FEATURES_STAGE".to_string(), json!(lambda.features_stage));

    let custom_host = lambda
        .custom_host()
        .map(str::to_string)
        .or_else(|| domain.map(DomainBinding::url));
    if let Some(host) = custom_host {
        env.insert("VEDA_FEATURES_CUSTOM_HOST".to_string(), json!(host));
    }
    env
}

/// Add the API function, its HTTP API and the optional domain mapping.
pub fn provision(
    template: &mut Template,
    app: &AppSettings,
    lambda: &LambdaSettings,
    vpc: &VpcHandle,
    database: &DatabaseHandle,
    domain: Option<&DomainBinding>,
) -> Result<ApiHandle> {
    let stack_name = app.stack_name();

    // application secret only; the admin secret stays with the bootstrap function
    let role = template.add_resource(
        "FeaturesApiRole",
        resources::function_role(&[database.app_secret.as_str()], "read-features-db-secret"),
    );
    let security_group = template.add_resource(
        "FeaturesApiSecurityGroup",
        resources::security_group(vpc, "Features API function"),
    );
    template.add_resource(
        "FeaturesApiDatabaseIngress",
        resources::tcp_ingress(
            &database.security_group,
            &security_group,
            POSTGRES_PORT,
            "Features API function",
        ),
    );

    let code = CodeLocation::resolve(template, lambda, &lambda.features_api_code_key);
    let function = template.add_resource(
        "FeaturesApiFunction",
        resources::function(
            &FunctionSpec {
                description: format!("{} features API", stack_name),
                code: &code,
                role: &role,
                security_group: &security_group,
                memory_mb: lambda.features_memory,
                timeout_secs: lambda.features_timeout,
                environment: function_environment(lambda, &database.app_secret, domain),
            },
            vpc,
        )
        // the application credentials exist once bootstrapping completed
        .depends_on(&database.bootstrap.custom_resource),
    );
    template.add_resource(
        "FeaturesApiLogGroup",
        resources::function_log_group(&function, LOG_RETENTION_DAYS),
    );

    let http_api = template.add_resource(
        "FeaturesHttpApi",
        Resource::new(
            "AWS::ApiGatewayV2::Api",
            json!({
                "Name": format!("{}-features-api", stack_name),
                "ProtocolType": "HTTP"
            }),
        ),
    );
    let integration = template.add_resource(
        "FeaturesHttpApiIntegration",
        Resource::new(
            "AWS::ApiGatewayV2::Integration",
            json!({
                "ApiId": intrinsic::reference(&http_api),
                "IntegrationType": "AWS_PROXY",
                "IntegrationUri": intrinsic::get_att(&function, "Arn"),
                "PayloadFormatVersion": "2.0"
            }),
        ),
    );
    template.add_resource(
        "FeaturesHttpApiDefaultRoute",
        Resource::new(
            "AWS::ApiGatewayV2::Route",
            json!({
                "ApiId": intrinsic::reference(&http_api),
                "RouteKey": "$default",
                "Target": intrinsic::join("/", vec![json!("integrations"), intrinsic::reference(&integration)])
            }),
        ),
    );
    let stage = template.add_resource(
        "FeaturesHttpApiStage",
        Resource::new(
            "AWS::ApiGatewayV2::Stage",
            json!({
                "ApiId": intrinsic::reference(&http_api),
                "StageName": "$default",
                "AutoDeploy": true
            }),
        ),
    );
    template.add_resource(
        "FeaturesApiInvokePermission",
        Resource::new(
            "AWS::Lambda::Permission",
            json!({
                "Action": "lambda:InvokeFunction",
                "FunctionName": intrinsic::reference(&function),
                "Principal": "apigateway.amazonaws.com",
                "SourceArn": intrinsic::sub(format!(
                    "arn:${{AWS::Partition}}:execute-api:${{AWS::Region}}:${{AWS::AccountId}}:${{{}}}/*/*",
                    http_api
                ))
            }),
        ),
    );

    if let Some(binding) = domain {
        template.add_resource(
            "FeaturesApiMapping",
            Resource::new(
                "AWS::ApiGatewayV2::ApiMapping",
                json!({
                    "ApiId": intrinsic::reference(&http_api),
                    "DomainName": intrinsic::reference(&binding.domain_name),
                    "Stage": intrinsic::reference(&stage)
                }),
            )
            .depends_on(&stage),
        );
    }

    template.add_output(
        "FeaturesApiUrl",
        Output::new(intrinsic::sub(format!(
            "https://${{{}}}.execute-api.${{AWS::Region}}.${{AWS::URLSuffix}}/",
            http_api
        )))
        .with_description("Endpoint of the features API")
        .with_export(format!("{}-features-api-url", stack_name)),
    );

    Ok(ApiHandle {
        function,
        role,
        http_api,
        stage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::HostedZone;

    #[test]
    fn environment_points_at_app_secret() {
        let lambda = LambdaSettings {
            features_root_path: "/api/features".to_string(),
            env: BTreeMap::from([
                ("RUST_LOG".to_string(), "debug".to_string()),
                ("VEDA_FEATURES_POSTGIS_SECRET_ARN".to_string(), "override".to_string()),
            ]),
            ..Default::default()
        };
        let env = function_environment(&lambda, "FeaturesTipgDbSecret", None);
        assert_eq!(
            env["VEDA_FEATURES_POSTGIS_SECRET_ARN"],
            json!({ "Ref": "FeaturesTipgDbSecret" })
        );
        assert_eq!(env["VEDA_FEATURES_ROOT_PATH"], "/api/features");
        assert_eq!(env["RUST_LOG"], "debug");
        assert!(!env.contains_key("VEDA_FEATURES_CUSTOM_HOST"));
    }

    #[test]
    fn custom_host_falls_back_to_domain() {
        let binding = DomainBinding {
            domain_name: "FeaturesApiCustomDomain".to_string(),
            host: "dev-features.example.com".to_string(),
            zone: HostedZone {
                id: "Z1".to_string(),
                name: "example.com".to_string(),
            },
        };
        let env = function_environment(&LambdaSettings::default(), "S", Some(&binding));
        assert_eq!(env["VEDA_FEATURES_CUSTOM_HOST"], "https://dev-features.example.com/");

        let lambda = LambdaSettings {
            custom_host: "https://features.example.org".to_string(),
            ..Default::default()
        };
        let env = function_environment(&lambda, "S", Some(&binding));
        assert_eq!(env["VEDA_FEATURES_CUSTOM_HOST"], "https://features.example.org");
    }
}
