//! Custom domain binding for the API.

use serde_json::json;

use crate::error::Result;
use crate::settings::{DomainSettings, HostedZone};
use crate::template::{intrinsic, Output, Resource, Template};

/// Subdomain label of the API: `{api_prefix}-features`, or `{stage}-features`
/// when no prefix is configured. Always lowercase.
pub fn features_url_prefix(stage: &str, api_prefix: Option<&str>) -> String {
    let base = api_prefix
        .map(str::trim)
        .filter(|prefix| !prefix.is_empty())
        .unwrap_or(stage);
    format!("{}-features", base.to_lowercase())
}

/// Fully qualified API domain name, or `None` when custom domains are disabled.
pub fn features_domain_name(
    settings: &DomainSettings,
    stage: &str,
    alt_domain: bool,
) -> Result<Option<String>> {
    Ok(settings.hosted_zone(alt_domain)?.map(|zone| {
        format!(
            "{}.{}",
            features_url_prefix(stage, settings.api_prefix.as_deref()),
            zone.name
        )
    }))
}

/// A bound custom domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainBinding {
    /// Logical id of the API Gateway domain name.
    pub domain_name: String,
    /// The fully qualified host name.
    pub host: String,
    pub zone: HostedZone,
}

impl DomainBinding {
    pub fn url(&self) -> String {
        format!("https://{}/", self.host)
    }
}

/// Add certificate, domain name and DNS alias when custom subdomains are enabled.
pub fn provision(
    template: &mut Template,
    settings: &DomainSettings,
    stage: &str,
    alt_domain: bool,
) -> Result<Option<DomainBinding>> {
    let Some(zone) = settings.hosted_zone(alt_domain)? else {
        return Ok(None);
    };
    let prefix = features_url_prefix(stage, settings.api_prefix.as_deref());
    let host = format!("{}.{}", prefix, zone.name);

    let certificate = template.add_resource(
        "DomainCertificate",
        Resource::new(
            "AWS::CertificateManager::Certificate",
            json!({
                "DomainName": format!("*.{}", zone.name),
                "ValidationMethod": "DNS",
                "DomainValidationOptions": [{
                    "DomainName": format!("*.{}", zone.name),
                    "HostedZoneId": zone.id
                }]
            }),
        ),
    );
    let domain_name = template.add_resource(
        "FeaturesApiCustomDomain",
        Resource::new(
            "AWS::ApiGatewayV2::DomainName",
            json!({
                "DomainName": host,
                "DomainNameConfigurations": [{
                    "CertificateArn": intrinsic::reference(&certificate),
                    "EndpointType": "REGIONAL"
                }]
            }),
        ),
    );
    template.add_resource(
        "FeaturesApiDnsRecord",
        Resource::new(
            "AWS::Route53::RecordSet",
            json!({
                "HostedZoneId": zone.id,
                "Name": format!("{}.", host),
                "Type": "A",
                "AliasTarget": {
                    "DNSName": intrinsic::get_att(&domain_name, "RegionalDomainName"),
                    "HostedZoneId": intrinsic::get_att(&domain_name, "RegionalHostedZoneId")
                }
            }),
        ),
    );

    let binding = DomainBinding {
        domain_name,
        host,
        zone,
    };
    template.add_output(
        "FeaturesApiDomain",
        Output::new(json!(binding.url())).with_description("Custom domain of the features API"),
    );
    tracing::debug!(host = %binding.host, "bound custom domain");
    Ok(Some(binding))
}
