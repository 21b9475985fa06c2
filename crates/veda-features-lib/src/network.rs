//! VPC provisioning: import an existing network or describe a new one.

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::settings::AppSettings;
use crate::template::{intrinsic, Output, Resource, Template};

/// CIDR block of a created VPC.
pub const VPC_CIDR: &str = "10.100.0.0/16";

const AVAILABILITY_ZONES: usize = 2;

/// The network every other resource is placed in.
#[derive(Debug, Clone, PartialEq)]
pub enum VpcHandle {
    /// An existing VPC referenced by id.
    Imported { vpc_id: String, subnet_ids: Vec<String> },
    /// A VPC described by this template.
    Created {
        vpc: String,
        public_subnets: Vec<String>,
        private_subnets: Vec<String>,
    },
}

impl VpcHandle {
    /// VPC id as a template value.
    pub fn vpc_id(&self) -> Value {
        match self {
            Self::Imported { vpc_id, .. } => json!(vpc_id),
            Self::Created { vpc, .. } => intrinsic::reference(vpc),
        }
    }

    pub fn public_subnet_ids(&self) -> Vec<Value> {
        match self {
            Self::Imported { subnet_ids, .. } => subnet_ids.iter().map(|id| json!(id)).collect(),
            Self::Created { public_subnets, .. } => {
                public_subnets.iter().map(|id| intrinsic::reference(id)).collect()
            }
        }
    }

    pub fn private_subnet_ids(&self) -> Vec<Value> {
        match self {
            Self::Imported { subnet_ids, .. } => subnet_ids.iter().map(|id| json!(id)).collect(),
            Self::Created {
                private_subnets, ..
            } => private_subnets.iter().map(|id| intrinsic::reference(id)).collect(),
        }
    }

    pub fn is_imported(&self) -> bool {
        matches!(self, Self::Imported { .. })
    }
}

/// Import the configured VPC or add a new one to the template.
pub fn provision(template: &mut Template, app: &AppSettings) -> Result<VpcHandle> {
    match &app.vpc_id {
        Some(vpc_id) => {
            if app.subnet_ids.is_empty() {
                return Err(Error::invalid_setting(
                    "subnet_ids",
                    "an imported VPC needs at least one subnet id",
                ));
            }
            tracing::debug!(vpc_id = %vpc_id, subnets = app.subnet_ids.len(), "importing VPC");
            Ok(VpcHandle::Imported {
                vpc_id: vpc_id.clone(),
                subnet_ids: app.subnet_ids.clone(),
            })
        }
        None => Ok(create(template, &app.stack_name())),
    }
}

fn name_tag(name: String) -> Value {
    json!([{ "Key": "Name", "Value": name }])
}

fn create(template: &mut Template, stack_name: &str) -> VpcHandle {
    let vpc = template.add_resource(
        "Vpc",
        Resource::new(
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": VPC_CIDR,
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "Tags": name_tag(format!("{}-vpc", stack_name))
            }),
        ),
    );

    let gateway = template.add_resource(
        "VpcInternetGateway",
        Resource::new(
            "AWS::EC2::InternetGateway",
            json!({ "Tags": name_tag(format!("{}-igw", stack_name)) }),
        ),
    );
    let attachment = template.add_resource(
        "VpcGatewayAttachment",
        Resource::new(
            "AWS::EC2::VPCGatewayAttachment",
            json!({
                "VpcId": intrinsic::reference(&vpc),
                "InternetGatewayId": intrinsic::reference(&gateway)
            }),
        ),
    );

    let public_routes = template.add_resource(
        "VpcPublicRouteTable",
        Resource::new(
            "AWS::EC2::RouteTable",
            json!({ "VpcId": intrinsic::reference(&vpc) }),
        ),
    );
    template.add_resource(
        "VpcPublicDefaultRoute",
        Resource::new(
            "AWS::EC2::Route",
            json!({
                "RouteTableId": intrinsic::reference(&public_routes),
                "DestinationCidrBlock": "0.0.0.0/0",
                "GatewayId": intrinsic::reference(&gateway)
            }),
        )
        .depends_on(&attachment),
    );

    let mut public_subnets = Vec::with_capacity(AVAILABILITY_ZONES);
    let mut private_subnets = Vec::with_capacity(AVAILABILITY_ZONES);

    for az in 0..AVAILABILITY_ZONES {
        let n = az + 1;
        let public = template.add_resource(
            format!("VpcPublicSubnet{}", n),
            Resource::new(
                "AWS::EC2::Subnet",
                json!({
                    "VpcId": intrinsic::reference(&vpc),
                    "CidrBlock": format!("10.100.{}.0/24", az),
                    "AvailabilityZone": intrinsic::availability_zone(az),
                    "MapPublicIpOnLaunch": true,
                    "Tags": name_tag(format!("{}-public-{}", stack_name, n))
                }),
            ),
        );
        template.add_resource(
            format!("VpcPublicSubnet{}RouteTableAssociation", n),
            Resource::new(
                "AWS::EC2::SubnetRouteTableAssociation",
                json!({
                    "SubnetId": intrinsic::reference(&public),
                    "RouteTableId": intrinsic::reference(&public_routes)
                }),
            ),
        );

        let private = template.add_resource(
            format!("VpcPrivateSubnet{}", n),
            Resource::new(
                "AWS::EC2::Subnet",
                json!({
                    "VpcId": intrinsic::reference(&vpc),
                    "CidrBlock": format!("10.100.{}.0/24", 128 + az),
                    "AvailabilityZone": intrinsic::availability_zone(az),
                    "MapPublicIpOnLaunch": false,
                    "Tags": name_tag(format!("{}-private-{}", stack_name, n))
                }),
            ),
        );

        public_subnets.push(public);
        private_subnets.push(private);
    }

    // single NAT gateway in the first public subnet
    let eip = template.add_resource(
        "VpcNatEip",
        Resource::new("AWS::EC2::EIP", json!({ "Domain": "vpc" })).depends_on(&attachment),
    );
    let nat = template.add_resource(
        "VpcNatGateway",
        Resource::new(
            "AWS::EC2::NatGateway",
            json!({
                "AllocationId": intrinsic::get_att(&eip, "AllocationId"),
                "SubnetId": intrinsic::reference(&public_subnets[0])
            }),
        ),
    );
    let private_routes = template.add_resource(
        "VpcPrivateRouteTable",
        Resource::new(
            "AWS::EC2::RouteTable",
            json!({ "VpcId": intrinsic::reference(&vpc) }),
        ),
    );
    template.add_resource(
        "VpcPrivateDefaultRoute",
        Resource::new(
            "AWS::EC2::Route",
            json!({
                "RouteTableId": intrinsic::reference(&private_routes),
                "DestinationCidrBlock": "0.0.0.0/0",
                "NatGatewayId": intrinsic::reference(&nat)
            }),
        ),
    );
    for (i, subnet) in private_subnets.iter().enumerate() {
        template.add_resource(
            format!("VpcPrivateSubnet{}RouteTableAssociation", i + 1),
            Resource::new(
                "AWS::EC2::SubnetRouteTableAssociation",
                json!({
                    "SubnetId": intrinsic::reference(subnet),
                    "RouteTableId": intrinsic::reference(&private_routes)
                }),
            ),
        );
    }

    template.add_output(
        "VpcId",
        Output::new(intrinsic::reference(&vpc)).with_export(format!("{}-vpc-id", stack_name)),
    );

    tracing::debug!(stack = %stack_name, "created VPC topology");

    VpcHandle::Created {
        vpc,
        public_subnets,
        private_subnets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(vpc_id: Option<&str>, subnets: &[&str]) -> AppSettings {
        AppSettings {
            app_name: "veda-features-api".to_string(),
            stage: "dev".to_string(),
            cdk_default_account: None,
            cdk_default_region: None,
            vpc_id: vpc_id.map(str::to_string),
            subnet_ids: subnets.iter().map(|s| s.to_string()).collect(),
            permissions_boundary_policy_name: None,
        }
    }

    #[test]
    fn imported_vpc_adds_no_resources() {
        let mut template = Template::new("t");
        let handle = provision(
            &mut template,
            &app(Some("vpc-0123abcd"), &["subnet-0123abcd", "subnet-4567abcd"]),
        )
        .unwrap();
        assert!(handle.is_imported());
        assert!(template.resources.is_empty());
        assert_eq!(handle.vpc_id(), json!("vpc-0123abcd"));
        assert_eq!(handle.private_subnet_ids().len(), 2);
    }

    #[test]
    fn imported_vpc_requires_subnets() {
        let mut template = Template::new("t");
        let err = provision(&mut template, &app(Some("vpc-0123abcd"), &[])).unwrap_err();
        assert!(err.to_string().contains("subnet_ids"));
    }

    #[test]
    fn created_vpc_has_public_and_private_subnets() {
        let mut template = Template::new("t");
        let handle = provision(&mut template, &app(None, &[])).unwrap();
        assert!(!handle.is_imported());
        assert_eq!(template.resources_of_type("AWS::EC2::Subnet").count(), 4);
        assert_eq!(template.resources_of_type("AWS::EC2::NatGateway").count(), 1);
        assert_eq!(handle.vpc_id(), json!({ "Ref": "Vpc" }));
        assert_eq!(
            handle.public_subnet_ids(),
            vec![json!({ "Ref": "VpcPublicSubnet1" }), json!({ "Ref": "VpcPublicSubnet2" })]
        );
        let private = template.resource("VpcPrivateSubnet1").unwrap();
        assert_eq!(private.properties["MapPublicIpOnLaunch"], false);
    }
}
