//! CloudFormation template model.
//!
//! The template is an ordered, serializable description of resources; it is
//! never evaluated here. Maps are `BTreeMap`s so synthesis is deterministic
//! and template diffs stay readable.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};

/// Deletion / replacement policy of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Policy {
    Delete,
    Retain,
    Snapshot,
}

/// A single template resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "is_empty_object")]
    pub properties: Value,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<Policy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<Policy>,
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().map(|o| o.is_empty()).unwrap_or(false)
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, properties: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties,
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    /// Add an explicit dependency.
    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        let id = logical_id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    /// Keep the physical resource when it is removed from the stack or replaced.
    pub fn retain(mut self) -> Self {
        self.deletion_policy = Some(Policy::Retain);
        self.update_replace_policy = Some(Policy::Retain);
        self
    }

    /// Look up a top-level property.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Set or replace a top-level property.
    pub fn set_property(&mut self, name: &str, value: Value) {
        if let Some(props) = self.properties.as_object_mut() {
            props.insert(name.to_string(), value);
        }
    }
}

/// A template parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// A template output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<Value>,
}

impl Output {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            description: None,
            export: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_export(mut self, name: impl Into<String>) -> Self {
        self.export = Some(json!({ "Name": name.into() }));
        self
    }
}

/// A complete CloudFormation template.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    pub description: String,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,

    pub resources: BTreeMap<String, Resource>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Template {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            format_version: "2010-09-09".to_string(),
            description: description.into(),
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Insert a resource and return its logical id.
    ///
    /// Logical ids are unique; inserting the same id twice replaces the
    /// earlier resource and logs a warning.
    pub fn add_resource(&mut self, logical_id: impl Into<String>, resource: Resource) -> String {
        let id = logical_id.into();
        if self.resources.insert(id.clone(), resource).is_some() {
            tracing::warn!(logical_id = %id, "resource replaced during synthesis");
        }
        id
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, parameter: Parameter) -> String {
        let name = name.into();
        self.parameters.insert(name.clone(), parameter);
        name
    }

    pub fn add_output(&mut self, name: impl Into<String>, output: Output) {
        self.outputs.insert(name.into(), output);
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    pub fn resource_mut(&mut self, logical_id: &str) -> Option<&mut Resource> {
        self.resources.get_mut(logical_id)
    }

    /// Logical ids of every resource of the given type.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }

    pub fn to_json_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn to_json_string(&self, pretty: bool) -> serde_json::Result<String> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }
}

/// Intrinsic function helpers.
pub mod intrinsic {
    use serde_json::{json, Value};

    /// `{"Ref": id}`
    pub fn reference(logical_id: &str) -> Value {
        json!({ "Ref": logical_id })
    }

    /// `{"Fn::GetAtt": [id, attribute]}`
    pub fn get_att(logical_id: &str, attribute: &str) -> Value {
        json!({ "Fn::GetAtt": [logical_id, attribute] })
    }

    /// `{"Fn::Sub": template}`
    pub fn sub(template: impl Into<String>) -> Value {
        json!({ "Fn::Sub": template.into() })
    }

    /// `{"Fn::Join": [delimiter, parts]}`
    pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
        json!({ "Fn::Join": [delimiter, parts] })
    }

    /// The `index`-th availability zone of the current region.
    pub fn availability_zone(index: usize) -> Value {
        json!({ "Fn::Select": [index.to_string(), { "Fn::GetAZs": "" }] })
    }

    /// Dynamic reference to one JSON key of a secret, for use inside `Fn::Sub`.
    pub fn secret_json_key(secret_logical_id: &str, key: &str) -> String {
        format!(
            "{{{{resolve:secretsmanager:${{{}}}:SecretString:{}}}}}",
            secret_logical_id, key
        )
    }

    /// Dynamic reference to one JSON key of a secret as a property value.
    pub fn secret_value(secret_logical_id: &str, key: &str) -> Value {
        sub(secret_json_key(secret_logical_id, key))
    }

    /// ARN of a managed policy in the current partition and account.
    pub fn account_policy_arn(policy_name: &str) -> Value {
        sub(format!(
            "arn:${{AWS::Partition}}:iam::${{AWS::AccountId}}:policy/{}",
            policy_name
        ))
    }

    /// ARN of an AWS managed policy in the current partition.
    pub fn aws_managed_policy_arn(policy_path: &str) -> Value {
        sub(format!("arn:${{AWS::Partition}}:iam::aws:policy/{}", policy_path))
    }
}

/// Convert a name into a CloudFormation logical id (alphanumeric, PascalCase).
pub fn logical_id(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|part| part.split(|c: char| !c.is_ascii_alphanumeric()))
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Short stable hex suffix derived from a path, used to keep physical names unique.
pub fn stable_suffix(path: &str) -> String {
    // FNV-1a, 32 bit
    let hash = path.bytes().fold(0x811c_9dc5_u32, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    });
    format!("{:08x}", hash)
}
