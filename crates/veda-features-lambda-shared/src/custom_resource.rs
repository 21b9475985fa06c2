//! CloudFormation custom resource protocol.
//!
//! CloudFormation invokes the function with a [`CustomResourceEvent`] and
//! waits until a [`CustomResourceResponse`] is `PUT` to the presigned
//! `ResponseURL`. The presigned URL is signed without a content type, so the
//! request must be sent with an empty `Content-Type` header.

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Lifecycle operation requested by CloudFormation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        };
        f.write_str(name)
    }
}

/// Event delivered to a custom resource handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceEvent<P> {
    pub request_type: RequestType,
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    pub stack_id: String,
    pub request_id: String,
    #[serde(default)]
    pub resource_type: String,
    pub logical_resource_id: String,
    /// Absent on Create.
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    pub resource_properties: P,
    /// Present on Update.
    #[serde(default)]
    pub old_resource_properties: Option<P>,
}

impl<P> CustomResourceEvent<P> {
    /// The incoming physical id, or `{prefix}-{logical id}` when there is none.
    pub fn physical_resource_id_or(&self, prefix: &str) -> String {
        self.physical_resource_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("{}-{}", prefix, self.logical_resource_id))
    }
}

/// Addressing fields of an event that did not parse as a
/// [`CustomResourceEvent`].
///
/// Every field is read on its own so a `FAILED` response can still reach
/// CloudFormation when the rest of the payload is malformed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventEnvelope {
    pub response_url: Option<String>,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    pub physical_resource_id: Option<String>,
}

impl EventEnvelope {
    pub fn from_payload(payload: &Value) -> Self {
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|value| !value.is_empty())
        };
        Self {
            response_url: field("ResponseURL"),
            stack_id: field("StackId").unwrap_or_default(),
            request_id: field("RequestId").unwrap_or_default(),
            logical_resource_id: field("LogicalResourceId").unwrap_or_default(),
            physical_resource_id: field("PhysicalResourceId"),
        }
    }

    /// The incoming physical id, `{prefix}-{logical id}`, or `prefix` alone.
    pub fn physical_resource_id_or(&self, prefix: &str) -> String {
        match (&self.physical_resource_id, self.logical_resource_id.as_str()) {
            (Some(id), _) => id.clone(),
            (None, "") => prefix.to_string(),
            (None, logical) => format!("{}-{}", prefix, logical),
        }
    }

    /// A `FAILED` response addressed from the envelope.
    pub fn failed(&self, prefix: &str, reason: impl Into<String>) -> CustomResourceResponse {
        CustomResourceResponse {
            status: ResponseStatus::Failed,
            reason: Some(reason.into()),
            physical_resource_id: self.physical_resource_id_or(prefix),
            stack_id: self.stack_id.clone(),
            request_id: self.request_id.clone(),
            logical_resource_id: self.logical_resource_id.clone(),
            no_echo: false,
            data: None,
        }
    }
}

/// Outcome reported back to CloudFormation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

/// Body of the response `PUT` to the presigned URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceResponse {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default)]
    pub no_echo: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl CustomResourceResponse {
    pub fn success<P>(event: &CustomResourceEvent<P>, physical_resource_id: String) -> Self {
        Self {
            status: ResponseStatus::Success,
            reason: None,
            physical_resource_id,
            stack_id: event.stack_id.clone(),
            request_id: event.request_id.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            no_echo: false,
            data: None,
        }
    }

    pub fn failed<P>(
        event: &CustomResourceEvent<P>,
        physical_resource_id: String,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            status: ResponseStatus::Failed,
            reason: Some(reason.into()),
            ..Self::success(event, physical_resource_id)
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }
}

/// Failure to deliver a response.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to serialize custom resource response: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to send custom resource response: {0}")]
    Http(#[from] reqwest::Error),

    #[error("custom resource response rejected with status {status}")]
    Rejected { status: u16 },

    #[error("event carries no ResponseURL; no response can be sent")]
    MissingResponseUrl,
}

/// Delivers custom resource responses.
#[async_trait]
pub trait ResponseSender: Send + Sync {
    async fn send(&self, url: &str, response: &CustomResourceResponse) -> Result<(), SendError>;
}

/// [`ResponseSender`] that `PUT`s to the presigned URL.
#[derive(Debug, Clone)]
pub struct HttpResponseSender {
    client: reqwest::Client,
}

impl HttpResponseSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn build() -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(format!(
                "veda-features-lambda-shared/{}",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ResponseSender for HttpResponseSender {
    async fn send(&self, url: &str, response: &CustomResourceResponse) -> Result<(), SendError> {
        let body = serde_json::to_vec(response)?;
        let result = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "")
            .header(CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await?;

        let status = result.status();
        if !status.is_success() {
            return Err(SendError::Rejected {
                status: status.as_u16(),
            });
        }
        tracing::info!(
            status = ?response.status,
            physical_resource_id = %response.physical_resource_id,
            "custom resource response delivered"
        );
        Ok(())
    }
}
