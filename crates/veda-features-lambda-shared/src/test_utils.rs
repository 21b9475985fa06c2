//! Test utilities for Lambda handler testing.
//!
//! Fakes for the two external seams of a custom resource handler (secrets
//! and the response URL) plus event fixtures.
//!
//! # Usage
//!
//! ```ignore
//! use veda_features_lambda_shared::test_utils::{custom_resource_event, RecordingSender};
//!
//! let event = custom_resource_event("Create", None, props);
//! let sender = RecordingSender::default();
//! // ... run the handler, then inspect sender.responses()
//! ```

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use veda_features_lib::{Error as LibError, Result as LibResult, SecretSource};

use crate::custom_resource::{CustomResourceResponse, ResponseSender, SendError};

/// Presigned URL used by fixture events.
pub const RESPONSE_URL: &str =
    "https://cloudformation-custom-resource-response-uswest2.s3.amazonaws.com/test";

/// Create a mock request ID for testing.
pub fn mock_request_id(suffix: &str) -> String {
    format!("test-request-{}", suffix)
}

/// A custom resource event as CloudFormation sends it.
pub fn custom_resource_event(
    request_type: &str,
    physical_resource_id: Option<&str>,
    properties: Value,
) -> Value {
    let mut event = json!({
        "RequestType": request_type,
        "ResponseURL": RESPONSE_URL,
        "StackId": "arn:aws:cloudformation:us-west-2:123456789012:stack/veda-features-api-dev/guid",
        "RequestId": mock_request_id(request_type),
        "ResourceType": "Custom::Bootstrapper",
        "LogicalResourceId": "Bootstrapper",
        "ResourceProperties": properties
    });
    if let Some(id) = physical_resource_id {
        event["PhysicalResourceId"] = json!(id);
    }
    event
}

/// [`ResponseSender`] that records responses instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingSender {
    responses: Mutex<Vec<(String, CustomResourceResponse)>>,
    fail_with_status: Option<u16>,
}

impl RecordingSender {
    /// A sender whose deliveries are rejected with `status`.
    pub fn rejecting(status: u16) -> Self {
        Self {
            responses: Mutex::default(),
            fail_with_status: Some(status),
        }
    }

    /// Every `(url, response)` delivered so far.
    pub fn responses(&self) -> Vec<(String, CustomResourceResponse)> {
        self.responses
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResponseSender for RecordingSender {
    async fn send(&self, url: &str, response: &CustomResourceResponse) -> Result<(), SendError> {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push((url.to_string(), response.clone()));
        }
        match self.fail_with_status {
            Some(status) => Err(SendError::Rejected { status }),
            None => Ok(()),
        }
    }
}

/// [`SecretSource`] serving fixed secret strings.
#[derive(Debug, Default, Clone)]
pub struct StaticSecrets {
    secrets: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn with(mut self, secret_id: &str, value: Value) -> Self {
        self.secrets.insert(secret_id.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl SecretSource for StaticSecrets {
    async fn secret_string(&self, secret_id: &str) -> LibResult<String> {
        self.secrets
            .get(secret_id)
            .cloned()
            .ok_or_else(|| LibError::SecretsManager {
                secret_id: secret_id.to_string(),
                message: "ResourceNotFoundException: secret not found".to_string(),
            })
    }
}
