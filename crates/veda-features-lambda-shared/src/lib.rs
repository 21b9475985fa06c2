//! Shared infrastructure for VEDA features AWS Lambda functions.
//!
//! - [`init_tracing`]: JSON-formatted tracing for CloudWatch Logs
//! - [`init_runtime`]: lazily initialized AWS clients reused across warm invocations
//! - [`custom_resource`]: the CloudFormation custom resource event / response protocol
//!
//! # Testing Support
//!
//! The [`test_utils`] module provides fake secret sources, a recording
//! response sender and event fixtures. Enable the `test-utils` feature to
//! access it from dependent crates.

#![deny(warnings)]

pub mod custom_resource;
mod runtime;
mod tracing_init;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use custom_resource::{
    CustomResourceEvent, CustomResourceResponse, EventEnvelope, HttpResponseSender, RequestType,
    ResponseSender, ResponseStatus, SendError,
};
pub use runtime::{init_runtime, InitError, LambdaRuntime};
pub use tracing_init::init_tracing;
