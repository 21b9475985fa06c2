//! Lazily initialized per-environment state.
//!
//! The AWS configuration and the HTTP client are built on the first
//! invocation and reused by every warm invocation of the same environment.

use std::time::Instant;

use tokio::sync::OnceCell;
use tracing::info;

use veda_features_lib::SecretsManagerSource;

use crate::custom_resource::{HttpResponseSender, SendError};

static RUNTIME: OnceCell<LambdaRuntime> = OnceCell::const_new();

/// Error during runtime initialization.
#[derive(Debug, thiserror::Error)]
#[error("Lambda initialization failed: {message}")]
pub struct InitError {
    pub message: String,
}

impl From<SendError> for InitError {
    fn from(err: SendError) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

/// Clients shared by all invocations.
#[derive(Debug)]
pub struct LambdaRuntime {
    secrets: SecretsManagerSource,
    responder: HttpResponseSender,
}

impl LambdaRuntime {
    pub fn secrets(&self) -> &SecretsManagerSource {
        &self.secrets
    }

    pub fn responder(&self) -> &HttpResponseSender {
        &self.responder
    }
}

/// Initialize the runtime on first use and return it.
pub async fn init_runtime() -> Result<&'static LambdaRuntime, InitError> {
    RUNTIME
        .get_or_try_init(|| async {
            let start = Instant::now();
            let secrets = SecretsManagerSource::from_env().await;
            let responder = HttpResponseSender::build()?;
            info!(
                init_ms = start.elapsed().as_millis(),
                "Lambda runtime initialization complete"
            );
            Ok(LambdaRuntime { secrets, responder })
        })
        .await
}
