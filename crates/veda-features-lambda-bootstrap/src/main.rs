//! Bootstrap custom resource handler.

use lambda_runtime::Error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    veda_features_lambda_bootstrap::run().await
}
