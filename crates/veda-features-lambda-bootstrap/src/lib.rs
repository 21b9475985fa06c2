//! Bootstrap custom resource for the features database.
//!
//! On Create and Update the function reads the admin and application
//! secrets, creates (or updates) the application role, database, PostGIS
//! extension and schema, and reports back to CloudFormation. Delete is a
//! no-op: the database and its secrets are retained.

pub mod statements;

use std::time::Duration;

use async_trait::async_trait;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::{Map, Value};
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, Executor, PgConnection};
use thiserror::Error;
use tracing::{error, info, warn};

use veda_features_lambda_shared::{
    init_runtime, init_tracing, CustomResourceEvent, CustomResourceResponse, EventEnvelope,
    HttpResponseSender, RequestType, ResponseSender, SendError,
};
use veda_features_lib::bootstrap::FUNCTION_TIMEOUT_SECS;
use veda_features_lib::{
    fetch_credentials, BootstrapProperties, DbCredentials, Error as LibError, SecretSource,
};

use statements::{
    create_database_statement, database_grant_statements, role_statements, schema_statements,
    DATABASE_EXISTS_SQL, MAINTENANCE_DATABASE,
};

/// Prefix of generated physical resource ids.
pub const PHYSICAL_ID_PREFIX: &str = "bootstrap";

/// Budget for the database work, leaving time to deliver the response
/// before the function itself times out.
pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(FUNCTION_TIMEOUT_SECS as u64 - 20);

/// Errors that turn into a `FAILED` response.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("invalid resource properties: {0}")]
    InvalidProperties(#[from] serde_json::Error),

    #[error("secret {secret_id} has no {field}")]
    MissingField { secret_id: String, field: &'static str },

    #[error("bootstrap did not finish within {secs} s")]
    TimedOut { secs: u64 },

    #[error(transparent)]
    Lib(#[from] LibError),
}

impl From<sqlx::Error> for BootstrapError {
    fn from(err: sqlx::Error) -> Self {
        Self::Lib(LibError::Database(err))
    }
}

/// Admin credentials together with the secret they came from.
#[derive(Debug, Clone)]
pub struct AdminConnection {
    pub secret_id: String,
    pub credentials: DbCredentials,
}

impl AdminConnection {
    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    pub fn options(&self, database: &str) -> Result<PgConnectOptions, LibError> {
        self.credentials.connect_options_for(&self.secret_id, database)
    }
}

/// Runs bootstrap statements as the admin user.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Whether `dbname` exists on the server.
    async fn database_exists(
        &self,
        admin: &AdminConnection,
        dbname: &str,
    ) -> Result<bool, BootstrapError>;

    /// Run `statements` in order inside `database`.
    async fn execute(
        &self,
        admin: &AdminConnection,
        database: &str,
        statements: &[String],
    ) -> Result<(), BootstrapError>;
}

/// [`SqlExecutor`] opening one short-lived connection per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgExecutor;

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn database_exists(
        &self,
        admin: &AdminConnection,
        dbname: &str,
    ) -> Result<bool, BootstrapError> {
        let mut conn = PgConnection::connect_with(&admin.options(MAINTENANCE_DATABASE)?).await?;
        let exists: bool = sqlx::query_scalar(DATABASE_EXISTS_SQL)
            .bind(dbname)
            .fetch_one(&mut conn)
            .await?;
        conn.close().await?;
        Ok(exists)
    }

    async fn execute(
        &self,
        admin: &AdminConnection,
        database: &str,
        statements: &[String],
    ) -> Result<(), BootstrapError> {
        let mut conn = PgConnection::connect_with(&admin.options(database)?).await?;
        for statement in statements {
            // simple query protocol: DDL and DO blocks take no parameters
            conn.execute(statement.as_str()).await?;
        }
        conn.close().await?;
        Ok(())
    }
}

/// What a bootstrap run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub dbname: String,
    pub username: String,
    pub database_created: bool,
}

/// Create or update the application role, database and schema.
pub async fn bootstrap_database(
    properties: &BootstrapProperties,
    secrets: &dyn SecretSource,
    executor: &dyn SqlExecutor,
) -> Result<BootstrapOutcome, BootstrapError> {
    let admin = AdminConnection {
        secret_id: properties.conn_secret_arn.clone(),
        credentials: fetch_credentials(secrets, &properties.conn_secret_arn).await?,
    };
    admin.credentials.require_host(&admin.secret_id)?;

    let app = fetch_credentials(secrets, &properties.new_user_secret_arn).await?;
    let dbname = app.dbname.clone().ok_or_else(|| BootstrapError::MissingField {
        secret_id: properties.new_user_secret_arn.clone(),
        field: "dbname",
    })?;

    info!(
        dbname = %dbname,
        username = %app.username,
        schema_version = %properties.database_schema_version,
        "bootstrapping database"
    );

    executor
        .execute(
            &admin,
            MAINTENANCE_DATABASE,
            &role_statements(&app.username, &app.password),
        )
        .await?;

    let database_created = if executor.database_exists(&admin, &dbname).await? {
        info!(dbname = %dbname, "database already exists");
        false
    } else {
        executor
            .execute(
                &admin,
                MAINTENANCE_DATABASE,
                &[create_database_statement(&dbname, admin.username())],
            )
            .await?;
        info!(dbname = %dbname, "database created");
        true
    };

    executor
        .execute(
            &admin,
            MAINTENANCE_DATABASE,
            &database_grant_statements(&dbname, &app.username),
        )
        .await?;
    executor
        .execute(&admin, &dbname, &schema_statements(&app.username))
        .await?;

    Ok(BootstrapOutcome {
        dbname,
        username: app.username,
        database_created,
    })
}

/// [`bootstrap_database`] bounded by `deadline`.
async fn bootstrap_within(
    deadline: Duration,
    properties: &BootstrapProperties,
    secrets: &dyn SecretSource,
    executor: &dyn SqlExecutor,
) -> Result<BootstrapOutcome, BootstrapError> {
    tokio::time::timeout(deadline, bootstrap_database(properties, secrets, executor))
        .await
        .unwrap_or(Err(BootstrapError::TimedOut {
            secs: deadline.as_secs(),
        }))
}

/// Handle one custom resource event and deliver exactly one response.
///
/// Bootstrap failures, including running past `deadline`, become `FAILED`
/// responses; only a failure to deliver the response is returned as an
/// error.
pub async fn handle_event(
    event: CustomResourceEvent<Value>,
    secrets: &dyn SecretSource,
    executor: &dyn SqlExecutor,
    sender: &dyn ResponseSender,
    deadline: Duration,
) -> Result<CustomResourceResponse, SendError> {
    let physical_id = event.physical_resource_id_or(PHYSICAL_ID_PREFIX);
    info!(
        request_type = %event.request_type,
        logical_resource_id = %event.logical_resource_id,
        physical_resource_id = %physical_id,
        "handling custom resource request"
    );

    let response = match event.request_type {
        RequestType::Delete => {
            info!("delete requested; database and secrets are retained");
            CustomResourceResponse::success(&event, physical_id)
        }
        RequestType::Create | RequestType::Update => {
            let result = match serde_json::from_value::<BootstrapProperties>(
                event.resource_properties.clone(),
            ) {
                Ok(properties) => {
                    bootstrap_within(deadline, &properties, secrets, executor).await
                }
                Err(e) => Err(BootstrapError::from(e)),
            };
            match result {
                Ok(outcome) => {
                    let mut data = Map::new();
                    data.insert("dbname".to_string(), Value::String(outcome.dbname));
                    data.insert("username".to_string(), Value::String(outcome.username));
                    CustomResourceResponse::success(&event, physical_id).with_data(data)
                }
                Err(e) => {
                    error!(error = %e, "bootstrap failed");
                    CustomResourceResponse::failed(&event, physical_id, e.to_string())
                }
            }
        }
    };

    if let Err(e) = sender.send(&event.response_url, &response).await {
        warn!(error = %e, "failed to deliver custom resource response");
        return Err(e);
    }
    Ok(response)
}

/// Answer `FAILED` to an event that cannot be processed.
///
/// Fails only when the payload has no `ResponseURL` or delivery fails.
pub async fn reject_payload(
    payload: &Value,
    sender: &dyn ResponseSender,
    reason: impl Into<String>,
) -> Result<CustomResourceResponse, SendError> {
    let envelope = EventEnvelope::from_payload(payload);
    let response = envelope.failed(PHYSICAL_ID_PREFIX, reason);
    let url = envelope.response_url.ok_or(SendError::MissingResponseUrl)?;
    error!(
        request_id = %response.request_id,
        reason = response.reason.as_deref().unwrap_or_default(),
        "rejecting custom resource event"
    );
    sender.send(&url, &response).await?;
    Ok(response)
}

/// Parse a raw invocation payload and handle it.
///
/// A payload that is not a well-formed custom resource event is still
/// answered with `FAILED` when it carries a `ResponseURL`.
pub async fn handle_payload(
    payload: Value,
    secrets: &dyn SecretSource,
    executor: &dyn SqlExecutor,
    sender: &dyn ResponseSender,
    deadline: Duration,
) -> Result<CustomResourceResponse, SendError> {
    match serde_json::from_value::<CustomResourceEvent<Value>>(payload.clone()) {
        Ok(event) => handle_event(event, secrets, executor, sender, deadline).await,
        Err(e) => {
            reject_payload(&payload, sender, format!("malformed custom resource event: {}", e))
                .await
        }
    }
}

/// Entry point used by the Lambda runtime.
pub async fn run() -> Result<(), Error> {
    init_tracing();
    lambda_runtime::run(service_fn(handler)).await
}

async fn handler(event: LambdaEvent<Value>) -> Result<CustomResourceResponse, Error> {
    let runtime = match init_runtime().await {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "runtime initialization failed");
            let sender = HttpResponseSender::build()?;
            return Ok(reject_payload(&event.payload, &sender, e.to_string()).await?);
        }
    };
    let response = handle_payload(
        event.payload,
        runtime.secrets(),
        &PgExecutor,
        runtime.responder(),
        BOOTSTRAP_TIMEOUT,
    )
    .await?;
    Ok(response)
}
