//! Database credential secrets.
//!
//! Both the bootstrap function and the API runtime read connection details
//! from Secrets Manager. The secret value is a JSON object with `dbname`,
//! `engine`, `port`, `host`, `username` and `password`; `port` may be stored
//! as a number or as a string (the proxy secret stores it as a string).

use async_trait::async_trait;
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::postgres::PgConnectOptions;

use crate::error::{Error, Result};

/// Connection details stored in a database secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbCredentials {
    #[serde(default)]
    pub dbname: Option<String>,
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default = "default_port", deserialize_with = "port_from_any")]
    pub port: u16,
    #[serde(default)]
    pub host: Option<String>,
    pub username: String,
    pub password: String,
}

fn default_engine() -> String {
    "postgres".to_string()
}

fn default_port() -> u16 {
    5432
}

fn port_from_any<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl std::fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbCredentials")
            .field("dbname", &self.dbname)
            .field("engine", &self.engine)
            .field("port", &self.port)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl DbCredentials {
    /// Parse a secret string.
    pub fn from_secret_string(secret_id: &str, raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::SecretFormat {
            secret_id: secret_id.to_string(),
            message: e.to_string(),
        })
    }

    /// Host, or an error naming the secret when it has none.
    pub fn require_host(&self, secret_id: &str) -> Result<&str> {
        self.host.as_deref().ok_or_else(|| Error::SecretFormat {
            secret_id: secret_id.to_string(),
            message: "missing host".to_string(),
        })
    }

    /// Connection options targeting the secret's own database.
    pub fn connect_options(&self, secret_id: &str) -> Result<PgConnectOptions> {
        let mut options = PgConnectOptions::new()
            .host(self.require_host(secret_id)?)
            .port(self.port)
            .username(&self.username)
            .password(&self.password);
        if let Some(dbname) = &self.dbname {
            options = options.database(dbname);
        }
        Ok(options)
    }

    /// Connection options targeting another database on the same server.
    pub fn connect_options_for(&self, secret_id: &str, dbname: &str) -> Result<PgConnectOptions> {
        Ok(self.connect_options(secret_id)?.database(dbname))
    }
}

/// Source of secret strings.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Fetch the current string value of a secret.
    async fn secret_string(&self, secret_id: &str) -> Result<String>;
}

/// [`SecretSource`] backed by AWS Secrets Manager.
#[derive(Debug, Clone)]
pub struct SecretsManagerSource {
    client: SecretsManagerClient,
}

impl SecretsManagerSource {
    pub fn new(client: SecretsManagerClient) -> Self {
        Self { client }
    }

    /// Build a client from the default AWS configuration chain.
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(SecretsManagerClient::new(&config))
    }
}

#[async_trait]
impl SecretSource for SecretsManagerSource {
    async fn secret_string(&self, secret_id: &str) -> Result<String> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| Error::SecretsManager {
                secret_id: secret_id.to_string(),
                message: aws_sdk_secretsmanager::error::DisplayErrorContext(&e).to_string(),
            })?;

        if let Some(value) = output.secret_string() {
            return Ok(value.to_string());
        }
        if let Some(blob) = output.secret_binary() {
            return String::from_utf8(blob.as_ref().to_vec()).map_err(|e| Error::SecretFormat {
                secret_id: secret_id.to_string(),
                message: format!("binary secret is not UTF-8: {}", e),
            });
        }
        Err(Error::SecretFormat {
            secret_id: secret_id.to_string(),
            message: "secret has no value".to_string(),
        })
    }
}

/// Fetch and parse database credentials from a secret.
pub async fn fetch_credentials(source: &dyn SecretSource, secret_id: &str) -> Result<DbCredentials> {
    let raw = source.secret_string(secret_id).await?;
    let credentials = DbCredentials::from_secret_string(secret_id, &raw)?;
    tracing::debug!(
        secret_id = %secret_id,
        username = %credentials.username,
        host = credentials.host.as_deref().unwrap_or("-"),
        "database credentials loaded"
    );
    Ok(credentials)
}
