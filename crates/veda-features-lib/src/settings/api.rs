//! API runtime settings (`VEDA_FEATURES_*`) and the PostgreSQL fallback
//! connection settings (`POSTGRES_*`, `DATABASE_URL`).

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;

use super::de;
use crate::error::{Error, Result};

fn default_name() -> String {
    "veda-features-api".to_string()
}

fn default_cors_origins() -> String {
    "*".to_string()
}

fn default_cachecontrol() -> String {
    "public, max-age=3600".to_string()
}

fn default_true() -> bool {
    true
}

fn default_catalog_ttl() -> u64 {
    300
}

fn default_schemas() -> Vec<String> {
    vec!["public".to_string()]
}

fn default_limit() -> u32 {
    10
}

fn default_max_limit() -> u32 {
    10000
}

fn default_port() -> u16 {
    8000
}

fn default_max_pool_connections() -> u32 {
    10
}

/// Settings of the running API process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Title of the API, shown on the landing page.
    #[serde(default = "default_name")]
    pub name: String,

    /// Allowed CORS origins: `*` or a comma separated list.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,

    /// Value of the `Cache-Control` header on successful GET responses.
    #[serde(default = "default_cachecontrol")]
    pub cachecontrol: String,

    #[serde(default)]
    pub debug: bool,

    /// Prefix under which every route is served.
    #[serde(default)]
    pub root_path: String,

    /// Serve an HTML map viewer per collection.
    #[serde(default = "default_true")]
    pub add_tiles_viewer: bool,

    #[serde(default)]
    pub stage: String,

    /// Catalog time-to-live in seconds. `0` disables TTL refreshes.
    #[serde(default = "default_catalog_ttl")]
    pub catalog_ttl: u64,

    /// Secret holding the application database credentials.
    #[serde(default, deserialize_with = "de::non_empty")]
    pub postgis_secret_arn: Option<String>,

    /// Database schemas searched for collections.
    #[serde(default = "default_schemas", deserialize_with = "de::string_list")]
    pub schemas: Vec<String>,

    #[serde(default = "default_limit")]
    pub default_limit: u32,

    #[serde(default = "default_max_limit")]
    pub max_limit: u32,

    /// Host used to build absolute links instead of the request host.
    #[serde(default, deserialize_with = "de::non_empty")]
    pub custom_host: Option<String>,

    /// Listen port when running outside Lambda.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_pool_connections")]
    pub max_pool_connections: u32,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            cors_origins: default_cors_origins(),
            cachecontrol: default_cachecontrol(),
            debug: false,
            root_path: String::new(),
            add_tiles_viewer: true,
            stage: String::new(),
            catalog_ttl: default_catalog_ttl(),
            postgis_secret_arn: None,
            schemas: default_schemas(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            custom_host: None,
            port: default_port(),
            max_pool_connections: default_max_pool_connections(),
        }
    }
}

impl ApiSettings {
    /// Environment variable prefix for this group.
    pub const ENV_PREFIX: &'static str = "VEDA_FEATURES_";

    /// Load and validate from `VEDA_FEATURES_*` variables.
    pub fn from_env() -> Result<Self> {
        let settings: Self = super::extract(Self::ENV_PREFIX)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate loaded values.
    pub fn validate(&self) -> Result<()> {
        if self.schemas.is_empty() {
            return Err(Error::invalid_setting("schemas", "at least one schema is required"));
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(Error::invalid_setting(
                "default_limit",
                "must be positive and not exceed max_limit",
            ));
        }
        if !self.root_path.is_empty() && !self.root_path.starts_with('/') {
            return Err(Error::invalid_setting("root_path", "must start with '/'"));
        }
        if self.max_pool_connections == 0 {
            return Err(Error::invalid_setting(
                "max_pool_connections",
                "must be a positive integer",
            ));
        }
        Ok(())
    }

    /// Root path without a trailing slash; empty when serving at `/`.
    pub fn normalized_root_path(&self) -> String {
        self.root_path.trim_end_matches('/').to_string()
    }

    /// Explicit CORS origins, or `None` for any origin.
    pub fn cors_origin_list(&self) -> Option<Vec<String>> {
        let origins: Vec<String> = self
            .cors_origins
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();
        if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
            None
        } else {
            Some(origins)
        }
    }
}

fn default_postgres_port() -> u16 {
    5432
}

/// Direct connection settings used when no secret ARN is configured.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresSettings {
    #[serde(default, deserialize_with = "de::non_empty")]
    pub user: Option<String>,
    #[serde(default, deserialize_with = "de::non_empty", skip_serializing)]
    pub pass: Option<String>,
    #[serde(default, deserialize_with = "de::non_empty")]
    pub host: Option<String>,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    #[serde(default, deserialize_with = "de::non_empty")]
    pub dbname: Option<String>,
    /// Full connection URL, read from `DATABASE_URL`. Wins over the other fields.
    #[serde(skip)]
    pub database_url: Option<String>,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            user: None,
            pass: None,
            host: None,
            port: default_postgres_port(),
            dbname: None,
            database_url: None,
        }
    }
}

impl std::fmt::Debug for PostgresSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSettings")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl PostgresSettings {
    /// Environment variable prefix for this group.
    pub const ENV_PREFIX: &'static str = "POSTGRES_";

    /// Load from `POSTGRES_*` and `DATABASE_URL`.
    pub fn from_env() -> Result<Self> {
        let mut settings: Self = super::extract(Self::ENV_PREFIX)?;
        settings.database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        Ok(settings)
    }

    /// Connection options for sqlx. Unset fields fall back to libpq defaults.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if let Some(url) = &self.database_url {
            return url.parse::<PgConnectOptions>().map_err(|e| {
                Error::invalid_setting("DATABASE_URL", format!("invalid connection url: {}", e))
            });
        }
        let mut options = PgConnectOptions::new().port(self.port);
        if let Some(host) = &self.host {
            options = options.host(host);
        }
        if let Some(user) = &self.user {
            options = options.username(user);
        }
        if let Some(pass) = &self.pass {
            options = options.password(pass);
        }
        if let Some(dbname) = &self.dbname {
            options = options.database(dbname);
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_runtime_expectations() {
        let s = ApiSettings::default();
        assert_eq!(s.cachecontrol, "public, max-age=3600");
        assert_eq!(s.catalog_ttl, 300);
        assert_eq!(s.schemas, vec!["public"]);
        assert!(s.cors_origin_list().is_none());
        s.validate().unwrap();
    }

    #[test]
    fn explicit_cors_origins_are_split() {
        let s = ApiSettings {
            cors_origins: "https://a.example.com, https://b.example.com".to_string(),
            ..Default::default()
        };
        assert_eq!(
            s.cors_origin_list().unwrap(),
            vec!["https://a.example.com", "https://b.example.com"]
        );
    }

    #[test]
    fn root_path_is_normalized() {
        let s = ApiSettings {
            root_path: "/api/features/".to_string(),
            ..Default::default()
        };
        assert_eq!(s.normalized_root_path(), "/api/features");
    }

    #[test]
    fn from_env_reads_prefixed_values() {
        Jail::expect_with(|jail| {
            jail.set_env("VEDA_FEATURES_CATALOG_TTL", "60");
            jail.set_env("VEDA_FEATURES_POSTGIS_SECRET_ARN", "arn:aws:secretsmanager:x");
            jail.set_env("VEDA_FEATURES_SCHEMAS", "public,features");
            jail.set_env("VEDA_FEATURES_ADD_TILES_VIEWER", "false");
            let s = ApiSettings::from_env().map_err(|e| e.to_string())?;
            assert_eq!(s.catalog_ttl, 60);
            assert_eq!(s.schemas, vec!["public", "features"]);
            assert!(!s.add_tiles_viewer);
            assert!(s.postgis_secret_arn.is_some());
            Ok(())
        });
    }

    #[test]
    fn postgres_debug_redacts_password() {
        let s = PostgresSettings {
            user: Some("veda".to_string()),
            pass: Some("hunter2".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", s).contains("hunter2"));
    }
}
