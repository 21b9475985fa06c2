//! VEDA features API library entry points.
//!
//! This crate holds everything the binaries share: typed settings, the
//! CloudFormation synthesizer for the network, database, bootstrap, domain
//! and API stages, database credential secrets, and the collection catalog
//! and feature queries served by the API runtime. Higher-level consumers
//! (CLI, Lambdas, the API service) should only depend on the functions
//! exported here instead of reimplementing behavior.

#![deny(warnings)]

pub mod api;
pub mod bootstrap;
pub mod catalog;
pub mod database;
pub mod domain;
pub mod error;
pub mod features;
pub mod network;
pub mod postgis;
pub mod resources;
pub mod secrets;
pub mod settings;
pub mod sql;
pub mod stack;
pub mod template;

pub use bootstrap::BootstrapProperties;
pub use catalog::{Catalog, Collection, Column};
pub use database::DatabaseHandle;
pub use domain::{features_url_prefix, DomainBinding};
pub use error::{Error, Result};
pub use features::{BBox, Feature, FeaturePage, FeatureStore, ItemQuery};
pub use network::VpcHandle;
pub use postgis::PgFeatureStore;
pub use secrets::{fetch_credentials, DbCredentials, SecretSource, SecretsManagerSource};
pub use settings::{
    ApiSettings, AppSettings, DatabaseSettings, DomainSettings, LambdaSettings, PostgresSettings,
    StackSettings,
};
pub use stack::FeaturesStack;
pub use template::Template;
