//! Typed settings loaded from prefixed environment variables.
//!
//! Every settings group reads the variables that start with its prefix,
//! strips the prefix, lowercases the remainder and deserializes the result
//! through [`figment`]. Variables that do not map to a field are ignored.
//! Values are handed to figment as raw strings and converted with
//! `extract_lossy`, so `"true"` becomes a bool and `"8192"` a number only
//! where the field asks for one (version strings such as `"15.10"` are kept
//! verbatim).
//!
//! Validation runs immediately after extraction; a malformed value is a
//! hard error at process start.

use std::collections::BTreeMap;

use figment::{providers::Serialized, Figment};
use serde::de::DeserializeOwned;

use crate::error::Result;

pub mod api;
pub mod app;
pub mod database;
pub mod domain;
pub mod lambda;

pub use api::{ApiSettings, PostgresSettings};
pub use app::{is_valid_subnet_id, AppSettings, DeployEnv};
pub use database::DatabaseSettings;
pub use domain::{DomainSettings, HostedZone};
pub use lambda::LambdaSettings;

/// Load a `.env` file from the working directory if one exists.
///
/// Values already present in the process environment win.
pub fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "loaded .env file");
    }
}

/// Build a figment holding every variable that starts with `prefix`.
///
/// Keys are stripped of the prefix and lowercased.
pub fn prefixed_env(prefix: &str) -> Figment {
    let vars: BTreeMap<String, String> = std::env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(prefix)
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest.to_lowercase(), value))
        })
        .collect();

    Figment::from(Serialized::defaults(vars))
}

/// Extract a settings group from the variables under `prefix`.
pub(crate) fn extract<T: DeserializeOwned>(prefix: &str) -> Result<T> {
    Ok(prefixed_env(prefix).extract_lossy()?)
}

/// All settings needed to synthesize the deployment template.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StackSettings {
    pub app: AppSettings,
    pub database: DatabaseSettings,
    pub domain: DomainSettings,
    pub lambda: LambdaSettings,
}

impl StackSettings {
    /// Load and validate every deployment settings group.
    pub fn from_env() -> Result<Self> {
        load_dotenv();
        Ok(Self {
            app: AppSettings::from_env()?,
            database: DatabaseSettings::from_env()?,
            domain: DomainSettings::from_env()?,
            lambda: LambdaSettings::from_env()?,
        })
    }
}

/// Serde helpers shared by the settings groups.
pub(crate) mod de {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<String>),
        One(String),
    }

    /// Accept either a sequence or a comma separated string (optionally
    /// wrapped in brackets, with optional quotes around items).
    pub fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let items = match OneOrMany::deserialize(deserializer)? {
            OneOrMany::Many(items) => items,
            OneOrMany::One(raw) => raw
                .trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .split(',')
                .map(|item| item.trim().trim_matches('"').trim_matches('\'').to_string())
                .collect(),
        };
        Ok(items.into_iter().filter(|item| !item.is_empty()).collect())
    }

    /// Uppercase a string value.
    pub fn uppercase<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(String::deserialize(deserializer)?.trim().to_uppercase())
    }

    /// Treat empty strings as absent.
    pub fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<String>::deserialize(deserializer)?
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()))
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(u64),
        Text(String),
    }

    /// A positive `u32` written without sign or leading zeros.
    ///
    /// Strings are checked before parsing, so `"064"` and `"+1"` are
    /// rejected instead of being read as numbers.
    pub fn positive_integer<'de, D>(deserializer: D) -> Result<u32, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let value = match NumberOrText::deserialize(deserializer)? {
            NumberOrText::Number(n) => n,
            NumberOrText::Text(raw) => {
                let raw = raw.trim();
                let mut bytes = raw.bytes();
                let well_formed = matches!(bytes.next(), Some(b'1'..=b'9'))
                    && bytes.all(|b| b.is_ascii_digit());
                if !well_formed {
                    return Err(D::Error::custom(format!(
                        "'{}' is not a positive integer without leading zeros",
                        raw
                    )));
                }
                raw.parse().map_err(D::Error::custom)?
            }
        };
        match u32::try_from(value) {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(D::Error::custom(format!(
                "{} is not a positive 32-bit integer",
                value
            ))),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MapOrJson {
        Map(BTreeMap<String, String>),
        Json(String),
    }

    /// Accept a map or a JSON object encoded as a string.
    pub fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match MapOrJson::deserialize(deserializer)? {
            MapOrJson::Map(map) => Ok(map),
            MapOrJson::Json(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            MapOrJson::Json(raw) => serde_json::from_str(&raw).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[derive(Debug, serde::Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "de::string_list")]
        items: Vec<String>,
        #[serde(default)]
        flag: bool,
        #[serde(default)]
        version: Option<String>,
    }

    #[test]
    fn prefixed_env_strips_prefix_and_ignores_others() {
        Jail::expect_with(|jail| {
            jail.set_env("PROBE_ITEMS", "a, b,c");
            jail.set_env("PROBE_FLAG", "true");
            jail.set_env("OTHER_FLAG", "false");
            let probe: Probe = extract("PROBE_").map_err(|e| e.to_string())?;
            assert_eq!(probe.items, vec!["a", "b", "c"]);
            assert!(probe.flag);
            Ok(())
        });
    }

    #[test]
    fn version_strings_are_kept_verbatim() {
        Jail::expect_with(|jail| {
            jail.set_env("PROBE_VERSION", "15.10");
            let probe: Probe = extract("PROBE_").map_err(|e| e.to_string())?;
            assert_eq!(probe.version.as_deref(), Some("15.10"));
            Ok(())
        });
    }

    #[test]
    fn bracketed_lists_are_accepted() {
        Jail::expect_with(|jail| {
            jail.set_env("PROBE_ITEMS", "[\"subnet-1\", \"subnet-2\"]");
            let probe: Probe = extract("PROBE_").map_err(|e| e.to_string())?;
            assert_eq!(probe.items, vec!["subnet-1", "subnet-2"]);
            Ok(())
        });
    }
}
