//! Database deployment settings (`VEDA_FEATURES_DB_*`).

use serde::{Deserialize, Serialize};

use super::de;
use crate::error::{Error, Result};

fn default_dbname() -> String {
    "postgis-features".to_string()
}

fn default_admin_user() -> String {
    "postgres".to_string()
}

fn default_user() -> String {
    "veda".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_locks_per_transaction() -> u32 {
    64
}

fn default_work_mem() -> u32 {
    8192
}

fn default_max_connections() -> u32 {
    475
}

fn default_temp_buffers() -> u32 {
    32000
}

fn default_random_page_cost() -> f64 {
    1.1
}

fn default_instance_class() -> String {
    "BURSTABLE3".to_string()
}

fn default_instance_size() -> String {
    "LARGE".to_string()
}

fn default_engine_full_version() -> String {
    "14.7".to_string()
}

fn default_engine_major_version() -> String {
    "14".to_string()
}

fn default_max_allocated_storage() -> u32 {
    500
}

/// Instance class names accepted in `rds_instance_class`, mapped to their
/// instance type family.
const INSTANCE_CLASSES: &[(&str, &str)] = &[
    ("BURSTABLE2", "t2"),
    ("T2", "t2"),
    ("BURSTABLE3", "t3"),
    ("T3", "t3"),
    ("BURSTABLE4_GRAVITON", "t4g"),
    ("T4G", "t4g"),
    ("STANDARD5", "m5"),
    ("M5", "m5"),
    ("STANDARD6_GRAVITON", "m6g"),
    ("M6G", "m6g"),
    ("STANDARD6_INTEL", "m6i"),
    ("M6I", "m6i"),
    ("STANDARD7_GRAVITON", "m7g"),
    ("M7G", "m7g"),
    ("MEMORY5", "r5"),
    ("R5", "r5"),
    ("MEMORY6_GRAVITON", "r6g"),
    ("R6G", "r6g"),
    ("MEMORY6_INTEL", "r6i"),
    ("R6I", "r6i"),
    ("MEMORY7_GRAVITON", "r7g"),
    ("R7G", "r7g"),
];

/// Instance size names accepted in `rds_instance_size`.
const INSTANCE_SIZES: &[(&str, &str)] = &[
    ("MICRO", "micro"),
    ("SMALL", "small"),
    ("MEDIUM", "medium"),
    ("LARGE", "large"),
    ("XLARGE", "xlarge"),
    ("XLARGE2", "2xlarge"),
    ("XLARGE4", "4xlarge"),
    ("XLARGE8", "8xlarge"),
    ("XLARGE12", "12xlarge"),
    ("XLARGE16", "16xlarge"),
    ("XLARGE24", "24xlarge"),
];

/// Settings for the features database and its bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Name of the application database created by the bootstrap.
    #[serde(default = "default_dbname")]
    pub dbname: String,

    /// Name of the admin role of the instance.
    #[serde(default = "default_admin_user")]
    pub admin_user: String,

    /// Name of the application role created by the bootstrap.
    #[serde(default = "default_user")]
    pub user: String,

    /// Version tag of the application schema. Changing it re-runs the bootstrap.
    pub schema_version: String,

    /// Snapshot to restore from. Once used it must stay set.
    #[serde(default, deserialize_with = "de::non_empty")]
    pub snapshot_id: Option<String>,

    #[serde(default = "default_true")]
    pub publicly_accessible: bool,

    #[serde(default = "default_max_locks_per_transaction", deserialize_with = "de::positive_integer")]
    pub max_locks_per_transaction: u32,

    /// Memory per query operation before spilling to disk, in kB.
    #[serde(default = "default_work_mem", deserialize_with = "de::positive_integer")]
    pub work_mem: u32,

    #[serde(default = "default_max_connections", deserialize_with = "de::positive_integer")]
    pub max_connections: u32,

    #[serde(default = "default_temp_buffers", deserialize_with = "de::positive_integer")]
    pub temp_buffers: u32,

    #[serde(default = "default_random_page_cost")]
    pub random_page_cost: f64,

    /// Put an RDS proxy in front of the instance.
    #[serde(default)]
    pub use_rds_proxy: bool,

    #[serde(default = "default_instance_class", deserialize_with = "de::uppercase")]
    pub rds_instance_class: String,

    #[serde(default = "default_instance_size", deserialize_with = "de::uppercase")]
    pub rds_instance_size: String,

    #[serde(default = "default_engine_full_version")]
    pub rds_engine_full_version: String,

    #[serde(default = "default_engine_major_version")]
    pub rds_engine_major_version: String,

    #[serde(default)]
    pub rds_encryption: bool,

    /// Storage autoscaling ceiling in GiB. `0` disables autoscaling.
    #[serde(default = "default_max_allocated_storage")]
    pub max_allocated_storage: u32,
}

impl DatabaseSettings {
    /// Environment variable prefix for this group.
    pub const ENV_PREFIX: &'static str = "VEDA_FEATURES_DB_";

    /// Load and validate from `VEDA_FEATURES_DB_*` variables.
    pub fn from_env() -> Result<Self> {
        let settings: Self = super::extract(Self::ENV_PREFIX)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings with every default and the given schema version.
    pub fn with_schema_version(schema_version: impl Into<String>) -> Self {
        Self {
            dbname: default_dbname(),
            admin_user: default_admin_user(),
            user: default_user(),
            schema_version: schema_version.into(),
            snapshot_id: None,
            publicly_accessible: true,
            max_locks_per_transaction: default_max_locks_per_transaction(),
            work_mem: default_work_mem(),
            max_connections: default_max_connections(),
            temp_buffers: default_temp_buffers(),
            random_page_cost: default_random_page_cost(),
            use_rds_proxy: false,
            rds_instance_class: default_instance_class(),
            rds_instance_size: default_instance_size(),
            rds_engine_full_version: default_engine_full_version(),
            rds_engine_major_version: default_engine_major_version(),
            rds_encryption: false,
            max_allocated_storage: default_max_allocated_storage(),
        }
    }

    /// Validate loaded values.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version.trim().is_empty() {
            return Err(Error::invalid_setting("schema_version", "must not be empty"));
        }
        for (field, value) in [
            ("max_locks_per_transaction", self.max_locks_per_transaction),
            ("work_mem", self.work_mem),
            ("max_connections", self.max_connections),
            ("temp_buffers", self.temp_buffers),
        ] {
            if value == 0 {
                return Err(Error::invalid_setting(field, "must be a positive integer"));
            }
        }
        if !(self.random_page_cost.is_finite() && self.random_page_cost > 0.0) {
            return Err(Error::invalid_setting(
                "random_page_cost",
                "must be a positive number",
            ));
        }
        for (field, value) in [
            ("dbname", &self.dbname),
            ("user", &self.user),
            ("admin_user", &self.admin_user),
        ] {
            if value.trim().is_empty() {
                return Err(Error::invalid_setting(field, "must not be empty"));
            }
        }
        if !self
            .rds_engine_full_version
            .starts_with(self.rds_engine_major_version.as_str())
        {
            return Err(Error::invalid_setting(
                "rds_engine_full_version",
                format!(
                    "'{}' does not belong to major version '{}'",
                    self.rds_engine_full_version, self.rds_engine_major_version
                ),
            ));
        }
        self.instance_type()?;
        Ok(())
    }

    /// RDS instance type, e.g. `db.t3.large`.
    pub fn instance_type(&self) -> Result<String> {
        let class = lookup(INSTANCE_CLASSES, &self.rds_instance_class).ok_or_else(|| {
            Error::invalid_setting(
                "rds_instance_class",
                format!("unknown instance class '{}'", self.rds_instance_class),
            )
        })?;
        let size = lookup(INSTANCE_SIZES, &self.rds_instance_size).ok_or_else(|| {
            Error::invalid_setting(
                "rds_instance_size",
                format!("unknown instance size '{}'", self.rds_instance_size),
            )
        })?;
        Ok(format!("db.{}.{}", class, size))
    }

    /// Parameter group family, e.g. `postgres14`.
    pub fn parameter_group_family(&self) -> String {
        format!("postgres{}", self.rds_engine_major_version)
    }

    /// Storage autoscaling ceiling, if enabled.
    pub fn max_allocated_storage(&self) -> Option<u32> {
        Some(self.max_allocated_storage).filter(|gib| *gib > 0)
    }
}

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, value)| *value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_produce_t3_large() {
        let s = DatabaseSettings::with_schema_version("0.1.1");
        assert_eq!(s.instance_type().unwrap(), "db.t3.large");
        assert_eq!(s.parameter_group_family(), "postgres14");
        assert_eq!(s.max_allocated_storage(), Some(500));
        s.validate().unwrap();
    }

    #[test]
    fn instance_class_and_size_are_uppercased() {
        Jail::expect_with(|jail| {
            jail.set_env("VEDA_FEATURES_DB_SCHEMA_VERSION", "0.1.1");
            jail.set_env("VEDA_FEATURES_DB_RDS_INSTANCE_CLASS", "burstable4_graviton");
            jail.set_env("VEDA_FEATURES_DB_RDS_INSTANCE_SIZE", "xlarge2");
            let s = DatabaseSettings::from_env().map_err(|e| e.to_string())?;
            assert_eq!(s.rds_instance_class, "BURSTABLE4_GRAVITON");
            assert_eq!(s.rds_instance_size, "XLARGE2");
            assert_eq!(s.instance_type().map_err(|e| e.to_string())?, "db.t4g.2xlarge");
            Ok(())
        });
    }

    #[test]
    fn unknown_instance_class_is_rejected() {
        let mut s = DatabaseSettings::with_schema_version("0.1.1");
        s.rds_instance_class = "QUANTUM9".to_string();
        assert!(matches!(
            s.validate(),
            Err(Error::InvalidSetting { ref field, .. }) if field == "rds_instance_class"
        ));
    }

    #[test]
    fn zero_tuning_parameter_is_rejected() {
        let mut s = DatabaseSettings::with_schema_version("0.1.1");
        s.work_mem = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn malformed_tuning_integers_are_rejected() {
        for bad in ["064", "+1", "0", "-5", "1e3"] {
            Jail::expect_with(|jail| {
                jail.set_env("VEDA_FEATURES_DB_SCHEMA_VERSION", "0.1.1");
                jail.set_env("VEDA_FEATURES_DB_WORK_MEM", bad);
                assert!(DatabaseSettings::from_env().is_err(), "accepted {:?}", bad);
                Ok(())
            });
        }
        Jail::expect_with(|jail| {
            jail.set_env("VEDA_FEATURES_DB_SCHEMA_VERSION", "0.1.1");
            jail.set_env("VEDA_FEATURES_DB_MAX_CONNECTIONS", "+475");
            assert!(DatabaseSettings::from_env().is_err());
            jail.set_env("VEDA_FEATURES_DB_MAX_CONNECTIONS", "475");
            let s = DatabaseSettings::from_env().map_err(|e| e.to_string())?;
            assert_eq!(s.max_connections, 475);
            Ok(())
        });
    }

    #[test]
    fn zero_max_storage_disables_autoscaling() {
        let mut s = DatabaseSettings::with_schema_version("0.1.1");
        s.max_allocated_storage = 0;
        assert_eq!(s.max_allocated_storage(), None);
    }

    #[test]
    fn from_env_parses_numbers_and_flags() {
        Jail::expect_with(|jail| {
            jail.set_env("VEDA_FEATURES_DB_SCHEMA_VERSION", "0.2.0");
            jail.set_env("VEDA_FEATURES_DB_WORK_MEM", "16384");
            jail.set_env("VEDA_FEATURES_DB_USE_RDS_PROXY", "true");
            jail.set_env("VEDA_FEATURES_DB_RANDOM_PAGE_COST", "1.5");
            jail.set_env("VEDA_FEATURES_DB_SNAPSHOT_ID", "");
            jail.set_env("VEDA_FEATURES_DB_UNKNOWN_EXTRA", "tolerated");
            let s = DatabaseSettings::from_env().map_err(|e| e.to_string())?;
            assert_eq!(s.work_mem, 16384);
            assert!(s.use_rds_proxy);
            assert!((s.random_page_cost - 1.5).abs() < f64::EPSILON);
            assert!(s.snapshot_id.is_none());
            Ok(())
        });
    }

    #[test]
    fn from_env_requires_schema_version() {
        Jail::expect_with(|_jail| {
            assert!(DatabaseSettings::from_env().is_err());
            Ok(())
        });
    }
}
