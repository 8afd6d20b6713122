use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Deployment environment a run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "development" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" => Ok(Environment::Production),
            _ => Err(format!(
                "unknown environment '{}' (expected development, test or production)",
                s
            )),
        }
    }
}

/// Database adapter used by an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adapter {
    #[default]
    #[serde(alias = "postgresql")]
    Postgres,
}

/// Connection settings for one environment.
///
/// Resolved once per run and handed to the runtime by value.
#[derive(Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Database adapter.
    #[serde(default)]
    pub adapter: Adapter,

    /// Target database name.
    pub database: String,

    /// Database user.
    pub user: String,

    /// Database password.
    #[serde(default)]
    pub password: String,

    /// Database that always exists on the server. Used to create the target
    /// database and to hold the run lock.
    #[serde(default = "default_admin_database")]
    pub admin_database: String,

    /// Server host (engine default when unset).
    #[serde(default)]
    pub host: Option<String>,

    /// Server port (engine default when unset).
    #[serde(default)]
    pub port: Option<u16>,
}

impl EnvironmentConfig {
    pub fn new(
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            adapter: Adapter::default(),
            database: database.into(),
            user: user.into(),
            password: password.into(),
            admin_database: default_admin_database(),
            host: None,
            port: None,
        }
    }
}

impl fmt::Debug for EnvironmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentConfig")
            .field("adapter", &self.adapter)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("admin_database", &self.admin_database)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

fn default_admin_database() -> String {
    "postgres".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_from_str() {
        assert_eq!("development".parse::<Environment>(), Ok(Environment::Development));
        assert_eq!("test".parse::<Environment>(), Ok(Environment::Test));
        assert_eq!("production".parse::<Environment>(), Ok(Environment::Production));
        assert!("prod".parse::<Environment>().is_err());
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_parse_environment_config() {
        let toml = r#"
            adapter = "postgresql"
            database = "shop_development"
            user = "shop"
            password = "hunter2"
            port = 5433
        "#;

        let config: EnvironmentConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.adapter, Adapter::Postgres);
        assert_eq!(config.admin_database, "postgres");
        assert_eq!(config.port, Some(5433));
        assert!(config.host.is_none());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = EnvironmentConfig::new("shop", "shop", "hunter2");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
