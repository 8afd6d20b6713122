mod environment;

pub use environment::{Adapter, Environment, EnvironmentConfig};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{QuarryError, Result};

/// Root configuration for quarry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarryConfig {
    /// Project metadata.
    #[serde(default)]
    pub project: ProjectConfig,

    /// Migration discovery and ledger settings.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// External SQL engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-environment database settings, keyed by environment name.
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentConfig>,
}

impl QuarryConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| QuarryError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);

        let config: Self = toml::from_str(&content)
            .map_err(|e| QuarryError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the settings for one environment.
    pub fn environment(&self, env: Environment) -> Result<EnvironmentConfig> {
        self.environments.get(env.as_str()).cloned().ok_or_else(|| {
            QuarryError::Config(format!("No [environments.{}] section in configuration", env))
        })
    }

    /// Check the values serde cannot check on its own.
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.migrations.table) {
            return Err(QuarryError::Config(format!(
                "Invalid ledger table name '{}': use letters, digits and underscores",
                self.migrations.table
            )));
        }

        if self.migrations.extension.is_empty() {
            return Err(QuarryError::Config(
                "Migration extension cannot be empty".to_string(),
            ));
        }

        if self.engine.program.is_empty() {
            return Err(QuarryError::Config("Engine program cannot be empty".to_string()));
        }

        for (env, settings) in &self.environments {
            env.parse::<Environment>().map_err(QuarryError::Config)?;
            if settings.database.is_empty() || settings.user.is_empty() {
                return Err(QuarryError::Config(format!(
                    "Environment '{}' needs both database and user",
                    env
                )));
            }
            if settings.admin_database.is_empty() {
                return Err(QuarryError::Config(format!(
                    "Environment '{}' has an empty admin_database",
                    env
                )));
            }
        }

        Ok(())
    }
}

/// Project metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name.
    #[serde(default = "default_project_name")]
    pub name: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
        }
    }
}

fn default_project_name() -> String {
    "quarry-app".to_string()
}

/// Migration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory holding the migration scripts.
    #[serde(default = "default_migrations_dir")]
    pub dir: PathBuf,

    /// File extension a script must have, without the dot.
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Ledger table inside the target database.
    #[serde(default = "default_table")]
    pub table: String,

    /// Per-script timeout in seconds. Zero disables the timeout.
    #[serde(default)]
    pub timeout_secs: u64,

    /// Hold an advisory lock for the duration of a run.
    #[serde(default = "default_true")]
    pub lock: bool,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
            extension: default_extension(),
            table: default_table(),
            timeout_secs: 0,
            lock: true,
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("db/migrate")
}

fn default_extension() -> String {
    "sql".to_string()
}

fn default_table() -> String {
    crate::LEDGER_TABLE.to_string()
}

fn default_true() -> bool {
    true
}

/// External SQL engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Program to run for each script.
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before `-f <script>`.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
        }
    }
}

fn default_program() -> String {
    "psql".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output JSON format.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") else {
        return content.to_string();
    };

    let mut result = content.to_string();
    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}
