//! Provisioning configuration.
//!
//! Every field has a default, so an empty TOML file (or no file at all) is a
//! valid configuration. The CLI layers flag and environment overrides on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::retry::RetryPolicy;
use crate::validate::{Field, FieldRules};

/// Retry settings as written in the config file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }
}

/// Database server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Client binary used for DDL and queries
    pub client: String,
    /// Administrative account the client connects as
    pub admin_user: String,
    /// Administrative password, handed to the client through `MYSQL_PWD`
    #[serde(skip_serializing)]
    pub admin_password: Option<String>,
    /// Host written into the env file
    pub host: String,
    /// Service-manager unit that must be active
    pub service: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            client: "mysql".to_string(),
            admin_user: "root".to_string(),
            admin_password: None,
            host: "localhost".to_string(),
            service: "mysql".to_string(),
        }
    }
}

/// Health-check settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub scheme: String,
    /// Path segment placed before `/health`
    pub path: String,
    pub timeout_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            path: "api".to_string(),
            timeout_secs: 10,
        }
    }
}

impl HealthSettings {
    /// Build the probe URL for a domain.
    pub fn url(&self, domain: &str) -> String {
        let path = self.path.trim_matches('/');
        if path.is_empty() {
            format!("{}://{}/health", self.scheme, domain)
        } else {
            format!("{}://{}/{}/health", self.scheme, domain, path)
        }
    }
}

/// Field values supplied before the run instead of at a prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Answers {
    pub database_name: Option<String>,
    pub charset: Option<String>,
    pub database_user: Option<String>,
    pub database_password: Option<String>,
    pub domain: Option<String>,
}

impl Answers {
    pub fn get(&self, field: Field) -> Option<&str> {
        match field {
            Field::DatabaseName => self.database_name.as_deref(),
            Field::Charset => self.charset.as_deref(),
            Field::DatabaseUser => self.database_user.as_deref(),
            Field::DatabasePassword => self.database_password.as_deref(),
            Field::Domain => self.domain.as_deref(),
        }
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let slot = match field {
            Field::DatabaseName => &mut self.database_name,
            Field::Charset => &mut self.charset,
            Field::DatabaseUser => &mut self.database_user,
            Field::DatabasePassword => &mut self.database_password,
            Field::Domain => &mut self.domain,
        };
        *slot = Some(value.into());
    }

    /// Supplied answers in collection order.
    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        [
            Field::DatabaseName,
            Field::Charset,
            Field::DatabaseUser,
            Field::DatabasePassword,
            Field::Domain,
        ]
        .into_iter()
        .filter_map(move |f| self.get(f).map(|v| (f, v)))
    }
}

/// Top-level provisioning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Application checkout the workflow configures
    pub install_root: PathBuf,
    /// Env file, relative to `install_root`
    pub env_file: PathBuf,
    /// Template copied into place as the env file, relative to `install_root`
    pub env_template: PathBuf,
    /// Mode applied to the env file after copying
    pub env_file_mode: u32,
    /// Owner of the writable directories
    pub web_user: String,
    pub web_group: String,
    /// Directories (relative to `install_root`) that the web server writes to
    pub writable_dirs: Vec<PathBuf>,
    /// Mode applied recursively to `writable_dirs`, as passed to `chmod`
    pub writable_mode: String,
    /// Commands that must resolve before anything is changed
    pub required_commands: Vec<String>,
    pub database: DatabaseSettings,
    /// Accepted character sets; the first is not implicitly the default
    pub charsets: Vec<String>,
    pub default_charset: String,
    pub min_user_length: usize,
    pub min_password_length: usize,
    /// Retry policy for external commands
    pub retry: RetrySettings,
    /// Retry policy for dependency installation
    pub install_retry: RetrySettings,
    /// PHP binary used for framework commands
    pub php: String,
    /// Composer binary
    pub composer: String,
    /// Application installer, as an argument vector
    pub installer: Vec<String>,
    pub health: HealthSettings,
    /// Where run reports are written
    pub report_dir: PathBuf,
    /// Bound on prompt attempts per field (`None` re-prompts forever)
    pub prompt_attempts: Option<u32>,
    /// Answers supplied up front
    #[serde(skip_serializing)]
    pub answers: Answers,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        let rules = FieldRules::default();
        Self {
            install_root: PathBuf::from("/var/www/storefront"),
            env_file: PathBuf::from(".env"),
            env_template: PathBuf::from(".env.example"),
            env_file_mode: 0o644,
            web_user: "www-data".to_string(),
            web_group: "www-data".to_string(),
            writable_dirs: vec![PathBuf::from("storage"), PathBuf::from("bootstrap/cache")],
            writable_mode: "775".to_string(),
            required_commands: vec![
                "mysql".to_string(),
                "php".to_string(),
                "composer".to_string(),
            ],
            database: DatabaseSettings::default(),
            charsets: rules.charsets,
            default_charset: rules.default_charset,
            min_user_length: rules.min_user_length,
            min_password_length: rules.min_password_length,
            retry: RetrySettings {
                max_attempts: 3,
                delay_ms: 2000,
            },
            install_retry: RetrySettings {
                max_attempts: 3,
                delay_ms: 5000,
            },
            php: "php".to_string(),
            composer: "composer".to_string(),
            installer: vec![
                "php".to_string(),
                "artisan".to_string(),
                "app:install".to_string(),
                "--no-interaction".to_string(),
            ],
            health: HealthSettings::default(),
            report_dir: PathBuf::from(".provision/runs"),
            prompt_attempts: None,
            answers: Answers::default(),
        }
    }
}

impl ProvisionConfig {
    /// Load a TOML config file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the workflow cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if !self.charsets.iter().any(|c| c == &self.default_charset) {
            return Err(CoreError::Config(format!(
                "default_charset '{}' is not in charsets [{}]",
                self.default_charset,
                self.charsets.join(", ")
            )));
        }
        if self.installer.is_empty() {
            return Err(CoreError::Config("installer command is empty".to_string()));
        }
        if self.min_user_length == 0 {
            return Err(CoreError::Config("min_user_length must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 || self.install_retry.max_attempts == 0 {
            return Err(CoreError::Config("max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn field_rules(&self) -> FieldRules {
        FieldRules {
            charsets: self.charsets.clone(),
            default_charset: self.default_charset.clone(),
            min_user_length: self.min_user_length,
            min_password_length: self.min_password_length,
        }
    }

    pub fn env_file_path(&self) -> PathBuf {
        self.install_root.join(&self.env_file)
    }

    pub fn env_template_path(&self) -> PathBuf {
        self.install_root.join(&self.env_template)
    }

    pub fn owner(&self) -> String {
        format!("{}:{}", self.web_user, self.web_group)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ProvisionConfig::default();
        assert_eq!(config.default_charset, "utf8mb4");
        assert_eq!(config.retry.policy().max_attempts, 3);
        assert_eq!(config.retry.policy().delay, Duration::from_millis(2000));
        assert!(config.install_retry.delay_ms > config.retry.delay_ms);
        assert_eq!(config.env_file_path(), PathBuf::from("/var/www/storefront/.env"));
        assert_eq!(config.owner(), "www-data:www-data");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_health_url() {
        let mut health = HealthSettings::default();
        assert_eq!(health.url("shop.example.com"), "https://shop.example.com/api/health");

        health.path = "/v1/".to_string();
        assert_eq!(health.url("shop.example.com"), "https://shop.example.com/v1/health");

        health.path = String::new();
        assert_eq!(health.url("shop.example.com"), "https://shop.example.com/health");
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("provision.toml");
        std::fs::write(
            &path,
            r#"
install_root = "/srv/shop"
web_user = "nginx"
web_group = "nginx"

[database]
admin_user = "admin"

[retry]
max_attempts = 5
delay_ms = 100

[answers]
database_name = "shop_prod"
domain = "shop.example.com"
"#,
        )
        .unwrap();

        let config = ProvisionConfig::load(&path).unwrap();
        assert_eq!(config.install_root, PathBuf::from("/srv/shop"));
        assert_eq!(config.owner(), "nginx:nginx");
        assert_eq!(config.database.admin_user, "admin");
        assert_eq!(config.database.client, "mysql");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.install_retry.delay_ms, 5000);
        assert_eq!(config.answers.get(Field::DatabaseName), Some("shop_prod"));
        assert_eq!(config.answers.get(Field::Charset), None);
        assert_eq!(config.answers.iter().count(), 2);
    }

    #[test]
    fn test_invalid_default_charset_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("provision.toml");
        std::fs::write(&path, "charsets = [\"latin1\"]\n").unwrap();

        let err = ProvisionConfig::load(&path).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_zero_min_user_length_rejected() {
        let config = ProvisionConfig {
            min_user_length: 0,
            ..ProvisionConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }
}
