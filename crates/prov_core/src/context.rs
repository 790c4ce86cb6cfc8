//! Provisioning context: values collected during a run.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ProvisionConfig;
use crate::error::{CoreError, CoreResult};
use crate::validate::Field;

/// Validated parameters and derived paths for one workflow run.
///
/// Collected fields start empty and can be set exactly once. Reading a field
/// before it is set is an error, so a stage cannot run ahead of the stage
/// that collects its inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionContext {
    /// Unique run ID
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Application checkout being configured
    pub install_root: PathBuf,
    pub env_file: PathBuf,
    pub env_template: PathBuf,
    database_name: Option<String>,
    charset: Option<String>,
    database_user: Option<String>,
    #[serde(skip)]
    database_password: Option<String>,
    domain: Option<String>,
    /// Backup written during project setup, if any
    pub env_backup: Option<PathBuf>,
}

impl ProvisionContext {
    /// Create an empty context with paths derived from the config.
    pub fn new(config: &ProvisionConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            install_root: config.install_root.clone(),
            env_file: config.env_file_path(),
            env_template: config.env_template_path(),
            database_name: None,
            charset: None,
            database_user: None,
            database_password: None,
            domain: None,
            env_backup: None,
        }
    }

    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::DatabaseName => &mut self.database_name,
            Field::Charset => &mut self.charset,
            Field::DatabaseUser => &mut self.database_user,
            Field::DatabasePassword => &mut self.database_password,
            Field::Domain => &mut self.domain,
        }
    }

    /// Store a validated value. Fails if the field was already set.
    pub fn set(&mut self, field: Field, value: impl Into<String>) -> CoreResult<()> {
        let slot = self.slot(field);
        if slot.is_some() {
            return Err(CoreError::InvalidState(format!("{} is already set", field)));
        }
        *slot = Some(value.into());
        Ok(())
    }

    /// Read a value, if collected.
    pub fn get(&self, field: Field) -> Option<&str> {
        match field {
            Field::DatabaseName => self.database_name.as_deref(),
            Field::Charset => self.charset.as_deref(),
            Field::DatabaseUser => self.database_user.as_deref(),
            Field::DatabasePassword => self.database_password.as_deref(),
            Field::Domain => self.domain.as_deref(),
        }
    }

    /// Read a value that an earlier stage must have collected.
    pub fn require(&self, field: Field) -> CoreResult<&str> {
        self.get(field)
            .ok_or(CoreError::MissingContext(field.as_str()))
    }

    pub fn is_set(&self, field: Field) -> bool {
        self.get(field).is_some()
    }

    pub fn database_name(&self) -> CoreResult<&str> {
        self.require(Field::DatabaseName)
    }

    pub fn charset(&self) -> CoreResult<&str> {
        self.require(Field::Charset)
    }

    pub fn database_user(&self) -> CoreResult<&str> {
        self.require(Field::DatabaseUser)
    }

    pub fn database_password(&self) -> CoreResult<&str> {
        self.require(Field::DatabasePassword)
    }

    pub fn domain(&self) -> CoreResult<&str> {
        self.require(Field::Domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_paths_from_config() {
        let config = ProvisionConfig {
            install_root: PathBuf::from("/srv/shop"),
            ..ProvisionConfig::default()
        };
        let ctx = ProvisionContext::new(&config);

        assert_eq!(ctx.install_root, PathBuf::from("/srv/shop"));
        assert_eq!(ctx.env_file, PathBuf::from("/srv/shop/.env"));
        assert_eq!(ctx.env_template, PathBuf::from("/srv/shop/.env.example"));
        assert!(!ctx.is_set(Field::DatabaseName));
    }

    #[test]
    fn test_fields_are_write_once() {
        let mut ctx = ProvisionContext::new(&ProvisionConfig::default());

        ctx.set(Field::DatabaseName, "shop_test").unwrap();
        assert_eq!(ctx.database_name().unwrap(), "shop_test");

        let err = ctx.set(Field::DatabaseName, "other").unwrap_err();
        assert!(matches!(err, CoreError::InvalidState(_)));
        assert_eq!(ctx.database_name().unwrap(), "shop_test");
    }

    #[test]
    fn test_missing_field_is_error() {
        let ctx = ProvisionContext::new(&ProvisionConfig::default());
        let err = ctx.domain().unwrap_err();
        assert!(matches!(err, CoreError::MissingContext("domain name")));
    }

    #[test]
    fn test_password_not_serialized() {
        let mut ctx = ProvisionContext::new(&ProvisionConfig::default());
        ctx.set(Field::DatabaseUser, "shop").unwrap();
        ctx.set(Field::DatabasePassword, "hunter2hunter2").unwrap();

        let json = serde_json::to_string(&ctx).unwrap();
        assert!(json.contains("shop"));
        assert!(!json.contains("hunter2hunter2"));
    }
}
