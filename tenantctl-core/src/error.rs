//! Structured error types for tenantctl-core.
//!
//! Uses `thiserror` so the library exposes composable errors; the
//! `tenantctl` binary wraps them with `anyhow` context.
//!
//! `ManagerError` is `Clone`: a single initialization outcome is delivered
//! to every caller waiting on the same schema, so backend errors are shared
//! behind an `Arc`.

use std::sync::Arc;
use thiserror::Error;

/// Errors raised by registry, catalog and connector backends.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("{0}")]
    Backend(String),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// Errors surfaced by [`TenantConnectionManager`](crate::TenantConnectionManager).
#[derive(Error, Debug, Clone)]
pub enum ManagerError {
    /// No registry record exists for the tenant id
    #[error("tenant '{tenant_id}' not found")]
    NotFound { tenant_id: String },

    /// Registry record exists but is unusable (e.g. blank schema name)
    #[error("invalid tenant state for '{tenant_id}': {reason}")]
    InvalidState { tenant_id: String, reason: String },

    /// Registry lookup itself failed
    #[error("tenant registry lookup failed: {source}")]
    Registry {
        #[source]
        source: Arc<DbError>,
    },

    /// Schema provisioning failed before connecting
    #[error("failed to provision schema '{schema}': {source}")]
    Provision {
        schema: String,
        #[source]
        source: Arc<DbError>,
    },

    /// Physical connect or session initialization failed
    #[error("failed to connect to schema '{schema}': {source}")]
    Connect {
        schema: String,
        #[source]
        source: Arc<DbError>,
    },

    /// The initialization task ended without publishing a result
    #[error("initialization for schema '{schema}' was aborted")]
    InitAborted { schema: String },

    /// The manager has been shut down
    #[error("connection manager is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, ManagerError>;

impl ManagerError {
    pub fn not_found(tenant_id: impl Into<String>) -> Self {
        Self::NotFound {
            tenant_id: tenant_id.into(),
        }
    }

    pub fn invalid_state(tenant_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            tenant_id: tenant_id.into(),
            reason: reason.into(),
        }
    }

    pub fn registry(source: DbError) -> Self {
        Self::Registry {
            source: Arc::new(source),
        }
    }

    pub fn provision(schema: impl Into<String>, source: DbError) -> Self {
        Self::Provision {
            schema: schema.into(),
            source: Arc::new(source),
        }
    }

    pub fn connect(schema: impl Into<String>, source: DbError) -> Self {
        Self::Connect {
            schema: schema.into(),
            source: Arc::new(source),
        }
    }

    /// True for errors caused by tenant data rather than infrastructure.
    pub fn is_tenant_error(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::InvalidState { .. })
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: std::path::PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ManagerError::not_found("store-42");
        assert_eq!(err.to_string(), "tenant 'store-42' not found");

        let err = ManagerError::invalid_state("store-42", "schema name is blank");
        assert!(err.to_string().contains("store-42"));
        assert!(err.to_string().contains("schema name is blank"));
    }

    #[test]
    fn test_connect_error_is_shared_between_clones() {
        let err = ManagerError::connect("db1", DbError::Backend("refused".into()));
        let cloned = err.clone();

        match (&err, &cloned) {
            (ManagerError::Connect { source: a, .. }, ManagerError::Connect { source: b, .. }) => {
                assert!(Arc::ptr_eq(a, b));
            }
            _ => panic!("expected connect errors"),
        }
        assert!(cloned.to_string().contains("refused"));
    }

    #[test]
    fn test_tenant_error_classification() {
        assert!(ManagerError::not_found("a").is_tenant_error());
        assert!(ManagerError::invalid_state("a", "b").is_tenant_error());
        assert!(!ManagerError::ShuttingDown.is_tenant_error());
    }
}
