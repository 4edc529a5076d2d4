//! PostgreSQL connectivity: the primary pool and the read replicas.
//!
//! Writes and claims go to the primary. Discovery reads rotate across the
//! replicas through a [`ReplicaSelector`].

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use thiserror::Error;

use crate::error::DecodeError;

use super::migrations::{MigrationError, MigrationRunner};
use super::replica::ReplicaSelector;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A connection string could not be parsed.
    #[error("Invalid connection string: {0}")]
    InvalidUrl(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// A bounded operation ran past its deadline.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// No read replica is available.
    #[error("No read replicas available")]
    NoReplicas,

    /// Record not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The record is not in a state that allows the operation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A row could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Connection pool tuning applied to the primary and every replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 60,
            min_connections: 10,
            max_lifetime: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(5 * 60),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolSettings {
    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .max_lifetime(self.max_lifetime)
            .idle_timeout(self.idle_timeout)
            .acquire_timeout(self.acquire_timeout)
    }
}

/// Primary pool plus round-robin replica pools.
pub struct PgClient {
    primary: PgPool,
    replicas: ReplicaSelector<PgPool>,
}

impl PgClient {
    /// Connects to the primary and to every reachable replica.
    ///
    /// Replicas that cannot be reached are logged and skipped.
    ///
    /// # Errors
    ///
    /// Fails if any connection string is unparsable, the primary is
    /// unreachable, or no replica could be reached.
    pub async fn connect(
        primary_url: &str,
        replica_urls: &[String],
        settings: &PoolSettings,
    ) -> Result<Self, StoreError> {
        let primary_opts = parse_url(primary_url)?;
        let primary = settings
            .pool_options()
            .connect_with(primary_opts)
            .await
            .map_err(|e| StoreError::ConnectionFailed(format!("primary: {}", e)))?;

        let mut replicas = Vec::with_capacity(replica_urls.len());
        for url in replica_urls {
            let opts = parse_url(url)?;
            match settings.pool_options().connect_with(opts).await {
                Ok(pool) => replicas.push(pool),
                Err(e) => {
                    tracing::warn!(
                        replica = %redact(url),
                        error = %e,
                        "Unable to connect to replica database, skipping"
                    );
                }
            }
        }

        tracing::info!(replicas = replicas.len(), "Connected to primary and replicas");
        Self::from_pools(primary, replicas)
    }

    /// Creates a client from existing pools.
    pub fn from_pools(primary: PgPool, replicas: Vec<PgPool>) -> Result<Self, StoreError> {
        Ok(Self {
            primary,
            replicas: ReplicaSelector::new(replicas)?,
        })
    }

    /// Pool for writes and claims.
    pub fn primary(&self) -> &PgPool {
        &self.primary
    }

    /// Next replica pool in rotation.
    pub fn replica(&self) -> &PgPool {
        self.replicas.next()
    }

    /// Number of connected replicas.
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Applies the milestone schema on the primary.
    pub async fn run_migrations(&self) -> Result<usize, StoreError> {
        let runner = MigrationRunner::new(self.primary.clone());
        Ok(runner.run_migrations().await?)
    }

    /// Closes every pool.
    pub async fn close(&self) {
        self.primary.close().await;
        for pool in self.replicas.iter() {
            pool.close().await;
        }
    }
}

fn parse_url(url: &str) -> Result<PgConnectOptions, StoreError> {
    PgConnectOptions::from_str(url)
        .map_err(|e| StoreError::InvalidUrl(format!("{}: {}", redact(url), e)))
}

/// Strips credentials from a connection string before logging it.
pub(crate) fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
