//! PostgreSQL persistent storage for milestones.
//!
//! # Overview
//!
//! - **MilestoneStore**: the trait the pipeline core talks to
//! - **PgClient**: primary pool plus round-robin read replicas
//! - **PgMilestoneStore**: `MilestoneStore` over `PgClient`
//! - **InMemoryStore**: `MilestoneStore` over a mutex-guarded map
//! - **Migrations**: schema creation and bookkeeping
//!
//! # Usage
//!
//! ```rust,ignore
//! use milestone_flow::storage::{PgClient, PgMilestoneStore, PoolSettings};
//!
//! let client = PgClient::connect(&primary_url, &replica_urls, &PoolSettings::default()).await?;
//! client.run_migrations().await?;
//!
//! let store = PgMilestoneStore::new(Arc::new(client));
//! store.insert(&Milestone::new(Claimant::current())).await?;
//! ```

pub mod database;
pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod replica;
pub mod rows;
pub mod schema;
pub mod store;

pub use database::{PgClient, PoolSettings, StoreError};
pub use memory::InMemoryStore;
pub use migrations::{MigrationError, MigrationRunner};
pub use postgres::PgMilestoneStore;
pub use replica::ReplicaSelector;
pub use store::MilestoneStore;
