//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! Concrete implementations of the repository and task store ports backed by
//! PostgreSQL via `diesel-async` and a `bb8` pool.
//!
//! - **Thin adapters**: repositories translate between Diesel rows and domain
//!   types. Ordering, reattachment planning and statistics live in the domain.
//! - **Internal models**: `models.rs` and `schema.rs` never leave this module.
//! - **Atomic writes**: registration, overrides, file inserts and reduction
//!   commits each run in one transaction.
//!
//! # Example
//!
//! ```rust,no_run
//! use lesion_bank::outbound::persistence::{
//!     DbPool, DieselTaskStore, PoolConfig, run_pending_migrations,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let url = "postgres://localhost/lesion_bank";
//! run_pending_migrations(url).await?;
//! let pool = DbPool::new(PoolConfig::new(url)).await?;
//! let tasks = DieselTaskStore::new(pool);
//! # let _ = tasks;
//! # Ok(())
//! # }
//! ```

mod diesel_decode_corpus_repository;
mod diesel_derived_file_repository;
mod diesel_error_mapping;
mod diesel_parcellation_repository;
mod diesel_point_query_repository;
mod diesel_task_store;
mod migrations;
mod models;
mod pool;
mod schema;

pub use diesel_decode_corpus_repository::DieselDecodeCorpusRepository;
pub use diesel_derived_file_repository::DieselDerivedFileRepository;
pub use diesel_parcellation_repository::DieselParcellationRepository;
pub use diesel_point_query_repository::DieselPointQueryRepository;
pub use diesel_task_store::DieselTaskStore;
pub use migrations::{MigrationError, run_pending_migrations};
pub use pool::{DbPool, PoolConfig, PoolError};
