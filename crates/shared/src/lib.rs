//! Widget Store Shared Types and Persistence
//!
//! This crate contains the storefront entities, the repository port used by the
//! checkout core, and its Postgres and in-memory implementations.

pub mod db;
pub mod error;
pub mod repository;
pub mod types;

pub use db::*;
pub use error::*;
pub use repository::{
    CheckoutIds, InMemoryRepository, InvoiceOutbox, PersistError, PersistStage, PgRepository,
    Repository,
};
pub use types::*;
