//! Project metadata layer.
//!
//! The [`store::ProjectStore`] trait defines the interface;
//! [`sqlite::SqliteProjectStore`] is the default implementation and
//! [`memory::MemoryProjectStore`] backs tests and ephemeral runs.

pub mod memory;
pub mod sqlite;
pub mod store;
