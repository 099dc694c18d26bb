//! Infrastructure layer: catalog databases, configuration, process wiring.

/// Catalog database adapters (in-memory, PostgreSQL).
pub mod catalog_store;

/// Configuration loading and representation.
pub mod config;

/// Assembles a `ProductAbstractManager` from configuration.
pub mod context;

#[cfg(test)]
mod integration_tests;

pub use catalog_store::InMemoryCatalogDatabase;
#[cfg(feature = "postgres")]
pub use catalog_store::PostgresCatalogDatabase;
pub use config::{CatalogConfig, ConfigError, DatabaseConfig, StoreKind};
pub use context::{CatalogContext, CatalogDatabase};
