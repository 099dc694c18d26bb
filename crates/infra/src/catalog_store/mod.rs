//! Catalog persistence backends.
//!
//! Both backends implement the catalog, price and locale ports on one value so
//! that a single transaction covers every table touched by a create/update.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryCatalogDatabase;
#[cfg(feature = "postgres")]
pub use postgres::PostgresCatalogDatabase;
