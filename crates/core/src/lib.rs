//! `catalog-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{ensure_sku, DomainError, DomainResult};
pub use id::{LocaleId, ProductAbstractId, ProductConcreteId, TaxSetId};
