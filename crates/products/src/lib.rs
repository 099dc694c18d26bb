//! Products domain module: abstract product catalog management.
//!
//! This crate owns the abstract product aggregate, the ports it needs from
//! persistence, and the `ProductAbstractManager` that orchestrates create,
//! update and read flows (assertions, hooks, transactions). It performs no IO
//! itself; storage backends live in `catalog-infra`.

pub mod assertion;
pub mod attribute;
pub mod error;
pub mod hooks;
pub mod manager;
pub mod ports;
pub mod processor;
pub mod product;

pub use assertion::StoreAssertion;
pub use attribute::JsonAttributeStore;
pub use error::{ProductError, ProductResult};
pub use hooks::{HookPhase, HookRegistry, NamedHook, ProductAbstractHook, named};
pub use manager::{ProductAbstractDeps, ProductAbstractManager};
pub use ports::{
    AssertionPolicy, AttributeStore, CatalogStore, ConcreteLocalizedAttributesRow,
    LocaleLookup, LocalizedAttributesRow, PriceStore, ProductAbstractRecord, ProductAbstractRow,
    ProductConcreteRow,
};
pub use processor::AttributeProcessor;
pub use product::{Attributes, Locale, LocalizedAttributes, Price, ProductAbstract};
