//! Collaborator ports consumed by the product manager.
//!
//! The manager makes **no storage assumptions**: it works against these traits,
//! and `catalog-infra` ships an in-memory database (tests/dev) and a
//! PostgreSQL database behind them.
//!
//! All ports are synchronous and return [`ProductError`] so that failures flow
//! back to the caller unchanged.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use catalog_core::{LocaleId, ProductAbstractId, ProductConcreteId, TaxSetId};

use crate::error::ProductResult;
use crate::product::{Attributes, Locale, LocalizedAttributes, Price};

/// Writable fields of the abstract product table.
///
/// `id_product_abstract == None` inserts a new row; `Some(id)` overwrites it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAbstractRecord {
    pub id_product_abstract: Option<ProductAbstractId>,
    pub sku: String,
    /// Encoded attribute blob.
    pub attributes: String,
    pub fk_tax_set: Option<TaxSetId>,
}

/// A stored abstract product row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAbstractRow {
    pub id_product_abstract: ProductAbstractId,
    pub sku: String,
    pub attributes: String,
    pub fk_tax_set: Option<TaxSetId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored localized attribute row of an abstract product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedAttributesRow {
    pub id_product_abstract: ProductAbstractId,
    pub fk_locale: LocaleId,
    pub name: String,
    pub attributes: String,
}

/// A stored concrete product row (read-only at this layer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductConcreteRow {
    pub id_product_concrete: ProductConcreteId,
    pub sku: String,
    pub id_product_abstract: ProductAbstractId,
    pub attributes: String,
}

/// A stored localized attribute row of a concrete product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcreteLocalizedAttributesRow {
    pub id_product_concrete: ProductConcreteId,
    pub fk_locale: LocaleId,
    pub name: String,
    pub attributes: String,
}

/// Transactional catalog persistence.
///
/// The transaction methods bracket one create/update call. Implementations
/// must make every write between `begin_transaction` and `rollback` disappear,
/// and should enforce sku uniqueness themselves (the manager's assertion is
/// only an early check).
pub trait CatalogStore: Send + Sync {
    fn begin_transaction(&self) -> ProductResult<()>;
    fn commit(&self) -> ProductResult<()>;
    fn rollback(&self) -> ProductResult<()>;

    fn find_abstract_by_sku(&self, sku: &str) -> ProductResult<Option<ProductAbstractRow>>;
    fn find_abstract_by_id(&self, id: ProductAbstractId) -> ProductResult<Option<ProductAbstractRow>>;

    /// Insert or overwrite an abstract product row; returns its identifier.
    fn upsert_abstract(&self, record: ProductAbstractRecord) -> ProductResult<ProductAbstractId>;

    /// Tax set referenced by the product, if the product has one and it exists.
    fn find_tax_set_for_abstract(&self, id: ProductAbstractId) -> ProductResult<Option<TaxSetId>>;

    fn find_localized_attribute_rows(
        &self,
        id: ProductAbstractId,
    ) -> ProductResult<Vec<LocalizedAttributesRow>>;

    /// Insert or overwrite the row keyed by (product, locale).
    fn upsert_localized_attributes(&self, row: LocalizedAttributesRow) -> ProductResult<()>;

    fn find_concrete_by_sku(&self, sku: &str) -> ProductResult<Option<ProductConcreteRow>>;

    fn find_concretes_for_abstract(
        &self,
        id: ProductAbstractId,
    ) -> ProductResult<Vec<ProductConcreteRow>>;

    fn find_concrete_localized_attribute_rows(
        &self,
        id: ProductConcreteId,
    ) -> ProductResult<Vec<ConcreteLocalizedAttributesRow>>;
}

impl<S> CatalogStore for Arc<S>
where
    S: CatalogStore + ?Sized,
{
    fn begin_transaction(&self) -> ProductResult<()> {
        (**self).begin_transaction()
    }

    fn commit(&self) -> ProductResult<()> {
        (**self).commit()
    }

    fn rollback(&self) -> ProductResult<()> {
        (**self).rollback()
    }

    fn find_abstract_by_sku(&self, sku: &str) -> ProductResult<Option<ProductAbstractRow>> {
        (**self).find_abstract_by_sku(sku)
    }

    fn find_abstract_by_id(&self, id: ProductAbstractId) -> ProductResult<Option<ProductAbstractRow>> {
        (**self).find_abstract_by_id(id)
    }

    fn upsert_abstract(&self, record: ProductAbstractRecord) -> ProductResult<ProductAbstractId> {
        (**self).upsert_abstract(record)
    }

    fn find_tax_set_for_abstract(&self, id: ProductAbstractId) -> ProductResult<Option<TaxSetId>> {
        (**self).find_tax_set_for_abstract(id)
    }

    fn find_localized_attribute_rows(
        &self,
        id: ProductAbstractId,
    ) -> ProductResult<Vec<LocalizedAttributesRow>> {
        (**self).find_localized_attribute_rows(id)
    }

    fn upsert_localized_attributes(&self, row: LocalizedAttributesRow) -> ProductResult<()> {
        (**self).upsert_localized_attributes(row)
    }

    fn find_concrete_by_sku(&self, sku: &str) -> ProductResult<Option<ProductConcreteRow>> {
        (**self).find_concrete_by_sku(sku)
    }

    fn find_concretes_for_abstract(
        &self,
        id: ProductAbstractId,
    ) -> ProductResult<Vec<ProductConcreteRow>> {
        (**self).find_concretes_for_abstract(id)
    }

    fn find_concrete_localized_attribute_rows(
        &self,
        id: ProductConcreteId,
    ) -> ProductResult<Vec<ConcreteLocalizedAttributesRow>> {
        (**self).find_concrete_localized_attribute_rows(id)
    }
}

/// Attribute encoding and localized-attribute persistence.
pub trait AttributeStore: Send + Sync {
    fn encode(&self, attributes: &Attributes) -> ProductResult<String>;
    fn decode(&self, blob: &str) -> ProductResult<Attributes>;

    /// Build the localized attributes of one row; `raw` is the row's encoded blob.
    fn build_localized_attributes(
        &self,
        row: &LocalizedAttributesRow,
        raw: &str,
        locale: Locale,
    ) -> ProductResult<LocalizedAttributes>;

    /// Persist the localized entries of the product `id`, one row per locale.
    fn persist_localized(
        &self,
        id: ProductAbstractId,
        localized: &[LocalizedAttributes],
    ) -> ProductResult<()>;
}

/// Price persistence keyed by abstract product.
pub trait PriceStore: Send + Sync {
    fn persist(&self, price: &Price) -> ProductResult<()>;
    fn fetch(&self, id: ProductAbstractId) -> ProductResult<Option<Price>>;
}

/// Locale resolution.
pub trait LocaleLookup: Send + Sync {
    /// Fails with `NotFound` for unknown locales.
    fn by_id(&self, id: LocaleId) -> ProductResult<Locale>;
}

/// Sku/identity assertions run before writes.
pub trait AssertionPolicy: Send + Sync {
    fn assert_sku_unique(&self, sku: &str) -> ProductResult<()>;
    fn assert_sku_unique_excluding(&self, id: ProductAbstractId, sku: &str) -> ProductResult<()>;
    fn assert_exists(&self, id: ProductAbstractId) -> ProductResult<()>;
}
