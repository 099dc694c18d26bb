//! Default assertion policy backed by the catalog store.

use catalog_core::ProductAbstractId;

use crate::error::{ProductError, ProductResult};
use crate::ports::{AssertionPolicy, CatalogStore};

/// Checks sku uniqueness and product existence with store lookups.
///
/// These checks are check-then-act; the store's own unique constraint remains
/// the authoritative guard against concurrent inserts.
#[derive(Debug, Clone)]
pub struct StoreAssertion<S> {
    store: S,
}

impl<S> StoreAssertion<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S> AssertionPolicy for StoreAssertion<S>
where
    S: CatalogStore,
{
    fn assert_sku_unique(&self, sku: &str) -> ProductResult<()> {
        if self.store.find_abstract_by_sku(sku)?.is_some() {
            return Err(ProductError::DuplicateSku(sku.to_string()));
        }
        Ok(())
    }

    fn assert_sku_unique_excluding(&self, id: ProductAbstractId, sku: &str) -> ProductResult<()> {
        match self.store.find_abstract_by_sku(sku)? {
            Some(row) if row.id_product_abstract != id => {
                Err(ProductError::DuplicateSku(sku.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn assert_exists(&self, id: ProductAbstractId) -> ProductResult<()> {
        if self.store.find_abstract_by_id(id)?.is_none() {
            return Err(ProductError::product_abstract_not_found(id));
        }
        Ok(())
    }
}
