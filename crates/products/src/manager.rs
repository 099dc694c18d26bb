//! Abstract product manager (application-level orchestration).
//!
//! ## Write flow
//!
//! ```text
//! create_product_abstract                save_product_abstract
//!   ↓                                      ↓
//!   validate sku                           require id, validate sku
//!   ↓                                      ↓
//!   ── begin transaction ──────────────────────────────────────────
//!   assert sku unique                      assert exists
//!   ↓                                      assert sku unique (excluding self)
//!   before-create hooks                    before-update hooks
//!   ↓                                      ↓
//!   persist row → assign id                persist row
//!   ↓                                      ↓
//!   persist localized attributes, persist price
//!   ↓                                      ↓
//!   after-create hooks                     after-update hooks
//!   ── commit (or rollback on any error) ──────────────────────────
//! ```
//!
//! Errors from assertions, hooks and collaborators are returned exactly as
//! they were raised; the transaction is rolled back first.

use std::sync::Arc;

use tracing::instrument;

use catalog_core::{ensure_sku, DomainError, Entity, ProductAbstractId};

use crate::error::{ProductError, ProductResult};
use crate::hooks::{HookPhase, HookRegistry};
use crate::ports::{
    AssertionPolicy, AttributeStore, CatalogStore, LocaleLookup, PriceStore, ProductAbstractRecord,
};
use crate::processor::AttributeProcessor;
use crate::product::ProductAbstract;

/// Collaborators of [`ProductAbstractManager`], assembled by the caller.
pub struct ProductAbstractDeps {
    pub store: Arc<dyn CatalogStore>,
    pub attributes: Arc<dyn AttributeStore>,
    pub prices: Arc<dyn PriceStore>,
    pub locales: Arc<dyn LocaleLookup>,
    pub assertion: Arc<dyn AssertionPolicy>,
    pub hooks: HookRegistry,
}

/// Create/read/update of abstract products.
pub struct ProductAbstractManager {
    store: Arc<dyn CatalogStore>,
    attributes: Arc<dyn AttributeStore>,
    prices: Arc<dyn PriceStore>,
    locales: Arc<dyn LocaleLookup>,
    assertion: Arc<dyn AssertionPolicy>,
    hooks: HookRegistry,
}

impl std::fmt::Debug for ProductAbstractManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductAbstractManager")
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl ProductAbstractManager {
    pub fn new(deps: ProductAbstractDeps) -> Self {
        Self {
            store: deps.store,
            attributes: deps.attributes,
            prices: deps.prices,
            locales: deps.locales,
            assertion: deps.assertion,
            hooks: deps.hooks,
        }
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Whether an abstract product with this sku exists.
    pub fn has_product_abstract(&self, sku: &str) -> ProductResult<bool> {
        Ok(self.store.find_abstract_by_sku(sku)?.is_some())
    }

    /// Create a new abstract product and return its assigned identifier.
    ///
    /// On success `product.id_product_abstract` (and the price's owner, if a
    /// price is set) carry the new identifier. On failure both are cleared.
    #[instrument(skip(self, product), fields(sku = %product.sku))]
    pub fn create_product_abstract(
        &self,
        product: &mut ProductAbstract,
    ) -> ProductResult<ProductAbstractId> {
        ensure_sku(&product.sku)?;
        if product.is_persisted() {
            return Err(DomainError::validation(
                "a new product abstract must not carry an identifier",
            )
            .into());
        }

        let result = self.transactional("create_product_abstract", || {
            self.assertion.assert_sku_unique(&product.sku)?;

            self.hooks.run(HookPhase::BeforeCreate, product)?;
            if product.is_persisted() {
                return Err(DomainError::validation(
                    "before-create hooks must not assign an identifier",
                )
                .into());
            }

            let id = self.persist_entity(None, product)?;
            product.id_product_abstract = Some(id);

            self.attributes
                .persist_localized(id, &product.localized_attributes)?;
            self.persist_price(id, product)?;

            self.hooks.run(HookPhase::AfterCreate, product)?;

            Ok(id)
        });

        // The rolled-back id must not stick to the caller's product.
        let id = match result {
            Ok(id) => id,
            Err(err) => {
                product.id_product_abstract = None;
                if let Some(price) = product.price.as_mut() {
                    price.id_product_abstract = None;
                }
                return Err(err);
            }
        };

        product.id_product_abstract = Some(id);
        tracing::info!(id_product_abstract = %id, "product abstract created");
        Ok(id)
    }

    /// Overwrite an existing abstract product.
    ///
    /// Every write targets the identifier the product carried on entry;
    /// before-update hooks may not change it.
    #[instrument(skip(self, product), fields(sku = %product.sku))]
    pub fn save_product_abstract(
        &self,
        product: &mut ProductAbstract,
    ) -> ProductResult<ProductAbstractId> {
        let id = product
            .entity_id()
            .ok_or_else(ProductError::missing_product_abstract_id)?;
        ensure_sku(&product.sku)?;

        let result = self.transactional("save_product_abstract", || {
            self.assertion.assert_exists(id)?;
            self.assertion.assert_sku_unique_excluding(id, &product.sku)?;

            self.hooks.run(HookPhase::BeforeUpdate, product)?;
            if product.entity_id() != Some(id) {
                return Err(DomainError::validation(format!(
                    "before-update hooks must not change the identifier of product abstract {id}"
                ))
                .into());
            }

            self.persist_entity(Some(id), product)?;

            self.attributes
                .persist_localized(id, &product.localized_attributes)?;
            self.persist_price(id, product)?;

            self.hooks.run(HookPhase::AfterUpdate, product)?;

            Ok(())
        });

        product.id_product_abstract = Some(id);
        result?;
        tracing::info!(id_product_abstract = %id, "product abstract saved");
        Ok(id)
    }

    pub fn get_product_abstract_id_by_sku(
        &self,
        sku: &str,
    ) -> ProductResult<Option<ProductAbstractId>> {
        Ok(self
            .store
            .find_abstract_by_sku(sku)?
            .map(|row| row.id_product_abstract))
    }

    /// Load the full aggregate; `None` when the product does not exist.
    ///
    /// Read hooks run on the assembled aggregate before it is returned.
    #[instrument(skip(self), fields(id_product_abstract = %id))]
    pub fn get_product_abstract_by_id(
        &self,
        id: ProductAbstractId,
    ) -> ProductResult<Option<ProductAbstract>> {
        let Some(row) = self.store.find_abstract_by_id(id)? else {
            return Ok(None);
        };

        let mut product = ProductAbstract {
            id_product_abstract: Some(row.id_product_abstract),
            sku: row.sku,
            attributes: self.attributes.decode(&row.attributes)?,
            ..ProductAbstract::default()
        };

        self.load_localized_attributes(&mut product, id)?;
        product.tax_set_id = self.store.find_tax_set_for_abstract(id)?;
        product.price = self.prices.fetch(id)?;

        self.hooks.run(HookPhase::Read, &mut product)?;

        Ok(Some(product))
    }

    /// Sku of the abstract product that owns the concrete product `concrete_sku`.
    pub fn get_abstract_sku_from_product_concrete(&self, concrete_sku: &str) -> ProductResult<String> {
        let concrete = self
            .store
            .find_concrete_by_sku(concrete_sku)?
            .ok_or_else(|| ProductError::product_concrete_not_found(concrete_sku))?;

        let owner = self
            .store
            .find_abstract_by_id(concrete.id_product_abstract)?
            .ok_or_else(|| ProductError::product_abstract_not_found(concrete.id_product_abstract))?;

        Ok(owner.sku)
    }

    /// Attribute processor for an abstract product and all of its concretes.
    ///
    /// Unknown products yield an empty processor.
    pub fn get_product_attribute_processor(
        &self,
        id: ProductAbstractId,
    ) -> ProductResult<AttributeProcessor> {
        let Some(product) = self.get_product_abstract_by_id(id)? else {
            return Ok(AttributeProcessor::new());
        };

        let mut processor = AttributeProcessor::for_abstract(&product);
        for concrete in self.store.find_concretes_for_abstract(id)? {
            processor.add_concrete(concrete.sku.clone(), self.attributes.decode(&concrete.attributes)?);

            for row in self
                .store
                .find_concrete_localized_attribute_rows(concrete.id_product_concrete)?
            {
                let locale = self.locales.by_id(row.fk_locale)?;
                processor.add_concrete_localized(
                    concrete.sku.clone(),
                    locale.locale_name,
                    self.attributes.decode(&row.attributes)?,
                );
            }
        }

        Ok(processor)
    }

    /// Run `work` inside a store transaction.
    ///
    /// Commits on success; on any error (including a failed commit) rolls back
    /// and returns the original error.
    fn transactional<T>(
        &self,
        operation: &'static str,
        work: impl FnOnce() -> ProductResult<T>,
    ) -> ProductResult<T> {
        self.store.begin_transaction()?;

        let result = work().and_then(|value| self.store.commit().map(|()| value));

        if let Err(err) = &result {
            tracing::warn!(operation, error = %err, "rolling back product abstract transaction");
            if let Err(rollback_err) = self.store.rollback() {
                tracing::error!(operation, error = %rollback_err, "rollback failed");
            }
        }

        result
    }

    fn persist_entity(
        &self,
        id: Option<ProductAbstractId>,
        product: &ProductAbstract,
    ) -> ProductResult<ProductAbstractId> {
        let record = ProductAbstractRecord {
            id_product_abstract: id,
            sku: product.sku.clone(),
            attributes: self.attributes.encode(&product.attributes)?,
            fk_tax_set: product.tax_set_id,
        };
        self.store.upsert_abstract(record)
    }

    fn persist_price(&self, id: ProductAbstractId, product: &mut ProductAbstract) -> ProductResult<()> {
        if let Some(price) = product.price.as_mut() {
            price.id_product_abstract = Some(id);
            self.prices.persist(price)?;
        }
        Ok(())
    }

    fn load_localized_attributes(
        &self,
        product: &mut ProductAbstract,
        id: ProductAbstractId,
    ) -> ProductResult<()> {
        for row in self.store.find_localized_attribute_rows(id)? {
            let locale = self.locales.by_id(row.fk_locale)?;
            let localized = self
                .attributes
                .build_localized_attributes(&row, &row.attributes, locale)?;
            product.add_localized_attributes(localized);
        }
        Ok(())
    }
}
