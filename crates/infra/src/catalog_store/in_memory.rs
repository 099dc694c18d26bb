use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, RwLock};
use std::thread::{self, ThreadId};

use chrono::Utc;

use catalog_core::{LocaleId, ProductAbstractId, ProductConcreteId, TaxSetId};
use catalog_products::{
    CatalogStore, ConcreteLocalizedAttributesRow, Locale, LocaleLookup, LocalizedAttributesRow,
    Price, PriceStore, ProductAbstractRecord, ProductAbstractRow, ProductConcreteRow, ProductError,
    ProductResult,
};

#[derive(Debug, Clone, Default)]
struct CatalogState {
    abstracts: BTreeMap<ProductAbstractId, ProductAbstractRow>,
    localized: BTreeMap<(ProductAbstractId, LocaleId), LocalizedAttributesRow>,
    concretes: BTreeMap<ProductConcreteId, ProductConcreteRow>,
    concrete_localized: BTreeMap<(ProductConcreteId, LocaleId), ConcreteLocalizedAttributesRow>,
    prices: BTreeMap<(ProductAbstractId, String), Price>,
    locales: BTreeMap<LocaleId, Locale>,
    tax_sets: BTreeSet<TaxSetId>,
}

impl CatalogState {
    fn sku_owner(&self, sku: &str) -> Option<ProductAbstractId> {
        self.abstracts
            .values()
            .find(|row| row.sku == sku)
            .map(|row| row.id_product_abstract)
    }
}

/// Open transaction: the owning thread and the committed state it started from.
#[derive(Debug, Default)]
struct TxSlot {
    owner: Option<ThreadId>,
    snapshot: Option<CatalogState>,
}

/// In-memory catalog database.
///
/// Behaves like a database with a single writer: the catalog tables, prices
/// and locales share one transaction, so a rollback restores all of them to
/// the state captured at `begin_transaction`.
///
/// ## Concurrency
///
/// - A transaction belongs to the thread that began it. `begin_transaction`
///   on another thread blocks until it is committed or rolled back.
/// - Reads from other threads see the committed snapshot, never the open
///   transaction's writes.
/// - Writes outside a transaction wait for any open transaction to finish.
/// - A second `begin_transaction` on the owning thread is an error.
///
/// Identifier sequences are not rolled back, so an id handed out by a failed
/// create is never reused. Foreign keys and the unique sku constraint are
/// enforced on write.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug)]
pub struct InMemoryCatalogDatabase {
    state: RwLock<CatalogState>,
    tx: Mutex<TxSlot>,
    released: Condvar,
    next_abstract_id: AtomicI64,
    next_concrete_id: AtomicI64,
    default_price_type: String,
}

impl Default for InMemoryCatalogDatabase {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> ProductError {
    ProductError::storage("lock poisoned")
}

impl InMemoryCatalogDatabase {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CatalogState::default()),
            tx: Mutex::new(TxSlot::default()),
            released: Condvar::new(),
            next_abstract_id: AtomicI64::new(1),
            next_concrete_id: AtomicI64::new(1),
            default_price_type: Price::DEFAULT_TYPE.to_string(),
        }
    }

    /// Price type returned by [`PriceStore::fetch`] when a product has several.
    pub fn with_default_price_type(mut self, price_type: impl Into<String>) -> Self {
        self.default_price_type = price_type.into();
        self
    }

    fn slot(&self) -> ProductResult<MutexGuard<'_, TxSlot>> {
        self.tx.lock().map_err(poisoned)
    }

    /// Run `f` against the state visible to the calling thread.
    fn view<T>(&self, f: impl FnOnce(&CatalogState) -> T) -> ProductResult<T> {
        let slot = self.slot()?;
        match (slot.owner, slot.snapshot.as_ref()) {
            (Some(owner), Some(committed)) if owner != thread::current().id() => Ok(f(committed)),
            _ => {
                let state = self.state.read().map_err(poisoned)?;
                Ok(f(&state))
            }
        }
    }

    /// Run `f` inside the calling thread's transaction, or as a single write
    /// once no other thread holds a transaction.
    fn modify<T>(&self, f: impl FnOnce(&mut CatalogState) -> ProductResult<T>) -> ProductResult<T> {
        let me = thread::current().id();
        let _slot = self
            .released
            .wait_while(self.slot()?, |slot| slot.owner.is_some_and(|owner| owner != me))
            .map_err(poisoned)?;
        let mut state = self.state.write().map_err(poisoned)?;
        f(&mut state)
    }

    pub fn add_locale(&self, locale: Locale) -> ProductResult<()> {
        self.modify(|state| {
            state.locales.insert(locale.id_locale, locale);
            Ok(())
        })
    }

    pub fn add_tax_set(&self, id: TaxSetId) -> ProductResult<()> {
        self.modify(|state| {
            state.tax_sets.insert(id);
            Ok(())
        })
    }

    /// Insert a concrete product owned by `id_product_abstract`.
    pub fn add_concrete(
        &self,
        sku: impl Into<String>,
        id_product_abstract: ProductAbstractId,
        attributes: impl Into<String>,
    ) -> ProductResult<ProductConcreteId> {
        let sku = sku.into();
        let attributes = attributes.into();

        self.modify(|state| {
            if !state.abstracts.contains_key(&id_product_abstract) {
                return Err(ProductError::product_abstract_not_found(id_product_abstract));
            }
            if state.concretes.values().any(|c| c.sku == sku) {
                return Err(ProductError::storage(format!(
                    "unique violation: product concrete sku '{sku}'"
                )));
            }

            let id = ProductConcreteId::new(self.next_concrete_id.fetch_add(1, Ordering::SeqCst));
            state.concretes.insert(
                id,
                ProductConcreteRow {
                    id_product_concrete: id,
                    sku,
                    id_product_abstract,
                    attributes,
                },
            );
            Ok(id)
        })
    }

    pub fn add_concrete_localized(&self, row: ConcreteLocalizedAttributesRow) -> ProductResult<()> {
        self.modify(|state| {
            if !state.concretes.contains_key(&row.id_product_concrete) {
                return Err(ProductError::storage(format!(
                    "foreign key violation: product concrete {}",
                    row.id_product_concrete
                )));
            }
            if !state.locales.contains_key(&row.fk_locale) {
                return Err(ProductError::storage(format!(
                    "foreign key violation: locale {}",
                    row.fk_locale
                )));
            }
            state
                .concrete_localized
                .insert((row.id_product_concrete, row.fk_locale), row);
            Ok(())
        })
    }

    pub fn abstract_count(&self) -> usize {
        self.view(|s| s.abstracts.len()).unwrap_or(0)
    }

    pub fn localized_row_count(&self) -> usize {
        self.view(|s| s.localized.len()).unwrap_or(0)
    }

    pub fn price_count(&self) -> usize {
        self.view(|s| s.prices.len()).unwrap_or(0)
    }

    /// Whether any thread holds an open transaction.
    pub fn in_transaction(&self) -> bool {
        self.slot().map(|s| s.owner.is_some()).unwrap_or(false)
    }
}

impl CatalogStore for InMemoryCatalogDatabase {
    fn begin_transaction(&self) -> ProductResult<()> {
        let me = thread::current().id();
        let slot = self.slot()?;
        if slot.owner == Some(me) {
            return Err(ProductError::storage("a transaction is already open"));
        }

        let mut slot = self
            .released
            .wait_while(slot, |slot| slot.owner.is_some())
            .map_err(poisoned)?;
        slot.snapshot = Some(self.state.read().map_err(poisoned)?.clone());
        slot.owner = Some(me);
        Ok(())
    }

    fn commit(&self) -> ProductResult<()> {
        let mut slot = self.slot()?;
        if slot.owner != Some(thread::current().id()) {
            return Err(ProductError::storage("commit without an open transaction"));
        }
        *slot = TxSlot::default();
        drop(slot);
        self.released.notify_all();
        Ok(())
    }

    fn rollback(&self) -> ProductResult<()> {
        let mut slot = self.slot()?;
        if slot.owner != Some(thread::current().id()) {
            return Err(ProductError::storage("rollback without an open transaction"));
        }
        let previous = slot.snapshot.take().unwrap_or_default();
        *self.state.write().map_err(poisoned)? = previous;
        *slot = TxSlot::default();
        drop(slot);
        self.released.notify_all();
        Ok(())
    }

    fn find_abstract_by_sku(&self, sku: &str) -> ProductResult<Option<ProductAbstractRow>> {
        self.view(|state| {
            state
                .abstracts
                .values()
                .find(|row| row.sku == sku)
                .cloned()
        })
    }

    fn find_abstract_by_id(&self, id: ProductAbstractId) -> ProductResult<Option<ProductAbstractRow>> {
        self.view(|state| state.abstracts.get(&id).cloned())
    }

    fn upsert_abstract(&self, record: ProductAbstractRecord) -> ProductResult<ProductAbstractId> {
        self.modify(|state| {
            if let Some(tax_set) = record.fk_tax_set {
                if !state.tax_sets.contains(&tax_set) {
                    return Err(ProductError::storage(format!(
                        "foreign key violation: tax set {tax_set}"
                    )));
                }
            }

            let now = Utc::now();
            match record.id_product_abstract {
                None => {
                    if state.sku_owner(&record.sku).is_some() {
                        return Err(ProductError::DuplicateSku(record.sku));
                    }
                    let id =
                        ProductAbstractId::new(self.next_abstract_id.fetch_add(1, Ordering::SeqCst));
                    state.abstracts.insert(
                        id,
                        ProductAbstractRow {
                            id_product_abstract: id,
                            sku: record.sku,
                            attributes: record.attributes,
                            fk_tax_set: record.fk_tax_set,
                            created_at: now,
                            updated_at: now,
                        },
                    );
                    Ok(id)
                }
                Some(id) => {
                    if matches!(state.sku_owner(&record.sku), Some(owner) if owner != id) {
                        return Err(ProductError::DuplicateSku(record.sku));
                    }
                    let row = state
                        .abstracts
                        .get_mut(&id)
                        .ok_or_else(|| ProductError::product_abstract_not_found(id))?;
                    row.sku = record.sku;
                    row.attributes = record.attributes;
                    row.fk_tax_set = record.fk_tax_set;
                    row.updated_at = now;
                    Ok(id)
                }
            }
        })
    }

    fn find_tax_set_for_abstract(&self, id: ProductAbstractId) -> ProductResult<Option<TaxSetId>> {
        self.view(|state| {
            state
                .abstracts
                .get(&id)
                .and_then(|row| row.fk_tax_set)
                .filter(|tax_set| state.tax_sets.contains(tax_set))
        })
    }

    fn find_localized_attribute_rows(
        &self,
        id: ProductAbstractId,
    ) -> ProductResult<Vec<LocalizedAttributesRow>> {
        self.view(|state| {
            state
                .localized
                .range((id, LocaleId::new(i64::MIN))..=(id, LocaleId::new(i64::MAX)))
                .map(|(_, row)| row.clone())
                .collect()
        })
    }

    fn upsert_localized_attributes(&self, row: LocalizedAttributesRow) -> ProductResult<()> {
        self.modify(|state| {
            if !state.abstracts.contains_key(&row.id_product_abstract) {
                return Err(ProductError::storage(format!(
                    "foreign key violation: product abstract {}",
                    row.id_product_abstract
                )));
            }
            if !state.locales.contains_key(&row.fk_locale) {
                return Err(ProductError::storage(format!(
                    "foreign key violation: locale {}",
                    row.fk_locale
                )));
            }
            state
                .localized
                .insert((row.id_product_abstract, row.fk_locale), row);
            Ok(())
        })
    }

    fn find_concrete_by_sku(&self, sku: &str) -> ProductResult<Option<ProductConcreteRow>> {
        self.view(|state| {
            state
                .concretes
                .values()
                .find(|row| row.sku == sku)
                .cloned()
        })
    }

    fn find_concretes_for_abstract(
        &self,
        id: ProductAbstractId,
    ) -> ProductResult<Vec<ProductConcreteRow>> {
        self.view(|state| {
            state
                .concretes
                .values()
                .filter(|row| row.id_product_abstract == id)
                .cloned()
                .collect()
        })
    }

    fn find_concrete_localized_attribute_rows(
        &self,
        id: ProductConcreteId,
    ) -> ProductResult<Vec<ConcreteLocalizedAttributesRow>> {
        self.view(|state| {
            state
                .concrete_localized
                .range((id, LocaleId::new(i64::MIN))..=(id, LocaleId::new(i64::MAX)))
                .map(|(_, row)| row.clone())
                .collect()
        })
    }
}

impl PriceStore for InMemoryCatalogDatabase {
    fn persist(&self, price: &Price) -> ProductResult<()> {
        let id = price
            .id_product_abstract
            .ok_or_else(ProductError::missing_product_abstract_id)?;

        self.modify(|state| {
            if !state.abstracts.contains_key(&id) {
                return Err(ProductError::storage(format!(
                    "foreign key violation: product abstract {id}"
                )));
            }
            state
                .prices
                .insert((id, price.price_type.clone()), price.clone());
            Ok(())
        })
    }

    fn fetch(&self, id: ProductAbstractId) -> ProductResult<Option<Price>> {
        self.view(|state| {
            state
                .prices
                .get(&(id, self.default_price_type.clone()))
                .or_else(|| {
                    state
                        .prices
                        .iter()
                        .find(|((owner, _), _)| *owner == id)
                        .map(|(_, price)| price)
                })
                .cloned()
        })
    }
}

impl LocaleLookup for InMemoryCatalogDatabase {
    fn by_id(&self, id: LocaleId) -> ProductResult<Locale> {
        self.view(|state| state.locales.get(&id).cloned())?
            .ok_or_else(|| ProductError::locale_not_found(id))
    }
}
