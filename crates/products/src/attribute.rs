//! JSON attribute encoding and localized attribute persistence.

use catalog_core::ProductAbstractId;

use crate::error::{ProductError, ProductResult};
use crate::ports::{AttributeStore, CatalogStore, LocalizedAttributesRow};
use crate::product::{Attributes, Locale, LocalizedAttributes};

/// Attribute store that keeps attribute maps as JSON text in the catalog store.
#[derive(Debug, Clone)]
pub struct JsonAttributeStore<S> {
    store: S,
}

impl<S> JsonAttributeStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S> AttributeStore for JsonAttributeStore<S>
where
    S: CatalogStore,
{
    fn encode(&self, attributes: &Attributes) -> ProductResult<String> {
        serde_json::to_string(attributes)
            .map_err(|e| ProductError::attributes(format!("encoding failed: {e}")))
    }

    fn decode(&self, blob: &str) -> ProductResult<Attributes> {
        if blob.trim().is_empty() {
            return Ok(Attributes::new());
        }
        serde_json::from_str(blob)
            .map_err(|e| ProductError::attributes(format!("decoding failed: {e}")))
    }

    fn build_localized_attributes(
        &self,
        row: &LocalizedAttributesRow,
        raw: &str,
        locale: Locale,
    ) -> ProductResult<LocalizedAttributes> {
        Ok(LocalizedAttributes {
            locale,
            name: row.name.clone(),
            attributes: self.decode(raw)?,
        })
    }

    fn persist_localized(
        &self,
        id: ProductAbstractId,
        localized: &[LocalizedAttributes],
    ) -> ProductResult<()> {
        for localized in localized {
            self.store.upsert_localized_attributes(LocalizedAttributesRow {
                id_product_abstract: id,
                fk_locale: localized.locale.id_locale,
                name: localized.name.clone(),
                attributes: self.encode(&localized.attributes)?,
            })?;
        }
        Ok(())
    }
}
