//! Abstract product aggregate and its owned associations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use catalog_core::{Entity, LocaleId, ProductAbstractId, TaxSetId};

/// Free-form attribute map (e.g. `color`, `material`).
///
/// Storage keeps it as an opaque encoded blob; ordering of keys is stable.
pub type Attributes = BTreeMap<String, JsonValue>;

/// A locale as resolved by the locale lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locale {
    pub id_locale: LocaleId,
    pub locale_name: String,
    pub is_active: bool,
}

impl Locale {
    pub fn new(id_locale: LocaleId, locale_name: impl Into<String>) -> Self {
        Self {
            id_locale,
            locale_name: locale_name.into(),
            is_active: true,
        }
    }
}

/// Attributes scoped to one locale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedAttributes {
    pub locale: Locale,
    /// Localized display name.
    pub name: String,
    pub attributes: Attributes,
}

impl LocalizedAttributes {
    pub fn new(locale: Locale, name: impl Into<String>) -> Self {
        Self {
            locale,
            name: name.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Price owned by exactly one abstract product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Owning product; stamped by the manager when the price is persisted.
    pub id_product_abstract: Option<ProductAbstractId>,
    pub price_type: String,
    /// Amount in the smallest currency unit (e.g. cents).
    pub amount: u64,
    /// ISO currency code (e.g. "EUR").
    pub currency: Option<String>,
}

impl Price {
    pub const DEFAULT_TYPE: &'static str = "DEFAULT";

    pub fn new(amount: u64) -> Self {
        Self {
            id_product_abstract: None,
            price_type: Self::DEFAULT_TYPE.to_string(),
            amount,
            currency: None,
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn with_price_type(mut self, price_type: impl Into<String>) -> Self {
        self.price_type = price_type.into();
        self
    }
}

/// Aggregate root: abstract product (the sku-level product, independent of variants).
///
/// This is a transfer-style aggregate: hooks receive it by `&mut` and may
/// change any field before it is persisted, so all fields are public.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProductAbstract {
    /// Assigned by storage on create; never changes afterwards.
    pub id_product_abstract: Option<ProductAbstractId>,
    pub sku: String,
    pub attributes: Attributes,
    pub tax_set_id: Option<TaxSetId>,
    pub price: Option<Price>,
    pub localized_attributes: Vec<LocalizedAttributes>,
}

impl ProductAbstract {
    pub fn new(sku: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_tax_set(mut self, tax_set_id: TaxSetId) -> Self {
        self.tax_set_id = Some(tax_set_id);
        self
    }

    pub fn with_price(mut self, price: Price) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_localized(mut self, localized: LocalizedAttributes) -> Self {
        self.add_localized_attributes(localized);
        self
    }

    /// Add localized attributes, replacing any entry for the same locale.
    pub fn add_localized_attributes(&mut self, localized: LocalizedAttributes) {
        let locale_id = localized.locale.id_locale;
        match self
            .localized_attributes
            .iter_mut()
            .find(|l| l.locale.id_locale == locale_id)
        {
            Some(existing) => *existing = localized,
            None => self.localized_attributes.push(localized),
        }
    }

    pub fn localized_for(&self, locale_id: LocaleId) -> Option<&LocalizedAttributes> {
        self.localized_attributes
            .iter()
            .find(|l| l.locale.id_locale == locale_id)
    }
}

impl Entity for ProductAbstract {
    type Id = ProductAbstractId;

    fn entity_id(&self) -> Option<Self::Id> {
        self.id_product_abstract
    }
}
