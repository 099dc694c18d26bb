//! Attribute processor: abstract + concrete attributes of one product family.
//!
//! The processor answers "what are the effective attributes of this product in
//! this locale". Precedence, lowest to highest:
//!
//! 1. abstract attributes
//! 2. abstract localized attributes
//! 3. concrete attributes
//! 4. concrete localized attributes

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::product::{Attributes, ProductAbstract};

/// Attributes of one abstract product and its concrete variants.
///
/// Locales are keyed by locale name (e.g. `de_DE`), concretes by sku. Maps are
/// ordered, so merging across several concretes is deterministic (sku order).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeProcessor {
    abstract_attributes: Attributes,
    abstract_localized: BTreeMap<String, Attributes>,
    concrete_attributes: BTreeMap<String, Attributes>,
    concrete_localized: BTreeMap<String, BTreeMap<String, Attributes>>,
}

impl AttributeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the processor with an abstract product's own attributes.
    pub fn for_abstract(product: &ProductAbstract) -> Self {
        let abstract_localized = product
            .localized_attributes
            .iter()
            .map(|l| (l.locale.locale_name.clone(), l.attributes.clone()))
            .collect();

        Self {
            abstract_attributes: product.attributes.clone(),
            abstract_localized,
            ..Self::default()
        }
    }

    pub fn add_concrete(&mut self, sku: impl Into<String>, attributes: Attributes) {
        self.concrete_attributes.insert(sku.into(), attributes);
    }

    pub fn add_concrete_localized(
        &mut self,
        sku: impl Into<String>,
        locale_name: impl Into<String>,
        attributes: Attributes,
    ) {
        self.concrete_localized
            .entry(sku.into())
            .or_default()
            .insert(locale_name.into(), attributes);
    }

    pub fn is_empty(&self) -> bool {
        self.abstract_attributes.is_empty()
            && self.abstract_localized.is_empty()
            && self.concrete_attributes.is_empty()
            && self.concrete_localized.is_empty()
    }

    pub fn abstract_attributes(&self) -> &Attributes {
        &self.abstract_attributes
    }

    pub fn abstract_localized_attributes(&self, locale_name: &str) -> Option<&Attributes> {
        self.abstract_localized.get(locale_name)
    }

    pub fn concrete_attributes(&self, sku: &str) -> Option<&Attributes> {
        self.concrete_attributes.get(sku)
    }

    pub fn concrete_skus(&self) -> impl Iterator<Item = &str> {
        self.concrete_attributes.keys().map(String::as_str)
    }

    /// Union of every attribute key known to the processor.
    pub fn all_keys(&self) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = self.abstract_attributes.keys().cloned().collect();
        for attrs in self.abstract_localized.values() {
            keys.extend(attrs.keys().cloned());
        }
        for attrs in self.concrete_attributes.values() {
            keys.extend(attrs.keys().cloned());
        }
        for per_locale in self.concrete_localized.values() {
            for attrs in per_locale.values() {
                keys.extend(attrs.keys().cloned());
            }
        }
        keys
    }

    /// Effective attributes of the abstract product alone in `locale_name`.
    pub fn merge_abstract(&self, locale_name: &str) -> Attributes {
        let mut merged = self.abstract_attributes.clone();
        if let Some(localized) = self.abstract_localized.get(locale_name) {
            overlay(&mut merged, localized);
        }
        merged
    }

    /// Effective attributes of one concrete variant in `locale_name`.
    pub fn merge_concrete(&self, sku: &str, locale_name: &str) -> Attributes {
        let mut merged = self.merge_abstract(locale_name);
        if let Some(attrs) = self.concrete_attributes.get(sku) {
            overlay(&mut merged, attrs);
        }
        if let Some(attrs) = self
            .concrete_localized
            .get(sku)
            .and_then(|per_locale| per_locale.get(locale_name))
        {
            overlay(&mut merged, attrs);
        }
        merged
    }

    /// Effective attributes of the whole family in `locale_name`.
    pub fn merge(&self, locale_name: &str) -> Attributes {
        let mut merged = self.merge_abstract(locale_name);
        for attrs in self.concrete_attributes.values() {
            overlay(&mut merged, attrs);
        }
        for per_locale in self.concrete_localized.values() {
            if let Some(attrs) = per_locale.get(locale_name) {
                overlay(&mut merged, attrs);
            }
        }
        merged
    }
}

fn overlay(target: &mut Attributes, source: &Attributes) {
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
}
