//! Product catalog error taxonomy.

use thiserror::Error;

use catalog_core::{DomainError, LocaleId, ProductAbstractId};

/// Result type used by the manager and every collaborator port.
pub type ProductResult<T> = Result<T, ProductError>;

/// Errors surfaced by catalog operations.
///
/// Collaborator ports return this type directly, so the manager forwards
/// their failures with `?` and never re-wraps them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProductError {
    /// Another abstract product already uses this sku.
    #[error("product abstract with sku '{0}' already exists")]
    DuplicateSku(String),

    /// A record required by the operation does not exist.
    #[error("tried to retrieve {resource} '{key}', but it does not exist")]
    NotFound { resource: &'static str, key: String },

    /// An operation that requires an identifier was called without one.
    #[error("required identifier '{field}' is missing")]
    MissingIdentifier { field: &'static str },

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// An attribute blob could not be encoded or decoded.
    #[error("attribute payload could not be processed: {0}")]
    Attributes(String),

    /// The storage backend failed.
    #[error("storage failure: {0}")]
    Storage(String),

    /// A registered hook aborted the operation.
    #[error("hook '{hook}' rejected the product: {reason}")]
    Hook { hook: String, reason: String },
}

impl ProductError {
    pub fn product_abstract_not_found(id: ProductAbstractId) -> Self {
        Self::NotFound {
            resource: "product abstract",
            key: id.to_string(),
        }
    }

    pub fn product_concrete_not_found(sku: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "product concrete with sku",
            key: sku.into(),
        }
    }

    pub fn locale_not_found(id: LocaleId) -> Self {
        Self::NotFound {
            resource: "locale",
            key: id.to_string(),
        }
    }

    pub fn missing_product_abstract_id() -> Self {
        Self::MissingIdentifier {
            field: "id_product_abstract",
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn attributes(msg: impl Into<String>) -> Self {
        Self::Attributes(msg.into())
    }

    pub fn hook(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Hook {
            hook: hook.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
