//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier, if one has been assigned by storage.
    ///
    /// Catalog entities are created before persistence and receive their
    /// identifier from the store, so identity is optional until then.
    fn entity_id(&self) -> Option<Self::Id>;

    /// Whether storage has assigned an identity yet.
    fn is_persisted(&self) -> bool {
        self.entity_id().is_some()
    }
}
