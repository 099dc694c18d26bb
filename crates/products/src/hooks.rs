//! Lifecycle hooks run around product create/update/read.
//!
//! Hooks for a phase run in registration order, synchronously, on the same
//! `&mut ProductAbstract`. A hook may change the aggregate; later hooks (and
//! persistence, for the `Before*` phases) observe the change. The first hook
//! that returns an error stops the phase and the enclosing transaction.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ProductResult;
use crate::product::ProductAbstract;

/// Lifecycle point at which hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookPhase {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    Read,
}

impl HookPhase {
    pub const ALL: [HookPhase; 5] = [
        HookPhase::BeforeCreate,
        HookPhase::AfterCreate,
        HookPhase::BeforeUpdate,
        HookPhase::AfterUpdate,
        HookPhase::Read,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::BeforeCreate => "before_create",
            HookPhase::AfterCreate => "after_create",
            HookPhase::BeforeUpdate => "before_update",
            HookPhase::AfterUpdate => "after_update",
            HookPhase::Read => "read",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A callback registered for one or more lifecycle phases.
pub trait ProductAbstractHook: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn apply(&self, product: &mut ProductAbstract) -> ProductResult<()>;
}

impl<F> ProductAbstractHook for F
where
    F: Fn(&mut ProductAbstract) -> ProductResult<()> + Send + Sync,
{
    fn apply(&self, product: &mut ProductAbstract) -> ProductResult<()> {
        self(product)
    }
}

/// A closure hook with a readable name.
pub struct NamedHook<F> {
    name: String,
    f: F,
}

/// Wrap a closure so it shows up under `name` in logs.
pub fn named<F>(name: impl Into<String>, f: F) -> NamedHook<F>
where
    F: Fn(&mut ProductAbstract) -> ProductResult<()> + Send + Sync,
{
    NamedHook {
        name: name.into(),
        f,
    }
}

impl<F> ProductAbstractHook for NamedHook<F>
where
    F: Fn(&mut ProductAbstract) -> ProductResult<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, product: &mut ProductAbstract) -> ProductResult<()> {
        (self.f)(product)
    }
}

/// Ordered hook lists, one per phase.
#[derive(Clone, Default)]
pub struct HookRegistry {
    phases: BTreeMap<HookPhase, Vec<Arc<dyn ProductAbstractHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook to `phase`.
    pub fn register<H>(&mut self, phase: HookPhase, hook: H) -> &mut Self
    where
        H: ProductAbstractHook + 'static,
    {
        self.register_shared(phase, Arc::new(hook))
    }

    /// Append an already shared hook; the same hook may serve several phases.
    pub fn register_shared(
        &mut self,
        phase: HookPhase,
        hook: Arc<dyn ProductAbstractHook>,
    ) -> &mut Self {
        self.phases.entry(phase).or_default().push(hook);
        self
    }

    /// Builder-style variant of [`HookRegistry::register`].
    pub fn with<H>(mut self, phase: HookPhase, hook: H) -> Self
    where
        H: ProductAbstractHook + 'static,
    {
        self.register(phase, hook);
        self
    }

    pub fn hooks(&self, phase: HookPhase) -> &[Arc<dyn ProductAbstractHook>] {
        self.phases.get(&phase).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self, phase: HookPhase) -> usize {
        self.hooks(phase).len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.values().all(Vec::is_empty)
    }

    /// Run every hook of `phase` in order; stops at the first error.
    pub fn run(&self, phase: HookPhase, product: &mut ProductAbstract) -> ProductResult<()> {
        for hook in self.hooks(phase) {
            tracing::debug!(
                phase = %phase,
                hook = hook.name(),
                sku = %product.sku,
                "running product abstract hook"
            );
            hook.apply(product)?;
        }
        Ok(())
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for phase in HookPhase::ALL {
            let names: Vec<&str> = self.hooks(phase).iter().map(|h| h.name()).collect();
            map.entry(&phase.as_str(), &names);
        }
        map.finish()
    }
}
