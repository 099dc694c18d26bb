//! Process-level wiring: config → database → `ProductAbstractManager`.

use std::sync::Arc;

use anyhow::Context as _;

use catalog_products::{
    CatalogStore, HookRegistry, JsonAttributeStore, LocaleLookup, PriceStore,
    ProductAbstractDeps, ProductAbstractManager, StoreAssertion,
};

use crate::catalog_store::InMemoryCatalogDatabase;
#[cfg(feature = "postgres")]
use crate::catalog_store::PostgresCatalogDatabase;
use crate::config::{CatalogConfig, StoreKind};

/// The database a context was assembled over.
#[derive(Debug, Clone)]
pub enum CatalogDatabase {
    InMemory(Arc<InMemoryCatalogDatabase>),
    #[cfg(feature = "postgres")]
    Postgres(Arc<PostgresCatalogDatabase>),
}

/// A ready-to-use manager plus the database behind it.
#[derive(Debug)]
pub struct CatalogContext {
    manager: ProductAbstractManager,
    database: CatalogDatabase,
}

impl CatalogContext {
    /// Manager over a fresh in-memory database.
    pub fn in_memory(hooks: HookRegistry) -> Self {
        Self::with_in_memory(Arc::new(InMemoryCatalogDatabase::new()), hooks)
    }

    /// Manager over an existing (possibly pre-seeded) in-memory database.
    pub fn with_in_memory(database: Arc<InMemoryCatalogDatabase>, hooks: HookRegistry) -> Self {
        Self {
            manager: assemble(database.clone(), hooks),
            database: CatalogDatabase::InMemory(database),
        }
    }

    /// Load config from the environment, then [`connect`](Self::connect).
    pub fn from_env(hooks: HookRegistry) -> anyhow::Result<Self> {
        let config = CatalogConfig::from_env().context("failed to load catalog configuration")?;
        Self::connect(&config, hooks)
    }

    /// Initialize logging and open the configured database.
    pub fn connect(config: &CatalogConfig, hooks: HookRegistry) -> anyhow::Result<Self> {
        catalog_observability::init_with(&config.log);
        Self::open(config, hooks)
    }

    /// Open the configured database without touching the global subscriber.
    pub fn open(config: &CatalogConfig, hooks: HookRegistry) -> anyhow::Result<Self> {
        config.validate().context("invalid catalog configuration")?;

        let context = match config.store {
            StoreKind::Memory => {
                let database = InMemoryCatalogDatabase::new()
                    .with_default_price_type(config.default_price_type.clone());
                Self::with_in_memory(Arc::new(database), hooks)
            }
            StoreKind::Postgres => Self::connect_postgres(config, hooks)?,
        };

        tracing::info!(store = ?config.store, "catalog context ready");
        Ok(context)
    }

    #[cfg(feature = "postgres")]
    fn connect_postgres(config: &CatalogConfig, hooks: HookRegistry) -> anyhow::Result<Self> {
        let url = config
            .database
            .url
            .as_deref()
            .context("CATALOG_DATABASE_URL is not set")?;

        let database = PostgresCatalogDatabase::connect(url, config.database.max_connections)
            .context("failed to connect to the catalog database")?
            .with_default_price_type(config.default_price_type.clone());
        database
            .ensure_schema()
            .context("failed to prepare the catalog schema")?;

        let database = Arc::new(database);
        Ok(Self {
            manager: assemble(database.clone(), hooks),
            database: CatalogDatabase::Postgres(database),
        })
    }

    #[cfg(not(feature = "postgres"))]
    fn connect_postgres(_config: &CatalogConfig, _hooks: HookRegistry) -> anyhow::Result<Self> {
        anyhow::bail!("CATALOG_STORE=postgres requires catalog-infra to be built with the `postgres` feature")
    }

    pub fn manager(&self) -> &ProductAbstractManager {
        &self.manager
    }

    pub fn database(&self) -> &CatalogDatabase {
        &self.database
    }

    /// The in-memory database, when this context runs on one.
    pub fn in_memory_database(&self) -> Option<&Arc<InMemoryCatalogDatabase>> {
        match &self.database {
            CatalogDatabase::InMemory(db) => Some(db),
            #[cfg(feature = "postgres")]
            CatalogDatabase::Postgres(_) => None,
        }
    }
}

/// Wire every port of the manager to one database so all writes share its transaction.
fn assemble<D>(database: Arc<D>, hooks: HookRegistry) -> ProductAbstractManager
where
    D: CatalogStore + PriceStore + LocaleLookup + 'static,
{
    ProductAbstractManager::new(ProductAbstractDeps {
        store: database.clone(),
        attributes: Arc::new(JsonAttributeStore::new(database.clone())),
        prices: database.clone(),
        locales: database.clone(),
        assertion: Arc::new(StoreAssertion::new(database)),
        hooks,
    })
}
