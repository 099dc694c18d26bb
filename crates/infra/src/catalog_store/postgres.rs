//! Postgres-backed catalog database.
//!
//! The catalog ports are synchronous, so this adapter owns a small tokio
//! runtime and drives every SQLx future with `block_on`. It must not be called
//! from inside an async context. The adapter is thread-safe: each calling
//! thread gets its own pooled connection and transaction.
//!
//! ## Transactions
//!
//! `begin_transaction` opens a SQLx transaction and parks it under the calling
//! thread's id. Queries from that thread run on the parked connection until
//! `commit`/`rollback`; queries from any other thread go to the pool and see
//! only committed rows. Concurrent writers are isolated by PostgreSQL itself,
//! so a second insert of the same sku waits for the first and then fails with
//! `23505`.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | ProductError | Scenario |
//! |----------------------|--------------|----------|
//! | `23505` on `catalog_product_abstract.sku` | `DuplicateSku` | concurrent insert of the same sku |
//! | `23505` (other) | `Storage` | other unique constraints |
//! | `23503` | `Storage` | unknown locale / tax set / product reference |
//! | anything else | `Storage` | network errors, pool closed, ... |

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgQueryResult, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::{Builder, Runtime};
use tracing::instrument;

use catalog_core::{LocaleId, ProductAbstractId, ProductConcreteId, TaxSetId};
use catalog_products::{
    CatalogStore, ConcreteLocalizedAttributesRow, Locale, LocaleLookup, LocalizedAttributesRow,
    Price, PriceStore, ProductAbstractRecord, ProductAbstractRow, ProductConcreteRow, ProductError,
    ProductResult,
};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Idempotent schema, one statement per entry.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS catalog_locale (
        id_locale   BIGINT PRIMARY KEY,
        locale_name TEXT NOT NULL UNIQUE,
        is_active   BOOLEAN NOT NULL DEFAULT TRUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS catalog_tax_set (
        id_tax_set BIGINT PRIMARY KEY,
        name       TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS catalog_product_abstract (
        id_product_abstract BIGSERIAL PRIMARY KEY,
        sku                 TEXT NOT NULL,
        attributes          TEXT NOT NULL,
        fk_tax_set          BIGINT NULL REFERENCES catalog_tax_set (id_tax_set),
        created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
        CONSTRAINT catalog_product_abstract_sku_key UNIQUE (sku)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS catalog_product_abstract_localized (
        fk_product_abstract BIGINT NOT NULL REFERENCES catalog_product_abstract (id_product_abstract),
        fk_locale           BIGINT NOT NULL REFERENCES catalog_locale (id_locale),
        name                TEXT NOT NULL,
        attributes          TEXT NOT NULL,
        PRIMARY KEY (fk_product_abstract, fk_locale)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS catalog_product (
        id_product          BIGSERIAL PRIMARY KEY,
        sku                 TEXT NOT NULL UNIQUE,
        fk_product_abstract BIGINT NOT NULL REFERENCES catalog_product_abstract (id_product_abstract),
        attributes          TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS catalog_product_localized (
        fk_product  BIGINT NOT NULL REFERENCES catalog_product (id_product),
        fk_locale   BIGINT NOT NULL REFERENCES catalog_locale (id_locale),
        name        TEXT NOT NULL,
        attributes  TEXT NOT NULL,
        PRIMARY KEY (fk_product, fk_locale)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS catalog_price_product (
        fk_product_abstract BIGINT NOT NULL REFERENCES catalog_product_abstract (id_product_abstract),
        price_type          TEXT NOT NULL,
        amount              BIGINT NOT NULL CHECK (amount >= 0),
        currency            TEXT NULL,
        PRIMARY KEY (fk_product_abstract, price_type)
    )
    "#,
];

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Postgres-backed catalog, price and locale storage.
pub struct PostgresCatalogDatabase {
    pool: PgPool,
    runtime: Runtime,
    transactions: Mutex<HashMap<ThreadId, Transaction<'static, Postgres>>>,
    default_price_type: String,
}

impl std::fmt::Debug for PostgresCatalogDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCatalogDatabase")
            .field("pool", &self.pool)
            .field("in_transaction", &self.in_transaction())
            .field("default_price_type", &self.default_price_type)
            .finish()
    }
}

impl PostgresCatalogDatabase {
    /// Connect a pool of at most `max_connections` connections.
    pub fn connect(database_url: &str, max_connections: u32) -> ProductResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| ProductError::storage(format!("failed to create runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(database_url),
            )
            .map_err(map_sqlx_error)?;

        Ok(Self {
            pool,
            runtime,
            transactions: Mutex::new(HashMap::new()),
            default_price_type: Price::DEFAULT_TYPE.to_string(),
        })
    }

    pub fn with_default_price_type(mut self, price_type: impl Into<String>) -> Self {
        self.default_price_type = price_type.into();
        self
    }

    /// Create the catalog tables if they do not exist yet.
    pub fn ensure_schema(&self) -> ProductResult<()> {
        for statement in SCHEMA {
            self.execute(sqlx::query(statement)).map_err(map_sqlx_error)?;
        }
        Ok(())
    }

    pub fn upsert_locale(&self, locale: &Locale) -> ProductResult<()> {
        self.execute(
            sqlx::query(
                r#"
                INSERT INTO catalog_locale (id_locale, locale_name, is_active)
                VALUES ($1, $2, $3)
                ON CONFLICT (id_locale)
                DO UPDATE SET locale_name = EXCLUDED.locale_name, is_active = EXCLUDED.is_active
                "#,
            )
            .bind(locale.id_locale.get())
            .bind(&locale.locale_name)
            .bind(locale.is_active),
        )
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    pub fn upsert_tax_set(&self, id: TaxSetId, name: &str) -> ProductResult<()> {
        self.execute(
            sqlx::query(
                r#"
                INSERT INTO catalog_tax_set (id_tax_set, name)
                VALUES ($1, $2)
                ON CONFLICT (id_tax_set) DO UPDATE SET name = EXCLUDED.name
                "#,
            )
            .bind(id.get())
            .bind(name),
        )
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Whether the calling thread holds an open transaction.
    pub fn in_transaction(&self) -> bool {
        self.transactions
            .lock()
            .map(|txs| txs.contains_key(&thread::current().id()))
            .unwrap_or(false)
    }

    fn lock_transactions(
        &self,
    ) -> ProductResult<MutexGuard<'_, HashMap<ThreadId, Transaction<'static, Postgres>>>> {
        self.transactions
            .lock()
            .map_err(|_| ProductError::storage("lock poisoned"))
    }

    fn take_transaction(&self) -> sqlx::Result<Option<Transaction<'static, Postgres>>> {
        let mut txs = self
            .lock_transactions()
            .map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
        Ok(txs.remove(&thread::current().id()))
    }

    fn park_transaction(&self, tx: Transaction<'static, Postgres>) -> sqlx::Result<()> {
        let mut txs = self
            .lock_transactions()
            .map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
        txs.insert(thread::current().id(), tx);
        Ok(())
    }

    fn execute(&self, query: PgQuery<'_>) -> sqlx::Result<PgQueryResult> {
        match self.take_transaction()? {
            Some(mut tx) => {
                let result = self.runtime.block_on(query.execute(&mut *tx));
                self.park_transaction(tx)?;
                result
            }
            None => self.runtime.block_on(query.execute(&self.pool)),
        }
    }

    fn fetch_optional(&self, query: PgQuery<'_>) -> sqlx::Result<Option<PgRow>> {
        match self.take_transaction()? {
            Some(mut tx) => {
                let result = self.runtime.block_on(query.fetch_optional(&mut *tx));
                self.park_transaction(tx)?;
                result
            }
            None => self.runtime.block_on(query.fetch_optional(&self.pool)),
        }
    }

    fn fetch_all(&self, query: PgQuery<'_>) -> sqlx::Result<Vec<PgRow>> {
        match self.take_transaction()? {
            Some(mut tx) => {
                let result = self.runtime.block_on(query.fetch_all(&mut *tx));
                self.park_transaction(tx)?;
                result
            }
            None => self.runtime.block_on(query.fetch_all(&self.pool)),
        }
    }
}

impl CatalogStore for PostgresCatalogDatabase {
    fn begin_transaction(&self) -> ProductResult<()> {
        if self.in_transaction() {
            return Err(ProductError::storage("a transaction is already open"));
        }
        let tx = self
            .runtime
            .block_on(self.pool.begin())
            .map_err(map_sqlx_error)?;
        self.park_transaction(tx).map_err(map_sqlx_error)
    }

    fn commit(&self) -> ProductResult<()> {
        let tx = self
            .take_transaction()
            .map_err(map_sqlx_error)?
            .ok_or_else(|| ProductError::storage("commit without an open transaction"))?;
        self.runtime.block_on(tx.commit()).map_err(map_sqlx_error)
    }

    fn rollback(&self) -> ProductResult<()> {
        let tx = self
            .take_transaction()
            .map_err(map_sqlx_error)?
            .ok_or_else(|| ProductError::storage("rollback without an open transaction"))?;
        self.runtime.block_on(tx.rollback()).map_err(map_sqlx_error)
    }

    fn find_abstract_by_sku(&self, sku: &str) -> ProductResult<Option<ProductAbstractRow>> {
        let row = self
            .fetch_optional(
                sqlx::query(
                    r#"
                    SELECT id_product_abstract, sku, attributes, fk_tax_set, created_at, updated_at
                    FROM catalog_product_abstract
                    WHERE sku = $1
                    "#,
                )
                .bind(sku),
            )
            .map_err(map_sqlx_error)?;
        row.as_ref().map(abstract_row).transpose()
    }

    fn find_abstract_by_id(&self, id: ProductAbstractId) -> ProductResult<Option<ProductAbstractRow>> {
        let row = self
            .fetch_optional(
                sqlx::query(
                    r#"
                    SELECT id_product_abstract, sku, attributes, fk_tax_set, created_at, updated_at
                    FROM catalog_product_abstract
                    WHERE id_product_abstract = $1
                    "#,
                )
                .bind(id.get()),
            )
            .map_err(map_sqlx_error)?;
        row.as_ref().map(abstract_row).transpose()
    }

    #[instrument(skip(self, record), fields(sku = %record.sku))]
    fn upsert_abstract(&self, record: ProductAbstractRecord) -> ProductResult<ProductAbstractId> {
        let sku = record.sku.clone();
        let fk_tax_set = record.fk_tax_set.map(|t| t.get());

        let row = match record.id_product_abstract {
            None => self.fetch_optional(
                sqlx::query(
                    r#"
                    INSERT INTO catalog_product_abstract (sku, attributes, fk_tax_set)
                    VALUES ($1, $2, $3)
                    RETURNING id_product_abstract
                    "#,
                )
                .bind(&record.sku)
                .bind(&record.attributes)
                .bind(fk_tax_set),
            ),
            Some(id) => self.fetch_optional(
                sqlx::query(
                    r#"
                    UPDATE catalog_product_abstract
                    SET sku = $2, attributes = $3, fk_tax_set = $4, updated_at = now()
                    WHERE id_product_abstract = $1
                    RETURNING id_product_abstract
                    "#,
                )
                .bind(id.get())
                .bind(&record.sku)
                .bind(&record.attributes)
                .bind(fk_tax_set),
            ),
        }
        .map_err(|e| map_sku_error(e, &sku))?;

        match (row, record.id_product_abstract) {
            (Some(row), _) => Ok(ProductAbstractId::new(
                row.try_get::<i64, _>("id_product_abstract")
                    .map_err(map_sqlx_error)?,
            )),
            (None, Some(id)) => Err(ProductError::product_abstract_not_found(id)),
            (None, None) => Err(ProductError::storage("insert returned no identifier")),
        }
    }

    fn find_tax_set_for_abstract(&self, id: ProductAbstractId) -> ProductResult<Option<TaxSetId>> {
        let row = self
            .fetch_optional(
                sqlx::query(
                    r#"
                    SELECT t.id_tax_set
                    FROM catalog_product_abstract p
                    JOIN catalog_tax_set t ON t.id_tax_set = p.fk_tax_set
                    WHERE p.id_product_abstract = $1
                    "#,
                )
                .bind(id.get()),
            )
            .map_err(map_sqlx_error)?;

        row.map(|r| r.try_get::<i64, _>("id_tax_set").map(TaxSetId::new))
            .transpose()
            .map_err(map_sqlx_error)
    }

    fn find_localized_attribute_rows(
        &self,
        id: ProductAbstractId,
    ) -> ProductResult<Vec<LocalizedAttributesRow>> {
        let rows = self
            .fetch_all(
                sqlx::query(
                    r#"
                    SELECT fk_product_abstract, fk_locale, name, attributes
                    FROM catalog_product_abstract_localized
                    WHERE fk_product_abstract = $1
                    ORDER BY fk_locale ASC
                    "#,
                )
                .bind(id.get()),
            )
            .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                Ok(LocalizedAttributesRow {
                    id_product_abstract: ProductAbstractId::new(row.try_get("fk_product_abstract")?),
                    fk_locale: LocaleId::new(row.try_get("fk_locale")?),
                    name: row.try_get("name")?,
                    attributes: row.try_get("attributes")?,
                })
            })
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(map_sqlx_error)
    }

    fn upsert_localized_attributes(&self, row: LocalizedAttributesRow) -> ProductResult<()> {
        self.execute(
            sqlx::query(
                r#"
                INSERT INTO catalog_product_abstract_localized (fk_product_abstract, fk_locale, name, attributes)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (fk_product_abstract, fk_locale)
                DO UPDATE SET name = EXCLUDED.name, attributes = EXCLUDED.attributes
                "#,
            )
            .bind(row.id_product_abstract.get())
            .bind(row.fk_locale.get())
            .bind(&row.name)
            .bind(&row.attributes),
        )
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    fn find_concrete_by_sku(&self, sku: &str) -> ProductResult<Option<ProductConcreteRow>> {
        let row = self
            .fetch_optional(
                sqlx::query(
                    r#"
                    SELECT id_product, sku, fk_product_abstract, attributes
                    FROM catalog_product
                    WHERE sku = $1
                    "#,
                )
                .bind(sku),
            )
            .map_err(map_sqlx_error)?;
        row.as_ref().map(concrete_row).transpose()
    }

    fn find_concretes_for_abstract(
        &self,
        id: ProductAbstractId,
    ) -> ProductResult<Vec<ProductConcreteRow>> {
        let rows = self
            .fetch_all(
                sqlx::query(
                    r#"
                    SELECT id_product, sku, fk_product_abstract, attributes
                    FROM catalog_product
                    WHERE fk_product_abstract = $1
                    ORDER BY id_product ASC
                    "#,
                )
                .bind(id.get()),
            )
            .map_err(map_sqlx_error)?;
        rows.iter().map(concrete_row).collect()
    }

    fn find_concrete_localized_attribute_rows(
        &self,
        id: ProductConcreteId,
    ) -> ProductResult<Vec<ConcreteLocalizedAttributesRow>> {
        let rows = self
            .fetch_all(
                sqlx::query(
                    r#"
                    SELECT fk_product, fk_locale, name, attributes
                    FROM catalog_product_localized
                    WHERE fk_product = $1
                    ORDER BY fk_locale ASC
                    "#,
                )
                .bind(id.get()),
            )
            .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                Ok(ConcreteLocalizedAttributesRow {
                    id_product_concrete: ProductConcreteId::new(row.try_get("fk_product")?),
                    fk_locale: LocaleId::new(row.try_get("fk_locale")?),
                    name: row.try_get("name")?,
                    attributes: row.try_get("attributes")?,
                })
            })
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(map_sqlx_error)
    }
}

impl PriceStore for PostgresCatalogDatabase {
    fn persist(&self, price: &Price) -> ProductResult<()> {
        let id = price
            .id_product_abstract
            .ok_or_else(ProductError::missing_product_abstract_id)?;
        let amount = i64::try_from(price.amount)
            .map_err(|_| ProductError::storage(format!("price amount {} out of range", price.amount)))?;

        self.execute(
            sqlx::query(
                r#"
                INSERT INTO catalog_price_product (fk_product_abstract, price_type, amount, currency)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (fk_product_abstract, price_type)
                DO UPDATE SET amount = EXCLUDED.amount, currency = EXCLUDED.currency
                "#,
            )
            .bind(id.get())
            .bind(&price.price_type)
            .bind(amount)
            .bind(price.currency.as_deref()),
        )
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    fn fetch(&self, id: ProductAbstractId) -> ProductResult<Option<Price>> {
        let row = self
            .fetch_optional(
                sqlx::query(
                    r#"
                    SELECT fk_product_abstract, price_type, amount, currency
                    FROM catalog_price_product
                    WHERE fk_product_abstract = $1
                    ORDER BY (price_type = $2) DESC, price_type ASC
                    LIMIT 1
                    "#,
                )
                .bind(id.get())
                .bind(&self.default_price_type),
            )
            .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let amount: i64 = row.try_get("amount").map_err(map_sqlx_error)?;
        Ok(Some(Price {
            id_product_abstract: Some(ProductAbstractId::new(
                row.try_get("fk_product_abstract").map_err(map_sqlx_error)?,
            )),
            price_type: row.try_get("price_type").map_err(map_sqlx_error)?,
            amount: u64::try_from(amount)
                .map_err(|_| ProductError::storage(format!("negative price amount {amount}")))?,
            currency: row.try_get("currency").map_err(map_sqlx_error)?,
        }))
    }
}

impl LocaleLookup for PostgresCatalogDatabase {
    fn by_id(&self, id: LocaleId) -> ProductResult<Locale> {
        let row = self
            .fetch_optional(
                sqlx::query(
                    r#"
                    SELECT id_locale, locale_name, is_active
                    FROM catalog_locale
                    WHERE id_locale = $1
                    "#,
                )
                .bind(id.get()),
            )
            .map_err(map_sqlx_error)?
            .ok_or_else(|| ProductError::locale_not_found(id))?;

        Ok(Locale {
            id_locale: LocaleId::new(row.try_get("id_locale").map_err(map_sqlx_error)?),
            locale_name: row.try_get("locale_name").map_err(map_sqlx_error)?,
            is_active: row.try_get("is_active").map_err(map_sqlx_error)?,
        })
    }
}

fn abstract_row(row: &PgRow) -> ProductResult<ProductAbstractRow> {
    let map = |row: &PgRow| -> sqlx::Result<ProductAbstractRow> {
        Ok(ProductAbstractRow {
            id_product_abstract: ProductAbstractId::new(row.try_get("id_product_abstract")?),
            sku: row.try_get("sku")?,
            attributes: row.try_get("attributes")?,
            fk_tax_set: row.try_get::<Option<i64>, _>("fk_tax_set")?.map(TaxSetId::new),
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    };
    map(row).map_err(map_sqlx_error)
}

fn concrete_row(row: &PgRow) -> ProductResult<ProductConcreteRow> {
    let map = |row: &PgRow| -> sqlx::Result<ProductConcreteRow> {
        Ok(ProductConcreteRow {
            id_product_concrete: ProductConcreteId::new(row.try_get("id_product")?),
            sku: row.try_get("sku")?,
            id_product_abstract: ProductAbstractId::new(row.try_get("fk_product_abstract")?),
            attributes: row.try_get("attributes")?,
        })
    };
    map(row).map_err(map_sqlx_error)
}

fn database_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// Map writes to the abstract product table, surfacing sku collisions.
fn map_sku_error(err: sqlx::Error, sku: &str) -> ProductError {
    if database_code(&err).as_deref() == Some(UNIQUE_VIOLATION) {
        return ProductError::DuplicateSku(sku.to_string());
    }
    map_sqlx_error(err)
}

fn map_sqlx_error(err: sqlx::Error) -> ProductError {
    match database_code(&err).as_deref() {
        Some(UNIQUE_VIOLATION) => ProductError::storage(format!("unique violation: {err}")),
        Some(FOREIGN_KEY_VIOLATION) => ProductError::storage(format!("foreign key violation: {err}")),
        _ => ProductError::storage(err.to_string()),
    }
}
