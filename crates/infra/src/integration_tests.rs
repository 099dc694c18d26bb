//! Integration tests for the abstract product pipeline.
//!
//! Tests: ProductAbstractManager → hooks → JsonAttributeStore → InMemoryCatalogDatabase
//!
//! Verifies:
//! - Create/read round-trips the whole aggregate (attributes, localized, tax set, price)
//! - Sku uniqueness on create and update
//! - Any failure inside a write rolls back every table it touched
//! - Hooks run in order, per phase, and see each other's changes
//! - Hooks cannot redirect a write to another product id
//! - Concurrent writers are serialized and readers never see uncommitted rows

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;
    use std::time::Duration;

    use serde_json::json;

    use catalog_core::{DomainError, LocaleId, ProductAbstractId, TaxSetId};
    use catalog_products::{
        CatalogStore, ConcreteLocalizedAttributesRow, HookPhase, HookRegistry, Locale,
        LocalizedAttributes, Price, ProductAbstract, ProductAbstractManager, ProductError,
        ProductResult, named,
    };

    use crate::catalog_store::InMemoryCatalogDatabase;
    use crate::context::CatalogContext;

    const DE: LocaleId = LocaleId::new(46);
    const US: LocaleId = LocaleId::new(66);
    const STANDARD_TAX: TaxSetId = TaxSetId::new(1);

    struct Fixture {
        db: Arc<InMemoryCatalogDatabase>,
        context: CatalogContext,
    }

    impl Fixture {
        fn manager(&self) -> &ProductAbstractManager {
            self.context.manager()
        }

        fn assert_empty(&self) {
            assert_eq!(self.db.abstract_count(), 0);
            assert_eq!(self.db.localized_row_count(), 0);
            assert_eq!(self.db.price_count(), 0);
            assert!(!self.db.in_transaction());
        }
    }

    fn setup(hooks: HookRegistry) -> Fixture {
        let db = Arc::new(InMemoryCatalogDatabase::new());
        db.add_locale(Locale::new(DE, "de_DE")).unwrap();
        db.add_locale(Locale::new(US, "en_US")).unwrap();
        db.add_tax_set(STANDARD_TAX).unwrap();

        let context = CatalogContext::with_in_memory(db.clone(), hooks);
        Fixture { db, context }
    }

    fn table(sku: &str) -> ProductAbstract {
        ProductAbstract::new(sku)
            .with_attribute("color", "natural")
            .with_attribute("legs", 4)
            .with_tax_set(STANDARD_TAX)
            .with_price(Price::new(12_900).with_currency("EUR"))
            .with_localized(
                LocalizedAttributes::new(Locale::new(DE, "de_DE"), "Tisch")
                    .with_attribute("material", "Holz"),
            )
            .with_localized(
                LocalizedAttributes::new(Locale::new(US, "en_US"), "Table")
                    .with_attribute("material", "wood"),
            )
    }

    /// Counts events that carry an `error` field.
    struct ErrorEvents(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorEvents {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            if event.metadata().fields().field("error").is_some() {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn failing(reason: &'static str) -> impl Fn(&mut ProductAbstract) -> ProductResult<()> + Send + Sync {
        move |_product: &mut ProductAbstract| Err(ProductError::hook("failing", reason))
    }

    // --- create / read ---------------------------------------------------

    #[test]
    fn create_then_read_round_trips_the_aggregate() {
        let fx = setup(HookRegistry::new());
        let mut product = table("TABLE-1");

        let id = fx.manager().create_product_abstract(&mut product).unwrap();

        assert_eq!(product.id_product_abstract, Some(id));
        assert_eq!(product.price.as_ref().and_then(|p| p.id_product_abstract), Some(id));

        let loaded = fx.manager().get_product_abstract_by_id(id).unwrap().unwrap();
        assert_eq!(loaded, product);
        assert_eq!(loaded.localized_for(DE).map(|l| l.name.as_str()), Some("Tisch"));
        assert_eq!(loaded.attributes.get("legs"), Some(&json!(4)));

        assert_eq!(fx.db.abstract_count(), 1);
        assert_eq!(fx.db.localized_row_count(), 2);
        assert_eq!(fx.db.price_count(), 1);
        assert!(!fx.db.in_transaction());
    }

    #[test]
    fn reading_an_unknown_id_returns_none() {
        let fx = setup(HookRegistry::new());
        assert_eq!(
            fx.manager()
                .get_product_abstract_by_id(ProductAbstractId::new(404))
                .unwrap(),
            None
        );
    }

    #[test]
    fn product_without_price_or_locales_reads_back_bare() {
        let fx = setup(HookRegistry::new());
        let mut product = ProductAbstract::new("BARE-1");

        let id = fx.manager().create_product_abstract(&mut product).unwrap();
        let loaded = fx.manager().get_product_abstract_by_id(id).unwrap().unwrap();

        assert_eq!(loaded.sku, "BARE-1");
        assert!(loaded.attributes.is_empty());
        assert!(loaded.localized_attributes.is_empty());
        assert_eq!(loaded.tax_set_id, None);
        assert_eq!(loaded.price, None);
    }

    #[test]
    fn duplicate_sku_is_rejected_without_partial_rows() {
        let fx = setup(HookRegistry::new());
        fx.manager()
            .create_product_abstract(&mut ProductAbstract::new("TABLE-1"))
            .unwrap();

        let mut duplicate = table("TABLE-1");
        let err = fx.manager().create_product_abstract(&mut duplicate).unwrap_err();

        assert_eq!(err, ProductError::DuplicateSku("TABLE-1".to_string()));
        assert_eq!(duplicate.id_product_abstract, None);
        assert_eq!(fx.db.abstract_count(), 1);
        assert_eq!(fx.db.localized_row_count(), 0);
        assert_eq!(fx.db.price_count(), 0);
        assert!(!fx.db.in_transaction());
    }

    #[test]
    fn blank_sku_is_rejected_before_storage() {
        let fx = setup(HookRegistry::new());

        let err = fx
            .manager()
            .create_product_abstract(&mut ProductAbstract::new("   "))
            .unwrap_err();

        assert!(matches!(err, ProductError::Domain(DomainError::Validation(_))));
        fx.assert_empty();
    }

    #[test]
    fn create_rejects_a_product_that_already_has_an_id() {
        let fx = setup(HookRegistry::new());
        let mut product = ProductAbstract::new("TABLE-1");
        product.id_product_abstract = Some(ProductAbstractId::new(7));

        let err = fx.manager().create_product_abstract(&mut product).unwrap_err();

        assert!(matches!(err, ProductError::Domain(DomainError::Validation(_))));
        fx.assert_empty();
    }

    #[test]
    fn unknown_locale_fails_the_create_and_rolls_back() {
        let fx = setup(HookRegistry::new());
        let mut product = ProductAbstract::new("TABLE-1").with_localized(LocalizedAttributes::new(
            Locale::new(LocaleId::new(999), "xx_XX"),
            "???",
        ));

        let err = fx.manager().create_product_abstract(&mut product).unwrap_err();

        assert!(matches!(err, ProductError::Storage(_)));
        fx.assert_empty();
    }

    // --- save ------------------------------------------------------------

    #[test]
    fn save_without_id_fails_before_touching_storage() {
        let calls = Arc::new(Mutex::new(0));
        let seen = calls.clone();
        let hooks = HookRegistry::new().with(
            HookPhase::BeforeUpdate,
            named("count", move |_p: &mut ProductAbstract| {
                *seen.lock().unwrap() += 1;
                Ok(())
            }),
        );
        let fx = setup(hooks);

        let err = fx
            .manager()
            .save_product_abstract(&mut table("TABLE-1"))
            .unwrap_err();

        assert_eq!(err, ProductError::missing_product_abstract_id());
        assert_eq!(*calls.lock().unwrap(), 0);
        fx.assert_empty();
    }

    #[test]
    fn save_with_unknown_id_is_not_found() {
        let fx = setup(HookRegistry::new());
        let mut product = ProductAbstract::new("GHOST-1");
        product.id_product_abstract = Some(ProductAbstractId::new(99));

        let err = fx.manager().save_product_abstract(&mut product).unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(err, ProductError::product_abstract_not_found(ProductAbstractId::new(99)));
        fx.assert_empty();
    }

    #[test]
    fn save_overwrites_attributes_localized_and_price() {
        let fx = setup(HookRegistry::new());
        let mut product = table("TABLE-1");
        let id = fx.manager().create_product_abstract(&mut product).unwrap();

        product.attributes.insert("color".to_string(), json!("black"));
        product.add_localized_attributes(
            LocalizedAttributes::new(Locale::new(DE, "de_DE"), "Esstisch")
                .with_attribute("material", "Eiche"),
        );
        product.price = Some(Price::new(14_900).with_currency("EUR"));

        assert_eq!(fx.manager().save_product_abstract(&mut product).unwrap(), id);

        let loaded = fx.manager().get_product_abstract_by_id(id).unwrap().unwrap();
        assert_eq!(loaded.attributes.get("color"), Some(&json!("black")));
        assert_eq!(loaded.localized_for(DE).map(|l| l.name.as_str()), Some("Esstisch"));
        assert_eq!(loaded.localized_for(US).map(|l| l.name.as_str()), Some("Table"));
        assert_eq!(loaded.price.map(|p| p.amount), Some(14_900));
        assert_eq!(fx.db.abstract_count(), 1);
        assert_eq!(fx.db.localized_row_count(), 2);
        assert_eq!(fx.db.price_count(), 1);
    }

    #[test]
    fn renaming_to_another_products_sku_is_a_duplicate() {
        let fx = setup(HookRegistry::new());
        fx.manager()
            .create_product_abstract(&mut ProductAbstract::new("TABLE-1"))
            .unwrap();
        let mut chair = ProductAbstract::new("CHAIR-1");
        let chair_id = fx.manager().create_product_abstract(&mut chair).unwrap();

        chair.sku = "TABLE-1".to_string();
        let err = fx.manager().save_product_abstract(&mut chair).unwrap_err();

        assert_eq!(err, ProductError::DuplicateSku("TABLE-1".to_string()));
        let stored = fx.manager().get_product_abstract_by_id(chair_id).unwrap().unwrap();
        assert_eq!(stored.sku, "CHAIR-1");
    }

    #[test]
    fn saving_with_its_own_sku_succeeds() {
        let fx = setup(HookRegistry::new());
        let mut product = table("TABLE-1");
        let id = fx.manager().create_product_abstract(&mut product).unwrap();

        assert_eq!(fx.manager().save_product_abstract(&mut product), Ok(id));
    }

    #[test]
    fn renaming_to_a_free_sku_moves_the_lookup() {
        let fx = setup(HookRegistry::new());
        let mut product = ProductAbstract::new("TABLE-1");
        let id = fx.manager().create_product_abstract(&mut product).unwrap();

        product.sku = "TABLE-2".to_string();
        fx.manager().save_product_abstract(&mut product).unwrap();

        assert_eq!(fx.manager().get_product_abstract_id_by_sku("TABLE-1"), Ok(None));
        assert_eq!(fx.manager().get_product_abstract_id_by_sku("TABLE-2"), Ok(Some(id)));
    }

    #[test]
    fn failing_after_update_hook_restores_the_previous_state() {
        let hooks = HookRegistry::new().with(HookPhase::AfterUpdate, failing("audit unavailable"));
        let fx = setup(hooks);
        let mut product = table("TABLE-1");
        let id = fx.manager().create_product_abstract(&mut product).unwrap();

        product.sku = "TABLE-RENAMED".to_string();
        product.price = Some(Price::new(1));
        let err = fx.manager().save_product_abstract(&mut product).unwrap_err();

        assert_eq!(err, ProductError::hook("failing", "audit unavailable"));
        let stored = fx.manager().get_product_abstract_by_id(id).unwrap().unwrap();
        assert_eq!(stored.sku, "TABLE-1");
        assert_eq!(stored.price.map(|p| p.amount), Some(12_900));
        assert!(!fx.db.in_transaction());
    }

    #[test]
    fn before_update_hook_cannot_redirect_the_write_to_another_product() {
        let redirect = Arc::new(Mutex::new(None));
        let target = redirect.clone();
        let hooks = HookRegistry::new().with(
            HookPhase::BeforeUpdate,
            named("swap-id", move |p: &mut ProductAbstract| {
                p.id_product_abstract = *target.lock().unwrap();
                Ok(())
            }),
        );
        let fx = setup(hooks);
        let other_id = fx.manager().create_product_abstract(&mut table("CHAIR-1")).unwrap();
        let mut product = table("TABLE-1");
        let id = fx.manager().create_product_abstract(&mut product).unwrap();
        *redirect.lock().unwrap() = Some(other_id);

        product.attributes.insert("color".to_string(), json!("black"));
        product.price = Some(Price::new(1));
        let err = fx.manager().save_product_abstract(&mut product).unwrap_err();

        assert!(matches!(err, ProductError::Domain(DomainError::Validation(_))));
        assert_eq!(product.id_product_abstract, Some(id));

        let other = fx.manager().get_product_abstract_by_id(other_id).unwrap().unwrap();
        assert_eq!(other.sku, "CHAIR-1");
        assert_eq!(other.attributes.get("color"), Some(&json!("natural")));
        assert_eq!(other.price.map(|p| p.amount), Some(12_900));

        let stored = fx.manager().get_product_abstract_by_id(id).unwrap().unwrap();
        assert_eq!(stored.attributes.get("color"), Some(&json!("natural")));
        assert_eq!(stored.price.map(|p| p.amount), Some(12_900));
        assert!(!fx.db.in_transaction());
    }

    // --- lookups ---------------------------------------------------------

    #[test]
    fn id_by_sku_and_existence() {
        let fx = setup(HookRegistry::new());
        let id = fx
            .manager()
            .create_product_abstract(&mut ProductAbstract::new("TABLE-1"))
            .unwrap();

        assert_eq!(fx.manager().get_product_abstract_id_by_sku("TABLE-1"), Ok(Some(id)));
        assert_eq!(fx.manager().get_product_abstract_id_by_sku("NOPE"), Ok(None));
        assert_eq!(fx.manager().has_product_abstract("TABLE-1"), Ok(true));
        assert_eq!(fx.manager().has_product_abstract("NOPE"), Ok(false));
    }

    #[test]
    fn abstract_sku_from_concrete() {
        let fx = setup(HookRegistry::new());
        let id = fx
            .manager()
            .create_product_abstract(&mut ProductAbstract::new("TABLE-1"))
            .unwrap();
        fx.db.add_concrete("TABLE-1-BLACK", id, "{}").unwrap();

        assert_eq!(
            fx.manager().get_abstract_sku_from_product_concrete("TABLE-1-BLACK"),
            Ok("TABLE-1".to_string())
        );

        let err = fx
            .manager()
            .get_abstract_sku_from_product_concrete("UNKNOWN")
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err, ProductError::product_concrete_not_found("UNKNOWN"));
    }

    #[test]
    fn attribute_processor_merges_abstract_and_concretes() {
        let fx = setup(HookRegistry::new());
        let id = fx.manager().create_product_abstract(&mut table("TABLE-1")).unwrap();
        let black = fx
            .db
            .add_concrete("TABLE-1-BLACK", id, r#"{"color":"black"}"#)
            .unwrap();
        fx.db
            .add_concrete_localized(ConcreteLocalizedAttributesRow {
                id_product_concrete: black,
                fk_locale: DE,
                name: "Tisch schwarz".to_string(),
                attributes: r#"{"color":"schwarz"}"#.to_string(),
            })
            .unwrap();

        let processor = fx.manager().get_product_attribute_processor(id).unwrap();

        assert_eq!(processor.concrete_skus().collect::<Vec<_>>(), vec!["TABLE-1-BLACK"]);
        let de = processor.merge_concrete("TABLE-1-BLACK", "de_DE");
        assert_eq!(de.get("color"), Some(&json!("schwarz")));
        assert_eq!(de.get("material"), Some(&json!("Holz")));
        assert_eq!(de.get("legs"), Some(&json!(4)));
        let us = processor.merge_concrete("TABLE-1-BLACK", "en_US");
        assert_eq!(us.get("color"), Some(&json!("black")));
        assert_eq!(us.get("material"), Some(&json!("wood")));
    }

    #[test]
    fn attribute_processor_for_unknown_product_is_empty() {
        let fx = setup(HookRegistry::new());
        let processor = fx
            .manager()
            .get_product_attribute_processor(ProductAbstractId::new(5))
            .unwrap();
        assert!(processor.is_empty());
    }

    // --- hooks -----------------------------------------------------------

    #[test]
    fn failing_before_create_hook_persists_nothing() {
        let hooks = HookRegistry::new().with(HookPhase::BeforeCreate, failing("rejected"));
        let fx = setup(hooks);
        let mut product = table("TABLE-1");

        let err = fx.manager().create_product_abstract(&mut product).unwrap_err();

        assert_eq!(err, ProductError::hook("failing", "rejected"));
        assert_eq!(product.id_product_abstract, None);
        fx.assert_empty();
    }

    #[test]
    fn a_failed_create_logs_its_error_once() {
        use tracing_subscriber::layer::SubscriberExt;

        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(ErrorEvents(count.clone()));
        let fx = setup(HookRegistry::new().with(HookPhase::AfterCreate, failing("search index down")));

        let err = tracing::subscriber::with_default(subscriber, || {
            fx.manager().create_product_abstract(&mut table("TABLE-1")).unwrap_err()
        });

        assert_eq!(err, ProductError::hook("failing", "search index down"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn before_create_hook_cannot_assign_an_existing_id() {
        let existing = Arc::new(Mutex::new(None));
        let preset = existing.clone();
        let hooks = HookRegistry::new().with(
            HookPhase::BeforeCreate,
            named("preset-id", move |p: &mut ProductAbstract| {
                if p.sku == "TABLE-2" {
                    p.id_product_abstract = *preset.lock().unwrap();
                }
                Ok(())
            }),
        );
        let fx = setup(hooks);
        let id = fx.manager().create_product_abstract(&mut table("TABLE-1")).unwrap();
        *existing.lock().unwrap() = Some(id);

        let mut product = table("TABLE-2");
        product.price = Some(Price::new(1));
        let err = fx.manager().create_product_abstract(&mut product).unwrap_err();

        assert!(matches!(err, ProductError::Domain(DomainError::Validation(_))));
        assert_eq!(product.id_product_abstract, None);
        assert_eq!(fx.db.abstract_count(), 1);
        assert_eq!(fx.db.localized_row_count(), 2);
        assert_eq!(fx.db.price_count(), 1);
        assert_eq!(fx.manager().has_product_abstract("TABLE-2"), Ok(false));

        let stored = fx.manager().get_product_abstract_by_id(id).unwrap().unwrap();
        assert_eq!(stored.sku, "TABLE-1");
        assert_eq!(stored.price.map(|p| p.amount), Some(12_900));
    }

    #[test]
    fn failing_after_create_hook_rolls_back_row_localized_and_price() {
        let burned = Arc::new(Mutex::new(None));
        let seen = burned.clone();
        let hooks = HookRegistry::new()
            .with(
                HookPhase::AfterCreate,
                named("remember-id", move |p: &mut ProductAbstract| {
                    *seen.lock().unwrap() = p.id_product_abstract;
                    Ok(())
                }),
            )
            .with(HookPhase::AfterCreate, failing("search index down"));
        let fx = setup(hooks);
        let mut product = table("TABLE-1");

        let err = fx.manager().create_product_abstract(&mut product).unwrap_err();

        assert_eq!(err, ProductError::hook("failing", "search index down"));
        fx.assert_empty();
        assert_eq!(fx.manager().has_product_abstract("TABLE-1"), Ok(false));

        // The id handed out inside the failed transaction is gone from the
        // caller's product and is not reused.
        assert_eq!(product.id_product_abstract, None);
        assert_eq!(product.price.as_ref().and_then(|p| p.id_product_abstract), None);
        let burned = burned.lock().unwrap().expect("after-create hook saw an id");
        assert!(fx.db.find_abstract_by_id(burned).unwrap().is_none());
    }

    #[test]
    fn hooks_run_in_registration_order_and_see_earlier_changes() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (first, second, after) = (order.clone(), order.clone(), order.clone());

        let hooks = HookRegistry::new()
            .with(
                HookPhase::BeforeCreate,
                named("first", move |p: &mut ProductAbstract| {
                    first.lock().unwrap().push("first");
                    p.attributes.insert("trail".to_string(), json!("a"));
                    Ok(())
                }),
            )
            .with(
                HookPhase::BeforeCreate,
                named("second", move |p: &mut ProductAbstract| {
                    second.lock().unwrap().push("second");
                    let trail = p.attributes.get("trail").and_then(|v| v.as_str()).unwrap_or("");
                    let trail = format!("{trail}b");
                    p.attributes.insert("trail".to_string(), json!(trail));
                    Ok(())
                }),
            )
            .with(
                HookPhase::AfterCreate,
                named("after", move |p: &mut ProductAbstract| {
                    assert!(p.id_product_abstract.is_some());
                    after.lock().unwrap().push("after");
                    Ok(())
                }),
            );
        let fx = setup(hooks);

        let id = fx
            .manager()
            .create_product_abstract(&mut ProductAbstract::new("TABLE-1"))
            .unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "after"]);
        let loaded = fx.manager().get_product_abstract_by_id(id).unwrap().unwrap();
        assert_eq!(loaded.attributes.get("trail"), Some(&json!("ab")));
    }

    #[test]
    fn update_hooks_do_not_run_on_create() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (create, update) = (calls.clone(), calls.clone());
        let hooks = HookRegistry::new()
            .with(
                HookPhase::BeforeCreate,
                named("create", move |_p: &mut ProductAbstract| {
                    create.lock().unwrap().push("create");
                    Ok(())
                }),
            )
            .with(
                HookPhase::BeforeUpdate,
                named("update", move |_p: &mut ProductAbstract| {
                    update.lock().unwrap().push("update");
                    Ok(())
                }),
            );
        let fx = setup(hooks);

        let mut product = ProductAbstract::new("TABLE-1");
        fx.manager().create_product_abstract(&mut product).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["create"]);

        fx.manager().save_product_abstract(&mut product).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["create", "update"]);
    }

    #[test]
    fn read_hooks_decorate_the_loaded_product_only() {
        let hooks = HookRegistry::new().with(
            HookPhase::Read,
            named("decorate", |p: &mut ProductAbstract| {
                p.attributes.insert("loaded".to_string(), json!(true));
                Ok(())
            }),
        );
        let fx = setup(hooks);
        let id = fx
            .manager()
            .create_product_abstract(&mut ProductAbstract::new("TABLE-1"))
            .unwrap();

        let loaded = fx.manager().get_product_abstract_by_id(id).unwrap().unwrap();
        assert_eq!(loaded.attributes.get("loaded"), Some(&json!(true)));

        let row = fx.db.find_abstract_by_id(id).unwrap().unwrap();
        assert_eq!(row.attributes, "{}");
    }

    #[test]
    fn failing_read_hook_propagates() {
        let hooks = HookRegistry::new().with(HookPhase::Read, failing("read denied"));
        let fx = setup(hooks);
        let id = fx
            .manager()
            .create_product_abstract(&mut ProductAbstract::new("TABLE-1"))
            .unwrap();

        assert_eq!(
            fx.manager().get_product_abstract_by_id(id),
            Err(ProductError::hook("failing", "read denied"))
        );
    }

    // --- concurrency -----------------------------------------------------

    #[test]
    fn concurrent_creates_of_one_sku_persist_exactly_one_row() {
        let hooks = HookRegistry::new().with(
            HookPhase::BeforeCreate,
            named("slow-enrichment", |_p: &mut ProductAbstract| {
                thread::sleep(Duration::from_millis(50));
                Ok(())
            }),
        );
        let fx = setup(hooks);
        let start = Barrier::new(2);

        let outcomes = thread::scope(|s| {
            let first = s.spawn(|| {
                start.wait();
                fx.manager().create_product_abstract(&mut table("TABLE-1"))
            });
            let second = s.spawn(|| {
                start.wait();
                fx.manager().create_product_abstract(&mut table("TABLE-1"))
            });
            [first.join().unwrap(), second.join().unwrap()]
        });

        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| *r == Err(ProductError::DuplicateSku("TABLE-1".to_string()))));
        assert_eq!(fx.db.abstract_count(), 1);
        assert_eq!(fx.db.localized_row_count(), 2);
        assert_eq!(fx.db.price_count(), 1);
        assert!(!fx.db.in_transaction());
    }

    #[test]
    fn uncommitted_create_is_invisible_to_other_threads() {
        let inside = Arc::new(Barrier::new(2));
        let checked = Arc::new(Barrier::new(2));
        let (entered, release) = (inside.clone(), checked.clone());
        let hooks = HookRegistry::new().with(
            HookPhase::AfterCreate,
            named("wait-for-reader", move |_p: &mut ProductAbstract| {
                entered.wait();
                release.wait();
                Err(ProductError::hook("wait-for-reader", "aborted"))
            }),
        );
        let fx = setup(hooks);

        let (visible, count, outcome) = thread::scope(|s| {
            let writer = s.spawn(|| fx.manager().create_product_abstract(&mut table("DIRTY")));
            inside.wait();
            let visible = fx.manager().has_product_abstract("DIRTY");
            let count = fx.db.abstract_count();
            checked.wait();
            (visible, count, writer.join().unwrap())
        });

        assert_eq!(visible, Ok(false));
        assert_eq!(count, 0);
        assert_eq!(outcome, Err(ProductError::hook("wait-for-reader", "aborted")));
        assert_eq!(fx.manager().has_product_abstract("DIRTY"), Ok(false));
        fx.assert_empty();
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeSet;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 64,
                ..ProptestConfig::default()
            })]

            /// Property: every successful create hands out an id never seen before.
            #[test]
            fn created_ids_are_fresh(skus in proptest::collection::btree_set("[A-Z]{2,6}-[0-9]{1,4}", 1..20)) {
                let fx = setup(HookRegistry::new());
                let mut ids = BTreeSet::new();

                for sku in &skus {
                    let id = fx.manager().create_product_abstract(&mut ProductAbstract::new(sku.as_str())).unwrap();
                    prop_assert!(ids.insert(id));
                }
                prop_assert_eq!(fx.db.abstract_count(), skus.len());
            }

            /// Property: a second create with the same sku always fails and changes nothing.
            #[test]
            fn duplicate_creates_never_persist(sku in "[A-Z0-9]{1,20}", attempts in 1usize..5) {
                let fx = setup(HookRegistry::new());
                let id = fx.manager().create_product_abstract(&mut ProductAbstract::new(sku.as_str())).unwrap();

                for _ in 0..attempts {
                    let err = fx.manager().create_product_abstract(&mut table(&sku)).unwrap_err();
                    prop_assert_eq!(err, ProductError::DuplicateSku(sku.clone()));
                }

                prop_assert_eq!(fx.db.abstract_count(), 1);
                prop_assert_eq!(fx.db.localized_row_count(), 0);
                prop_assert_eq!(fx.manager().get_product_abstract_id_by_sku(&sku).unwrap(), Some(id));
            }
        }
    }
}
