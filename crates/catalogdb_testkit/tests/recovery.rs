//! What a reopened catalog sees.

use catalogdb_core::{
    AttributeType, CatalogState, CoreError, EntityBuilder, EntityContentRequirements,
    EntityIndexKey, EntitySchema, HierarchyIndex, PriceSuperIndex,
};
use catalogdb_testkit::prelude::*;

#[test]
fn warm_up_writes_are_flushed_on_close() {
    let test_db = TestDatabase::file();
    {
        let session = test_db.session();
        for pk in 1..=3 {
            session.upsert_entity(&product(pk, &format!("code-{pk}"))).unwrap();
        }
    }

    let test_db = test_db.reopen();
    assert_eq!(test_db.catalog().state(), CatalogState::WarmingUp);
    let session = test_db.session();
    for pk in 1..=3 {
        assert_eq!(product_code(&session, pk), Some(format!("code-{pk}")));
    }
}

#[test]
fn live_commits_survive_reopen() {
    let test_db = scenarios::live_catalog(2);
    {
        let session = test_db.session();
        session.upsert_entity(&product(2, "renamed")).unwrap();
        assert!(session.delete_entity(PRODUCT, 1).unwrap());
    }

    let test_db = test_db.reopen();
    assert_eq!(test_db.catalog().state(), CatalogState::Alive);
    let session = test_db.session();
    assert_eq!(product_code(&session, 1), None);
    assert_eq!(product_code(&session, 2).as_deref(), Some("renamed"));
    assert!(matches!(
        session.go_live(),
        Err(CoreError::InvalidState { .. })
    ));
}

#[test]
fn file_catalog_survives_reopen_after_go_live() {
    let test_db = TestDatabase::file();
    {
        let session = test_db.session();
        session.upsert_entity(&product(1, "phone")).unwrap();
        session.go_live().unwrap();
        session.upsert_entity(&product(2, "tablet")).unwrap();
    }

    let test_db = test_db.reopen();
    let session = test_db.session();
    assert_eq!(product_code(&session, 1).as_deref(), Some("phone"));
    assert_eq!(product_code(&session, 2).as_deref(), Some("tablet"));
}

#[test]
fn deleted_collection_is_gone_after_reopen() {
    let test_db = scenarios::live_catalog(1);
    let file = test_db.catalog().collection(PRODUCT).unwrap().collection_id().file_name();
    {
        let session = test_db.session();
        assert!(session.delete_collection(PRODUCT).unwrap());
    }
    assert!(!test_db.provider().unwrap().file_names().contains(&file));

    let test_db = test_db.reopen();
    let session = test_db.session();
    assert!(matches!(
        session.collection(PRODUCT),
        Err(CoreError::CollectionNotFound { .. })
    ));
}

#[test]
fn generated_keys_continue_after_reopen() {
    let test_db = TestDatabase::memory();
    let first = {
        let session = test_db.session();
        session
            .create_collection(EntitySchema::new("tag").with_generated_primary_key(true))
            .unwrap();
        session.go_live().unwrap();
        let mut tag = EntityBuilder::new("tag");
        tag.set_attribute("name", "sale");
        session.upsert_entity(&tag.to_mutation()).unwrap().primary_key
    };

    let test_db = test_db.reopen();
    let session = test_db.session();
    let mut tag = EntityBuilder::new("tag");
    tag.set_attribute("name", "new");
    let second = session.upsert_entity(&tag.to_mutation()).unwrap().primary_key;
    assert!(second > first);
}

#[test]
fn schema_and_prices_survive_reopen() {
    let test_db = TestDatabase::memory();
    {
        let session = test_db.session();
        session
            .create_collection(
                EntitySchema::new(PRODUCT).with_attribute("code", AttributeType::String),
            )
            .unwrap();
        session
            .upsert_entity(&priced_product(1, &[("basic", 100), ("vip", 90)]))
            .unwrap();
        session.go_live().unwrap();
    }

    let test_db = test_db.reopen();
    let session = test_db.session();
    let collection = session.collection(PRODUCT).unwrap();
    assert!(collection.schema().attributes.contains_key("code"));

    let entity = session
        .get_entity(PRODUCT, 1, &EntityContentRequirements::all())
        .unwrap()
        .unwrap();
    let selling = entity
        .selling_price("EUR", None, &["vip", "basic"])
        .unwrap()
        .unwrap();
    assert_eq!(selling.key.price_list, "vip");
}

#[test]
fn transaction_ids_keep_increasing_across_reopen() {
    let test_db = scenarios::live_catalog(1);
    let before = test_db.catalog().last_committed_transaction_id();

    let test_db = test_db.reopen();
    {
        let session = test_db.session();
        session.upsert_entity(&product(5, "watch")).unwrap();
    }
    assert!(test_db.catalog().last_committed_transaction_id() > before);
}

#[test]
fn global_index_is_restored_on_reopen() {
    let test_db = scenarios::live_catalog(3).reopen();
    let session = test_db.session();
    let products = session.collection(PRODUCT).unwrap();
    let global = products
        .index(&EntityIndexKey::Global)
        .and_then(|index| index.as_global())
        .unwrap();

    let hierarchy: &HierarchyIndex = global.hierarchy();
    assert_eq!(hierarchy.children(None), vec![1, 2, 3]);
    let prices: &PriceSuperIndex = global.prices();
    assert!(prices.is_empty());
}
