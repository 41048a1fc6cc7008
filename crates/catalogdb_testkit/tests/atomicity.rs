//! A commit that fails in storage leaves both the published catalog and
//! the stored catalog exactly as they were.

use catalogdb_core::{CatalogState, Config, CoreError, Database, HEADER_FILE};
use catalogdb_testkit::prelude::*;
use std::sync::Arc;

fn open(provider: &FaultyProvider) -> Database {
    Database::open_with_provider(Arc::new(provider.clone()), TEST_CATALOG, Config::default())
        .unwrap()
}

fn create_live_db(provider: &FaultyProvider) -> Database {
    let db = open(provider);
    let session = db.create_session().unwrap();
    session.upsert_entity(&product(1, "phone")).unwrap();
    session.go_live().unwrap();
    db
}

/// Closes `db` and opens its files again, bypassing fault injection.
fn reopen(db: Database, provider: &FaultyProvider) -> Database {
    provider.plan().reset();
    db.close().unwrap();
    drop(db);
    Database::open_with_provider(
        Arc::new(provider.files().clone()),
        TEST_CATALOG,
        Config::default(),
    )
    .unwrap()
}

fn header_log_len(provider: &FaultyProvider) -> usize {
    provider.files().file(HEADER_FILE).unwrap().data().len()
}

fn assert_storage_failure(err: &CoreError) {
    assert!(matches!(err, CoreError::RollbackFailure { .. }), "{err}");
    assert!(matches!(err.root_cause(), CoreError::Storage(_)), "{err}");
}

#[test]
fn record_store_failure_keeps_published_catalog() {
    let provider = FaultyProvider::new();
    let db = create_live_db(&provider);
    let before = db.catalog();
    let session = db.create_session().unwrap();

    provider.plan().fail_after_appends(0);
    let err = session.upsert_entity(&product(2, "tablet")).unwrap_err();
    assert_storage_failure(&err);

    let after = db.catalog();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(product_code(&session, 2), None);
    assert_eq!(product_code(&session, 1).as_deref(), Some("phone"));

    provider.plan().reset();
    session.upsert_entity(&product(3, "laptop")).unwrap();
    drop(session);

    let db = reopen(db, &provider);
    let session = db.create_session().unwrap();
    assert_eq!(product_code(&session, 1).as_deref(), Some("phone"));
    assert_eq!(product_code(&session, 2), None);
    assert_eq!(product_code(&session, 3).as_deref(), Some("laptop"));
}

#[test]
fn header_failure_writes_no_header() {
    let provider = FaultyProvider::new();
    let db = create_live_db(&provider);
    let last_committed = db.catalog().header().last_committed_transaction_id;
    let log_len = header_log_len(&provider);
    let session = db.create_session().unwrap();

    provider.plan().only_in(HEADER_FILE);
    provider.plan().fail_after_appends(0);
    let err = session.upsert_entity(&product(2, "tablet")).unwrap_err();
    assert_storage_failure(&err);

    assert_eq!(header_log_len(&provider), log_len);
    assert_eq!(
        db.catalog().header().last_committed_transaction_id,
        last_committed
    );
    drop(session);

    let db = reopen(db, &provider);
    assert_eq!(
        db.catalog().header().last_committed_transaction_id,
        last_committed
    );
    let session = db.create_session().unwrap();
    assert_eq!(product_code(&session, 2), None);
}

#[test]
fn torn_header_write_is_cut_back() {
    let provider = FaultyProvider::new();
    let db = create_live_db(&provider);
    let log_len = header_log_len(&provider);
    let session = db.create_session().unwrap();

    provider.plan().only_in(HEADER_FILE);
    provider.plan().set_torn_writes(true);
    provider.plan().fail_after_appends(0);
    assert!(session.upsert_entity(&product(2, "tablet")).is_err());
    assert_eq!(header_log_len(&provider), log_len);

    provider.plan().reset();
    session.upsert_entity(&product(3, "laptop")).unwrap();
    drop(session);

    let db = reopen(db, &provider);
    let session = db.create_session().unwrap();
    assert_eq!(product_code(&session, 2), None);
    assert_eq!(product_code(&session, 3).as_deref(), Some("laptop"));
}

#[test]
fn torn_header_tail_is_dropped_on_open() {
    let provider = FaultyProvider::new();
    let db = create_live_db(&provider);
    let version = db.catalog().version();
    db.close().unwrap();
    drop(db);

    let log_len = header_log_len(&provider);
    provider
        .files()
        .file(HEADER_FILE)
        .unwrap()
        .data_mut()
        .extend_from_slice(&[0x2a, 0x00]);

    let db = open(&provider);
    assert_eq!(db.catalog().version(), version);
    assert_eq!(header_log_len(&provider), log_len);
    let session = db.create_session().unwrap();
    assert_eq!(product_code(&session, 1).as_deref(), Some("phone"));
}

#[test]
fn sync_failure_fails_the_commit() {
    let provider = FaultyProvider::new();
    let db = create_live_db(&provider);
    let version = db.catalog().version();
    let session = db.create_session().unwrap();

    provider.plan().set_fail_on_sync(true);
    let err = session.upsert_entity(&product(2, "tablet")).unwrap_err();
    assert_storage_failure(&err);
    assert_eq!(db.catalog().version(), version);

    provider.plan().reset();
    session.upsert_entity(&product(2, "tablet")).unwrap();
    assert_eq!(db.catalog().version(), version + 1);
}

#[test]
fn failed_flush_keeps_warm_up_writes() {
    let provider = FaultyProvider::new();
    let db = open(&provider);
    let session = db.create_session().unwrap();
    session.upsert_entity(&product(1, "phone")).unwrap();

    provider.plan().fail_after_appends(0);
    let err = session.flush().unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)), "{err}");
    assert_eq!(db.catalog().state(), CatalogState::WarmingUp);
    assert!(db.catalog().is_dirty());
    assert_eq!(product_code(&session, 1).as_deref(), Some("phone"));

    provider.plan().reset();
    session.flush().unwrap();
    assert!(!db.catalog().is_dirty());
    drop(session);

    let db = reopen(db, &provider);
    let session = db.create_session().unwrap();
    assert_eq!(product_code(&session, 1).as_deref(), Some("phone"));
}

#[test]
fn failed_go_live_can_be_retried() {
    let provider = FaultyProvider::new();
    let db = open(&provider);
    let session = db.create_session().unwrap();
    session.upsert_entity(&product(1, "phone")).unwrap();

    provider.plan().fail_after_appends(0);
    assert!(session.go_live().is_err());
    assert_eq!(db.catalog().state(), CatalogState::WarmingUp);

    provider.plan().reset();
    session.go_live().unwrap();
    assert_eq!(db.catalog().state(), CatalogState::Alive);
    drop(session);

    let db = reopen(db, &provider);
    assert_eq!(db.catalog().state(), CatalogState::Alive);
}
