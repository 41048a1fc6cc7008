//! Sessions used from several threads at once.

use catalogdb_core::{CommitOutcome, CoreError, EntityBuilder, EntityMutation, Session};
use catalogdb_testkit::prelude::*;
use std::sync::Barrier;
use std::thread;

const THREADS: i64 = 4;
const WRITES_PER_THREAD: i64 = 10;

/// Retries `mutation` until no concurrent commit gets in its way.
fn upsert_with_retry(session: &Session, mutation: &EntityMutation) -> usize {
    let mut conflicts = 0;
    loop {
        match session.upsert_entity(mutation) {
            Ok(_) => return conflicts,
            Err(err) if matches!(err.root_cause(), CoreError::TransactionConflict { .. }) => {
                conflicts += 1;
            }
            Err(err) => panic!("upsert failed: {err}"),
        }
    }
}

#[test]
fn conflicting_writers_succeed_on_retry() {
    let test_db = scenarios::live_catalog(1);
    let barrier = Barrier::new(THREADS as usize);

    thread::scope(|scope| {
        for thread_id in 0..THREADS {
            let test_db = &test_db;
            let barrier = &barrier;
            scope.spawn(move || {
                let session = test_db.session();
                barrier.wait();
                for i in 0..WRITES_PER_THREAD {
                    let pk = 100 + thread_id * WRITES_PER_THREAD + i;
                    upsert_with_retry(&session, &product(pk, &format!("t{thread_id}-{i}")));
                }
            });
        }
    });

    let session = test_db.session();
    let collection = session.collection(PRODUCT).unwrap();
    assert_eq!(collection.size(None), 1 + (THREADS * WRITES_PER_THREAD) as usize);
    assert_eq!(product_code(&session, 100).as_deref(), Some("t0-0"));
    assert_eq!(test_db.active_sessions(), 1);
}

#[test]
fn writers_of_different_collections_do_not_conflict() {
    let test_db = TestDatabase::memory();
    {
        let session = test_db.session();
        session.get_or_create_collection("brand").unwrap();
        session.get_or_create_collection(PRODUCT).unwrap();
        session.go_live().unwrap();
    }
    let barrier = Barrier::new(2);

    thread::scope(|scope| {
        for entity_type in ["brand", PRODUCT] {
            let test_db = &test_db;
            let barrier = &barrier;
            scope.spawn(move || {
                let session = test_db.session();
                barrier.wait();
                for pk in 1..=WRITES_PER_THREAD {
                    let mut builder = EntityBuilder::with_primary_key(entity_type, pk);
                    builder.set_attribute("code", format!("{entity_type}-{pk}"));
                    session.upsert_entity(&builder.to_mutation()).unwrap();
                }
            });
        }
    });

    let catalog = test_db.catalog();
    for entity_type in ["brand", PRODUCT] {
        let collection = catalog.collection(entity_type).unwrap();
        assert_eq!(collection.size(None), WRITES_PER_THREAD as usize);
    }
}

#[test]
fn open_transaction_keeps_its_snapshot_while_others_commit() {
    let test_db = scenarios::live_catalog(1);
    let reader = test_db.session();
    reader.begin_transaction().unwrap();
    assert_eq!(product_code(&reader, 1).as_deref(), Some("code-1"));

    thread::scope(|scope| {
        scope.spawn(|| {
            let writer = test_db.session();
            for round in 0..5 {
                writer
                    .upsert_entity(&product(1, &format!("round-{round}")))
                    .unwrap();
            }
        });
    });

    assert_eq!(product_code(&reader, 1).as_deref(), Some("code-1"));
    assert_eq!(reader.commit().unwrap(), CommitOutcome::NothingToCommit);
    assert_eq!(product_code(&reader, 1).as_deref(), Some("round-4"));
}

#[test]
fn stale_explicit_transaction_is_rolled_back() {
    let test_db = scenarios::live_catalog(1);
    let stale = test_db.session();
    stale.begin_transaction().unwrap();
    stale.upsert_entity(&product(1, "stale")).unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            test_db
                .session()
                .upsert_entity(&product(1, "fresh"))
                .unwrap();
        });
    });

    let err = stale.commit().unwrap_err();
    assert!(matches!(
        err.root_cause(),
        CoreError::TransactionConflict { .. }
    ));
    assert!(stale.transaction().is_none());
    assert_eq!(product_code(&stale, 1).as_deref(), Some("fresh"));
}

#[test]
fn sessions_opened_on_many_threads_are_released() {
    let test_db = TestDatabase::memory();
    let barrier = Barrier::new(THREADS as usize);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            let test_db = &test_db;
            let barrier = &barrier;
            scope.spawn(move || {
                let _session = test_db.session();
                barrier.wait();
                assert!(test_db.active_sessions() >= 1);
            });
        }
    });

    assert_eq!(test_db.active_sessions(), 0);
}
