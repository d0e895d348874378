//! End-to-end tests for replicated collections

mod common;

use common::{init_test_logging, replica};
use serde_json::json;
use synapsed_versioning::{
    ActorId, ApplyOutcome, DocumentStore, MemoryStore, UndoOutcome, VersionVector,
    VersionedCollection, VersioningConfig, VersioningError,
};
use tokio::sync::mpsc;

/// Deliver every message of a receipt to another replica
fn deliver(messages: &[bytes::Bytes], to: &mut VersionedCollection) {
    for message in messages {
        to.apply_remote_bytes(message).unwrap();
    }
}

#[test]
fn test_concurrent_titles_converge_over_the_wire() {
    init_test_logging();
    let mut a = replica("A");
    let mut b = replica("B");
    a.create("doc");
    b.create("doc");

    let draft = a.set("doc", "title", json!("Draft")).unwrap();
    let fin = b.set("doc", "title", json!("Final")).unwrap();
    assert_eq!(draft.counter, 1);
    assert_eq!(fin.counter, 1);

    deliver(&fin.messages, &mut a);
    deliver(&draft.messages, &mut b);

    let title_a = a.get("doc").unwrap().value("title");
    let title_b = b.get("doc").unwrap().value("title");
    assert_eq!(title_a, title_b);
    assert_eq!(title_a, Some(json!("Final")));
}

#[test]
fn test_later_write_wins_after_seeing_earlier_one() {
    // "A" < "B", but B's write happened after seeing A's and carries a higher counter
    let mut a = replica("B");
    let mut b = replica("A");
    a.create("doc");

    let first = a.set("doc", "title", json!("first")).unwrap();
    deliver(&first.messages, &mut b);
    let second = b.set("doc", "title", json!("second")).unwrap();
    assert!(second.counter > first.counter);

    deliver(&second.messages, &mut a);
    assert_eq!(a.get("doc").unwrap().value("title"), Some(json!("second")));
}

#[test]
fn test_transaction_with_deleted_document_has_no_effect() {
    init_test_logging();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut notes = replica("A");
    notes.connect_outbound(tx);
    notes.create("one");
    notes.create("two");

    let mut txn = notes.begin();
    txn.set("one", "x", json!(1)).set("two", "y", json!(2));
    notes.delete("two");

    let err = notes.commit(txn).unwrap_err();
    assert!(matches!(err, VersioningError::TransactionAborted { .. }));
    assert!(matches!(
        err.root_cause(),
        VersioningError::UnknownDocument { .. }
    ));

    let one = notes.get("one").unwrap();
    assert_eq!(one.value("x"), None);
    assert!(!one.history().can_undo());
    assert!(!notes.contains("two"));
    assert_eq!(notes.clock(), 0);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_failed_intent_aborts_whole_transaction() {
    let mut notes = replica("A");
    notes.create("doc");
    notes.add_to_set("doc", "tags", json!("red")).unwrap();

    let mut txn = notes.begin();
    txn.set("doc", "title", json!("changed"))
        .remove_from_set("doc", "tags", json!("blue"));
    let err = notes.commit(txn).unwrap_err();

    assert!(matches!(
        err.root_cause(),
        VersioningError::InvalidOperation(_)
    ));
    let doc = notes.get("doc").unwrap();
    assert_eq!(doc.value("title"), None);
    assert_eq!(doc.history().undo_len(), 1);
}

#[test]
fn test_multi_document_transaction_undoes_as_one() {
    let mut notes = replica("A");
    notes.create("one");
    notes.create("two");
    let mut txn = notes.begin();
    txn.set("one", "x", json!(1)).set("two", "y", json!(2));
    notes.commit(txn).unwrap();

    let before = (
        notes.get("one").unwrap().to_json(),
        notes.get("two").unwrap().to_json(),
    );

    let undo = notes.undo("two").unwrap();
    assert_eq!(undo.changes().len(), 2);
    assert_eq!(notes.get("one").unwrap().value("x"), Some(json!(null)));
    assert_eq!(notes.get("two").unwrap().value("y"), Some(json!(null)));

    let redo = notes.redo("one").unwrap();
    assert!(redo.is_applied());
    let after = (
        notes.get("one").unwrap().to_json(),
        notes.get("two").unwrap().to_json(),
    );
    assert_eq!(before, after);
}

#[test]
fn test_undo_skips_field_overwritten_remotely() {
    init_test_logging();
    let mut alice = replica("alice");
    let mut bob = replica("bob");
    alice.create("doc");

    let draft = alice.set("doc", "title", json!("Draft")).unwrap();
    deliver(&draft.messages, &mut bob);
    let fin = bob.set("doc", "title", json!("Final")).unwrap();
    deliver(&fin.messages, &mut alice);

    let outcome = alice.undo("doc").unwrap();
    match &outcome {
        UndoOutcome::Skipped { conflicts } => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].field, "title");
            assert_eq!(conflicts[0].modified_by, Some(ActorId::from("bob")));
        }
        other => panic!("expected skipped undo, got {:?}", other),
    }
    assert_eq!(alice.get("doc").unwrap().value("title"), Some(json!("Final")));
    assert!(!alice.get("doc").unwrap().history().can_undo());
}

#[test]
fn test_undo_applies_untouched_fields_and_reports_conflicts() {
    let mut alice = replica("alice");
    let mut bob = replica("bob");
    alice.create("doc");

    let mut txn = alice.begin();
    txn.set("doc", "title", json!("Draft"))
        .insert_at("doc", "items", 0, json!("first"));
    let edit = alice.commit(txn).unwrap();
    deliver(&edit.messages, &mut bob);

    let fin = bob.set("doc", "title", json!("Final")).unwrap();
    deliver(&fin.messages, &mut alice);

    let outcome = alice.undo("doc").unwrap();
    assert!(outcome.is_applied());
    assert_eq!(outcome.conflicts().len(), 1);

    let doc = alice.get("doc").unwrap();
    assert_eq!(doc.value("title"), Some(json!("Final")));
    assert_eq!(doc.value("items"), Some(json!([])));
}

#[test]
fn test_undo_replicates_to_other_replicas() {
    let mut alice = replica("alice");
    let mut bob = replica("bob");
    let (tx, mut rx) = mpsc::unbounded_channel();
    alice.connect_outbound(tx);
    alice.create("doc");

    alice.set("doc", "title", json!("one")).unwrap();
    alice.set("doc", "title", json!("two")).unwrap();
    alice.undo("doc").unwrap();

    let report = bob.drain_inbound(&mut rx);
    assert_eq!(report.applied, 3);
    assert_eq!(bob.get("doc").unwrap().value("title"), Some(json!("one")));
    assert!(!bob.get("doc").unwrap().history().can_undo());
}

#[test]
fn test_redelivery_is_idempotent() {
    let mut alice = replica("alice");
    let mut bob = replica("bob");
    let (tx, mut rx) = mpsc::unbounded_channel();
    alice.connect_outbound(tx.clone());
    alice.create("doc");

    let receipt = alice.add_to_set("doc", "tags", json!("urgent")).unwrap();
    tx.send(receipt.messages[0].clone()).unwrap();

    let report = bob.drain_inbound(&mut rx);
    assert_eq!(report.applied, 1);
    assert_eq!(report.stale, 1);

    let snapshot = bob.get("doc").unwrap().clone();
    assert_eq!(
        bob.apply_remote_change(&receipt.changes[0]).unwrap(),
        ApplyOutcome::AlreadyApplied
    );
    assert_eq!(bob.get("doc").unwrap(), &snapshot);
}

#[test]
fn test_transaction_delivered_one_operation_at_a_time() {
    init_test_logging();
    let mut a = replica("A");
    let mut b = replica("B");
    a.create("doc");

    let mut txn = a.begin();
    txn.set("doc", "x", json!(1)).set("doc", "y", json!(2));
    let receipt = a.commit(txn).unwrap();

    let codec = a.codec();
    let singles: Vec<_> = receipt.changes[0]
        .operations
        .iter()
        .map(|op| codec.decode(&codec.encode(op).unwrap()).unwrap())
        .collect();
    let outcomes: Vec<ApplyOutcome> = singles
        .iter()
        .map(|op| b.apply_remote(op).unwrap())
        .collect();
    assert_eq!(outcomes, vec![ApplyOutcome::Applied, ApplyOutcome::Applied]);
    assert_eq!(b.get("doc").unwrap().to_json(), a.get("doc").unwrap().to_json());

    // Every operation redelivered, singly or as the whole change, is stale
    for op in &singles {
        assert_eq!(b.apply_remote(op).unwrap(), ApplyOutcome::AlreadyApplied);
    }
    assert_eq!(
        b.apply_remote_change(&receipt.changes[0]).unwrap(),
        ApplyOutcome::AlreadyApplied
    );
}

#[test]
fn test_remote_counter_cannot_exhaust_local_clock() {
    let mut alice = replica("alice");
    let mut bob = replica("bob");
    alice.create("doc");
    let receipt = alice.set("doc", "t", json!("x")).unwrap();

    let mut hostile = receipt.changes[0].clone();
    hostile.counter = u64::MAX;
    for op in &mut hostile.operations {
        op.counter = u64::MAX;
    }
    assert!(matches!(
        bob.apply_remote_change(&hostile),
        Err(VersioningError::MalformedOperation(_))
    ));
    assert!(!bob.contains("doc"));

    bob.apply_remote_change(&receipt.changes[0]).unwrap();
    let edit = bob.set("doc", "t", json!("y")).unwrap();
    assert_eq!(edit.counter, receipt.counter + 1);
}

#[test]
fn test_exhausted_clock_refuses_local_edits() {
    let mut alice = replica("alice");
    let mut bob = replica("bob");
    alice.create("doc");
    let first = alice.set("doc", "t", json!("x")).unwrap();

    let mut last = first.changes[0].clone();
    last.counter = synapsed_versioning::MAX_COUNTER;
    for op in &mut last.operations {
        op.counter = last.counter;
    }
    bob.create("doc");
    bob.set("doc", "mine", json!(1)).unwrap();
    assert_eq!(bob.apply_remote_change(&last).unwrap(), ApplyOutcome::Applied);

    let err = bob.set("doc", "t", json!("y")).unwrap_err();
    assert!(matches!(err.root_cause(), VersioningError::InvalidOperation(_)));
    assert!(matches!(
        bob.undo("doc"),
        Err(VersioningError::InvalidOperation(_))
    ));
    // Nothing changed and the undo entry is still there
    assert_eq!(bob.get("doc").unwrap().value("t"), Some(json!("x")));
    assert!(bob.get("doc").unwrap().history().can_undo());
}

#[test]
fn test_inserted_foreign_document_is_not_undoable() {
    let mut alice = replica("alice");
    let mut bob = replica("bob");
    alice.create("doc");
    alice.set("doc", "title", json!("Draft")).unwrap();
    let copy = alice.get("doc").unwrap().clone();
    assert!(copy.history().can_undo());

    let inserted = bob.insert(copy);
    assert!(!inserted.history().can_undo());
    assert!(bob.undo("doc").unwrap().is_empty());
    assert_eq!(bob.get("doc").unwrap().value("title"), Some(json!("Draft")));
}

#[test]
fn test_late_change_for_deleted_document_is_discarded() {
    let mut alice = replica("alice");
    let mut bob = replica("bob");
    alice.create("doc");
    let receipt = alice.set("doc", "x", json!(1)).unwrap();

    bob.create("doc");
    bob.delete("doc");
    let outcome = bob.apply_remote_bytes(&receipt.messages[0]).unwrap();
    assert_eq!(outcome, ApplyOutcome::Discarded);
    assert!(!bob.contains("doc"));
    assert!(bob.is_deleted("doc"));
}

#[test]
fn test_set_and_list_edits_with_undo() {
    let mut notes = replica("A");
    notes.create("doc");

    notes.add_to_set("doc", "colors", json!("red")).unwrap();
    notes.add_to_set("doc", "colors", json!("blue")).unwrap();
    notes.remove_from_set("doc", "colors", json!("red")).unwrap();
    assert_eq!(notes.get("doc").unwrap().value("colors"), Some(json!(["blue"])));

    notes.undo("doc").unwrap();
    let colors = notes.get("doc").unwrap().field("colors").unwrap().as_set().unwrap();
    assert!(colors.contains(&json!("red")));
    assert!(colors.contains(&json!("blue")));

    for (index, value) in ["a", "b", "c"].iter().enumerate() {
        notes.insert_at("doc", "items", index, json!(value)).unwrap();
    }
    notes.delete_at("doc", "items", 1).unwrap();
    assert_eq!(notes.get("doc").unwrap().value("items"), Some(json!(["a", "c"])));

    notes.undo("doc").unwrap();
    assert_eq!(
        notes.get("doc").unwrap().value("items"),
        Some(json!(["a", "b", "c"]))
    );

    let err = notes.delete_at("doc", "items", 9).unwrap_err();
    assert!(matches!(err.root_cause(), VersioningError::InvalidOperation(_)));
}

#[test]
fn test_history_depth_from_config() {
    let config = VersioningConfig::from_toml("[history]\nmax_depth = 2\n").unwrap();
    let mut notes = VersionedCollection::new("notes", ActorId::from("A"), config).unwrap();
    notes.create("doc");
    for n in 1..=3 {
        notes.set("doc", "n", json!(n)).unwrap();
    }

    assert!(notes.undo("doc").unwrap().is_applied());
    assert!(notes.undo("doc").unwrap().is_applied());
    assert!(notes.undo("doc").unwrap().is_empty());
    assert_eq!(notes.get("doc").unwrap().value("n"), Some(json!(1)));
}

#[test]
fn test_delta_catch_up() {
    let mut alice = replica("alice");
    alice.create("doc");
    let first = alice.set("doc", "title", json!("t")).unwrap();
    alice.insert_at("doc", "items", 0, json!(1)).unwrap();
    alice.add_to_set("doc", "tags", json!("x")).unwrap();

    let mut bob = replica("bob");
    let delta = alice
        .delta_since("doc", &VersionVector::new())
        .unwrap()
        .unwrap();
    let bytes = alice.codec().encode_delta(&delta).unwrap();
    assert_eq!(bob.apply_remote_bytes(&bytes).unwrap(), ApplyOutcome::Applied);

    assert_eq!(
        bob.get("doc").unwrap().to_json(),
        alice.get("doc").unwrap().to_json()
    );
    assert_eq!(
        bob.apply_remote_change(&first.changes[0]).unwrap(),
        ApplyOutcome::AlreadyApplied
    );
    assert!(alice
        .delta_since("doc", bob.get("doc").unwrap().version())
        .unwrap()
        .is_none());
}

#[test]
fn test_persist_and_reload() {
    let store = MemoryStore::new();
    let mut before = replica("alice");
    before.create("doc");
    before.set("doc", "title", json!("saved")).unwrap();
    before.persist(&store, "doc").unwrap();
    assert!(matches!(
        before.persist(&store, "missing"),
        Err(VersioningError::UnknownDocument { .. })
    ));

    let mut after = replica("alice");
    let loaded = after.load(&store, "doc").unwrap().unwrap();
    assert_eq!(loaded.value("title"), Some(json!("saved")));
    assert!(after.load(&store, "missing").unwrap().is_none());

    // The reloaded history stays undoable and the clock resumes past it
    assert!(after.undo("doc").unwrap().is_applied());
    assert!(after.clock() > 1);

    after.forget(&store, "doc").unwrap();
    assert!(store.load(&"doc".into()).unwrap().is_none());
    assert!(after.is_deleted("doc"));
}

#[tokio::test]
async fn test_pump_runs_alongside_local_edits() {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut alice = replica("alice");
    alice.connect_outbound(tx);
    alice.create("doc");

    let bob = synapsed_versioning::inbound::shared(replica("bob"));
    let pump = synapsed_versioning::spawn_pump(bob.clone(), rx);

    alice.add_to_set("doc", "tags", json!("from-alice")).unwrap();
    {
        let mut guard = bob.lock();
        guard.create("doc");
        guard.add_to_set("doc", "tags", json!("from-bob")).unwrap();
    }
    alice.disconnect_outbound();

    let report = pump.await.unwrap();
    assert_eq!(report.applied, 1);

    let guard = bob.lock();
    let tags = guard.get("doc").unwrap().field("tags").unwrap().as_set().unwrap();
    assert!(tags.contains(&json!("from-alice")));
    assert!(tags.contains(&json!("from-bob")));
}

#[test]
fn test_run_pump_drains_closed_channel() {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut alice = replica("alice");
    alice.create("doc");
    let receipt = alice.insert_at("doc", "items", 0, json!("x")).unwrap();
    for message in &receipt.messages {
        tx.send(message.clone()).unwrap();
    }
    tx.send(receipt.messages[0].clone()).unwrap();
    drop(tx);

    let bob = synapsed_versioning::inbound::shared(replica("bob"));
    let report = tokio_test::block_on(synapsed_versioning::run_pump(bob.clone(), rx));
    assert_eq!((report.applied, report.stale), (1, 1));
    assert_eq!(bob.lock().get("doc").unwrap().value("items"), Some(json!(["x"])));
}
