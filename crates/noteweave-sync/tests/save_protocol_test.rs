//! Save protocol: version counters, retries, concurrent saves and
//! duplicate-title adoption.

mod common;

use std::sync::Arc;

use common::{drain, TestWorkspace};
use noteweave_store::test_fixtures::{document_from, note_with_children};
use noteweave_store::ScriptedFailure;
use noteweave_sync::{
    Element, Error, LinkIndex, Note, NoteEvent, NoteHandle, RemoteChange, RemoteUpdate,
    SaveOutcome, SyncConfig,
};
use tokio::sync::Notify;

fn child_texts(handle: &NoteHandle) -> Vec<String> {
    handle.read(|n| n.root().children().iter().map(|c| c.text().text()).collect())
}

#[tokio::test]
async fn test_create_saves_and_indexes() {
    let t = TestWorkspace::new();
    let mut rx = t.workspace.subscribe();

    let handle = t.workspace.create("Inbox").await.unwrap();

    assert_eq!(handle.saved_version(), 1);
    assert_eq!(handle.version(), 1);
    assert_eq!(t.memory().version_of(handle.id()), 1);
    assert!(t.index.contains_note(handle.id()));

    let events = drain(&mut rx);
    assert!(matches!(events[0], NoteEvent::Created { ref title, .. } if title == "Inbox"));
    assert!(events
        .iter()
        .any(|e| matches!(e, NoteEvent::Saved { version: 1, .. })));
}

#[tokio::test]
async fn test_create_rejects_taken_and_empty_titles() {
    let t = TestWorkspace::new();
    let _first = t.workspace.create("Taken").await.unwrap();

    let err = t.workspace.create("taken").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    let err = t.workspace.create("   ").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(t.memory().len(), 1);
}

#[tokio::test]
async fn test_versions_increase_with_every_save() {
    let t = TestWorkspace::new();
    let handle = t.workspace.create("Counter").await.unwrap();

    let mut last = handle.saved_version();
    for i in 0..4 {
        handle.edit(|n| n.root_mut().add_child(Element::with_text(format!("line {i}"))));
        let outcome = t.workspace.save(&handle).await.unwrap();
        assert!(outcome.version() > last);
        assert!(handle.saved_version() <= handle.version());
        last = outcome.version();
    }
    assert_eq!(last, 5);
    assert_eq!(t.memory().version_of(handle.id()), 5);
}

#[tokio::test]
async fn test_concurrent_save_is_refused_and_followed_up() {
    let t = TestWorkspace::new();
    let handle = t.workspace.create("Busy").await.unwrap();
    handle.edit(|n| n.root_mut().add_child(Element::with_text("first")));

    let gate = Arc::new(Notify::new());
    t.store.push(ScriptedFailure::WaitFor(gate.clone()));

    let first = {
        let workspace = t.workspace.clone();
        let handle = handle.clone();
        tokio::spawn(async move { workspace.save(&handle).await })
    };
    while !handle.is_saving() {
        tokio::task::yield_now().await;
    }

    let err = t.workspace.save(&handle).await.unwrap_err();
    assert!(matches!(err, Error::SaveAlreadyRunning(id) if id == handle.id()));
    assert_eq!(handle.pending_save(), 1);

    handle.edit(|n| n.root_mut().add_child(Element::with_text("second")));
    gate.notify_one();
    let outcome = first.await.unwrap().unwrap();

    // The follow-up save picked up the refused request.
    assert_eq!(outcome, SaveOutcome::Saved { version: 3 });
    assert_eq!(handle.pending_save(), 0);
    assert!(!handle.is_saving());
    let stored = t.memory().get(handle.id()).unwrap().decode_note().unwrap();
    assert_eq!(stored.root().children().len(), 2);
}

#[tokio::test]
async fn test_empty_payload_is_refused_before_the_store() {
    let config = common::fast_config().with_min_document_bytes(usize::MAX);
    let t = TestWorkspace::with_config(config);
    let handle = Arc::new(NoteHandle::new(
        Note::new("Hollow"),
        0,
        t.workspace.events().clone(),
    ));

    let err = t.workspace.save(&handle).await.unwrap_err();

    assert!(matches!(err, Error::EmptyDocument(id) if id == handle.id()));
    assert_eq!(t.store.save_calls(), 0);
    assert_eq!(handle.version(), 0);
    assert_eq!(handle.saved_version(), 0);
    assert!(!handle.is_saving());
}

#[tokio::test]
async fn test_conflict_merges_stored_version_before_resubmitting() {
    let t = TestWorkspace::new();
    let handle = t
        .workspace
        .create_note(note_with_children("Contested", &["shared", "doomed"]))
        .await
        .unwrap();
    let (shared, doomed) = handle.read(|n| {
        let children = n.root().children();
        (children[0].id(), children[1].id())
    });

    // Another device wrote version 2 behind our back.
    let mut remote = handle.snapshot();
    remote.find_element_mut(shared).unwrap().set_text("shared, remote edit");
    remote.root_mut().add_child(Element::with_text("remote"));
    let remote_v2 = document_from(&remote, 2, "device-b");
    t.memory().put_remote(remote_v2.clone());

    handle.edit(|n| {
        n.find_element_mut(shared).unwrap().set_text("shared, local edit");
        n.root_mut().remove_child(doomed);
        n.root_mut().add_child(Element::with_text("local"));
    });
    let outcome = t.workspace.save(&handle).await.unwrap();

    assert_eq!(outcome, SaveOutcome::Saved { version: 3 });
    assert_eq!(handle.saved_version(), 3);
    // Local edits win; the remote addition lands after its remote sibling.
    let expected = vec![
        "shared, local edit".to_string(),
        "remote".to_string(),
        "local".to_string(),
    ];
    assert_eq!(child_texts(&handle), expected);
    let stored = t.memory().get(handle.id()).unwrap().decode_note().unwrap();
    let texts: Vec<String> = stored.root().children().iter().map(|c| c.text().text()).collect();
    assert_eq!(texts, expected);

    // The feed delivering the beaten version later changes nothing.
    let late = t.workspace.apply_remote(&remote_v2).await.unwrap();
    assert!(matches!(
        late,
        RemoteChange::Updated(RemoteUpdate::Stale { local: 3, incoming: 2 })
    ));
    assert_eq!(child_texts(&handle), expected);
}

#[tokio::test]
async fn test_scripted_conflict_is_retried() {
    let t = TestWorkspace::new();
    let handle = t.workspace.create("Retry").await.unwrap();
    let calls = t.store.save_calls();
    t.store.push(ScriptedFailure::VersionConflict);

    handle.edit(|n| n.root_mut().add_child(Element::with_text("x")));
    let outcome = t.workspace.save(&handle).await.unwrap();

    assert_eq!(outcome.version(), 2);
    assert_eq!(t.store.save_calls(), calls + 2);
}

#[tokio::test]
async fn test_storage_outage_is_retried_with_backoff() {
    let t = TestWorkspace::new();
    let handle = t.workspace.create("Flaky").await.unwrap();
    let calls = t.store.save_calls();
    t.store.push_repeated(ScriptedFailure::Unavailable, 2);

    handle.edit(|n| n.root_mut().add_child(Element::with_text("x")));
    let outcome = t.workspace.save(&handle).await.unwrap();

    assert_eq!(outcome.version(), 2);
    assert_eq!(t.store.save_calls(), calls + 3);
    assert_eq!(t.store.remaining(), 0);
}

#[tokio::test]
async fn test_exhausted_retries_keep_the_request_pending() {
    let config = common::fast_config().with_max_save_retries(2);
    let t = TestWorkspace::with_config(config);
    let handle = t.workspace.create("Down").await.unwrap();
    let mut rx = t.workspace.subscribe();
    t.store.push_repeated(ScriptedFailure::Unavailable, 3);

    handle.edit(|n| n.root_mut().add_child(Element::with_text("x")));
    let err = t.workspace.save(&handle).await.unwrap_err();

    assert!(matches!(err, Error::Storage(_)));
    assert!(err.is_retryable());
    assert_eq!(handle.version(), 1);
    assert_eq!(handle.saved_version(), 1);
    assert_eq!(handle.pending_save(), 1);
    assert!(handle.is_dirty());
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, NoteEvent::SaveFailed { .. })));

    // The outage is over; the next save goes through.
    let outcome = t.workspace.save(&handle).await.unwrap();
    assert_eq!(outcome.version(), 2);
    assert_eq!(handle.pending_save(), 0);
}

#[tokio::test]
async fn test_duplicate_title_adopts_the_stored_note() {
    let a = TestWorkspace::with_config(common::fast_config().with_source("device-a"));
    let b = TestWorkspace::sharing(
        a.memory().clone(),
        a.index.clone(),
        common::fast_config().with_source("device-b"),
    );
    let original = a
        .workspace
        .create_note(note_with_children("Shared", &["from a"]))
        .await
        .unwrap();

    // Device B built its own "Shared" before seeing A's.
    let racing = Arc::new(NoteHandle::new(
        note_with_children("Shared", &["from b"]),
        0,
        b.workspace.events().clone(),
    ));
    let rejected_id = racing.id();
    b.workspace.registry().insert(&racing);

    let outcome = b.workspace.save(&racing).await.unwrap();

    assert_eq!(
        outcome,
        SaveOutcome::AdoptedExisting {
            rejected_id,
            id: original.id(),
            version: 1,
        }
    );
    assert_eq!(racing.id(), original.id());
    assert_eq!(child_texts(&racing), vec!["from a".to_string()]);
    assert_eq!(racing.saved_version(), 1);
    assert!(Arc::ptr_eq(&b.workspace.registry().get(original.id()).unwrap(), &racing));
    assert!(b.workspace.registry().get(rejected_id).is_none());
    assert!(!a.index.contains_note(rejected_id));
    assert_eq!(a.memory().len(), 1);
}

#[tokio::test]
async fn test_flush_saves_only_dirty_notes() {
    let t = TestWorkspace::new();
    let edited = t.workspace.create("Edited").await.unwrap();
    let untouched = t.workspace.create("Untouched").await.unwrap();
    edited.edit(|n| n.root_mut().add_child(Element::with_text("x")));

    assert_eq!(t.workspace.flush().await.unwrap(), 1);
    assert_eq!(edited.saved_version(), 2);
    assert_eq!(untouched.saved_version(), 1);
    assert!(!edited.is_dirty());
}

#[tokio::test]
async fn test_saved_note_is_searchable() {
    let t = TestWorkspace::new();
    let handle = t
        .workspace
        .create_note(note_with_children("Garden", &["plant tomatoes in may"]))
        .await
        .unwrap();
    let hits = t
        .index
        .search("tomatoes", noteweave_sync::SearchColumn::Text)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].note_id, handle.id());
}

#[test]
fn test_config_builder_reaches_workspace() {
    let config = SyncConfig::default().with_source("");
    let result = noteweave_sync::Workspace::new(
        Arc::new(noteweave_store::MemoryDocumentStore::new()),
        Arc::new(noteweave_store::MemoryLinkIndex::new()),
        config,
    );
    assert!(matches!(result, Err(Error::Config(_))));
}
