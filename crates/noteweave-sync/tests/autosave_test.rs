//! Debounced autosave under paused time.

mod common;

use std::time::Duration;

use common::TestWorkspace;
use noteweave_store::test_fixtures::ScriptedFailure;
use noteweave_sync::Element;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn test_edits_are_saved_after_the_quiet_period() {
    let t = TestWorkspace::new();
    t.workspace.start_autosave();
    let handle = t.workspace.create("Auto").await.unwrap();
    assert!(t.workspace.is_autosaving(handle.id()));

    handle.edit(|n| n.root_mut().add_child(Element::with_text("one")));
    sleep(Duration::from_millis(300)).await;
    assert_eq!(handle.saved_version(), 1);

    // A second edit pushes the deadline back.
    handle.edit(|n| n.root_mut().add_child(Element::with_text("two")));
    sleep(Duration::from_millis(300)).await;
    assert_eq!(handle.saved_version(), 1);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(handle.saved_version(), 2);
    assert!(!handle.is_dirty());
    let stored = t.memory().get(handle.id()).unwrap().decode_note().unwrap();
    assert_eq!(stored.root().children().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_edits_is_one_save() {
    let t = TestWorkspace::new();
    t.workspace.start_autosave();
    let handle = t.workspace.create("Burst").await.unwrap();
    let calls = t.store.save_calls();

    for i in 0..5 {
        handle.edit(|n| n.root_mut().add_child(Element::with_text(format!("line {i}"))));
        sleep(Duration::from_millis(100)).await;
    }
    sleep(Duration::from_secs(1)).await;

    assert_eq!(t.store.save_calls(), calls + 1);
    assert_eq!(handle.saved_version(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_only_kept_notes_are_watched() {
    let t = TestWorkspace::new();
    let early_id = t.workspace.create("Early").await.unwrap().id();
    let early = t.workspace.fetch_by_id(early_id, true).await.unwrap().unwrap();
    t.workspace.start_autosave();
    assert!(t.workspace.is_autosaving(early.id()));

    let late_id = t.workspace.create("Late").await.unwrap().id();
    let detached = t.workspace.fetch_by_id(late_id, false).await.unwrap().unwrap();
    assert!(!t.workspace.is_autosaving(detached.id()));

    detached.edit(|n| n.root_mut().add_child(Element::with_text("ignored")));
    sleep(Duration::from_secs(2)).await;
    assert_eq!(detached.saved_version(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_and_unload_end_autosaving() {
    let t = TestWorkspace::new();
    t.workspace.start_autosave();
    let stopped = t.workspace.create("Stopped").await.unwrap();
    let unloaded = t.workspace.create("Unloaded").await.unwrap();

    t.workspace.unload(unloaded.id());
    assert!(!t.workspace.is_autosaving(unloaded.id()));
    unloaded.edit(|n| n.root_mut().add_child(Element::with_text("x")));

    t.workspace.stop_autosave();
    assert!(!t.workspace.is_autosaving(stopped.id()));
    stopped.edit(|n| n.root_mut().add_child(Element::with_text("x")));

    sleep(Duration::from_secs(2)).await;
    assert_eq!(stopped.saved_version(), 1);
    assert_eq!(unloaded.saved_version(), 1);
    assert!(stopped.is_dirty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_autosave_retries_without_new_edits() {
    let t = TestWorkspace::new();
    t.workspace.start_autosave();
    let handle = t.workspace.create("Offline").await.unwrap();
    let retries = t.workspace.config().max_save_retries as usize;
    // Enough failures to exhaust the first save, then twice the second.
    t.store
        .push_repeated(ScriptedFailure::Unavailable, (retries + 1) * 2);

    handle.edit(|n| n.root_mut().add_child(Element::with_text("written offline")));
    sleep(Duration::from_millis(600)).await;
    assert_eq!(handle.saved_version(), 1);
    assert!(handle.is_dirty());

    // First retry after one debounce window fails as well.
    sleep(Duration::from_millis(600)).await;
    assert_eq!(handle.saved_version(), 1);
    assert_eq!(t.store.remaining(), 0);

    // Second retry waits twice as long, then reaches the store.
    sleep(Duration::from_millis(600)).await;
    assert_eq!(handle.saved_version(), 1);
    sleep(Duration::from_millis(600)).await;
    assert_eq!(handle.saved_version(), 2);
    assert!(!handle.is_dirty());
    let stored = t.memory().get(handle.id()).unwrap().decode_note().unwrap();
    assert_eq!(stored.root().children().len(), 1);
}
