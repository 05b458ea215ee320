//! Note encoding, document envelopes and identity-based merging.

use noteweave_core::{
    merge, Attribute, DocumentType, Element, ElementKind, MediaDisplay, Note, NoteDocument,
    NoteReference, NoteType,
};
use uuid::Uuid;

fn sample_note() -> Note {
    let mut note = Note::new("Rust Notes");
    let root = note.root_mut();
    let mut first = Element::with_text("ownership and borrowing");
    first.set_kind(ElementKind::Heading(1));
    first.add_child(Element::with_text("see https://doc.rust-lang.org/book/"));
    root.add_child(first);
    root.add_child(Element::with_text("lifetimes"));
    note.add_reference(NoteReference::by_title("Other", Uuid::new_v4()));
    note.discard_changes();
    note
}

#[test]
fn test_note_round_trips_through_document() {
    let note = sample_note();
    let doc = NoteDocument::from_note(&note, 4, Uuid::nil(), "local").unwrap();
    assert_eq!(doc.id, note.id());
    assert_eq!(doc.title, "Rust Notes");
    assert_eq!(doc.version, 4);
    assert_eq!(doc.document_type, DocumentType::Note);

    let decoded = doc.decode_note().unwrap();
    assert_eq!(decoded, note);
    assert_eq!(decoded.encode().unwrap(), note.encode().unwrap());
}

#[test]
fn test_document_envelope_round_trips_through_json() {
    let doc = NoteDocument::from_note(&sample_note(), 2, Uuid::new_v4(), "device-a").unwrap();
    let json = doc.to_json().unwrap();
    let text = String::from_utf8(json.clone()).unwrap();
    assert!(text.contains("\"title\" : \"Rust Notes\""));
    assert!(text.contains("https://doc.rust-lang.org/book/"), "slashes must stay unescaped");

    let back = NoteDocument::from_json(&json).unwrap();
    assert_eq!(back, doc);
}

#[test]
fn test_encoding_is_stable() {
    let note = sample_note();
    assert_eq!(note.encode().unwrap(), note.encode().unwrap());
    let doc1 = NoteDocument::from_note(&note, 1, Uuid::nil(), "local").unwrap();
    let doc2 = NoteDocument::from_note(&note, 2, Uuid::nil(), "local").unwrap();
    assert_eq!(doc1.checksum(), doc2.checksum());
    assert!(doc1.checksum().starts_with("sha256:"));
}

#[test]
fn test_corrupt_body_is_a_decode_error() {
    let mut doc = NoteDocument::from_note(&sample_note(), 1, Uuid::nil(), "local").unwrap();
    doc.data = b"{ not json".to_vec();
    let err = doc.decode_note().unwrap_err();
    assert!(matches!(err, noteweave_core::Error::Decode(_)));
}

#[test]
fn test_journal_document_carries_date_key() {
    let date = chrono::NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
    let note = Note::journal(date);
    assert_eq!(note.note_type(), NoteType::Journal(date));
    let doc = NoteDocument::from_note(&note, 1, Uuid::nil(), "local").unwrap();
    assert_eq!(doc.document_type, DocumentType::Journal);
    assert_eq!(doc.journal_date, Some(20241231));
}

#[test]
fn test_remote_text_wins_for_shared_element() {
    let mut local = sample_note();
    let x = local.root().children()[1].id();

    let mut remote = local.clone();
    remote
        .find_element_mut(x)
        .unwrap()
        .set_text("lifetimes, revised remotely");
    remote.discard_changes();

    merge::plan(local.root(), remote.root()).apply(local.root_mut());
    assert_eq!(
        local.find_element(x).unwrap().text().text(),
        "lifetimes, revised remotely"
    );
    assert!(!local.has_pending_changes());
}

#[test]
fn test_merge_result_has_exactly_incoming_children() {
    let mut local = sample_note();
    let mut remote = local.clone();

    // Local-only garbage.
    local.root_mut().add_child(Element::with_text("local only"));
    let garbage = local.root().children()[2].id();
    // Remote drops the first child, adds a new one and reorders.
    let first = remote.root().children()[0].id();
    remote.root_mut().remove_child(first);
    remote.root_mut().insert_at(Element::with_text("remote only"), 0);

    let plan = merge::plan(local.root(), remote.root());
    let dropped = plan.dropped(local.root());
    assert!(dropped.contains(&garbage));
    assert!(dropped.contains(&first));
    plan.apply(local.root_mut());

    let merged: Vec<Uuid> = local.root().children().iter().map(Element::id).collect();
    let expected: Vec<Uuid> = remote.root().children().iter().map(Element::id).collect();
    assert_eq!(merged, expected);
    assert!(local.root().find(garbage).is_none());
    assert_eq!(local.root(), remote.root());
}

#[test]
fn test_internal_links_survive_encoding() {
    let mut note = Note::new("Linker");
    let mut element = Element::with_text("about Rust Notes");
    element.edit_text(|text| {
        text.add_attributes(&[Attribute::InternalLink("Rust Notes".into())], 6..16)
    });
    note.root_mut().add_child(element);

    let decoded = Note::decode(&note.encode().unwrap()).unwrap();
    assert_eq!(decoded.elements_linking_to("rust notes").len(), 1);
}

#[test]
fn test_media_and_unknown_kinds_survive_a_document_round_trip() {
    let mut note = Note::new("Gallery");
    let mut image = Element::new();
    image.set_kind(ElementKind::Image {
        id: Uuid::new_v4(),
        display: MediaDisplay {
            width: Some(640),
            ..MediaDisplay::default()
        },
    });
    let mut tabs = Element::new();
    tabs.set_kind(ElementKind::TabGroup(Uuid::new_v4()));
    note.root_mut().add_child(image);
    note.root_mut().add_child(tabs);
    note.discard_changes();

    let mut body: serde_json::Value = serde_json::from_slice(&note.encode().unwrap()).unwrap();
    body["children"][0]["kind"] = serde_json::json!({"type": "sketch", "strokes": [1, 2]});
    let mut doc = NoteDocument::from_note(&note, 1, Uuid::nil(), "remote").unwrap();
    doc.data = serde_json::to_vec(&body).unwrap();

    let decoded = doc.decode_note().unwrap();
    let kinds: Vec<&str> = decoded.root().children().iter().map(|e| e.kind().name()).collect();
    assert_eq!(kinds, vec!["sketch", "tabGroup"]);
    let again: serde_json::Value = serde_json::from_slice(&decoded.encode().unwrap()).unwrap();
    assert_eq!(again["children"][0]["kind"], body["children"][0]["kind"]);
    assert_eq!(again["children"][1]["kind"], body["children"][1]["kind"]);
}
