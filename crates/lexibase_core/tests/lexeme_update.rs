use lexibase_core::db::open_db_in_memory;
use lexibase_core::{
    ChangeIntent, EntityRef, Form, GroupAttachment, InvariantViolation, Lexeme, LexemeService,
    RecordId, ReferenceCatalog, SaveContext, SaveError, Sense, Variant,
};
use rusqlite::Connection;
use std::sync::Arc;
use uuid::Uuid;

const LANG_NL: RecordId = 1;
const LANG_EN: RecordId = 2;
const CAT_VERB: RecordId = 1;
const ORTH_STD: RecordId = 1;
const FORM_INF: RecordId = 1;
const FORM_PL: RecordId = 2;

fn setup() -> (Connection, LexemeService) {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO languages (id, code, name) VALUES (1, 'nl', 'Dutch'), (2, 'en', 'English');
         INSERT INTO categories (id, code, name) VALUES (1, 'VERB', 'Verb'), (2, 'NOUN', 'Noun');
         INSERT INTO orthographies (id, code, name) VALUES (1, 'std', 'Standard');
         INSERT INTO form_types (id, short_name, name)
            VALUES (1, 'inf', 'Infinitive'), (2, 'pl', 'Plural');
         INSERT INTO language_pairs (id, language_a_id, language_b_id) VALUES (1, 1, 2);
         INSERT INTO templates (id, name, category_id, language_id, orthography_id, main_text)
            VALUES (1, NULL, 1, NULL, NULL, '$(inf)');",
    )
    .unwrap();
    let service = LexemeService::new(Arc::new(ReferenceCatalog::new()));
    (conn, service)
}

fn actor() -> SaveContext {
    SaveContext::new("editor@test")
}

fn new_variant(tag: i64, inf_text: &str) -> Variant {
    Variant {
        id: EntityRef::Pending(tag),
        orthography_id: ORTH_STD,
        dialect_ids: Default::default(),
        forms: vec![Form {
            form_type_id: FORM_INF,
            text: inf_text.to_string(),
        }],
        label: Default::default(),
        auto_label: true,
        template_id: None,
        is_main: false,
        intent: ChangeIntent::Insert,
    }
}

fn new_submission(inf_text: &str) -> Lexeme {
    Lexeme {
        id: None,
        category_id: CAT_VERB,
        language_id: LANG_NL,
        correlation_id: None,
        is_active: true,
        tags: Default::default(),
        row_version: 0,
        variants: vec![new_variant(-1, inf_text)],
        senses: vec![Sense {
            id: EntityRef::Pending(-1),
            variant_refs: vec![EntityRef::Pending(-1)],
            group: None,
            row_version: 0,
            intent: ChangeIntent::Insert,
        }],
        mappings: vec![],
        links: vec![],
    }
}

/// Creates one lexeme and returns (id, loaded snapshot).
fn created(conn: &Connection, service: &LexemeService, inf_text: &str) -> (RecordId, Lexeme) {
    let summary = service.create(conn, &new_submission(inf_text), &actor()).unwrap();
    let snapshot = service.load(conn, summary.lexeme_id, false).unwrap().unwrap();
    (summary.lexeme_id, snapshot)
}

/// Builds two lexemes whose senses share one synonym group; returns
/// (group_id, first_sense_id, second_lexeme_id, second_snapshot).
fn grouped_pair(
    conn: &Connection,
    service: &LexemeService,
) -> (RecordId, RecordId, RecordId, Lexeme) {
    let first = service.create(conn, &new_submission("lopen"), &actor()).unwrap();
    let first_sense_id = *first.sense_keys.get(&-1).unwrap();

    let mut second = new_submission("gaan");
    second.senses[0].group = Some(GroupAttachment {
        group_ref: EntityRef::Pending(-10),
        member_refs: vec![EntityRef::Pending(-1), EntityRef::Persisted(first_sense_id)],
    });
    let summary = service.create(conn, &second, &actor()).unwrap();
    let snapshot = service.load(conn, summary.lexeme_id, false).unwrap().unwrap();
    let group_id = snapshot.senses[0]
        .group
        .as_ref()
        .and_then(|group| group.group_ref.as_persisted())
        .unwrap();
    (group_id, first_sense_id, summary.lexeme_id, snapshot)
}

fn group_members(conn: &Connection, group_id: RecordId) -> Vec<RecordId> {
    let mut stmt = conn
        .prepare("SELECT sense_id FROM synonym_group_members WHERE group_id = ?1 ORDER BY sense_id;")
        .unwrap();
    let mut rows = stmt.query([group_id]).unwrap();
    let mut members = Vec::new();
    while let Some(row) = rows.next().unwrap() {
        members.push(row.get(0).unwrap());
    }
    members
}

#[test]
fn update_replaces_variant_forms_wholesale_and_rerenders_label() {
    let (conn, service) = setup();
    let (id, snapshot) = created(&conn, &service, "loupen");

    let mut submission = snapshot.clone();
    submission.variants[0].intent = ChangeIntent::Update;
    submission.variants[0].forms = vec![
        Form {
            form_type_id: FORM_INF,
            text: "lopen".to_string(),
        },
        Form {
            form_type_id: FORM_PL,
            text: "lopens".to_string(),
        },
    ];

    service.update(&conn, id, &submission, &snapshot, &actor()).unwrap();

    let saved = service.load(&conn, id, false).unwrap().unwrap();
    assert_eq!(saved.variants[0].forms.len(), 2);
    assert_eq!(saved.variants[0].forms[0].text, "lopen");
    assert_eq!(saved.variants[0].label.main, "lopen");
}

#[test]
fn update_inserts_and_deletes_children_by_intent() {
    let (conn, service) = setup();
    let (id, snapshot) = created(&conn, &service, "loupen");

    let mut submission = snapshot.clone();
    submission.variants.push(new_variant(-5, "lopen"));
    submission.senses.push(Sense {
        id: EntityRef::Pending(-5),
        variant_refs: vec![EntityRef::Pending(-5), snapshot.variants[0].id],
        group: None,
        row_version: 0,
        intent: ChangeIntent::Insert,
    });

    let summary = service.update(&conn, id, &submission, &snapshot, &actor()).unwrap();
    assert_eq!(summary.variant_keys.len(), 1);
    assert_eq!(summary.sense_keys.len(), 1);

    let grown = service.load(&conn, id, false).unwrap().unwrap();
    assert_eq!(grown.variants.len(), 2);
    assert_eq!(grown.senses.len(), 2);

    // Now delete the original variant; its sense reference rows go with it.
    let snapshot = grown.clone();
    let mut submission = grown;
    submission.variants[0].intent = ChangeIntent::Delete;
    submission.senses[1].variant_refs = vec![submission.variants[1].id];
    submission.senses[1].intent = ChangeIntent::Update;
    submission.senses[0].variant_refs = vec![submission.variants[1].id];
    submission.senses[0].intent = ChangeIntent::Update;
    service.update(&conn, id, &submission, &snapshot, &actor()).unwrap();

    let shrunk = service.load(&conn, id, false).unwrap().unwrap();
    assert_eq!(shrunk.variants.len(), 1);
    let orphan_refs: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sense_variants sv
             WHERE NOT EXISTS (SELECT 1 FROM variants v WHERE v.id = sv.variant_id);",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(orphan_refs, 0);
}

#[test]
fn clearing_group_pointer_is_escalated_and_mirrored() {
    let (conn, service) = setup();
    let (group_id, first_sense_id, second_id, snapshot) = grouped_pair(&conn, &service);

    // The caller clears the group reference but leaves the intent unset.
    let mut submission = snapshot.clone();
    submission.senses[0].group = None;
    submission.senses[0].intent = ChangeIntent::NoChange;

    service.update(&conn, second_id, &submission, &snapshot, &actor()).unwrap();

    // The group persists in reduced form with the foreign sense only.
    assert_eq!(group_members(&conn, group_id), vec![first_sense_id]);
    let own_pointer: Option<i64> = conn
        .query_row(
            "SELECT group_id FROM senses WHERE id = ?1;",
            [snapshot.senses[0].id.as_persisted().unwrap()],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(own_pointer, None);
    let foreign_pointer: Option<i64> = conn
        .query_row(
            "SELECT group_id FROM senses WHERE id = ?1;",
            [first_sense_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(foreign_pointer, Some(group_id));
}

#[test]
fn deleting_a_grouped_sense_removes_its_membership_first() {
    let (conn, service) = setup();
    let (group_id, first_sense_id, second_id, snapshot) = grouped_pair(&conn, &service);

    let mut submission = snapshot.clone();
    submission.senses[0].intent = ChangeIntent::Delete;

    service.update(&conn, second_id, &submission, &snapshot, &actor()).unwrap();

    assert_eq!(group_members(&conn, group_id), vec![first_sense_id]);
    let sense_rows: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM senses WHERE lexeme_id = ?1;",
            [second_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(sense_rows, 0);
}

#[test]
fn stale_snapshot_is_rejected_with_conflict() {
    let (conn, service) = setup();
    let (id, snapshot) = created(&conn, &service, "loupen");

    let mut first_submission = snapshot.clone();
    first_submission.is_active = false;
    service.update(&conn, id, &first_submission, &snapshot, &actor()).unwrap();

    // A second writer still holding the old snapshot must be rejected.
    let mut second_submission = snapshot.clone();
    second_submission.tags.insert("archaic".to_string());
    let err = service
        .update(&conn, id, &second_submission, &snapshot, &actor())
        .unwrap_err();
    assert!(matches!(err, SaveError::Conflict { kind: "lexeme", .. }));

    // No partial write from the rejected attempt.
    let saved = service.load(&conn, id, false).unwrap().unwrap();
    assert!(saved.tags.is_empty());
    assert!(!saved.is_active);
}

#[test]
fn language_and_category_are_immutable() {
    let (conn, service) = setup();
    let (id, snapshot) = created(&conn, &service, "loupen");

    let mut submission = snapshot.clone();
    submission.language_id = LANG_EN;
    submission.category_id = 2;

    let err = service.update(&conn, id, &submission, &snapshot, &actor()).unwrap_err();
    match err {
        SaveError::Invariants(violations) => {
            assert!(violations.contains(&InvariantViolation::LanguageChanged {
                from: LANG_NL,
                to: LANG_EN,
            }));
            assert!(violations.iter().any(|violation| matches!(
                violation,
                InvariantViolation::CategoryChanged { .. }
            )));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn correlation_id_is_immutable_once_set() {
    let (conn, service) = setup();
    let mut unit = new_submission("loupen");
    unit.correlation_id = Some(Uuid::new_v4());
    let summary = service.create(&conn, &unit, &actor()).unwrap();
    let snapshot = service.load(&conn, summary.lexeme_id, false).unwrap().unwrap();

    let mut submission = snapshot.clone();
    submission.correlation_id = None;
    let err = service
        .update(&conn, summary.lexeme_id, &submission, &snapshot, &actor())
        .unwrap_err();
    match err {
        SaveError::Invariants(violations) => {
            assert_eq!(violations, vec![InvariantViolation::CorrelationChanged]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn updating_an_unknown_child_is_fatal() {
    let (conn, service) = setup();
    let (id, snapshot) = created(&conn, &service, "loupen");

    let mut submission = snapshot.clone();
    submission.variants.push(Variant {
        id: EntityRef::Persisted(999_999),
        intent: ChangeIntent::Update,
        ..new_variant(-1, "x")
    });

    let err = service.update(&conn, id, &submission, &snapshot, &actor()).unwrap_err();
    assert!(matches!(
        err,
        SaveError::ReferenceNotFound { kind: "variant", .. }
    ));
}

#[test]
fn attaching_existing_group_updates_both_sides() {
    let (conn, service) = setup();
    let (group_id, _first_sense_id, _second_id, _snapshot) = grouped_pair(&conn, &service);

    // A third lexeme joins the existing group through a sense update.
    let (third_id, third_snapshot) = created(&conn, &service, "rennen");
    let mut submission = third_snapshot.clone();
    submission.senses[0].group = Some(GroupAttachment {
        group_ref: EntityRef::Persisted(group_id),
        member_refs: vec![],
    });
    submission.senses[0].intent = ChangeIntent::Update;

    service.update(&conn, third_id, &submission, &third_snapshot, &actor()).unwrap();

    let members = group_members(&conn, group_id);
    assert_eq!(members.len(), 3);
    let third_sense_id = third_snapshot.senses[0].id.as_persisted().unwrap();
    assert!(members.contains(&third_sense_id));
    let pointer: Option<i64> = conn
        .query_row(
            "SELECT group_id FROM senses WHERE id = ?1;",
            [third_sense_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(pointer, Some(group_id));
}
