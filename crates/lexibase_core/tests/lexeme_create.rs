use lexibase_core::db::open_db_in_memory;
use lexibase_core::{
    ChangeIntent, EntityRef, Form, GroupAttachment, InvariantViolation, Lexeme, LexemeService,
    Link, LinkTargetKind, Mapping, RecordId, ReferenceCatalog, RenderIssue, SaveContext,
    SaveError, Sense, Variant,
};
use rusqlite::Connection;
use std::sync::Arc;

const LANG_NL: RecordId = 1;
const LANG_EN: RecordId = 2;
const LANG_FR: RecordId = 3;
const CAT_VERB: RecordId = 1;
const CAT_NOUN: RecordId = 2;
const ORTH_STD: RecordId = 1;
const FORM_INF: RecordId = 1;
const FORM_PL: RecordId = 2;
const LINK_SEE_ALSO: RecordId = 1;

fn setup() -> (Connection, LexemeService) {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO languages (id, code, name)
            VALUES (1, 'nl', 'Dutch'), (2, 'en', 'English'), (3, 'fr', 'French');
         INSERT INTO categories (id, code, name)
            VALUES (1, 'VERB', 'Verb'), (2, 'NOUN', 'Noun');
         INSERT INTO orthographies (id, code, name) VALUES (1, 'std', 'Standard');
         INSERT INTO form_types (id, short_name, name)
            VALUES (1, 'inf', 'Infinitive'), (2, 'pl', 'Plural');
         INSERT INTO link_types (id, code, name, target_kind)
            VALUES (1, 'see_also', 'See also', 'sense');
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

fn variant(tag: i64, forms: Vec<Form>) -> Variant {
    Variant {
        id: EntityRef::Pending(tag),
        orthography_id: ORTH_STD,
        dialect_ids: Default::default(),
        forms,
        label: Default::default(),
        auto_label: true,
        template_id: None,
        is_main: false,
        intent: ChangeIntent::Insert,
    }
}

fn sense(tag: i64, variant_refs: Vec<EntityRef>) -> Sense {
    Sense {
        id: EntityRef::Pending(tag),
        variant_refs,
        group: None,
        row_version: 0,
        intent: ChangeIntent::Insert,
    }
}

fn submission(language_id: RecordId, category_id: RecordId) -> Lexeme {
    Lexeme {
        id: None,
        category_id,
        language_id,
        correlation_id: None,
        is_active: true,
        tags: Default::default(),
        row_version: 0,
        variants: vec![variant(
            -1,
            vec![Form {
                form_type_id: FORM_INF,
                text: "loupen".to_string(),
            }],
        )],
        senses: vec![sense(-1, vec![EntityRef::Pending(-1)])],
        mappings: vec![],
        links: vec![],
    }
}

fn lexeme_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM lexemes;", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn create_renders_label_from_generic_category_template() {
    let (conn, service) = setup();

    let summary = service.create(&conn, &submission(LANG_NL, CAT_VERB), &actor()).unwrap();
    assert!(summary.render_issues.is_empty());

    let saved = service.load(&conn, summary.lexeme_id, false).unwrap().unwrap();
    assert_eq!(saved.variants.len(), 1);
    assert_eq!(saved.variants[0].label.main, "loupen");
    assert_eq!(saved.variants[0].label.pre, "");
}

#[test]
fn create_erases_every_negative_key() {
    let (conn, service) = setup();
    let mut unit = submission(LANG_NL, CAT_VERB);
    unit.variants.push(variant(
        -2,
        vec![Form {
            form_type_id: FORM_PL,
            text: "loupes".to_string(),
        }],
    ));
    unit.senses.push(sense(-2, vec![EntityRef::Pending(-1), EntityRef::Pending(-2)]));

    let summary = service.create(&conn, &unit, &actor()).unwrap();

    assert_eq!(summary.variant_keys.len(), 2);
    assert_eq!(summary.sense_keys.len(), 2);
    assert!(summary.variant_keys.values().all(|key| *key > 0));
    assert!(summary.sense_keys.values().all(|key| *key > 0));

    // Nothing persisted carries a negative identifier anywhere.
    for table in ["variants", "senses"] {
        let min_id: i64 = conn
            .query_row(&format!("SELECT MIN(id) FROM {table};"), [], |row| row.get(0))
            .unwrap();
        assert!(min_id > 0);
    }
    let min_ref: i64 = conn
        .query_row(
            "SELECT MIN(variant_id) FROM sense_variants;",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert!(min_ref > 0);

    // Sense-variant references resolved through the key map.
    let linked: i64 = conn
        .query_row("SELECT COUNT(*) FROM sense_variants;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(linked, 3);
}

#[test]
fn exactly_one_variant_is_main_after_save() {
    let (conn, service) = setup();
    let mut unit = submission(LANG_NL, CAT_VERB);
    unit.variants.push(variant(-2, vec![]));
    // Caller flagged none; the first non-deleted variant becomes main.

    let summary = service.create(&conn, &unit, &actor()).unwrap();
    let saved = service.load(&conn, summary.lexeme_id, false).unwrap().unwrap();
    let main_count = saved.variants.iter().filter(|variant| variant.is_main).count();
    assert_eq!(main_count, 1);
    assert!(saved.variants[0].is_main);
}

#[test]
fn structural_violations_are_collected_and_nothing_is_written() {
    let (conn, service) = setup();
    let mut unit = submission(99, 98);
    unit.senses[0].variant_refs.push(EntityRef::Pending(-9));

    let err = service.create(&conn, &unit, &actor()).unwrap_err();
    match err {
        SaveError::Invariants(violations) => {
            assert_eq!(violations.len(), 3);
            assert!(violations
                .contains(&InvariantViolation::UnknownLanguage { language_id: 99 }));
            assert!(violations
                .contains(&InvariantViolation::UnknownCategory { category_id: 98 }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(lexeme_count(&conn), 0);
}

#[test]
fn import_mode_skips_reference_existence_checks() {
    let (conn, service) = setup();
    // A link to a sense id that does not exist: target existence is an
    // application-level check, so the import toggle controls it verbatim.
    let mut unit = submission(LANG_NL, CAT_VERB);
    unit.links.push(Link {
        id: EntityRef::Pending(-1),
        link_type_id: LINK_SEE_ALSO,
        sense_ref: EntityRef::Pending(-1),
        target_kind: LinkTargetKind::Sense,
        target_id: 424242,
        intent: ChangeIntent::Insert,
    });

    let err = service.create(&conn, &unit, &actor()).unwrap_err();
    assert!(matches!(
        err,
        SaveError::ReferenceNotFound { kind: "sense", key: 424242 }
    ));

    let ctx = actor().without_reference_checks();
    service.create(&conn, &unit, &ctx).unwrap();
}

#[test]
fn new_synonym_group_is_bidirectional_across_aggregates() {
    let (conn, service) = setup();

    let first = service.create(&conn, &submission(LANG_NL, CAT_VERB), &actor()).unwrap();
    let foreign_sense_id = *first.sense_keys.get(&-1).unwrap();

    let mut second = submission(LANG_NL, CAT_VERB);
    second.senses[0].group = Some(GroupAttachment {
        group_ref: EntityRef::Pending(-10),
        member_refs: vec![
            EntityRef::Pending(-1),
            EntityRef::Persisted(foreign_sense_id),
        ],
    });
    let summary = service.create(&conn, &second, &actor()).unwrap();
    let own_sense_id = *summary.sense_keys.get(&-1).unwrap();

    let group_id: i64 = conn
        .query_row(
            "SELECT group_id FROM senses WHERE id = ?1;",
            [own_sense_id],
            |row| row.get(0),
        )
        .unwrap();
    let foreign_group_id: i64 = conn
        .query_row(
            "SELECT group_id FROM senses WHERE id = ?1;",
            [foreign_sense_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(group_id, foreign_group_id);

    // Membership mirrors the pointers exactly.
    let mut members: Vec<i64> = Vec::new();
    let mut stmt = conn
        .prepare("SELECT sense_id FROM synonym_group_members WHERE group_id = ?1 ORDER BY sense_id;")
        .unwrap();
    let mut rows = stmt.query([group_id]).unwrap();
    while let Some(row) = rows.next().unwrap() {
        members.push(row.get(0).unwrap());
    }
    let mut expected = vec![own_sense_id, foreign_sense_id];
    expected.sort_unstable();
    assert_eq!(members, expected);
}

#[test]
fn new_group_requires_exactly_one_foreign_member() {
    let (conn, service) = setup();
    let mut unit = submission(LANG_NL, CAT_VERB);
    unit.senses[0].group = Some(GroupAttachment {
        group_ref: EntityRef::Pending(-10),
        member_refs: vec![EntityRef::Pending(-1)],
    });

    let err = service.create(&conn, &unit, &actor()).unwrap_err();
    match err {
        SaveError::Invariants(violations) => assert_eq!(
            violations,
            vec![InvariantViolation::NewGroupMemberCount {
                sense_pos: 0,
                members: 1,
            }]
        ),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn mapping_between_unpaired_languages_aborts_whole_aggregate() {
    let (conn, service) = setup();

    // French target sense; no nl-fr pair is registered.
    let french = service.create(&conn, &submission(LANG_FR, CAT_VERB), &actor()).unwrap();
    let target_sense_id = *french.sense_keys.get(&-1).unwrap();
    let before = lexeme_count(&conn);

    let mut unit = submission(LANG_NL, CAT_VERB);
    unit.mappings.push(Mapping {
        id: EntityRef::Pending(-1),
        sense_ref: EntityRef::Pending(-1),
        target_sense_id,
        intent: ChangeIntent::Insert,
    });

    let err = service.create(&conn, &unit, &actor()).unwrap_err();
    assert!(matches!(err, SaveError::Incompatible(_)));
    // The transaction rolled back in full.
    assert_eq!(lexeme_count(&conn), before);
}

#[test]
fn mapping_between_paired_languages_is_persisted() {
    let (conn, service) = setup();

    let english = service.create(&conn, &submission(LANG_EN, CAT_VERB), &actor()).unwrap();
    let target_sense_id = *english.sense_keys.get(&-1).unwrap();

    let mut unit = submission(LANG_NL, CAT_VERB);
    unit.mappings.push(Mapping {
        id: EntityRef::Pending(-1),
        sense_ref: EntityRef::Pending(-1),
        target_sense_id,
        intent: ChangeIntent::Insert,
    });
    let summary = service.create(&conn, &unit, &actor()).unwrap();

    let mapped: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM mappings m
             INNER JOIN senses s ON s.id = m.sense_id
             WHERE s.lexeme_id = ?1 AND m.target_sense_id = ?2;",
            [summary.lexeme_id, target_sense_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(mapped, 1);
}

#[test]
fn link_target_kind_must_match_registered_link_type() {
    let (conn, service) = setup();

    let other = service.create(&conn, &submission(LANG_NL, CAT_VERB), &actor()).unwrap();

    let mut unit = submission(LANG_NL, CAT_VERB);
    unit.links.push(Link {
        id: EntityRef::Pending(-1),
        link_type_id: LINK_SEE_ALSO,
        sense_ref: EntityRef::Pending(-1),
        target_kind: LinkTargetKind::Lexeme,
        target_id: other.lexeme_id,
        intent: ChangeIntent::Insert,
    });

    let err = service.create(&conn, &unit, &actor()).unwrap_err();
    assert!(matches!(err, SaveError::Incompatible(_)));

    // The matching kind goes through.
    unit.links[0].target_kind = LinkTargetKind::Sense;
    unit.links[0].target_id = *other.sense_keys.get(&-1).unwrap();
    service.create(&conn, &unit, &actor()).unwrap();
}

#[test]
fn missing_template_is_reported_but_does_not_fail_the_save() {
    let (conn, service) = setup();

    // No NOUN template is seeded.
    let summary = service.create(&conn, &submission(LANG_NL, CAT_NOUN), &actor()).unwrap();
    assert_eq!(
        summary.render_issues,
        vec![RenderIssue::TemplateNotFound { variant_pos: 0 }]
    );
    assert_eq!(lexeme_count(&conn), 1);
}

#[test]
fn missing_placeholder_form_renders_empty_and_is_reported() {
    let (conn, service) = setup();
    conn.execute_batch(
        "UPDATE templates SET main_text = '$(inf) (${pl})' WHERE id = 1;",
    )
    .unwrap();

    let summary = service.create(&conn, &submission(LANG_NL, CAT_VERB), &actor()).unwrap();
    assert_eq!(summary.render_issues.len(), 1);
    assert!(matches!(
        &summary.render_issues[0],
        RenderIssue::MissingForm { variant_pos: 0, placeholder, .. } if placeholder == "pl"
    ));

    let saved = service.load(&conn, summary.lexeme_id, false).unwrap().unwrap();
    assert_eq!(saved.variants[0].label.main, "loupen ()");
}

#[test]
fn tags_are_normalized_before_persistence() {
    let (conn, service) = setup();
    let mut unit = submission(LANG_NL, CAT_VERB);
    unit.tags = ["  Dialectal ", "dialectal", "Loan-Word"]
        .iter()
        .map(|tag| (*tag).to_string())
        .collect();

    let summary = service.create(&conn, &unit, &actor()).unwrap();
    let saved = service.load(&conn, summary.lexeme_id, false).unwrap().unwrap();
    assert_eq!(
        saved.tags.into_iter().collect::<Vec<_>>(),
        vec!["dialectal".to_string(), "loan-word".to_string()]
    );
}

#[test]
fn submitted_labels_survive_when_auto_fill_is_off() {
    let (conn, service) = setup();
    let mut unit = submission(LANG_NL, CAT_VERB);
    unit.variants[0].auto_label = false;
    unit.variants[0].label.main = "handgeschreven".to_string();

    let summary = service.create(&conn, &unit, &actor()).unwrap();
    let saved = service.load(&conn, summary.lexeme_id, false).unwrap().unwrap();
    assert_eq!(saved.variants[0].label.main, "handgeschreven");
    assert!(summary.render_issues.is_empty());
}
