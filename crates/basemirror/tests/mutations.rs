mod common;

use basemirror::{
    BaseConfig, Error, HostError, Mutation, PartialMutation, RecordCellValues,
    RecordQueryOptions, RecordUpdate, SortSpec, WriteFailure,
};
use common::fixtures::{self, NAME, PRIORITY, STATUS, TASKS, TOTAL};
use common::{ids, Harness};
use serde_json::{json, Map, Value};

fn cells(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn priority_of(h: &Harness, record_id: &str) -> Option<Value> {
    h.base.read(&format!(
        "tablesById.{TASKS}.recordsById.{record_id}.cellValuesByFieldId.{PRIORITY}"
    ))
}

#[test]
fn update_is_applied_before_the_write_resolves() {
    let mut h = Harness::new();
    let table = h.tasks();
    let query = h
        .run(table.select_records_async(RecordQueryOptions::new().sort(SortSpec::asc(PRIORITY))))
        .unwrap();

    let completion = table
        .update_record_async("recA", cells(json!({"Priority": 0})))
        .unwrap();

    assert_eq!(priority_of(&h, "recA"), Some(json!(0)));
    assert_eq!(query.record_ids().unwrap(), ids(&["recA", "recB", "recC"]));
    assert_eq!(
        *h.host.writes.borrow(),
        vec![Mutation::SetMultipleRecordsCellValues {
            table_id: TASKS.to_string(),
            records: vec![RecordCellValues {
                id: "recA".to_string(),
                cell_values_by_field_id: cells(json!({PRIORITY: 0})),
            }],
        }]
    );
    assert_eq!(h.run(completion), Ok(()));
}

#[test]
fn failed_write_keeps_local_state_and_reports_the_mutation() {
    let mut h = Harness::new();
    let table = h.tasks();
    h.run(table.record_store().load_data()).unwrap();
    h.host.fail_writes("conflict");

    let completion = table
        .update_records_async(vec![RecordUpdate::new("recB", cells(json!({PRIORITY: 8})))])
        .unwrap();
    let expected = completion.mutation().clone();
    let result = h.run(completion);

    assert_eq!(
        result,
        Err(WriteFailure {
            mutation: expected,
            error: HostError::new("conflict"),
        })
    );
    assert_eq!(priority_of(&h, "recB"), Some(json!(8)));
}

#[test]
fn denied_mutation_changes_nothing() {
    let mut h = Harness::new();
    let table = h.tasks();
    h.run(table.record_store().load_data()).unwrap();
    h.host.deny("This base is read-only");

    let err = table
        .update_record_async("recA", cells(json!({PRIORITY: 0})))
        .unwrap_err();
    assert_eq!(
        err,
        Error::Permission {
            reason: "This base is read-only".to_string()
        }
    );
    assert_eq!(err.display_reason(), Some("This base is read-only"));
    assert_eq!(priority_of(&h, "recA"), Some(json!(3)));
    assert!(h.host.writes.borrow().is_empty());

    let check = table.check_permissions_for_update_record(None, None);
    assert!(!check.has_permission);
    assert_eq!(
        check.reason_display_string.as_deref(),
        Some("This base is read-only")
    );
    assert!(!table.has_permission_to_delete_records(None));
}

#[test]
fn invalid_cell_values_fail_validation() {
    let mut h = Harness::new();
    let table = h.tasks();
    h.run(table.record_store().load_data()).unwrap();

    let computed = table
        .update_record_async("recA", cells(json!({TOTAL: 10})))
        .unwrap_err();
    assert_eq!(
        computed.display_reason(),
        Some("Field 'Total' is computed and cannot be set")
    );

    let wrong_type = table
        .update_record_async("recA", cells(json!({PRIORITY: "high"})))
        .unwrap_err();
    assert!(matches!(wrong_type, Error::Validation { .. }));

    let bad_choice = table
        .update_record_async("recA", cells(json!({STATUS: "Blocked"})))
        .unwrap_err();
    assert!(matches!(bad_choice, Error::Validation { .. }));
    table
        .update_record_async("recA", cells(json!({STATUS: "Done"})))
        .unwrap();

    let unknown = table
        .update_record_async("recA", cells(json!({"Estimate": 2})))
        .unwrap_err();
    assert_eq!(unknown.display_reason(), Some("Unknown field 'Estimate'"));

    let missing = table.delete_record_async("recZ").unwrap_err();
    assert!(matches!(missing, Error::Validation { .. }));

    // Only the valid status update reached the host.
    assert_eq!(h.host.permission_checks.borrow().len(), 1);
    assert_eq!(h.host.writes.borrow().len(), 1);

    let check = table.check_permissions_for_update_record(Some("recA"), Some(&cells(json!({TOTAL: 1}))));
    assert!(!check.has_permission);
    assert_eq!(
        check.reason_display_string.as_deref(),
        Some("Field 'Total' is computed and cannot be set")
    );
}

#[test]
fn batches_over_the_limit_are_rejected() {
    let config = BaseConfig {
        max_records_per_mutation: 2,
        ..BaseConfig::default()
    };
    let h = Harness::with_host_and_config(fixtures::host(), config);
    let table = h.tasks();
    let err = table
        .delete_records_async(ids(&["recA", "recB", "recC"]))
        .unwrap_err();
    assert_eq!(
        err.display_reason(),
        Some("Request exceeds maximum batch size limit of 2 records")
    );
    assert!(!table.has_permission_to_create_records(Some(&[Map::new(), Map::new(), Map::new()])));
    assert!(table.has_permission_to_create_records(Some(&[Map::new(), Map::new()])));
}

#[test]
fn created_records_join_loaded_queries() {
    let mut h = Harness::new();
    let table = h.tasks();
    let query = h.run(table.select_records_async(RecordQueryOptions::new())).unwrap();

    let completion = table
        .create_record_async(cells(json!({"Name": "Order flowers", PRIORITY: 4})))
        .unwrap();
    let created = completion.created_record_ids();
    assert_eq!(created.len(), 1);
    let id = &created[0];
    assert!(id.starts_with("rec"));
    assert_eq!(id.len(), 3 + 14);

    assert_eq!(query.size().unwrap(), 4);
    assert_eq!(query.record_ids().unwrap().last(), Some(id));
    let record = table.get_record_by_id(id).unwrap();
    assert_eq!(record.name().unwrap(), "Order flowers");
    assert_eq!(record.comment_count().unwrap(), 0);
    h.run(completion).unwrap();

    match &h.host.writes.borrow()[0] {
        Mutation::CreateMultipleRecords { records, .. } => {
            assert_eq!(records[0].id, *id);
            assert_eq!(
                records[0].cell_values_by_field_id,
                cells(json!({NAME: "Order flowers", PRIORITY: 4}))
            );
        }
        other => panic!("unexpected write {other:?}"),
    };
}

#[test]
fn writes_to_unloaded_data_skip_the_local_update() {
    let mut h = Harness::new();
    let table = h.tasks();

    // Existence cannot be checked without record data.
    let completion = table
        .update_record_async("recZ", cells(json!({PRIORITY: 1})))
        .unwrap();
    h.run(completion).unwrap();
    let created = table.create_record_async(cells(json!({NAME: "Later"}))).unwrap();
    h.run(created).unwrap();

    assert!(h.base.read("tablesById.tblTasks.recordsById").is_none());
    assert_eq!(h.host.writes.borrow().len(), 2);
}

#[test]
fn delete_removes_records_locally() {
    let mut h = Harness::new();
    let table = h.tasks();
    let query = h.run(table.select_records_async(RecordQueryOptions::new())).unwrap();
    let record = table.get_record_by_id("recB").unwrap();

    let completion = table.delete_record_async("recB").unwrap();
    assert!(record.is_deleted());
    assert_eq!(query.record_ids().unwrap(), ids(&["recA", "recC"]));
    assert!(table.get_record_by_id_if_exists("recB").is_none());
    h.run(completion).unwrap();

    assert_eq!(
        h.host.permission_checks.borrow()[0],
        PartialMutation::DeleteMultipleRecords {
            table_id: TASKS.to_string(),
            record_ids: Some(ids(&["recB"])),
        }
    );
}
