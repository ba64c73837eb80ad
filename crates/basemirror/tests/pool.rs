mod common;

use basemirror::{RecordQueryOptions, SortSpec};
use common::fixtures::{GRID, PRIORITY};
use common::Harness;

const TTL_MS: u64 = 10_000;

fn by_priority() -> RecordQueryOptions {
    RecordQueryOptions::new().sort(SortSpec::asc(PRIORITY))
}

#[test]
fn equivalent_selects_share_a_result() {
    let h = Harness::new();
    let table = h.tasks();
    let first = table.select_records(by_priority()).unwrap();
    let by_id = table.select_records(by_priority()).unwrap();
    let by_name = table
        .select_records(RecordQueryOptions::new().sort(SortSpec::asc("Priority")))
        .unwrap();
    assert!(first.ptr_eq(&by_id));
    assert!(first.ptr_eq(&by_name));
    assert_eq!(first.fingerprint(), by_name.fingerprint());

    let desc = table
        .select_records(RecordQueryOptions::new().sort(SortSpec::desc(PRIORITY)))
        .unwrap();
    assert!(!first.ptr_eq(&desc));

    let view = table.get_view_by_id(GRID).unwrap();
    let in_view = view.select_records(by_priority()).unwrap();
    assert!(!first.ptr_eq(&in_view));
    assert!(in_view.ptr_eq(&view.select_records(by_priority()).unwrap()));
}

#[test]
fn unloaded_result_expires_after_its_window() {
    let h = Harness::new();
    let table = h.tasks();
    let first = table.select_records(by_priority()).unwrap();

    h.clock.advance_ms(TTL_MS - 1_000);
    let again = table.select_records(by_priority()).unwrap();
    assert!(first.ptr_eq(&again));

    // The lookup restarted the window.
    h.clock.advance_ms(TTL_MS - 1_000);
    assert!(first.ptr_eq(&table.select_records(by_priority()).unwrap()));

    h.clock.advance_ms(TTL_MS + 1);
    let fresh = table.select_records(by_priority()).unwrap();
    assert!(!first.ptr_eq(&fresh));
}

#[test]
fn loaded_result_stays_pooled_until_unloaded() {
    let mut h = Harness::new();
    let table = h.tasks();
    let query = h.run(table.select_records_async(by_priority())).unwrap();

    h.clock.advance_ms(TTL_MS * 6);
    let again = table.select_records(by_priority()).unwrap();
    assert!(query.ptr_eq(&again));
    assert!(again.is_data_loaded());

    query.unload_data();
    h.clock.advance_ms(TTL_MS / 2);
    assert!(query.ptr_eq(&table.select_records(by_priority()).unwrap()));

    h.clock.advance_ms(TTL_MS + 1);
    let fresh = table.select_records(by_priority()).unwrap();
    assert!(!query.ptr_eq(&fresh));
    assert!(!fresh.is_data_loaded());
}

#[test]
fn shared_result_counts_every_loader() {
    let mut h = Harness::new();
    let table = h.tasks();
    let a = h.run(table.select_records_async(by_priority())).unwrap();
    let b = h.run(table.select_records_async(by_priority())).unwrap();
    assert!(a.ptr_eq(&b));
    assert_eq!(h.host.table_fetch_count(), 1);

    a.unload_data();
    assert!(b.is_data_loaded());
    b.unload_data();
    assert!(!b.is_data_loaded());
    assert_eq!(h.host.table_unsubscribes.borrow().len(), 1);
}

#[test]
fn view_metadata_is_pooled_per_view() {
    let h = Harness::new();
    let table = h.tasks();
    let grid = table.get_view_by_id(GRID).unwrap();
    let board = table.get_view("Board").unwrap();

    let first = grid.select_metadata().unwrap();
    let second = grid.select_metadata().unwrap();
    let other = board.select_metadata().unwrap();
    assert!(first.ptr_eq(&second));
    assert!(!first.ptr_eq(&other));
    assert!(first.view().ptr_eq(&grid));
    assert!(other.view().ptr_eq(&board));

    h.clock.advance_ms(TTL_MS + 1);
    let later = grid.select_metadata().unwrap();
    assert!(!later.ptr_eq(&first));
}
