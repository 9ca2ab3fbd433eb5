//! Bitemporal scenarios: point-in-time, range, evolution, and
//! current-state queries over explicit validity intervals.

use aion_common::config::{CacheConfig, StoreOptions};
use aion_engine::solution::VarRegistry;
use aion_engine::store::Store;
use aion_engine::{CancelToken, TemporalFilter};
use tempfile::tempdir;

// Millisecond epochs for the employment-history scenario.
const JAN_2020: u64 = 1_577_836_800_000; // 2020-01-01
const JUN_2021: u64 = 1_622_505_600_000; // 2021-06-01
const JAN_2023: u64 = 1_672_531_200_000; // 2023-01-01
const JUL_2023: u64 = 1_688_169_600_000; // 2023-07-01
const DEC_2023: u64 = 1_703_980_800_000; // 2023-12-31
const JAN_2024: u64 = 1_704_067_200_000; // 2024-01-01

fn temporal_store(dir: &std::path::Path) -> Store {
    Store::open(
        dir,
        StoreOptions {
            temporal: true,
            named_graphs: true,
            cache: CacheConfig { num_frames: 256 },
            writer_lock_timeout_ms: 1_000,
            fsync_enabled: true,
        },
    )
    .unwrap()
}

fn employers_at(store: &Store, filter: TemporalFilter) -> Vec<String> {
    let mut vars = VarRegistry::new();
    let pattern = store.pattern(Some("<alice>"), Some("<works>"), Some("?o"), None, &mut vars);
    let mut iter = store
        .match_pattern(&pattern, Some(filter), CancelToken::new())
        .unwrap();
    let mut out = Vec::new();
    while iter.advance().unwrap() {
        out.push(store.resolve_atom(iter.current().object).unwrap());
    }
    out.sort();
    out
}

#[test]
fn test_employment_history_scenario() {
    let dir = tempdir().unwrap();
    let store = temporal_store(dir.path());

    store
        .add_historical("<alice>", "<works>", "<Acme>", JAN_2020, JUL_2023, None)
        .unwrap();
    store
        .add_historical(
            "<alice>",
            "<works>",
            "<OpenAI>",
            JUL_2023,
            aion_common::key::TIME_OPEN_END,
            None,
        )
        .unwrap();

    // AsOf mid-2021: Acme.
    assert_eq!(
        employers_at(&store, TemporalFilter::AsOf(JUN_2021)),
        vec!["<Acme>".to_string()]
    );
    // AsOf 2024: OpenAI.
    assert_eq!(
        employers_at(&store, TemporalFilter::AsOf(JAN_2024)),
        vec!["<OpenAI>".to_string()]
    );
    // The 2023 window overlaps both employments.
    assert_eq!(
        employers_at(
            &store,
            TemporalFilter::Range {
                lo: JAN_2023,
                hi: DEC_2023
            }
        ),
        vec!["<Acme>".to_string(), "<OpenAI>".to_string()]
    );
    // Before any employment: nothing.
    assert!(employers_at(&store, TemporalFilter::AsOf(JAN_2020 - 1)).is_empty());
    // AsOf exactly at a valid_to boundary excludes the ending interval.
    assert_eq!(
        employers_at(&store, TemporalFilter::AsOf(JUL_2023)),
        vec!["<OpenAI>".to_string()]
    );
}

#[test]
fn test_current_view_is_single_valued_after_truncation() {
    let dir = tempdir().unwrap();
    let store = temporal_store(dir.path());

    // Both inserted open-ended; the second truncates the first.
    store
        .add_historical(
            "<alice>",
            "<works>",
            "<Acme>",
            JAN_2020,
            aion_common::key::TIME_OPEN_END,
            None,
        )
        .unwrap();
    store
        .add_historical(
            "<alice>",
            "<works>",
            "<OpenAI>",
            JUL_2023,
            aion_common::key::TIME_OPEN_END,
            None,
        )
        .unwrap();

    // Truncation invariant: the prior value answers strictly inside
    // [t1, t2), the new value from t2 on.
    assert_eq!(
        employers_at(&store, TemporalFilter::AsOf(JUN_2021)),
        vec!["<Acme>".to_string()]
    );
    assert_eq!(
        employers_at(&store, TemporalFilter::AsOf(JUL_2023)),
        vec!["<OpenAI>".to_string()]
    );
    assert_eq!(
        employers_at(&store, TemporalFilter::AsOf(JAN_2024)),
        vec!["<OpenAI>".to_string()]
    );
    // AllTime still sees both versions.
    assert_eq!(employers_at(&store, TemporalFilter::AllTime).len(), 2);
}

#[test]
fn test_insert_triple_on_temporal_store_is_current() {
    let dir = tempdir().unwrap();
    let store = temporal_store(dir.path());

    store.insert_triple("<a>", "<p>", "<b>", None).unwrap();

    // Default (no predicate) shows the current view.
    let mut vars = VarRegistry::new();
    let pattern = store.pattern(Some("<a>"), Some("<p>"), Some("?o"), None, &mut vars);
    let mut iter = store
        .match_pattern(&pattern, None, CancelToken::new())
        .unwrap();
    assert!(iter.advance().unwrap());
    // The version is open-ended with transaction time stamped.
    assert_eq!(
        iter.components().valid_to,
        aion_common::key::TIME_OPEN_END
    );
    assert!(iter.components().tx_time > 0);
}

#[test]
fn test_transaction_time_never_mutated_by_truncation() {
    let dir = tempdir().unwrap();
    let store = temporal_store(dir.path());

    store
        .add_historical(
            "<a>",
            "<p>",
            "<v1>",
            JAN_2020,
            aion_common::key::TIME_OPEN_END,
            None,
        )
        .unwrap();

    // Capture v1's transaction time.
    let mut vars = VarRegistry::new();
    let pattern = store.pattern(Some("<a>"), Some("<p>"), Some("?o"), None, &mut vars);
    let mut iter = store
        .match_pattern(&pattern, Some(TemporalFilter::AllTime), CancelToken::new())
        .unwrap();
    assert!(iter.advance().unwrap());
    let tx_before = iter.components().tx_time;
    drop(iter);

    store
        .add_historical(
            "<a>",
            "<p>",
            "<v2>",
            JUL_2023,
            aion_common::key::TIME_OPEN_END,
            None,
        )
        .unwrap();

    // The truncated v1 keeps its original transaction time.
    let mut iter = store
        .match_pattern(&pattern, Some(TemporalFilter::AllTime), CancelToken::new())
        .unwrap();
    let mut found_v1 = false;
    while iter.advance().unwrap() {
        if store.resolve_atom(iter.current().object).unwrap() == "<v1>" {
            found_v1 = true;
            assert_eq!(iter.components().tx_time, tx_before);
            assert_eq!(iter.components().valid_to, JUL_2023);
        }
    }
    assert!(found_v1);
}

#[test]
fn test_temporal_versions_emitted_chronologically() {
    let dir = tempdir().unwrap();
    let store = temporal_store(dir.path());

    // Insert out of chronological order.
    store
        .add_historical("<a>", "<p>", "<b>", JUL_2023, JAN_2024, None)
        .unwrap();
    store
        .add_historical("<a>", "<p>", "<b>", JAN_2020, JUN_2021, None)
        .unwrap();
    store
        .add_historical("<a>", "<p>", "<b>", JUN_2021, JUL_2023, None)
        .unwrap();

    let mut vars = VarRegistry::new();
    let pattern = store.pattern(Some("<a>"), Some("<p>"), Some("<b>"), None, &mut vars);
    let mut iter = store
        .match_pattern(&pattern, Some(TemporalFilter::AllTime), CancelToken::new())
        .unwrap();

    let mut previous = 0u64;
    let mut count = 0;
    while iter.advance().unwrap() {
        let vf = iter.components().valid_from;
        assert!(vf >= previous, "versions out of chronological order");
        previous = vf;
        count += 1;
    }
    assert_eq!(count, 3);
}

#[test]
fn test_temporal_durability_across_reopen() {
    let dir = tempdir().unwrap();

    {
        let store = temporal_store(dir.path());
        store
            .add_historical("<alice>", "<works>", "<Acme>", JAN_2020, JUL_2023, None)
            .unwrap();
        store.close().unwrap();
    }

    let store = temporal_store(dir.path());
    assert_eq!(
        employers_at(&store, TemporalFilter::AsOf(JUN_2021)),
        vec!["<Acme>".to_string()]
    );
    assert!(employers_at(&store, TemporalFilter::AsOf(JAN_2024)).is_empty());
}

#[test]
fn test_time_range_scan_without_bound_positions() {
    let dir = tempdir().unwrap();
    let store = temporal_store(dir.path());

    store
        .add_historical("<a>", "<p>", "<early>", JAN_2020, JUN_2021, None)
        .unwrap();
    store
        .add_historical("<b>", "<p>", "<late>", JUL_2023, JAN_2024, None)
        .unwrap();

    // Unbound pattern with a time range routes through the leading-time
    // index; only the overlapping interval matches.
    let mut vars = VarRegistry::new();
    let pattern = store.pattern(Some("?s"), Some("?p"), Some("?o"), None, &mut vars);
    let mut iter = store
        .match_pattern(
            &pattern,
            Some(TemporalFilter::Range {
                lo: JAN_2020,
                hi: JUN_2021,
            }),
            CancelToken::new(),
        )
        .unwrap();

    let mut seen = Vec::new();
    while iter.advance().unwrap() {
        seen.push(store.resolve_atom(iter.current().object).unwrap());
    }
    assert_eq!(seen, vec!["<early>".to_string()]);
}
