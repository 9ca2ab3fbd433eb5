//! End-to-end store scenarios: insert/query round trips, index
//! agreement, bulk range scans, durability across reopen.

use aion_common::config::{CacheConfig, StoreOptions};
use aion_common::term::Quad;
use aion_engine::expr::{CmpOp, Expr};
use aion_engine::operators::bgp::execute_bgp;
use aion_engine::operators::collect_solutions;
use aion_engine::operators::filter::FilterIter;
use aion_engine::solution::{Solution, VarRegistry};
use aion_engine::store::Store;
use aion_engine::CancelToken;
use tempfile::tempdir;

fn triple_store(dir: &std::path::Path) -> Store {
    Store::open(
        dir,
        StoreOptions {
            temporal: false,
            named_graphs: true,
            cache: CacheConfig { num_frames: 256 },
            writer_lock_timeout_ms: 1_000,
            fsync_enabled: true,
        },
    )
    .unwrap()
}

fn all_quads(store: &Store) -> Vec<Quad> {
    let mut vars = VarRegistry::new();
    let pattern = store.pattern(Some("?s"), Some("?p"), Some("?o"), None, &mut vars);
    let mut iter = store
        .match_pattern(&pattern, None, CancelToken::new())
        .unwrap();
    let mut out = Vec::new();
    while iter.advance().unwrap() {
        out.push(iter.current());
    }
    out
}

#[test]
fn test_insert_then_query_single_pattern() {
    let dir = tempdir().unwrap();
    let store = triple_store(dir.path());

    assert!(store.insert_triple("<a>", "<p>", "<b>", None).unwrap());

    // Query (?, <p>, ?) yields one solution binding ?s=<a>, ?o=<b>.
    let mut vars = VarRegistry::new();
    let pattern = store.pattern(Some("?s"), Some("<p>"), Some("?o"), None, &mut vars);
    let width = vars.width();

    let mut iter = execute_bgp(
        &store,
        &[pattern],
        None,
        Solution::new(width),
        CancelToken::new(),
    )
    .unwrap();
    let solutions = collect_solutions(&mut iter).unwrap();

    assert_eq!(solutions.len(), 1);
    let s = solutions[0].get(vars.lookup("?s").unwrap()).unwrap();
    let o = solutions[0].get(vars.lookup("?o").unwrap()).unwrap();
    assert_eq!(store.resolve_atom(s).unwrap(), "<a>");
    assert_eq!(store.resolve_atom(o).unwrap(), "<b>");
}

#[test]
fn test_duplicate_insert_leaves_count_unchanged() {
    let dir = tempdir().unwrap();
    let store = triple_store(dir.path());

    assert!(store.insert_triple("<a>", "<p>", "<b>", None).unwrap());
    assert!(!store.insert_triple("<a>", "<p>", "<b>", None).unwrap());
    assert!(!store.insert_triple("<a>", "<p>", "<b>", None).unwrap());

    assert_eq!(store.statistics().triples, 1);
}

#[test]
fn test_every_index_agrees_on_bound_patterns() {
    let dir = tempdir().unwrap();
    let store = triple_store(dir.path());

    store.insert_triple("<s>", "<p>", "<o>", None).unwrap();

    // Each bound-position combination routes to a different index; all
    // must return the triple.
    let cases: [(Option<&str>, Option<&str>, Option<&str>); 7] = [
        (Some("<s>"), Some("<p>"), Some("<o>")),
        (Some("<s>"), Some("<p>"), None),
        (Some("<s>"), None, Some("<o>")),
        (None, Some("<p>"), Some("<o>")),
        (Some("<s>"), None, None),
        (None, Some("<p>"), None),
        (None, None, Some("<o>")),
    ];
    for (s, p, o) in cases {
        let mut vars = VarRegistry::new();
        let pattern = store.pattern(s, p, o, None, &mut vars);
        let mut iter = store
            .match_pattern(&pattern, None, CancelToken::new())
            .unwrap();
        assert!(iter.advance().unwrap(), "no match for {:?}", (s, p, o));
        let quad = iter.current();
        assert_eq!(store.resolve_atom(quad.subject).unwrap(), "<s>");
        assert!(!iter.advance().unwrap());
    }
}

#[test]
fn test_insert_then_delete_leaves_store_empty_of_triple() {
    let dir = tempdir().unwrap();
    let store = triple_store(dir.path());

    store.insert_triple("<a>", "<p>", "<b>", None).unwrap();
    store.insert_triple("<a>", "<p>", "<c>", None).unwrap();

    assert!(store.delete_triple("<a>", "<p>", "<b>", None).unwrap());
    assert!(!store.delete_triple("<a>", "<p>", "<b>", None).unwrap());

    let quads = all_quads(&store);
    assert_eq!(quads.len(), 1);
    assert_eq!(store.resolve_atom(quads[0].object).unwrap(), "<c>");
    assert_eq!(store.statistics().triples, 1);
}

#[test]
fn test_thousand_triples_range_query() {
    let dir = tempdir().unwrap();
    let store = triple_store(dir.path());

    for i in 0..1_000 {
        let subject = format!("<s_{:03}>", i);
        let object = format!("<o_{:03}>", i);
        store
            .insert_triple(&subject, "<p>", &object, None)
            .unwrap();
    }
    assert_eq!(store.statistics().triples, 1_000);

    // Subjects between <s_100> and <s_200> inclusive: exactly 101, in
    // ascending subject order.
    let mut vars = VarRegistry::new();
    let pattern = store.pattern(Some("?s"), Some("<p>"), Some("?o"), None, &mut vars);
    let s_var = vars.lookup("?s").unwrap();
    let width = vars.width();

    let low = store.atom_of("<s_100>").unwrap();
    let high = store.atom_of("<s_200>").unwrap();
    let range = Expr::And(
        Box::new(Expr::Cmp(
            CmpOp::Ge,
            Box::new(Expr::Var(s_var)),
            Box::new(Expr::Const(low)),
        )),
        Box::new(Expr::Cmp(
            CmpOp::Le,
            Box::new(Expr::Var(s_var)),
            Box::new(Expr::Const(high)),
        )),
    );

    let scan = execute_bgp(
        &store,
        &[pattern],
        None,
        Solution::new(width),
        CancelToken::new(),
    )
    .unwrap();
    let mut filtered = FilterIter::new(&store, scan, range);
    let solutions = collect_solutions(&mut filtered).unwrap();

    assert_eq!(solutions.len(), 101);
    let subjects: Vec<String> = solutions
        .iter()
        .map(|sol| store.resolve_atom(sol.get(s_var).unwrap()).unwrap())
        .collect();
    let mut sorted = subjects.clone();
    sorted.sort();
    assert_eq!(subjects, sorted, "results not in ascending subject order");
    assert_eq!(subjects.first().unwrap(), "<s_100>");
    assert_eq!(subjects.last().unwrap(), "<s_200>");
}

#[test]
fn test_named_graphs_partition_and_union() {
    let dir = tempdir().unwrap();
    let store = triple_store(dir.path());

    store
        .insert_triple("<a>", "<p>", "<b>", Some("<g1>"))
        .unwrap();
    store
        .insert_triple("<a>", "<p>", "<c>", Some("<g2>"))
        .unwrap();
    store.insert_triple("<a>", "<p>", "<d>", None).unwrap();

    // Graph filter restricts; no filter unions across all graphs.
    let mut vars = VarRegistry::new();
    let in_g1 = store.pattern(Some("<a>"), Some("<p>"), Some("?o"), Some("<g1>"), &mut vars);
    let mut iter = store.match_pattern(&in_g1, None, CancelToken::new()).unwrap();
    assert!(iter.advance().unwrap());
    assert_eq!(store.resolve_atom(iter.current().object).unwrap(), "<b>");
    assert!(!iter.advance().unwrap());

    assert_eq!(all_quads(&store).len(), 3);
}

#[test]
fn test_unknown_term_matches_nothing() {
    let dir = tempdir().unwrap();
    let store = triple_store(dir.path());
    store.insert_triple("<a>", "<p>", "<b>", None).unwrap();

    let mut vars = VarRegistry::new();
    let pattern = store.pattern(Some("<never-seen>"), None, None, None, &mut vars);
    let mut iter = store
        .match_pattern(&pattern, None, CancelToken::new())
        .unwrap();
    assert!(!iter.advance().unwrap());
}

#[test]
fn test_durability_across_reopen() {
    let dir = tempdir().unwrap();

    {
        let store = triple_store(dir.path());
        for i in 0..500 {
            store
                .insert_triple(&format!("<s{}>", i), "<p>", &format!("<o{}>", i), None)
                .unwrap();
        }
        store.close().unwrap();
    }

    let store = triple_store(dir.path());
    assert_eq!(store.statistics().triples, 500);

    let mut vars = VarRegistry::new();
    let pattern = store.pattern(Some("<s250>"), Some("<p>"), Some("?o"), None, &mut vars);
    let mut iter = store
        .match_pattern(&pattern, None, CancelToken::new())
        .unwrap();
    assert!(iter.advance().unwrap());
    assert_eq!(store.resolve_atom(iter.current().object).unwrap(), "<o250>");
}

#[test]
fn test_committed_insert_survives_abrupt_termination() {
    let dir = tempdir().unwrap();

    {
        let store = triple_store(dir.path());
        // insert_triple returning success means the metadata fence
        // completed; leaking the store skips every shutdown path.
        assert!(store.insert_triple("<t>", "<p>", "<v>", None).unwrap());
        std::mem::forget(store);
    }

    let store = triple_store(dir.path());
    assert_eq!(store.statistics().triples, 1);

    // The leaf chain is intact: a full scan still works.
    let quads = all_quads(&store);
    assert_eq!(quads.len(), 1);
    assert_eq!(store.resolve_atom(quads[0].subject).unwrap(), "<t>");
}

#[test]
fn test_statistics_shape() {
    let dir = tempdir().unwrap();
    let store = triple_store(dir.path());

    store.insert_triple("<a>", "<p>", "<b>", None).unwrap();
    let stats = store.statistics();

    assert_eq!(stats.triples, 1);
    // default graph + three terms
    assert_eq!(stats.atoms, 4);
    assert!(stats.bytes > 0);
    assert!(stats.cache.used_frames > 0);
}

#[test]
fn test_cancellation_is_terminal() {
    let dir = tempdir().unwrap();
    let store = triple_store(dir.path());
    for i in 0..100 {
        store
            .insert_triple(&format!("<s{}>", i), "<p>", "<o>", None)
            .unwrap();
    }

    let mut vars = VarRegistry::new();
    let pattern = store.pattern(Some("?s"), Some("<p>"), None, None, &mut vars);
    let cancel = CancelToken::new();
    let mut iter = store.match_pattern(&pattern, None, cancel.clone()).unwrap();

    assert!(iter.advance().unwrap());
    cancel.cancel();
    let err = iter.advance().unwrap_err();
    assert_eq!(err.kind(), aion_engine::ErrorKind::Cancelled);
}

#[test]
fn test_graph_argument_rejected_without_named_graphs() {
    let dir = tempdir().unwrap();
    let store = Store::open(
        dir.path(),
        StoreOptions {
            temporal: false,
            named_graphs: false,
            ..StoreOptions::triple_store()
        },
    )
    .unwrap();

    store.insert_triple("<a>", "<p>", "<b>", None).unwrap();
    let err = store
        .insert_triple("<a>", "<p>", "<b>", Some("<g>"))
        .unwrap_err();
    assert_eq!(err.kind(), aion_engine::ErrorKind::InvalidInput);
}
