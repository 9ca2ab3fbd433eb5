//! Index selection and search-key construction.
//!
//! Routing is deterministic and statistics-free: the bound positions of a
//! pattern pick the index whose field rotation puts them in the key
//! prefix, so every pattern becomes a single contiguous range scan.

use aion_common::key::{
    encode_key, IndexOrder, KeyBuf, KeyComponents, TemporalFilter, TIME_OPEN_END,
};
use aion_common::term::{TriplePattern, ATOM_MAX, ATOM_MIN};

/// Chooses the index for a pattern.
///
/// | bound        | triple | temporal |
/// |--------------|--------|----------|
/// | S P O        | SPO    | SPOT     |
/// | S P          | SPO    | SPOT     |
/// | S O          | OSP    | OSPT     |
/// | P O          | POS    | POST     |
/// | S            | SPO    | SPOT     |
/// | P            | POS    | POST     |
/// | O            | OSP    | OSPT     |
/// | — + time cap | —      | TSPO     |
/// | —            | SPO    | SPOT     |
pub fn choose_order(
    pattern: &TriplePattern,
    temporal: bool,
    filter: Option<&TemporalFilter>,
) -> IndexOrder {
    let s = pattern.subject.is_bound();
    let p = pattern.predicate.is_bound();
    let o = pattern.object.is_bound();

    if !temporal {
        return match (s, p, o) {
            (true, _, false) => IndexOrder::Spo,
            (true, true, true) => IndexOrder::Spo,
            (true, false, true) => IndexOrder::Osp,
            (false, true, _) => IndexOrder::Pos,
            (false, false, true) => IndexOrder::Osp,
            (false, false, false) => IndexOrder::Spo,
        };
    }

    match (s, p, o) {
        (true, _, false) => IndexOrder::Spot,
        (true, true, true) => IndexOrder::Spot,
        (true, false, true) => IndexOrder::Ospt,
        (false, true, _) => IndexOrder::Post,
        (false, false, true) => IndexOrder::Ospt,
        (false, false, false) => {
            // A leading-time index only pays off when the predicate caps
            // valid_from; otherwise the canonical order serves the scan.
            let capped = filter
                .map(|f| f.valid_from_upper_bound() != TIME_OPEN_END)
                .unwrap_or(false);
            if capped {
                IndexOrder::Tspo
            } else {
                IndexOrder::Spot
            }
        }
    }
}

/// Builds the `[min, max]` search keys bracketing a pattern's matches in
/// the chosen index.
///
/// Bound positions carry the term's atom in both bounds; unbound
/// positions take the minimum sentinel in `min` and the maximum sentinel
/// in `max`; time fields span `[0, TIME_OPEN_END]` except a TSPO scan,
/// whose leading `valid_from` is capped by the temporal predicate. When
/// the pattern has no graph restriction but keys carry a graph prefix,
/// the graph spans the full range and the scan unions across graphs.
pub fn key_range(
    pattern: &TriplePattern,
    order: IndexOrder,
    with_graph: bool,
    filter: Option<&TemporalFilter>,
) -> (KeyBuf, KeyBuf) {
    let mut min = KeyComponents {
        graph: pattern.graph.unwrap_or(ATOM_MIN),
        subject: pattern.subject.atom().unwrap_or(ATOM_MIN),
        predicate: pattern.predicate.atom().unwrap_or(ATOM_MIN),
        object: pattern.object.atom().unwrap_or(ATOM_MIN),
        valid_from: 0,
        valid_to: 0,
        tx_time: 0,
    };
    let mut max = KeyComponents {
        graph: pattern.graph.unwrap_or(ATOM_MAX),
        subject: pattern.subject.atom().unwrap_or(ATOM_MAX),
        predicate: pattern.predicate.atom().unwrap_or(ATOM_MAX),
        object: pattern.object.atom().unwrap_or(ATOM_MAX),
        valid_from: TIME_OPEN_END,
        valid_to: TIME_OPEN_END,
        tx_time: TIME_OPEN_END,
    };

    if order == IndexOrder::Tspo {
        if let Some(filter) = filter {
            max.valid_from = filter.valid_from_upper_bound();
        }
    }

    if !order.is_temporal() {
        min.valid_from = 0;
        min.valid_to = 0;
        min.tx_time = 0;
        max.valid_from = 0;
        max.valid_to = 0;
        max.tx_time = 0;
    }

    (
        encode_key(order, with_graph, &min),
        encode_key(order, with_graph, &max),
    )
}
