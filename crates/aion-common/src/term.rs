//! RDF terms, atoms, and query patterns.
//!
//! An atom is a 32-bit id interned for the UTF-8 lexical form of an RDF
//! term: `<iri>`, `"literal"`, `"lit"@lang`, `"lit"^^<dt>`, or `_:bnode`.
//! Patterns resolve variables to an explicit tagged sum at plan time so
//! hot loops never repeat the `?`-prefix string test.

/// Interned identifier for an RDF term's byte content.
pub type Atom = u32;

/// Identifier for a query variable, assigned per query at plan time.
pub type VarId = u16;

/// Reserved sentinel atom sorting below every assigned atom. Never assigned.
pub const ATOM_MIN: Atom = 0;

/// Reserved sentinel atom sorting above every assigned atom. Never assigned.
pub const ATOM_MAX: Atom = u32::MAX;

/// The default graph's atom. The atom store interns the default graph IRI
/// first, so this id is stable across every store.
pub const DEFAULT_GRAPH: Atom = 1;

/// Lexical form interned for the default graph.
pub const DEFAULT_GRAPH_IRI: &str = "<urn:aion:graph:default>";

/// Returns true if the lexical form denotes an IRI (`<...>`).
#[inline]
pub fn is_iri(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == b'<' && bytes[bytes.len() - 1] == b'>'
}

/// Returns true if the lexical form denotes a literal (`"..."` with
/// optional language tag or datatype suffix).
#[inline]
pub fn is_literal(bytes: &[u8]) -> bool {
    !bytes.is_empty() && bytes[0] == b'"'
}

/// Returns true if the lexical form denotes a blank node (`_:...`).
#[inline]
pub fn is_blank(bytes: &[u8]) -> bool {
    bytes.starts_with(b"_:")
}

/// Returns true if the pattern text denotes a variable (`?name`).
#[inline]
pub fn is_variable(text: &str) -> bool {
    text.starts_with('?')
}

/// Extracts the plain lexical value of a literal: the content between the
/// quotes, without language tag or datatype suffix. Non-literals are
/// returned whole (IRIs without the angle brackets).
pub fn lexical_value(bytes: &[u8]) -> &[u8] {
    if is_literal(bytes) {
        // Find the closing quote scanning from the end; suffixes (@lang,
        // ^^<dt>) never contain an unescaped quote.
        if let Some(end) = bytes.iter().rposition(|&b| b == b'"') {
            if end > 0 {
                return &bytes[1..end];
            }
        }
        bytes
    } else if is_iri(bytes) {
        &bytes[1..bytes.len() - 1]
    } else {
        bytes
    }
}

/// A fully ground triple plus graph dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quad {
    /// Subject atom.
    pub subject: Atom,
    /// Predicate atom.
    pub predicate: Atom,
    /// Object atom.
    pub object: Atom,
    /// Graph atom (DEFAULT_GRAPH when unnamed).
    pub graph: Atom,
}

impl Quad {
    /// Creates a quad in the default graph.
    pub fn triple(subject: Atom, predicate: Atom, object: Atom) -> Self {
        Self {
            subject,
            predicate,
            object,
            graph: DEFAULT_GRAPH,
        }
    }

    /// Creates a quad in a named graph.
    pub fn new(subject: Atom, predicate: Atom, object: Atom, graph: Atom) -> Self {
        Self {
            subject,
            predicate,
            object,
            graph,
        }
    }
}

/// One position of a triple pattern, resolved at plan time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternTerm {
    /// A bound term; matches only this atom.
    Bound(Atom),
    /// A named variable; matches anything and binds it.
    Var(VarId),
    /// An anonymous wildcard; matches anything and binds nothing.
    Any,
}

impl PatternTerm {
    /// Returns the bound atom, if this position is bound.
    #[inline]
    pub fn atom(&self) -> Option<Atom> {
        match self {
            PatternTerm::Bound(a) => Some(*a),
            _ => None,
        }
    }

    /// Returns the variable id, if this position is a named variable.
    #[inline]
    pub fn var(&self) -> Option<VarId> {
        match self {
            PatternTerm::Var(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns true if this position constrains the match.
    #[inline]
    pub fn is_bound(&self) -> bool {
        matches!(self, PatternTerm::Bound(_))
    }
}

/// A triple pattern with an optional graph filter.
///
/// When `graph` is None the pattern matches across all graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriplePattern {
    /// Subject position.
    pub subject: PatternTerm,
    /// Predicate position.
    pub predicate: PatternTerm,
    /// Object position.
    pub object: PatternTerm,
    /// Optional graph restriction.
    pub graph: Option<Atom>,
}

impl TriplePattern {
    /// Creates a pattern with no graph restriction.
    pub fn new(subject: PatternTerm, predicate: PatternTerm, object: PatternTerm) -> Self {
        Self {
            subject,
            predicate,
            object,
            graph: None,
        }
    }

    /// Restricts the pattern to one graph.
    pub fn in_graph(mut self, graph: Atom) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Returns the number of bound positions (0-3).
    pub fn bound_count(&self) -> u8 {
        self.subject.is_bound() as u8
            + self.predicate.is_bound() as u8
            + self.object.is_bound() as u8
    }

    /// Returns true if a ground quad matches this pattern's bound positions
    /// and graph restriction.
    pub fn matches(&self, quad: &Quad) -> bool {
        if let Some(g) = self.graph {
            if g != quad.graph {
                return false;
            }
        }
        self.subject.atom().map_or(true, |a| a == quad.subject)
            && self.predicate.atom().map_or(true, |a| a == quad.predicate)
            && self.object.atom().map_or(true, |a| a == quad.object)
    }

    /// Iterates the named variables of this pattern in S, P, O order.
    pub fn variables(&self) -> impl Iterator<Item = VarId> + '_ {
        [self.subject, self.predicate, self.object]
            .into_iter()
            .filter_map(|t| t.var())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_classification() {
        assert!(is_iri(b"<http://example.org/a>"));
        assert!(!is_iri(b"\"literal\""));
        assert!(is_literal(b"\"hello\""));
        assert!(is_literal(b"\"hello\"@en"));
        assert!(is_literal(b"\"5\"^^<http://www.w3.org/2001/XMLSchema#integer>"));
        assert!(is_blank(b"_:b0"));
        assert!(!is_blank(b"<urn:a>"));
    }

    #[test]
    fn test_is_variable() {
        assert!(is_variable("?x"));
        assert!(!is_variable("<urn:a>"));
        assert!(!is_variable("\"?x\""));
    }

    #[test]
    fn test_lexical_value() {
        assert_eq!(lexical_value(b"\"hello\""), b"hello");
        assert_eq!(lexical_value(b"\"hello\"@en"), b"hello");
        assert_eq!(
            lexical_value(b"\"5\"^^<http://www.w3.org/2001/XMLSchema#integer>"),
            b"5"
        );
        assert_eq!(lexical_value(b"<urn:a>"), b"urn:a");
        assert_eq!(lexical_value(b"_:b0"), b"_:b0");
    }

    #[test]
    fn test_sentinels_ordering() {
        assert!(ATOM_MIN < DEFAULT_GRAPH);
        assert!(DEFAULT_GRAPH < ATOM_MAX);
    }

    #[test]
    fn test_pattern_term_accessors() {
        assert_eq!(PatternTerm::Bound(7).atom(), Some(7));
        assert_eq!(PatternTerm::Var(2).atom(), None);
        assert_eq!(PatternTerm::Var(2).var(), Some(2));
        assert_eq!(PatternTerm::Any.var(), None);
        assert!(PatternTerm::Bound(7).is_bound());
        assert!(!PatternTerm::Any.is_bound());
    }

    #[test]
    fn test_pattern_matches() {
        let quad = Quad::new(10, 20, 30, 2);
        let pattern = TriplePattern::new(
            PatternTerm::Bound(10),
            PatternTerm::Var(0),
            PatternTerm::Any,
        );
        assert!(pattern.matches(&quad));
        assert!(pattern.in_graph(2).matches(&quad));
        assert!(!pattern.in_graph(3).matches(&quad));

        let wrong_subject = TriplePattern::new(
            PatternTerm::Bound(11),
            PatternTerm::Any,
            PatternTerm::Any,
        );
        assert!(!wrong_subject.matches(&quad));
    }

    #[test]
    fn test_pattern_bound_count() {
        let p = TriplePattern::new(
            PatternTerm::Bound(1),
            PatternTerm::Var(0),
            PatternTerm::Bound(2),
        );
        assert_eq!(p.bound_count(), 2);
    }

    #[test]
    fn test_pattern_variables() {
        let p = TriplePattern::new(
            PatternTerm::Var(3),
            PatternTerm::Bound(1),
            PatternTerm::Var(5),
        );
        let vars: Vec<_> = p.variables().collect();
        assert_eq!(vars, vec![3, 5]);
    }

    #[test]
    fn test_quad_default_graph() {
        let quad = Quad::triple(1, 2, 3);
        assert_eq!(quad.graph, DEFAULT_GRAPH);
    }
}
