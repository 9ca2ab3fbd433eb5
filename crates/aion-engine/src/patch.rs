//! N3 Patch execution: WHERE-bound DELETE/INSERT against one graph.

use crate::operators::bgp::execute_bgp;
use crate::operators::collect_solutions;
use crate::solution::{Solution, VarRegistry};
use crate::store::{PrimOp, Store};
use aion_common::cancel::CancelToken;
use aion_common::key::{EntryMeta, KeyComponents};
use aion_common::term::{is_variable, Atom, PatternTerm, TriplePattern, ATOM_MAX};
use aion_common::time::now_millis;
use aion_common::{AionError, Result};
use std::collections::HashSet;

/// One position of a patch triple, as delivered by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchTerm {
    /// A ground RDF term in lexical form.
    Term(String),
    /// A variable (`?name`).
    Var(String),
}

impl PatchTerm {
    /// Classifies raw pattern text.
    pub fn from_text(text: &str) -> Self {
        if is_variable(text) {
            PatchTerm::Var(text.to_string())
        } else {
            PatchTerm::Term(text.to_string())
        }
    }

    fn is_var(&self) -> bool {
        matches!(self, PatchTerm::Var(_))
    }
}

impl From<&str> for PatchTerm {
    fn from(text: &str) -> Self {
        Self::from_text(text)
    }
}

/// A triple template inside a patch.
#[derive(Debug, Clone)]
pub struct PatchTriple {
    /// Subject position.
    pub subject: PatchTerm,
    /// Predicate position.
    pub predicate: PatchTerm,
    /// Object position.
    pub object: PatchTerm,
}

impl PatchTriple {
    /// Builds a template from raw pattern texts.
    pub fn new(subject: &str, predicate: &str, object: &str) -> Self {
        Self {
            subject: PatchTerm::from_text(subject),
            predicate: PatchTerm::from_text(predicate),
            object: PatchTerm::from_text(object),
        }
    }

    fn has_var(&self) -> bool {
        self.subject.is_var() || self.predicate.is_var() || self.object.is_var()
    }
}

/// A parsed patch: bind WHERE, apply DELETES then INSERTS atomically.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    /// Patterns binding the patch's variables.
    pub where_patterns: Vec<PatchTriple>,
    /// Triple templates to delete per binding.
    pub deletes: Vec<PatchTriple>,
    /// Triple templates to insert per binding.
    pub inserts: Vec<PatchTriple>,
}

/// Counts reported by a committed patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Ground triples whose deletion affected the store.
    pub deleted: usize,
    /// Ground triples whose insertion affected the store.
    pub inserted: usize,
}

impl Store {
    /// Executes a patch against a target graph.
    ///
    /// Readers are not blocked and see the pre-patch state until commit.
    /// Any failure while applying rolls the batch back completely and
    /// surfaces `PatchFailed`; on success the batch commits through the
    /// metadata fence and the counts are reported.
    pub fn patch(&self, patch: &Patch, graph: Option<&str>) -> Result<PatchOutcome> {
        let templates_have_vars = patch.deletes.iter().any(PatchTriple::has_var)
            || patch.inserts.iter().any(PatchTriple::has_var);
        if patch.where_patterns.is_empty() && templates_have_vars {
            return Err(AionError::MalformedPatch(
                "variables in DELETE/INSERT require a WHERE clause".to_string(),
            ));
        }

        let _span = tracing::info_span!("patch", graph = graph.unwrap_or("default")).entered();
        let _guard = self.lock_writer()?;
        let graph_atom = self.write_graph(graph)?;

        let (bindings, vars) = self.bind_where(patch, graph_atom)?;

        let mut undo: Vec<PrimOp> = Vec::new();
        let result = self.apply(patch, graph_atom, &bindings, &vars, &mut undo);

        match result {
            Ok(outcome) => {
                self.commit().map_err(|e| {
                    // Commit failure still means nothing is promised; the
                    // metadata fence never moved.
                    self.rollback(std::mem::take(&mut undo));
                    AionError::PatchFailed(e.to_string())
                })?;
                tracing::info!(
                    deleted = outcome.deleted,
                    inserted = outcome.inserted,
                    "patch committed"
                );
                Ok(outcome)
            }
            Err(err) => {
                self.rollback(undo);
                Err(AionError::PatchFailed(err.to_string()))
            }
        }
    }

    /// Evaluates WHERE against the target graph. An absent WHERE yields a
    /// single empty binding so ground templates apply once.
    fn bind_where(&self, patch: &Patch, graph: Atom) -> Result<(Vec<Solution>, PatchVars)> {
        if patch.where_patterns.is_empty() {
            return Ok((vec![Solution::new(0)], PatchVars::default()));
        }

        let mut vars = VarRegistry::new();
        let patterns: Vec<TriplePattern> = patch
            .where_patterns
            .iter()
            .map(|template| self.where_pattern(template, graph, &mut vars))
            .collect();

        // Register template-only variables too, so substitution can see
        // they stay unbound rather than out of range.
        for template in patch.deletes.iter().chain(patch.inserts.iter()) {
            for term in [&template.subject, &template.predicate, &template.object] {
                if let PatchTerm::Var(name) = term {
                    vars.var(name);
                }
            }
        }

        let width = vars.width();
        let mut iter = execute_bgp(
            self,
            &patterns,
            None,
            Solution::new(width),
            CancelToken::new(),
        )?;
        let bindings = collect_solutions(&mut iter)?;
        Ok((bindings, PatchVars::from(&vars)))
    }

    fn where_pattern(
        &self,
        template: &PatchTriple,
        graph: Atom,
        vars: &mut VarRegistry,
    ) -> TriplePattern {
        let position = |term: &PatchTerm, vars: &mut VarRegistry| match term {
            PatchTerm::Var(name) => PatternTerm::Var(vars.var(name)),
            PatchTerm::Term(text) => {
                PatternTerm::Bound(self.atom_of(text).unwrap_or(ATOM_MAX))
            }
        };
        let mut pattern = TriplePattern::new(
            position(&template.subject, vars),
            position(&template.predicate, vars),
            position(&template.object, vars),
        );
        if self.with_graph() {
            pattern.graph = Some(graph);
        }
        pattern
    }

    /// Applies DELETES then INSERTS for every binding, logging undo
    /// operations. Templates still containing unbound variables after
    /// substitution are skipped.
    fn apply(
        &self,
        patch: &Patch,
        graph: Atom,
        bindings: &[Solution],
        vars: &PatchVars,
        undo: &mut Vec<PrimOp>,
    ) -> Result<PatchOutcome> {
        let now = now_millis();
        let mut outcome = PatchOutcome {
            deleted: 0,
            inserted: 0,
        };

        // Deletes resolve terms read-only: deleting an unknown term is a
        // no-op, never an intern.
        let mut applied_deletes: HashSet<(Atom, Atom, Atom)> = HashSet::new();
        for binding in bindings {
            for template in &patch.deletes {
                let Some(ground) = self.ground_readonly(template, binding, vars) else {
                    continue;
                };
                if !applied_deletes.insert(ground) {
                    continue;
                }
                let (s, p, o) = ground;
                let affected = if self.options().temporal {
                    self.tombstone_current(graph, s, p, o, now, undo)? > 0
                } else {
                    let c = KeyComponents {
                        graph,
                        subject: s,
                        predicate: p,
                        object: o,
                        ..Default::default()
                    };
                    self.raw_remove(&c, undo)?
                };
                if affected {
                    outcome.deleted += 1;
                }
            }
        }

        let mut applied_inserts: HashSet<(Atom, Atom, Atom)> = HashSet::new();
        for binding in bindings {
            for template in &patch.inserts {
                let Some((s, p, o)) = self.ground_interning(template, binding, vars)? else {
                    continue;
                };
                if !applied_inserts.insert((s, p, o)) {
                    continue;
                }
                let affected = if self.options().temporal {
                    self.insert_current_atoms(graph, s, p, o, now, undo)?
                } else {
                    let c = KeyComponents {
                        graph,
                        subject: s,
                        predicate: p,
                        object: o,
                        ..Default::default()
                    };
                    self.raw_insert(&c, &EntryMeta::default(), undo)?
                };
                if affected {
                    outcome.inserted += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// Grounds a template without interning. None when a position stays
    /// unbound or names an unknown term.
    fn ground_readonly(
        &self,
        template: &PatchTriple,
        binding: &Solution,
        vars: &PatchVars,
    ) -> Option<(Atom, Atom, Atom)> {
        let resolve = |term: &PatchTerm| match term {
            PatchTerm::Var(name) => vars.lookup(name).and_then(|v| binding.get(v)),
            PatchTerm::Term(text) => self.atom_of(text),
        };
        Some((
            resolve(&template.subject)?,
            resolve(&template.predicate)?,
            resolve(&template.object)?,
        ))
    }

    /// Grounds a template, interning fresh terms. Ok(None) when a
    /// position stays unbound; Err when interning fails (rolling the
    /// patch back).
    fn ground_interning(
        &self,
        template: &PatchTriple,
        binding: &Solution,
        vars: &PatchVars,
    ) -> Result<Option<(Atom, Atom, Atom)>> {
        let resolve = |term: &PatchTerm| -> Result<Option<Atom>> {
            match term {
                PatchTerm::Var(name) => Ok(vars.lookup(name).and_then(|v| binding.get(v))),
                PatchTerm::Term(text) => self.intern_term(text).map(Some),
            }
        };
        let Some(s) = resolve(&template.subject)? else {
            return Ok(None);
        };
        let Some(p) = resolve(&template.predicate)? else {
            return Ok(None);
        };
        let Some(o) = resolve(&template.object)? else {
            return Ok(None);
        };
        Ok(Some((s, p, o)))
    }
}

/// Variable-name resolution carried from WHERE binding to template
/// substitution.
#[derive(Debug, Clone, Default)]
pub(crate) struct PatchVars {
    by_name: std::collections::HashMap<String, aion_common::term::VarId>,
}

impl PatchVars {
    fn lookup(&self, name: &str) -> Option<aion_common::term::VarId> {
        let name = name.strip_prefix('?').unwrap_or(name);
        self.by_name.get(name).copied()
    }
}

impl From<&VarRegistry> for PatchVars {
    fn from(registry: &VarRegistry) -> Self {
        let mut by_name = std::collections::HashMap::new();
        for id in 0..registry.width() {
            if let Some(name) = registry.name(id) {
                by_name.insert(name.to_string(), id);
            }
        }
        Self { by_name }
    }
}
