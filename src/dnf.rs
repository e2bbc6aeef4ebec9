//! Disjunctive-normal-form rewriting.
//!
//! Negations are pushed to the literals, AND distributed over OR, and
//! the resulting terms simplified by idempotence and absorption. The
//! optional deep pass additionally merges adjacent terms; it can shrink
//! the disjunct count at exponential worst-case cost, so it is off by
//! default.

use std::collections::BTreeSet;

use crate::expr::{Expr, Symbol};

/// One signed literal inside a conjunction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Atom {
    pub symbol: Symbol,
    pub negated: bool,
}

impl Atom {
    pub fn positive(symbol: Symbol) -> Self {
        Atom {
            symbol,
            negated: false,
        }
    }

    pub fn negative(symbol: Symbol) -> Self {
        Atom {
            symbol,
            negated: true,
        }
    }

    fn complement(self) -> Self {
        Atom {
            symbol: self.symbol,
            negated: !self.negated,
        }
    }
}

/// A conjunction of distinct signed literals.
///
/// Atoms are kept in a sorted set, which makes idempotence (`a & a`)
/// structural and gives terms a total order for deterministic output.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Term {
    atoms: BTreeSet<Atom>,
}

impl Term {
    pub fn from_atom(atom: Atom) -> Self {
        Term {
            atoms: BTreeSet::from([atom]),
        }
    }

    pub fn atoms(&self) -> impl Iterator<Item = &Atom> {
        self.atoms.iter()
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// AND of two conjunctions: the union of their atoms.
    pub fn merge(&self, other: &Term) -> Term {
        Term {
            atoms: self.atoms.union(&other.atoms).copied().collect(),
        }
    }

    /// A term containing both `v` and `~v` denotes the empty result set.
    pub fn is_contradictory(&self) -> bool {
        self.atoms
            .iter()
            .any(|a| a.negated && self.atoms.contains(&a.complement()))
    }

    /// `self ⊆ other`: every result matching `other` matches `self`,
    /// so `other` is absorbed.
    fn subsumes(&self, other: &Term) -> bool {
        self.atoms.is_subset(&other.atoms)
    }

    fn eval(&self, assignment: &impl Fn(Symbol) -> bool) -> bool {
        self.atoms
            .iter()
            .all(|a| assignment(a.symbol) != a.negated)
    }

    fn to_expr(&self) -> Expr {
        let mut children: Vec<Expr> = self
            .atoms
            .iter()
            .map(|a| {
                if a.negated {
                    Expr::not(Expr::Literal(a.symbol))
                } else {
                    Expr::Literal(a.symbol)
                }
            })
            .collect();
        if children.len() == 1 {
            children.pop().expect("non-empty term")
        } else {
            Expr::And(children)
        }
    }
}

/// A disjunction of conjunctive terms. Empty means constant false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dnf {
    terms: Vec<Term>,
}

impl Dnf {
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Number of disjuncts.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// The AND of every term: the largest conjunction any subset of
    /// disjuncts can produce, used as the worst-case length probe.
    pub fn longest_term(&self) -> Term {
        self.terms
            .iter()
            .fold(Term::default(), |acc, t| acc.merge(t))
    }

    pub fn eval(&self, assignment: &impl Fn(Symbol) -> bool) -> bool {
        self.terms.iter().any(|t| t.eval(assignment))
    }

    /// Rebuild an expression tree; `None` for the constant-false form.
    pub fn to_expr(&self) -> Option<Expr> {
        match self.terms.len() {
            0 => None,
            1 => Some(self.terms[0].to_expr()),
            _ => Some(Expr::Or(self.terms.iter().map(Term::to_expr).collect())),
        }
    }
}

/// Rewrite `expr` into disjunctive normal form.
pub fn to_dnf(expr: &Expr, deep_simplify: bool) -> Dnf {
    let mut terms = build(expr, false);
    normalize(&mut terms);
    if deep_simplify {
        minimize(&mut terms);
    }
    Dnf { terms }
}

/// De Morgan + distribution in one recursive pass. `negated` tracks the
/// parity of enclosing negations.
fn build(expr: &Expr, negated: bool) -> Vec<Term> {
    match (expr, negated) {
        (Expr::Literal(symbol), negated) => vec![Term::from_atom(Atom {
            symbol: *symbol,
            negated,
        })],
        (Expr::Not(child), negated) => build(child, !negated),
        (Expr::And(children), false) | (Expr::Or(children), true) => {
            // Conjunctive position: distribute over the children's terms.
            let mut acc = vec![Term::default()];
            for child in children {
                let child_terms = build(child, negated);
                let mut next = Vec::with_capacity(acc.len() * child_terms.len());
                for left in &acc {
                    for right in &child_terms {
                        next.push(left.merge(right));
                    }
                }
                acc = next;
            }
            acc
        }
        (Expr::Or(children), false) | (Expr::And(children), true) => children
            .iter()
            .flat_map(|child| build(child, negated))
            .collect(),
    }
}

/// Drop contradictions and duplicates, apply absorption, fix the order.
fn normalize(terms: &mut Vec<Term>) {
    terms.retain(|t| !t.is_contradictory());
    terms.sort();
    terms.dedup();
    let kept = terms.clone();
    terms.retain(|t| {
        !kept
            .iter()
            .any(|other| other != t && other.subsumes(t))
    });
}

/// Adjacency merging to a fixpoint: `(x & a) | (x & ~a)` becomes `x`.
/// Each merge strictly shrinks the total atom count, so this terminates.
fn minimize(terms: &mut Vec<Term>) {
    loop {
        let Some((i, j, merged)) = find_adjacent(terms) else {
            break;
        };
        terms.remove(j);
        terms.remove(i);
        terms.push(merged);
        normalize(terms);
    }
}

fn find_adjacent(terms: &[Term]) -> Option<(usize, usize, Term)> {
    for i in 0..terms.len() {
        for j in (i + 1)..terms.len() {
            if terms[i].len() != terms[j].len() || terms[i].len() < 2 {
                continue;
            }
            let mut diff = terms[i].atoms.symmetric_difference(&terms[j].atoms);
            let (first, second) = (diff.next(), diff.next());
            if diff.next().is_some() {
                continue;
            }
            if let (Some(a), Some(b)) = (first, second) {
                if a.symbol == b.symbol && a.negated != b.negated {
                    let mut merged = terms[i].clone();
                    merged.atoms.remove(a);
                    merged.atoms.remove(b);
                    return Some((i, j, merged));
                }
            }
        }
    }
    None
}
