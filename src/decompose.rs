//! Inclusion–exclusion decomposition of a DNF query.
//!
//! For disjuncts `T1 … Tn` the cardinality of the union is the signed
//! sum over every non-empty subset S of `(-1)^(|S|-1) * |⋂ S|`. Each
//! subset becomes one conjunctive sub-query; enumeration is streamed so
//! memory stays O(n) even though there are `2^n - 1` subsets.

use crate::dnf::{Dnf, Term};

/// One conjunctive sub-query with its inclusion–exclusion sign.
#[derive(Debug, Clone)]
pub struct Subquery {
    /// 1-based position in the enumeration, for log lines.
    pub number: u64,
    pub term: Term,
    /// `(-1)^(p-1)` where `p` is the subset size.
    pub sign: i64,
}

/// Subset enumerator over the terms of a DNF.
pub struct Decomposer<'a> {
    terms: &'a [Term],
}

impl<'a> Decomposer<'a> {
    pub fn new(dnf: &'a Dnf) -> Self {
        Decomposer {
            terms: dnf.terms(),
        }
    }

    /// `2^n - 1` for `n` disjuncts.
    pub fn total(&self) -> u64 {
        (1u64 << self.terms.len()) - 1
    }

    /// Lazily enumerate all non-empty subsets: size 1 first, then 2,
    /// and so on; within a size, subsets come in lexicographic
    /// combination order.
    pub fn subqueries(&self) -> Subqueries<'a> {
        Subqueries {
            terms: self.terms,
            indices: vec![0],
            number: 0,
            exhausted: self.terms.is_empty(),
        }
    }
}

pub struct Subqueries<'a> {
    terms: &'a [Term],
    /// Indices of the current combination, always strictly increasing.
    indices: Vec<usize>,
    number: u64,
    exhausted: bool,
}

impl Subqueries<'_> {
    /// Advance to the next lexicographic combination of the current
    /// size, or grow the size by one; false once everything is done.
    fn advance(&mut self) -> bool {
        let n = self.terms.len();
        let p = self.indices.len();
        // Find the rightmost index that can still move right.
        for slot in (0..p).rev() {
            if self.indices[slot] < n - (p - slot) {
                self.indices[slot] += 1;
                for later in (slot + 1)..p {
                    self.indices[later] = self.indices[later - 1] + 1;
                }
                return true;
            }
        }
        if p < n {
            self.indices = (0..=p).collect();
            return true;
        }
        false
    }
}

impl Iterator for Subqueries<'_> {
    type Item = Subquery;

    fn next(&mut self) -> Option<Subquery> {
        if self.exhausted {
            return None;
        }
        let term = self
            .indices
            .iter()
            .fold(Term::default(), |acc, &i| acc.merge(&self.terms[i]));
        self.number += 1;
        let sign = if self.indices.len() % 2 == 1 { 1 } else { -1 };
        let subquery = Subquery {
            number: self.number,
            term,
            sign,
        };
        if !self.advance() {
            self.exhausted = true;
        }
        Some(subquery)
    }
}
