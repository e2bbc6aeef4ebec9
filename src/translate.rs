//! Rendering conjunctive sub-queries into the server's wire syntax.

use crate::dnf::Term;
use crate::expr::SymbolTable;

/// Renders a conjunction as whitespace-separated search terms, negated
/// atoms prefixed with `NOT`.
///
/// Atoms are sorted by their literal text before rendering, so the
/// output is invariant under permutation of the input conjunction and
/// can double as the cache key.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpacesTranslator;

impl SpacesTranslator {
    pub fn render(&self, term: &Term, symbols: &SymbolTable) -> String {
        let mut atoms: Vec<(&str, bool)> = term
            .atoms()
            .map(|a| (symbols.resolve(a.symbol), a.negated))
            .collect();
        atoms.sort();

        let mut query = String::new();
        for (literal, negated) in atoms {
            if !query.is_empty() {
                query.push(' ');
            }
            if negated {
                query.push_str("NOT ");
            }
            query.push_str(literal);
        }
        query
    }
}
