//! The bracket query syntax.
//!
//! ```text
//! expression  = conjunction | disjunction | negation | named | reference | literal
//! conjunction = "[" expression expression { expression } "]"
//! disjunction = "{" expression expression { expression } "}"
//! negation    = "~" expression
//! named       = "@" id expression
//! reference   = "$" id
//! literal     = unquoted | '"' any-char-except-quote '"'
//! ```
//!
//! `@id e` defines `id` as `e` and evaluates to `e`; `$id` substitutes
//! the stored definition by value, so later redefinitions do not reach
//! back into earlier references. Whitespace separates queries at the
//! top level; one source may contain many.
//!
//! A literal may not contain whitespace, quotes or the operator
//! characters; quote it if any of those are wanted. The quotes stay
//! part of the literal text (the server reads them as phrase markers).

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::expr::{Expr, SymbolTable};

/// Namespace used for queries given directly on the command line.
pub const CONSOLE_NAMESPACE: &str = "CONSOLE";

const REF_DEF_INIT: char = '@';
const EXP_REF_INIT: char = '$';
const CONJUNCTION_INIT: char = '[';
const CONJUNCTION_END: char = ']';
const DISJUNCTION_INIT: char = '{';
const DISJUNCTION_END: char = '}';
const NEGATION_OP: char = '~';
const QUOTE: char = '"';

fn is_operator(c: char) -> bool {
    matches!(c, '@' | '$' | '[' | ']' | '{' | '}' | '~')
}

/// Character cursor with line/column tracking for diagnostics.
struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Cursor {
    fn new(source: &str) -> Self {
        Cursor {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn bump(&mut self) {
        if let Some(c) = self.current() {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while self.current().is_some_and(|c| c.is_whitespace()) {
            self.bump();
        }
    }

    fn slice_from(&self, start: usize) -> String {
        self.chars[start..self.pos].iter().collect()
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }
}

/// One source of queries being consumed lazily.
pub struct QueryStream {
    cursor: Cursor,
}

impl QueryStream {
    pub fn new(source: &str) -> Self {
        QueryStream {
            cursor: Cursor::new(source),
        }
    }
}

/// A parsed top-level query.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    /// `{namespace}.{i}` with `i` counting 1-based per namespace.
    pub name: String,
    /// Like `name` but with the namespace reduced to its file name,
    /// suitable for deriving output file names.
    pub short_name: String,
    pub number: u32,
    /// The raw source text this query was parsed from.
    pub source: String,
    pub expr: Expr,
}

/// Recursive-descent parser for the bracket syntax.
///
/// One parser instance serves a whole run: the symbol table and the
/// named-expression environment persist across queries and across
/// input streams, so definitions made early stay referencable later.
pub struct BracketsParser {
    symbols: SymbolTable,
    names: HashMap<String, Expr>,
    namespace: String,
    query_number: u32,
    forbid_redefine: bool,
}

impl BracketsParser {
    pub fn new(forbid_redefine: bool) -> Self {
        BracketsParser {
            symbols: SymbolTable::new(),
            names: HashMap::new(),
            namespace: CONSOLE_NAMESPACE.to_string(),
            query_number: 0,
            forbid_redefine,
        }
    }

    /// Switch to a new namespace and restart its 1-based query counter.
    /// Symbols and named expressions are kept.
    pub fn set_namespace(&mut self, namespace: &str) {
        self.namespace = namespace.to_string();
        self.query_number = 0;
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Parse the next query out of `stream`, or `None` at end of input.
    pub fn next_query(&mut self, stream: &mut QueryStream) -> Result<Option<ParsedQuery>> {
        let cursor = &mut stream.cursor;
        cursor.skip_whitespace();
        if cursor.at_end() {
            return Ok(None);
        }
        self.query_number += 1;
        let name = format!("{}.{}", self.namespace, self.query_number);
        debug!(query = %name, "parsing");
        let start = cursor.pos;
        let expr = self.parse_expression(cursor)?;
        if cursor.current().is_some_and(|c| !c.is_whitespace()) {
            return Err(cursor.error(format!("extra characters in query <{name}>")));
        }
        let source = cursor.slice_from(start).trim().to_string();
        debug!(query = %name, "parsed");
        let stem = Path::new(&self.namespace)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.namespace.clone());
        Ok(Some(ParsedQuery {
            short_name: format!("{}.{}", stem, self.query_number),
            name,
            number: self.query_number,
            source,
            expr,
        }))
    }

    fn parse_expression(&mut self, cursor: &mut Cursor) -> Result<Expr> {
        cursor.skip_whitespace();
        match cursor.current() {
            Some(CONJUNCTION_INIT) => self.parse_group(cursor, true),
            Some(DISJUNCTION_INIT) => self.parse_group(cursor, false),
            Some(NEGATION_OP) => {
                cursor.bump();
                Ok(Expr::not(self.parse_expression(cursor)?))
            }
            Some(REF_DEF_INIT) => self.parse_named(cursor),
            Some(EXP_REF_INIT) => self.parse_reference(cursor),
            _ => self.parse_literal(cursor),
        }
    }

    /// Both bracket forms require at least two operands before the
    /// open-ended tail.
    fn parse_group(&mut self, cursor: &mut Cursor, is_conjunction: bool) -> Result<Expr> {
        cursor.bump();
        let mut children = vec![
            self.parse_expression(cursor)?,
            self.parse_expression(cursor)?,
        ];
        let end = if is_conjunction {
            CONJUNCTION_END
        } else {
            DISJUNCTION_END
        };
        cursor.skip_whitespace();
        while cursor.current() != Some(end) {
            if cursor.at_end() {
                return Err(cursor.error(format!("'{end}' expected")));
            }
            children.push(self.parse_expression(cursor)?);
            cursor.skip_whitespace();
        }
        cursor.bump();
        Ok(if is_conjunction {
            Expr::And(children)
        } else {
            Expr::Or(children)
        })
    }

    fn parse_named(&mut self, cursor: &mut Cursor) -> Result<Expr> {
        cursor.bump();
        let id = self.match_id(cursor)?;
        if self.names.contains_key(&id) {
            if self.forbid_redefine {
                return Err(cursor.error(format!("identifier \"{id}\" has already been defined")));
            }
            warn!(identifier = %id, "identifier has already been defined");
        }
        let sub = self.parse_expression(cursor)?;
        self.names.insert(id, sub.clone());
        Ok(sub)
    }

    fn parse_reference(&mut self, cursor: &mut Cursor) -> Result<Expr> {
        cursor.bump();
        let id = self.match_id(cursor)?;
        match self.names.get(&id) {
            Some(expr) => Ok(expr.clone()),
            None => Err(cursor.error(format!("identifier \"{id}\" has not been defined before"))),
        }
    }

    fn match_id(&mut self, cursor: &mut Cursor) -> Result<String> {
        let mut id = String::new();
        match cursor.current() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                id.push(c);
                cursor.bump();
            }
            _ => return Err(cursor.error("identifier expected")),
        }
        while let Some(c) = cursor.current() {
            if c.is_ascii_alphanumeric() || c == '_' {
                id.push(c);
                cursor.bump();
            } else {
                break;
            }
        }
        Ok(id)
    }

    fn parse_literal(&mut self, cursor: &mut Cursor) -> Result<Expr> {
        let text = match cursor.current() {
            None => return Err(cursor.error("literal expected")),
            Some(QUOTE) => {
                cursor.bump();
                let mut inner = String::new();
                loop {
                    match cursor.current() {
                        None => return Err(cursor.error("unterminated quoted literal")),
                        Some(QUOTE) => {
                            cursor.bump();
                            break;
                        }
                        Some(c) => {
                            inner.push(c);
                            cursor.bump();
                        }
                    }
                }
                format!("\"{inner}\"")
            }
            Some(c) if is_operator(c) => return Err(cursor.error("literal expected")),
            Some(_) => {
                let mut text = String::new();
                while let Some(c) = cursor.current() {
                    if c.is_whitespace() || is_operator(c) || c == QUOTE {
                        break;
                    }
                    text.push(c);
                    cursor.bump();
                }
                text
            }
        };
        Ok(Expr::Literal(self.symbols.intern(&text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Symbol;

    fn parse_all(source: &str) -> (Vec<ParsedQuery>, BracketsParser) {
        let mut parser = BracketsParser::new(false);
        let mut stream = QueryStream::new(source);
        let mut queries = Vec::new();
        while let Some(q) = parser.next_query(&mut stream).expect("parse failed") {
            queries.push(q);
        }
        (queries, parser)
    }

    fn parse_err(source: &str) -> Error {
        let mut parser = BracketsParser::new(false);
        let mut stream = QueryStream::new(source);
        loop {
            match parser.next_query(&mut stream) {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("expected a parse error for {source:?}"),
                Err(e) => return e,
            }
        }
    }

    fn literal(parser: &BracketsParser, text: &str) -> Symbol {
        parser.symbols().get(text).expect("literal interned")
    }

    #[test]
    fn test_single_literal() {
        let (queries, parser) = parse_all("foo");
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].name, "CONSOLE.1");
        assert_eq!(queries[0].source, "foo");
        assert_eq!(queries[0].expr, Expr::Literal(literal(&parser, "foo")));
    }

    #[test]
    fn test_whitespace_separates_queries() {
        let (queries, _) = parse_all("foo\n  bar baz");
        let names: Vec<&str> = queries.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["CONSOLE.1", "CONSOLE.2", "CONSOLE.3"]);
    }

    #[test]
    fn test_conjunction_and_negation() {
        let (queries, parser) = parse_all("[a ~b]");
        let a = literal(&parser, "a");
        let b = literal(&parser, "b");
        assert_eq!(
            queries[0].expr,
            Expr::And(vec![Expr::Literal(a), Expr::not(Expr::Literal(b))])
        );
    }

    #[test]
    fn test_group_tail_takes_more_operands() {
        let (queries, _) = parse_all("{a b c d}");
        match &queries[0].expr {
            Expr::Or(children) => assert_eq!(children.len(), 4),
            other => panic!("expected disjunction, got {other:?}"),
        }
    }

    #[test]
    fn test_literal_deduplication() {
        let (_, parser) = parse_all("{foo foo}");
        assert_eq!(parser.symbols().len(), 1);
    }

    #[test]
    fn test_quoted_literal_keeps_quotes_and_spaces() {
        let (queries, parser) = parse_all("\"foo [bar] baz\"");
        let symbol = literal(&parser, "\"foo [bar] baz\"");
        assert_eq!(queries[0].expr, Expr::Literal(symbol));
        assert_eq!(parser.symbols().resolve(symbol), "\"foo [bar] baz\"");
    }

    #[test]
    fn test_named_definition_substitutes_by_value() {
        let (queries, parser) = parse_all("@x [a b] {$x c}");
        assert_eq!(queries.len(), 2);
        let a = literal(&parser, "a");
        let b = literal(&parser, "b");
        let c = literal(&parser, "c");
        let inner = Expr::And(vec![Expr::Literal(a), Expr::Literal(b)]);
        assert_eq!(queries[0].expr, inner);
        assert_eq!(
            queries[1].expr,
            Expr::Or(vec![inner, Expr::Literal(c)])
        );
    }

    #[test]
    fn test_reference_snapshots_do_not_follow_redefinition() {
        let (queries, parser) = parse_all("@x a {$x b} @x c {$x b}");
        let a = literal(&parser, "a");
        let b = literal(&parser, "b");
        let c = literal(&parser, "c");
        assert_eq!(
            queries[1].expr,
            Expr::Or(vec![Expr::Literal(a), Expr::Literal(b)])
        );
        assert_eq!(
            queries[3].expr,
            Expr::Or(vec![Expr::Literal(c), Expr::Literal(b)])
        );
    }

    #[test]
    fn test_redefinition_is_an_error_when_forbidden() {
        let mut parser = BracketsParser::new(true);
        let mut stream = QueryStream::new("@x a @x b");
        parser.next_query(&mut stream).expect("first definition");
        let err = parser.next_query(&mut stream).expect_err("redefinition");
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.to_string().contains("already been defined"));
    }

    #[test]
    fn test_undefined_reference_is_fatal_with_position() {
        let err = parse_err("\n\n  $x");
        match err {
            Error::Parse { line, column, message } => {
                assert_eq!((line, column), (3, 5));
                assert!(message.contains("has not been defined"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_single_operand_group_is_rejected() {
        let err = parse_err("[a]");
        assert!(err.to_string().contains("literal expected"));
    }

    #[test]
    fn test_unmatched_bracket() {
        let err = parse_err("[a b");
        assert!(err.to_string().contains("']' expected"));
    }

    #[test]
    fn test_unterminated_quote() {
        let err = parse_err("\"abc");
        assert!(err.to_string().contains("unterminated quoted literal"));
    }

    #[test]
    fn test_identifier_expected() {
        let err = parse_err("@1 a");
        assert!(err.to_string().contains("identifier expected"));
    }

    #[test]
    fn test_namespace_switch_resets_counter_but_keeps_names() {
        let mut parser = BracketsParser::new(false);
        let mut stream = QueryStream::new("@x foo");
        parser.next_query(&mut stream).expect("definition");

        parser.set_namespace("queries/batch.in");
        let mut stream = QueryStream::new("$x");
        let q = parser
            .next_query(&mut stream)
            .expect("reference resolves across streams")
            .expect("one query");
        assert_eq!(q.name, "queries/batch.in.1");
        assert_eq!(q.short_name, "batch.in.1");
        assert_eq!(q.expr, Expr::Literal(literal(&parser, "foo")));
    }

    #[test]
    fn test_source_text_is_recorded() {
        let (queries, _) = parse_all("  {a\n   b}  ");
        assert_eq!(queries[0].source, "{a\n   b}");
    }
}
