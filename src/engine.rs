//! Query evaluation.
//!
//! One top-level query flows through: DNF rewrite, worst-case length
//! probe, lazy subset enumeration, cache consult, issue, signed
//! accumulation. Sub-queries run strictly serially; they all draw on
//! the same server-side rate budget, so parallelizing them would only
//! trade sleeps for retries.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::cache::QueryCache;
use crate::decompose::Decomposer;
use crate::dnf::{to_dnf, Dnf};
use crate::error::{Error, Result};
use crate::expr::SymbolTable;
use crate::issue::{Issued, QueryIssuer};
use crate::parse::ParsedQuery;
use crate::translate::SpacesTranslator;

/// Past this many disjuncts the subset count no longer fits the
/// bookkeeping counters; no realistic query comes close.
const MAX_DISJUNCTS: usize = 63;

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Enumerate and render without contacting the server.
    pub simulate: bool,
    /// Drop all cache entries (and re-apply input caches) per query.
    pub reset_cache: bool,
    /// Expensive logical minimization before decomposing.
    pub deep_simplify: bool,
    /// Fixed seed for the delay jitter, for reproducible runs.
    pub seed: Option<u64>,
}

/// Statistics for one evaluated query.
#[derive(Debug, Clone)]
pub struct RunStats {
    /// Signed inclusion–exclusion sum over all obtained counts.
    pub result: i64,
    /// `2^n - 1` for `n` disjuncts.
    pub subqueries_total: u64,
    /// Cache misses: issued, or in simulation would-be-issued.
    pub issued: u64,
    /// Issued sub-queries that produced a count.
    pub issued_ok: u64,
    /// Errored sub-queries whose missing count would have been added.
    pub errors_positive: u64,
    /// Errored sub-queries whose missing count would have been subtracted.
    pub errors_negative: u64,
    pub estimated_min: Duration,
    pub estimated_max: Duration,
    pub estimated_cached_min: Duration,
    pub estimated_cached_max: Duration,
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub longest_subquery: String,
}

struct Outcome {
    result: i64,
    issued: u64,
    issued_ok: u64,
    errors_positive: u64,
    errors_negative: u64,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
}

pub struct Engine<I, C> {
    issuer: I,
    cache: C,
    translator: SpacesTranslator,
    options: EngineOptions,
    /// Merged `--input-cache` contents, re-applied after a reset.
    input_snapshot: HashMap<String, u64>,
    /// Sub-queries already accounted for in simulation; never persisted.
    simulation_seen: HashSet<String>,
    cancel: Arc<AtomicBool>,
}

impl<I: QueryIssuer, C: QueryCache> Engine<I, C> {
    pub fn new(issuer: I, cache: C, options: EngineOptions, cancel: Arc<AtomicBool>) -> Self {
        Engine {
            issuer,
            cache,
            translator: SpacesTranslator,
            options,
            input_snapshot: HashMap::new(),
            simulation_seen: HashSet::new(),
            cancel,
        }
    }

    /// Merge a read-only input cache into the active cache. Kept
    /// around so a cache reset can re-apply it.
    pub fn merge_input_cache(&mut self, entries: HashMap<String, u64>) {
        self.cache.update(&entries);
        self.input_snapshot.extend(entries);
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn sync_cache(&mut self) -> Result<()> {
        self.cache.sync()
    }

    /// Evaluate one parsed query to its exact result count.
    pub async fn evaluate(
        &mut self,
        query: &ParsedQuery,
        symbols: &SymbolTable,
    ) -> Result<RunStats> {
        self.issuer.reseed(self.options.seed);
        if self.options.reset_cache {
            debug!(query = %query.name, "resetting cache");
            self.cache.reset();
            self.simulation_seen.clear();
            self.cache.update(&self.input_snapshot);
        }

        debug!(query = %query.name, "converting to disjunctive normal form");
        let dnf = to_dnf(&query.expr, self.options.deep_simplify);
        debug!(query = %query.name, disjuncts = dnf.len(), "converted to DNF");
        if dnf.len() > MAX_DISJUNCTS {
            return Err(Error::Engine(format!(
                "query <{}> expands to {} disjuncts; the subset enumeration would not terminate",
                query.name,
                dnf.len()
            )));
        }

        let longest_subquery = self.translator.render(&dnf.longest_term(), symbols);
        debug!(
            query = %query.name,
            length = longest_subquery.chars().count(),
            longest = %longest_subquery,
            "longest sub-query"
        );
        if !self.issuer.check_length(&query.name, &longest_subquery)? {
            debug!(
                query = %query.name,
                "sub-queries exceeding the maximum allowed length will be discarded"
            );
        }

        let total = Decomposer::new(&dnf).total();
        info!(query = %query.name, subqueries = total, "sub-queries amount");
        let (estimated_min, estimated_max) = self.issuer.estimated_time(total);
        info!(
            query = %query.name,
            min_secs = estimated_min.num_seconds(),
            max_secs = estimated_max.num_seconds(),
            "estimated time without caching"
        );

        let outcome = if self.options.simulate {
            self.run_simulation(&dnf, query, symbols, total)?
        } else {
            self.run_live(&dnf, query, symbols, total).await?
        };

        let (estimated_cached_min, estimated_cached_max) =
            self.issuer.estimated_time(outcome.issued);

        Ok(RunStats {
            result: outcome.result,
            subqueries_total: total,
            issued: outcome.issued,
            issued_ok: outcome.issued_ok,
            errors_positive: outcome.errors_positive,
            errors_negative: outcome.errors_negative,
            estimated_min,
            estimated_max,
            estimated_cached_min,
            estimated_cached_max,
            begin: outcome.begin,
            end: outcome.end,
            longest_subquery,
        })
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    async fn run_live(
        &mut self,
        dnf: &Dnf,
        query: &ParsedQuery,
        symbols: &SymbolTable,
        total: u64,
    ) -> Result<Outcome> {
        let begin = self.issuer.server_now().await?;
        info!(query = %query.name, begin = %begin, "server begin time");

        let mut outcome = Outcome {
            result: 0,
            issued: 0,
            issued_ok: 0,
            errors_positive: 0,
            errors_negative: 0,
            begin,
            end: begin,
        };

        for sub in Decomposer::new(dnf).subqueries() {
            self.check_cancelled()?;
            let rendered = self.translator.render(&sub.term, symbols);
            let sub_name = format!("{}.{}", query.name, sub.number);
            debug!(
                subquery = %sub_name,
                number = sub.number,
                of = total,
                query = %rendered,
                "evaluating"
            );

            if let Some(amount) = self.cache.get(&rendered) {
                debug!(subquery = %sub_name, amount, "results amount already cached");
                outcome.result += sub.sign * amount as i64;
                continue;
            }

            outcome.issued += 1;
            match self.issuer.issue(&sub_name, &rendered).await? {
                Issued::Count(amount) => {
                    self.cache.put(&rendered, amount)?;
                    debug!(subquery = %sub_name, amount, "results amount cached");
                    outcome.issued_ok += 1;
                    outcome.result += sub.sign * amount as i64;
                }
                Issued::Discarded => {
                    if sub.sign > 0 {
                        outcome.errors_positive += 1;
                    } else {
                        outcome.errors_negative += 1;
                    }
                }
            }
        }

        outcome.end = self.issuer.server_now().await?;
        info!(query = %query.name, end = %outcome.end, "server end time");
        Ok(outcome)
    }

    /// Same control flow as the live run but nothing leaves the
    /// process: sub-queries a real run would issue go into a one-shot
    /// set instead, so repeats within one query are not double-counted,
    /// and the persistent cache is left untouched.
    fn run_simulation(
        &mut self,
        dnf: &Dnf,
        query: &ParsedQuery,
        symbols: &SymbolTable,
        total: u64,
    ) -> Result<Outcome> {
        let begin = Utc::now();
        info!(query = %query.name, begin = %begin, "local begin time");

        let mut outcome = Outcome {
            result: 0,
            issued: 0,
            issued_ok: 0,
            errors_positive: 0,
            errors_negative: 0,
            begin,
            end: begin,
        };

        for sub in Decomposer::new(dnf).subqueries() {
            self.check_cancelled()?;
            let rendered = self.translator.render(&sub.term, symbols);
            let sub_name = format!("{}.{}", query.name, sub.number);
            debug!(
                subquery = %sub_name,
                number = sub.number,
                of = total,
                query = %rendered,
                "evaluating"
            );

            if self.simulation_seen.contains(&rendered) {
                debug!(subquery = %sub_name, "sub-query already accounted for");
                continue;
            }
            if let Some(amount) = self.cache.get(&rendered) {
                debug!(subquery = %sub_name, amount, "results amount already cached");
                outcome.result += sub.sign * amount as i64;
                continue;
            }

            outcome.issued += 1;
            if self.issuer.check_length(&sub_name, &rendered)? {
                self.simulation_seen.insert(rendered);
                outcome.issued_ok += 1;
                debug!(subquery = %sub_name, "would be issued");
            } else {
                debug!(subquery = %sub_name, "sub-query discarded");
            }
        }

        outcome.end = Utc::now();
        info!(query = %query.name, end = %outcome.end, "local end time");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::parse::{BracketsParser, QueryStream};

    /// Scripted issuer: counts per rendered query, optional rejects,
    /// and a record of everything that went out.
    struct FakeIssuer {
        counts: HashMap<String, u64>,
        rejects: HashSet<String>,
        admit_incomplete: bool,
        max_length: usize,
        admit_long: bool,
        issued: Vec<String>,
        server_calls: u32,
    }

    impl FakeIssuer {
        fn new(counts: &[(&str, u64)]) -> Self {
            FakeIssuer {
                counts: counts
                    .iter()
                    .map(|(q, n)| (q.to_string(), *n))
                    .collect(),
                rejects: HashSet::new(),
                admit_incomplete: false,
                max_length: 128,
                admit_long: false,
                issued: Vec::new(),
                server_calls: 0,
            }
        }

        fn rejecting(mut self, query: &str, admit_incomplete: bool) -> Self {
            self.rejects.insert(query.to_string());
            self.admit_incomplete = admit_incomplete;
            self
        }

        fn with_length_cap(mut self, max_length: usize, admit_long: bool) -> Self {
            self.max_length = max_length;
            self.admit_long = admit_long;
            self
        }
    }

    impl QueryIssuer for FakeIssuer {
        async fn issue(&mut self, name: &str, query: &str) -> Result<Issued> {
            self.issued.push(query.to_string());
            if !self.check_length(name, query)? {
                return Ok(Issued::Discarded);
            }
            if self.rejects.contains(query) {
                return if self.admit_incomplete {
                    Ok(Issued::Discarded)
                } else {
                    Err(Error::Query {
                        name: name.to_string(),
                        message: "unprocessable".to_string(),
                    })
                };
            }
            Ok(Issued::Count(self.counts.get(query).copied().unwrap_or(0)))
        }

        fn check_length(&self, name: &str, query: &str) -> Result<bool> {
            if query.chars().count() <= self.max_length {
                return Ok(true);
            }
            if self.admit_long {
                return Ok(false);
            }
            Err(Error::QueryTooLong {
                name: name.to_string(),
                length: query.chars().count(),
                max: self.max_length,
            })
        }

        fn estimated_time(&self, _subqueries: u64) -> (Duration, Duration) {
            (Duration::zero(), Duration::zero())
        }

        async fn server_now(&mut self) -> Result<DateTime<Utc>> {
            self.server_calls += 1;
            Ok(DateTime::from_timestamp(1_700_000_000, 0).expect("fixed timestamp"))
        }

        fn reseed(&mut self, _seed: Option<u64>) {}
    }

    fn parse(source: &str) -> (Vec<ParsedQuery>, BracketsParser) {
        let mut parser = BracketsParser::new(false);
        let mut stream = QueryStream::new(source);
        let mut queries = Vec::new();
        while let Some(q) = parser.next_query(&mut stream).expect("parse") {
            queries.push(q);
        }
        (queries, parser)
    }

    fn engine(issuer: FakeIssuer, options: EngineOptions) -> Engine<FakeIssuer, MemoryCache> {
        Engine::new(
            issuer,
            MemoryCache::new(),
            options,
            Arc::new(AtomicBool::new(false)),
        )
    }

    async fn evaluate_one(
        source: &str,
        issuer: FakeIssuer,
        options: EngineOptions,
    ) -> (RunStats, Engine<FakeIssuer, MemoryCache>) {
        let (queries, parser) = parse(source);
        let mut engine = engine(issuer, options);
        let stats = engine
            .evaluate(&queries[0], parser.symbols())
            .await
            .expect("evaluation");
        (stats, engine)
    }

    #[tokio::test]
    async fn test_trivial_literal() {
        let issuer = FakeIssuer::new(&[("foo", 7)]);
        let (stats, engine) = evaluate_one("foo", issuer, EngineOptions::default()).await;
        assert_eq!(stats.result, 7);
        assert_eq!(stats.subqueries_total, 1);
        assert_eq!(stats.issued, 1);
        assert_eq!(stats.issued_ok, 1);
        assert_eq!(engine.issuer.issued, vec!["foo"]);
    }

    #[tokio::test]
    async fn test_negation_renders_not() {
        let issuer = FakeIssuer::new(&[("NOT bar", 5)]);
        let (stats, engine) = evaluate_one("~bar", issuer, EngineOptions::default()).await;
        assert_eq!(stats.result, 5);
        assert_eq!(engine.issuer.issued, vec!["NOT bar"]);
    }

    #[tokio::test]
    async fn test_two_term_union() {
        // |A| = 10, |B| = 6, |A ∩ B| = 2 → |A ∪ B| = 14.
        let issuer = FakeIssuer::new(&[("a", 10), ("b", 6), ("a b", 2)]);
        let (stats, engine) = evaluate_one("{a b}", issuer, EngineOptions::default()).await;
        assert_eq!(stats.result, 14);
        assert_eq!(stats.subqueries_total, 3);
        assert_eq!(engine.issuer.issued, vec!["a", "b", "a b"]);
        assert_eq!(stats.longest_subquery, "a b");
    }

    #[tokio::test]
    async fn test_three_term_union_matches_set_cardinality() {
        // A = {1,2,3,4}, B = {3,4,5}, C = {4,5,6,7}; |A ∪ B ∪ C| = 7.
        let issuer = FakeIssuer::new(&[
            ("a", 4),
            ("b", 3),
            ("c", 4),
            ("a b", 2),
            ("a c", 1),
            ("b c", 2),
            ("a b c", 1),
        ]);
        let (stats, _) = evaluate_one("{a b c}", issuer, EngineOptions::default()).await;
        assert_eq!(stats.subqueries_total, 7);
        assert_eq!(stats.result, 7);
    }

    #[tokio::test]
    async fn test_named_reference_expansion() {
        let (queries, parser) = parse("@x [a b] {$x c}");
        let issuer = FakeIssuer::new(&[("a b", 4), ("c", 3), ("a b c", 1)]);
        let mut engine = engine(issuer, EngineOptions::default());
        let stats = engine
            .evaluate(&queries[1], parser.symbols())
            .await
            .expect("evaluation");
        assert_eq!(stats.subqueries_total, 3);
        assert_eq!(stats.result, 6);
        assert_eq!(engine.issuer.issued, vec!["a b", "c", "a b c"]);
    }

    #[tokio::test]
    async fn test_duplicate_literal_collapses() {
        let issuer = FakeIssuer::new(&[("foo", 9)]);
        let (stats, engine) = evaluate_one("{foo foo}", issuer, EngineOptions::default()).await;
        assert_eq!(stats.subqueries_total, 1);
        assert_eq!(stats.result, 9);
        assert_eq!(engine.issuer.issued, vec!["foo"]);
    }

    #[tokio::test]
    async fn test_approximate_mode_counts_signed_errors() {
        let issuer =
            FakeIssuer::new(&[("a", 10), ("b", 6)]).rejecting("a b", true);
        let (stats, _) = evaluate_one("{a b}", issuer, EngineOptions::default()).await;
        // The intersection errored out with a negative sign.
        assert_eq!(stats.result, 16);
        assert_eq!(stats.issued, 3);
        assert_eq!(stats.issued_ok, 2);
        assert_eq!(stats.errors_positive, 0);
        assert_eq!(stats.errors_negative, 1);
    }

    #[tokio::test]
    async fn test_rejection_is_fatal_without_approximate() {
        let (queries, parser) = parse("{a b}");
        let issuer = FakeIssuer::new(&[("a", 10), ("b", 6)]).rejecting("a b", false);
        let mut engine = engine(issuer, EngineOptions::default());
        let err = engine
            .evaluate(&queries[0], parser.symbols())
            .await
            .expect_err("server rejection");
        assert!(matches!(err, Error::Query { .. }));
    }

    #[tokio::test]
    async fn test_length_cap_is_fatal_before_issuing() {
        let (queries, parser) = parse("{abcdefgh ijklmnop}");
        let issuer = FakeIssuer::new(&[]).with_length_cap(10, false);
        let mut engine = engine(issuer, EngineOptions::default());
        let err = engine
            .evaluate(&queries[0], parser.symbols())
            .await
            .expect_err("probe exceeds the cap");
        assert!(matches!(err, Error::QueryTooLong { .. }));
        // The probe fires before anything goes out.
        assert!(engine.issuer.issued.is_empty());
    }

    #[tokio::test]
    async fn test_length_waiver_discards_and_counts_errors() {
        let issuer = FakeIssuer::new(&[("abcdefgh", 3), ("ijklmnop", 4)])
            .with_length_cap(10, true);
        let (stats, _) =
            evaluate_one("{abcdefgh ijklmnop}", issuer, EngineOptions::default()).await;
        // Both singles fit; the 17-char intersection is discarded.
        assert_eq!(stats.result, 7);
        assert_eq!(stats.issued, 3);
        assert_eq!(stats.issued_ok, 2);
        assert_eq!(stats.errors_negative, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_the_issuer() {
        let (queries, parser) = parse("foo");
        let mut engine = engine(FakeIssuer::new(&[]), EngineOptions::default());
        engine.cache.put("foo", 21).expect("seed cache");
        let stats = engine
            .evaluate(&queries[0], parser.symbols())
            .await
            .expect("evaluation");
        assert_eq!(stats.result, 21);
        assert_eq!(stats.issued, 0);
        assert!(engine.issuer.issued.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_subset_conjunctions_hit_the_cache() {
        // Terms {a,b}, {b,c}, {a,c}: all three pairs and the full
        // subset merge to the same conjunction "a b c".
        let issuer = FakeIssuer::new(&[("a b", 4), ("b c", 4), ("a c", 4), ("a b c", 2)]);
        let (stats, engine) =
            evaluate_one("{[a b] [b c] [a c]}", issuer, EngineOptions::default()).await;
        assert_eq!(stats.subqueries_total, 7);
        // Only 4 distinct conjunctions go over the wire.
        assert_eq!(stats.issued, 4);
        assert_eq!(engine.issuer.issued.len(), 4);
        // 4 + 4 + 4 - 2 - 2 - 2 + 2
        assert_eq!(stats.result, 8);
    }

    #[tokio::test]
    async fn test_simulation_never_calls_the_issuer() {
        let options = EngineOptions {
            simulate: true,
            ..EngineOptions::default()
        };
        let (stats, engine) = evaluate_one("{a b}", FakeIssuer::new(&[]), options).await;
        assert_eq!(stats.subqueries_total, 3);
        assert_eq!(stats.issued, 3);
        assert_eq!(stats.issued_ok, 3);
        assert!(engine.issuer.issued.is_empty());
        assert_eq!(engine.issuer.server_calls, 0);
        assert!(engine.cache.is_empty());
    }

    #[tokio::test]
    async fn test_simulation_deduplicates_repeats_and_uses_cache() {
        let (queries, parser) = parse("{[a b] [b c] [a c]}");
        let options = EngineOptions {
            simulate: true,
            ..EngineOptions::default()
        };
        let mut engine = engine(FakeIssuer::new(&[]), options);
        engine.cache.put("a b", 11).expect("seed cache");
        let stats = engine
            .evaluate(&queries[0], parser.symbols())
            .await
            .expect("simulation");
        // "a b" comes from the cache with sign +1; "b c", "a c" and the
        // shared "a b c" would be issued, repeats are not recounted.
        assert_eq!(stats.result, 11);
        assert_eq!(stats.issued, 3);
        assert_eq!(stats.issued_ok, 3);
        assert!(engine.cache.get("a b c").is_none());
    }

    #[tokio::test]
    async fn test_reset_cache_reapplies_input_caches() {
        let (queries, parser) = parse("foo");
        let options = EngineOptions {
            reset_cache: true,
            ..EngineOptions::default()
        };
        let mut engine = engine(FakeIssuer::new(&[("foo", 1)]), options);
        engine.merge_input_cache(HashMap::from([("seeded".to_string(), 5)]));
        engine.cache.put("stale", 9).expect("stale entry");

        engine
            .evaluate(&queries[0], parser.symbols())
            .await
            .expect("evaluation");
        assert_eq!(engine.cache.get("seeded"), Some(5));
        assert!(engine.cache.get("stale").is_none());
        assert_eq!(engine.cache.get("foo"), Some(1));
    }

    #[tokio::test]
    async fn test_cancellation_between_subqueries() {
        let (queries, parser) = parse("{a b}");
        let cancel = Arc::new(AtomicBool::new(true));
        let mut engine = Engine::new(
            FakeIssuer::new(&[]),
            MemoryCache::new(),
            EngineOptions::default(),
            cancel,
        );
        let err = engine
            .evaluate(&queries[0], parser.symbols())
            .await
            .expect_err("cancelled");
        assert!(matches!(err, Error::Cancelled));
    }
}
