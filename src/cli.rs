use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use crate::cache::CacheMode;
use crate::error::{Error, Result};
use crate::issue::github::DEFAULT_BASE_URL;
use crate::issue::SearchKind;
use crate::logging::VerbosityLevel;

const HELP_TEMPLATE: &str = r#"
{about}

{usage-heading} {usage}

{all-args}

{after-help}"#;

#[derive(Parser)]
#[command(name = "querent")]
#[command(version)]
#[command(about = "Exact result counts for Boolean GitHub search queries via inclusion-exclusion")]
#[command(after_help = "Examples:
  querent foo                         Count results for a single term
  querent '{rust tokio}'              Count the union of two terms
  querent -s '{a b c}'                Dry-run: show what would be issued
  querent -i queries/ -o results/     Evaluate every *.in file in a directory
  querent -p --token TOKEN '{a ~b}'   Tolerate rejected sub-queries

A query uses brackets for AND, braces for OR and '~' for NOT:
  [a b]    both terms        {a b}    either term
  @x e     name e as x       $x       reference x       \"a b\"  exact phrase")]
#[command(help_template = HELP_TEMPLATE)]
pub struct Cli {
    /// Queries in the bracket syntax, parsed under the CONSOLE namespace
    pub queries: Vec<String>,

    /// Input files, or directories scanned for *.in files
    #[arg(short, long = "inputs", value_name = "PATH", num_args = 1.., help_heading = "Files")]
    pub inputs: Vec<PathBuf>,

    /// Directory receiving one <query>.out file per query
    #[arg(short, long = "outputs", value_name = "DIR", help_heading = "Files")]
    pub output_dir: Option<PathBuf>,

    /// Add a log sink: a verbosity level followed by a file path (repeatable)
    #[arg(
        long = "log-file",
        value_names = ["LEVEL", "PATH"],
        num_args = 2,
        action = ArgAction::Append,
        help_heading = "Files"
    )]
    pub log_files: Vec<String>,

    /// Console verbosity
    #[arg(
        short = 'v',
        long = "verbose",
        value_enum,
        default_value = "info",
        value_name = "LEVEL",
        help_heading = "Console"
    )]
    pub verbosity: VerbosityLevel,

    /// Print nothing to the console (requires --outputs)
    #[arg(long, help_heading = "Console")]
    pub silent: bool,

    /// Enumerate and render sub-queries without contacting the server
    #[arg(short, long, help_heading = "Results")]
    pub simulate: bool,

    /// Tolerate server-rejected sub-queries and report signed error counts
    #[arg(short = 'p', long = "approximate", help_heading = "Results")]
    pub approximate: bool,

    /// Drop all cache entries (and re-apply input caches) before each query
    #[arg(long, help_heading = "Results")]
    pub reset_cache: bool,

    /// Fix the delay-jitter seed for reproducible runs
    #[arg(long, value_name = "SEED", help_heading = "Results")]
    pub seed: Option<u64>,

    /// Engine issuing the sub-queries
    #[arg(
        short = 'e',
        long,
        value_enum,
        default_value = "github",
        help_heading = "Engine"
    )]
    pub engine: EngineKind,

    /// API token; falls back to the GITHUB_TOKEN environment variable
    #[arg(long, value_name = "TOKEN", help_heading = "Engine")]
    pub token: Option<String>,

    /// Base URL of the API server
    #[arg(long, value_name = "URL", default_value = DEFAULT_BASE_URL, help_heading = "Engine")]
    pub url: String,

    /// Which search endpoint the counts come from
    #[arg(
        long = "search-type",
        value_enum,
        default_value = "code",
        value_name = "KIND",
        help_heading = "Engine"
    )]
    pub search_type: SearchKind,

    /// Maximum characters the server accepts in one sub-query
    #[arg(long, value_name = "N", default_value_t = 128, help_heading = "Engine")]
    pub query_max_length: usize,

    /// Skip over-long sub-queries with a warning instead of aborting
    #[arg(long, help_heading = "Engine")]
    pub admit_long_query: bool,

    /// Upper bound of the delay jitter, as a multiple of the base delay
    #[arg(long, value_name = "N", default_value_t = 7, help_heading = "Engine")]
    pub waiting_factor: u32,

    /// Ceiling on transport attempts per request
    #[arg(long, value_name = "N", default_value_t = 10, help_heading = "Engine")]
    pub total_retry: u32,

    /// Retry budget for connection failures (defaults to --total-retry)
    #[arg(long, value_name = "N", help_heading = "Engine")]
    pub connect_retry: Option<u32>,

    /// Retry budget for retryable statuses (defaults to --total-retry)
    #[arg(long, value_name = "N", help_heading = "Engine")]
    pub status_retry: Option<u32>,

    /// Base of the exponential back-off, in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 6.0, help_heading = "Engine")]
    pub backoff_factor: f64,

    /// Cap on a single back-off sleep, in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 600.0, help_heading = "Engine")]
    pub backoff_max: f64,

    /// Aggressive logical minimization before decomposing (expensive)
    #[arg(long, help_heading = "Engine")]
    pub deep_simplify: bool,

    /// Query syntax
    #[arg(
        short = 'x',
        long,
        value_enum,
        default_value = "brackets",
        help_heading = "Parsing"
    )]
    pub syntax: SyntaxKind,

    /// Make redefining an @id a parse error instead of a warning
    #[arg(long, help_heading = "Parsing")]
    pub forbid_redefine: bool,

    /// Cache backend for sub-query counts
    #[arg(
        short = 'c',
        long,
        value_enum,
        default_value = "memory",
        help_heading = "Caching"
    )]
    pub cache: CacheKind,

    /// Backing file for the file cache
    #[arg(long, value_name = "PATH", help_heading = "Caching")]
    pub cache_file: Option<PathBuf>,

    /// How to open the cache file
    #[arg(long, value_enum, default_value = "update", value_name = "MODE", help_heading = "Caching")]
    pub cache_mode: CacheMode,

    /// Buffer cache writes until the next sync instead of persisting eagerly
    #[arg(long, help_heading = "Caching")]
    pub cache_buffered: bool,

    /// Merge a cache file into the active cache at startup (repeatable)
    #[arg(
        long = "input-cache",
        value_name = "PATH",
        action = ArgAction::Append,
        help_heading = "Caching"
    )]
    pub input_caches: Vec<PathBuf>,

    /// Describe the selected engine and exit
    #[arg(long, help_heading = "Introspection")]
    pub engine_info: bool,

    /// Describe the selected parser syntax and exit
    #[arg(long, help_heading = "Introspection")]
    pub parser_info: bool,

    /// Describe the selected cache backend and exit
    #[arg(long, help_heading = "Introspection")]
    pub cache_info: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    Github,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SyntaxKind {
    Brackets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheKind {
    Memory,
    File,
}

const GITHUB_ENGINE_INFO: &str = "\
engine github:
  Issues conjunctive sub-queries against the GitHub v3 search API and
  combines their total counts by inclusion-exclusion. The per-request
  delay is 60 / <search rate limit per minute>, discovered at startup
  (6 s when unauthenticated), jittered up to --waiting-factor times.
  Defaults: --search-type code, --query-max-length 128,
  --waiting-factor 7, --total-retry 10, --backoff-factor 6,
  --backoff-max 600.";

const BRACKETS_PARSER_INFO: &str = "\
syntax brackets:
  [e e ...] conjunction, {e e ...} disjunction (two or more operands),
  ~e negation, @id e names e as id, $id references it by value,
  \"...\" quotes a literal containing spaces or operator characters.
  Whitespace separates queries; one input may contain many. Names and
  literals are shared across all queries of a run.
  Defaults: redefinition of an @id warns (see --forbid-redefine).";

const CACHE_INFO: &str = "\
cache memory:
  Volatile in-process map, dropped at exit.
cache file:
  JSON map persisted at --cache-file; modes read | write | update | new
  (default update). With --cache-buffered, writes are flushed between
  queries instead of after every sub-query.";

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// The description requested by an `--*-info` flag, if any.
    pub fn component_info(&self) -> Option<&'static str> {
        if self.engine_info {
            Some(GITHUB_ENGINE_INFO)
        } else if self.parser_info {
            Some(BRACKETS_PARSER_INFO)
        } else if self.cache_info {
            Some(CACHE_INFO)
        } else {
            None
        }
    }

    /// `--log-file LEVEL PATH` pairs, parsed and validated.
    pub fn log_sinks(&self) -> Result<Vec<(VerbosityLevel, PathBuf)>> {
        self.log_files
            .chunks(2)
            .map(|pair| match pair {
                [level, path] => Ok((VerbosityLevel::parse_name(level)?, PathBuf::from(path))),
                _ => Err(Error::Config(
                    "--log-file takes a LEVEL PATH pair".to_string(),
                )),
            })
            .collect()
    }
}
