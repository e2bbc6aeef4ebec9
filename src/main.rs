//! querent CLI entry point.

use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use colored::Colorize;
use tracing::info;

use querent::cache::{FileCache, MemoryCache, QueryCache};
use querent::cli::{CacheKind, Cli, EngineKind, SyntaxKind};
use querent::engine::{Engine, EngineOptions};
use querent::error::{Error, ExitCode, Result};
use querent::issue::{GithubConfig, GithubIssuer, RetryPolicy};
use querent::logging;
use querent::parse::BracketsParser;
use querent::runner::{self, Outputs, Runner};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    let code = match run(cli).await {
        Ok(()) => ExitCode::Normal,
        Err(e) => {
            let message = format!("error: {e}");
            eprintln!("{}", message.as_str().red().bold());
            e.exit_code()
        }
    };
    process::exit(code as i32);
}

async fn run(cli: Cli) -> Result<()> {
    let console_level = if cli.silent { None } else { Some(cli.verbosity) };
    logging::init(console_level, &cli.log_sinks()?)?;

    if let Some(info) = cli.component_info() {
        println!("{info}");
        return Ok(());
    }

    if cli.silent && cli.output_dir.is_none() {
        return Err(Error::Config(
            "silent mode needs --outputs to write results somewhere".to_string(),
        ));
    }

    let inputs = runner::collect_inputs(&cli.queries, &cli.inputs)?;

    let cancel = Arc::new(AtomicBool::new(false));
    runner::install_cancel_handler(cancel.clone());

    let cache: Box<dyn QueryCache> = match cli.cache {
        CacheKind::Memory => Box::new(MemoryCache::new()),
        CacheKind::File => {
            let path = cli
                .cache_file
                .clone()
                .ok_or_else(|| Error::Config("--cache file requires --cache-file".to_string()))?;
            Box::new(FileCache::open(path, cli.cache_mode, cli.cache_buffered)?)
        }
    };

    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var("GITHUB_TOKEN").ok());
    let config = GithubConfig {
        token,
        base_url: cli.url.clone(),
        kind: cli.search_type,
        query_max_length: cli.query_max_length,
        admit_long_query: cli.admit_long_query,
        admit_incomplete: cli.approximate,
        waiting_factor: cli.waiting_factor,
        retry: RetryPolicy {
            total: cli.total_retry,
            connect: cli.connect_retry.unwrap_or(cli.total_retry),
            status: cli.status_retry.unwrap_or(cli.total_retry),
            backoff_factor: cli.backoff_factor,
            backoff_max: cli.backoff_max,
        },
    };
    let issuer = match cli.engine {
        // Simulation and empty runs never issue, so skip the
        // rate-limit discovery round-trip.
        EngineKind::Github if cli.simulate || inputs.is_empty() => {
            GithubIssuer::offline(config, cancel.clone())?
        }
        EngineKind::Github => GithubIssuer::connect(config, cancel.clone()).await?,
    };

    let options = EngineOptions {
        simulate: cli.simulate,
        reset_cache: cli.reset_cache,
        deep_simplify: cli.deep_simplify,
        seed: cli.seed,
    };
    let mut engine = Engine::new(issuer, cache, options, cancel);

    for path in &cli.input_caches {
        let entries = FileCache::load_entries(path)?;
        info!(cache = %path.display(), entries = entries.len(), "input cache merged");
        engine.merge_input_cache(entries);
    }

    let parser = match cli.syntax {
        SyntaxKind::Brackets => BracketsParser::new(cli.forbid_redefine),
    };
    let outputs = Outputs {
        console: !cli.silent,
        color: true,
        directory: cli.output_dir.clone(),
    };
    Runner::new(engine, parser, outputs, cli.simulate)
        .run(inputs)
        .await
}
