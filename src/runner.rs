//! Driving a whole run: inputs through the parser and engine, results
//! out to the console and per-query files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cache::QueryCache;
use crate::engine::{Engine, RunStats};
use crate::error::{Error, Result};
use crate::issue::QueryIssuer;
use crate::parse::{BracketsParser, ParsedQuery, QueryStream, CONSOLE_NAMESPACE};
use crate::report;

pub const INPUT_FILE_EXT: &str = "in";
pub const OUTPUT_FILE_EXT: &str = "out";
const SIMULATION_TAG: &str = "simulation";

/// One stream of queries and the namespace it is parsed under.
#[derive(Debug)]
pub struct Input {
    pub namespace: String,
    pub text: String,
}

/// Expand console queries and `-i` paths into ordered inputs.
///
/// Console queries are joined into one stream under the `CONSOLE`
/// namespace. A directory contributes every `*.in` file directly
/// inside it, in file-name order.
pub fn collect_inputs(queries: &[String], paths: &[PathBuf]) -> Result<Vec<Input>> {
    let mut inputs = Vec::new();
    if !queries.is_empty() {
        inputs.push(Input {
            namespace: CONSOLE_NAMESPACE.to_string(),
            text: queries.join(" "),
        });
    }
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
            {
                let entry = entry.map_err(|e| {
                    let message = e.to_string();
                    Error::file(
                        path,
                        e.into_io_error().unwrap_or_else(|| {
                            std::io::Error::new(std::io::ErrorKind::Other, message)
                        }),
                    )
                })?;
                if entry.file_type().is_file()
                    && entry
                        .path()
                        .extension()
                        .is_some_and(|ext| ext == INPUT_FILE_EXT)
                {
                    inputs.push(read_input(entry.path())?);
                }
            }
        } else {
            inputs.push(read_input(path)?);
        }
    }
    Ok(inputs)
}

fn read_input(path: &Path) -> Result<Input> {
    debug!(input = %path.display(), "reading input file");
    let text = fs::read_to_string(path).map_err(|e| Error::file(path, e))?;
    Ok(Input {
        namespace: path.to_string_lossy().into_owned(),
        text,
    })
}

/// Result destinations shared by every query of a run.
pub struct Outputs {
    pub console: bool,
    pub color: bool,
    /// One `<query>.out` (or `<query>-simulation.out`) file per query.
    pub directory: Option<PathBuf>,
}

impl Outputs {
    fn emit(&self, query: &ParsedQuery, simulate: bool, stats: &RunStats) -> Result<()> {
        if self.console {
            println!("{}", report::render(query, simulate, stats, self.color));
        }
        if let Some(directory) = &self.directory {
            fs::create_dir_all(directory).map_err(|e| Error::file(directory, e))?;
            let file_name = if simulate {
                format!("{}-{SIMULATION_TAG}.{OUTPUT_FILE_EXT}", query.short_name)
            } else {
                format!("{}.{OUTPUT_FILE_EXT}", query.short_name)
            };
            let path = directory.join(file_name);
            fs::write(&path, report::render(query, simulate, stats, false))
                .map_err(|e| Error::file(&path, e))?;
            debug!(output = %path.display(), "result written");
        }
        Ok(())
    }
}

/// Evaluates every query of every input with one shared parser, so
/// named expressions defined early remain visible later in the run.
pub struct Runner<I, C> {
    engine: Engine<I, C>,
    parser: BracketsParser,
    outputs: Outputs,
    simulate: bool,
}

impl<I: QueryIssuer, C: QueryCache> Runner<I, C> {
    pub fn new(
        engine: Engine<I, C>,
        parser: BracketsParser,
        outputs: Outputs,
        simulate: bool,
    ) -> Self {
        Runner {
            engine,
            parser,
            outputs,
            simulate,
        }
    }

    pub async fn run(&mut self, inputs: Vec<Input>) -> Result<()> {
        if inputs.is_empty() {
            warn!("no queries to process");
            return Ok(());
        }
        for input in inputs {
            debug!(namespace = %input.namespace, "processing input");
            self.parser.set_namespace(&input.namespace);
            let mut stream = QueryStream::new(&input.text);
            while let Some(query) = self.parser.next_query(&mut stream)? {
                info!(query = %query.name, "evaluating");
                let stats = self.engine.evaluate(&query, self.parser.symbols()).await?;
                self.outputs.emit(&query, self.simulate, &stats)?;
                // Persist between queries so a later failure cannot
                // lose counts that were already paid for.
                self.engine.sync_cache()?;
            }
        }
        self.engine.sync_cache()?;
        Ok(())
    }
}

/// Flip `cancel` on Ctrl-C so the run stops at the next sub-query
/// boundary (or mid-sleep) instead of being killed.
pub fn install_cancel_handler(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested, stopping after the current sub-query");
            cancel.store(true, Ordering::Relaxed);
        }
    });
}
