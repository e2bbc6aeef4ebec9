//! Logging configuration: console verbosity plus optional file sinks,
//! each with its own maximum level.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use clap::ValueEnum;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::error::{Error, Result};

/// User-facing verbosity levels, highest severity first. `critical`
/// and `error` both map onto the `ERROR` level; fatal failures are
/// additionally reported through the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VerbosityLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl VerbosityLevel {
    fn level_filter(self) -> LevelFilter {
        match self {
            VerbosityLevel::Critical | VerbosityLevel::Error => LevelFilter::ERROR,
            VerbosityLevel::Warning => LevelFilter::WARN,
            VerbosityLevel::Info => LevelFilter::INFO,
            VerbosityLevel::Debug => LevelFilter::DEBUG,
        }
    }

    pub fn parse_name(name: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(name, true)
            .map_err(|_| Error::Config(format!("unknown verbosity level {name:?}")))
    }
}

/// Install the global subscriber: an optional stderr layer at the
/// console verbosity (overridable through `QUERENT_LOG`) plus one
/// plain-text layer per `--log-file` sink.
pub fn init(console: Option<VerbosityLevel>, sinks: &[(VerbosityLevel, PathBuf)]) -> Result<()> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if let Some(level) = console {
        let filter = EnvFilter::try_from_env("QUERENT_LOG")
            .unwrap_or_else(|_| EnvFilter::new(format!("querent={}", level.level_filter())));
        layers.push(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter)
                .boxed(),
        );
    }

    for (level, path) in sinks {
        let file = File::create(path).map_err(|e| Error::file(path, e))?;
        layers.push(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .with_filter(level.level_filter())
                .boxed(),
        );
    }

    tracing_subscriber::registry().with(layers).init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(VerbosityLevel::Critical.level_filter(), LevelFilter::ERROR);
        assert_eq!(VerbosityLevel::Error.level_filter(), LevelFilter::ERROR);
        assert_eq!(VerbosityLevel::Warning.level_filter(), LevelFilter::WARN);
        assert_eq!(VerbosityLevel::Info.level_filter(), LevelFilter::INFO);
        assert_eq!(VerbosityLevel::Debug.level_filter(), LevelFilter::DEBUG);
    }

    #[test]
    fn test_parse_name_is_case_insensitive() {
        assert_eq!(
            VerbosityLevel::parse_name("DEBUG").expect("known level"),
            VerbosityLevel::Debug
        );
        assert!(VerbosityLevel::parse_name("chatty").is_err());
    }
}
