use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Process exit codes, one per failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Normal = 0,
    Parsing = 3,
    Engine = 4,
    Config = 5,
    Connection = 6,
    Query = 7,
    File = 8,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("query <{name}> rejected by the server: {message}")]
    Query { name: String, message: String },

    #[error("query <{name}> is {length} characters long, maximum allowed is {max}")]
    QueryTooLong {
        name: String,
        length: usize,
        max: usize,
    },

    #[error("file error on {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file {path} is not a valid cache: {source}")]
    CacheFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// Attach the offending path to an I/O failure.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::File {
            path: path.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            Error::Parse { .. } => ExitCode::Parsing,
            Error::Config(_) => ExitCode::Config,
            Error::Auth(_) => ExitCode::Connection,
            Error::Connection(_) => ExitCode::Connection,
            Error::Engine(_) | Error::Cancelled => ExitCode::Engine,
            Error::Query { .. } | Error::QueryTooLong { .. } => ExitCode::Query,
            Error::File { .. } | Error::CacheFormat { .. } => ExitCode::File,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        let e = Error::Parse {
            line: 2,
            column: 7,
            message: "']' expected".into(),
        };
        assert_eq!(e.exit_code(), ExitCode::Parsing);
        assert_eq!(e.exit_code() as i32, 3);

        assert_eq!(
            Error::QueryTooLong {
                name: "CONSOLE.1.3".into(),
                length: 150,
                max: 128,
            }
            .exit_code() as i32,
            7
        );
        assert_eq!(Error::Cancelled.exit_code() as i32, 4);
    }

    #[test]
    fn test_parse_error_reports_position() {
        let e = Error::Parse {
            line: 3,
            column: 14,
            message: "identifier expected".into(),
        };
        assert_eq!(e.to_string(), "parse error at 3:14: identifier expected");
    }
}
