use thiserror::Error;

/// Fatal errors raised before analysis starts. Script-level failures are not
/// errors in this sense: they seal a single path and analysis continues with
/// its siblings.
#[derive(Debug, Error)]
pub enum BsstError {
    #[error("parse error at line {line}: {msg}")]
    Parse { line: u32, msg: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("solver: {0}")]
    Solver(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl BsstError {
    pub fn parse(line: u32, msg: impl Into<String>) -> Self {
        BsstError::Parse {
            line,
            msg: msg.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BsstError>;
