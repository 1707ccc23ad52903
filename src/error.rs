use std::path::PathBuf;
use thiserror::Error;

// Unified error type for lamg

#[derive(Error, Debug)]
pub enum MgError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("verification failed on level {level}: {check} deviation {deviation:e} > {tol:e}")]
    Verification {
        level: usize,
        check: &'static str,
        deviation: f64,
        tol: f64,
    },
    #[error("cannot normalize vector {index} on level {level} (norm = {norm:e})")]
    Degenerate { level: usize, index: usize, norm: f64 },
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed vector file: {0}")]
    Format(String),
    #[error("factorization error: {0}")]
    FactorError(String),
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
}

impl MgError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        MgError::Config(msg.into())
    }
}
