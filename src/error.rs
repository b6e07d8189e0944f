use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetaxcanError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("missing column: {0}")]
    MissingColumn(String),

    #[error("{}:{line}: {message}", file.display())]
    InputFormat {
        file: PathBuf,
        line: usize,
        message: String,
    },

    #[error("uncontiguous covariance rows for gene {gene} in {}", file.display())]
    UncontiguousCovariance { gene: String, file: PathBuf },

    #[error("duplicated entry {entry} in {}", file.display())]
    DuplicateEntry { entry: String, file: PathBuf },

    #[error("gene {0} not available in stream")]
    GeneNotInStream(String),

    #[error("variant {variant} not found in covariance block of gene {gene}")]
    VariantNotInBlock { gene: String, variant: String },

    #[error(
        "could not read prediction model {}: {message}; you may need to update your model files",
        file.display()
    )]
    ModelDatabase { file: PathBuf, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MetaxcanError>;
