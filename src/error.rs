use thiserror::Error;

/// Fatal problems with the input data. Nothing downstream can recover from
/// these, so every stage returns them straight to the caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    #[error("missing column {column:?} in {source_name}")]
    MissingColumn { source_name: String, column: String },

    #[error("row {row}: invalid margin {value:?}")]
    InvalidMargin { row: usize, value: String },

    #[error("row {row}: invalid date {value:?}")]
    InvalidDate { row: usize, value: String },

    #[error("row {row}: empty team name")]
    EmptyTeam { row: usize },

    #[error("row {row}: invalid covariate {column:?} value {value:?}")]
    InvalidCovariate {
        row: usize,
        column: String,
        value: String,
    },

    #[error("duplicate covariate row for team {0:?}")]
    DuplicateTeam(String),

    #[error("team {0:?} is not in the registry")]
    UnknownTeam(String),

    #[error("teams missing from covariate table: {}", .0.join(", "))]
    MissingCovariates(Vec<String>),

    #[error("covariate table has no numeric columns")]
    NoCovariates,

    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("adjacency matrix is not symmetric at ({row},{col})")]
    Asymmetric { row: usize, col: usize },

    #[error("adjacency matrix has a non-zero diagonal at {0}")]
    NonZeroDiagonal(usize),

    #[error("meeting {requested} requested but only {available} meetings exist")]
    MeetingOutOfRange { requested: usize, available: usize },

    #[error("invalid prior {name}: {value}")]
    InvalidPrior { name: String, value: f64 },
}
