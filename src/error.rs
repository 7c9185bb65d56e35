use thiserror::Error;

/// Crate-wide error taxonomy (spec §7). Orchestrators (detector, pagination,
/// extraction) catch these and fold them into structured results rather than
/// propagating them to the operator; only the control channel ever turns one
/// of these into a `{success:false, error}` wire reply.
#[derive(Debug, Error)]
pub enum RainbowError {
    #[error("driver error: {0}")]
    Driver(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("pre-action miss: {0}")]
    PreActionMiss(String),

    #[error("pagination failed: {0}")]
    PaginationFailed(String),

    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("extraction miss: {0}")]
    ExtractionMiss(String),

    #[error("session error: {0}")]
    Session(String),
}

pub type Result<T> = std::result::Result<T, RainbowError>;
