use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Infrastructure-level failures of the scheduler itself.
///
/// `Blocked`, `CompilerFailure` and `Cancelled` are deliberately not
/// variants here: the spec treats them as first-class results that flow
/// through the result-DAG (see [`crate::result_dag::FailureCause`]), not as
/// exceptions. A `SchedulerError` only escapes when the scheduler's own
/// bookkeeping breaks, or to wrap something thrown by an external
/// collaborator before it is turned into an opaque `FailureCause`.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("project DAG references a dependency that was never compiled: {0}")]
    MissingDependency(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("deduplicated copy into client classes directory failed: {0}")]
    DeduplicationIo(String),

    #[error("signature promise for upstream project {0} failed before emitting signatures")]
    SignaturePromiseFailure(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SchedulerError {
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }
}
