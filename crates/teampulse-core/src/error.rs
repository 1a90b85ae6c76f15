use teampulse_store::StoreError;
use thiserror::Error;

/// Core failure taxonomy.
///
/// Validation failures surface immediately and are never retried.
/// Upstream failures degrade to a fallback wherever one is meaningful and
/// surface only when there is none. Storage read failures degrade to the
/// default snapshot inside the store; write failures always propagate as
/// `Storage`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("upstream failure: {0}")]
    Upstream(anyhow::Error),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn upstream(err: impl Into<anyhow::Error>) -> Self {
        Self::Upstream(err.into())
    }
}
