use thiserror::Error;

/// An error that happens when computing a cached value.
///
/// This error is cached in place of the value and replayed to every later lookup of the same
/// key, which is why it is [`Clone`] and only carries owned, printable details.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The producer reported that no value exists for the key.
    #[error("not found")]
    NotFound,
    /// The producer failed to compute the value.
    ///
    /// The attached string contains the producer's description of the failure.
    #[error("computation failed: {0}")]
    Failed(String),
    /// The computation was lost before it could settle.
    ///
    /// This happens when the producer panics, or when the runtime drops the computation during
    /// shutdown.
    #[error("internal error")]
    InternalError,
}

impl CacheError {
    /// Creates a [`Failed`](Self::Failed) error from anything printable.
    pub fn failed(details: impl std::fmt::Display) -> Self {
        Self::Failed(details.to_string())
    }

    /// Converts an arbitrary error into a cacheable [`Failed`](Self::Failed) error.
    ///
    /// The original error is logged along with its source chain, which is lost in the
    /// conversion.
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr, "Computation failed");
        Self::Failed(e.to_string())
    }

    /// A short, static name of the variant, used to tag metrics.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            Self::NotFound => "notfound",
            Self::Failed(_) => "failed",
            Self::InternalError => "internal",
        }
    }
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

/// The settled result of a computation, containing either `Ok(T)` or the error that was cached
/// in its place.
pub type CacheEntry<T = ()> = Result<T, CacheError>;
