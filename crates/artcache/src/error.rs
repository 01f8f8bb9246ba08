use thiserror::Error;

/// An error that happens while fetching or handling a cached resource.
///
/// None of these ever reach callers of the public API; the facade records
/// them and collapses every variant into "resource unavailable".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The resource was not found at the remote source.
    #[error("not found")]
    NotFound,
    /// The resource could not be fetched from the remote source due to missing
    /// permissions.
    ///
    /// The attached string contains the remote source's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The resource could not be fetched from the remote source due to another
    /// problem, like connection loss, DNS resolution, or a 5xx server response.
    #[error("download failed: {0}")]
    DownloadError(String),
    /// The payload was fetched successfully, but is not interpretable as the
    /// target resource type.
    #[error("malformed: {0}")]
    Malformed(String),
    /// An unexpected error in the cache itself.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl CacheError {
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

/// The contents of a cache lookup, either the value or the reason why it is
/// unavailable.
pub type CacheContents<T = ()> = Result<T, CacheError>;
