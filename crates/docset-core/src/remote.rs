use std::path::Path;

/// Oracle answering whether the synchronized storage root is reachable.
///
/// Implementations must be cheap and non-blocking; platforms with an
/// expensive probe should cache the answer.
pub trait RemoteAvailability: Send + Sync {
    /// Whether remote storage can currently be used.
    fn is_reachable(&self) -> bool;

    /// The remote storage root. Only meaningful while reachable.
    fn remote_root(&self) -> &Path;
}
