//! Uniform close for pipes, log writers and client streams.

use async_trait::async_trait;
use skiff_shared::errors::{SkiffError, SkiffResult};

/// A resource that can be closed from any vantage point.
///
/// Closing twice is a no-op that returns `Ok(())`.
#[async_trait]
pub trait Closeable: Send + Sync {
    async fn close(&self) -> SkiffResult<()>;
}

/// Close every resource, even when earlier ones fail.
///
/// Returns [`SkiffError::AggregateClose`] holding each individual failure.
pub async fn close_all(resources: &[&dyn Closeable]) -> SkiffResult<()> {
    let mut errors = Vec::new();
    for resource in resources {
        if let Err(e) = resource.close().await {
            tracing::debug!(error = %e, "close failed");
            errors.push(e);
        }
    }
    SkiffError::aggregate(errors)
}
