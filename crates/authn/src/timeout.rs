//! Deadline enforcement for record store calls.
//!
//! Store calls are the only operations in the engine that suspend for
//! non-trivial latency. Every one of them goes through [`bounded`], so a hung
//! store surfaces as [`StorageError::Timeout`] instead of stalling the caller.
//! No lock is held across these calls.

use std::{future::Future, time::Duration};

use trustkey_storage::{StorageError, StorageResult};

/// Runs a store call under `deadline`.
///
/// # Errors
///
/// Returns the call's own error, or [`StorageError::Timeout`] if the deadline
/// elapses first.
pub(crate) async fn bounded<T, F>(
    deadline: Duration,
    operation: &'static str,
    call: F,
) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_elapsed) => {
            tracing::warn!(
                operation,
                timeout_ms = deadline.as_millis() as u64,
                "record store call timed out"
            );
            Err(StorageError::timeout())
        },
    }
}
