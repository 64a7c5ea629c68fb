//! Running blocking collaborator calls off the async runtime.

use crate::agents::error::AgentError;

/// Runs `f` on tokio's blocking pool and awaits its result.
///
/// Every blocking collaborator call goes through here. A panic inside `f`
/// or a runtime shutting down surfaces as `AgentError::Offload`.
///
/// # Errors
///
/// Returns `AgentError::Offload` if the blocking task could not complete.
pub async fn offload<F, T>(f: F) -> Result<T, AgentError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AgentError::Offload(e.to_string()))
}
