//! Application callbacks.
//!
//! [`SessionHandler`] is the only surface application code plugs into. Errors
//! returned from, or panics raised inside, `on_connect` / `on_text` /
//! `on_binary` are caught at the dispatch boundary and routed to `on_error`;
//! they never close the connection on their own.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::warn;

use crate::error::{Error, Result};

use super::session::Session;

// ============================================================================
// SessionHandler
// ============================================================================

/// Connection event callbacks.
///
/// Every method has a default, so implementors only override what they use.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use roomcast::{Result, Session, SessionHandler};
///
/// struct Echo;
///
/// #[async_trait]
/// impl SessionHandler for Echo {
///     async fn on_text(&self, session: &Arc<Session>, text: String) -> Result<()> {
///         session.send_text(&text).await
///     }
/// }
/// ```
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    /// Called once the session is registered.
    async fn on_connect(&self, _session: &Arc<Session>) -> Result<()> {
        Ok(())
    }

    /// Called for each inbound text frame.
    async fn on_text(&self, _session: &Arc<Session>, _text: String) -> Result<()> {
        Ok(())
    }

    /// Called for each inbound binary frame.
    async fn on_binary(&self, _session: &Arc<Session>, _data: Vec<u8>) -> Result<()> {
        Ok(())
    }

    /// Called exactly once after the session is unregistered and closed.
    async fn on_close(&self, _session: &Arc<Session>) {}

    /// Called when a callback above fails or panics.
    async fn on_error(&self, session: &Arc<Session>, error: &Error) {
        warn!(session_id = %session.id(), error = %error, "Session handler error");
    }
}

// ============================================================================
// Dispatch Guard
// ============================================================================

/// Runs a callback future, turning a panic into [`Error::Handler`].
pub(crate) async fn guarded<F>(callback: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match AssertUnwindSafe(callback).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(Error::handler(format!(
            "callback panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guarded_passes_result() {
        assert!(guarded(async { Ok::<(), Error>(()) }).await.is_ok());

        let err = guarded(async { Err::<(), Error>(Error::handler("nope")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Handler error: nope");
    }

    async fn explode() -> Result<()> {
        panic!("boom")
    }

    async fn explode_with(code: u32) -> Result<()> {
        panic!("code {code}")
    }

    #[tokio::test]
    async fn test_guarded_catches_panic() {
        let err = guarded(explode()).await.unwrap_err();
        assert!(matches!(err, Error::Handler { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_guarded_catches_formatted_panic() {
        let err = guarded(explode_with(7)).await.unwrap_err();
        assert!(err.to_string().contains("code 7"));
    }
}
