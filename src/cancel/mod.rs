//! Statement cancellation
//!
//! Each running statement gets a [`StatementCancel`] scope. A timer task (and
//! any [`CancelHandle`] clone) fires into the scope; the firing routine takes
//! the scope's mutex, moves the state out of `NOT_CANCELLED` at most once and
//! then either aborts the owning session or opens an auxiliary session that
//! sends `KILL QUERY <thread id>`. When the statement returns, [`finish`]
//! takes the same mutex, so a statement is never both delivered and
//! cancelled.
//!
//! [`finish`]: StatementCancel::finish

use crate::connection::{AbortHandle, ConnectionConfig, DiscardRows, Session};
use crate::metrics::labels;
use crate::{Error, Result};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

const NOT_CANCELLED: u8 = 0;
const CANCELLED_BY_TIMEOUT: u8 = 1;
const CANCELLED_BY_USER: u8 = 2;

/// How a fired cancellation reaches the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelStrategy {
    /// `KILL QUERY` over an auxiliary session; the owning session survives
    KillQuery,
    /// Force-close the owning session
    Abort,
}

impl CancelStrategy {
    /// Strategy selected by `timeoutKillsConnection`
    pub fn for_config(config: &ConnectionConfig) -> Self {
        if config.timeout_kills_connection {
            Self::Abort
        } else {
            Self::KillQuery
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::KillQuery => labels::STRATEGY_KILL,
            Self::Abort => labels::STRATEGY_ABORT,
        }
    }
}

/// Why a statement was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Statement timeout expired
    Timeout,
    /// Caller asked for it
    User,
}

impl CancelReason {
    fn state(&self) -> u8 {
        match self {
            Self::Timeout => CANCELLED_BY_TIMEOUT,
            Self::User => CANCELLED_BY_USER,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Timeout => labels::CANCEL_TIMEOUT,
            Self::User => labels::CANCEL_USER,
        }
    }
}

/// The session a cancellation acts on
#[derive(Debug, Clone)]
pub struct CancelTarget {
    /// Server thread running the statement
    pub thread_id: u32,
    /// Endpoint and credentials for the auxiliary session
    pub config: Arc<ConnectionConfig>,
    /// Abort signal of the owning session
    pub abort: AbortHandle,
}

#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    /// Set once the statement has returned; guarded together with the kill
    completed: Mutex<bool>,
    failure: parking_lot::Mutex<Option<Error>>,
    target: CancelTarget,
    strategy: CancelStrategy,
}

/// Cancellation scope of one statement execution
#[derive(Debug)]
pub struct StatementCancel {
    shared: Arc<Shared>,
    disarm: Option<oneshot::Sender<()>>,
}

impl StatementCancel {
    /// Create a scope, starting the timer when `timeout` is non-zero
    ///
    /// Must be called inside a tokio runtime when a timeout is given.
    pub fn arm(target: CancelTarget, timeout: Option<Duration>) -> Self {
        let strategy = CancelStrategy::for_config(&target.config);
        let shared = Arc::new(Shared {
            state: AtomicU8::new(NOT_CANCELLED),
            completed: Mutex::new(false),
            failure: parking_lot::Mutex::new(None),
            target,
            strategy,
        });

        let Some(timeout) = timeout.filter(|t| !t.is_zero()) else {
            return Self {
                shared,
                disarm: None,
            };
        };

        let (disarm, disarmed) = oneshot::channel::<()>();
        let timer_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            tokio::select! {
                // Fires on explicit disarm and when the scope is dropped
                _ = disarmed => {}
                _ = tokio::time::sleep(timeout) => {
                    fire(&timer_shared, CancelReason::Timeout).await;
                }
            }
        });
        Self {
            shared,
            disarm: Some(disarm),
        }
    }

    /// Cloneable handle for user-initiated cancellation
    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop the timer; safe to call repeatedly
    pub fn disarm(&mut self) {
        if let Some(disarm) = self.disarm.take() {
            let _ = disarm.send(());
        }
    }

    /// Whether the scope has been moved to a cancelled state
    pub fn is_cancelled(&self) -> bool {
        self.shared.state.load(Ordering::SeqCst) != NOT_CANCELLED
    }

    /// Settle the statement outcome
    ///
    /// Disarms the timer, marks the statement completed under the scope mutex
    /// and clears the cancellation state. A captured cancellation failure wins,
    /// then a timeout, then a user cancel; otherwise `result` passes through.
    pub async fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        self.disarm();
        let state = {
            let mut completed = self.shared.completed.lock().await;
            *completed = true;
            self.shared.state.swap(NOT_CANCELLED, Ordering::SeqCst)
        };

        if let Some(failure) = self.shared.failure.lock().take() {
            return Err(Error::CancelFailed(failure.to_string()));
        }
        match state {
            CANCELLED_BY_TIMEOUT => Err(Error::QueryTimeout),
            CANCELLED_BY_USER => Err(Error::QueryCancelled),
            _ => result,
        }
    }
}

impl Drop for StatementCancel {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Cancels the statement of one [`StatementCancel`] scope from any task
#[derive(Debug, Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    /// Cancel the statement with the scope's strategy
    ///
    /// Has no effect once the statement has completed or was already cancelled.
    pub async fn cancel(&self) {
        fire(&self.shared, CancelReason::User).await;
    }

    /// Whether the scope has been moved to a cancelled state
    pub fn is_cancelled(&self) -> bool {
        self.shared.state.load(Ordering::SeqCst) != NOT_CANCELLED
    }
}

async fn fire(shared: &Shared, reason: CancelReason) {
    let completed = shared.completed.lock().await;
    if *completed {
        return;
    }
    if shared
        .state
        .compare_exchange(NOT_CANCELLED, reason.state(), Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    let target = &shared.target;
    tracing::debug!(
        thread_id = target.thread_id,
        reason = reason.label(),
        strategy = shared.strategy.label(),
        "cancelling statement"
    );
    crate::metrics::counters::cancellation_fired(reason.label(), shared.strategy.label());

    let outcome = match shared.strategy {
        CancelStrategy::Abort => {
            target.abort.abort();
            Ok(())
        }
        CancelStrategy::KillQuery => kill_query(target).await,
    };
    if let Err(e) = outcome {
        tracing::warn!(thread_id = target.thread_id, error = %e, "statement cancellation failed");
        crate::metrics::counters::cancellation_failed();
        *shared.failure.lock() = Some(e);
    }
    drop(completed);
}

async fn kill_query(target: &CancelTarget) -> Result<()> {
    let mut session = Session::connect(Arc::clone(&target.config)).await?;
    let sql = format!("KILL QUERY {}", target.thread_id);
    let result = session.query_raw(&sql, &mut DiscardRows::default()).await;
    let _ = session.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(timeout_kills_connection: bool) -> CancelTarget {
        let config = ConnectionConfig::builder("127.0.0.1", "app")
            .port(1)
            .connect_timeout(Duration::from_millis(500))
            .timeout_kills_connection(timeout_kills_connection)
            .build();
        CancelTarget {
            thread_id: 42,
            config: Arc::new(config),
            abort: AbortHandle::default(),
        }
    }

    #[tokio::test]
    async fn test_completion_before_timeout_is_not_cancelled() {
        let scope = StatementCancel::arm(target(true), Some(Duration::from_secs(5)));
        let result = scope.finish(Ok(7)).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_timeout_aborts_owning_session() {
        let target = target(true);
        let abort = target.abort.clone();
        let scope = StatementCancel::arm(target, Some(Duration::from_millis(20)));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(scope.is_cancelled());
        assert!(abort.is_aborted());
        let err = scope.finish(Err::<(), _>(Error::ConnectionClosed)).await.unwrap_err();
        assert!(matches!(err, Error::QueryTimeout));
    }

    #[tokio::test]
    async fn test_user_cancel_fires_once() {
        let scope = StatementCancel::arm(target(true), None);
        let handle = scope.handle();
        handle.cancel().await;
        handle.cancel().await;
        assert!(handle.is_cancelled());

        let err = scope.finish(Ok(())).await.unwrap_err();
        assert!(matches!(err, Error::QueryCancelled));
    }

    #[tokio::test]
    async fn test_cancel_after_completion_has_no_effect() {
        let scope = StatementCancel::arm(target(true), None);
        let handle = scope.handle();
        let target_abort = scope.shared.target.abort.clone();
        assert_eq!(scope.finish(Ok(1)).await.unwrap(), 1);

        handle.cancel().await;
        assert!(!handle.is_cancelled());
        assert!(!target_abort.is_aborted());
    }

    #[tokio::test]
    async fn test_failed_kill_is_captured() {
        let scope = StatementCancel::arm(target(false), None);
        scope.handle().cancel().await;
        let err = scope.finish(Ok(())).await.unwrap_err();
        assert!(matches!(err, Error::CancelFailed(_)));
    }

    #[tokio::test]
    async fn test_disarm_is_idempotent() {
        let mut scope = StatementCancel::arm(target(true), Some(Duration::from_millis(20)));
        scope.disarm();
        scope.disarm();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!scope.is_cancelled());
    }

    #[test]
    fn test_strategy_from_config() {
        assert_eq!(CancelStrategy::for_config(&target(true).config), CancelStrategy::Abort);
        assert_eq!(
            CancelStrategy::for_config(&target(false).config),
            CancelStrategy::KillQuery
        );
    }
}
