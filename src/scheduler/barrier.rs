//! Completion barriers for the shutdown sequence.
//!
//! A [`CompletionBarrier`] counts registered units of work. Each registration
//! hands out a [`CompletionTicket`]; the unit signals by consuming or dropping
//! its ticket, so every registration is signaled exactly once even when the
//! work panics or is discarded. [`CompletionBarrier::wait`] resolves once the
//! count reaches zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

struct BarrierState {
    pending: AtomicUsize,
    notify: Notify,
}

/// Counter-and-wait barrier shared between the pool and its loops.
#[derive(Clone)]
pub struct CompletionBarrier {
    name: &'static str,
    state: Arc<BarrierState>,
}

impl std::fmt::Debug for CompletionBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionBarrier")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}

impl CompletionBarrier {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(BarrierState {
                pending: AtomicUsize::new(0),
                notify: Notify::new(),
            }),
        }
    }

    /// Registers one pending unit of work.
    pub fn register(&self) -> CompletionTicket {
        self.state.pending.fetch_add(1, Ordering::SeqCst);
        CompletionTicket {
            state: Some(Arc::clone(&self.state)),
        }
    }

    /// Number of registrations not yet signaled.
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Waits until every registration so far has been signaled.
    pub async fn wait(&self) {
        loop {
            // Created before the check so a concurrent notify_waiters is not missed.
            let notified = self.state.notify.notified();
            if self.pending() == 0 {
                return;
            }
            tracing::trace!(barrier = self.name, pending = self.pending(), "Waiting on barrier");
            notified.await;
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// One registered unit of work. Signals its barrier when dropped.
#[must_use = "dropping a ticket signals completion immediately"]
pub struct CompletionTicket {
    state: Option<Arc<BarrierState>>,
}

impl std::fmt::Debug for CompletionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTicket")
            .field("signaled", &self.state.is_none())
            .finish()
    }
}

impl CompletionTicket {
    /// Signals completion.
    pub fn signal(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(state) = self.state.take() {
            if state.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                state.notify.notify_waiters();
            }
        }
    }
}

impl Drop for CompletionTicket {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_immediately_when_idle() {
        let barrier = CompletionBarrier::new("idle");
        tokio::time::timeout(Duration::from_millis(100), barrier.wait())
            .await
            .expect("idle barrier should not block");
    }

    #[test]
    fn test_ticket_signals_once() {
        let barrier = CompletionBarrier::new("tasks");
        let first = barrier.register();
        let second = barrier.register();
        assert_eq!(barrier.pending(), 2);

        first.signal();
        assert_eq!(barrier.pending(), 1);

        drop(second);
        assert_eq!(barrier.pending(), 0);
    }

    #[tokio::test]
    async fn test_wait_blocks_until_all_signaled() {
        let barrier = CompletionBarrier::new("writes");
        let tickets: Vec<_> = (0..3).map(|_| barrier.register()).collect();

        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        for ticket in tickets {
            ticket.signal();
        }

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .expect("waiter should not panic");
    }

    #[test]
    fn test_ticket_dropped_during_panic_still_signals() {
        let barrier = CompletionBarrier::new("panics");
        let ticket = barrier.register();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _ticket = ticket;
            panic!("task blew up");
        }));

        assert!(result.is_err());
        assert_eq!(barrier.pending(), 0);
    }
}
