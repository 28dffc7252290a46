//! One-shot gate holding back dispatch until the first load completes.
//!
//! Synchronous callers park on a condition variable, async callers await a
//! [`Notify`]. Once opened the gate stays open.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct LoadGate {
    open: Mutex<bool>,
    cond: Condvar,
    notify: Notify,
}

impl LoadGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate, releasing every waiter.
    pub fn open(&self) {
        let mut open = self.open.lock();
        if *open {
            return;
        }
        *open = true;
        drop(open);
        self.cond.notify_all();
        self.notify.notify_waiters();
        tracing::debug!("load gate opened");
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Block the current thread until the gate opens.
    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
    }

    /// Block for at most `timeout`; returns whether the gate is open.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut open = self.open.lock();
        if !*open {
            let _ = self.cond.wait_while_for(&mut open, |open| !*open, timeout);
        }
        *open
    }

    /// Resolve once the gate is open.
    pub async fn opened(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_open() {
                return;
            }
            notified.await;
        }
    }
}
