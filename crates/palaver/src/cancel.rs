//! Cooperative cancellation.
//!
//! A [`CancelToken`] is the context handed to serving handlers and to
//! outbound calls. Tokens form a tree: cancelling a parent cancels every
//! child, which is how transport shutdown reaches all in-flight handlers at
//! once. Cancellation is a level, not an edge - observing it after the fact
//! is always valid.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    canceled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a child token. It fires when this token fires, or when
    /// canceled directly.
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        if self.is_cancelled() {
            child.cancel();
        } else {
            let mut children = self.inner.children.lock();
            // Long-lived parents accumulate an entry per child; drop dead
            // ones before growing the list.
            if children.len() == children.capacity() {
                children.retain(|c| c.strong_count() > 0);
            }
            children.push(Arc::downgrade(&child.inner));
        }
        child
    }

    /// Fire the token. Idempotent; wakes every waiter and propagates to
    /// children.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// Wait until the token fires. Returns immediately if it already has.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check after registering the waiter: a cancel between the
            // flag load and `notified()` would otherwise be missed.
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Inner {
    fn cancel(&self) {
        if self.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.notify.notify_waiters();
        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("canceled", &self.is_cancelled())
            .finish()
    }
}
