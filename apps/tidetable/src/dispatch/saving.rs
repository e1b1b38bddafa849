use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Counts in-flight saves and publishes whether any are pending.
#[derive(Debug, Clone)]
pub struct SavingTracker {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    in_flight: Mutex<usize>,
    flag: watch::Sender<bool>,
}

impl SavingTracker {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                in_flight: Mutex::new(0),
                flag,
            }),
        }
    }

    /// Mark a save as started. The save ends when the guard drops.
    pub fn begin(&self) -> SavingGuard {
        let mut in_flight = self.inner.in_flight.lock();
        *in_flight += 1;
        self.inner.flag.send_if_modified(|flag| !std::mem::replace(flag, true));
        SavingGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn is_saving(&self) -> bool {
        *self.inner.flag.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.flag.subscribe()
    }
}

impl Default for SavingTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use = "the save ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SavingGuard {
    inner: Arc<Inner>,
}

impl Drop for SavingGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.inner.flag.send_if_modified(|flag| std::mem::replace(flag, false));
        }
    }
}
