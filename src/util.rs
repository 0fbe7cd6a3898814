// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! Time-budget and cancellation primitives shared across the crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::{Error, Result};

/// An absolute point in time bounding every suspending call of one
/// operation.
///
/// Suspension points take the remaining budget rather than a fresh timeout,
/// so retries can never extend the overall wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    when: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Deadline {
        Deadline {
            when: Instant::now() + timeout,
        }
    }

    /// The remaining budget; `None` once elapsed.
    pub fn remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        if now >= self.when {
            None
        } else {
            Some(self.when - now)
        }
    }

    pub fn elapsed(&self) -> bool {
        Instant::now() >= self.when
    }

    /// The tighter of this deadline and `timeout` measured from now.
    pub fn cap(&self, timeout: Duration) -> Deadline {
        Deadline {
            when: self.when.min(Instant::now() + timeout),
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.elapsed() {
            Err(Error::Timeout)
        } else {
            Ok(())
        }
    }
}

/// A sticky cancellation flag shared by every task of one operation.
///
/// Raised once by the caller and observed at suspension points; it never
/// resets.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    inner: Arc<InterruptInner>,
}

#[derive(Debug, Default)]
struct InterruptInner {
    raised: AtomicBool,
    notify: Notify,
}

impl Interrupt {
    pub fn new() -> Interrupt {
        Interrupt::default()
    }

    pub fn raise(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_raised() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Resolves once the flag is raised.
    pub async fn raised(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

/// Sleeps for `delay` truncated to the deadline budget, waking early on
/// interruption. The caller re-checks the deadline after a truncated sleep.
pub(crate) async fn sleep_with(
    delay: Duration,
    deadline: Deadline,
    interrupt: &Interrupt,
) -> Result<()> {
    let remaining = deadline.remaining().ok_or(Error::Timeout)?;
    tokio::select! {
        _ = tokio::time::sleep(delay.min(remaining)) => Ok(()),
        _ = interrupt.raised() => Err(Error::Interrupted),
    }
}
