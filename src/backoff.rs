// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! Back-off schedules slept between attempts of one batch.
//!
//! A schedule is a deterministic sequence of inter-attempt delays, bounded
//! by an attempt count. Jittered variants follow the usual exponential
//! back-off constructions; all delays are in milliseconds.

use std::time::Duration;

use rand::{thread_rng, Rng};

/// A bounded sequence of inter-attempt delays.
///
/// Cloned per batch task; each clone owns its attempt cursor.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    kind: BackoffKind,
    current_attempts: u32,
    max_attempts: u32,
    base_delay_ms: u64,
    current_delay_ms: u64,
    max_delay_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum BackoffKind {
    None,
    NoJitter,
    FullJitter,
    EqualJitter,
    DecorrelatedJitter,
}

impl Backoff {
    /// No delays at all: the first call to [`Backoff::next_delay_duration`]
    /// returns `None`.
    pub const fn no_backoff() -> Backoff {
        Backoff {
            kind: BackoffKind::None,
            current_attempts: 0,
            max_attempts: 0,
            base_delay_ms: 0,
            current_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Plain exponential back-off: `base`, `2*base`, `4*base`, ... capped
    /// at `max_delay_ms`.
    pub const fn no_jitter_backoff(
        base_delay_ms: u64,
        max_delay_ms: u64,
        max_attempts: u32,
    ) -> Backoff {
        Backoff {
            kind: BackoffKind::NoJitter,
            current_attempts: 0,
            max_attempts,
            base_delay_ms,
            current_delay_ms: base_delay_ms,
            max_delay_ms,
        }
    }

    /// Exponential back-off where each delay is drawn uniformly from
    /// `[0, current)`.
    pub const fn full_jitter_backoff(
        base_delay_ms: u64,
        max_delay_ms: u64,
        max_attempts: u32,
    ) -> Backoff {
        Backoff {
            kind: BackoffKind::FullJitter,
            current_attempts: 0,
            max_attempts,
            base_delay_ms,
            current_delay_ms: base_delay_ms,
            max_delay_ms,
        }
    }

    /// Exponential back-off where each delay is `current/2` plus a uniform
    /// draw from `[0, current/2)`.
    pub const fn equal_jitter_backoff(
        base_delay_ms: u64,
        max_delay_ms: u64,
        max_attempts: u32,
    ) -> Backoff {
        Backoff {
            kind: BackoffKind::EqualJitter,
            current_attempts: 0,
            max_attempts,
            base_delay_ms,
            current_delay_ms: base_delay_ms,
            max_delay_ms,
        }
    }

    /// Back-off where each delay is drawn from `[base, 3*previous)`,
    /// capped at `max_delay_ms`.
    pub const fn decorrelated_jitter_backoff(
        base_delay_ms: u64,
        max_delay_ms: u64,
        max_attempts: u32,
    ) -> Backoff {
        Backoff {
            kind: BackoffKind::DecorrelatedJitter,
            current_attempts: 0,
            max_attempts,
            base_delay_ms,
            current_delay_ms: base_delay_ms,
            max_delay_ms,
        }
    }

    pub fn is_none(&self) -> bool {
        self.kind == BackoffKind::None
    }

    /// The next delay to sleep, or `None` once the attempt budget is
    /// spent.
    pub fn next_delay_duration(&mut self) -> Option<Duration> {
        if self.current_attempts >= self.max_attempts {
            return None;
        }
        self.current_attempts += 1;

        let delay_ms = match self.kind {
            BackoffKind::None => return None,
            BackoffKind::NoJitter => {
                let delay = self.current_delay_ms;
                self.current_delay_ms = self.max_delay_ms.min(self.current_delay_ms * 2);
                delay
            }
            BackoffKind::FullJitter => {
                let delay = thread_rng().gen_range(0..=self.current_delay_ms);
                self.current_delay_ms = self.max_delay_ms.min(self.current_delay_ms * 2);
                delay
            }
            BackoffKind::EqualJitter => {
                let half = self.current_delay_ms / 2;
                let delay = half + thread_rng().gen_range(0..=half);
                self.current_delay_ms = self.max_delay_ms.min(self.current_delay_ms * 2);
                delay
            }
            BackoffKind::DecorrelatedJitter => {
                let delay = self
                    .max_delay_ms
                    .min(thread_rng().gen_range(self.base_delay_ms..=self.current_delay_ms * 3));
                self.current_delay_ms = delay;
                delay
            }
        };
        Some(Duration::from_millis(delay_ms))
    }
}
