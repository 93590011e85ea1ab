//! Bounded admission for room-level units.
//!
//! Units run cooperatively on the caller's task: no spawning, so they may
//! borrow the run context. Admission goes through a fair semaphore, and
//! every unit's result is captured as a [`Settled`] value so one panicking
//! room never takes the batch down.

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Result of one unit submitted to [`ConcurrencyLimiter::settle_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled<T> {
    Completed(T),
    /// The unit panicked; carries the panic message.
    Panicked(String),
    /// Cancellation arrived before the unit was admitted.
    NotAdmitted,
}

/// FIFO admission gate with active and peak counters.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Semaphore,
    limit: usize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyLimiter {
    /// Creates a limiter admitting at most `limit` units (minimum 1).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Semaphore::new(limit),
            limit,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Units currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of units that ran at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Runs every unit under the bound and returns one result per unit,
    /// ordered by submission index.
    ///
    /// Once `cancel` fires no further unit is admitted; units already
    /// running are left to finish.
    pub async fn settle_all<I, F, Fut, T>(
        &self,
        units: I,
        cancel: &CancellationToken,
        f: F,
    ) -> Vec<(usize, Settled<T>)>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = T>,
    {
        let f = &f;
        let mut pending: FuturesUnordered<_> = units
            .into_iter()
            .enumerate()
            .map(|(idx, unit)| async move { (idx, self.admit(unit, cancel, f).await) })
            .collect();

        let mut settled = Vec::with_capacity(pending.len());
        while let Some(result) = pending.next().await {
            settled.push(result);
        }
        settled.sort_by_key(|(idx, _)| *idx);
        settled
    }

    async fn admit<U, F, Fut, T>(&self, unit: U, cancel: &CancellationToken, f: &F) -> Settled<T>
    where
        F: Fn(U) -> Fut,
        Fut: Future<Output = T>,
    {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = self.semaphore.acquire() => permit.ok(),
        };
        let Some(_permit) = permit else {
            return Settled::NotAdmitted;
        };

        let _active = ActiveGuard::enter(self);
        match AssertUnwindSafe(f(unit)).catch_unwind().await {
            Ok(value) => Settled::Completed(value),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(panic = %message, "unit panicked");
                Settled::Panicked(message)
            }
        }
    }
}

struct ActiveGuard<'a>(&'a ConcurrencyLimiter);

impl<'a> ActiveGuard<'a> {
    fn enter(limiter: &'a ConcurrencyLimiter) -> Self {
        let now = limiter.active.fetch_add(1, Ordering::SeqCst) + 1;
        limiter.peak.fetch_max(now, Ordering::SeqCst);
        Self(limiter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
