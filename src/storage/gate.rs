//! Concurrency Gate Module
//!
//! Bounds simultaneous durable-store mutations and retries transient
//! failures with a linearly increasing, non-blocking backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::error::{CacheError, Result};

// == Concurrency Gate ==
/// Counting gate around durable-store mutations.
///
/// At most `max_concurrent_ops` guarded operations run at once; a caller
/// that cannot obtain a slot within the bounded wait fails with
/// [`CacheError::GateTimeout`] before the operation has begun, leaving no
/// partial state. Transient failures are retried from scratch — the
/// operation closure is re-invoked, never resumed — while the slot stays
/// held, so retries of one operation cannot raise the concurrency level.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    slots: Arc<Semaphore>,
    acquire_timeout: Duration,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ConcurrencyGate {
    // == Constructor ==
    pub fn new(
        max_concurrent_ops: usize,
        acquire_timeout: Duration,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent_ops.max(1))),
            acquire_timeout,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    // == Run ==
    /// Runs `operation` under a concurrency slot with retry.
    ///
    /// `operation` is a closure producing a fresh future per attempt, so
    /// each retry restarts from the beginning. Only failures classified
    /// transient are retried; attempt N waits N times the base delay
    /// before the next try.
    pub async fn run<T, F, Fut>(&self, name: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _slot = match timeout(self.acquire_timeout, self.slots.acquire()).await {
            Ok(Ok(permit)) => permit,
            // The semaphore is never closed while the gate is alive
            Ok(Err(_)) | Err(_) => {
                return Err(CacheError::GateTimeout {
                    waited_ms: self.acquire_timeout.as_millis() as u64,
                })
            }
        };

        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        operation = name,
                        attempt,
                        error = %err,
                        "transient failure, retrying"
                    );
                    sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Slots currently available, exposed for tests.
    #[cfg(test)]
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gate(max_ops: usize) -> ConcurrencyGate {
        ConcurrencyGate::new(
            max_ops,
            Duration::from_millis(50),
            3,
            Duration::from_millis(1),
        )
    }

    fn transient() -> CacheError {
        CacheError::Transient(io::Error::new(io::ErrorKind::WouldBlock, "busy"))
    }

    #[tokio::test]
    async fn test_successful_operation_passes_through() {
        let result = gate(2).run("op", || async { Ok(7) }).await.unwrap();
        assert_eq!(result, 7);
    }

    #[tokio::test]
    async fn test_transient_failures_retried_until_success() {
        let attempts = AtomicUsize::new(0);
        let result = gate(2)
            .run("op", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(transient())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_surfaces_failure() {
        let attempts = AtomicUsize::new(0);
        let result: Result<()> = gate(2)
            .run("op", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert!(matches!(result, Err(CacheError::Transient(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_final_errors_never_retried() {
        let attempts = AtomicUsize::new(0);
        let result: Result<()> = gate(2)
            .run("op", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(CacheError::Capacity { size: 2, max: 1 })
                }
            })
            .await;

        assert!(matches!(result, Err(CacheError::Capacity { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquisition_times_out_when_slots_exhausted() {
        let gate = gate(1);

        // Occupy the only slot with an operation that outlives the wait
        let held = gate.clone();
        let holder = tokio::spawn(async move {
            held.run("holder", || async {
                sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await
        });
        // Give the holder time to take the slot
        sleep(Duration::from_millis(20)).await;

        let result: Result<()> = gate.run("blocked", || async { Ok(()) }).await;
        assert!(matches!(result, Err(CacheError::GateTimeout { .. })));

        holder.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_bound() {
        let max_ops = 4;
        let gate = ConcurrencyGate::new(
            max_ops,
            Duration::from_secs(5),
            3,
            Duration::from_millis(1),
        );
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::new();
        for _ in 0..16 {
            let gate = gate.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            workers.push(tokio::spawn(async move {
                gate.run("worker", || {
                    let in_flight = in_flight.clone();
                    let peak = peak.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await
            }));
        }
        for worker in workers {
            let _ = worker.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= max_ops);
        assert_eq!(gate.available_slots(), max_ops);
    }
}
