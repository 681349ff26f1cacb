//! Per-direction transfer rate governors.
//!
//! One [`ThrottleGroup`] exists per transfer direction for the whole
//! process. Every live handle draws from the same token bucket, so the
//! configured rate bounds the direction's aggregate throughput, and
//! `set_rate` takes effect on bytes that have not yet passed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Effectively-unlimited rate used for non-sync transfers (122 MiB/s).
pub const UNLIMITED_RATE: u64 = 122 * 1024 * 1024;

struct Bucket {
    /// Bytes per second. Always >= 1.
    rate: u64,
    available: f64,
    last_refill: Instant,
}

/// Process-wide rate governor for one transfer direction.
#[derive(Clone)]
pub struct ThrottleGroup {
    inner: Arc<Mutex<Bucket>>,
}

impl ThrottleGroup {
    /// Creates a group with the unlimited default rate.
    pub fn new() -> Self {
        Self::with_rate(UNLIMITED_RATE)
    }

    pub fn with_rate(bytes_per_second: u64) -> Self {
        let rate = bytes_per_second.max(1);
        Self {
            inner: Arc::new(Mutex::new(Bucket {
                rate,
                // Start with one second of burst so the first slice of a
                // transfer never stalls.
                available: rate as f64,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Sets the group rate. Idempotent; applies to all existing and
    /// future handles.
    pub fn set_rate(&self, bytes_per_second: u64) {
        let mut bucket = self.inner.lock().unwrap();
        let rate = bytes_per_second.max(1);
        if bucket.rate != rate {
            bucket.rate = rate;
            bucket.available = bucket.available.min(rate as f64);
        }
    }

    pub fn rate(&self) -> u64 {
        self.inner.lock().unwrap().rate
    }

    /// Returns a handle that shapes one transfer attempt's byte stream.
    pub fn throttle(&self) -> ThrottleHandle {
        ThrottleHandle {
            group: self.clone(),
        }
    }
}

impl Default for ThrottleGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream-shaping handle attached to a single transfer attempt.
///
/// Dropping the handle releases it; no bucket state outlives the group.
#[derive(Clone)]
pub struct ThrottleHandle {
    group: ThrottleGroup,
}

impl ThrottleHandle {
    /// Waits until `bytes` may pass at the group's current rate.
    ///
    /// Sleeps are capped at one second so a rate reset mid-transfer is
    /// picked up on the next poll (bursts within one tick are acceptable).
    pub async fn acquire(&self, bytes: u64) {
        loop {
            let wait = {
                let mut bucket = self.group.inner.lock().unwrap();
                let rate = bucket.rate as f64;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.last_refill = now;
                // Cap the burst at one second of budget, but never below the
                // request size or large slices could starve forever.
                let cap = rate.max(bytes as f64);
                bucket.available = (bucket.available + elapsed * rate).min(cap);

                if bucket.available >= bytes as f64 {
                    bucket.available -= bytes as f64;
                    None
                } else {
                    let deficit = bytes as f64 - bucket.available;
                    Some(Duration::from_secs_f64((deficit / rate).clamp(0.001, 1.0)))
                }
            };

            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_passes_immediately() {
        let group = ThrottleGroup::with_rate(1000);
        let handle = group.throttle();
        let start = Instant::now();
        handle.acquire(1000).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn excess_bytes_are_paced() {
        let group = ThrottleGroup::with_rate(1000);
        let handle = group.throttle();
        handle.acquire(1000).await;

        let start = Instant::now();
        handle.acquire(500).await;
        // 500 bytes at 1000 B/s ≈ 0.5 s of refill.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(400), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(700), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_reset_applies_to_live_handles() {
        let group = ThrottleGroup::with_rate(10);
        let handle = group.throttle();
        handle.acquire(10).await;

        // At 10 B/s this would take ~100 s; raising the rate mid-wait
        // must shorten it to ~1 s (the poll cap) plus refill time.
        group.set_rate(1_000_000);
        let start = Instant::now();
        handle.acquire(1000).await;
        assert!(start.elapsed() <= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn handles_share_one_budget() {
        let group = ThrottleGroup::with_rate(1000);
        let a = group.throttle();
        let b = group.throttle();

        a.acquire(1000).await;
        let start = Instant::now();
        b.acquire(1000).await;
        // The second handle finds the bucket drained by the first.
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_request_completes() {
        let group = ThrottleGroup::with_rate(100);
        let handle = group.throttle();
        let start = Instant::now();
        handle.acquire(250).await;
        // 250 bytes at 100 B/s with a 100-byte starting burst ≈ 1.5 s.
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(start.elapsed() <= Duration::from_millis(3000));
    }

    #[test]
    fn zero_rate_is_clamped() {
        let group = ThrottleGroup::with_rate(0);
        assert_eq!(group.rate(), 1);
        group.set_rate(0);
        assert_eq!(group.rate(), 1);
    }
}
