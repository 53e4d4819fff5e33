use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

/// Token bucket shared by every caller of one external service.
///
/// Holds up to one second's worth of requests and refills continuously at
/// `requests_per_minute / 60` tokens per second, so concurrent callers are
/// spread out instead of bursting into a 429.
#[derive(Debug)]
pub struct RateGate {
    name: String,
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateGate {
    /// `None` when `requests_per_minute` is 0, meaning ungated.
    pub fn per_minute(name: impl Into<String>, requests_per_minute: u32) -> Option<Self> {
        if requests_per_minute == 0 {
            return None;
        }
        let capacity = (requests_per_minute as f64 / 60.0).ceil().max(1.0);
        Some(Self {
            name: name.into(),
            capacity,
            refill_per_sec: requests_per_minute as f64 / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec)
            };

            debug!(gate = %self.name, wait_ms = wait.as_millis() as u64, "Rate gated, waiting for token");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rpm_disables_gate() {
        assert!(RateGate::per_minute("off", 0).is_none());
    }

    #[tokio::test]
    async fn first_second_of_requests_pass_immediately() {
        let gate = RateGate::per_minute("fast", 600).unwrap();
        let start = Instant::now();
        for _ in 0..10 {
            gate.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn waits_once_bucket_is_empty() {
        // 120 rpm: two tokens up front, then one every 500ms.
        let gate = RateGate::per_minute("slow", 120).unwrap();
        let start = Instant::now();
        for _ in 0..3 {
            gate.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
