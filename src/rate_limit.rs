//! Token-bucket rate limiter shared by every caller of one quota-bounded API.

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// One instance per distinct quota. Clone an `Arc<RateLimiter>` to share it;
/// never build one per call.
#[derive(Debug)]
pub struct RateLimiter {
    rate_per_sec: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// `rate_per_sec` tokens are added per second up to `capacity`. The bucket
    /// starts full.
    pub fn new(rate_per_sec: f64, capacity: f64) -> Self {
        let rate_per_sec = if rate_per_sec > 0.0 { rate_per_sec } else { 1.0 };
        let capacity = capacity.max(1.0);
        Self {
            rate_per_sec,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, suspending until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                (1.0 - state.tokens) / self.rate_per_sec
            };
            sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}
