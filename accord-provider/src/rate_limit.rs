use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("rate limit exceeded, retry after {retry_after_ms}ms")]
pub struct RateLimitExceeded {
    pub retry_after_ms: u64,
}

/// Non-blocking concurrency gate for a single provider. `acquire` either
/// reserves a slot immediately or fails with a suggested retry delay;
/// callers must pair every successful `acquire` with exactly one `release`,
/// even on the error path, so a panicking caller doesn't leak a permit.
#[derive(Debug)]
pub struct RateLimiter {
    max_concurrent: u32,
    in_flight: AtomicU32,
    retry_after_ms: u64,
}

impl RateLimiter {
    pub fn new(max_concurrent: u32, retry_after_ms: u64) -> Self {
        Self {
            max_concurrent,
            in_flight: AtomicU32::new(0),
            retry_after_ms,
        }
    }

    pub fn acquire(&self) -> Result<RateLimitPermit<'_>, RateLimitExceeded> {
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= self.max_concurrent {
                return Err(RateLimitExceeded {
                    retry_after_ms: self.retry_after_ms,
                });
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(RateLimitPermit { limiter: self }),
                Err(observed) => current = observed,
            }
        }
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// RAII guard returned by [`RateLimiter::acquire`]; releases the slot on drop
/// regardless of how the caller's await resolves.
#[derive(Debug)]
pub struct RateLimitPermit<'a> {
    limiter: &'a RateLimiter,
}

impl Drop for RateLimitPermit<'_> {
    fn drop(&mut self) {
        self.limiter.release();
    }
}
