//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Max inbound WebSocket messages per second per endpoint.
/// Pointer moves arrive every client frame, so this sits above a 60Hz client.
pub const MESSAGE_RATE_LIMIT: u32 = 120;

/// Per-endpoint rate limiter state
#[derive(Clone)]
pub struct EndpointRateLimiter {
    message_limiter: Arc<Limiter>,
}

impl EndpointRateLimiter {
    pub fn new() -> Self {
        Self::with_limit(MESSAGE_RATE_LIMIT)
    }

    pub fn with_limit(per_second: u32) -> Self {
        Self {
            message_limiter: create_limiter(per_second),
        }
    }

    /// Check if an inbound message is allowed (returns true if allowed)
    pub fn check_message(&self) -> bool {
        self.message_limiter.check().is_ok()
    }
}

impl Default for EndpointRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_beyond_quota_is_rejected() {
        let limiter = EndpointRateLimiter::with_limit(3);

        assert!(limiter.check_message());
        assert!(limiter.check_message());
        assert!(limiter.check_message());
        assert!(!limiter.check_message());
    }
}
