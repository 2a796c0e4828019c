//! Per-relay cooldown after a rate-limit NOTICE.

use dashmap::DashMap;
use nostr_store::RelayId;
use std::time::Duration;
use tokio::time::Instant;

/// Whether a NOTICE is a relay telling us to slow down.
pub fn is_rate_limit_notice(message: &str) -> bool {
    message.to_lowercase().contains("rate limit")
}

pub struct RateLimiter {
    cooldown: Duration,
    until: DashMap<RelayId, Instant>,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            until: DashMap::new(),
        }
    }

    /// Start (or restart) the cooldown for a relay.
    pub fn cool_down(&self, relay_id: RelayId) {
        self.until.insert(relay_id, Instant::now() + self.cooldown);
    }

    /// Whether the relay is still cooling down. An expired cooldown is cleared.
    pub fn is_cooling(&self, relay_id: RelayId) -> bool {
        let now = Instant::now();
        self.until
            .remove_if(&relay_id, |_, until| *until <= now)
            .is_none()
            && self.until.contains_key(&relay_id)
    }

    pub fn clear(&self, relay_id: RelayId) {
        self.until.remove(&relay_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_rate_limit_notices() {
        assert!(is_rate_limit_notice("Rate limit exceeded"));
        assert!(is_rate_limit_notice("rate-limited: RATE LIMIT reached"));
        assert!(!is_rate_limit_notice("rate-limited"));
        assert!(!is_rate_limit_notice("bad filter"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expires() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        assert!(!limiter.is_cooling(1));

        limiter.cool_down(1);
        assert!(limiter.is_cooling(1));
        assert!(!limiter.is_cooling(2));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(limiter.is_cooling(1));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!limiter.is_cooling(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        limiter.cool_down(3);
        limiter.clear(3);
        assert!(!limiter.is_cooling(3));
    }
}
