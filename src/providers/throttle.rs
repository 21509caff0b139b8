use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};

use super::ProviderKind;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Outbound create-job limiter of one provider, one bucket per user.
#[derive(Clone)]
pub struct CreationThrottle {
    provider: ProviderKind,
    limiter: Arc<KeyedLimiter>,
}

impl CreationThrottle {
    pub fn new(provider: ProviderKind, creations_per_minute: u32) -> Self {
        let rate = NonZeroU32::new(creations_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            provider,
            limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(rate))),
        }
    }

    /// Waits until `user_id` may create another job.
    pub async fn acquire(&self, user_id: &str) {
        let key = user_id.to_string();
        if self.limiter.check_key(&key).is_ok() {
            return;
        }

        tracing::info!(
            provider = %self.provider,
            user_id = %user_id,
            "Creation rate limit reached, waiting for a token"
        );
        self.limiter.until_key_ready(&key).await;
    }

    pub fn housekeeping(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_token(throttle: &CreationThrottle, user_id: &str) -> bool {
        throttle.limiter.check_key(&user_id.to_string()).is_ok()
    }

    #[test]
    fn buckets_are_per_user() {
        let throttle = CreationThrottle::new(ProviderKind::Clips, 1);
        assert!(has_token(&throttle, "alice"));
        assert!(!has_token(&throttle, "alice"));
        assert!(has_token(&throttle, "bob"));
    }

    #[test]
    fn zero_rate_still_allows_one_creation() {
        let throttle = CreationThrottle::new(ProviderKind::Persona, 0);
        assert!(has_token(&throttle, "alice"));
    }

    #[tokio::test]
    async fn acquire_returns_immediately_with_tokens() {
        let throttle = CreationThrottle::new(ProviderKind::Images, 60);
        tokio::time::timeout(std::time::Duration::from_secs(1), throttle.acquire("alice"))
            .await
            .unwrap();
    }
}
