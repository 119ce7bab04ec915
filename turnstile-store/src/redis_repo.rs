use redis::{AsyncCommands, RedisResult};

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    /// Fixed-window counter. Returns `true` while `key` is within `limit` for the window.
    ///
    /// The window starts with the first hit and is never extended by later ones.
    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count, ttl): (i64, i64) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .ttl(key)
            .query_async(&mut conn)
            .await?;

        // A counter without an expiry also heals here, e.g. after a crash between the two calls
        if window_unset(ttl) {
            let _: () = conn.expire(key, window_seconds).await?;
        }

        Ok(count <= limit)
    }
}

/// `TTL` answers -1 for a key without expiry and -2 for a missing one.
fn window_unset(ttl: i64) -> bool {
    ttl < 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_running_window_is_left_alone() {
        assert!(window_unset(-1));
        assert!(window_unset(-2));
        assert!(!window_unset(59));
        assert!(!window_unset(0));
    }

    /// Needs a live Redis at `REDIS_URL`.
    #[tokio::test]
    #[ignore]
    async fn test_window_is_not_extended_by_traffic() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let redis = RedisClient::new(&url).unwrap();
        let key = format!("rate_limit:test:{}", uuid::Uuid::new_v4());

        assert!(redis.check_rate_limit(&key, 2, 2).await.unwrap());
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(redis.check_rate_limit(&key, 2, 2).await.unwrap());
        assert!(!redis.check_rate_limit(&key, 2, 2).await.unwrap());

        // Steady traffic must not keep the counter alive past the first hit's window
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(redis.check_rate_limit(&key, 2, 2).await.unwrap());
    }
}
