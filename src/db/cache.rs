// db/cache.rs
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Cache TTL constants (in seconds)
pub const PROJECT_CACHE_TTL: usize = 300; // 5 minutes
pub const PROJECT_LIST_TTL: usize = 60;
pub const USER_PROFILE_TTL: usize = 1800; // 30 minutes
pub const USER_REVIEWS_TTL: usize = 900; // 15 minutes
pub const ANALYTICS_CACHE_TTL: usize = 120; // 2 minutes

pub fn project_key(project_id: Uuid) -> String {
    format!("project:{}", project_id)
}

pub const PROJECT_LIST_PATTERN: &str = "projects:list:*";

pub fn project_list_key(query: &str) -> String {
    format!("projects:list:{}", query)
}

pub fn user_profile_key(user_id: Uuid) -> String {
    format!("user_profile:{}", user_id)
}

pub fn user_reviews_key(user_id: Uuid) -> String {
    format!("user_reviews:{}", user_id)
}

pub const ANALYTICS_KEY: &str = "admin:analytics";

pub struct CacheHelper;

impl CacheHelper {
    /// Generic get from cache
    pub async fn get<T: DeserializeOwned>(
        redis: &Arc<ConnectionManager>,
        key: &str,
    ) -> Result<Option<T>, redis::RedisError> {
        let mut conn = ConnectionManager::clone(redis);
        let cached: Option<String> = conn.get(key).await?;

        match cached {
            Some(data) => match serde_json::from_str::<T>(&data) {
                Ok(value) => {
                    tracing::debug!("Cache HIT: {}", key);
                    Ok(Some(value))
                }
                Err(_) => {
                    tracing::warn!("Cache deserialization failed for: {}", key);
                    Ok(None)
                }
            },
            None => {
                tracing::debug!("Cache MISS: {}", key);
                Ok(None)
            }
        }
    }

    /// Generic set to cache with TTL
    pub async fn set<T: Serialize>(
        redis: &Arc<ConnectionManager>,
        key: &str,
        value: &T,
        ttl_seconds: usize,
    ) -> Result<(), redis::RedisError> {
        if let Ok(json) = serde_json::to_string(value) {
            let mut conn = ConnectionManager::clone(redis);
            let _: () = conn.set_ex(key, json, ttl_seconds).await?;
            tracing::debug!("Cache SET: {} (TTL: {}s)", key, ttl_seconds);
        }
        Ok(())
    }

    pub async fn delete(redis: &Arc<ConnectionManager>, key: &str) -> Result<(), redis::RedisError> {
        let mut conn = ConnectionManager::clone(redis);
        let _: () = conn.del(key).await?;
        tracing::debug!("Cache DELETE: {}", key);
        Ok(())
    }

    /// Delete keys matching a pattern using SCAN (non-blocking)
    pub async fn delete_pattern(
        redis: &Arc<ConnectionManager>,
        pattern: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = ConnectionManager::clone(redis);
        let mut cursor: u64 = 0;
        let mut deleted_count = 0;

        loop {
            let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                deleted_count += keys.len();
                let _: () = conn.del(&keys).await?;
            }

            cursor = new_cursor;
            if cursor == 0 {
                break;
            }
        }

        tracing::debug!("Cache DELETE pattern: {} ({} keys)", pattern, deleted_count);
        Ok(())
    }

    /// Read-through helper: a cache error is treated as a miss.
    pub async fn get_optional<T: DeserializeOwned>(
        redis: Option<&Arc<ConnectionManager>>,
        key: &str,
    ) -> Option<T> {
        let redis = redis?;
        match Self::get(redis, key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    pub async fn set_optional<T: Serialize>(
        redis: Option<&Arc<ConnectionManager>>,
        key: &str,
        value: &T,
        ttl_seconds: usize,
    ) {
        if let Some(redis) = redis {
            if let Err(e) = Self::set(redis, key, value, ttl_seconds).await {
                tracing::warn!("Cache write failed for {}: {}", key, e);
            }
        }
    }

    pub async fn invalidate_pattern(redis: Option<&Arc<ConnectionManager>>, pattern: &str) {
        if let Some(redis) = redis {
            if let Err(e) = Self::delete_pattern(redis, pattern).await {
                tracing::warn!("Cache invalidation failed for {}: {}", pattern, e);
            }
        }
    }

    /// Delete-on-write. Failures are logged; the TTL bounds any staleness.
    pub async fn invalidate(redis: Option<&Arc<ConnectionManager>>, keys: &[String]) {
        if let Some(redis) = redis {
            for key in keys {
                if let Err(e) = Self::delete(redis, key).await {
                    tracing::warn!("Cache invalidation failed for {}: {}", key, e);
                }
            }
        }
    }

    pub async fn health_check(redis: &Arc<ConnectionManager>) -> Result<bool, redis::RedisError> {
        let mut conn = ConnectionManager::clone(redis);
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(response == "PONG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_keys() {
        let id = Uuid::parse_str("7d3c8c5e-1f2a-4b6e-9d0a-3c4b5a6d7e8f").unwrap();
        assert_eq!(project_key(id), "project:7d3c8c5e-1f2a-4b6e-9d0a-3c4b5a6d7e8f");
        assert_eq!(user_profile_key(id), "user_profile:7d3c8c5e-1f2a-4b6e-9d0a-3c4b5a6d7e8f");
        assert_eq!(project_list_key("status=open&page=1"), "projects:list:status=open&page=1");
        assert_eq!(user_reviews_key(id), "user_reviews:7d3c8c5e-1f2a-4b6e-9d0a-3c4b5a6d7e8f");
    }

    #[tokio::test]
    async fn test_disabled_cache_is_a_miss() {
        let value: Option<String> = CacheHelper::get_optional(None, "project:missing").await;
        assert!(value.is_none());
        CacheHelper::set_optional(None, "project:missing", &"x", PROJECT_CACHE_TTL).await;
        CacheHelper::invalidate(None, &["project:missing".to_string()]).await;
    }
}
