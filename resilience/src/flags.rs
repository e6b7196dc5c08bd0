// Feature-flag cache.
// Runtime settings are read through a TTL snapshot over a flag provider;
// an unreachable provider degrades to conservative defaults (flags off).

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Flag storage collaborator. Values are strings; boolean flags store
/// "true"/"false" (or "1"/"0").
#[async_trait::async_trait]
pub trait FlagProvider: Send + Sync {
    async fn get_value(&self, key: &str) -> Result<Option<String>>;
}

/// Redis-backed flag provider. Keys live under the `settings:` prefix.
pub struct RedisFlagProvider {
    conn: redis::aio::ConnectionManager,
}

impl RedisFlagProvider {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid redis URL")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("Failed to connect to redis")?;
        Ok(Self { conn })
    }
}

#[async_trait::async_trait]
impl FlagProvider for RedisFlagProvider {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(format!("settings:{}", key))
            .await
            .context("Failed to read flag from redis")?;
        Ok(value)
    }
}

/// Flag cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagCacheConfig {
    /// Seconds a cached value stays fresh
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: i64,
}

impl Default for FlagCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> i64 {
    30
}

struct CachedValue {
    value: Option<String>,
    fetched_at: DateTime<Utc>,
}

/// TTL cache over a flag provider. Provider failures are cached as absent
/// so a dead provider is not hammered every call.
pub struct FlagCache {
    provider: Arc<dyn FlagProvider>,
    config: FlagCacheConfig,
    entries: RwLock<HashMap<String, CachedValue>>,
}

impl FlagCache {
    pub fn new(provider: Arc<dyn FlagProvider>, config: FlagCacheConfig) -> Self {
        Self {
            provider,
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Current value for a key, from cache when fresh. Returns None when the
    /// key is unset or the provider is unreachable.
    pub async fn get_value(&self, key: &str) -> Option<String> {
        let ttl = Duration::seconds(self.config.ttl_secs);
        let now = Utc::now();

        {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(key) {
                if now - cached.fetched_at < ttl {
                    return cached.value.clone();
                }
            }
        }

        let value = match self.provider.get_value(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "flag provider unreachable, defaulting to unset");
                None
            }
        };

        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CachedValue {
                value: value.clone(),
                fetched_at: now,
            },
        );
        value
    }

    /// Boolean flag: defaults to false when unset or unreachable.
    pub async fn is_enabled(&self, key: &str) -> bool {
        match self.get_value(key).await.as_deref() {
            Some("true") | Some("1") => true,
            _ => false,
        }
    }

    /// Drop one cached key so the next read goes to the provider.
    pub async fn invalidate(&self, key: &str) {
        debug!(key, "invalidating cached flag");
        self.entries.write().await.remove(key);
    }

    /// Drop the whole cache.
    pub async fn invalidate_all(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticProvider {
        value: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FlagProvider for StaticProvider {
        async fn get_value(&self, _key: &str) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.clone())
        }
    }

    struct FailingProvider;

    #[async_trait::async_trait]
    impl FlagProvider for FailingProvider {
        async fn get_value(&self, _key: &str) -> Result<Option<String>> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_defaults_false_when_unreachable() {
        let cache = FlagCache::new(Arc::new(FailingProvider), FlagCacheConfig::default());
        assert!(!cache.is_enabled("variant_b_enabled").await);
    }

    #[tokio::test]
    async fn test_caches_within_ttl() {
        let provider = Arc::new(StaticProvider {
            value: Some("true".to_string()),
            calls: AtomicUsize::new(0),
        });
        let cache = FlagCache::new(provider.clone(), FlagCacheConfig { ttl_secs: 60 });

        assert!(cache.is_enabled("variant_b_enabled").await);
        assert!(cache.is_enabled("variant_b_enabled").await);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reread() {
        let provider = Arc::new(StaticProvider {
            value: Some("1".to_string()),
            calls: AtomicUsize::new(0),
        });
        let cache = FlagCache::new(provider.clone(), FlagCacheConfig { ttl_secs: 60 });

        assert!(cache.is_enabled("variant_b_enabled").await);
        cache.invalidate("variant_b_enabled").await;
        assert!(cache.is_enabled("variant_b_enabled").await);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
