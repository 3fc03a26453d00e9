//! # In-Flight Deduplicator
//!
//! At most one concurrent execution per request fingerprint. The first
//! caller to acquire `inflight:{fp}` becomes the owner, runs the request,
//! publishes the serialized result under `result:{fp}` with a short TTL and
//! releases the lock with a compare-and-delete on its owner token (an
//! expired lock makes the release a no-op). Joiners poll for the published
//! result and fall through to direct execution when the lock TTL elapses:
//! deduplication is an optimization, never a correctness gate.
//!
//! The coordination substrate is redis (`SET NX PX` acquire, Lua guarded
//! delete). When redis is unconfigured or unreachable the deduplicator
//! degrades to an in-process map with the same semantics.
//!
//! Streaming requests bypass this module entirely; their results are not
//! reusable.

use crate::config::DedupConfig;
use crate::gateway_error::GatewayError;
use dashmap::DashMap;
use modelmux_core::registry::EndpointKind;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Guarded delete: remove the lock only while we still own it.
const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

/// Stable fingerprint for an equivalent request: canonicalized body plus
/// the authenticated tenant scope plus the endpoint kind. `serde_json`
/// maps are key-sorted, so serializing the body value canonicalizes it.
pub fn fingerprint(
    endpoint_kind: EndpointKind,
    tenant_id: Option<&str>,
    body: &serde_json::Value,
) -> String {
    let mut hasher = DefaultHasher::new();
    endpoint_kind.as_str().hash(&mut hasher);
    tenant_id.unwrap_or("").hash(&mut hasher);
    body.to_string().hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

#[derive(Debug, Clone)]
struct LocalLock {
    owner_token: String,
    expires: Instant,
}

#[derive(Debug, Clone)]
struct LocalResult {
    value: serde_json::Value,
    expires: Instant,
}

/// Process-wide deduplicator for non-streaming endpoints.
pub struct InFlightDeduplicator {
    config: DedupConfig,
    redis_client: Option<redis::Client>,
    local_locks: DashMap<String, LocalLock>,
    local_results: DashMap<String, LocalResult>,
}

impl InFlightDeduplicator {
    pub fn new(config: DedupConfig) -> Self {
        let redis_client = config.redis_url.as_deref().and_then(|url| {
            match redis::Client::open(url) {
                Ok(client) => {
                    tracing::info!("deduplication coordination via redis");
                    Some(client)
                }
                Err(e) => {
                    tracing::warn!(
                        "failed to initialize redis for deduplication, using in-process locks: {e}"
                    );
                    None
                }
            }
        });
        Self {
            config,
            redis_client,
            local_locks: DashMap::new(),
            local_results: DashMap::new(),
        }
    }

    /// Run `run` deduplicated under `fp`.
    ///
    /// The owner executes and publishes; joiners wait for the published
    /// result. Timed-out joiners and substrate failures execute directly.
    pub async fn execute<T, F, Fut>(&self, fp: &str, run: F) -> Result<T, GatewayError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        if !self.config.enabled {
            return run().await;
        }

        let ttl = Duration::from_millis(self.config.ttl_ms);
        let owner_token = Uuid::new_v4().to_string();

        if self.try_acquire(fp, &owner_token, ttl).await {
            let result = run().await;
            if let Ok(value) = &result {
                match serde_json::to_value(value) {
                    Ok(serialized) => self.publish_result(fp, serialized).await,
                    Err(e) => {
                        tracing::warn!("dedup result serialization failed: {e}");
                    }
                }
            }
            self.release(fp, &owner_token).await;
            return result;
        }

        // Joiner: poll for the owner's published result until the lock TTL
        // would have elapsed, then fail open.
        let poll = Duration::from_millis(self.config.poll_ms.max(1));
        let deadline = Instant::now() + ttl;
        while Instant::now() < deadline {
            if let Some(value) = self.read_result(fp).await {
                match serde_json::from_value(value) {
                    Ok(decoded) => {
                        tracing::debug!(fingerprint = fp, "joined deduplicated result");
                        return Ok(decoded);
                    }
                    Err(e) => {
                        tracing::warn!("dedup cached result decode failed: {e}");
                        break;
                    }
                }
            }
            // Owner gone without publishing (failed or crashed): take over
            if self.try_acquire(fp, &owner_token, ttl).await {
                let result = run().await;
                if let Ok(value) = &result {
                    if let Ok(serialized) = serde_json::to_value(value) {
                        self.publish_result(fp, serialized).await;
                    }
                }
                self.release(fp, &owner_token).await;
                return result;
            }
            tokio::time::sleep(poll).await;
        }

        tracing::debug!(fingerprint = fp, "dedup wait elapsed, executing directly");
        run().await
    }

    async fn try_acquire(&self, fp: &str, token: &str, ttl: Duration) -> bool {
        if self.redis_client.is_some() {
            match self.redis_acquire(fp, token, ttl).await {
                Ok(acquired) => return acquired,
                Err(e) => {
                    tracing::warn!("redis acquire failed, using in-process lock: {e}");
                }
            }
        }
        self.local_acquire(fp, token, ttl)
    }

    fn local_acquire(&self, fp: &str, token: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut acquired = false;
        let mut entry = self
            .local_locks
            .entry(fp.to_string())
            .or_insert_with(|| {
                acquired = true;
                LocalLock {
                    owner_token: token.to_string(),
                    expires: now + ttl,
                }
            });
        if !acquired && entry.expires <= now {
            // Expired lock: steal it
            entry.owner_token = token.to_string();
            entry.expires = now + ttl;
            acquired = true;
        }
        acquired
    }

    async fn redis_acquire(
        &self,
        fp: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, redis::RedisError> {
        let client = self.redis_client.as_ref().expect("checked by caller");
        let mut conn = client.get_multiplexed_tokio_connection().await?;
        let response: Option<String> = redis::cmd("SET")
            .arg(format!("inflight:{fp}"))
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(response.is_some())
    }

    async fn publish_result(&self, fp: &str, value: serde_json::Value) {
        let ttl = Duration::from_secs(self.config.result_ttl_secs);
        if self.redis_client.is_some() {
            match self.redis_publish(fp, &value, ttl).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!("redis publish failed, caching result locally: {e}");
                }
            }
        }
        self.local_results.insert(
            fp.to_string(),
            LocalResult {
                value,
                expires: Instant::now() + ttl,
            },
        );
    }

    async fn redis_publish(
        &self,
        fp: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), redis::RedisError> {
        let client = self.redis_client.as_ref().expect("checked by caller");
        let mut conn = client.get_multiplexed_tokio_connection().await?;
        let _: () = redis::cmd("SETEX")
            .arg(format!("result:{fp}"))
            .arg(ttl.as_secs().max(1))
            .arg(value.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn read_result(&self, fp: &str) -> Option<serde_json::Value> {
        if self.redis_client.is_some() {
            match self.redis_read(fp).await {
                Ok(result) => return result,
                Err(e) => {
                    tracing::warn!("redis read failed, checking local results: {e}");
                }
            }
        }
        let entry = self.local_results.get(fp)?;
        if entry.expires <= Instant::now() {
            drop(entry);
            self.local_results.remove(fp);
            return None;
        }
        Some(entry.value.clone())
    }

    async fn redis_read(&self, fp: &str) -> Result<Option<serde_json::Value>, redis::RedisError> {
        let client = self.redis_client.as_ref().expect("checked by caller");
        let mut conn = client.get_multiplexed_tokio_connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(format!("result:{fp}"))
            .query_async(&mut conn)
            .await?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    /// Compare-and-delete on the owner token; releasing a lock that expired
    /// (and possibly belongs to someone else now) is a no-op.
    async fn release(&self, fp: &str, token: &str) {
        if self.redis_client.is_some() {
            match self.redis_release(fp, token).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!("redis release failed: {e}");
                }
            }
        }
        self.local_locks
            .remove_if(fp, |_, lock| lock.owner_token == token);
    }

    async fn redis_release(&self, fp: &str, token: &str) -> Result<(), redis::RedisError> {
        let client = self.redis_client.as_ref().expect("checked by caller");
        let mut conn = client.get_multiplexed_tokio_connection().await?;
        let script = redis::Script::new(RELEASE_SCRIPT);
        let _: i32 = script
            .key(format!("inflight:{fp}"))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn deduplicator(ttl_ms: u64, poll_ms: u64) -> Arc<InFlightDeduplicator> {
        Arc::new(InFlightDeduplicator::new(DedupConfig {
            enabled: true,
            ttl_ms,
            poll_ms,
            result_ttl_secs: 300,
            redis_url: None,
        }))
    }

    #[test]
    fn fingerprint_is_stable_and_scope_sensitive() {
        let body = serde_json::json!({"model": "deepseek-chat", "messages": []});
        let a = fingerprint(EndpointKind::ChatCompletions, Some("acme"), &body);
        let b = fingerprint(EndpointKind::ChatCompletions, Some("acme"), &body);
        assert_eq!(a, b);

        assert_ne!(
            a,
            fingerprint(EndpointKind::ChatCompletions, Some("other"), &body)
        );
        assert_ne!(a, fingerprint(EndpointKind::Embeddings, Some("acme"), &body));
    }

    #[tokio::test]
    async fn joiner_receives_the_owners_result() {
        let dedup = deduplicator(5_000, 10);
        let calls = Arc::new(AtomicUsize::new(0));

        let owner = {
            let dedup = dedup.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                dedup
                    .execute("fp-1", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, GatewayError>(serde_json::json!({"answer": 42}))
                    })
                    .await
            })
        };
        // Give the owner time to take the lock
        tokio::time::sleep(Duration::from_millis(20)).await;
        let joiner = {
            let dedup = dedup.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                dedup
                    .execute("fp-1", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, GatewayError>(serde_json::json!({"answer": 42}))
                    })
                    .await
            })
        };

        let owner_result = owner.await.unwrap().unwrap();
        let joiner_result = joiner.await.unwrap().unwrap();
        assert_eq!(owner_result, joiner_result);
        // Exactly one upstream call was observed
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_fingerprints_run_independently() {
        let dedup = deduplicator(5_000, 10);
        let calls = Arc::new(AtomicUsize::new(0));
        for fp in ["fp-a", "fp-b"] {
            let calls = calls.clone();
            dedup
                .execute(fp, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, GatewayError>(serde_json::json!({}))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_owner_does_not_poison_the_fingerprint() {
        let dedup = deduplicator(5_000, 10);
        let error: Result<serde_json::Value, _> = dedup
            .execute("fp-err", || async {
                Err(GatewayError::Internal {
                    message: "boom".to_string(),
                })
            })
            .await;
        assert!(error.is_err());

        // Lock was released; the next caller owns and succeeds
        let value = dedup
            .execute("fp-err", || async {
                Ok::<_, GatewayError>(serde_json::json!({"ok": true}))
            })
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn joiner_takes_over_when_the_owner_failed() {
        let dedup = deduplicator(5_000, 10);
        // Seed a failed owner: lock released, no result published
        let _ = dedup
            .execute("fp-takeover", || async {
                Err::<serde_json::Value, _>(GatewayError::Internal {
                    message: "boom".to_string(),
                })
            })
            .await;

        let value = dedup
            .execute("fp-takeover", || async {
                Ok::<_, GatewayError>(serde_json::json!({"recovered": true}))
            })
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({"recovered": true}));
    }

    #[tokio::test]
    async fn disabled_deduplication_runs_directly() {
        let dedup = Arc::new(InFlightDeduplicator::new(DedupConfig {
            enabled: false,
            ..Default::default()
        }));
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = calls.clone();
            dedup
                .execute("fp-off", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, GatewayError>(serde_json::json!({}))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
