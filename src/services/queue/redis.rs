use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Script};
use std::time::Duration;

use super::{Broker, Delivery, QueueError, TaskEnvelope};

/// Requeue a leased payload only if it is still in the processing list, so an
/// ack racing the reaper (or a second reaper) never produces a duplicate.
const REQUEUE_SCRIPT: &str = r#"
redis.call('ZREM', KEYS[3], ARGV[1])
if redis.call('LREM', KEYS[2], 1, ARGV[1]) > 0 then
  redis.call('LPUSH', KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

/// Non-blocking reserve: pop and lease in one step.
const RESERVE_SCRIPT: &str = r#"
local payload = redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
if payload then
  redis.call('ZADD', KEYS[3], ARGV[1], payload)
end
return payload
"#;

/// Give a lease to every processing entry that lacks one. Covers an executor
/// that died between `BRPOPLPUSH` and its `ZADD`; the entry is redelivered once
/// the adopted lease expires.
const ADOPT_SCRIPT: &str = r#"
local adopted = 0
for _, payload in ipairs(redis.call('LRANGE', KEYS[1], 0, -1)) do
  if not redis.call('ZSCORE', KEYS[2], payload) then
    redis.call('ZADD', KEYS[2], ARGV[1], payload)
    adopted = adopted + 1
  end
end
return adopted
"#;

/// Redis list queue with a processing list and a lease sorted set.
///
/// `publish` LPUSHes onto `<ns>:queue`; `reserve` moves the tail into
/// `<ns>:processing` and records a lease deadline in `<ns>:leases`.
pub struct RedisBroker {
    client: redis::Client,
    queue_key: String,
    processing_key: String,
    leases_key: String,
    lease: Duration,
}

impl RedisBroker {
    pub fn new(redis_url: &str, namespace: &str, lease: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            queue_key: format!("{namespace}:queue"),
            processing_key: format!("{namespace}:processing"),
            leases_key: format!("{namespace}:leases"),
            lease,
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    fn lease_deadline(&self) -> i64 {
        Utc::now().timestamp_millis() + self.lease.as_millis() as i64
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(envelope)?;
        conn.lpush::<_, _, ()>(&self.queue_key, &payload).await?;
        Ok(())
    }

    async fn reserve(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;

        let payload: Option<String> = if wait.is_zero() {
            Script::new(RESERVE_SCRIPT)
                .key(&self.queue_key)
                .key(&self.processing_key)
                .key(&self.leases_key)
                .arg(self.lease_deadline())
                .invoke_async(&mut conn)
                .await?
        } else {
            let popped: Option<String> = conn
                .brpoplpush(&self.queue_key, &self.processing_key, wait.as_secs_f64())
                .await?;
            if let Some(payload) = &popped {
                // Unleased entries left by a failure here are adopted by the reaper.
                conn.zadd::<_, _, _, ()>(&self.leases_key, payload, self.lease_deadline())
                    .await?;
            }
            popped
        };

        let Some(payload) = payload else {
            return Ok(None);
        };

        match serde_json::from_str::<TaskEnvelope>(&payload) {
            Ok(envelope) => Ok(Some(Delivery {
                envelope,
                receipt: payload,
            })),
            Err(e) => {
                // Drop poison messages rather than redelivering them forever.
                tracing::error!(error = %e, "Discarding undecodable task payload");
                conn.lrem::<_, _, ()>(&self.processing_key, 1, &payload).await?;
                conn.zrem::<_, _, ()>(&self.leases_key, &payload).await?;
                Err(QueueError::Serialize(e))
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .lrem(&self.processing_key, 1, &delivery.receipt)
            .ignore()
            .zrem(&self.leases_key, &delivery.receipt)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;

        let adopted: i64 = Script::new(ADOPT_SCRIPT)
            .key(&self.processing_key)
            .key(&self.leases_key)
            .arg(self.lease_deadline())
            .invoke_async(&mut conn)
            .await?;
        if adopted > 0 {
            tracing::warn!(adopted, "Leased processing entries that had no lease");
        }

        let now = Utc::now().timestamp_millis();
        let expired: Vec<String> = conn.zrangebyscore(&self.leases_key, "-inf", now).await?;

        let script = Script::new(REQUEUE_SCRIPT);
        let mut moved = 0;
        for payload in expired {
            let next = match serde_json::from_str::<TaskEnvelope>(&payload) {
                Ok(envelope) => serde_json::to_string(&envelope.redelivered())?,
                Err(e) => {
                    tracing::error!(error = %e, "Dropping undecodable leased payload");
                    conn.zrem::<_, _, ()>(&self.leases_key, &payload).await?;
                    conn.lrem::<_, _, ()>(&self.processing_key, 1, &payload).await?;
                    continue;
                }
            };

            let requeued: i64 = script
                .key(&self.queue_key)
                .key(&self.processing_key)
                .key(&self.leases_key)
                .arg(&payload)
                .arg(next)
                .invoke_async(&mut conn)
                .await?;
            moved += requeued as usize;
        }
        Ok(moved)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(&self.queue_key).await?;
        Ok(depth)
    }

    async fn health(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("redis ({})", self.queue_key)
    }
}
