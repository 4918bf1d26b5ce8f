use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Script};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use super::{JobStore, StoreError};
use crate::models::job::{Job, JobStatus, Transition};
use crate::models::worker::WorkerSnapshot;

/// Optimistic-lock attempts before a transition gives up with `Conflict`.
const CAS_RETRIES: usize = 8;

const INSERT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], 'version', ARGV[1], 'data', ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[4])
return 1
"#;

/// Replace `data` only if `version` still holds the value the caller read.
const CAS_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if not current then
  return -1
end
if current ~= ARGV[1] then
  return 0
end
redis.call('HSET', KEYS[1], 'version', ARGV[2], 'data', ARGV[3])
return 1
"#;

/// Job records as Redis hashes (`version`, `data`) plus a sorted-set index by
/// creation time. Transitions are read-apply-compare-and-swap.
///
/// Worker snapshots live in `<ns>:worker:<name>` with a TTL, indexed by expiry
/// in `<ns>:workers`.
pub struct RedisJobStore {
    client: redis::Client,
    namespace: String,
}

impl RedisJobStore {
    pub fn new(redis_url: &str, namespace: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            namespace: namespace.to_string(),
        })
    }

    fn job_key(&self, id: Uuid) -> String {
        format!("{}:job:{}", self.namespace, id)
    }

    fn index_key(&self) -> String {
        format!("{}:jobs", self.namespace)
    }

    fn worker_key(&self, name: &str) -> String {
        format!("{}:worker:{}", self.namespace, name)
    }

    fn workers_key(&self) -> String {
        format!("{}:workers", self.namespace)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let data = serde_json::to_string(job)?;

        let inserted: i64 = Script::new(INSERT_SCRIPT)
            .key(self.job_key(job.id))
            .key(self.index_key())
            .arg(job.version)
            .arg(data)
            .arg(job.created_at.timestamp_millis())
            .arg(job.id.to_string())
            .invoke_async(&mut conn)
            .await?;

        if inserted == 0 {
            return Err(StoreError::Duplicate(job.id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let mut conn = self.connection().await?;
        let data: Option<String> = conn.hget(self.job_key(id), "data").await?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn transition(&self, id: Uuid, transition: &Transition) -> Result<Job, StoreError> {
        let mut conn = self.connection().await?;
        let key = self.job_key(id);
        let script = Script::new(CAS_SCRIPT);

        for _ in 0..CAS_RETRIES {
            let data: Option<String> = conn.hget(&key, "data").await?;
            let mut job: Job = match data {
                Some(data) => serde_json::from_str(&data)?,
                None => return Err(StoreError::NotFound(id)),
            };

            let read_version = job.version;
            job.apply(transition)?;

            let swapped: i64 = script
                .key(&key)
                .arg(read_version)
                .arg(job.version)
                .arg(serde_json::to_string(&job)?)
                .invoke_async(&mut conn)
                .await?;

            match swapped {
                1 => return Ok(job),
                -1 => return Err(StoreError::NotFound(id)),
                _ => tracing::debug!(job_id = %id, "Job version moved, retrying transition"),
            }
        }

        Err(StoreError::Conflict(id))
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, StoreError> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn.zrevrange(self.index_key(), 0, -1).await?;

        let mut jobs = Vec::new();
        for chunk in ids.chunks(100) {
            let mut pipe = redis::pipe();
            for id in chunk {
                pipe.hget(format!("{}:job:{}", self.namespace, id), "data");
            }
            let rows: Vec<Option<String>> = pipe.query_async(&mut conn).await?;

            for data in rows.into_iter().flatten() {
                let job: Job = serde_json::from_str(&data)?;
                if status.map_or(true, |s| job.status == s) {
                    jobs.push(job);
                    if jobs.len() >= limit {
                        return Ok(jobs);
                    }
                }
            }
        }
        Ok(jobs)
    }

    async fn publish_workers(
        &self,
        workers: &BTreeMap<String, WorkerSnapshot>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        if workers.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let expires = Utc::now().timestamp_millis() + ttl_ms as i64;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (name, snapshot) in workers {
            pipe.cmd("SET")
                .arg(self.worker_key(name))
                .arg(serde_json::to_string(snapshot)?)
                .arg("PX")
                .arg(ttl_ms)
                .ignore();
            pipe.zadd(self.workers_key(), name, expires).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn worker_snapshots(&self) -> Result<BTreeMap<String, WorkerSnapshot>, StoreError> {
        let mut conn = self.connection().await?;
        let now = Utc::now().timestamp_millis();
        conn.zrembyscore::<_, _, _, ()>(self.workers_key(), "-inf", now).await?;
        let names: Vec<String> = conn.zrange(self.workers_key(), 0, -1).await?;
        if names.is_empty() {
            return Ok(BTreeMap::new());
        }

        let keys: Vec<String> = names.iter().map(|n| self.worker_key(n)).collect();
        let rows: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let mut workers = BTreeMap::new();
        for (name, data) in names.into_iter().zip(rows) {
            let Some(data) = data else { continue };
            match serde_json::from_str::<WorkerSnapshot>(&data) {
                Ok(snapshot) => {
                    workers.insert(name, snapshot);
                }
                Err(e) => tracing::warn!(worker = %name, error = %e, "Ignoring unreadable worker snapshot"),
            }
        }
        Ok(workers)
    }

    async fn health(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("redis ({})", self.namespace)
    }
}
