use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use super::{JobStore, StoreError};
use crate::models::job::{Job, JobStatus, Transition};
use crate::models::worker::WorkerSnapshot;

/// In-process store. Each record sits behind its own mutex, so transitions on
/// one job never wait on another.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Arc<Mutex<Job>>>>,
    /// Worker snapshots with their expiry.
    workers: RwLock<HashMap<String, (Instant, WorkerSnapshot)>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, id: Uuid) -> Option<Arc<Mutex<Job>>> {
        self.jobs.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.insert(job.id, Arc::new(Mutex::new(job.clone())));
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        match self.record(id).await {
            Some(record) => Ok(Some(record.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn transition(&self, id: Uuid, transition: &Transition) -> Result<Job, StoreError> {
        let record = self.record(id).await.ok_or(StoreError::NotFound(id))?;
        let mut job = record.lock().await;

        // Apply to a copy so a rejected transition leaves the record as it was.
        let mut next = job.clone();
        next.apply(transition)?;
        *job = next.clone();
        Ok(next)
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, StoreError> {
        let records: Vec<_> = self.jobs.read().await.values().cloned().collect();

        let mut jobs = Vec::with_capacity(records.len());
        for record in records {
            let job = record.lock().await.clone();
            if status.map_or(true, |s| job.status == s) {
                jobs.push(job);
            }
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn publish_workers(
        &self,
        workers: &BTreeMap<String, WorkerSnapshot>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires = Instant::now() + ttl;
        let mut published = self.workers.write().await;
        for (name, snapshot) in workers {
            published.insert(name.clone(), (expires, snapshot.clone()));
        }
        Ok(())
    }

    async fn worker_snapshots(&self) -> Result<BTreeMap<String, WorkerSnapshot>, StoreError> {
        let now = Instant::now();
        let mut published = self.workers.write().await;
        published.retain(|_, (expires, _)| *expires > now);
        Ok(published
            .iter()
            .map(|(name, (_, snapshot))| (name.clone(), snapshot.clone()))
            .collect())
    }

    async fn health(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
