//! Task broker: at-least-once delivery of job envelopes to executors.
//!
//! A reserved delivery is held under a lease until it is acked. Leases that
//! expire (the executor died or hung past every time limit) are put back on
//! the queue with the attempt counter bumped.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::models::operation::OperationDescriptor;

pub use self::memory::MemoryBroker;
pub use self::redis::RedisBroker;

/// Message carried by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub job_id: Uuid,
    pub descriptor: OperationDescriptor,
    /// 1 on first delivery.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(job_id: Uuid, descriptor: OperationDescriptor) -> Self {
        Self {
            job_id,
            descriptor,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    /// Copy for the next delivery attempt.
    pub fn redelivered(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// A reserved envelope. Must be acked once the job's outcome is recorded.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: TaskEnvelope,
    pub(crate) receipt: String,
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), QueueError>;

    /// Wait up to `wait` for an envelope and lease it to the caller.
    async fn reserve(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Requeue every delivery whose lease has run out. Returns how many moved.
    async fn reclaim_expired(&self) -> Result<usize, QueueError>;

    /// Envelopes waiting to be reserved.
    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health(&self) -> Result<(), QueueError>;

    fn describe(&self) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unknown delivery receipt {0}")]
    UnknownReceipt(String),
}
