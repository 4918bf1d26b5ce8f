use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Broker, Delivery, QueueError, TaskEnvelope};

#[derive(Default)]
struct State {
    ready: VecDeque<TaskEnvelope>,
    leased: HashMap<u64, (TaskEnvelope, Instant)>,
    next_receipt: u64,
}

/// Broker for a single process: a FIFO plus a lease table.
pub struct MemoryBroker {
    state: Mutex<State>,
    available: Notify,
    lease: Duration,
}

impl MemoryBroker {
    pub fn new(lease: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: Notify::new(),
            lease,
        }
    }

    /// Deliveries reserved and not yet acked.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.leased.len()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), QueueError> {
        self.state.lock().await.ready.push_back(envelope.clone());
        self.available.notify_one();
        Ok(())
    }

    async fn reserve(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(envelope) = state.ready.pop_front() {
                    let receipt = state.next_receipt;
                    state.next_receipt += 1;
                    state
                        .leased
                        .insert(receipt, (envelope.clone(), Instant::now() + self.lease));
                    // Let another waiter see whatever is left.
                    if !state.ready.is_empty() {
                        self.available.notify_one();
                    }
                    return Ok(Some(Delivery {
                        envelope,
                        receipt: receipt.to_string(),
                    }));
                }
            }

            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let receipt: u64 = delivery
            .receipt
            .parse()
            .map_err(|_| QueueError::UnknownReceipt(delivery.receipt.clone()))?;
        // Acking a reclaimed delivery is a no-op.
        self.state.lock().await.leased.remove(&receipt);
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<usize, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let expired: Vec<u64> = state
            .leased
            .iter()
            .filter(|(_, (_, until))| *until <= now)
            .map(|(receipt, _)| *receipt)
            .collect();

        for receipt in &expired {
            if let Some((envelope, _)) = state.leased.remove(receipt) {
                state.ready.push_back(envelope.redelivered());
            }
        }
        drop(state);

        for _ in &expired {
            self.available.notify_one();
        }
        Ok(expired.len())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.state.lock().await.ready.len() as u64)
    }

    async fn health(&self) -> Result<(), QueueError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::operation::{OperationDescriptor, ReprojectParams};
    use std::sync::Arc;
    use uuid::Uuid;

    fn envelope() -> TaskEnvelope {
        TaskEnvelope::new(
            Uuid::new_v4(),
            OperationDescriptor::Reproject(ReprojectParams {
                raster_path: "a.tif".into(),
                target_crs: "EPSG:4326".into(),
                output_name: None,
            }),
        )
    }

    #[tokio::test]
    async fn test_fifo_and_ack() {
        let broker = MemoryBroker::new(Duration::from_secs(60));
        let (a, b) = (envelope(), envelope());
        broker.publish(&a).await.unwrap();
        broker.publish(&b).await.unwrap();
        assert_eq!(broker.depth().await.unwrap(), 2);

        let first = broker.reserve(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.envelope.job_id, a.job_id);
        assert_eq!(broker.in_flight().await, 1);

        broker.ack(&first).await.unwrap();
        assert_eq!(broker.in_flight().await, 0);
        assert_eq!(broker.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reserve_times_out_when_empty() {
        let broker = MemoryBroker::new(Duration::from_secs(60));
        let got = broker.reserve(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_waiting_reserve_wakes_on_publish() {
        let broker = Arc::new(MemoryBroker::new(Duration::from_secs(60)));
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.reserve(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let e = envelope();
        broker.publish(&e).await.unwrap();

        let delivery = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.envelope.job_id, e.job_id);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let broker = MemoryBroker::new(Duration::from_millis(10));
        let e = envelope();
        broker.publish(&e).await.unwrap();
        let first = broker.reserve(Duration::ZERO).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(broker.reclaim_expired().await.unwrap(), 1);

        let second = broker.reserve(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(second.envelope.job_id, e.job_id);
        assert_eq!(second.envelope.attempt, 2);

        // Late ack from the first owner does not disturb the new lease.
        broker.ack(&first).await.unwrap();
        assert_eq!(broker.in_flight().await, 1);
    }
}
