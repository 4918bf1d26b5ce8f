use raster_orchestrator::{
    models::job::{Job, JobStatus, Transition},
    models::operation::{OperationDescriptor, ReprojectParams},
    services::{
        queue::{Broker, RedisBroker, TaskEnvelope},
        store::{JobStore, RedisJobStore, StoreError},
    },
};
use std::time::Duration;
use uuid::Uuid;

/// Redis-backed job store and broker against a live server.
///
/// Each test uses its own key namespace so runs do not interfere.
///
/// Note: This requires a running Redis instance reachable at REDIS_URL
/// (default redis://127.0.0.1:6379).
fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn namespace() -> String {
    format!("raster-test-{}", Uuid::new_v4())
}

fn descriptor(target_crs: &str) -> OperationDescriptor {
    OperationDescriptor::Reproject(ReprojectParams {
        raster_path: "ortho.tif".to_string(),
        target_crs: target_crs.to_string(),
        output_name: None,
    })
}

#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_redis_store_lifecycle() {
    let store = RedisJobStore::new(&redis_url(), &namespace()).expect("Failed to create store");
    store.health().await.expect("Redis not reachable");

    // 1. Insert and read back
    let job = Job::new(descriptor("EPSG:4326"));
    store.insert(&job).await.expect("Failed to insert job");
    let fetched = store
        .get(job.id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");
    assert_eq!(fetched, job);

    // 2. Duplicate ids are refused
    assert!(matches!(store.insert(&job).await, Err(StoreError::Duplicate(_))));

    // 3. Transitions follow the lifecycle and bump the version
    let running = store
        .transition(
            job.id,
            &Transition::Start {
                attempt: 1,
                message: "Starting reproject operation...".to_string(),
            },
        )
        .await
        .expect("Failed to start job");
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(running.version, 1);

    let progressed = store
        .transition(
            job.id,
            &Transition::Progress {
                progress: 30,
                message: "Reprojecting raster...".to_string(),
            },
        )
        .await
        .expect("Failed to report progress");
    assert_eq!(progressed.progress, 30);

    let done = store
        .transition(
            job.id,
            &Transition::Succeed {
                result_path: "outputs/ortho_reprojected_EPSG_4326.tif".to_string(),
                message: "Reprojection completed successfully".to_string(),
            },
        )
        .await
        .expect("Failed to complete job");
    assert_eq!(done.status, JobStatus::Success);
    assert_eq!(done.progress, 100);

    // 4. Terminal jobs reject further transitions
    let rejected = store.transition(job.id, &Transition::Cancel).await;
    assert!(matches!(rejected, Err(StoreError::Invalid(_))));

    // 5. Unknown ids
    assert!(store.get(Uuid::new_v4()).await.expect("get failed").is_none());
    assert!(matches!(
        store.transition(Uuid::new_v4(), &Transition::Cancel).await,
        Err(StoreError::NotFound(_))
    ));

    println!("✅ Redis store lifecycle passed");
}

#[tokio::test]
#[ignore]
async fn test_redis_store_single_terminal_winner() {
    let store = RedisJobStore::new(&redis_url(), &namespace()).expect("Failed to create store");
    let job = Job::new(descriptor("EPSG:3857"));
    store.insert(&job).await.expect("Failed to insert job");
    store
        .transition(job.id, &Transition::Start { attempt: 1, message: "Starting".to_string() })
        .await
        .expect("Failed to start job");

    let succeed = Transition::Succeed {
        result_path: "out.tif".to_string(),
        message: "done".to_string(),
    };
    let (a, b) = tokio::join!(
        store.transition(job.id, &succeed),
        store.transition(job.id, &Transition::Cancel),
    );

    // Exactly one terminal write lands.
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    let stored = store.get(job.id).await.expect("get failed").expect("Job not found");
    assert!(stored.status.is_terminal());
    assert_eq!(stored.version, 2);
}

#[tokio::test]
#[ignore]
async fn test_redis_store_listing() {
    let store = RedisJobStore::new(&redis_url(), &namespace()).expect("Failed to create store");

    let mut ids = Vec::new();
    for crs in ["EPSG:4326", "EPSG:3857", "EPSG:32723"] {
        let job = Job::new(descriptor(crs));
        store.insert(&job).await.expect("Failed to insert job");
        ids.push(job.id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    store
        .transition(ids[1], &Transition::Cancel)
        .await
        .expect("Failed to cancel job");

    let all = store.list(None, 10).await.expect("list failed");
    assert_eq!(all.iter().map(|j| j.id).collect::<Vec<_>>(), vec![ids[2], ids[1], ids[0]]);

    let pending = store.list(Some(JobStatus::Pending), 10).await.expect("list failed");
    assert_eq!(pending.len(), 2);
    assert_eq!(store.list(None, 1).await.expect("list failed").len(), 1);
}

#[tokio::test]
#[ignore]
async fn test_redis_broker_lease_and_ack() {
    let broker = RedisBroker::new(&redis_url(), &namespace(), Duration::from_secs(60))
        .expect("Failed to create broker");
    broker.health().await.expect("Redis not reachable");

    let envelope = TaskEnvelope::new(Uuid::new_v4(), descriptor("EPSG:4326"));
    broker.publish(&envelope).await.expect("Failed to publish");
    assert_eq!(broker.depth().await.expect("depth failed"), 1);

    let delivery = broker
        .reserve(Duration::from_secs(1))
        .await
        .expect("Failed to reserve")
        .expect("No task in queue");
    assert_eq!(delivery.envelope.job_id, envelope.job_id);
    assert_eq!(delivery.envelope.attempt, 1);
    assert_eq!(broker.depth().await.expect("depth failed"), 0);

    // A leased task is invisible to other consumers.
    assert!(broker
        .reserve(Duration::ZERO)
        .await
        .expect("Failed to reserve")
        .is_none());

    broker.ack(&delivery).await.expect("Failed to ack");
    assert_eq!(broker.reclaim_expired().await.expect("reclaim failed"), 0);

    println!("✅ Redis broker lease/ack passed");
}

#[tokio::test]
#[ignore]
async fn test_redis_broker_redelivers_expired_lease() {
    let broker = RedisBroker::new(&redis_url(), &namespace(), Duration::from_millis(500))
        .expect("Failed to create broker");

    let envelope = TaskEnvelope::new(Uuid::new_v4(), descriptor("EPSG:4326"));
    broker.publish(&envelope).await.expect("Failed to publish");
    let first = broker
        .reserve(Duration::ZERO)
        .await
        .expect("Failed to reserve")
        .expect("No task in queue");

    // Owner disappears without acking.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(broker.reclaim_expired().await.expect("reclaim failed"), 1);

    let second = broker
        .reserve(Duration::ZERO)
        .await
        .expect("Failed to reserve")
        .expect("Task was not redelivered");
    assert_eq!(second.envelope.job_id, envelope.job_id);
    assert_eq!(second.envelope.attempt, 2);

    // The stale receipt no longer refers to a leased task.
    broker.ack(&first).await.expect("Stale ack should be harmless");
    broker.ack(&second).await.expect("Failed to ack");
    assert_eq!(broker.depth().await.expect("depth failed"), 0);
}

#[tokio::test]
#[ignore]
async fn test_redis_broker_recovers_unleased_processing_entry() {
    let ns = namespace();
    let broker = RedisBroker::new(&redis_url(), &ns, Duration::from_millis(500))
        .expect("Failed to create broker");

    // An executor died after BRPOPLPUSH but before recording its lease.
    let envelope = TaskEnvelope::new(Uuid::new_v4(), descriptor("EPSG:4326"));
    let payload = serde_json::to_string(&envelope).expect("Failed to encode envelope");
    let client = redis::Client::open(redis_url()).expect("Failed to open client");
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .expect("Redis not reachable");
    redis::cmd("LPUSH")
        .arg(format!("{ns}:processing"))
        .arg(&payload)
        .query_async::<()>(&mut conn)
        .await
        .expect("Failed to seed processing list");

    // First pass gives the orphan a lease; it is not yet due.
    assert_eq!(broker.reclaim_expired().await.expect("reclaim failed"), 0);
    assert!(broker
        .reserve(Duration::ZERO)
        .await
        .expect("Failed to reserve")
        .is_none());

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(broker.reclaim_expired().await.expect("reclaim failed"), 1);

    let delivery = broker
        .reserve(Duration::ZERO)
        .await
        .expect("Failed to reserve")
        .expect("Orphaned task was not redelivered");
    assert_eq!(delivery.envelope.job_id, envelope.job_id);
    assert_eq!(delivery.envelope.attempt, 2);
    broker.ack(&delivery).await.expect("Failed to ack");

    println!("✅ Unleased processing entry recovered");
}
