use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Ignored by the standalone worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string. When unset, jobs and tasks live in process memory.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Key prefix for every Redis key the orchestrator writes
    #[serde(default = "default_redis_namespace")]
    pub redis_namespace: String,

    /// Root directory for rasters when no bucket is configured
    #[serde(default = "default_storage_root")]
    pub storage_root: String,

    /// Prefix (relative to the storage root or bucket) for produced rasters
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,

    /// S3-compatible bucket (R2, MinIO). Takes precedence over `storage_root`.
    #[serde(default)]
    pub s3_bucket: Option<String>,

    #[serde(default)]
    pub s3_endpoint: Option<String>,

    #[serde(default)]
    pub s3_access_key: Option<String>,

    #[serde(default)]
    pub s3_secret_key: Option<String>,

    /// Base URL of the geoprocessing service
    #[serde(default = "default_geo_service_url")]
    pub geo_service_url: String,

    /// Per-request timeout for geoprocessing calls, in seconds
    #[serde(default = "default_geo_timeout_secs")]
    pub geo_timeout_secs: u64,

    /// Number of executors per worker process
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Hard time limit per job, in seconds
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// The soft limit fires this many seconds before the hard limit
    #[serde(default = "default_soft_timeout_margin_secs")]
    pub soft_timeout_margin_secs: u64,

    /// Deliveries of one task before its job is failed outright
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,

    /// How long an idle executor blocks on the queue, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How often running jobs are checked for external cancellation, in milliseconds
    #[serde(default = "default_cancel_check_interval_ms")]
    pub cancel_check_interval_ms: u64,

    /// How often expired task leases are requeued, in milliseconds
    #[serde(default = "default_reclaim_interval_ms")]
    pub reclaim_interval_ms: u64,

    /// How often executor snapshots are published for other processes, in milliseconds
    #[serde(default = "default_worker_heartbeat_interval_ms")]
    pub worker_heartbeat_interval_ms: u64,

    /// Run executors inside the API process
    #[serde(default = "default_embedded_workers")]
    pub embedded_workers: bool,

    /// Name reported in worker status; must differ between worker processes.
    /// Defaults to "worker@$HOSTNAME", or the process id without a hostname
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_redis_namespace() -> String {
    "raster".to_string()
}

fn default_storage_root() -> String {
    "./data".to_string()
}

fn default_output_prefix() -> String {
    "outputs".to_string()
}

fn default_geo_service_url() -> String {
    "http://127.0.0.1:8090".to_string()
}

fn default_geo_timeout_secs() -> u64 {
    600
}

fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_job_timeout_secs() -> u64 {
    7200
}

fn default_soft_timeout_margin_secs() -> u64 {
    60
}

fn default_max_deliveries() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_cancel_check_interval_ms() -> u64 {
    2000
}

fn default_reclaim_interval_ms() -> u64 {
    30_000
}

fn default_worker_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_embedded_workers() -> bool {
    true
}

fn default_worker_name() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| std::process::id().to_string());
    format!("worker@{host}")
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn hard_time_limit(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs.max(1))
    }

    /// Hard limit minus the margin, never below one second.
    pub fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(
            self.job_timeout_secs
                .saturating_sub(self.soft_timeout_margin_secs)
                .max(1),
        )
    }

    /// A lease outlives the hard limit so only vanished executors lose their task.
    pub fn task_lease(&self) -> Duration {
        self.hard_time_limit() + Duration::from_secs(self.soft_timeout_margin_secs.max(30))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn cancel_check_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_check_interval_ms.max(10))
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms.max(10))
    }

    pub fn worker_heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.worker_heartbeat_interval_ms.max(10))
    }

    /// Bucket credentials, if every S3 setting is present.
    pub fn s3_settings(&self) -> Option<(&str, &str, &str, &str)> {
        Some((
            self.s3_bucket.as_deref()?,
            self.s3_endpoint.as_deref()?,
            self.s3_access_key.as_deref()?,
            self.s3_secret_key.as_deref()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_env() {
        let config: AppConfig = envy::from_iter(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8000");
        assert!(config.redis_url.is_none());
        assert_eq!(config.max_concurrent_jobs, 5);
        assert_eq!(config.max_deliveries, 3);
        assert_eq!(config.hard_time_limit(), Duration::from_secs(7200));
        assert_eq!(config.soft_time_limit(), Duration::from_secs(7140));
        assert!(config.task_lease() > config.hard_time_limit());
        assert!(config.s3_settings().is_none());
        assert!(config.worker_name.starts_with("worker@"));
        assert_eq!(config.worker_heartbeat_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let config: AppConfig = envy::from_iter(vec![
            ("REDIS_URL".to_string(), "redis://localhost:6379".to_string()),
            ("JOB_TIMEOUT_SECS".to_string(), "30".to_string()),
            ("SOFT_TIMEOUT_MARGIN_SECS".to_string(), "60".to_string()),
            ("EMBEDDED_WORKERS".to_string(), "false".to_string()),
        ])
        .unwrap();
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert!(!config.embedded_workers);
        // margin larger than the limit still leaves a usable soft limit
        assert_eq!(config.soft_time_limit(), Duration::from_secs(1));
    }
}
