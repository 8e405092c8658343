use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use snapvault_core::storage::{Backend, BackendType, ObjectInfo};
use snapvault_core::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each backoff
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Fewer, shorter retries for interactive commands
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// More retries for long-running transfers such as sync
    pub fn persistent() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(60),
            ..Default::default()
        }
    }

    fn backoff_duration(&self, attempt: u32) -> Duration {
        let base_duration = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);

        let duration_ms = base_duration.min(self.max_backoff.as_millis() as f64) as u64;
        let mut duration = Duration::from_millis(duration_ms);

        if self.jitter {
            let jitter_ms = rand::thread_rng().gen_range(0..=(duration_ms / 4));
            duration += Duration::from_millis(jitter_ms);
        }

        duration
    }
}

/// Trait to determine if an error is retryable
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Backend(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("timeout")
                    || msg.contains("timed out")
                    || msg.contains("rate limit")
                    || msg.contains("throttle")
                    || msg.contains("temporarily unavailable")
                    || msg.contains("try again")
                    || msg.contains("503")
                    || msg.contains("429")
            }
            // Authentication, validation and integrity failures are final.
            _ => false,
        }
    }
}

/// Retry a future operation with exponential backoff
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(error) if !error.is_retryable() => {
                debug!(
                    operation = operation_name,
                    error = %error,
                    "Error is not retryable, failing immediately"
                );
                return Err(error);
            }
            Err(error) if attempt + 1 >= config.max_attempts => {
                warn!(
                    operation = operation_name,
                    max_attempts = config.max_attempts,
                    error = %error,
                    "Operation failed after all retry attempts"
                );
                return Err(error);
            }
            Err(error) => {
                let backoff = config.backoff_duration(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = config.max_attempts,
                    backoff_ms = backoff.as_millis(),
                    error = %error,
                    "Operation failed, retrying after backoff"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// Wraps a backend and retries its transient failures.
pub struct RetryBackend<B> {
    inner: B,
    config: RetryConfig,
}

impl<B: Backend> RetryBackend<B> {
    pub fn new(inner: B, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: Backend> Backend for RetryBackend<B> {
    async fn init(&self) -> Result<()> {
        retry_with_backoff(&self.config, "init", || self.inner.init()).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        retry_with_backoff(&self.config, "exists", || self.inner.exists(path)).await
    }

    async fn read(&self, path: &str) -> Result<Bytes> {
        retry_with_backoff(&self.config, "read", || self.inner.read(path)).await
    }

    async fn read_range(&self, path: &str, offset: u64, length: u32) -> Result<Bytes> {
        retry_with_backoff(&self.config, "read_range", || {
            self.inner.read_range(path, offset, length)
        })
        .await
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        retry_with_backoff(&self.config, "write", || self.inner.write(path, data.clone())).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        retry_with_backoff(&self.config, "delete", || self.inner.delete(path)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        retry_with_backoff(&self.config, "list", || self.inner.list(prefix)).await
    }

    async fn stat(&self, path: &str) -> Result<ObjectInfo> {
        retry_with_backoff(&self.config, "stat", || self.inner.stat(path)).await
    }

    fn backend_type(&self) -> BackendType {
        self.inner.backend_type()
    }

    fn location(&self) -> String {
        self.inner.location()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapvault_core::storage::MemoryBackend;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Fails the first `failures` reads with a transient error.
    struct FlakyBackend {
        inner: MemoryBackend,
        failures: AtomicU32,
    }

    #[async_trait]
    impl Backend for FlakyBackend {
        async fn init(&self) -> Result<()> {
            self.inner.init().await
        }
        async fn exists(&self, path: &str) -> Result<bool> {
            self.inner.exists(path).await
        }
        async fn read(&self, path: &str) -> Result<Bytes> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Backend("503 temporarily unavailable".to_string()));
            }
            self.inner.read(path).await
        }
        async fn write(&self, path: &str, data: Bytes) -> Result<()> {
            self.inner.write(path, data).await
        }
        async fn delete(&self, path: &str) -> Result<()> {
            self.inner.delete(path).await
        }
        async fn list(&self, prefix: &str) -> Result<Vec<String>> {
            self.inner.list(prefix).await
        }
        async fn stat(&self, path: &str) -> Result<ObjectInfo> {
            self.inner.stat(path).await
        }
        fn backend_type(&self) -> BackendType {
            self.inner.backend_type()
        }
        fn location(&self) -> String {
            self.inner.location()
        }
    }

    fn flaky(failures: u32) -> RetryBackend<FlakyBackend> {
        RetryBackend::new(
            FlakyBackend {
                inner: MemoryBackend::new("flaky"),
                failures: AtomicU32::new(failures),
            },
            fast(),
        )
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_backoff(&fast(), "test_operation", || {
            let attempts = attempts_clone.clone();
            async move {
                let count = attempts.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(Error::Io(std::io::Error::other("Temporary failure")))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_backoff(&fast(), "test_operation", || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(Error::InvalidPassword)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backend_retries_transient_reads() {
        let backend = flaky(2);
        backend.write("CONFIG", Bytes::from_static(b"cfg")).await.unwrap();
        assert_eq!(&backend.read("CONFIG").await.unwrap()[..], b"cfg");
        assert_eq!(backend.inner().inner.read_count(), 1);
        assert_eq!(backend.location(), "memory://flaky");
    }

    #[tokio::test]
    async fn test_backend_gives_up_after_max_attempts() {
        let backend = flaky(10);
        backend.write("CONFIG", Bytes::from_static(b"cfg")).await.unwrap();
        assert!(matches!(
            backend.read("CONFIG").await,
            Err(Error::Backend(_))
        ));
        assert_eq!(backend.inner().failures.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_backoff_duration_calculation() {
        let config = RetryConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
            ..Default::default()
        };

        assert_eq!(config.backoff_duration(0), Duration::from_millis(100));
        assert_eq!(config.backoff_duration(1), Duration::from_millis(200));
        assert_eq!(config.backoff_duration(2), Duration::from_millis(400));
        assert_eq!(config.backoff_duration(10), Duration::from_secs(10));
    }

    #[test]
    fn test_classification() {
        assert!(Error::Backend("request timed out".to_string()).is_retryable());
        assert!(!Error::Backend("Failed to read x: not found".to_string()).is_retryable());
        assert!(!Error::ConsistencyFault {
            mac: "a".to_string(),
            packfile: "b".to_string()
        }
        .is_retryable());
    }
}
