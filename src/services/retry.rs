use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Error codes treated as transient network failures.
const TRANSIENT_CODES: [&str; 6] = [
    "ECONNRESET",
    "ETIMEDOUT",
    "ENOTFOUND",
    "ECONNREFUSED",
    "EAI_AGAIN",
    "EPIPE",
];

const TRANSIENT_IO_KINDS: [io::ErrorKind; 5] = [
    io::ErrorKind::ConnectionReset,
    io::ErrorKind::ConnectionAborted,
    io::ErrorKind::ConnectionRefused,
    io::ErrorKind::TimedOut,
    io::ErrorKind::BrokenPipe,
];

const TRANSIENT_CLASSES: [&str; 2] = ["NetworkError", "TimeoutError"];

/// What an error exposes to the retry engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryHint {
    pub code: Option<String>,
    pub io_kind: Option<io::ErrorKind>,
    pub class_name: Option<String>,
    pub status: Option<u16>,
    /// Explicit verdict from the provider, if it gave one
    pub retryable: Option<bool>,
    pub server_fault: bool,
}

pub trait Retryable {
    fn retry_hint(&self) -> RetryHint;
}

impl Retryable for io::Error {
    fn retry_hint(&self) -> RetryHint {
        RetryHint {
            io_kind: Some(self.kind()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    /// Default classification of an error hint.
    pub fn is_transient(&self, hint: &RetryHint) -> bool {
        if let Some(retryable) = hint.retryable
            && retryable
        {
            return true;
        }
        if hint.server_fault {
            return true;
        }
        if let Some(code) = hint.code.as_deref()
            && TRANSIENT_CODES.contains(&code)
        {
            return true;
        }
        if let Some(kind) = hint.io_kind
            && TRANSIENT_IO_KINDS.contains(&kind)
        {
            return true;
        }
        if let Some(class) = hint.class_name.as_deref()
            && TRANSIENT_CLASSES.contains(&class)
        {
            return true;
        }
        hint.status
            .is_some_and(|status| self.retryable_status_codes.contains(&status))
    }
}

/// Predicate consulted before the default classification. `Some(verdict)`
/// overrides it, `None` defers to it.
pub type RetryPredicate<E> = Arc<dyn Fn(&E, u32) -> Option<bool> + Send + Sync>;

/// Per-attempt delay override.
pub type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

pub struct RetryPolicy<E> {
    config: RetryConfig,
    predicate: Option<RetryPredicate<E>>,
    delay_fn: Option<DelayFn>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            predicate: self.predicate.clone(),
            delay_fn: self.delay_fn.clone(),
        }
    }
}

impl<E> RetryPolicy<E>
where
    E: Retryable + std::fmt::Display,
{
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            predicate: None,
            delay_fn: None,
        }
    }

    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&E, u32) -> Option<bool> + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_delay(mut self, delay: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        self.delay_fn = Some(Arc::new(delay));
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// `min(initial * multiplier^attempt, max)`, unless overridden.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if let Some(delay_fn) = &self.delay_fn {
            return delay_fn(attempt);
        }
        let factor = self.config.multiplier.powi(attempt as i32);
        let millis = self.config.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.config.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    pub fn should_retry(&self, err: &E, attempt: u32) -> bool {
        if attempt >= self.config.max_retries {
            return false;
        }
        if let Some(predicate) = &self.predicate
            && let Some(verdict) = predicate(err, attempt)
        {
            return verdict;
        }
        self.config.is_transient(&err.retry_hint())
    }

    /// Runs `op` until it succeeds, fails permanently, or retries run out.
    /// The closure receives the zero-based attempt number. On exhaustion the
    /// last error is returned as is.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !self.should_retry(&err, attempt) {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after transient error: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
