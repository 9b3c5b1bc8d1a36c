//! Seams to external capabilities: document extraction and alert delivery.

use async_trait::async_trait;
use greenledger_core::{Alert, ExtractedField};
use thiserror::Error;
use tracing::{info, warn};

/// Why an extraction attempt failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    /// The document format is not handled by this adapter.
    #[error("unsupported document type: {0}")]
    Unsupported(String),
    /// Timeout, throttling, or a dropped connection; worth retrying.
    #[error("transient extraction failure: {0}")]
    Transient(String),
    /// The document or the adapter's response could not be understood.
    #[error("malformed document: {0}")]
    Malformed(String),
}

impl ExtractionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Turns raw document bytes into structured fields.
///
/// Identity (`DataPointId`) is assigned by the pipeline, not the adapter.
#[async_trait]
pub trait ExtractionAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, bytes: &[u8], mime_type: &str)
    -> Result<Vec<ExtractedField>, ExtractionError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Delivery may succeed if retried.
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// The sink refused the alert; retrying will not help.
    #[error("alert rejected by sink: {0}")]
    Rejected(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Delivers alerts to people or systems.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, alert: &Alert) -> Result<(), DeliveryError>;
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), DeliveryError> {
        let gap = &alert.gap;
        match alert.severity {
            greenledger_core::Severity::Critical => warn!(
                alert = %alert.id,
                requirement = %gap.requirement_id,
                code = %gap.code,
                period = %gap.reporting_period,
                reason = %gap.reason,
                days_until_expiry = gap.days_until_expiry,
                "critical compliance alert"
            ),
            severity => info!(
                alert = %alert.id,
                severity = %severity,
                requirement = %gap.requirement_id,
                code = %gap.code,
                period = %gap.reporting_period,
                reason = %gap.reason,
                days_until_expiry = gap.days_until_expiry,
                "compliance alert"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scriptable adapters with call counters.

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    /// Replays scripted extraction results, then repeats the last one.
    pub struct MockExtractor {
        script: Mutex<VecDeque<Result<Vec<ExtractedField>, ExtractionError>>>,
        last: Mutex<Option<Result<Vec<ExtractedField>, ExtractionError>>>,
        delay: Duration,
        calls: AtomicU32,
    }

    impl MockExtractor {
        pub fn new() -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                last: Mutex::new(None),
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            }
        }

        pub fn returning(fields: Vec<ExtractedField>) -> Self {
            Self::new().then(Ok(fields))
        }

        pub fn then(self, result: Result<Vec<ExtractedField>, ExtractionError>) -> Self {
            self.script.lock().unwrap().push_back(result);
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExtractionAdapter for MockExtractor {
        fn name(&self) -> &str {
            "mock"
        }

        async fn extract(
            &self,
            _bytes: &[u8],
            _mime_type: &str,
        ) -> Result<Vec<ExtractedField>, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            match next {
                Some(result) => {
                    *last = Some(result.clone());
                    result
                }
                None => last
                    .clone()
                    .unwrap_or_else(|| Err(ExtractionError::Malformed("no script".into()))),
            }
        }
    }

    /// Records delivered alerts; fails the first `failures` calls.
    pub struct MockSink {
        failures: Mutex<VecDeque<DeliveryError>>,
        delivered: Mutex<Vec<Alert>>,
        calls: AtomicU32,
    }

    impl MockSink {
        pub fn new() -> Self {
            Self {
                failures: Mutex::new(VecDeque::new()),
                delivered: Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
            }
        }

        pub fn failing_with(self, error: DeliveryError) -> Self {
            self.failures.lock().unwrap().push_back(error);
            self
        }

        pub fn delivered(&self) -> Vec<Alert> {
            self.delivered.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotificationSink for MockSink {
        fn name(&self) -> &str {
            "mock"
        }

        async fn deliver(&self, alert: &Alert) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.failures.lock().unwrap().pop_front() {
                return Err(error);
            }
            self.delivered.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }
}
