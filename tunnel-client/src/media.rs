//! Local media pipeline.
//!
//! The pipeline produces the media sent through the tunnel and records one
//! [`StatRecord`] per second while it runs. The orchestrator reads the
//! records only after the pipeline has been stopped.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tunnel_types::StatRecord;

/// Shortest sampling period; shorter requests are raised to it.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// Media pipeline errors.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The pipeline is already running.
    #[error("media pipeline already running")]
    AlreadyRunning,

    /// The remote description was rejected.
    #[error("invalid remote description: {0}")]
    InvalidAnswer(String),
}

/// Media pipeline collaborator.
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    /// Start producing media. Returns the local offer, if the pipeline
    /// negotiates through the relay.
    async fn begin(&mut self) -> Result<Option<String>, MediaError>;

    /// Apply the relay's answer to the local offer.
    async fn accept_answer(&mut self, answer: &str) -> Result<(), MediaError>;

    /// Stop producing media.
    async fn end(&mut self) -> Result<(), MediaError>;

    /// Link bitrate target in effect, recorded with each sample.
    fn set_link_bitrate(&mut self, kbps: u32);

    /// Take the samples recorded since the last call.
    fn take_stats(&mut self) -> Vec<StatRecord>;
}

/// Pipeline without decoding: samples carry the link target and zeroed
/// decoder counters.
#[derive(Debug)]
pub struct HeadlessMedia {
    interval: Duration,
    link: Arc<AtomicU32>,
    stats: Arc<Mutex<Vec<StatRecord>>>,
    sampler: Option<JoinHandle<()>>,
}

impl HeadlessMedia {
    /// Sample once per second.
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(1))
    }

    /// Sample at a custom interval, at least [`MIN_SAMPLE_INTERVAL`].
    pub fn with_interval(interval: Duration) -> Self {
        if interval < MIN_SAMPLE_INTERVAL {
            tracing::warn!(?interval, min = ?MIN_SAMPLE_INTERVAL, "sample interval too short, clamping");
        }
        Self {
            interval: interval.max(MIN_SAMPLE_INTERVAL),
            link: Arc::new(AtomicU32::new(0)),
            stats: Arc::new(Mutex::new(Vec::new())),
            sampler: None,
        }
    }

    fn lock_stats(&self) -> MutexGuard<'_, Vec<StatRecord>> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the sampler is running.
    pub fn is_running(&self) -> bool {
        self.sampler.is_some()
    }
}

impl Default for HeadlessMedia {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaPipeline for HeadlessMedia {
    async fn begin(&mut self) -> Result<Option<String>, MediaError> {
        if self.sampler.is_some() {
            return Err(MediaError::AlreadyRunning);
        }
        self.lock_stats().clear();

        let link = Arc::clone(&self.link);
        let stats = Arc::clone(&self.stats);
        let period = self.interval;
        self.sampler = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately; samples start one period in.
            ticker.tick().await;
            let mut index = 0u32;
            loop {
                ticker.tick().await;
                let record = StatRecord {
                    sample_index: index,
                    link_bitrate: link.load(Ordering::Relaxed),
                    ..StatRecord::default()
                };
                stats
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(record);
                index += 1;
            }
        }));

        tracing::debug!("headless media started");
        Ok(None)
    }

    async fn accept_answer(&mut self, answer: &str) -> Result<(), MediaError> {
        if answer.trim().is_empty() {
            return Err(MediaError::InvalidAnswer("empty answer".into()));
        }
        Ok(())
    }

    async fn end(&mut self) -> Result<(), MediaError> {
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
            tracing::debug!(samples = self.lock_stats().len(), "headless media stopped");
        }
        Ok(())
    }

    fn set_link_bitrate(&mut self, kbps: u32) {
        self.link.store(kbps, Ordering::Relaxed);
    }

    fn take_stats(&mut self) -> Vec<StatRecord> {
        std::mem::take(&mut *self.lock_stats())
    }
}

impl Drop for HeadlessMedia {
    fn drop(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }
    }
}
