use serde::Deserialize;

use crate::error::UploadError;
use crate::retry::RetryConfig;

/// Minimum part size for S3 multipart uploads (5 MiB). Every part but the
/// last must be at least this large.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default number of part uploads allowed in flight.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Tuning knobs for an [`crate::UploadStream`].
///
/// Deserializable so that binaries can read it from the environment; the
/// retry policy is not exposed there and always starts from its default.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Size of every part except the last one.
    pub part_size: usize,
    /// Maximum number of part uploads in flight.
    pub max_concurrency: usize,
    /// `write` asks the producer to pause once this many bytes are buffered
    /// without having been handed to the store.
    pub high_water_mark: usize,
    #[serde(skip)]
    pub retry: RetryConfig,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            part_size: MIN_PART_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            high_water_mark: MIN_PART_SIZE,
            retry: RetryConfig::default(),
        }
    }
}

impl UploadConfig {
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size;
        self.high_water_mark = self.high_water_mark.max(part_size);
        self
    }

    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), UploadError> {
        let reason = if self.part_size == 0 {
            "part_size must be positive".to_string()
        } else if self.max_concurrency == 0 {
            "max_concurrency must be at least 1".to_string()
        } else if self.high_water_mark < self.part_size {
            // pending bytes never reach a full part, so a lower mark could never drain
            format!(
                "high_water_mark ({}) must not be below part_size ({})",
                self.high_water_mark, self.part_size
            )
        } else {
            return Ok(());
        };
        Err(UploadError::Config { reason })
    }
}
