// SPDX-License-Identifier: Apache-2.0

//! Configuration for a single file tailer.

use std::time::Duration;

/// Default time a tailer waits for its output to drain when stopping, and the
/// time a rotated tailer keeps reading the old file.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time a rotated tailer's output may keep draining once reading
/// stopped at the close timeout.
pub const DEFAULT_ROTATION_DRAIN_GRACE: Duration = Duration::from_millis(100);

pub const DEFAULT_SLEEP_DURATION: Duration = Duration::from_millis(10);

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 256 * 1024;

pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// What happens to bytes the decoder holds without a line terminator when a
/// rotated tailer winds down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RotationTailPolicy {
    /// Emit the unterminated tail as a final message.
    #[default]
    Flush,
    /// Drop it; the successor tailer starts from the new file anyway.
    Discard,
}

/// Configuration read once when a tailer is constructed.
#[derive(Debug, Clone)]
pub struct TailerConfig {
    /// Pause between reads when the file has no new bytes
    pub sleep_duration: Duration,
    /// Upper bound on how long stopping may wait for a stalled output
    pub close_timeout: Duration,
    /// Maximum decoded message size in bytes, longer lines are split and tagged
    pub max_message_size: usize,
    /// Tag messages that were split because of `max_message_size`
    pub tag_truncated_logs: bool,
    /// Bytes requested from the file per read
    pub read_buffer_size: usize,
    /// Capacity of the queue between the decoder and the forwarding task
    pub decoded_queue_size: usize,
    /// Handling of partially decoded content after rotation
    pub rotation_tail_policy: RotationTailPolicy,
    /// Extra delivery time for a rotated tailer after `close_timeout`.
    /// Messages still undelivered when it elapses are dropped.
    pub rotation_drain_grace: Duration,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            sleep_duration: DEFAULT_SLEEP_DURATION,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            tag_truncated_logs: false,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            decoded_queue_size: 100,
            rotation_tail_policy: RotationTailPolicy::Flush,
            rotation_drain_grace: DEFAULT_ROTATION_DRAIN_GRACE,
        }
    }
}

impl TailerConfig {
    /// Apply the `close_timeout` setting, expressed in whole seconds. A missing
    /// value keeps the current timeout.
    pub fn with_close_timeout_override(mut self, seconds: Option<u64>) -> Self {
        if let Some(seconds) = seconds {
            self.close_timeout = Duration::from_secs(seconds);
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sleep_duration.is_zero() {
            return Err("sleep_duration must be positive".to_string());
        }

        if self.max_message_size == 0 {
            return Err("max_message_size must be positive".to_string());
        }

        if self.read_buffer_size == 0 {
            return Err("read_buffer_size must be positive".to_string());
        }

        if self.decoded_queue_size == 0 {
            return Err("decoded_queue_size must be at least 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TailerConfig::default();
        assert_eq!(config.close_timeout, DEFAULT_CLOSE_TIMEOUT);
        assert_eq!(config.sleep_duration, Duration::from_millis(10));
        assert_eq!(config.rotation_tail_policy, RotationTailPolicy::Flush);
        assert_eq!(config.rotation_drain_grace, Duration::from_millis(100));
        assert!(!config.tag_truncated_logs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_close_timeout_override() {
        let config = TailerConfig::default().with_close_timeout_override(Some(42));
        assert_eq!(config.close_timeout, Duration::from_secs(42));

        let config = TailerConfig::default().with_close_timeout_override(None);
        assert_eq!(config.close_timeout, DEFAULT_CLOSE_TIMEOUT);
    }

    #[test]
    fn test_config_validation() {
        let mut config = TailerConfig::default();
        config.max_message_size = 0;
        assert!(config.validate().is_err());

        let mut config = TailerConfig::default();
        config.sleep_duration = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
