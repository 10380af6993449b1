use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Default read deadline per attempt.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(20);
/// Default write deadline per attempt.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);
/// Default per-read allocation: 128 KiB.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 128 * 1024;
/// Default socket write buffer hint: 128 KiB.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 128 * 1024;
/// Default consecutive read-failure threshold.
pub const DEFAULT_CLOSE_AFTER_FAILURES: u64 = 3;

/// Per-channel transport settings shared by every adapter.
#[derive(Debug, Clone, Serialize)]
pub struct TransportConfig {
    /// Read deadline applied to each read attempt.
    pub read_timeout: Duration,
    /// Write deadline applied to each write attempt.
    pub write_timeout: Duration,
    /// Maximum bytes returned by one read.
    pub read_buffer_size: usize,
    /// Socket send buffer hint.
    pub write_buffer_size: usize,
    /// Consecutive read failures tolerated before the channel is closed.
    pub close_after_failures: u64,
}

impl TransportConfig {
    /// Absolute deadline for a read starting now.
    pub fn read_deadline(&self) -> Instant {
        Instant::now() + self.read_timeout
    }

    /// Absolute deadline for a write starting now.
    pub fn write_deadline(&self) -> Instant {
        Instant::now() + self.write_timeout
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            close_after_failures: DEFAULT_CLOSE_AFTER_FAILURES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = TransportConfig::default();
        assert_eq!(config.read_timeout, Duration::from_secs(20));
        assert_eq!(config.write_timeout, Duration::from_secs(15));
        assert_eq!(config.read_buffer_size, 131_072);
        assert_eq!(config.write_buffer_size, 131_072);
        assert_eq!(config.close_after_failures, 3);
    }

    #[tokio::test]
    async fn deadlines_are_computed_per_call() {
        let config = TransportConfig {
            read_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_millis(50),
            ..TransportConfig::default()
        };
        let before = Instant::now();
        let read = config.read_deadline();
        let write = config.write_deadline();
        assert!(read >= before + Duration::from_millis(100));
        assert!(write >= before + Duration::from_millis(50));
        assert!(write < read);
    }
}
