//! Server configuration.

use std::time::Duration;

use micro_bufio::MIN_BUF_SIZE;

/// Buffer sizes and request head limits, shared by every connection of a
/// server.
///
/// # Default Values
/// - `read_buffer_size`: 8 KiB
/// - `write_buffer_size`: 4 KiB
/// - `max_header_bytes`: 8 KiB
/// - `max_headers`: 64
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Capacity of each connection's read buffer.
    pub read_buffer_size: usize,
    /// Capacity of each connection's write buffer.
    pub write_buffer_size: usize,
    /// Largest request head accepted. The read buffer caps it as well,
    /// since a head has to fit in the buffer to be parsed.
    pub max_header_bytes: usize,
    /// Most header fields accepted in one request.
    pub max_headers: usize,
    /// Retry timing after failed accepts.
    pub accept_backoff: BackoffConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 8 * 1024,
            write_buffer_size: 4 * 1024,
            max_header_bytes: 8 * 1024,
            max_headers: 64,
            accept_backoff: BackoffConfig::default(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    #[must_use]
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    #[must_use]
    pub fn max_header_bytes(mut self, size: usize) -> Self {
        self.max_header_bytes = size;
        self
    }

    #[must_use]
    pub fn max_headers(mut self, count: usize) -> Self {
        self.max_headers = count;
        self
    }

    #[must_use]
    pub fn accept_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.accept_backoff = backoff;
        self
    }

    /// The head limit that actually applies. Read buffers are never smaller
    /// than [`MIN_BUF_SIZE`].
    pub(crate) fn head_limit(&self) -> usize {
        self.max_header_bytes.min(self.read_buffer_size.max(MIN_BUF_SIZE))
    }
}

/// Exponential back-off for accept failures that are not transient.
///
/// The delay starts at `initial_delay`, doubles on each consecutive
/// failure and is capped at `max_delay`. A successful accept resets it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { initial_delay: Duration::from_millis(10), max_delay: Duration::from_secs(1) }
    }
}

impl BackoffConfig {
    /// Clamps both delays to at least 1 ms and orders them.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.initial_delay = self.initial_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(Duration::from_millis(1));
        if self.initial_delay > self.max_delay {
            std::mem::swap(&mut self.initial_delay, &mut self.max_delay);
        }
        self
    }

    /// The delay following `current`.
    pub(crate) fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.read_buffer_size, 8 * 1024);
        assert_eq!(config.write_buffer_size, 4 * 1024);
        assert_eq!(config.head_limit(), 8 * 1024);
        assert_eq!(config.max_headers, 64);
        assert_eq!(config.accept_backoff.initial_delay, Duration::from_millis(10));
    }

    #[test]
    fn head_limit_is_capped_by_read_buffer() {
        let config = ServerConfig::default().read_buffer_size(1024).max_header_bytes(4096);
        assert_eq!(config.head_limit(), 1024);
    }

    #[test]
    fn head_limit_follows_the_real_buffer_floor() {
        let config = ServerConfig::default().read_buffer_size(4);
        assert_eq!(config.head_limit(), MIN_BUF_SIZE);

        let config = config.max_header_bytes(8);
        assert_eq!(config.head_limit(), 8);
    }

    #[test]
    fn normalized_orders_and_clamps() {
        let backoff = BackoffConfig { initial_delay: Duration::from_millis(5), max_delay: Duration::ZERO }.normalized();
        assert_eq!(backoff.initial_delay, Duration::from_millis(1));
        assert_eq!(backoff.max_delay, Duration::from_millis(5));
    }

    #[test]
    fn delay_doubles_up_to_max() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.next(Duration::from_millis(10)), Duration::from_millis(20));
        assert_eq!(backoff.next(Duration::from_millis(800)), Duration::from_secs(1));
    }
}
