//! Source and registry configuration

use std::time::Duration;

/// Per-source tuning
///
/// Passed to every [`MediaSource`](super::MediaSource) at construction and
/// inherited by the bridges it creates.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Frames retained in the sequence log
    pub log_capacity: usize,

    /// Keyframe positions remembered for join lookups
    pub keyframe_capacity: usize,

    /// Minimum age of the keyframe a new viewer starts from
    pub join_staleness: Duration,

    /// Audio-only joins start this far behind the newest audio frame
    pub audio_join_epsilon: Duration,

    /// Every accept up to this index wakes the sinks
    pub eager_wake_limit: u64,

    /// Past the eager limit, wake on every n-th index
    pub wake_interval: u64,

    /// Frames a sink pulls per batch
    pub sink_batch_size: usize,

    /// A sink re-polls its source this often even without a wakeup
    pub sink_poll_interval: Duration,

    /// Bridges with no subscribers for this long close themselves
    pub bridge_idle_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            log_capacity: 2048,
            keyframe_capacity: 200,
            join_staleness: Duration::from_millis(2000),
            audio_join_epsilon: Duration::from_millis(1),
            eager_wake_limit: 300,
            wake_interval: 10,
            sink_batch_size: 128,
            sink_poll_interval: Duration::from_secs(1),
            bridge_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl SourceConfig {
    /// Set sequence log capacity
    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }

    /// Set keyframe index capacity
    pub fn keyframe_capacity(mut self, capacity: usize) -> Self {
        self.keyframe_capacity = capacity.max(1);
        self
    }

    /// Set join staleness threshold
    pub fn join_staleness(mut self, staleness: Duration) -> Self {
        self.join_staleness = staleness;
        self
    }

    /// Set audio-only join epsilon
    pub fn audio_join_epsilon(mut self, epsilon: Duration) -> Self {
        self.audio_join_epsilon = epsilon;
        self
    }

    /// Set wakeup throttling thresholds
    pub fn wake_throttle(mut self, eager_limit: u64, interval: u64) -> Self {
        self.eager_wake_limit = eager_limit;
        self.wake_interval = interval.max(1);
        self
    }

    /// Set sink batch size
    pub fn sink_batch_size(mut self, size: usize) -> Self {
        self.sink_batch_size = size.max(1);
        self
    }

    /// Set sink fallback poll interval
    pub fn sink_poll_interval(mut self, interval: Duration) -> Self {
        self.sink_poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set bridge idle timeout
    pub fn bridge_idle_timeout(mut self, timeout: Duration) -> Self {
        self.bridge_idle_timeout = timeout;
        self
    }

    /// Whether an accept that produced `index` should wake sinks
    pub fn should_wake(&self, index: u64) -> bool {
        index <= self.eager_wake_limit || index % self.wake_interval == 0
    }

    /// Period of a bridge's idle check (half the idle timeout)
    pub fn idle_check_period(&self) -> Duration {
        (self.bridge_idle_timeout / 2).max(Duration::from_millis(1))
    }

    pub(crate) fn join_staleness_ms(&self) -> u32 {
        u32::try_from(self.join_staleness.as_millis()).unwrap_or(u32::MAX)
    }

    pub(crate) fn audio_join_epsilon_ms(&self) -> u32 {
        u32::try_from(self.audio_join_epsilon.as_millis()).unwrap_or(u32::MAX)
    }
}

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Configuration handed to every source
    pub source: SourceConfig,

    /// How often closed sources are swept from the registry
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            cleanup_interval: Duration::from_secs(10),
        }
    }
}

impl RegistryConfig {
    /// Set the per-source configuration
    pub fn source(mut self, source: SourceConfig) -> Self {
        self.source = source;
        self
    }

    /// Set cleanup sweep interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval.max(Duration::from_millis(1));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SourceConfig::default();

        assert_eq!(config.log_capacity, 2048);
        assert_eq!(config.keyframe_capacity, 200);
        assert_eq!(config.join_staleness, Duration::from_millis(2000));
        assert_eq!(config.eager_wake_limit, 300);
        assert_eq!(config.wake_interval, 10);
    }

    #[test]
    fn test_should_wake() {
        let config = SourceConfig::default();

        assert!(config.should_wake(0));
        assert!(config.should_wake(299));
        assert!(config.should_wake(300));
        assert!(!config.should_wake(301));
        assert!(!config.should_wake(305));
        assert!(config.should_wake(310));
        assert!(config.should_wake(10_000));
    }

    #[test]
    fn test_builder_clamps() {
        let config = SourceConfig::default()
            .log_capacity(0)
            .keyframe_capacity(0)
            .wake_throttle(5, 0)
            .sink_batch_size(0);

        assert_eq!(config.log_capacity, 1);
        assert_eq!(config.keyframe_capacity, 1);
        assert_eq!(config.wake_interval, 1);
        assert_eq!(config.sink_batch_size, 1);
    }

    #[test]
    fn test_idle_check_period() {
        let config = SourceConfig::default().bridge_idle_timeout(Duration::from_secs(10));
        assert_eq!(config.idle_check_period(), Duration::from_secs(5));

        let config = SourceConfig::default().bridge_idle_timeout(Duration::ZERO);
        assert_eq!(config.idle_check_period(), Duration::from_millis(1));
    }

    #[test]
    fn test_builder_chaining() {
        let config = RegistryConfig::default()
            .source(
                SourceConfig::default()
                    .log_capacity(64)
                    .join_staleness(Duration::from_millis(500))
                    .bridge_idle_timeout(Duration::from_secs(5)),
            )
            .cleanup_interval(Duration::from_secs(1));

        assert_eq!(config.source.log_capacity, 64);
        assert_eq!(config.source.join_staleness_ms(), 500);
        assert_eq!(config.source.bridge_idle_timeout, Duration::from_secs(5));
        assert_eq!(config.cleanup_interval, Duration::from_secs(1));
    }
}
