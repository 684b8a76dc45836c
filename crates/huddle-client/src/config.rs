//! Conversation configuration.

use std::time::Duration;

use huddle_core::{BackoffConfig, HistoryConfig, PresenceConfig};

/// Time an optimistic message may wait for its ack before it is marked failed.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Conversation configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationConfig {
    /// Send ack timeout
    pub send_timeout: Duration,
    /// Typing and online presence
    pub presence: PresenceConfig,
    /// History paging
    pub history: HistoryConfig,
    /// Stream reconnect backoff
    pub backoff: BackoffConfig,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
            presence: PresenceConfig::default(),
            history: HistoryConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}
