//! Runtime configuration.

use std::time::Duration;

use huddle_client::ConversationConfig;

/// Interval at which the runtime feeds `Tick` into the conversation.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the UI command channel.
pub const DEFAULT_COMMAND_BUFFER: usize = 64;

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Tick interval (should be well below the typing debounce)
    pub tick_interval: Duration,
    /// Command channel capacity
    pub command_buffer: usize,
    /// Conversation engine settings
    pub conversation: ConversationConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            conversation: ConversationConfig::default(),
        }
    }
}
