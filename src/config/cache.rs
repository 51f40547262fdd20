use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    /// Mailbox depth of every cache actor
    #[serde(default = "default_mailbox_size")]
    pub mailbox_size: usize,

    /// A node that went inactive less than this ago is still served
    #[serde(default = "default_inactive_grace")]
    pub inactive_grace_in_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mailbox_size: default_mailbox_size(),
            inactive_grace_in_secs: default_inactive_grace(),
        }
    }
}

impl CacheConfig {
    pub fn inactive_grace(&self) -> Duration {
        Duration::from_secs(self.inactive_grace_in_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mailbox_size == 0 {
            return Err(invalid("cache.mailbox_size must be greater than 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusConfig {
    /// Depth of each per-kind publish channel
    #[serde(default = "default_publish_buffer")]
    pub publish_buffer: usize,

    /// Default depth of a subscriber channel
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            publish_buffer: default_publish_buffer(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.publish_buffer == 0 || self.subscriber_buffer == 0 {
            return Err(invalid("bus buffers must be greater than 0"));
        }
        Ok(())
    }
}

fn default_mailbox_size() -> usize {
    1024
}
fn default_inactive_grace() -> u64 {
    15
}
fn default_publish_buffer() -> usize {
    4096
}
fn default_subscriber_buffer() -> usize {
    512
}
