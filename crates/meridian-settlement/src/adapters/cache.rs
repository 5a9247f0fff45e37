//! In-memory view of the channels an adapter owns.

use dashmap::DashMap;
use meridian_core::{Channel, ChannelStatus};

/// Local read-through cache of channel state, keyed by canonical channel id.
#[derive(Debug, Default)]
pub struct ChannelCache {
    channels: DashMap<String, Channel>,
}

impl ChannelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel_id: &str) -> Option<Channel> {
        self.channels.get(channel_id).map(|c| c.value().clone())
    }

    pub fn insert(&self, channel: Channel) {
        self.channels.insert(channel.channel_id.clone(), channel);
    }

    pub fn remove(&self, channel_id: &str) -> Option<Channel> {
        self.channels.remove(channel_id).map(|(_, c)| c)
    }

    /// Apply `f` to a cached channel, if present.
    pub fn update(&self, channel_id: &str, f: impl FnOnce(&mut Channel)) -> bool {
        match self.channels.get_mut(channel_id) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    /// All cached channels, ordered by id.
    pub fn list(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.channels.iter().map(|e| e.value().clone()).collect();
        channels.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        channels
    }

    /// Open channels towards `destination`, ordered by id.
    pub fn open_to(&self, destination: &str) -> Vec<Channel> {
        self.list()
            .into_iter()
            .filter(|c| c.status() == ChannelStatus::Open && c.destination == destination)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
