use serde::{Deserialize, Serialize};

use super::channel::Channel;

// ---------------------------------------------------------------------------
// Run – one continuous acquisition window
// ---------------------------------------------------------------------------

/// Acquisition time window. ISO-8601 timestamps kept as text for simplicity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimePeriod {
    pub start: String,
    pub end: String,
}

/// An ordered, component-unique collection of channels plus the acquisition
/// metadata they share.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    /// Samples per second.
    pub sample_rate: Option<f64>,
    pub time_period: TimePeriod,
    pub data_logger: String,
    channels: Vec<Channel>,
}

impl Run {
    pub fn new(id: &str) -> Self {
        Run {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Add a channel, keeping component names unique: a channel whose
    /// component is already present replaces the existing one in place,
    /// preserving order.
    pub fn add_channel(&mut self, channel: Channel) {
        match self
            .channels
            .iter()
            .position(|c| c.component() == channel.component())
        {
            Some(i) => self.channels[i] = channel,
            None => self.channels.push(channel),
        }
    }

    pub fn channel(&self, component: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.component() == component)
    }

    pub fn channel_mut(&mut self, component: &str) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| c.component() == component)
    }

    pub fn has_component(&self, component: &str) -> bool {
        self.channel(component).is_some()
    }
}
