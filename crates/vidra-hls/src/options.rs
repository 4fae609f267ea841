use std::time::Duration;

use crate::abr::AbrOptions;

/// Parameters of an HLS session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Cadence of the fragment-advancement driver.
    pub tick_interval: Duration,
    /// ABR configuration.
    pub abr: AbrOptions,
    /// Capacity of the events broadcast channel.
    pub event_capacity: usize,
    /// Capacity of the command mpsc channel.
    pub command_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            abr: AbrOptions::default(),
            event_capacity: 32,
            command_capacity: 8,
        }
    }
}

impl SessionOptions {
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_abr(mut self, abr: AbrOptions) -> Self {
        self.abr = abr;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }
}
