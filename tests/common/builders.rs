//! Test data builders for creating test objects

use super::scripted_link::ScriptedOpener;
use std::time::Duration;
use tempmon::acquisition::{Acquisition, AcquisitionSettings};
use tempmon::events::EventBus;
use tempmon::external::ExternalSinkClient;
use tempmon::sinks::SampleWindow;
use tempmon::types::DeviceIdentifier;

/// Device used by every scripted session
pub fn test_device() -> DeviceIdentifier {
    DeviceIdentifier::new("COM3", "USB-SERIAL CH340")
}

/// Builder for acquisition controllers running against scripted links
pub struct AcquisitionBuilder {
    settings: AcquisitionSettings,
    window_capacity: usize,
    external: Option<ExternalSinkClient>,
}

impl AcquisitionBuilder {
    pub fn new() -> Self {
        Self {
            settings: AcquisitionSettings {
                baud_rate: 9600,
                settle_delay: Duration::ZERO,
                poll_interval: Duration::from_millis(5),
            },
            window_capacity: 100,
            external: None,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.settings.poll_interval = interval;
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settings.settle_delay = delay;
        self
    }

    pub fn window_capacity(mut self, capacity: usize) -> Self {
        self.window_capacity = capacity;
        self
    }

    pub fn external(mut self, client: ExternalSinkClient) -> Self {
        self.external = Some(client);
        self
    }

    pub fn build(self, opener: ScriptedOpener, events: EventBus) -> Acquisition {
        let acquisition = Acquisition::new(
            Box::new(opener),
            self.settings,
            SampleWindow::new(self.window_capacity),
            events,
        );
        match self.external {
            Some(client) => acquisition.with_external_sink(client),
            None => acquisition,
        }
    }
}

impl Default for AcquisitionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_builder_defaults() {
        let builder = AcquisitionBuilder::new().window_capacity(10);
        assert_eq!(builder.settings.settle_delay, Duration::ZERO);
        assert_eq!(builder.window_capacity, 10);
    }
}
