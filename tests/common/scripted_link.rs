//! Sensor link replaying a timed script instead of a serial port

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempmon::serial::{LinkError, LinkOpener, RawLine, SensorLink};
use tempmon::types::DeviceIdentifier;

/// What the link does once every scripted line has been delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterScript {
    /// Report no data forever
    Idle,
    /// Fail as if the device was unplugged
    Disconnect,
}

/// Shared view of a running script
#[derive(Debug, Clone, Default)]
pub struct ScriptProbe {
    exhausted: Arc<AtomicBool>,
    opened: Arc<AtomicUsize>,
}

impl ScriptProbe {
    /// Every scripted line was handed out and the link was polled again
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    pub fn times_opened(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }
}

/// Lines released at fixed offsets from the moment the link is opened
pub struct ScriptedLink {
    lines: VecDeque<(Duration, String)>,
    opened_at: Instant,
    after: AfterScript,
    probe: ScriptProbe,
}

impl SensorLink for ScriptedLink {
    fn poll_line(&mut self) -> Result<Option<RawLine>, LinkError> {
        match self.lines.front() {
            Some((at, _)) if self.opened_at.elapsed() >= *at => {
                let (_, line) = self.lines.pop_front().unwrap_or_default();
                Ok(Some(RawLine::new(line)))
            }
            Some(_) => Ok(None),
            None => {
                self.probe.exhausted.store(true, Ordering::Release);
                match self.after {
                    AfterScript::Idle => Ok(None),
                    AfterScript::Disconnect => {
                        Err(LinkError::Disconnected("scripted unplug".to_string()))
                    }
                }
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Opener handing out one [`ScriptedLink`]
pub struct ScriptedOpener {
    script: Mutex<Option<Vec<(Duration, String)>>>,
    after: AfterScript,
    probe: ScriptProbe,
}

impl ScriptedOpener {
    pub fn new<S: Into<String>>(script: Vec<(Duration, S)>, after: AfterScript) -> Self {
        Self {
            script: Mutex::new(Some(
                script.into_iter().map(|(at, line)| (at, line.into())).collect(),
            )),
            after,
            probe: ScriptProbe::default(),
        }
    }

    /// All lines available immediately
    pub fn immediate<S: Into<String>>(lines: Vec<S>, after: AfterScript) -> Self {
        Self::new(lines.into_iter().map(|l| (Duration::ZERO, l)).collect(), after)
    }

    pub fn probe(&self) -> ScriptProbe {
        self.probe.clone()
    }
}

impl LinkOpener for ScriptedOpener {
    fn open(&self, device: &DeviceIdentifier, _baud_rate: u32) -> Result<Box<dyn SensorLink>, LinkError> {
        let script = self
            .script
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| LinkError::Disconnected(format!("{} already used", device.port_name)))?;
        self.probe.opened.fetch_add(1, Ordering::AcqRel);

        Ok(Box::new(ScriptedLink {
            lines: script.into(),
            opened_at: Instant::now(),
            after: self.after,
            probe: self.probe.clone(),
        }))
    }
}
