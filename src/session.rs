use crate::{AcqState, ClockSource, Error, HardwareLink, LinkResult, Result, MODE_HIST};
use log::{debug, info, warn};
use std::{fmt, sync::Arc};

/// What a device reports about itself. Read once, never changes afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub serial: String,
    pub model: String,
    pub part_number: String,
    pub version: String,
    pub input_channels: usize,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} S/N {} part no {} version {}, {} input channels",
            self.model, self.serial, self.part_number, self.version, self.input_channels
        )
    }
}

/// One opened device. The handle is released exactly once, by `close` or on drop.
pub struct DeviceSession<L: HardwareLink> {
    link: Arc<L>,
    dev: i32,
    serial: String,
    identity: Option<DeviceIdentity>,
    is_open: bool,
}

impl<L: HardwareLink> DeviceSession<L> {
    pub(crate) fn new(link: Arc<L>, dev: i32, serial: String) -> Self {
        Self {
            link,
            dev,
            serial,
            identity: None,
            is_open: true,
        }
    }

    pub fn dev_index(&self) -> i32 {
        self.dev
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Switches the device into histogramming mode and reads its identity.
    pub fn initialize(&mut self, clock_source: ClockSource) -> Result<&DeviceIdentity> {
        let refsource = clock_source.refsource();
        self.call("Initialize", |link, dev| {
            link.initialize(dev, MODE_HIST, refsource)
        })?;
        let info = self.call("GetHardwareInfo", |link, dev| link.hardware_info(dev))?;
        let input_channels =
            self.call("GetNumOfInputChannels", |link, dev| link.num_input_channels(dev))?;

        let identity = DeviceIdentity {
            serial: self.serial.clone(),
            model: info.model,
            part_number: info.part_number,
            version: info.version,
            input_channels,
        };
        info!("Device {}: {}", self.dev, identity);
        let identity = self.identity.insert(identity);
        Ok(&*identity)
    }

    pub fn identity(&self) -> Result<&DeviceIdentity> {
        match &self.identity {
            Some(identity) if self.is_open => Ok(identity),
            _ => Err(Error::PreconditionViolation {
                operation: "GetIdentity",
                state: self.idle_state(),
            }),
        }
    }

    pub fn channel_count(&self) -> Result<usize> {
        Ok(self.identity()?.input_channels)
    }

    /// Releases the handle. Later calls do nothing.
    pub fn close(&mut self) -> Result<()> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;
        debug!("HH_CloseDevice({})", self.dev);
        self.link.close_device(self.dev).map_err(|code| Error::HardwareCallFailed {
            operation: "CloseDevice",
            code,
            message: self.link.error_string(code),
        })
    }

    /// Runs one driver call against this device, decoding a failure status.
    pub(crate) fn call<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&L, i32) -> LinkResult<T>,
    ) -> Result<T> {
        debug!("HH_{}({})", operation, self.dev);
        self.call_quiet(operation, f)
    }

    /// Like `call`, without the per-call log line. For calls issued in a polling loop.
    pub(crate) fn call_quiet<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&L, i32) -> LinkResult<T>,
    ) -> Result<T> {
        if !self.is_open {
            return Err(Error::PreconditionViolation {
                operation,
                state: AcqState::Closed,
            });
        }
        f(&self.link, self.dev).map_err(|code| Error::HardwareCallFailed {
            operation,
            code,
            message: self.link.error_string(code),
        })
    }

    fn idle_state(&self) -> AcqState {
        if self.is_open {
            AcqState::Created
        } else {
            AcqState::Closed
        }
    }
}

impl<L: HardwareLink> Drop for DeviceSession<L> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Releasing device {} failed: {}", self.dev, e);
        }
    }
}
