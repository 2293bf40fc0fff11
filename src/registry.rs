use crate::{DeviceSession, Error, HHReturn, HardwareLink, Result, LIB_VERSION};
use log::{debug, info, warn};
use std::sync::Arc;

/// Outcome of probing one device slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotStatus {
    Present { serial: String },
    Absent,
    Errored { code: i32, message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotProbe {
    pub slot: i32,
    pub status: SlotStatus,
}

/// Finds devices on a driver. Slot occupancy is queried fresh on every call.
pub struct DeviceRegistry<L: HardwareLink> {
    link: Arc<L>,
}

impl<L: HardwareLink> DeviceRegistry<L> {
    pub fn new(link: Arc<L>) -> Self {
        Self { link }
    }

    /// Driver library version. A mismatch with the supported version is only logged.
    pub fn library_version(&self) -> Result<String> {
        let version = self
            .link
            .library_version()
            .map_err(|code| Error::HardwareCallFailed {
                operation: "GetLibraryVersion",
                code,
                message: self.link.error_string(code),
            })?;
        info!("HH library version is {}", version);
        if version != LIB_VERSION {
            warn!("This program was written for library version {}", LIB_VERSION);
        }
        Ok(version)
    }

    fn classify(&self, code: i32) -> SlotStatus {
        match HHReturn::from(code) {
            HHReturn::DeviceOpenFail => SlotStatus::Absent,
            _ => SlotStatus::Errored {
                code,
                message: self.link.error_string(code),
            },
        }
    }

    /// Probes every slot. Devices opened for probing are closed again.
    pub fn discover(&self) -> Vec<SlotProbe> {
        (0..self.link.max_devices())
            .map(|slot| {
                let status = match self.link.open_device(slot) {
                    Ok(serial) => {
                        // Probing only needs the serial; release the slot again.
                        let mut session = DeviceSession::new(Arc::clone(&self.link), slot, serial);
                        if let Err(e) = session.close() {
                            warn!("Closing probed slot {} failed: {}", slot, e);
                        }
                        SlotStatus::Present {
                            serial: session.serial().to_string(),
                        }
                    }
                    Err(code) => self.classify(code),
                };
                log_probe(slot, &status);
                SlotProbe { slot, status }
            })
            .collect()
    }

    /// Opens the first slot holding a usable device.
    pub fn open_first(&self) -> Result<DeviceSession<L>> {
        for slot in 0..self.link.max_devices() {
            match self.link.open_device(slot) {
                Ok(serial) => {
                    let status = SlotStatus::Present {
                        serial: serial.clone(),
                    };
                    log_probe(slot, &status);
                    info!("Using device #{}", slot);
                    return Ok(DeviceSession::new(Arc::clone(&self.link), slot, serial));
                }
                Err(code) => log_probe(slot, &self.classify(code)),
            }
        }
        warn!("No device available");
        Err(Error::DeviceNotFound)
    }
}

fn log_probe(slot: i32, status: &SlotStatus) {
    match status {
        SlotStatus::Present { serial } => info!("  {}        S/N {}", slot, serial),
        SlotStatus::Absent => debug!("  {}        no device", slot),
        SlotStatus::Errored { message, .. } => warn!("  {}        {}", slot, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubLink, StubSlot};

    fn link() -> Arc<StubLink> {
        Arc::new(StubLink::new().with_slots(vec![
            StubSlot::Absent,
            StubSlot::Errored(-2),
            StubSlot::Present("1000007"),
            StubSlot::Present("1000008"),
        ]))
    }

    #[test]
    fn discover_classifies_every_slot() {
        let link = link();
        let probes = DeviceRegistry::new(Arc::clone(&link)).discover();
        let statuses: Vec<_> = probes.iter().map(|p| p.status.clone()).collect();
        assert_eq!(
            statuses,
            vec![
                SlotStatus::Absent,
                SlotStatus::Errored {
                    code: -2,
                    message: "stub error -2".to_string()
                },
                SlotStatus::Present {
                    serial: "1000007".to_string()
                },
                SlotStatus::Present {
                    serial: "1000008".to_string()
                },
            ]
        );
        assert_eq!(probes[3].slot, 3);
        // every successful probe is released again
        assert_eq!(link.count("OpenDevice"), 4);
        assert_eq!(link.count("CloseDevice"), 2);
    }

    #[test]
    fn open_first_skips_absent_and_errored() {
        let link = link();
        let session = DeviceRegistry::new(Arc::clone(&link)).open_first().unwrap();
        assert_eq!(session.dev_index(), 2);
        assert_eq!(session.serial(), "1000007");
        assert_eq!(link.count("OpenDevice"), 3);
        assert_eq!(link.count("CloseDevice"), 0);
    }

    #[test]
    fn open_first_without_devices() {
        let link = Arc::new(StubLink::new().with_slots(vec![StubSlot::Absent; 8]));
        let result = DeviceRegistry::new(Arc::clone(&link)).open_first();
        assert!(matches!(result, Err(Error::DeviceNotFound)));
        assert_eq!(link.count("OpenDevice"), 8);
    }

    #[test]
    fn library_version_is_read() {
        let registry = DeviceRegistry::new(Arc::new(StubLink::new()));
        assert_eq!(registry.library_version(), Ok("3.0".to_string()));
    }
}
