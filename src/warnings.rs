use crate::{DeviceSession, HardwareLink, Result};
use log::warn;
use std::fmt;

pub const WARNING_SYNC_RATE_ZERO: i32 = 0x0001;
pub const WARNING_SYNC_RATE_VERY_LOW: i32 = 0x0002;
pub const WARNING_SYNC_RATE_TOO_HIGH: i32 = 0x0004;
pub const WARNING_INPT_RATE_ZERO: i32 = 0x0010;
pub const WARNING_INPT_RATE_TOO_HIGH: i32 = 0x0040;
pub const WARNING_INPT_RATE_RATIO: i32 = 0x0100;
pub const WARNING_DIVIDER_GREATER_ONE: i32 = 0x0200;
pub const WARNING_TIME_SPAN_TOO_SMALL: i32 = 0x0400;
pub const WARNING_OFFSET_UNNECESSARY: i32 = 0x0800;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Warning {
    SyncRateZero,
    SyncRateVeryLow,
    SyncRateTooHigh,
    InputRateZero,
    InputRateTooHigh,
    InputRateRatio,
    DividerGreaterOne,
    TimeSpanTooSmall,
    OffsetUnnecessary,
}

const WARNING_BITS: &[(i32, Warning)] = &[
    (WARNING_SYNC_RATE_ZERO, Warning::SyncRateZero),
    (WARNING_SYNC_RATE_VERY_LOW, Warning::SyncRateVeryLow),
    (WARNING_SYNC_RATE_TOO_HIGH, Warning::SyncRateTooHigh),
    (WARNING_INPT_RATE_ZERO, Warning::InputRateZero),
    (WARNING_INPT_RATE_TOO_HIGH, Warning::InputRateTooHigh),
    (WARNING_INPT_RATE_RATIO, Warning::InputRateRatio),
    (WARNING_DIVIDER_GREATER_ONE, Warning::DividerGreaterOne),
    (WARNING_TIME_SPAN_TOO_SMALL, Warning::TimeSpanTooSmall),
    (WARNING_OFFSET_UNNECESSARY, Warning::OffsetUnnecessary),
];

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Warning::SyncRateZero => "sync rate is zero",
            Warning::SyncRateVeryLow => "sync rate is very low",
            Warning::SyncRateTooHigh => "sync rate is too high",
            Warning::InputRateZero => "an input rate is zero",
            Warning::InputRateTooHigh => "an input rate is too high",
            Warning::InputRateRatio => "input rate is high compared to sync rate",
            Warning::DividerGreaterOne => "sync divider is greater than one",
            Warning::TimeSpanTooSmall => "histogram time span is shorter than the sync period",
            Warning::OffsetUnnecessary => "offset is larger than needed",
        };
        f.write_str(text)
    }
}

/// Decoded device warning word. An empty report means the bitmask was zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WarningReport {
    pub bits: i32,
    pub text: String,
}

impl WarningReport {
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn warnings(&self) -> Vec<Warning> {
        WARNING_BITS
            .iter()
            .filter(|(bit, _)| self.bits & bit != 0)
            .map(|&(_, w)| w)
            .collect()
    }
}

/// Reads the warning word of an initialised device.
pub struct WarningMonitor<'a, L: HardwareLink> {
    session: &'a DeviceSession<L>,
}

impl<'a, L: HardwareLink> WarningMonitor<'a, L> {
    pub fn new(session: &'a DeviceSession<L>) -> Self {
        Self { session }
    }

    pub fn check(&self) -> Result<WarningReport> {
        let bits = self
            .session
            .call("GetWarnings", |link, dev| link.warnings(dev))?;
        if bits == 0 {
            return Ok(WarningReport::default());
        }
        let text = self
            .session
            .call("GetWarningsText", |link, dev| link.warnings_text(dev, bits))?;
        let report = WarningReport { bits, text };
        for w in report.warnings() {
            warn!("Device {}: {}", self.session.dev_index(), w);
        }
        Ok(report)
    }
}
