use crate::{Error, Result};
use confique::Config;
use serde::Deserialize;
use std::path::Path;

pub const BINSTEPSMAX: i32 = 26;
pub const OFFSETMIN: i32 = 0;
pub const OFFSETMAX: i32 = 500_000;
pub const SYNCDIVMIN: i32 = 1;
pub const SYNCDIVMAX: i32 = 16;
pub const DISCRMIN: i32 = 0;
pub const DISCRMAX: i32 = 1000;
pub const ZCMIN: i32 = 0;
pub const ZCMAX: i32 = 40;
pub const CHANOFFSMIN: i32 = -99_999;
pub const CHANOFFSMAX: i32 = 99_999;
pub const MINLENCODE: i32 = 0;
pub const ACQTMIN: u32 = 1;
pub const ACQTMAX: u32 = 360_000_000;
pub const STOPCNTMIN: u32 = 1;

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub device: DeviceSettings,
    #[config(nested)]
    pub acquisition: AcquisitionConfig,
    #[config(nested)]
    pub run_settings: RunSettings,
}

impl Conf {
    /// Loads the configuration file, with `TCSPC_*` environment variables taking
    /// precedence over file values.
    pub fn load(path: &Path) -> std::result::Result<Self, confique::Error> {
        Conf::builder().env().file(path).load()
    }
}

#[derive(Config, Debug, Clone)]
pub struct DeviceSettings {
    #[config(default = "internal")]
    pub clock_source: ClockSource,
    /// Wait after configuration or a divider change before rates are valid.
    #[config(default = 400)]
    pub settle_ms: u64,
    /// Sleep between completion polls. Unset means busy polling.
    pub poll_interval_us: Option<u64>,
}

#[derive(Config, Debug, Clone)]
pub struct RunSettings {
    #[config(default = 10000, env = "TCSPC_ACQ_TIME_MS")]
    pub acquisition_time_ms: u32,
    #[config(default = ".", env = "TCSPC_OUTPUT_DIR")]
    pub output_dir: String,
    /// Number of runs to take without prompting. Unset means interactive.
    pub runs: Option<usize>,
    /// Abort a run that takes longer than this.
    pub timeout_ms: Option<u64>,
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    #[default]
    Internal,
    External,
}

impl ClockSource {
    pub fn refsource(self) -> i32 {
        match self {
            ClockSource::Internal => 0,
            ClockSource::External => 1,
        }
    }
}

/// Settings applied to the device by `AcquisitionController::configure`.
///
/// Discriminator levels and zero-cross thresholds have no default and must be given.
#[derive(Config, Debug, Clone, PartialEq)]
pub struct AcquisitionConfig {
    #[config(default = 0)]
    pub binning: i32,
    /// Histogram start offset in ns.
    #[config(default = 0)]
    pub offset: i32,
    #[config(default = 1)]
    pub sync_divider: i32,
    pub sync_cfd_level: i32,
    pub sync_cfd_zero_cross: i32,
    /// Sync cable delay compensation in ps.
    #[config(default = 0)]
    pub sync_channel_offset: i32,
    pub input_cfd_level: i32,
    pub input_cfd_zero_cross: i32,
    /// Input cable delay compensation in ps, applied to every channel.
    #[config(default = 0)]
    pub input_channel_offset: i32,
    #[config(default = 6)]
    pub histogram_len_code: i32,
    /// Stop the measurement once any bin reaches this count.
    pub stop_overflow: Option<u32>,
}

fn check_range(name: &str, value: i32, min: i32, max: i32) -> Result<()> {
    if value < min || value > max {
        return Err(Error::invalid(format!(
            "{name} = {value} outside {min}..={max}"
        )));
    }
    Ok(())
}

impl AcquisitionConfig {
    pub fn validate(&self) -> Result<()> {
        check_range("binning", self.binning, 0, BINSTEPSMAX - 1)?;
        check_range("offset", self.offset, OFFSETMIN, OFFSETMAX)?;
        validate_sync_divider(self.sync_divider)?;
        check_range("sync_cfd_level", self.sync_cfd_level, DISCRMIN, DISCRMAX)?;
        check_range("sync_cfd_zero_cross", self.sync_cfd_zero_cross, ZCMIN, ZCMAX)?;
        check_range(
            "sync_channel_offset",
            self.sync_channel_offset,
            CHANOFFSMIN,
            CHANOFFSMAX,
        )?;
        check_range("input_cfd_level", self.input_cfd_level, DISCRMIN, DISCRMAX)?;
        check_range("input_cfd_zero_cross", self.input_cfd_zero_cross, ZCMIN, ZCMAX)?;
        check_range(
            "input_channel_offset",
            self.input_channel_offset,
            CHANOFFSMIN,
            CHANOFFSMAX,
        )?;
        check_range(
            "histogram_len_code",
            self.histogram_len_code,
            MINLENCODE,
            crate::MAXLENCODE,
        )?;
        if self.stop_overflow == Some(0) {
            return Err(Error::invalid(format!(
                "stop_overflow must be at least {STOPCNTMIN}"
            )));
        }
        Ok(())
    }

    /// Number of bins selected by the length code.
    pub fn histogram_len(&self) -> usize {
        1024usize << self.histogram_len_code.clamp(MINLENCODE, crate::MAXLENCODE)
    }
}

pub fn validate_sync_divider(div: i32) -> Result<()> {
    check_range("sync_divider", div, SYNCDIVMIN, SYNCDIVMAX)?;
    if (div as u32).is_power_of_two() {
        Ok(())
    } else {
        Err(Error::invalid(format!(
            "sync_divider = {div} is not a power of two"
        )))
    }
}

/// Length of one timed acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionRequest {
    time_ms: u32,
}

impl AcquisitionRequest {
    pub fn new(time_ms: u32) -> Result<Self> {
        if !(ACQTMIN..=ACQTMAX).contains(&time_ms) {
            return Err(Error::invalid(format!(
                "acquisition time {time_ms} ms outside {ACQTMIN}..={ACQTMAX}"
            )));
        }
        Ok(Self { time_ms })
    }

    pub fn time_ms(&self) -> u32 {
        self.time_ms
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AcquisitionConfig {
    AcquisitionConfig {
        binning: 0,
        offset: 0,
        sync_divider: 1,
        sync_cfd_level: 50,
        sync_cfd_zero_cross: 10,
        sync_channel_offset: -5000,
        input_cfd_level: 50,
        input_cfd_zero_cross: 10,
        input_channel_offset: 0,
        histogram_len_code: 6,
        stop_overflow: None,
    }
}
