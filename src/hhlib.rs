//! Driver capability surface of the HydraHarp library.
//!
//! Every call is synchronous and addresses a device by its integer index. Failures are
//! the raw negative status code returned by the library; [`HHReturn`] classifies them.

/// Library version this crate was written against.
pub const LIB_VERSION: &str = "3.0";
/// Number of device slots the library can address.
pub const MAXDEVNUM: i32 = 8;
/// Histogramming measurement mode.
pub const MODE_HIST: i32 = 0;
/// Upper bound for the input channel count of one device.
pub const HHMAXINPCHAN: usize = 8;
/// Largest histogram length code; `1024 << MAXLENCODE` bins.
pub const MAXLENCODE: i32 = 6;
/// Largest histogram the device can produce.
pub const MAXHISTLEN: usize = 65536;
/// Overflow bit of the flags word.
pub const FLAG_OVERFLOW: i32 = 0x0001;

/// Result of a single driver call. The error is the library's status code.
pub type LinkResult<T> = Result<T, i32>;

#[repr(i32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HHReturn {
    Success = 0,
    DeviceOpenFail = -1,
    DeviceBusy = -2,
    DeviceHeventFail = -3,
    DeviceCallbsetFail = -4,
    DeviceBarmapFail = -5,
    DeviceCloseFail = -6,
    DeviceResetFail = -7,
    DeviceGetVersionFail = -8,
    DeviceVersionMismatch = -9,
    DeviceNotOpen = -10,
    DeviceLocked = -11,
    InstanceRunning = -16,
    InvalidArgument = -17,
    InvalidMode = -18,
    InvalidOption = -19,
    InvalidMemory = -20,
    InvalidRData = -21,
    NotInitialized = -22,
    NotCalibrated = -23,
    DmaFail = -24,
    XtDeviceFail = -25,
    FpgaConfFail = -26,
    IfConfFail = -27,
    FifoResetFail = -28,
    StatusFail = -29,
    UsbGetDriverVerFail = -32,
    UsbDriverVerMismatch = -33,
    UsbGetIfInfoFail = -34,
    UsbHiSpeedFail = -35,
    UsbVcmdFail = -36,
    UsbBulkRdFail = -37,
    UsbResetFail = -38,
    Unknown = 1,
}

impl From<i32> for HHReturn {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::Success,
            -1 => Self::DeviceOpenFail,
            -2 => Self::DeviceBusy,
            -3 => Self::DeviceHeventFail,
            -4 => Self::DeviceCallbsetFail,
            -5 => Self::DeviceBarmapFail,
            -6 => Self::DeviceCloseFail,
            -7 => Self::DeviceResetFail,
            -8 => Self::DeviceGetVersionFail,
            -9 => Self::DeviceVersionMismatch,
            -10 => Self::DeviceNotOpen,
            -11 => Self::DeviceLocked,
            -16 => Self::InstanceRunning,
            -17 => Self::InvalidArgument,
            -18 => Self::InvalidMode,
            -19 => Self::InvalidOption,
            -20 => Self::InvalidMemory,
            -21 => Self::InvalidRData,
            -22 => Self::NotInitialized,
            -23 => Self::NotCalibrated,
            -24 => Self::DmaFail,
            -25 => Self::XtDeviceFail,
            -26 => Self::FpgaConfFail,
            -27 => Self::IfConfFail,
            -28 => Self::FifoResetFail,
            -29 => Self::StatusFail,
            -32 => Self::UsbGetDriverVerFail,
            -33 => Self::UsbDriverVerMismatch,
            -34 => Self::UsbGetIfInfoFail,
            -35 => Self::UsbHiSpeedFail,
            -36 => Self::UsbVcmdFail,
            -37 => Self::UsbBulkRdFail,
            -38 => Self::UsbResetFail,
            _ => Self::Unknown,
        }
    }
}

/// Model, part number and firmware version strings reported by a device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HardwareInfo {
    pub model: String,
    pub part_number: String,
    pub version: String,
}

/// The vendor driver as seen by the acquisition code.
///
/// Implementations must be cheap to call repeatedly: `ctc_status` is polled in a tight
/// loop while a measurement is running. No method is ever called concurrently for the
/// same device index.
pub trait HardwareLink {
    /// Number of slots to probe during discovery.
    fn max_devices(&self) -> i32 {
        MAXDEVNUM
    }

    fn library_version(&self) -> LinkResult<String>;

    /// Text for a status code. Never fails; unknown codes get a generic description.
    fn error_string(&self, code: i32) -> String;

    /// Opens the device in `slot` and returns its serial number.
    fn open_device(&self, slot: i32) -> LinkResult<String>;

    fn close_device(&self, dev: i32) -> LinkResult<()>;

    fn initialize(&self, dev: i32, mode: i32, refsource: i32) -> LinkResult<()>;

    fn hardware_info(&self, dev: i32) -> LinkResult<HardwareInfo>;

    fn num_input_channels(&self, dev: i32) -> LinkResult<usize>;

    fn calibrate(&self, dev: i32) -> LinkResult<()>;

    fn set_sync_div(&self, dev: i32, div: i32) -> LinkResult<()>;

    fn set_sync_cfd(&self, dev: i32, level: i32, zero_cross: i32) -> LinkResult<()>;

    fn set_sync_channel_offset(&self, dev: i32, offset: i32) -> LinkResult<()>;

    fn set_input_cfd(&self, dev: i32, channel: i32, level: i32, zero_cross: i32)
        -> LinkResult<()>;

    fn set_input_channel_offset(&self, dev: i32, channel: i32, offset: i32) -> LinkResult<()>;

    /// Sets the histogram length code and returns the resulting number of bins.
    fn set_histo_len(&self, dev: i32, len_code: i32) -> LinkResult<usize>;

    fn set_binning(&self, dev: i32, binning: i32) -> LinkResult<()>;

    fn set_offset(&self, dev: i32, offset: i32) -> LinkResult<()>;

    fn set_stop_overflow(&self, dev: i32, stop: bool, stop_count: u32) -> LinkResult<()>;

    /// Bin width in picoseconds.
    fn resolution(&self, dev: i32) -> LinkResult<f64>;

    fn sync_rate(&self, dev: i32) -> LinkResult<i32>;

    fn count_rate(&self, dev: i32, channel: i32) -> LinkResult<i32>;

    fn clear_hist_mem(&self, dev: i32) -> LinkResult<()>;

    fn start_meas(&self, dev: i32, tacq_ms: i32) -> LinkResult<()>;

    /// `true` once the acquisition timer has expired.
    fn ctc_status(&self, dev: i32) -> LinkResult<bool>;

    fn stop_meas(&self, dev: i32) -> LinkResult<()>;

    /// Copies the histogram of `channel` into `counts`, which holds exactly the
    /// configured number of bins.
    fn histogram(&self, dev: i32, channel: i32, counts: &mut [u32]) -> LinkResult<()>;

    fn flags(&self, dev: i32) -> LinkResult<i32>;

    fn warnings(&self, dev: i32) -> LinkResult<i32>;

    fn warnings_text(&self, dev: i32, warnings: i32) -> LinkResult<String>;
}

/// Lets `fill` write a full `MAXHISTLEN` buffer, whatever length the device is set to,
/// then copies the first `counts.len()` bins out.
#[cfg(any(feature = "hhlib", test))]
fn read_full_histogram(
    counts: &mut [u32],
    fill: impl FnOnce(&mut [u32]) -> LinkResult<()>,
) -> LinkResult<()> {
    if counts.len() > MAXHISTLEN {
        return Err(HHReturn::InvalidArgument as i32);
    }
    let mut full = vec![0u32; MAXHISTLEN];
    fill(&mut full)?;
    counts.copy_from_slice(&full[..counts.len()]);
    Ok(())
}

#[cfg(feature = "hhlib")]
pub use ffi::HHLib;

#[cfg(feature = "hhlib")]
mod ffi {
    use super::{read_full_histogram, HardwareInfo, HardwareLink, LinkResult};
    use libc::{c_char, c_double, c_int, c_uint};

    #[allow(non_snake_case)]
    extern "C" {
        fn HH_GetLibraryVersion(vers: *mut c_char) -> c_int;
        fn HH_GetErrorString(errstring: *mut c_char, errcode: c_int) -> c_int;
        fn HH_OpenDevice(devidx: c_int, serial: *mut c_char) -> c_int;
        fn HH_CloseDevice(devidx: c_int) -> c_int;
        fn HH_Initialize(devidx: c_int, mode: c_int, refsource: c_int) -> c_int;
        fn HH_GetHardwareInfo(
            devidx: c_int,
            model: *mut c_char,
            partno: *mut c_char,
            version: *mut c_char,
        ) -> c_int;
        fn HH_GetNumOfInputChannels(devidx: c_int, nchannels: *mut c_int) -> c_int;
        fn HH_Calibrate(devidx: c_int) -> c_int;
        fn HH_SetSyncDiv(devidx: c_int, syncdiv: c_int) -> c_int;
        fn HH_SetSyncCFD(devidx: c_int, level: c_int, zc: c_int) -> c_int;
        fn HH_SetSyncChannelOffset(devidx: c_int, value: c_int) -> c_int;
        fn HH_SetInputCFD(devidx: c_int, channel: c_int, level: c_int, zc: c_int) -> c_int;
        fn HH_SetInputChannelOffset(devidx: c_int, channel: c_int, value: c_int) -> c_int;
        fn HH_SetStopOverflow(devidx: c_int, stop_ovfl: c_int, stopcount: c_uint) -> c_int;
        fn HH_SetBinning(devidx: c_int, binning: c_int) -> c_int;
        fn HH_SetOffset(devidx: c_int, offset: c_int) -> c_int;
        fn HH_SetHistoLen(devidx: c_int, lencode: c_int, actuallen: *mut c_int) -> c_int;
        fn HH_ClearHistMem(devidx: c_int) -> c_int;
        fn HH_StartMeas(devidx: c_int, tacq: c_int) -> c_int;
        fn HH_StopMeas(devidx: c_int) -> c_int;
        fn HH_CTCStatus(devidx: c_int, ctcstatus: *mut c_int) -> c_int;
        fn HH_GetHistogram(
            devidx: c_int,
            chcount: *mut c_uint,
            channel: c_int,
            clear: c_int,
        ) -> c_int;
        fn HH_GetResolution(devidx: c_int, resolution: *mut c_double) -> c_int;
        fn HH_GetSyncRate(devidx: c_int, syncrate: *mut c_int) -> c_int;
        fn HH_GetCountRate(devidx: c_int, channel: c_int, cntrate: *mut c_int) -> c_int;
        fn HH_GetFlags(devidx: c_int, flags: *mut c_int) -> c_int;
        fn HH_GetWarnings(devidx: c_int, warnings: *mut c_int) -> c_int;
        fn HH_GetWarningsText(devidx: c_int, text: *mut c_char, warnings: c_int) -> c_int;
    }

    fn check(res: c_int) -> LinkResult<()> {
        if res < 0 {
            Err(res)
        } else {
            Ok(())
        }
    }

    /// Bytes up to the first NUL of a buffer the library filled in.
    fn buffer_to_string(buffer: &[u8]) -> String {
        let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
        String::from_utf8_lossy(&buffer[..end]).trim().to_string()
    }

    /// Binding to the vendor `hhlib` shared library.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct HHLib;

    impl HardwareLink for HHLib {
        fn library_version(&self) -> LinkResult<String> {
            let mut libv = [0u8; 8];
            check(unsafe { HH_GetLibraryVersion(libv.as_mut_ptr() as *mut c_char) })?;
            Ok(buffer_to_string(&libv))
        }

        fn error_string(&self, code: i32) -> String {
            let mut text = [0u8; 40];
            let res = unsafe { HH_GetErrorString(text.as_mut_ptr() as *mut c_char, code) };
            if res < 0 {
                return format!("unknown error {code}");
            }
            buffer_to_string(&text)
        }

        fn open_device(&self, slot: i32) -> LinkResult<String> {
            let mut serial = [0u8; 8];
            check(unsafe { HH_OpenDevice(slot, serial.as_mut_ptr() as *mut c_char) })?;
            Ok(buffer_to_string(&serial))
        }

        fn close_device(&self, dev: i32) -> LinkResult<()> {
            check(unsafe { HH_CloseDevice(dev) })
        }

        fn initialize(&self, dev: i32, mode: i32, refsource: i32) -> LinkResult<()> {
            check(unsafe { HH_Initialize(dev, mode, refsource) })
        }

        fn hardware_info(&self, dev: i32) -> LinkResult<HardwareInfo> {
            let mut model = [0u8; 16];
            let mut partno = [0u8; 8];
            let mut version = [0u8; 8];
            check(unsafe {
                HH_GetHardwareInfo(
                    dev,
                    model.as_mut_ptr() as *mut c_char,
                    partno.as_mut_ptr() as *mut c_char,
                    version.as_mut_ptr() as *mut c_char,
                )
            })?;
            Ok(HardwareInfo {
                model: buffer_to_string(&model),
                part_number: buffer_to_string(&partno),
                version: buffer_to_string(&version),
            })
        }

        fn num_input_channels(&self, dev: i32) -> LinkResult<usize> {
            let mut n: c_int = 0;
            check(unsafe { HH_GetNumOfInputChannels(dev, &mut n) })?;
            Ok(n.max(0) as usize)
        }

        fn calibrate(&self, dev: i32) -> LinkResult<()> {
            check(unsafe { HH_Calibrate(dev) })
        }

        fn set_sync_div(&self, dev: i32, div: i32) -> LinkResult<()> {
            check(unsafe { HH_SetSyncDiv(dev, div) })
        }

        fn set_sync_cfd(&self, dev: i32, level: i32, zero_cross: i32) -> LinkResult<()> {
            check(unsafe { HH_SetSyncCFD(dev, level, zero_cross) })
        }

        fn set_sync_channel_offset(&self, dev: i32, offset: i32) -> LinkResult<()> {
            check(unsafe { HH_SetSyncChannelOffset(dev, offset) })
        }

        fn set_input_cfd(
            &self,
            dev: i32,
            channel: i32,
            level: i32,
            zero_cross: i32,
        ) -> LinkResult<()> {
            check(unsafe { HH_SetInputCFD(dev, channel, level, zero_cross) })
        }

        fn set_input_channel_offset(&self, dev: i32, channel: i32, offset: i32) -> LinkResult<()> {
            check(unsafe { HH_SetInputChannelOffset(dev, channel, offset) })
        }

        fn set_histo_len(&self, dev: i32, len_code: i32) -> LinkResult<usize> {
            let mut actual: c_int = 0;
            check(unsafe { HH_SetHistoLen(dev, len_code, &mut actual) })?;
            Ok(actual.max(0) as usize)
        }

        fn set_binning(&self, dev: i32, binning: i32) -> LinkResult<()> {
            check(unsafe { HH_SetBinning(dev, binning) })
        }

        fn set_offset(&self, dev: i32, offset: i32) -> LinkResult<()> {
            check(unsafe { HH_SetOffset(dev, offset) })
        }

        fn set_stop_overflow(&self, dev: i32, stop: bool, stop_count: u32) -> LinkResult<()> {
            check(unsafe { HH_SetStopOverflow(dev, stop as c_int, stop_count) })
        }

        fn resolution(&self, dev: i32) -> LinkResult<f64> {
            let mut resolution: c_double = 0.0;
            check(unsafe { HH_GetResolution(dev, &mut resolution) })?;
            Ok(resolution)
        }

        fn sync_rate(&self, dev: i32) -> LinkResult<i32> {
            let mut rate: c_int = 0;
            check(unsafe { HH_GetSyncRate(dev, &mut rate) })?;
            Ok(rate)
        }

        fn count_rate(&self, dev: i32, channel: i32) -> LinkResult<i32> {
            let mut rate: c_int = 0;
            check(unsafe { HH_GetCountRate(dev, channel, &mut rate) })?;
            Ok(rate)
        }

        fn clear_hist_mem(&self, dev: i32) -> LinkResult<()> {
            check(unsafe { HH_ClearHistMem(dev) })
        }

        fn start_meas(&self, dev: i32, tacq_ms: i32) -> LinkResult<()> {
            check(unsafe { HH_StartMeas(dev, tacq_ms) })
        }

        fn ctc_status(&self, dev: i32) -> LinkResult<bool> {
            let mut status: c_int = 0;
            check(unsafe { HH_CTCStatus(dev, &mut status) })?;
            Ok(status != 0)
        }

        fn stop_meas(&self, dev: i32) -> LinkResult<()> {
            check(unsafe { HH_StopMeas(dev) })
        }

        fn histogram(&self, dev: i32, channel: i32, counts: &mut [u32]) -> LinkResult<()> {
            // The library writes the configured length, which may exceed `counts`.
            read_full_histogram(counts, |full| {
                check(unsafe { HH_GetHistogram(dev, full.as_mut_ptr() as *mut c_uint, channel, 0) })
            })
        }

        fn flags(&self, dev: i32) -> LinkResult<i32> {
            let mut flags: c_int = 0;
            check(unsafe { HH_GetFlags(dev, &mut flags) })?;
            Ok(flags)
        }

        fn warnings(&self, dev: i32) -> LinkResult<i32> {
            let mut warnings: c_int = 0;
            check(unsafe { HH_GetWarnings(dev, &mut warnings) })?;
            Ok(warnings)
        }

        fn warnings_text(&self, dev: i32, warnings: i32) -> LinkResult<String> {
            let mut text = vec![0u8; 16384];
            check(unsafe { HH_GetWarningsText(dev, text.as_mut_ptr() as *mut c_char, warnings) })?;
            Ok(buffer_to_string(&text))
        }
    }
}
