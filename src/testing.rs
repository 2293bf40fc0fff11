//! Recording driver stub shared by the unit tests.

use crate::{HardwareInfo, HardwareLink, LinkResult};
use log::{LevelFilter, Log, Metadata, Record};
use std::{
    cell::RefCell,
    sync::{Mutex, Once},
};

thread_local! {
    static CAPTURED: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Keeps every log line emitted on the current thread. Tests run on their own threads,
/// so each test only sees its own lines.
struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        CAPTURED.with(|lines| lines.borrow_mut().push(record.args().to_string()));
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;
static INSTALL: Once = Once::new();

/// Starts capturing log lines for the current thread, dropping anything captured so far.
pub fn capture_logs() {
    INSTALL.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Trace);
        }
    });
    CAPTURED.with(|lines| lines.borrow_mut().clear());
}

pub fn captured_logs() -> Vec<String> {
    CAPTURED.with(|lines| lines.borrow().clone())
}

#[derive(Clone, Debug)]
pub enum StubSlot {
    Present(&'static str),
    Absent,
    Errored(i32),
}

#[derive(Default)]
struct StubState {
    calls: Vec<String>,
    histo_len: usize,
    binning: i32,
    polls: usize,
}

pub struct StubLink {
    slots: Vec<StubSlot>,
    channels: usize,
    fail_on: Option<(&'static str, i32)>,
    pattern: Vec<u32>,
    flags: i32,
    warnings: i32,
    polls_until_done: usize,
    state: Mutex<StubState>,
}

impl StubLink {
    /// One "TestDev" with two channels in slot 0, completing on the first poll.
    pub fn new() -> Self {
        Self {
            slots: vec![StubSlot::Present("1000001")],
            channels: 2,
            fail_on: None,
            pattern: Vec::new(),
            flags: 0,
            warnings: 0,
            polls_until_done: 1,
            state: Mutex::new(StubState::default()),
        }
    }

    pub fn with_slots(mut self, slots: Vec<StubSlot>) -> Self {
        self.slots = slots;
        self
    }

    pub fn failing(mut self, operation: &'static str, code: i32) -> Self {
        self.fail_on = Some((operation, code));
        self
    }

    pub fn with_pattern(mut self, pattern: Vec<u32>) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_flags(mut self, flags: i32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_warnings(mut self, warnings: i32) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn polls_until_done(mut self, polls: usize) -> Self {
        self.polls_until_done = polls;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls().iter().filter(|c| *c == operation).count()
    }

    fn record(&self, operation: &'static str) -> LinkResult<()> {
        self.state.lock().unwrap().calls.push(operation.to_string());
        match self.fail_on {
            Some((op, code)) if op == operation => Err(code),
            _ => Ok(()),
        }
    }
}

impl HardwareLink for StubLink {
    fn max_devices(&self) -> i32 {
        self.slots.len() as i32
    }

    fn library_version(&self) -> LinkResult<String> {
        self.record("GetLibraryVersion")?;
        Ok("3.0".to_string())
    }

    fn error_string(&self, code: i32) -> String {
        format!("stub error {code}")
    }

    fn open_device(&self, slot: i32) -> LinkResult<String> {
        self.record("OpenDevice")?;
        match self.slots.get(slot as usize) {
            Some(StubSlot::Present(serial)) => Ok(serial.to_string()),
            Some(StubSlot::Errored(code)) => Err(*code),
            _ => Err(-1),
        }
    }

    fn close_device(&self, _dev: i32) -> LinkResult<()> {
        self.record("CloseDevice")
    }

    fn initialize(&self, _dev: i32, _mode: i32, _refsource: i32) -> LinkResult<()> {
        self.record("Initialize")
    }

    fn hardware_info(&self, _dev: i32) -> LinkResult<HardwareInfo> {
        self.record("GetHardwareInfo")?;
        Ok(HardwareInfo {
            model: "TestDev".to_string(),
            part_number: "930004".to_string(),
            version: "2.0".to_string(),
        })
    }

    fn num_input_channels(&self, _dev: i32) -> LinkResult<usize> {
        self.record("GetNumOfInputChannels")?;
        Ok(self.channels)
    }

    fn calibrate(&self, _dev: i32) -> LinkResult<()> {
        self.record("Calibrate")
    }

    fn set_sync_div(&self, _dev: i32, _div: i32) -> LinkResult<()> {
        self.record("SetSyncDiv")
    }

    fn set_sync_cfd(&self, _dev: i32, _level: i32, _zero_cross: i32) -> LinkResult<()> {
        self.record("SetSyncCFD")
    }

    fn set_sync_channel_offset(&self, _dev: i32, _offset: i32) -> LinkResult<()> {
        self.record("SetSyncChannelOffset")
    }

    fn set_input_cfd(
        &self,
        _dev: i32,
        _channel: i32,
        _level: i32,
        _zero_cross: i32,
    ) -> LinkResult<()> {
        self.record("SetInputCFD")
    }

    fn set_input_channel_offset(&self, _dev: i32, _channel: i32, _offset: i32) -> LinkResult<()> {
        self.record("SetInputChannelOffset")
    }

    fn set_histo_len(&self, _dev: i32, len_code: i32) -> LinkResult<usize> {
        self.record("SetHistoLen")?;
        let len = 1024usize << len_code;
        self.state.lock().unwrap().histo_len = len;
        Ok(len)
    }

    fn set_binning(&self, _dev: i32, binning: i32) -> LinkResult<()> {
        self.record("SetBinning")?;
        self.state.lock().unwrap().binning = binning;
        Ok(())
    }

    fn set_offset(&self, _dev: i32, _offset: i32) -> LinkResult<()> {
        self.record("SetOffset")
    }

    fn set_stop_overflow(&self, _dev: i32, _stop: bool, _stop_count: u32) -> LinkResult<()> {
        self.record("SetStopOverflow")
    }

    fn resolution(&self, _dev: i32) -> LinkResult<f64> {
        self.record("GetResolution")?;
        let binning = self.state.lock().unwrap().binning;
        Ok(f64::from(1u32 << binning))
    }

    fn sync_rate(&self, _dev: i32) -> LinkResult<i32> {
        self.record("GetSyncRate")?;
        Ok(10_000_000)
    }

    fn count_rate(&self, _dev: i32, channel: i32) -> LinkResult<i32> {
        self.record("GetCountRate")?;
        Ok(1000 * (channel + 1))
    }

    fn clear_hist_mem(&self, _dev: i32) -> LinkResult<()> {
        self.record("ClearHistMem")
    }

    fn start_meas(&self, _dev: i32, _tacq_ms: i32) -> LinkResult<()> {
        self.record("StartMeas")?;
        self.state.lock().unwrap().polls = 0;
        Ok(())
    }

    fn ctc_status(&self, _dev: i32) -> LinkResult<bool> {
        self.record("CTCStatus")?;
        let mut state = self.state.lock().unwrap();
        state.polls += 1;
        Ok(state.polls >= self.polls_until_done)
    }

    fn stop_meas(&self, _dev: i32) -> LinkResult<()> {
        self.record("StopMeas")
    }

    fn histogram(&self, _dev: i32, _channel: i32, counts: &mut [u32]) -> LinkResult<()> {
        self.record("GetHistogram")?;
        counts.fill(0);
        for (bin, value) in counts.iter_mut().zip(&self.pattern) {
            *bin = *value;
        }
        Ok(())
    }

    fn flags(&self, _dev: i32) -> LinkResult<i32> {
        self.record("GetFlags")?;
        Ok(self.flags)
    }

    fn warnings(&self, _dev: i32) -> LinkResult<i32> {
        self.record("GetWarnings")?;
        Ok(self.warnings)
    }

    fn warnings_text(&self, _dev: i32, warnings: i32) -> LinkResult<String> {
        self.record("GetWarningsText")?;
        Ok(format!("stub warnings {warnings:#x}"))
    }
}
