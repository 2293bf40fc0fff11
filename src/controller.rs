use crate::{
    validate_sync_divider, AcquisitionConfig, AcquisitionRequest, ClockSource, DeviceIdentity,
    DeviceSession, DeviceSettings, Error, HardwareLink, HistogramResult, LinkResult, Result,
    WarningMonitor, WarningReport, FLAG_OVERFLOW,
};
use log::{debug, error, info, warn};
use ndarray::{Array2, ArrayView1};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Rate readings are only valid this long after initialisation or a divider change.
pub const SETTLE_TIME: Duration = Duration::from_millis(400);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcqState {
    Created,
    Initialized,
    Calibrated,
    Configured,
    Ready,
    Measuring,
    Closed,
}

/// Values the device reports back after configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DerivedParameters {
    pub histogram_len: usize,
    pub resolution_ps: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateReport {
    pub sync_rate: i32,
    pub count_rates: Vec<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timing {
    pub settle: Duration,
    /// `None` polls the completion flag without sleeping.
    pub poll_interval: Option<Duration>,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle: SETTLE_TIME,
            poll_interval: None,
        }
    }
}

impl From<&DeviceSettings> for Timing {
    fn from(settings: &DeviceSettings) -> Self {
        Self {
            settle: Duration::from_millis(settings.settle_ms),
            poll_interval: settings.poll_interval_us.map(Duration::from_micros),
        }
    }
}

/// Requests that a running acquisition stops. Safe to use from any thread; the
/// controller's own thread issues the driver call.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives one device from initialisation through repeated histogram runs.
///
/// Any failing driver call releases the device and leaves the controller `Closed`.
pub struct AcquisitionController<L: HardwareLink> {
    session: DeviceSession<L>,
    state: AcqState,
    timing: Timing,
    config: Option<AcquisitionConfig>,
    derived: Option<DerivedParameters>,
    settled_at: Option<Instant>,
    scratch: Vec<u32>,
    abort: AbortHandle,
}

impl<L: HardwareLink> AcquisitionController<L> {
    pub fn new(session: DeviceSession<L>) -> Self {
        Self::with_timing(session, Timing::default())
    }

    pub fn with_timing(session: DeviceSession<L>, timing: Timing) -> Self {
        let state = if session.is_open() {
            AcqState::Created
        } else {
            AcqState::Closed
        };
        Self {
            session,
            state,
            timing,
            config: None,
            derived: None,
            settled_at: None,
            scratch: Vec::new(),
            abort: AbortHandle::default(),
        }
    }

    pub fn state(&self) -> AcqState {
        self.state
    }

    pub fn identity(&self) -> Result<&DeviceIdentity> {
        self.session.identity()
    }

    pub fn config(&self) -> Option<&AcquisitionConfig> {
        self.config.as_ref()
    }

    pub fn derived(&self) -> Option<DerivedParameters> {
        self.derived
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    fn require(&self, operation: &'static str, allowed: &[AcqState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::PreconditionViolation {
                operation,
                state: self.state,
            })
        }
    }

    fn call<T>(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&L, i32) -> LinkResult<T>,
    ) -> Result<T> {
        match self.session.call(operation, f) {
            Ok(value) => Ok(value),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Completion check, issued once per poll. Not logged per call.
    fn measurement_done(&mut self) -> Result<bool> {
        match self
            .session
            .call_quiet("CTCStatus", |link, dev| link.ctc_status(dev))
        {
            Ok(done) => Ok(done),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Ends the running measurement. The state leaves `Measuring` first, so a failing
    /// stop is not repeated on release.
    fn stop_measurement(&mut self) -> Result<()> {
        self.state = AcqState::Ready;
        self.call("StopMeas", |link, dev| link.stop_meas(dev))
    }

    fn fail(&mut self, e: Error) -> Error {
        error!("{}. Aborted.", e);
        self.release();
        e
    }

    fn release(&mut self) {
        if self.state == AcqState::Closed {
            return;
        }
        if self.state == AcqState::Measuring {
            if let Err(e) = self.session.call("StopMeas", |link, dev| link.stop_meas(dev)) {
                warn!("Stopping measurement during release failed: {}", e);
            }
        }
        if let Err(e) = self.session.close() {
            warn!("{}", e);
        }
        self.state = AcqState::Closed;
    }

    pub fn initialize(&mut self, clock_source: ClockSource) -> Result<DeviceIdentity> {
        self.require("Initialize", &[AcqState::Created])?;
        info!("Initializing the device...");
        let identity = match self.session.initialize(clock_source) {
            Ok(identity) => identity.clone(),
            Err(e) => return Err(self.fail(e)),
        };
        self.settled_at = Some(Instant::now() + self.timing.settle);
        self.state = AcqState::Initialized;
        Ok(identity)
    }

    pub fn calibrate(&mut self) -> Result<()> {
        self.require("Calibrate", &[AcqState::Initialized])?;
        info!("Calibrating...");
        self.call("Calibrate", |link, dev| link.calibrate(dev))?;
        self.state = AcqState::Calibrated;
        Ok(())
    }

    /// Applies `config` in the order the hardware requires and reads back the
    /// resulting histogram geometry. Calibrates first if that has not happened yet.
    pub fn configure(&mut self, config: &AcquisitionConfig) -> Result<DerivedParameters> {
        self.require(
            "Configure",
            &[
                AcqState::Initialized,
                AcqState::Calibrated,
                AcqState::Configured,
                AcqState::Ready,
            ],
        )?;
        config.validate()?;
        if self.state == AcqState::Initialized {
            self.calibrate()?;
        }
        let channels = self.session.channel_count()?;

        self.call("SetSyncDiv", |link, dev| {
            link.set_sync_div(dev, config.sync_divider)
        })?;
        self.call("SetSyncCFD", |link, dev| {
            link.set_sync_cfd(dev, config.sync_cfd_level, config.sync_cfd_zero_cross)
        })?;
        self.call("SetSyncChannelOffset", |link, dev| {
            link.set_sync_channel_offset(dev, config.sync_channel_offset)
        })?;
        for channel in 0..channels as i32 {
            self.call("SetInputCFD", |link, dev| {
                link.set_input_cfd(
                    dev,
                    channel,
                    config.input_cfd_level,
                    config.input_cfd_zero_cross,
                )
            })?;
            self.call("SetInputChannelOffset", |link, dev| {
                link.set_input_channel_offset(dev, channel, config.input_channel_offset)
            })?;
        }
        let histogram_len = self.call("SetHistoLen", |link, dev| {
            link.set_histo_len(dev, config.histogram_len_code)
        })?;
        self.call("SetBinning", |link, dev| link.set_binning(dev, config.binning))?;
        self.call("SetOffset", |link, dev| link.set_offset(dev, config.offset))?;
        let (stop, stop_count) = match config.stop_overflow {
            Some(count) => (true, count),
            None => (false, u32::MAX),
        };
        self.call("SetStopOverflow", |link, dev| {
            link.set_stop_overflow(dev, stop, stop_count)
        })?;
        let resolution_ps = self.call("GetResolution", |link, dev| link.resolution(dev))?;

        if histogram_len != config.histogram_len() {
            warn!(
                "Device reports {} bins for length code {}, expected {}",
                histogram_len,
                config.histogram_len_code,
                config.histogram_len()
            );
        }
        info!("Histogram length is {}", histogram_len);
        info!("Resolution is {:.1}ps", resolution_ps);
        let derived = DerivedParameters {
            histogram_len,
            resolution_ps,
        };
        self.scratch.resize(histogram_len, 0);
        self.config = Some(config.clone());
        self.derived = Some(derived);
        self.settled_at = Some(Instant::now() + self.timing.settle);
        self.state = AcqState::Configured;
        Ok(derived)
    }

    /// Changes the sync divider of a configured device. Rates are not valid again
    /// until the settle time has passed.
    pub fn set_sync_divider(&mut self, divider: i32) -> Result<()> {
        self.require("SetSyncDiv", &[AcqState::Configured, AcqState::Ready])?;
        validate_sync_divider(divider)?;
        self.call("SetSyncDiv", |link, dev| link.set_sync_div(dev, divider))?;
        if let Some(config) = self.config.as_mut() {
            config.sync_divider = divider;
        }
        self.settled_at = Some(Instant::now() + self.timing.settle);
        Ok(())
    }

    fn wait_settled(&self) {
        if let Some(settled_at) = self.settled_at {
            let now = Instant::now();
            if settled_at > now {
                debug!("Waiting {:?} for rate readings to settle", settled_at - now);
                thread::sleep(settled_at - now);
            }
        }
    }

    pub fn rates(&mut self) -> Result<RateReport> {
        self.require("GetSyncRate", &[AcqState::Configured, AcqState::Ready])?;
        self.wait_settled();
        let channels = self.session.channel_count()?;
        let sync_rate = self.call("GetSyncRate", |link, dev| link.sync_rate(dev))?;
        info!("Syncrate={}/s", sync_rate);
        let mut count_rates = Vec::with_capacity(channels);
        for channel in 0..channels as i32 {
            let rate = self.call("GetCountRate", |link, dev| link.count_rate(dev, channel))?;
            info!("Countrate[{}]={}/s", channel, rate);
            count_rates.push(rate);
        }
        Ok(RateReport {
            sync_rate,
            count_rates,
        })
    }

    /// Reads the rates, which refreshes the device's warning word, then decodes it.
    pub fn check_warnings(&mut self) -> Result<WarningReport> {
        self.rates()?;
        let report = WarningMonitor::new(&self.session).check();
        report.map_err(|e| self.fail(e))
    }

    /// Runs one timed acquisition and reads back every channel.
    ///
    /// Blocks until the device reports completion. The device free-runs until its
    /// timer expires, so the elapsed time is slightly longer than requested.
    ///
    /// An abort requested before the call cancels the run without touching the device.
    /// The abort flag is cleared once a run has honoured it.
    pub fn run(&mut self, request: AcquisitionRequest) -> Result<HistogramResult> {
        self.require("Run", &[AcqState::Configured, AcqState::Ready])?;
        let derived = self.derived.ok_or(Error::PreconditionViolation {
            operation: "Run",
            state: self.state,
        })?;
        let channels = self.session.channel_count()?;
        let tacq = request.time_ms();
        if self.abort.is_aborted() {
            self.abort.reset();
            warn!("Abort pending, measurement not started");
            return Err(Error::Aborted);
        }

        self.call("ClearHistMem", |link, dev| link.clear_hist_mem(dev))?;
        self.state = AcqState::Measuring;
        let started = Instant::now();
        self.call("StartMeas", |link, dev| link.start_meas(dev, tacq as i32))?;
        info!("Measuring for {} milliseconds...", tacq);

        debug!("Polling HH_CTCStatus({})", self.session.dev_index());
        let mut polls = 0usize;
        loop {
            polls += 1;
            if self.measurement_done()? {
                break;
            }
            if self.abort.is_aborted() {
                self.abort.reset();
                self.stop_measurement()?;
                warn!("Measurement aborted after {:?}", started.elapsed());
                return Err(Error::Aborted);
            }
            if let Some(interval) = self.timing.poll_interval {
                thread::sleep(interval);
            }
        }
        let elapsed = started.elapsed();
        debug!("Measurement complete after {} polls", polls);
        self.stop_measurement()?;

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(derived.histogram_len, 0);
        let mut counts = Array2::<u32>::zeros((channels, derived.histogram_len));
        for channel in 0..channels {
            self.call("GetHistogram", |link, dev| {
                link.histogram(dev, channel as i32, &mut scratch)
            })?;
            counts
                .row_mut(channel)
                .assign(&ArrayView1::from(&scratch[..]));
        }
        self.scratch = scratch;

        let flags = self.call("GetFlags", |link, dev| link.flags(dev))?;
        let overflow = flags & FLAG_OVERFLOW != 0;

        let result = HistogramResult::new(counts, overflow, tacq, elapsed, derived.resolution_ps);
        for (channel, integral) in result.channel_integrals().iter().enumerate() {
            info!("  Integralcount[{}]={}", channel, integral);
        }
        if overflow {
            warn!("  Overflow.");
        }
        Ok(result)
    }

    /// Stops any running measurement and releases the device. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.state != AcqState::Closed {
            info!("Closing device {}", self.session.dev_index());
        }
        self.release();
    }
}

impl<L: HardwareLink> Drop for AcquisitionController<L> {
    fn drop(&mut self) {
        self.release();
    }
}
