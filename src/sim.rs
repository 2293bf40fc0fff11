//! An in-process stand-in for the instrument, used when no hardware is attached.
//!
//! Histograms are a fluorescence decay (exponential after a prompt peak) on a flat
//! background, with photon counts drawn at the configured count rate.

use crate::{
    HHReturn, HardwareInfo, HardwareLink, LinkResult, FLAG_OVERFLOW, HHMAXINPCHAN, LIB_VERSION,
    WARNING_DIVIDER_GREATER_ONE, WARNING_SYNC_RATE_ZERO, WARNING_TIME_SPAN_TOO_SMALL,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

const SYNC_RATE_HZ: i32 = 40_000_000;
const BASE_RESOLUTION_PS: f64 = 1.0;
const DECAY_TIME_PS: f64 = 2_500.0;
const PROMPT_DELAY_PS: f64 = 3_000.0;
const BACKGROUND_FRACTION: f64 = 0.05;
const MAX_PHOTONS: u64 = 2_000_000;

#[derive(Default)]
struct SimDevice {
    initialized: bool,
    calibrated: bool,
    sync_div: i32,
    histo_len: usize,
    binning: i32,
    offset_ns: i32,
    stop_count: Option<u32>,
    measurement: Option<(Instant, Duration)>,
    histograms: Vec<Vec<u32>>,
    overflow: bool,
}

pub struct SimLink {
    serials: Vec<Option<String>>,
    channels: usize,
    count_rate: i32,
    devices: Mutex<HashMap<i32, SimDevice>>,
    rng: Mutex<StdRng>,
}

impl SimLink {
    /// One simulated device in slot 0.
    pub fn new(channels: usize) -> Self {
        Self::with_slots(vec![Some("1012345".to_string())], channels)
    }

    /// `serials[i]` is the serial number of the device in slot `i`, if any.
    pub fn with_slots(serials: Vec<Option<String>>, channels: usize) -> Self {
        Self {
            serials,
            channels: channels.min(HHMAXINPCHAN),
            count_rate: 50_000,
            devices: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_count_rate(mut self, count_rate: i32) -> Self {
        self.count_rate = count_rate;
        self
    }

    fn with_device<T>(
        &self,
        dev: i32,
        f: impl FnOnce(&mut SimDevice) -> LinkResult<T>,
    ) -> LinkResult<T> {
        let mut devices = self
            .devices
            .lock()
            .map_err(|_| HHReturn::StatusFail as i32)?;
        let device = devices
            .get_mut(&dev)
            .ok_or(HHReturn::DeviceNotOpen as i32)?;
        f(device)
    }

    fn with_initialized<T>(
        &self,
        dev: i32,
        f: impl FnOnce(&mut SimDevice) -> LinkResult<T>,
    ) -> LinkResult<T> {
        self.with_device(dev, |device| {
            if !device.initialized {
                return Err(HHReturn::NotInitialized as i32);
            }
            f(device)
        })
    }

    fn resolution_ps(binning: i32) -> f64 {
        BASE_RESOLUTION_PS * f64::from(1u32 << binning)
    }

    fn fill_histograms(&self, device: &mut SimDevice, tacq: Duration) -> LinkResult<()> {
        let mut rng = self.rng.lock().map_err(|_| HHReturn::StatusFail as i32)?;
        let resolution = Self::resolution_ps(device.binning);
        let offset_ps = f64::from(device.offset_ns) * 1000.0;
        let span_ps = resolution * device.histo_len as f64;
        let photons = ((f64::from(self.count_rate) * tacq.as_secs_f64()) as u64).min(MAX_PHOTONS);

        device.overflow = false;
        for histogram in device.histograms.iter_mut() {
            histogram.clear();
            histogram.resize(device.histo_len, 0);
            for _ in 0..photons {
                let arrival = if rng.random::<f64>() < BACKGROUND_FRACTION {
                    rng.random::<f64>() * span_ps + offset_ps
                } else {
                    let u: f64 = rng.random_range(f64::EPSILON..1.0);
                    PROMPT_DELAY_PS - DECAY_TIME_PS * u.ln()
                };
                let bin = ((arrival - offset_ps) / resolution).floor();
                if bin < 0.0 || bin >= device.histo_len as f64 {
                    continue;
                }
                let count = &mut histogram[bin as usize];
                *count = count.saturating_add(1);
                if let Some(stop) = device.stop_count {
                    if *count >= stop {
                        device.overflow = true;
                    }
                }
            }
        }
        Ok(())
    }
}

impl HardwareLink for SimLink {
    fn max_devices(&self) -> i32 {
        self.serials.len() as i32
    }

    fn library_version(&self) -> LinkResult<String> {
        Ok(LIB_VERSION.to_string())
    }

    fn error_string(&self, code: i32) -> String {
        format!("HH_ERROR_{:?}", HHReturn::from(code))
    }

    fn open_device(&self, slot: i32) -> LinkResult<String> {
        let serial = match self.serials.get(slot as usize) {
            Some(Some(serial)) => serial.clone(),
            _ => return Err(HHReturn::DeviceOpenFail as i32),
        };
        let mut devices = self
            .devices
            .lock()
            .map_err(|_| HHReturn::StatusFail as i32)?;
        if devices.contains_key(&slot) {
            return Err(HHReturn::DeviceBusy as i32);
        }
        devices.insert(slot, SimDevice::default());
        Ok(serial)
    }

    fn close_device(&self, dev: i32) -> LinkResult<()> {
        self.devices
            .lock()
            .map_err(|_| HHReturn::StatusFail as i32)?
            .remove(&dev);
        Ok(())
    }

    fn initialize(&self, dev: i32, mode: i32, refsource: i32) -> LinkResult<()> {
        if mode != crate::MODE_HIST {
            return Err(HHReturn::InvalidMode as i32);
        }
        if !(0..=1).contains(&refsource) {
            return Err(HHReturn::InvalidArgument as i32);
        }
        let channels = self.channels;
        self.with_device(dev, |device| {
            *device = SimDevice {
                initialized: true,
                sync_div: 1,
                histo_len: crate::MAXHISTLEN,
                histograms: vec![Vec::new(); channels],
                ..SimDevice::default()
            };
            Ok(())
        })
    }

    fn hardware_info(&self, dev: i32) -> LinkResult<HardwareInfo> {
        self.with_initialized(dev, |_| {
            Ok(HardwareInfo {
                model: "HydraHarp 400 (simulated)".to_string(),
                part_number: "930004".to_string(),
                version: "2.0".to_string(),
            })
        })
    }

    fn num_input_channels(&self, dev: i32) -> LinkResult<usize> {
        let channels = self.channels;
        self.with_initialized(dev, |_| Ok(channels))
    }

    fn calibrate(&self, dev: i32) -> LinkResult<()> {
        self.with_initialized(dev, |device| {
            device.calibrated = true;
            Ok(())
        })
    }

    fn set_sync_div(&self, dev: i32, div: i32) -> LinkResult<()> {
        self.with_initialized(dev, |device| {
            device.sync_div = div;
            Ok(())
        })
    }

    fn set_sync_cfd(&self, dev: i32, _level: i32, _zero_cross: i32) -> LinkResult<()> {
        self.with_initialized(dev, |_| Ok(()))
    }

    fn set_sync_channel_offset(&self, dev: i32, _offset: i32) -> LinkResult<()> {
        self.with_initialized(dev, |_| Ok(()))
    }

    fn set_input_cfd(
        &self,
        dev: i32,
        channel: i32,
        _level: i32,
        _zero_cross: i32,
    ) -> LinkResult<()> {
        let channels = self.channels;
        self.with_initialized(dev, |_| {
            if channel < 0 || channel as usize >= channels {
                return Err(HHReturn::InvalidArgument as i32);
            }
            Ok(())
        })
    }

    fn set_input_channel_offset(&self, dev: i32, channel: i32, _offset: i32) -> LinkResult<()> {
        let channels = self.channels;
        self.with_initialized(dev, |_| {
            if channel < 0 || channel as usize >= channels {
                return Err(HHReturn::InvalidArgument as i32);
            }
            Ok(())
        })
    }

    fn set_histo_len(&self, dev: i32, len_code: i32) -> LinkResult<usize> {
        self.with_initialized(dev, |device| {
            if !(0..=crate::MAXLENCODE).contains(&len_code) {
                return Err(HHReturn::InvalidArgument as i32);
            }
            device.histo_len = 1024 << len_code;
            Ok(device.histo_len)
        })
    }

    fn set_binning(&self, dev: i32, binning: i32) -> LinkResult<()> {
        self.with_initialized(dev, |device| {
            device.binning = binning;
            Ok(())
        })
    }

    fn set_offset(&self, dev: i32, offset: i32) -> LinkResult<()> {
        self.with_initialized(dev, |device| {
            device.offset_ns = offset;
            Ok(())
        })
    }

    fn set_stop_overflow(&self, dev: i32, stop: bool, stop_count: u32) -> LinkResult<()> {
        self.with_initialized(dev, |device| {
            device.stop_count = stop.then_some(stop_count);
            Ok(())
        })
    }

    fn resolution(&self, dev: i32) -> LinkResult<f64> {
        self.with_initialized(dev, |device| Ok(Self::resolution_ps(device.binning)))
    }

    fn sync_rate(&self, dev: i32) -> LinkResult<i32> {
        self.with_initialized(dev, |device| Ok(SYNC_RATE_HZ / device.sync_div.max(1)))
    }

    fn count_rate(&self, dev: i32, _channel: i32) -> LinkResult<i32> {
        let count_rate = self.count_rate;
        self.with_initialized(dev, |_| Ok(count_rate))
    }

    fn clear_hist_mem(&self, dev: i32) -> LinkResult<()> {
        self.with_initialized(dev, |device| {
            device.histograms.iter_mut().for_each(|h| h.clear());
            device.overflow = false;
            Ok(())
        })
    }

    fn start_meas(&self, dev: i32, tacq_ms: i32) -> LinkResult<()> {
        self.with_initialized(dev, |device| {
            if !device.calibrated {
                return Err(HHReturn::NotCalibrated as i32);
            }
            if tacq_ms < 1 {
                return Err(HHReturn::InvalidArgument as i32);
            }
            if device.measurement.is_some() {
                return Err(HHReturn::InstanceRunning as i32);
            }
            device.measurement = Some((Instant::now(), Duration::from_millis(tacq_ms as u64)));
            Ok(())
        })
    }

    fn ctc_status(&self, dev: i32) -> LinkResult<bool> {
        self.with_initialized(dev, |device| {
            Ok(match device.measurement {
                Some((started, tacq)) => started.elapsed() >= tacq,
                None => true,
            })
        })
    }

    fn stop_meas(&self, dev: i32) -> LinkResult<()> {
        let mut devices = self
            .devices
            .lock()
            .map_err(|_| HHReturn::StatusFail as i32)?;
        let device = devices
            .get_mut(&dev)
            .ok_or(HHReturn::DeviceNotOpen as i32)?;
        if let Some((started, tacq)) = device.measurement.take() {
            // A stopped measurement holds the photons collected so far.
            self.fill_histograms(device, started.elapsed().min(tacq))?;
        }
        Ok(())
    }

    fn histogram(&self, dev: i32, channel: i32, counts: &mut [u32]) -> LinkResult<()> {
        self.with_initialized(dev, |device| {
            let histogram = device
                .histograms
                .get(channel as usize)
                .ok_or(HHReturn::InvalidArgument as i32)?;
            counts.fill(0);
            for (dst, src) in counts.iter_mut().zip(histogram) {
                *dst = *src;
            }
            Ok(())
        })
    }

    fn flags(&self, dev: i32) -> LinkResult<i32> {
        self.with_initialized(dev, |device| {
            Ok(if device.overflow { FLAG_OVERFLOW } else { 0 })
        })
    }

    fn warnings(&self, dev: i32) -> LinkResult<i32> {
        self.with_initialized(dev, |device| {
            let sync_rate = SYNC_RATE_HZ / device.sync_div.max(1);
            let mut bits = 0;
            if sync_rate == 0 {
                bits |= WARNING_SYNC_RATE_ZERO;
            }
            if device.sync_div > 1 {
                bits |= WARNING_DIVIDER_GREATER_ONE;
            }
            let span_ps = Self::resolution_ps(device.binning) * device.histo_len as f64;
            let period_ps = 1e12 / f64::from(sync_rate.max(1));
            if span_ps < period_ps {
                bits |= WARNING_TIME_SPAN_TOO_SMALL;
            }
            Ok(bits)
        })
    }

    fn warnings_text(&self, dev: i32, warnings: i32) -> LinkResult<String> {
        self.with_initialized(dev, |_| {
            let report = crate::WarningReport {
                bits: warnings,
                text: String::new(),
            };
            Ok(report
                .warnings()
                .iter()
                .map(|w| format!("WARNING: {w}"))
                .collect::<Vec<_>>()
                .join("\n"))
        })
    }
}
