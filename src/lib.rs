//! Histogram-mode acquisition control for HydraHarp-class TCSPC instruments.
//!
//! A [`DeviceRegistry`] finds and opens a device, an [`AcquisitionController`] takes it
//! through initialisation, calibration and configuration, and each
//! [`AcquisitionController::run`] yields an immutable [`HistogramResult`].

mod config;
mod controller;
mod error;
mod hhlib;
mod histogram;
mod registry;
mod session;
mod sim;
mod warnings;
mod writer;

#[cfg(test)]
mod testing;

pub use config::*;
pub use controller::*;
pub use error::*;
pub use hhlib::*;
pub use histogram::*;
pub use registry::*;
pub use session::*;
pub use sim::*;
pub use warnings::*;
pub use writer::*;
