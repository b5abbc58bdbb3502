//! Client library for SINC spectroscopy / digital-pulse-processor devices.
//!
//! Speaks the length-framed binary protocol over TCP, with an auxiliary UDP
//! channel for high-rate histogram snapshots. One [`Sinc`] per device; a
//! process may hold many and monitor them together with [`peek_multi`]. The
//! caller drives all I/O — nothing here spawns threads.
//!
//! ```no_run
//! use sinc::Sinc;
//!
//! let mut device = Sinc::new();
//! device.set_timeout(5000);
//! device.connect("10.0.0.42", sinc_proto::SINC_PORT)?;
//! device.ping(false)?;
//! let calibration = device.calibrate(0)?;
//! println!("calibrated {} samples", calibration.example_pulse.len());
//! # Ok::<(), sinc::SincError>(())
//! ```

mod buffer;
mod commands;
pub mod decode;
pub mod encode;
mod error;
mod framing;
mod multi;
mod project;
mod sinc;
mod socket;
mod types;

pub use buffer::SincBuffer;
pub use error::{SincError, SincResult};
pub use multi::peek_multi;
pub use sinc::Sinc;
pub use types::{
    key_value_of, make_key_value, CalibrationInfo, CalibrationPlot, CalibrationProgress,
    CrashDump, DcOffsetResult, HistogramCapture, HistogramStats, ListModeCapture,
    OscilloscopeCapture, OscilloscopePlot, ParamValue,
};

pub use sinc_proto as proto;
