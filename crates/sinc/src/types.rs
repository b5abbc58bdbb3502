//! Owned value types handed back to callers.
//!
//! Decoders copy everything out of the protobuf carriers eagerly, so nothing
//! here borrows from a packet buffer and a failed decode can never leak a
//! half-built result.

use sinc_proto::{HistogramTrigger, KeyValue, ParamType};

/// One pulse-shape plot; `x` and `y` always have equal length.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CalibrationPlot {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl CalibrationPlot {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Build a plot from bare `y` values, regenerating `x` as `0..n-1`.
    pub fn from_y(y: Vec<f64>) -> Self {
        let x = (0..y.len()).map(|i| i as f64).collect();
        Self { x, y }
    }
}

/// The opaque calibration blob plus its three pulse shapes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CalibrationInfo {
    pub channel_id: i32,
    pub data: Vec<u8>,
    pub example_pulse: CalibrationPlot,
    pub model_pulse: CalibrationPlot,
    pub final_pulse: CalibrationPlot,
}

impl CalibrationInfo {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
            && self.example_pulse.is_empty()
            && self.model_pulse.is_empty()
            && self.final_pulse.is_empty()
    }
}

/// Progress report emitted while a calibration runs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CalibrationProgress {
    pub channel_id: i32,
    pub progress: f64,
    pub complete: bool,
    pub stage: Option<String>,
}

/// Histogram statistics accompanying every histogram update, over either
/// transport.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistogramStats {
    pub data_set_id: u64,
    pub time_elapsed: f64,
    pub samples_detected: u64,
    pub samples_erased: u64,
    pub pulses_accepted: u64,
    pub pulses_rejected: u64,
    pub input_count_rate: f64,
    pub output_count_rate: f64,
    pub dead_time: f64,
    pub gate_state: i32,
    pub spectrum_selection_mask: u32,
    pub subregion_start_index: u32,
    pub subregion_end_index: u32,
    pub refresh_rate: u32,
    pub positive_rail_hit_count: u32,
    pub negative_rail_hit_count: u32,
    pub trigger: HistogramTrigger,
    pub intensity: Vec<u32>,
}

/// One histogram update: the selected spectra plus statistics.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistogramCapture {
    pub channel_id: i32,
    pub accepted: Option<Vec<u32>>,
    pub rejected: Option<Vec<u32>>,
    pub stats: HistogramStats,
}

/// One oscilloscope plot. Depending on firmware the waveform arrives as
/// normalised doubles, raw integers, or both.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OscilloscopePlot {
    pub data: Vec<f64>,
    pub int_data: Vec<i32>,
    pub min_range: i32,
    pub max_range: i32,
}

/// One oscilloscope capture: raw and reset-blanked curves.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OscilloscopeCapture {
    pub channel_id: i32,
    pub data_set_id: u64,
    pub raw: OscilloscopePlot,
    pub reset_blanked: OscilloscopePlot,
}

/// One list-mode data block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListModeCapture {
    pub channel_id: i32,
    pub data_set_id: u64,
    pub data: Vec<u8>,
}

/// Result of a DC-offset calculation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DcOffsetResult {
    pub channel_id: i32,
    pub dc_offset: f64,
}

/// A crash dump downloaded from the device.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CrashDump {
    pub new_dump: bool,
    pub data: Vec<u8>,
}

/// A typed parameter value.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// A selection from an enumerated option set.
    Opt(String),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Int(_) => ParamType::IntType,
            ParamValue::Float(_) => ParamType::FloatType,
            ParamValue::Bool(_) => ParamType::BoolType,
            ParamValue::Str(_) => ParamType::StringType,
            ParamValue::Opt(_) => ParamType::OptionType,
        }
    }
}

/// Build a wire `KeyValue` from a typed value. A negative `channel_id` means
/// "no channel" (instrument level or the connection's default).
pub fn make_key_value(channel_id: i32, key: &str, value: ParamValue) -> KeyValue {
    let mut kv = KeyValue {
        channel_id: (channel_id >= 0).then_some(channel_id as u32),
        key: Some(key.to_owned()),
        param_type: Some(value.param_type() as i32),
        ..Default::default()
    };
    match value {
        ParamValue::Int(v) => kv.int_val = Some(v),
        ParamValue::Float(v) => kv.float_val = Some(v),
        ParamValue::Bool(v) => kv.bool_val = Some(v),
        ParamValue::Str(v) => kv.str_val = Some(v),
        ParamValue::Opt(v) => kv.option_val = Some(v),
    }
    kv
}

/// Extract the typed value from a wire `KeyValue`, if it carries one.
pub fn key_value_of(kv: &KeyValue) -> Option<ParamValue> {
    if let Some(v) = kv.int_val {
        Some(ParamValue::Int(v))
    } else if let Some(v) = kv.float_val {
        Some(ParamValue::Float(v))
    } else if let Some(v) = kv.bool_val {
        Some(ParamValue::Bool(v))
    } else if let Some(v) = &kv.str_val {
        Some(ParamValue::Str(v.clone()))
    } else {
        kv.option_val.as_ref().map(|v| ParamValue::Opt(v.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plot_from_y_regenerates_x() {
        let plot = CalibrationPlot::from_y(vec![5.0, 6.0, 7.0]);
        assert_eq!(plot.x, vec![0.0, 1.0, 2.0]);
        assert_eq!(plot.len(), 3);
    }

    #[test]
    fn test_make_key_value_roundtrip() {
        let kv = make_key_value(2, "histogram.binCount", ParamValue::Int(4096));
        assert_eq!(kv.channel_id, Some(2));
        assert_eq!(key_value_of(&kv), Some(ParamValue::Int(4096)));

        let kv = make_key_value(-1, "histogram.datagram.ip", ParamValue::Str(String::new()));
        assert_eq!(kv.channel_id, None);
        assert_eq!(key_value_of(&kv), Some(ParamValue::Str(String::new())));
    }

    #[test]
    fn test_option_value_distinct_from_string() {
        let kv = make_key_value(0, "channel.state", ParamValue::Opt("ready".into()));
        assert_eq!(kv.param_type, Some(ParamType::OptionType as i32));
        assert_eq!(key_value_of(&kv), Some(ParamValue::Opt("ready".into())));
    }
}
