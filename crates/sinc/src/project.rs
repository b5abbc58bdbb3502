//! Project-file load and save.
//!
//! A project file captures the entire state of a device as JSON (by
//! convention with a `.siprj` extension): instrument-level parameters, a
//! `channels` array of per-channel parameters, and each channel's
//! calibration (the blob as base64, the three pulse shapes as bare `y`
//! arrays; `x` axes are regenerated on load). Loading round-trips through a
//! live device: the firmware's own parameter details decide which keys are
//! settable and what type each value has.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map, Number, Value};
use sinc_proto::{ErrorCode, KeyValue, ListParamDetailsResponse, ParamDetails, ParamType};
use tracing::debug;

use crate::error::{SincError, SincResult};
use crate::sinc::Sinc;
use crate::types::{make_key_value, CalibrationInfo, CalibrationPlot, ParamValue};

/// Sentinel identifying a project file.
const FILE_TYPE: &str = "SiToro Project";
const CALIB_PREFIX: &str = "calibration.";
const FIRMWARE_VERSION_KEY: &str = "instrument.firmwareVersion";

/// Everything a load accumulates before talking to the device.
#[derive(Default)]
struct DeviceSettings {
    params: Vec<KeyValue>,
    firmware_version: Option<String>,
    calibrations: BTreeMap<i32, CalibrationInfo>,
}

fn bad(detail: &str) -> SincError {
    SincError::with_message(ErrorCode::ReadFailed, format!("bad project file - {detail}"))
}

fn find_param_details<'a>(
    details: &'a ListParamDetailsResponse,
    key: &str,
) -> Option<&'a ParamDetails> {
    details
        .param_details
        .iter()
        .find(|pd| pd.kv.as_ref().and_then(|kv| kv.key.as_deref()) == Some(key))
}

fn is_settable(pd: &ParamDetails) -> bool {
    pd.settable.unwrap_or(false)
}

fn is_instrument_level(pd: &ParamDetails) -> bool {
    pd.instrument_level.unwrap_or(false)
}

fn json_as_string(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_owned(),
        None => value.to_string(),
    }
}

/// Decode a JSON scalar into the parameter's firmware-declared type.
/// Unknown or typeless parameters are dropped rather than guessed at.
fn decode_param_value(pd: &ParamDetails, channel_id: i32, key: &str, value: &Value) -> Option<KeyValue> {
    let declared = pd.kv.as_ref()?.param_type();
    let parsed = match declared {
        ParamType::BoolType => {
            let b = value.as_bool().unwrap_or_else(|| value.as_str() == Some("true"));
            ParamValue::Bool(b)
        }
        ParamType::IntType => {
            let v = value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f as i64))
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))?;
            ParamValue::Int(v)
        }
        ParamType::FloatType => {
            let mut v = value
                .as_f64()
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))?;
            // Old save files can carry a negative detection threshold the
            // firmware no longer accepts.
            if key == "pulse.detectionThreshold" && v < 0.0 {
                v = 0.0;
            }
            ParamValue::Float(v)
        }
        ParamType::StringType => ParamValue::Str(json_as_string(value)),
        ParamType::OptionType => ParamValue::Opt(json_as_string(value)),
        ParamType::NoType => return None,
    };
    Some(make_key_value(channel_id, key, parsed))
}

fn parse_calibration_entry(
    key: &str,
    value: &Value,
    calibration: &mut CalibrationInfo,
) -> SincResult<()> {
    if key == "calibration.data" {
        let Some(encoded) = value.as_str() else {
            return Err(bad("calibration data must be a string"));
        };
        calibration.data = BASE64
            .decode(encoded)
            .map_err(|_| bad("calibration data is not valid base64"))?;
        return Ok(());
    }

    let Some(values) = value.as_array() else {
        return Err(bad("calibration vector must be an array"));
    };
    let mut y = Vec::with_capacity(values.len());
    for entry in values {
        let Some(v) = entry.as_f64() else {
            return Err(bad("calibration vector values must be numbers"));
        };
        y.push(v);
    }

    let plot = match key {
        "calibration.exampleShape.y" => &mut calibration.example_pulse,
        "calibration.modelShape.y" => &mut calibration.model_pulse,
        "calibration.finalShape.y" => &mut calibration.final_pulse,
        // Unknown calibration vectors are validated but not kept.
        _ => return Ok(()),
    };
    *plot = CalibrationPlot::from_y(y);
    Ok(())
}

fn parse_channel(
    value: &Value,
    details: &ListParamDetailsResponse,
    settings: &mut DeviceSettings,
) -> SincResult<()> {
    let Some(map) = value.as_object() else {
        return Err(bad("expected channel to be an object"));
    };

    let mut channel_id = 0i32;
    if let Some(id) = map.get("_channelId").or_else(|| map.get("_channel")) {
        channel_id = id.as_i64().ok_or_else(|| bad("channel id must be a number"))? as i32;
    }
    if channel_id < 0 {
        return Err(bad("invalid channel id"));
    }

    for (key, value) in map {
        if key == "_channelId" || key == "_channel" {
            continue;
        }
        if key.starts_with(CALIB_PREFIX) {
            let calibration = settings.calibrations.entry(channel_id).or_default();
            parse_calibration_entry(key, value, calibration)?;
        } else if key == "regions" {
            // Legacy region blocks are tolerated and skipped.
            if !value.is_array() {
                return Err(bad("regions must be an array"));
            }
        } else if let Some(pd) = find_param_details(details, key) {
            if !is_instrument_level(pd) && is_settable(pd) {
                if let Some(kv) = decode_param_value(pd, channel_id, key, value) {
                    settings.params.push(kv);
                }
            }
        }
    }
    Ok(())
}

fn parse_project(
    doc: &Value,
    details: &ListParamDetailsResponse,
    settings: &mut DeviceSettings,
) -> SincResult<()> {
    let Some(top) = doc.as_object() else {
        return Err(bad("expected object at top level"));
    };

    for (key, value) in top {
        if key == "channels" {
            let Some(channels) = value.as_array() else {
                return Err(bad("'channels' should be an array"));
            };
            for channel in channels {
                parse_channel(channel, details, settings)?;
            }
            continue;
        }

        let Some(pd) = find_param_details(details, key) else {
            continue;
        };
        if !is_instrument_level(pd) {
            continue;
        }
        if is_settable(pd) {
            if let Some(kv) = decode_param_value(pd, -1, key, value) {
                settings.params.push(kv);
            }
        } else if key == FIRMWARE_VERSION_KEY {
            // Not settable, but the bulk set needs to know which firmware
            // wrote the file so defaults can be upgraded.
            settings.firmware_version = Some(json_as_string(value));
        }
    }
    Ok(())
}

/// Render a float the way parameter files expect: integral values lose the
/// decimal point, everything else keeps full precision.
fn float_to_json(v: f64) -> Value {
    if v.is_finite() && v.fract() == 0.0 && (i64::MIN as f64..=i64::MAX as f64).contains(&v) {
        Value::Number(Number::from(v as i64))
    } else {
        Number::from_f64(v).map_or(Value::Null, Value::Number)
    }
}

fn kv_to_json(kv: &KeyValue) -> Value {
    match kv.param_type() {
        ParamType::IntType => kv.int_val.map_or(Value::Null, |v| Value::Number(Number::from(v))),
        ParamType::FloatType => kv.float_val.map_or(Value::Null, float_to_json),
        ParamType::BoolType => kv.bool_val.map_or(Value::Null, Value::Bool),
        ParamType::StringType => kv.str_val.clone().map_or(Value::Null, Value::String),
        ParamType::OptionType => kv.option_val.clone().map_or(Value::Null, Value::String),
        ParamType::NoType => Value::Null,
    }
}

fn plot_to_json(plot: &CalibrationPlot) -> Value {
    Value::Array(plot.y.iter().map(|&v| float_to_json(v)).collect())
}

/// Build one channel object: `_channelId`, the settable channel-level
/// parameters in firmware order, with the calibration block spliced in where
/// `"calibration."` sorts.
fn save_channel(
    details: &ListParamDetailsResponse,
    calibration: &CalibrationInfo,
    channel_id: i32,
) -> Value {
    let channel_params: Vec<&ParamDetails> = details
        .param_details
        .iter()
        .filter(|pd| !is_instrument_level(pd))
        .collect();

    let mut calib_loc = 0usize;
    for (i, pd) in channel_params.iter().enumerate() {
        if let Some(key) = pd.kv.as_ref().and_then(|kv| kv.key.as_deref()) {
            if key < CALIB_PREFIX {
                calib_loc = i;
            }
        }
    }

    let mut map = Map::new();
    map.insert("_channelId".to_owned(), Value::Number(Number::from(channel_id)));

    for (i, pd) in channel_params.iter().enumerate() {
        if is_settable(pd) {
            if let Some(kv) = &pd.kv {
                if let Some(key) = kv.key.as_deref() {
                    map.insert(key.to_owned(), kv_to_json(kv));
                }
            }
        }

        if i == calib_loc && !calibration.data.is_empty() {
            map.insert("calibration.data".to_owned(), Value::String(BASE64.encode(&calibration.data)));
            map.insert("calibration.exampleShape.y".to_owned(), plot_to_json(&calibration.example_pulse));
            map.insert("calibration.modelShape.y".to_owned(), plot_to_json(&calibration.model_pulse));
            map.insert("calibration.finalShape.y".to_owned(), plot_to_json(&calibration.final_pulse));
        }
    }

    Value::Object(map)
}

fn save_instrument(details: &ListParamDetailsResponse, map: &mut Map<String, Value>) {
    for pd in &details.param_details {
        if !is_instrument_level(pd) {
            continue;
        }
        if let Some(kv) = &pd.kv {
            if let Some(key) = kv.key.as_deref() {
                map.insert(key.to_owned(), kv_to_json(kv));
            }
        }
    }
}

impl Sinc {
    /// Load a project file and restore it to the device: every settable
    /// parameter in one bulk set (so omitted parameters revert to upgraded
    /// defaults), then each channel's calibration.
    pub fn project_load(&mut self, path: impl AsRef<Path>) -> SincResult<()> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                return Err(self.set_read_error(SincError::with_message(
                    ErrorCode::ReadFailed,
                    format!("can't open project file - {err}"),
                )));
            }
        };
        let doc: Value = match serde_json::from_str(&text) {
            Ok(doc) => doc,
            Err(err) => {
                return Err(self.set_read_error(SincError::with_message(
                    ErrorCode::ReadFailed,
                    format!("invalid json in project file - {err}"),
                )));
            }
        };

        // The firmware's parameter details are authoritative for what is
        // settable and what type each key has.
        let (details, _) = self.list_param_details(0, "")?;

        let mut settings = DeviceSettings::default();
        if let Err(err) = parse_project(&doc, &details, &mut settings) {
            return Err(self.set_read_error(err));
        }
        debug!(params = settings.params.len(), channels = settings.calibrations.len(), "project parsed");

        let firmware_version = settings.firmware_version.clone().unwrap_or_default();
        self.set_all_params(-1, &settings.params, &firmware_version)?;

        for (channel_id, calibration) in &settings.calibrations {
            if !calibration.is_empty() {
                self.set_calibration(*channel_id, calibration)?;
            }
        }
        Ok(())
    }

    /// Read the device's full state and write it as a project file.
    pub fn project_save(&mut self, path: impl AsRef<Path>) -> SincResult<()> {
        let Some(peer) = self.peer_address() else {
            return Err(self.set_read_error(SincError::with_message(
                ErrorCode::ReadFailed,
                "can't get device address",
            )));
        };

        let num_channels = match self.get_param_value(0, "instrument.numChannels")? {
            Some(ParamValue::Int(n)) if n >= 0 => n as i32,
            _ => {
                return Err(self.set_write_error(SincError::with_message(
                    ErrorCode::WriteFailed,
                    "invalid response when getting the number of channels from the device",
                )));
            }
        };

        let mut channels = Vec::with_capacity(num_channels as usize);
        for channel_id in 0..num_channels {
            let (details, _) = self.list_param_details(channel_id, "")?;
            // Calibration is best-effort: an uncalibrated channel still
            // saves, just without a calibration block.
            let calibration = self.get_calibration(channel_id).unwrap_or_default();
            channels.push(save_channel(&details, &calibration, channel_id));
        }

        let (details, _) = self.list_param_details(0, "")?;

        let mut doc = Map::new();
        doc.insert("_fileType".to_owned(), Value::String(FILE_TYPE.to_owned()));
        doc.insert("address".to_owned(), Value::String(peer.ip().to_string()));
        doc.insert("channels".to_owned(), Value::Array(channels));
        save_instrument(&details, &mut doc);

        let text = match serde_json::to_string_pretty(&Value::Object(doc)) {
            Ok(text) => text,
            Err(err) => {
                return Err(self
                    .set_write_error(SincError::with_message(ErrorCode::WriteFailed, err.to_string())));
            }
        };
        if let Err(err) = fs::write(path, text) {
            return Err(self.set_write_error(SincError::with_message(
                ErrorCode::WriteFailed,
                format!("can't write project file - {err}"),
            )));
        }
        Ok(())
    }
}
