//! Protobuf message bodies, one per wire message type.
//!
//! These are hand-maintained prost bindings; the authoritative schema is
//! owned by the instrument firmware. All scalar fields are proto2-style
//! optionals so an older device can simply omit what it doesn't know.

use crate::ErrorCode;

/// Parameter value kind declared by the firmware for each key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum ParamType {
    NoType = 0,
    IntType = 1,
    FloatType = 2,
    BoolType = 3,
    StringType = 4,
    OptionType = 5,
}

/// What caused a histogram update to be emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum HistogramTrigger {
    RefreshUpdate = 0,
    GateEvent = 1,
    SoftwareTrigger = 2,
}

/// A (channel, key, typed value) triple. At most one of the value fields is
/// set; `param_type` is the declared type when known.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyValue {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(string, optional, tag = "2")]
    pub key: Option<String>,
    #[prost(int64, optional, tag = "3")]
    pub int_val: Option<i64>,
    #[prost(double, optional, tag = "4")]
    pub float_val: Option<f64>,
    #[prost(bool, optional, tag = "5")]
    pub bool_val: Option<bool>,
    #[prost(string, optional, tag = "6")]
    pub str_val: Option<String>,
    #[prost(string, optional, tag = "7")]
    pub option_val: Option<String>,
    #[prost(enumeration = "ParamType", optional, tag = "8")]
    pub param_type: Option<i32>,
}

/// The in-band success record nested in most replies. `error_code` unset
/// means the operation succeeded.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SuccessResponse {
    #[prost(enumeration = "ErrorCode", optional, tag = "1")]
    pub error_code: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub message: Option<String>,
    #[prost(uint32, optional, tag = "3")]
    pub channel_id: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingCommand {
    #[prost(bool, optional, tag = "1")]
    pub verbose: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetParamCommand {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(string, optional, tag = "2")]
    pub key: Option<String>,
    /// Multi-get form: one (channel, key) pair per entry.
    #[prost(message, repeated, tag = "3")]
    pub chan_keys: Vec<KeyValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetParamResponse {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(message, optional, tag = "2")]
    pub success: Option<SuccessResponse>,
    #[prost(message, repeated, tag = "3")]
    pub results: Vec<KeyValue>,
}

/// Also carries the bulk "set all params" form: `setting_all_params` asks the
/// device to reset anything not named here to its default, upgrading from
/// `from_firmware_version` where defaults have moved.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetParamCommand {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(message, repeated, tag = "2")]
    pub params: Vec<KeyValue>,
    #[prost(bool, optional, tag = "3")]
    pub setting_all_params: Option<bool>,
    #[prost(string, optional, tag = "4")]
    pub from_firmware_version: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ParamUpdatedResponse {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(message, repeated, tag = "2")]
    pub params: Vec<KeyValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AsynchronousErrorResponse {
    #[prost(message, optional, tag = "1")]
    pub success: Option<SuccessResponse>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListParamDetailsCommand {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(string, optional, tag = "2")]
    pub match_prefix: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ParamDetails {
    #[prost(message, optional, tag = "1")]
    pub kv: Option<KeyValue>,
    #[prost(bool, optional, tag = "2")]
    pub settable: Option<bool>,
    #[prost(bool, optional, tag = "3")]
    pub instrument_level: Option<bool>,
    #[prost(string, repeated, tag = "4")]
    pub option_values: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListParamDetailsResponse {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(message, optional, tag = "2")]
    pub success: Option<SuccessResponse>,
    #[prost(message, repeated, tag = "3")]
    pub param_details: Vec<ParamDetails>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartCalibrationCommand {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CalibrationProgressResponse {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(message, optional, tag = "2")]
    pub success: Option<SuccessResponse>,
    #[prost(double, optional, tag = "3")]
    pub progress: Option<f64>,
    #[prost(bool, optional, tag = "4")]
    pub complete: Option<bool>,
    #[prost(string, optional, tag = "5")]
    pub stage: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetCalibrationCommand {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetCalibrationResponse {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(message, optional, tag = "2")]
    pub success: Option<SuccessResponse>,
    /// Opaque calibration blob.
    #[prost(bytes = "vec", optional, tag = "3")]
    pub data: Option<Vec<u8>>,
    #[prost(double, repeated, tag = "4")]
    pub example_x: Vec<f64>,
    #[prost(double, repeated, tag = "5")]
    pub example_y: Vec<f64>,
    #[prost(double, repeated, tag = "6")]
    pub model_x: Vec<f64>,
    #[prost(double, repeated, tag = "7")]
    pub model_y: Vec<f64>,
    #[prost(double, repeated, tag = "8")]
    pub final_x: Vec<f64>,
    #[prost(double, repeated, tag = "9")]
    pub final_y: Vec<f64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetCalibrationCommand {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub data: Option<Vec<u8>>,
    #[prost(double, repeated, tag = "3")]
    pub example_x: Vec<f64>,
    #[prost(double, repeated, tag = "4")]
    pub example_y: Vec<f64>,
    #[prost(double, repeated, tag = "5")]
    pub model_x: Vec<f64>,
    #[prost(double, repeated, tag = "6")]
    pub model_y: Vec<f64>,
    #[prost(double, repeated, tag = "7")]
    pub final_x: Vec<f64>,
    #[prost(double, repeated, tag = "8")]
    pub final_y: Vec<f64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CalculateDcOffsetCommand {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CalculateDcOffsetResponse {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(message, optional, tag = "2")]
    pub success: Option<SuccessResponse>,
    #[prost(double, optional, tag = "3")]
    pub dc_offset: Option<f64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartOscilloscopeCommand {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    /// Legacy capture length, fixed at 8192 for firmware compatibility.
    #[prost(uint32, optional, tag = "2")]
    pub reserved: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OscilloscopePlot {
    #[prost(int32, repeated, tag = "1")]
    pub val: Vec<i32>,
}

/// Header of the oscilloscope bulk payload. The floating-point waveforms ride
/// behind this header as raw little-endian f64 arrays sized by `plot_len`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OscilloscopeDataResponse {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(uint64, optional, tag = "2")]
    pub data_set_id: Option<u64>,
    #[prost(uint32, repeated, tag = "3")]
    pub plot_len: Vec<u32>,
    #[prost(message, repeated, tag = "4")]
    pub plots: Vec<OscilloscopePlot>,
    #[prost(int32, optional, tag = "5")]
    pub min_value_range: Option<i32>,
    #[prost(int32, optional, tag = "6")]
    pub max_value_range: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartHistogramCommand {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    /// Legacy bin count, fixed at 4096 for firmware compatibility.
    #[prost(uint32, optional, tag = "2")]
    pub reserved: Option<u32>,
}

/// Header of the TCP histogram bulk payload. The accepted/rejected count
/// arrays ride behind this header as raw little-endian u32 arrays; which
/// arrays are present, and their lengths, come from `spectrum_selection_mask`
/// and `plot_len`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HistogramDataResponse {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(uint64, optional, tag = "2")]
    pub data_set_id: Option<u64>,
    #[prost(double, optional, tag = "3")]
    pub time_elapsed: Option<f64>,
    #[prost(uint64, optional, tag = "4")]
    pub samples_detected: Option<u64>,
    #[prost(uint64, optional, tag = "5")]
    pub samples_erased: Option<u64>,
    #[prost(uint64, optional, tag = "6")]
    pub pulses_accepted: Option<u64>,
    #[prost(uint64, optional, tag = "7")]
    pub pulses_rejected: Option<u64>,
    #[prost(double, optional, tag = "8")]
    pub input_count_rate: Option<f64>,
    #[prost(double, optional, tag = "9")]
    pub output_count_rate: Option<f64>,
    #[prost(double, optional, tag = "10")]
    pub dead_time_percent: Option<f64>,
    #[prost(uint32, optional, tag = "11")]
    pub gate_state: Option<u32>,
    #[prost(uint32, optional, tag = "12")]
    pub spectrum_selection_mask: Option<u32>,
    #[prost(uint32, optional, tag = "13")]
    pub subregion_start_index: Option<u32>,
    #[prost(uint32, optional, tag = "14")]
    pub subregion_end_index: Option<u32>,
    #[prost(uint32, optional, tag = "15")]
    pub refresh_rate: Option<u32>,
    #[prost(uint32, repeated, tag = "16")]
    pub plot_len: Vec<u32>,
    #[prost(enumeration = "HistogramTrigger", optional, tag = "17")]
    pub trigger: Option<i32>,
    #[prost(uint32, repeated, tag = "18")]
    pub intensity: Vec<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClearHistogramCommand {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TriggerHistogramCommand {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartListModeCommand {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
}

/// Header of the list-mode bulk payload; the event stream follows as raw
/// bytes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListModeDataResponse {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    #[prost(uint64, optional, tag = "2")]
    pub data_set_id: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartFftCommand {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StopDataAcquisitionCommand {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
    /// Skip the optional optimisation phase of calibration.
    #[prost(bool, optional, tag = "2")]
    pub skip: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RestartCommand {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResetSpatialSystemCommand {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MonitorChannelsCommand {
    #[prost(uint32, repeated, tag = "1")]
    pub channel_id: Vec<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProbeDatagramCommand {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckParamConsistencyCommand {
    #[prost(uint32, optional, tag = "1")]
    pub channel_id: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckParamConsistencyResponse {
    #[prost(message, optional, tag = "1")]
    pub success: Option<SuccessResponse>,
    #[prost(bool, optional, tag = "2")]
    pub consistent: Option<bool>,
    #[prost(string, optional, tag = "3")]
    pub bad_key: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SoftwareUpdateFile {
    #[prost(string, optional, tag = "1")]
    pub file_name: Option<String>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub content: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SoftwareUpdateCommand {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub app_image: Option<Vec<u8>>,
    #[prost(string, optional, tag = "2")]
    pub app_checksum: Option<String>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub fpga_image: Option<Vec<u8>>,
    #[prost(string, optional, tag = "4")]
    pub fpga_checksum: Option<String>,
    #[prost(message, repeated, tag = "5")]
    pub update_files: Vec<SoftwareUpdateFile>,
    #[prost(bool, optional, tag = "6")]
    pub auto_restart: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SoftwareUpdateCompleteResponse {
    #[prost(message, optional, tag = "1")]
    pub success: Option<SuccessResponse>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SaveConfigurationCommand {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteSavedConfigurationCommand {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DownloadCrashDumpCommand {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DownloadCrashDumpResponse {
    #[prost(message, optional, tag = "1")]
    pub success: Option<SuccessResponse>,
    #[prost(bool, optional, tag = "2")]
    pub new_dump: Option<bool>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub content: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SynchronizeLogCommand {
    /// Log sequence number to start from; 0 for everything.
    #[prost(uint64, optional, tag = "1")]
    pub sequence_no: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogEntry {
    #[prost(uint64, optional, tag = "1")]
    pub sequence_no: Option<u64>,
    #[prost(uint64, optional, tag = "2")]
    pub time_stamp: Option<u64>,
    #[prost(string, optional, tag = "3")]
    pub level: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub message: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SynchronizeLogResponse {
    #[prost(message, optional, tag = "1")]
    pub success: Option<SuccessResponse>,
    #[prost(message, repeated, tag = "2")]
    pub entries: Vec<LogEntry>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetTimeCommand {
    #[prost(uint64, optional, tag = "1")]
    pub seconds: Option<u64>,
    #[prost(uint64, optional, tag = "2")]
    pub microseconds: Option<u64>,
}
