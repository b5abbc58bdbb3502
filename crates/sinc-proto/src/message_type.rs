use strum::FromRepr;

/// The message-type byte carried in every framed packet header.
///
/// The core transport treats this as opaque apart from a handful of
/// sentinels (`SuccessResponse`, `GetParamResponse`, `ParamUpdatedResponse`,
/// `AsynchronousErrorResponse`, `CalibrationProgressResponse`,
/// `HistogramDatagramResponse` and the command types it encodes itself).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, FromRepr)]
#[repr(u8)]
pub enum MessageType {
    #[default]
    NoMessageType = 0,
    PingCommand = 1,
    GetParamCommand = 2,
    GetParamResponse = 3,
    SetParamCommand = 4,
    StartCalibrationCommand = 5,
    CalibrationProgressResponse = 6,
    GetCalibrationCommand = 7,
    GetCalibrationResponse = 8,
    SetCalibrationCommand = 9,
    CalculateDcOffsetCommand = 10,
    CalculateDcOffsetResponse = 11,
    StartOscilloscopeCommand = 12,
    OscilloscopeDataResponse = 13,
    StartHistogramCommand = 14,
    HistogramDataResponse = 15,
    StartListModeCommand = 16,
    ListModeDataResponse = 17,
    StopDataAcquisitionCommand = 18,
    SuccessResponse = 19,
    ListParamDetailsCommand = 20,
    ListParamDetailsResponse = 21,
    RestartCommand = 22,
    SoftwareUpdateCommand = 23,
    SaveConfigurationCommand = 24,
    MonitorChannelsCommand = 25,
    AsynchronousErrorResponse = 26,
    ParamUpdatedResponse = 27,
    DeleteSavedConfigurationCommand = 28,
    SoftwareUpdateCompleteResponse = 29,
    CheckParamConsistencyCommand = 30,
    CheckParamConsistencyResponse = 31,
    ProbeDatagramCommand = 32,
    HistogramDatagramResponse = 33,
    DownloadCrashDumpCommand = 34,
    DownloadCrashDumpResponse = 35,
    SynchronizeLogCommand = 36,
    SynchronizeLogResponse = 37,
    SetTimeCommand = 38,
    ResetSpatialSystemCommand = 39,
    TriggerHistogramCommand = 40,
    StartFftCommand = 41,
}

impl MessageType {
    /// Recover a message type from the header byte. Unknown bytes map to
    /// [`MessageType::NoMessageType`]; the receive pipeline skips them.
    #[inline]
    pub fn from_wire(byte: u8) -> Self {
        Self::from_repr(byte).unwrap_or(MessageType::NoMessageType)
    }

    #[inline]
    pub fn as_wire(self) -> u8 {
        self as u8
    }
}
