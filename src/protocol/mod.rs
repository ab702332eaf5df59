use crate::model::{
    BatteryStatus, LedBrightnessInfo, RadioInfo, ReportingInfo, SyncStatus, VoiceKeyerInfo,
    WifiInfo,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest binary frame the device accepts during an upload.
pub const UPLOAD_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeviceMessage {
    #[serde(rename = "wifiInfo")]
    WifiInfo(WifiInfo),
    #[serde(rename = "wifiScanResults")]
    WifiScanResults {
        #[serde(rename = "networkList", default)]
        network_list: Vec<String>,
    },
    #[serde(rename = "wifiSaved")]
    WifiSaved {
        #[serde(default)]
        success: bool,
    },
    #[serde(rename = "radioInfo")]
    RadioInfo(RadioInfo),
    #[serde(rename = "flexRadioDiscovered")]
    FlexRadioDiscovered {
        ip: String,
        #[serde(default)]
        description: String,
    },
    #[serde(rename = "radioSaved")]
    RadioSaved {
        #[serde(default)]
        success: bool,
    },
    #[serde(rename = "voiceKeyerInfo")]
    VoiceKeyerInfo(VoiceKeyerInfo),
    #[serde(rename = "voiceKeyerSaved")]
    VoiceKeyerSaved {
        #[serde(default)]
        success: bool,
        #[serde(rename = "errorType", default)]
        error_type: i32,
    },
    #[serde(rename = "reportingInfo")]
    ReportingInfo(ReportingInfo),
    #[serde(rename = "reportingSaved")]
    ReportingSaved {
        #[serde(default)]
        success: bool,
    },
    #[serde(rename = "ledBrightnessInfo")]
    LedBrightnessInfo(LedBrightnessInfo),
    #[serde(rename = "voiceKeyerUploadComplete")]
    VoiceKeyerUploadComplete {
        #[serde(default)]
        success: bool,
        #[serde(rename = "errorType", default)]
        error_type: i32,
        #[serde(default)]
        errno: i32,
    },
    #[serde(rename = "firmwareUploadComplete")]
    FirmwareUploadComplete {
        #[serde(default)]
        success: bool,
    },
    #[serde(rename = "batteryStatus")]
    BatteryStatus(BatteryStatus),
    #[serde(rename = "currentMode")]
    CurrentMode {
        #[serde(rename = "currentMode")]
        current_mode: i32,
    },
    #[serde(rename = "voiceKeyerRunning")]
    VoiceKeyerRunning {
        #[serde(default)]
        running: bool,
    },
    #[serde(rename = "freedvStatus")]
    FreedvStatus(SyncStatus),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportingSettings {
    pub callsign: String,
    pub grid_square: String,
    pub force_enable: bool,
    /// Hz.
    pub frequency: u64,
    pub reporting_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    #[serde(rename = "saveWifiInfo")]
    SaveWifiInfo(WifiInfo),
    #[serde(rename = "saveRadioInfo")]
    SaveRadioInfo(RadioInfo),
    #[serde(rename = "saveVoiceKeyerInfo")]
    SaveVoiceKeyerInfo(VoiceKeyerInfo),
    #[serde(rename = "saveReportingInfo")]
    SaveReportingInfo(ReportingSettings),
    #[serde(rename = "saveLedBrightnessInfo")]
    SaveLedBrightnessInfo(LedBrightnessInfo),
    #[serde(rename = "setMode")]
    SetMode { mode: i32 },
    #[serde(rename = "startWifiScan")]
    StartWifiScan,
    #[serde(rename = "stopWifiScan")]
    StopWifiScan,
    #[serde(rename = "rebootDevice")]
    RebootDevice,
    #[serde(rename = "startStopVoiceKeyer")]
    StartStopVoiceKeyer { running: bool },
    #[serde(rename = "uploadVoiceKeyerFile")]
    UploadVoiceKeyerFile { size: u64 },
    #[serde(rename = "uploadFirmwareFile")]
    UploadFirmwareFile,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SaveWifiInfo(_) => "saveWifiInfo",
            Self::SaveRadioInfo(_) => "saveRadioInfo",
            Self::SaveVoiceKeyerInfo(_) => "saveVoiceKeyerInfo",
            Self::SaveReportingInfo(_) => "saveReportingInfo",
            Self::SaveLedBrightnessInfo(_) => "saveLedBrightnessInfo",
            Self::SetMode { .. } => "setMode",
            Self::StartWifiScan => "startWifiScan",
            Self::StopWifiScan => "stopWifiScan",
            Self::RebootDevice => "rebootDevice",
            Self::StartStopVoiceKeyer { .. } => "startStopVoiceKeyer",
            Self::UploadVoiceKeyerFile { .. } => "uploadVoiceKeyerFile",
            Self::UploadFirmwareFile => "uploadFirmwareFile",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One frame queued for the socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(DeviceMessage),
    Unknown(String),
    Malformed(String),
}

pub fn decode(text: &str) -> Inbound {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => return Inbound::Malformed(format!("decode failed: {err}")),
    };
    let Some(tag) = value.get("type").and_then(Value::as_str).map(str::to_owned) else {
        return Inbound::Malformed("missing type discriminant".to_string());
    };
    match serde_json::from_value::<DeviceMessage>(value) {
        Ok(DeviceMessage::Unknown) => Inbound::Unknown(tag),
        Ok(message) => Inbound::Message(message),
        Err(err) => Inbound::Malformed(format!("invalid {tag} payload: {err}")),
    }
}
