use crate::upload::{UploadController, UploadTarget};
use serde::{Deserialize, Serialize};

pub const WIFI_MODE_ACCESS_POINT: i32 = 0;
pub const WIFI_SECURITY_OPEN: i32 = 0;
pub const RADIO_TYPE_FLEX: i32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WifiInfo {
    pub enabled: bool,
    pub mode: i32,
    pub security: i32,
    pub channel: i32,
    pub ssid: String,
    pub password: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RadioInfo {
    pub enabled: bool,
    pub headset_ptt: bool,
    pub time_out_timer: i32,
    pub radio_type: i32,
    pub host: String,
    pub port: i32,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VoiceKeyerInfo {
    pub enabled: bool,
    pub times_to_transmit: i32,
    pub seconds_to_wait: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReportingInfo {
    pub callsign: String,
    pub grid_square: String,
    pub force_reporting: bool,
    pub reporting_message: String,
    /// Hz.
    pub reporting_frequency: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LedBrightnessInfo {
    pub duty_cycle: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatteryStatus {
    pub state_of_charge: f64,
    /// Percent per hour, negative while discharging.
    pub state_of_charge_change: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncStatus {
    pub sync: bool,
    pub freq_offset: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreeDvMode {
    Analog,
    #[serde(rename = "700d")]
    Mode700D,
    #[serde(rename = "700e")]
    Mode700E,
    #[serde(rename = "1600")]
    Mode1600,
}

impl FreeDvMode {
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Analog),
            1 => Some(Self::Mode700D),
            2 => Some(Self::Mode700E),
            3 => Some(Self::Mode1600),
            _ => None,
        }
    }

    pub fn wire_value(self) -> i32 {
        match self {
            Self::Analog => 0,
            Self::Mode700D => 1,
            Self::Mode700E => 2,
            Self::Mode1600 => 3,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "analog" => Some(Self::Analog),
            "700d" => Some(Self::Mode700D),
            "700e" => Some(Self::Mode700E),
            "1600" => Some(Self::Mode1600),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    #[default]
    Idle,
    Pending,
    Succeeded,
    Failed,
}

impl OperationStatus {
    pub fn from_result(success: bool) -> Self {
        if success {
            Self::Succeeded
        } else {
            Self::Failed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveDomain {
    Wifi,
    Radio,
    VoiceKeyer,
    Reporting,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveStatuses {
    pub wifi: OperationStatus,
    pub radio: OperationStatus,
    pub voice_keyer: OperationStatus,
    pub reporting: OperationStatus,
}

impl SaveStatuses {
    pub fn set(&mut self, domain: SaveDomain, status: OperationStatus) {
        match domain {
            SaveDomain::Wifi => self.wifi = status,
            SaveDomain::Radio => self.radio = status,
            SaveDomain::VoiceKeyer => self.voice_keyer = status,
            SaveDomain::Reporting => self.reporting = status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredRadio {
    pub address: String,
    pub description: String,
}

/// FlexRadio units announced by the device, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscoveredRadioRegistry {
    entries: Vec<DiscoveredRadio>,
}

impl DiscoveredRadioRegistry {
    /// Returns false when the address was already known; the first description wins.
    pub fn insert(&mut self, address: &str, description: &str) -> bool {
        if self.contains(address) {
            return false;
        }
        self.entries.push(DiscoveredRadio {
            address: address.to_string(),
            description: description.to_string(),
        });
        true
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.iter().any(|r| r.address == address)
    }

    pub fn description(&self, address: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|r| r.address == address)
            .map(|r| r.description.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredRadio> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Uploads {
    pub voice_keyer: UploadController,
    pub firmware: UploadController,
}

impl Default for Uploads {
    fn default() -> Self {
        Self {
            voice_keyer: UploadController::new(UploadTarget::VoiceKeyer),
            firmware: UploadController::new(UploadTarget::Firmware),
        }
    }
}

impl Uploads {
    pub fn get_mut(&mut self, target: UploadTarget) -> &mut UploadController {
        match target {
            UploadTarget::VoiceKeyer => &mut self.voice_keyer,
            UploadTarget::Firmware => &mut self.firmware,
        }
    }
}

/// Everything the client knows about the device. Discarded and rebuilt on reload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub connected: bool,
    pub overlay_visible: bool,
    pub wifi: Option<WifiInfo>,
    pub networks: Vec<String>,
    pub radio: Option<RadioInfo>,
    pub discovered_radios: DiscoveredRadioRegistry,
    pub voice_keyer: Option<VoiceKeyerInfo>,
    pub voice_keyer_running: bool,
    pub reporting: Option<ReportingInfo>,
    pub led_brightness: Option<LedBrightnessInfo>,
    pub battery: Option<BatteryStatus>,
    pub mode: Option<FreeDvMode>,
    pub sync: Option<SyncStatus>,
    pub saves: SaveStatuses,
    pub voice_keyer_error: Option<String>,
    pub uploads: Uploads,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            connected: false,
            overlay_visible: true,
            wifi: None,
            networks: Vec::new(),
            radio: None,
            discovered_radios: DiscoveredRadioRegistry::default(),
            voice_keyer: None,
            voice_keyer_running: false,
            reporting: None,
            led_brightness: None,
            battery: None,
            mode: None,
            sync: None,
            saves: SaveStatuses::default(),
            voice_keyer_error: None,
            uploads: Uploads::default(),
        }
    }
}

impl SessionState {
    /// True once the device has pushed its initial configuration snapshots.
    pub fn has_initial_snapshots(&self) -> bool {
        self.wifi.is_some()
            && self.radio.is_some()
            && self.voice_keyer.is_some()
            && self.reporting.is_some()
    }
}
