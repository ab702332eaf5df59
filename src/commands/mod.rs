use crate::model::{
    FreeDvMode, LedBrightnessInfo, RadioInfo, ReportingInfo, VoiceKeyerInfo, WifiInfo,
};
use crate::projection::{format_frequency_mhz, parse_frequency_mhz};
use crate::protocol::{Command, ReportingSettings};
use serde::{Deserialize, Serialize};

// Form values are kept as the user typed them. Numbers that do not parse go out
// as 0 and the device's own validation reports the missing field.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiForm {
    pub enabled: bool,
    pub mode: String,
    pub security: String,
    pub channel: String,
    pub ssid: String,
    pub password: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioForm {
    pub enabled: bool,
    pub headset_ptt: bool,
    pub time_out_timer: String,
    pub radio_type: String,
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceKeyerForm {
    pub enabled: bool,
    pub seconds_to_wait: String,
    pub times_to_transmit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingForm {
    pub callsign: String,
    pub grid_square: String,
    pub force_enable: bool,
    pub frequency_mhz: String,
    pub reporting_message: String,
}

impl From<&WifiInfo> for WifiForm {
    fn from(info: &WifiInfo) -> Self {
        Self {
            enabled: info.enabled,
            mode: info.mode.to_string(),
            security: info.security.to_string(),
            channel: info.channel.to_string(),
            ssid: info.ssid.clone(),
            password: info.password.clone(),
            hostname: info.hostname.clone(),
        }
    }
}

impl From<&RadioInfo> for RadioForm {
    fn from(info: &RadioInfo) -> Self {
        Self {
            enabled: info.enabled,
            headset_ptt: info.headset_ptt,
            time_out_timer: info.time_out_timer.to_string(),
            radio_type: info.radio_type.to_string(),
            host: info.host.clone(),
            port: info.port.to_string(),
            username: info.username.clone(),
            password: info.password.clone(),
        }
    }
}

impl From<&VoiceKeyerInfo> for VoiceKeyerForm {
    fn from(info: &VoiceKeyerInfo) -> Self {
        Self {
            enabled: info.enabled,
            seconds_to_wait: info.seconds_to_wait.to_string(),
            times_to_transmit: info.times_to_transmit.to_string(),
        }
    }
}

impl From<&ReportingInfo> for ReportingForm {
    fn from(info: &ReportingInfo) -> Self {
        Self {
            callsign: info.callsign.clone(),
            grid_square: info.grid_square.clone(),
            force_enable: info.force_reporting,
            frequency_mhz: format_frequency_mhz(info.reporting_frequency),
            reporting_message: info.reporting_message.clone(),
        }
    }
}

/// Reads an integer the way a browser's `parseInt` does: leading whitespace,
/// an optional sign, then as many digits as are present.
pub fn parse_int(input: &str) -> i32 {
    let trimmed = input.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let mut value: i64 = 0;
    let mut seen_digit = false;
    for ch in digits.chars() {
        let Some(digit) = ch.to_digit(10) else {
            break;
        };
        seen_digit = true;
        value = (value * 10 + i64::from(digit)).min(i64::from(i32::MAX) + 1);
    }
    if !seen_digit {
        return 0;
    }
    let value = if negative { -value } else { value };
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

pub fn save_wifi(form: &WifiForm) -> Command {
    Command::SaveWifiInfo(WifiInfo {
        enabled: form.enabled,
        mode: parse_int(&form.mode),
        security: parse_int(&form.security),
        channel: parse_int(&form.channel),
        ssid: form.ssid.clone(),
        password: form.password.clone(),
        hostname: form.hostname.clone(),
    })
}

pub fn save_radio(form: &RadioForm) -> Command {
    Command::SaveRadioInfo(RadioInfo {
        enabled: form.enabled,
        headset_ptt: form.headset_ptt,
        time_out_timer: parse_int(&form.time_out_timer),
        radio_type: parse_int(&form.radio_type),
        host: form.host.clone(),
        port: parse_int(&form.port),
        username: form.username.clone(),
        password: form.password.clone(),
    })
}

pub fn save_voice_keyer(form: &VoiceKeyerForm) -> Command {
    Command::SaveVoiceKeyerInfo(VoiceKeyerInfo {
        enabled: form.enabled,
        times_to_transmit: parse_int(&form.times_to_transmit),
        seconds_to_wait: parse_int(&form.seconds_to_wait),
    })
}

pub fn save_reporting(form: &ReportingForm) -> Command {
    Command::SaveReportingInfo(ReportingSettings {
        callsign: form.callsign.clone(),
        grid_square: form.grid_square.clone(),
        force_enable: form.force_enable,
        frequency: parse_frequency_mhz(&form.frequency_mhz),
        reporting_message: form.reporting_message.clone(),
    })
}

pub fn set_led_brightness(duty_cycle: &str) -> Command {
    Command::SaveLedBrightnessInfo(LedBrightnessInfo {
        duty_cycle: parse_int(duty_cycle),
    })
}

pub fn set_mode(mode: FreeDvMode) -> Command {
    Command::SetMode {
        mode: mode.wire_value(),
    }
}

pub fn wifi_scan(start: bool) -> Command {
    if start {
        Command::StartWifiScan
    } else {
        Command::StopWifiScan
    }
}

pub fn reboot() -> Command {
    Command::RebootDevice
}

/// The device expects the state it should move to, not the current one.
pub fn toggle_voice_keyer(currently_running: bool) -> Command {
    Command::StartStopVoiceKeyer {
        running: !currently_running,
    }
}

pub fn begin_voice_keyer_upload(size: u64) -> Command {
    Command::UploadVoiceKeyerFile { size }
}

pub fn begin_firmware_upload() -> Command {
    Command::UploadFirmwareFile
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_int_matches_browser_leniency() {
        assert_eq!(parse_int("42"), 42);
        assert_eq!(parse_int("  -7"), -7);
        assert_eq!(parse_int("+3"), 3);
        assert_eq!(parse_int("120s"), 120);
        assert_eq!(parse_int(""), 0);
        assert_eq!(parse_int("abc"), 0);
        assert_eq!(parse_int("-"), 0);
        assert_eq!(parse_int("99999999999"), i32::MAX);
    }

    #[test]
    fn voice_keyer_save_coerces_blank_numbers_to_zero() {
        let form = VoiceKeyerForm {
            enabled: true,
            seconds_to_wait: String::new(),
            times_to_transmit: "ten".to_string(),
        };
        assert_eq!(
            save_voice_keyer(&form),
            Command::SaveVoiceKeyerInfo(VoiceKeyerInfo {
                enabled: true,
                times_to_transmit: 0,
                seconds_to_wait: 0,
            })
        );
    }

    #[test]
    fn reporting_save_converts_mhz_to_hz() {
        let form = ReportingForm {
            callsign: "VK3TPM".to_string(),
            grid_square: "QF22".to_string(),
            force_enable: false,
            frequency_mhz: "14.2360".to_string(),
            reporting_message: String::new(),
        };
        let Command::SaveReportingInfo(settings) = save_reporting(&form) else {
            panic!("expected saveReportingInfo");
        };
        assert_eq!(settings.frequency, 14_236_000);
        assert_eq!(settings.grid_square, "QF22");
    }

    #[test]
    fn forms_prefill_from_projection() {
        let info = ReportingInfo {
            callsign: "N0CALL".to_string(),
            grid_square: "UN00KN".to_string(),
            force_reporting: true,
            reporting_message: "hi".to_string(),
            reporting_frequency: 14_074_000,
        };
        let form = ReportingForm::from(&info);
        assert_eq!(form.frequency_mhz, "14.0740");
        assert!(form.force_enable);

        let radio = RadioInfo {
            port: 50001,
            radio_type: 1,
            ..Default::default()
        };
        let Command::SaveRadioInfo(saved) = save_radio(&RadioForm::from(&radio)) else {
            panic!("expected saveRadioInfo");
        };
        assert_eq!(saved, radio);
    }

    #[test]
    fn simple_commands() {
        assert_eq!(set_mode(FreeDvMode::Mode1600), Command::SetMode { mode: 3 });
        assert_eq!(wifi_scan(false), Command::StopWifiScan);
        assert_eq!(
            toggle_voice_keyer(false),
            Command::StartStopVoiceKeyer { running: true }
        );
        assert_eq!(
            set_led_brightness("8192"),
            Command::SaveLedBrightnessInfo(LedBrightnessInfo { duty_cycle: 8192 })
        );
    }
}
