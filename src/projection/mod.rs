use crate::model::{
    DiscoveredRadioRegistry, RadioInfo, SessionState, WifiInfo, RADIO_TYPE_FLEX,
    WIFI_MODE_ACCESS_POINT, WIFI_SECURITY_OPEN,
};
use serde::Serialize;
use std::fmt;

const OTHER_LABEL: &str = "(other)";
const HZ_PER_MHZ: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WifiFieldState {
    pub security_editable: bool,
    pub channel_editable: bool,
    pub network_list_editable: bool,
    pub password_editable: bool,
}

pub fn wifi_field_state(wifi: &WifiInfo) -> WifiFieldState {
    let access_point = wifi.mode == WIFI_MODE_ACCESS_POINT;
    WifiFieldState {
        security_editable: access_point,
        channel_editable: access_point,
        network_list_editable: !access_point,
        password_editable: !(access_point && wifi.security == WIFI_SECURITY_OPEN),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

impl Choice {
    fn other(selected: bool) -> Self {
        Self {
            value: String::new(),
            label: OTHER_LABEL.to_string(),
            selected,
        }
    }
}

pub fn network_choices(networks: &[String], current_ssid: &str) -> Vec<Choice> {
    let mut choices: Vec<Choice> = networks
        .iter()
        .map(|ssid| Choice {
            value: ssid.clone(),
            label: ssid.clone(),
            selected: ssid == current_ssid,
        })
        .collect();
    let known = networks.iter().any(|ssid| ssid == current_ssid);
    choices.push(Choice::other(!known));
    choices
}

/// Only FlexRadio needs a picker; other radio types return `None`.
pub fn radio_choices(radio: &RadioInfo, registry: &DiscoveredRadioRegistry) -> Option<Vec<Choice>> {
    if radio.radio_type != RADIO_TYPE_FLEX {
        return None;
    }
    let mut choices = Vec::with_capacity(registry.len() + 1);
    choices.push(Choice::other(!registry.contains(&radio.host)));
    choices.extend(registry.iter().map(|entry| Choice {
        value: entry.address.clone(),
        label: entry.description.clone(),
        selected: entry.address == radio.host,
    }));
    Some(choices)
}

pub fn format_frequency_mhz(hz: u64) -> String {
    format!("{:.4}", hz as f64 / HZ_PER_MHZ)
}

/// Reads the leading decimal number, so `"14.074 MHz"` is 14.074 MHz. Anything
/// without one, or not positive, is 0.
pub fn parse_frequency_mhz(input: &str) -> u64 {
    match decimal_prefix(input.trim_start()).parse::<f64>() {
        Ok(mhz) if mhz.is_finite() && mhz > 0.0 => (mhz * HZ_PER_MHZ).round() as u64,
        _ => 0,
    }
}

fn decimal_prefix(input: &str) -> &str {
    let bytes = input.as_bytes();
    let digits_from = |mut i: usize| {
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        i
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int_end = digits_from(end);
    let mut mantissa_digits = int_end - end;
    end = int_end;
    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits_from(end + 1);
        mantissa_digits += frac_end - end - 1;
        end = frac_end;
    }
    if mantissa_digits == 0 {
        return "";
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let sign = usize::from(matches!(bytes.get(end + 1), Some(b'+' | b'-')));
        let exp_end = digits_from(end + 1 + sign);
        if exp_end > end + 1 + sign {
            end = exp_end;
        }
    }
    &input[..end]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingTime {
    MoreThanTenHours,
    HoursRemaining(i64),
    MinutesRemaining(i64),
    NotCharging,
    HoursToFull(i64),
    MinutesToFull(i64),
}

impl fmt::Display for RemainingTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MoreThanTenHours => write!(f, ">10h remaining"),
            Self::HoursRemaining(h) => write!(f, "{h}h remaining"),
            Self::MinutesRemaining(m) => write!(f, "{m} min remaining"),
            Self::NotCharging => write!(f, "not charging"),
            Self::HoursToFull(h) => write!(f, "{h}h to full"),
            Self::MinutesToFull(m) => write!(f, "{m} min to full"),
        }
    }
}

/// `soc` in percent, `rate` in percent per hour (negative while discharging).
pub fn remaining_time(soc: f64, rate: f64) -> Option<RemainingTime> {
    if rate == 0.0 {
        return None;
    }
    let discharging = rate < 0.0;
    let hours = if discharging {
        soc / -rate
    } else {
        (100.0 - soc) / rate
    };

    let estimate = if hours >= 10.0 {
        if discharging {
            RemainingTime::MoreThanTenHours
        } else {
            RemainingTime::NotCharging
        }
    } else if hours > 1.0 {
        let h = hours.round() as i64;
        if discharging {
            RemainingTime::HoursRemaining(h)
        } else {
            RemainingTime::HoursToFull(h)
        }
    } else {
        let m = (hours * 60.0).round() as i64;
        if discharging {
            RemainingTime::MinutesRemaining(m)
        } else {
            RemainingTime::MinutesToFull(m)
        }
    };
    Some(estimate)
}

/// Voice keyer failure reported by the device as `errorType` plus optional `errno`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceKeyerError {
    Unknown,
    System(i32),
    WrongSampleRate,
    WrongChannelCount,
    MissingField,
    Unexpected,
    FileTooLarge,
}

impl VoiceKeyerError {
    pub fn from_wire(error_type: i32, errno: i32) -> Self {
        match error_type {
            0 => Self::Unknown,
            1 => Self::System(errno),
            2 => Self::WrongSampleRate,
            3 => Self::WrongChannelCount,
            4 => Self::MissingField,
            6 => Self::FileTooLarge,
            _ => Self::Unexpected,
        }
    }
}

impl fmt::Display for VoiceKeyerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown | Self::Unexpected => {
                write!(f, "Unexpected error while updating the voice keyer settings")
            }
            Self::System(errno) => write!(f, "System error: {errno}"),
            Self::WrongSampleRate => write!(
                f,
                "Incorrect sample rate: only .wav files recorded at 8 kHz are supported"
            ),
            Self::WrongChannelCount => write!(
                f,
                "Incorrect number of channels: only mono .wav files are supported, not stereo"
            ),
            Self::MissingField => write!(
                f,
                "All fields are required except for the voice keyer file, which can be skipped if not updating"
            ),
            Self::FileTooLarge => write!(f, "Voice keyer files can't be larger than 512 KB"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceView {
    pub wifi_fields: Option<WifiFieldState>,
    pub network_choices: Option<Vec<Choice>>,
    pub radio_choices: Option<Vec<Choice>>,
    pub reporting_frequency_mhz: Option<String>,
    pub battery_remaining: Option<String>,
}

pub fn derive_view(state: &SessionState) -> DeviceView {
    DeviceView {
        wifi_fields: state.wifi.as_ref().map(wifi_field_state),
        network_choices: state
            .wifi
            .as_ref()
            .map(|wifi| network_choices(&state.networks, &wifi.ssid)),
        radio_choices: state
            .radio
            .as_ref()
            .and_then(|radio| radio_choices(radio, &state.discovered_radios)),
        reporting_frequency_mhz: state
            .reporting
            .as_ref()
            .map(|r| format_frequency_mhz(r.reporting_frequency)),
        battery_remaining: state
            .battery
            .as_ref()
            .and_then(|b| remaining_time(b.state_of_charge, b.state_of_charge_change))
            .map(|t| t.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discharge_estimate_boundaries() {
        assert_eq!(remaining_time(50.0, -5.0), Some(RemainingTime::MoreThanTenHours));
        assert_eq!(
            remaining_time(45.0, -5.0).map(|t| t.to_string()).as_deref(),
            Some("9h remaining")
        );
        // exactly one hour falls through to minutes
        assert_eq!(remaining_time(5.0, -5.0), Some(RemainingTime::MinutesRemaining(60)));
        assert_eq!(remaining_time(5.5, -5.0), Some(RemainingTime::HoursRemaining(1)));
        assert_eq!(remaining_time(49.5, -5.0), Some(RemainingTime::HoursRemaining(10)));
        assert_eq!(remaining_time(2.0, -4.0), Some(RemainingTime::MinutesRemaining(30)));
    }

    #[test]
    fn charge_estimate_boundaries() {
        assert_eq!(remaining_time(50.0, 5.0), Some(RemainingTime::NotCharging));
        assert_eq!(
            remaining_time(70.0, 10.0).map(|t| t.to_string()).as_deref(),
            Some("3h to full")
        );
        assert_eq!(remaining_time(95.0, 5.0), Some(RemainingTime::MinutesToFull(60)));
        assert_eq!(
            remaining_time(99.0, 4.0).map(|t| t.to_string()).as_deref(),
            Some("15 min to full")
        );
    }

    #[test]
    fn no_estimate_without_change() {
        assert_eq!(remaining_time(80.0, 0.0), None);
    }

    #[test]
    fn frequency_display_roundtrip() {
        assert_eq!(format_frequency_mhz(14_074_000), "14.0740");
        assert_eq!(parse_frequency_mhz("14.0740"), 14_074_000);
        assert_eq!(parse_frequency_mhz(" 7.074 "), 7_074_000);
        assert_eq!(parse_frequency_mhz("abc"), 0);
        assert_eq!(parse_frequency_mhz(""), 0);
    }

    #[test]
    fn frequency_reads_leading_number_like_a_form_field() {
        assert_eq!(parse_frequency_mhz("14.074 MHz"), 14_074_000);
        assert_eq!(parse_frequency_mhz("7.0745abc"), 7_074_500);
        assert_eq!(parse_frequency_mhz("14."), 14_000_000);
        assert_eq!(parse_frequency_mhz(".5"), 500_000);
        assert_eq!(parse_frequency_mhz("1.4074e1"), 14_074_000);
        assert_eq!(parse_frequency_mhz("1e"), 1_000_000);
        assert_eq!(parse_frequency_mhz("-3.5"), 0);
        assert_eq!(parse_frequency_mhz("MHz 14"), 0);
    }

    #[test]
    fn wifi_fields_follow_mode_and_security() {
        let mut wifi = WifiInfo::default();
        let ap_open = wifi_field_state(&wifi);
        assert!(ap_open.security_editable && ap_open.channel_editable);
        assert!(!ap_open.network_list_editable);
        assert!(!ap_open.password_editable);

        wifi.security = 2;
        assert!(wifi_field_state(&wifi).password_editable);

        wifi.mode = 1;
        wifi.security = WIFI_SECURITY_OPEN;
        let client = wifi_field_state(&wifi);
        assert!(!client.security_editable && !client.channel_editable);
        assert!(client.network_list_editable);
        assert!(client.password_editable);
    }

    #[test]
    fn network_choices_select_current_or_other() {
        let networks = vec!["home".to_string(), "field-day".to_string()];
        let choices = network_choices(&networks, "field-day");
        assert_eq!(choices.len(), 3);
        assert!(choices[1].selected);
        assert!(!choices[2].selected);
        assert_eq!(choices[2].label, "(other)");

        let choices = network_choices(&networks, "hotel");
        assert!(choices.last().unwrap().selected);
        assert!(choices.iter().filter(|c| c.selected).count() == 1);
    }

    #[test]
    fn radio_choices_only_for_flex() {
        let mut registry = DiscoveredRadioRegistry::default();
        registry.insert("10.0.0.5", "FLEX-6600");
        registry.insert("10.0.0.6", "FLEX-8400");

        let mut radio = RadioInfo {
            radio_type: 0,
            host: "10.0.0.6".to_string(),
            ..Default::default()
        };
        assert!(radio_choices(&radio, &registry).is_none());

        radio.radio_type = RADIO_TYPE_FLEX;
        let choices = radio_choices(&radio, &registry).unwrap();
        assert_eq!(choices.len(), 3);
        assert_eq!(choices[0].label, "(other)");
        assert!(!choices[0].selected);
        assert!(choices[2].selected);
        assert_eq!(choices[2].label, "FLEX-8400");

        radio.host = "10.0.0.99".to_string();
        let choices = radio_choices(&radio, &registry).unwrap();
        assert!(choices[0].selected);
    }

    #[test]
    fn voice_keyer_error_texts() {
        let too_large = VoiceKeyerError::from_wire(6, 0).to_string();
        assert!(too_large.contains("512 KB"));
        let rate = VoiceKeyerError::from_wire(2, 0).to_string();
        assert!(rate.contains("8 kHz"));
        assert_eq!(VoiceKeyerError::from_wire(1, 28).to_string(), "System error: 28");
        assert_eq!(
            VoiceKeyerError::from_wire(0, 0).to_string(),
            VoiceKeyerError::from_wire(5, 0).to_string()
        );
        assert_eq!(VoiceKeyerError::from_wire(42, 0), VoiceKeyerError::Unexpected);
    }
}
