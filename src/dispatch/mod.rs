use crate::model::{FreeDvMode, OperationStatus, SaveDomain, SessionState};
use crate::projection::VoiceKeyerError;
use crate::protocol::{Command, DeviceMessage};
use crate::upload::{CompletionOutcome, UploadState, UploadTarget};

/// Follow-up work the session driver performs after a message was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(Command),
    AbortTransfer(UploadTarget),
    /// Stop the chunk loop at the next chunk boundary.
    CancelTransfer(UploadTarget),
}

pub fn dispatch(state: &mut SessionState, message: DeviceMessage) -> Vec<Effect> {
    let mut effects = Vec::new();
    match message {
        DeviceMessage::WifiInfo(info) => state.wifi = Some(info),
        DeviceMessage::WifiScanResults { network_list } => {
            tracing::debug!(count = network_list.len(), "wifi scan results");
            state.networks = network_list;
        }
        DeviceMessage::WifiSaved { success } => save_result(state, SaveDomain::Wifi, success),
        DeviceMessage::RadioInfo(info) => state.radio = Some(info),
        DeviceMessage::FlexRadioDiscovered { ip, description } => {
            if state.discovered_radios.insert(&ip, &description) {
                tracing::info!(address = %ip, description = %description, "flex radio discovered");
            } else {
                tracing::debug!(
                    address = %ip,
                    known_as = ?state.discovered_radios.description(&ip),
                    "flex radio already known"
                );
            }
        }
        DeviceMessage::RadioSaved { success } => save_result(state, SaveDomain::Radio, success),
        DeviceMessage::VoiceKeyerInfo(info) => state.voice_keyer = Some(info),
        DeviceMessage::VoiceKeyerSaved {
            success,
            error_type,
        } => {
            save_result(state, SaveDomain::VoiceKeyer, success);
            state.voice_keyer_error = if success {
                None
            } else {
                Some(VoiceKeyerError::from_wire(error_type, 0).to_string())
            };
        }
        DeviceMessage::ReportingInfo(info) => state.reporting = Some(info),
        DeviceMessage::ReportingSaved { success } => {
            save_result(state, SaveDomain::Reporting, success)
        }
        DeviceMessage::LedBrightnessInfo(info) => state.led_brightness = Some(info),
        DeviceMessage::VoiceKeyerUploadComplete {
            success,
            error_type,
            errno,
        } => match state.uploads.voice_keyer.complete(success, error_type, errno) {
            CompletionOutcome::SaveSettings(save) => {
                tracing::info!("voice keyer upload complete, saving settings");
                state.saves.set(SaveDomain::VoiceKeyer, OperationStatus::Pending);
                effects.push(Effect::Send(save));
            }
            CompletionOutcome::AbortTransfer => {
                let error = VoiceKeyerError::from_wire(error_type, errno);
                tracing::warn!(error_type, errno, "voice keyer upload rejected: {}", error);
                state.saves.set(SaveDomain::VoiceKeyer, OperationStatus::Failed);
                state.voice_keyer_error = Some(error.to_string());
                effects.push(Effect::AbortTransfer(UploadTarget::VoiceKeyer));
            }
            CompletionOutcome::Finished => {}
            CompletionOutcome::Ignored => {
                tracing::debug!(success, "voice keyer upload result without active upload");
            }
        },
        DeviceMessage::FirmwareUploadComplete { success } => {
            let streaming = matches!(
                state.uploads.firmware.state(),
                UploadState::Announced | UploadState::Streaming
            );
            match state.uploads.firmware.complete(success, 0, 0) {
                CompletionOutcome::Ignored => {
                    tracing::debug!(success, "firmware upload result without active upload");
                    return effects;
                }
                _ if success => tracing::info!("firmware upload accepted, device will restart"),
                _ => tracing::warn!("firmware upload failed"),
            }
            if streaming {
                effects.push(Effect::CancelTransfer(UploadTarget::Firmware));
            }
        }
        DeviceMessage::BatteryStatus(status) => state.battery = Some(status),
        DeviceMessage::CurrentMode { current_mode } => {
            state.mode = FreeDvMode::from_wire(current_mode);
            if state.mode.is_none() {
                tracing::debug!(current_mode, "unrecognised freedv mode");
            }
        }
        DeviceMessage::VoiceKeyerRunning { running } => state.voice_keyer_running = running,
        DeviceMessage::FreedvStatus(status) => state.sync = Some(status),
        DeviceMessage::Unknown => {}
    }
    effects
}

fn save_result(state: &mut SessionState, domain: SaveDomain, success: bool) {
    if !success {
        tracing::warn!(domain = ?domain, "device rejected settings");
    }
    state.saves.set(domain, OperationStatus::from_result(success));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{VoiceKeyerInfo, WifiInfo};
    use crate::protocol::{decode, Inbound};
    use crate::upload::StreamReport;
    use std::path::PathBuf;

    fn vk_save() -> Command {
        Command::SaveVoiceKeyerInfo(VoiceKeyerInfo {
            enabled: true,
            times_to_transmit: 3,
            seconds_to_wait: 10,
        })
    }

    fn streaming_voice_keyer(state: &mut SessionState) {
        let vk = &mut state.uploads.voice_keyer;
        vk.confirm(Some(PathBuf::from("cq.wav")), Some(vk_save()))
            .unwrap();
        vk.file_loaded(10_000).unwrap();
        vk.streaming_started().unwrap();
    }

    #[test]
    fn snapshots_overwrite_projection() {
        let mut state = SessionState::default();
        dispatch(
            &mut state,
            DeviceMessage::WifiInfo(WifiInfo {
                ssid: "first".to_string(),
                ..Default::default()
            }),
        );
        dispatch(
            &mut state,
            DeviceMessage::WifiInfo(WifiInfo {
                ssid: "second".to_string(),
                ..Default::default()
            }),
        );
        assert_eq!(state.wifi.as_ref().map(|w| w.ssid.as_str()), Some("second"));

        dispatch(&mut state, DeviceMessage::VoiceKeyerRunning { running: true });
        assert!(state.voice_keyer_running);
    }

    #[test]
    fn scan_results_replace_network_list() {
        let mut state = SessionState::default();
        state.networks = vec!["stale".to_string(), "home".to_string()];
        dispatch(
            &mut state,
            DeviceMessage::WifiScanResults {
                network_list: vec!["home".to_string()],
            },
        );
        assert_eq!(state.networks, vec!["home".to_string()]);
    }

    #[test]
    fn discovery_deduplicates_by_address() {
        let mut state = SessionState::default();
        for description in ["FLEX-6600", "FLEX-6600 again"] {
            dispatch(
                &mut state,
                DeviceMessage::FlexRadioDiscovered {
                    ip: "192.168.0.40".to_string(),
                    description: description.to_string(),
                },
            );
        }
        assert_eq!(state.discovered_radios.len(), 1);
        assert_eq!(
            state.discovered_radios.description("192.168.0.40"),
            Some("FLEX-6600")
        );
    }

    #[test]
    fn save_results_flip_per_domain_status() {
        let mut state = SessionState::default();
        state.saves.set(SaveDomain::Radio, OperationStatus::Pending);
        dispatch(&mut state, DeviceMessage::RadioSaved { success: true });
        dispatch(&mut state, DeviceMessage::ReportingSaved { success: false });
        assert_eq!(state.saves.radio, OperationStatus::Succeeded);
        assert_eq!(state.saves.reporting, OperationStatus::Failed);
        assert_eq!(state.saves.wifi, OperationStatus::Idle);
    }

    #[test]
    fn voice_keyer_save_failure_surfaces_error_text() {
        let mut state = SessionState::default();
        dispatch(
            &mut state,
            DeviceMessage::VoiceKeyerSaved {
                success: false,
                error_type: 4,
            },
        );
        assert_eq!(state.saves.voice_keyer, OperationStatus::Failed);
        assert!(state
            .voice_keyer_error
            .as_deref()
            .is_some_and(|e| e.starts_with("All fields are required")));

        dispatch(
            &mut state,
            DeviceMessage::VoiceKeyerSaved {
                success: true,
                error_type: 0,
            },
        );
        assert!(state.voice_keyer_error.is_none());
    }

    #[test]
    fn voice_keyer_upload_success_resends_settings() {
        let mut state = SessionState::default();
        streaming_voice_keyer(&mut state);
        let effects = dispatch(
            &mut state,
            DeviceMessage::VoiceKeyerUploadComplete {
                success: true,
                error_type: 0,
                errno: 0,
            },
        );
        assert_eq!(effects, vec![Effect::Send(vk_save())]);
        assert_eq!(state.uploads.voice_keyer.state(), UploadState::Completed);
        assert_eq!(state.saves.voice_keyer, OperationStatus::Pending);
    }

    #[test]
    fn voice_keyer_upload_failure_aborts_and_reports() {
        let mut state = SessionState::default();
        streaming_voice_keyer(&mut state);
        let effects = dispatch(
            &mut state,
            DeviceMessage::VoiceKeyerUploadComplete {
                success: false,
                error_type: 2,
                errno: 0,
            },
        );
        assert_eq!(effects, vec![Effect::AbortTransfer(UploadTarget::VoiceKeyer)]);
        assert_eq!(state.uploads.voice_keyer.state(), UploadState::Failed);
        assert!(state
            .voice_keyer_error
            .as_deref()
            .is_some_and(|e| e.contains("8 kHz")));
    }

    #[test]
    fn firmware_result_mid_stream_stops_the_stream() {
        let mut state = SessionState::default();
        let fw = &mut state.uploads.firmware;
        fw.confirm(Some(PathBuf::from("ezdv.bin")), None).unwrap();
        fw.file_loaded(1 << 18).unwrap();
        fw.streaming_started().unwrap();

        let effects = dispatch(&mut state, DeviceMessage::FirmwareUploadComplete { success: false });
        assert_eq!(effects, vec![Effect::CancelTransfer(UploadTarget::Firmware)]);
        assert_eq!(state.uploads.firmware.state(), UploadState::Failed);
    }

    #[test]
    fn firmware_completion_after_stream_has_no_follow_up() {
        let mut state = SessionState::default();
        let fw = &mut state.uploads.firmware;
        fw.confirm(Some(PathBuf::from("ezdv.bin")), None).unwrap();
        fw.file_loaded(2048).unwrap();
        fw.streaming_started().unwrap();
        fw.stream_finished(&StreamReport {
            sent_bytes: 2048,
            chunks: 1,
            cancelled: false,
        });

        let effects = dispatch(&mut state, DeviceMessage::FirmwareUploadComplete { success: true });
        assert!(effects.is_empty());
        assert_eq!(state.uploads.firmware.state(), UploadState::Completed);

        // a stray result with nothing in flight changes nothing
        let before = state.clone();
        assert!(dispatch(&mut state, DeviceMessage::FirmwareUploadComplete { success: false })
            .is_empty());
        assert_eq!(state, before);
    }

    #[test]
    fn out_of_range_mode_clears_current_mode() {
        let mut state = SessionState::default();
        dispatch(&mut state, DeviceMessage::CurrentMode { current_mode: 2 });
        assert_eq!(state.mode, Some(FreeDvMode::Mode700E));
        dispatch(&mut state, DeviceMessage::CurrentMode { current_mode: 9 });
        assert_eq!(state.mode, None);
    }

    #[test]
    fn unknown_discriminant_leaves_state_untouched() {
        let mut state = SessionState::default();
        state.networks = vec!["home".to_string()];
        streaming_voice_keyer(&mut state);
        let before = state.clone();

        let frame = r#"{"type":"spectrumData","bins":[3,4]}"#;
        match decode(frame) {
            Inbound::Message(message) => {
                dispatch(&mut state, message);
            }
            Inbound::Unknown(tag) => assert_eq!(tag, "spectrumData"),
            Inbound::Malformed(reason) => panic!("unexpected malformed frame: {reason}"),
        }
        assert!(dispatch(&mut state, DeviceMessage::Unknown).is_empty());
        assert_eq!(state, before);
        assert_eq!(state.uploads.voice_keyer.state(), UploadState::Streaming);
    }
}
