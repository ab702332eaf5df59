use crate::commands;
use crate::projection::VoiceKeyerError;
use crate::protocol::{Command, OutboundFrame, UPLOAD_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadTarget {
    VoiceKeyer,
    Firmware,
}

impl fmt::Display for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VoiceKeyer => write!(f, "voice_keyer"),
            Self::Firmware => write!(f, "firmware"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    #[default]
    Idle,
    Reading,
    Announced,
    Streaming,
    AwaitingServerResult,
    Completed,
    Aborted,
    Failed,
}

impl UploadState {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Reading | Self::Announced | Self::Streaming | Self::AwaitingServerResult
        )
    }

    fn accepts_result(self) -> bool {
        matches!(
            self,
            Self::Announced | Self::Streaming | Self::AwaitingServerResult
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadFailure {
    FileRead {
        message: String,
    },
    Device {
        error_type: i32,
        errno: i32,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSession {
    pub id: Uuid,
    pub target: UploadTarget,
    pub total_len: u64,
    pub offset: u64,
    /// Set once the local send loop has stopped, whether or not every chunk went out.
    pub finished: bool,
    pub cancelled: bool,
}

#[derive(Debug)]
pub enum UploadError {
    Busy(UploadTarget),
    InvalidState {
        target: UploadTarget,
        state: UploadState,
        event: &'static str,
    },
    ChannelClosed,
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy(target) => write!(f, "{target} upload already in progress"),
            Self::InvalidState {
                target,
                state,
                event,
            } => write!(f, "{target} upload cannot handle {event} while {state:?}"),
            Self::ChannelClosed => write!(f, "socket writer closed during upload"),
        }
    }
}

impl std::error::Error for UploadError {}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    ReadFile(PathBuf),
    SaveSettings(Command),
    Nothing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    SaveSettings(Command),
    AbortTransfer,
    Finished,
    Ignored,
}

/// Per-target upload state machine. Two instances exist; the voice keyer one
/// chains into a settings save, the firmware one only records the result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadController {
    target: UploadTarget,
    state: UploadState,
    session: Option<UploadSession>,
    last_error: Option<UploadFailure>,
    #[serde(skip)]
    pending_save: Option<Command>,
}

impl UploadController {
    pub fn new(target: UploadTarget) -> Self {
        Self {
            target,
            state: UploadState::Idle,
            session: None,
            last_error: None,
            pending_save: None,
        }
    }

    pub fn target(&self) -> UploadTarget {
        self.target
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn session(&self) -> Option<&UploadSession> {
        self.session.as_ref()
    }

    pub fn last_error(&self) -> Option<&UploadFailure> {
        self.last_error.as_ref()
    }

    pub fn supports_cancel(&self) -> bool {
        self.target == UploadTarget::Firmware
    }

    /// `save` is the settings command sent once a voice keyer upload succeeds,
    /// or straight away when no file was picked. Firmware ignores it.
    pub fn confirm(
        &mut self,
        file: Option<PathBuf>,
        save: Option<Command>,
    ) -> Result<ConfirmOutcome, UploadError> {
        if self.state.is_active() {
            return Err(UploadError::Busy(self.target));
        }
        self.last_error = None;
        self.session = None;
        self.pending_save = None;

        let save = match self.target {
            UploadTarget::VoiceKeyer => save,
            UploadTarget::Firmware => None,
        };
        match file {
            None => {
                self.state = UploadState::Idle;
                Ok(save.map_or(ConfirmOutcome::Nothing, ConfirmOutcome::SaveSettings))
            }
            Some(path) => {
                self.pending_save = save;
                self.state = UploadState::Reading;
                Ok(ConfirmOutcome::ReadFile(path))
            }
        }
    }

    /// File is in memory: open the session and return the begin command.
    pub fn file_loaded(&mut self, total_len: u64) -> Result<Command, UploadError> {
        self.expect(UploadState::Reading, "file_loaded")?;
        self.session = Some(UploadSession {
            id: Uuid::new_v4(),
            target: self.target,
            total_len,
            offset: 0,
            finished: false,
            cancelled: false,
        });
        self.state = UploadState::Announced;
        Ok(match self.target {
            UploadTarget::VoiceKeyer => commands::begin_voice_keyer_upload(total_len),
            UploadTarget::Firmware => commands::begin_firmware_upload(),
        })
    }

    pub fn file_failed(&mut self, message: impl Into<String>) {
        self.state = UploadState::Idle;
        self.session = None;
        self.pending_save = None;
        self.last_error = Some(UploadFailure::FileRead {
            message: message.into(),
        });
    }

    pub fn streaming_started(&mut self) -> Result<(), UploadError> {
        self.expect(UploadState::Announced, "streaming_started")?;
        self.state = UploadState::Streaming;
        Ok(())
    }

    /// The local send loop is done; the result comes later from the device.
    pub fn stream_finished(&mut self, report: &StreamReport) {
        if let Some(session) = self.session.as_mut() {
            session.offset = report.sent_bytes;
            session.cancelled = report.cancelled;
            session.finished = true;
        }
        if self.state == UploadState::Streaming {
            self.state = UploadState::AwaitingServerResult;
        }
    }

    pub fn complete(&mut self, success: bool, error_type: i32, errno: i32) -> CompletionOutcome {
        if !self.state.accepts_result() {
            return CompletionOutcome::Ignored;
        }
        self.session = None;

        if success {
            self.state = UploadState::Completed;
            return match self.pending_save.take() {
                Some(save) => CompletionOutcome::SaveSettings(save),
                None => CompletionOutcome::Finished,
            };
        }

        self.state = UploadState::Failed;
        self.pending_save = None;
        match self.target {
            UploadTarget::VoiceKeyer => {
                self.last_error = Some(UploadFailure::Device {
                    error_type,
                    errno,
                    message: VoiceKeyerError::from_wire(error_type, errno).to_string(),
                });
                CompletionOutcome::AbortTransfer
            }
            UploadTarget::Firmware => {
                self.last_error = Some(UploadFailure::Device {
                    error_type,
                    errno,
                    message: "firmware update failed".to_string(),
                });
                CompletionOutcome::Finished
            }
        }
    }

    /// Drops an in-flight session, e.g. when the connection goes away.
    pub fn abort(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.state = UploadState::Aborted;
        self.session = None;
        self.pending_save = None;
        true
    }

    fn expect(&self, state: UploadState, event: &'static str) -> Result<(), UploadError> {
        if self.state == state {
            Ok(())
        } else {
            Err(UploadError::InvalidState {
                target: self.target,
                state: self.state,
                event,
            })
        }
    }
}

pub fn plan_chunks(total_len: usize, chunk_size: usize) -> impl Iterator<Item = Range<usize>> {
    (0..total_len)
        .step_by(chunk_size.max(1))
        .map(move |start| start..(start + chunk_size).min(total_len))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub sent_bytes: u64,
    pub chunks: usize,
    pub cancelled: bool,
}

/// Pushes `data` to the socket writer in fixed-size binary frames, yielding
/// between chunks. `cancel` is checked before every chunk.
pub async fn stream_chunks(
    data: Arc<Vec<u8>>,
    out: mpsc::Sender<OutboundFrame>,
    cancel: Option<Arc<AtomicBool>>,
    pace: Duration,
) -> Result<StreamReport, UploadError> {
    let mut report = StreamReport::default();
    for range in plan_chunks(data.len(), UPLOAD_CHUNK_SIZE) {
        if cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Acquire)) {
            report.cancelled = true;
            break;
        }
        let len = range.len();
        out.send(OutboundFrame::Binary(data[range].to_vec()))
            .await
            .map_err(|_| UploadError::ChannelClosed)?;
        report.sent_bytes += len as u64;
        report.chunks += 1;

        if pace.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(pace).await;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VoiceKeyerInfo;

    fn save_command() -> Command {
        Command::SaveVoiceKeyerInfo(VoiceKeyerInfo {
            enabled: true,
            times_to_transmit: 10,
            seconds_to_wait: 5,
        })
    }

    #[test]
    fn ten_thousand_bytes_split_into_three_chunks() {
        let sizes: Vec<usize> = plan_chunks(10_000, UPLOAD_CHUNK_SIZE).map(|r| r.len()).collect();
        assert_eq!(sizes, vec![4096, 4096, 1808]);
        assert_eq!(sizes.iter().sum::<usize>(), 10_000);

        let starts: Vec<usize> = plan_chunks(10_000, UPLOAD_CHUNK_SIZE).map(|r| r.start).collect();
        assert_eq!(starts, vec![0, 4096, 8192]);
        assert_eq!(plan_chunks(0, UPLOAD_CHUNK_SIZE).count(), 0);
        assert_eq!(plan_chunks(4096, UPLOAD_CHUNK_SIZE).count(), 1);
    }

    #[test]
    fn voice_keyer_without_file_saves_immediately() {
        let mut vk = UploadController::new(UploadTarget::VoiceKeyer);
        let outcome = vk.confirm(None, Some(save_command())).unwrap();
        assert_eq!(outcome, ConfirmOutcome::SaveSettings(save_command()));
        assert_eq!(vk.state(), UploadState::Idle);
        assert!(vk.session().is_none());
    }

    #[test]
    fn firmware_without_file_does_nothing() {
        let mut fw = UploadController::new(UploadTarget::Firmware);
        assert_eq!(fw.confirm(None, Some(save_command())).unwrap(), ConfirmOutcome::Nothing);
        assert_eq!(fw.state(), UploadState::Idle);
    }

    #[test]
    fn voice_keyer_success_chains_settings_save() {
        let mut vk = UploadController::new(UploadTarget::VoiceKeyer);
        let path = PathBuf::from("cq.wav");
        assert_eq!(
            vk.confirm(Some(path.clone()), Some(save_command())).unwrap(),
            ConfirmOutcome::ReadFile(path)
        );
        assert!(matches!(vk.confirm(None, None), Err(UploadError::Busy(_))));

        let begin = vk.file_loaded(10_000).unwrap();
        assert_eq!(begin, Command::UploadVoiceKeyerFile { size: 10_000 });
        assert_eq!(vk.session().unwrap().total_len, 10_000);

        vk.streaming_started().unwrap();
        vk.stream_finished(&StreamReport {
            sent_bytes: 10_000,
            chunks: 3,
            cancelled: false,
        });
        assert_eq!(vk.state(), UploadState::AwaitingServerResult);
        assert_eq!(vk.session().unwrap().offset, 10_000);
        assert!(vk.session().unwrap().finished);

        assert_eq!(
            vk.complete(true, 0, 0),
            CompletionOutcome::SaveSettings(save_command())
        );
        assert_eq!(vk.state(), UploadState::Completed);
        assert!(vk.session().is_none());
    }

    #[test]
    fn voice_keyer_early_failure_aborts_transfer() {
        let mut vk = UploadController::new(UploadTarget::VoiceKeyer);
        vk.confirm(Some(PathBuf::from("long.wav")), Some(save_command()))
            .unwrap();
        vk.file_loaded(900_000).unwrap();
        vk.streaming_started().unwrap();

        assert_eq!(vk.complete(false, 6, 0), CompletionOutcome::AbortTransfer);
        assert_eq!(vk.state(), UploadState::Failed);
        let Some(UploadFailure::Device { message, .. }) = vk.last_error() else {
            panic!("expected device failure");
        };
        assert!(message.contains("512 KB"));

        // late report from the aborted stream must not revive the session
        vk.stream_finished(&StreamReport::default());
        assert_eq!(vk.state(), UploadState::Failed);
        assert_eq!(vk.complete(true, 0, 0), CompletionOutcome::Ignored);
    }

    #[test]
    fn firmware_result_only_flips_state() {
        let mut fw = UploadController::new(UploadTarget::Firmware);
        fw.confirm(Some(PathBuf::from("ezdv.bin")), None).unwrap();
        assert_eq!(fw.file_loaded(1 << 20).unwrap(), Command::UploadFirmwareFile);
        fw.streaming_started().unwrap();
        assert_eq!(fw.complete(false, 0, 0), CompletionOutcome::Finished);
        assert_eq!(fw.state(), UploadState::Failed);

        fw.confirm(Some(PathBuf::from("ezdv.bin")), None).unwrap();
        fw.file_loaded(1 << 20).unwrap();
        assert_eq!(fw.complete(true, 0, 0), CompletionOutcome::Finished);
        assert_eq!(fw.state(), UploadState::Completed);
    }

    #[test]
    fn read_failure_returns_to_idle_with_error() {
        let mut vk = UploadController::new(UploadTarget::VoiceKeyer);
        vk.confirm(Some(PathBuf::from("missing.wav")), Some(save_command()))
            .unwrap();
        vk.file_failed("No such file or directory");
        assert_eq!(vk.state(), UploadState::Idle);
        assert!(matches!(vk.last_error(), Some(UploadFailure::FileRead { .. })));
        assert!(vk.file_loaded(10).is_err());
    }

    #[test]
    fn abort_only_touches_active_sessions() {
        let mut fw = UploadController::new(UploadTarget::Firmware);
        assert!(!fw.abort());
        fw.confirm(Some(PathBuf::from("ezdv.bin")), None).unwrap();
        assert!(fw.abort());
        assert_eq!(fw.state(), UploadState::Aborted);
        assert!(fw.confirm(None, None).is_ok());
    }

    #[tokio::test]
    async fn stream_sends_every_chunk_in_order() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(stream_chunks(
            Arc::new(data.clone()),
            tx,
            None,
            Duration::ZERO,
        ));

        let mut received = Vec::new();
        let mut sizes = Vec::new();
        while let Some(frame) = rx.recv().await {
            let OutboundFrame::Binary(chunk) = frame else {
                panic!("expected binary frame");
            };
            sizes.push(chunk.len());
            received.extend_from_slice(&chunk);
        }
        let report = task.await.unwrap().unwrap();
        assert_eq!(sizes, vec![4096, 4096, 1808]);
        assert_eq!(received, data);
        assert_eq!(report.sent_bytes, 10_000);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn cancelled_stream_stops_between_chunks() {
        let data = Arc::new(vec![0u8; UPLOAD_CHUNK_SIZE * 5]);
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(stream_chunks(
            data,
            tx,
            Some(cancel.clone()),
            Duration::ZERO,
        ));

        assert!(rx.recv().await.is_some());
        cancel.store(true, Ordering::Release);
        let mut received = 1;
        while rx.recv().await.is_some() {
            received += 1;
        }

        let report = task.await.unwrap().unwrap();
        assert!(report.cancelled);
        assert!(report.chunks < 5);
        assert_eq!(report.chunks, received);
    }

    #[tokio::test]
    async fn stream_reports_closed_writer() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let result = stream_chunks(Arc::new(vec![1u8; 10]), tx, None, Duration::ZERO).await;
        assert!(matches!(result, Err(UploadError::ChannelClosed)));
    }
}
