use crate::commands::{self, RadioForm, ReportingForm, VoiceKeyerForm, WifiForm};
use crate::config::Config;
use crate::dispatch::{dispatch, Effect};
use crate::model::{FreeDvMode, OperationStatus, SaveDomain, SessionState};
use crate::protocol::{decode, Command, Inbound, OutboundFrame};
use crate::upload::{self, ConfirmOutcome, StreamReport, UploadError, UploadTarget};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type DeviceSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type DeviceSink = SplitSink<DeviceSocket, Message>;

const TRANSFER_EVENT_QUEUE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseKind {
    Intentional,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "kind", rename_all = "snake_case")]
pub enum LinkState {
    Connecting,
    Open,
    Closed(CloseKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAction {
    Resume,
    CloseForReload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    Reload,
    Reconnect { delay: Duration },
}

/// Connection lifecycle with the reload latch: the first drop reconnects after
/// a delay, every later open forces a full reload of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSupervisor {
    link: LinkState,
    reload_on_reconnect: bool,
    pending_reload: bool,
    reconnect_delay: Duration,
}

impl ConnectionSupervisor {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            link: LinkState::Connecting,
            reload_on_reconnect: false,
            pending_reload: false,
            reconnect_delay,
        }
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn reload_armed(&self) -> bool {
        self.reload_on_reconnect
    }

    pub fn pending_reload(&self) -> bool {
        self.pending_reload
    }

    pub fn connecting(&mut self) {
        self.link = LinkState::Connecting;
    }

    pub fn on_open(&mut self) -> OpenAction {
        self.link = LinkState::Open;
        if self.reload_on_reconnect {
            self.pending_reload = true;
            OpenAction::CloseForReload
        } else {
            OpenAction::Resume
        }
    }

    pub fn on_close(&mut self, kind: CloseKind) -> CloseAction {
        self.link = LinkState::Closed(kind);
        if self.pending_reload {
            *self = Self::new(self.reconnect_delay);
            return CloseAction::Reload;
        }
        self.reload_on_reconnect = true;
        CloseAction::Reconnect {
            delay: self.reconnect_delay,
        }
    }
}

/// A request from the local surface (control API or CLI).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UserAction {
    SaveWifi(WifiForm),
    SaveRadio(RadioForm),
    SaveReporting(ReportingForm),
    SaveVoiceKeyer {
        #[serde(default)]
        form: VoiceKeyerForm,
        #[serde(default)]
        file: Option<PathBuf>,
    },
    SetLedBrightness {
        duty_cycle: String,
    },
    SetMode {
        mode: FreeDvMode,
    },
    StartWifiScan,
    StopWifiScan,
    Reboot,
    ToggleVoiceKeyer,
    UploadFirmware {
        #[serde(default)]
        file: Option<PathBuf>,
    },
    CancelFirmwareUpload,
}

impl UserAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SaveWifi(_) => "save_wifi",
            Self::SaveRadio(_) => "save_radio",
            Self::SaveReporting(_) => "save_reporting",
            Self::SaveVoiceKeyer { .. } => "save_voice_keyer",
            Self::SetLedBrightness { .. } => "set_led_brightness",
            Self::SetMode { .. } => "set_mode",
            Self::StartWifiScan => "start_wifi_scan",
            Self::StopWifiScan => "stop_wifi_scan",
            Self::Reboot => "reboot",
            Self::ToggleVoiceKeyer => "toggle_voice_keyer",
            Self::UploadFirmware { .. } => "upload_firmware",
            Self::CancelFirmwareUpload => "cancel_firmware_upload",
        }
    }
}

#[derive(Debug)]
pub enum SessionError {
    Transport(tungstenite::Error),
    Encode(serde_json::Error),
    WriterClosed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "device socket error: {err}"),
            Self::Encode(err) => write!(f, "failed to encode command: {err}"),
            Self::WriterClosed => write!(f, "device socket writer stopped"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<tungstenite::Error> for SessionError {
    fn from(err: tungstenite::Error) -> Self {
        Self::Transport(err)
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub url: String,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub upload_pace: Duration,
    pub outbound_queue: usize,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.device.url(),
            reconnect_delay: config.session.reconnect_delay(),
            connect_timeout: config.session.connect_timeout(),
            upload_pace: config.session.upload_pace(),
            outbound_queue: config.session.outbound_queue,
        }
    }
}

enum Flow {
    Continue,
    Shutdown,
}

enum ConnectionEnd {
    Closed(CloseKind),
    Shutdown,
}

/// Owns the device session until shutdown. Every state change is published on
/// `state_tx`; actions are read from `actions`.
pub async fn run_session(
    options: SessionOptions,
    mut actions: mpsc::Receiver<UserAction>,
    state_tx: watch::Sender<SessionState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut supervisor = ConnectionSupervisor::new(options.reconnect_delay);
    let mut state = SessionState::default();
    state_tx.send_replace(state.clone());

    loop {
        supervisor.connecting();
        tracing::info!(url = %options.url, "connecting to device");

        let connect = tokio::time::timeout(
            options.connect_timeout,
            tokio_tungstenite::connect_async(options.url.as_str()),
        );
        tokio::pin!(connect);
        let connected = loop {
            tokio::select! {
                res = &mut connect => break res,
                action = actions.recv() => {
                    if let Flow::Shutdown = drop_while_disconnected(action) {
                        return;
                    }
                }
                _ = shutdown.changed() => return,
            }
        };

        let close = match connected {
            Ok(Ok((mut socket, _response))) => match supervisor.on_open() {
                OpenAction::CloseForReload => {
                    tracing::info!(
                        pending_reload = supervisor.pending_reload(),
                        "device reachable again, closing for reload"
                    );
                    if let Err(err) = socket.close(None).await {
                        tracing::debug!(error = %err, "close before reload failed");
                    }
                    CloseKind::Intentional
                }
                OpenAction::Resume => {
                    tracing::info!("device connected");
                    state.connected = true;
                    state.overlay_visible = false;
                    state_tx.send_replace(state.clone());

                    let end = run_connection(
                        socket,
                        &options,
                        &mut state,
                        &state_tx,
                        &mut actions,
                        &mut shutdown,
                    )
                    .await;
                    match end {
                        Ok(ConnectionEnd::Shutdown) => return,
                        Ok(ConnectionEnd::Closed(kind)) => kind,
                        Err(err) => {
                            tracing::warn!(error = %err, "device session error");
                            CloseKind::Error
                        }
                    }
                }
            },
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "device connect failed");
                CloseKind::Error
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = options.connect_timeout.as_millis() as u64,
                    "device connect timed out"
                );
                CloseKind::Error
            }
        };

        let action = supervisor.on_close(close);
        tracing::debug!(link = ?supervisor.link(), "connection closed");
        match action {
            CloseAction::Reload => {
                tracing::info!("reloading session state");
                state = SessionState::default();
                state_tx.send_replace(state.clone());
            }
            CloseAction::Reconnect { delay } => {
                tracing::info!(
                    delay_ms = delay.as_millis() as u64,
                    reload_armed = supervisor.reload_armed(),
                    "device disconnected, reconnecting"
                );
                state.connected = false;
                state.overlay_visible = true;
                state_tx.send_replace(state.clone());

                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => break,
                        action = actions.recv() => {
                            if let Flow::Shutdown = drop_while_disconnected(action) {
                                return;
                            }
                        }
                        _ = shutdown.changed() => return,
                    }
                }
            }
        }
    }
}

fn drop_while_disconnected(action: Option<UserAction>) -> Flow {
    match action {
        Some(action) => {
            tracing::warn!(action = action.name(), "device not connected, dropping action");
            Flow::Continue
        }
        None => Flow::Shutdown,
    }
}

async fn run_connection(
    socket: DeviceSocket,
    options: &SessionOptions,
    state: &mut SessionState,
    state_tx: &watch::Sender<SessionState>,
    actions: &mut mpsc::Receiver<UserAction>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<ConnectionEnd, SessionError> {
    let (sink, mut stream) = socket.split();
    let (out_tx, out_rx) = mpsc::channel(options.outbound_queue);
    let (events_tx, mut events_rx) = mpsc::channel(TRANSFER_EVENT_QUEUE);
    let mut writer = tokio::spawn(write_frames(sink, out_rx));

    let mut conn = Connection {
        outbound: out_tx,
        events: events_tx,
        upload_pace: options.upload_pace,
        transfers: HashMap::new(),
        generation: 0,
        state_tx,
    };

    let result = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(err) = conn.handle_text(state, &text).await {
                        break Err(err);
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(len = data.len(), "ignoring binary frame from device");
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "device closed the connection");
                    break Ok(ConnectionEnd::Closed(CloseKind::Intentional));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => break Err(SessionError::Transport(err)),
                None => break Ok(ConnectionEnd::Closed(CloseKind::Intentional)),
            },
            action = actions.recv() => match action {
                Some(action) => {
                    if let Err(err) = conn.apply_action(state, action).await {
                        break Err(err);
                    }
                }
                None => break Ok(ConnectionEnd::Shutdown),
            },
            Some(event) = events_rx.recv() => {
                if let Err(err) = conn.transfer_event(state, event).await {
                    break Err(err);
                }
            }
            res = &mut writer => {
                break match res {
                    Ok(Ok(())) => Err(SessionError::WriterClosed),
                    Ok(Err(err)) => Err(SessionError::Transport(err)),
                    Err(err) => {
                        tracing::warn!(error = %err, "socket writer task failed");
                        Err(SessionError::WriterClosed)
                    }
                };
            }
            _ = shutdown.changed() => break Ok(ConnectionEnd::Shutdown),
        }
    };

    conn.teardown(state);
    writer.abort();
    result
}

async fn write_frames(
    mut sink: DeviceSink,
    mut frames: mpsc::Receiver<OutboundFrame>,
) -> Result<(), tungstenite::Error> {
    while let Some(frame) = frames.recv().await {
        let message = match frame {
            OutboundFrame::Text(text) => Message::Text(text),
            OutboundFrame::Binary(data) => Message::Binary(data),
        };
        sink.send(message).await?;
    }
    sink.close().await
}

struct Transfer {
    generation: u64,
    task: JoinHandle<()>,
    cancel: Option<Arc<AtomicBool>>,
}

#[derive(Debug)]
enum TransferEvent {
    Loaded {
        target: UploadTarget,
        generation: u64,
        data: Vec<u8>,
    },
    ReadFailed {
        target: UploadTarget,
        generation: u64,
        error: String,
    },
    Streamed {
        target: UploadTarget,
        generation: u64,
        result: Result<StreamReport, UploadError>,
    },
}

impl TransferEvent {
    fn key(&self) -> (UploadTarget, u64) {
        match self {
            Self::Loaded {
                target, generation, ..
            }
            | Self::ReadFailed {
                target, generation, ..
            }
            | Self::Streamed {
                target, generation, ..
            } => (*target, *generation),
        }
    }
}

struct Connection<'a> {
    outbound: mpsc::Sender<OutboundFrame>,
    events: mpsc::Sender<TransferEvent>,
    upload_pace: Duration,
    transfers: HashMap<UploadTarget, Transfer>,
    generation: u64,
    state_tx: &'a watch::Sender<SessionState>,
}

impl Connection<'_> {
    fn publish(&self, state: &SessionState) {
        self.state_tx.send_replace(state.clone());
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        let text = command.encode().map_err(SessionError::Encode)?;
        tracing::debug!(command = command.kind(), "sending command");
        self.outbound
            .send(OutboundFrame::Text(text))
            .await
            .map_err(|_| SessionError::WriterClosed)
    }

    async fn handle_text(&mut self, state: &mut SessionState, text: &str) -> Result<(), SessionError> {
        let message = match decode(text) {
            Inbound::Message(message) => message,
            Inbound::Unknown(kind) => {
                tracing::debug!(kind = %kind, "ignoring unknown device message");
                return Ok(());
            }
            Inbound::Malformed(reason) => {
                tracing::debug!(reason = %reason, "dropping malformed device message");
                return Ok(());
            }
        };

        for effect in dispatch(state, message) {
            match effect {
                Effect::Send(command) => self.send(command).await?,
                Effect::AbortTransfer(target) => self.cancel_transfer(target),
                Effect::CancelTransfer(target) => {
                    if !self.stop_stream(target) {
                        self.cancel_transfer(target);
                    }
                }
            }
        }
        self.publish(state);
        Ok(())
    }

    async fn save(
        &mut self,
        state: &mut SessionState,
        domain: SaveDomain,
        command: Command,
    ) -> Result<(), SessionError> {
        state.saves.set(domain, OperationStatus::Pending);
        self.publish(state);
        self.send(command).await
    }

    async fn apply_action(
        &mut self,
        state: &mut SessionState,
        action: UserAction,
    ) -> Result<(), SessionError> {
        tracing::debug!(action = action.name(), "user action");
        match action {
            UserAction::SaveWifi(form) => {
                self.save(state, SaveDomain::Wifi, commands::save_wifi(&form))
                    .await
            }
            UserAction::SaveRadio(form) => {
                self.save(state, SaveDomain::Radio, commands::save_radio(&form))
                    .await
            }
            UserAction::SaveReporting(form) => {
                self.save(state, SaveDomain::Reporting, commands::save_reporting(&form))
                    .await
            }
            UserAction::SaveVoiceKeyer { form, file } => {
                let save = commands::save_voice_keyer(&form);
                match state.uploads.voice_keyer.confirm(file, Some(save)) {
                    Ok(ConfirmOutcome::SaveSettings(save)) => {
                        state.voice_keyer_error = None;
                        self.save(state, SaveDomain::VoiceKeyer, save).await
                    }
                    Ok(ConfirmOutcome::ReadFile(path)) => {
                        state.voice_keyer_error = None;
                        state.saves.set(SaveDomain::VoiceKeyer, OperationStatus::Pending);
                        self.start_read(UploadTarget::VoiceKeyer, path);
                        self.publish(state);
                        Ok(())
                    }
                    Ok(ConfirmOutcome::Nothing) => Ok(()),
                    Err(err) => {
                        tracing::warn!(error = %err, "voice keyer save rejected");
                        Ok(())
                    }
                }
            }
            UserAction::SetLedBrightness { duty_cycle } => {
                self.send(commands::set_led_brightness(&duty_cycle)).await
            }
            UserAction::SetMode { mode } => self.send(commands::set_mode(mode)).await,
            UserAction::StartWifiScan => self.send(commands::wifi_scan(true)).await,
            UserAction::StopWifiScan => self.send(commands::wifi_scan(false)).await,
            UserAction::Reboot => self.send(commands::reboot()).await,
            UserAction::ToggleVoiceKeyer => {
                self.send(commands::toggle_voice_keyer(state.voice_keyer_running))
                    .await
            }
            UserAction::UploadFirmware { file } => {
                match state.uploads.firmware.confirm(file, None) {
                    Ok(ConfirmOutcome::ReadFile(path)) => {
                        self.start_read(UploadTarget::Firmware, path);
                        self.publish(state);
                    }
                    Ok(_) => tracing::debug!("no firmware file selected"),
                    Err(err) => tracing::warn!(error = %err, "firmware upload rejected"),
                }
                Ok(())
            }
            UserAction::CancelFirmwareUpload => {
                if self.stop_stream(UploadTarget::Firmware) {
                    tracing::info!("cancelling firmware upload");
                } else {
                    tracing::debug!("no firmware upload to cancel");
                }
                Ok(())
            }
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn start_read(&mut self, target: UploadTarget, path: PathBuf) {
        let generation = self.next_generation();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let event = match tokio::fs::read(&path).await {
                Ok(data) => TransferEvent::Loaded {
                    target,
                    generation,
                    data,
                },
                Err(err) => TransferEvent::ReadFailed {
                    target,
                    generation,
                    error: format!("{}: {err}", path.display()),
                },
            };
            let _ = events.send(event).await;
        });
        self.replace_transfer(
            target,
            Transfer {
                generation,
                task,
                cancel: None,
            },
        );
    }

    fn replace_transfer(&mut self, target: UploadTarget, transfer: Transfer) {
        if let Some(previous) = self.transfers.insert(target, transfer) {
            previous.task.abort();
        }
    }

    /// Raises the stream's cancel flag. False when the transfer has none.
    fn stop_stream(&self, target: UploadTarget) -> bool {
        match self.transfers.get(&target).and_then(|t| t.cancel.as_ref()) {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    fn cancel_transfer(&mut self, target: UploadTarget) {
        if let Some(transfer) = self.transfers.remove(&target) {
            tracing::info!(target = %target, "aborting upload task");
            transfer.task.abort();
        }
    }

    async fn transfer_event(
        &mut self,
        state: &mut SessionState,
        event: TransferEvent,
    ) -> Result<(), SessionError> {
        let (target, generation) = event.key();
        if self.transfers.get(&target).map(|t| t.generation) != Some(generation) {
            tracing::debug!(target = %target, "dropping stale transfer event");
            return Ok(());
        }

        match event {
            TransferEvent::Loaded { data, .. } => {
                let controller = state.uploads.get_mut(target);
                let begin = match controller.file_loaded(data.len() as u64) {
                    Ok(begin) => begin,
                    Err(err) => {
                        tracing::warn!(error = %err, "upload file loaded out of order");
                        self.transfers.remove(&target);
                        return Ok(());
                    }
                };
                if let Some(session) = controller.session() {
                    tracing::info!(
                        target = %controller.target(),
                        upload_id = %session.id,
                        bytes = session.total_len,
                        "starting upload"
                    );
                }
                let cancel = controller
                    .supports_cancel()
                    .then(|| Arc::new(AtomicBool::new(false)));
                self.send(begin).await?;
                if let Err(err) = state.uploads.get_mut(target).streaming_started() {
                    tracing::warn!(error = %err, "upload could not start streaming");
                    self.transfers.remove(&target);
                    return Ok(());
                }

                let events = self.events.clone();
                let outbound = self.outbound.clone();
                let pace = self.upload_pace;
                let stream_cancel = cancel.clone();
                let task = tokio::spawn(async move {
                    let result =
                        upload::stream_chunks(Arc::new(data), outbound, stream_cancel, pace).await;
                    let _ = events
                        .send(TransferEvent::Streamed {
                            target,
                            generation,
                            result,
                        })
                        .await;
                });
                self.transfers.insert(
                    target,
                    Transfer {
                        generation,
                        task,
                        cancel,
                    },
                );
            }
            TransferEvent::ReadFailed { error, .. } => {
                tracing::warn!(target = %target, error = %error, "failed to read upload file");
                state.uploads.get_mut(target).file_failed(error);
                if target == UploadTarget::VoiceKeyer {
                    state.saves.set(SaveDomain::VoiceKeyer, OperationStatus::Idle);
                }
                self.transfers.remove(&target);
            }
            TransferEvent::Streamed { result, .. } => {
                self.transfers.remove(&target);
                match result {
                    Ok(report) => {
                        if report.cancelled {
                            tracing::info!(
                                target = %target,
                                sent = report.sent_bytes,
                                "upload cancelled, transfer left truncated"
                            );
                        } else {
                            tracing::info!(
                                target = %target,
                                chunks = report.chunks,
                                sent = report.sent_bytes,
                                "upload streamed, awaiting device result"
                            );
                        }
                        state.uploads.get_mut(target).stream_finished(&report);
                    }
                    Err(err) => {
                        tracing::warn!(target = %target, error = %err, "upload stream stopped");
                        return Err(SessionError::WriterClosed);
                    }
                }
            }
        }
        self.publish(state);
        Ok(())
    }

    fn teardown(&mut self, state: &mut SessionState) {
        for (_, transfer) in self.transfers.drain() {
            transfer.task.abort();
        }
        for target in [UploadTarget::VoiceKeyer, UploadTarget::Firmware] {
            if state.uploads.get_mut(target).abort() {
                tracing::warn!(target = %target, "upload aborted by disconnect");
            }
        }
        state.connected = false;
        self.publish(state);
    }
}
