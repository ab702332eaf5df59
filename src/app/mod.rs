use crate::commands::VoiceKeyerForm;
use crate::config::Config;
use crate::model::{FreeDvMode, OperationStatus, SessionState};
use crate::session::{run_session, SessionOptions, UserAction};
use crate::upload::UploadState;
use rand::{distributions::Alphanumeric, Rng};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const RESULT_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    if let Some(ref command) = std::env::args().nth(1) {
        return match command.as_str() {
            "config-init" => handle_config_init(),
            "status" => handle_status(&config).await,
            "set-mode" => handle_set_mode(&config).await,
            "reboot" => handle_reboot(&config).await,
            "upload-firmware" => handle_upload_firmware(&config).await,
            "upload-voice-keyer" => handle_upload_voice_keyer(&config).await,
            other => Err(format!(
                "unknown command '{other}' (expected config-init, status, set-mode, reboot, upload-firmware, upload-voice-keyer)"
            )
            .into()),
        };
    }

    let (state_tx, state_rx) = watch::channel(SessionState::default());
    let (actions_tx, actions_rx) = mpsc::channel(config.session.action_queue);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let session_task = tokio::spawn(run_session(
        SessionOptions::from_config(&config),
        actions_rx,
        state_tx,
        shutdown_rx.clone(),
    ));

    let server = if config.server.enabled {
        let addr: SocketAddr = format!("127.0.0.1:{}", config.server.port).parse()?;
        let token = config
            .server
            .token
            .clone()
            .unwrap_or_else(|| generate_token(32));
        println!(
            "Control API: http://127.0.0.1:{}/state?token={}",
            config.server.port, token
        );
        Some((addr, token))
    } else {
        None
    };

    let serve = async {
        match server {
            Some((addr, token)) => {
                crate::server::start(addr, token, state_rx, actions_tx, shutdown_rx).await
            }
            None => {
                // keep the action queue open so the session keeps running
                let _actions = actions_tx;
                std::future::pending().await
            }
        }
    };

    let result = tokio::select! {
        res = serve => res,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("shutdown: ctrl-c");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    let _ = session_task.await;
    result
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

/// A session started just for one CLI command.
struct OneShot {
    actions: mpsc::Sender<UserAction>,
    states: watch::Receiver<SessionState>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl OneShot {
    async fn connect(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let (state_tx, states) = watch::channel(SessionState::default());
        let (actions, actions_rx) = mpsc::channel(config.session.action_queue);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_session(
            SessionOptions::from_config(config),
            actions_rx,
            state_tx,
            shutdown_rx,
        ));
        let mut session = Self {
            actions,
            states,
            shutdown,
            task,
        };
        session
            .wait_until("device connection", CONNECT_TIMEOUT, |s| s.connected)
            .await?;
        Ok(session)
    }

    async fn send(&self, action: UserAction) -> Result<(), Box<dyn std::error::Error>> {
        self.actions
            .send(action)
            .await
            .map_err(|_| "session stopped".into())
    }

    async fn wait_until(
        &mut self,
        what: &str,
        timeout: Duration,
        pred: impl FnMut(&SessionState) -> bool,
    ) -> Result<SessionState, Box<dyn std::error::Error>> {
        let state = tokio::time::timeout(timeout, self.states.wait_for(pred))
            .await
            .map_err(|_| format!("timed out waiting for {what}"))?
            .map_err(|_| "session stopped")?;
        Ok((*state).clone())
    }

    async fn finish(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

async fn handle_status(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = OneShot::connect(config).await?;
    let state = session
        .wait_until("device settings", RESULT_TIMEOUT, |s| {
            s.has_initial_snapshots()
        })
        .await;
    session.finish().await;

    let state = state?;
    println!(
        "{}",
        serde_json::to_string_pretty(&crate::server::state_payload(&state))?
    );
    Ok(())
}

async fn handle_set_mode(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let name = std::env::args()
        .nth(2)
        .ok_or("missing mode (usage: set-mode <analog|700d|700e|1600>)")?;
    let mode = FreeDvMode::parse(&name).ok_or_else(|| format!("unknown mode '{name}'"))?;

    let mut session = OneShot::connect(config).await?;
    let result = async {
        session.send(UserAction::SetMode { mode }).await?;
        session
            .wait_until("mode change", RESULT_TIMEOUT, |s| s.mode == Some(mode))
            .await
    }
    .await;
    session.finish().await;

    result?;
    println!("mode set to {name}");
    Ok(())
}

async fn handle_reboot(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = OneShot::connect(config).await?;
    let result = async {
        session.send(UserAction::Reboot).await?;
        session
            .wait_until("device to restart", RESULT_TIMEOUT, |s| !s.connected)
            .await
    }
    .await;
    session.finish().await;

    result?;
    println!("device is rebooting");
    Ok(())
}

fn file_arg(usage: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(2)
        .map(PathBuf::from)
        .ok_or_else(|| format!("missing file (usage: {usage})"))?;
    if !path.is_file() {
        return Err(format!("{} is not a file", path.display()).into());
    }
    Ok(path)
}

async fn handle_upload_firmware(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let path = file_arg("upload-firmware <file>")?;

    let mut session = OneShot::connect(config).await?;
    let result = async {
        session
            .send(UserAction::UploadFirmware { file: Some(path) })
            .await?;

        let finished = |s: &SessionState| {
            let fw = &s.uploads.firmware;
            matches!(
                fw.state(),
                UploadState::Completed | UploadState::Failed | UploadState::Aborted
            ) || fw.last_error().is_some()
        };
        tokio::select! {
            res = session.wait_until("firmware upload result", UPLOAD_TIMEOUT, finished) => res,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("cancelling firmware upload");
                Err("firmware upload cancelled".into())
            }
        }
    }
    .await;

    if result.is_err() {
        let _ = session.send(UserAction::CancelFirmwareUpload).await;
    }
    session.finish().await;

    let state = result?;
    let fw = &state.uploads.firmware;
    match fw.state() {
        UploadState::Completed => {
            println!("firmware accepted, device is restarting");
            Ok(())
        }
        other => Err(format!(
            "firmware upload ended in {other:?}: {}",
            fw.last_error()
                .map(|e| format!("{e:?}"))
                .unwrap_or_else(|| "no detail".to_string())
        )
        .into()),
    }
}

async fn handle_upload_voice_keyer(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let path = file_arg("upload-voice-keyer <file>")?;

    let mut session = OneShot::connect(config).await?;
    let result = async {
        let state = session
            .wait_until("voice keyer settings", RESULT_TIMEOUT, |s| {
                s.voice_keyer.is_some()
            })
            .await?;
        let form = state
            .voice_keyer
            .as_ref()
            .map(VoiceKeyerForm::from)
            .unwrap_or_default();
        session
            .send(UserAction::SaveVoiceKeyer {
                form,
                file: Some(path),
            })
            .await?;
        session
            .wait_until("voice keyer upload result", UPLOAD_TIMEOUT, |s| {
                let vk = &s.uploads.voice_keyer;
                match vk.state() {
                    UploadState::Failed | UploadState::Aborted => true,
                    UploadState::Idle => vk.last_error().is_some(),
                    UploadState::Completed => s.saves.voice_keyer != OperationStatus::Pending,
                    _ => false,
                }
            })
            .await
    }
    .await;
    session.finish().await;

    let state = result?;
    if state.uploads.voice_keyer.state() == UploadState::Completed
        && state.saves.voice_keyer == OperationStatus::Succeeded
    {
        println!("voice keyer file uploaded and settings saved");
        return Ok(());
    }
    let detail = state
        .voice_keyer_error
        .clone()
        .or_else(|| {
            state
                .uploads
                .voice_keyer
                .last_error()
                .map(|e| format!("{e:?}"))
        })
        .unwrap_or_else(|| "upload did not complete".to_string());
    Err(detail.into())
}

fn generate_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_alphanumeric() {
        let token = generate_token(32);
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_token(32));
    }
}
