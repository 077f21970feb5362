//! Session Lifecycle Controller
//!
//! Stands up one agent session step by step, relays audio for a fixed window,
//! and always tears down whatever was created, listener before agent.

use crate::{
    error::{SessionError, error_chain},
    report::{SessionResult, StepOutcome, TeardownReport, TeardownStep},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;
use voxlink_core::{
    AgentOptions, AudioBridge, ControlClient, CreateAgentRequest, DeviceError, JoinOptions,
    JoinRoomRequest, ListenOptions, ListenRequest,
};
use voxlink_relay::{DuplexRelay, RelayConfig, RelayHandle, ServerLogSink, TracingLogSink};

/// What to run: which model, what prompt, and for how long.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub model_pattern: String,
    pub prompt: String,
    pub duration: Duration,
    pub agent_options: AgentOptions,
    pub listen_options: ListenOptions,
    pub join_options: JoinOptions,
}

impl SessionRequest {
    pub fn new(model_pattern: impl Into<String>, prompt: impl Into<String>, duration: Duration) -> Self {
        Self {
            model_pattern: model_pattern.into(),
            prompt: prompt.into(),
            duration,
            agent_options: AgentOptions::default(),
            listen_options: ListenOptions::default(),
            join_options: JoinOptions::default(),
        }
    }
}

/// Remote and local resources acquired so far.
#[derive(Default)]
struct Resources {
    bridge: Option<AudioBridge>,
    agent_id: Option<String>,
    listener_id: Option<String>,
    relay: Option<RelayHandle>,
}

/// Runs a single session against the control API.
///
/// The controller owns the audio bridge from construction until teardown.
pub struct SessionController {
    client: Arc<dyn ControlClient>,
    bridge: Option<AudioBridge>,
    relay_config: RelayConfig,
    log_sink: Arc<dyn ServerLogSink>,
    interrupt: Arc<Notify>,
}

impl SessionController {
    pub fn new(client: Arc<dyn ControlClient>, bridge: AudioBridge) -> Self {
        Self {
            client,
            bridge: Some(bridge),
            relay_config: RelayConfig::default(),
            log_sink: Arc::new(TracingLogSink),
            interrupt: Arc::new(Notify::new()),
        }
    }

    pub fn with_relay_config(mut self, relay_config: RelayConfig) -> Self {
        self.relay_config = relay_config;
        self
    }

    pub fn with_log_sink(mut self, log_sink: Arc<dyn ServerLogSink>) -> Self {
        self.log_sink = log_sink;
        self
    }

    /// Notifying this ends the hold early; teardown still runs.
    pub fn interrupt_handle(&self) -> Arc<Notify> {
        self.interrupt.clone()
    }

    /// Provisions, holds, and tears down one session.
    ///
    /// Never returns early: teardown runs whether or not setup succeeded,
    /// and its per-step results are part of the returned [`SessionResult`].
    pub async fn run_session(mut self, request: SessionRequest) -> SessionResult {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("session", %session_id, model_pattern = %request.model_pattern);
        async move {
            let mut resources = Resources {
                bridge: self.bridge.take(),
                ..Default::default()
            };

            let outcome = self.provision_and_hold(&request, &mut resources).await;
            if let Err(e) = &outcome {
                error!(step = e.step(), error = %error_chain(e), "Session setup failed; tearing down.");
            }

            let agent_id = resources.agent_id.clone();
            let listener_id = resources.listener_id.clone();
            let teardown = self.teardown(&mut resources).await;
            info!(%teardown, "Session finished.");

            SessionResult {
                outcome,
                teardown,
                agent_id,
                listener_id,
            }
        }
        .instrument(span)
        .await
    }

    async fn provision_and_hold(
        &self,
        request: &SessionRequest,
        resources: &mut Resources,
    ) -> Result<(), SessionError> {
        // --- 1. Select a model ---
        let models = self
            .client
            .list_models()
            .await
            .map_err(SessionError::ModelList)?;
        let model = models
            .select(&request.model_pattern)
            .ok_or_else(|| SessionError::ModelNotFound {
                pattern: request.model_pattern.clone(),
                available: models.len(),
            })?
            .to_string();
        info!(%model, "Model selected.");

        // --- 2. Create the agent ---
        let agent = self
            .client
            .create_agent(&CreateAgentRequest {
                model_name: model.clone(),
                prompt: request.prompt.clone(),
                options: request.agent_options.clone(),
            })
            .await
            .map_err(|source| SessionError::AgentCreation { model, source })?;
        info!(agent_id = %agent.id, "Agent created.");
        resources.agent_id = Some(agent.id.clone());

        // --- 3. Activate it for websocket transport ---
        let listener = self
            .client
            .activate_listener(
                &agent.id,
                &ListenRequest::websocket(request.listen_options.clone()),
            )
            .await
            .map_err(|source| SessionError::Activation {
                agent_id: agent.id.clone(),
                source,
            })?;
        info!(listener_id = %listener.id, "Listener activated.");
        resources.listener_id = Some(listener.id.clone());

        // --- 4. Join the room ---
        let room = self
            .client
            .join_room(
                &listener.id,
                &JoinRoomRequest {
                    options: request.join_options.clone(),
                },
            )
            .await
            .map_err(|source| SessionError::RoomJoin {
                listener_id: listener.id.clone(),
                source,
            })?;

        // --- 5. Open the relay, if the room has an audio socket ---
        match &room.audio_socket {
            Some(socket) => {
                let relay = DuplexRelay::connect(socket, &self.relay_config).await?;
                let Some(bridge) = resources.bridge.take() else {
                    error!("Audio devices are not available; closing the audio socket.");
                    if let Err(e) = relay.close().await {
                        warn!(error = %error_chain(&e), "Audio socket did not close cleanly.");
                    }
                    return Err(SessionError::Device(DeviceError::Unavailable(
                        "audio devices were already released".to_string(),
                    )));
                };
                resources.relay = Some(relay.start(bridge, self.log_sink.clone()));
            }
            None => info!("Room has no audio socket; running in log-only mode."),
        }

        // --- 6. Hold ---
        self.hold(request.duration, resources.relay.as_mut()).await
    }

    async fn hold(
        &self,
        duration: Duration,
        relay: Option<&mut RelayHandle>,
    ) -> Result<(), SessionError> {
        info!(?duration, "Session live.");
        let Some(relay) = relay else {
            tokio::select! {
                _ = tokio::time::sleep(duration) => info!("Session duration elapsed."),
                _ = self.interrupt.notified() => info!("Session interrupted."),
            }
            return Ok(());
        };

        let relay_ended = tokio::select! {
            _ = tokio::time::sleep(duration) => { info!("Session duration elapsed."); false }
            _ = self.interrupt.notified() => { info!("Session interrupted."); false }
            _ = relay.terminated() => true,
        };
        if relay_ended {
            warn!("Audio relay ended before the session duration elapsed.");
            relay.close().await?;
        }
        Ok(())
    }

    /// Attempts every teardown step once, logging and continuing on failure.
    async fn teardown(&self, resources: &mut Resources) -> TeardownReport {
        let mut report = TeardownReport::default();

        let outcome = match resources.relay.as_mut() {
            Some(relay) => {
                let closed = relay.close().await;
                if let Some(bridge) = relay.take_bridge() {
                    resources.bridge = Some(bridge);
                }
                match closed {
                    Ok(stats) => {
                        info!(?stats, "Relay closed.");
                        StepOutcome::Done
                    }
                    Err(e) => failed(TeardownStep::CloseRelay, None, &e),
                }
            }
            None => StepOutcome::Skipped,
        };
        report.record(TeardownStep::CloseRelay, outcome);

        let outcome = match resources.bridge.as_mut() {
            Some(bridge) => match bridge.stop_capture().await {
                Ok(()) => StepOutcome::Done,
                Err(e) => failed(TeardownStep::StopCapture, None, &e),
            },
            None => devices_lost(TeardownStep::StopCapture),
        };
        report.record(TeardownStep::StopCapture, outcome);

        let outcome = match resources.bridge.as_mut() {
            Some(bridge) => match bridge.close_playback().await {
                Ok(()) => StepOutcome::Done,
                Err(e) => failed(TeardownStep::ClosePlayback, None, &e),
            },
            None => devices_lost(TeardownStep::ClosePlayback),
        };
        report.record(TeardownStep::ClosePlayback, outcome);

        let outcome = match (resources.agent_id.as_deref(), resources.listener_id.take()) {
            (Some(agent_id), Some(listener_id)) => {
                match self.client.delete_listener(agent_id, &listener_id).await {
                    Ok(()) => {
                        info!(%listener_id, "Listener deleted.");
                        StepOutcome::Done
                    }
                    Err(e) => failed(TeardownStep::DeleteListener, Some(&listener_id), &e),
                }
            }
            _ => StepOutcome::Skipped,
        };
        report.record(TeardownStep::DeleteListener, outcome);

        let outcome = match resources.agent_id.take() {
            Some(agent_id) => match self.client.delete_agent(&agent_id).await {
                Ok(()) => {
                    info!(%agent_id, "Agent deleted.");
                    StepOutcome::Done
                }
                Err(e) => failed(TeardownStep::DeleteAgent, Some(&agent_id), &e),
            },
            None => StepOutcome::Skipped,
        };
        report.record(TeardownStep::DeleteAgent, outcome);

        report
    }
}

fn failed(step: TeardownStep, resource: Option<&str>, e: &dyn std::error::Error) -> StepOutcome {
    let reason = error_chain(e);
    warn!(%step, resource, error = %reason, "Teardown step failed; continuing.");
    StepOutcome::Failed(reason)
}

fn devices_lost(step: TeardownStep) -> StepOutcome {
    warn!(%step, "Audio devices were released with the aborted relay.");
    StepOutcome::Failed("audio devices were released with the aborted relay".to_string())
}
