//! Voice-activation controller
//!
//! Owns mutual exclusion between the keyword spotter and capture sessions:
//! at most one microphone consumer runs at a time. The controller reacts to
//! spotter detections, drives the phase machine, finalizes captures on
//! end-of-utterance, and forwards artifacts to the registered sink.
//!
//! Lock discipline: the `inner` mutex is never held across calls into the
//! spotter's start/stop or a session's stop; those join worker threads that
//! may themselves be waiting to lock `inner`.

use crate::activation::state::{ActivationEvent, ActivationMachine, ActivationPhase};
use crate::audio::{AudioSource, CpalSource};
use crate::capture::{
    AudioArtifact, CaptureSession, RecorderBackend, SessionEvent, StartOutcome, StopOutcome,
    TriggerKind, WavRecorderBackend,
};
use crate::config::VoicegateConfig;
use crate::error::VoicegateError;
use crate::notify::{Notifier, MSG_HANDSFREE_DISABLED, MSG_HOLD_TO_RECORD, MSG_MICROPHONE_DENIED};
use crate::wake::{Detection, JsonModelLoader, KeywordSpotter, ModelLoadState, ModelRegistry};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};

/// Provides fresh hardware handles for each acquisition.
///
/// The spotter and every capture session acquire their own source; tests
/// substitute scripted environments so the full pipeline runs without a
/// device.
pub trait CaptureEnvironment: Send + Sync {
    fn source(&self) -> Box<dyn AudioSource>;
    fn backend(&self) -> Box<dyn RecorderBackend>;
}

/// Default environment: cpal input, WAV encoding.
#[derive(Debug, Default)]
pub struct CpalEnvironment;

impl CaptureEnvironment for CpalEnvironment {
    fn source(&self) -> Box<dyn AudioSource> {
        Box::new(CpalSource::new())
    }

    fn backend(&self) -> Box<dyn RecorderBackend> {
        Box::new(WavRecorderBackend::new())
    }
}

/// What the single capture button means right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlRole {
    /// Pressing starts a manual capture.
    Start,
    /// A wake-triggered capture is running; pressing stops it.
    Stop,
}

/// Snapshot of controller state for UI rendering.
#[derive(Debug, Clone, Serialize)]
pub struct ActivationStatus {
    pub enabled: bool,
    pub phase: ActivationPhase,
    pub model_state: ModelLoadState,
    pub listening: bool,
    pub recording: bool,
    /// True from keyword detection until that capture finalizes.
    pub wake_triggered: bool,
}

/// Callback receiving finalized artifacts.
type ArtifactSink = Arc<Mutex<Option<Box<dyn FnMut(AudioArtifact, TriggerKind) + Send>>>>;

struct Inner {
    enabled: bool,
    wake_triggered: bool,
    /// A wake-triggered session is being acquired but not yet stored;
    /// keeps `sync_listening` and manual starts off the microphone in the
    /// gap between detection and session store.
    arming: bool,
    session: Option<CaptureSession>,
    machine: ActivationMachine,
}

/// Coordinates the spotter and capture sessions.
pub struct VoiceActivationController {
    config: VoicegateConfig,
    environment: Arc<dyn CaptureEnvironment>,
    spotter: KeywordSpotter,
    notifier: Arc<dyn Notifier>,
    inner: Mutex<Inner>,
    on_artifact: ArtifactSink,
    /// Serializes microphone handoffs between the spotter and capture
    /// sessions; taken before `inner`, never while `inner` is held.
    mic: Mutex<()>,
    /// Set once at construction; lets worker threads call back in without
    /// keeping the controller alive.
    self_ref: Mutex<Weak<VoiceActivationController>>,
}

impl VoiceActivationController {
    pub fn new(
        config: VoicegateConfig,
        environment: Arc<dyn CaptureEnvironment>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let spotter = KeywordSpotter::new(
            ModelRegistry::new(config.wake.model_dir.clone()),
            Arc::new(JsonModelLoader::new()),
            config.spotter_options(),
        );

        let controller = Arc::new(Self {
            config,
            environment,
            spotter,
            notifier,
            inner: Mutex::new(Inner {
                enabled: false,
                wake_triggered: false,
                arming: false,
                session: None,
                machine: ActivationMachine::new(),
            }),
            on_artifact: Arc::new(Mutex::new(None)),
            mic: Mutex::new(()),
            self_ref: Mutex::new(Weak::new()),
        });

        *controller.self_ref.lock() = Arc::downgrade(&controller);

        let weak = Arc::downgrade(&controller);
        controller
            .spotter
            .set_on_detection(Box::new(move |detection| {
                if let Some(controller) = weak.upgrade() {
                    controller.handle_detection(detection);
                }
            }));

        controller
    }

    fn weak(&self) -> Weak<Self> {
        self.self_ref.lock().clone()
    }

    /// Register the artifact sink. Replaces any previous one.
    pub fn set_on_artifact(&self, callback: Box<dyn FnMut(AudioArtifact, TriggerKind) + Send>) {
        *self.on_artifact.lock() = Some(callback);
    }

    /// Access the spotter, e.g. to install an alternative strategy.
    pub fn spotter(&self) -> &KeywordSpotter {
        &self.spotter
    }

    pub fn status(&self) -> ActivationStatus {
        let inner = self.inner.lock();
        ActivationStatus {
            enabled: inner.enabled,
            phase: inner.machine.phase(),
            model_state: self.spotter.model_state(),
            listening: self.spotter.is_listening(),
            recording: inner
                .session
                .as_ref()
                .map(|s| s.is_recording())
                .unwrap_or(false),
            wake_triggered: inner.wake_triggered,
        }
    }

    /// What a press on the single capture control would do now.
    pub fn control_role(&self) -> ControlRole {
        let inner = self.inner.lock();
        match inner.session.as_ref().map(|s| s.trigger()) {
            Some(TriggerKind::WakeWord) => ControlRole::Stop,
            _ => ControlRole::Start,
        }
    }

    /// Toggle hands-free mode.
    ///
    /// Enabling loads the keyword model off-thread and starts listening once
    /// it is ready. Disabling stops listening; a capture already recording
    /// is never aborted and finalizes through its normal path, after which
    /// listening does not resume.
    pub fn set_enabled(&self, enabled: bool) {
        if enabled {
            let locale = {
                let mut inner = self.inner.lock();
                if inner.enabled {
                    return;
                }
                inner.enabled = true;
                inner.machine.process_event(ActivationEvent::Enable);
                self.config.wake.locale.clone()
            };

            let weak = self.weak();
            self.spotter.initialize(&locale, move |result| {
                let Some(controller) = weak.upgrade() else {
                    return;
                };
                match result {
                    Ok(()) => {
                        controller
                            .inner
                            .lock()
                            .machine
                            .process_event(ActivationEvent::ModelReady);
                        controller.sync_listening();
                    }
                    Err(e) => {
                        {
                            let mut inner = controller.inner.lock();
                            inner.enabled = false;
                            inner.machine.process_event(ActivationEvent::ModelFailed {
                                error: e.to_string(),
                            });
                        }
                        controller.notifier.notify(MSG_HANDSFREE_DISABLED);
                    }
                }
            });
        } else {
            {
                let mut inner = self.inner.lock();
                if !inner.enabled {
                    return;
                }
                inner.enabled = false;
                // A Recording session is never aborted here; the machine
                // ignores Disable in that phase and the controller applies
                // it after the capture finalizes.
                inner.machine.process_event(ActivationEvent::Disable);
            }

            let _mic = self.mic.lock();
            self.spotter.stop_listening();
        }
    }

    /// Start a manual capture.
    ///
    /// Returns `Ok(false)` when another session already holds the
    /// microphone or when `intent` was revoked while acquisition was in
    /// flight. Listening is paused for the capture's duration.
    pub fn begin_manual(&self, intent: &AtomicBool) -> Result<bool, VoicegateError> {
        let mic = self.mic.lock();

        {
            let inner = self.inner.lock();
            if inner.session.is_some() || inner.arming {
                tracing::debug!("Manual capture ignored: session already running");
                return Ok(false);
            }
        }

        self.spotter.stop_listening();

        let start = CaptureSession::start(
            self.environment.source(),
            self.environment.backend(),
            TriggerKind::Manual,
            None,
            &self.config.capture_config(),
            Some(intent),
        );

        match start {
            Ok(StartOutcome::Started(session)) => {
                let mut inner = self.inner.lock();
                if inner.session.is_some() {
                    // Lost the race against a wake trigger; back off.
                    drop(inner);
                    drop(mic);
                    let _ = session.stop();
                    return Ok(false);
                }
                inner.session = Some(session);
                Ok(true)
            }
            Ok(StartOutcome::Revoked) => {
                drop(mic);
                self.notifier.notify(MSG_HOLD_TO_RECORD);
                self.sync_listening();
                Ok(false)
            }
            Err(VoicegateError::PermissionDenied) => {
                drop(mic);
                self.notifier.notify(MSG_MICROPHONE_DENIED);
                self.sync_listening();
                Err(VoicegateError::PermissionDenied)
            }
            Err(e) => {
                drop(mic);
                self.sync_listening();
                Err(e)
            }
        }
    }

    /// Stop the manual capture, if one is running.
    pub fn end_manual(&self) -> Option<AudioArtifact> {
        self.finish_active_session(TriggerKind::Manual)
    }

    /// Stop the wake-triggered capture early, as the button press does while
    /// one is running.
    pub fn stop_wake_capture(&self) -> Option<AudioArtifact> {
        self.finish_active_session(TriggerKind::WakeWord)
    }

    /// Reconcile listening with current state: the spotter streams exactly
    /// when hands-free is enabled, the model is ready, and no capture
    /// session holds the microphone. Redundant calls are benign.
    pub fn sync_listening(&self) {
        let _mic = self.mic.lock();
        let want = {
            let inner = self.inner.lock();
            inner.enabled
                && inner.session.is_none()
                && !inner.arming
                && self.spotter.model_state() == ModelLoadState::Ready
        };

        if want && !self.spotter.is_listening() {
            let result = self
                .spotter
                .start_listening(self.environment.source(), &self.config.audio.request);
            if let Err(e) = result {
                tracing::error!("Failed to start listening: {}", e);
                if matches!(e, VoicegateError::PermissionDenied) {
                    {
                        let mut inner = self.inner.lock();
                        inner.enabled = false;
                        inner
                            .machine
                            .process_event(ActivationEvent::MicrophoneDenied);
                    }
                    self.notifier.notify(MSG_MICROPHONE_DENIED);
                    self.notifier.notify(MSG_HANDSFREE_DISABLED);
                }
            }
        } else if !want && self.spotter.is_listening() {
            self.spotter.stop_listening();
        }
    }

    /// Spotter detection callback; runs on the spotter's listening thread
    /// after that thread has released its stream and cleared the listening
    /// flag, so the microphone is free for the wake capture.
    fn handle_detection(&self, detection: Detection) {
        {
            let mut inner = self.inner.lock();
            if !inner.enabled || inner.session.is_some() {
                tracing::debug!("Ignoring detection: busy or disabled");
                return;
            }
            let transition = inner.machine.process_event(ActivationEvent::KeywordDetected {
                phrase: detection.phrase.clone(),
                confidence: detection.confidence,
            });
            if transition.is_none() {
                return;
            }
            inner.wake_triggered = true;
            inner.arming = true;
        }

        let start = CaptureSession::start(
            self.environment.source(),
            self.environment.backend(),
            TriggerKind::WakeWord,
            Some(self.config.endpoint.clone()),
            &self.config.capture_config(),
            None,
        );

        match start {
            Ok(StartOutcome::Started(session)) => {
                {
                    let mut inner = self.inner.lock();
                    if !inner.enabled {
                        // Disabled between detection and session start.
                        inner.wake_triggered = false;
                        inner.arming = false;
                        drop(inner);
                        let _ = session.stop();
                        return;
                    }
                }
                let events = session.events();
                {
                    let mut inner = self.inner.lock();
                    inner.session = Some(session);
                    inner.arming = false;
                }

                // End-of-utterance monitor; stops the capture when the
                // detector fires and lets the controller resume listening.
                let weak = self.weak();
                std::thread::spawn(move || {
                    while let Ok(event) = events.recv() {
                        if let SessionEvent::UtteranceEnded(end) = event {
                            tracing::info!("Utterance ended ({:?}), stopping capture", end.reason);
                            if let Some(controller) = weak.upgrade() {
                                controller.finish_active_session(TriggerKind::WakeWord);
                            }
                            break;
                        }
                    }
                });
            }
            Ok(StartOutcome::Revoked) => {
                // No intent flag on the wake path; nothing to do.
                let mut inner = self.inner.lock();
                inner.wake_triggered = false;
                inner.arming = false;
            }
            Err(e) => {
                tracing::error!("Wake-triggered capture failed to start: {}", e);
                let denied = matches!(e, VoicegateError::PermissionDenied);
                {
                    let mut inner = self.inner.lock();
                    inner.wake_triggered = false;
                    inner.arming = false;
                    if denied {
                        inner.enabled = false;
                        inner.machine.reset();
                    } else {
                        inner.machine.process_event(ActivationEvent::UtteranceEnded);
                        inner
                            .machine
                            .process_event(ActivationEvent::CaptureFinalized { forwarded: false });
                    }
                }
                if denied {
                    self.notifier.notify(MSG_MICROPHONE_DENIED);
                    self.notifier.notify(MSG_HANDSFREE_DISABLED);
                } else {
                    // The listening thread already wound down before this
                    // callback; safe to resume spotting in place.
                    self.sync_listening();
                }
            }
        }
    }

    /// Take and finalize the active session when its trigger matches.
    fn finish_active_session(&self, expected: TriggerKind) -> Option<AudioArtifact> {
        let session = {
            let mut inner = self.inner.lock();
            match inner.session.as_ref().map(|s| s.trigger()) {
                Some(trigger) if trigger == expected => {
                    if expected == TriggerKind::WakeWord {
                        inner.machine.process_event(ActivationEvent::UtteranceEnded);
                    }
                    inner.session.take()
                }
                _ => {
                    tracing::debug!("No {:?} session to finish", expected);
                    return None;
                }
            }?
        };

        let artifact = self.finalize(session);

        {
            let mut inner = self.inner.lock();
            inner.wake_triggered = false;
            if expected == TriggerKind::WakeWord {
                inner.machine.process_event(ActivationEvent::CaptureFinalized {
                    forwarded: artifact.is_some(),
                });
                if !inner.enabled {
                    // Hands-free was turned off while the capture ran.
                    inner.machine.process_event(ActivationEvent::Disable);
                }
            }
        }

        self.sync_listening();
        artifact
    }

    /// Stop a session, forward its artifact, surface rejections.
    fn finalize(&self, session: CaptureSession) -> Option<AudioArtifact> {
        let trigger = session.trigger();
        match session.stop() {
            Ok(StopOutcome::Artifact(artifact)) => {
                if let Some(callback) = self.on_artifact.lock().as_mut() {
                    callback(artifact.clone(), trigger);
                }
                Some(artifact)
            }
            Ok(StopOutcome::RejectedTooShort) => {
                if trigger == TriggerKind::Manual {
                    self.notifier.notify(MSG_HOLD_TO_RECORD);
                }
                None
            }
            Err(e) => {
                tracing::error!("Capture finalization failed: {}", e);
                None
            }
        }
    }
}

impl Drop for VoiceActivationController {
    fn drop(&mut self) {
        self.spotter.stop_listening();
        if let Some(session) = self.inner.lock().session.take() {
            let _ = session.stop();
        }
    }
}
