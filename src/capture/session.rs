//! Capture sessions
//!
//! One `CaptureSession` owns one microphone stream and one recorder backend
//! and turns a continuous stream into a single finalized [`AudioArtifact`]
//! on stop. The audio callback writes into a lock-free ring buffer; a pump
//! thread drains it, downmixes to 16 kHz mono, publishes level readings,
//! and optionally feeds an end-of-utterance detector.
//!
//! The hardware handle is released on every terminal path: normal stop,
//! too-short stop, encode failure, and drop.

use crate::audio::{
    downmix_to_mono_16k, AudioLevel, AudioMeter, AudioRingBuffer, AudioSource, StreamInfo,
    StreamRequest, PIPELINE_SAMPLE_RATE,
};
use crate::capture::encoding::{negotiate_mime_type, strip_codec_params, RecorderBackend};
use crate::endpoint::{EndpointConfig, UtteranceEnd, UtteranceEndDetector};
use crate::error::VoicegateError;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lifecycle state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, nothing acquired yet.
    Idle = 0,
    /// Microphone permission and device acquisition in flight.
    Arming = 1,
    /// First data arrived; chunks are accumulating.
    Recording = 2,
    /// Stop requested; stream torn down, artifact being assembled.
    Finalizing = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Arming,
            2 => SessionState::Recording,
            3 => SessionState::Finalizing,
            _ => SessionState::Idle,
        }
    }
}

/// What started the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Explicit user press.
    Manual,
    /// Keyword spotter detection.
    WakeWord,
}

/// The finalized audio handed to the transcription collaborator.
#[derive(Debug, Clone)]
pub struct AudioArtifact {
    pub bytes: Vec<u8>,
    /// Negotiated mime type with codec parameters stripped.
    pub mime_type: String,
}

/// Result of stopping a session.
#[derive(Debug)]
pub enum StopOutcome {
    /// Capture met the minimum duration; artifact ready for handoff.
    Artifact(AudioArtifact),
    /// Capture was shorter than the minimum duration; nothing is forwarded.
    RejectedTooShort,
}

/// Result of starting a session.
pub enum StartOutcome {
    Started(CaptureSession),
    /// The triggering intent was revoked while acquisition was in flight;
    /// the just-acquired stream was released and no session exists.
    Revoked,
}

/// Events published by a running session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// First audio data arrived; the session is now Recording.
    RecordingStarted,
    /// Level reading for UI feedback.
    Level(AudioLevel),
    /// The end-of-utterance detector decided the user stopped speaking.
    /// Sent at most once per session.
    UtteranceEnded(UtteranceEnd),
}

/// Capture tuning shared by both trigger paths.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub request: StreamRequest,
    /// Captures shorter than this are rejected rather than forwarded.
    pub min_capture_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            request: StreamRequest::default(),
            min_capture_ms: 500,
        }
    }
}

/// Identifier for a live session, cheap to copy into UI state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: Uuid,
    pub trigger: TriggerKind,
}

/// One microphone recording, from acquisition to finalized artifact.
pub struct CaptureSession {
    id: Uuid,
    trigger: TriggerKind,
    started_at: Instant,
    mime_type: String,
    min_duration: Duration,
    state: Arc<AtomicU8>,
    collected: Arc<Mutex<Vec<f32>>>,
    stop_flag: Arc<AtomicBool>,
    source: Option<Box<dyn AudioSource>>,
    backend: Box<dyn RecorderBackend>,
    pump: Option<std::thread::JoinHandle<()>>,
    events_rx: Receiver<SessionEvent>,
}

impl CaptureSession {
    /// Acquire the microphone and begin buffering.
    ///
    /// `intent` is re-checked after acquisition resolves: when the trigger
    /// was revoked mid-flight (button released before the grant), the stream
    /// is released at once and `Revoked` is returned instead of a session.
    ///
    /// Returns `PermissionDenied` without creating a session when access is
    /// refused or no device exists; the caller surfaces the denial notice.
    pub fn start(
        mut source: Box<dyn AudioSource>,
        backend: Box<dyn RecorderBackend>,
        trigger: TriggerKind,
        endpoint: Option<EndpointConfig>,
        config: &CaptureConfig,
        intent: Option<&AtomicBool>,
    ) -> Result<StartOutcome, VoicegateError> {
        let id = Uuid::new_v4();
        let started_at = Instant::now();
        let state = Arc::new(AtomicU8::new(SessionState::Arming as u8));

        let ring = Arc::new(AudioRingBuffer::new());
        let info = source.acquire(&config.request, ring.clone())?;

        if let Some(intent) = intent {
            if !intent.load(Ordering::SeqCst) {
                tracing::info!("Capture intent revoked during acquisition, releasing stream");
                source.release();
                return Ok(StartOutcome::Revoked);
            }
        }

        let mime_type = negotiate_mime_type(backend.as_ref());

        let collected = Arc::new(Mutex::new(Vec::new()));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = bounded(64);

        let pump = std::thread::spawn({
            let ring = ring.clone();
            let state = state.clone();
            let collected = collected.clone();
            let stop_flag = stop_flag.clone();
            move || pump_audio(ring, info, state, collected, stop_flag, endpoint, events_tx)
        });

        tracing::info!(
            "Capture session {} started: trigger={:?}, encoding={}, {}Hz/{}ch source",
            id,
            trigger,
            mime_type,
            info.sample_rate,
            info.channels,
        );

        Ok(StartOutcome::Started(Self {
            id,
            trigger,
            started_at,
            mime_type,
            min_duration: Duration::from_millis(config.min_capture_ms),
            state,
            collected,
            stop_flag,
            source: Some(source),
            backend,
            pump: Some(pump),
            events_rx,
        }))
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            trigger: self.trigger,
        }
    }

    pub fn trigger(&self) -> TriggerKind {
        self.trigger
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_recording(&self) -> bool {
        self.state() == SessionState::Recording
    }

    /// Receiver for this session's events. Clone freely; the channel
    /// disconnects when the session finalizes.
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    /// Stop the session and finalize the artifact.
    ///
    /// Hardware handles are released unconditionally, even when the capture
    /// is rejected or encoding fails.
    pub fn stop(mut self) -> Result<StopOutcome, VoicegateError> {
        self.state
            .store(SessionState::Finalizing as u8, Ordering::Release);
        self.stop_flag.store(true, Ordering::SeqCst);

        if let Some(mut source) = self.source.take() {
            source.release();
        }
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                tracing::error!("Capture pump thread panicked");
            }
        }

        let elapsed = self.started_at.elapsed();
        if elapsed < self.min_duration {
            tracing::info!(
                "Capture session {} rejected: {}ms below {}ms minimum",
                self.id,
                elapsed.as_millis(),
                self.min_duration.as_millis(),
            );
            return Ok(StopOutcome::RejectedTooShort);
        }

        let samples = std::mem::take(&mut *self.collected.lock());
        let bytes = self
            .backend
            .encode(&samples, PIPELINE_SAMPLE_RATE, &self.mime_type)?;
        let mime_type = strip_codec_params(&self.mime_type).to_string();

        tracing::info!(
            "Capture session {} finalized: {}ms, {} samples, {} bytes as {}",
            self.id,
            elapsed.as_millis(),
            samples.len(),
            bytes.len(),
            mime_type,
        );

        Ok(StopOutcome::Artifact(AudioArtifact { bytes, mime_type }))
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        // Stop path already took the source; this covers abrupt teardown.
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(mut source) = self.source.take() {
            tracing::warn!("Capture session {} dropped without stop, releasing", self.id);
            source.release();
        }
    }
}

/// Pump loop: drain the ring buffer, downmix, meter, endpoint.
///
/// The endpoint detector is constructed here because the webrtc classifier
/// is not `Send`.
fn pump_audio(
    ring: Arc<AudioRingBuffer>,
    info: StreamInfo,
    state: Arc<AtomicU8>,
    collected: Arc<Mutex<Vec<f32>>>,
    stop_flag: Arc<AtomicBool>,
    endpoint: Option<EndpointConfig>,
    events_tx: Sender<SessionEvent>,
) {
    let mut detector = endpoint.map(|config| UtteranceEndDetector::new(config, Instant::now()));
    let frame_size = detector.as_ref().map(|d| d.frame_size()).unwrap_or(0);

    let mut meter = AudioMeter::new();
    let mut read_buffer = vec![0.0f32; 4096];
    let mut frame_buffer: Vec<f32> = Vec::with_capacity(frame_size * 4);
    let mut first_data = false;

    while !stop_flag.load(Ordering::SeqCst) {
        let read = ring.read(&mut read_buffer);
        if read > 0 {
            if !first_data {
                first_data = true;
                state.store(SessionState::Recording as u8, Ordering::Release);
                let _ = events_tx.try_send(SessionEvent::RecordingStarted);
            }

            let mono = downmix_to_mono_16k(&read_buffer[..read], info.sample_rate, info.channels);
            let _ = events_tx.try_send(SessionEvent::Level(meter.process(&mono)));
            collected.lock().extend_from_slice(&mono);

            if let Some(ref mut det) = detector {
                frame_buffer.extend_from_slice(&mono);
                while frame_buffer.len() >= frame_size {
                    let frame: Vec<f32> = frame_buffer.drain(..frame_size).collect();
                    if let Some(end) = det.observe_frame(&frame, Instant::now()) {
                        let _ = events_tx.try_send(SessionEvent::UtteranceEnded(end));
                    }
                }
            }
        } else {
            // Idle ring: still evaluate the silence clock so a stalled
            // stream times out.
            if let Some(ref mut det) = detector {
                if let Some(end) = det.poll(Instant::now()) {
                    let _ = events_tx.try_send(SessionEvent::UtteranceEnded(end));
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    tracing::debug!("Capture pump exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::encoding::WavRecorderBackend;

    /// Source that plays a fixed script into the ring buffer from a feeder
    /// thread, pacing chunks to simulate a live stream.
    pub struct ScriptedSource {
        script: Vec<f32>,
        chunk: usize,
        pace: Duration,
        active: Arc<AtomicBool>,
        released: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        pub fn new(script: Vec<f32>) -> Self {
            Self {
                script,
                chunk: 160,
                pace: Duration::from_millis(10),
                active: Arc::new(AtomicBool::new(false)),
                released: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn released_handle(&self) -> Arc<AtomicBool> {
            self.released.clone()
        }
    }

    impl AudioSource for ScriptedSource {
        fn acquire(
            &mut self,
            _request: &StreamRequest,
            sink: Arc<AudioRingBuffer>,
        ) -> Result<StreamInfo, VoicegateError> {
            self.active.store(true, Ordering::SeqCst);
            let script = self.script.clone();
            let chunk = self.chunk;
            let pace = self.pace;
            let active = self.active.clone();
            std::thread::spawn(move || {
                for part in script.chunks(chunk) {
                    if !active.load(Ordering::SeqCst) {
                        return;
                    }
                    sink.write(part);
                    std::thread::sleep(pace);
                }
            });
            Ok(StreamInfo {
                sample_rate: PIPELINE_SAMPLE_RATE,
                channels: 1,
            })
        }

        fn release(&mut self) {
            self.active.store(false, Ordering::SeqCst);
            self.released.store(true, Ordering::SeqCst);
        }

        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }
    }

    /// Source that denies access, as if the user refused the permission
    /// prompt.
    struct DeniedSource;

    impl AudioSource for DeniedSource {
        fn acquire(
            &mut self,
            _request: &StreamRequest,
            _sink: Arc<AudioRingBuffer>,
        ) -> Result<StreamInfo, VoicegateError> {
            Err(VoicegateError::PermissionDenied)
        }

        fn release(&mut self) {}

        fn is_active(&self) -> bool {
            false
        }
    }

    fn quick_config() -> CaptureConfig {
        CaptureConfig {
            request: StreamRequest::default(),
            min_capture_ms: 50,
        }
    }

    #[test]
    fn test_denied_source_creates_no_session() {
        let result = CaptureSession::start(
            Box::new(DeniedSource),
            Box::new(WavRecorderBackend::new()),
            TriggerKind::Manual,
            None,
            &CaptureConfig::default(),
            None,
        );
        assert!(matches!(result, Err(VoicegateError::PermissionDenied)));
    }

    #[test]
    fn test_too_short_capture_is_rejected() {
        let source = ScriptedSource::new(vec![0.2; 1600]);
        let released = source.released_handle();

        let outcome = CaptureSession::start(
            Box::new(source),
            Box::new(WavRecorderBackend::new()),
            TriggerKind::Manual,
            None,
            &CaptureConfig::default(), // 500ms minimum
            None,
        )
        .unwrap();

        let session = match outcome {
            StartOutcome::Started(session) => session,
            StartOutcome::Revoked => panic!("should have started"),
        };

        // Stop almost immediately, well under the minimum.
        let result = session.stop().unwrap();
        assert!(matches!(result, StopOutcome::RejectedTooShort));
        assert!(released.load(Ordering::SeqCst), "hardware must be released");
    }

    #[test]
    fn test_capture_produces_artifact_with_negotiated_mime() {
        let source = ScriptedSource::new(vec![0.2; 3200]);
        let released = source.released_handle();

        let outcome = CaptureSession::start(
            Box::new(source),
            Box::new(WavRecorderBackend::new()),
            TriggerKind::Manual,
            None,
            &quick_config(),
            None,
        )
        .unwrap();
        let session = match outcome {
            StartOutcome::Started(session) => session,
            StartOutcome::Revoked => panic!("should have started"),
        };

        std::thread::sleep(Duration::from_millis(150));
        assert!(session.is_recording());

        match session.stop().unwrap() {
            StopOutcome::Artifact(artifact) => {
                assert_eq!(artifact.mime_type, "audio/wav");
                assert!(!artifact.bytes.is_empty());
            }
            StopOutcome::RejectedTooShort => panic!("capture was long enough"),
        }
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_revoked_intent_releases_stream_without_session() {
        let source = ScriptedSource::new(vec![0.2; 1600]);
        let released = source.released_handle();

        let intent = AtomicBool::new(false); // revoked before acquire resolves
        let outcome = CaptureSession::start(
            Box::new(source),
            Box::new(WavRecorderBackend::new()),
            TriggerKind::Manual,
            None,
            &quick_config(),
            Some(&intent),
        )
        .unwrap();

        assert!(matches!(outcome, StartOutcome::Revoked));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_session_transitions_to_recording_on_first_data() {
        let source = ScriptedSource::new(vec![0.2; 3200]);
        let outcome = CaptureSession::start(
            Box::new(source),
            Box::new(WavRecorderBackend::new()),
            TriggerKind::WakeWord,
            None,
            &quick_config(),
            None,
        )
        .unwrap();
        let session = match outcome {
            StartOutcome::Started(session) => session,
            StartOutcome::Revoked => panic!("should have started"),
        };

        let events = session.events();
        let event = events
            .recv_timeout(Duration::from_millis(500))
            .expect("RecordingStarted should arrive");
        assert!(matches!(event, SessionEvent::RecordingStarted));
        assert_eq!(session.state(), SessionState::Recording);
        assert_eq!(session.handle().trigger, TriggerKind::WakeWord);

        let _ = session.stop();
    }

    #[test]
    fn test_utterance_end_emitted_after_silence() {
        use crate::endpoint::ClassifierKind;

        // 200ms of speech energy followed by trailing silence.
        let mut script = vec![0.5f32; 3200];
        script.extend(vec![0.0f32; 1600]);
        let source = ScriptedSource::new(script);

        let endpoint = EndpointConfig {
            classifier: ClassifierKind::Energy,
            post_speech_silence_ms: 150,
            no_speech_timeout_ms: 2000,
            ..EndpointConfig::default()
        };

        let outcome = CaptureSession::start(
            Box::new(source),
            Box::new(WavRecorderBackend::new()),
            TriggerKind::WakeWord,
            Some(endpoint),
            &quick_config(),
            None,
        )
        .unwrap();
        let session = match outcome {
            StartOutcome::Started(session) => session,
            StartOutcome::Revoked => panic!("should have started"),
        };

        let events = session.events();
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut ended = false;
        while Instant::now() < deadline {
            match events.recv_timeout(Duration::from_millis(200)) {
                Ok(SessionEvent::UtteranceEnded(end)) => {
                    assert_eq!(end.reason, crate::endpoint::EndReason::SilenceAfterSpeech);
                    ended = true;
                    break;
                }
                Ok(_) => continue,
                Err(_) => continue,
            }
        }
        assert!(ended, "utterance end should fire after trailing silence");

        let _ = session.stop();
    }
}
