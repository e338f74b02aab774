//! Keyword spotting
//!
//! The spotter owns the always-on listening stream: model lifecycle,
//! analysis-window accumulation, strategy scoring, and the single trigger
//! per listening session. It holds no capture state; the activation
//! controller reacts to the detection callback.

use crate::audio::{
    downmix_to_mono_16k, AudioRingBuffer, AudioSource, StreamRequest, PIPELINE_SAMPLE_RATE,
};
use crate::error::VoicegateError;
use crate::wake::model::{KeywordModel, ModelLoadState, ModelLoader, ModelRegistry, ModelSpec};
use crate::wake::strategy::{Detection, ScoredStrategy, StrategyFactory, WakeStrategy};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Detection callback, swappable while listening.
type DetectionCallback = Arc<Mutex<Option<Box<dyn FnMut(Detection) + Send>>>>;

/// Completion callback for one `initialize` request.
type LoadCallback = Box<dyn FnOnce(Result<(), VoicegateError>) + Send>;

struct EngineState {
    load_state: ModelLoadState,
    locale: String,
    model: Option<KeywordModel>,
    /// Completions owed when the in-flight load settles.
    waiters: Vec<LoadCallback>,
    /// A locale requested while another load was in flight; started once the
    /// current load completes, with all queued completions attached. The
    /// most recently requested locale wins.
    pending: Option<(ModelSpec, Vec<LoadCallback>)>,
}

/// Spotting tunables.
#[derive(Debug, Clone)]
pub struct SpotterOptions {
    /// Detections below this confidence are ignored.
    pub confidence_threshold: f32,
    /// Analysis window length in milliseconds.
    pub window_ms: u64,
    /// RMS gate for the scored strategy.
    pub activity_threshold: f32,
}

impl Default for SpotterOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.85,
            window_ms: 80,
            activity_threshold: 0.015,
        }
    }
}

/// Continuous keyword spotter.
///
/// The loaded model persists across listening toggles; only an explicit
/// locale change reloads. Listening is one trigger per start: when a
/// detection crosses the threshold, the listening thread releases its
/// stream and clears the listening flag first, then reports the detection,
/// so the microphone is already free when the callback starts a capture.
pub struct KeywordSpotter {
    registry: ModelRegistry,
    loader: Arc<dyn ModelLoader>,
    options: SpotterOptions,
    engine: Arc<Mutex<EngineState>>,
    listening: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    on_detection: DetectionCallback,
    strategy_factory: Mutex<Option<StrategyFactory>>,
}

impl KeywordSpotter {
    pub fn new(registry: ModelRegistry, loader: Arc<dyn ModelLoader>, options: SpotterOptions) -> Self {
        Self {
            registry,
            loader,
            options,
            engine: Arc::new(Mutex::new(EngineState {
                load_state: ModelLoadState::Unloaded,
                locale: String::new(),
                model: None,
                waiters: Vec::new(),
                pending: None,
            })),
            listening: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
            on_detection: Arc::new(Mutex::new(None)),
            strategy_factory: Mutex::new(None),
        }
    }

    /// Register the detection callback. Replaces any previous one.
    pub fn set_on_detection(&self, callback: Box<dyn FnMut(Detection) + Send>) {
        *self.on_detection.lock() = Some(callback);
    }

    /// Override strategy construction. Mainly for tests and alternative
    /// recognition engines.
    pub fn set_strategy_factory(&self, factory: StrategyFactory) {
        *self.strategy_factory.lock() = Some(factory);
    }

    pub fn model_state(&self) -> ModelLoadState {
        self.engine.lock().load_state
    }

    pub fn locale(&self) -> String {
        self.engine.lock().locale.clone()
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Load the model for a locale off-thread.
    ///
    /// Idempotent: a model already loaded for the resolved locale completes
    /// immediately, and a load already in flight is not duplicated. A
    /// request arriving while a load is in flight completes only when the
    /// model has actually settled; a different locale requested meanwhile is
    /// loaded right after the current one finishes.
    pub fn initialize<F>(&self, locale: &str, on_complete: F)
    where
        F: FnOnce(Result<(), VoicegateError>) + Send + 'static,
    {
        let spec = self.registry.spec_for(locale);
        let start = {
            let mut engine = self.engine.lock();
            match engine.load_state {
                ModelLoadState::Ready if engine.locale == spec.locale => {
                    drop(engine);
                    on_complete(Ok(()));
                    return;
                }
                ModelLoadState::Loading => {
                    if engine.locale == spec.locale && engine.pending.is_none() {
                        engine.waiters.push(Box::new(on_complete));
                    } else {
                        match engine.pending.as_mut() {
                            Some((pending_spec, callbacks)) => {
                                if pending_spec.locale != spec.locale {
                                    *pending_spec = spec;
                                }
                                callbacks.push(Box::new(on_complete));
                            }
                            None => engine.pending = Some((spec, vec![Box::new(on_complete)])),
                        }
                    }
                    return;
                }
                _ => {
                    engine.load_state = ModelLoadState::Loading;
                    engine.locale = spec.locale.clone();
                    engine.model = None;
                    engine.waiters.push(Box::new(on_complete));
                    spec
                }
            }
        };

        Self::spawn_load(self.engine.clone(), self.loader.clone(), start);
    }

    fn spawn_load(engine: Arc<Mutex<EngineState>>, loader: Arc<dyn ModelLoader>, spec: ModelSpec) {
        tracing::info!("Loading keyword model for locale '{}'", spec.locale);
        std::thread::spawn(move || {
            let result = loader.load(&spec);
            let (waiters, next) = {
                let mut state = engine.lock();
                match &result {
                    Ok(model) => {
                        state.load_state = ModelLoadState::Ready;
                        state.model = Some(model.clone());
                    }
                    Err(e) => {
                        state.load_state = ModelLoadState::Failed;
                        tracing::error!("Keyword model load failed: {}", e);
                    }
                }
                let waiters = std::mem::take(&mut state.waiters);
                match state.pending.take() {
                    Some((next_spec, callbacks)) => {
                        state.load_state = ModelLoadState::Loading;
                        state.locale = next_spec.locale.clone();
                        state.model = None;
                        state.waiters = callbacks;
                        (waiters, Some(next_spec))
                    }
                    None => (waiters, None),
                }
            };

            match &result {
                Ok(_) => {
                    for waiter in waiters {
                        waiter(Ok(()));
                    }
                }
                Err(e) => {
                    for waiter in waiters {
                        waiter(Err(clone_load_error(e)));
                    }
                }
            }

            if let Some(next_spec) = next {
                Self::spawn_load(engine, loader, next_spec);
            }
        });
    }

    /// Acquire the stream and start scoring windows.
    ///
    /// Redundant calls while already listening are benign. Requires a Ready
    /// model. The callback fires at most once per start, and only after the
    /// thread has released its stream.
    pub fn start_listening(
        &self,
        mut source: Box<dyn AudioSource>,
        request: &StreamRequest,
    ) -> Result<(), VoicegateError> {
        if self.listening.swap(true, Ordering::SeqCst) {
            tracing::debug!("Spotter already listening, ignoring start");
            return Ok(());
        }

        let model = {
            let engine = self.engine.lock();
            match (&engine.load_state, &engine.model) {
                (ModelLoadState::Ready, Some(model)) => model.clone(),
                _ => {
                    self.listening.store(false, Ordering::SeqCst);
                    return Err(VoicegateError::unknown("keyword model not ready"));
                }
            }
        };

        let ring = Arc::new(AudioRingBuffer::new());
        let info = match source.acquire(request, ring.clone()) {
            Ok(info) => info,
            Err(e) => {
                self.listening.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        self.stop_flag.store(false, Ordering::SeqCst);
        let stop_flag = self.stop_flag.clone();
        let listening = self.listening.clone();
        let on_detection = self.on_detection.clone();
        let factory = self.strategy_factory.lock().clone();
        let window_size = (self.options.window_ms * PIPELINE_SAMPLE_RATE as u64 / 1000) as usize;
        let threshold = self.options.confidence_threshold;
        let activity_threshold = self.options.activity_threshold;

        tracing::info!(
            "Spotter listening: locale '{}', {}ms windows, threshold {}",
            model.locale,
            self.options.window_ms,
            threshold,
        );

        let handle = std::thread::spawn(move || {
            // Strategies may hold engine state that is not Send, so the
            // strategy is built here rather than handed in.
            let mut strategy: Box<dyn WakeStrategy> = match factory {
                Some(factory) => factory(&model),
                None => Box::new(ScoredStrategy::new(model.clone(), activity_threshold)),
            };
            strategy.reset();

            let mut read_buffer = vec![0.0f32; 4096];
            let mut window: Vec<f32> = Vec::with_capacity(window_size * 4);
            let mut detected: Option<Detection> = None;

            while !stop_flag.load(Ordering::SeqCst) && detected.is_none() {
                let read = ring.read(&mut read_buffer);
                if read == 0 {
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }

                let mono =
                    downmix_to_mono_16k(&read_buffer[..read], info.sample_rate, info.channels);
                window.extend_from_slice(&mono);

                while window.len() >= window_size && detected.is_none() {
                    let chunk: Vec<f32> = window.drain(..window_size).collect();
                    if let Some(detection) = strategy.process_window(&chunk) {
                        if detection.confidence >= threshold {
                            detected = Some(detection);
                        }
                    }
                }
            }

            // The callback may start a capture that opens its own stream;
            // the microphone must be free and the listening flag clear
            // before the detection is reported.
            source.release();
            listening.store(false, Ordering::SeqCst);

            if let Some(detection) = detected {
                tracing::info!(
                    "Keyword detected: '{}' at {:.2}",
                    detection.phrase,
                    detection.confidence,
                );
                if let Some(callback) = on_detection.lock().as_mut() {
                    callback(detection);
                }
            }

            tracing::debug!("Spotter listening thread exiting");
        });

        *self.thread.lock() = Some(handle);
        Ok(())
    }

    /// Stop listening and release the stream.
    ///
    /// Calling while not listening is benign, and calling from the
    /// listening thread itself (e.g. teardown triggered inside the
    /// detection callback) skips the join instead of deadlocking.
    pub fn stop_listening(&self) {
        if !self.listening.load(Ordering::SeqCst) && self.thread.lock().is_none() {
            tracing::debug!("Spotter not listening, ignoring stop");
            return;
        }

        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() == std::thread::current().id() {
                tracing::debug!("Stop from the listening thread itself, skipping join");
            } else if handle.join().is_err() {
                tracing::error!("Spotter listening thread panicked");
            }
        }
        self.listening.store(false, Ordering::SeqCst);
    }
}

impl Drop for KeywordSpotter {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

fn clone_load_error(e: &VoicegateError) -> VoicegateError {
    match e {
        VoicegateError::ModelLoadFailure { locale, reason } => VoicegateError::ModelLoadFailure {
            locale: locale.clone(),
            reason: reason.clone(),
        },
        VoicegateError::PermissionDenied => VoicegateError::PermissionDenied,
        other => VoicegateError::unknown(other),
    }
}
