//! Test doubles: a recording sink and a scriptable mock decoder backend.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use ds_common::{
    DecodeError, DecodedFrame, DecoderCallback, DecoderConfig, InitError, InitPromise,
    MediaDataDecoder, MediaSample, PlatformDecoderModule, Resolution, Resolver, TaskQueue,
    TimeCode, TrackType, VideoCodec,
};

/// What a sink observed, with frames reduced to their pts in seconds.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Output(f64),
    Error(DecodeError),
    InputExhausted,
    DrainComplete,
    ReleaseMediaResources,
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }
}

impl DecoderCallback for RecordingSink {
    fn on_output(&self, frame: DecodedFrame) {
        self.events.lock().push(Event::Output(frame.pts.as_secs()));
    }

    fn on_error(&self, error: DecodeError) {
        self.events.lock().push(Event::Error(error));
    }

    fn on_input_exhausted(&self) {
        self.events.lock().push(Event::InputExhausted);
    }

    fn on_drain_complete(&self) {
        self.events.lock().push(Event::DrainComplete);
    }

    fn on_release_media_resources(&self) {
        self.events.lock().push(Event::ReleaseMediaResources);
    }
}

pub fn frame(pts: f64) -> DecodedFrame {
    DecodedFrame {
        data: vec![1, 2, 3],
        pts: TimeCode::from_secs(pts),
        track: TrackType::Video,
        is_keyframe: true,
    }
}

pub fn sample(pts: f64) -> MediaSample {
    MediaSample::video(vec![1, 2, 3], TimeCode::from_secs(pts), true)
}

pub fn hd_config() -> DecoderConfig {
    DecoderConfig::new(VideoCodec::H264, Resolution::HD)
}

/// A request the mock decoder received, tagged with the instance number.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Init(u32),
    Input(u32, f64),
    Flush(u32),
    Drain(u32),
    Shutdown(u32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DrainMode {
    /// Report completion from inside `drain()`.
    Synchronous,
    /// Report completion from the manager's task queue.
    Queued,
    /// Refuse the drain request.
    Fail,
    /// Accept the request and never complete it.
    Never,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InitMode {
    Resolve(TrackType),
    Reject(String),
    /// Keep the resolver so the test decides when init completes.
    Hold,
}

struct MockState {
    drain: DrainMode,
    init: InitMode,
    create_failure: Option<String>,
    hardware: bool,
    calls: Vec<Call>,
    held_inits: Vec<Resolver<TrackType, InitError>>,
    callback: Option<Arc<dyn DecoderCallback>>,
}

/// Scriptable `PlatformDecoderModule` that records every decoder request.
pub struct MockModule {
    state: Arc<Mutex<MockState>>,
    created: AtomicU32,
}

impl MockModule {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(MockState {
                drain: DrainMode::Synchronous,
                init: InitMode::Resolve(TrackType::Video),
                create_failure: None,
                hardware: true,
                calls: Vec::new(),
                held_inits: Vec::new(),
                callback: None,
            })),
            created: AtomicU32::new(0),
        })
    }

    pub fn set_drain(&self, mode: DrainMode) {
        self.state.lock().drain = mode;
    }

    pub fn set_init(&self, mode: InitMode) {
        self.state.lock().init = mode;
    }

    pub fn fail_create(&self, reason: Option<&str>) {
        self.state.lock().create_failure = reason.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    /// Settle every held init.
    pub fn release_inits(&self, result: Result<TrackType, InitError>) {
        let held = std::mem::take(&mut self.state.lock().held_inits);
        for resolver in held {
            resolver.settle(result.clone());
        }
    }

    /// Forget every held init without answering it.
    pub fn drop_inits(&self) {
        self.state.lock().held_inits.clear();
    }

    /// Emit an event as the most recently created decoder.
    pub fn emit(&self, f: impl FnOnce(&dyn DecoderCallback)) {
        let callback = self.state.lock().callback.clone();
        if let Some(callback) = callback {
            f(callback.as_ref());
        }
    }
}

impl PlatformDecoderModule for MockModule {
    fn create_decoder(
        &self,
        config: &DecoderConfig,
        queue: TaskQueue,
        callback: Arc<dyn DecoderCallback>,
    ) -> Result<Box<dyn MediaDataDecoder>, DecodeError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.create_failure {
            return Err(DecodeError::CreateFailed {
                codec: config.codec,
                reason: reason.clone(),
            });
        }
        state.callback = Some(Arc::clone(&callback));
        let instance = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockDecoder {
            instance,
            queue,
            callback,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockDecoder {
    instance: u32,
    queue: TaskQueue,
    callback: Arc<dyn DecoderCallback>,
    state: Arc<Mutex<MockState>>,
}

impl MockDecoder {
    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

impl MediaDataDecoder for MockDecoder {
    fn init(&mut self) -> InitPromise {
        self.record(Call::Init(self.instance));
        let mode = self.state.lock().init.clone();
        let (resolver, promise) = InitPromise::pending();
        match mode {
            InitMode::Resolve(track) => {
                let _ = self.queue.dispatch(move || {
                    resolver.resolve(track);
                });
            }
            InitMode::Reject(reason) => {
                let _ = self.queue.dispatch(move || {
                    resolver.reject(InitError::Failed(reason));
                });
            }
            InitMode::Hold => self.state.lock().held_inits.push(resolver),
        }
        promise
    }

    fn input(&mut self, sample: MediaSample) -> Result<(), DecodeError> {
        self.record(Call::Input(self.instance, sample.pts.as_secs()));
        self.callback.on_output(sample.into());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DecodeError> {
        self.record(Call::Flush(self.instance));
        Ok(())
    }

    fn drain(&mut self) -> Result<(), DecodeError> {
        self.record(Call::Drain(self.instance));
        let mode = self.state.lock().drain;
        match mode {
            DrainMode::Synchronous => {
                self.callback.on_drain_complete();
                Ok(())
            }
            DrainMode::Queued => {
                let callback = Arc::clone(&self.callback);
                self.queue.dispatch(move || callback.on_drain_complete())
            }
            DrainMode::Fail => Err(DecodeError::operation("drain", "mock refused")),
            DrainMode::Never => Ok(()),
        }
    }

    fn shutdown(&mut self) -> Result<(), DecodeError> {
        self.record(Call::Shutdown(self.instance));
        Ok(())
    }

    fn is_hardware_accelerated(&self) -> bool {
        self.state.lock().hardware
    }
}
