//! End-to-end tests for the shared decoder: several proxies multiplexed onto
//! one `PassthroughDecoder` running on the manager's task queue.
//!
//! A spy module wraps the passthrough backend so the tests can observe which
//! requests actually reach the real decoder, and in what order.

use std::sync::Arc;

use parking_lot::Mutex;

use ds_common::{
    DecodeError, DecodedFrame, DecoderCallback, DecoderConfig, InitError, InitPromise,
    ManagerConfig, MediaDataDecoder, MediaSample, PlatformDecoderModule, Resolution, TaskQueue,
    TimeCode, TrackType, VideoCodec,
};
use ds_decoder::{PassthroughModule, SharedDecoderManager};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum Seen {
    Frame(f64),
    Error,
    NeedInput,
    Drained,
    Released,
}

#[derive(Default)]
struct Sink {
    seen: Mutex<Vec<Seen>>,
}

impl Sink {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn frames(&self) -> Vec<f64> {
        self.seen
            .lock()
            .iter()
            .filter_map(|s| match s {
                Seen::Frame(pts) => Some(*pts),
                _ => None,
            })
            .collect()
    }

    fn drains(&self) -> usize {
        self.seen.lock().iter().filter(|s| **s == Seen::Drained).count()
    }
}

impl DecoderCallback for Sink {
    fn on_output(&self, frame: DecodedFrame) {
        self.seen.lock().push(Seen::Frame(frame.pts.as_secs()));
    }

    fn on_error(&self, _error: DecodeError) {
        self.seen.lock().push(Seen::Error);
    }

    fn on_input_exhausted(&self) {
        self.seen.lock().push(Seen::NeedInput);
    }

    fn on_drain_complete(&self) {
        self.seen.lock().push(Seen::Drained);
    }

    fn on_release_media_resources(&self) {
        self.seen.lock().push(Seen::Released);
    }
}

/// Records every request that reaches a decoder it created.
struct SpyModule {
    inner: PassthroughModule,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl SpyModule {
    fn new(inner: PassthroughModule) -> Arc<Self> {
        Arc::new(Self {
            inner,
            log: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn log(&self) -> Vec<&'static str> {
        self.log.lock().clone()
    }

    fn clear(&self) {
        self.log.lock().clear();
    }

    fn count(&self, op: &str) -> usize {
        self.log.lock().iter().filter(|o| **o == op).count()
    }
}

impl PlatformDecoderModule for SpyModule {
    fn create_decoder(
        &self,
        config: &DecoderConfig,
        queue: TaskQueue,
        callback: Arc<dyn DecoderCallback>,
    ) -> Result<Box<dyn MediaDataDecoder>, DecodeError> {
        let inner = self.inner.create_decoder(config, queue, callback)?;
        Ok(Box::new(SpyDecoder {
            inner,
            log: Arc::clone(&self.log),
        }))
    }
}

struct SpyDecoder {
    inner: Box<dyn MediaDataDecoder>,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl MediaDataDecoder for SpyDecoder {
    fn init(&mut self) -> InitPromise {
        self.log.lock().push("init");
        self.inner.init()
    }

    fn input(&mut self, sample: MediaSample) -> Result<(), DecodeError> {
        self.log.lock().push("input");
        self.inner.input(sample)
    }

    fn flush(&mut self) -> Result<(), DecodeError> {
        self.log.lock().push("flush");
        self.inner.flush()
    }

    fn drain(&mut self) -> Result<(), DecodeError> {
        self.log.lock().push("drain");
        self.inner.drain()
    }

    fn shutdown(&mut self) -> Result<(), DecodeError> {
        self.log.lock().push("shutdown");
        self.inner.shutdown()
    }

    fn is_hardware_accelerated(&self) -> bool {
        self.inner.is_hardware_accelerated()
    }

    fn software_fallback_reason(&self) -> Option<String> {
        self.inner.software_fallback_reason()
    }
}

fn config() -> DecoderConfig {
    DecoderConfig::new(VideoCodec::H264, Resolution::HD).with_max_display_delay(2)
}

fn sample(pts: f64) -> MediaSample {
    MediaSample::video(vec![0, 0, 1], TimeCode::from_secs(pts), true)
}

fn settle(manager: &SharedDecoderManager) {
    if let Some(queue) = manager.task_queue() {
        queue.await_idle().unwrap();
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn two_tracks_share_one_init() {
    let manager = SharedDecoderManager::new(ManagerConfig::default()).unwrap();
    let module = SpyModule::new(PassthroughModule::new());
    let sink_a = Sink::new();
    let sink_b = Sink::new();

    let mut a = manager.create_decoder(module.clone(), &config(), sink_a.clone()).unwrap();
    assert_eq!(a.init().wait(), Ok(TrackType::Video));
    assert_eq!(module.log(), vec!["init"]);

    let mut b = manager.create_decoder(module.clone(), &config(), sink_b.clone()).unwrap();
    let b_init = b.init();
    assert!(b_init.is_settled(), "no second real init");
    assert_eq!(b_init.wait(), Ok(TrackType::Video));
    assert_eq!(module.log(), vec!["init", "drain", "flush"]);
    assert!(b.is_active());
    assert!(!a.is_active());

    // A is idle now: its drain completes at once without touching the decoder.
    a.drain().unwrap();
    assert_eq!(sink_a.drains(), 1);
    assert_eq!(module.count("drain"), 1);
    assert_eq!(sink_b.drains(), 0);

    manager.shutdown();
    assert_eq!(module.count("shutdown"), 1);
    assert!(manager.task_queue().is_none());
    assert_eq!(b.input(sample(0.0)), Err(DecodeError::ShutDown));
}

#[test]
fn hand_off_delivers_buffered_frames_to_outgoing_track() {
    let manager = SharedDecoderManager::new(ManagerConfig::default()).unwrap();
    let module = SpyModule::new(PassthroughModule::new());
    let sink_a = Sink::new();
    let sink_b = Sink::new();
    let mut a = manager.create_decoder(module.clone(), &config(), sink_a.clone()).unwrap();
    let mut b = manager.create_decoder(module.clone(), &config(), sink_b.clone()).unwrap();

    a.input(sample(0.1)).unwrap();
    a.input(sample(0.0)).unwrap();
    settle(&manager);
    assert!(sink_a.frames().is_empty(), "held by the reorder buffer");

    module.clear();
    b.input(sample(5.0)).unwrap();
    assert_eq!(module.log(), vec!["drain", "flush", "input"]);

    // The hand-off drain flushed A's pipeline to A, and its completion was
    // consumed internally.
    assert_eq!(sink_a.frames(), vec![0.0, 0.1]);
    assert_eq!(sink_a.drains(), 0);
    assert_eq!(manager.router_stats().absorbed, 1);

    b.drain().unwrap();
    settle(&manager);
    assert_eq!(sink_b.frames(), vec![5.0]);
    assert_eq!(sink_b.drains(), 1);
    assert_eq!(sink_a.frames(), vec![0.0, 0.1], "nothing of B leaked to A");
}

#[test]
fn inactive_flush_issues_no_request() {
    let manager = SharedDecoderManager::new(ManagerConfig::default()).unwrap();
    let module = SpyModule::new(PassthroughModule::new());
    let mut a = manager.create_decoder(module.clone(), &config(), Sink::new()).unwrap();
    let mut b = manager.create_decoder(module.clone(), &config(), Sink::new()).unwrap();

    a.input(sample(0.0)).unwrap();
    module.clear();
    assert!(b.flush().is_ok());
    assert!(module.log().is_empty());
}

#[test]
fn recreate_forces_real_reinit() {
    let manager = SharedDecoderManager::new(ManagerConfig::default()).unwrap();
    let module = SpyModule::new(PassthroughModule::new());
    let mut a = manager.create_decoder(module.clone(), &config(), Sink::new()).unwrap();
    a.init().wait().unwrap();

    let uhd = DecoderConfig::new(VideoCodec::H265, Resolution::UHD);
    manager.recreate(&uhd).unwrap();
    assert!(!manager.is_initialized());
    assert_eq!(module.inner.created_count(), 2);
    assert_eq!(manager.decoder_config(), Some(uhd));

    assert_eq!(a.init().wait(), Ok(TrackType::Video));
    assert_eq!(module.count("init"), 2);
    assert!(manager.is_initialized());
}

#[test]
fn creation_failure_returns_no_proxy() {
    let manager = SharedDecoderManager::new(ManagerConfig::default()).unwrap();
    let module = SpyModule::new(PassthroughModule::failing_create("no decoder for profile"));

    let result = manager.create_decoder(module.clone(), &config(), Sink::new());
    assert!(matches!(result, Err(DecodeError::CreateFailed { .. })));
    assert!(!manager.has_decoder());
    assert_eq!(manager.proxy_count(), 0);
}

#[test]
fn init_failure_can_be_retried() {
    let manager = SharedDecoderManager::new(ManagerConfig::default()).unwrap();
    let module = SpyModule::new(PassthroughModule::failing_init("missing parameter sets"));
    let mut a = manager.create_decoder(module.clone(), &config(), Sink::new()).unwrap();

    let expected = Err(InitError::Failed("missing parameter sets".into()));
    assert_eq!(a.init().wait(), expected);
    assert!(!manager.is_initialized());

    assert_eq!(a.init().wait(), expected);
    assert_eq!(module.count("init"), 2, "a rejected init is retried for real");
}

#[test]
fn dropped_proxies_release_the_decoder() {
    let manager = SharedDecoderManager::new(ManagerConfig::default()).unwrap();
    let module = SpyModule::new(PassthroughModule::new());
    {
        let mut a = manager.create_decoder(module.clone(), &config(), Sink::new()).unwrap();
        a.input(sample(0.0)).unwrap();
        assert_eq!(manager.proxy_count(), 1);
    }
    assert_eq!(manager.proxy_count(), 0);
    assert_eq!(manager.active_proxy(), None);
    assert!(manager.has_decoder(), "the decoder outlives its proxies");
    assert!(!manager.is_hardware_accelerated());
    assert!(manager.software_fallback_reason().is_some());
}
