use candle_core::Device;
use image::{ImageFormat, Rgb, RgbImage};
use promptseg::bbox::{BBox, Detections};
use promptseg::bootstrap::CapabilityRegistry;
use promptseg::capability::{
    Detector, DetectorBackend, Mask, SegmentPrompt, Segmenter, SegmenterBackend,
};
use promptseg::config::{AssetSource, ModelsConfig, PipelineConfig};
use promptseg::download::AssetFetcher;
use promptseg::error::{Error, InputError, Result, SegmentError};
use promptseg::pipeline::Pipeline;
use promptseg::state::AppState;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Set(ThreadId),
    Predict(ThreadId),
    Reset,
}

#[derive(Default)]
struct Calls {
    loads: AtomicUsize,
    detect: AtomicUsize,
    set_image: AtomicUsize,
    fetches: AtomicUsize,
    detector_saw: Mutex<Vec<(u32, u32)>>,
    prompts: Mutex<Vec<SegmentPrompt>>,
    events: Mutex<Vec<Event>>,
}

type Respond = Arc<dyn Fn(&RgbImage) -> Result<Detections> + Send + Sync>;

struct FakeDetector {
    calls: Arc<Calls>,
    respond: Respond,
}

impl Detector for FakeDetector {
    fn predict_with_caption(
        &self,
        image: &RgbImage,
        _caption: &str,
        _box_threshold: f32,
        _text_threshold: f32,
    ) -> Result<Detections> {
        self.calls.detect.fetch_add(1, Ordering::SeqCst);
        self.calls
            .detector_saw
            .lock()
            .unwrap()
            .push(image.dimensions());
        (self.respond)(image)
    }
}

struct FakeDetectorBackend {
    calls: Arc<Calls>,
    respond: Respond,
}

impl DetectorBackend for FakeDetectorBackend {
    fn load(&self, _: &Path, _: &Path, _: &Device) -> Result<Box<dyn Detector>> {
        self.calls.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDetector {
            calls: self.calls.clone(),
            respond: self.respond.clone(),
        }))
    }
}

/// Answers box prompts with the box area and point prompts with a small
/// square around the point.
struct FakeSegmenter {
    calls: Arc<Calls>,
    box_fails: bool,
    primed: Option<(u32, u32)>,
    slow: bool,
}

impl Segmenter for FakeSegmenter {
    fn set_image(&mut self, image: &RgbImage) -> Result<()> {
        self.calls.set_image.fetch_add(1, Ordering::SeqCst);
        self.calls
            .events
            .lock()
            .unwrap()
            .push(Event::Set(thread::current().id()));
        self.primed = Some(image.dimensions());
        if self.slow {
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }

    fn predict(&mut self, prompt: &SegmentPrompt, _: bool) -> Result<Vec<Mask>> {
        self.calls
            .events
            .lock()
            .unwrap()
            .push(Event::Predict(thread::current().id()));
        self.calls.prompts.lock().unwrap().push(*prompt);
        let (w, h) = self
            .primed
            .ok_or_else(|| Error::Capability("not primed".into()))?;
        match *prompt {
            SegmentPrompt::Box(_) if self.box_fails => {
                Err(Error::Capability("box prompt rejected".into()))
            }
            SegmentPrompt::Box(bbox) => Ok(vec![Mask::from_fn(w, h, |x, y| {
                bbox.contains(x as f32, y as f32)
            })]),
            SegmentPrompt::Point { x, y, .. } => Ok(vec![Mask::from_fn(w, h, |px, py| {
                (px as f32 - x).abs() <= 2.0 && (py as f32 - y).abs() <= 2.0
            })]),
        }
    }

    fn reset(&mut self) {
        self.calls.events.lock().unwrap().push(Event::Reset);
        self.primed = None;
    }
}

struct FakeSegmenterBackend {
    calls: Arc<Calls>,
    box_fails: bool,
    slow: bool,
}

impl SegmenterBackend for FakeSegmenterBackend {
    fn variants(&self) -> Vec<String> {
        vec!["vit_t".into()]
    }

    fn load(&self, _: &str, _: &Path, _: &Device) -> Result<Box<dyn Segmenter>> {
        self.calls.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSegmenter {
            calls: self.calls.clone(),
            box_fails: self.box_fails,
            primed: None,
            slow: self.slow,
        }))
    }
}

struct NoNetwork(Arc<Calls>);

impl AssetFetcher for NoNetwork {
    fn fetch(&self, source: &AssetSource, _dest: &Path) -> Result<()> {
        self.0.fetches.fetch_add(1, Ordering::SeqCst);
        Err(Error::Download {
            url: source.to_string(),
            reason: "network disabled in tests".into(),
        })
    }
}

struct Harness {
    _dir: TempDir,
    storage: PathBuf,
    calls: Arc<Calls>,
    pipeline: Pipeline,
}

#[derive(Default)]
struct Options {
    box_fails: bool,
    slow_segmenter: bool,
    no_detector: bool,
}

fn models_on_disk(root: &Path) -> ModelsConfig {
    let models = ModelsConfig {
        root: root.join("models"),
        vendor_dir: root.join("vendor"),
        ..Default::default()
    };
    let config = models.root.join("config").join(&models.detector.config_file);
    fs::create_dir_all(config.parent().unwrap()).unwrap();
    fs::write(&config, "# detector settings").unwrap();
    fs::write(models.detector_checkpoint_path(), b"detector weights").unwrap();
    fs::write(models.segmenter_checkpoint_path(), b"segmenter weights").unwrap();
    models
}

fn harness(respond: Respond, options: Options) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("static/images");
    let calls = Arc::new(Calls::default());
    let config = PipelineConfig {
        storage_root: storage.clone(),
        force_cpu: true,
        models: models_on_disk(dir.path()),
        ..Default::default()
    };
    let mut registry = CapabilityRegistry::new();
    if !options.no_detector {
        registry.register_detector(
            "groundingdino",
            FakeDetectorBackend {
                calls: calls.clone(),
                respond,
            },
        );
    }
    registry.register_segmenter(
        "mobile_sam",
        FakeSegmenterBackend {
            calls: calls.clone(),
            box_fails: options.box_fails,
            slow: options.slow_segmenter,
        },
    );
    let state = AppState::with_fetcher(config, registry, NoNetwork(calls.clone()));
    Harness {
        _dir: dir,
        storage,
        calls,
        pipeline: Pipeline::new(Arc::new(state)),
    }
}

fn respond(f: impl Fn(&RgbImage) -> Result<Detections> + Send + Sync + 'static) -> Respond {
    Arc::new(f)
}

fn one_box(x1: f32, y1: f32, x2: f32, y2: f32) -> Respond {
    respond(move |_| Ok(Detections::new(vec![BBox::new(x1, y1, x2, y2)], vec![0.9])))
}

fn png(image: &RgbImage) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, ImageFormat::Png).unwrap();
    cursor.into_inner()
}

fn files_under(root: &Path) -> usize {
    if !root.exists() {
        return 0;
    }
    fs::read_dir(root)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            if path.is_dir() {
                files_under(&path)
            } else {
                1
            }
        })
        .sum()
}

#[test]
fn empty_bytes_never_reach_the_models() {
    let h = harness(one_box(0.0, 0.0, 5.0, 5.0), Options::default());
    assert!(h.pipeline.segment(&[], "the burger").is_none());
    assert!(matches!(
        h.pipeline.run(&[], "the burger"),
        Err(SegmentError::Input(InputError::EmptyImage))
    ));
    assert_eq!(h.calls.loads.load(Ordering::SeqCst), 0);
    assert_eq!(h.calls.detect.load(Ordering::SeqCst), 0);
    assert_eq!(h.calls.set_image.load(Ordering::SeqCst), 0);
}

#[test]
fn blank_prompts_are_rejected() {
    let h = harness(one_box(0.0, 0.0, 5.0, 5.0), Options::default());
    let bytes = png(&RgbImage::new(16, 16));
    for prompt in ["", "   ", "\t\n"] {
        assert!(h.pipeline.segment(&bytes, prompt).is_none());
    }
    assert_eq!(h.calls.detect.load(Ordering::SeqCst), 0);
}

#[test]
fn corrupt_and_oversized_uploads_are_input_errors() {
    let h = harness(one_box(0.0, 0.0, 5.0, 5.0), Options::default());
    assert!(matches!(
        h.pipeline.run(b"GIF89a but not really", "cat"),
        Err(SegmentError::Input(InputError::Decode(_)))
    ));
    let oversized = vec![0u8; 10 * 1024 * 1024 + 1];
    let err = h.pipeline.run(&oversized, "cat").unwrap_err();
    assert!(matches!(err, SegmentError::Input(InputError::TooLarge { .. })));
    assert!(err.user_message().contains("10 MB"));
}

#[test]
fn burger_scenario_downscales_and_draws_box() {
    let h = harness(one_box(100.0, 100.0, 400.0, 300.0), Options::default());
    let source = RgbImage::from_pixel(3000, 1500, Rgb([120, 60, 30]));

    let pair = h.pipeline.segment(&png(&source), "the burger").unwrap();

    assert_eq!(
        h.calls.detector_saw.lock().unwrap().as_slice(),
        &[(2048, 1024)]
    );
    assert!(pair.original.is_file());
    assert!(pair.result.is_file());
    assert!(pair.original.starts_with(h.storage.join("originals")));
    assert!(pair.result.starts_with(h.storage.join("results")));

    let original = image::open(&pair.original).unwrap().to_rgb8();
    assert_eq!(original.dimensions(), (2048, 1024));
    let result = image::open(&pair.result).unwrap().to_rgb8();
    assert_eq!(result.dimensions(), (2048, 1024));
    let green = Rgb([0, 255, 0]);
    assert_eq!(result.get_pixel(250, 300 - 1), &green);
    assert_eq!(result.get_pixel(100, 200), &green);
    assert_eq!(result.get_pixel(399, 200), &green);
    // inside the box the mask overlay tints the source
    assert_ne!(result.get_pixel(250, 200), original.get_pixel(250, 200));
    // outside both box and mask nothing changes
    assert_eq!(result.get_pixel(1000, 800), original.get_pixel(1000, 800));
}

#[test]
fn nothing_detected_writes_nothing() {
    let h = harness(respond(|_| Ok(Detections::empty())), Options::default());
    let black = RgbImage::new(50, 50);

    assert!(h.pipeline.segment(&png(&black), "pizza").is_none());
    let err = h.pipeline.run(&png(&black), "pizza").unwrap_err();
    assert!(matches!(err, SegmentError::NoDetection));
    assert!(err.is_expected());
    assert_eq!(h.calls.set_image.load(Ordering::SeqCst), 0);
    assert_eq!(files_under(&h.storage), 0);
}

#[test]
fn point_fallback_rescues_failed_box_prompt() {
    let h = harness(
        one_box(10.0, 10.0, 30.0, 20.0),
        Options {
            box_fails: true,
            ..Default::default()
        },
    );
    let pair = h
        .pipeline
        .segment(&png(&RgbImage::new(64, 64)), "the mug")
        .unwrap();
    assert!(pair.result.is_file());
    let prompts = h.calls.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert!(matches!(prompts[0], SegmentPrompt::Box(_)));
    assert_eq!(
        prompts[1],
        SegmentPrompt::Point {
            x: 20.0,
            y: 15.0,
            foreground: true
        }
    );
    assert_eq!(h.calls.events.lock().unwrap().last(), Some(&Event::Reset));
}

#[test]
fn original_round_trips_at_detector_size() {
    let h = harness(one_box(1.0, 1.0, 20.0, 10.0), Options::default());
    let source = RgbImage::from_fn(37, 23, |x, y| Rgb([x as u8 * 5, y as u8 * 7, 90]));
    let pair = h.pipeline.segment(&png(&source), "stripes").unwrap();
    let original = image::open(&pair.original).unwrap().to_rgb8();
    assert_eq!(
        h.calls.detector_saw.lock().unwrap()[0],
        original.dimensions()
    );
    assert_eq!(original, source);
}

#[test]
fn missing_detector_fails_every_call_without_reloading() {
    let h = harness(
        one_box(0.0, 0.0, 5.0, 5.0),
        Options {
            no_detector: true,
            ..Default::default()
        },
    );
    let bytes = png(&RgbImage::new(16, 16));
    for _ in 0..3 {
        let err = h.pipeline.try_segment(&bytes, "cup").unwrap_err();
        assert!(matches!(err, SegmentError::CapabilityUnavailable(_)));
        assert!(err.to_string().contains("register_detector"));
    }
    // the segmenter was built once by the single bootstrap attempt
    assert_eq!(h.calls.loads.load(Ordering::SeqCst), 1);
    assert_eq!(h.calls.fetches.load(Ordering::SeqCst), 0);
}

#[test]
fn panicking_detector_is_contained() {
    let h = harness(
        respond(|_| panic!("tensor shape mismatch")),
        Options::default(),
    );
    let bytes = png(&RgbImage::new(16, 16));
    assert!(h.pipeline.segment(&bytes, "cup").is_none());
    let err = h.pipeline.try_segment(&bytes, "cup").unwrap_err();
    assert!(matches!(err, SegmentError::Unexpected(_)));
    assert_eq!(
        err.user_message(),
        "An error occurred while processing the image."
    );
}

#[test]
fn detector_error_is_unexpected() {
    let h = harness(
        respond(|_| Err(Error::Capability("bad caption".into()))),
        Options::default(),
    );
    let err = h
        .pipeline
        .try_segment(&png(&RgbImage::new(8, 8)), "cup")
        .unwrap_err();
    assert!(matches!(err, SegmentError::Unexpected(_)));
}

#[test]
fn concurrent_calls_never_interleave_prime_and_predict() {
    let h = harness(
        one_box(2.0, 2.0, 12.0, 12.0),
        Options {
            slow_segmenter: true,
            ..Default::default()
        },
    );
    let images: Vec<Vec<u8>> = (0..4u8)
        .map(|i| png(&RgbImage::from_pixel(24 + i as u32, 24, Rgb([40 * i, 0, 0]))))
        .collect();

    let pairs: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = images
            .iter()
            .map(|bytes| {
                let pipeline = &h.pipeline;
                scope.spawn(move || {
                    (0..3)
                        .map(|_| pipeline.segment(bytes, "square"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect()
    });

    assert_eq!(pairs.len(), 12);
    assert!(pairs.iter().all(Option::is_some));
    let events = h.calls.events.lock().unwrap();
    let mut primed_by = None;
    for event in events.iter() {
        match event {
            Event::Set(thread) => {
                assert!(primed_by.is_none(), "primed twice without reset");
                primed_by = Some(*thread);
            }
            Event::Predict(thread) => assert_eq!(primed_by.as_ref(), Some(thread)),
            Event::Reset => primed_by = None,
        }
    }
    // the stored original always matches the image the call was given
    for (i, pair) in pairs.iter().enumerate() {
        let original = image::open(&pair.as_ref().unwrap().original).unwrap().to_rgb8();
        let thread_index = (i / 3) as u8;
        assert_eq!(original.width(), 24 + thread_index as u32);
        assert_eq!(original.get_pixel(0, 0), &Rgb([40 * thread_index, 0, 0]));
    }
}

#[test]
fn bootstrap_twice_gives_same_models_without_downloads() {
    let h = harness(one_box(0.0, 0.0, 5.0, 5.0), Options::default());
    let state = h.pipeline.state();
    let first = state.capabilities().unwrap();
    let second = state.capabilities().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(state.is_loaded());
    assert_eq!(h.calls.loads.load(Ordering::SeqCst), 2);
    assert_eq!(h.calls.fetches.load(Ordering::SeqCst), 0);

    let bootstrapper = state.bootstrapper();
    assert_eq!(
        bootstrapper.acquire_detector_capability().is_ready(),
        bootstrapper.acquire_detector_capability().is_ready()
    );
    assert_eq!(h.calls.fetches.load(Ordering::SeqCst), 0);
}

#[test]
fn cutout_is_written_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(Calls::default());
    let mut config = PipelineConfig {
        storage_root: dir.path().join("out"),
        force_cpu: true,
        models: models_on_disk(dir.path()),
        ..Default::default()
    };
    config.annotation.write_cutout = true;
    let mut registry = CapabilityRegistry::new();
    registry
        .register_detector(
            "grounding_dino",
            FakeDetectorBackend {
                calls: calls.clone(),
                respond: one_box(4.0, 4.0, 12.0, 12.0),
            },
        )
        .register_segmenter(
            "segment_anything",
            FakeSegmenterBackend {
                calls: calls.clone(),
                box_fails: false,
                slow: false,
            },
        );
    let state = AppState::with_fetcher(config, registry, NoNetwork(calls.clone()));
    let pipeline = Pipeline::new(Arc::new(state));

    let pair = pipeline
        .segment(&png(&RgbImage::from_pixel(16, 16, Rgb([9, 9, 9]))), "chip")
        .unwrap();
    let cutout = image::open(pair.cutout.unwrap()).unwrap().to_rgba8();
    assert_eq!(cutout.get_pixel(8, 8).0, [9, 9, 9, 255]);
    assert_eq!(cutout.get_pixel(0, 0).0[3], 0);
}
