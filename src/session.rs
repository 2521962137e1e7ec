//! Streaming session.
//!
//! A `Session` ties one capture source, an optional detection model and a
//! presentation surface together. It is driven by `tick()`, either from the
//! fixed-interval `run` loop or by a host UI timer. Everything happens on the
//! caller's thread except model provisioning, which runs on the loader
//! thread and is picked up by `tick()` once finished.
//!
//! State machine:
//! - `Idle` --start(i)--> `Streaming { index: i }`
//! - `Streaming` --stop()--> `Idle`
//! - `Streaming` --N consecutive read failures--> `Idle` (one `StreamLost`)
//!
//! The `run` loop never ends on device errors. A lost or unavailable camera
//! leaves the session Idle, and with `reconnect` set the loop keeps trying to
//! reopen the selected device until it comes back or `stop()` is called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::annotate::annotate;
use crate::capture::{CameraBackend, CameraDescriptor, CaptureHandle, CaptureSource};
use crate::config::OpencamConfig;
use crate::detect::{DetectParams, DetectionModel};
use crate::display::{DisplayImage, Notice, PresentationSurface};
use crate::error::{CameraError, ErrorKind};
use crate::frame::Frame;
use crate::model_files::{DownloadProgress, LoadEvent, ModelLoader};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming { index: u32 },
}

/// What a single `tick()` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not streaming; nothing was read.
    Idle,
    /// A frame was shown. `annotated` is false for passthrough frames.
    Presented { detections: usize, annotated: bool },
    /// The read failed; the stream is still up.
    ReadFailed { consecutive: u32 },
}

/// Where detection stands for this session.
pub enum AnnotationMode {
    /// The loader thread is still downloading or building the model.
    Pending(ModelLoader),
    Ready(DetectionModel),
    /// No model; frames pass through unannotated.
    Unavailable,
}

impl AnnotationMode {
    pub fn describe(&self) -> String {
        match self {
            AnnotationMode::Pending(_) => "loading".to_string(),
            AnnotationMode::Ready(model) => format!("ready ({})", model.backend_name()),
            AnnotationMode::Unavailable => "passthrough".to_string(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, AnnotationMode::Ready(_))
    }
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub tick: Duration,
    pub max_read_failures: u32,
    pub health_interval: Duration,
    /// How often `run` retries the selected camera while it is unavailable.
    pub reconnect: Option<Duration>,
    pub params: DetectParams,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&OpencamConfig::default())
    }
}

impl From<&OpencamConfig> for SessionSettings {
    fn from(cfg: &OpencamConfig) -> Self {
        Self {
            tick: cfg.tick,
            max_read_failures: cfg.max_read_failures,
            health_interval: cfg.health_interval,
            reconnect: cfg.reconnect,
            params: cfg.detection.params,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_presented: u64,
    pub frames_annotated: u64,
    pub detections: u64,
    pub read_failures: u64,
    pub detection_failures: u64,
    pub streams_lost: u64,
    pub reconnects: u64,
}

type ProgressSink = Box<dyn FnMut(DownloadProgress) + Send>;

pub struct Session<B: CameraBackend, S: PresentationSurface> {
    source: CaptureSource<B>,
    surface: S,
    settings: SessionSettings,
    annotation: AnnotationMode,
    handle: Option<CaptureHandle>,
    selected: u32,
    /// Set by `start`, cleared by `stop`: the user wants `selected` streaming.
    wants_stream: bool,
    last_attempt: Option<Instant>,
    consecutive_failures: u32,
    unavailable_logged: bool,
    progress_sink: Option<ProgressSink>,
    stats: SessionStats,
}

impl<B: CameraBackend, S: PresentationSurface> Session<B, S> {
    /// New idle session. Detection stays unavailable until a model is
    /// installed or a loader is attached.
    pub fn new(source: CaptureSource<B>, surface: S, settings: SessionSettings) -> Self {
        Self {
            source,
            surface,
            settings,
            annotation: AnnotationMode::Unavailable,
            handle: None,
            selected: 0,
            wants_stream: false,
            last_attempt: None,
            consecutive_failures: 0,
            unavailable_logged: false,
            progress_sink: None,
            stats: SessionStats::default(),
        }
    }

    /// Provision the model in the background; frames pass through meanwhile.
    pub fn with_loader(mut self, loader: ModelLoader) -> Self {
        self.annotation = AnnotationMode::Pending(loader);
        self
    }

    /// Receive download progress relayed from the loader.
    pub fn with_progress_sink(mut self, sink: impl FnMut(DownloadProgress) + Send + 'static) -> Self {
        self.progress_sink = Some(Box::new(sink));
        self
    }

    pub fn install_model(&mut self, model: DetectionModel) {
        log::info!("object detection enabled ({} backend)", model.backend_name());
        self.annotation = AnnotationMode::Ready(model);
        self.unavailable_logged = false;
    }

    pub fn state(&self) -> StreamState {
        match &self.handle {
            Some(handle) => StreamState::Streaming {
                index: handle.index(),
            },
            None => StreamState::Idle,
        }
    }

    /// Device that `start`/`change_device` last targeted.
    pub fn selected_device(&self) -> u32 {
        self.selected
    }

    pub fn annotation(&self) -> &AnnotationMode {
        &self.annotation
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn enumerate(&mut self) -> Result<Vec<CameraDescriptor>> {
        self.source.enumerate()
    }

    /// Begin streaming from device `index`.
    ///
    /// Starting the device already streaming is a no-op. Starting another
    /// device stops the current one first. On failure the session is Idle.
    pub fn start(&mut self, index: u32) -> Result<()> {
        self.selected = index;
        self.wants_stream = true;
        if let StreamState::Streaming { index: current } = self.state() {
            if current == index {
                log::warn!("camera {} is already streaming", index);
                return Ok(());
            }
            self.release();
        }

        match self.source.open(index) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.consecutive_failures = 0;
                self.last_attempt = None;
                Ok(())
            }
            Err(err) => {
                self.last_attempt = Some(Instant::now());
                log::error!("{:#}", err);
                self.surface.notify(Notice::error(err.to_string()));
                Err(err)
            }
        }
    }

    /// Stop streaming and blank the surface. No-op when Idle.
    pub fn stop(&mut self) {
        self.wants_stream = false;
        self.release();
    }

    fn release(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        handle.close();
        self.consecutive_failures = 0;
        if let Err(err) = self.surface.clear() {
            log::warn!("failed to clear display: {:#}", err);
        }
    }

    /// Select another device; restarts the stream on it when streaming.
    pub fn change_device(&mut self, index: u32) -> Result<()> {
        match self.state() {
            StreamState::Streaming { index: current } if current != index => self.start(index),
            _ => {
                self.selected = index;
                Ok(())
            }
        }
    }

    /// One step of the pipeline: read, detect, annotate, present.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        self.poll_loader();

        let Some(handle) = self.handle.as_mut() else {
            return Ok(TickOutcome::Idle);
        };
        let index = handle.index();

        let frame = match handle.read_frame() {
            Ok(frame) => frame,
            Err(err) => return self.read_failed(index, err),
        };
        self.consecutive_failures = 0;

        let (shown, detections, annotated) = self.annotate_frame(frame);
        let image = DisplayImage::from_frame(&shown);
        if let Err(err) = self.surface.present(&image) {
            log::warn!("failed to present frame from camera {}: {:#}", index, err);
        }
        self.stats.frames_presented += 1;
        Ok(TickOutcome::Presented {
            detections,
            annotated,
        })
    }

    /// Tick at the configured interval until `running` clears or `max_ticks`
    /// is reached.
    ///
    /// Tick errors are already logged and shown on the surface; the loop
    /// carries on Idle and reopens the camera when `reconnect` allows it.
    pub fn run(&mut self, running: &AtomicBool, max_ticks: Option<u64>) {
        let mut ticks = 0u64;
        let mut last_health = Instant::now();

        while running.load(Ordering::SeqCst) {
            if max_ticks.is_some_and(|max| ticks >= max) {
                break;
            }
            let started = Instant::now();
            self.reconnect();
            if let Err(err) = self.tick() {
                log::debug!("tick {} failed: {:#}", ticks, err);
            }
            ticks += 1;

            if last_health.elapsed() >= self.settings.health_interval {
                self.log_health();
                last_health = Instant::now();
            }
            if let Some(remaining) = self.settings.tick.checked_sub(started.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
    }

    /// Stop streaming and release the session.
    pub fn shutdown(mut self) {
        self.stop();
        log::info!(
            "session closed: {} frames shown, {} annotated, {} read failures",
            self.stats.frames_presented,
            self.stats.frames_annotated,
            self.stats.read_failures
        );
    }

    /// Reopen the selected camera if it should be streaming but is not.
    fn reconnect(&mut self) {
        let Some(interval) = self.settings.reconnect else {
            return;
        };
        if !self.wants_stream || self.handle.is_some() {
            return;
        }
        if self.last_attempt.is_some_and(|at| at.elapsed() < interval) {
            return;
        }
        self.last_attempt = Some(Instant::now());
        match self.source.open(self.selected) {
            Ok(handle) => {
                log::info!("camera {} reopened", self.selected);
                self.handle = Some(handle);
                self.consecutive_failures = 0;
                self.stats.reconnects += 1;
            }
            Err(err) => log::debug!("camera {} still unavailable: {:#}", self.selected, err),
        }
    }

    fn read_failed(&mut self, index: u32, err: anyhow::Error) -> Result<TickOutcome> {
        self.consecutive_failures += 1;
        self.stats.read_failures += 1;
        let consecutive = self.consecutive_failures;
        log::warn!("{:#} ({} in a row)", err, consecutive);
        self.surface.notify(Notice::warning(err.to_string()));

        if consecutive < self.settings.max_read_failures {
            return Ok(TickOutcome::ReadFailed { consecutive });
        }

        self.release();
        self.last_attempt = Some(Instant::now());
        self.stats.streams_lost += 1;
        let lost = CameraError::StreamLost {
            index,
            failures: consecutive,
            last: format!("{:#}", err),
        };
        log::error!("{}", lost);
        self.surface.notify(Notice::error(lost.to_string()));
        Err(lost.into())
    }

    fn annotate_frame(&mut self, frame: Frame) -> (Frame, usize, bool) {
        let AnnotationMode::Ready(model) = &mut self.annotation else {
            if matches!(self.annotation, AnnotationMode::Unavailable) && !self.unavailable_logged {
                log::warn!("object detection unavailable; showing frames without annotations");
                self.unavailable_logged = true;
            }
            return (frame, 0, false);
        };

        match model.detect(&frame, &self.settings.params) {
            Ok(detections) => {
                let annotated = annotate(&frame, &detections);
                self.stats.frames_annotated += 1;
                self.stats.detections += detections.len() as u64;
                (annotated, detections.len(), true)
            }
            Err(err) => {
                self.stats.detection_failures += 1;
                log::warn!("detection failed, showing raw frame: {:#}", err);
                (frame, 0, false)
            }
        }
    }

    fn poll_loader(&mut self) {
        let AnnotationMode::Pending(loader) = &mut self.annotation else {
            return;
        };
        let mut finished = None;
        while let Some(event) = loader.poll() {
            match event {
                LoadEvent::Progress(progress) => {
                    if let Some(sink) = self.progress_sink.as_mut() {
                        sink(progress);
                    }
                }
                LoadEvent::Finished(result) => {
                    finished = Some(result);
                    break;
                }
            }
        }

        match finished {
            Some(Ok(model)) => self.install_model(model),
            Some(Err(err)) => {
                self.annotation = AnnotationMode::Unavailable;
                let reason = match CameraError::kind_of(&err) {
                    Some(ErrorKind::Download) | Some(ErrorKind::ModelLoad) => err.to_string(),
                    _ => CameraError::model_load(format!("{:#}", err)).to_string(),
                };
                log::error!("{}", reason);
                self.surface.notify(Notice::warning(reason));
            }
            None => {}
        }
    }

    fn log_health(&self) {
        log::info!(
            "health: {:?}, annotation {}, frames {} (annotated {}, detections {}), read failures {}",
            self.state(),
            self.annotation.describe(),
            self.stats.frames_presented,
            self.stats.frames_annotated,
            self.stats.detections,
            self.stats.read_failures
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{SyntheticBackend, SyntheticDevice};
    use crate::detect::{NetworkConfig, OutputTensor, ScriptedBackend};
    use crate::display::{NoticeLevel, RecordingSurface};

    fn session(devices: u32) -> Session<SyntheticBackend, RecordingSurface> {
        let backend = SyntheticBackend::new(
            (0..devices).map(|i| SyntheticDevice::new(i, 64, 48)).collect(),
        );
        Session::new(
            CaptureSource::new(backend),
            RecordingSurface::default(),
            SessionSettings::default(),
        )
    }

    fn scripted_model(rows: Vec<Vec<f32>>) -> DetectionModel {
        let network = NetworkConfig::parse("[net]\nwidth=32\nheight=32\n[yolo]\nclasses=2\n").unwrap();
        let backend = ScriptedBackend::new(vec![OutputTensor::from_rows(&rows).unwrap()]);
        DetectionModel::with_backend(
            Box::new(backend),
            network,
            vec!["person".to_string(), "dog".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn idle_tick_does_nothing() -> Result<()> {
        let mut session = session(1);
        assert_eq!(session.tick()?, TickOutcome::Idle);
        assert_eq!(session.surface().presented, 0);
        Ok(())
    }

    #[test]
    fn start_same_index_is_noop_and_stop_is_idempotent() -> Result<()> {
        let mut session = session(2);
        session.start(1)?;
        session.start(1)?;
        assert_eq!(session.state(), StreamState::Streaming { index: 1 });
        session.stop();
        session.stop();
        assert_eq!(session.state(), StreamState::Idle);
        assert_eq!(session.surface().clears, 1);
        Ok(())
    }

    #[test]
    fn passthrough_when_no_model() -> Result<()> {
        let mut session = session(1);
        session.start(0)?;
        let outcome = session.tick()?;
        assert_eq!(
            outcome,
            TickOutcome::Presented {
                detections: 0,
                annotated: false
            }
        );
        let image = session.surface().last.clone().expect("frame presented");
        assert_eq!((image.width, image.height), (64, 48));
        Ok(())
    }

    #[test]
    fn ready_model_annotates_frames() -> Result<()> {
        let mut session = session(1);
        session.install_model(scripted_model(vec![vec![0.5, 0.5, 0.5, 0.5, 1.0, 0.9, 0.0]]));
        session.start(0)?;
        let outcome = session.tick()?;
        assert_eq!(
            outcome,
            TickOutcome::Presented {
                detections: 1,
                annotated: true
            }
        );
        assert_eq!(session.stats().detections, 1);
        Ok(())
    }

    #[test]
    fn failed_loader_switches_to_passthrough_with_one_notice() -> Result<()> {
        let loader = ModelLoader::spawn_with(|_| Err(CameraError::model_load("bad weights").into()));
        let mut session = session(1).with_loader(loader);
        session.start(0)?;
        for _ in 0..50 {
            session.tick()?;
            if !matches!(session.annotation(), AnnotationMode::Pending(_)) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(session.annotation(), AnnotationMode::Unavailable));
        session.tick()?;
        let warnings = session
            .surface()
            .notices
            .iter()
            .filter(|n| n.level == NoticeLevel::Warning)
            .count();
        assert_eq!(warnings, 1);
        Ok(())
    }

    #[test]
    fn stopped_session_is_not_reopened() -> Result<()> {
        let settings = SessionSettings {
            tick: Duration::from_millis(1),
            reconnect: Some(Duration::ZERO),
            ..SessionSettings::default()
        };
        let backend = SyntheticBackend::new(vec![SyntheticDevice::new(0, 8, 8)]);
        let mut session = Session::new(CaptureSource::new(backend), RecordingSurface::default(), settings);
        session.start(0)?;
        session.stop();

        session.run(&AtomicBool::new(true), Some(3));
        assert_eq!(session.state(), StreamState::Idle);
        assert_eq!(session.stats().reconnects, 0);
        assert_eq!(session.surface().presented, 0);
        Ok(())
    }

    #[test]
    fn change_device_while_idle_only_selects() -> Result<()> {
        let mut session = session(3);
        session.change_device(2)?;
        assert_eq!(session.selected_device(), 2);
        assert_eq!(session.state(), StreamState::Idle);
        Ok(())
    }
}
