//! Per-stream session loop.
//!
//! A session owns its smoothing state and statistics, reads frames from one
//! source, analyzes every `process_every`-th frame, fuses the results and
//! hands one record per analyzed frame to a sink.
//!
//! Phases: `Idle -> Connected -> Streaming -> {Disconnected, Error} -> Closed`.
//! Every path ends in `Closed`, and the source is closed by a drop guard
//! whichever way the loop exits.

pub mod sink;

pub use sink::{ChannelSink, FrameSink, JsonLinesSink, OutputVariant};

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::analysis::{
    GeometricFaceAnalyzer, GeometryConfig, HeadPose, HeadPoseEstimator, ObjectFlagReducer,
    ObjectPresence, ObjectTarget, PoseConfig, PoseEstimate, PoseSmoothing,
};
use crate::detect::{DetectionBox, LandmarkProvider, ObjectSignalProvider, ProviderRegistry};
use crate::error::{AnalysisStage, ProctorError, ProctorResult};
use crate::frame::{Frame, RgbView};
use crate::fusion::{Flag, FlagFusionEngine, ProctorFlags};
use crate::ingest::{FrameSource, SourceStats};
use crate::landmarks::LandmarkSet;

const HEALTH_LOG_EVERY: u64 = 300;
/// Longest pause `max_fps` can impose between two iterations.
const MAX_FRAME_INTERVAL: Duration = Duration::from_secs(10);
/// Pacing sleeps in slices this long so a stop request is seen promptly.
const PACING_SLICE: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Connected,
    Streaming,
    Disconnected,
    Error,
    Closed,
}

/// Why the loop stopped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Termination {
    SourceExhausted,
    Stopped,
    SinkDisconnected(String),
    SourceFailed(String),
}

/// Shared stop flag, checked at every iteration boundary.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub geometry: GeometryConfig,
    pub pose: PoseConfig,
    pub targets: Vec<ObjectTarget>,
    /// Analyze one frame out of every `process_every`.
    pub process_every: u32,
    /// Upper bound on loop iterations per second.
    pub max_fps: Option<f32>,
    /// Run the two providers on separate threads.
    pub parallel_inference: bool,
    /// Attach an annotated JPEG to each record (needs the `annotate` feature).
    pub annotate: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            geometry: GeometryConfig::default(),
            pose: PoseConfig::default(),
            targets: ObjectTarget::defaults(),
            process_every: 1,
            max_fps: None,
            parallel_inference: false,
            annotate: false,
        }
    }
}

/// Fused output for one analyzed frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameReport {
    pub sequence: u64,
    pub flags: ProctorFlags,
    pub face_count: usize,
    pub head_pose: HeadPose,
    pub pose: Option<PoseEstimate>,
    pub gaze_ratio: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated_image: Option<String>,
}

impl FrameReport {
    fn conservative(sequence: u64, flags: ProctorFlags) -> Self {
        Self {
            sequence,
            flags,
            face_count: 0,
            head_pose: HeadPose::NoFace,
            pose: None,
            gaze_ratio: None,
            annotated_image: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub frames_read: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub decode_failures: u64,
    /// Per-stage analysis failures.
    pub analysis_failures: BTreeMap<String, u64>,
    /// Analyzed frames in which each flag was raised.
    pub violations: BTreeMap<String, u64>,
    /// Analyzed frames with at least one flag raised.
    pub alert_frames: u64,
}

impl SessionStats {
    fn record_failure(&mut self, stage: AnalysisStage) {
        *self
            .analysis_failures
            .entry(stage.as_str().to_string())
            .or_insert(0) += 1;
    }

    fn record_flags(&mut self, flags: &ProctorFlags) {
        for flag in flags.violations() {
            *self.violations.entry(flag.key().to_string()).or_insert(0) += 1;
        }
        if flags.any_violation() {
            self.alert_frames += 1;
        }
    }

    pub fn violation_count(&self, flag: Flag) -> u64 {
        self.violations.get(flag.key()).copied().unwrap_or(0)
    }

    pub fn failure_count(&self, stage: AnalysisStage) -> u64 {
        self.analysis_failures
            .get(stage.as_str())
            .copied()
            .unwrap_or(0)
    }

    /// Share of analyzed frames that raised any flag.
    pub fn alert_rate(&self) -> f64 {
        if self.frames_processed == 0 {
            0.0
        } else {
            self.alert_frames as f64 / self.frames_processed as f64
        }
    }
}

/// State owned by exactly one session: pose smoothing and statistics.
#[derive(Debug)]
pub struct SessionState {
    pose: PoseSmoothing,
    /// Reported when a single-face frame fails pose estimation. Starts at
    /// `Forward`, the same frontal pose the smoothing starts from.
    last_label: HeadPose,
    stats: SessionStats,
}

impl SessionState {
    pub fn new(pose: PoseSmoothing) -> Self {
        Self {
            pose,
            last_label: HeadPose::Forward,
            stats: SessionStats::default(),
        }
    }

    pub fn pose(&self) -> &PoseSmoothing {
        &self.pose
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub phases: Vec<SessionPhase>,
    pub termination: Termination,
    pub stats: SessionStats,
    pub source: SourceStats,
    pub alert_rate: f64,
}

impl SessionReport {
    pub fn final_phase(&self) -> Option<SessionPhase> {
        self.phases.last().copied()
    }
}

/// Closes the source when the loop exits, however it exits.
struct SourceGuard<'a> {
    inner: &'a mut dyn FrameSource,
}

impl Drop for SourceGuard<'_> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

pub struct StreamingSession {
    id: String,
    config: SessionConfig,
    landmarks: Arc<dyn LandmarkProvider>,
    objects: Arc<dyn ObjectSignalProvider>,
    geometry: GeometricFaceAnalyzer,
    pose: HeadPoseEstimator,
    reducer: ObjectFlagReducer,
    fusion: FlagFusionEngine,
    state: SessionState,
    phases: Vec<SessionPhase>,
}

impl StreamingSession {
    /// Create a session backed by the registry's default providers.
    ///
    /// Fails with `ProviderUnavailable` when the registry is not ready.
    pub fn new(
        id: impl Into<String>,
        config: SessionConfig,
        registry: &ProviderRegistry,
    ) -> ProctorResult<Self> {
        registry.ensure_ready()?;
        Ok(Self::with_providers(
            id,
            config,
            registry.landmarks()?,
            registry.objects()?,
        ))
    }

    pub fn with_providers(
        id: impl Into<String>,
        config: SessionConfig,
        landmarks: Arc<dyn LandmarkProvider>,
        objects: Arc<dyn ObjectSignalProvider>,
    ) -> Self {
        let pose = HeadPoseEstimator::new(config.pose);
        let state = SessionState::new(pose.new_state());
        Self {
            id: id.into(),
            geometry: GeometricFaceAnalyzer::new(config.geometry),
            reducer: ObjectFlagReducer::new(config.targets.clone()),
            fusion: FlagFusionEngine::new(),
            pose,
            landmarks,
            objects,
            state,
            config,
            phases: vec![SessionPhase::Idle],
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phases.last().copied().unwrap_or(SessionPhase::Idle)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    fn transition(&mut self, next: SessionPhase) {
        let current = self.phase();
        if current == next {
            return;
        }
        log::info!("session {}: {:?} -> {:?}", self.id, current, next);
        self.phases.push(next);
    }

    /// Drive the session until the source ends, the sink goes away, `stop`
    /// fires or the source fails. Consumes the session; its state is
    /// dropped with it.
    pub fn run(
        mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        stop: &StopSignal,
    ) -> SessionReport {
        let mut source = SourceGuard { inner: source };
        let termination = match source.inner.open() {
            Ok(()) => {
                self.transition(SessionPhase::Connected);
                self.stream(&mut source, sink, stop)
            }
            Err(err) => {
                log::error!("session {}: source open failed: {}", self.id, err);
                Termination::SourceFailed(err.to_string())
            }
        };

        match &termination {
            Termination::SourceFailed(_) => self.transition(SessionPhase::Error),
            _ => self.transition(SessionPhase::Disconnected),
        }
        if let Err(err) = sink.flush() {
            log::warn!("session {}: final flush failed: {}", self.id, err);
        }
        let source_stats = source.inner.stats();
        drop(source);
        self.transition(SessionPhase::Closed);

        let stats = self.state.stats.clone();
        log::info!(
            "session {} closed ({:?}): read={} processed={} skipped={} decode_failures={} alert_rate={:.3}",
            self.id,
            termination,
            stats.frames_read,
            stats.frames_processed,
            stats.frames_skipped,
            stats.decode_failures,
            stats.alert_rate()
        );
        SessionReport {
            session_id: self.id,
            phases: self.phases,
            termination,
            alert_rate: stats.alert_rate(),
            stats,
            source: source_stats,
        }
    }

    fn stream(
        &mut self,
        source: &mut SourceGuard<'_>,
        sink: &mut dyn FrameSink,
        stop: &StopSignal,
    ) -> Termination {
        let min_interval = frame_interval(self.config.max_fps);
        let process_every = u64::from(self.config.process_every.max(1));
        let mut last_health = Instant::now();

        loop {
            if stop.is_stopped() {
                log::info!("session {}: stop requested", self.id);
                return Termination::Stopped;
            }
            let started = Instant::now();

            let read = source.inner.next_frame();
            let index = self.state.stats.frames_read;
            let report = match read {
                Ok(None) => return Termination::SourceExhausted,
                Ok(Some(mut frame)) => {
                    self.transition(SessionPhase::Streaming);
                    self.state.stats.frames_read += 1;
                    if index % process_every != 0 {
                        self.state.stats.frames_skipped += 1;
                        None
                    } else {
                        Some(self.process_frame(&mut frame))
                    }
                }
                Err(err) if err.is_frame_local() => {
                    self.transition(SessionPhase::Streaming);
                    self.state.stats.frames_read += 1;
                    self.state.stats.decode_failures += 1;
                    log::warn!("session {}: frame {} rejected: {}", self.id, index, err);
                    if index % process_every != 0 {
                        self.state.stats.frames_skipped += 1;
                        None
                    } else {
                        Some(self.conservative_report(index))
                    }
                }
                Err(err) => {
                    log::error!("session {}: source failed: {}", self.id, err);
                    return Termination::SourceFailed(err.to_string());
                }
            };

            if let Some(report) = report {
                if let Err(err) = sink.emit(&report) {
                    log::warn!("session {}: sink disconnected: {}", self.id, err);
                    return Termination::SinkDisconnected(err.to_string());
                }
            }

            if last_health.elapsed() >= Duration::from_secs(10)
                || (self.state.stats.frames_read > 0
                    && self.state.stats.frames_read % HEALTH_LOG_EVERY == 0)
            {
                let stats = &self.state.stats;
                log::info!(
                    "session {}: health read={} processed={} alerts={} failures={:?}",
                    self.id,
                    stats.frames_read,
                    stats.frames_processed,
                    stats.alert_frames,
                    stats.analysis_failures
                );
                last_health = Instant::now();
            }

            if let Some(interval) = min_interval {
                pace(started + interval, stop);
            }
        }
    }

    fn conservative_report(&mut self, sequence: u64) -> FrameReport {
        let report = FrameReport::conservative(sequence, self.fusion.conservative());
        self.state.stats.frames_processed += 1;
        self.state.stats.record_flags(&report.flags);
        report
    }

    /// Analyze and fuse a single frame.
    ///
    /// Never fails: an invalid frame yields the conservative record and a
    /// failed sub-analysis falls back to its defaults.
    pub fn process_frame(&mut self, frame: &mut Frame) -> FrameReport {
        let sequence = frame.sequence;
        let view = match frame.rgb_view() {
            Ok(view) => view,
            Err(err) => {
                log::warn!("session {}: frame {} rejected: {}", self.id, sequence, err);
                self.state.stats.decode_failures += 1;
                return self.conservative_report(sequence);
            }
        };
        let (width, height) = (view.width(), view.height());
        let (faces, boxes) = self.detect(&view);

        let (assessment, face_count, single_face) = match faces {
            Ok(faces) => {
                let assessment = self.geometry.analyze(&faces, width, height);
                let count = faces.len();
                let single = if count == 1 {
                    faces.into_iter().next()
                } else {
                    None
                };
                (assessment, count, single)
            }
            Err(err) => (Err(err), 0, None),
        };
        if let Err(err) = &assessment {
            if let Some(stage) = err.stage() {
                self.state.stats.record_failure(stage);
            }
        }

        let (head_pose, pose) = match (&single_face, HeadPose::for_face_count(face_count)) {
            (Some(face), None) => self.estimate_pose(face, width, height),
            (_, Some(label)) => (label, None),
            (None, None) => (HeadPose::NoFace, None),
        };

        let (presence, boxes): (ProctorResult<ObjectPresence>, Vec<DetectionBox>) = match boxes {
            Ok(boxes) => (Ok(self.reducer.reduce(&boxes)), boxes),
            Err(err) => {
                self.state.stats.record_failure(AnalysisStage::Objects);
                (Err(err), Vec::new())
            }
        };

        let flags = self.fusion.fuse(&assessment, &presence);
        let annotated_image = if self.config.annotate {
            self.annotate(&view, single_face.as_ref(), &boxes)
        } else {
            None
        };

        self.state.stats.frames_processed += 1;
        self.state.stats.record_flags(&flags);
        FrameReport {
            sequence,
            flags,
            face_count,
            head_pose,
            pose,
            gaze_ratio: assessment.as_ref().ok().and_then(|a| a.gaze_ratio),
            annotated_image,
        }
    }

    fn detect(
        &self,
        view: &RgbView<'_>,
    ) -> (ProctorResult<Vec<LandmarkSet>>, ProctorResult<Vec<DetectionBox>>) {
        let landmarks = self.landmarks.as_ref();
        let objects = self.objects.as_ref();
        let detect_faces = || {
            call_provider(AnalysisStage::Landmarks, landmarks.name(), || {
                landmarks.detect(view)
            })
        };
        let detect_objects = || {
            call_provider(AnalysisStage::Objects, objects.name(), || objects.detect(view))
        };

        if !self.config.parallel_inference {
            return (detect_faces(), detect_objects());
        }
        thread::scope(|scope| {
            let faces = scope.spawn(detect_faces);
            let boxes = detect_objects();
            let faces = faces.join().unwrap_or_else(|_| {
                Err(ProctorError::analysis(
                    AnalysisStage::Landmarks,
                    "landmark provider panicked",
                ))
            });
            (faces, boxes)
        })
    }

    fn estimate_pose(
        &mut self,
        face: &LandmarkSet,
        width: u32,
        height: u32,
    ) -> (HeadPose, Option<PoseEstimate>) {
        match self
            .pose
            .estimate(face, width, height, &mut self.state.pose)
        {
            Ok(outcome) => {
                self.state.last_label = outcome.label;
                (outcome.label, outcome.smoothed)
            }
            Err(err) => {
                log::warn!("session {}: {}", self.id, err);
                self.state.stats.record_failure(AnalysisStage::Pose);
                (self.state.last_label, None)
            }
        }
    }

    #[cfg(feature = "annotate")]
    fn annotate(
        &self,
        view: &RgbView<'_>,
        face: Option<&LandmarkSet>,
        boxes: &[DetectionBox],
    ) -> Option<String> {
        match crate::annotate::annotated_data_uri(view, face, boxes) {
            Ok(uri) => Some(uri),
            Err(err) => {
                log::warn!("session {}: annotation failed: {:#}", self.id, err);
                None
            }
        }
    }

    #[cfg(not(feature = "annotate"))]
    fn annotate(
        &self,
        _view: &RgbView<'_>,
        _face: Option<&LandmarkSet>,
        _boxes: &[DetectionBox],
    ) -> Option<String> {
        None
    }
}

/// Minimum time per iteration for a `max_fps` cap, bounded by
/// `MAX_FRAME_INTERVAL`. `None` when there is no usable cap.
fn frame_interval(max_fps: Option<f32>) -> Option<Duration> {
    let fps = max_fps.filter(|fps| *fps > 0.0)?;
    Some(
        Duration::try_from_secs_f32(1.0 / fps)
            .map_or(MAX_FRAME_INTERVAL, |interval| interval.min(MAX_FRAME_INTERVAL)),
    )
}

/// Sleep until `deadline` or until `stop` fires.
fn pace(deadline: Instant, stop: &StopSignal) {
    while !stop.is_stopped() {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(PACING_SLICE));
    }
}

/// Run one provider call, turning both errors and panics into a failure of
/// `stage` for this frame.
fn call_provider<T>(
    stage: AnalysisStage,
    name: &str,
    call: impl FnOnce() -> anyhow::Result<T>,
) -> ProctorResult<T> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result.map_err(|e| ProctorError::from_provider(stage, e)),
        Err(_) => Err(ProctorError::analysis(
            stage,
            format!("provider '{}' panicked", name),
        )),
    }
}
