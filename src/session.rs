//! Frame orchestration: one gaze session over a stream of landmark frames.
//!
//! A [`GazeProcessor`] owns the two per-eye estimators for the lifetime of a
//! session and runs the per-frame pipeline
//! landmarks → alignment → model-space eye points → estimator update → gaze.
//! Frames are handled strictly in arrival order. Per-frame failures are
//! reported in the frame's [`GazeResult`] and never end the session.

use crate::{
    alignment::{AlignmentEstimator, AlignmentTransform},
    config::Config,
    eyeball::{EyeballEstimator, UpdateOutcome},
    face_model::FaceTemplate,
    gaze::{compute_gaze, GazeRay},
    landmarks::{Eye, LandmarkSet},
    Error, Result,
};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::{debug, info, trace, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often a blocked session thread looks at its cancel flag
const CHANNEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One frame of detector output
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Capture time in milliseconds
    pub timestamp_ms: u64,
    /// Detected landmarks, `None` when no face was found
    pub landmarks: Option<LandmarkSet>,
}

impl Frame {
    /// Frame with a detection
    #[must_use]
    pub fn detected(timestamp_ms: u64, landmarks: LandmarkSet) -> Self {
        Self {
            timestamp_ms,
            landmarks: Some(landmarks),
        }
    }

    /// Frame without a detection
    #[must_use]
    pub fn empty(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            landmarks: None,
        }
    }
}

/// Supplier of landmark frames (the external detector)
pub trait LandmarkSource {
    /// Next frame in arrival order
    ///
    /// `Ok(None)` ends the stream.
    ///
    /// # Errors
    ///
    /// Returns `DetectorUnavailable` when the detector fails; this ends the
    /// session
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

impl<S: LandmarkSource + ?Sized> LandmarkSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }
}

/// Adapter turning any iterator of frames into a [`LandmarkSource`]
#[derive(Debug, Clone)]
pub struct IterSource<I> {
    frames: I,
}

impl<I: Iterator<Item = Frame>> LandmarkSource for IterSource<I> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.next())
    }
}

/// Wrap pre-recorded or generated frames as a source
pub fn iter_source<I: IntoIterator<Item = Frame>>(frames: I) -> IterSource<I::IntoIter> {
    IterSource {
        frames: frames.into_iter(),
    }
}

/// Consumer of per-frame results
pub trait ResultSink {
    /// Deliver one result; results arrive in frame order
    ///
    /// # Errors
    ///
    /// Returns `ResultSinkClosed` if the consumer is gone
    fn deliver(&mut self, result: GazeResult) -> Result<()>;
}

impl ResultSink for Sender<GazeResult> {
    fn deliver(&mut self, result: GazeResult) -> Result<()> {
        self.send(result).map_err(|_| Error::ResultSinkClosed)
    }
}

/// Bounded channel sink that stops waiting for room once its session is cancelled
struct ChannelSink {
    sender: Sender<GazeResult>,
    cancel: CancelToken,
}

impl ResultSink for ChannelSink {
    fn deliver(&mut self, mut result: GazeResult) -> Result<()> {
        loop {
            match self.sender.send_timeout(result, CHANNEL_POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(pending)) => {
                    if self.cancel.is_cancelled() {
                        // The run loop sees the cancellation before the next frame
                        trace!("Dropping frame {} result on cancellation", pending.frame_index);
                        return Ok(());
                    }
                    result = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(Error::ResultSinkClosed),
            }
        }
    }
}

impl ResultSink for Vec<GazeResult> {
    fn deliver(&mut self, result: GazeResult) -> Result<()> {
        self.push(result);
        Ok(())
    }
}

/// Sink that hands each result to a closure
pub struct CallbackSink<F> {
    callback: F,
}

impl<F: FnMut(&GazeResult)> CallbackSink<F> {
    /// Wrap a callback
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F: FnMut(&GazeResult)> ResultSink for CallbackSink<F> {
    fn deliver(&mut self, result: GazeResult) -> Result<()> {
        (self.callback)(&result);
        Ok(())
    }
}

/// Why a detected frame produced no estimator update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Landmark set too short or non-finite at a stable index
    MalformedLandmarks,
    /// Alignment had too few or rank-deficient correspondences
    InsufficientCorrespondence,
    /// Alignment was ill-conditioned
    DegenerateAlignment,
    /// Alignment produced non-finite values
    NumericInstability,
}

impl SkipReason {
    fn from_alignment_error(error: &Error) -> Self {
        match error {
            Error::InsufficientCorrespondence(_) => Self::InsufficientCorrespondence,
            Error::DegenerateAlignment(_) => Self::DegenerateAlignment,
            Error::NumericInstability(_) => Self::NumericInstability,
            _ => Self::MalformedLandmarks,
        }
    }
}

/// What happened to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Aligned and fed to both estimators
    Tracked,
    /// The detector found no face
    NoDetection,
    /// Detected, but discarded before reaching the estimators
    Skipped(SkipReason),
}

/// Per-frame output
#[derive(Debug, Clone, PartialEq)]
pub struct GazeResult {
    /// Zero-based index of the frame within the session
    pub frame_index: u64,
    /// Timestamp of the frame
    pub timestamp_ms: u64,
    /// Processing status
    pub status: FrameStatus,
    /// Left eye gaze, `None` while not yet available
    pub left: Option<GazeRay>,
    /// Right eye gaze, `None` while not yet available
    pub right: Option<GazeRay>,
}

impl GazeResult {
    fn without_gaze(frame_index: u64, timestamp_ms: u64, status: FrameStatus) -> Self {
        Self {
            frame_index,
            timestamp_ms,
            status,
            left: None,
            right: None,
        }
    }

    /// Whether at least one eye has a gaze vector
    #[must_use]
    pub fn has_gaze(&self) -> bool {
        self.left.is_some() || self.right.is_some()
    }

    /// Gaze for one eye
    #[must_use]
    pub fn gaze(&self, eye: Eye) -> Option<&GazeRay> {
        match eye {
            Eye::Left => self.left.as_ref(),
            Eye::Right => self.right.as_ref(),
        }
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, never started
    Idle,
    /// Accepting frames
    Running,
    /// Stopped; estimators released
    Stopped,
}

/// Cooperative cancellation flag, checked between frames
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// New, uncancelled token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Counters for one [`GazeProcessor::run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Frames pulled from the source
    pub frames: u64,
    /// Frames aligned and fed to the estimators
    pub tracked: u64,
    /// Frames without a detection
    pub no_detection: u64,
    /// Detected frames discarded before the estimators
    pub skipped: u64,
    /// Results handed to the sink
    pub delivered: u64,
    /// Whether the run ended through the cancel token
    pub cancelled: bool,
    /// Left eye converged when the run ended
    pub left_converged: bool,
    /// Right eye converged when the run ended
    pub right_converged: bool,
}

#[derive(Debug, Clone)]
struct EyePair {
    left: EyeballEstimator,
    right: EyeballEstimator,
}

impl EyePair {
    fn get_mut(&mut self, eye: Eye) -> &mut EyeballEstimator {
        match eye {
            Eye::Left => &mut self.left,
            Eye::Right => &mut self.right,
        }
    }
}

/// Per-session gaze pipeline
#[derive(Debug)]
pub struct GazeProcessor {
    config: Config,
    template: Arc<FaceTemplate>,
    aligner: AlignmentEstimator,
    state: SessionState,
    eyes: Option<EyePair>,
    frame_index: u64,
}

impl GazeProcessor {
    /// Create an idle processor
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or its stable landmark
    /// subset does not match the template
    pub fn new(config: Config, template: Arc<FaceTemplate>) -> Result<Self> {
        config.validate()?;
        if config.landmarks.stable.len() != template.stable_points().len() {
            return Err(Error::ConfigError(format!(
                "Layout has {} stable landmarks but the face template has {}",
                config.landmarks.stable.len(),
                template.stable_points().len()
            )));
        }

        Ok(Self {
            aligner: AlignmentEstimator::new(config.alignment.clone()),
            config,
            template,
            state: SessionState::Idle,
            eyes: None,
            frame_index: 0,
        })
    }

    /// Start (or restart) the session with fresh estimators
    pub fn start(&mut self) {
        if self.state == SessionState::Running {
            info!("Restarting gaze session");
        } else {
            info!("Starting gaze session");
        }
        let eyeball_config = &self.config.eyeball;
        self.eyes = Some(EyePair {
            left: EyeballEstimator::new(*self.template.eye_prior(Eye::Left), eyeball_config.clone()),
            right: EyeballEstimator::new(*self.template.eye_prior(Eye::Right), eyeball_config.clone()),
        });
        self.frame_index = 0;
        self.state = SessionState::Running;
    }

    /// Stop the session and release both estimators
    pub fn stop(&mut self) {
        if self.state == SessionState::Running {
            info!("Stopping gaze session after {} frames", self.frame_index);
        }
        self.eyes = None;
        self.state = SessionState::Stopped;
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether frames are accepted
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// The configuration this processor was built with
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Estimator for one eye while running
    #[must_use]
    pub fn estimator(&self, eye: Eye) -> Option<&EyeballEstimator> {
        self.eyes.as_ref().map(|eyes| match eye {
            Eye::Left => &eyes.left,
            Eye::Right => &eyes.right,
        })
    }

    /// Left eye estimator while running
    #[must_use]
    pub fn left_estimator(&self) -> Option<&EyeballEstimator> {
        self.estimator(Eye::Left)
    }

    /// Right eye estimator while running
    #[must_use]
    pub fn right_estimator(&self) -> Option<&EyeballEstimator> {
        self.estimator(Eye::Right)
    }

    /// Run one frame through the pipeline
    ///
    /// # Errors
    ///
    /// Returns `SessionNotRunning` before [`GazeProcessor::start`] or after
    /// [`GazeProcessor::stop`]. Every other failure is reported in the result.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<GazeResult> {
        if self.state != SessionState::Running {
            return Err(Error::SessionNotRunning);
        }
        let Some(mut eyes) = self.eyes.take() else {
            return Err(Error::SessionNotRunning);
        };
        let result = self.process_running(&mut eyes, frame);
        self.eyes = Some(eyes);
        Ok(result)
    }

    fn process_running(&mut self, eyes: &mut EyePair, frame: &Frame) -> GazeResult {
        let frame_index = self.frame_index;
        self.frame_index += 1;
        let timestamp_ms = frame.timestamp_ms;

        let Some(landmarks) = &frame.landmarks else {
            trace!("Frame {}: no detection", frame_index);
            return GazeResult::without_gaze(frame_index, timestamp_ms, FrameStatus::NoDetection);
        };

        if let Err(e) = self.config.landmarks.check(landmarks) {
            debug!("Frame {}: malformed landmarks: {}", frame_index, e);
            return GazeResult::without_gaze(
                frame_index,
                timestamp_ms,
                FrameStatus::Skipped(SkipReason::MalformedLandmarks),
            );
        }

        let transform = match self.aligner.align(&self.template, landmarks, &self.config.landmarks) {
            Ok(transform) => transform,
            Err(e) => {
                debug!("Frame {}: alignment failed: {}", frame_index, e);
                return GazeResult::without_gaze(
                    frame_index,
                    timestamp_ms,
                    FrameStatus::Skipped(SkipReason::from_alignment_error(&e)),
                );
            }
        };

        let mut result = GazeResult::without_gaze(frame_index, timestamp_ms, FrameStatus::Tracked);
        for eye in [Eye::Left, Eye::Right] {
            let estimator = eyes.get_mut(eye);
            let gaze = match self.track_eye(eye, estimator, landmarks, &transform, timestamp_ms) {
                Ok(gaze) => gaze,
                Err(e) => {
                    debug!("Frame {}: {} eye: {}", frame_index, eye, e);
                    None
                }
            };
            match eye {
                Eye::Left => result.left = gaze,
                Eye::Right => result.right = gaze,
            }
        }

        result
    }

    fn track_eye(
        &self,
        eye: Eye,
        estimator: &mut EyeballEstimator,
        landmarks: &LandmarkSet,
        transform: &AlignmentTransform,
        timestamp_ms: u64,
    ) -> Result<Option<GazeRay>> {
        let indices = self.config.landmarks.eye(eye);
        let model_points: Vec<_> = landmarks
            .select(&indices.region)?
            .iter()
            .map(|p| transform.to_model_point(p))
            .collect();

        match estimator.update(&model_points, timestamp_ms)? {
            UpdateOutcome::Refined(estimate) => debug!(
                "{} eye refined: radius {:.4}, confidence {:.5}",
                eye, estimate.radius, estimate.confidence
            ),
            UpdateOutcome::Rejected(reason) => debug!("{} eye frame rejected: {:?}", eye, reason),
            outcome => trace!("{} eye update: {:?}", eye, outcome),
        }

        if !estimator.is_converged() {
            return Ok(None);
        }
        let estimate = estimator.estimate()?;
        let iris = landmarks.point(indices.pupil)?;
        compute_gaze(&estimate, &iris, transform).map(Some)
    }

    /// Pull frames from `source` until it ends, delivering results to `sink`
    ///
    /// Starts the session if it is not running. Cancellation is checked
    /// between frames and stops the session; so does any fatal error. When the
    /// source is exhausted the session stays running.
    ///
    /// # Errors
    ///
    /// Returns the source's error (`DetectorUnavailable`) or the sink's
    /// (`ResultSinkClosed`)
    pub fn run<S, K>(&mut self, source: &mut S, sink: &mut K, cancel: &CancelToken) -> Result<RunSummary>
    where
        S: LandmarkSource + ?Sized,
        K: ResultSink + ?Sized,
    {
        if !self.is_running() {
            self.start();
        }

        let mut summary = RunSummary::default();
        loop {
            if cancel.is_cancelled() {
                info!("Gaze session cancelled");
                summary.cancelled = true;
                break;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("Landmark source exhausted after {} frames", summary.frames);
                    self.fill_convergence(&mut summary);
                    return Ok(summary);
                }
                Err(e) => {
                    warn!("Landmark source failed: {}", e);
                    self.stop();
                    return Err(e);
                }
            };

            let result = self.process_frame(&frame)?;
            summary.frames += 1;
            match result.status {
                FrameStatus::Tracked => summary.tracked += 1,
                FrameStatus::NoDetection => summary.no_detection += 1,
                FrameStatus::Skipped(_) => summary.skipped += 1,
            }

            if self.config.session.emit_empty_results || result.has_gaze() {
                if let Err(e) = sink.deliver(result) {
                    warn!("Result sink failed: {}", e);
                    self.stop();
                    return Err(e);
                }
                summary.delivered += 1;
            }
        }

        self.fill_convergence(&mut summary);
        self.stop();
        Ok(summary)
    }

    fn fill_convergence(&self, summary: &mut RunSummary) {
        summary.left_converged = self.left_estimator().is_some_and(EyeballEstimator::is_converged);
        summary.right_converged = self.right_estimator().is_some_and(EyeballEstimator::is_converged);
    }
}

/// A session running on its own thread
#[derive(Debug)]
pub struct SessionHandle {
    results: Receiver<GazeResult>,
    cancel: CancelToken,
    worker: JoinHandle<Result<RunSummary>>,
}

impl SessionHandle {
    /// Ordered per-frame results
    ///
    /// The channel is bounded by `session.result_capacity`; the session thread
    /// waits while it is full.
    #[must_use]
    pub fn results(&self) -> &Receiver<GazeResult> {
        &self.results
    }

    /// Token that cancels this session
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Ask the session to stop after the current frame
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the session to finish
    ///
    /// Results not yet received are discarded so a full channel cannot keep
    /// the session thread waiting.
    ///
    /// # Errors
    ///
    /// Returns the session's fatal error, or `SessionFailed` if the worker
    /// panicked
    pub fn join(self) -> Result<RunSummary> {
        let Self { results, worker, .. } = self;
        while !worker.is_finished() {
            match results.recv_timeout(CHANNEL_POLL_INTERVAL) {
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        worker
            .join()
            .map_err(|_| Error::SessionFailed("Session thread panicked".to_string()))?
    }
}

/// Run a session over `source` on a dedicated thread
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the thread cannot be
/// spawned
pub fn spawn_session<S>(config: Config, template: Arc<FaceTemplate>, mut source: S) -> Result<SessionHandle>
where
    S: LandmarkSource + Send + 'static,
{
    let (sender, results) = bounded(config.session.result_capacity);
    let mut processor = GazeProcessor::new(config, template)?;
    let cancel = CancelToken::new();
    let token = cancel.clone();
    let mut sink = ChannelSink {
        sender,
        cancel: cancel.clone(),
    };

    let worker = thread::Builder::new()
        .name("gaze-session".to_string())
        .spawn(move || {
            processor.start();
            processor.run(&mut source, &mut sink, &token)
        })?;

    Ok(SessionHandle {
        results,
        cancel,
        worker,
    })
}
