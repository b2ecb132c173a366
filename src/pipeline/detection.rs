//! Detection loop: capture → keypoint source (worker thread) → mapper → smoother.

use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::DetectionConfig;
use crate::error::{DetectionError, PipelineError};
use crate::pose::{CaptureSource, DetectionFrame, Keypoint, KeypointSource};
use crate::rig::{CoordinateMapper, JointSmoother, SharedJoints};

/// 応答待ち中のポーリング間隔（停止フラグの確認用）
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// At most one request per `interval_ms`.
    #[default]
    Interval,
    /// Re-request as soon as the previous response is in.
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Requesting,
    Applying,
}

#[derive(Debug)]
pub enum TickOutcome {
    /// A request is still outstanding.
    InFlight,
    /// Interval not elapsed yet.
    NotDue,
    /// Capture has no frame yet.
    NoFrame,
    /// A new request went to the worker.
    Requested,
    /// Response applied; `updated` joints fed to the smoother.
    Applied { updated: usize },
    /// Valid empty response.
    NoSubject,
    /// Detector failure, state left unchanged.
    Failed(DetectionError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionStats {
    pub requests: u64,
    pub applied: u64,
    pub empty: u64,
    pub failures: u64,
}

struct DetectionRequest<F> {
    frame: F,
    width: u32,
    height: u32,
    issued_at: Instant,
}

struct DetectionResponse {
    result: Result<Vec<Keypoint>, DetectionError>,
    width: u32,
    height: u32,
    issued_at: Instant,
}

/// Feeds one detection frame through the mapper into the smoother.
///
/// Every joint index `0..joint_count` is looked up; missing, out-of-range or
/// low-confidence joints are absent and keep their smoothed value.
/// Returns the number of joints updated.
pub fn apply_detection(
    mapper: &CoordinateMapper,
    smoother: &mut JointSmoother,
    frame: &DetectionFrame,
) -> usize {
    if frame.is_empty() {
        return 0;
    }
    let mut updated = 0;
    for index in 0..smoother.joint_count() {
        let Some(keypoint) = frame.get(index) else {
            continue;
        };
        if let Some(position) = mapper.map(keypoint, frame.width, frame.height) {
            if smoother.update(index, position) {
                updated += 1;
            }
        }
    }
    smoother.commit_frame();
    updated
}

/// `IDLE → REQUESTING → (APPLYING | IDLE)`
///
/// The keypoint source lives on its own worker thread; `tick` never blocks
/// on it and never issues a second request while one is outstanding.
pub struct DetectionLoop<C: CaptureSource> {
    capture: C,
    mapper: CoordinateMapper,
    joints: SharedJoints,
    mode: DetectionMode,
    interval: Duration,
    state: LoopState,
    next_due: Option<Instant>,
    request_tx: Option<mpsc::SyncSender<DetectionRequest<C::Frame>>>,
    response_rx: mpsc::Receiver<DetectionResponse>,
    worker: Option<thread::JoinHandle<()>>,
    stats: DetectionStats,
}

impl<C: CaptureSource> DetectionLoop<C> {
    pub fn new<S>(
        capture: C,
        source: S,
        mapper: CoordinateMapper,
        joints: SharedJoints,
        config: &DetectionConfig,
    ) -> Result<Self, PipelineError>
    where
        S: KeypointSource<C::Frame> + 'static,
    {
        let (request_tx, request_rx) = mpsc::sync_channel::<DetectionRequest<C::Frame>>(1);
        let (response_tx, response_rx) = mpsc::channel::<DetectionResponse>();

        let worker = thread::Builder::new()
            .name("keypoint-source".to_string())
            .spawn(move || {
                let mut source = source;
                while let Ok(req) = request_rx.recv() {
                    let result = source.estimate(&req.frame);
                    let response = DetectionResponse {
                        result,
                        width: req.width,
                        height: req.height,
                        issued_at: req.issued_at,
                    };
                    if response_tx.send(response).is_err() {
                        break;
                    }
                }
                tracing::debug!("keypoint worker exiting");
            })?;

        Ok(Self {
            capture,
            mapper,
            joints,
            mode: config.mode,
            interval: Duration::from_millis(config.interval_ms),
            state: LoopState::Idle,
            next_due: None,
            request_tx: Some(request_tx),
            response_rx,
            worker: Some(worker),
            stats: DetectionStats::default(),
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> DetectionStats {
        self.stats
    }

    pub fn joints(&self) -> &SharedJoints {
        &self.joints
    }

    /// One scheduling step. Only a capture failure (or a dead worker) is an error.
    pub fn tick(&mut self, now: Instant) -> Result<TickOutcome, PipelineError> {
        if self.state == LoopState::Requesting {
            return match self.response_rx.try_recv() {
                Ok(response) => Ok(self.complete(response)),
                Err(TryRecvError::Empty) => Ok(TickOutcome::InFlight),
                Err(TryRecvError::Disconnected) => Err(PipelineError::WorkerStopped),
            };
        }

        if let Some(due) = self.next_due {
            if now < due {
                return Ok(TickOutcome::NotDue);
            }
        }
        self.request(now)
    }

    /// Blocks up to `timeout` for the outstanding response and applies it.
    /// `None` if nothing was outstanding or the timeout elapsed.
    pub fn wait_response(&mut self, timeout: Duration) -> Result<Option<TickOutcome>, PipelineError> {
        if self.state != LoopState::Requesting {
            return Ok(None);
        }
        match self.response_rx.recv_timeout(timeout) {
            Ok(response) => Ok(Some(self.complete(response))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(PipelineError::WorkerStopped),
        }
    }

    fn request(&mut self, now: Instant) -> Result<TickOutcome, PipelineError> {
        let Some(frame) = self.capture.latest_frame()? else {
            return Ok(TickOutcome::NoFrame);
        };
        let (width, height) = self.capture.dimensions();
        let Some(tx) = self.request_tx.as_ref() else {
            return Err(PipelineError::WorkerStopped);
        };

        let request = DetectionRequest {
            frame,
            width,
            height,
            issued_at: now,
        };
        match tx.try_send(request) {
            Ok(()) => {}
            // Requesting 中は送らないので Full にはならない
            Err(TrySendError::Full(_)) => return Ok(TickOutcome::InFlight),
            Err(TrySendError::Disconnected(_)) => return Err(PipelineError::WorkerStopped),
        }

        self.state = LoopState::Requesting;
        self.stats.requests += 1;
        self.next_due = match self.mode {
            DetectionMode::Interval => Some(now + self.interval),
            DetectionMode::Continuous => None,
        };
        Ok(TickOutcome::Requested)
    }

    fn complete(&mut self, response: DetectionResponse) -> TickOutcome {
        self.state = LoopState::Applying;
        let latency = response.issued_at.elapsed();

        let outcome = match response.result {
            Err(e) => {
                self.stats.failures += 1;
                tracing::warn!("detection failed after {:?}: {}", latency, e);
                TickOutcome::Failed(e)
            }
            Ok(keypoints) if keypoints.is_empty() => {
                self.stats.empty += 1;
                tracing::trace!("no subject ({:?})", latency);
                TickOutcome::NoSubject
            }
            Ok(keypoints) => {
                let frame = DetectionFrame::new(response.width, response.height, keypoints);
                let mapper = self.mapper;
                let updated = self.joints.write(|s| apply_detection(&mapper, s, &frame));
                self.stats.applied += 1;
                tracing::trace!("applied {} joints ({:?})", updated, latency);
                TickOutcome::Applied { updated }
            }
        };

        self.state = LoopState::Idle;
        outcome
    }

    /// Runs until `stop` is raised or a fatal error occurs.
    ///
    /// A fatal error raises `stop` too so the render loop winds down.
    pub fn run(mut self, stop: Arc<AtomicBool>) -> Result<DetectionStats, PipelineError> {
        let result = self.run_inner(&stop);
        if let Err(e) = &result {
            tracing::error!("detection loop stopped: {}", e);
            stop.store(true, Ordering::Release);
        }
        let stats = self.stats;
        self.shutdown();
        result.map(|()| stats)
    }

    fn run_inner(&mut self, stop: &AtomicBool) -> Result<(), PipelineError> {
        while !stop.load(Ordering::Acquire) {
            let now = Instant::now();
            match self.tick(now)? {
                TickOutcome::Requested | TickOutcome::InFlight => {
                    self.wait_response(POLL_INTERVAL)?;
                }
                TickOutcome::NotDue => {
                    let wait = self
                        .next_due
                        .map(|due| due.saturating_duration_since(now))
                        .unwrap_or(Duration::ZERO);
                    thread::sleep(wait.min(POLL_INTERVAL));
                }
                TickOutcome::NoFrame => thread::sleep(POLL_INTERVAL),
                TickOutcome::Applied { .. } | TickOutcome::NoSubject | TickOutcome::Failed(_) => {}
            }
        }
        Ok(())
    }

    /// Spawns the loop on its own thread.
    pub fn spawn(
        self,
        stop: Arc<AtomicBool>,
    ) -> std::io::Result<thread::JoinHandle<Result<DetectionStats, PipelineError>>>
    where
        C: Send + 'static,
    {
        thread::Builder::new()
            .name("detection-loop".to_string())
            .spawn(move || self.run(stop))
    }

    /// Releases the capture handle and lets the worker exit.
    ///
    /// An outstanding request is allowed to finish; its result is discarded.
    pub fn shutdown(mut self) {
        self.request_tx = None;
        let DetectionLoop {
            capture, worker, ..
        } = self;
        drop(capture);
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use nalgebra::Vector3;
    use std::collections::VecDeque;

    struct FixedCapture {
        width: u32,
        height: u32,
        lost: bool,
    }

    impl FixedCapture {
        fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                lost: false,
            }
        }
    }

    impl CaptureSource for FixedCapture {
        type Frame = ();

        fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn latest_frame(&mut self) -> Result<Option<()>, CaptureError> {
            if self.lost {
                return Err(CaptureError::device_lost("unplugged"));
            }
            Ok(Some(()))
        }
    }

    struct Scripted(VecDeque<Result<Vec<Keypoint>, DetectionError>>);

    impl KeypointSource<()> for Scripted {
        fn estimate(&mut self, _: &()) -> Result<Vec<Keypoint>, DetectionError> {
            self.0.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// 解放されるまで推論が終わらないソース
    struct Gated(mpsc::Receiver<()>);

    impl KeypointSource<()> for Gated {
        fn estimate(&mut self, _: &()) -> Result<Vec<Keypoint>, DetectionError> {
            self.0
                .recv()
                .map(|()| vec![Keypoint::new(0, 0.0, 0.0, 0.9)])
                .map_err(|_| DetectionError::unavailable("gate closed"))
        }
    }

    fn joints() -> SharedJoints {
        SharedJoints::new(JointSmoother::new(17, 0.3))
    }

    fn config(mode: DetectionMode, interval_ms: u64) -> DetectionConfig {
        DetectionConfig { interval_ms, mode }
    }

    fn approx_eq_3(a: &Vector3<f32>, b: &Vector3<f32>) -> bool {
        (a - b).abs().max() < 1e-5
    }

    #[test]
    fn test_apply_detection_scenario() {
        let mapper = CoordinateMapper::new(0.5, 4.0, false, 0.0);
        let mut smoother = JointSmoother::new(17, 0.3);
        let frame = DetectionFrame::new(200, 100, vec![Keypoint::new(5, 100.0, 25.0, 0.9)]);

        assert_eq!(apply_detection(&mapper, &mut smoother, &frame), 1);
        assert!(approx_eq_3(&smoother.position(5).unwrap(), &Vector3::new(0.0, 0.3, 0.0)));
        assert_eq!(smoother.position(0), Some(Vector3::zeros()));
        assert_eq!(smoother.generation(), 1);
    }

    #[test]
    fn test_apply_detection_skips_low_confidence() {
        let mapper = CoordinateMapper::default();
        let mut smoother = JointSmoother::new(17, 0.3);
        smoother.update(3, Vector3::new(1.0, 1.0, 0.0));
        let before = smoother.position(3);

        let frame = DetectionFrame::new(640, 480, vec![Keypoint::new(3, 10.0, 10.0, 0.5)]);
        assert_eq!(apply_detection(&mapper, &mut smoother, &frame), 0);
        assert_eq!(smoother.position(3), before);
    }

    #[test]
    fn test_apply_detection_ignores_unknown_indices() {
        let mapper = CoordinateMapper::default();
        let mut smoother = JointSmoother::new(3, 0.3);
        let frame = DetectionFrame::new(
            640,
            480,
            vec![Keypoint::new(1, 320.0, 0.0, 0.9), Keypoint::new(40, 320.0, 240.0, 0.9)],
        );
        assert_eq!(apply_detection(&mapper, &mut smoother, &frame), 1);
    }

    #[test]
    fn test_apply_empty_frame_is_noop() {
        let mapper = CoordinateMapper::default();
        let mut smoother = JointSmoother::new(17, 0.3);
        smoother.update(0, Vector3::new(0.5, 0.5, 0.0));
        let before = smoother.positions().to_vec();
        for _ in 0..10 {
            apply_detection(&mapper, &mut smoother, &DetectionFrame::new(640, 480, Vec::new()));
        }
        assert_eq!(smoother.positions(), before.as_slice());
        assert_eq!(smoother.generation(), 0);
    }

    #[test]
    fn test_tick_request_then_apply() {
        let source = Scripted(VecDeque::from([Ok(vec![Keypoint::new(5, 100.0, 25.0, 0.9)])]));
        let shared = joints();
        let mut dl = DetectionLoop::new(
            FixedCapture::new(200, 100),
            source,
            CoordinateMapper::new(0.5, 4.0, false, 0.0),
            shared.clone(),
            &config(DetectionMode::Interval, 33),
        )
        .unwrap();

        assert_eq!(dl.state(), LoopState::Idle);
        assert!(matches!(dl.tick(Instant::now()).unwrap(), TickOutcome::Requested));
        assert_eq!(dl.state(), LoopState::Requesting);

        let outcome = dl.wait_response(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome, Some(TickOutcome::Applied { updated: 1 })));
        assert_eq!(dl.state(), LoopState::Idle);
        assert!(approx_eq_3(&shared.snapshot().position(5), &Vector3::new(0.0, 0.3, 0.0)));
        dl.shutdown();
    }

    #[test]
    fn test_no_overlapping_requests() {
        let (release, gate) = mpsc::channel();
        let mut dl = DetectionLoop::new(
            FixedCapture::new(640, 480),
            Gated(gate),
            CoordinateMapper::default(),
            joints(),
            &config(DetectionMode::Continuous, 33),
        )
        .unwrap();

        assert!(matches!(dl.tick(Instant::now()).unwrap(), TickOutcome::Requested));
        for _ in 0..5 {
            assert!(matches!(dl.tick(Instant::now()).unwrap(), TickOutcome::InFlight));
        }
        assert_eq!(dl.stats().requests, 1);

        release.send(()).unwrap();
        let outcome = dl.wait_response(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome, Some(TickOutcome::Applied { .. })));

        // continuous: すぐ次のリクエストを出す
        assert!(matches!(dl.tick(Instant::now()).unwrap(), TickOutcome::Requested));
        release.send(()).unwrap();
        dl.wait_response(Duration::from_secs(5)).unwrap();
        dl.shutdown();
    }

    #[test]
    fn test_interval_mode_waits_for_next_slot() {
        let source = Scripted(VecDeque::new());
        let mut dl = DetectionLoop::new(
            FixedCapture::new(640, 480),
            source,
            CoordinateMapper::default(),
            joints(),
            &config(DetectionMode::Interval, 1000),
        )
        .unwrap();

        let t0 = Instant::now();
        assert!(matches!(dl.tick(t0).unwrap(), TickOutcome::Requested));
        assert!(matches!(
            dl.wait_response(Duration::from_secs(5)).unwrap(),
            Some(TickOutcome::NoSubject)
        ));
        assert!(matches!(dl.tick(t0 + Duration::from_millis(10)).unwrap(), TickOutcome::NotDue));
        assert!(matches!(
            dl.tick(t0 + Duration::from_millis(1000)).unwrap(),
            TickOutcome::Requested
        ));
        dl.shutdown();
    }

    #[test]
    fn test_failure_is_recoverable() {
        let source = Scripted(VecDeque::from([
            Err(DetectionError::inference("boom")),
            Ok(vec![Keypoint::new(0, 320.0, 240.0, 0.9)]),
        ]));
        let shared = joints();
        let mut dl = DetectionLoop::new(
            FixedCapture::new(640, 480),
            source,
            CoordinateMapper::default(),
            shared.clone(),
            &config(DetectionMode::Continuous, 33),
        )
        .unwrap();

        dl.tick(Instant::now()).unwrap();
        let first = dl.wait_response(Duration::from_secs(5)).unwrap();
        assert!(matches!(first, Some(TickOutcome::Failed(DetectionError::Inference(_)))));
        assert_eq!(shared.generation(), 0);

        assert!(matches!(dl.tick(Instant::now()).unwrap(), TickOutcome::Requested));
        let second = dl.wait_response(Duration::from_secs(5)).unwrap();
        assert!(matches!(second, Some(TickOutcome::Applied { updated: 1 })));
        assert_eq!(dl.stats().failures, 1);
        assert_eq!(dl.stats().applied, 1);
        dl.shutdown();
    }

    #[test]
    fn test_capture_loss_is_fatal_and_raises_stop() {
        let mut capture = FixedCapture::new(640, 480);
        capture.lost = true;
        let dl = DetectionLoop::new(
            capture,
            Scripted(VecDeque::new()),
            CoordinateMapper::default(),
            joints(),
            &config(DetectionMode::Interval, 33),
        )
        .unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let result = dl.run(stop.clone());
        assert!(matches!(result, Err(PipelineError::Capture(CaptureError::DeviceLost(_)))));
        assert!(stop.load(Ordering::Acquire));
    }

    #[test]
    fn test_run_stops_on_flag() {
        let dl = DetectionLoop::new(
            FixedCapture::new(640, 480),
            Scripted(VecDeque::new()),
            CoordinateMapper::default(),
            joints(),
            &config(DetectionMode::Interval, 10),
        )
        .unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let handle = dl.spawn(stop.clone()).unwrap();
        thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::Release);
        let stats = handle.join().unwrap().unwrap();
        assert!(stats.requests >= 1);
        assert_eq!(stats.failures, 0);
    }
}
