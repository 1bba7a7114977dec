//! # Tuner Engine
//!
//! Owns the capture session lifecycle and the detection loop. One worker
//! thread per open session drives the repeating analysis cycle: snapshot
//! the window, publish the signal level, ask the injected pitch detector
//! for a fundamental, map it to the nearest note, publish. The published
//! state is a single-writer snapshot guarded by a mutex and tagged with
//! the session generation, so a cycle that finishes after its session was
//! torn down is discarded instead of resurfacing on screen.
//!
//! Cycles are strictly sequential per session. The cadence ticker holds
//! at most one pending tick, so a detector that overruns the 16ms budget
//! delays the next cycle rather than queueing a backlog of frames.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, tick};
use tracing::{debug, info, warn};

use crate::audio::{self, AudioFrame, CaptureSession, DeviceDescriptor};
use crate::level;
use crate::pitch::{PitchDetector, YinDetector};
use crate::tuning::{self, NoteReading};
use crate::{Reading, TunerError};

/// Detection cycle cadence, aligned with a 60Hz display refresh.
pub const CYCLE_INTERVAL: Duration = Duration::from_millis(16);

/// Generation value under which no session may publish.
const GENERATION_NONE: u64 = 0;

/// Lifecycle of the capture session owned by a [`Tuner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session; the published reading is blank.
    Closed,
    /// A session is being opened; failure falls back to `Closed`.
    Opening,
    /// A session is live and the detection loop is running.
    Open,
}

struct Published {
    generation: u64,
    reading: Reading,
}

/// Single-writer published state. The generation of the live session is
/// kept under the same lock as the reading, so invalidate-then-join on
/// teardown makes a post-close publication impossible.
struct Shared {
    published: Mutex<Published>,
}

impl Shared {
    fn new() -> Self {
        Shared {
            published: Mutex::new(Published {
                generation: GENERATION_NONE,
                reading: Reading::default(),
            }),
        }
    }

    fn activate(&self, generation: u64) {
        self.lock().generation = generation;
    }

    /// Blocks further publications and blanks the reading; called on
    /// teardown before the worker is joined.
    fn invalidate(&self) {
        let mut published = self.lock();
        published.generation = GENERATION_NONE;
        published.reading = Reading::default();
    }

    fn reading(&self) -> Reading {
        self.lock().reading.clone()
    }

    fn publish_level(&self, generation: u64, level: f32) {
        let mut published = self.lock();
        if published.generation != generation {
            debug!(generation, "discarding level from a closed session");
            return;
        }
        published.reading.level = level;
    }

    fn publish_pitch(&self, generation: u64, frequency: Option<f32>, note: Option<NoteReading>) {
        let mut published = self.lock();
        if published.generation != generation {
            debug!(generation, "discarding pitch result from a closed session");
            return;
        }
        published.reading.frequency = frequency;
        published.reading.note = note;
    }

    fn lock(&self) -> MutexGuard<'_, Published> {
        self.published.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One detection cycle: level first (cheap, synchronous), then the pitch
/// service, then the note mapping. Detector panics and invalid estimates
/// degrade to "no pitch"; the loop never dies of one bad cycle.
fn run_cycle(
    frame: AudioFrame,
    detector: &mut dyn PitchDetector,
    shared: &Shared,
    generation: u64,
) {
    shared.publish_level(generation, level::rms(&frame.samples));

    let estimate = match catch_unwind(AssertUnwindSafe(|| {
        detector.detect(&frame.samples, frame.sample_rate)
    })) {
        Ok(estimate) => estimate,
        Err(_) => {
            warn!("pitch detector panicked; treating this cycle as unpitched");
            None
        }
    };

    // The note mapper's math is only defined over positive reals.
    let frequency = estimate.filter(|f| f.is_finite() && *f > 0.0);
    let note = frequency.map(tuning::nearest_note);
    shared.publish_pitch(generation, frequency, note);
}

struct OpenInfo {
    device: DeviceDescriptor,
    sample_rate: u32,
}

/// Body of the session worker thread. The CPAL stream must be created and
/// dropped on this thread, so the capture session lives here; the caller
/// learns the outcome of the open through `opened_tx`. Returns the
/// detector so the engine can lend it to the next session.
fn run_session(
    device_id: Option<String>,
    mut detector: Box<dyn PitchDetector>,
    shared: Arc<Shared>,
    generation: u64,
    opened_tx: Sender<Result<OpenInfo, TunerError>>,
    shutdown_rx: Receiver<()>,
) -> Box<dyn PitchDetector> {
    let session = match CaptureSession::open(device_id.as_deref()) {
        Ok(session) => session,
        Err(e) => {
            let _ = opened_tx.send(Err(TunerError::DeviceUnavailable(format!("{e:#}"))));
            return detector;
        }
    };
    let _ = opened_tx.send(Ok(OpenInfo {
        device: session.device().clone(),
        sample_rate: session.sample_rate(),
    }));

    debug!(generation, "detection loop started");
    let ticker = tick(CYCLE_INTERVAL);
    loop {
        crossbeam_channel::select! {
            recv(ticker) -> _ => {
                // A shutdown that raced the tick wins; no further cycle
                // starts once the signal is in.
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                run_cycle(session.snapshot(), detector.as_mut(), &shared, generation);
            },
            recv(shutdown_rx) -> _ => break,
        }
    }
    debug!(generation, "detection loop stopped");

    session.close();
    detector
}

/// The tuner engine: capture session manager plus detection loop.
///
/// Exactly one capture session is live at a time. Selecting a device
/// tears the previous session fully down (generation invalidated, worker
/// joined, stream released) before the new one opens; a failed open
/// leaves the tuner `Closed` and responsive to another selection.
pub struct Tuner {
    shared: Arc<Shared>,
    detector: Option<Box<dyn PitchDetector>>,
    session: Option<SessionHandle>,
    state: SessionState,
    next_generation: u64,
}

struct SessionHandle {
    device: DeviceDescriptor,
    sample_rate: u32,
    shutdown_tx: Sender<()>,
    worker: JoinHandle<Box<dyn PitchDetector>>,
}

impl Tuner {
    /// A tuner with the default YIN detector.
    pub fn new() -> Self {
        Tuner::with_detector(Box::new(YinDetector::default()))
    }

    /// A tuner with an injected pitch detection service.
    pub fn with_detector(detector: Box<dyn PitchDetector>) -> Self {
        Tuner {
            shared: Arc::new(Shared::new()),
            detector: Some(detector),
            session: None,
            state: SessionState::Closed,
            next_generation: GENERATION_NONE + 1,
        }
    }

    /// Opens a session on the default input device (first available).
    pub fn open_default(&mut self) -> Result<(), TunerError> {
        self.close();
        if audio::input_devices()?.is_empty() {
            return Err(TunerError::NoInputDevices);
        }
        self.open_session(None)
    }

    /// Switches the live session to the named device.
    ///
    /// The previous session is fully closed before the new device is
    /// opened, so at no point are two captures live.
    pub fn select_device(&mut self, device_id: &str) -> Result<(), TunerError> {
        self.close();
        self.open_session(Some(device_id.to_string()))
    }

    fn open_session(&mut self, device_id: Option<String>) -> Result<(), TunerError> {
        self.state = SessionState::Opening;
        let generation = self.next_generation;
        self.next_generation += 1;

        // The worker hands the detector back when it exits; see close().
        let detector = self
            .detector
            .take()
            .unwrap_or_else(|| Box::new(YinDetector::default()));

        self.shared.activate(generation);
        let shared = Arc::clone(&self.shared);
        let (opened_tx, opened_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let worker = thread::spawn(move || {
            run_session(device_id, detector, shared, generation, opened_tx, shutdown_rx)
        });

        match opened_rx.recv() {
            Ok(Ok(info)) => {
                info!(device = %info.device.id, sample_rate = info.sample_rate, "session open");
                self.session = Some(SessionHandle {
                    device: info.device,
                    sample_rate: info.sample_rate,
                    shutdown_tx,
                    worker,
                });
                self.state = SessionState::Open;
                Ok(())
            }
            Ok(Err(e)) => {
                self.recover_detector(worker);
                self.shared.invalidate();
                self.state = SessionState::Closed;
                Err(e)
            }
            Err(_) => {
                self.recover_detector(worker);
                self.shared.invalidate();
                self.state = SessionState::Closed;
                Err(TunerError::DeviceUnavailable(
                    "audio worker exited before the stream opened".to_string(),
                ))
            }
        }
    }

    /// Tears down the live session, if any. Idempotent.
    ///
    /// The session generation is invalidated before the worker is joined,
    /// so a pitch request still in flight may finish but can no longer
    /// publish. The published reading resets to blank.
    pub fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.shared.invalidate();
        let _ = session.shutdown_tx.send(());
        self.recover_detector(session.worker);
        self.state = SessionState::Closed;
        info!(device = %session.device.id, "session closed");
    }

    fn recover_detector(&mut self, worker: JoinHandle<Box<dyn PitchDetector>>) {
        match worker.join() {
            Ok(detector) => self.detector = Some(detector),
            Err(_) => {
                warn!("audio worker panicked; falling back to the default detector");
                self.detector = Some(Box::new(YinDetector::default()));
            }
        }
    }

    /// Clone of the currently published reading.
    pub fn reading(&self) -> Reading {
        self.shared.reading()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The device bound to the open session, if any.
    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.session.as_ref().map(|s| &s.device)
    }

    /// Effective sample rate of the open session's stream, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.sample_rate)
    }
}

impl Default for Tuner {
    fn default() -> Self {
        Tuner::new()
    }
}

impl Drop for Tuner {
    fn drop(&mut self) {
        self.close();
    }
}
