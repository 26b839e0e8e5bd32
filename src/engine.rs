// src/engine.rs - capture/playback controller and the per-tick frame synchronizer
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::disk;
use crate::scoring::{AnalysisSession, SessionReport, TickOutcome};
use crate::sensor::{SensorError, Skeleton, SkeletonSource};
use crate::skeleton::{
    bone_lines, compute_angles, BoneSegment, ExerciseType, FrameBuffer, JointFrame, JOINT_COUNT,
};

#[derive(Debug, Error)]
pub enum EngineError {
    /// Fatal: the caller must release resources and end the render loop.
    #[error("sensor update failed: {0}")]
    Sensor(#[from] SensorError),
}

/// The single active operation. At most one non-Idle mode at a time;
/// only the render/UI thread ever writes this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    Recording { deadline: i64, exercise: ExerciseType },
    ReplayDisk,
    ReplaySession,
    Analysis,
}

/// Everything the shell needs to render one tick: the live skeleton
/// geometry, the reference overlay geometry, and whether the user is
/// fully in frame.
#[derive(Debug, Default)]
pub struct Tick {
    pub user_present: bool,
    pub user_lines: Vec<BoneSegment>,
    pub overlay_lines: Vec<BoneSegment>,
}

/// Completion slot a detached worker fills and the shell polls. Owned by
/// the engine so no caller storage outlives an in-flight operation.
struct Slot<T>(Arc<Mutex<Option<T>>>);

impl<T> Slot<T> {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    fn handle(&self) -> Self {
        Self(Arc::clone(&self.0))
    }

    fn put(&self, value: T) {
        *self.0.lock().unwrap() = Some(value);
    }

    fn take(&self) -> Option<T> {
        self.0.lock().unwrap().take()
    }
}

pub struct Engine<S> {
    source: S,
    config: EngineConfig,
    mode: Mode,
    /// Frames captured by the current/most recent recording.
    write_buffer: Arc<Mutex<FrameBuffer>>,
    /// Reference sequence loaded from disk, replaced wholesale on load.
    read_buffer: Arc<Mutex<FrameBuffer>>,
    loaded: Arc<AtomicBool>,
    replay_pointer: usize,
    session_pointer: usize,
    analysis_pointer: usize,
    analysis: Option<AnalysisSession>,
    saved_recording: Slot<PathBuf>,
    report: Option<SessionReport>,
    disk_replay_done: bool,
    session_replay_done: bool,
}

impl<S: SkeletonSource> Engine<S> {
    pub fn new(source: S, config: EngineConfig) -> Self {
        Self {
            source,
            config,
            mode: Mode::Idle,
            write_buffer: Arc::new(Mutex::new(FrameBuffer::default())),
            read_buffer: Arc::new(Mutex::new(FrameBuffer::default())),
            loaded: Arc::new(AtomicBool::new(false)),
            replay_pointer: 0,
            session_pointer: 0,
            analysis_pointer: 0,
            analysis: None,
            saved_recording: Slot::new(),
            report: None,
            disk_replay_done: false,
            session_replay_done: false,
        }
    }

    /// Starts capturing frames for `duration_secs`. `None` derives the
    /// exercise type from the loaded reference's first frame. Only frames
    /// complete for the exercise type are recorded, so the captured
    /// duration can fall short of wall-clock duration.
    pub fn start_recording(&mut self, duration_secs: i64, exercise: Option<ExerciseType>) {
        if self.mode != Mode::Idle {
            debug!("start_recording ignored: another mode is active");
            return;
        }
        let exercise = exercise.unwrap_or_else(|| {
            self.read_buffer
                .lock()
                .unwrap()
                .first()
                .map(|f| f.required_joints)
                .unwrap_or_default()
        });
        self.write_buffer.lock().unwrap().clear();
        self.saved_recording.take();
        self.mode = Mode::Recording {
            deadline: Utc::now().timestamp() + duration_secs,
            exercise,
        };
        info!(duration_secs, ?exercise, "recording started");
    }

    /// Loads a joint data file into the reference buffer on a background
    /// thread. Completion is observable through `is_loaded`.
    pub fn load_file(&mut self, path: &Path) {
        let path = path.to_path_buf();
        let buffer = Arc::clone(&self.read_buffer);
        let loaded = Arc::clone(&self.loaded);
        loaded.store(false, Ordering::SeqCst);
        thread::spawn(move || match disk::read_frames(&path) {
            Ok(frames) => {
                buffer.lock().unwrap().replace(frames);
                loaded.store(true, Ordering::SeqCst);
            }
            Err(err) => {
                buffer.lock().unwrap().clear();
                warn!(path = %path.display(), %err, "failed to load joint data");
            }
        });
    }

    /// Empties the recording buffer and drops the loaded flag.
    pub fn clear_recording(&mut self) {
        self.write_buffer.lock().unwrap().clear();
        self.loaded.store(false, Ordering::SeqCst);
    }

    /// Replays the loaded reference sequence. No-op unless a load has
    /// completed and the engine is idle.
    pub fn replay_loaded(&mut self) {
        if self.mode != Mode::Idle || !self.is_loaded() {
            debug!("replay_loaded ignored: not loaded or engine busy");
            return;
        }
        self.replay_pointer = 0;
        self.disk_replay_done = false;
        self.mode = Mode::ReplayDisk;
        info!("replaying loaded data");
    }

    /// Replays this session's own recording. No-op unless frames were
    /// recorded and the engine is idle.
    pub fn replay_recording(&mut self) {
        if self.mode != Mode::Idle || self.write_buffer.lock().unwrap().is_empty() {
            debug!("replay_recording ignored: nothing recorded or engine busy");
            return;
        }
        self.session_pointer = 0;
        self.session_replay_done = false;
        self.mode = Mode::ReplaySession;
        info!("replaying session recording");
    }

    /// Scores the live stream against the loaded reference. The exercise
    /// type comes from the reference's first frame. No-op unless a load
    /// has completed and the engine is idle.
    pub fn analyze_loaded(&mut self) {
        if self.mode != Mode::Idle || !self.is_loaded() {
            debug!("analyze_loaded ignored: not loaded or engine busy");
            return;
        }
        let exercise = match self.read_buffer.lock().unwrap().first() {
            Some(frame) => frame.required_joints,
            None => {
                debug!("analyze_loaded ignored: reference buffer is empty");
                return;
            }
        };
        self.analysis_pointer = 0;
        self.report = None;
        self.analysis = Some(AnalysisSession::new(exercise, self.config.sampling_rate));
        self.mode = Mode::Analysis;
        info!(?exercise, "analysis started");
    }

    /// Runs one tick of the synchronizer protocol: derive the reference
    /// overlay concurrently with the blocking sensor wait, join, then
    /// advance the active pointer and score when analyzing. The returned
    /// geometry always reflects data from this tick alone.
    pub fn update(&mut self) -> Result<Tick, EngineError> {
        self.retire_exhausted_mode();

        let reference = self.reference_frame();
        let width = self.config.frame_width;
        let height = self.config.frame_height;

        let (waited, overlay) = thread::scope(|s| {
            let worker = reference
                .as_ref()
                .map(|frame| s.spawn(move || bone_lines(frame, width, height)));
            let waited = self.source.wait_update();
            let overlay = worker.map(|w| w.join());
            (waited, overlay)
        });

        let mut tick = Tick::default();
        tick.overlay_lines = match overlay {
            Some(Ok(lines)) => lines,
            Some(Err(_)) => {
                warn!("overlay worker panicked, skipping overlay this tick");
                Vec::new()
            }
            None => Vec::new(),
        };

        let live = match waited? {
            Some(skeleton) => {
                let (frame, lines, present) = self.ingest_live(skeleton);
                tick.user_lines = lines;
                tick.user_present = present;
                Some(frame)
            }
            None => None,
        };

        if let Some(reference) = reference.as_ref() {
            self.advance_pointer(live.as_ref(), reference);
        }

        self.check_recording_deadline();
        Ok(tick)
    }

    // -- poll surface ----------------------------------------------------

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn loaded_frames(&self) -> usize {
        self.read_buffer.lock().unwrap().len()
    }

    pub fn recorded_frames(&self) -> usize {
        self.write_buffer.lock().unwrap().len()
    }

    /// Path of the persisted recording, once the disk write has finished.
    pub fn take_saved_recording(&mut self) -> Option<PathBuf> {
        self.saved_recording.take()
    }

    pub fn take_disk_replay_complete(&mut self) -> bool {
        std::mem::take(&mut self.disk_replay_done)
    }

    pub fn take_session_replay_complete(&mut self) -> bool {
        std::mem::take(&mut self.session_replay_done)
    }

    pub fn take_report(&mut self) -> Option<SessionReport> {
        self.report.take()
    }

    pub fn is_idle(&self) -> bool {
        self.mode == Mode::Idle
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.mode, Mode::Recording { .. })
    }

    pub fn is_replaying(&self) -> bool {
        matches!(self.mode, Mode::ReplayDisk | Mode::ReplaySession)
    }

    pub fn is_analyzing(&self) -> bool {
        self.mode == Mode::Analysis
    }

    // -- tick internals --------------------------------------------------

    /// Flips a finished mode back to Idle and signals its completion.
    /// Runs before any frame processing, so a mode's last frame is always
    /// fully handled on the tick before completion is raised.
    fn retire_exhausted_mode(&mut self) {
        match self.mode {
            Mode::ReplayDisk => {
                if self.replay_pointer >= self.read_buffer.lock().unwrap().len() {
                    self.mode = Mode::Idle;
                    self.disk_replay_done = true;
                    info!("loaded-data replay finished");
                }
            }
            Mode::ReplaySession => {
                if self.session_pointer >= self.write_buffer.lock().unwrap().len() {
                    self.mode = Mode::Idle;
                    self.session_replay_done = true;
                    info!("session replay finished");
                }
            }
            Mode::Analysis => {
                if self.analysis_pointer >= self.read_buffer.lock().unwrap().len() {
                    self.mode = Mode::Idle;
                    if let Some(session) = self.analysis.take() {
                        let report = session.finalize();
                        info!(
                            percent_correct = report.percent_correct as f64,
                            "analysis finished"
                        );
                        self.report = Some(report);
                    }
                }
            }
            _ => {}
        }
    }

    /// The reference frame the active mode points at this tick, if any.
    fn reference_frame(&self) -> Option<JointFrame> {
        match self.mode {
            Mode::ReplayDisk => self
                .read_buffer
                .lock()
                .unwrap()
                .get(self.replay_pointer)
                .cloned(),
            Mode::ReplaySession => self
                .write_buffer
                .lock()
                .unwrap()
                .get(self.session_pointer)
                .cloned(),
            Mode::Analysis => self
                .read_buffer
                .lock()
                .unwrap()
                .get(self.analysis_pointer)
                .cloned(),
            _ => None,
        }
    }

    /// Converts a sensor update into a frame, derives angles when the
    /// frame is complete for the governing exercise type, and appends to
    /// the write buffer while recording. The append uses a try-lock and
    /// drops the frame on contention rather than stalling the sensor
    /// pipeline.
    fn ingest_live(&mut self, skeleton: Skeleton) -> (JointFrame, Vec<BoneSegment>, bool) {
        let governing = match self.mode {
            Mode::Recording { exercise, .. } => exercise,
            Mode::Analysis => self
                .analysis
                .as_ref()
                .map(|s| s.exercise())
                .unwrap_or(ExerciseType::Full),
            _ => ExerciseType::Full,
        };

        let mut frame = JointFrame {
            timestamp: Utc::now().timestamp(),
            required_joints: governing,
            ..JointFrame::default()
        };
        for i in 0..JOINT_COUNT {
            frame.confidence[i] = skeleton.joints[i].confidence;
            frame.real[i] = skeleton.joints[i].real;
            frame.proj[i] = skeleton.joints[i].proj;
        }

        let complete = frame.is_complete(governing);
        if complete {
            frame.angles = compute_angles(&frame.real);
        }

        let lines = bone_lines(&frame, self.config.frame_width, self.config.frame_height);
        let present = frame.all_bones_visible();

        if matches!(self.mode, Mode::Recording { .. }) && complete {
            match self.write_buffer.try_lock() {
                Ok(mut buffer) => buffer.push(frame.clone()),
                Err(_) => warn!("write buffer contended, dropping recorded frame"),
            }
        }

        (frame, lines, present)
    }

    /// Moves the active pointer past the frame processed this tick. In
    /// analysis the advance is gated: checked frames hold the reference
    /// until the performer matches it.
    fn advance_pointer(&mut self, live: Option<&JointFrame>, reference: &JointFrame) {
        match self.mode {
            Mode::ReplayDisk => self.replay_pointer += 1,
            Mode::ReplaySession => self.session_pointer += 1,
            Mode::Analysis => {
                if let Some(session) = self.analysis.as_mut() {
                    let advance = match session.observe(live, reference) {
                        TickOutcome::Pass => true,
                        TickOutcome::Checked { advance, .. } => advance,
                    };
                    if advance {
                        self.analysis_pointer += 1;
                    }
                }
            }
            _ => {}
        }
    }

    /// Past the recording deadline: back to Idle and persist the buffer
    /// on a detached worker. The frames are snapshotted here, on the
    /// render thread, so a new recording or a clear started after this
    /// tick cannot change what gets written. The saved-path slot is
    /// filled only after the file is on disk.
    fn check_recording_deadline(&mut self) {
        if let Mode::Recording { deadline, .. } = self.mode {
            if Utc::now().timestamp() > deadline {
                self.mode = Mode::Idle;
                let frames = self.write_buffer.lock().unwrap().frames().to_vec();
                let dir = self.config.output_dir.clone();
                let slot = self.saved_recording.handle();
                thread::spawn(move || match disk::write_frames(&dir, &frames) {
                    Ok(path) => slot.put(path),
                    Err(err) => warn!(%err, "failed to persist recording"),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::SimulatedSource;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedSource {
        updates: VecDeque<Option<Skeleton>>,
    }

    impl ScriptedSource {
        fn repeating(skeleton: Skeleton, n: usize) -> Self {
            Self {
                updates: (0..n).map(|_| Some(skeleton.clone())).collect(),
            }
        }

        fn empty() -> Self {
            Self {
                updates: VecDeque::new(),
            }
        }
    }

    impl SkeletonSource for ScriptedSource {
        fn wait_update(&mut self) -> Result<Option<Skeleton>, SensorError> {
            Ok(self.updates.pop_front().unwrap_or(None))
        }
    }

    struct FailingSource;

    impl SkeletonSource for FailingSource {
        fn wait_update(&mut self) -> Result<Option<Skeleton>, SensorError> {
            Err(SensorError::Backend("device lost".into()))
        }
    }

    fn test_config(sampling_rate: u32) -> EngineConfig {
        EngineConfig {
            output_dir: std::env::temp_dir().join(format!(
                "telerehab-engine-{}",
                uuid::Uuid::new_v4().simple()
            )),
            sampling_rate,
            ..EngineConfig::default()
        }
    }

    fn reference_frame(exercise: ExerciseType) -> JointFrame {
        let skeleton = SimulatedSource::skeleton_at(0.0);
        let mut frame = JointFrame::default();
        frame.timestamp = 1_700_000_000;
        frame.required_joints = exercise;
        for i in 0..JOINT_COUNT {
            frame.confidence[i] = skeleton.joints[i].confidence;
            frame.real[i] = skeleton.joints[i].real;
            frame.proj[i] = skeleton.joints[i].proj;
        }
        frame.angles = compute_angles(&frame.real);
        frame
    }

    fn load_reference<S: SkeletonSource>(
        engine: &mut Engine<S>,
        frames: &[JointFrame],
        dir: &Path,
    ) {
        let path = disk::write_frames(dir, frames).unwrap();
        engine.load_file(&path);
        for _ in 0..100 {
            if engine.is_loaded() {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("reference load did not complete");
    }

    /// Ticks the engine until the recording deadline elapses. The deadline
    /// is compared in whole epoch seconds, so this can take up to two
    /// wall-clock seconds.
    fn finish_recording<S: SkeletonSource>(engine: &mut Engine<S>) {
        for _ in 0..300 {
            engine.update().unwrap();
            if engine.is_idle() {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("recording did not finish");
    }

    fn wait_for_saved<S: SkeletonSource>(engine: &mut Engine<S>) -> PathBuf {
        for _ in 0..100 {
            if let Some(path) = engine.take_saved_recording() {
                return path;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("recording was not persisted");
    }

    #[test]
    fn starting_a_mode_while_another_is_active_is_a_no_op() {
        let config = test_config(30);
        let mut engine = Engine::new(ScriptedSource::empty(), config);
        engine.start_recording(60, Some(ExerciseType::Full));
        assert!(engine.is_recording());

        engine.replay_loaded();
        assert!(engine.is_recording());
        assert!(!engine.is_replaying());

        engine.analyze_loaded();
        assert!(engine.is_recording());
        assert!(!engine.is_analyzing());
    }

    #[test]
    fn replay_consumes_the_buffer_then_returns_to_idle() {
        let config = test_config(30);
        let dir = config.output_dir.clone();
        let skeleton = SimulatedSource::skeleton_at(0.0);
        let mut engine = Engine::new(ScriptedSource::repeating(skeleton, 10), config);

        let frames = vec![
            reference_frame(ExerciseType::Full),
            reference_frame(ExerciseType::Full),
            reference_frame(ExerciseType::Full),
        ];
        load_reference(&mut engine, &frames, &dir);

        engine.replay_loaded();
        assert!(engine.is_replaying());

        for _ in 0..3 {
            let tick = engine.update().unwrap();
            assert!(!tick.overlay_lines.is_empty());
            assert!(engine.is_replaying());
        }

        let tick = engine.update().unwrap();
        assert!(tick.overlay_lines.is_empty());
        assert!(engine.is_idle());
        assert!(engine.take_disk_replay_complete());
        assert!(!engine.take_disk_replay_complete());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn recording_captures_confident_ticks_and_persists_them() {
        let config = test_config(30);
        let dir = config.output_dir.clone();
        let skeleton = SimulatedSource::skeleton_at(0.0);
        let mut engine = Engine::new(ScriptedSource::repeating(skeleton, 3), config);

        engine.start_recording(1, Some(ExerciseType::Full));
        for _ in 0..3 {
            engine.update().unwrap();
        }
        assert_eq!(engine.recorded_frames(), 3);

        finish_recording(&mut engine);
        let path = wait_for_saved(&mut engine);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            let fields = line.split(',').filter(|f| !f.is_empty()).count();
            assert_eq!(fields, (2 + 25 * 7) * 2);
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn clearing_right_after_a_recording_does_not_corrupt_the_saved_file() {
        let config = test_config(30);
        let dir = config.output_dir.clone();
        let skeleton = SimulatedSource::skeleton_at(0.0);
        let mut engine = Engine::new(ScriptedSource::repeating(skeleton, 3), config);

        engine.start_recording(1, Some(ExerciseType::Full));
        for _ in 0..3 {
            engine.update().unwrap();
        }
        finish_recording(&mut engine);

        // the persist worker may not have run yet
        engine.clear_recording();
        assert_eq!(engine.recorded_frames(), 0);

        let path = wait_for_saved(&mut engine);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn incomplete_ticks_are_not_recorded() {
        let config = test_config(30);
        let dir = config.output_dir.clone();
        let good = SimulatedSource::skeleton_at(0.0);
        let mut bad = good.clone();
        for joint in bad.joints.iter_mut() {
            joint.confidence = 0.05;
        }
        let updates: VecDeque<_> = vec![
            Some(good.clone()),
            Some(bad.clone()),
            Some(good.clone()),
            Some(bad),
        ]
        .into();
        let mut engine = Engine::new(ScriptedSource { updates }, config);

        engine.start_recording(60, Some(ExerciseType::Full));
        for _ in 0..4 {
            engine.update().unwrap();
        }
        assert_eq!(engine.recorded_frames(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn session_recording_replays_back_then_clears() {
        let config = test_config(30);
        let dir = config.output_dir.clone();
        let skeleton = SimulatedSource::skeleton_at(0.0);
        let mut engine = Engine::new(ScriptedSource::repeating(skeleton, 2), config);

        engine.start_recording(1, Some(ExerciseType::Upper));
        for _ in 0..2 {
            engine.update().unwrap();
        }
        assert_eq!(engine.recorded_frames(), 2);
        finish_recording(&mut engine);

        engine.replay_recording();
        assert!(engine.is_replaying());
        for _ in 0..2 {
            let tick = engine.update().unwrap();
            assert!(!tick.overlay_lines.is_empty());
        }
        engine.update().unwrap();
        assert!(engine.take_session_replay_complete());
        assert!(engine.is_idle());

        engine.clear_recording();
        assert_eq!(engine.recorded_frames(), 0);
        assert!(!engine.is_loaded());
        engine.replay_recording();
        assert!(engine.is_idle());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn matching_performance_scores_all_green() {
        let config = test_config(1);
        let dir = config.output_dir.clone();
        let skeleton = SimulatedSource::skeleton_at(0.0);
        let mut engine = Engine::new(ScriptedSource::repeating(skeleton, 20), config);

        let frames = vec![
            reference_frame(ExerciseType::Full),
            reference_frame(ExerciseType::Full),
            reference_frame(ExerciseType::Full),
        ];
        load_reference(&mut engine, &frames, &dir);

        engine.analyze_loaded();
        assert!(engine.is_analyzing());

        let mut report = None;
        for _ in 0..20 {
            engine.update().unwrap();
            report = engine.take_report();
            if report.is_some() {
                break;
            }
        }
        let report = report.expect("analysis did not finish");
        assert_eq!(report.checked, 3);
        assert_eq!(report.green_pct, 100.0);
        assert_eq!(report.percent_correct, 100.0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn untracked_performance_scores_all_red() {
        let config = test_config(2);
        let dir = config.output_dir.clone();
        let mut engine = Engine::new(ScriptedSource::empty(), config);

        let frames = vec![
            reference_frame(ExerciseType::Upper),
            reference_frame(ExerciseType::Upper),
            reference_frame(ExerciseType::Upper),
        ];
        load_reference(&mut engine, &frames, &dir);

        engine.analyze_loaded();
        let mut report = None;
        for _ in 0..20 {
            engine.update().unwrap();
            report = engine.take_report();
            if report.is_some() {
                break;
            }
        }
        let report = report.expect("analysis did not finish");
        assert_eq!(report.red_pct, 100.0);
        assert_eq!(report.percent_correct, report.pass_pct);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn loading_a_missing_file_leaves_the_engine_unloaded() {
        let config = test_config(30);
        let mut engine = Engine::new(ScriptedSource::empty(), config);

        engine.load_file(Path::new("/nonexistent/telerehab/data.txt"));
        thread::sleep(Duration::from_millis(300));

        assert!(!engine.is_loaded());
        assert_eq!(engine.loaded_frames(), 0);

        engine.replay_loaded();
        assert!(engine.is_idle());
    }

    #[test]
    fn sensor_failure_is_fatal_to_the_tick_loop() {
        let config = test_config(30);
        let mut engine = Engine::new(FailingSource, config);
        assert!(engine.update().is_err());
    }
}
