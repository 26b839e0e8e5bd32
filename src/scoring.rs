// src/scoring.rs - frame-by-frame correctness scoring and session reports
use std::fmt;
use std::ops::RangeInclusive;

use chrono::Utc;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::skeleton::{ExerciseType, Joint, JointFrame, ANGLE_COUNT};

/// Ticks between checked frames. Every other tick is a pass frame.
pub const DEFAULT_SAMPLING_RATE: u32 = 30;

/// Per-exercise scoring parameters: which joints must be tracked, which
/// derived angles are compared, and how far the live angle vector may
/// drift from the reference (aggregate degrees, not per angle).
pub struct ExerciseProfile {
    pub required: Vec<Joint>,
    pub angle_indices: RangeInclusive<usize>,
    pub threshold: f32,
}

static PROFILES: Lazy<[ExerciseProfile; 3]> = Lazy::new(|| {
    use Joint::*;
    [
        // Upper body
        ExerciseProfile {
            required: vec![
                Head,
                Neck,
                LeftCollar,
                LeftShoulder,
                RightShoulder,
                LeftElbow,
                RightElbow,
                LeftWrist,
                RightWrist,
                Torso,
                Waist,
            ],
            angle_indices: 7..=16,
            threshold: 40.0,
        },
        // Lower body
        ExerciseProfile {
            required: vec![
                Torso,
                Waist,
                LeftHip,
                RightHip,
                LeftKnee,
                RightKnee,
                LeftAnkle,
                RightAnkle,
            ],
            angle_indices: 0..=6,
            threshold: 30.0,
        },
        // Full body
        ExerciseProfile {
            required: vec![
                Head,
                Neck,
                LeftCollar,
                LeftShoulder,
                RightShoulder,
                LeftElbow,
                RightElbow,
                LeftWrist,
                RightWrist,
                Torso,
                Waist,
                LeftHip,
                RightHip,
                LeftKnee,
                RightKnee,
                LeftAnkle,
                RightAnkle,
            ],
            angle_indices: 0..=16,
            threshold: 60.0,
        },
    ]
});

/// Scoring profile governing an exercise type. Undefined recordings are
/// held to the full-body profile.
pub fn profile(exercise: ExerciseType) -> &'static ExerciseProfile {
    match exercise {
        ExerciseType::Upper => &PROFILES[0],
        ExerciseType::Lower => &PROFILES[1],
        ExerciseType::Full | ExerciseType::Undefined => &PROFILES[2],
    }
}

/// Joints that must be tracked for the exercise type.
pub fn required_joints(exercise: ExerciseType) -> &'static [Joint] {
    &profile(exercise).required
}

/// How close a checked live frame came to its reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Green,
    Yellow,
    Orange,
    Red,
}

/// Bands a live-vs-reference distance against the exercise threshold.
pub fn classify(distance: f32, threshold: f32) -> Band {
    if distance < threshold {
        Band::Green
    } else if distance < 1.175 * threshold {
        Band::Yellow
    } else if distance < 1.325 * threshold {
        Band::Orange
    } else {
        Band::Red
    }
}

/// Euclidean distance between two angle vectors restricted to the
/// exercise's angle subset.
pub fn angle_distance(
    live: &[i32; ANGLE_COUNT],
    reference: &[i32; ANGLE_COUNT],
    indices: RangeInclusive<usize>,
) -> f32 {
    let sum: f32 = indices
        .map(|i| {
            let d = (live[i] - reference[i]) as f32;
            d * d
        })
        .sum();
    sum.sqrt()
}

/// What the scorer decided for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Non-sampled tick; the reference pointer auto-advances.
    Pass,
    /// Sampled tick; the pointer advances only when the performer matched.
    Checked { band: Band, advance: bool },
}

/// Accumulates correctness counters over one analysis run, from
/// `analyze_loaded` until the reference buffer is exhausted.
pub struct AnalysisSession {
    exercise: ExerciseType,
    sampling_rate: u32,
    started_at: i64,
    ticks: u32,
    checked: u32,
    pass: u32,
    correct: u32,
    incorrect: u32,
    green: u32,
    yellow: u32,
    orange: u32,
    red: u32,
}

impl AnalysisSession {
    pub fn new(exercise: ExerciseType, sampling_rate: u32) -> Self {
        Self {
            exercise,
            sampling_rate: sampling_rate.max(1),
            started_at: Utc::now().timestamp(),
            ticks: 0,
            checked: 0,
            pass: 0,
            correct: 0,
            incorrect: 0,
            green: 0,
            yellow: 0,
            orange: 0,
            red: 0,
        }
    }

    pub fn exercise(&self) -> ExerciseType {
        self.exercise
    }

    /// Scores one tick. `live` is None when no skeleton was tracked this
    /// tick; such frames, and frames missing required joints, are forced
    /// red regardless of numeric distance.
    pub fn observe(&mut self, live: Option<&JointFrame>, reference: &JointFrame) -> TickOutcome {
        let sampled = self.ticks % self.sampling_rate == 0;
        self.ticks += 1;

        if !sampled {
            self.pass += 1;
            return TickOutcome::Pass;
        }

        self.checked += 1;
        let profile = profile(self.exercise);
        let band = match live {
            Some(frame) if frame.is_complete(self.exercise) => {
                let distance = angle_distance(
                    &frame.angles,
                    &reference.angles,
                    profile.angle_indices.clone(),
                );
                debug!(distance, threshold = profile.threshold, "checked frame");
                classify(distance, profile.threshold)
            }
            _ => Band::Red,
        };

        if band == Band::Green {
            self.correct += 1;
        } else {
            self.incorrect += 1;
        }
        match band {
            Band::Green => self.green += 1,
            Band::Yellow => self.yellow += 1,
            Band::Orange => self.orange += 1,
            Band::Red => self.red += 1,
        }

        TickOutcome::Checked {
            band,
            advance: band == Band::Green,
        }
    }

    /// Closes the session once the reference buffer is exhausted.
    pub fn finalize(self) -> SessionReport {
        SessionReport {
            exercise: self.exercise,
            started_at: self.started_at,
            total_ticks: self.ticks,
            checked: self.checked,
            pass: self.pass,
            green_pct: pct(self.green, self.checked),
            yellow_pct: pct(self.yellow, self.checked),
            orange_pct: pct(self.orange, self.checked),
            red_pct: pct(self.red, self.checked),
            checked_pct: pct(self.checked, self.ticks),
            pass_pct: pct(self.pass, self.ticks),
            percent_correct: pct(self.correct + self.pass, self.ticks),
        }
    }
}

fn pct(part: u32, total: u32) -> f32 {
    if total == 0 {
        0.0
    } else {
        part as f32 / total as f32 * 100.0
    }
}

/// Aggregated outcome of one analysis run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub exercise: ExerciseType,
    pub started_at: i64,
    pub total_ticks: u32,
    pub checked: u32,
    pub pass: u32,
    pub green_pct: f32,
    pub yellow_pct: f32,
    pub orange_pct: f32,
    pub red_pct: f32,
    pub checked_pct: f32,
    pub pass_pct: f32,
    pub percent_correct: f32,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let started = chrono::DateTime::from_timestamp(self.started_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| self.started_at.to_string());
        writeln!(f, "Exercise session report")?;
        writeln!(f, "Exercise type:  {:?}", self.exercise)?;
        writeln!(f, "Started at:     {}", started)?;
        writeln!(f, "Total frames:   {}", self.total_ticks)?;
        writeln!(
            f,
            "Checked frames: {} ({:.1}%)",
            self.checked, self.checked_pct
        )?;
        writeln!(f, "Pass frames:    {} ({:.1}%)", self.pass, self.pass_pct)?;
        writeln!(f, "Green:  {:.1}%", self.green_pct)?;
        writeln!(f, "Yellow: {:.1}%", self.yellow_pct)?;
        writeln!(f, "Orange: {:.1}%", self.orange_pct)?;
        writeln!(f, "Red:    {:.1}%", self.red_pct)?;
        write!(f, "Overall correctness: {:.1}%", self.percent_correct)
    }
}
