// src/sensor.rs - the seam to the skeleton-tracking backend
use nalgebra::Vector3;
use thiserror::Error;

use crate::skeleton::JOINT_COUNT;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("skeleton backend failure: {0}")]
    Backend(String),
}

/// One joint as reported by the tracking backend: confidence, real-world
/// position (millimetres) and projected position (normalized 0..1).
#[derive(Debug, Clone, Copy)]
pub struct JointSample {
    pub confidence: f32,
    pub real: Vector3<f32>,
    pub proj: Vector3<f32>,
}

impl Default for JointSample {
    fn default() -> Self {
        Self {
            confidence: 0.0,
            real: Vector3::zeros(),
            proj: Vector3::zeros(),
        }
    }
}

/// A full skeleton update for one tick.
#[derive(Debug, Clone)]
pub struct Skeleton {
    pub joints: [JointSample; JOINT_COUNT],
}

/// The blocking "wait for next sensor frame" call. `Ok(None)` means the
/// tick passed with no user tracked; `Err` is fatal to the render loop.
pub trait SkeletonSource {
    fn wait_update(&mut self) -> Result<Option<Skeleton>, SensorError>;
}

/// Approximate standing pose in real-world millimetres, one entry per
/// joint slot. Slot 0 is the sensor's placeholder.
const BASE_POSE: [[f32; 3]; JOINT_COUNT] = [
    [0.0, 0.0, 0.0],
    [0.0, 800.0, 2000.0],     // head
    [0.0, 650.0, 2000.0],     // neck
    [0.0, 300.0, 2000.0],     // torso
    [0.0, 0.0, 2000.0],       // waist
    [-20.0, 580.0, 2000.0],   // left collar
    [-200.0, 550.0, 2000.0],  // left shoulder
    [-250.0, 250.0, 2000.0],  // left elbow
    [-280.0, -50.0, 2000.0],  // left wrist
    [-290.0, -150.0, 2000.0], // left hand
    [-295.0, -200.0, 2000.0], // left fingertip
    [20.0, 580.0, 2000.0],    // right collar
    [200.0, 550.0, 2000.0],   // right shoulder
    [250.0, 250.0, 2000.0],   // right elbow
    [280.0, -50.0, 2000.0],   // right wrist
    [290.0, -150.0, 2000.0],  // right hand
    [295.0, -200.0, 2000.0],  // right fingertip
    [-120.0, -100.0, 2000.0], // left hip
    [-130.0, -500.0, 2000.0], // left knee
    [-140.0, -900.0, 2000.0], // left ankle
    [-150.0, -950.0, 2000.0], // left foot
    [120.0, -100.0, 2000.0],  // right hip
    [130.0, -500.0, 2000.0],  // right knee
    [140.0, -900.0, 2000.0],  // right ankle
    [150.0, -950.0, 2000.0],  // right foot
];

/// Deterministic stand-in for the depth sensor, used by the demo binary
/// and the tests: a fully confident skeleton swaying gently around the
/// base pose.
pub struct SimulatedSource {
    tick: u64,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self { tick: 0 }
    }

    /// The simulated skeleton at a given time, exposed so tests can build
    /// reference sequences that match the live stream exactly.
    pub fn skeleton_at(t: f32) -> Skeleton {
        let sway = 30.0 * (t * 0.5).sin();
        let mut joints = [JointSample::default(); JOINT_COUNT];
        for (i, base) in BASE_POSE.iter().enumerate().skip(1) {
            let real = Vector3::new(base[0] + sway, base[1], base[2]);
            joints[i] = JointSample {
                confidence: 0.95,
                real,
                proj: project(real),
            };
        }
        Skeleton { joints }
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SkeletonSource for SimulatedSource {
    fn wait_update(&mut self) -> Result<Option<Skeleton>, SensorError> {
        let t = self.tick as f32 / 30.0;
        self.tick += 1;
        Ok(Some(Self::skeleton_at(t)))
    }
}

/// Maps a real-world position into normalized projected coordinates the
/// way a centred depth camera would.
fn project(real: Vector3<f32>) -> Vector3<f32> {
    Vector3::new(
        (real.x / 2400.0 + 0.5).clamp(0.01, 0.99),
        (0.5 - real.y / 2400.0).clamp(0.01, 0.99),
        0.0,
    )
}
