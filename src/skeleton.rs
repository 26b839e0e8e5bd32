// src/skeleton.rs - joint layout, per-tick frames and frame buffers
use nalgebra::Vector3;

/// Number of joint slots reported by the sensor per skeleton update.
pub const JOINT_COUNT: usize = 25;
/// Number of derived biomechanical angles tracked per frame.
pub const ANGLE_COUNT: usize = 19;
/// Joints below this confidence are treated as untracked.
pub const CONFIDENCE_FLOOR: f32 = 0.15;

/// Skeleton joint indices, matching the sensor's reporting order.
/// Slot 0 is a placeholder entry the sensor emits but never populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Joint {
    None = 0,
    Head,
    Neck,
    Torso,
    Waist,
    LeftCollar,
    LeftShoulder,
    LeftElbow,
    LeftWrist,
    LeftHand,
    LeftFingertip,
    RightCollar,
    RightShoulder,
    RightElbow,
    RightWrist,
    RightHand,
    RightFingertip,
    LeftHip,
    LeftKnee,
    LeftAnkle,
    LeftFoot,
    RightHip,
    RightKnee,
    RightAnkle,
    RightFoot,
}

impl Joint {
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Which part of the body an exercise requires to be tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExerciseType {
    #[default]
    Undefined,
    Upper,
    Lower,
    Full,
}

impl ExerciseType {
    /// Integer encoding used in the on-disk format.
    pub fn to_wire(self) -> i32 {
        match self {
            ExerciseType::Undefined => 0,
            ExerciseType::Upper => 1,
            ExerciseType::Lower => 2,
            ExerciseType::Full => 3,
        }
    }

    /// Lenient decoding: out-of-range values fall back to Undefined, the
    /// same way unrecognized recordings are treated elsewhere.
    pub fn from_wire(value: i32) -> Self {
        match value {
            1 => ExerciseType::Upper,
            2 => ExerciseType::Lower,
            3 => ExerciseType::Full,
            _ => ExerciseType::Undefined,
        }
    }
}

use Joint::*;

/// The 19 joint triples whose interior angle (at the middle joint) is
/// tracked per frame.
pub const ANGLE_TRIPLES: [(Joint, Joint, Joint); ANGLE_COUNT] = [
    (LeftAnkle, LeftKnee, LeftHip),
    (RightAnkle, RightKnee, RightHip),
    (LeftHip, Waist, RightHip),
    (LeftKnee, LeftHip, Waist),
    (RightKnee, RightHip, Waist),
    (LeftHip, Waist, Torso),
    (RightHip, Waist, Torso),
    (Waist, Torso, LeftCollar),
    (LeftShoulder, LeftCollar, Torso),
    (RightShoulder, LeftCollar, Torso),
    (Neck, LeftCollar, LeftShoulder),
    (Neck, LeftCollar, RightShoulder),
    (Head, Neck, LeftCollar),
    (LeftCollar, LeftShoulder, LeftElbow),
    (LeftCollar, RightShoulder, RightElbow),
    (LeftShoulder, LeftElbow, LeftWrist),
    (RightShoulder, RightElbow, RightWrist),
    (LeftElbow, LeftWrist, LeftHand),
    (RightElbow, RightWrist, RightHand),
];

/// Bone pairs rendered as line segments for the skeleton overlay.
pub const BONES: [(Joint, Joint); 18] = [
    (Head, Neck),
    (Neck, LeftCollar),
    (LeftCollar, Torso),
    (LeftCollar, LeftShoulder),
    (LeftCollar, RightShoulder),
    (Waist, LeftHip),
    (Waist, RightHip),
    (Torso, Waist),
    (LeftShoulder, LeftElbow),
    (LeftElbow, LeftWrist),
    (LeftWrist, LeftHand),
    (RightShoulder, RightElbow),
    (RightElbow, RightWrist),
    (RightWrist, RightHand),
    (RightHip, RightKnee),
    (LeftHip, LeftKnee),
    (RightKnee, RightAnkle),
    (LeftKnee, LeftAnkle),
];

/// One bone of overlay geometry in output pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneSegment {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// One full-skeleton sample captured at a single tick.
///
/// `angles` holds meaningful values only when the frame was complete for
/// its exercise type at capture time; consumers must not trust angles on
/// frames recorded as incomplete.
#[derive(Debug, Clone)]
pub struct JointFrame {
    pub timestamp: i64,
    pub required_joints: ExerciseType,
    pub confidence: [f32; JOINT_COUNT],
    pub real: [Vector3<f32>; JOINT_COUNT],
    pub proj: [Vector3<f32>; JOINT_COUNT],
    pub angles: [i32; ANGLE_COUNT],
}

impl Default for JointFrame {
    fn default() -> Self {
        Self {
            timestamp: 0,
            required_joints: ExerciseType::Undefined,
            confidence: [0.0; JOINT_COUNT],
            real: [Vector3::zeros(); JOINT_COUNT],
            proj: [Vector3::zeros(); JOINT_COUNT],
            angles: [0; ANGLE_COUNT],
        }
    }
}

impl JointFrame {
    /// A joint counts as tracked when its confidence clears the floor and
    /// its projected coordinates fall strictly inside the frame.
    pub fn joint_visible(&self, joint: Joint) -> bool {
        let i = joint.index();
        let p = self.proj[i];
        self.confidence[i] > CONFIDENCE_FLOOR
            && p.x > 0.0
            && p.x < 1.0
            && p.y > 0.0
            && p.y < 1.0
    }

    /// Whether every joint the exercise requires is currently tracked.
    pub fn is_complete(&self, exercise: ExerciseType) -> bool {
        crate::scoring::required_joints(exercise)
            .iter()
            .all(|&j| self.joint_visible(j))
    }

    /// Whether the whole overlay skeleton can be drawn, used as the
    /// "user currently in frame" indicator.
    pub fn all_bones_visible(&self) -> bool {
        BONES
            .iter()
            .all(|&(a, b)| self.joint_visible(a) && self.joint_visible(b))
    }
}

/// Interior angle at `b` between the segments b->a and b->c, in whole
/// degrees. A straight limb reads 180, a right angle 90.
pub fn angle_abc(a: Vector3<f32>, b: Vector3<f32>, c: Vector3<f32>) -> i32 {
    let ba = a - b;
    let bc = c - b;
    if ba.norm() == 0.0 || bc.norm() == 0.0 {
        return 0;
    }
    let cos = ba.normalize().dot(&bc.normalize()).clamp(-1.0, 1.0);
    cos.acos().to_degrees() as i32
}

/// Derives all tracked angles from real-world joint positions. Only
/// meaningful when the relevant joints were confidently tracked.
pub fn compute_angles(real: &[Vector3<f32>; JOINT_COUNT]) -> [i32; ANGLE_COUNT] {
    let mut angles = [0; ANGLE_COUNT];
    for (slot, &(a, b, c)) in ANGLE_TRIPLES.iter().enumerate() {
        angles[slot] = angle_abc(real[a.index()], real[b.index()], real[c.index()]);
    }
    angles
}

/// Overlay line segments for every visible bone, scaled to output pixels.
pub fn bone_lines(frame: &JointFrame, width: f32, height: f32) -> Vec<BoneSegment> {
    let mut lines = Vec::with_capacity(BONES.len());
    for &(a, b) in BONES.iter() {
        if frame.joint_visible(a) && frame.joint_visible(b) {
            let pa = frame.proj[a.index()];
            let pb = frame.proj[b.index()];
            lines.push(BoneSegment {
                x1: width * pa.x,
                y1: height * pa.y,
                x2: width * pb.x,
                y2: height * pb.y,
            });
        }
    }
    lines
}

/// A plain sequence of frames. Validation is the scorer's job; the buffer
/// just stores what it is given.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    frames: Vec<JointFrame>,
}

impl FrameBuffer {
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn push(&mut self, frame: JointFrame) {
        self.frames.push(frame);
    }

    pub fn get(&self, index: usize) -> Option<&JointFrame> {
        self.frames.get(index)
    }

    pub fn first(&self) -> Option<&JointFrame> {
        self.frames.first()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[JointFrame] {
        &self.frames
    }

    /// Wholesale replacement, used when a disk load completes.
    pub fn replace(&mut self, frames: Vec<JointFrame>) {
        self.frames = frames;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_limb_reads_180_degrees() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 1.0, 0.0);
        let c = Vector3::new(0.0, 2.0, 0.0);
        assert_eq!(angle_abc(a, b, c), 180);
    }

    #[test]
    fn perpendicular_segments_read_90_degrees() {
        let a = Vector3::new(1.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 0.0, 0.0);
        let c = Vector3::new(0.0, 1.0, 0.0);
        assert_eq!(angle_abc(a, b, c), 90);
    }

    #[test]
    fn coincident_joints_read_zero() {
        let p = Vector3::new(0.5, 0.5, 0.5);
        assert_eq!(angle_abc(p, p, p), 0);
    }

    #[test]
    fn wire_encoding_round_trips_known_types() {
        for ex in [
            ExerciseType::Undefined,
            ExerciseType::Upper,
            ExerciseType::Lower,
            ExerciseType::Full,
        ] {
            assert_eq!(ExerciseType::from_wire(ex.to_wire()), ex);
        }
        assert_eq!(ExerciseType::from_wire(42), ExerciseType::Undefined);
    }

    #[test]
    fn joint_visibility_requires_confidence_and_in_frame_projection() {
        let mut frame = JointFrame::default();
        let i = Joint::Head.index();
        frame.confidence[i] = 0.9;
        frame.proj[i] = Vector3::new(0.5, 0.5, 0.0);
        assert!(frame.joint_visible(Joint::Head));

        frame.confidence[i] = 0.1;
        assert!(!frame.joint_visible(Joint::Head));

        frame.confidence[i] = 0.9;
        frame.proj[i] = Vector3::new(1.0, 0.5, 0.0);
        assert!(!frame.joint_visible(Joint::Head));
    }

    #[test]
    fn bone_lines_scale_to_output_dimensions() {
        let mut frame = JointFrame::default();
        for joint in [Joint::Head, Joint::Neck] {
            let i = joint.index();
            frame.confidence[i] = 1.0;
            frame.proj[i] = Vector3::new(0.25, 0.5, 0.0);
        }
        let lines = bone_lines(&frame, 640.0, 480.0);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].x1, 160.0);
        assert_eq!(lines[0].y1, 240.0);
    }
}
