// src/disk.rs - on-disk joint data format
//
// One frame per line, comma-delimited tag/value pairs in fixed order:
// `Time,<int>,RJ,<int>,` then 25 groups of
// `Confidence,<f>,x,<f>,y,<f>,z,<f>,x_proj,<f>,y_proj,<f>,Angle,<f>,`.
use std::fs;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::skeleton::{ExerciseType, JointFrame, ANGLE_COUNT, JOINT_COUNT};

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("joint data io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("joint data file unreadable: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
enum FrameParseError {
    #[error("unrecognized tag `{0}`")]
    UnknownTag(String),
    #[error("tag `{0}` has no value")]
    MissingValue(String),
    #[error("bad numeric value `{1}` for tag `{0}`")]
    BadNumber(String, String),
    #[error("more joint groups than the format allows")]
    TooManyJoints,
}

/// Writes the buffer to a fresh file under `dir`, one line per frame.
/// The file name carries a random 10-character suffix to avoid collisions;
/// the generated path is returned to the caller.
pub fn write_frames(dir: &Path, frames: &[JointFrame]) -> Result<PathBuf, DiskError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.txt", random_suffix()));

    let mut writer = WriterBuilder::new().flexible(true).from_path(&path)?;
    for frame in frames {
        writer.write_record(&frame_record(frame))?;
    }
    writer.flush()?;

    let bytes = fs::metadata(&path)?.len();
    info!(path = %path.display(), frames = frames.len(), bytes, "joint data written to disk");
    Ok(path)
}

/// Reads a joint data file. A malformed line aborts the read: whatever
/// parsed before the error is returned and the problem is logged. Only a
/// file that cannot be opened at all is an error to the caller.
pub fn read_frames(path: &Path) -> Result<Vec<JointFrame>, DiskError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut frames = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                warn!(line, %err, "aborting joint data read");
                return Ok(frames);
            }
        };
        match parse_frame(&record) {
            Ok(frame) => frames.push(frame),
            Err(err) => {
                warn!(line, %err, "aborting joint data read");
                return Ok(frames);
            }
        }
    }

    info!(path = %path.display(), frames = frames.len(), "joint data read into memory");
    Ok(frames)
}

fn random_suffix() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..10].to_string()
}

fn frame_record(frame: &JointFrame) -> Vec<String> {
    let mut fields = Vec::with_capacity(4 + JOINT_COUNT * 14 + 1);
    fields.push("Time".to_string());
    fields.push(frame.timestamp.to_string());
    fields.push("RJ".to_string());
    fields.push(frame.required_joints.to_wire().to_string());

    for i in 0..JOINT_COUNT {
        fields.push("Confidence".to_string());
        fields.push(frame.confidence[i].to_string());
        fields.push("x".to_string());
        fields.push(frame.real[i].x.to_string());
        fields.push("y".to_string());
        fields.push(frame.real[i].y.to_string());
        fields.push("z".to_string());
        fields.push(frame.real[i].z.to_string());
        fields.push("x_proj".to_string());
        fields.push(frame.proj[i].x.to_string());
        fields.push("y_proj".to_string());
        fields.push(frame.proj[i].y.to_string());
        fields.push("Angle".to_string());
        // 19 tracked angles, remaining joint slots serialize as zero
        fields.push(frame.angles.get(i).copied().unwrap_or(0).to_string());
    }

    // every field is comma-terminated, so lines end with an empty field
    fields.push(String::new());
    fields
}

fn parse_frame(record: &StringRecord) -> Result<JointFrame, FrameParseError> {
    let mut frame = JointFrame::default();
    let mut slot = 0usize;

    let mut fields = record.iter();
    while let Some(tag) = fields.next() {
        if tag.is_empty() {
            // trailing comma
            continue;
        }
        let value = fields
            .next()
            .ok_or_else(|| FrameParseError::MissingValue(tag.to_string()))?;

        if slot >= JOINT_COUNT && tag != "Time" && tag != "RJ" {
            return Err(FrameParseError::TooManyJoints);
        }

        match tag {
            "Time" => frame.timestamp = parse_number(tag, value)?,
            "RJ" => frame.required_joints = ExerciseType::from_wire(parse_number(tag, value)?),
            "Confidence" => frame.confidence[slot] = parse_number(tag, value)?,
            "x" => frame.real[slot].x = parse_number(tag, value)?,
            "y" => frame.real[slot].y = parse_number(tag, value)?,
            "z" => frame.real[slot].z = parse_number(tag, value)?,
            "x_proj" => frame.proj[slot].x = parse_number(tag, value)?,
            "y_proj" => {
                frame.proj[slot].y = parse_number(tag, value)?;
                frame.proj[slot].z = 0.0;
            }
            "Angle" => {
                let angle: f32 = parse_number(tag, value)?;
                if slot < ANGLE_COUNT {
                    frame.angles[slot] = angle as i32;
                }
                slot += 1;
            }
            other => return Err(FrameParseError::UnknownTag(other.to_string())),
        }
    }

    Ok(frame)
}

fn parse_number<T: std::str::FromStr>(tag: &str, value: &str) -> Result<T, FrameParseError> {
    value
        .parse()
        .map_err(|_| FrameParseError::BadNumber(tag.to_string(), value.to_string()))
}
