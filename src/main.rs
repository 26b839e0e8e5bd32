// src/main.rs
mod config;
mod disk;
mod engine;
mod scoring;
mod sensor;
mod skeleton;

use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::sensor::SimulatedSource;
use crate::skeleton::ExerciseType;

const TICK: Duration = Duration::from_millis(33);

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(Path::new(&path))
            .with_context(|| format!("loading config from {path}"))?,
        None => EngineConfig::default(),
    };
    info!(output_dir = %config.output_dir.display(), "starting demo session");

    let mut engine = Engine::new(SimulatedSource::new(), config);

    // Capture a short reference recording from the simulated sensor.
    engine.start_recording(2, Some(ExerciseType::Full));
    while engine.is_recording() {
        engine.update()?;
        thread::sleep(TICK);
    }
    info!(frames = engine.recorded_frames(), "recording captured");

    let saved = wait_for(|| engine.take_saved_recording())
        .context("recording was never persisted to disk")?;
    println!("Recording saved to {}", saved.display());

    // Load it back and replay it as the overlay.
    engine.load_file(&saved);
    if wait_for(|| engine.is_loaded().then_some(())).is_none() {
        bail!("failed to load {}", saved.display());
    }
    info!(frames = engine.loaded_frames(), "reference loaded");

    engine.replay_loaded();
    while !engine.take_disk_replay_complete() {
        let tick = engine.update()?;
        if !tick.overlay_lines.is_empty() {
            info!(
                bones = tick.overlay_lines.len(),
                user_present = tick.user_present,
                "replay tick"
            );
        }
        thread::sleep(TICK);
    }

    // Score the live stream against the recording it came from.
    engine.analyze_loaded();
    let report = loop {
        engine.update()?;
        if let Some(report) = engine.take_report() {
            break report;
        }
        thread::sleep(TICK);
    };

    println!("{report}");
    Ok(())
}

fn wait_for<T>(mut poll: impl FnMut() -> Option<T>) -> Option<T> {
    for _ in 0..200 {
        if let Some(value) = poll() {
            return Some(value);
        }
        thread::sleep(Duration::from_millis(25));
    }
    None
}
