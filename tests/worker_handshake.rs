use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::bounded;
use image::RgbImage;

use doorplate_reader::config::{DoorplateConfig, WorkerSettings};
use doorplate_reader::detect::{ScriptedAnswer, ScriptedOracle};
use doorplate_reader::worker::SubmitOutcome;
use doorplate_reader::{Candidate, ComponentLogger, InferenceResult, LabelWorker, Rect, WorkerState};

fn candidate(sequence: u64) -> Candidate {
    Candidate {
        bbox: Rect::new(10, 20, 60, 30),
        tight: RgbImage::new(48, 48),
        context: RgbImage::new(96, 48),
        frame_sequence: sequence,
    }
}

fn settings(capacity: usize) -> WorkerSettings {
    let mut settings = DoorplateConfig::default().worker;
    settings.channel_capacity = capacity;
    settings
}

fn wait_for_state(
    handle: &doorplate_reader::WorkerHandle,
    state: WorkerState,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if handle.state() == state {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn ready_is_signalled_once_after_loading() -> Result<()> {
    let script = ScriptedOracle::new([ScriptedAnswer::classes(&[7])]);
    let oracle = script.clone();
    let mut handle = LabelWorker::spawn(
        Box::new(move || Ok(oracle.oracle())),
        &settings(4),
        ComponentLogger::root(),
    )?;

    handle.wait_ready(Duration::from_secs(5))?;
    assert!(handle.is_ready());
    // A second wait returns immediately from the remembered signal.
    handle.wait_ready(Duration::from_millis(1))?;
    assert!(handle.is_ready());
    assert!(wait_for_state(&handle, WorkerState::Running, Duration::from_secs(5)));

    assert_eq!(handle.submit(candidate(1)), SubmitOutcome::Queued);
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut result = None;
    while result.is_none() && Instant::now() < deadline {
        result = handle.try_result();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(result, Some(InferenceResult::Label("7".into())));

    let report = handle.join(Duration::from_secs(5))?;
    assert_eq!(report.final_state, Some(WorkerState::Stopped));
    assert!(report.failure.is_none());
    Ok(())
}

#[test]
fn load_failure_is_reported_by_wait_ready() -> Result<()> {
    let mut handle = LabelWorker::spawn(
        Box::new(|| Err(anyhow::anyhow!("noise model not found: /models/noise.onnx"))),
        &settings(4),
        ComponentLogger::root(),
    )?;

    let err = handle
        .wait_ready(Duration::from_secs(5))
        .expect_err("load must fail");
    let message = format!("{:#}", err);
    assert!(message.contains("failed to load models"));
    assert!(message.contains("noise model not found"));
    assert!(!handle.is_ready());
    assert_eq!(handle.state(), WorkerState::Stopped);
    Ok(())
}

#[test]
fn wait_ready_times_out_while_loading() -> Result<()> {
    let (release_tx, release_rx) = bounded::<()>(1);
    let mut handle = LabelWorker::spawn(
        Box::new(move || {
            let _ = release_rx.recv();
            Ok(ScriptedOracle::default().oracle())
        }),
        &settings(4),
        ComponentLogger::root(),
    )?;

    let err = handle
        .wait_ready(Duration::from_millis(50))
        .expect_err("still loading");
    assert!(err.to_string().contains("not ready"));
    assert_eq!(handle.state(), WorkerState::Loading);

    release_tx.send(())?;
    handle.wait_ready(Duration::from_secs(5))?;
    let report = handle.join(Duration::from_secs(5))?;
    assert_eq!(report.final_state, Some(WorkerState::Stopped));
    Ok(())
}

#[test]
fn full_channel_drops_newest_without_blocking() -> Result<()> {
    let capacity = 3;
    let (release_tx, release_rx) = bounded::<()>(1);
    let mut handle = LabelWorker::spawn(
        Box::new(move || {
            let _ = release_rx.recv();
            Ok(ScriptedOracle::default().oracle())
        }),
        &settings(capacity),
        ComponentLogger::root(),
    )?;
    assert_eq!(handle.capacity(), Some(capacity));

    for seq in 0..capacity as u64 {
        assert_eq!(handle.submit(candidate(seq)), SubmitOutcome::Queued);
    }
    assert_eq!(handle.pending(), capacity);

    let started = Instant::now();
    assert_eq!(handle.submit(candidate(99)), SubmitOutcome::Dropped);
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(handle.pending(), capacity);
    assert_eq!(handle.dropped(), 1);
    assert_eq!(handle.outstanding(), capacity as u64);

    release_tx.send(())?;
    handle.wait_ready(Duration::from_secs(5))?;

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut results = Vec::new();
    while results.len() < capacity && Instant::now() < deadline {
        match handle.try_result() {
            Some(result) => results.push(result),
            None => std::thread::sleep(Duration::from_millis(1)),
        }
    }
    assert_eq!(results, vec![InferenceResult::Noise; capacity]);

    let report = handle.join(Duration::from_secs(5))?;
    assert_eq!(report.processed, capacity as u64);
    assert_eq!(report.dropped, 1);
    Ok(())
}

#[test]
fn stop_during_idle_exits_promptly() -> Result<()> {
    let mut handle = LabelWorker::spawn(
        Box::new(|| Ok(ScriptedOracle::default().oracle())),
        &settings(4),
        ComponentLogger::root(),
    )?;
    handle.wait_ready(Duration::from_secs(5))?;

    let started = Instant::now();
    let report = handle.join(Duration::from_secs(2))?;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.processed, 0);
    assert_eq!(report.final_state, Some(WorkerState::Stopped));
    Ok(())
}
