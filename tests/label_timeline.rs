use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use anyhow::Result;
use image::RgbImage;

use doorplate_reader::config::DoorplateConfig;
use doorplate_reader::detect::{ScriptedAnswer, ScriptedOracle};
use doorplate_reader::publish::RecordingPublisher;
use doorplate_reader::{
    Candidate, ComponentLogger, LabelPayload, LabelUpdate, LabelWorker, Pipeline, Publisher, Rect,
    ResultAggregator,
};

fn candidate(sequence: u64) -> Candidate {
    Candidate {
        bbox: Rect::new(100, 200, 60, 30),
        tight: RgbImage::new(48, 48),
        context: RgbImage::new(96, 48),
        frame_sequence: sequence,
    }
}

#[test]
fn noise_then_number_publishes_once() -> Result<()> {
    let mut config = DoorplateConfig::default();
    config.worker.channel_capacity = 16;
    config.aggregator.noise_threshold = 5;

    let mut answers = vec![ScriptedAnswer::Noise; 5];
    answers.push(ScriptedAnswer::classes(&[1, 2, 3]));
    let script = ScriptedOracle::new(answers);
    let oracle = script.clone();

    let mut worker = LabelWorker::spawn(
        Box::new(move || Ok(oracle.oracle())),
        &config.worker,
        ComponentLogger::root(),
    )?;
    worker.wait_ready(Duration::from_secs(5))?;
    let mut aggregator = ResultAggregator::new(&config.aggregator, ComponentLogger::root());
    let mut publisher = RecordingPublisher::new();

    for seq in 0..6 {
        worker.submit(candidate(seq));
    }

    let mut timeline = Vec::new();
    let mut streaks = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while timeline.len() < 6 && Instant::now() < deadline {
        let Some(result) = worker.try_result() else {
            std::thread::sleep(Duration::from_millis(1));
            continue;
        };
        if let LabelUpdate::Accepted(label) = aggregator.ingest(&result) {
            publisher.publish(&config.mqtt.topic, &LabelPayload::new(label))?;
        }
        timeline.push(aggregator.current_label().to_string());
        streaks.push(aggregator.noise_streak());
    }

    assert_eq!(timeline, vec!["", "", "", "", "", "123"]);
    assert_eq!(streaks, vec![1, 2, 3, 4, 5, 0]);
    assert_eq!(script.remaining(), 0);

    let published = publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "doorplate/label");
    assert_eq!(published[0].1, LabelPayload::new("123"));
    assert_eq!(
        serde_json::to_string(&published[0].1)?,
        r#"{"label":"123"}"#
    );

    let report = worker.join(Duration::from_secs(5))?;
    assert_eq!((report.noise, report.labels), (5, 1));
    Ok(())
}

#[test]
fn synthetic_stream_runs_to_completion() -> Result<()> {
    let mut config = DoorplateConfig::default();
    config.capture.device = "stub://corridor".into();
    config.capture.target_fps = 0;
    config.capture.frame_limit = Some(4);
    config.worker.drain_timeout = Duration::from_secs(2);

    let script = ScriptedOracle::new([]).with_fallback_classes(&[3, 1, 2, 10]);
    let oracle = script.clone();
    let recorder = RecordingPublisher::new();

    let pipeline = Pipeline::start_with_loader(
        config,
        Box::new(move || Ok(oracle.oracle())),
        Box::new(recorder.clone()),
        ComponentLogger::root(),
    )?;
    let report = pipeline.run(&AtomicBool::new(false))?;

    assert!(report.frames >= 1 && report.frames <= 4);
    assert_eq!(report.frames + report.capture.frames_dropped, 4);
    assert!(report.results >= 1);
    assert_eq!(report.final_label, "312-0");
    assert_eq!(report.clears, 0);
    assert_eq!(report.capture.frames_captured, 4);
    let worker = report.worker.expect("worker stopped in time");
    assert_eq!(worker.errors, 0);
    assert!(recorder.labels().iter().all(|label| label == "312-0"));
    Ok(())
}
