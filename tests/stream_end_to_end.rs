use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use detection_relay::postprocess::iou;
use detection_relay::{
    FileConfig, FileSource, FilterSettings, Frame, FrameResult, InferenceBackend, OutputTensor,
    RawOutputs, RegionReader, RegionSnapshot, ResultSink, ShmPublisher, StreamController,
    StreamResult, StreamSettings, StubBackend, DETECTION_CAPACITY,
};

/// Publishes through the real region and records what a consumer sees after each write.
struct ObservedPublisher {
    inner: ShmPublisher,
    reader: RegionReader,
    seen: Vec<RegionSnapshot>,
}

impl ObservedPublisher {
    fn open(path: &Path) -> Self {
        let inner = ShmPublisher::open(path, DETECTION_CAPACITY).expect("open region");
        let reader = RegionReader::open(path).expect("attach reader");
        Self {
            inner,
            reader,
            seen: Vec::new(),
        }
    }
}

impl ResultSink for ObservedPublisher {
    fn publish(&mut self, result: &FrameResult) -> StreamResult<()> {
        self.inner.publish(result)?;
        self.seen.push(self.reader.snapshot()?);
        Ok(())
    }

    fn mark_complete(&mut self) -> StreamResult<()> {
        self.inner.mark_complete()
    }

    fn close(&mut self) -> StreamResult<()> {
        self.inner.close()
    }
}

struct ScriptedBackend {
    script: VecDeque<RawOutputs>,
}

impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(&mut self, _frame: &Frame) -> anyhow::Result<RawOutputs> {
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

fn quiet() -> StreamSettings {
    StreamSettings {
        frame_delay: Duration::ZERO,
        progress_every: 0,
    }
}

/// 60 person boxes on a 10x6 grid; no two overlap. Confidence rises with the index.
fn crowd() -> RawOutputs {
    let rows: Vec<Vec<f32>> = (0..60)
        .map(|i| {
            let cx = ((i % 10) as f32 + 0.5) / 10.0;
            let cy = ((i / 10) as f32 + 0.5) / 6.0;
            vec![cx, cy, 0.05, 0.1, 1.0, 0.6 + i as f32 * 0.005, 0.0]
        })
        .collect();
    RawOutputs::new(vec![OutputTensor::from_rows(&rows).unwrap()])
}

#[test]
fn crowded_frame_is_truncated_and_empty_frames_publish_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("detections");

    let source = FileSource::open(FileConfig::new("stub://crowd?frames=3")).unwrap();
    let backend = ScriptedBackend {
        script: vec![RawOutputs::empty(), crowd(), RawOutputs::empty()].into(),
    };
    let sink = ObservedPublisher::open(&path);
    let mut controller =
        StreamController::new(source, backend, sink, FilterSettings::default(), quiet());

    let report = controller.run().unwrap();
    assert_eq!(report.frames_published, 3);
    assert_eq!(report.truncated_frames, 1);

    let seen = &controller.sink().seen;
    let numbers: Vec<i32> = seen.iter().map(|s| s.frame_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    assert_eq!(seen[0].num_detections(), 0);
    assert!(!seen[0].truncated);

    let crowded = &seen[1];
    assert_eq!(crowded.num_detections(), DETECTION_CAPACITY);
    assert!(crowded.truncated);
    // The ten weakest boxes (indices 0..10) are the ones dropped.
    let weakest_kept = 0.6 + 10.0 * 0.005;
    assert!(crowded
        .detections
        .iter()
        .all(|d| d.confidence >= weakest_kept - 1e-6));
    assert!(crowded
        .detections
        .windows(2)
        .all(|w| w[0].confidence >= w[1].confidence));

    assert_eq!(seen[2].num_detections(), 0);
    assert!(!seen[2].truncated);
}

#[test]
fn completion_flag_is_final_and_record_stays_frozen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("detections");

    let source = FileSource::open(FileConfig::new("stub://walk?frames=5")).unwrap();
    let publisher = ShmPublisher::open(&path, DETECTION_CAPACITY).unwrap();
    let mut controller = StreamController::new(
        source,
        StubBackend::new(),
        publisher,
        FilterSettings::default(),
        quiet(),
    );
    let report = controller.run().unwrap();
    assert_eq!(report.frames_published, 5);
    assert!(!controller.sink().is_open());

    let mut reader = RegionReader::open(&path).unwrap();
    let first = reader.snapshot().unwrap();
    assert!(first.processing_complete);
    assert_eq!(first.frame_number, 5);

    std::thread::sleep(Duration::from_millis(20));
    let second = reader.snapshot().unwrap();
    assert_eq!(first, second);
    assert!(path.exists());
}

#[test]
fn stub_pipeline_publishes_thresholded_suppressed_detections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("detections");

    let source = FileSource::open(FileConfig::new("stub://walk?frames=4")).unwrap();
    let sink = ObservedPublisher::open(&path);
    let filter = FilterSettings::default();
    let mut controller = StreamController::new(source, StubBackend::new(), sink, filter, quiet());
    controller.run().unwrap();

    for snapshot in &controller.sink().seen {
        // One walker survives: its weaker duplicate is suppressed and the rest are filtered.
        assert_eq!(snapshot.num_detections(), 1);
        for det in &snapshot.detections {
            assert!(det.confidence > filter.conf_threshold);
        }
        for (i, a) in snapshot.detections.iter().enumerate() {
            for b in &snapshot.detections[i + 1..] {
                assert!(iou(&a.bbox, &b.bbox) <= filter.nms_threshold);
            }
        }
    }
}
