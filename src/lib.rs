//! Detection Relay
//!
//! Streams per-frame object detections from a producer process to any number of consumer
//! processes through one fixed-layout shared memory record.
//!
//! # Architecture
//!
//! Data flows strictly downstream:
//!
//! 1. **Ingest**: a `FrameSource` yields decoded frames until exhaustion.
//! 2. **Inference**: an `InferenceBackend` turns a frame into raw box/score rows.
//! 3. **Filter**: rows are thresholded for the target class and decoded to pixel boxes.
//! 4. **Suppress**: greedy non-maximum suppression removes duplicate boxes.
//! 5. **Encode**: survivors are capped at `DETECTION_CAPACITY` (weakest dropped, flagged).
//! 6. **Publish**: `ShmPublisher` overwrites the shared record under a seqlock.
//!
//! `StreamController` drives the loop and the `Initializing → Streaming → Completed → Closed`
//! lifecycle. Consumers attach with `RegionReader`, which never observes a torn record.
//!
//! # Module Structure
//!
//! - `frame`: decoded RGB frames
//! - `ingest`: frame sources (local files, synthetic clips)
//! - `detect`: inference backends and their raw outputs
//! - `postprocess`: filter, suppressor and encoder
//! - `shm`: record layout, publisher, reader
//! - `stream`: the per-frame controller
//! - `annotate`: consumer-side overlay that follows the producer frame by frame
//! - `config`, `error`: ambient configuration and error taxonomy

pub mod annotate;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod postprocess;
pub mod shm;
pub mod stream;

pub use config::{BackendKind, DetectorConfig, FilterSettings, InferenceSettings, StreamSettings};
pub use detect::{build_backend, InferenceBackend, OutputTensor, RawOutputs, StubBackend};
pub use error::{StreamError, StreamResult};
pub use frame::Frame;
pub use ingest::{FileConfig, FileSource, FrameSource};
pub use postprocess::{BoundingBox, Detection, FrameResult, DETECTION_CAPACITY, MAX_FRAME_NUMBER};
pub use shm::{remove_region, RegionReader, RegionSnapshot, ShmPublisher, RECORD_SIZE};
pub use stream::{ResultSink, StreamController, StreamReport, StreamState};
