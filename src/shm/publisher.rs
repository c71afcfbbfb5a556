use memmap2::{MmapOptions, MmapRaw};
use std::fs::OpenOptions;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use super::layout::{SharedRecord, RECORD_SIZE};
use crate::error::{StreamError, StreamResult};
use crate::postprocess::{FrameResult, DETECTION_CAPACITY};
use crate::stream::ResultSink;

/// Single writer of the shared detection record.
///
/// # Ownership
///
/// The backing object belongs to the operating environment, not to the producer. `close` (and
/// `Drop`) only unmap this process's view; consumers may keep reading after the producer has
/// exited. Deallocation is the separate `shm::remove_region` operation, which the producer
/// never calls.
pub struct ShmPublisher {
    path: PathBuf,
    map: Option<MmapRaw>,
    completed: bool,
    frames_published: u64,
}

impl ShmPublisher {
    /// Create the region if absent or attach to an existing one, then reset its body.
    ///
    /// The record layout is fixed, so `capacity` must equal `DETECTION_CAPACITY`.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> StreamResult<Self> {
        let path = path.as_ref().to_path_buf();
        if capacity != DETECTION_CAPACITY {
            return Err(StreamError::Resource(format!(
                "record layout holds exactly {} detections, requested {}",
                DETECTION_CAPACITY, capacity
            )));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| resource_err(&path, "create parent", e))?;
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(false);
        #[cfg(unix)]
        options.mode(0o644);
        let file = options
            .open(&path)
            .map_err(|e| resource_err(&path, "open", e))?;

        let len = file
            .metadata()
            .map_err(|e| resource_err(&path, "stat", e))?
            .len();
        if len == 0 {
            file.set_len(RECORD_SIZE as u64)
                .map_err(|e| resource_err(&path, "size", e))?;
        } else if len != RECORD_SIZE as u64 {
            return Err(StreamError::Resource(format!(
                "existing region {} is {} bytes, expected {}",
                path.display(),
                len,
                RECORD_SIZE
            )));
        }

        let map = MmapOptions::new()
            .len(RECORD_SIZE)
            .map_raw(&file)
            .map_err(|e| resource_err(&path, "map", e))?;

        let publisher = Self {
            path,
            map: Some(map),
            completed: false,
            frames_published: 0,
        };
        let record = publisher.record()?;
        record.write_with(SharedRecord::clear_body);
        log::info!(
            "shared region ready at {} ({} bytes, sequence {})",
            publisher.path.display(),
            RECORD_SIZE,
            record.sequence()
        );
        Ok(publisher)
    }

    /// Publish one frame. Readers observe either the previous or this record, never a mix.
    pub fn publish(&mut self, result: &FrameResult) -> StreamResult<()> {
        if self.completed {
            return Err(StreamError::Resource(
                "stream already marked complete".to_string(),
            ));
        }
        let frame_number = i32::try_from(result.frame_number).map_err(|_| {
            StreamError::Resource(format!(
                "frame number {} does not fit the record",
                result.frame_number
            ))
        })?;
        let count = result.detections.len().min(DETECTION_CAPACITY);
        let truncated = result.truncated || result.detections.len() > DETECTION_CAPACITY;

        let record = self.record()?;
        record.write_with(|r| r.store_frame(frame_number, &result.detections[..count], truncated));
        self.frames_published += 1;
        Ok(())
    }

    /// Set the completion flag. Final write; later `publish` calls fail.
    pub fn mark_complete(&mut self) -> StreamResult<()> {
        if self.completed {
            return Ok(());
        }
        let record = self.record()?;
        record.write_with(SharedRecord::store_complete);
        self.completed = true;
        log::info!(
            "marked {} complete after {} published frames",
            self.path.display(),
            self.frames_published
        );
        Ok(())
    }

    /// Unmap this process's view. The region itself persists. Idempotent.
    pub fn close(&mut self) -> StreamResult<()> {
        let Some(map) = self.map.take() else {
            return Ok(());
        };
        map.flush()
            .map_err(|e| resource_err(&self.path, "flush", e))?;
        log::info!("detached from {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.map.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn frames_published(&self) -> u64 {
        self.frames_published
    }

    /// Current seqlock counter. Two per completed write.
    pub fn sequence(&self) -> StreamResult<u64> {
        Ok(self.record()?.sequence())
    }

    fn record(&self) -> StreamResult<&SharedRecord> {
        let map = self
            .map
            .as_ref()
            .ok_or_else(|| StreamError::Resource("region is no longer mapped".to_string()))?;
        // SAFETY: the mapping is exactly RECORD_SIZE bytes, page aligned, and lives as long as
        // the borrow of `self`.
        Ok(unsafe { SharedRecord::from_ptr(map.as_mut_ptr()) })
    }
}

impl ResultSink for ShmPublisher {
    fn publish(&mut self, result: &FrameResult) -> StreamResult<()> {
        ShmPublisher::publish(self, result)
    }

    fn mark_complete(&mut self) -> StreamResult<()> {
        ShmPublisher::mark_complete(self)
    }

    fn close(&mut self) -> StreamResult<()> {
        ShmPublisher::close(self)
    }
}

impl Drop for ShmPublisher {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("failed to detach from {}: {}", self.path.display(), e);
        }
    }
}

fn resource_err(path: &Path, action: &str, err: std::io::Error) -> StreamError {
    StreamError::Resource(format!("{} {}: {}", action, path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocess::{BoundingBox, Detection};

    fn frame(frame_number: u32, n: usize) -> FrameResult {
        FrameResult {
            frame_number,
            detections: (0..n)
                .map(|i| Detection {
                    bbox: BoundingBox::new(i as f32, 0.0, 1.0, 1.0),
                    confidence: 0.9,
                })
                .collect(),
            truncated: false,
        }
    }

    #[test]
    fn creates_region_with_record_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        let publisher = ShmPublisher::open(&path, DETECTION_CAPACITY).unwrap();
        assert!(publisher.is_open());
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            RECORD_SIZE as u64
        );
    }

    #[test]
    fn rejects_foreign_capacity_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        assert!(matches!(
            ShmPublisher::open(&path, 10),
            Err(StreamError::Resource(_))
        ));

        std::fs::write(&path, [0u8; 16]).unwrap();
        assert!(matches!(
            ShmPublisher::open(&path, DETECTION_CAPACITY),
            Err(StreamError::Resource(_))
        ));
    }

    #[test]
    fn reopening_is_idempotent_and_sequence_keeps_growing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");

        let mut first = ShmPublisher::open(&path, DETECTION_CAPACITY).unwrap();
        first.publish(&frame(1, 2)).unwrap();
        let seq = first.sequence().unwrap();
        first.close().unwrap();

        let second = ShmPublisher::open(&path, DETECTION_CAPACITY).unwrap();
        assert!(second.sequence().unwrap() > seq);
        assert_eq!(second.sequence().unwrap() % 2, 0);
    }

    #[test]
    fn publish_after_close_is_a_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut publisher = ShmPublisher::open(dir.path().join("region"), DETECTION_CAPACITY).unwrap();
        publisher.close().unwrap();
        publisher.close().unwrap();
        assert!(matches!(
            publisher.publish(&frame(1, 0)),
            Err(StreamError::Resource(_))
        ));
    }

    #[test]
    fn publish_after_completion_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut publisher = ShmPublisher::open(dir.path().join("region"), DETECTION_CAPACITY).unwrap();
        publisher.publish(&frame(1, 1)).unwrap();
        publisher.mark_complete().unwrap();
        publisher.mark_complete().unwrap();
        assert!(publisher.publish(&frame(2, 1)).is_err());
        assert_eq!(publisher.frames_published(), 1);
    }

    #[test]
    fn backing_file_keeps_payload_fields_at_the_front() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        let mut publisher = ShmPublisher::open(&path, DETECTION_CAPACITY).unwrap();
        publisher.publish(&frame(7, 1)).unwrap();
        publisher.mark_complete().unwrap();
        publisher.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), RECORD_SIZE);
        assert_eq!(i32::from_ne_bytes(bytes[0..4].try_into().unwrap()), 7);
        assert_eq!(i32::from_ne_bytes(bytes[4..8].try_into().unwrap()), 1);
        assert_eq!(f32::from_ne_bytes(bytes[24..28].try_into().unwrap()), 0.9);
        assert_eq!(bytes[1008], 1);
        let sequence = u64::from_ne_bytes(bytes[1016..1024].try_into().unwrap());
        assert_eq!(sequence % 2, 0);
        assert!(sequence >= 6);
    }

    #[test]
    fn close_keeps_backing_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        let mut publisher = ShmPublisher::open(&path, DETECTION_CAPACITY).unwrap();
        publisher.close().unwrap();
        drop(publisher);
        assert!(path.exists());
    }
}
