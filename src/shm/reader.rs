use memmap2::{MmapOptions, MmapRaw};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::layout::{ReadAttempt, SharedRecord, RECORD_SIZE};
use crate::error::{StreamError, StreamResult};
use crate::postprocess::Detection;

/// Attempts before a snapshot gives up on a region that never settles.
pub const MAX_READ_ATTEMPTS: u32 = 100_000;
const SPINS_BEFORE_YIELD: u32 = 64;

/// A consistent copy of the shared record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegionSnapshot {
    pub sequence: u64,
    pub frame_number: i32,
    pub detections: Vec<Detection>,
    pub truncated: bool,
    pub processing_complete: bool,
}

impl RegionSnapshot {
    pub fn num_detections(&self) -> usize {
        self.detections.len()
    }

    /// Nothing has been published since the region was (re)initialized.
    pub fn is_pristine(&self) -> bool {
        self.frame_number == 0 && !self.processing_complete
    }
}

/// Read-only consumer view of the shared record.
///
/// Readers never write to the region. `snapshot` retries until it sees the same even sequence
/// number before and after copying the body.
pub struct RegionReader {
    path: PathBuf,
    map: MmapRaw,
    last_sequence: Option<u64>,
    torn_reads: u64,
}

impl RegionReader {
    /// Attach to an existing region.
    pub fn open(path: impl AsRef<Path>) -> StreamResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            StreamError::Resource(format!("open {}: {}", path.display(), e))
        })?;
        let len = file.metadata()?.len();
        if len != RECORD_SIZE as u64 {
            return Err(StreamError::Resource(format!(
                "{} is {} bytes, expected a {} byte detection record",
                path.display(),
                len,
                RECORD_SIZE
            )));
        }
        let map = MmapOptions::new()
            .len(RECORD_SIZE)
            .map_raw_read_only(&file)
            .map_err(|e| StreamError::Resource(format!("map {}: {}", path.display(), e)))?;

        Ok(Self {
            path,
            map,
            last_sequence: None,
            torn_reads: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads discarded because a write overlapped them.
    pub fn torn_reads(&self) -> u64 {
        self.torn_reads
    }

    /// Take a consistent snapshot of the record.
    pub fn snapshot(&mut self) -> StreamResult<RegionSnapshot> {
        // SAFETY: the mapping is RECORD_SIZE bytes, page aligned, owned by `self`, and only
        // loaded from.
        let record = unsafe { SharedRecord::from_ptr(self.map.as_ptr()) };
        let mut last_corrupt = None;
        for attempt in 0..MAX_READ_ATTEMPTS {
            match record.try_read() {
                ReadAttempt::Consistent(body) => {
                    return Ok(RegionSnapshot {
                        sequence: body.sequence,
                        frame_number: body.frame_number,
                        detections: body.detections,
                        truncated: body.truncated,
                        processing_complete: body.processing_complete,
                    });
                }
                ReadAttempt::Torn => self.torn_reads += 1,
                ReadAttempt::Corrupt(count) => last_corrupt = Some(count),
            }
            if attempt % SPINS_BEFORE_YIELD == SPINS_BEFORE_YIELD - 1 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
        Err(StreamError::Resource(match last_corrupt {
            Some(count) => format!(
                "{} holds an invalid detection count {}",
                self.path.display(),
                count
            ),
            None => format!(
                "{} stayed mid-write for {} attempts",
                self.path.display(),
                MAX_READ_ATTEMPTS
            ),
        }))
    }

    /// Snapshot only when something new happened since the last snapshot returned here: a
    /// frame was published or the completion flag was set.
    ///
    /// Freshness follows the sequence counter, which keeps growing when a producer re-attaches,
    /// so a restarted stream is reported even if it repeats frame numbers. A freshly reset
    /// record carries nothing to report and is skipped.
    pub fn poll_fresh(&mut self) -> StreamResult<Option<RegionSnapshot>> {
        let snapshot = self.snapshot()?;
        if self.last_sequence == Some(snapshot.sequence) || snapshot.is_pristine() {
            return Ok(None);
        }
        self.last_sequence = Some(snapshot.sequence);
        Ok(Some(snapshot))
    }
}
