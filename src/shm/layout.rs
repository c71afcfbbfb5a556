//! Fixed layout of the shared detection record.
//!
//! ```text
//! offset  size  field
//! 0       4     frame_number         i32
//! 4       4     num_detections       i32   (0..=50)
//! 8       1000  detections[50]       { x, y, width, height, confidence: f32 }
//! 1008    1     processing_complete  u8
//! 1009    1     truncated            u8
//! 1010    6     reserved (zero)
//! 1016    8     sequence             u64   (odd while a write is in progress)
//! ```
//!
//! Native byte order, no implicit padding. Every field is an atomic so the record can be
//! shared with other processes without data races; the sequence counter turns the body into a
//! seqlock with a single writer.

use std::mem::{align_of, offset_of, size_of};
use std::sync::atomic::{fence, AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::postprocess::{BoundingBox, Detection, DETECTION_CAPACITY};

/// Values stored per detection slot.
pub const DETECTION_FIELDS: usize = 5;

/// Total size of the mapped record in bytes.
pub const RECORD_SIZE: usize = 1024;

/// The sequence counter sits in the last eight bytes, after every payload field.
pub const SEQUENCE_OFFSET: usize = RECORD_SIZE - 8;

#[repr(C)]
pub(crate) struct SharedRecord {
    frame_number: AtomicI32,
    num_detections: AtomicI32,
    detections: [[AtomicU32; DETECTION_FIELDS]; DETECTION_CAPACITY],
    processing_complete: AtomicU8,
    truncated: AtomicU8,
    reserved: [AtomicU8; 6],
    sequence: AtomicU64,
}

const _: () = assert!(size_of::<SharedRecord>() == RECORD_SIZE);
const _: () = assert!(offset_of!(SharedRecord, frame_number) == 0);
const _: () = assert!(offset_of!(SharedRecord, num_detections) == 4);
const _: () = assert!(offset_of!(SharedRecord, detections) == 8);
const _: () = assert!(offset_of!(SharedRecord, processing_complete) == 1008);
const _: () = assert!(offset_of!(SharedRecord, truncated) == 1009);
const _: () = assert!(offset_of!(SharedRecord, sequence) == SEQUENCE_OFFSET);

/// Body of the record as seen by a reader after a consistent read.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RecordBody {
    pub sequence: u64,
    pub frame_number: i32,
    pub detections: Vec<Detection>,
    pub processing_complete: bool,
    pub truncated: bool,
}

/// Outcome of one optimistic read attempt.
pub(crate) enum ReadAttempt {
    Consistent(RecordBody),
    /// Writer active or sequence moved underneath us.
    Torn,
    /// Stable but `num_detections` out of range: not written by this protocol.
    Corrupt(i32),
}

impl SharedRecord {
    /// Reinterpret a mapping as the shared record.
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least `RECORD_SIZE` mapped bytes, aligned for `SharedRecord`,
    /// that stay mapped for `'a`.
    pub(crate) unsafe fn from_ptr<'a>(ptr: *const u8) -> &'a SharedRecord {
        debug_assert_eq!(ptr as usize % align_of::<SharedRecord>(), 0);
        &*(ptr as *const SharedRecord)
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Run `write` inside a seqlock write section. Single writer only.
    pub(crate) fn write_with<F: FnOnce(&SharedRecord)>(&self, write: F) {
        let current = self.sequence.load(Ordering::Relaxed);
        // A producer that died mid-write leaves the counter odd.
        let begin = if current % 2 == 0 {
            current.wrapping_add(1)
        } else {
            current.wrapping_add(2)
        };
        self.sequence.store(begin, Ordering::Relaxed);
        fence(Ordering::Release);

        write(self);

        self.sequence.store(begin.wrapping_add(1), Ordering::Release);
    }

    /// Zero every body field. Call inside `write_with`.
    pub(crate) fn clear_body(&self) {
        self.frame_number.store(0, Ordering::Relaxed);
        self.num_detections.store(0, Ordering::Relaxed);
        for slot in &self.detections {
            for field in slot {
                field.store(0, Ordering::Relaxed);
            }
        }
        self.processing_complete.store(0, Ordering::Relaxed);
        self.truncated.store(0, Ordering::Relaxed);
        for byte in &self.reserved {
            byte.store(0, Ordering::Relaxed);
        }
    }

    /// Store one frame. Call inside `write_with`. `detections` must fit the capacity.
    pub(crate) fn store_frame(&self, frame_number: i32, detections: &[Detection], truncated: bool) {
        debug_assert!(detections.len() <= DETECTION_CAPACITY);
        self.frame_number.store(frame_number, Ordering::Relaxed);
        for (slot, det) in self.detections.iter().zip(detections) {
            let values = [
                det.bbox.x,
                det.bbox.y,
                det.bbox.width,
                det.bbox.height,
                det.confidence,
            ];
            for (field, value) in slot.iter().zip(values) {
                field.store(value.to_bits(), Ordering::Relaxed);
            }
        }
        self.num_detections
            .store(detections.len() as i32, Ordering::Relaxed);
        self.truncated.store(truncated as u8, Ordering::Relaxed);
    }

    /// Store the completion flag. Call inside `write_with`.
    pub(crate) fn store_complete(&self) {
        self.processing_complete.store(1, Ordering::Relaxed);
    }

    /// One optimistic read: sequence, body, fence, sequence again.
    pub(crate) fn try_read(&self) -> ReadAttempt {
        let before = self.sequence.load(Ordering::Acquire);
        if before % 2 == 1 {
            return ReadAttempt::Torn;
        }

        let frame_number = self.frame_number.load(Ordering::Relaxed);
        let count = self.num_detections.load(Ordering::Relaxed);
        let processing_complete = self.processing_complete.load(Ordering::Relaxed) != 0;
        let truncated = self.truncated.load(Ordering::Relaxed) != 0;
        let in_range = usize::try_from(count)
            .ok()
            .filter(|&n| n <= DETECTION_CAPACITY);
        let detections: Vec<Detection> = self.detections[..in_range.unwrap_or(0)]
            .iter()
            .map(|slot| {
                let v: [f32; DETECTION_FIELDS] =
                    std::array::from_fn(|i| f32::from_bits(slot[i].load(Ordering::Relaxed)));
                Detection {
                    bbox: BoundingBox {
                        x: v[0],
                        y: v[1],
                        width: v[2],
                        height: v[3],
                    },
                    confidence: v[4],
                }
            })
            .collect();

        fence(Ordering::Acquire);
        let after = self.sequence.load(Ordering::Relaxed);
        if before != after {
            return ReadAttempt::Torn;
        }
        if in_range.is_none() {
            return ReadAttempt::Corrupt(count);
        }

        ReadAttempt::Consistent(RecordBody {
            sequence: before,
            frame_number,
            detections,
            processing_complete,
            truncated,
        })
    }
}
