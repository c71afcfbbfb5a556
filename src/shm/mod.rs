//! Shared memory transport for detection records.
//!
//! One producer (`ShmPublisher`) overwrites a single fixed-size record in place; any number
//! of consumers (`RegionReader`) poll it. There is no lock between them: the record ends
//! with a sequence counter that is odd while a write is in progress, and readers retry until
//! they copy the body between two identical even values. Payload fields keep their fixed
//! offsets from byte 0, so plain consumers that ignore the counter still parse the record.
//!
//! The backing object is a file-backed shared mapping (under `/dev/shm` on Linux by default).
//! It outlives every process that maps it. Removing it is an explicit operation.

mod layout;
mod publisher;
mod reader;

pub use layout::{DETECTION_FIELDS, RECORD_SIZE, SEQUENCE_OFFSET};
pub use publisher::ShmPublisher;
pub use reader::{RegionReader, RegionSnapshot, MAX_READ_ATTEMPTS};

use std::path::Path;

use crate::error::{StreamError, StreamResult};

/// Deallocate the region's backing object.
///
/// Never called by the producer. Returns `false` when there was nothing to remove. Processes
/// that still map the region keep their view until they unmap it.
pub fn remove_region(path: impl AsRef<Path>) -> StreamResult<bool> {
    let path = path.as_ref();
    match std::fs::remove_file(path) {
        Ok(()) => {
            log::info!("removed shared region {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StreamError::Resource(format!(
            "remove {}: {}",
            path.display(),
            e
        ))),
    }
}
