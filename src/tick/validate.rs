use std::path::Path;

use crate::{PulseError, PulseResult};

use super::CURRENT_VERSION;
use super::SECONDS_PER_DAY;
use super::chunkmap::ChunkEntry;
use super::header::DbHeader;

/// Sanity-checks the fixed file parameters. Used both on create and on
/// every load.
pub fn check_parameters(header: &DbHeader) -> PulseResult<()> {
    if header.depth == 0 {
        return PulseError::corrupt("depth must be positive");
    }
    if header.scale == 0 {
        return PulseError::corrupt("scale must be positive");
    }
    if header.chunk_size == 0 || SECONDS_PER_DAY % header.chunk_size != 0 {
        return PulseError::corrupt("chunk_size must divide a day");
    }
    Ok(())
}

/// Verifies the structural invariants of a loaded file: version match,
/// chunk-map monotonicity in both offset and timestamp, every chunk's
/// first timestamp inside its bucket window, and parameter sanity.
/// Any failure means the file is corrupt (or from another engine
/// version) and must not be used.
pub fn validate(path: &Path, header: &DbHeader, chunks: &[ChunkEntry]) -> PulseResult<()> {
    if header.version != CURRENT_VERSION {
        return Err(PulseError::NeedMigration(path.to_owned()));
    }
    check_parameters(header)?;
    let chunk_ms = header.chunk_size as u64 * 1000;
    for window in chunks.windows(2) {
        if window[1].offset <= window[0].offset {
            return PulseError::corrupt("chunk map offsets are not increasing");
        }
        if window[1].first_timestamp <= window[0].first_timestamp {
            return PulseError::corrupt("chunk map timestamps are not increasing");
        }
    }
    for entry in chunks {
        let start = header.bucket_start_ms(entry.bucket);
        if entry.first_timestamp < start || entry.first_timestamp >= start + chunk_ms {
            return PulseError::corrupt(format!(
                "first timestamp {} of bucket {} is outside its window",
                entry.first_timestamp, entry.bucket
            ));
        }
    }
    Ok(())
}
