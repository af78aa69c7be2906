use byteorder::{BigEndian, ByteOrder};

use crate::{PulseError, PulseResult};

use super::OFFSETLEN;

/// One occupied bucket of the chunk map.
///
/// `offset` is relative to the start of the chunk map, exactly as the
/// cell stores it; since the map itself sits at the front of that
/// region, a zero cell can only mean "empty bucket".
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ChunkEntry {
	pub bucket: u32,
	pub first_timestamp: u64,
	pub offset: u32,
}

/// Byte position of a bucket's cell, relative to the start of the map.
pub const fn cell_offset(bucket: u32) -> u64 {
	(OFFSETLEN as u64 / 8) * bucket as u64
}

/// Scans the cell array at the front of `data` and returns the
/// `(bucket, offset)` pairs of the non-zero cells, in bucket order.
pub fn scan_cells(data: &[u8], count: u32) -> PulseResult<Vec<(u32, u32)>> {
	let map_len = count as usize * 4;
	if data.len() < map_len {
		return Err(PulseError::Corrupt("file too short for its chunk map".into()));
	}
	let mut cells = Vec::new();
	for bucket in 0..count {
		let cell = BigEndian::read_u32(&data[bucket as usize * 4..]);
		if cell != 0 {
			cells.push((bucket, cell));
		}
	}
	Ok(cells)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scan_skips_empty_cells() {
		let mut data = vec![0u8; 4 * 4];
		BigEndian::write_u32(&mut data[4..], 16);
		BigEndian::write_u32(&mut data[12..], 900);
		assert_eq!(vec![(1, 16), (3, 900)], scan_cells(&data, 4).unwrap());
	}

	#[test]
	fn short_map_is_corrupt() {
		let data = vec![0u8; 7];
		assert!(matches!(
			scan_cells(&data, 2),
			Err(PulseError::Corrupt(_))
		));
	}
}
