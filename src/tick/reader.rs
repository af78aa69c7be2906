use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::event::Event;
use crate::{PulseError, PulseResult};

use super::candle::Candle;
use super::chunkmap::{self, ChunkEntry};
use super::codec::{self, RowKind};
use super::header::DbHeader;
use super::iter::EventIter;
use super::validate;

/// A database file loaded for reading.
///
/// Opening parses the header, decodes the candle slot, loads the chunk
/// map (peeking each occupied chunk's first timestamp), validates the
/// result, and then keeps only an immutable in-memory copy of the
/// region from the chunk map to EOF. The file handle is released before
/// `open` returns, so readers and iterators never hold the file itself.
pub struct DbReader {
	path: PathBuf,
	header: DbHeader,
	candle: Option<Candle>,
	chunks: Vec<ChunkEntry>,
	/// Chunk map plus row stream. Chunk-map offsets index directly into
	/// this buffer because both are relative to the start of the map.
	data: Vec<u8>,
	/// Absolute file position of the chunk map.
	chunk_map_offset: u64,
}

/// One value of a `file_info` report.
#[derive(Debug, PartialEq, Clone)]
pub enum Info {
	Int(i64),
	Str(String),
	Bool(bool),
	Date(NaiveDate),
	Path(PathBuf),
	/// Total bucket count and which buckets hold data.
	Presence { chunks: u32, occupied: Vec<u32> },
	Candle(Option<Candle>),
}

impl DbReader {
	/// Opens a file for reading. A file written by a different engine
	/// version is refused with [PulseError::NeedMigration].
	pub fn open<P: AsRef<Path>>(path: P) -> PulseResult<Self> {
		Self::open_with(path, false)
	}

	/// Opens a file for reading even if its version does not match the
	/// engine's. The validator is skipped entirely in that case, so the
	/// caller takes the file as it finds it.
	pub fn open_migrating<P: AsRef<Path>>(path: P) -> PulseResult<Self> {
		Self::open_with(path, true)
	}

	pub fn open_with<P: AsRef<Path>>(path: P, allow_migration: bool) -> PulseResult<Self> {
		let path = path.as_ref();
		if !path.is_file() {
			return Err(PulseError::Nofile(path.to_owned()));
		}
		let mut bytes = fs::read(path)?;
		let (header, header_len) = DbHeader::parse(&bytes)?;
		let chunk_map_offset = header_len + header.candle_size() as usize;
		if bytes.len() < chunk_map_offset + header.chunk_map_size() as usize {
			return PulseError::corrupt("file too short for its chunk map");
		}
		let candle = if header.have_candle {
			Candle::read_slot(&mut &bytes[header_len..chunk_map_offset])?
		} else {
			None
		};
		let data = bytes.split_off(chunk_map_offset);
		let chunks = load_chunks(&header, &data)?;
		if !allow_migration {
			validate::validate(path, &header, &chunks)?;
		}
		tracing::debug!(
			path = %path.display(),
			stock = %header.stock,
			chunks = chunks.len(),
			"opened for read"
		);
		Ok(Self {
			path: path.to_owned(),
			header,
			candle,
			chunks,
			data,
			chunk_map_offset: chunk_map_offset as u64,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn header(&self) -> &DbHeader {
		&self.header
	}

	pub fn candle(&self) -> Option<Candle> {
		self.candle
	}

	pub fn chunks(&self) -> &[ChunkEntry] {
		&self.chunks
	}

	pub(crate) fn data(&self) -> &[u8] {
		&self.data
	}

	/// Absolute file position of the chunk map, for the appender's
	/// reopen path.
	pub(crate) fn chunk_map_offset(&self) -> u64 {
		self.chunk_map_offset
	}

	/// Offset of the first row in [Self::data], just past the chunk map.
	pub(crate) fn rows_offset(&self) -> usize {
		self.header.chunk_map_size() as usize
	}

	/// A fresh cursor over the whole file. Iterators are independent;
	/// any number of them can run over one reader.
	pub fn iter(&self) -> EventIter<'_> {
		EventIter::new(self)
	}

	/// Decodes every event in the file, in file order.
	pub fn all_events(&self) -> PulseResult<Vec<Event>> {
		self.iter().all_events()
	}

	/// Selected header fields plus derived views, by field name. Unknown
	/// names are skipped.
	pub fn info(&self, fields: &[&str]) -> Vec<(String, Info)> {
		let mut report = Vec::with_capacity(fields.len());
		for &field in fields {
			let value = match field {
				"version" => Info::Int(self.header.version as i64),
				"stock" => Info::Str(self.header.stock.clone()),
				"date" => Info::Date(self.header.date),
				"depth" => Info::Int(self.header.depth as i64),
				"scale" => Info::Int(self.header.scale as i64),
				"chunk_size" => Info::Int(self.header.chunk_size as i64),
				"have_candle" => Info::Bool(self.header.have_candle),
				"path" => Info::Path(self.path.clone()),
				"presence" => Info::Presence {
					chunks: self.header.number_of_chunks(),
					occupied: self.chunks.iter().map(|c| c.bucket).collect(),
				},
				"candle" => Info::Candle(self.candle),
				_ => continue,
			};
			report.push((field.to_owned(), value));
		}
		report
	}
}

fn load_chunks(header: &DbHeader, data: &[u8]) -> PulseResult<Vec<ChunkEntry>> {
	let cells = chunkmap::scan_cells(data, header.number_of_chunks())?;
	let mut chunks = Vec::with_capacity(cells.len());
	for (bucket, offset) in cells {
		let row = data.get(offset as usize..)
			.ok_or_else(|| PulseError::Corrupt(format!(
				"chunk {} points past EOF", bucket
			)))?;
		let (kind, timestamp) = codec::peek_timestamp(row)?;
		// Chunks must begin with a self-contained row, otherwise the
		// peeked value would be a meaningless delta.
		if kind == RowKind::DeltaMd {
			return PulseError::corrupt(format!("chunk {} starts with a delta row", bucket));
		}
		chunks.push(ChunkEntry {
			bucket,
			first_timestamp: timestamp as u64,
			offset,
		});
	}
	Ok(chunks)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::event::{MarketData, Quote};
	use crate::tick::CURRENT_VERSION;
	use byteorder::{BigEndian, ByteOrder};
	use std::io::Write;

	fn test_header() -> DbHeader {
		DbHeader {
			version: CURRENT_VERSION,
			stock: "TEST".to_owned(),
			date: chrono::NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
			depth: 1,
			scale: 100,
			chunk_size: 300,
			have_candle: false,
		}
	}

	/// Builds a file by hand: header, no candle, chunk map with bucket 0
	/// occupied, one full-md row.
	fn build_file(header: &DbHeader) -> (Vec<u8>, MarketData) {
		let md = MarketData::new(
			header.day_start_ms() + 500,
			vec![Quote::new(12.30, 5)],
			vec![Quote::new(12.40, 5)],
		);
		let mut file = Vec::new();
		header.write_to(&mut file).unwrap();
		let map_at = file.len();
		let map_size = header.chunk_map_size() as usize;
		file.write_all(&vec![0u8; map_size]).unwrap();
		BigEndian::write_u32(&mut file[map_at..], map_size as u32);
		codec::encode_full_md(&md, header.scale, &mut file).unwrap();
		(file, md)
	}

	#[test]
	fn open_loads_chunks_and_rows() -> PulseResult<()> {
		let header = test_header();
		let (bytes, md) = build_file(&header);
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("TEST.pulse");
		std::fs::write(&path, &bytes)?;

		let reader = DbReader::open(&path)?;
		assert_eq!(&header, reader.header());
		assert_eq!(1, reader.chunks().len());
		assert_eq!(0, reader.chunks()[0].bucket);
		assert_eq!(md.timestamp, reader.chunks()[0].first_timestamp);
		assert_eq!(vec![Event::MarketData(md)], reader.all_events()?);
		Ok(())
	}

	#[test]
	fn info_reports_presence() -> PulseResult<()> {
		let header = test_header();
		let (bytes, _) = build_file(&header);
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("TEST.pulse");
		std::fs::write(&path, &bytes)?;

		let reader = DbReader::open(&path)?;
		let report = reader.info(&["stock", "presence", "bogus"]);
		assert_eq!(2, report.len());
		assert_eq!(("stock".to_owned(), Info::Str("TEST".to_owned())), report[0]);
		assert_eq!(
			("presence".to_owned(), Info::Presence { chunks: 288, occupied: vec![0] }),
			report[1]
		);
		Ok(())
	}

	#[test]
	fn missing_file_is_nofile() {
		assert!(matches!(
			DbReader::open("no/such/file.pulse"),
			Err(PulseError::Nofile(_))
		));
	}

	#[test]
	fn version_gate() -> PulseResult<()> {
		let mut header = test_header();
		header.version = CURRENT_VERSION + 1;
		let (bytes, _) = build_file(&header);
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("TEST.pulse");
		std::fs::write(&path, &bytes)?;

		assert!(matches!(
			DbReader::open(&path),
			Err(PulseError::NeedMigration(_))
		));
		// The migration-tolerant open takes the file as-is.
		let reader = DbReader::open_migrating(&path)?;
		assert_eq!(1, reader.all_events()?.len());
		Ok(())
	}
}
